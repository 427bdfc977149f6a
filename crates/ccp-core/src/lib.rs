//! Shared types for the Central Credential Provider client: configuration,
//! search criteria, vault error payloads and the redacting secret wrapper.
//!
//! Nothing in this crate performs network I/O.

pub mod config;
pub mod config_file;
pub mod error;
pub mod params;
pub mod secret;

pub use config::{ClientConfig, ConfigError, VaultDefaults, VerifyPolicy};
pub use error::{ApiError, ErrorCode};
pub use params::{ParamError, SearchCriteria};
pub use secret::{SecretResult, SecretString};
