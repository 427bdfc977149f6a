//! Async mutual-TLS client for the Central Credential Provider web service.
//!
//! ```no_run
//! # async fn demo() -> Result<(), ccp_client::ProviderError> {
//! use ccp_client::CredentialProvider;
//! use ccp_core::{ClientConfig, SearchCriteria};
//!
//! let config = ClientConfig::new("ccp.example.com", "Billing", "/etc/ccp/client.pem");
//! let provider = CredentialProvider::new(config);
//! let secret = provider
//!     .get_secret(SearchCriteria::new().with("safe", "Linux").with("object", "root"))
//!     .await?;
//! # drop(secret);
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod error;
pub mod pool;
pub mod provider;
pub mod tls;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::ProviderError;
pub use pool::{Session, SessionPool};
pub use provider::{CredentialProvider, SessionScope};
pub use tls::{TlsBundle, TrustAnchors};
