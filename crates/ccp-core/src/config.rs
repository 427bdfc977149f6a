//! Client configuration for the Central Credential Provider.
//!
//! A [`ClientConfig`] is either built in code or mapped field by field from a
//! serialized section (a JSON-like map, typically read from the `[aim]` table
//! of a config file). Fields left unset by the section are completed from
//! [`VaultDefaults`], the settings of the enclosing vault-API client.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::params::ParamError;
use crate::secret::SecretString;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of requests allowed in flight at once.
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;

/// Upper bound for `max_concurrent_tasks`; the permit ceiling of
/// `tokio::sync::Semaphore`.
pub const MAX_CONCURRENT_TASKS: usize = usize::MAX >> 3;

pub const DEFAULT_KEEP_COOKIES: bool = false;

/// Policy applied when verification is unset or `false`.
pub const DEFAULT_VERIFY: VerifyPolicy = VerifyPolicy::Disabled;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from building or loading a client configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing mandatory parameter '{0}' (required parameters are: host, appid, cert)")]
    MissingField(&'static str),

    #[error("parameter '{field}': file not found: {}", .path.display())]
    FileNotFound { field: &'static str, path: PathBuf },

    #[error("max_concurrent_tasks must be > 0")]
    ZeroConcurrency,

    #[error("max_concurrent_tasks must be at most {max}, got {value}")]
    TooManyTasks { value: u64, max: usize },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("unknown attribute '{key}' within {location}")]
    UnknownKey { key: String, location: String },

    #[error(
        "duplicate synonym parameter: '{first}', '{second}' within {location}. Specify only one of them"
    )]
    DuplicateSynonym {
        first: &'static str,
        second: &'static str,
        location: String,
    },

    #[error("section '{section}' defined more than once{origin}")]
    DuplicateSection { section: String, origin: String },

    #[error("invalid integer '{key}' within {location}: {value}")]
    InvalidInteger {
        key: String,
        value: String,
        location: String,
    },

    #[error("invalid boolean '{key}' within {location}: {value}")]
    InvalidBoolean {
        key: String,
        value: String,
        location: String,
    },

    #[error("invalid '{key}' within {location}: expected {expected}, got {found}")]
    InvalidType {
        key: String,
        expected: &'static str,
        found: String,
        location: String,
    },

    #[error("invalid 'user_search' within {location}: {error}")]
    UserSearch { location: String, error: ParamError },

    #[error("failed to read config {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("config parse error: {0}")]
    Parse(String),
}

/// Describe a config section for error messages.
pub(crate) fn location(section: &str, file: Option<&Path>) -> String {
    match file {
        Some(path) => format!("section '{section}' in {}", path.display()),
        None => format!("section '{section}'"),
    }
}

// ---------------------------------------------------------------------------
// Verification policy
// ---------------------------------------------------------------------------

/// Server certificate verification policy.
///
/// Serialized as `false`, `true`, or a path to a CA file or directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawVerify", into = "RawVerify")]
pub enum VerifyPolicy {
    /// Platform trust store, hostname checking disabled.
    Disabled,
    /// Platform trust store with hostname checking.
    SystemTrust,
    /// Trust only the CA bundle file, or every certificate in the directory.
    CaPath(PathBuf),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawVerify {
    Flag(bool),
    Path(PathBuf),
}

impl From<RawVerify> for VerifyPolicy {
    fn from(raw: RawVerify) -> Self {
        match raw {
            RawVerify::Flag(flag) => flag.into(),
            RawVerify::Path(path) => Self::CaPath(path),
        }
    }
}

impl From<VerifyPolicy> for RawVerify {
    fn from(policy: VerifyPolicy) -> Self {
        match policy {
            VerifyPolicy::Disabled => Self::Flag(false),
            VerifyPolicy::SystemTrust => Self::Flag(true),
            VerifyPolicy::CaPath(path) => Self::Path(path),
        }
    }
}

impl From<bool> for VerifyPolicy {
    fn from(flag: bool) -> Self {
        if flag { Self::SystemTrust } else { Self::Disabled }
    }
}

impl From<PathBuf> for VerifyPolicy {
    fn from(path: PathBuf) -> Self {
        Self::CaPath(path)
    }
}

impl From<&Path> for VerifyPolicy {
    fn from(path: &Path) -> Self {
        Self::CaPath(path.to_path_buf())
    }
}

impl VerifyPolicy {
    /// Map a serialized `verify`/`ca` value. Only booleans and strings are
    /// accepted.
    pub fn from_value(key: &str, value: &Value, location: &str) -> Result<Self, ConfigError> {
        match value {
            Value::Bool(flag) => Ok((*flag).into()),
            Value::String(path) => Ok(Self::CaPath(PathBuf::from(path))),
            other => Err(ConfigError::InvalidType {
                key: key.to_owned(),
                expected: "boolean or CA path",
                found: other.to_string(),
                location: location.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

/// Settings for one Central Credential Provider client.
///
/// Serializing a config never emits the passphrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientConfig {
    pub host: Option<String>,
    pub appid: Option<String>,
    /// Client certificate (PEM). May also hold the private key.
    pub cert: Option<PathBuf>,
    /// Private key (PEM) when not bundled with the certificate.
    pub key: Option<PathBuf>,
    #[serde(skip)]
    pub passphrase: Option<SecretString>,
    pub verify: Option<VerifyPolicy>,
    #[serde(serialize_with = "serialize_secs")]
    pub timeout: Duration,
    pub max_concurrent_tasks: usize,
    /// Keep cookies between requests of the same session.
    pub keep_cookies: bool,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: None,
            appid: None,
            cert: None,
            key: None,
            passphrase: None,
            verify: None,
            timeout: DEFAULT_TIMEOUT,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            keep_cookies: DEFAULT_KEEP_COOKIES,
        }
    }
}

/// The mandatory identity fields of a [`ClientConfig`].
#[derive(Debug, Clone, Copy)]
pub struct RequiredFields<'a> {
    pub host: &'a str,
    pub appid: &'a str,
    pub cert: &'a Path,
}

impl ClientConfig {
    pub fn new(
        host: impl Into<String>,
        appid: impl Into<String>,
        cert: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            appid: Some(appid.into()),
            cert: Some(cert.into()),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<SecretString>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    pub fn with_verify(mut self, verify: impl Into<VerifyPolicy>) -> Self {
        self.verify = Some(verify.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_keep_cookies(mut self, keep: bool) -> Self {
        self.keep_cookies = keep;
        self
    }

    /// Map a serialized section and complete it from `defaults`.
    pub fn from_section(
        map: &Map<String, Value>,
        section: &str,
        file: Option<&Path>,
        defaults: &VaultDefaults,
    ) -> Result<Self, ConfigError> {
        Ok(AimSection::from_map(map, section, file)?.complete(defaults))
    }

    /// The mandatory fields, or the first one that is missing or empty.
    pub fn required(&self) -> Result<RequiredFields<'_>, ConfigError> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or(ConfigError::MissingField("host"))?;
        let appid = self
            .appid
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or(ConfigError::MissingField("appid"))?;
        let cert = self
            .cert
            .as_deref()
            .filter(|c| !c.as_os_str().is_empty())
            .ok_or(ConfigError::MissingField("cert"))?;
        Ok(RequiredFields { host, appid, cert })
    }

    /// Verification policy with unset and `false` mapped to [`DEFAULT_VERIFY`].
    pub fn effective_verify(&self) -> VerifyPolicy {
        match &self.verify {
            None | Some(VerifyPolicy::Disabled) => DEFAULT_VERIFY,
            Some(policy) => policy.clone(),
        }
    }

    pub fn check_limits(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_tasks == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.max_concurrent_tasks > MAX_CONCURRENT_TASKS {
            return Err(ConfigError::TooManyTasks {
                value: u64::try_from(self.max_concurrent_tasks).unwrap_or(u64::MAX),
                max: MAX_CONCURRENT_TASKS,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Section mapping
// ---------------------------------------------------------------------------

/// Settings inherited from the enclosing vault-API client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultDefaults {
    pub host: Option<String>,
    pub appid: Option<String>,
    pub timeout: Duration,
    pub max_concurrent_tasks: usize,
    pub verify: Option<VerifyPolicy>,
    /// Cookie policy of the vault client itself. Not inherited.
    pub keep_cookies: bool,
}

impl Default for VaultDefaults {
    fn default() -> Self {
        Self {
            host: None,
            appid: None,
            timeout: DEFAULT_TIMEOUT,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            verify: None,
            keep_cookies: DEFAULT_KEEP_COOKIES,
        }
    }
}

/// A validated but not yet completed credential-provider section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AimSection {
    pub host: Option<String>,
    pub appid: Option<String>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub passphrase: Option<SecretString>,
    pub verify: Option<VerifyPolicy>,
    pub timeout: Option<Duration>,
    pub max_concurrent_tasks: Option<usize>,
    pub keep_cookies: bool,
}

impl Default for AimSection {
    fn default() -> Self {
        Self {
            host: None,
            appid: None,
            cert: None,
            key: None,
            passphrase: None,
            verify: None,
            timeout: None,
            max_concurrent_tasks: None,
            keep_cookies: DEFAULT_KEEP_COOKIES,
        }
    }
}

impl AimSection {
    /// Map every key of `map` (case-insensitive) onto a field. Unknown keys,
    /// both members of a synonym pair, and malformed values are errors.
    pub fn from_map(
        map: &Map<String, Value>,
        section: &str,
        file: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let location = location(section, file);
        let mut out = Self::default();
        let mut seen_verify = false;
        let mut seen_tasks = false;

        for (key, value) in map {
            match key.to_lowercase().as_str() {
                "host" => out.host = string_value(key, value, &location)?,
                "appid" => out.appid = string_value(key, value, &location)?,
                "cert" => out.cert = string_value(key, value, &location)?.map(PathBuf::from),
                "key" => out.key = string_value(key, value, &location)?.map(PathBuf::from),
                "passphrase" => {
                    out.passphrase = string_value(key, value, &location)?.map(SecretString::new)
                }
                "timeout" => {
                    out.timeout = integer_value(key, value, &location)?.map(Duration::from_secs)
                }
                "keep_cookies" => out.keep_cookies = strict_bool(key, value, &location)?,
                "maxtasks" | "max_concurrent_tasks" => {
                    synonym_once(&mut seen_tasks, ("maxtasks", "max_concurrent_tasks"), &location)?;
                    out.max_concurrent_tasks = task_limit(key, value, &location)?;
                }
                "ca" | "verify" => {
                    synonym_once(&mut seen_verify, ("ca", "verify"), &location)?;
                    out.verify = match value {
                        Value::Null => None,
                        value => Some(VerifyPolicy::from_value(key, value, &location)?),
                    };
                }
                _ => {
                    return Err(ConfigError::UnknownKey {
                        key: key.clone(),
                        location,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Fill unset fields from the vault client's settings.
    pub fn complete(self, defaults: &VaultDefaults) -> ClientConfig {
        let verify = self
            .verify
            .or_else(|| defaults.verify.clone())
            .unwrap_or(DEFAULT_VERIFY);
        ClientConfig {
            host: self.host.or_else(|| defaults.host.clone()),
            appid: self.appid.or_else(|| defaults.appid.clone()),
            cert: self.cert,
            key: self.key,
            passphrase: self.passphrase,
            verify: Some(verify),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            max_concurrent_tasks: self
                .max_concurrent_tasks
                .unwrap_or(defaults.max_concurrent_tasks),
            keep_cookies: self.keep_cookies,
        }
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

pub(crate) fn synonym_once(
    seen: &mut bool,
    pair: (&'static str, &'static str),
    location: &str,
) -> Result<(), ConfigError> {
    if *seen {
        return Err(ConfigError::DuplicateSynonym {
            first: pair.0,
            second: pair.1,
            location: location.to_owned(),
        });
    }
    *seen = true;
    Ok(())
}

pub(crate) fn string_value(
    key: &str,
    value: &Value,
    location: &str,
) -> Result<Option<String>, ConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(ConfigError::InvalidType {
            key: key.to_owned(),
            expected: "string",
            found: other.to_string(),
            location: location.to_owned(),
        }),
    }
}

/// Integers may be given as numbers or numeric strings.
pub(crate) fn integer_value(
    key: &str,
    value: &Value,
    location: &str,
) -> Result<Option<u64>, ConfigError> {
    let invalid = || ConfigError::InvalidInteger {
        key: key.to_owned(),
        value: value.to_string(),
        location: location.to_owned(),
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_u64().map(Some).ok_or_else(invalid),
        Value::String(s) => s.trim().parse::<u64>().map(Some).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

/// A `max_concurrent_tasks` value: between 1 and [`MAX_CONCURRENT_TASKS`].
pub(crate) fn task_limit(
    key: &str,
    value: &Value,
    location: &str,
) -> Result<Option<usize>, ConfigError> {
    let Some(n) = integer_value(key, value, location)? else {
        return Ok(None);
    };
    if n == 0 {
        return Err(ConfigError::ZeroConcurrency);
    }
    match usize::try_from(n) {
        Ok(tasks) if tasks <= MAX_CONCURRENT_TASKS => Ok(Some(tasks)),
        _ => Err(ConfigError::TooManyTasks {
            value: n,
            max: MAX_CONCURRENT_TASKS,
        }),
    }
}

fn strict_bool(key: &str, value: &Value, location: &str) -> Result<bool, ConfigError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        other => Err(ConfigError::InvalidBoolean {
            key: key.to_owned(),
            value: other.to_string(),
            location: location.to_owned(),
        }),
    }
}

/// Booleans may also be spelled as YAML-style words (`yes`, `off`, ...).
pub(crate) fn lenient_bool(key: &str, value: &Value, location: &str) -> Result<bool, ConfigError> {
    if let Value::String(s) = value {
        match s.to_lowercase().as_str() {
            "y" | "yes" | "true" | "on" => return Ok(true),
            "n" | "no" | "false" | "off" => return Ok(false),
            _ => {}
        }
    }
    strict_bool(key, value, location)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
