//! TOML configuration file for the `ccp` client.
//!
//! ```toml
//! [connection]
//! appid = "Billing"
//!
//! [pvwa]
//! host = "pvwa.example.com"
//! timeout = 30
//! maxtasks = 10
//! ca = "/etc/ccp/ca.pem"
//!
//! [aim]
//! host = "ccp.example.com"
//! cert = "/etc/ccp/client.pem"
//! key = "/etc/ccp/client.key"
//! ```
//!
//! Section and key names are case-insensitive. `connection` and `pvwa`
//! describe the enclosing vault client and only provide defaults for the
//! `aim` section.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::config::{
    AimSection, ClientConfig, ConfigError, VaultDefaults, VerifyPolicy, integer_value,
    lenient_bool, location, string_value, synonym_once, task_limit,
};
use crate::params::{self, SearchCriteria};
use crate::secret::SecretString;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CCP_CONFIG";

const KNOWN_SECTIONS: &[&str] = &["connection", "pvwa", "aim"];

/// Vault-client login settings from the `connection` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionSection {
    pub appid: Option<String>,
    pub authtype: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Criteria the vault client uses to fetch its own login password.
    pub user_search: Option<SearchCriteria>,
}

/// A parsed config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CcpConfigFile {
    pub path: Option<PathBuf>,
    pub connection: ConnectionSection,
    pub vault: VaultDefaults,
    pub aim: Option<AimSection>,
}

impl CcpConfigFile {
    /// Path from `CCP_CONFIG`, if set.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os(CONFIG_ENV).map(PathBuf::from)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let parsed = Self::parse(&contents, Some(path))?;
        info!(
            "loaded config from {} (aim section: {})",
            path.display(),
            if parsed.aim.is_some() { "yes" } else { "no" }
        );
        Ok(parsed)
    }

    pub fn parse(toml_str: &str, file: Option<&Path>) -> Result<Self, ConfigError> {
        let root: Value =
            toml_edit::de::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let Value::Object(root) = root else {
            return Err(ConfigError::Parse("top level is not a table".into()));
        };

        let origin = file
            .map(|p| format!(" in {}", p.display()))
            .unwrap_or_default();

        let mut sections: Map<String, Value> = Map::new();
        for (name, body) in root {
            let lowered = name.to_lowercase();
            if !KNOWN_SECTIONS.contains(&lowered.as_str()) {
                warn!("unknown section '{name}'{origin}, ignoring");
                continue;
            }
            if sections.insert(lowered.clone(), body).is_some() {
                return Err(ConfigError::DuplicateSection {
                    section: lowered,
                    origin,
                });
            }
        }

        let mut out = Self {
            path: file.map(Path::to_path_buf),
            ..Self::default()
        };

        if let Some(body) = sections.get("connection") {
            let table = section_table("connection", body, file)?;
            out.connection = read_connection(table, file)?;
        }
        out.vault.appid = out.connection.appid.clone();

        if let Some(body) = sections.get("pvwa") {
            let table = section_table("pvwa", body, file)?;
            read_pvwa(table, file, &mut out.vault)?;
        }

        if let Some(body) = sections.get("aim") {
            let table = section_table("aim", body, file)?;
            out.aim = Some(AimSection::from_map(table, "aim", file)?);
        }

        Ok(out)
    }

    /// The effective client config: the `aim` section completed from the
    /// vault defaults, or the defaults alone when there is no such section.
    pub fn client_config(&self) -> ClientConfig {
        self.aim.clone().unwrap_or_default().complete(&self.vault)
    }
}

fn section_table<'a>(
    section: &str,
    body: &'a Value,
    file: Option<&Path>,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match body {
        Value::Object(map) => Ok(map),
        other => Err(ConfigError::InvalidType {
            key: section.to_owned(),
            expected: "table",
            found: other.to_string(),
            location: file
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "config".into()),
        }),
    }
}

fn read_connection(
    table: &Map<String, Value>,
    file: Option<&Path>,
) -> Result<ConnectionSection, ConfigError> {
    let location = location("connection", file);
    let mut out = ConnectionSection::default();

    for (key, value) in table {
        match key.to_lowercase().as_str() {
            "appid" => out.appid = string_value(key, value, &location)?,
            "authtype" => out.authtype = string_value(key, value, &location)?,
            "username" => out.username = string_value(key, value, &location)?,
            "password" => out.password = string_value(key, value, &location)?.map(SecretString::new),
            "user_search" => {
                let mut criteria =
                    SearchCriteria::try_from(value.clone()).map_err(|error| {
                        ConfigError::UserSearch {
                            location: location.clone(),
                            error,
                        }
                    })?;
                params::validate(&mut criteria).map_err(|error| ConfigError::UserSearch {
                    location: location.clone(),
                    error,
                })?;
                out.user_search = Some(criteria);
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

fn read_pvwa(
    table: &Map<String, Value>,
    file: Option<&Path>,
    vault: &mut VaultDefaults,
) -> Result<(), ConfigError> {
    let location = location("pvwa", file);
    let mut seen_verify = false;
    let mut seen_tasks = false;

    for (key, value) in table {
        match key.to_lowercase().as_str() {
            "host" => vault.host = string_value(key, value, &location)?,
            "timeout" => {
                if let Some(secs) = integer_value(key, value, &location)? {
                    vault.timeout = std::time::Duration::from_secs(secs);
                }
            }
            "keep_cookies" => vault.keep_cookies = lenient_bool(key, value, &location)?,
            "maxtasks" | "max_concurrent_tasks" => {
                synonym_once(&mut seen_tasks, ("maxtasks", "max_concurrent_tasks"), &location)?;
                if let Some(tasks) = task_limit(key, value, &location)? {
                    vault.max_concurrent_tasks = tasks;
                }
            }
            "ca" | "verify" => {
                synonym_once(&mut seen_verify, ("ca", "verify"), &location)?;
                vault.verify = Some(VerifyPolicy::from_value(key, value, &location)?);
            }
            _ => {
                return Err(ConfigError::UnknownKey {
                    key: key.clone(),
                    location,
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
