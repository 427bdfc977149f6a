//! GetPassword search criteria and their validation.
//!
//! The Central Credential Provider only understands a fixed set of query
//! parameters. Criteria are checked against that allow-list and their keys
//! normalized to lowercase before any request leaves the process.

use std::fmt;

use serde_json::Value;

/// Query parameters accepted by the GetPassword web service.
pub const ALLOWED_PARAMETERS: &[&str] = &[
    "safe",
    "folder",
    "object",
    "username",
    "address",
    "database",
    "policyid",
    "reason",
    "connectiontimeout",
    "query",
    "queryformat",
    "failrequestonpasswordchange",
];

/// Query parameter carrying the application identity.
pub const APPID_PARAMETER: &str = "appid";

/// Placeholder substituted for the application identity in diagnostics.
pub const HIDDEN_APPID: &str = "<hidden>";

// ---------------------------------------------------------------------------
// Validation error
// ---------------------------------------------------------------------------

/// Errors returned by search criteria validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    NotAMapping {
        found: &'static str,
    },
    InvalidValue {
        key: String,
        found: &'static str,
    },
    UnknownParameter {
        key: String,
        value: String,
    },
    DuplicateParameter {
        key: String,
    },
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAMapping { found } => {
                write!(f, "parameter is not a dictionary (got {found})")
            }
            Self::InvalidValue { key, found } => {
                write!(f, "parameter {key} must be a string, number or boolean (got {found})")
            }
            Self::UnknownParameter { key, value } => {
                write!(f, "unknown parameter: {key}={value}")
            }
            Self::DuplicateParameter { key } => {
                write!(f, "parameter {key} given more than once")
            }
        }
    }
}

impl std::error::Error for ParamError {}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// SearchCriteria
// ---------------------------------------------------------------------------

/// Ordered search parameters for one GetPassword request.
///
/// The application identity is kept apart from the search keys: it is not
/// part of the allow-list and is only ever filled in by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    entries: Vec<(String, String)>,
    appid: Option<String>,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`SearchCriteria::insert`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set `key` to `value`. An existing entry with the same key keeps its
    /// position; otherwise the entry is appended.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Use an explicit application identity for this request.
    pub fn with_appid(mut self, appid: impl Into<String>) -> Self {
        self.appid = Some(appid.into());
        self
    }

    pub fn appid(&self) -> Option<&str> {
        self.appid.as_deref()
    }

    /// Fill in the application identity unless one is already set.
    /// Returns `true` when `appid` was applied.
    pub fn inject_appid(&mut self, appid: &str) -> bool {
        if self.appid.is_some() {
            return false;
        }
        self.appid = Some(appid.to_owned());
        true
    }

    /// Query string pairs: the search keys in order, then `appid`.
    pub fn query_pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> = self.iter().collect();
        if let Some(appid) = self.appid.as_deref() {
            pairs.push((APPID_PARAMETER, appid));
        }
        pairs
    }

    /// Render the parameters for diagnostics with the application identity
    /// replaced by [`HIDDEN_APPID`].
    pub fn redacted(&self) -> String {
        let mut parts: Vec<String> = self.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        if self.appid.is_some() {
            parts.push(format!("{APPID_PARAMETER}: {HIDDEN_APPID}"));
        }
        format!("{{{}}}", parts.join(", "))
    }
}

impl<K, V> FromIterator<(K, V)> for SearchCriteria
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut criteria = Self::new();
        for (k, v) in iter {
            criteria.insert(k, v);
        }
        criteria
    }
}

impl TryFrom<Value> for SearchCriteria {
    type Error = ParamError;

    /// Accepts a JSON object whose values are strings, numbers or booleans.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(ParamError::NotAMapping {
                    found: json_kind(&other),
                });
            }
        };

        let mut criteria = Self::new();
        for (key, value) in map {
            let value = match value {
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(ParamError::InvalidValue {
                        key,
                        found: json_kind(&other),
                    });
                }
            };
            criteria.entries.push((key, value));
        }
        Ok(criteria)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check every key against [`ALLOWED_PARAMETERS`] and rename it in place to
/// its lowercase form. Values and entry order are preserved.
pub fn validate(criteria: &mut SearchCriteria) -> Result<(), ParamError> {
    for i in 0..criteria.entries.len() {
        let lowered = criteria.entries[i].0.to_lowercase();

        if !ALLOWED_PARAMETERS.contains(&lowered.as_str()) {
            let (key, value) = &criteria.entries[i];
            return Err(ParamError::UnknownParameter {
                key: key.clone(),
                value: value.clone(),
            });
        }

        // Earlier entries are already normalized.
        if criteria.entries[..i].iter().any(|(k, _)| *k == lowered) {
            return Err(ParamError::DuplicateParameter { key: lowered });
        }

        criteria.entries[i].0 = lowered;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
