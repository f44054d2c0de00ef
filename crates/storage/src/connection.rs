//! Connection string parsing for the in-memory backend
//!
//! Connection strings use the familiar `Key=Value;Key=Value` syntax. Keys are
//! case-insensitive and surrounding whitespace is ignored:
//!
//! ```text
//! Data Source=orders;Command Timeout=10
//! ```
//!
//! `Data Source` names the in-memory database and is required.
//! `Command Timeout` (whole seconds) presets the command timeout of every
//! context opened with the string. Unknown keys are kept but ignored.

use std::collections::BTreeMap;
use std::time::Duration;
use unitwork_core::{BackendError, BackendResult};

const DATA_SOURCE: &str = "data source";
const COMMAND_TIMEOUT: &str = "command timeout";

/// Parsed connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    data_source: String,
    command_timeout: Option<Duration>,
    options: BTreeMap<String, String>,
}

impl ConnectionString {
    /// Parse a connection string
    ///
    /// # Errors
    ///
    /// Fails if a segment has no `=`, if `Data Source` is missing or empty,
    /// or if `Command Timeout` is not a whole number of seconds.
    pub fn parse(raw: &str) -> BackendResult<Self> {
        let mut options = BTreeMap::new();

        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                BackendError::failed(format!("malformed connection string segment '{}'", segment))
            })?;
            options.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let data_source = options
            .get(DATA_SOURCE)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| {
                BackendError::failed(format!("connection string '{}' has no Data Source", raw))
            })?;

        let command_timeout = match options.get(COMMAND_TIMEOUT) {
            None => None,
            Some(v) => {
                let secs: u64 = v.parse().map_err(|_| {
                    BackendError::failed(format!("invalid Command Timeout '{}'", v))
                })?;
                Some(Duration::from_secs(secs))
            }
        };

        Ok(Self {
            data_source,
            command_timeout,
            options,
        })
    }

    /// Name of the in-memory database
    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// Preset command timeout
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout
    }

    /// Raw option value by case-insensitive key
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }
}
