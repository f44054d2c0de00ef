//! Unit-of-work configuration via `unitwork.toml`
//!
//! Holds the named connection strings, the default connection string, the
//! process-wide default options and filters, and the clock used to normalize
//! materialized timestamps.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use unitwork_core::{
    DataFilter, FilterSet, IsolationLevel, ScopeOption, TimestampKind, UnitOfWorkDefaults,
    UnitOfWorkOptions, UowError, UowResult, Value, MAY_HAVE_TENANT, MUST_HAVE_TENANT, SOFT_DELETE,
};

/// Config file name
pub const CONFIG_FILE_NAME: &str = "unitwork.toml";

/// `[unit_of_work]` section: default options for every scope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UnitOfWorkSection {
    /// Wrap scopes in an ambient transaction
    #[serde(default = "default_true")]
    pub is_transactional: bool,
    /// Transaction and command timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Lazy loading flag pushed to every context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_lazy_load_enabled: Option<bool>,
    /// Ambient transaction isolation level
    #[serde(default)]
    pub isolation_level: IsolationLevel,
    /// Relation of a new scope to an active one
    #[serde(default)]
    pub scope: ScopeOption,
}

impl Default for UnitOfWorkSection {
    fn default() -> Self {
        Self {
            is_transactional: true,
            timeout_secs: None,
            is_lazy_load_enabled: None,
            isolation_level: IsolationLevel::default(),
            scope: ScopeOption::default(),
        }
    }
}

/// `[[filters]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterConfig {
    /// Filter name
    pub name: String,
    /// Initial state
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// String parameters, e.g. `tenant_id`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl FilterConfig {
    fn enabled(name: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            parameters: BTreeMap::new(),
        }
    }

    fn to_filter(&self) -> DataFilter {
        self.parameters.iter().fold(
            DataFilter::new(self.name.clone(), self.enabled),
            |filter, (k, v)| filter.with_parameter(k.clone(), Value::String(v.clone())),
        )
    }
}

/// Configuration loaded from `unitwork.toml`
///
/// # Example
///
/// ```toml
/// default_connection_string = "Data Source=default"
/// clock = "utc"
///
/// [connection_strings]
/// BlogContext = "Data Source=blogs"
///
/// [unit_of_work]
/// is_transactional = true
/// timeout_secs = 30
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UowConfig {
    /// Fallback connection string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_connection_string: Option<String>,
    /// Timestamp normalization target: `"utc"` or `"local"`
    #[serde(default = "default_clock")]
    pub clock: String,
    /// Connection strings by context type name (full or short)
    #[serde(default)]
    pub connection_strings: BTreeMap<String, String>,
    /// Default scope options
    #[serde(default)]
    pub unit_of_work: UnitOfWorkSection,
    /// Default data filters
    #[serde(default = "default_filters")]
    pub filters: Vec<FilterConfig>,
}

fn default_true() -> bool {
    true
}

fn default_clock() -> String {
    "utc".to_string()
}

fn default_filters() -> Vec<FilterConfig> {
    vec![
        FilterConfig::enabled(SOFT_DELETE),
        FilterConfig::enabled(MUST_HAVE_TENANT),
        FilterConfig::enabled(MAY_HAVE_TENANT),
    ]
}

impl Default for UowConfig {
    fn default() -> Self {
        Self {
            default_connection_string: None,
            clock: default_clock(),
            connection_strings: BTreeMap::new(),
            unit_of_work: UnitOfWorkSection::default(),
            filters: default_filters(),
        }
    }
}

impl UowConfig {
    /// Parse the clock string into a `TimestampKind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"utc"` or `"local"`.
    pub fn clock_kind(&self) -> UowResult<TimestampKind> {
        match self.clock.as_str() {
            "utc" => Ok(TimestampKind::Utc),
            "local" => Ok(TimestampKind::Local),
            other => Err(UowError::configuration(format!(
                "Invalid clock '{}' in {}. Expected \"utc\" or \"local\".",
                other, CONFIG_FILE_NAME
            ))),
        }
    }

    /// Named connection strings
    pub fn connection_strings(&self) -> &BTreeMap<String, String> {
        &self.connection_strings
    }

    /// Default options and filters for every scope
    pub fn defaults(&self) -> UnitOfWorkDefaults {
        let section = &self.unit_of_work;
        UnitOfWorkDefaults {
            options: UnitOfWorkOptions {
                is_transactional: Some(section.is_transactional),
                timeout: section.timeout_secs.map(Duration::from_secs),
                is_lazy_load_enabled: section.is_lazy_load_enabled,
                isolation_level: Some(section.isolation_level),
                scope: Some(section.scope),
            },
            filters: self.filters.iter().map(FilterConfig::to_filter).collect::<FilterSet>(),
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Unit of work configuration
#
# Connection string used when no named entry matches a context type
# default_connection_string = "Data Source=default"

# Target kind for materialized timestamps: "utc" (default) or "local"
clock = "utc"

# Connection strings by context type name (full path or short name)
[connection_strings]
# BlogContext = "Data Source=blogs;Command Timeout=30"

[unit_of_work]
is_transactional = true
# timeout_secs = 30
# is_lazy_load_enabled = true
isolation_level = "read_committed"
# "required" joins an active scope, "requires_new" always starts one,
# "suppress" starts a non-transactional one
scope = "required"

[[filters]]
name = "SoftDelete"
enabled = true

[[filters]]
name = "MustHaveTenant"
enabled = true

[[filters]]
name = "MayHaveTenant"
enabled = true
"#
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the text cannot be parsed or holds
    /// an invalid value.
    pub fn from_toml_str(content: &str) -> UowResult<Self> {
        let config: UowConfig = toml::from_str(content)
            .map_err(|e| UowError::configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> UowResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            UowError::configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: UowConfig = toml::from_str(&content).map_err(|e| {
            UowError::configuration(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> UowResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                UowError::configuration(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> UowResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| UowError::configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            UowError::configuration(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    fn validate(&self) -> UowResult<()> {
        self.clock_kind()?;
        let mut seen = std::collections::BTreeSet::new();
        for filter in &self.filters {
            if !seen.insert(filter.name.as_str()) {
                return Err(UowError::configuration(format!(
                    "Filter '{}' is configured more than once",
                    filter.name
                )));
            }
        }
        Ok(())
    }
}
