//! Connection string resolution
//!
//! A resolver maps `ResolveArgs` (requested and concrete context type, plus
//! any caller-supplied entries) to a connection string. Resolution is a pure
//! function of the arguments and the resolver's configuration, so one
//! resolver is shared by every scope.

use std::collections::BTreeMap;
use unitwork_core::{ContextTypeId, ResolveArgs, UowError, UowResult};

use crate::config::UowConfig;

/// Resolves the connection string for a context request
pub trait ConnectionStringResolver: Send + Sync {
    /// Connection string for `args`
    ///
    /// # Errors
    ///
    /// Returns `UowError::Configuration` if no connection string can be
    /// determined.
    fn resolve(&self, args: &ResolveArgs) -> UowResult<String>;
}

impl<F> ConnectionStringResolver for F
where
    F: Fn(&ResolveArgs) -> UowResult<String> + Send + Sync,
{
    fn resolve(&self, args: &ResolveArgs) -> UowResult<String> {
        self(args)
    }
}

/// Resolver backed by named connection strings and a default
///
/// Lookup order: the concrete type's full name, its short name, the
/// requested type's full name, its short name, then the default.
#[derive(Debug, Clone, Default)]
pub struct DefaultConnectionStringResolver {
    named: BTreeMap<String, String>,
    default: Option<String>,
}

impl DefaultConnectionStringResolver {
    /// Resolver with no connection strings
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver configured from `unitwork.toml`
    pub fn from_config(config: &UowConfig) -> Self {
        Self {
            named: config.connection_strings().clone(),
            default: config.default_connection_string.clone(),
        }
    }

    /// Set the default connection string
    pub fn with_default(mut self, connection_string: impl Into<String>) -> Self {
        self.default = Some(connection_string.into());
        self
    }

    /// Add a connection string for a type name (full or short)
    pub fn with_named(
        mut self,
        name: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> Self {
        self.named.insert(name.into(), connection_string.into());
        self
    }

    /// Add a connection string for context type `T`
    pub fn with_type<T: ?Sized + 'static>(self, connection_string: impl Into<String>) -> Self {
        self.with_named(ContextTypeId::of::<T>().name(), connection_string)
    }

    fn lookup(&self, ty: ContextTypeId) -> Option<&String> {
        self.named
            .get(ty.name())
            .or_else(|| self.named.get(ty.short_name()))
    }
}

impl ConnectionStringResolver for DefaultConnectionStringResolver {
    fn resolve(&self, args: &ResolveArgs) -> UowResult<String> {
        let candidates = [args.concrete_type(), args.context_type()];
        candidates
            .into_iter()
            .flatten()
            .find_map(|ty| self.lookup(ty))
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| {
                let requested = args
                    .context_type()
                    .map(|t| t.short_name())
                    .unwrap_or("<unknown>");
                UowError::configuration(format!(
                    "No connection string configured for {} and no default connection string",
                    requested
                ))
            })
    }
}
