//! Constants registration table
//!
//! Overridable values (tool locations, cache directories, ...) are looked up
//! by key in a table that callers populate explicitly at startup. Each entry
//! is a provider closure evaluated on every lookup, so providers may compute
//! their value from the environment at call time.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

type Provider = Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// Key under which the tools cache directory is registered
pub const TOOLS_CACHE_DIR: &str = "tools.cache_dir";

/// Key prefix for per-binary path overrides (`bin.<name>`)
pub const BIN_OVERRIDE_PREFIX: &str = "bin.";

/// Build the override key for a binary name
pub fn bin_override_key(name: &str) -> String {
    format!("{}{}", BIN_OVERRIDE_PREFIX, name)
}

/// Mapping from configuration key to provider function
#[derive(Clone, Default)]
pub struct ConstantRegistry {
    providers: BTreeMap<String, Provider>,
}

impl ConstantRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a key, replacing any previous one
    pub fn register<T, F>(&mut self, key: impl Into<String>, provider: F)
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let key = key.into();
        debug!(key = %key, "registering constant provider");
        self.providers
            .insert(key, Arc::new(move || Box::new(provider()) as Box<dyn Any + Send + Sync>));
    }

    /// Register a fixed value for a key
    pub fn register_value<T>(&mut self, key: impl Into<String>, value: T)
    where
        T: Any + Clone + Send + Sync,
    {
        self.register(key, move || value.clone());
    }

    /// Remove a key, returning whether it was present
    pub fn unregister(&mut self, key: &str) -> bool {
        self.providers.remove(key).is_some()
    }

    /// Evaluate the provider for `key`.
    ///
    /// Returns `None` when the key is unknown or its provider yields a value of
    /// a different type.
    pub fn get<T: Any>(&self, key: &str) -> Option<T> {
        let provider = self.providers.get(key)?;
        provider().downcast::<T>().ok().map(|v| *v)
    }

    /// Evaluate the provider for `key` or fall back to `default`
    pub fn get_or<T: Any>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Whether a provider is registered for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.providers.contains_key(key)
    }

    /// Registered keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(|k| k.as_str())
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl fmt::Debug for ConstantRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstantRegistry")
            .field("keys", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
