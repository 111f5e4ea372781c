//! Process-wide registry of data sources.
//!
//! Writers are serialized and publish a fresh copy of the map; readers only
//! clone the current `Arc` and never wait on a writer's rebuild.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::context::{ScopeError, ScopeResult};
use crate::source::data_source::DataSource;

type SourceMap = HashMap<String, Arc<DataSource>>;

/// Registry of named data sources.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
#[derive(Clone, Default)]
pub struct DataSourceRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// Current published map.
    sources: RwLock<Arc<SourceMap>>,
    /// Serializes copy-on-write updates.
    write_lock: Mutex<()>,
}

impl DataSourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current map of sources.
    pub fn snapshot(&self) -> Arc<SourceMap> {
        self.inner.sources.read().clone()
    }

    fn update<R>(&self, f: impl FnOnce(&mut SourceMap) -> R) -> R {
        let _guard = self.inner.write_lock.lock();
        let mut next = SourceMap::clone(&self.snapshot());
        let result = f(&mut next);
        *self.inner.sources.write() = Arc::new(next);
        result
    }

    /// Register `source` under its name.
    ///
    /// An existing source with the same name is replaced, unless
    /// `throw_if_exists` is set, in which case registration fails.
    pub fn register(&self, source: DataSource, throw_if_exists: bool) -> ScopeResult<()> {
        let name = source.name().to_string();
        self.update(|sources| {
            if throw_if_exists && sources.contains_key(&name) {
                return Err(ScopeError::SourceAlreadyRegistered(name));
            }
            tracing::debug!(source = %name, isolation = %source.default_isolation(), "data source registered");
            sources.insert(name, Arc::new(source));
            Ok(())
        })
    }

    /// Remove the source registered under `name`. Returns whether one was
    /// removed.
    pub fn unregister(&self, name: &str) -> bool {
        if !self.contains(name) {
            return false;
        }
        self.update(|sources| {
            let removed = sources.remove(name).is_some();
            if removed {
                tracing::debug!(source = %name, "data source unregistered");
            }
            removed
        })
    }

    /// Get the source registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<DataSource>> {
        self.snapshot().get(name).cloned()
    }

    /// Get the source registered under `name`, or the not-registered error.
    pub fn resolve(&self, name: &str) -> ScopeResult<Arc<DataSource>> {
        self.get(name).ok_or_else(|| ScopeError::not_registered(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snapshot().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("sources", &self.names())
            .finish()
    }
}

static GLOBAL: OnceLock<DataSourceRegistry> = OnceLock::new();

/// Process-wide entry point for data source registration.
pub struct Environment;

impl Environment {
    /// The registry scopes resolve their sources from.
    pub fn registry() -> &'static DataSourceRegistry {
        GLOBAL.get_or_init(DataSourceRegistry::new)
    }

    /// Register a data source process-wide.
    pub fn register_data_source(source: DataSource, throw_if_exists: bool) -> ScopeResult<()> {
        Self::registry().register(source, throw_if_exists)
    }

    /// Remove a data source. Returns whether one was removed.
    pub fn unregister_data_source(name: &str) -> bool {
        Self::registry().unregister(name)
    }

    /// Look up a registered data source.
    pub fn data_source(name: &str) -> Option<Arc<DataSource>> {
        Self::registry().get(name)
    }
}
