//! Named session factories.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{IsolationLevel, ScopeResult};
use crate::session::{Session, SessionFactory, SessionRequest, SessionResult};

/// Default isolation level of sources that do not configure one.
pub const DEFAULT_ISOLATION: IsolationLevel = IsolationLevel::ReadCommitted;

fn default_isolation() -> IsolationLevel {
    DEFAULT_ISOLATION
}

/// Serializable part of a data source definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSourceSettings {
    /// Source name; empty for the default source.
    #[serde(default)]
    pub name: String,
    /// Isolation level used when a scope leaves it unspecified.
    #[serde(default = "default_isolation")]
    pub default_isolation: IsolationLevel,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            default_isolation: DEFAULT_ISOLATION,
        }
    }
}

impl DataSourceSettings {
    /// Parse settings from JSON.
    pub fn from_json(json: &str) -> ScopeResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A named session factory with a default isolation level.
///
/// Immutable once built; registered process-wide through
/// [`crate::source::Environment`].
#[derive(Clone)]
pub struct DataSource {
    name: String,
    default_isolation: IsolationLevel,
    factory: SessionFactory,
}

impl DataSource {
    /// Create a data source.
    pub fn new(
        name: impl Into<String>,
        default_isolation: IsolationLevel,
        factory: SessionFactory,
    ) -> Self {
        Self {
            name: name.into(),
            default_isolation,
            factory,
        }
    }

    /// Start building a data source around `factory`.
    pub fn builder<F>(factory: F) -> DataSourceBuilder
    where
        F: Fn(&SessionRequest) -> SessionResult<Box<dyn Session>> + Send + Sync + 'static,
    {
        DataSourceBuilder {
            settings: DataSourceSettings::default(),
            factory: Arc::new(factory),
        }
    }

    /// Create a data source from deserialized settings.
    pub fn from_settings(settings: DataSourceSettings, factory: SessionFactory) -> Self {
        Self::new(settings.name, settings.default_isolation, factory)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if this is the default (unnamed) source.
    pub fn is_default(&self) -> bool {
        self.name.is_empty()
    }

    pub fn default_isolation(&self) -> IsolationLevel {
        self.default_isolation
    }

    /// Shared handle on the session factory.
    pub fn factory(&self) -> SessionFactory {
        self.factory.clone()
    }

    /// Open a session directly, outside of any scope.
    pub fn open_session(&self, request: &SessionRequest) -> SessionResult<Box<dyn Session>> {
        (self.factory)(request)
    }
}

impl fmt::Debug for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("name", &self.name)
            .field("default_isolation", &self.default_isolation)
            .finish()
    }
}

/// Builder for [`DataSource`].
pub struct DataSourceBuilder {
    settings: DataSourceSettings,
    factory: SessionFactory,
}

impl DataSourceBuilder {
    /// Set the source name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.settings.name = name.into();
        self
    }

    /// Set the default isolation level.
    pub fn default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.settings.default_isolation = isolation;
        self
    }

    /// Replace name and isolation with loaded settings.
    pub fn settings(mut self, settings: DataSourceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> DataSource {
        DataSource::from_settings(self.settings, self.factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{Probe, RecordingSession};
    use crate::session::Access;

    fn source(probe: Arc<Probe>) -> DataSourceBuilder {
        DataSource::builder(move |request: &SessionRequest| {
            Ok(Box::new(RecordingSession::new(probe.clone(), request.source.clone()))
                as Box<dyn Session>)
        })
    }

    #[test]
    fn test_builder_defaults() {
        let ds = source(Arc::new(Probe::default())).build();
        assert!(ds.is_default());
        assert_eq!(ds.name(), "");
        assert_eq!(ds.default_isolation(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_builder_settings() {
        let ds = source(Arc::new(Probe::default()))
            .name("billing")
            .default_isolation(IsolationLevel::Snapshot)
            .build();
        assert_eq!(ds.name(), "billing");
        assert_eq!(ds.default_isolation(), IsolationLevel::Snapshot);
        assert!(format!("{ds:?}").contains("billing"));
    }

    #[test]
    fn test_open_session_directly() {
        let probe = Arc::new(Probe::default());
        let ds = source(probe.clone()).name("billing").build();
        let session = ds
            .open_session(&SessionRequest {
                source: "billing".into(),
                isolation: IsolationLevel::Serializable,
                access: Access::ReadOnly,
            })
            .unwrap();
        session.dispose().unwrap();
        assert_eq!(probe.opened(), 1);
        assert_eq!(probe.disposals(), 1);
    }

    #[test]
    fn test_settings_from_json() {
        let settings = DataSourceSettings::from_json(
            r#"{"name": "reports", "default_isolation": "Snapshot"}"#,
        )
        .unwrap();
        assert_eq!(settings.name, "reports");
        assert_eq!(settings.default_isolation, IsolationLevel::Snapshot);

        let defaults = DataSourceSettings::from_json("{}").unwrap();
        assert_eq!(defaults, DataSourceSettings::default());

        let err = DataSourceSettings::from_json(r#"{"default_isolation": "Strict"}"#).unwrap_err();
        assert!(err.is_configuration());
    }
}
