//! The ORM session collaborator.
//!
//! A [`Session`] is whatever the underlying data store hands out: it tracks
//! created and deleted entities, commits on [`Session::complete`] and rolls
//! back anything uncommitted on [`Session::dispose`]. This crate never looks
//! inside it; scopes only decide *when* those calls happen.

pub mod lazy;

use std::any::{type_name, Any};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{IsolationLevel, ScopeError, ScopeResult};

pub use lazy::{Lazy, LazyError};

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// An error raised by a session implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SessionError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl SessionError {
    /// Create an error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping the store's own error.
    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// get the message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Whether a session may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Access {
    /// Opened by a unit of work.
    #[default]
    ReadWrite,
    /// Opened by a unit of query.
    ReadOnly,
}

impl Access {
    /// Check if this access mode forbids writes.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Access::ReadOnly)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::ReadWrite => write!(f, "read-write"),
            Access::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// What a session factory is asked to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    /// Name of the data source.
    pub source: String,
    /// Resolved isolation level (never `Unspecified` unless the source
    /// default is `Unspecified`).
    pub isolation: IsolationLevel,
    /// Read-write for units of work, read-only for units of query.
    pub access: Access,
}

/// Builds sessions for a data source. Shared process-wide.
pub type SessionFactory =
    Arc<dyn Fn(&SessionRequest) -> SessionResult<Box<dyn Session>> + Send + Sync>;

/// The ORM session abstraction.
pub trait Session: 'static {
    /// Register a new entity with the session.
    fn mark_as_created(&mut self, entity: &dyn Any) -> SessionResult<()>;

    /// Register an entity for deletion.
    fn mark_as_deleted(&mut self, entity: &dyn Any) -> SessionResult<()>;

    /// Commit everything tracked so far.
    fn complete(&mut self) -> SessionResult<()>;

    /// Release the session, rolling back if it was never completed.
    fn dispose(self: Box<Self>) -> SessionResult<()>;

    /// The store's native session object.
    fn native(&self) -> &dyn Any;

    /// The store's native session object, mutably.
    fn native_mut(&mut self) -> &mut dyn Any;

    /// Type name of the native session, used in error messages.
    fn native_type_name(&self) -> &'static str;
}

impl dyn Session {
    /// Cast the native session to the store's concrete type.
    pub fn resolve<T: Any>(&self) -> ScopeResult<&T> {
        let actual = self.native_type_name();
        self.native()
            .downcast_ref::<T>()
            .ok_or_else(|| ScopeError::NotSupported {
                actual: actual.to_string(),
                requested: type_name::<T>().to_string(),
            })
    }

    /// Cast the native session to the store's concrete type, mutably.
    pub fn resolve_mut<T: Any>(&mut self) -> ScopeResult<&mut T> {
        let actual = self.native_type_name();
        self.native_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| ScopeError::NotSupported {
                actual: actual.to_string(),
                requested: type_name::<T>().to_string(),
            })
    }
}

impl fmt::Debug for dyn Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("native", &self.native_type_name())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_resolve_native() {
        let probe = Arc::new(Probe::default());
        let mut session: Box<dyn Session> = Box::new(RecordingSession::new(probe, "orders"));

        assert_eq!(session.resolve::<FakeNative>().unwrap().label, "orders");
        session.resolve_mut::<FakeNative>().unwrap().label = "renamed".into();
        assert_eq!(session.resolve::<FakeNative>().unwrap().label, "renamed");
    }

    #[test]
    fn test_resolve_wrong_type_names_both() {
        let probe = Arc::new(Probe::default());
        let session: Box<dyn Session> = Box::new(RecordingSession::new(probe, "orders"));

        let err = session.resolve::<String>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("FakeNative"));
        assert!(message.contains("String"));
    }

    #[test]
    fn test_session_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = SessionError::with_source("commit failed", io);
        assert_eq!(err.to_string(), "commit failed");
        assert!(StdError::source(&err).is_some());
    }

    #[test]
    fn test_access_mode() {
        assert!(Access::ReadOnly.is_read_only());
        assert!(!Access::default().is_read_only());
        assert_eq!(Access::ReadOnly.to_string(), "read-only");
    }
}
