//! Scope error types.

use thiserror::Error;

use crate::context::isolation::IsolationLevel;
use crate::session::SessionError;

/// Result type for scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

/// Errors that can occur while opening, completing or disposing scopes.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// No data source registered under the empty name.
    #[error("default source not registered")]
    DefaultSourceNotRegistered,

    /// No data source registered under the given name.
    #[error("source '{0}' not registered")]
    SourceNotRegistered(String),

    /// Registration refused because the name is taken.
    #[error("source '{0}' already registered")]
    SourceAlreadyRegistered(String),

    /// Data source settings could not be parsed.
    #[error("invalid data source settings: {0}")]
    InvalidSettings(#[from] serde_json::Error),

    /// A nested scope asked for an isolation level the root cannot honor.
    #[error("isolation level '{existing}' not compatible with '{requested}'")]
    IsolationConflict {
        existing: IsolationLevel,
        requested: IsolationLevel,
    },

    /// `Require::Existing` with no matching root.
    #[error("requires existing unit of work at the top level, but nothing found")]
    ExistingRequired { source_name: String },

    /// An operation scope was opened inside another one.
    #[error("operation scope does not support nesting")]
    NestedOperationScope,

    /// An operation scope was opened while units of work/query are open.
    #[error("operation scope can not be used inside of unit of work/query")]
    OperationInsideUnit,

    /// The scope was already disposed.
    #[error("already disposed(with success - '{}')", outcome_display(.completed))]
    Disposed { completed: Option<bool> },

    /// `complete` after an earlier failed completion.
    #[error("already completed without success")]
    AlreadyFailed,

    /// The root tried to complete while nested scopes were still pending.
    #[error("not all subordinates are completed ({pending} pending)")]
    IncompleteSubordinates { pending: usize },

    /// The session is currently borrowed through another handle.
    #[error("session is already in use by another scope handle")]
    SessionBusy,

    /// The native session is not of the requested type.
    #[error("native session of type '{actual}' can not be resolved as '{requested}'")]
    NotSupported { actual: String, requested: String },

    /// Error raised by the underlying session.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Several independent cleanup steps failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

fn outcome_display(completed: &Option<bool>) -> &'static str {
    match completed {
        Some(true) => "true",
        Some(false) => "false",
        None => "undecided",
    }
}

impl ScopeError {
    /// Check if this error comes from data source configuration.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ScopeError::DefaultSourceNotRegistered
                | ScopeError::SourceNotRegistered(_)
                | ScopeError::SourceAlreadyRegistered(_)
                | ScopeError::InvalidSettings(_)
        )
    }

    /// Check if this error means scopes were used out of protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ScopeError::ExistingRequired { .. }
                | ScopeError::NestedOperationScope
                | ScopeError::OperationInsideUnit
                | ScopeError::Disposed { .. }
                | ScopeError::AlreadyFailed
                | ScopeError::IncompleteSubordinates { .. }
                | ScopeError::SessionBusy
        )
    }

    /// Create the not-registered error for a source name.
    pub fn not_registered(source: &str) -> Self {
        if source.is_empty() {
            Self::DefaultSourceNotRegistered
        } else {
            Self::SourceNotRegistered(source.to_string())
        }
    }
}

/// Several errors collected from independent cleanup steps.
#[derive(Debug, Error)]
#[error("{} errors occurred: {}", .errors.len(), errors_display(.errors))]
pub struct AggregateError {
    errors: Vec<ScopeError>,
}

fn errors_display(errors: &[ScopeError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("[{}] {}", i + 1, e))
        .collect::<Vec<_>>()
        .join("; ")
}

impl AggregateError {
    /// Collect `errors`. Returns `Ok` when there is nothing to report, the
    /// single error when there is one, and an aggregate otherwise.
    pub fn check(mut errors: Vec<ScopeError>) -> ScopeResult<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ScopeError::Aggregate(Self { errors })),
        }
    }

    /// get the collected errors
    pub fn errors(&self) -> &[ScopeError] {
        &self.errors
    }

    /// Consume into the collected errors.
    pub fn into_errors(self) -> Vec<ScopeError> {
        self.errors
    }
}
