//! When a finished session is actually disposed.

use std::cell::RefCell;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::error::{AggregateError, ScopeError, ScopeResult};
use crate::session::Session;

/// Decides when a finished root's session is disposed.
pub trait TerminationPolicy {
    /// Hand over the session of a root that just finished.
    fn terminate(&self, session: Box<dyn Session>, completed: bool) -> ScopeResult<()>;
}

/// Which termination policy an operation scope installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TerminationMode {
    /// Dispose sessions as soon as their root finishes.
    #[default]
    Immediate,
    /// Keep sessions alive until the operation scope exits.
    Deferred,
}

impl fmt::Display for TerminationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationMode::Immediate => write!(f, "immediate"),
            TerminationMode::Deferred => write!(f, "deferred"),
        }
    }
}

/// Disposes the session right away.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateTermination;

impl TerminationPolicy for ImmediateTermination {
    fn terminate(&self, session: Box<dyn Session>, completed: bool) -> ScopeResult<()> {
        tracing::debug!(completed, "disposing session");
        session.dispose()?;
        Ok(())
    }
}

/// Buffers sessions and disposes all of them when the policy is disposed.
///
/// Once disposed, late sessions are disposed immediately rather than
/// buffered.
pub struct DeferredTermination {
    pending: RefCell<Option<Vec<Box<dyn Session>>>>,
}

impl DeferredTermination {
    /// Create an empty policy.
    pub fn new() -> Self {
        Self {
            pending: RefCell::new(Some(Vec::new())),
        }
    }

    /// Number of sessions waiting for disposal.
    pub fn pending(&self) -> usize {
        self.pending.borrow().as_ref().map_or(0, Vec::len)
    }

    /// Check if the policy has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.pending.borrow().is_none()
    }

    /// Dispose every buffered session.
    ///
    /// All sessions get disposed even when some fail; failures are returned
    /// together. Calling this again is a no-op.
    pub fn dispose(&self) -> ScopeResult<()> {
        let Some(sessions) = self.pending.borrow_mut().take() else {
            return Ok(());
        };

        tracing::debug!(count = sessions.len(), "disposing deferred sessions");
        let errors = sessions
            .into_iter()
            .filter_map(|session| session.dispose().err().map(ScopeError::from))
            .collect();
        AggregateError::check(errors)
    }
}

impl Default for DeferredTermination {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationPolicy for DeferredTermination {
    fn terminate(&self, session: Box<dyn Session>, completed: bool) -> ScopeResult<()> {
        let mut pending = self.pending.borrow_mut();
        match pending.as_mut() {
            Some(sessions) => {
                tracing::debug!(completed, buffered = sessions.len() + 1, "deferring session disposal");
                sessions.push(session);
                Ok(())
            }
            None => {
                drop(pending);
                tracing::debug!(completed, "policy already disposed, disposing session now");
                session.dispose()?;
                Ok(())
            }
        }
    }
}

impl Drop for DeferredTermination {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            tracing::error!(error = %e, "failed to dispose deferred sessions");
        }
    }
}

impl fmt::Debug for DeferredTermination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredTermination")
            .field("pending", &self.pending())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::{Probe, RecordingSession};
    use std::sync::Arc;

    fn session(probe: &Arc<Probe>, label: &str) -> Box<dyn Session> {
        Box::new(RecordingSession::new(probe.clone(), label))
    }

    #[test]
    fn test_immediate_disposes_now() {
        let probe = Arc::new(Probe::default());
        ImmediateTermination.terminate(session(&probe, "s"), true).unwrap();
        assert_eq!(probe.disposals(), 1);
    }

    #[test]
    fn test_immediate_propagates_failure() {
        let probe = Arc::new(Probe::default());
        *probe.fail_dispose.lock() = true;
        let err = ImmediateTermination
            .terminate(session(&probe, "s"), false)
            .unwrap_err();
        assert!(matches!(err, ScopeError::Session(_)));
    }

    #[test]
    fn test_deferred_buffers_until_disposed() {
        let probe = Arc::new(Probe::default());
        let policy = DeferredTermination::new();

        policy.terminate(session(&probe, "a"), true).unwrap();
        policy.terminate(session(&probe, "b"), false).unwrap();
        assert_eq!(probe.disposals(), 0);
        assert_eq!(policy.pending(), 2);

        policy.dispose().unwrap();
        assert_eq!(probe.disposals(), 2);
        assert!(policy.is_disposed());

        // second dispose is a no-op
        policy.dispose().unwrap();
        assert_eq!(probe.disposals(), 2);
    }

    #[test]
    fn test_deferred_late_terminate_disposes_immediately() {
        let probe = Arc::new(Probe::default());
        let policy = DeferredTermination::new();
        policy.dispose().unwrap();

        policy.terminate(session(&probe, "late"), true).unwrap();
        assert_eq!(probe.disposals(), 1);
        assert_eq!(policy.pending(), 0);
    }

    #[test]
    fn test_deferred_aggregates_failures() {
        let failing = Arc::new(Probe::default());
        *failing.fail_dispose.lock() = true;
        let healthy = Arc::new(Probe::default());

        let policy = DeferredTermination::new();
        policy.terminate(session(&failing, "first"), true).unwrap();
        policy.terminate(session(&healthy, "second"), true).unwrap();
        policy.terminate(session(&failing, "third"), true).unwrap();

        let err = policy.dispose().unwrap_err();
        assert_eq!(healthy.disposals(), 1);
        assert_eq!(failing.disposals(), 2);

        let message = err.to_string();
        assert!(message.contains("dispose of first failed"));
        assert!(message.contains("dispose of third failed"));
        match err {
            ScopeError::Aggregate(aggregate) => assert_eq!(aggregate.errors().len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_deferred_drop_disposes() {
        let probe = Arc::new(Probe::default());
        {
            let policy = DeferredTermination::new();
            policy.terminate(session(&probe, "a"), true).unwrap();
        }
        assert_eq!(probe.disposals(), 1);
    }
}
