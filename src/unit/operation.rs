//! Operation scopes: a sandbox for everything one operation opens.
//!
//! An operation scope installs fresh supervisors for the current flow, so
//! units opened inside it never see units opened before it. It cannot be
//! nested, and cannot be opened while units are already open.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::ambient::{self, AmbientKey};
use crate::context::{
    DataContextSupervisor, DeferredTermination, ImmediateTermination, ScopeError, ScopeResult,
    TerminationMode, TerminationPolicy,
};
use crate::session::Access;

const OPERATION_SCOPE: AmbientKey = AmbientKey::new("scopework.operation");

const ACCESS_MODES: [Access; 2] = [Access::ReadWrite, Access::ReadOnly];

/// Operation scope configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationConfig {
    /// When sessions of finished roots are disposed.
    #[serde(default)]
    pub termination: TerminationMode,
}

impl OperationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the termination mode.
    pub fn termination(mut self, mode: TerminationMode) -> Self {
        self.termination = mode;
        self
    }

    /// Keep sessions alive until the operation scope exits.
    pub fn deferred(self) -> Self {
        self.termination(TerminationMode::Deferred)
    }
}

/// Ambient marker of an active operation scope.
#[derive(Debug)]
struct OperationMarker {
    id: String,
}

/// Ambient boundary of one operation (e.g. one message handler run).
pub struct OperationScope {
    id: String,
    config: OperationConfig,
    deferred: Option<Rc<DeferredTermination>>,
    disposed: bool,
}

impl OperationScope {
    /// Open an operation scope with immediate termination.
    pub fn new() -> ScopeResult<Self> {
        Self::with_config(OperationConfig::default())
    }

    /// Open an operation scope with the given configuration.
    pub fn with_config(config: OperationConfig) -> ScopeResult<Self> {
        if ambient::contains(OPERATION_SCOPE) {
            return Err(ScopeError::NestedOperationScope);
        }
        if ACCESS_MODES
            .iter()
            .any(|access| DataContextSupervisor::ambient(*access).is_some())
        {
            return Err(ScopeError::OperationInsideUnit);
        }

        let deferred = match config.termination {
            TerminationMode::Immediate => None,
            TerminationMode::Deferred => Some(Rc::new(DeferredTermination::new())),
        };
        let termination: Rc<dyn TerminationPolicy> = match &deferred {
            Some(deferred) => deferred.clone(),
            None => Rc::new(ImmediateTermination),
        };

        for access in ACCESS_MODES {
            DataContextSupervisor::install_pinned(access, termination.clone());
        }

        let id = Ulid::new().to_string().to_lowercase();
        ambient::set(OPERATION_SCOPE, Rc::new(OperationMarker { id: id.clone() }));
        tracing::debug!(operation_id = %id, termination = %config.termination, "operation scope opened");

        Ok(Self {
            id,
            config,
            deferred,
            disposed: false,
        })
    }

    /// Check if an operation scope is active in the current flow.
    pub fn is_active() -> bool {
        ambient::contains(OPERATION_SCOPE)
    }

    /// Id of the operation scope active in the current flow.
    pub fn current_id() -> Option<String> {
        ambient::find::<OperationMarker>(OPERATION_SCOPE).map(|marker| marker.id.clone())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &OperationConfig {
        &self.config
    }

    /// Sessions waiting for this scope to exit.
    pub fn pending_sessions(&self) -> usize {
        self.deferred.as_ref().map_or(0, |d| d.pending())
    }

    fn finish(&mut self) -> ScopeResult<()> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        for access in ACCESS_MODES {
            if let Some(supervisor) = DataContextSupervisor::ambient(access) {
                if supervisor.is_active() {
                    tracing::warn!(
                        operation_id = %self.id,
                        access = %access,
                        roots = supervisor.root_count(),
                        "operation scope exited with units still open"
                    );
                }
            }
            DataContextSupervisor::release_ambient(access);
        }
        ambient::release(OPERATION_SCOPE);
        tracing::debug!(operation_id = %self.id, "operation scope closed");

        match &self.deferred {
            Some(deferred) => deferred.dispose(),
            None => Ok(()),
        }
    }

    /// Leave the operation, disposing deferred sessions.
    pub fn dispose(mut self) -> ScopeResult<()> {
        self.finish()
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            tracing::error!(operation_id = %self.id, error = %e, "failed to close operation scope");
        }
    }
}

impl fmt::Debug for OperationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationScope")
            .field("id", &self.id)
            .field("termination", &self.config.termination)
            .field("pending_sessions", &self.pending_sessions())
            .finish()
    }
}
