//! Units of work and units of query.
//!
//! Both are the same scope object parameterized by a mode marker:
//! - `Work`: read-write sessions, supervised per flow
//! - `Query`: read-only sessions, supervised separately from works

use std::cell::RefMut;
use std::fmt;
use std::marker::PhantomData;

use crate::context::{
    ContextHandle, ContextInfo, DataContextSupervisor, FinishedEvent, IsolationLevel, Require,
    ScopeResult, UnitOfWorkOptions,
};
use crate::session::{Access, Session};

/// Marker type for read-write units.
#[derive(Debug)]
pub struct Work;

/// Marker type for read-only units.
#[derive(Debug)]
pub struct Query;

/// Access mode carried by a unit marker.
pub trait UnitMode: 'static {
    const ACCESS: Access;
    const NAME: &'static str;
}

impl UnitMode for Work {
    const ACCESS: Access = Access::ReadWrite;
    const NAME: &'static str = "unit of work";
}

impl UnitMode for Query {
    const ACCESS: Access = Access::ReadOnly;
    const NAME: &'static str = "unit of query";
}

/// A read-write scope.
pub type UnitOfWork = Unit<Work>;

/// A read-only scope.
pub type UnitOfQuery = Unit<Query>;

/// A scope registered with the current flow's supervisor.
///
/// Dropping a unit disposes it; use [`Unit::dispose`] to observe teardown
/// errors. Units must be disposed in reverse order of creation.
pub struct Unit<M: UnitMode> {
    handle: ContextHandle,
    _mode: PhantomData<M>,
}

impl<M: UnitMode> Unit<M> {
    /// Open a unit against the default source.
    pub fn new() -> ScopeResult<Self> {
        Self::open(UnitOfWorkOptions::default())
    }

    /// Open a unit with the given options (or just a source name).
    pub fn open(options: impl Into<UnitOfWorkOptions>) -> ScopeResult<Self> {
        let options = options.into();
        let handle = DataContextSupervisor::open(M::ACCESS, &options)?;
        tracing::debug!(
            kind = M::NAME,
            source = %options.source,
            root = handle.is_root(),
            "scope opened"
        );
        Ok(Self {
            handle,
            _mode: PhantomData,
        })
    }

    /// Open a unit against `source` with an explicit isolation level.
    pub fn with_isolation(source: impl Into<String>, isolation: IsolationLevel) -> ScopeResult<Self> {
        Self::open(UnitOfWorkOptions::new(source).isolation(isolation))
    }

    /// Open a unit against `source` with an explicit require policy.
    pub fn with_require(source: impl Into<String>, require: Require) -> ScopeResult<Self> {
        Self::open(UnitOfWorkOptions::new(source).require(require))
    }

    /// Check if any unit of this mode is open in the current flow.
    pub fn is_active() -> bool {
        DataContextSupervisor::ambient(M::ACCESS).is_some_and(|s| s.is_active())
    }

    /// Snapshots of the live roots of this mode in the current flow.
    pub fn active_contexts() -> Vec<ContextInfo> {
        DataContextSupervisor::ambient(M::ACCESS)
            .map(|s| s.active_contexts())
            .unwrap_or_default()
    }

    /// Whether this unit owns its root (as opposed to joining one).
    pub fn is_root(&self) -> bool {
        self.handle.is_root()
    }

    /// Id of the root this unit belongs to.
    pub fn context_id(&self) -> &str {
        self.handle.context().id()
    }

    pub fn source(&self) -> &str {
        self.handle.context().source()
    }

    /// Isolation level of the root this unit belongs to.
    pub fn isolation(&self) -> IsolationLevel {
        self.handle.context().isolation()
    }

    /// The shared session, opened on first access.
    pub fn session(&self) -> ScopeResult<RefMut<'_, Box<dyn Session>>> {
        self.handle.session()
    }

    /// Subscribe to the root's finished event.
    pub fn on_finished(
        &self,
        handler: impl FnOnce(&mut FinishedEvent<'_>) + 'static,
    ) -> ScopeResult<()> {
        self.handle.on_finished(handler)
    }

    /// Mark this unit as completed. A root commits here; a nested unit
    /// only confirms to its root.
    pub fn complete(&self) -> ScopeResult<()> {
        self.handle.complete()
    }

    /// Complete, then hand `value` back.
    pub fn complete_with<T>(&self, value: T) -> ScopeResult<T> {
        self.complete()?;
        Ok(value)
    }

    /// Run `f`, complete, then return its value.
    pub fn complete_after<T>(&self, f: impl FnOnce() -> T) -> ScopeResult<T> {
        let value = f();
        self.complete_with(value)
    }

    /// Run `f` with this unit, complete it if `f` succeeds, and dispose it
    /// either way.
    pub fn execute<T>(self, f: impl FnOnce(&Self) -> ScopeResult<T>) -> ScopeResult<T> {
        match f(&self).and_then(|value| self.complete_with(value)) {
            Ok(value) => {
                self.dispose()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(dispose_error) = self.dispose() {
                    tracing::warn!(
                        kind = M::NAME,
                        error = %dispose_error,
                        "dispose failed after scope error"
                    );
                }
                Err(e)
            }
        }
    }

    /// Leave the scope, surfacing teardown errors.
    pub fn dispose(self) -> ScopeResult<()> {
        self.handle.dispose()
    }
}

impl<M: UnitMode> Drop for Unit<M> {
    fn drop(&mut self) {
        if let Err(e) = self.handle.dispose() {
            tracing::error!(kind = M::NAME, error = %e, "failed to dispose scope");
        }
    }
}

impl<M: UnitMode> fmt::Debug for Unit<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unit")
            .field("kind", &M::NAME)
            .field("context_id", &self.context_id())
            .field("root", &self.is_root())
            .finish()
    }
}
