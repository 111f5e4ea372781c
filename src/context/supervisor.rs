//! Per-flow registry of live roots.
//!
//! The supervisor decides, for every scope-open call, whether the scope
//! becomes a new root or joins an existing one:
//!
//! 1. resolve the data source and default the isolation level;
//! 2. `Require::New` always opens a new root;
//! 3. otherwise the innermost root for the same source is joined, after an
//!    isolation compatibility check;
//! 4. with no such root, `Require::Existing` fails and `Require::None`
//!    opens a new root.
//!
//! Different sources never share a root.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ambient::{self, AmbientKey};
use crate::context::data_context::{ContextInfo, DataContext};
use crate::context::error::{ScopeError, ScopeResult};
use crate::context::handle::{ContextHandle, DataContextDecorator, Subordinate};
use crate::context::options::{Require, UnitOfWorkOptions};
use crate::context::termination::{ImmediateTermination, TerminationPolicy};
use crate::session::Access;
use crate::source::{DataSourceRegistry, Environment};

const WORK_SUPERVISOR: AmbientKey = AmbientKey::new("scopework.supervisor.work");
const QUERY_SUPERVISOR: AmbientKey = AmbientKey::new("scopework.supervisor.query");

/// Tracks the roots opened in one flow for one access mode.
///
/// Roots form a stack: the last one is the innermost. Scopes are expected
/// to be disposed in reverse order of creation; out-of-order disposal is
/// tolerated and logged, not rejected.
pub struct DataContextSupervisor {
    access: Access,
    contexts: RefCell<Vec<Rc<DataContext>>>,
    registry: DataSourceRegistry,
    termination: Rc<dyn TerminationPolicy>,
    /// Owned by an operation scope; stays installed while empty.
    pinned: bool,
}

impl DataContextSupervisor {
    /// Create a detached supervisor.
    pub fn new(
        access: Access,
        registry: DataSourceRegistry,
        termination: Rc<dyn TerminationPolicy>,
    ) -> Self {
        Self {
            access,
            contexts: RefCell::new(Vec::new()),
            registry,
            termination,
            pinned: false,
        }
    }

    fn key(access: Access) -> AmbientKey {
        match access {
            Access::ReadWrite => WORK_SUPERVISOR,
            Access::ReadOnly => QUERY_SUPERVISOR,
        }
    }

    /// The supervisor installed in the current flow, if any.
    pub fn ambient(access: Access) -> Option<Rc<Self>> {
        ambient::find::<Self>(Self::key(access))
    }

    /// The installed supervisor, or a fresh one with immediate termination
    /// resolving against the process-wide registry.
    pub fn ambient_or_install(access: Access) -> Rc<Self> {
        if let Some(supervisor) = Self::ambient(access) {
            return supervisor;
        }
        let supervisor = Rc::new(Self::new(
            access,
            Environment::registry().clone(),
            Rc::new(ImmediateTermination),
        ));
        ambient::set(Self::key(access), supervisor.clone());
        tracing::debug!(access = %access, "supervisor installed");
        supervisor
    }

    /// Install a supervisor that outlives its roots, until released with
    /// [`DataContextSupervisor::release_ambient`].
    pub(crate) fn install_pinned(
        access: Access,
        termination: Rc<dyn TerminationPolicy>,
    ) -> Rc<Self> {
        let supervisor = Rc::new(Self {
            pinned: true,
            ..Self::new(access, Environment::registry().clone(), termination)
        });
        ambient::set(Self::key(access), supervisor.clone());
        supervisor
    }

    /// Remove the installed supervisor from the current flow.
    pub(crate) fn release_ambient(access: Access) -> bool {
        ambient::release(Self::key(access))
    }

    /// Open a scope against the flow's supervisor.
    pub fn open(access: Access, options: &UnitOfWorkOptions) -> ScopeResult<ContextHandle> {
        let supervisor = Self::ambient_or_install(access);
        let handle = supervisor.register(options);
        if handle.is_err() {
            supervisor.release_if_idle();
        }
        handle
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Resolve `options` to a new root or a subordinate of an existing one.
    pub fn register(self: &Rc<Self>, options: &UnitOfWorkOptions) -> ScopeResult<ContextHandle> {
        let source = self.registry.resolve(&options.source)?;
        let isolation = options.isolation.or(source.default_isolation());

        if options.require != Require::New {
            let existing = self
                .contexts
                .borrow()
                .iter()
                .rev()
                .find(|context| context.source() == options.source)
                .cloned();

            if let Some(root) = existing {
                if !root.isolation().is_compatible(isolation) {
                    return Err(ScopeError::IsolationConflict {
                        existing: root.isolation(),
                        requested: isolation,
                    });
                }
                return Ok(ContextHandle::Subordinate(Subordinate::new(root)?));
            }

            if options.require == Require::Existing {
                return Err(ScopeError::ExistingRequired {
                    source_name: options.source.clone(),
                });
            }
        }

        let origin = Rc::new(DataContext::new(
            options.source.clone(),
            isolation,
            options.require,
            self.access,
            source.factory(),
            self.termination.clone(),
        ));
        self.contexts.borrow_mut().push(origin.clone());

        tracing::debug!(
            context_id = %origin.id(),
            source = %origin.source(),
            isolation = %isolation,
            require = %options.require,
            access = %self.access,
            roots = self.root_count(),
            "root opened"
        );
        Ok(ContextHandle::Root(DataContextDecorator::new(origin, self.clone())))
    }

    /// Drop `origin` from the live list; releases the supervisor from the
    /// flow once nothing is left.
    pub(crate) fn remove(self: &Rc<Self>, origin: &Rc<DataContext>) {
        {
            let mut contexts = self.contexts.borrow_mut();
            if let Some(index) = contexts.iter().rposition(|c| Rc::ptr_eq(c, origin)) {
                if index + 1 != contexts.len() {
                    tracing::warn!(
                        context_id = %origin.id(),
                        "root disposed out of order, inner roots are still open"
                    );
                }
                contexts.remove(index);
            }
        }
        self.release_if_idle();
    }

    fn release_if_idle(self: &Rc<Self>) {
        if self.pinned || self.is_active() {
            return;
        }
        let installed = Self::ambient(self.access).is_some_and(|s| Rc::ptr_eq(&s, self));
        if installed {
            Self::release_ambient(self.access);
            tracing::debug!(access = %self.access, "supervisor released");
        }
    }

    /// The innermost live root.
    pub fn current(&self) -> Option<Rc<DataContext>> {
        self.contexts.borrow().last().cloned()
    }

    pub fn is_active(&self) -> bool {
        !self.contexts.borrow().is_empty()
    }

    pub fn root_count(&self) -> usize {
        self.contexts.borrow().len()
    }

    /// Snapshots of every live root, outermost first.
    pub fn active_contexts(&self) -> Vec<ContextInfo> {
        self.contexts.borrow().iter().map(|c| c.info()).collect()
    }
}

impl fmt::Debug for DataContextSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContextSupervisor")
            .field("access", &self.access)
            .field("roots", &self.root_count())
            .field("pinned", &self.pinned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::isolation::IsolationLevel;
    use crate::session::testing::{factory, Probe};
    use crate::source::DataSource;
    use std::sync::Arc;

    fn setup() -> (Arc<Probe>, Rc<DataContextSupervisor>) {
        let probe = Arc::new(Probe::default());
        let registry = DataSourceRegistry::new();
        registry
            .register(
                DataSource::new("a", IsolationLevel::ReadCommitted, factory(probe.clone())),
                false,
            )
            .unwrap();
        registry
            .register(
                DataSource::new("b", IsolationLevel::Snapshot, factory(probe.clone())),
                false,
            )
            .unwrap();
        let supervisor = Rc::new(DataContextSupervisor::new(
            Access::ReadWrite,
            registry,
            Rc::new(ImmediateTermination),
        ));
        (probe, supervisor)
    }

    fn opts(source: &str) -> UnitOfWorkOptions {
        UnitOfWorkOptions::new(source)
    }

    #[test]
    fn test_first_scope_is_root() {
        let (_probe, supervisor) = setup();
        assert!(!supervisor.is_active());

        let handle = supervisor.register(&opts("a")).unwrap();
        assert!(handle.is_root());
        assert!(supervisor.is_active());
        assert!(Rc::ptr_eq(&supervisor.current().unwrap(), handle.context()));

        handle.dispose().unwrap();
        assert!(!supervisor.is_active());
        assert!(supervisor.current().is_none());
    }

    #[test]
    fn test_same_source_joins_root() {
        let (_probe, supervisor) = setup();
        let outer = supervisor.register(&opts("a")).unwrap();
        let inner = supervisor.register(&opts("a")).unwrap();

        assert!(!inner.is_root());
        assert!(Rc::ptr_eq(outer.context(), inner.context()));
        assert_eq!(supervisor.root_count(), 1);
        assert_eq!(outer.context().subordinates(), 1);

        inner.complete().unwrap();
        inner.dispose().unwrap();
        outer.complete().unwrap();
        outer.dispose().unwrap();
    }

    #[test]
    fn test_require_new_always_adds_root() {
        let (_probe, supervisor) = setup();
        let outer = supervisor.register(&opts("a")).unwrap();
        let inner = supervisor
            .register(&opts("a").require(Require::New))
            .unwrap();

        assert!(inner.is_root());
        assert_eq!(supervisor.root_count(), 2);
        assert!(!Rc::ptr_eq(outer.context(), inner.context()));

        // innermost root wins for later joins
        let joined = supervisor.register(&opts("a")).unwrap();
        assert!(Rc::ptr_eq(joined.context(), inner.context()));
        assert_eq!(outer.context().subordinates(), 0);

        joined.dispose().unwrap();
        inner.dispose().unwrap();
        outer.dispose().unwrap();
    }

    #[test]
    fn test_require_existing() {
        let (_probe, supervisor) = setup();
        let err = supervisor
            .register(&opts("a").require(Require::Existing))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "requires existing unit of work at the top level, but nothing found"
        );
        assert_eq!(supervisor.root_count(), 0);

        let outer = supervisor.register(&opts("a")).unwrap();
        let inner = supervisor
            .register(&opts("a").require(Require::Existing))
            .unwrap();
        assert!(!inner.is_root());
        assert_eq!(supervisor.root_count(), 1);
        inner.dispose().unwrap();
        outer.dispose().unwrap();
    }

    #[test]
    fn test_different_sources_are_separate_roots() {
        let (_probe, supervisor) = setup();
        let a = supervisor.register(&opts("a")).unwrap();
        let b = supervisor.register(&opts("b")).unwrap();

        assert!(a.is_root());
        assert!(b.is_root());
        assert_eq!(supervisor.root_count(), 2);

        // existing roots are matched by source, not position
        assert!(supervisor
            .register(&opts("b").require(Require::Existing))
            .unwrap()
            .dispose()
            .is_ok());
        b.dispose().unwrap();
        a.dispose().unwrap();
    }

    #[test]
    fn test_isolation_defaults_and_conflicts() {
        let (_probe, supervisor) = setup();
        let outer = supervisor.register(&opts("b")).unwrap();
        assert_eq!(outer.context().isolation(), IsolationLevel::Snapshot);

        let err = supervisor
            .register(&opts("b").isolation(IsolationLevel::Serializable))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "isolation level 'Snapshot' not compatible with 'Serializable'"
        );
        assert_eq!(outer.context().subordinates(), 0);

        let compatible = supervisor
            .register(&opts("b").isolation(IsolationLevel::ReadCommitted))
            .unwrap();
        compatible.dispose().unwrap();
        outer.dispose().unwrap();
    }

    #[test]
    fn test_unknown_source() {
        let (_probe, supervisor) = setup();
        assert!(matches!(
            supervisor.register(&opts("zzz")),
            Err(ScopeError::SourceNotRegistered(_))
        ));
        assert!(matches!(
            supervisor.register(&opts("")),
            Err(ScopeError::DefaultSourceNotRegistered)
        ));
    }

    #[test]
    fn test_out_of_order_dispose_is_tolerated() {
        let (_probe, supervisor) = setup();
        let a = supervisor.register(&opts("a")).unwrap();
        let b = supervisor.register(&opts("b")).unwrap();

        a.dispose().unwrap();
        assert_eq!(supervisor.root_count(), 1);
        assert_eq!(supervisor.current().unwrap().source(), "b");
        b.dispose().unwrap();
        assert!(!supervisor.is_active());
    }

    #[test]
    fn test_active_contexts() {
        let (_probe, supervisor) = setup();
        let a = supervisor.register(&opts("a")).unwrap();
        let b = supervisor.register(&opts("b")).unwrap();

        let infos = supervisor.active_contexts();
        let sources: Vec<&str> = infos.iter().map(|i| i.source.as_str()).collect();
        assert_eq!(sources, vec!["a", "b"]);

        b.dispose().unwrap();
        a.dispose().unwrap();
    }

    #[test]
    fn test_ambient_released_when_idle() {
        let probe = Arc::new(Probe::default());
        let name = format!("sup-{}", ulid::Ulid::new());
        Environment::register_data_source(
            DataSource::new(name.clone(), IsolationLevel::ReadCommitted, factory(probe)),
            true,
        )
        .unwrap();

        let handle = DataContextSupervisor::open(Access::ReadWrite, &opts(&name)).unwrap();
        assert!(DataContextSupervisor::ambient(Access::ReadWrite).is_some());
        assert!(DataContextSupervisor::ambient(Access::ReadOnly).is_none());

        handle.dispose().unwrap();
        assert!(DataContextSupervisor::ambient(Access::ReadWrite).is_none());

        // a failed open does not leave a supervisor behind
        assert!(DataContextSupervisor::open(
            Access::ReadWrite,
            &opts(&name).require(Require::Existing)
        )
        .is_err());
        assert!(DataContextSupervisor::ambient(Access::ReadWrite).is_none());

        Environment::unregister_data_source(&name);
    }
}
