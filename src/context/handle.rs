//! Handles scopes hold on a root data context.
//!
//! The scope that created a root holds a [`DataContextDecorator`]; scopes
//! that joined it hold a [`Subordinate`]. Only the decorator finishes the
//! root; subordinates merely gate its completion.

use std::cell::{Cell, RefMut};
use std::rc::Rc;

use crate::context::data_context::{DataContext, FinishedEvent};
use crate::context::error::{ScopeError, ScopeResult};
use crate::context::supervisor::DataContextSupervisor;
use crate::session::Session;

/// The creating scope's handle on a root. Listed by the supervisor until
/// disposed.
#[derive(Debug)]
pub struct DataContextDecorator {
    origin: Rc<DataContext>,
    supervisor: Rc<DataContextSupervisor>,
}

impl DataContextDecorator {
    pub(crate) fn new(origin: Rc<DataContext>, supervisor: Rc<DataContextSupervisor>) -> Self {
        Self { origin, supervisor }
    }

    /// The wrapped root.
    pub fn origin(&self) -> &Rc<DataContext> {
        &self.origin
    }

    pub fn complete(&self) -> ScopeResult<()> {
        self.origin.complete()
    }

    pub fn session(&self) -> ScopeResult<RefMut<'_, Box<dyn Session>>> {
        self.origin.session()
    }

    /// Leave the supervisor's list, then finish the root.
    pub fn dispose(&self) -> ScopeResult<()> {
        self.supervisor.remove(&self.origin);
        self.origin.dispose()
    }
}

/// A nested scope sharing an existing root's session.
#[derive(Debug)]
pub struct Subordinate {
    root: Rc<DataContext>,
    completed: Cell<Option<bool>>,
    disposed: Cell<bool>,
}

impl Subordinate {
    /// Attach to `root`, raising its pending subordinate count.
    pub fn new(root: Rc<DataContext>) -> ScopeResult<Self> {
        root.attach_subordinate()?;
        tracing::debug!(
            context_id = %root.id(),
            pending = root.subordinates(),
            "subordinate attached"
        );
        Ok(Self {
            root,
            completed: Cell::new(None),
            disposed: Cell::new(false),
        })
    }

    /// The root this subordinate counts toward.
    pub fn root(&self) -> &Rc<DataContext> {
        &self.root
    }

    pub fn completed(&self) -> Option<bool> {
        self.completed.get()
    }

    fn ensure_not_disposed(&self) -> ScopeResult<()> {
        if self.disposed.get() {
            return Err(ScopeError::Disposed {
                completed: self.completed.get(),
            });
        }
        Ok(())
    }

    /// Confirm completion to the root. Idempotent.
    pub fn complete(&self) -> ScopeResult<()> {
        self.ensure_not_disposed()?;
        if self.completed.get() == Some(true) {
            return Ok(());
        }
        self.root.release_subordinate();
        self.completed.set(Some(true));
        Ok(())
    }

    pub fn session(&self) -> ScopeResult<RefMut<'_, Box<dyn Session>>> {
        self.ensure_not_disposed()?;
        self.root.session()
    }

    /// Leave without touching the root. If never completed, the root keeps
    /// counting this scope as pending and will refuse to complete.
    pub fn dispose(&self) -> ScopeResult<()> {
        if self.disposed.replace(true) {
            return Ok(());
        }
        if self.completed.get() != Some(true) {
            self.completed.set(Some(false));
            tracing::debug!(context_id = %self.root.id(), "subordinate disposed without completion");
        }
        Ok(())
    }
}

/// What a supervisor hands out for a scope-open call.
#[derive(Debug)]
pub enum ContextHandle {
    /// The scope created a new root.
    Root(DataContextDecorator),
    /// The scope joined an existing root.
    Subordinate(Subordinate),
}

impl ContextHandle {
    /// The root data context behind this handle.
    pub fn context(&self) -> &Rc<DataContext> {
        match self {
            ContextHandle::Root(decorator) => decorator.origin(),
            ContextHandle::Subordinate(subordinate) => subordinate.root(),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ContextHandle::Root(_))
    }

    pub fn complete(&self) -> ScopeResult<()> {
        match self {
            ContextHandle::Root(decorator) => decorator.complete(),
            ContextHandle::Subordinate(subordinate) => subordinate.complete(),
        }
    }

    pub fn session(&self) -> ScopeResult<RefMut<'_, Box<dyn Session>>> {
        match self {
            ContextHandle::Root(decorator) => decorator.session(),
            ContextHandle::Subordinate(subordinate) => subordinate.session(),
        }
    }

    /// Subscribe to the root's finished event.
    pub fn on_finished(
        &self,
        handler: impl FnOnce(&mut FinishedEvent<'_>) + 'static,
    ) -> ScopeResult<()> {
        if let ContextHandle::Subordinate(subordinate) = self {
            subordinate.ensure_not_disposed()?;
        }
        self.context().on_finished(handler)
    }

    pub fn dispose(&self) -> ScopeResult<()> {
        match self {
            ContextHandle::Root(decorator) => decorator.dispose(),
            ContextHandle::Subordinate(subordinate) => subordinate.dispose(),
        }
    }
}
