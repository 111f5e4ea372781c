//! The root data context: one lazily opened session and its completion
//! state machine.
//!
//! ```text
//!            complete() ok                complete()
//!   Fresh ──────────────────▶ Completed ───────────▶ Completed (no-op)
//!     │
//!     │ complete() with pending subordinates, or commit failure
//!     ▼
//!   FailedToComplete ──complete()──▶ error
//!
//!   any state ──dispose()──▶ Disposed (completed = false unless Completed)
//! ```

use std::cell::{Cell, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::context::error::{ScopeError, ScopeResult};
use crate::context::isolation::IsolationLevel;
use crate::context::options::Require;
use crate::context::termination::TerminationPolicy;
use crate::session::{Access, Lazy, LazyError, Session, SessionError, SessionFactory, SessionRequest};

/// Handler invoked once when a root finishes.
pub type FinishedHandler = Box<dyn FnOnce(&mut FinishedEvent<'_>)>;

/// Passed to finished handlers, before the session is terminated.
pub struct FinishedEvent<'a> {
    /// Id of the finished root.
    pub context_id: &'a str,
    /// Data source name of the finished root.
    pub source: &'a str,
    /// Whether the root completed successfully.
    pub completed: bool,
    /// The session, if it was ever opened.
    pub session: Option<&'a mut (dyn Session + 'static)>,
}

/// Snapshot of a root for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextInfo {
    pub id: String,
    pub source: String,
    pub isolation: IsolationLevel,
    pub require: Require,
    pub access: Access,
    pub opened_at: DateTime<Utc>,
    pub subordinates: usize,
    pub session_created: bool,
    pub completed: Option<bool>,
}

/// Owns exactly one lazily created session for one root scope.
pub struct DataContext {
    id: String,
    source: String,
    isolation: IsolationLevel,
    require: Require,
    access: Access,
    opened_at: DateTime<Utc>,
    session: Lazy<Box<dyn Session>, SessionError>,
    /// `None` undecided, `Some(true)` committed, `Some(false)` failed.
    completed: Cell<Option<bool>>,
    disposed: Cell<bool>,
    subordinates: Cell<usize>,
    finished: RefCell<Vec<FinishedHandler>>,
    termination: Rc<dyn TerminationPolicy>,
}

impl DataContext {
    /// Create a root context. The session is not opened until first access.
    pub fn new(
        source: impl Into<String>,
        isolation: IsolationLevel,
        require: Require,
        access: Access,
        factory: SessionFactory,
        termination: Rc<dyn TerminationPolicy>,
    ) -> Self {
        let source = source.into();
        let request = SessionRequest {
            source: source.clone(),
            isolation,
            access,
        };

        Self {
            id: Ulid::new().to_string().to_lowercase(),
            source,
            isolation,
            require,
            access,
            opened_at: Utc::now(),
            session: Lazy::new(move || factory(&request)),
            completed: Cell::new(None),
            disposed: Cell::new(false),
            subordinates: Cell::new(0),
            finished: RefCell::new(Vec::new()),
            termination,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn require(&self) -> Require {
        self.require
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Number of nested scopes that have not completed yet.
    pub fn subordinates(&self) -> usize {
        self.subordinates.get()
    }

    /// Whether the session was ever opened. Never opens it.
    pub fn is_session_created(&self) -> bool {
        self.session.is_created()
    }

    /// Completion outcome so far.
    pub fn completed(&self) -> Option<bool> {
        self.completed.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Diagnostics snapshot.
    pub fn info(&self) -> ContextInfo {
        ContextInfo {
            id: self.id.clone(),
            source: self.source.clone(),
            isolation: self.isolation,
            require: self.require,
            access: self.access,
            opened_at: self.opened_at,
            subordinates: self.subordinates.get(),
            session_created: self.session.is_created(),
            completed: self.completed.get(),
        }
    }

    fn ensure_not_disposed(&self) -> ScopeResult<()> {
        if self.disposed.get() {
            return Err(ScopeError::Disposed {
                completed: self.completed.get(),
            });
        }
        Ok(())
    }

    /// Get the session, opening it on first access.
    pub fn session(&self) -> ScopeResult<RefMut<'_, Box<dyn Session>>> {
        self.ensure_not_disposed()?;
        let opening = !self.session.is_created();
        let session = self.session.force().map_err(|e| match e {
            LazyError::Init(e) => ScopeError::Session(e),
            LazyError::Taken => ScopeError::Disposed {
                completed: self.completed.get(),
            },
            LazyError::Busy => ScopeError::SessionBusy,
        })?;
        if opening {
            tracing::debug!(
                context_id = %self.id,
                source = %self.source,
                isolation = %self.isolation,
                access = %self.access,
                "session opened"
            );
        }
        Ok(session)
    }

    /// Register a handler for the finished event.
    pub fn on_finished(
        &self,
        handler: impl FnOnce(&mut FinishedEvent<'_>) + 'static,
    ) -> ScopeResult<()> {
        self.ensure_not_disposed()?;
        self.finished.borrow_mut().push(Box::new(handler));
        Ok(())
    }

    pub(crate) fn attach_subordinate(&self) -> ScopeResult<()> {
        self.ensure_not_disposed()?;
        self.subordinates.set(self.subordinates.get() + 1);
        Ok(())
    }

    pub(crate) fn release_subordinate(&self) {
        self.subordinates.set(self.subordinates.get().saturating_sub(1));
    }

    /// Commit the session if it was used.
    ///
    /// Succeeds at most once; later calls are no-ops. Fails, and stays
    /// failed, when subordinates are pending or the commit fails.
    pub fn complete(&self) -> ScopeResult<()> {
        self.ensure_not_disposed()?;
        match self.completed.get() {
            Some(true) => return Ok(()),
            Some(false) => return Err(ScopeError::AlreadyFailed),
            None => {}
        }

        let pending = self.subordinates.get();
        if pending != 0 {
            self.completed.set(Some(false));
            tracing::debug!(context_id = %self.id, pending, "completion refused, subordinates pending");
            return Err(ScopeError::IncompleteSubordinates { pending });
        }

        if self.session.is_created() {
            let mut session = self.session.get_mut().map_err(|e| {
                self.completed.set(Some(false));
                match e {
                    LazyError::Busy => ScopeError::SessionBusy,
                    _ => ScopeError::Disposed { completed: Some(false) },
                }
            })?;
            if let Err(e) = session.complete() {
                self.completed.set(Some(false));
                tracing::debug!(context_id = %self.id, error = %e, "commit failed");
                return Err(e.into());
            }
        }

        self.completed.set(Some(true));
        tracing::debug!(
            context_id = %self.id,
            source = %self.source,
            session_created = self.session.is_created(),
            "context completed"
        );
        Ok(())
    }

    /// Finish the context.
    ///
    /// Anything not completed is finalized as failed. Finished handlers run
    /// once, then the session, if it was ever opened, goes to the
    /// termination policy. Disposing again is a no-op.
    pub fn dispose(&self) -> ScopeResult<()> {
        if self.disposed.replace(true) {
            return Ok(());
        }

        let completed = self.completed.get() == Some(true);
        if !completed {
            self.completed.set(Some(false));
        }

        let mut session = if self.session.is_created() {
            let taken = self.session.take();
            if taken.is_none() {
                tracing::warn!(context_id = %self.id, "session still borrowed at dispose, leaking it");
            }
            taken
        } else {
            None
        };

        let handlers = std::mem::take(&mut *self.finished.borrow_mut());
        if !handlers.is_empty() {
            let mut event = FinishedEvent {
                context_id: &self.id,
                source: &self.source,
                completed,
                session: session.as_deref_mut(),
            };
            for handler in handlers {
                handler(&mut event);
            }
        }

        tracing::debug!(
            context_id = %self.id,
            source = %self.source,
            completed,
            session_created = session.is_some(),
            "context disposed"
        );

        match session {
            Some(session) => self.termination.terminate(session, completed),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContext")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("isolation", &self.isolation)
            .field("completed", &self.completed.get())
            .field("disposed", &self.disposed.get())
            .field("subordinates", &self.subordinates.get())
            .finish()
    }
}
