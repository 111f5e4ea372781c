//! Root data contexts and their supervision.
//!
//! A root [`DataContext`] owns one lazily opened session. Nested scopes
//! against the same source join it as [`Subordinate`]s, and the root may
//! only commit once every subordinate has confirmed completion.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 DataContextSupervisor                       │
//! │   (per flow: stack of live roots, Require + isolation)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ DataContext │◀──────│ Subordinate │       │ Termination │
//!  │ (lazy sess) │       │  (counter)  │       │   Policy    │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use scopework::context::{DataContextSupervisor, UnitOfWorkOptions};
//! use scopework::session::Access;
//!
//! let outer = DataContextSupervisor::open(Access::ReadWrite, &UnitOfWorkOptions::new("orders"))?;
//! let inner = DataContextSupervisor::open(Access::ReadWrite, &UnitOfWorkOptions::new("orders"))?;
//!
//! inner.session()?.mark_as_created(&order)?;
//! inner.complete()?;
//! inner.dispose()?;
//!
//! outer.complete()?; // the single commit
//! outer.dispose()?;
//! ```

mod data_context;
mod error;
mod handle;
mod isolation;
mod options;
mod supervisor;
mod termination;

pub use data_context::{ContextInfo, DataContext, FinishedEvent, FinishedHandler};
pub use error::{AggregateError, ScopeError, ScopeResult};
pub use handle::{ContextHandle, DataContextDecorator, Subordinate};
pub use isolation::IsolationLevel;
pub use options::{Require, UnitOfWorkOptions};
pub use supervisor::DataContextSupervisor;
pub use termination::{
    DeferredTermination, ImmediateTermination, TerminationMode, TerminationPolicy,
};
