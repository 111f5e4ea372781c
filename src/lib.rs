//! Scopework - nested unit-of-work scopes over an ambient ORM session
//!
//! This crate lets application code open nested, named units of work
//! (read-write) and units of query (read-only) around a lazily opened
//! session. However many scopes nest against the same data source, the
//! session is committed or rolled back exactly once, by the outermost one.
//!
//! # Example
//!
//! ```no_run
//! # use scopework::session::{Session, SessionRequest, SessionResult};
//! # fn open_session(_: &SessionRequest) -> SessionResult<Box<dyn Session>> { unimplemented!() }
//! use scopework::source::{DataSource, Environment};
//! use scopework::unit::UnitOfWork;
//!
//! let source = DataSource::builder(open_session).name("orders").build();
//! Environment::register_data_source(source, false).unwrap();
//!
//! let outer = UnitOfWork::open("orders").unwrap();
//! let inner = UnitOfWork::open("orders").unwrap();
//! inner.complete().unwrap();
//! inner.dispose().unwrap();
//! outer.complete().unwrap(); // the only commit
//! ```

pub mod ambient;
pub mod context;
pub mod session;
pub mod source;
pub mod unit;

pub use context::{IsolationLevel, Require, ScopeError, ScopeResult, UnitOfWorkOptions};
pub use unit::{OperationScope, UnitOfQuery, UnitOfWork};
