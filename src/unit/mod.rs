//! Public scope facade.
//!
//! Application code opens [`UnitOfWork`]s and [`UnitOfQuery`]s in nested
//! blocks; the first unit for a source owns the session and commits once,
//! nested ones only confirm completion. An [`OperationScope`] fences off
//! everything one operation opens.
//!
//! # Usage
//!
//! ```ignore
//! use scopework::unit::UnitOfWork;
//!
//! let outer = UnitOfWork::open("orders")?;
//! {
//!     let inner = UnitOfWork::open("orders")?;
//!     inner.session()?.mark_as_created(&order)?;
//!     inner.complete()?;
//! }
//! outer.complete()?;
//! ```

mod operation;
mod scope;

pub use operation::{OperationConfig, OperationScope};
pub use scope::{Query, Unit, UnitMode, UnitOfQuery, UnitOfWork, Work};
