//! Compute-once cell with an observable "was it ever created" flag.

use std::cell::{Cell, RefCell, RefMut};
use std::fmt;

use thiserror::Error;

/// Errors raised when forcing a [`Lazy`] value.
#[derive(Debug, Error)]
pub enum LazyError<E> {
    /// The factory failed. The cell stays empty and may be forced again.
    #[error(transparent)]
    Init(E),

    /// The value was created and then taken out of the cell.
    #[error("lazy value was already taken")]
    Taken,

    /// The value is currently mutably borrowed elsewhere.
    #[error("lazy value is already in use")]
    Busy,
}

/// A value built on first access by a fallible factory.
///
/// Unlike `OnceCell`, the value can be moved out with [`Lazy::take`] while
/// [`Lazy::is_created`] keeps reporting that it once existed, and it is
/// never rebuilt after that.
pub struct Lazy<T, E> {
    slot: RefCell<Option<T>>,
    created: Cell<bool>,
    factory: Box<dyn Fn() -> Result<T, E>>,
}

impl<T, E> Lazy<T, E> {
    /// Create an empty cell backed by `factory`.
    pub fn new(factory: impl Fn() -> Result<T, E> + 'static) -> Self {
        Self {
            slot: RefCell::new(None),
            created: Cell::new(false),
            factory: Box::new(factory),
        }
    }

    /// Whether the factory ever produced a value. Never forces creation.
    pub fn is_created(&self) -> bool {
        self.created.get()
    }

    /// Get the value, building it first if this is the first access.
    pub fn force(&self) -> Result<RefMut<'_, T>, LazyError<E>> {
        if !self.created.get() {
            let value = (self.factory)().map_err(LazyError::Init)?;
            *self.slot.try_borrow_mut().map_err(|_| LazyError::Busy)? = Some(value);
            self.created.set(true);
        }
        self.get_mut()
    }

    /// Get the value only if it was already created and is still present.
    pub fn get_mut(&self) -> Result<RefMut<'_, T>, LazyError<E>> {
        let slot = self.slot.try_borrow_mut().map_err(|_| LazyError::Busy)?;
        RefMut::filter_map(slot, Option::as_mut).map_err(|_| LazyError::Taken)
    }

    /// Move the value out of the cell, if there is one and nobody holds it.
    pub fn take(&self) -> Option<T> {
        self.slot.try_borrow_mut().ok().and_then(|mut slot| slot.take())
    }
}

impl<T, E> fmt::Debug for Lazy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("created", &self.created.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn counting(calls: Rc<Cell<u32>>) -> Lazy<String, String> {
        Lazy::new(move || {
            calls.set(calls.get() + 1);
            Ok(format!("value-{}", calls.get()))
        })
    }

    #[test]
    fn test_not_created_until_forced() {
        let calls = Rc::new(Cell::new(0));
        let lazy = counting(calls.clone());

        assert!(!lazy.is_created());
        assert!(matches!(lazy.get_mut(), Err(LazyError::Taken)));
        assert_eq!(calls.get(), 0);

        assert_eq!(&*lazy.force().unwrap(), "value-1");
        assert_eq!(&*lazy.force().unwrap(), "value-1");
        assert!(lazy.is_created());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_take_keeps_created_flag() {
        let calls = Rc::new(Cell::new(0));
        let lazy = counting(calls.clone());
        lazy.force().unwrap();

        assert_eq!(lazy.take().as_deref(), Some("value-1"));
        assert!(lazy.is_created());
        assert!(matches!(lazy.force(), Err(LazyError::Taken)));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_factory_can_retry() {
        let attempts = Rc::new(Cell::new(0));
        let counter = attempts.clone();
        let lazy: Lazy<u32, String> = Lazy::new(move || {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                Err("boom".to_string())
            } else {
                Ok(42)
            }
        });

        assert!(matches!(lazy.force(), Err(LazyError::Init(ref e)) if e == "boom"));
        assert!(!lazy.is_created());
        assert_eq!(*lazy.force().unwrap(), 42);
    }

    #[test]
    fn test_busy_while_borrowed() {
        let lazy: Lazy<u32, String> = Lazy::new(|| Ok(1));
        let held = lazy.force().unwrap();
        assert!(matches!(lazy.get_mut(), Err(LazyError::Busy)));
        assert!(lazy.take().is_none());
        drop(held);
        assert_eq!(lazy.take(), Some(1));
    }
}
