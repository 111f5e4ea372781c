//! Flow-local key/value storage.
//!
//! Scopes locate their supervisor through this store instead of explicit
//! parameters. Every thread owns an independent map, so concurrent flows
//! never observe each other's scopes and no locking is needed.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

thread_local! {
    static SLOTS: RefCell<HashMap<AmbientKey, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

/// Key of an ambient slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AmbientKey(&'static str);

impl AmbientKey {
    /// Create a key from a static name.
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    /// get the key name
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for AmbientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Find the value stored under `key` in the current flow.
///
/// Returns `None` when the slot is empty or holds a value of another type.
pub fn find<T: Any>(key: AmbientKey) -> Option<Rc<T>> {
    let value = SLOTS.with(|slots| slots.borrow().get(&key).cloned())?;
    value.downcast::<T>().ok()
}

/// Check whether anything is stored under `key`.
pub fn contains(key: AmbientKey) -> bool {
    SLOTS.with(|slots| slots.borrow().contains_key(&key))
}

/// Store `value` under `key`, replacing any previous value.
pub fn set<T: Any>(key: AmbientKey, value: Rc<T>) {
    SLOTS.with(|slots| {
        slots.borrow_mut().insert(key, value);
    });
}

/// Remove the value stored under `key`. Returns whether a value was present.
pub fn release(key: AmbientKey) -> bool {
    // The removed value is dropped outside the borrow: its destructor may
    // touch the ambient store again.
    let removed = SLOTS.with(|slots| slots.borrow_mut().remove(&key));
    removed.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: AmbientKey = AmbientKey::new("ambient.tests.key");

    #[test]
    fn test_set_find_release() {
        assert!(find::<u32>(KEY).is_none());

        set(KEY, Rc::new(7u32));
        assert_eq!(find::<u32>(KEY).as_deref(), Some(&7));
        assert!(contains(KEY));

        // wrong type is not found
        assert!(find::<String>(KEY).is_none());

        assert!(release(KEY));
        assert!(!release(KEY));
        assert!(find::<u32>(KEY).is_none());
    }

    #[test]
    fn test_flows_are_independent() {
        set(KEY, Rc::new(1u32));

        let seen = std::thread::spawn(|| find::<u32>(KEY).is_some())
            .join()
            .unwrap();
        assert!(!seen);

        release(KEY);
    }
}
