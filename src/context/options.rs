//! Options a scope is opened with.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::isolation::IsolationLevel;

/// How a new scope relates to roots already open for the same source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Require {
    /// Join the innermost compatible root, or open one if there is none.
    #[default]
    None,
    /// Always open a fresh root with its own session.
    New,
    /// Join an existing root; fail if there is none.
    Existing,
}

impl fmt::Display for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Require::None => write!(f, "None"),
            Require::New => write!(f, "New"),
            Require::Existing => write!(f, "Existing"),
        }
    }
}

/// Options for one scope-open call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UnitOfWorkOptions {
    /// Data source name; empty selects the default source.
    pub source: String,
    /// Requested isolation level; `Unspecified` takes the source default.
    pub isolation: IsolationLevel,
    /// Root resolution policy.
    pub require: Require,
}

impl UnitOfWorkOptions {
    /// Options for the named source with default isolation and policy.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Set the isolation level.
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Set the require policy.
    pub fn require(mut self, require: Require) -> Self {
        self.require = require;
        self
    }
}

impl From<&str> for UnitOfWorkOptions {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for UnitOfWorkOptions {
    fn from(source: String) -> Self {
        Self::new(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let options = UnitOfWorkOptions::new("orders")
            .isolation(IsolationLevel::Serializable)
            .require(Require::New);
        assert_eq!(options.source, "orders");
        assert_eq!(options.isolation, IsolationLevel::Serializable);
        assert_eq!(options.require, Require::New);
    }

    #[test]
    fn test_defaults() {
        let options = UnitOfWorkOptions::default();
        assert!(options.source.is_empty());
        assert!(options.isolation.is_unspecified());
        assert_eq!(options.require, Require::None);
        assert_eq!(UnitOfWorkOptions::from("x"), UnitOfWorkOptions::new("x"));
    }
}
