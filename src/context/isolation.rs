//! Transaction isolation levels and nesting compatibility.
//!
//! Levels are only *declared* here. A nested scope may join an outer root
//! only if the outer level is at least as strong as the one it asks for;
//! `Snapshot` sits outside the usual strength ladder and has its own rules.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// No level requested; resolved to the data source default.
    #[default]
    Unspecified,

    /// Pending changes from more highly isolated transactions cannot be
    /// overwritten.
    Chaos,

    /// Dirty reads are possible.
    ReadUncommitted,

    /// Each read sees the most recently committed data at the time of the
    /// read.
    ReadCommitted,

    /// Rows read by the transaction are locked until it ends.
    RepeatableRead,

    /// Range locks prevent other transactions from touching the read set.
    Serializable,

    /// All reads see a consistent snapshot taken when the transaction
    /// started. Conflicts are detected on write instead of prevented.
    Snapshot,
}

impl IsolationLevel {
    /// Every level, weakest first, `Snapshot` last.
    pub const ALL: [IsolationLevel; 7] = [
        IsolationLevel::Unspecified,
        IsolationLevel::Chaos,
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
        IsolationLevel::Snapshot,
    ];

    /// Position on the lock-based strength ladder. `None` for `Snapshot`.
    fn strength(&self) -> Option<u8> {
        match self {
            IsolationLevel::Unspecified => Some(0),
            IsolationLevel::Chaos => Some(1),
            IsolationLevel::ReadUncommitted => Some(2),
            IsolationLevel::ReadCommitted => Some(3),
            IsolationLevel::RepeatableRead => Some(4),
            IsolationLevel::Serializable => Some(5),
            IsolationLevel::Snapshot => None,
        }
    }

    /// Check whether a scope requesting `requested` may run inside a root
    /// already established at `self`.
    ///
    /// - a `Snapshot` root accepts `Snapshot` and anything up to
    ///   `ReadCommitted`, but not `RepeatableRead` or `Serializable`;
    /// - a `Snapshot` request needs a `Snapshot` or `RepeatableRead` root;
    ///   `Serializable` and `Snapshot` exclude each other both ways;
    /// - otherwise the root must be at least as strong as the request.
    pub fn is_compatible(&self, requested: IsolationLevel) -> bool {
        match (self.strength(), requested.strength()) {
            (None, _) => !matches!(
                requested,
                IsolationLevel::RepeatableRead | IsolationLevel::Serializable
            ),
            (Some(_), None) => matches!(self, IsolationLevel::RepeatableRead),
            (Some(existing), Some(requested)) => existing >= requested,
        }
    }

    /// Check if this level still has to be resolved against a default.
    pub fn is_unspecified(&self) -> bool {
        matches!(self, IsolationLevel::Unspecified)
    }

    /// Use `default` when this level is `Unspecified`.
    pub fn or(self, default: IsolationLevel) -> IsolationLevel {
        if self.is_unspecified() {
            default
        } else {
            self
        }
    }

    /// Check if this isolation level uses snapshot reads.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, IsolationLevel::Snapshot)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::Unspecified => write!(f, "Unspecified"),
            IsolationLevel::Chaos => write!(f, "Chaos"),
            IsolationLevel::ReadUncommitted => write!(f, "ReadUncommitted"),
            IsolationLevel::ReadCommitted => write!(f, "ReadCommitted"),
            IsolationLevel::RepeatableRead => write!(f, "RepeatableRead"),
            IsolationLevel::Serializable => write!(f, "Serializable"),
            IsolationLevel::Snapshot => write!(f, "Snapshot"),
        }
    }
}

/// Parse isolation level from string (either SQL or identifier syntax).
impl std::str::FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_uppercase();
        match normalized.as_str() {
            "" | "UNSPECIFIED" => Ok(IsolationLevel::Unspecified),
            "CHAOS" => Ok(IsolationLevel::Chaos),
            "READUNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READCOMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLEREAD" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            "SNAPSHOT" => Ok(IsolationLevel::Snapshot),
            _ => Err(format!("unknown isolation level: {}", s)),
        }
    }
}
