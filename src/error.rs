//! Defines the error types used throughout towermap.
use std::fmt;

/// The primary error enum for all fallible operations in towermap.
///
/// The index itself has no recoverable runtime errors: `upsert` and `find`
/// are infallible, and allocation failure aborts. Everything here is either
/// a construction-time check or a harness-side argument problem.
#[derive(Debug, PartialEq, Eq)]
pub enum TowerError {
    /// A tower must have at least one level; a height of zero leaves the
    /// index without a bottom list to insert into.
    ZeroHeight,
    /// The harness was asked for a variant name it does not know.
    UnknownVariant(String),
    /// The harness was invoked with arguments it could not interpret.
    /// Carries the usage line to print before exiting.
    Usage(String),
}

impl fmt::Display for TowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TowerError::ZeroHeight => {
                write!(f, "tower height must be at least 1")
            }
            TowerError::UnknownVariant(name) => {
                write!(f, "unknown variant {:?}: expected seq, atomic or locked", name)
            }
            TowerError::Usage(usage) => write!(f, "{}", usage),
        }
    }
}

impl std::error::Error for TowerError {}
