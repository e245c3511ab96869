use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a single page in a harvest.
///
/// Cursors are opaque to the engine apart from their ordering: within a run
/// they are produced strictly increasing, and a checkpoint stores the last
/// cursor whose records are durably flushed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Cursor(u64);

impl Cursor {
    pub const fn new(position: u64) -> Self {
        Cursor(position)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The cursor immediately after this one. Saturates at `u64::MAX`.
    pub fn next(self) -> Self {
        Cursor(self.0.saturating_add(1))
    }
}

impl From<u64> for Cursor {
    fn from(position: u64) -> Self {
        Cursor(position)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_saturates() {
        assert_eq!(Cursor::new(7).next(), Cursor::new(8));
        assert_eq!(Cursor::new(u64::MAX).next(), Cursor::new(u64::MAX));
    }

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&Cursor::new(42)).unwrap();
        assert_eq!(json, "42");
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Cursor::new(42));
    }
}
