use model::pagination::cursor::Cursor;

/// Produces the strictly increasing cursors of a run, lazily.
///
/// Bounded sequencers stop after `end`; unbounded ones never exhaust and
/// rely on the coordinator to decide when the data has run out.
#[derive(Debug, Clone)]
pub struct CursorSequencer {
    next: Option<Cursor>,
    end: Option<Cursor>,
}

impl CursorSequencer {
    pub fn new(start: Cursor, end: Option<Cursor>) -> Self {
        let next = match end {
            Some(end) if start > end => None,
            _ => Some(start),
        };
        Self { next, end }
    }

    /// Starts after `checkpoint` when there is one, otherwise at `start`.
    pub fn resume(start: Cursor, checkpoint: Option<Cursor>, end: Option<Cursor>) -> Self {
        match checkpoint {
            Some(cp) if cp.value() == u64::MAX => Self { next: None, end },
            Some(cp) => Self::new(cp.next().max(start), end),
            None => Self::new(start, end),
        }
    }

    /// Up to `n` unconsumed cursors, in order.
    pub fn next_chunk(&mut self, n: usize) -> Vec<Cursor> {
        self.by_ref().take(n).collect()
    }

    pub fn peek(&self) -> Option<Cursor> {
        self.next
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }
}

impl Iterator for CursorSequencer {
    type Item = Cursor;

    fn next(&mut self) -> Option<Cursor> {
        let current = self.next?;
        self.next = match self.end {
            Some(end) if current >= end => None,
            _ if current.value() == u64::MAX => None,
            _ => Some(current.next()),
        };
        Some(current)
    }
}
