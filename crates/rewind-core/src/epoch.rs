use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic generation counter.
///
/// Anything computed under an older generation is stale once the counter
/// advances. Used for resume targets (advanced by invalidating commands) and
/// for current-pause queries (advanced by every time warp).
#[derive(Debug, Default)]
pub struct Epoch {
    value: AtomicU64,
}

/// Snapshot of an [`Epoch`] taken before starting asynchronous work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpochToken(u64);

impl EpochToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> EpochToken {
        EpochToken(self.value.load(Ordering::Acquire))
    }

    /// Move to the next generation, returning its token.
    pub fn advance(&self) -> EpochToken {
        EpochToken(self.value.fetch_add(1, Ordering::AcqRel) + 1)
    }

    pub fn is_current(&self, token: EpochToken) -> bool {
        self.current() == token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_invalidates_tokens() {
        let epoch = Epoch::new();
        let first = epoch.current();
        assert!(epoch.is_current(first));
        let second = epoch.advance();
        assert!(!epoch.is_current(first));
        assert!(epoch.is_current(second));
        assert!(first < second);
        assert_eq!(second.value(), 1);
    }
}
