use crate::error::{AllocatorError, Result};
use jiff::Timestamp;

/// A window of tokens reserved by this process.
///
/// Tokens are dispensed from the half-open interval `[start, end)`;
/// `start <= current <= end` always holds and `current == end` means the
/// window is spent. Only `end` is ever persisted, as the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenRange {
    start: u64,
    current: u64,
    end: u64,
    reserved_at: Option<Timestamp>,
}

impl TokenRange {
    /// An exhausted window that forces a refill on first use.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reserves `size` tokens following the high-water mark `last`.
    pub fn after(last: u64, size: u64) -> Result<Self> {
        let start = last
            .checked_add(1)
            .ok_or(AllocatorError::Exhausted { last })?;
        let end = start
            .checked_add(size)
            .ok_or(AllocatorError::Exhausted { last })?;
        Ok(Self {
            start,
            current: start,
            end,
            reserved_at: Some(Timestamp::now()),
        })
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    /// When the window was reserved, `None` for [`TokenRange::empty`].
    pub fn reserved_at(&self) -> Option<Timestamp> {
        self.reserved_at
    }

    pub fn is_exhausted(&self) -> bool {
        self.current >= self.end
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.current
    }

    /// Hands out the next token, or `None` once the window is spent.
    pub fn take(&mut self) -> Option<u64> {
        if self.is_exhausted() {
            return None;
        }
        let token = self.current;
        self.current += 1;
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_range_is_exhausted() {
        let mut range = TokenRange::empty();
        assert!(range.is_exhausted());
        assert_eq!(range.take(), None);
        assert!(range.reserved_at().is_none());
    }

    #[test]
    fn window_follows_high_water_mark() {
        let range = TokenRange::after(999_999, 1_000_000).unwrap();
        assert_eq!(range.start(), 1_000_000);
        assert_eq!(range.current(), 1_000_000);
        assert_eq!(range.end(), 2_000_000);
        assert_eq!(range.remaining(), 1_000_000);
        assert!(range.reserved_at().is_some());
    }

    #[test]
    fn take_dispenses_half_open_interval() {
        let mut range = TokenRange::after(9, 3).unwrap();
        assert_eq!(range.take(), Some(10));
        assert_eq!(range.take(), Some(11));
        assert_eq!(range.take(), Some(12));
        assert_eq!(range.take(), None);
        assert_eq!(range.current(), range.end());
    }

    #[test]
    fn overflow_is_exhaustion() {
        assert!(matches!(
            TokenRange::after(u64::MAX, 1),
            Err(AllocatorError::Exhausted { last: u64::MAX })
        ));
        assert!(matches!(
            TokenRange::after(u64::MAX - 5, 10),
            Err(AllocatorError::Exhausted { .. })
        ));
    }
}
