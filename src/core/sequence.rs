//! Connection source-reference assignment.

use std::sync::{Arc, Mutex, OnceLock};

use crate::core::constants::{SRC_REF_MAX, SRC_REF_MIN};

/// Generator of connection source references.
///
/// Yields values in `[min, max]`, wrapping from `max` back to `min`. With
/// the default range of `[1, 65519]` it never emits 0, which some peer
/// implementations reject as invalid.
///
/// Endpoints take an injected `Arc<SequenceCounter>` so tests can control
/// reference assignment; production code shares one process-wide instance
/// via [`SequenceCounter::shared`].
#[derive(Debug)]
pub struct SequenceCounter {
    min: u16,
    max: u16,
    next: Mutex<u16>,
}

impl SequenceCounter {
    /// Create a counter over `[min, max]`. Panics if `min` is 0 or the
    /// range is empty.
    pub fn new(min: u16, max: u16) -> Self {
        assert!(min > 0, "source reference 0 is reserved");
        assert!(min <= max, "empty source reference range");
        Self {
            min,
            max,
            next: Mutex::new(min),
        }
    }

    /// The process-wide counter over the class 0 reference range.
    pub fn shared() -> Arc<SequenceCounter> {
        static SHARED: OnceLock<Arc<SequenceCounter>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(SequenceCounter::new(SRC_REF_MIN, SRC_REF_MAX)))
            .clone()
    }

    /// Take the next source reference, wrapping at the end of the range.
    pub fn next_ref(&self) -> u16 {
        let mut next = self.next.lock().unwrap_or_else(|e| e.into_inner());
        let value = *next;
        *next = if value >= self.max { self.min } else { value + 1 };
        value
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new(SRC_REF_MIN, SRC_REF_MAX)
    }
}
