//! Latching atomic operations on the packed flags word.
//!
//! The reference count occupies bits 1..15 of the flags word, stored as
//! twice the logical count so that bit 0 stays available for the
//! deallocating marker. A logical increment is therefore `+2`, and the
//! final decrement can move the word from `refcount == 1, !deallocating`
//! to `refcount == 0, deallocating` with a single `-1` — one compare-and-
//! swap covers both the count and the state transition.
//!
//! The count latches at both ends: once it saturates it never moves again
//! (the record leaks rather than risking a premature free), and a
//! decrement of an already-zero count is refused.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::flags::{CLOSURE_DEALLOCATING, CLOSURE_REFCOUNT_MASK};

/// Increment the packed count, latching at saturation.
///
/// Returns the new value of the word, or [`CLOSURE_REFCOUNT_MASK`] when
/// the count was already saturated.
pub(crate) fn latching_incr(word: &AtomicI32) -> i32 {
    let mut old = word.load(Ordering::Relaxed);
    loop {
        if (old & CLOSURE_REFCOUNT_MASK) == CLOSURE_REFCOUNT_MASK {
            return CLOSURE_REFCOUNT_MASK;
        }
        match word.compare_exchange_weak(old, old + 2, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return old + 2,
            Err(current) => old = current,
        }
    }
}

/// Increment the packed count unless the deallocating bit is set.
///
/// Returns `false` only when the record is already tearing down. A
/// saturated count reports success without mutating: the record is
/// latched into leaking and must keep satisfying retains.
pub(crate) fn latching_incr_not_deallocating(word: &AtomicI32) -> bool {
    let mut old = word.load(Ordering::Relaxed);
    loop {
        if old & CLOSURE_DEALLOCATING != 0 {
            return false;
        }
        if (old & CLOSURE_REFCOUNT_MASK) == CLOSURE_REFCOUNT_MASK {
            return true;
        }
        match word.compare_exchange_weak(old, old + 2, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return true,
            Err(current) => old = current,
        }
    }
}

/// Decrement the packed count.
///
/// Returns `true` exactly when this call performed the 1 → 0 transition,
/// which atomically also sets the deallocating bit; the caller then owns
/// the final teardown. Saturated and zero counts latch and return `false`.
pub(crate) fn latching_decr_should_deallocate(word: &AtomicI32) -> bool {
    let mut old = word.load(Ordering::Relaxed);
    loop {
        if (old & CLOSURE_REFCOUNT_MASK) == CLOSURE_REFCOUNT_MASK {
            return false; // latched high
        }
        if (old & CLOSURE_REFCOUNT_MASK) == 0 {
            return false; // underflow, latch low
        }
        let mut new = old - 2;
        let mut result = false;
        if (old & (CLOSURE_REFCOUNT_MASK | CLOSURE_DEALLOCATING)) == 2 {
            // refcount 1 and not deallocating: -1 clears bit 1 and sets
            // bit 0 in the same store.
            new = old - 1;
            result = true;
        }
        match word.compare_exchange_weak(old, new, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return result,
            Err(current) => old = current,
        }
    }
}

/// Decrement the packed count without touching the deallocating bit.
///
/// Returns `true` when the decremented count is zero. Used on the
/// collector path, where reclamation is the collector's business.
pub(crate) fn latching_decr_now_zero(word: &AtomicI32) -> bool {
    let mut old = word.load(Ordering::Relaxed);
    loop {
        if (old & CLOSURE_REFCOUNT_MASK) == CLOSURE_REFCOUNT_MASK {
            return false; // latched high
        }
        if (old & CLOSURE_REFCOUNT_MASK) == 0 {
            return false; // underflow, latch low
        }
        let new = old - 2;
        match word.compare_exchange_weak(old, new, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return (new & CLOSURE_REFCOUNT_MASK) == 0,
            Err(current) => old = current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incr_steps_by_two() {
        let word = AtomicI32::new(0);
        assert_eq!(latching_incr(&word) & CLOSURE_REFCOUNT_MASK, 2);
        assert_eq!(latching_incr(&word) & CLOSURE_REFCOUNT_MASK, 4);
        assert_eq!(word.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_incr_preserves_attribute_bits() {
        let word = AtomicI32::new(crate::flags::CLOSURE_NEEDS_FREE | 2);
        latching_incr(&word);
        assert_eq!(
            word.load(Ordering::Relaxed),
            crate::flags::CLOSURE_NEEDS_FREE | 4
        );
    }

    #[test]
    fn test_incr_latches_at_saturation() {
        let word = AtomicI32::new(CLOSURE_REFCOUNT_MASK);
        assert_eq!(latching_incr(&word), CLOSURE_REFCOUNT_MASK);
        assert_eq!(word.load(Ordering::Relaxed), CLOSURE_REFCOUNT_MASK);
    }

    #[test]
    fn test_incr_not_deallocating_refuses_teardown() {
        let word = AtomicI32::new(CLOSURE_DEALLOCATING);
        assert!(!latching_incr_not_deallocating(&word));
        assert_eq!(word.load(Ordering::Relaxed), CLOSURE_DEALLOCATING);
    }

    #[test]
    fn test_incr_not_deallocating_succeeds_when_saturated() {
        let word = AtomicI32::new(CLOSURE_REFCOUNT_MASK);
        assert!(latching_incr_not_deallocating(&word));
        assert_eq!(word.load(Ordering::Relaxed), CLOSURE_REFCOUNT_MASK);
    }

    #[test]
    fn test_decr_final_transition_sets_deallocating() {
        let word = AtomicI32::new(2);
        assert!(latching_decr_should_deallocate(&word));
        let value = word.load(Ordering::Relaxed);
        assert_eq!(value & CLOSURE_REFCOUNT_MASK, 0);
        assert_ne!(value & CLOSURE_DEALLOCATING, 0);
    }

    #[test]
    fn test_decr_above_one_does_not_deallocate() {
        let word = AtomicI32::new(6);
        assert!(!latching_decr_should_deallocate(&word));
        assert_eq!(word.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_decr_underflow_latches_low() {
        let word = AtomicI32::new(0);
        assert!(!latching_decr_should_deallocate(&word));
        assert_eq!(word.load(Ordering::Relaxed), 0);
        assert!(!latching_decr_now_zero(&word));
    }

    #[test]
    fn test_decr_saturated_latches_high() {
        let word = AtomicI32::new(CLOSURE_REFCOUNT_MASK);
        assert!(!latching_decr_should_deallocate(&word));
        assert_eq!(word.load(Ordering::Relaxed), CLOSURE_REFCOUNT_MASK);
    }

    #[test]
    fn test_decr_now_zero_reports_zero_without_deallocating() {
        let word = AtomicI32::new(4);
        assert!(!latching_decr_now_zero(&word));
        assert!(latching_decr_now_zero(&word));
        assert_eq!(word.load(Ordering::Relaxed) & CLOSURE_DEALLOCATING, 0);
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        use std::sync::Arc;

        let word = Arc::new(AtomicI32::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let word = Arc::clone(&word);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        latching_incr(&word);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(word.load(Ordering::Relaxed) & CLOSURE_REFCOUNT_MASK, 8 * 1000 * 2);
    }
}
