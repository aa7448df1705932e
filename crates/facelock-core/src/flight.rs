//! Single-flight gate for recognition attempts.
//!
//! At most one attempt holds a [`FlightPermit`] at a time. A caller that finds
//! the gate taken drops its work instead of waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to a shared single-flight gate.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    busy: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate, or `None` if another attempt is in flight.
    pub fn try_acquire(&self) -> Option<FlightPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the gate. Releases it on drop.
#[derive(Debug)]
pub struct FlightPermit {
    busy: Arc<AtomicBool>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused() {
        let gate = SingleFlight::new();
        let permit = gate.try_acquire();
        assert!(permit.is_some());
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
        assert!(gate.clone().try_acquire().is_none());
    }

    #[test]
    fn test_drop_releases() {
        let gate = SingleFlight::new();
        drop(gate.try_acquire());
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_permit_crosses_threads() {
        let gate = SingleFlight::new();
        let permit = gate.try_acquire().unwrap();
        std::thread::spawn(move || drop(permit)).join().unwrap();
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let gate = SingleFlight::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.try_acquire()
                })
            })
            .collect();
        let permits: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(permits.iter().filter(|p| p.is_some()).count(), 1);
    }
}
