//! Process-wide memory admission control.
//!
//! Stages reserve bytes before buffering data and release them when the
//! buffers die. Admission is a compare-and-commit loop on one atomic
//! counter, holding no lock across I/O, with a parking_lot condvar
//! only on the blocking path. The per-stage ledger exists for reporting
//! and release-underflow detection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::error::{BudgetError, Result};

pub struct MemoryBudget {
    capacity: usize,
    reserved: AtomicUsize,
    ledger: Mutex<FxHashMap<&'static str, usize>>,
    gate: Mutex<()>,
    released: Condvar,
}

impl MemoryBudget {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            reserved: AtomicUsize::new(0),
            ledger: Mutex::new(FxHashMap::default()),
            gate: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently reserved across all stages.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.reserved())
    }

    /// Current reservation of one stage.
    #[must_use]
    pub fn stage_reserved(&self, stage: &'static str) -> usize {
        self.ledger.lock().get(stage).copied().unwrap_or(0)
    }

    /// Non-blocking reservation; fails immediately when the budget cannot
    /// admit the request, signaling the caller to apply backpressure.
    pub fn try_reserve(&self, stage: &'static str, bytes: usize) -> Result<()> {
        if bytes > self.capacity {
            return Err(BudgetError::RequestTooLarge {
                stage,
                requested: bytes,
                capacity: self.capacity,
            }
            .into());
        }
        let mut current = self.reserved.load(Ordering::Relaxed);
        loop {
            if current + bytes > self.capacity {
                return Err(BudgetError::Exceeded {
                    stage,
                    requested: bytes,
                    available: self.capacity - current,
                    capacity: self.capacity,
                }
                .into());
            }
            match self.reserved.compare_exchange_weak(
                current,
                current + bytes,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        *self.ledger.lock().entry(stage).or_insert(0) += bytes;
        Ok(())
    }

    /// Blocking reservation; parks until another stage releases enough
    /// budget. A request larger than the whole budget can never succeed
    /// and fails immediately instead of deadlocking.
    pub fn reserve(&self, stage: &'static str, bytes: usize) -> Result<()> {
        let mut guard = self.gate.lock();
        loop {
            match self.try_reserve(stage, bytes) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if matches!(
                        err,
                        crate::Error::Budget(BudgetError::RequestTooLarge { .. })
                    ) {
                        return Err(err);
                    }
                    self.released.wait(&mut guard);
                }
            }
        }
    }

    /// Return bytes to the budget and wake blocked reservers.
    pub fn release(&self, stage: &'static str, bytes: usize) -> Result<()> {
        {
            let mut ledger = self.ledger.lock();
            let entry = ledger
                .get_mut(stage)
                .filter(|held| **held >= bytes)
                .ok_or(BudgetError::ReleaseUnderflow { stage })?;
            *entry -= bytes;
        }
        self.reserved.fetch_sub(bytes, Ordering::AcqRel);
        // notify under the gate so a waiter between its failed attempt and
        // its park cannot miss the wakeup
        let _guard = self.gate.lock();
        self.released.notify_all();
        Ok(())
    }

    /// Blocking reservation with a bounded wait, for callers that need to
    /// re-check a cancellation flag. `Ok(false)` means the wait timed out
    /// with nothing reserved.
    pub fn reserve_timeout(
        &self,
        stage: &'static str,
        bytes: usize,
        timeout: std::time::Duration,
    ) -> Result<bool> {
        let mut guard = self.gate.lock();
        match self.try_reserve(stage, bytes) {
            Ok(()) => Ok(true),
            Err(err) => {
                if matches!(
                    err,
                    crate::Error::Budget(BudgetError::RequestTooLarge { .. })
                ) {
                    return Err(err);
                }
                self.released.wait_for(&mut guard, timeout);
                match self.try_reserve(stage, bytes) {
                    Ok(()) => Ok(true),
                    Err(err) => {
                        if matches!(
                            err,
                            crate::Error::Budget(BudgetError::RequestTooLarge { .. })
                        ) {
                            Err(err)
                        } else {
                            Ok(false)
                        }
                    }
                }
            }
        }
    }

    /// RAII reservation tied to a shared budget handle.
    pub fn reserve_owned(
        self: &Arc<Self>,
        stage: &'static str,
        bytes: usize,
    ) -> Result<Reservation> {
        self.reserve(stage, bytes)?;
        Ok(Reservation {
            budget: Arc::clone(self),
            stage,
            bytes,
        })
    }

    /// Like [`Self::reserve_owned`] but bounded by `timeout`.
    pub fn reserve_owned_timeout(
        self: &Arc<Self>,
        stage: &'static str,
        bytes: usize,
        timeout: std::time::Duration,
    ) -> Result<Option<Reservation>> {
        if self.reserve_timeout(stage, bytes, timeout)? {
            Ok(Some(Reservation {
                budget: Arc::clone(self),
                stage,
                bytes,
            }))
        } else {
            Ok(None)
        }
    }
}

/// A held reservation, released on drop.
pub struct Reservation {
    budget: Arc<MemoryBudget>,
    stage: &'static str,
    bytes: usize,
}

impl Reservation {
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // underflow is impossible for a guard constructed via reserve_owned
        let _ = self.budget.release(self.stage, self.bytes);
    }
}

#[cfg(test)]
mod testing {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_try_reserve_and_release() {
        let budget = MemoryBudget::new(1000);
        budget.try_reserve("a", 600).unwrap();
        assert_eq!(budget.reserved(), 600);
        assert_eq!(budget.stage_reserved("a"), 600);

        let err = budget.try_reserve("b", 500).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Budget(BudgetError::Exceeded { .. })
        ));

        budget.release("a", 600).unwrap();
        budget.try_reserve("b", 500).unwrap();
        assert_eq!(budget.reserved(), 500);
    }

    #[test]
    fn test_request_larger_than_capacity() {
        let budget = MemoryBudget::new(100);
        let err = budget.reserve("a", 101).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Budget(BudgetError::RequestTooLarge { .. })
        ));
    }

    #[test]
    fn test_release_underflow_detected() {
        let budget = MemoryBudget::new(100);
        budget.try_reserve("a", 10).unwrap();
        assert!(budget.release("a", 20).is_err());
        assert!(budget.release("never-reserved", 1).is_err());
    }

    #[test]
    fn test_blocking_reserve_wakes_on_release() {
        let budget = Arc::new(MemoryBudget::new(100));
        budget.try_reserve("holder", 100).unwrap();

        let waiter = {
            let budget = Arc::clone(&budget);
            thread::spawn(move || {
                budget.reserve("waiter", 50).unwrap();
                budget.reserved()
            })
        };

        thread::sleep(Duration::from_millis(50));
        budget.release("holder", 100).unwrap();
        let reserved_after = waiter.join().unwrap();
        assert_eq!(reserved_after, 50);
    }

    #[test]
    fn test_sum_never_exceeds_capacity_under_contention() {
        let budget = Arc::new(MemoryBudget::new(64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let budget = Arc::clone(&budget);
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    let guard = budget.reserve_owned("worker", 16).unwrap();
                    assert!(budget.reserved() <= budget.capacity());
                    drop(guard);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(budget.reserved(), 0);
    }
}
