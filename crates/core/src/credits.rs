//! Client-side credit ledger with reservation semantics.
//!
//! The balance check and the deduction happen under one lock in
//! [`CreditLedger::reserve`], so two racing launches can never both pass
//! the check against the same credits. A [`Reservation`] is then either
//! committed (the remote accepted work) or released (refunded). Dropping an
//! unsettled reservation releases it.
//!
//! This is a usage gate, not a trust boundary: nothing here is enforced by
//! the remote.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::CoreError;

/// Balance a fresh session starts with.
pub const DEFAULT_STARTING_CREDITS: u64 = 500;

#[derive(Debug, Default)]
struct LedgerState {
    available: u64,
    held: u64,
}

/// Single shared credit store. Share it as `Arc<CreditLedger>`.
#[derive(Debug)]
pub struct CreditLedger {
    state: Mutex<LedgerState>,
}

impl CreditLedger {
    pub fn new(starting_balance: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LedgerState {
                available: starting_balance,
                held: 0,
            }),
        })
    }

    /// Credits that can still be reserved.
    pub fn available(&self) -> u64 {
        self.lock().available
    }

    /// Credits reserved by launches that have not settled yet.
    pub fn held(&self) -> u64 {
        self.lock().held
    }

    /// Whether a launch costing `cost` would currently pass the gate.
    pub fn can_afford(&self, cost: u64) -> bool {
        self.available() >= cost
    }

    /// Atomically check and deduct `cost`.
    pub fn reserve(self: &Arc<Self>, cost: u64) -> Result<Reservation, CoreError> {
        let mut state = self.lock();
        if state.available < cost {
            return Err(CoreError::InsufficientCredits {
                required: cost,
                available: state.available,
            });
        }
        state.available -= cost;
        state.held += cost;
        Ok(Reservation {
            ledger: Arc::clone(self),
            amount: cost,
            settled: false,
        })
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for CreditLedger {
    fn default() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                available: DEFAULT_STARTING_CREDITS,
                held: 0,
            }),
        }
    }
}

/// Credits held for one launch.
#[derive(Debug)]
#[must_use = "an unsettled reservation is refunded when dropped"]
pub struct Reservation {
    ledger: Arc<CreditLedger>,
    amount: u64,
    settled: bool,
}

impl Reservation {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Make the deduction permanent.
    pub fn commit(mut self) {
        let mut state = self.ledger.lock();
        state.held -= self.amount;
        self.settled = true;
    }

    /// Refund the held credits.
    pub fn release(mut self) {
        self.refund();
    }

    fn refund(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.ledger.lock();
        state.held -= self.amount;
        state.available += self.amount;
        self.settled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.refund();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn reserve_deducts_immediately() {
        let ledger = CreditLedger::new(500);
        let r = ledger.reserve(100).unwrap();
        assert_eq!(ledger.available(), 400);
        assert_eq!(ledger.held(), 100);
        r.commit();
        assert_eq!(ledger.available(), 400);
        assert_eq!(ledger.held(), 0);
    }

    #[test]
    fn release_refunds() {
        let ledger = CreditLedger::new(120);
        let r = ledger.reserve(100).unwrap();
        r.release();
        assert_eq!(ledger.available(), 120);
        assert_eq!(ledger.held(), 0);
    }

    #[test]
    fn dropped_reservation_is_refunded() {
        let ledger = CreditLedger::new(50);
        {
            let _r = ledger.reserve(50).unwrap();
            assert_eq!(ledger.available(), 0);
        }
        assert_eq!(ledger.available(), 50);
    }

    #[test]
    fn cannot_go_negative() {
        let ledger = CreditLedger::new(90);
        assert_matches!(
            ledger.reserve(100),
            Err(CoreError::InsufficientCredits {
                required: 100,
                available: 90
            })
        );
        assert_eq!(ledger.available(), 90);
    }

    #[test]
    fn exact_balance_is_enough() {
        let ledger = CreditLedger::new(50);
        assert!(ledger.can_afford(50));
        ledger.reserve(50).unwrap().commit();
        assert_eq!(ledger.available(), 0);
        assert!(!ledger.can_afford(50));
    }

    #[test]
    fn racing_reservations_never_overdraw() {
        let ledger = CreditLedger::new(500);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.reserve(100).map(Reservation::commit).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 5);
        assert_eq!(ledger.available(), 0);
    }
}
