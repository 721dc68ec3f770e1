//! Daily model spend tracking
//!
//! A reservation is taken before any model call so concurrent turns cannot
//! jointly overshoot the cap; it is settled against the real token cost
//! once the turn ends.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::Result;
use chrono::{NaiveDate, Utc};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

#[derive(Debug)]
struct SpendState {
    day: NaiveDate,
    spent: f64,
}

/// An outstanding hold against the daily cap
#[derive(Debug)]
#[must_use = "a reservation must be settled"]
pub struct Reservation {
    day: NaiveDate,
    amount: f64,
}

impl Reservation {
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

#[derive(Debug)]
pub struct SpendTracker {
    cap: f64,
    state: Mutex<SpendState>,
}

impl SpendTracker {
    pub fn new(daily_cap_usd: f64) -> Self {
        Self {
            cap: daily_cap_usd,
            state: Mutex::new(SpendState {
                day: Utc::now().date_naive(),
                spent: 0.0,
            }),
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.daily_budget_usd)
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    /// Check and increment under one lock
    pub fn reserve(&self, amount: f64) -> Result<Reservation> {
        self.reserve_on(Utc::now().date_naive(), amount)
    }

    /// Replace the reservation with the actual cost
    pub fn settle(&self, reservation: Reservation, actual: f64) {
        self.settle_on(Utc::now().date_naive(), reservation, actual)
    }

    pub fn spent_today(&self) -> f64 {
        self.lock_for(Utc::now().date_naive()).spent
    }

    fn lock_for(&self, today: NaiveDate) -> MutexGuard<'_, SpendState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.day != today {
            debug!(previous = %state.day, spent = state.spent, "Resetting daily spend");
            state.day = today;
            state.spent = 0.0;
        }
        state
    }

    fn reserve_on(&self, today: NaiveDate, amount: f64) -> Result<Reservation> {
        let mut state = self.lock_for(today);
        if state.spent + amount > self.cap {
            warn!(
                spent = state.spent,
                requested = amount,
                cap = self.cap,
                "Daily budget exhausted"
            );
            return Err(AgentError::BudgetExceeded {
                spent: state.spent,
                cap: self.cap,
            });
        }
        state.spent += amount;
        Ok(Reservation { day: today, amount })
    }

    fn settle_on(&self, today: NaiveDate, reservation: Reservation, actual: f64) {
        let mut state = self.lock_for(today);
        // A reservation from before the rollover was already wiped
        if reservation.day == state.day {
            state.spent -= reservation.amount;
        }
        state.spent = (state.spent + actual).max(0.0);
    }
}
