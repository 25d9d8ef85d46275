//! Wall-clock source
//!
//! Deferral compares a stored `retry_at` against the current UTC time. The clock
//! is injected so tests can move time forward without sleeping.

use chrono::{DateTime, SubsecRound, Utc};

pub trait Clock: Send + Sync {
    /// Current UTC time, truncated to whole seconds
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}
