//! Time source used for scheduling decisions.

use chrono::{DateTime, Utc};

/// Supplies the current time to the scheduler.
///
/// Lease expiry is judged by the store against its own clock; this clock only
/// drives due-to-run and lifetime decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
