//! Time abstraction for testability.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations so participants can be tested
/// with deterministic timestamps.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
