//! Clock abstraction so retry/ttl timing is testable without real sleeps.
//!
//! Mirrors the `Clock` trait the teaching framework's environment module
//! sketches (dependency-injected time, `SystemClock` for production, a fixed
//! clock for tests) rather than calling `SystemTime::now()` directly from
//! queue/topic code.

use std::sync::Arc;

/// Abstracts "what time is it" for retry scheduling and ttl checks.
pub trait Clock: Send + Sync {
    /// Current time, milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        crate::event::now_millis()
    }
}

/// The default clock handle used when a caller doesn't supply one.
#[must_use]
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
