use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

pub type ClockHandle = Arc<dyn Clock>;

/// Monotonic time source. Injected into sessions and limiters.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub(crate) fn default_clock() -> ClockHandle {
    Arc::new(MonotonicClock)
}
