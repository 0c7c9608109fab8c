//! Clock abstraction so time-dependent code (debounce grace periods, tick
//! pacing) can run against virtual time in tests.

use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used outside of tests.
pub struct RealClock;

impl Default for RealClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RealClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual clock for deterministic tests. `sleep` advances the clock instead
/// of blocking.
pub struct TestClock {
    current_time: std::sync::Mutex<Instant>,
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            current_time: std::sync::Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut time = self.current_time.lock().unwrap();
        *time += duration;
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.current_time.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        std::thread::yield_now();
    }
}

pub type SharedClock = std::sync::Arc<dyn Clock + Send + Sync>;

pub fn real_clock() -> SharedClock {
    std::sync::Arc::new(RealClock::new())
}

pub fn test_clock() -> std::sync::Arc<TestClock> {
    std::sync::Arc::new(TestClock::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_on_sleep() {
        let clock = TestClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.now().duration_since(start), Duration::from_millis(250));
    }
}
