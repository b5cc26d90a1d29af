//! Rate shaping - re-fetch throttle and optimistic-clear debounce
//!
//! Both timers are driven by the caller passing the current instant, so
//! they run under tokio's clock in production and a hand-advanced one in
//! tests.

use std::time::Duration;
use tokio::time::Instant;

/// At most one fire per interval; triggers inside the window coalesce into
/// one trailing fire when it closes
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last_fired: Option<Instant>,
    pending: bool,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_fired: None,
            pending: false,
        }
    }

    /// Register a trigger; returns `true` if the caller should fire now
    pub fn trigger(&mut self, now: Instant) -> bool {
        if self.window_open(now) {
            self.pending = true;
            false
        } else {
            self.note_fired(now);
            true
        }
    }

    /// Returns `true` once when a coalesced trailing fire is due
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.pending && !self.window_open(now) {
            self.note_fired(now);
            true
        } else {
            false
        }
    }

    /// Record a fire that happened outside `trigger`/`poll`
    pub fn note_fired(&mut self, now: Instant) {
        self.last_fired = Some(now);
        self.pending = false;
    }

    /// When the pending trailing fire is due
    pub fn deadline(&self) -> Option<Instant> {
        match (self.pending, self.last_fired) {
            (true, Some(last)) => Some(last + self.interval),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    fn window_open(&self, now: Instant) -> bool {
        self.last_fired
            .map(|last| now.saturating_duration_since(last) < self.interval)
            .unwrap_or(false)
    }
}

/// Fires once after a quiet period; every restart pushes the deadline out
#[derive(Debug, Clone)]
pub struct Debounce {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            deadline: None,
        }
    }

    pub fn restart(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` once when the quiet period has elapsed
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_throttle_first_trigger_fires() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(500));
        assert!(throttle.trigger(t0));
        assert!(throttle.deadline().is_none());
    }

    #[test]
    fn test_throttle_burst_coalesces_into_one_trailing_fire() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(500));
        assert!(throttle.trigger(t0));
        assert!(!throttle.trigger(t0 + ms(100)));
        assert!(!throttle.trigger(t0 + ms(200)));
        assert!(!throttle.trigger(t0 + ms(499)));
        assert_eq!(throttle.deadline(), Some(t0 + ms(500)));

        assert!(!throttle.poll(t0 + ms(499)));
        assert!(throttle.poll(t0 + ms(500)));
        assert!(!throttle.poll(t0 + ms(600)));
        assert!(!throttle.is_pending());
    }

    #[test]
    fn test_throttle_trailing_fire_restarts_window() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(ms(500));
        throttle.trigger(t0);
        throttle.trigger(t0 + ms(10));
        assert!(throttle.poll(t0 + ms(500)));
        // Inside the window opened by the trailing fire
        assert!(!throttle.trigger(t0 + ms(700)));
        assert!(throttle.trigger(t0 + ms(1000)));
        assert!(!throttle.is_pending());
    }

    #[test]
    fn test_debounce_restart_pushes_deadline() {
        let t0 = Instant::now();
        let mut debounce = Debounce::new(ms(1000));
        debounce.restart(t0);
        debounce.restart(t0 + ms(800));
        assert!(!debounce.poll(t0 + ms(1000)));
        assert!(debounce.poll(t0 + ms(1800)));
        assert!(!debounce.poll(t0 + ms(2000)));
    }

    #[test]
    fn test_debounce_cancel() {
        let t0 = Instant::now();
        let mut debounce = Debounce::new(ms(1000));
        debounce.restart(t0);
        debounce.cancel();
        assert!(!debounce.is_armed());
        assert!(!debounce.poll(t0 + ms(5000)));
    }
}
