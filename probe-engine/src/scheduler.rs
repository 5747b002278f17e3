use crate::protocol::Protocol;
use std::time::Duration;
use tokio::time::Instant;

/// Decides which protocol is under test, rotating through all of them on a fixed interval
#[derive(Debug)]
pub struct RoundRobinScheduler {
    current: Protocol,
    last_switch: Instant,
    switch_interval: Duration,
}

impl RoundRobinScheduler {
    pub fn new(start: Instant, switch_interval: Duration) -> Self {
        Self {
            current: Protocol::Http,
            last_switch: start,
            switch_interval,
        }
    }

    pub fn current(&self) -> Protocol {
        self.current
    }

    pub fn last_switch(&self) -> Instant {
        self.last_switch
    }

    pub fn switch_interval(&self) -> Duration {
        self.switch_interval
    }

    /// Switches to the next protocol if the switch interval has elapsed
    ///
    /// A tick advances by at most one protocol, no matter how late it is observed.
    pub fn tick(&mut self, now: Instant) -> Option<Protocol> {
        if now.saturating_duration_since(self.last_switch) < self.switch_interval {
            return None;
        }

        self.current = self.current.next();
        self.last_switch = now;
        Some(self.current)
    }
}
