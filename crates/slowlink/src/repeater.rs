use std::time::{Duration, Instant};

/// Interval gate: `fired` answers true at most once per interval. A fresh
/// repeater is overdue, so the first check fires immediately.
#[derive(Debug, Clone, Copy)]
pub struct Repeater {
    interval: Duration,
    last_acted: Option<Instant>,
}

impl Repeater {
    pub fn every(interval: Duration) -> Self {
        Self { interval, last_acted: None }
    }

    pub fn fired(&mut self) -> bool {
        let due = self.last_acted.is_none_or(|last| last.elapsed() >= self.interval);
        if due {
            self.last_acted = Some(Instant::now());
        }
        due
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn reset(&mut self) {
        self.last_acted = Some(Instant::now());
    }

    pub fn force_fire(&mut self) {
        self.last_acted = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_check_fires_then_waits() {
        let mut repeater = Repeater::every(Duration::from_secs(3600));
        assert!(repeater.fired());
        assert!(!repeater.fired());
        repeater.force_fire();
        assert!(repeater.fired());
    }

    #[test]
    fn reset_defers_the_next_fire() {
        let mut repeater = Repeater::every(Duration::from_secs(3600));
        repeater.reset();
        assert!(!repeater.fired());
    }
}
