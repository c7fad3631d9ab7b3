use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window used to measure the frame arrival rate.
pub const FPS_WINDOW: Duration = Duration::from_secs(2);

/// Upper bound on retained arrival timestamps.
const MAX_SAMPLES: usize = 256;

/// Measures frame arrival rate over a sliding window.
#[derive(Debug, Default)]
pub struct FpsMeter {
    arrivals: VecDeque<Instant>,
}

impl FpsMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, at: Instant) {
        if self.arrivals.len() == MAX_SAMPLES {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(at);
        self.prune(at);
    }

    /// Frames per second over the window ending at `now`. Zero with fewer
    /// than two arrivals in the window.
    pub fn fps(&mut self, now: Instant) -> f64 {
        self.prune(now);
        let (Some(first), Some(last)) = (self.arrivals.front(), self.arrivals.back()) else {
            return 0.0;
        };
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if self.arrivals.len() < 2 || span <= 0.0 {
            return 0.0;
        }
        (self.arrivals.len() - 1) as f64 / span
    }

    pub fn clear(&mut self) {
        self.arrivals.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.arrivals.front() {
            if now.saturating_duration_since(*front) > FPS_WINDOW {
                self.arrivals.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_meter_reports_zero() {
        let mut meter = FpsMeter::new();
        assert_eq!(meter.fps(Instant::now()), 0.0);
    }

    #[test]
    fn test_steady_rate() {
        let mut meter = FpsMeter::new();
        let start = Instant::now();
        for i in 0..11 {
            meter.record(start + Duration::from_millis(i * 100));
        }
        let fps = meter.fps(start + Duration::from_millis(1000));
        assert!((fps - 10.0).abs() < 0.01, "fps = {fps}");
    }

    #[test]
    fn test_old_arrivals_expire() {
        let mut meter = FpsMeter::new();
        let start = Instant::now();
        meter.record(start);
        meter.record(start + Duration::from_millis(100));
        assert!(meter.fps(start + Duration::from_millis(100)) > 0.0);
        assert_eq!(meter.fps(start + Duration::from_secs(5)), 0.0);
    }
}
