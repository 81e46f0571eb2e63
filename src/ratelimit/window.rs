//! Sliding window request counter.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Counts requests over a rolling time window.
///
/// Unlike a fixed window that resets on a boundary, every admitted request is
/// remembered until it is exactly `window` old, so at most `max_requests` are
/// admitted in *any* interval of length `window`.
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter {
    /// Length of the rolling window
    window: Duration,
    /// Requests admitted per window
    max_requests: u32,
    /// Admission instants, oldest first
    timestamps: VecDeque<Instant>,
}

impl SlidingWindowCounter {
    /// Create a new, empty counter.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            timestamps: VecDeque::with_capacity(max_requests as usize),
        }
    }

    /// Check whether a request may proceed now.
    pub fn is_allowed(&mut self) -> (bool, Duration) {
        self.is_allowed_at(Instant::now())
    }

    /// Check whether a request may proceed at `now`.
    ///
    /// An admitted request is recorded. A denied one is not, and the returned
    /// duration is how long until the oldest recorded request leaves the window.
    pub fn is_allowed_at(&mut self, now: Instant) -> (bool, Duration) {
        self.evict(now);

        if self.timestamps.len() < self.max_requests as usize {
            self.timestamps.push_back(now);
            (true, Duration::ZERO)
        } else {
            (false, self.wait_for_oldest(now))
        }
    }

    /// How long until a request would be admitted, without recording one.
    pub fn wait_time_at(&mut self, now: Instant) -> Duration {
        self.evict(now);

        if self.timestamps.len() < self.max_requests as usize {
            Duration::ZERO
        } else {
            self.wait_for_oldest(now)
        }
    }

    /// Number of requests still inside the window at `now`, without evicting.
    pub fn requests_in_window_at(&self, now: Instant) -> usize {
        self.timestamps
            .iter()
            .filter(|&&t| now.saturating_duration_since(t) < self.window)
            .count()
    }

    /// Change the per-window ceiling.
    ///
    /// Already recorded requests are kept; if the ceiling drops below the
    /// current count, requests are denied until enough of them expire.
    pub fn set_max_requests(&mut self, max_requests: u32) {
        self.max_requests = max_requests;
    }

    /// Get the per-window ceiling.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn wait_for_oldest(&self, now: Instant) -> Duration {
        match self.timestamps.front() {
            Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
            // Zero ceiling with nothing recorded never opens up
            None => Duration::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    fn at(start: Instant, secs: u64) -> Instant {
        start + Duration::from_secs(secs)
    }

    #[test]
    fn test_admits_up_to_limit() {
        let start = Instant::now();
        let mut window = SlidingWindowCounter::new(MINUTE, 3);

        assert_eq!(window.is_allowed_at(at(start, 0)), (true, Duration::ZERO));
        assert_eq!(window.is_allowed_at(at(start, 1)), (true, Duration::ZERO));
        assert_eq!(window.is_allowed_at(at(start, 2)), (true, Duration::ZERO));

        let (allowed, wait) = window.is_allowed_at(at(start, 3));
        assert!(!allowed);
        assert_eq!(wait, Duration::from_secs(57));

        // First request has left the window
        let (allowed, _) = window.is_allowed_at(at(start, 61));
        assert!(allowed);
    }

    #[test]
    fn test_denied_attempt_is_not_recorded() {
        let start = Instant::now();
        let mut window = SlidingWindowCounter::new(MINUTE, 1);

        assert!(window.is_allowed_at(at(start, 0)).0);
        for s in 1..30 {
            assert!(!window.is_allowed_at(at(start, s)).0);
        }
        assert_eq!(window.requests_in_window_at(at(start, 30)), 1);
        assert!(window.is_allowed_at(at(start, 60)).0);
    }

    #[test]
    fn test_eviction_boundary_is_inclusive() {
        let start = Instant::now();
        let mut window = SlidingWindowCounter::new(MINUTE, 1);

        assert!(window.is_allowed_at(start).0);
        // Exactly one window later the old entry no longer counts
        assert!(window.is_allowed_at(at(start, 60)).0);
    }

    #[test]
    fn test_burst_never_exceeds_limit() {
        let start = Instant::now();
        let mut window = SlidingWindowCounter::new(Duration::from_secs(10), 5);

        let admitted: Vec<u64> = (0..200u64)
            .map(|i| i * 250)
            .filter(|&ms| window.is_allowed_at(start + Duration::from_millis(ms)).0)
            .collect();

        for &first in &admitted {
            let in_window = admitted
                .iter()
                .filter(|&&t| t >= first && t < first + 10_000)
                .count();
            assert!(in_window <= 5, "window starting at {}ms admitted {}", first, in_window);
        }
    }

    #[test]
    fn test_wait_time_does_not_record() {
        let start = Instant::now();
        let mut window = SlidingWindowCounter::new(MINUTE, 2);

        assert_eq!(window.wait_time_at(start), Duration::ZERO);
        assert_eq!(window.requests_in_window_at(start), 0);

        window.is_allowed_at(at(start, 0));
        window.is_allowed_at(at(start, 10));
        assert_eq!(window.wait_time_at(at(start, 20)), Duration::from_secs(40));
        assert_eq!(window.requests_in_window_at(at(start, 20)), 2);
    }

    #[test]
    fn test_lowering_ceiling_blocks_until_expiry() {
        let start = Instant::now();
        let mut window = SlidingWindowCounter::new(MINUTE, 4);
        for s in 0..4 {
            assert!(window.is_allowed_at(at(start, s)).0);
        }

        window.set_max_requests(2);
        assert_eq!(window.max_requests(), 2);
        assert!(!window.is_allowed_at(at(start, 30)).0);

        // Only one entry is left at t=62.5
        let t = start + Duration::from_millis(62_500);
        assert!(window.is_allowed_at(t).0);
    }

    #[test]
    fn test_zero_ceiling_never_admits() {
        let start = Instant::now();
        let mut window = SlidingWindowCounter::new(MINUTE, 0);
        assert_eq!(window.is_allowed_at(start), (false, Duration::MAX));
    }
}
