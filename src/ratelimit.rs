//! Rolling-window admission control shared by every item of a batch.
//!
//! The limiter counts *attempts*, not items: a retry consumes a permit just
//! like a first attempt. This keeps the batch as a whole inside the remote
//! quota, and a single item stuck in a retry loop cannot starve the others
//! because it has to queue for permits like everybody else.
//!
//! The window state sits behind a mutex that is never held across an await
//! point. A permit is recorded under the lock before the attempt starts.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::config::{MAX_HOLD_OFF, RATE_WINDOW};

/// Sliding-window limiter: at most `capacity` admissions per `window`.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: usize,
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug, Default)]
struct WindowState {
    /// Admission instants inside the current window, oldest first.
    admitted: VecDeque<Instant>,
    /// No admissions before this instant (server-requested hold-off).
    hold_until: Option<Instant>,
}

impl RateLimiter {
    /// A limiter admitting `capacity` attempts per `window`.
    ///
    /// A zero capacity is treated as one; [`crate::config::BatchConfig::validate`]
    /// rejects it before a limiter is ever built.
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity: capacity.max(1) as usize,
            window,
            state: Mutex::new(WindowState::default()),
        }
    }

    /// A limiter over the standard 60-second window.
    pub fn per_minute(rpm: u32) -> Self {
        Self::new(rpm, RATE_WINDOW)
    }

    /// Wait until an attempt may start, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = match self.try_acquire() {
                Ok(()) => return,
                Err(wait) => wait,
            };
            debug!("Rate window full, next permit in {:?}", wait);
            sleep(wait).await;
        }
    }

    /// Record an admission now if the window has room, otherwise return how
    /// long until it might.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.lock();

        if let Some(until) = state.hold_until {
            if until > now {
                return Err(until - now);
            }
            state.hold_until = None;
        }

        while let Some(&oldest) = state.admitted.front() {
            if now.duration_since(oldest) >= self.window {
                state.admitted.pop_front();
            } else {
                break;
            }
        }

        if state.admitted.len() < self.capacity {
            state.admitted.push_back(now);
            return Ok(());
        }

        // Window full: the oldest admission is the first to expire.
        let oldest = state.admitted.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    /// Refuse new admissions for `duration`, capped at [`MAX_HOLD_OFF`].
    /// Extends, never shortens, an existing hold-off.
    pub fn hold_off(&self, duration: Duration) {
        let now = Instant::now();
        let capped = duration.min(MAX_HOLD_OFF);
        if capped < duration {
            debug!("Clamping hold-off of {:?} to {:?}", duration, MAX_HOLD_OFF);
        }
        let Some(until) = now.checked_add(capped) else {
            return;
        };
        let mut state = self.lock();
        match state.hold_until {
            Some(existing) if existing >= until => {}
            _ => state.hold_until = Some(until),
        }
    }

    /// Admissions counted in the current window.
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .admitted
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window)
            .count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_capacity_immediately() {
        let limiter = RateLimiter::per_minute(3);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_window(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_oldest_permit_to_expire() {
        let limiter = RateLimiter::per_minute(2);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn try_acquire_reports_remaining_wait() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        assert!(limiter.try_acquire().is_ok());
        tokio::time::advance(Duration::from_secs(4)).await;
        let wait = limiter.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn window_rolls_rather_than_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(31)).await;
        // First permit expired, second still counts.
        assert_eq!(limiter.in_window(), 1);
        assert!(limiter.try_acquire().is_ok());
        assert!(limiter.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn hold_off_blocks_admission() {
        let limiter = RateLimiter::per_minute(100);
        limiter.hold_off(Duration::from_secs(5));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_hold_off_does_not_shrink_existing() {
        let limiter = RateLimiter::per_minute(100);
        limiter.hold_off(Duration::from_secs(10));
        limiter.hold_off(Duration::from_secs(1));
        let wait = limiter.try_acquire().unwrap_err();
        assert_eq!(wait, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn huge_hold_off_is_clamped() {
        let limiter = RateLimiter::per_minute(100);
        limiter.hold_off(Duration::from_secs(u64::MAX));
        limiter.hold_off(Duration::MAX);
        let wait = limiter.try_acquire().unwrap_err();
        assert_eq!(wait, MAX_HOLD_OFF);

        let start = Instant::now();
        limiter.acquire().await;
        let elapsed = start.elapsed();
        assert!(elapsed >= MAX_HOLD_OFF, "elapsed {elapsed:?}");
        assert!(elapsed < MAX_HOLD_OFF + Duration::from_secs(1), "elapsed {elapsed:?}");
    }

    #[test]
    fn zero_capacity_is_clamped() {
        assert_eq!(RateLimiter::per_minute(0).capacity(), 1);
    }
}
