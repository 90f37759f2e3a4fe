//! Dispatch-rate ceiling.
//!
//! A pacer over dispatch instants: consecutive dispatches start at least
//! `1 / ceiling` seconds apart, so no one-second window ever holds more than
//! `ceil(ceiling)` of them. Idle time earns no burst credit. The wait adapts
//! to how fast items actually get dispatched instead of a fixed guess.

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::time::Instant;

pub struct Throttle {
    interval: Option<Duration>,
    next: Option<Instant>,
    fixed_delay: Duration,
}

impl Throttle {
    /// `ceiling` is in dispatches per second; `<= 0` disables the pacer.
    /// `fixed_delay` is slept after every dispatch regardless.
    pub fn new(ceiling: f64, fixed_delay: Duration) -> Result<Self> {
        let interval = if ceiling > 0.0 {
            let interval = Duration::try_from_secs_f64(1.0 / ceiling)
                .map_err(|e| anyhow!("ops ceiling {} is out of range: {}", ceiling, e))?;
            Some(interval)
        } else {
            None
        };
        Ok(Self {
            interval,
            next: None,
            fixed_delay,
        })
    }

    pub fn unlimited() -> Self {
        Self {
            interval: None,
            next: None,
            fixed_delay: Duration::ZERO,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.interval.is_some()
    }

    /// Minimum spacing between two dispatches.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Wait until one more dispatch fits under the ceiling, then record it.
    /// Returns how long the caller was held back.
    pub async fn acquire(&mut self) -> Duration {
        let begin = Instant::now();
        if let Some(interval) = self.interval {
            if let Some(next) = self.next {
                if next > begin {
                    tokio::time::sleep_until(next).await;
                }
            }
            let now = Instant::now();
            self.next = now.checked_add(interval);
        }
        begin.elapsed()
    }

    /// Coarse pause between dispatches, when configured.
    pub async fn pause(&self) {
        if !self.fixed_delay.is_zero() {
            tokio::time::sleep(self.fixed_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn dispatch_times(ceiling: f64, n: usize) -> Vec<Instant> {
        let mut t = Throttle::new(ceiling, Duration::ZERO).unwrap();
        let mut times = Vec::with_capacity(n);
        for _ in 0..n {
            t.acquire().await;
            times.push(Instant::now());
        }
        times
    }

    fn busiest_second(times: &[Instant]) -> usize {
        times
            .iter()
            .enumerate()
            .map(|(i, start)| {
                times[i..]
                    .iter()
                    .take_while(|t| t.duration_since(*start) < Duration::from_secs(1))
                    .count()
            })
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn interval_from_ceiling() {
        let t = Throttle::new(2.0, Duration::ZERO).unwrap();
        assert_eq!(t.interval(), Some(Duration::from_millis(500)));
        assert!(!Throttle::new(0.0, Duration::ZERO).unwrap().is_limited());
        assert!(!Throttle::new(-1.0, Duration::ZERO).unwrap().is_limited());
        assert!(!Throttle::unlimited().is_limited());
    }

    #[test]
    fn unrepresentable_interval_is_an_error() {
        assert!(Throttle::new(1e-300, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn default_ceiling_never_bursts() {
        let times = dispatch_times(1.75, 20).await;
        assert!(busiest_second(&times) <= 2, "{} in one second", busiest_second(&times));
        // 19 gaps of 1/1.75 s each
        assert!(times[19].duration_since(times[0]) >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn no_second_exceeds_ceiling() {
        for ceiling in [0.5, 1.0, 2.0, 3.5, 10.0] {
            let times = dispatch_times(ceiling, 30).await;
            let limit = ceiling.ceil() as usize;
            assert!(
                busiest_second(&times) <= limit,
                "ceiling {}: {} in one second",
                ceiling,
                busiest_second(&times)
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_earns_no_burst() {
        let mut t = Throttle::new(1.0, Duration::ZERO).unwrap();
        t.acquire().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(t.acquire().await, Duration::ZERO);
        assert!(t.acquire().await >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let mut t = Throttle::unlimited();
        for _ in 0..100 {
            assert_eq!(t.acquire().await, Duration::ZERO);
        }
    }
}
