//! Poll timer and retry policy.

use rand::Rng;
use std::future;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior, sleep_until};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BIND_RETRY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_MISSED_POLLS: u32 = 6;

/// How the device task recovers from failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed backoff after a socket bind or discovery send failure
    pub bind_retry: Duration,
    /// Time allowed from a scan (or bind request) to `bindok`
    pub handshake_timeout: Duration,
    /// Consecutive unanswered polls before the unit is considered lost; 0 disables
    pub max_missed_polls: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            bind_retry: DEFAULT_BIND_RETRY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_missed_polls: DEFAULT_MAX_MISSED_POLLS,
        }
    }
}

/// Outcome of a poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollTick {
    /// Send a status request
    Poll,
    /// Too many polls went unanswered
    Lost,
}

/// Status-poll timer. Exists only while bound; restarting replaces the old
/// timer instead of stacking a second one.
#[derive(Debug)]
pub struct PollScheduler {
    period: Duration,
    max_missed: u32,
    interval: Option<Interval>,
    outstanding: u32,
}

impl PollScheduler {
    pub fn new(period: Duration, max_missed: u32) -> Self {
        Self {
            period,
            max_missed,
            interval: None,
            outstanding: 0,
        }
    }

    /// Start polling. The first tick fires after a small random delay (at most
    /// a tenth of the period) so units bound at the same moment drift apart.
    pub fn start(&mut self) {
        let spread = (self.period.as_millis() / 10) as u64;
        let jitter = if spread > 0 {
            Duration::from_millis(rand::rng().random_range(0..spread))
        } else {
            Duration::ZERO
        };
        let mut interval = tokio::time::interval_at(Instant::now() + jitter, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        self.outstanding = 0;
    }

    pub fn cancel(&mut self) {
        self.interval = None;
        self.outstanding = 0;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Resolve on the next tick; never resolves while cancelled.
    pub async fn tick(&mut self) -> PollTick {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending::<()>().await,
        }
        self.on_tick()
    }

    fn on_tick(&mut self) -> PollTick {
        if self.max_missed > 0 && self.outstanding >= self.max_missed {
            return PollTick::Lost;
        }
        self.outstanding += 1;
        PollTick::Poll
    }

    /// A status reply arrived.
    pub fn record_reply(&mut self) {
        self.outstanding = 0;
    }
}

/// Deadline for the discovery + bind handshake.
#[derive(Debug)]
pub struct HandshakeTimer {
    timeout: Duration,
    deadline: Option<Instant>,
}

impl HandshakeTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolve once the deadline passes; never resolves while disarmed.
    pub async fn expired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn polls_until_replies_stop() {
        let mut poller = PollScheduler::new(Duration::from_secs(1), 2);
        poller.start();
        assert_eq!(poller.tick().await, PollTick::Poll);
        poller.record_reply();
        assert_eq!(poller.tick().await, PollTick::Poll);
        assert_eq!(poller.tick().await, PollTick::Poll);
        assert_eq!(poller.outstanding(), 2);
        assert_eq!(poller.tick().await, PollTick::Lost);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_disables_liveness() {
        let mut poller = PollScheduler::new(Duration::from_millis(10), 0);
        poller.start();
        for _ in 0..20 {
            assert_eq!(poller.tick().await, PollTick::Poll);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_poller_never_ticks() {
        let mut poller = PollScheduler::new(Duration::from_millis(10), 0);
        poller.start();
        poller.cancel();
        assert!(!poller.is_running());
        let result = tokio::time::timeout(Duration::from_secs(5), poller.tick()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_timer() {
        let mut poller = PollScheduler::new(Duration::from_secs(1), 3);
        poller.start();
        poller.tick().await;
        poller.tick().await;
        poller.start();
        assert_eq!(poller.outstanding(), 0);
        assert!(poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timer_fires_only_when_armed() {
        let mut timer = HandshakeTimer::new(Duration::from_secs(10));
        assert!(
            tokio::time::timeout(Duration::from_secs(30), timer.expired())
                .await
                .is_err()
        );
        timer.arm();
        assert!(
            tokio::time::timeout(Duration::from_secs(11), timer.expired())
                .await
                .is_ok()
        );
        timer.disarm();
        assert!(!timer.is_armed());
    }
}
