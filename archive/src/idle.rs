//! Idle strategies for non-blocking poll loops.
//!
//! A poll loop calls [`IdleStrategy::idle_work`] after every sweep with the
//! amount of work the sweep did. A strategy decides what the thread does when
//! that count is zero: nothing, a spin hint, a yield, or a short park.
//!
//! No strategy owns a timer or blocks indefinitely; deadlines belong to the
//! loop that drives it.
//!
//! # Choosing a strategy
//!
//! | Strategy | Latency | CPU |
//! |---|---|---|
//! | [`NoOpIdleStrategy`] | lowest | a full core |
//! | [`BusySpinIdleStrategy`] | lowest | a full core, friendlier to the sibling hyperthread |
//! | [`YieldingIdleStrategy`] | low | high, but shares the core with ready threads |
//! | [`BackoffIdleStrategy`] | low when busy, parks when quiet | adaptive |
//! | [`SleepingIdleStrategy`] | one park period | minimal |

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Policy invoked between unproductive polls.
pub trait IdleStrategy {
    /// Performs one unit of waiting after a poll that made no progress.
    fn idle(&mut self);

    /// Returns the strategy to its least-waiting state.
    fn reset(&mut self) {}

    /// Idles if `work_count` is zero, otherwise resets.
    #[inline]
    fn idle_work(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
        } else {
            self.idle();
        }
    }
}

impl<I: IdleStrategy + ?Sized> IdleStrategy for &mut I {
    #[inline]
    fn idle(&mut self) {
        (**self).idle();
    }

    #[inline]
    fn reset(&mut self) {
        (**self).reset();
    }
}

impl<I: IdleStrategy + ?Sized> IdleStrategy for Box<I> {
    #[inline]
    fn idle(&mut self) {
        (**self).idle();
    }

    #[inline]
    fn reset(&mut self) {
        (**self).reset();
    }
}

/// Returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpIdleStrategy;

impl IdleStrategy for NoOpIdleStrategy {
    #[inline]
    fn idle(&mut self) {}
}

/// Issues a spin-loop hint and returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct BusySpinIdleStrategy;

impl IdleStrategy for BusySpinIdleStrategy {
    #[inline]
    fn idle(&mut self) {
        std::hint::spin_loop();
    }
}

/// Gives up the rest of the thread's timeslice.
#[derive(Debug, Clone, Copy, Default)]
pub struct YieldingIdleStrategy;

impl IdleStrategy for YieldingIdleStrategy {
    #[inline]
    fn idle(&mut self) {
        std::thread::yield_now();
    }
}

/// Parks the thread for a fixed period.
#[derive(Debug, Clone, Copy)]
pub struct SleepingIdleStrategy {
    period: Duration,
}

impl SleepingIdleStrategy {
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self { period }
    }

    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

impl Default for SleepingIdleStrategy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

impl IdleStrategy for SleepingIdleStrategy {
    fn idle(&mut self) {
        std::thread::sleep(self.period);
    }
}

/// Escalation phase of a [`BackoffIdleStrategy`].
///
/// After an `idle()` call this is what that call did. Ordered by how long one
/// call waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackoffState {
    /// No unproductive poll since the last reset.
    NotIdle,
    Spinning,
    Yielding,
    Parking,
}

/// Parameters for [`BackoffIdleStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Spin iterations before moving to yielding.
    pub max_spins: u32,
    /// Yields before moving to parking.
    pub max_yields: u32,
    /// First park period.
    pub min_park: Duration,
    /// Ceiling for the doubling park period.
    pub max_park: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_spins: 10,
            max_yields: 5,
            min_park: Duration::from_micros(1),
            max_park: Duration::from_millis(1),
        }
    }
}

/// Spins, then yields, then parks with a doubling period.
///
/// Exactly `max_spins` spins and `max_yields` yields happen before the first
/// park, and no call waits less than the one before it. Any productive poll
/// (see [`IdleStrategy::idle_work`]) drops the strategy straight back to
/// [`BackoffState::NotIdle`].
///
/// # Example
///
/// ```
/// use titan_archive::idle::{BackoffIdleStrategy, BackoffState, IdleStrategy};
///
/// let mut idle = BackoffIdleStrategy::default();
/// idle.idle_work(0);
/// assert_eq!(idle.state(), BackoffState::Spinning);
/// idle.idle_work(3);
/// assert_eq!(idle.state(), BackoffState::NotIdle);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffIdleStrategy {
    config: BackoffConfig,
    state: BackoffState,
    spins: u32,
    yields: u32,
    park_period: Duration,
    last_park: Duration,
}

impl BackoffIdleStrategy {
    /// Creates a strategy from explicit parameters.
    ///
    /// `max_park` is raised to `min_park` if it is smaller.
    #[must_use]
    pub fn new(mut config: BackoffConfig) -> Self {
        if config.max_park < config.min_park {
            config.max_park = config.min_park;
        }
        Self {
            config,
            state: BackoffState::NotIdle,
            spins: 0,
            yields: 0,
            park_period: config.min_park,
            last_park: Duration::ZERO,
        }
    }

    /// What the last `idle()` call did, or `NotIdle` after a reset.
    #[must_use]
    pub const fn state(&self) -> BackoffState {
        self.state
    }

    /// Period the next park will last.
    #[must_use]
    pub const fn park_period(&self) -> Duration {
        self.park_period
    }

    /// Period of the most recent park since the last reset; zero if none.
    #[must_use]
    pub const fn last_park(&self) -> Duration {
        self.last_park
    }

    #[must_use]
    pub const fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn escalate(&mut self) {
        if self.state == BackoffState::NotIdle {
            self.state = BackoffState::Spinning;
            self.spins = 0;
        }
        if self.state == BackoffState::Spinning && self.spins >= self.config.max_spins {
            self.state = BackoffState::Yielding;
            self.yields = 0;
        }
        if self.state == BackoffState::Yielding && self.yields >= self.config.max_yields {
            self.state = BackoffState::Parking;
            self.park_period = self.config.min_park;
        }
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl IdleStrategy for BackoffIdleStrategy {
    fn idle(&mut self) {
        self.escalate();
        match self.state {
            BackoffState::NotIdle | BackoffState::Spinning => {
                self.spins += 1;
                std::hint::spin_loop();
            }
            BackoffState::Yielding => {
                self.yields += 1;
                std::thread::yield_now();
            }
            BackoffState::Parking => {
                std::thread::sleep(self.park_period);
                self.last_park = self.park_period;
                self.park_period = (self.park_period * 2).min(self.config.max_park);
            }
        }
    }

    fn reset(&mut self) {
        self.state = BackoffState::NotIdle;
        self.spins = 0;
        self.yields = 0;
        self.park_period = self.config.min_park;
        self.last_park = Duration::ZERO;
    }
}
