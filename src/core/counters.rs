//! Shared global counters aggregated across concurrent workers.
//!
//! The counters are the only structure mutated by multiple workers. Episode
//! and iteration counts are plain atomics and monotonically non-decreasing;
//! reward accumulation is folded under a single mutex at episode-terminal
//! boundaries only, which bounds contention to one lock per episode.
//! Exploration and optimal-selection rates are read-mostly and may be
//! eventually consistent.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// How `global_rewards` summarizes per-episode rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewardMode {
    /// Running sum of episode rewards (an accumulator).
    #[default]
    Val,
    /// Best single-episode reward observed.
    Max,
    /// Sum normalized by the episode count at read time.
    Ave,
}

impl RewardMode {
    /// Parse the `RewardType` property value.
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "VAL" => Some(Self::Val),
            "MAX" => Some(Self::Max),
            "AVE" => Some(Self::Ave),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct RewardAccum {
    sum: f64,
    max: f64,
    last: f64,
}

impl Default for RewardAccum {
    fn default() -> Self {
        Self {
            sum: 0.0,
            max: f64::NEG_INFINITY,
            last: 0.0,
        }
    }
}

/// Cross-worker aggregates of episodes, reward and iterations.
#[derive(Debug)]
pub struct GlobalCounters {
    episodes: AtomicUsize,
    iterations: AtomicUsize,
    max_iterations: AtomicUsize,
    optimal_steps: AtomicUsize,
    total_steps: AtomicUsize,
    exploration_rate: AtomicU64,
    rewards: Mutex<RewardAccum>,
    reward_mode: RewardMode,
}

impl GlobalCounters {
    /// Create counters with the given iteration ceiling and reward mode.
    pub fn new(max_iterations: usize, reward_mode: RewardMode) -> Self {
        Self {
            episodes: AtomicUsize::new(0),
            iterations: AtomicUsize::new(0),
            max_iterations: AtomicUsize::new(max_iterations),
            optimal_steps: AtomicUsize::new(0),
            total_steps: AtomicUsize::new(0),
            exploration_rate: AtomicU64::new(0f64.to_bits()),
            rewards: Mutex::new(RewardAccum::default()),
            reward_mode,
        }
    }

    /// Global episode count.
    pub fn episodes(&self) -> usize {
        self.episodes.load(Ordering::Acquire)
    }

    /// Global iteration count.
    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::Acquire)
    }

    /// Global iteration ceiling.
    pub fn max_iterations(&self) -> usize {
        self.max_iterations.load(Ordering::Acquire)
    }

    /// Override the iteration ceiling.
    pub fn set_max_iterations(&self, max: usize) {
        self.max_iterations.store(max, Ordering::Release);
    }

    /// Whether the shared iteration ceiling has been reached.
    pub fn ceiling_reached(&self) -> bool {
        self.iterations() >= self.max_iterations()
    }

    /// Count one completed iteration. Returns the new global count.
    pub fn add_iteration(&self) -> usize {
        self.iterations.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Fold one completed episode into the aggregates.
    ///
    /// Called at episode-terminal boundaries only, never per step.
    pub fn record_episode(&self, episode_reward: f64) {
        self.episodes.fetch_add(1, Ordering::AcqRel);
        let mut accum = self.rewards.lock();
        accum.sum += episode_reward;
        if episode_reward > accum.max {
            accum.max = episode_reward;
        }
        accum.last = episode_reward;
    }

    /// Global reward summary under the configured [`RewardMode`].
    pub fn global_rewards(&self) -> f64 {
        let accum = self.rewards.lock();
        match self.reward_mode {
            RewardMode::Val => accum.sum,
            RewardMode::Max => {
                if accum.max.is_finite() {
                    accum.max
                } else {
                    0.0
                }
            }
            RewardMode::Ave => {
                let episodes = self.episodes();
                if episodes == 0 {
                    0.0
                } else {
                    accum.sum / episodes as f64
                }
            }
        }
    }

    /// Reward of the most recently folded episode.
    pub fn last_episode_reward(&self) -> f64 {
        self.rewards.lock().last
    }

    /// Fraction of training progress, `iterations / max_iterations`.
    pub fn progress(&self) -> f64 {
        let max = self.max_iterations();
        if max == 0 {
            0.0
        } else {
            self.iterations() as f64 / max as f64
        }
    }

    /// Record one action selection for the optimal-selection rate.
    pub fn record_selection(&self, optimal: bool) {
        self.total_steps.fetch_add(1, Ordering::Relaxed);
        if optimal {
            self.optimal_steps.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fraction of steps where the engine's preferred action was taken.
    pub fn optimal_selection_rate(&self) -> f64 {
        let total = self.total_steps.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.optimal_steps.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Current exploration rate.
    pub fn exploration_rate(&self) -> f64 {
        f64::from_bits(self.exploration_rate.load(Ordering::Relaxed))
    }

    /// Publish a new exploration rate (read-mostly, eventually consistent).
    pub fn set_exploration_rate(&self, rate: f64) {
        self.exploration_rate.store(rate.to_bits(), Ordering::Relaxed);
    }
}

/// Shared counters handle passed by reference into each worker.
pub type SharedCounters = Arc<GlobalCounters>;

/// Create a new shared counters handle.
pub fn global_counters(max_iterations: usize, reward_mode: RewardMode) -> SharedCounters {
    Arc::new(GlobalCounters::new(max_iterations, reward_mode))
}
