//! Episode lifecycle state machine.
//!
//! One episode is a reset-to-terminal trajectory through an environment.
//! The phase cycle is `AwaitingReset -> Running -> Terminal -> AwaitingReset`.
//!
//! The discounted-return accumulator is cleared either immediately on
//! entering `Terminal` or deferred to the next reset, selected by the
//! `AllowDiscountReset` configuration switch. The switch only picks the
//! clearing boundary; its numeric effect on the learning algorithm lives
//! downstream.

/// Phase of the episode lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EpisodePhase {
    /// The next data request must carry `reset = true`.
    AwaitingReset,
    /// The episode is in progress; each data request supplies an action.
    Running,
    /// The environment reported `done = true`.
    Terminal,
}

impl EpisodePhase {
    /// Whether the next data request must be a reset.
    #[inline]
    pub fn needs_reset(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Whether the episode has ended.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal)
    }

    /// Whether the episode is in progress.
    #[inline]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl Default for EpisodePhase {
    fn default() -> Self {
        Self::AwaitingReset
    }
}

/// Per-worker mutable episode record.
///
/// Created at trainer initialization, mutated every step, cleared on
/// shutdown. Never shared between workers.
#[derive(Debug, Clone, Default)]
pub struct EpisodeContext {
    phase: EpisodePhase,
    episode_reward: f64,
    discounted_return: f64,
    step_count: usize,
    completed_episodes: usize,
    allow_discount_reset: bool,
    gamma: f64,
}

impl EpisodeContext {
    /// Create a context with the trainer's discount settings.
    pub fn new(gamma: f64, allow_discount_reset: bool) -> Self {
        Self {
            phase: EpisodePhase::AwaitingReset,
            gamma,
            allow_discount_reset,
            ..Default::default()
        }
    }

    /// Current phase.
    pub fn phase(&self) -> EpisodePhase {
        self.phase
    }

    /// Reward accumulated in the current episode.
    pub fn episode_reward(&self) -> f64 {
        self.episode_reward
    }

    /// Discounted-return accumulator (consumed by the learning algorithm).
    pub fn discounted_return(&self) -> f64 {
        self.discounted_return
    }

    /// Steps taken in the current episode.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Episodes completed by this context.
    pub fn completed_episodes(&self) -> usize {
        self.completed_episodes
    }

    /// Record a consumed observation.
    ///
    /// Returns the resulting phase: `Terminal` if the environment reported
    /// the episode done, `Running` otherwise.
    pub fn record_step(&mut self, reward: f64, done: bool) -> EpisodePhase {
        if self.phase == EpisodePhase::AwaitingReset {
            // A reset observation opens the episode; its reward counts.
            self.phase = EpisodePhase::Running;
        }
        self.episode_reward += reward;
        self.discounted_return = self.discounted_return * self.gamma + reward;
        self.step_count += 1;

        if done {
            self.phase = EpisodePhase::Terminal;
            self.completed_episodes += 1;
            if self.allow_discount_reset {
                self.discounted_return = 0.0;
            }
        }
        self.phase
    }

    /// Transition from `Terminal` back to `AwaitingReset`, clearing the
    /// per-episode accumulators. The deferred discount clearing happens
    /// here when `AllowDiscountReset` is off.
    pub fn finish_episode(&mut self) {
        self.phase = EpisodePhase::AwaitingReset;
        self.episode_reward = 0.0;
        self.step_count = 0;
        if !self.allow_discount_reset {
            self.discounted_return = 0.0;
        }
    }

    /// Abort the current episode without counting it (error recovery).
    pub fn abort_episode(&mut self) {
        self.phase = EpisodePhase::AwaitingReset;
        self.episode_reward = 0.0;
        self.step_count = 0;
        self.discounted_return = 0.0;
    }

    /// Clear everything on shutdown.
    pub fn clear(&mut self) {
        let gamma = self.gamma;
        let allow = self.allow_discount_reset;
        *self = Self::new(gamma, allow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_cycle() {
        let mut ctx = EpisodeContext::new(0.99, false);
        assert_eq!(ctx.phase(), EpisodePhase::AwaitingReset);
        assert!(ctx.phase().needs_reset());

        assert_eq!(ctx.record_step(1.0, false), EpisodePhase::Running);
        assert!(!ctx.phase().needs_reset());

        assert_eq!(ctx.record_step(1.0, true), EpisodePhase::Terminal);
        assert!(ctx.phase().needs_reset());
        assert_eq!(ctx.completed_episodes(), 1);

        ctx.finish_episode();
        assert_eq!(ctx.phase(), EpisodePhase::AwaitingReset);
        assert_eq!(ctx.episode_reward(), 0.0);
        assert_eq!(ctx.step_count(), 0);
    }

    #[test]
    fn test_episode_reward_accumulates() {
        let mut ctx = EpisodeContext::new(1.0, false);
        ctx.record_step(1.0, false);
        ctx.record_step(2.0, false);
        ctx.record_step(3.0, true);
        assert_eq!(ctx.episode_reward(), 6.0);
        assert_eq!(ctx.step_count(), 3);
    }

    #[test]
    fn test_discount_reset_immediate() {
        let mut ctx = EpisodeContext::new(0.5, true);
        ctx.record_step(1.0, false);
        assert!(ctx.discounted_return() > 0.0);

        // Entering Terminal clears the accumulator at once.
        ctx.record_step(1.0, true);
        assert_eq!(ctx.discounted_return(), 0.0);
    }

    #[test]
    fn test_discount_reset_deferred() {
        let mut ctx = EpisodeContext::new(0.5, false);
        ctx.record_step(1.0, false);
        ctx.record_step(1.0, true);

        // Terminal entry leaves the accumulator for the learner to drain.
        assert!(ctx.discounted_return() > 0.0);

        // The next reset cycle clears it.
        ctx.finish_episode();
        assert_eq!(ctx.discounted_return(), 0.0);
    }

    #[test]
    fn test_abort_does_not_count_episode() {
        let mut ctx = EpisodeContext::new(0.99, false);
        ctx.record_step(1.0, false);
        ctx.abort_episode();
        assert_eq!(ctx.completed_episodes(), 0);
        assert_eq!(ctx.phase(), EpisodePhase::AwaitingReset);
        assert_eq!(ctx.episode_reward(), 0.0);
    }
}
