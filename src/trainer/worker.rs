//! The per-worker episode step loop shared by all topologies.
//!
//! Each worker exclusively owns one data source (and through it one
//! environment handle) and one episode context, and shares the global
//! counters, the engine, the cancel token and the parent callback with
//! its siblings. Cancellation is observed at the top of the loop only, so
//! a step never ends in an inconsistent episode state.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::callback::{DataSource, GetDataArgs, TrainerCallback};
use crate::core::cancel::CancelToken;
use crate::core::counters::GlobalCounters;
use crate::core::episode::EpisodeContext;
use crate::engine::{Phase, SharedEngine, SnapshotHandler};
use crate::metrics::status::{StatusThrottle, TrainerStatus};
use crate::trainer::config::TrainerConfig;
use crate::trainer::{TrainStep, TrainerError};

// A worker retires after this many back-to-back environment failures;
// siblings keep running either way.
const MAX_CONSECUTIVE_FAILURES: usize = 3;

/// Shared parent callback handle.
pub(crate) type SharedCallback = Arc<Mutex<Box<dyn TrainerCallback>>>;

/// Shared snapshot handler slot.
pub(crate) type SharedSnapshotHandler = Arc<Mutex<Option<SnapshotHandler>>>;

/// Summary of one worker's loop run.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LoopOutcome {
    /// Episodes completed by this worker.
    pub episodes: usize,
    /// Steps executed by this worker.
    pub steps: usize,
}

/// Everything a worker shares with its siblings.
pub(crate) struct WorkerShared {
    pub counters: Arc<GlobalCounters>,
    pub engine: SharedEngine,
    pub cancel: CancelToken,
    pub callback: SharedCallback,
    pub snapshot: SharedSnapshotHandler,
}

impl WorkerShared {
    fn status(&self) -> TrainerStatus {
        let (loss, learning_rate) = {
            let engine = self.engine.lock();
            (engine.loss(), engine.learning_rate())
        };
        TrainerStatus {
            iteration: self.counters.iterations(),
            max_iterations: self.counters.max_iterations(),
            episodes: self.counters.episodes(),
            global_reward: self.counters.global_rewards(),
            loss,
            learning_rate,
            exploration_rate: self.counters.exploration_rate(),
            optimal_selection_rate: self.counters.optimal_selection_rate(),
        }
    }
}

/// Run the episode step loop until the shared iteration ceiling is
/// reached, cancellation is observed, or single-step mode completes.
pub(crate) fn run_step_loop(
    worker_id: usize,
    source: &mut dyn DataSource,
    shared: &WorkerShared,
    config: &TrainerConfig,
    phase: Phase,
    step_mode: TrainStep,
) -> Result<LoopOutcome, TrainerError> {
    let n_actions = source.action_count();
    let mut episode = EpisodeContext::new(config.gamma, config.allow_discount_reset);
    let mut throttle = StatusThrottle::per_second();
    let mut args = GetDataArgs::for_reset();
    let mut consecutive_failures = 0usize;
    let mut outcome = LoopOutcome::default();

    loop {
        if shared.cancel.is_cancelled() {
            log::debug!("worker {} observed cancellation", worker_id);
            break;
        }
        if shared.counters.ceiling_reached() {
            break;
        }

        match source.get_data(&mut args) {
            Ok(()) => consecutive_failures = 0,
            Err(TrainerError::Cancelled) => break,
            Err(e @ TrainerError::ProtocolViolation(_)) => return Err(e),
            Err(e) => {
                // Local hiccup: abort this worker's episode, leave the
                // global counters and sibling workers untouched.
                log::warn!("worker {}: environment error: {}", worker_id, e);
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    return Err(e);
                }
                episode.abort_episode();
                args = GetDataArgs::for_reset();
                continue;
            }
        }

        let obs = args
            .take_state()
            .ok_or(TrainerError::ProtocolViolation("data source filled no state"))?;
        if !obs.valid {
            return Err(TrainerError::ProtocolViolation(
                "data source produced an invalid state",
            ));
        }

        let after = episode.record_step(obs.reward, obs.done);

        if after.is_terminal() {
            // Per-worker rewards fold into the shared counters only at
            // episode-terminal boundaries.
            shared.counters.record_episode(episode.episode_reward());
            outcome.episodes += 1;
            decay_exploration(shared, config);
            poll_snapshot(shared);
            episode.finish_episode();
            args = GetDataArgs::for_reset();
        } else {
            let decision = {
                let mut engine = shared.engine.lock();
                engine.forward(&obs.datum).map_err(TrainerError::Engine)?
            };
            let best = decision.best_action().unwrap_or(0);
            let (action, optimal) = select_action(best, n_actions, shared, phase);
            shared.counters.record_selection(optimal);

            if phase == Phase::Train {
                let mut engine = shared.engine.lock();
                engine
                    .train_step(&obs, action)
                    .map_err(TrainerError::Engine)?;
            }
            args = GetDataArgs::for_action(action);
        }

        shared.counters.add_iteration();
        outcome.steps += 1;

        if throttle.ready() {
            shared.callback.lock().on_update_status(&shared.status());
        }

        if step_mode == TrainStep::Single {
            break;
        }
    }

    Ok(outcome)
}

/// Epsilon-greedy action selection. Exploration only applies while
/// training; test and run always take the engine's preferred action.
fn select_action(
    best: u32,
    n_actions: usize,
    shared: &WorkerShared,
    phase: Phase,
) -> (u32, bool) {
    if phase != Phase::Train || n_actions == 0 {
        return (best, true);
    }
    let epsilon = shared.counters.exploration_rate();
    if epsilon > 0.0 && fastrand::f64() < epsilon {
        (fastrand::u32(0..n_actions as u32), false)
    } else {
        (best, true)
    }
}

/// Multiplicative per-episode exploration decay toward the configured
/// floor. Read-mostly and eventually consistent across workers.
fn decay_exploration(shared: &WorkerShared, config: &TrainerConfig) {
    if config.exploration_start <= 0.0 {
        return;
    }
    let current = shared.counters.exploration_rate();
    let next = (current * config.exploration_decay).max(config.exploration_end);
    shared.counters.set_exploration_rate(next);
}

/// Ask the engine for a pending snapshot and hand it to the configured
/// handler synchronously. Called at episode boundaries only.
fn poll_snapshot(shared: &WorkerShared) {
    let mut handler_slot = shared.snapshot.lock();
    let handler = match handler_slot.as_mut() {
        Some(h) => h,
        None => return,
    };
    let snapshot = shared.engine.lock().snapshot();
    if let Some(snapshot) = snapshot {
        handler(&snapshot);
    }
}
