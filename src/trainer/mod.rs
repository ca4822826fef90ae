//! Trainer contract and its concurrency variants.
//!
//! Every trainer exposes the same surface regardless of the algorithm or
//! the execution topology behind it: capability-gated train/test/run,
//! configuration through a property string, read-only telemetry backed by
//! the shared global counters, and an idempotent clean-up.

pub mod config;
pub mod dual;
pub mod rl;
pub mod rnn;
pub(crate) mod worker;

#[cfg(test)]
mod tests;

use std::fmt;
use std::time::Duration;

use crate::callback::TrainerCallback;
use crate::core::properties::PropertyError;
use crate::engine::{EngineError, SharedEngine, Stage};
use crate::environment::{DatasetDescriptor, EnvError};

pub use config::{TrainerConfig, TrainerKind};
pub use dual::{
    DualTrainer, PeerEndpoint, PeerEnvironment, PeerError, PeerHost, PeerRequest, PeerResponse,
};
pub use rl::RlTrainer;
pub use rnn::RnnTrainer;

/// Category of training a trainer implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingCategory {
    /// A custom training method (e.g. sequence/RNN training).
    Custom,
    /// A reinforcement training method.
    Reinforcement,
}

impl fmt::Display for TrainingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingCategory::Custom => write!(f, "CUSTOM"),
            TrainingCategory::Reinforcement => write!(f, "REINFORCEMENT"),
        }
    }
}

/// Whether training runs freely or steps once for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrainStep {
    /// Run until the iteration ceiling or cancellation.
    #[default]
    None,
    /// Execute exactly one step, then return.
    Single,
}

/// One entry of a run result: an action with its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    /// Discrete action index.
    pub action: u32,
    /// Score the engine assigned to the action.
    pub score: f64,
}

/// Results returned by [`Trainer::run`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultCollection {
    /// Per-action results, in action order.
    pub results: Vec<ActionResult>,
}

impl ResultCollection {
    /// Create a collection from per-action scores.
    pub fn from_scores(scores: &[f64]) -> Self {
        Self {
            results: scores
                .iter()
                .enumerate()
                .map(|(i, &score)| ActionResult {
                    action: i as u32,
                    score,
                })
                .collect(),
        }
    }

    /// The highest-scoring result.
    pub fn best(&self) -> Option<&ActionResult> {
        self.results
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
    }
}

/// Errors raised by trainers.
#[derive(Debug)]
pub enum TrainerError {
    /// Malformed or missing configuration, fatal to the instance.
    Configuration(PropertyError),
    /// A collaborator does not implement the expected capability.
    CapabilityMismatch(String),
    /// The invoked operation is not supported by this trainer.
    UnsupportedOperation(&'static str),
    /// The caller violated the data-exchange contract.
    ProtocolViolation(&'static str),
    /// The environment failed.
    Environment(EnvError),
    /// The network engine failed.
    Engine(EngineError),
    /// The cross-boundary peer failed.
    Peer(dual::PeerError),
    /// The operation was cancelled.
    Cancelled,
    /// The trainer was used before `initialize`.
    NotInitialized,
}

impl fmt::Display for TrainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainerError::Configuration(e) => write!(f, "configuration error: {}", e),
            TrainerError::CapabilityMismatch(msg) => write!(f, "capability mismatch: {}", msg),
            TrainerError::UnsupportedOperation(op) => {
                write!(f, "unsupported operation: {}", op)
            }
            TrainerError::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            TrainerError::Environment(e) => write!(f, "{}", e),
            TrainerError::Engine(e) => write!(f, "{}", e),
            TrainerError::Peer(e) => write!(f, "{}", e),
            TrainerError::Cancelled => write!(f, "operation cancelled"),
            TrainerError::NotInitialized => write!(f, "trainer not initialized"),
        }
    }
}

impl std::error::Error for TrainerError {}

impl From<PropertyError> for TrainerError {
    fn from(e: PropertyError) -> Self {
        TrainerError::Configuration(e)
    }
}

impl From<EnvError> for TrainerError {
    fn from(e: EnvError) -> Self {
        TrainerError::Environment(e)
    }
}

impl From<EngineError> for TrainerError {
    fn from(e: EngineError) -> Self {
        TrainerError::Engine(e)
    }
}

impl From<dual::PeerError> for TrainerError {
    fn from(e: dual::PeerError) -> Self {
        TrainerError::Peer(e)
    }
}

/// The uniform trainer surface.
///
/// Calling an unsupported `train`/`test`/`run` fails with
/// [`TrainerError::UnsupportedOperation`] and leaves the global counters
/// untouched; it never silently no-ops.
pub trait Trainer: Send {
    /// Trainer name.
    fn name(&self) -> &str;

    /// Training category implemented by this trainer.
    fn category(&self) -> TrainingCategory;

    /// Stage tag threaded through project loading.
    fn stage(&self) -> Stage;

    /// Human-readable description (gym used, topology).
    fn information(&self) -> String;

    /// Parse configuration and store the parent callback. Configuration
    /// errors are fatal to this trainer instance.
    fn initialize(
        &mut self,
        properties: &str,
        callback: Box<dyn TrainerCallback>,
    ) -> Result<(), TrainerError>;

    /// Release the environment handle and any UI proxy. Idempotent; safe
    /// to call when never initialized.
    fn clean_up(&mut self);

    /// Dataset substitution derived from the environment; `None` keeps
    /// the configured project dataset unchanged.
    fn dataset_override(&mut self, project_id: u32) -> Option<DatasetDescriptor>;

    /// Whether `train` is supported.
    fn is_training_supported(&self) -> bool {
        true
    }

    /// Whether `test` is supported.
    fn is_testing_supported(&self) -> bool {
        false
    }

    /// Whether `run` is supported.
    fn is_running_supported(&self) -> bool {
        false
    }

    /// Train until the iteration ceiling (or the override) is reached.
    fn train(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
        step: TrainStep,
    ) -> Result<(), TrainerError>;

    /// Evaluate without applying training steps.
    fn test(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
    ) -> Result<(), TrainerError>;

    /// Run a single inference cycle, waiting `delay` before taking the
    /// action.
    fn run(
        &mut self,
        engine: &SharedEngine,
        delay: Duration,
    ) -> Result<ResultCollection, TrainerError>;

    /// Global reward summary at the instant of the call.
    fn global_rewards(&self) -> f64;

    /// Global episode count at the instant of the call.
    fn global_episode_count(&self) -> usize;

    /// Current exploration rate.
    fn exploration_rate(&self) -> f64;

    /// Poll for snapshot readiness: `Some((iteration, best reward))` when
    /// a new episode has completed since the last poll.
    fn update_snapshot(&mut self) -> Option<(usize, f64)>;

    /// Open the trainer's UI if one exists. Best-effort; absence of a UI
    /// never blocks training.
    fn open_ui(&mut self) {}
}
