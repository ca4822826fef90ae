//! Network engine capability consumed by the trainers.
//!
//! The engine is an opaque collaborator: it loads a project description,
//! scores observations, applies training steps and produces weight
//! snapshots on demand. Snapshots are a return value, not an event: the
//! harness calls [`NetworkEngine::snapshot`] at well-defined points and
//! synchronously invokes the handler the caller supplied.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::state::{Datum, Observation};
use crate::environment::DatasetDescriptor;

/// Error raised by the network engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// No project loaded yet.
    NotLoaded,
    /// The project description was rejected.
    InvalidProject(String),
    /// A forward/backward pass failed.
    Execution(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::NotLoaded => write!(f, "no project loaded"),
            EngineError::InvalidProject(msg) => write!(f, "invalid project: {}", msg),
            EngineError::Execution(msg) => write!(f, "engine execution failed: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

/// Network phase a project is loaded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Training pass (forward + backward).
    Train,
    /// Evaluation pass.
    Test,
    /// Inference-only pass.
    Run,
}

/// Execution-stage tag threaded through project loading.
///
/// The Dual topology qualifies its handshake and the project load with
/// this tag so the peer knows which trainer family it is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    /// No stage qualification.
    #[default]
    None,
    /// Reinforcement-learning stage.
    Rl,
    /// Recurrent/sequence stage.
    Rnn,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::None => write!(f, "NONE"),
            Stage::Rl => write!(f, "RL"),
            Stage::Rnn => write!(f, "RNN"),
        }
    }
}

/// Project description handed to [`NetworkEngine::load`].
#[derive(Debug, Clone, Default)]
pub struct ProjectDescriptor {
    /// Project identifier.
    pub id: u32,
    /// Project name.
    pub name: String,
    /// Model description text.
    pub model_description: String,
    /// Solver description text.
    pub solver_description: String,
    /// Dataset the model consumes; `None` keeps the engine's configured
    /// dataset.
    pub dataset: Option<DatasetDescriptor>,
    /// Previously persisted weights to restore, byte-exact.
    pub weights: Option<Vec<u8>>,
    /// Vocabulary size for sequence models; set by `resize_model`.
    pub vocabulary_size: Option<usize>,
    /// Directory weight snapshots are written under.
    pub model_path: PathBuf,
    /// Stage qualification for the load.
    pub stage: Stage,
}

impl ProjectDescriptor {
    /// Create a named project.
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Per-action scores produced by a forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineDecision {
    /// One score per discrete action.
    pub scores: Vec<f64>,
}

impl EngineDecision {
    /// Create a decision from raw scores.
    pub fn new(scores: Vec<f64>) -> Self {
        Self { scores }
    }

    /// Index of the highest-scoring action.
    pub fn best_action(&self) -> Option<u32> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &score) in self.scores.iter().enumerate() {
            match best {
                Some((_, s)) if score <= s => {}
                _ => best = Some((i, score)),
            }
        }
        best.map(|(i, _)| i as u32)
    }
}

/// A weight snapshot produced by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotData {
    /// Iteration the snapshot was taken at.
    pub iteration: usize,
    /// Best reward at snapshot time.
    pub reward: f64,
    /// Serialized weights, written/read as a flat byte buffer.
    pub weights: Vec<u8>,
}

/// Handler the trainer invokes synchronously with each produced snapshot.
pub type SnapshotHandler = Box<dyn FnMut(&SnapshotData) + Send>;

/// The network engine capability.
pub trait NetworkEngine: Send {
    /// Engine name, used to key persisted weight snapshots.
    fn name(&self) -> &str;

    /// Load a project for the given phase.
    fn load(&mut self, phase: Phase, project: &ProjectDescriptor) -> Result<(), EngineError>;

    /// Score an observation (forward pass).
    fn forward(&mut self, datum: &Datum) -> Result<EngineDecision, EngineError>;

    /// Apply one training step for the consumed observation and the action
    /// taken from it. The numerical content is the engine's concern.
    fn train_step(&mut self, observation: &Observation, action: u32) -> Result<(), EngineError>;

    /// Current training loss, for status reporting.
    fn loss(&self) -> f64 {
        0.0
    }

    /// Current learning rate, for status reporting.
    fn learning_rate(&self) -> f64 {
        0.0
    }

    /// Produce a weight snapshot on demand. `None` when the engine has
    /// nothing new to persist.
    fn snapshot(&mut self) -> Option<SnapshotData>;

    /// Release engine resources.
    fn dispose(&mut self);
}

/// Engine handle shared across worker threads.
pub type SharedEngine = Arc<Mutex<dyn NetworkEngine>>;

/// Wrap an engine for cross-worker sharing.
pub fn shared_engine<E: NetworkEngine + 'static>(engine: E) -> SharedEngine {
    Arc::new(Mutex::new(engine))
}
