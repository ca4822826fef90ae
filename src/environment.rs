//! Environment (gym) capability consumed by the trainers.
//!
//! Implementations wrap concrete simulations (physics, emulators, data
//! readers) and expose the uniform reset/step/done contract the episode
//! state machine drives. Environment handles are not thread-safe and are
//! never passed across worker boundaries; each worker owns its own
//! instance built from an [`EnvironmentFactory`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::properties::PropertySet;
use crate::core::state::{RenderFrame, State};

/// Error raised by an environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    /// The environment was used before `initialize`.
    NotInitialized,
    /// The action index was outside the action space.
    InvalidAction(u32),
    /// The operation is not part of this environment's capability set.
    Unsupported(&'static str),
    /// The environment failed internally.
    Internal(String),
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::NotInitialized => write!(f, "environment not initialized"),
            EnvError::InvalidAction(a) => write!(f, "action {} outside the action space", a),
            EnvError::Unsupported(op) => write!(f, "environment does not support {}", op),
            EnvError::Internal(msg) => write!(f, "environment error: {}", msg),
        }
    }
}

impl std::error::Error for EnvError {}

/// Which tensor layout a dataset request should describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataKind {
    /// Real-valued vector observations.
    Values,
    /// Raw blob observations (images, byte streams).
    Blob,
}

/// Statically declared data capability of an environment variant.
///
/// Resolved once at construction and checked once at trainer
/// initialization; never re-queried per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataCapability {
    /// Produces real-valued vector states.
    Value,
    /// Produces raw blob states.
    Blob,
    /// Produces symbolic data and can convert engine output back into its
    /// native representation (text, audio samples).
    SymbolicData,
}

/// Kind of payload produced by [`Environment::convert_output`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputKind {
    /// UTF-8/ASCII text bytes.
    Text,
    /// Packed audio samples.
    Wav,
    /// Uninterpreted bytes.
    Raw,
}

/// Shape of the dataset an environment feeds the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Dataset identifier.
    pub id: u32,
    /// Human-readable dataset name.
    pub name: String,
    /// Channel count of a single observation.
    pub channels: usize,
    /// Height of a single observation.
    pub height: usize,
    /// Width of a single observation.
    pub width: usize,
    /// Layout this descriptor was produced for.
    pub kind: DataKind,
}

impl DatasetDescriptor {
    /// Total element count of a single observation.
    pub fn observation_size(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// Discrete action space of an environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSpace {
    actions: Vec<String>,
}

impl ActionSpace {
    /// Create an action space from action names.
    pub fn new(actions: Vec<String>) -> Self {
        Self { actions }
    }

    /// Create an action space of `n` unnamed actions.
    pub fn discrete(n: usize) -> Self {
        Self {
            actions: (0..n).map(|i| format!("action-{}", i)).collect(),
        }
    }

    /// Number of actions.
    pub fn count(&self) -> usize {
        self.actions.len()
    }

    /// Name of an action, if present.
    pub fn name(&self, index: usize) -> Option<&str> {
        self.actions.get(index).map(String::as_str)
    }

    /// Whether an action index is valid.
    pub fn contains(&self, action: u32) -> bool {
        (action as usize) < self.actions.len()
    }
}

/// Result of a reset or step: the new state plus reward and terminal flag.
#[derive(Debug, Clone)]
pub struct EnvStep {
    /// Observation produced by the environment.
    pub state: State,
    /// Reward received for reaching this state.
    pub reward: f64,
    /// Whether the episode ended at this state.
    pub done: bool,
}

impl EnvStep {
    /// Create a step result.
    pub fn new(state: State, reward: f64, done: bool) -> Self {
        Self { state, reward, done }
    }
}

/// The environment capability.
///
/// `convert_output` belongs to the `SymbolicData` capability only; the
/// default implementation reports it unsupported.
pub trait Environment: Send {
    /// Environment name (e.g. "Cart-Pole").
    fn name(&self) -> &str;

    /// Declared data capability of this variant.
    fn capability(&self) -> DataCapability;

    /// Initialize with the trainer's property blob.
    fn initialize(&mut self, properties: &PropertySet) -> Result<(), EnvError>;

    /// Begin a new episode.
    fn reset(&mut self) -> Result<EnvStep, EnvError>;

    /// Advance one step with the given action.
    fn step(&mut self, action: u32) -> Result<EnvStep, EnvError>;

    /// Render the current state for display. Presentation only; `None`
    /// when the environment has nothing to show.
    fn render(&mut self, _show: bool, _width: usize, _height: usize) -> Option<RenderFrame> {
        None
    }

    /// Dataset shape for the requested layout.
    fn dataset(&self, kind: DataKind) -> DatasetDescriptor;

    /// Discrete action space.
    fn action_space(&self) -> ActionSpace;

    /// Convert raw engine output into the environment's native
    /// representation (symbolic environments only).
    fn convert_output(&self, _output: &[f64]) -> Result<(Vec<u8>, OutputKind), EnvError> {
        Err(EnvError::Unsupported("convert_output"))
    }

    /// Render cadence delay when a UI is attached.
    fn ui_delay(&self) -> Duration {
        Duration::from_millis(0)
    }

    /// Release all resources. Called exactly once at shutdown.
    fn close(&mut self);
}

/// Builds one environment instance per worker.
///
/// The factory is shared across the trainer; the environments it produces
/// are exclusively owned by a single worker.
pub type EnvironmentFactory =
    Box<dyn Fn(usize) -> Result<Box<dyn Environment>, EnvError> + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_space_discrete() {
        let space = ActionSpace::discrete(3);
        assert_eq!(space.count(), 3);
        assert!(space.contains(2));
        assert!(!space.contains(3));
        assert_eq!(space.name(0), Some("action-0"));
    }

    #[test]
    fn test_dataset_descriptor_size() {
        let ds = DatasetDescriptor {
            id: 1,
            name: "test".to_string(),
            channels: 2,
            height: 3,
            width: 4,
            kind: DataKind::Blob,
        };
        assert_eq!(ds.observation_size(), 24);
    }

    #[test]
    fn test_env_error_display() {
        assert_eq!(
            EnvError::InvalidAction(7).to_string(),
            "action 7 outside the action space"
        );
        assert_eq!(
            EnvError::Unsupported("convert_output").to_string(),
            "environment does not support convert_output"
        );
    }
}
