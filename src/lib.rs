//! # gym-trainer: pluggable training orchestration
//!
//! An orchestration layer between a neural-network execution engine and
//! simulated environments ("gyms"). It runs training episodes, exchanges
//! observation/action/reward data across three execution topologies, and
//! aggregates global progress metrics across concurrent workers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Trainer                                 │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  Worker 1           Worker 2           Worker N                  │
//! │  ┌──────────┐       ┌──────────┐       ┌──────────┐             │
//! │  │GymSource │       │GymSource │       │GymSource │             │
//! │  │ Episode  │       │ Episode  │       │ Episode  │             │
//! │  │ Env      │       │ Env      │       │ Env      │             │
//! │  └────┬─────┘       └────┬─────┘       └────┬─────┘             │
//! │       │                  │                  │                    │
//! │       └──────────────────┼──────────────────┘                    │
//! │                          ▼                                       │
//! │               ┌──────────────────┐     ┌───────────────┐        │
//! │               │  GlobalCounters  │     │ NetworkEngine │        │
//! │               │  (episodes,      │     │ (shared,      │        │
//! │               │   iterations,    │     │  mutex-held   │        │
//! │               │   reward fold)   │     │  per call)    │        │
//! │               └──────────────────┘     └───────────────┘        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Three topologies expose identical external behavior:
//! - **single-threaded** (`PG.SIMPLE`, `PG.ST`, `RNN.SIMPLE`): one episode
//!   loop on the caller thread;
//! - **multi-threaded** (`PG.MT`): `Threads=N` workers, each owning its
//!   environment instance, sharing one set of global counters;
//! - **dual**: the environment lives behind an RPC-style channel boundary
//!   with an explicit timeout and a stage-qualified capability handshake.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gym_trainer::trainer::{RlTrainer, Trainer, TrainStep};
//!
//! let mut trainer = RlTrainer::new("RL.Trainer", env_factory);
//! trainer.initialize("TrainerType=PG.MT;RewardType=VAL;Gamma=0.99;Threads=2", callback)?;
//! trainer.train(&engine, Some(1000), TrainStep::None)?;
//! trainer.clean_up();
//! ```

pub mod callback;
pub mod core;
pub mod engine;
pub mod environment;
pub mod metrics;
pub mod snapshot;
pub mod trainer;
pub mod vocab;

// Re-export commonly used types
pub use callback::{
    DataSource, GetDataArgs, GymSource, InitializeArgs, NullCallback, TrainerCallback,
};
pub use crate::core::cancel::CancelToken;
pub use crate::core::counters::{global_counters, GlobalCounters, RewardMode, SharedCounters};
pub use crate::core::episode::{EpisodeContext, EpisodePhase};
pub use crate::core::properties::{PropertyError, PropertySet};
pub use crate::core::state::{Datum, Observation, RenderFrame, State};
pub use engine::{
    shared_engine, EngineDecision, EngineError, NetworkEngine, Phase, ProjectDescriptor,
    SharedEngine, SnapshotData, SnapshotHandler, Stage,
};
pub use environment::{
    ActionSpace, DataCapability, DataKind, DatasetDescriptor, EnvError, EnvStep, Environment,
    EnvironmentFactory, OutputKind,
};
pub use metrics::status::{
    ConsoleStatusLogger, CsvStatusLogger, StatusLogger, StatusThrottle, TrainerStatus,
};
pub use snapshot::{store_handler, SnapshotError, WeightStore};
pub use trainer::{
    ActionResult, DualTrainer, PeerEndpoint, PeerEnvironment, PeerError, PeerHost,
    ResultCollection, RlTrainer, RnnTrainer, TrainStep, Trainer, TrainerConfig, TrainerError,
    TrainerKind, TrainingCategory,
};
pub use vocab::{Bucket, BucketCollection, VocabError, DEFAULT_BUCKET_COUNT};
