//! Sequence (RNN-style) trainer.
//!
//! Single-threaded trainer over a symbolic-data environment. Before the
//! project is loaded, `preload_data` pulls an initial sample from the
//! environment and builds the vocabulary table; the state consumed for
//! preprocessing is cached as the episode's first state so the subsequent
//! reset does not issue a second, wasted reset against the environment.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::callback::{DataSource, GetDataArgs, GymSource, InitializeArgs, TrainerCallback};
use crate::core::cancel::CancelToken;
use crate::core::counters::{global_counters, SharedCounters};
use crate::core::properties::PropertySet;
use crate::engine::{Phase, ProjectDescriptor, SharedEngine, SnapshotHandler, Stage};
use crate::environment::{DataCapability, DatasetDescriptor, EnvironmentFactory, OutputKind};
use crate::trainer::config::TrainerConfig;
use crate::trainer::worker::{run_step_loop, SharedSnapshotHandler, WorkerShared};
use crate::trainer::{
    ResultCollection, TrainStep, Trainer, TrainerError, TrainingCategory,
};
use crate::vocab::BucketCollection;

/// Sequence trainer over a symbolic environment.
pub struct RnnTrainer {
    name: String,
    env_factory: EnvironmentFactory,
    cancel: CancelToken,
    snapshot: SharedSnapshotHandler,
    config: Option<TrainerConfig>,
    properties: Option<PropertySet>,
    counters: Option<SharedCounters>,
    callback: Option<Arc<Mutex<Box<dyn TrainerCallback>>>>,
    source: Option<GymSource>,
    vocabulary: Option<BucketCollection>,
    last_snapshot_episodes: usize,
}

impl RnnTrainer {
    /// Create a trainer over an environment factory.
    pub fn new(name: impl Into<String>, env_factory: EnvironmentFactory) -> Self {
        Self {
            name: name.into(),
            env_factory,
            cancel: CancelToken::new(),
            snapshot: Arc::new(Mutex::new(None)),
            config: None,
            properties: None,
            counters: None,
            callback: None,
            source: None,
            vocabulary: None,
            last_snapshot_episodes: 0,
        }
    }

    /// Shared cancel token; the harness signals it to stop training.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Install the handler invoked synchronously with each produced
    /// weight snapshot.
    pub fn set_snapshot_handler(&mut self, handler: SnapshotHandler) {
        *self.snapshot.lock() = Some(handler);
    }

    /// The vocabulary built by `preload_data`, if any.
    pub fn vocabulary(&self) -> Option<&BucketCollection> {
        self.vocabulary.as_ref()
    }

    /// Pull an initial sample from the environment and build the
    /// vocabulary table.
    ///
    /// Returns `Ok(None)` when cancellation aborted the scan; the caller
    /// must treat that as "preprocessing aborted", not as an empty
    /// vocabulary.
    pub fn preload_data(
        &mut self,
        _project_id: u32,
    ) -> Result<Option<BucketCollection>, TrainerError> {
        let buckets = self
            .config
            .as_ref()
            .map(|c| c.vocabulary_buckets)
            .ok_or(TrainerError::NotInitialized)?;
        let source = self.source.as_mut().ok_or(TrainerError::NotInitialized)?;

        match source.preload_vocabulary(buckets)? {
            Some(table) => {
                log::info!(
                    "{}: built vocabulary of {} entries",
                    self.name,
                    table.len()
                );
                self.vocabulary = Some(table.clone());
                Ok(Some(table))
            }
            None => Ok(None),
        }
    }

    /// Fit a project's input schema to the vocabulary size.
    pub fn resize_model(&self, project: &mut ProjectDescriptor, vocabulary: &BucketCollection) {
        project.vocabulary_size = Some(vocabulary.len());
        if let Some(dataset) = project.dataset.as_mut() {
            dataset.channels = vocabulary.len();
        }
    }

    /// Generate `n` outputs from the engine and convert them through the
    /// symbolic environment into its native representation.
    pub fn run_output(
        &mut self,
        engine: &SharedEngine,
        n: usize,
    ) -> Result<(Vec<u8>, OutputKind), TrainerError> {
        self.require_initialized()?;
        let vocabulary = self.vocabulary.clone();
        let cancel = self.cancel.clone();
        let source = self.source.as_mut().ok_or(TrainerError::NotInitialized)?;

        let mut outputs = Vec::with_capacity(n);
        let mut args = GetDataArgs::for_reset();
        for _ in 0..n {
            if cancel.is_cancelled() {
                return Err(TrainerError::Cancelled);
            }
            source.get_data(&mut args)?;
            let obs = args
                .take_state()
                .ok_or(TrainerError::ProtocolViolation("data source filled no state"))?;
            let decision = engine
                .lock()
                .forward(&obs.datum)
                .map_err(TrainerError::Engine)?;
            let chosen = decision.best_action().unwrap_or(0);

            // Emit the vocabulary value behind the chosen index when a
            // table exists, the raw index otherwise.
            let value = vocabulary
                .as_ref()
                .and_then(|v| v.value_at(chosen as usize))
                .unwrap_or(chosen as f64);
            outputs.push(value);

            args = GetDataArgs::for_action(chosen);
        }

        source
            .env()
            .convert_output(&outputs)
            .map_err(TrainerError::Environment)
    }

    fn require_initialized(&self) -> Result<(), TrainerError> {
        if self.config.is_some() && self.counters.is_some() && self.source.is_some() {
            Ok(())
        } else {
            Err(TrainerError::NotInitialized)
        }
    }

    fn execute(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
        step_mode: TrainStep,
    ) -> Result<(), TrainerError> {
        self.require_initialized()?;
        let counters = self.counters.clone().ok_or(TrainerError::NotInitialized)?;
        if let Some(max) = iteration_override {
            counters.set_max_iterations(max);
        }
        let callback = self.callback.clone().ok_or(TrainerError::NotInitialized)?;
        let config = self.config.clone().ok_or(TrainerError::NotInitialized)?;
        let shared = WorkerShared {
            counters,
            engine: Arc::clone(engine),
            cancel: self.cancel.clone(),
            callback,
            snapshot: Arc::clone(&self.snapshot),
        };
        let source = self.source.as_mut().ok_or(TrainerError::NotInitialized)?;
        run_step_loop(0, source, &shared, &config, Phase::Train, step_mode)?;
        Ok(())
    }
}

impl Trainer for RnnTrainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> TrainingCategory {
        TrainingCategory::Custom
    }

    fn stage(&self) -> Stage {
        Stage::Rnn
    }

    fn information(&self) -> String {
        let gym = self
            .source
            .as_ref()
            .map(|p| p.env_name().to_string())
            .unwrap_or_else(|| "none".to_string());
        let vocab = self
            .vocabulary
            .as_ref()
            .map(|v| v.len().to_string())
            .unwrap_or_else(|| "unbuilt".to_string());
        format!("{} (RNN.SIMPLE, gym={}, vocabulary={})", self.name, gym, vocab)
    }

    fn initialize(
        &mut self,
        properties: &str,
        mut callback: Box<dyn TrainerCallback>,
    ) -> Result<(), TrainerError> {
        let props = PropertySet::parse(properties).map_err(TrainerError::Configuration)?;
        let config = TrainerConfig::parse(&props).map_err(TrainerError::Configuration)?;

        let env = (self.env_factory)(0).map_err(TrainerError::Environment)?;
        if env.capability() != DataCapability::SymbolicData {
            return Err(TrainerError::CapabilityMismatch(format!(
                "{} does not serve symbolic data; a sequence trainer requires it",
                env.name()
            )));
        }
        let mut source = GymSource::new(env, self.cancel.clone());
        source.initialize(&props)?;

        let counters = global_counters(0, config.reward_mode);
        counters.set_exploration_rate(config.exploration_start);

        callback.on_initialize(&InitializeArgs {
            properties: &props,
            trainer_name: &self.name,
        });

        log::info!("{} initialized: RNN.SIMPLE", self.name);

        self.config = Some(config);
        self.properties = Some(props);
        self.counters = Some(counters);
        self.callback = Some(Arc::new(Mutex::new(callback)));
        self.source = Some(source);
        self.vocabulary = None;
        self.last_snapshot_episodes = 0;
        Ok(())
    }

    fn clean_up(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.shutdown();
        }
        if let Some(callback) = self.callback.take() {
            callback.lock().on_shutdown();
        }
        self.config = None;
        self.properties = None;
        self.vocabulary = None;
    }

    fn dataset_override(&mut self, project_id: u32) -> Option<DatasetDescriptor> {
        if self.source.is_none() {
            let env = (self.env_factory)(0).ok()?;
            self.source = Some(GymSource::new(env, self.cancel.clone()));
        }
        self.source
            .as_mut()
            .and_then(|s| s.dataset_override(project_id))
    }

    fn is_testing_supported(&self) -> bool {
        false
    }

    fn is_running_supported(&self) -> bool {
        true
    }

    fn train(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
        step: TrainStep,
    ) -> Result<(), TrainerError> {
        self.execute(engine, iteration_override, step)
    }

    fn test(
        &mut self,
        _engine: &SharedEngine,
        _iteration_override: Option<usize>,
    ) -> Result<(), TrainerError> {
        Err(TrainerError::UnsupportedOperation("Test"))
    }

    fn run(
        &mut self,
        engine: &SharedEngine,
        delay: Duration,
    ) -> Result<ResultCollection, TrainerError> {
        self.require_initialized()?;
        if !delay.is_zero() && !self.cancel.sleep(delay) {
            return Err(TrainerError::Cancelled);
        }
        let source = self.source.as_mut().ok_or(TrainerError::NotInitialized)?;
        let mut args = GetDataArgs::for_reset();
        source.get_data(&mut args)?;
        let obs = args
            .take_state()
            .ok_or(TrainerError::ProtocolViolation("data source filled no state"))?;
        let decision = engine
            .lock()
            .forward(&obs.datum)
            .map_err(TrainerError::Engine)?;
        Ok(ResultCollection::from_scores(&decision.scores))
    }

    fn global_rewards(&self) -> f64 {
        self.counters.as_ref().map(|c| c.global_rewards()).unwrap_or(0.0)
    }

    fn global_episode_count(&self) -> usize {
        self.counters.as_ref().map(|c| c.episodes()).unwrap_or(0)
    }

    fn exploration_rate(&self) -> f64 {
        self.counters
            .as_ref()
            .map(|c| c.exploration_rate())
            .unwrap_or(0.0)
    }

    fn update_snapshot(&mut self) -> Option<(usize, f64)> {
        let counters = self.counters.as_ref()?;
        let episodes = counters.episodes();
        if episodes > self.last_snapshot_episodes {
            self.last_snapshot_episodes = episodes;
            Some((counters.iterations(), counters.global_rewards()))
        } else {
            None
        }
    }
}
