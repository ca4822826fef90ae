//! Reinforcement-learning trainer: single-threaded and multi-threaded
//! topologies.
//!
//! `PG.SIMPLE` and `PG.ST` drive one environment on the caller thread.
//! `PG.MT` spawns `Threads=N` named worker threads, each owning its own
//! environment instance built from the factory, all sharing one set of
//! global counters. With `Threads=1` the MT topology reduces to the ST
//! semantics. Externally, every variant behaves identically.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::callback::{DataSource, GetDataArgs, GymSource, InitializeArgs, TrainerCallback};
use crate::core::cancel::CancelToken;
use crate::core::counters::{global_counters, SharedCounters};
use crate::core::properties::PropertySet;
use crate::engine::{Phase, SharedEngine, SnapshotHandler, Stage};
use crate::environment::{DatasetDescriptor, EnvironmentFactory};
use crate::trainer::config::{TrainerConfig, TrainerKind};
use crate::trainer::worker::{run_step_loop, SharedSnapshotHandler, WorkerShared};
use crate::trainer::{
    ResultCollection, TrainStep, Trainer, TrainerError, TrainingCategory,
};

/// Reinforcement trainer over an environment factory.
pub struct RlTrainer {
    name: String,
    env_factory: EnvironmentFactory,
    cancel: CancelToken,
    snapshot: SharedSnapshotHandler,
    config: Option<TrainerConfig>,
    properties: Option<PropertySet>,
    counters: Option<SharedCounters>,
    callback: Option<Arc<Mutex<Box<dyn TrainerCallback>>>>,
    primary: Option<GymSource>,
    last_snapshot_episodes: usize,
}

impl RlTrainer {
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
            primary: None,
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

    /// Parsed configuration, available after `initialize`.
    pub fn config(&self) -> Option<&TrainerConfig> {
        self.config.as_ref()
    }

    fn build_source(&self, worker_id: usize) -> Result<GymSource, TrainerError> {
        let env = (self.env_factory)(worker_id).map_err(TrainerError::Environment)?;
        Ok(GymSource::new(env, self.cancel.clone()))
    }

    fn require_initialized(
        &self,
    ) -> Result<(&TrainerConfig, &PropertySet, &SharedCounters), TrainerError> {
        match (&self.config, &self.properties, &self.counters) {
            (Some(config), Some(props), Some(counters)) => Ok((config, props, counters)),
            _ => Err(TrainerError::NotInitialized),
        }
    }

    fn shared(&self, engine: &SharedEngine) -> Result<WorkerShared, TrainerError> {
        let (_, _, counters) = self.require_initialized()?;
        let callback = self.callback.clone().ok_or(TrainerError::NotInitialized)?;
        Ok(WorkerShared {
            counters: Arc::clone(counters),
            engine: Arc::clone(engine),
            cancel: self.cancel.clone(),
            callback,
            snapshot: Arc::clone(&self.snapshot),
        })
    }

    /// Drive the step loop on the caller thread with the primary source.
    fn run_single(
        &mut self,
        engine: &SharedEngine,
        phase: Phase,
        step_mode: TrainStep,
    ) -> Result<(), TrainerError> {
        let shared = self.shared(engine)?;
        let config = self.config.clone().ok_or(TrainerError::NotInitialized)?;
        let source = self.primary.as_mut().ok_or(TrainerError::NotInitialized)?;
        run_step_loop(0, source, &shared, &config, phase, step_mode)?;
        Ok(())
    }

    /// Spawn the worker pool and wait for every worker to reach a
    /// quiescent, resource-released state.
    fn run_multi(
        &mut self,
        engine: &SharedEngine,
        phase: Phase,
        step_mode: TrainStep,
    ) -> Result<(), TrainerError> {
        let shared = self.shared(engine)?;
        let config = self.config.clone().ok_or(TrainerError::NotInitialized)?;
        let props = self.properties.clone().ok_or(TrainerError::NotInitialized)?;
        let workers = config.worker_count();

        let results: Vec<Result<(), TrainerError>> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                let shared = WorkerShared {
                    counters: Arc::clone(&shared.counters),
                    engine: Arc::clone(&shared.engine),
                    cancel: shared.cancel.clone(),
                    callback: Arc::clone(&shared.callback),
                    snapshot: Arc::clone(&shared.snapshot),
                };
                let config = &config;
                let props = &props;
                let factory = &self.env_factory;
                let cancel = self.cancel.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("pg-worker-{}", worker_id))
                    .spawn_scoped(scope, move || -> Result<(), TrainerError> {
                        let env = factory(worker_id).map_err(TrainerError::Environment)?;
                        let mut source = GymSource::new(env, cancel);
                        source.initialize(props)?;
                        let result =
                            run_step_loop(worker_id, &mut source, &shared, config, phase, step_mode);
                        // Environment closed before the pool reports stopped.
                        source.shutdown();
                        if let Ok(outcome) = &result {
                            log::debug!(
                                "worker {} finished: {} episodes, {} steps",
                                worker_id,
                                outcome.episodes,
                                outcome.steps
                            );
                        }
                        result.map(|_| ())
                    })
                    .expect("failed to spawn worker thread");
                handles.push(handle);
            }
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(result) => result,
                    Err(_) => Err(TrainerError::ProtocolViolation("worker thread panicked")),
                })
                .collect()
        });

        // A retired worker never brings down its siblings; the pool only
        // fails when no worker made it.
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed == workers {
            return results.into_iter().find_map(Result::err).map_or(Ok(()), Err);
        }
        if failed > 0 {
            log::warn!("{} of {} workers retired early", failed, workers);
        }
        Ok(())
    }

    fn execute(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
        phase: Phase,
        step_mode: TrainStep,
    ) -> Result<(), TrainerError> {
        let (config, _, counters) = self.require_initialized()?;
        if let Some(max) = iteration_override {
            counters.set_max_iterations(max);
        }
        let multi = config.worker_count() > 1;
        if multi {
            self.run_multi(engine, phase, step_mode)
        } else {
            self.run_single(engine, phase, step_mode)
        }
    }
}

impl Trainer for RlTrainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> TrainingCategory {
        TrainingCategory::Reinforcement
    }

    fn stage(&self) -> Stage {
        Stage::Rl
    }

    fn information(&self) -> String {
        let gym = self
            .primary
            .as_ref()
            .map(|p| p.env_name().to_string())
            .unwrap_or_else(|| "none".to_string());
        let kind = self
            .config
            .as_ref()
            .map(|c| c.kind.as_str())
            .unwrap_or("unconfigured");
        let workers = self.config.as_ref().map(TrainerConfig::worker_count).unwrap_or(1);
        format!("{} ({}, gym={}, workers={})", self.name, kind, gym, workers)
    }

    fn initialize(
        &mut self,
        properties: &str,
        mut callback: Box<dyn TrainerCallback>,
    ) -> Result<(), TrainerError> {
        let props = PropertySet::parse(properties).map_err(TrainerError::Configuration)?;
        let config = TrainerConfig::parse(&props).map_err(TrainerError::Configuration)?;

        let mut primary = self.build_source(0)?;
        if primary.env().capability() == crate::environment::DataCapability::SymbolicData {
            return Err(TrainerError::CapabilityMismatch(format!(
                "{} serves symbolic data; a reinforcement trainer needs a value or blob gym",
                primary.env_name()
            )));
        }
        primary.initialize(&props)?;

        let counters = global_counters(0, config.reward_mode);
        counters.set_exploration_rate(config.exploration_start);

        callback.on_initialize(&InitializeArgs {
            properties: &props,
            trainer_name: &self.name,
        });

        log::info!("{} initialized: {}", self.name, config.kind.as_str());

        self.config = Some(config);
        self.properties = Some(props);
        self.counters = Some(counters);
        self.callback = Some(Arc::new(Mutex::new(callback)));
        self.primary = Some(primary);
        self.last_snapshot_episodes = 0;
        Ok(())
    }

    fn clean_up(&mut self) {
        if let Some(mut primary) = self.primary.take() {
            primary.shutdown();
        }
        if let Some(callback) = self.callback.take() {
            callback.lock().on_shutdown();
        }
        self.config = None;
        self.properties = None;
    }

    fn dataset_override(&mut self, project_id: u32) -> Option<DatasetDescriptor> {
        if self.primary.is_none() {
            // Callable before initialize; build the source lazily.
            self.primary = self.build_source(0).ok();
        }
        self.primary
            .as_mut()
            .and_then(|p| p.dataset_override(project_id))
    }

    fn is_testing_supported(&self) -> bool {
        true
    }

    fn is_running_supported(&self) -> bool {
        // The basic trainer only supports the training pass.
        !matches!(
            self.config.as_ref().map(|c| c.kind),
            Some(TrainerKind::PgSimple)
        )
    }

    fn train(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
        step: TrainStep,
    ) -> Result<(), TrainerError> {
        self.execute(engine, iteration_override, Phase::Train, step)
    }

    fn test(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
    ) -> Result<(), TrainerError> {
        self.execute(engine, iteration_override, Phase::Test, TrainStep::None)
    }

    fn run(
        &mut self,
        engine: &SharedEngine,
        delay: Duration,
    ) -> Result<ResultCollection, TrainerError> {
        if !self.is_running_supported() {
            return Err(TrainerError::UnsupportedOperation("Run"));
        }
        self.require_initialized()?;
        let source = self.primary.as_mut().ok_or(TrainerError::NotInitialized)?;

        let mut args = GetDataArgs::for_reset();
        source.get_data(&mut args)?;
        let obs = args
            .take_state()
            .ok_or(TrainerError::ProtocolViolation("data source filled no state"))?;

        // The delay is a bounded wait, checked against cancellation.
        if !delay.is_zero() && !self.cancel.sleep(delay) {
            return Err(TrainerError::Cancelled);
        }

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

    fn open_ui(&mut self) {
        if let Some(primary) = self.primary.as_mut() {
            primary.open_ui();
        }
    }
}
