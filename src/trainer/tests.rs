//! Integration tests for the trainer topologies.
//!
//! Mock environments and a mock engine drive the full contract: episode
//! accounting across worker counts, cancellation quiescence, capability
//! gating, the dual boundary and snapshot persistence.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::callback::{DataSource, GetDataArgs, GymSource, TrainerCallback};
use crate::core::cancel::CancelToken;
use crate::core::properties::PropertySet;
use crate::core::state::{Datum, Observation, State};
use crate::engine::{
    shared_engine, EngineDecision, EngineError, NetworkEngine, Phase, ProjectDescriptor,
    SharedEngine, SnapshotData,
};
use crate::environment::{
    ActionSpace, DataCapability, DataKind, DatasetDescriptor, EnvError, EnvStep, Environment,
    EnvironmentFactory, OutputKind,
};
use crate::metrics::status::TrainerStatus;
use crate::snapshot::{store_handler, WeightStore};
use crate::trainer::{
    DualTrainer, PeerEndpoint, PeerHost, PeerRequest, PeerError, ResultCollection, RlTrainer,
    RnnTrainer, TrainStep, Trainer, TrainerError, TrainingCategory,
};

// ============================================================================
// Mocks
// ============================================================================

/// Shared instrumentation for mock environments.
#[derive(Clone, Default)]
struct GymProbe {
    resets: Arc<AtomicUsize>,
    steps: Arc<AtomicUsize>,
    dones: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl GymProbe {
    fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
    fn steps(&self) -> usize {
        self.steps.load(Ordering::SeqCst)
    }
    fn dones(&self) -> usize {
        self.dones.load(Ordering::SeqCst)
    }
    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Value-data environment: episodes end after a fixed number of steps.
struct ValueGym {
    probe: GymProbe,
    episode_len: usize,
    step_in_episode: usize,
    fail_steps: bool,
    produce_invalid: bool,
}

impl ValueGym {
    fn new(probe: GymProbe, episode_len: usize) -> Self {
        Self {
            probe,
            episode_len,
            step_in_episode: 0,
            fail_steps: false,
            produce_invalid: false,
        }
    }

    fn state(&self) -> State {
        State::from_values(vec![self.step_in_episode as f64, 0.5, -0.5, 0.0])
            .with_bounds(vec![(0.0, 100.0), (-1.0, 1.0), (-1.0, 1.0), (-1.0, 1.0)])
    }
}

impl Environment for ValueGym {
    fn name(&self) -> &str {
        "mock-cartpole"
    }

    fn capability(&self) -> DataCapability {
        DataCapability::Value
    }

    fn initialize(&mut self, _properties: &PropertySet) -> Result<(), EnvError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<EnvStep, EnvError> {
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
        self.step_in_episode = 0;
        if self.produce_invalid {
            return Ok(EnvStep::new(State::invalid(), 0.0, false));
        }
        Ok(EnvStep::new(self.state(), 0.0, false))
    }

    fn step(&mut self, action: u32) -> Result<EnvStep, EnvError> {
        if self.fail_steps {
            return Err(EnvError::Internal("induced failure".to_string()));
        }
        if action > 1 {
            return Err(EnvError::InvalidAction(action));
        }
        self.probe.steps.fetch_add(1, Ordering::SeqCst);
        self.step_in_episode += 1;
        let done = self.step_in_episode >= self.episode_len;
        if done {
            self.probe.dones.fetch_add(1, Ordering::SeqCst);
        }
        Ok(EnvStep::new(self.state(), 1.0, done))
    }

    fn dataset(&self, kind: DataKind) -> DatasetDescriptor {
        DatasetDescriptor {
            id: 1,
            name: "mock-cartpole".to_string(),
            channels: 4,
            height: 1,
            width: 1,
            kind,
        }
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::discrete(2)
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

const BYTE_SAMPLE: [u8; 8] = [3, 1, 4, 1, 5, 9, 2, 6];

/// Symbolic-data environment serving a fixed byte sample.
struct ByteGym {
    probe: GymProbe,
    episode_len: usize,
    step_in_episode: usize,
}

impl ByteGym {
    fn new(probe: GymProbe) -> Self {
        Self {
            probe,
            episode_len: 4,
            step_in_episode: 0,
        }
    }
}

impl Environment for ByteGym {
    fn name(&self) -> &str {
        "mock-datageneral"
    }

    fn capability(&self) -> DataCapability {
        DataCapability::SymbolicData
    }

    fn initialize(&mut self, _properties: &PropertySet) -> Result<(), EnvError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<EnvStep, EnvError> {
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
        self.step_in_episode = 0;
        Ok(EnvStep::new(State::from_bytes(BYTE_SAMPLE.to_vec()), 0.0, false))
    }

    fn step(&mut self, _action: u32) -> Result<EnvStep, EnvError> {
        self.probe.steps.fetch_add(1, Ordering::SeqCst);
        self.step_in_episode += 1;
        let done = self.step_in_episode >= self.episode_len;
        if done {
            self.probe.dones.fetch_add(1, Ordering::SeqCst);
        }
        Ok(EnvStep::new(State::from_bytes(BYTE_SAMPLE.to_vec()), 0.0, done))
    }

    fn dataset(&self, kind: DataKind) -> DatasetDescriptor {
        DatasetDescriptor {
            id: 2,
            name: "mock-datageneral".to_string(),
            channels: 1,
            height: 1,
            width: BYTE_SAMPLE.len(),
            kind,
        }
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::discrete(7)
    }

    fn convert_output(&self, output: &[f64]) -> Result<(Vec<u8>, OutputKind), EnvError> {
        Ok((output.iter().map(|&v| v as u8).collect(), OutputKind::Text))
    }

    fn close(&mut self) {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn value_factory(probe: GymProbe, episode_len: usize) -> EnvironmentFactory {
    Box::new(move |_worker_id| Ok(Box::new(ValueGym::new(probe.clone(), episode_len))))
}

fn byte_factory(probe: GymProbe) -> EnvironmentFactory {
    Box::new(move |_worker_id| Ok(Box::new(ByteGym::new(probe.clone()))))
}

/// Shared instrumentation for the mock engine.
#[derive(Clone, Default)]
struct EngineProbe {
    forwards: Arc<AtomicUsize>,
    train_steps: Arc<AtomicUsize>,
    loaded_weights: Arc<Mutex<Option<Vec<u8>>>>,
    pending_snapshot: Arc<Mutex<Option<Vec<u8>>>>,
}

struct MockEngine {
    probe: EngineProbe,
    scores: Vec<f64>,
}

impl MockEngine {
    fn new(probe: EngineProbe, scores: Vec<f64>) -> Self {
        Self { probe, scores }
    }
}

impl NetworkEngine for MockEngine {
    fn name(&self) -> &str {
        "DEFAULT"
    }

    fn load(&mut self, _phase: Phase, project: &ProjectDescriptor) -> Result<(), EngineError> {
        *self.probe.loaded_weights.lock() = project.weights.clone();
        Ok(())
    }

    fn forward(&mut self, _datum: &Datum) -> Result<EngineDecision, EngineError> {
        self.probe.forwards.fetch_add(1, Ordering::SeqCst);
        Ok(EngineDecision::new(self.scores.clone()))
    }

    fn train_step(&mut self, _observation: &Observation, _action: u32) -> Result<(), EngineError> {
        self.probe.train_steps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn snapshot(&mut self) -> Option<SnapshotData> {
        self.probe.pending_snapshot.lock().take().map(|weights| SnapshotData {
            iteration: 0,
            reward: 0.0,
            weights,
        })
    }

    fn dispose(&mut self) {}
}

fn mock_engine(probe: EngineProbe) -> SharedEngine {
    shared_engine(MockEngine::new(probe, vec![0.2, 0.8]))
}

/// Callback recording status emissions.
#[derive(Clone, Default)]
struct CallbackProbe {
    status_count: Arc<AtomicUsize>,
    last_status: Arc<Mutex<Option<TrainerStatus>>>,
    shutdowns: Arc<AtomicUsize>,
}

struct RecordingCallback {
    probe: CallbackProbe,
}

impl TrainerCallback for RecordingCallback {
    fn on_update_status(&mut self, status: &TrainerStatus) {
        self.probe.status_count.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_status.lock() = Some(status.clone());
    }

    fn on_shutdown(&mut self) {
        self.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

fn recording_callback() -> (Box<dyn TrainerCallback>, CallbackProbe) {
    let probe = CallbackProbe::default();
    (Box::new(RecordingCallback { probe: probe.clone() }), probe)
}

// ============================================================================
// Single-threaded topology
// ============================================================================

#[test]
fn test_st_training_reaches_ceiling() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe.clone(), 5));
    trainer
        .initialize("TrainerType=PG.ST;RewardType=VAL;Gamma=0.99", callback)
        .unwrap();
    trainer.train(&engine, Some(60), TrainStep::None).unwrap();

    assert_eq!(trainer.global_episode_count(), probe.dones());
    assert!(trainer.global_episode_count() > 0);
    // Each completed episode folded its accumulated reward.
    assert!(trainer.global_rewards() > 0.0);
    trainer.clean_up();
    assert_eq!(probe.closes(), 1);
}

#[test]
fn test_st_single_step_mode_runs_one_iteration() {
    let probe = GymProbe::default();
    let engine_probe = EngineProbe::default();
    let engine = mock_engine(engine_probe.clone());
    let (callback, _) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe.clone(), 5));
    trainer
        .initialize("TrainerType=PG.ST", callback)
        .unwrap();
    trainer.train(&engine, Some(100), TrainStep::Single).unwrap();

    // One step consumed exactly one reset observation, queried the policy
    // once and applied one training step; the environment never stepped.
    assert_eq!(probe.resets(), 1);
    assert_eq!(probe.steps(), 0);
    assert_eq!(probe.dones(), 0);
    assert_eq!(engine_probe.forwards.load(Ordering::SeqCst), 1);
    assert_eq!(engine_probe.train_steps.load(Ordering::SeqCst), 1);
}

#[test]
fn test_clean_up_is_idempotent() {
    let probe = GymProbe::default();
    let (callback, cb_probe) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe.clone(), 5));
    trainer.initialize("TrainerType=PG.ST", callback).unwrap();
    trainer.clean_up();
    trainer.clean_up();
    assert_eq!(probe.closes(), 1);
    assert_eq!(cb_probe.shutdowns.load(Ordering::SeqCst), 1);

    // Safe on a trainer that was never initialized.
    let mut fresh = RlTrainer::new("RL.Trainer", value_factory(GymProbe::default(), 5));
    fresh.clean_up();
}

#[test]
fn test_dataset_override_reflects_gym() {
    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(GymProbe::default(), 5));
    let ds = trainer.dataset_override(0).unwrap();
    assert_eq!(ds.name, "mock-cartpole");
    assert_eq!(ds.channels, 4);
}

// ============================================================================
// Multi-threaded topology
// ============================================================================

#[test]
fn test_mt_episode_count_equals_sum_over_workers() {
    for threads in [1usize, 2, 4] {
        let probe = GymProbe::default();
        let engine = mock_engine(EngineProbe::default());
        let (callback, _) = recording_callback();

        let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe.clone(), 5));
        trainer
            .initialize(
                &format!("TrainerType=PG.MT;RewardType=VAL;Threads={}", threads),
                callback,
            )
            .unwrap();
        trainer.train(&engine, Some(300), TrainStep::None).unwrap();

        // No lost or duplicated increments: the shared counter equals the
        // number of terminals every environment actually produced.
        assert_eq!(
            trainer.global_episode_count(),
            probe.dones(),
            "threads={}",
            threads
        );
        assert!(trainer.global_episode_count() > 0, "threads={}", threads);
        assert!(
            trainer.global_rewards() >= trainer.global_episode_count() as f64,
            "threads={}",
            threads
        );
        trainer.clean_up();
    }
}

#[test]
fn test_mt_workers_close_environments_on_completion() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe.clone(), 5));
    trainer
        .initialize("TrainerType=PG.MT;Threads=3", callback)
        .unwrap();
    trainer.train(&engine, Some(150), TrainStep::None).unwrap();

    // Every worker environment reached the closed state before train
    // returned. The primary source stays open until clean_up.
    assert_eq!(probe.closes(), 3);
    trainer.clean_up();
    assert_eq!(probe.closes(), 4);
}

#[test]
fn test_mt_cancellation_quiesces_all_workers() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe.clone(), 1_000_000));
    trainer
        .initialize("TrainerType=PG.MT;Threads=3", callback)
        .unwrap();

    let cancel = trainer.cancel_token();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
    });

    // An effectively unbounded ceiling: only cancellation ends the run.
    trainer.train(&engine, Some(usize::MAX), TrainStep::None).unwrap();
    canceller.join().unwrap();

    // All worker environments were closed on the way out.
    assert_eq!(probe.closes(), 3);
}

#[test]
fn test_mt_local_worker_failure_spares_siblings() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    // Worker 0 gets an environment that fails every step; its siblings
    // train normally.
    let failing_probe = probe.clone();
    let factory: EnvironmentFactory = Box::new(move |worker_id| {
        let mut env = ValueGym::new(failing_probe.clone(), 5);
        env.fail_steps = worker_id == 0;
        Ok(Box::new(env))
    });

    let mut trainer = RlTrainer::new("RL.Trainer", factory);
    trainer
        .initialize("TrainerType=PG.MT;Threads=2", callback)
        .unwrap();
    trainer.train(&engine, Some(100), TrainStep::None).unwrap();

    assert!(trainer.global_episode_count() > 0);
    assert_eq!(trainer.global_episode_count(), probe.dones());
}

#[test]
fn test_protocol_violation_leaves_counters_unchanged() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let invalid_probe = probe.clone();
    let factory: EnvironmentFactory = Box::new(move |_worker_id| {
        let mut env = ValueGym::new(invalid_probe.clone(), 5);
        env.produce_invalid = true;
        Ok(Box::new(env))
    });

    let mut trainer = RlTrainer::new("RL.Trainer", factory);
    trainer.initialize("TrainerType=PG.ST", callback).unwrap();

    let result = trainer.train(&engine, Some(100), TrainStep::None);
    assert!(matches!(result, Err(TrainerError::ProtocolViolation(_))));
    assert_eq!(trainer.global_episode_count(), 0);
    assert_eq!(trainer.global_rewards(), 0.0);
}

// ============================================================================
// Status throttling
// ============================================================================

#[test]
fn test_status_fires_at_most_once_per_second() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, cb_probe) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe, 5));
    trainer.initialize("TrainerType=PG.ST", callback).unwrap();

    let start = std::time::Instant::now();
    trainer.train(&engine, Some(20_000), TrainStep::None).unwrap();
    let elapsed_secs = start.elapsed().as_secs() as usize;

    // Thousands of steps, but at most one status line per wall-clock
    // second of training.
    let fired = cb_probe.status_count.load(Ordering::SeqCst);
    assert!(
        fired <= elapsed_secs + 1,
        "fired {} times in {}s",
        fired,
        elapsed_secs
    );

    // Any emitted status reported progress against the ceiling.
    let last_status = cb_probe.last_status.lock();
    if let Some(status) = last_status.as_ref() {
        assert_eq!(status.max_iterations, 20_000);
        assert!(status.progress() <= 1.0);
    }
}

// ============================================================================
// Capability gating
// ============================================================================

#[test]
fn test_run_unsupported_on_basic_trainer() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe, 5));
    trainer.initialize("TrainerType=PG.SIMPLE", callback).unwrap();
    assert!(!trainer.is_running_supported());

    let result = trainer.run(&engine, Duration::ZERO);
    assert!(matches!(result, Err(TrainerError::UnsupportedOperation("Run"))));
    // Global counters untouched by the failed call.
    assert_eq!(trainer.global_episode_count(), 0);
    assert_eq!(trainer.global_rewards(), 0.0);
}

#[test]
fn test_test_unsupported_on_rnn_trainer() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RnnTrainer::new("RNN.Trainer", byte_factory(probe));
    trainer.initialize("TrainerType=RNN.SIMPLE", callback).unwrap();
    assert!(!trainer.is_testing_supported());

    let result = trainer.test(&engine, Some(10));
    assert!(matches!(result, Err(TrainerError::UnsupportedOperation("Test"))));
    assert_eq!(trainer.global_episode_count(), 0);
}

#[test]
fn test_rl_trainer_rejects_symbolic_gym() {
    let (callback, _) = recording_callback();
    let mut trainer = RlTrainer::new("RL.Trainer", byte_factory(GymProbe::default()));
    let result = trainer.initialize("TrainerType=PG.ST", callback);
    assert!(matches!(result, Err(TrainerError::CapabilityMismatch(_))));
}

#[test]
fn test_rnn_trainer_rejects_value_gym() {
    let (callback, _) = recording_callback();
    let mut trainer = RnnTrainer::new("RNN.Trainer", value_factory(GymProbe::default(), 5));
    let result = trainer.initialize("TrainerType=RNN.SIMPLE", callback);
    assert!(matches!(result, Err(TrainerError::CapabilityMismatch(_))));
}

#[test]
fn test_run_returns_engine_scores() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe, 5));
    trainer.initialize("TrainerType=PG.ST", callback).unwrap();

    let results = trainer.run(&engine, Duration::ZERO).unwrap();
    assert_eq!(results, ResultCollection::from_scores(&[0.2, 0.8]));
    assert_eq!(results.best().unwrap().action, 1);
}

// ============================================================================
// Vocabulary preloading and the first-state cache
// ============================================================================

#[test]
fn test_preload_builds_first_seen_vocabulary() {
    let probe = GymProbe::default();
    let (callback, _) = recording_callback();

    let mut trainer = RnnTrainer::new("RNN.Trainer", byte_factory(probe.clone()));
    trainer.initialize("TrainerType=RNN.SIMPLE", callback).unwrap();

    let table = trainer.preload_data(0).unwrap().unwrap();
    assert_eq!(table.len(), 7);
    let order: Vec<f64> = table.buckets().iter().map(|b| b.minimum).collect();
    assert_eq!(order, vec![3.0, 1.0, 4.0, 5.0, 9.0, 2.0, 6.0]);
    assert_eq!(probe.resets(), 1);
}

#[test]
fn test_first_state_cache_consumed_exactly_once() {
    let probe = GymProbe::default();
    let cancel = CancelToken::new();
    let mut source = GymSource::new(Box::new(ByteGym::new(probe.clone())), cancel);
    source.initialize(&PropertySet::new()).unwrap();

    // Preloading resets the gym once and caches the produced state.
    source.preload_vocabulary(128).unwrap().unwrap();
    assert_eq!(probe.resets(), 1);
    assert!(source.has_first_state());

    // The first reset request consumes the cache instead of the gym.
    let mut args = GetDataArgs::for_reset();
    source.get_data(&mut args).unwrap();
    assert_eq!(probe.resets(), 1);
    assert!(!source.has_first_state());

    // A second reset must hit the gym again, not reuse the cache.
    let mut args = GetDataArgs::for_reset();
    source.get_data(&mut args).unwrap();
    assert_eq!(probe.resets(), 2);
}

#[test]
fn test_preload_cancelled_yields_no_table() {
    let probe = GymProbe::default();
    let cancel = CancelToken::new();
    // A value gym forces the continuous bucketize path, which honors
    // cancellation.
    let mut source = GymSource::new(Box::new(ValueGym::new(probe, 5)), cancel.clone());
    source.initialize(&PropertySet::new()).unwrap();

    cancel.cancel();
    let table = source.preload_vocabulary(128).unwrap();
    assert!(table.is_none());
    // An aborted scan caches nothing.
    assert!(!source.has_first_state());
}

#[test]
fn test_get_data_without_reset_or_action_is_a_violation() {
    let probe = GymProbe::default();
    let mut source = GymSource::new(
        Box::new(ValueGym::new(probe, 5)),
        CancelToken::new(),
    );
    source.initialize(&PropertySet::new()).unwrap();

    let mut args = GetDataArgs {
        reset: false,
        action: -1,
        state: None,
    };
    let result = source.get_data(&mut args);
    assert!(matches!(result, Err(TrainerError::ProtocolViolation(_))));
}

#[test]
fn test_rnn_run_output_converts_through_gym() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RnnTrainer::new("RNN.Trainer", byte_factory(probe));
    trainer.initialize("TrainerType=RNN.SIMPLE", callback).unwrap();
    trainer.preload_data(0).unwrap().unwrap();

    // The engine always prefers index 1, which maps to symbol 1 in the
    // first-seen table; the gym converts midpoints back to bytes.
    let (bytes, kind) = trainer.run_output(&engine, 3).unwrap();
    assert_eq!(kind, OutputKind::Text);
    assert_eq!(bytes, vec![1, 1, 1]);
}

#[test]
fn test_resize_model_applies_vocabulary() {
    let probe = GymProbe::default();
    let (callback, _) = recording_callback();

    let mut trainer = RnnTrainer::new("RNN.Trainer", byte_factory(probe));
    trainer.initialize("TrainerType=RNN.SIMPLE", callback).unwrap();
    let table = trainer.preload_data(0).unwrap().unwrap();

    let mut project = ProjectDescriptor::new(1, "char-rnn");
    project.dataset = Some(trainer.dataset_override(0).unwrap());
    trainer.resize_model(&mut project, &table);

    assert_eq!(project.vocabulary_size, Some(7));
    assert_eq!(project.dataset.unwrap().channels, 7);
}

// ============================================================================
// Snapshot persistence
// ============================================================================

#[test]
fn test_snapshot_round_trip_is_byte_exact() {
    let dir = tempfile::tempdir().unwrap();
    let gym_probe = GymProbe::default();
    let engine_probe = EngineProbe::default();
    let engine = mock_engine(engine_probe.clone());
    let (callback, _) = recording_callback();

    // The engine will offer one snapshot; the trainer hands it to the
    // store handler at an episode boundary.
    let weights: Vec<u8> = (0..64u8).rev().collect();
    *engine_probe.pending_snapshot.lock() = Some(weights.clone());

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(gym_probe, 5));
    trainer.initialize("TrainerType=PG.ST", callback).unwrap();
    trainer.set_snapshot_handler(store_handler(
        WeightStore::new(dir.path()).unwrap(),
        "DEFAULT",
    ));
    trainer.train(&engine, Some(30), TrainStep::None).unwrap();

    // Reload before a subsequent run and hand the identical buffer back
    // through Load.
    let store = WeightStore::new(dir.path()).unwrap();
    let restored = store.load("DEFAULT").unwrap().unwrap();
    assert_eq!(restored, weights);

    let mut project = ProjectDescriptor::new(1, "cartpole");
    project.weights = Some(restored);
    engine.lock().load(Phase::Train, &project).unwrap();
    assert_eq!(engine_probe.loaded_weights.lock().as_deref(), Some(&weights[..]));
}

#[test]
fn test_update_snapshot_polls_new_episodes() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let mut trainer = RlTrainer::new("RL.Trainer", value_factory(probe, 5));
    trainer.initialize("TrainerType=PG.ST", callback).unwrap();
    assert!(trainer.update_snapshot().is_none());

    trainer.train(&engine, Some(30), TrainStep::None).unwrap();
    let (_, rewards) = trainer.update_snapshot().unwrap();
    assert_eq!(rewards, trainer.global_rewards());
    // Nothing new since the last poll.
    assert!(trainer.update_snapshot().is_none());
}

// ============================================================================
// Dual topology
// ============================================================================

#[test]
fn test_dual_trains_over_the_boundary() {
    let probe = GymProbe::default();
    let engine = mock_engine(EngineProbe::default());
    let (callback, _) = recording_callback();

    let (endpoint, host) = PeerHost::spawn(
        Box::new(ValueGym::new(probe.clone(), 5)),
        TrainingCategory::Reinforcement,
        Duration::from_secs(5),
    );

    let mut trainer = DualTrainer::new("RL.Trainer.Dual", endpoint);
    trainer.initialize("TrainerType=PG.ST;RewardType=VAL", callback).unwrap();
    assert_eq!(trainer.stage().to_string(), "RL");

    trainer.train(&engine, Some(60), TrainStep::None).unwrap();
    assert!(trainer.global_episode_count() > 0);
    assert_eq!(trainer.global_episode_count(), probe.dones());

    trainer.clean_up();
    host.join().unwrap();
}

#[test]
fn test_dual_rnn_preloads_over_the_boundary() {
    let probe = GymProbe::default();
    let (callback, _) = recording_callback();

    let (endpoint, host) = PeerHost::spawn(
        Box::new(ByteGym::new(probe.clone())),
        TrainingCategory::Custom,
        Duration::from_secs(5),
    );

    let mut trainer = DualTrainer::new("RNN.Trainer.Dual", endpoint);
    trainer.initialize("TrainerType=RNN.SIMPLE", callback).unwrap();
    assert_eq!(trainer.stage().to_string(), "RNN");

    let table = trainer.preload_data(0).unwrap().unwrap();
    assert_eq!(table.len(), 7);
    assert_eq!(probe.resets(), 1);

    trainer.clean_up();
    host.join().unwrap();
}

#[test]
fn test_dual_capability_mismatch_fails_at_initialize() {
    let probe = GymProbe::default();
    let (callback, _) = recording_callback();

    // The peer advertises the reinforcement capability, but the property
    // string asks for a sequence trainer.
    let (endpoint, _host) = PeerHost::spawn(
        Box::new(ByteGym::new(probe.clone())),
        TrainingCategory::Reinforcement,
        Duration::from_secs(5),
    );

    let mut trainer = DualTrainer::new("RNN.Trainer.Dual", endpoint);
    let result = trainer.initialize("TrainerType=RNN.SIMPLE", callback);
    assert!(matches!(result, Err(TrainerError::CapabilityMismatch(_))));
    // Failed before any environment interaction.
    assert_eq!(probe.resets(), 0);
}

#[test]
fn test_peer_call_times_out() {
    // No host on the other side of the boundary.
    let (tx, _unserved) = crossbeam_channel::bounded(1);
    let (_no_sender, rx) = crossbeam_channel::bounded(1);
    let endpoint = PeerEndpoint::new(tx, rx, Duration::from_millis(20));

    let result = endpoint.call(PeerRequest::Reset);
    assert!(matches!(result, Err(PeerError::Timeout(_))));
}

#[test]
fn test_peer_disconnect_is_detected() {
    let (tx, rx_req) = crossbeam_channel::bounded::<PeerRequest>(1);
    let (tx_resp, rx) = crossbeam_channel::bounded(1);
    // The peer goes away entirely.
    drop(rx_req);
    drop(tx_resp);

    let endpoint = PeerEndpoint::new(tx, rx, Duration::from_millis(20));
    let result = endpoint.call(PeerRequest::Reset);
    assert!(matches!(result, Err(PeerError::Disconnected)));
}
