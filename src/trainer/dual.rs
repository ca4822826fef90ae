//! Dual (cross-boundary) topology.
//!
//! A dual trainer delegates to a peer environment living in a different
//! process or execution context. The boundary is an RPC-style
//! request/response channel pair with an explicit timeout: every call can
//! time out or find the peer gone, and those failures surface as
//! [`PeerError`] instead of surfacing at arbitrary call sites.
//!
//! The handshake is stage-qualified: at initialization the trainer sends
//! `Hello` with its [`Stage`] tag and verifies the peer advertises the
//! training category it requires. A missing capability fails fast at
//! `initialize`, before any environment interaction begins.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::callback::TrainerCallback;
use crate::core::cancel::CancelToken;
use crate::core::properties::PropertySet;
use crate::core::state::RenderFrame;
use crate::engine::{SharedEngine, Stage};
use crate::environment::{
    ActionSpace, DataCapability, DataKind, DatasetDescriptor, EnvError, EnvStep, Environment,
    OutputKind,
};
use crate::trainer::config::{TrainerConfig, TrainerKind};
use crate::trainer::rl::RlTrainer;
use crate::trainer::rnn::RnnTrainer;
use crate::trainer::{
    ResultCollection, TrainStep, Trainer, TrainerError, TrainingCategory,
};
use crate::vocab::BucketCollection;

// Channel depth for the boundary; one request is in flight at a time.
const PEER_CHANNEL_CAP: usize = 4;

/// Failure modes of the cross-boundary call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerError {
    /// The peer did not answer within the timeout.
    Timeout(Duration),
    /// The boundary silently disconnected.
    Disconnected,
    /// The peer answered with an error.
    Remote(String),
    /// The peer answered with the wrong response kind.
    Protocol(&'static str),
}

impl fmt::Display for PeerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerError::Timeout(t) => write!(f, "peer call timed out after {:?}", t),
            PeerError::Disconnected => write!(f, "peer disconnected"),
            PeerError::Remote(msg) => write!(f, "peer error: {}", msg),
            PeerError::Protocol(msg) => write!(f, "peer protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for PeerError {}

/// Requests crossing the boundary toward the peer.
#[derive(Debug, Clone)]
pub enum PeerRequest {
    /// Stage-qualified handshake.
    Hello {
        /// Stage the connecting trainer runs under.
        stage: Stage,
    },
    /// Initialize the peer environment with a property blob.
    Initialize {
        /// `Key=Value;...` property string.
        properties: String,
    },
    /// Begin a new episode.
    Reset,
    /// Advance one step.
    Step(u32),
    /// Render the current state.
    Render {
        /// Whether display output is wanted.
        show: bool,
        /// Requested frame width.
        width: usize,
        /// Requested frame height.
        height: usize,
    },
    /// Dataset shape for a layout.
    Dataset(DataKind),
    /// Discrete action space.
    ActionSpace,
    /// Convert engine output into the peer's native representation.
    ConvertOutput(Vec<f64>),
    /// Release the peer environment and end the session.
    Close,
}

/// Responses crossing the boundary back to the trainer.
#[derive(Debug, Clone)]
pub enum PeerResponse {
    /// Handshake answer advertising the peer's capability set.
    Hello {
        /// Peer environment name.
        name: String,
        /// Declared data capability.
        capability: DataCapability,
        /// Training category the peer serves.
        category: TrainingCategory,
        /// Render cadence delay.
        ui_delay: Duration,
    },
    /// Operation completed with no payload.
    Ack,
    /// A reset/step result.
    State(EnvStep),
    /// A render result.
    Frame(Option<RenderFrame>),
    /// A dataset descriptor.
    Dataset(DatasetDescriptor),
    /// The action space.
    ActionSpace(ActionSpace),
    /// Converted output payload.
    Output(Vec<u8>, OutputKind),
    /// The request failed on the peer side.
    Error(String),
}

/// Caller-side handle of the boundary.
pub struct PeerEndpoint {
    tx: Sender<PeerRequest>,
    rx: Receiver<PeerResponse>,
    timeout: Duration,
}

impl PeerEndpoint {
    /// Create an endpoint over raw channel halves.
    pub fn new(tx: Sender<PeerRequest>, rx: Receiver<PeerResponse>, timeout: Duration) -> Self {
        Self { tx, rx, timeout }
    }

    /// Configured call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issue one request and wait for its response.
    pub fn call(&self, request: PeerRequest) -> Result<PeerResponse, PeerError> {
        self.tx.send(request).map_err(|_| PeerError::Disconnected)?;
        match self.rx.recv_timeout(self.timeout) {
            Ok(PeerResponse::Error(msg)) => Err(PeerError::Remote(msg)),
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => Err(PeerError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(PeerError::Disconnected),
        }
    }
}

/// Serves an [`Environment`] to a [`PeerEndpoint`] from its own thread,
/// standing in for the remote side of the boundary.
pub struct PeerHost {
    thread: std::thread::JoinHandle<()>,
}

impl PeerHost {
    /// Spawn a host serving `env` under the given training category.
    ///
    /// Returns the caller-side endpoint and the host handle.
    pub fn spawn(
        mut env: Box<dyn Environment>,
        category: TrainingCategory,
        timeout: Duration,
    ) -> (PeerEndpoint, PeerHost) {
        let (req_tx, req_rx) = bounded::<PeerRequest>(PEER_CHANNEL_CAP);
        let (resp_tx, resp_rx) = bounded::<PeerResponse>(PEER_CHANNEL_CAP);

        let thread = std::thread::Builder::new()
            .name("peer-host".to_string())
            .spawn(move || {
                while let Ok(request) = req_rx.recv() {
                    let stop = matches!(request, PeerRequest::Close);
                    let response = Self::serve(env.as_mut(), category, request);
                    if resp_tx.send(response).is_err() {
                        break;
                    }
                    if stop {
                        break;
                    }
                }
                env.close();
            })
            .expect("failed to spawn peer host thread");

        (
            PeerEndpoint::new(req_tx, resp_rx, timeout),
            PeerHost { thread },
        )
    }

    fn serve(
        env: &mut dyn Environment,
        category: TrainingCategory,
        request: PeerRequest,
    ) -> PeerResponse {
        match request {
            PeerRequest::Hello { stage } => {
                log::debug!("peer host: hello for stage {}", stage);
                PeerResponse::Hello {
                    name: env.name().to_string(),
                    capability: env.capability(),
                    category,
                    ui_delay: env.ui_delay(),
                }
            }
            PeerRequest::Initialize { properties } => match PropertySet::parse(&properties) {
                Ok(props) => match env.initialize(&props) {
                    Ok(()) => PeerResponse::Ack,
                    Err(e) => PeerResponse::Error(e.to_string()),
                },
                Err(e) => PeerResponse::Error(e.to_string()),
            },
            PeerRequest::Reset => match env.reset() {
                Ok(step) => PeerResponse::State(step),
                Err(e) => PeerResponse::Error(e.to_string()),
            },
            PeerRequest::Step(action) => match env.step(action) {
                Ok(step) => PeerResponse::State(step),
                Err(e) => PeerResponse::Error(e.to_string()),
            },
            PeerRequest::Render { show, width, height } => {
                PeerResponse::Frame(env.render(show, width, height))
            }
            PeerRequest::Dataset(kind) => PeerResponse::Dataset(env.dataset(kind)),
            PeerRequest::ActionSpace => PeerResponse::ActionSpace(env.action_space()),
            PeerRequest::ConvertOutput(output) => match env.convert_output(&output) {
                Ok((bytes, kind)) => PeerResponse::Output(bytes, kind),
                Err(e) => PeerResponse::Error(e.to_string()),
            },
            PeerRequest::Close => PeerResponse::Ack,
        }
    }

    /// Wait for the host thread to finish.
    pub fn join(self) -> std::thread::Result<()> {
        self.thread.join()
    }
}

/// Capability set advertised by the peer at handshake time.
#[derive(Debug, Clone)]
struct PeerHello {
    name: String,
    capability: DataCapability,
    category: TrainingCategory,
    ui_delay: Duration,
}

/// [`Environment`] implementation that forwards every call across the
/// boundary. Built from a completed handshake, so the name, capability
/// and cached descriptors are resolved once at construction.
pub struct PeerEnvironment {
    endpoint: PeerEndpoint,
    name: String,
    capability: DataCapability,
    ui_delay: Duration,
    action_space: ActionSpace,
    datasets: (DatasetDescriptor, DatasetDescriptor),
}

impl PeerEnvironment {
    /// Complete the handshake and build the proxy.
    fn connect(endpoint: PeerEndpoint, hello: PeerHello) -> Result<Self, PeerError> {
        let action_space = match endpoint.call(PeerRequest::ActionSpace)? {
            PeerResponse::ActionSpace(space) => space,
            _ => return Err(PeerError::Protocol("expected ActionSpace response")),
        };
        let values = match endpoint.call(PeerRequest::Dataset(DataKind::Values))? {
            PeerResponse::Dataset(ds) => ds,
            _ => return Err(PeerError::Protocol("expected Dataset response")),
        };
        let blob = match endpoint.call(PeerRequest::Dataset(DataKind::Blob))? {
            PeerResponse::Dataset(ds) => ds,
            _ => return Err(PeerError::Protocol("expected Dataset response")),
        };
        Ok(Self {
            endpoint,
            name: hello.name,
            capability: hello.capability,
            ui_delay: hello.ui_delay,
            action_space,
            datasets: (values, blob),
        })
    }

    fn call_state(&mut self, request: PeerRequest) -> Result<EnvStep, EnvError> {
        match self.endpoint.call(request) {
            Ok(PeerResponse::State(step)) => Ok(step),
            Ok(_) => Err(EnvError::Internal("unexpected peer response".to_string())),
            Err(e) => Err(EnvError::Internal(e.to_string())),
        }
    }
}

impl Environment for PeerEnvironment {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> DataCapability {
        self.capability
    }

    fn initialize(&mut self, properties: &PropertySet) -> Result<(), EnvError> {
        match self.endpoint.call(PeerRequest::Initialize {
            properties: properties.to_property_string(),
        }) {
            Ok(PeerResponse::Ack) => Ok(()),
            Ok(_) => Err(EnvError::Internal("unexpected peer response".to_string())),
            Err(e) => Err(EnvError::Internal(e.to_string())),
        }
    }

    fn reset(&mut self) -> Result<EnvStep, EnvError> {
        self.call_state(PeerRequest::Reset)
    }

    fn step(&mut self, action: u32) -> Result<EnvStep, EnvError> {
        self.call_state(PeerRequest::Step(action))
    }

    fn render(&mut self, show: bool, width: usize, height: usize) -> Option<RenderFrame> {
        match self.endpoint.call(PeerRequest::Render { show, width, height }) {
            Ok(PeerResponse::Frame(frame)) => frame,
            _ => None,
        }
    }

    fn dataset(&self, kind: DataKind) -> DatasetDescriptor {
        match kind {
            DataKind::Values => self.datasets.0.clone(),
            DataKind::Blob => self.datasets.1.clone(),
        }
    }

    fn action_space(&self) -> ActionSpace {
        self.action_space.clone()
    }

    fn convert_output(&self, output: &[f64]) -> Result<(Vec<u8>, OutputKind), EnvError> {
        match self.endpoint.call(PeerRequest::ConvertOutput(output.to_vec())) {
            Ok(PeerResponse::Output(bytes, kind)) => Ok((bytes, kind)),
            Ok(_) => Err(EnvError::Internal("unexpected peer response".to_string())),
            Err(e) => Err(EnvError::Internal(e.to_string())),
        }
    }

    fn ui_delay(&self) -> Duration {
        self.ui_delay
    }

    fn close(&mut self) {
        let _ = self.endpoint.call(PeerRequest::Close);
    }
}

enum DualInner {
    Rl(RlTrainer),
    Rnn(RnnTrainer),
}

impl DualInner {
    fn as_trainer(&self) -> &dyn Trainer {
        match self {
            DualInner::Rl(t) => t,
            DualInner::Rnn(t) => t,
        }
    }

    fn as_trainer_mut(&mut self) -> &mut dyn Trainer {
        match self {
            DualInner::Rl(t) => t,
            DualInner::Rnn(t) => t,
        }
    }
}

/// Trainer delegating to a peer across the boundary.
///
/// The concrete trainer family is selected by the `TrainerType` property
/// at `initialize`, after a stage-qualified handshake verified the peer
/// advertises the required capability.
pub struct DualTrainer {
    name: String,
    endpoint: Option<PeerEndpoint>,
    inner: Option<DualInner>,
    stage: Stage,
}

impl DualTrainer {
    /// Create a dual trainer over a connected endpoint.
    pub fn new(name: impl Into<String>, endpoint: PeerEndpoint) -> Self {
        Self {
            name: name.into(),
            endpoint: Some(endpoint),
            inner: None,
            stage: Stage::None,
        }
    }

    /// Shared cancel token of the inner trainer.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.inner.as_ref().map(|inner| match inner {
            DualInner::Rl(t) => t.cancel_token(),
            DualInner::Rnn(t) => t.cancel_token(),
        })
    }

    /// Vocabulary preprocessing, available when the peer serves the
    /// recurrent capability.
    pub fn preload_data(
        &mut self,
        project_id: u32,
    ) -> Result<Option<BucketCollection>, TrainerError> {
        match self.inner.as_mut() {
            Some(DualInner::Rnn(t)) => t.preload_data(project_id),
            Some(DualInner::Rl(_)) => Err(TrainerError::UnsupportedOperation("PreloadData")),
            None => Err(TrainerError::NotInitialized),
        }
    }

    /// Sequence output generation, available when the peer serves the
    /// recurrent capability.
    pub fn run_output(
        &mut self,
        engine: &SharedEngine,
        n: usize,
    ) -> Result<(Vec<u8>, OutputKind), TrainerError> {
        match self.inner.as_mut() {
            Some(DualInner::Rnn(t)) => t.run_output(engine, n),
            Some(DualInner::Rl(_)) => Err(TrainerError::UnsupportedOperation("RunOutput")),
            None => Err(TrainerError::NotInitialized),
        }
    }

    fn required_category(kind: TrainerKind) -> TrainingCategory {
        match kind {
            TrainerKind::RnnSimple => TrainingCategory::Custom,
            _ => TrainingCategory::Reinforcement,
        }
    }
}

impl Trainer for DualTrainer {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> TrainingCategory {
        self.inner
            .as_ref()
            .map(|t| t.as_trainer().category())
            .unwrap_or(TrainingCategory::Reinforcement)
    }

    fn stage(&self) -> Stage {
        self.stage
    }

    fn information(&self) -> String {
        match &self.inner {
            Some(inner) => format!("{} [dual] {}", self.name, inner.as_trainer().information()),
            None => format!("{} [dual, disconnected]", self.name),
        }
    }

    fn initialize(
        &mut self,
        properties: &str,
        callback: Box<dyn TrainerCallback>,
    ) -> Result<(), TrainerError> {
        let props = PropertySet::parse(properties).map_err(TrainerError::Configuration)?;
        let config = TrainerConfig::parse(&props).map_err(TrainerError::Configuration)?;
        let endpoint = self.endpoint.take().ok_or(TrainerError::NotInitialized)?;

        let stage = match config.kind {
            TrainerKind::RnnSimple => Stage::Rnn,
            _ => Stage::Rl,
        };

        // Stage-qualified handshake; a peer that does not expose the
        // required capability fails here, before any environment
        // interaction.
        let hello = match endpoint.call(PeerRequest::Hello { stage }) {
            Ok(PeerResponse::Hello {
                name,
                capability,
                category,
                ui_delay,
            }) => PeerHello {
                name,
                capability,
                category,
                ui_delay,
            },
            Ok(_) => {
                return Err(TrainerError::Peer(PeerError::Protocol(
                    "expected Hello response",
                )))
            }
            Err(e) => return Err(TrainerError::Peer(e)),
        };

        let required = Self::required_category(config.kind);
        if hello.category != required {
            return Err(TrainerError::CapabilityMismatch(format!(
                "peer '{}' serves {} but the {} trainer requires {}",
                hello.name,
                hello.category,
                config.kind.as_str(),
                required
            )));
        }

        let peer_env = PeerEnvironment::connect(endpoint, hello).map_err(TrainerError::Peer)?;

        // The boundary carries a single session; the factory hands the
        // proxy to the one worker that asks for it.
        let slot = Arc::new(Mutex::new(Some(peer_env)));
        let factory: crate::environment::EnvironmentFactory = Box::new(move |_worker_id| {
            slot.lock()
                .take()
                .map(|env| Box::new(env) as Box<dyn Environment>)
                .ok_or_else(|| {
                    EnvError::Internal("peer boundary supports a single worker".to_string())
                })
        });

        let mut inner = match config.kind {
            TrainerKind::RnnSimple => DualInner::Rnn(RnnTrainer::new(self.name.clone(), factory)),
            _ => DualInner::Rl(RlTrainer::new(self.name.clone(), factory)),
        };
        inner.as_trainer_mut().initialize(properties, callback)?;

        self.stage = stage;
        self.inner = Some(inner);
        Ok(())
    }

    fn clean_up(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.as_trainer_mut().clean_up();
        }
    }

    fn dataset_override(&mut self, project_id: u32) -> Option<DatasetDescriptor> {
        self.inner
            .as_mut()
            .and_then(|t| t.as_trainer_mut().dataset_override(project_id))
    }

    fn is_testing_supported(&self) -> bool {
        self.inner
            .as_ref()
            .map(|t| t.as_trainer().is_testing_supported())
            .unwrap_or(false)
    }

    fn is_running_supported(&self) -> bool {
        self.inner
            .as_ref()
            .map(|t| t.as_trainer().is_running_supported())
            .unwrap_or(false)
    }

    fn train(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
        step: TrainStep,
    ) -> Result<(), TrainerError> {
        self.inner
            .as_mut()
            .ok_or(TrainerError::NotInitialized)?
            .as_trainer_mut()
            .train(engine, iteration_override, step)
    }

    fn test(
        &mut self,
        engine: &SharedEngine,
        iteration_override: Option<usize>,
    ) -> Result<(), TrainerError> {
        self.inner
            .as_mut()
            .ok_or(TrainerError::NotInitialized)?
            .as_trainer_mut()
            .test(engine, iteration_override)
    }

    fn run(
        &mut self,
        engine: &SharedEngine,
        delay: Duration,
    ) -> Result<ResultCollection, TrainerError> {
        self.inner
            .as_mut()
            .ok_or(TrainerError::NotInitialized)?
            .as_trainer_mut()
            .run(engine, delay)
    }

    fn global_rewards(&self) -> f64 {
        self.inner
            .as_ref()
            .map(|t| t.as_trainer().global_rewards())
            .unwrap_or(0.0)
    }

    fn global_episode_count(&self) -> usize {
        self.inner
            .as_ref()
            .map(|t| t.as_trainer().global_episode_count())
            .unwrap_or(0)
    }

    fn exploration_rate(&self) -> f64 {
        self.inner
            .as_ref()
            .map(|t| t.as_trainer().exploration_rate())
            .unwrap_or(0.0)
    }

    fn update_snapshot(&mut self) -> Option<(usize, f64)> {
        self.inner
            .as_mut()
            .and_then(|t| t.as_trainer_mut().update_snapshot())
    }

    fn open_ui(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.as_trainer_mut().open_ui();
        }
    }
}
