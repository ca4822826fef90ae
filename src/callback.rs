//! Callback / data-exchange protocol between harness, trainer and
//! environment.
//!
//! The fixed per-step call sequence:
//! 1. the step loop builds a [`GetDataArgs`] carrying `reset` and the
//!    action taken (`-1` meaning "no action yet");
//! 2. the data source resolves the state: a reset consumes the cached
//!    first-state if one exists (exactly once) or calls
//!    `Environment::reset`, an action calls `Environment::step`;
//! 3. the state is packaged into a normalized [`Observation`] with reward
//!    and terminal flag;
//! 4. the loop consumes the observation to feed the network engine;
//! 5. periodically, never per step, status goes out through
//!    [`TrainerCallback::on_update_status`].

use crate::core::cancel::CancelToken;
use crate::core::properties::PropertySet;
use crate::core::state::Observation;
use crate::environment::{DatasetDescriptor, EnvStep, Environment};
use crate::metrics::status::TrainerStatus;
use crate::trainer::TrainerError;
use crate::vocab::BucketCollection;

/// Arguments for the per-step data exchange.
#[derive(Debug, Default)]
pub struct GetDataArgs {
    /// Whether this request opens a new episode.
    pub reset: bool,
    /// Action to apply; `-1` means "no action yet - just produced a reset
    /// observation".
    pub action: i32,
    /// Filled by the data source with the resolved observation.
    pub state: Option<Observation>,
}

impl GetDataArgs {
    /// Request a reset observation.
    pub fn for_reset() -> Self {
        Self {
            reset: true,
            action: -1,
            state: None,
        }
    }

    /// Request a step with the given action.
    pub fn for_action(action: u32) -> Self {
        Self {
            reset: false,
            action: action as i32,
            state: None,
        }
    }

    /// Take the resolved observation out of the args.
    pub fn take_state(&mut self) -> Option<Observation> {
        self.state.take()
    }
}

/// Arguments for the initialization callback.
#[derive(Debug)]
pub struct InitializeArgs<'a> {
    /// The trainer's parsed property blob.
    pub properties: &'a PropertySet,
    /// Trainer name.
    pub trainer_name: &'a str,
}

/// Parent callback receiving lifecycle and progress updates.
///
/// All methods default to no-ops so a harness only implements what it
/// needs.
pub trait TrainerCallback: Send {
    /// Fired once when the trainer initializes.
    fn on_initialize(&mut self, _args: &InitializeArgs<'_>) {}

    /// Fired with throttled progress updates (at most once per throttle
    /// interval of wall-clock time, never every step).
    fn on_update_status(&mut self, _status: &TrainerStatus) {}

    /// Fired once when the trainer shuts down.
    fn on_shutdown(&mut self) {}
}

/// No-op callback for harnesses that do not observe progress.
#[derive(Debug, Default)]
pub struct NullCallback;

impl TrainerCallback for NullCallback {}

/// The seam between the step loop and an environment.
///
/// One data source is exclusively owned by one worker; sources are never
/// shared across worker boundaries.
pub trait DataSource: Send {
    /// Initialize the underlying environment.
    fn initialize(&mut self, properties: &PropertySet) -> Result<(), TrainerError>;

    /// Resolve one observation per the protocol above.
    fn get_data(&mut self, args: &mut GetDataArgs) -> Result<(), TrainerError>;

    /// Dataset substitution for the project; `None` keeps the configured
    /// dataset.
    fn dataset_override(&mut self, project_id: u32) -> Option<DatasetDescriptor>;

    /// Number of discrete actions.
    fn action_count(&self) -> usize;

    /// Release the environment. Idempotent.
    fn shutdown(&mut self);
}

/// Standard [`DataSource`] over an [`Environment`].
///
/// Owns the environment handle, the first-state cache set by vocabulary
/// preloading, and the trainer-lifetime `NormalizeInput` decision.
pub struct GymSource {
    env: Box<dyn Environment>,
    cancel: CancelToken,
    normalize_input: bool,
    first_state: Option<EnvStep>,
    ui_open: bool,
    initialized: bool,
    closed: bool,
}

impl GymSource {
    /// Wrap an environment.
    pub fn new(env: Box<dyn Environment>, cancel: CancelToken) -> Self {
        Self {
            env,
            cancel,
            normalize_input: false,
            first_state: None,
            ui_open: false,
            initialized: false,
            closed: false,
        }
    }

    /// Environment name.
    pub fn env_name(&self) -> &str {
        self.env.name()
    }

    /// Access the wrapped environment.
    pub fn env(&self) -> &dyn Environment {
        self.env.as_ref()
    }

    /// Mark the UI attached; subsequent steps render and honor the
    /// environment's display cadence.
    pub fn open_ui(&mut self) {
        self.ui_open = true;
    }

    /// Whether a cached first state is pending.
    pub fn has_first_state(&self) -> bool {
        self.first_state.is_some()
    }

    /// Reset the environment once and build the vocabulary table from the
    /// produced sample. The consumed state is cached as the episode's
    /// first state so the next reset request does not hit the environment
    /// a second time.
    ///
    /// Returns `Ok(None)` when cancellation aborted the scan.
    pub fn preload_vocabulary(
        &mut self,
        bucket_count: usize,
    ) -> Result<Option<BucketCollection>, TrainerError> {
        let step = self.env.reset().map_err(TrainerError::Environment)?;
        let datum = step.state.datum(false);

        let table = match datum.bytes() {
            Some(bytes) => Some(BucketCollection::from_symbols(bytes)),
            None => {
                let values = datum.values().unwrap_or(&[]);
                BucketCollection::bucketize(values, bucket_count, &self.cancel)
            }
        };

        if table.is_none() {
            // Preprocessing aborted; do not cache a state the caller will
            // never consume.
            return Ok(None);
        }

        self.first_state = Some(step);
        Ok(table)
    }
}

impl DataSource for GymSource {
    fn initialize(&mut self, properties: &PropertySet) -> Result<(), TrainerError> {
        self.normalize_input = properties
            .get_bool("NormalizeInput", false)
            .map_err(TrainerError::Configuration)?;
        self.env
            .initialize(properties)
            .map_err(TrainerError::Environment)?;
        self.initialized = true;
        Ok(())
    }

    fn get_data(&mut self, args: &mut GetDataArgs) -> Result<(), TrainerError> {
        let step = if args.reset {
            match self.first_state.take() {
                // Consumed exactly once; later resets go to the gym.
                Some(cached) => cached,
                None => self.env.reset().map_err(TrainerError::Environment)?,
            }
        } else if args.action >= 0 {
            self.env
                .step(args.action as u32)
                .map_err(TrainerError::Environment)?
        } else {
            return Err(TrainerError::ProtocolViolation(
                "neither reset nor a non-negative action was supplied",
            ));
        };

        if !step.state.is_valid() {
            return Err(TrainerError::ProtocolViolation(
                "environment produced no valid state",
            ));
        }

        let mut obs = Observation::new(&step.state, step.reward, step.done, self.normalize_input);

        if self.ui_open {
            if let Some(frame) = self.env.render(true, 512, 512) {
                obs = obs.with_frame(frame);
            }
            let delay = self.env.ui_delay();
            if !delay.is_zero() && !self.cancel.sleep(delay) {
                return Err(TrainerError::Cancelled);
            }
        }

        args.state = Some(obs);
        Ok(())
    }

    fn dataset_override(&mut self, _project_id: u32) -> Option<DatasetDescriptor> {
        let kind = match self.env.capability() {
            crate::environment::DataCapability::Value => crate::environment::DataKind::Values,
            _ => crate::environment::DataKind::Blob,
        };
        Some(self.env.dataset(kind))
    }

    fn action_count(&self) -> usize {
        self.env.action_space().count()
    }

    fn shutdown(&mut self) {
        if !self.closed {
            self.env.close();
            self.closed = true;
            self.ui_open = false;
            self.first_state = None;
        }
    }
}

impl Drop for GymSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}
