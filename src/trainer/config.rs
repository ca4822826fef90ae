//! Trainer configuration parsed from the property blob.

use std::time::Duration;

use crate::core::counters::RewardMode;
use crate::core::properties::{PropertyError, PropertySet};
use crate::vocab::DEFAULT_BUCKET_COUNT;

/// Which trainer implementation the property string selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerKind {
    /// Basic single-threaded policy-gradient trainer.
    PgSimple,
    /// Single-threaded policy-gradient trainer.
    PgSt,
    /// Multi-threaded policy-gradient trainer.
    PgMt,
    /// Single-threaded sequence (RNN) trainer.
    RnnSimple,
}

impl TrainerKind {
    /// Parse the `TrainerType` property value.
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "PG.SIMPLE" => Some(Self::PgSimple),
            "PG.ST" => Some(Self::PgSt),
            "PG.MT" => Some(Self::PgMt),
            "RNN.SIMPLE" => Some(Self::RnnSimple),
            _ => None,
        }
    }

    /// Canonical property value for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PgSimple => "PG.SIMPLE",
            Self::PgSt => "PG.ST",
            Self::PgMt => "PG.MT",
            Self::RnnSimple => "RNN.SIMPLE",
        }
    }

    /// Whether this kind runs the multi-threaded topology.
    pub fn is_multi_threaded(&self) -> bool {
        matches!(self, Self::PgMt)
    }
}

/// Typed trainer settings, parsed once at `initialize` and immutable for
/// the trainer's lifetime.
#[derive(Debug, Clone)]
pub struct TrainerConfig {
    /// Selected trainer implementation.
    pub kind: TrainerKind,
    /// Reward display/accumulation mode.
    pub reward_mode: RewardMode,
    /// Discount factor.
    pub gamma: f64,
    /// Worker thread count for the MT topology.
    pub threads: usize,
    /// Whether the discounted-return accumulator clears on terminal entry
    /// (`true`) or on the next reset cycle (`false`).
    pub allow_discount_reset: bool,
    /// Whether accelerated training is requested.
    pub use_accelerated_training: bool,
    /// Whether observations are normalized; decided here, applied
    /// uniformly for the trainer's lifetime.
    pub normalize_input: bool,
    /// Initial exploration rate; zero disables exploration.
    pub exploration_start: f64,
    /// Exploration rate floor.
    pub exploration_end: f64,
    /// Multiplicative exploration decay applied per episode.
    pub exploration_decay: f64,
    /// Bucket count for continuous vocabulary preprocessing.
    pub vocabulary_buckets: usize,
    /// Timeout for cross-boundary peer calls (Dual topology).
    pub peer_timeout: Duration,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            kind: TrainerKind::PgSt,
            reward_mode: RewardMode::Val,
            gamma: 0.99,
            threads: 1,
            allow_discount_reset: false,
            use_accelerated_training: false,
            normalize_input: false,
            exploration_start: 0.0,
            exploration_end: 0.0,
            exploration_decay: 0.999,
            vocabulary_buckets: DEFAULT_BUCKET_COUNT,
            peer_timeout: Duration::from_secs(5),
        }
    }
}

impl TrainerConfig {
    /// Parse the trainer settings from a property set.
    ///
    /// `TrainerType` is required; everything else has defaults. Unknown
    /// keys are ignored.
    pub fn parse(props: &PropertySet) -> Result<Self, PropertyError> {
        let kind_text = props.require("TrainerType")?;
        let kind = TrainerKind::parse(kind_text).ok_or_else(|| PropertyError::Invalid {
            key: "TrainerType".to_string(),
            value: kind_text.to_string(),
        })?;

        let reward_mode = match props.get("RewardType") {
            None => RewardMode::Val,
            Some(text) => RewardMode::parse(text).ok_or_else(|| PropertyError::Invalid {
                key: "RewardType".to_string(),
                value: text.to_string(),
            })?,
        };

        let defaults = Self::default();
        Ok(Self {
            kind,
            reward_mode,
            gamma: props.get_f64("Gamma", defaults.gamma)?,
            threads: props.get_usize("Threads", defaults.threads)?.max(1),
            allow_discount_reset: props
                .get_bool("AllowDiscountReset", defaults.allow_discount_reset)?,
            use_accelerated_training: props
                .get_bool("UseAcceleratedTraining", defaults.use_accelerated_training)?,
            normalize_input: props.get_bool("NormalizeInput", defaults.normalize_input)?,
            exploration_start: props.get_f64("ExplorationStart", defaults.exploration_start)?,
            exploration_end: props.get_f64("ExplorationEnd", defaults.exploration_end)?,
            exploration_decay: props.get_f64("ExplorationDecay", defaults.exploration_decay)?,
            vocabulary_buckets: props
                .get_usize("VocabularyBuckets", defaults.vocabulary_buckets)?,
            peer_timeout: Duration::from_millis(
                props.get_usize("PeerTimeoutMs", defaults.peer_timeout.as_millis() as usize)?
                    as u64,
            ),
        })
    }

    /// Effective worker count: the MT topology uses `threads`, every
    /// other kind reduces to a single worker.
    pub fn worker_count(&self) -> usize {
        if self.kind.is_multi_threaded() {
            self.threads
        } else {
            1
        }
    }
}
