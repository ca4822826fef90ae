//! Core primitives shared by every trainer topology.

pub mod cancel;
pub mod counters;
pub mod episode;
pub mod properties;
pub mod state;

pub use cancel::CancelToken;
pub use counters::{global_counters, GlobalCounters, RewardMode, SharedCounters};
pub use episode::{EpisodeContext, EpisodePhase};
pub use properties::{PropertyError, PropertySet};
pub use state::{Datum, Observation, RenderFrame, State};
