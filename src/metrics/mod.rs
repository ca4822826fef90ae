//! Status reporting: throttling and logger backends.

pub mod status;

pub use status::{
    ConsoleStatusLogger, CsvStatusLogger, StatusLogger, StatusThrottle, TrainerStatus,
};
