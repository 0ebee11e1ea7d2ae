//! Common types and functions shared by all o2rs crates.
pub mod debug;
pub mod error;
pub mod name;
pub mod time;
pub mod wire;

pub use debug::DebugFlags;
pub use error::{Error, Result};
pub use name::{split_address, EnsembleName, ServiceName, MAX_ENSEMBLE_NAME_LEN};
pub use time::{GlobalTime, LocalDuration, LocalTime};
