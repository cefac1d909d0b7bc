//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the bus workspace.
//! Business crates depend on this crate only, never the reverse.
//!
//! ## Time Model
//! - Sample time is the source-reported [`TimeStamp`] (seconds, f64)
//! - Ordering never depends on wall-clock arrival order
//!
//! ## Compatibility
//! Numeric [`DataCode`] values and short names end up in recorded logs and
//! must never be renumbered or renamed.

mod bus_config;
mod data_code;
mod error;
mod quantity;
mod sample;
mod source_id;
mod timestamp;

pub use bus_config::*;
pub use data_code::{DataCode, ValueKind};
pub use error::*;
pub use quantity::*;
pub use sample::{check_series, Sample, SampleSeries, SeriesIssue};
pub use source_id::SourceId;
pub use timestamp::TimeStamp;
