//! Count-triggered median rollups: raw readings fold into minute windows, full minute
//! windows fold into hour windows, and so on up to years.

mod cascade;
mod median;
mod types;
mod window;

pub use cascade::{CascadeAggregator, LevelSpec, LocationCascade};
pub use median::median;
pub use types::{Aggregate, Granularity, Reading, Sample, UnknownGranularity};
pub use window::WindowBuffer;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RollupError {
    #[error("window capacity for {granularity} must be positive (got {capacity})")]
    InvalidCapacity {
        granularity: Granularity,
        capacity: usize,
    },

    #[error("invalid level chain: {0}")]
    InvalidLevels(String),

    #[error("median of an empty sequence")]
    EmptyReduction,
}
