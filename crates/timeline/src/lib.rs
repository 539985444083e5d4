use thiserror::Error;

mod frames;
pub use frames::*;
mod model;
pub use model::*;
mod groups;
pub use groups::*;

#[derive(Debug, Error)]
pub enum TimelineError {
    #[error("invalid canvas size {0}x{1}")]
    InvalidSize(u32, u32),
    #[error("invalid fps: {0}")]
    InvalidFps(u32),
    #[error("item {0}: display interval must satisfy to > from >= 0")]
    InvalidDisplay(String),
    #[error("duration {duration}ms is shorter than the last item end {last_end}ms")]
    DurationTooShort { duration: u64, last_end: u64 },
    #[error("track item not found: {0}")]
    ItemNotFound(String),
}
