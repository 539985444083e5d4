//! Async render-job manager: fire-and-forget submission over an injectable
//! job store, with per-job cancellation and a retention sweep.

use thiserror::Error;

mod manager;
mod store;

pub use manager::{JobManager, ManagerConfig, RenderBackend, RenderRequest};
pub use store::{JobStatus, JobStore, MemoryJobStore, RenderJob};

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Timeline(#[from] timeline::TimelineError),
    #[error(transparent)]
    Assets(#[from] assets::AssetError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("the composition backend only emits mp4, got {0:?}")]
    UnsupportedFormat(ffgraph::OutputFormat),
}
