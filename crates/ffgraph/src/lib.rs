//! Codec render backend: compiles a timeline document into an ffmpeg
//! `-filter_complex` invocation and drives the encode as a child process.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use thiserror::Error;

pub mod graph;
pub use graph::{Filter, FilterChain, FilterGraph};
mod build;
pub use build::{build_plan, AudioPlan, FfmpegPlan, PlanInput};
mod encode;
pub use encode::run_encode;

use assets::StagedAssets;
use timeline::TimelineDocument;

/// Output files smaller than this are treated as silently-truncated encodes
/// and fail the job even when ffmpeg exited 0.
pub const MIN_OUTPUT_BYTES: u64 = 1024;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Timeline(#[from] timeline::TimelineError),
    #[error(transparent)]
    Media(#[from] media::MediaError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ffmpeg encode failed: {0}")]
    EncodeFailed(String),
    #[error("output integrity check failed: {path} is {size} bytes")]
    OutputIntegrity { path: String, size: u64 },
    #[error("render cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp4,
    Webm,
    Mov,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Mp4
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
            OutputFormat::Mov => "mov",
        }
    }

    pub fn video_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov => "libx264",
            OutputFormat::Webm => "libvpx-vp9",
        }
    }

    pub fn audio_codec(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov => "aac",
            OutputFormat::Webm => "libopus",
        }
    }
}

/// Quality tier, mapped to a constant-rate-factor and encoder preset pair.
/// Tiers trade encode speed for file size and fidelity monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
    Ultra,
}

impl Default for Quality {
    fn default() -> Self {
        Self::Medium
    }
}

impl Quality {
    /// Lower CRF means higher quality.
    pub fn crf(&self) -> u32 {
        match self {
            Quality::Low => 30,
            Quality::Medium => 26,
            Quality::High => 22,
            Quality::Ultra => 18,
        }
    }

    pub fn preset(&self) -> &'static str {
        match self {
            Quality::Low => "veryfast",
            Quality::Medium => "faster",
            Quality::High => "medium",
            Quality::Ultra => "slow",
        }
    }

    /// VP9 has no x264-style presets; `-cpu-used` fills the same role.
    pub fn vp9_cpu_used(&self) -> u32 {
        match self {
            Quality::Low => 5,
            Quality::Medium => 4,
            Quality::High => 2,
            Quality::Ultra => 1,
        }
    }
}

/// Caller-supplied output parameters submitted alongside the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub quality: Quality,
}

impl OutputOptions {
    pub fn from_document(doc: &TimelineDocument) -> Self {
        Self {
            width: doc.size.width,
            height: doc.size.height,
            fps: doc.fps,
            duration_ms: doc.duration,
            format: OutputFormat::default(),
            quality: Quality::default(),
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_ms as f64 / 1000.0
    }
}

/// Build the filter graph for `doc` and run the encode to `output`.
///
/// `progress` receives 0-99 proportional to encoded frames; the caller owns
/// the terminal 100. Setting `cancel` kills the child process.
pub async fn render(
    doc: &TimelineDocument,
    staged: &StagedAssets,
    opts: &OutputOptions,
    output: &Path,
    progress: &(dyn Fn(u8) + Send + Sync),
    cancel: &AtomicBool,
) -> Result<(), RenderError> {
    doc.validate()?;
    let plan = build_plan(doc, staged, opts);
    run_encode(&plan, output, progress, cancel).await
}
