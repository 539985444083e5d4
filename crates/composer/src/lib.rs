//! Composition render backend: reconstructs the timeline as a frame
//! sequence on the CPU and streams raw frames into an ffmpeg encode.
//!
//! Unlike the codec backend this path renders every frame itself, using the
//! same `style` formulas as the live preview, so the two cannot drift. The
//! document plus its staged assets are first serialized into a
//! self-contained bundle directory; the renderer then consumes that bundle
//! frame by frame.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

mod bundle;
pub use bundle::{write_bundle, Bundle, BundleManifest};
mod compositor;
pub use compositor::FrameCompositor;

use assets::StagedAssets;
use timeline::TimelineDocument;

/// Progress band boundaries: bundling occupies the early fixed band, frame
/// rendering the rest. Callers must not assume uniform velocity across 0-100.
pub const BUNDLE_BAND_END: u8 = 10;

/// Output files smaller than this indicate a truncated encode.
pub const MIN_OUTPUT_BYTES: u64 = 1024;

#[derive(Debug, Error)]
pub enum ComposerError {
    #[error(transparent)]
    Timeline(#[from] timeline::TimelineError),
    #[error(transparent)]
    Media(#[from] media::MediaError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle serialization failed: {0}")]
    Bundle(#[from] serde_json::Error),
    #[error("ffmpeg encode failed: {0}")]
    EncodeFailed(String),
    #[error("output integrity check failed: {path} is {size} bytes")]
    OutputIntegrity { path: String, size: u64 },
    #[error("render cancelled")]
    Cancelled,
}

/// Render `doc` to an mp4 at `output`.
///
/// Blocking; callers run it on a blocking-capable task. Frame composition is
/// parallelized across a rayon pool capped at half the available cores, but
/// frames are written to the encoder strictly in order. Temporary bundle
/// contents under `workdir` are removed best-effort on the way out.
pub fn render(
    doc: &TimelineDocument,
    staged: &StagedAssets,
    workdir: &Path,
    output: &Path,
    progress: &(dyn Fn(u8) + Send + Sync),
    cancel: &AtomicBool,
) -> Result<(), ComposerError> {
    doc.validate()?;

    progress(0);
    let bundle = write_bundle(doc, staged, workdir)?;
    progress(BUNDLE_BAND_END);

    let result = render_bundle(&bundle, workdir, output, progress, cancel);

    // Best-effort cleanup never converts a successful render into a failure.
    if let Err(e) = std::fs::remove_dir_all(&bundle.root) {
        warn!(root = %bundle.root.display(), error = %e, "bundle cleanup failed");
    }

    result
}

fn render_bundle(
    bundle: &Bundle,
    asset_root: &Path,
    output: &Path,
    progress: &(dyn Fn(u8) + Send + Sync),
    cancel: &AtomicBool,
) -> Result<(), ComposerError> {
    let doc = &bundle.manifest.composition;
    let total = bundle.manifest.total_frames;
    let width = doc.size.width;
    let height = doc.size.height;

    let compositor = FrameCompositor::new(&bundle.manifest, asset_root);

    let threads = std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| ComposerError::EncodeFailed(e.to_string()))?;

    let ffmpeg = media::ffmpeg_path()?;
    let mut child = std::process::Command::new(ffmpeg)
        .args([
            "-y",
            "-v",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{width}x{height}"),
            "-r",
            &bundle.manifest.fps.to_string(),
            "-i",
            "-",
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-crf",
            "23",
            "-pix_fmt",
            "yuv420p",
        ])
        .arg(output)
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| ComposerError::EncodeFailed("ffmpeg stdin not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| ComposerError::EncodeFailed("ffmpeg stderr not piped".into()))?;
    // drained concurrently so a chatty encoder cannot fill the pipe and
    // stall our stdin writes
    let stderr_reader = drain_stderr(stderr);

    let mut written: i64 = 0;
    let batch = (threads * 4) as i64;
    let mut failed_write: Option<std::io::Error> = None;

    'outer: while written < total {
        if cancel.load(Ordering::Relaxed) {
            let _ = child.kill();
            return Err(ComposerError::Cancelled);
        }
        let end = (written + batch).min(total);
        let frames: Vec<image::RgbaImage> = pool.install(|| {
            use rayon::prelude::*;
            (written..end)
                .into_par_iter()
                .map(|i| compositor.render_frame(i))
                .collect()
        });
        for frame in frames {
            use std::io::Write;
            if let Err(e) = stdin.write_all(frame.as_raw()) {
                failed_write = Some(e);
                break 'outer;
            }
            written += 1;
            let pct = BUNDLE_BAND_END as i64
                + (100 - BUNDLE_BAND_END as i64) * written / total;
            progress(pct.clamp(0, 99) as u8);
        }
    }
    drop(stdin);

    let status = child.wait()?;
    let diagnostics = stderr_reader.join().unwrap_or_default();
    if cancel.load(Ordering::Relaxed) {
        return Err(ComposerError::Cancelled);
    }
    if !status.success() {
        return Err(ComposerError::EncodeFailed(diagnostics.trim().to_string()));
    }
    if let Some(e) = failed_write {
        // encoder exited 0 but the pipe broke before all frames landed
        return Err(ComposerError::EncodeFailed(format!(
            "encoder pipe closed early after {written}/{total} frames: {e}"
        )));
    }

    let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    if size < MIN_OUTPUT_BYTES {
        return Err(ComposerError::OutputIntegrity {
            path: output.display().to_string(),
            size,
        });
    }

    info!(
        output = %output.display(),
        frames = total,
        size,
        "composition render complete"
    );
    Ok(())
}

fn drain_stderr(mut stderr: std::process::ChildStderr) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        use std::io::Read;
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf);
        buf
    })
}
