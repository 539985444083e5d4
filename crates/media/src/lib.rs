use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("ffmpeg not found on PATH; please install FFmpeg")]
    FfmpegMissing,
    #[error("ffprobe not found on PATH; please install FFmpeg (ffprobe)")]
    FfprobeMissing,
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),
    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),
    #[error("parse error: {0}")]
    Parse(String),
}

pub fn ffmpeg_path() -> Result<PathBuf, MediaError> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegMissing)
}

pub fn ffprobe_path() -> Result<PathBuf, MediaError> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeMissing)
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FfprobeJson {
    streams: Option<Vec<FfprobeStream>>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
}

/// Probe a media file's dimensions and duration via ffprobe.
pub fn probe_media(path: &Path) -> Result<MediaInfo, MediaError> {
    let ffprobe = ffprobe_path()?;
    let out = Command::new(ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-show_format")
        .arg("-show_streams")
        .arg("-print_format")
        .arg("json")
        .arg(path)
        .output()
        .map_err(|e| MediaError::FfprobeFailed(e.to_string()))?;
    if !out.status.success() {
        return Err(MediaError::FfprobeFailed(
            String::from_utf8_lossy(&out.stderr).into(),
        ));
    }
    let parsed: FfprobeJson =
        serde_json::from_slice(&out.stdout).map_err(|e| MediaError::Parse(e.to_string()))?;

    let mut width = None;
    let mut height = None;

    if let Some(streams) = &parsed.streams {
        for s in streams.iter().filter(|s| s.codec_type.as_deref() == Some("video")) {
            width = width.or(s.width);
            height = height.or(s.height);
        }
    }

    let duration_seconds = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse().ok());

    Ok(MediaInfo {
        path: path.to_path_buf(),
        width,
        height,
        duration_seconds,
    })
}

/// Extract the frame at `time_seconds` as PNG bytes, optionally scaled.
///
/// Seeks before the input for speed; accuracy at keyframe granularity is
/// acceptable for composition sources because the encoder re-times output
/// frames anyway.
pub fn extract_frame(
    path: &Path,
    time_seconds: f64,
    scale: Option<(u32, u32)>,
) -> Result<Vec<u8>, MediaError> {
    let ffmpeg = ffmpeg_path()?;
    let mut cmd = Command::new(ffmpeg);
    cmd.arg("-v")
        .arg("error")
        .arg("-ss")
        .arg(format!("{:.3}", time_seconds.max(0.0)))
        .arg("-i")
        .arg(path)
        .arg("-frames:v")
        .arg("1");
    if let Some((w, h)) = scale {
        cmd.arg("-vf").arg(format!("scale={}:{}", w, h));
    }
    cmd.arg("-f").arg("image2pipe").arg("-vcodec").arg("png").arg("-");

    debug!(path = %path.display(), time_seconds, "extracting frame");
    let out = cmd
        .output()
        .map_err(|e| MediaError::FfmpegFailed(e.to_string()))?;
    if !out.status.success() || out.stdout.is_empty() {
        return Err(MediaError::FfmpegFailed(
            String::from_utf8_lossy(&out.stderr).into(),
        ));
    }
    Ok(out.stdout)
}
