use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{build::FfmpegPlan, RenderError, MIN_OUTPUT_BYTES};
use timeline::total_frames;

/// Run the planned ffmpeg encode, reporting 0-99 progress proportional to
/// encoded frames. The child is killed if `cancel` is set.
///
/// The exit code alone is not trusted: an output file under the byte floor
/// is treated as silent truncation and fails the render.
pub async fn run_encode(
    plan: &FfmpegPlan,
    output: &Path,
    progress: &(dyn Fn(u8) + Send + Sync),
    cancel: &AtomicBool,
) -> Result<(), RenderError> {
    let ffmpeg = media::ffmpeg_path()?;
    let args = plan.to_args(output);
    debug!(args = %args.join(" "), "spawning ffmpeg");

    let mut child = Command::new(ffmpeg)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let total = total_frames(plan.opts.duration_ms, plan.opts.fps).max(1);
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RenderError::EncodeFailed("ffmpeg stdout not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RenderError::EncodeFailed("ffmpeg stderr not piped".into()))?;
    // drained concurrently so a chatty child cannot fill the stderr pipe
    // and stall, leaving the stdout loop pending forever
    let stderr_task = drain_stderr(stderr);

    let mut lines = BufReader::new(stdout).lines();
    let mut poll = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        // -progress pipe:1 emits key=value pairs
                        if let Some(frame) = line.strip_prefix("frame=") {
                            if let Ok(frame) = frame.trim().parse::<i64>() {
                                let pct = (frame * 100 / total).clamp(0, 99) as u8;
                                progress(pct);
                            }
                        }
                    }
                    None => break,
                }
            }
            _ = poll.tick() => {
                if cancel.load(Ordering::Relaxed) {
                    warn!("cancel requested, killing ffmpeg");
                    let _ = child.kill().await;
                    return Err(RenderError::Cancelled);
                }
            }
        }
    }

    let diagnostics = stderr_task.await.unwrap_or_default();

    let status = child.wait().await?;
    if cancel.load(Ordering::Relaxed) {
        return Err(RenderError::Cancelled);
    }
    if !status.success() {
        return Err(RenderError::EncodeFailed(tail(&diagnostics, 2000)));
    }

    let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    if size < MIN_OUTPUT_BYTES {
        return Err(RenderError::OutputIntegrity {
            path: output.display().to_string(),
            size,
        });
    }

    info!(output = %output.display(), size, "encode complete");
    Ok(())
}

fn drain_stderr(mut stderr: tokio::process::ChildStderr) -> tokio::task::JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    })
}

fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.trim().to_string()
    } else {
        let mut start = s.len() - max;
        while !s.is_char_boundary(start) {
            start += 1;
        }
        s[start..].trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_strings() {
        assert_eq!(tail("abc\n", 10), "abc");
    }

    #[test]
    fn tail_truncates_from_the_front() {
        let long = "x".repeat(50) + "error: tail";
        let t = tail(&long, 11);
        assert_eq!(t, "error: tail");
    }

    #[tokio::test]
    async fn stderr_drain_keeps_noisy_children_from_blocking() {
        // 200 KiB of diagnostics, well past the pipe buffer
        let mut child = Command::new("sh")
            .arg("-c")
            .arg("i=0; while [ $i -lt 400 ]; do printf '%0512d' $i >&2; i=$((i+1)); done")
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let drain = drain_stderr(child.stderr.take().unwrap());
        let status = child.wait().await.unwrap();
        assert!(status.success());
        let captured = drain.await.unwrap();
        assert_eq!(captured.len(), 400 * 512);
    }
}
