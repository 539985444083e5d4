use serde::{Deserialize, Serialize};

use crate::TimeRange;

/// A half-open window on the frame axis of an output sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameWindow {
    pub from: i64,
    pub duration_in_frames: i64,
}

impl FrameWindow {
    pub fn end(&self) -> i64 {
        self.from + self.duration_in_frames
    }
}

/// Map a millisecond display interval onto frame indices at `fps`.
///
/// Every piece of frame arithmetic in the pipeline routes through here so the
/// live preview and the offline render agree on frame boundaries. Duration is
/// floored at one frame: downstream renderers cannot represent a zero-length
/// sequence.
pub fn frames_for(display: &TimeRange, fps: u32) -> FrameWindow {
    let fps = fps as f64;
    let from = (display.from as f64 / 1000.0 * fps).round() as i64;
    let duration =
        (((display.to - display.from) as f64) / 1000.0 * fps).round() as i64;
    FrameWindow {
        from,
        duration_in_frames: duration.max(1),
    }
}

/// Total frame count of a sequence of `duration_ms` at `fps`, floored at 1.
pub fn total_frames(duration_ms: u64, fps: u32) -> i64 {
    ((duration_ms as f64 / 1000.0 * fps as f64).round() as i64).max(1)
}

/// Millisecond timestamp of frame `index` at `fps`.
pub fn frame_to_ms(index: i64, fps: u32) -> f64 {
    index as f64 * 1000.0 / fps as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_display_window_to_frames() {
        let w = frames_for(&TimeRange { from: 0, to: 5000 }, 30);
        assert_eq!(w.from, 0);
        assert_eq!(w.duration_in_frames, 150);
        assert_eq!(w.end(), 150);
    }

    #[test]
    fn rounds_fractional_boundaries() {
        // 1234ms at 30fps = 37.02 frames from, 2.97 frames long
        let w = frames_for(&TimeRange { from: 1234, to: 1333 }, 30);
        assert_eq!(w.from, 37);
        assert_eq!(w.duration_in_frames, 3);
    }

    #[test]
    fn zero_length_rounds_up_to_one_frame() {
        // 10ms at 10fps rounds to 0 frames; floor keeps it renderable.
        let w = frames_for(&TimeRange { from: 0, to: 10 }, 10);
        assert_eq!(w.duration_in_frames, 1);
    }

    #[test]
    fn total_frames_floors_at_one() {
        assert_eq!(total_frames(5000, 30), 150);
        assert_eq!(total_frames(1, 10), 1);
    }
}
