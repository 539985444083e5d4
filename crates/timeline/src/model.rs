use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::TimelineError;

/// Millisecond interval, either on the timeline (`display`) or into the
/// source media (`trim`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: u64,
    pub to: u64,
}

impl TimeRange {
    pub fn duration(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn contains_ms(&self, ms: f64) -> bool {
        ms >= self.from as f64 && ms < self.to as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Background {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Default for Background {
    fn default() -> Self {
        Self {
            kind: "color".into(),
            value: "#000000".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Video,
    Image,
    Audio,
    Text,
}

impl ItemType {
    pub fn is_visual(&self) -> bool {
        matches!(self, ItemType::Video | ItemType::Image | ItemType::Text)
    }

    pub fn has_audio(&self) -> bool {
        matches!(self, ItemType::Video | ItemType::Audio)
    }
}

/// Crop sub-rectangle in source pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shadow {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub blur: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stroke {
    #[serde(default)]
    pub width: f64,
    pub color: String,
}

/// Type-specific visual/audio parameters. The editor serializes this as one
/// loose bag per item; fields irrelevant to an item type stay at their
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemDetails {
    pub src: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub top: f64,
    pub left: f64,
    /// Declared scale transform, e.g. `"scale(1.5)"`.
    pub transform: Option<String>,
    /// Rotation in degrees, e.g. `"45deg"`.
    pub rotate: Option<String>,
    pub opacity: Option<f64>,
    pub blur: f64,
    pub brightness: Option<f64>,
    pub volume: Option<f64>,
    pub flip_x: bool,
    pub flip_y: bool,
    pub crop: Option<CropRect>,
    pub border_radius: f64,
    pub border_width: f64,
    pub border_color: Option<String>,
    pub box_shadow: Option<Shadow>,
    /// Chroma-key color for the codec backend, e.g. `"#00ff00"`.
    pub chroma_key: Option<String>,

    // Text items only.
    pub text: Option<String>,
    pub font_family: Option<String>,
    pub font_url: Option<String>,
    pub font_size: Option<f64>,
    pub font_weight: Option<String>,
    pub font_style: Option<String>,
    pub line_height: Option<f64>,
    pub letter_spacing: Option<f64>,
    pub text_align: Option<String>,
    pub color: Option<String>,
    pub background_color: Option<String>,
    pub text_decoration: Option<String>,
    pub stroke: Option<Stroke>,
}

impl ItemDetails {
    /// Opacity normalized from the editor's 0-100 scale.
    pub fn opacity_or_default(&self) -> f64 {
        self.opacity.unwrap_or(100.0)
    }

    pub fn brightness_or_default(&self) -> f64 {
        self.brightness.unwrap_or(100.0)
    }

    pub fn volume_or_default(&self) -> f64 {
        self.volume.unwrap_or(100.0)
    }
}

/// Free-form annotation carried by the editor; not used for rendering
/// semantics, except that `preview_url` participates in asset staging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemMetadata {
    pub name: Option<String>,
    pub source: Option<String>,
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub display: TimeRange,
    #[serde(default)]
    pub trim: Option<TimeRange>,
    #[serde(default = "default_playback_rate")]
    pub playback_rate: f64,
    #[serde(default)]
    pub details: ItemDetails,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

fn default_playback_rate() -> f64 {
    1.0
}

impl TrackItem {
    /// Source timestamp (ms) supplying the output at timeline time `ms`.
    pub fn source_time_ms(&self, ms: f64) -> f64 {
        let trim_from = self.trim.map(|t| t.from).unwrap_or(0) as f64;
        trim_from + (ms - self.display.from as f64) * self.playback_rate
    }
}

/// A declared visual link between two adjacent track items. `kind: "none"`
/// disables the link and is treated as absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(default = "default_transition_kind")]
    pub kind: String,
    #[serde(default)]
    pub duration: Option<u64>,
}

fn default_transition_kind() -> String {
    "none".into()
}

impl Transition {
    pub fn is_disabled(&self) -> bool {
        self.kind == "none"
    }
}

fn default_fps() -> u32 {
    30
}

/// The full editor document handed to the render pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineDocument {
    /// Render/z-order of items, bottom-most first.
    pub track_item_ids: Vec<String>,
    pub track_items_map: HashMap<String, TrackItem>,
    #[serde(default)]
    pub transitions_map: HashMap<String, Transition>,
    pub size: CanvasSize,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Total timeline length in milliseconds.
    pub duration: u64,
    #[serde(default)]
    pub background: Background,
}

impl TimelineDocument {
    pub fn item(&self, id: &str) -> Result<&TrackItem, TimelineError> {
        self.track_items_map
            .get(id)
            .ok_or_else(|| TimelineError::ItemNotFound(id.to_string()))
    }

    /// Items in declared z-order, skipping ids with no map entry.
    pub fn items_in_order(&self) -> impl Iterator<Item = &TrackItem> {
        self.track_item_ids
            .iter()
            .filter_map(|id| self.track_items_map.get(id))
    }

    pub fn max_display_end(&self) -> u64 {
        self.track_items_map
            .values()
            .map(|i| i.display.to)
            .max()
            .unwrap_or(0)
    }

    /// Minimal structural checks before rendering. Editor-level invariants
    /// beyond these are assumed, not re-validated.
    pub fn validate(&self) -> Result<(), TimelineError> {
        if self.size.width == 0 || self.size.height == 0 {
            return Err(TimelineError::InvalidSize(self.size.width, self.size.height));
        }
        if self.fps == 0 {
            return Err(TimelineError::InvalidFps(self.fps));
        }
        for item in self.track_items_map.values() {
            if item.display.to <= item.display.from {
                return Err(TimelineError::InvalidDisplay(item.id.clone()));
            }
        }
        let last_end = self.max_display_end();
        if self.duration < last_end {
            return Err(TimelineError::DurationTooShort {
                duration: self.duration,
                last_end,
            });
        }
        Ok(())
    }
}
