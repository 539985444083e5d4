//! Filter-graph plan assembly: track items in, a complete ffmpeg argument
//! plan out. No process is spawned here, which keeps the whole graph
//! construction testable.

use std::path::PathBuf;
use tracing::{debug, warn};

use assets::StagedAssets;
use timeline::{ItemType, TimelineDocument, TrackItem};

use crate::graph::{Filter, FilterChain, FilterGraph};
use crate::{OutputFormat, OutputOptions};

/// One `-i` input together with the flags that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanInput {
    pub args: Vec<String>,
}

impl PlanInput {
    fn file(pre: &[String], path: &PathBuf) -> Self {
        let mut args = pre.to_vec();
        args.push("-i".into());
        args.push(path.to_string_lossy().into_owned());
        Self { args }
    }

    fn lavfi(spec: String) -> Self {
        Self {
            args: vec!["-f".into(), "lavfi".into(), "-i".into(), spec],
        }
    }
}

/// How the output audio track is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPlan {
    /// Map a graph label, e.g. a volume-filtered chain.
    Label(String),
    /// Map input `index`'s audio stream as-is (if present).
    Stream(usize),
    /// No audio.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegPlan {
    pub inputs: Vec<PlanInput>,
    pub filter_complex: String,
    pub video_map: String,
    pub audio: AudioPlan,
    pub opts: OutputOptions,
}

impl FfmpegPlan {
    /// Full ffmpeg argument list (without the program name).
    pub fn to_args(&self, output: &std::path::Path) -> Vec<String> {
        let mut args: Vec<String> = vec!["-y".into(), "-v".into(), "error".into()];
        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
        }
        if !self.filter_complex.is_empty() {
            args.push("-filter_complex".into());
            args.push(self.filter_complex.clone());
        }
        args.push("-map".into());
        args.push(self.video_map.clone());
        match &self.audio {
            AudioPlan::Label(label) => {
                args.push("-map".into());
                args.push(format!("[{label}]"));
            }
            AudioPlan::Stream(index) => {
                args.push("-map".into());
                args.push(format!("{index}:a?"));
            }
            AudioPlan::None => {}
        }

        args.push("-c:v".into());
        args.push(self.opts.format.video_codec().into());
        args.push("-crf".into());
        args.push(self.opts.quality.crf().to_string());
        match self.opts.format {
            OutputFormat::Mp4 | OutputFormat::Mov => {
                args.push("-preset".into());
                args.push(self.opts.quality.preset().into());
                args.push("-pix_fmt".into());
                args.push("yuv420p".into());
            }
            OutputFormat::Webm => {
                args.push("-b:v".into());
                args.push("0".into());
                args.push("-cpu-used".into());
                args.push(self.opts.quality.vp9_cpu_used().to_string());
            }
        }
        if !matches!(self.audio, AudioPlan::None) {
            args.push("-c:a".into());
            args.push(self.opts.format.audio_codec().into());
        }
        args.push("-r".into());
        args.push(self.opts.fps.to_string());
        args.push("-t".into());
        args.push(format!("{:.3}", self.opts.duration_seconds()));
        args.push("-progress".into());
        args.push("pipe:1".into());
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

struct ResolvedInput<'a> {
    item: &'a TrackItem,
    path: PathBuf,
}

/// Per-item filter chain in the fixed order: chroma key, scale, opacity,
/// brightness, blur, rotation, flips, then crop-and-pad placement onto the
/// canvas. Returns None when the item lands fully off-canvas.
fn item_chain(
    item: &TrackItem,
    input_index: usize,
    label: &str,
    opts: &OutputOptions,
) -> Option<FilterChain> {
    let details = &item.details;
    let mut chain = FilterChain::new(vec![format!("{input_index}:v")], label.to_string());

    if let Some(key) = details.chroma_key.as_deref() {
        chain.push(Filter::chroma_key(key, 0.3, 0.1));
    }

    let scale = style::scale_factor(details.transform.as_deref());
    let base_w = details.width.unwrap_or(opts.width as f64);
    let base_h = details.height.unwrap_or(opts.height as f64);
    let scaled_w = ((base_w * scale).round() as i64).max(2);
    let scaled_h = ((base_h * scale).round() as i64).max(2);
    chain.push(Filter::scale(scaled_w, scaled_h));

    let opacity = details.opacity_or_default();
    if opacity < 100.0 {
        chain.push(Filter::format_rgba());
        chain.push(Filter::opacity(opacity / 100.0));
    }
    let brightness = details.brightness_or_default();
    if brightness != 100.0 {
        chain.push(Filter::brightness(brightness));
    }
    if details.blur > 0.0 {
        chain.push(Filter::blur(details.blur));
    }
    let rotate = style::rotation_deg(details.rotate.as_deref());
    if rotate != 0.0 {
        chain.push(Filter::rotate_deg(rotate));
    }
    if details.flip_x {
        chain.push(Filter::hflip());
    }
    if details.flip_y {
        chain.push(Filter::vflip());
    }
    if item.item_type == ItemType::Video && item.playback_rate != 1.0 {
        chain.push(Filter::setpts_rate(item.playback_rate));
    }

    // Negative offsets crop the overflowing region before padding; anything
    // past the right/bottom edge is cropped as well so pad never underflows.
    let left = details.left.round() as i64;
    let top = details.top.round() as i64;
    let crop_x = (-left).max(0);
    let crop_y = (-top).max(0);
    let pad_x = left.max(0);
    let pad_y = top.max(0);
    let visible_w = (scaled_w - crop_x).min(opts.width as i64 - pad_x);
    let visible_h = (scaled_h - crop_y).min(opts.height as i64 - pad_y);
    if visible_w <= 0 || visible_h <= 0 {
        warn!(item = %item.id, "item is fully off-canvas, dropping");
        return None;
    }
    if visible_w != scaled_w || visible_h != scaled_h {
        chain.push(Filter::crop(visible_w, visible_h, crop_x, crop_y));
    }
    chain.push(Filter::pad(opts.width, opts.height, pad_x, pad_y));

    Some(chain)
}

fn input_flags(item: &TrackItem, total_duration_s: f64) -> Vec<String> {
    match item.item_type {
        ItemType::Image => vec![
            "-loop".into(),
            "1".into(),
            "-t".into(),
            format!("{:.3}", total_duration_s),
        ],
        ItemType::Video | ItemType::Audio => {
            let mut flags = Vec::new();
            if let Some(trim) = &item.trim {
                if trim.from > 0 {
                    flags.push("-ss".into());
                    flags.push(format!("{:.3}", trim.from as f64 / 1000.0));
                }
                flags.push("-t".into());
                flags.push(format!("{:.3}", trim.duration() as f64 / 1000.0));
            }
            flags
        }
        ItemType::Text => Vec::new(),
    }
}

/// Compile the document into a complete ffmpeg plan.
///
/// Only locally staged sources are usable under this backend; http(s)
/// sources are logged and dropped. With no usable media at all, the plan
/// degrades to a blank clip of the canvas background rather than failing.
pub fn build_plan(
    doc: &TimelineDocument,
    staged: &StagedAssets,
    opts: &OutputOptions,
) -> FfmpegPlan {
    let mut videos: Vec<ResolvedInput> = Vec::new();
    let mut images: Vec<ResolvedInput> = Vec::new();
    let mut audios: Vec<ResolvedInput> = Vec::new();

    for item in doc.items_in_order() {
        if item.item_type == ItemType::Text {
            debug!(item = %item.id, "text items are not supported by the codec backend");
            continue;
        }
        let Some(src) = item.details.src.as_deref() else {
            continue;
        };
        if staged.remote.contains_key(src) {
            warn!(item = %item.id, src, "http(s) sources are unsupported by the codec backend");
            continue;
        }
        let Some(path) = staged.local_path(src) else {
            warn!(item = %item.id, src, "source did not resolve to a local file, skipping");
            continue;
        };
        let resolved = ResolvedInput { item, path: path.to_path_buf() };
        match item.item_type {
            ItemType::Video => videos.push(resolved),
            ItemType::Image => images.push(resolved),
            ItemType::Audio => audios.push(resolved),
            ItemType::Text => unreachable!(),
        }
    }

    let mut inputs = Vec::new();
    let mut graph = FilterGraph::default();

    if videos.is_empty() && images.is_empty() {
        // Blank color-filled clip of the declared canvas and duration.
        let color = background_color(doc);
        inputs.push(PlanInput::lavfi(format!(
            "color=c={}:s={}x{}:r={}:d={:.3}",
            color,
            opts.width,
            opts.height,
            opts.fps,
            opts.duration_seconds()
        )));
        let next_index = inputs.len();
        let audio = first_audio_plan(&audios, &mut inputs, &mut graph, next_index);
        return FfmpegPlan {
            inputs,
            filter_complex: graph.render(),
            video_map: "0:v".into(),
            audio,
            opts: opts.clone(),
        };
    }

    // The base of the overlay chain: the first video when one exists,
    // otherwise a synthesized canvas the images stack onto.
    let mut overlays: Vec<(usize, &TrackItem, String)> = Vec::new();
    let base_label;
    let base_video_input;

    if let Some(base) = videos.first() {
        inputs.push(PlanInput::file(
            &input_flags(base.item, opts.duration_seconds()),
            &base.path,
        ));
        base_video_input = Some(0usize);
        match item_chain(base.item, 0, "base", opts) {
            Some(chain) => {
                graph.push(chain);
                base_label = "base".to_string();
            }
            None => base_label = "0:v".to_string(),
        }
    } else {
        let color = background_color(doc);
        inputs.push(PlanInput::lavfi(format!(
            "color=c={}:s={}x{}:r={}:d={:.3}",
            color,
            opts.width,
            opts.height,
            opts.fps,
            opts.duration_seconds()
        )));
        base_video_input = None;
        base_label = "0:v".to_string();
    }

    for resolved in videos.iter().skip(1).chain(images.iter()) {
        let index = inputs.len();
        inputs.push(PlanInput::file(
            &input_flags(resolved.item, opts.duration_seconds()),
            &resolved.path,
        ));
        let label = format!("v{index}");
        if let Some(chain) = item_chain(resolved.item, index, &label, opts) {
            graph.push(chain);
            overlays.push((index, resolved.item, label));
        }
    }

    // Sequential overlays, each gated by its item's display window.
    let mut current = base_label;
    for (i, (_, item, label)) in overlays.iter().enumerate() {
        let out = if i + 1 == overlays.len() {
            "vout".to_string()
        } else {
            format!("mix{i}")
        };
        let mut chain = FilterChain::new(vec![current.clone(), label.clone()], out.clone());
        chain.push(Filter::overlay(
            0,
            0,
            item.display.from as f64 / 1000.0,
            item.display.to as f64 / 1000.0,
        ));
        graph.push(chain);
        current = out;
    }

    let video_map = if current.contains(':') {
        current
    } else {
        format!("[{current}]")
    };

    let audio = if !audios.is_empty() {
        let next_index = inputs.len();
        first_audio_plan(&audios, &mut inputs, &mut graph, next_index)
    } else if let Some(base_index) = base_video_input {
        let volume = videos[0].item.details.volume_or_default();
        if volume != 100.0 {
            let mut chain =
                FilterChain::new(vec![format!("{base_index}:a")], "aout".to_string());
            chain.push(Filter::volume(volume / 100.0));
            graph.push(chain);
            AudioPlan::Label("aout".into())
        } else {
            AudioPlan::Stream(base_index)
        }
    } else {
        AudioPlan::None
    };

    FfmpegPlan {
        inputs,
        filter_complex: graph.render(),
        video_map,
        audio,
        opts: opts.clone(),
    }
}

fn first_audio_plan(
    audios: &[ResolvedInput],
    inputs: &mut Vec<PlanInput>,
    graph: &mut FilterGraph,
    next_index: usize,
) -> AudioPlan {
    let Some(first) = audios.first() else {
        return AudioPlan::None;
    };
    let index = next_index;
    inputs.push(PlanInput::file(&input_flags(first.item, 0.0), &first.path));
    let volume = first.item.details.volume_or_default();
    if volume != 100.0 {
        let mut chain = FilterChain::new(vec![format!("{index}:a")], "aout".to_string());
        chain.push(Filter::volume(volume / 100.0));
        graph.push(chain);
        AudioPlan::Label("aout".into())
    } else {
        AudioPlan::Stream(index)
    }
}

fn background_color(doc: &TimelineDocument) -> String {
    if doc.background.kind == "color" && doc.background.value.starts_with('#') {
        doc.background.value.replacen('#', "0x", 1)
    } else {
        "black".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Quality;
    use std::collections::HashMap;
    use std::path::Path;
    use timeline::{
        Background, CanvasSize, ItemDetails, ItemMetadata, TimeRange, Transition,
    };

    fn item(id: &str, item_type: ItemType, src: Option<&str>, from: u64, to: u64) -> TrackItem {
        TrackItem {
            id: id.into(),
            item_type,
            display: TimeRange { from, to },
            trim: Some(TimeRange { from: 0, to: to - from }),
            playback_rate: 1.0,
            details: ItemDetails {
                src: src.map(String::from),
                width: Some(640.0),
                height: Some(360.0),
                ..ItemDetails::default()
            },
            metadata: ItemMetadata::default(),
        }
    }

    fn doc(items: Vec<TrackItem>) -> TimelineDocument {
        TimelineDocument {
            track_item_ids: items.iter().map(|i| i.id.clone()).collect(),
            track_items_map: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            transitions_map: HashMap::<String, Transition>::new(),
            size: CanvasSize { width: 1280, height: 720 },
            fps: 30,
            duration: 5000,
            background: Background::default(),
        }
    }

    fn opts() -> OutputOptions {
        OutputOptions {
            width: 1280,
            height: 720,
            fps: 30,
            duration_ms: 5000,
            format: crate::OutputFormat::Mp4,
            quality: Quality::Medium,
        }
    }

    fn staged_with(pairs: &[(&str, &str)]) -> StagedAssets {
        let mut staged = StagedAssets::default();
        for (src, path) in pairs {
            staged.staged.insert(src.to_string(), path.into());
        }
        staged
    }

    #[test]
    fn no_inputs_degrades_to_color_clip() {
        let plan = build_plan(&doc(vec![]), &StagedAssets::default(), &opts());
        assert_eq!(plan.inputs.len(), 1);
        let spec = plan.inputs[0].args.join(" ");
        assert!(spec.contains("color=c=0x000000:s=1280x720:r=30:d=5.000"), "{spec}");
        assert_eq!(plan.video_map, "0:v");
        assert_eq!(plan.audio, AudioPlan::None);
        assert!(plan.filter_complex.is_empty());
    }

    #[test]
    fn single_video_anchors_and_maps_its_audio() {
        let d = doc(vec![item("v", ItemType::Video, Some("/uploads/v.mp4"), 0, 5000)]);
        let staged = staged_with(&[("/uploads/v.mp4", "/stage/uploads/v.mp4")]);
        let plan = build_plan(&d, &staged, &opts());
        assert_eq!(plan.inputs.len(), 1);
        assert!(plan.filter_complex.starts_with("[0:v]scale=640:360"));
        assert!(plan.filter_complex.ends_with("[base]"));
        assert_eq!(plan.video_map, "[base]");
        assert_eq!(plan.audio, AudioPlan::Stream(0));
    }

    #[test]
    fn image_overlay_is_gated_by_display_window() {
        let d = doc(vec![
            item("v", ItemType::Video, Some("/uploads/v.mp4"), 0, 5000),
            item("logo", ItemType::Image, Some("/uploads/logo.png"), 1000, 3000),
        ]);
        let staged = staged_with(&[
            ("/uploads/v.mp4", "/stage/uploads/v.mp4"),
            ("/uploads/logo.png", "/stage/uploads/logo.png"),
        ]);
        let plan = build_plan(&d, &staged, &opts());
        assert_eq!(plan.inputs.len(), 2);
        // image input loops for the whole clip
        assert!(plan.inputs[1].args.join(" ").starts_with("-loop 1 -t 5.000"));
        assert!(plan
            .filter_complex
            .contains("overlay=0:0:enable='between(t,1.000,3.000)'"));
        assert_eq!(plan.video_map, "[vout]");
    }

    #[test]
    fn remote_sources_are_dropped() {
        let d = doc(vec![item(
            "r",
            ItemType::Image,
            Some("https://cdn.example.com/x.png"),
            0,
            5000,
        )]);
        let mut staged = StagedAssets::default();
        staged.remote.insert(
            "https://cdn.example.com/x.png".into(),
            "https://cdn.example.com/x.png".into(),
        );
        let plan = build_plan(&d, &staged, &opts());
        // degraded to the blank clip because nothing resolved locally
        assert!(plan.inputs[0].args.join(" ").contains("lavfi"));
    }

    #[test]
    fn negative_offset_crops_before_padding() {
        let mut it = item("i", ItemType::Image, Some("/uploads/i.png"), 0, 5000);
        it.details.left = -40.0;
        it.details.top = 10.0;
        let chain = item_chain(&it, 0, "v0", &opts()).unwrap();
        let rendered = chain.render();
        let crop_at = rendered.find("crop=600:360:40:0").expect(&rendered);
        let pad_at = rendered.find("pad=1280:720:0:10").expect(&rendered);
        assert!(crop_at < pad_at);
    }

    #[test]
    fn fully_offscreen_item_is_dropped() {
        let mut it = item("i", ItemType::Image, Some("/uploads/i.png"), 0, 5000);
        it.details.left = -2000.0;
        assert!(item_chain(&it, 0, "v0", &opts()).is_none());
    }

    #[test]
    fn chain_order_is_fixed() {
        let mut it = item("i", ItemType::Image, Some("/uploads/i.png"), 0, 5000);
        it.details.chroma_key = Some("#00ff00".into());
        it.details.opacity = Some(50.0);
        it.details.brightness = Some(120.0);
        it.details.blur = 3.0;
        it.details.rotate = Some("90deg".into());
        it.details.flip_x = true;
        let rendered = item_chain(&it, 0, "v0", &opts()).unwrap().render();
        let order = [
            "colorkey", "scale", "colorchannelmixer", "eq=", "boxblur", "rotate", "hflip", "pad",
        ];
        let mut last = 0;
        for token in order {
            let at = rendered.find(token).unwrap_or_else(|| panic!("{token} in {rendered}"));
            assert!(at >= last, "{token} out of order in {rendered}");
            last = at;
        }
    }

    #[test]
    fn to_args_places_codec_flags_for_mp4() {
        let plan = build_plan(&doc(vec![]), &StagedAssets::default(), &opts());
        let args = plan.to_args(Path::new("/out/render.mp4"));
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-crf 26"));
        assert!(joined.contains("-preset faster"));
        assert!(joined.contains("-t 5.000"));
        assert!(joined.ends_with("/out/render.mp4"));
    }

    #[test]
    fn webm_uses_vp9_without_preset() {
        let mut o = opts();
        o.format = crate::OutputFormat::Webm;
        let plan = build_plan(&doc(vec![]), &StagedAssets::default(), &o);
        let joined = plan.to_args(Path::new("/out/render.webm")).join(" ");
        assert!(joined.contains("-c:v libvpx-vp9"));
        assert!(joined.contains("-cpu-used 4"));
        assert!(!joined.contains("-preset"));
    }

}
