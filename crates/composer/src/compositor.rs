use base64::Engine;
use image::{imageops, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use media::MediaInfo;
use timeline::{frame_to_ms, ItemType, TimelineDocument, TrackItem};

use crate::bundle::BundleManifest;

/// Renders single frames of a bundled composition on the CPU.
///
/// Every source URI resolves through the bundle manifest's asset map, either
/// to a file under the asset root or to a remote URL fetched at render time.
/// Item visibility, placement and visual parameters all come from the same
/// `timeline`/`style` functions the preview uses. Per-item failures (missing
/// asset, undecodable image, absent font) skip the item and leave the rest
/// of the frame intact.
pub struct FrameCompositor<'a> {
    manifest: &'a BundleManifest,
    asset_root: &'a Path,
    /// Flattened group render order.
    order: Vec<&'a TrackItem>,
    background: Rgba<u8>,
    http: Option<reqwest::blocking::Client>,
    image_cache: Mutex<HashMap<String, Arc<RgbaImage>>>,
    font_cache: Mutex<HashMap<String, Arc<fontdue::Font>>>,
    probe_cache: Mutex<HashMap<String, Option<MediaInfo>>>,
}

/// Where a source URI lives after manifest resolution.
enum Source {
    Local(PathBuf),
    Remote(String),
}

impl<'a> FrameCompositor<'a> {
    pub fn new(manifest: &'a BundleManifest, asset_root: &'a Path) -> Self {
        let doc = &manifest.composition;
        let order = timeline::group_track_items(doc)
            .into_iter()
            .flat_map(|g| g.item_ids)
            .filter_map(|id| doc.track_items_map.get(&id))
            .collect();
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .ok();
        Self {
            manifest,
            asset_root,
            order,
            background: parse_color(&doc.background.value),
            http,
            image_cache: Mutex::new(HashMap::new()),
            font_cache: Mutex::new(HashMap::new()),
            probe_cache: Mutex::new(HashMap::new()),
        }
    }

    fn doc(&self) -> &'a TimelineDocument {
        &self.manifest.composition
    }

    pub fn render_frame(&self, index: i64) -> RgbaImage {
        let doc = self.doc();
        let t_ms = frame_to_ms(index, doc.fps);
        let mut canvas =
            RgbaImage::from_pixel(doc.size.width, doc.size.height, self.background);
        for &item in &self.order {
            if !item.display.contains_ms(t_ms) {
                continue;
            }
            match item.item_type {
                ItemType::Image => self.draw_image(&mut canvas, item),
                ItemType::Video => self.draw_video(&mut canvas, item, t_ms),
                ItemType::Text => self.draw_text(&mut canvas, item),
                ItemType::Audio => {}
            }
        }
        canvas
    }

    fn draw_image(&self, canvas: &mut RgbaImage, item: &TrackItem) {
        let Some(sprite) = self.load_image(item) else {
            return;
        };
        let (sprite, offset) = transform_sprite((*sprite).clone(), item);
        blit(canvas, &sprite, item, offset);
    }

    fn draw_video(&self, canvas: &mut RgbaImage, item: &TrackItem, t_ms: f64) {
        let Some(src) = item.details.src.as_deref() else {
            return;
        };
        let location = match self.resolve_source(src) {
            Some(Source::Local(path)) => path,
            // ffmpeg reads http inputs directly; remote media is never staged
            Some(Source::Remote(url)) => PathBuf::from(url),
            None => {
                debug!(item = %item.id, src, "video source unresolved, skipping");
                return;
            }
        };
        let info = self.media_info(src, &location);
        let mut source_seconds = item.source_time_ms(t_ms) / 1000.0;
        // Seeking past the end of the file yields no frame at all, so clamp
        // to the probed duration when one is known.
        if let Some(duration) = info.as_ref().and_then(|i| i.duration_seconds) {
            source_seconds = source_seconds.min((duration - 0.05).max(0.0));
        }
        let scale = extract_scale(item, info.as_ref());
        match media::extract_frame(&location, source_seconds, scale) {
            Ok(png) => match image::load_from_memory(&png) {
                Ok(img) => {
                    let (sprite, offset) = transform_sprite(img.to_rgba8(), item);
                    blit(canvas, &sprite, item, offset);
                }
                Err(e) => debug!(item = %item.id, error = %e, "undecodable video frame"),
            },
            Err(e) => debug!(item = %item.id, error = %e, "video frame extraction failed"),
        }
    }

    fn draw_text(&self, canvas: &mut RgbaImage, item: &TrackItem) {
        let Some(text) = item.details.text.as_deref() else {
            return;
        };
        let Some(font) = self.load_font(item) else {
            warn!(item = %item.id, "no usable font for text item, skipping");
            return;
        };
        let ts = style::text_style(&item.details);
        let color = parse_color(&ts.color);
        let px = ts.font_size as f32;
        let metrics = font
            .horizontal_line_metrics(px)
            .map(|m| m.ascent)
            .unwrap_or(px);
        let origin_x = item.details.left;
        let mut baseline = item.details.top + metrics as f64;

        for line in text.lines() {
            let mut x = origin_x;
            for ch in line.chars() {
                let (m, bitmap) = font.rasterize(ch, px);
                blend_glyph(
                    canvas,
                    &bitmap,
                    m.width,
                    m.height,
                    x + m.xmin as f64,
                    baseline - m.ymin as f64 - m.height as f64,
                    color,
                );
                x += m.advance_width as f64 + ts.letter_spacing;
            }
            baseline += ts.font_size * ts.line_height;
        }
    }

    fn load_image(&self, item: &TrackItem) -> Option<Arc<RgbaImage>> {
        let src = item.details.src.as_deref()?;
        if let Some(cached) = self.image_cache.lock().get(src) {
            return Some(cached.clone());
        }
        let decoded = if src.starts_with("data:") {
            decode_data_uri(src).and_then(|bytes| image::load_from_memory(&bytes).ok())
        } else {
            match self.resolve_source(src) {
                Some(Source::Local(path)) => image::open(path).ok(),
                Some(Source::Remote(url)) => self
                    .fetch(&url)
                    .and_then(|bytes| image::load_from_memory(&bytes).ok()),
                None => None,
            }
        };
        match decoded {
            Some(img) => {
                let img = Arc::new(img.to_rgba8());
                self.image_cache.lock().insert(src.to_string(), img.clone());
                Some(img)
            }
            None => {
                debug!(item = %item.id, src, "image source unresolved, skipping");
                None
            }
        }
    }

    fn load_font(&self, item: &TrackItem) -> Option<Arc<fontdue::Font>> {
        let url = item.details.font_url.as_deref()?;
        if let Some(cached) = self.font_cache.lock().get(url) {
            return Some(cached.clone());
        }
        let bytes = match self.resolve_source(url)? {
            Source::Local(path) => std::fs::read(path).ok()?,
            Source::Remote(remote) => self.fetch(&remote)?,
        };
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default()).ok()?;
        let font = Arc::new(font);
        self.font_cache.lock().insert(url.to_string(), font.clone());
        Some(font)
    }

    fn media_info(&self, src: &str, location: &Path) -> Option<MediaInfo> {
        if let Some(cached) = self.probe_cache.lock().get(src) {
            return cached.clone();
        }
        let info = match media::probe_media(location) {
            Ok(info) => Some(info),
            Err(e) => {
                debug!(src, error = %e, "probe failed, frame sizing and seek clamp unavailable");
                None
            }
        };
        self.probe_cache.lock().insert(src.to_string(), info.clone());
        info
    }

    fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        let client = self.http.as_ref()?;
        match client.get(url).send().and_then(|r| r.error_for_status()) {
            Ok(resp) => resp.bytes().ok().map(|b| b.to_vec()),
            Err(e) => {
                debug!(url, error = %e, "remote fetch failed");
                None
            }
        }
    }

    /// Sources resolve through the bundle manifest's asset map: staged
    /// entries are paths relative to the asset root, remote entries pass
    /// through as absolute URLs.
    fn resolve_source(&self, src: &str) -> Option<Source> {
        let mapped = self.manifest.assets.get(src)?;
        if mapped.starts_with("http://") || mapped.starts_with("https://") {
            debug!(src, "resolved as remote url");
            Some(Source::Remote(mapped.clone()))
        } else {
            let path = self.asset_root.join(mapped);
            debug!(src, path = %path.display(), "resolved via bundled copy");
            Some(Source::Local(path))
        }
    }
}

/// Target extraction size for a video frame: the item's declared box (or the
/// probed source dimensions) times the declared scale. Skipped when a source
/// crop is declared, since crop coordinates address unscaled pixels.
fn extract_scale(item: &TrackItem, info: Option<&MediaInfo>) -> Option<(u32, u32)> {
    if item.details.crop.is_some() {
        return None;
    }
    let sf = style::scale_factor(item.details.transform.as_deref());
    let w = item
        .details
        .width
        .or(info.and_then(|i| i.width).map(f64::from))?;
    let h = item
        .details
        .height
        .or(info.and_then(|i| i.height).map(f64::from))?;
    Some((
        ((w * sf).round() as u32).max(1),
        ((h * sf).round() as u32).max(1),
    ))
}

/// Apply the item's visual parameters in the same order as the codec filter
/// chain: crop, scale, opacity, brightness, blur, rotation, flips. Returns
/// the sprite plus the placement offset that keeps a rotated sprite centered
/// on its unrotated bounding box.
fn transform_sprite(mut sprite: RgbaImage, item: &TrackItem) -> (RgbaImage, (i64, i64)) {
    let details = &item.details;

    if let Some(crop) = &details.crop {
        let x = crop.x.max(0.0) as u32;
        let y = crop.y.max(0.0) as u32;
        if x < sprite.width() && y < sprite.height() {
            let w = (crop.width as u32).min(sprite.width() - x).max(1);
            let h = (crop.height as u32).min(sprite.height() - y).max(1);
            sprite = imageops::crop_imm(&sprite, x, y, w, h).to_image();
        }
    }

    let scale = style::scale_factor(details.transform.as_deref());
    let target_w = details.width.unwrap_or(sprite.width() as f64) * scale;
    let target_h = details.height.unwrap_or(sprite.height() as f64) * scale;
    let target_w = (target_w.round() as u32).max(1);
    let target_h = (target_h.round() as u32).max(1);
    if (target_w, target_h) != (sprite.width(), sprite.height()) {
        sprite = imageops::resize(&sprite, target_w, target_h, imageops::FilterType::Triangle);
    }

    let opacity = details.opacity_or_default() / 100.0;
    if opacity < 1.0 {
        let alpha = opacity.clamp(0.0, 1.0);
        for px in sprite.pixels_mut() {
            px.0[3] = ((px.0[3] as f64) * alpha).round() as u8;
        }
    }

    let brightness = details.brightness_or_default();
    if brightness != 100.0 {
        let factor = (brightness / 100.0).max(0.0);
        for px in sprite.pixels_mut() {
            for c in 0..3 {
                px.0[c] = ((px.0[c] as f64) * factor).round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    if details.blur > 0.0 {
        sprite = imageops::blur(&sprite, details.blur as f32);
    }

    let mut offset = (0i64, 0i64);
    let rotation = style::rotation_deg(details.rotate.as_deref());
    if rotation != 0.0 {
        let (pw, ph) = (sprite.width() as i64, sprite.height() as i64);
        sprite = rotate_sprite(&sprite, rotation);
        offset = (
            (pw - sprite.width() as i64) / 2,
            (ph - sprite.height() as i64) / 2,
        );
    }

    if details.flip_x {
        sprite = imageops::flip_horizontal(&sprite);
    }
    if details.flip_y {
        sprite = imageops::flip_vertical(&sprite);
    }

    (sprite, offset)
}

fn blit(canvas: &mut RgbaImage, sprite: &RgbaImage, item: &TrackItem, offset: (i64, i64)) {
    let x = item.details.left.round() as i64 + offset.0;
    let y = item.details.top.round() as i64 + offset.1;
    imageops::overlay(canvas, sprite, x, y);
}

/// Nearest-neighbor rotation around the sprite center into a bounding box
/// large enough for any angle.
fn rotate_sprite(sprite: &RgbaImage, degrees: f64) -> RgbaImage {
    let rad = degrees.to_radians();
    let (sin, cos) = rad.sin_cos();
    let (w, h) = (sprite.width() as f64, sprite.height() as f64);
    // the epsilon keeps right-angle rotations from ceiling up a pixel
    let out_w = (w * cos.abs() + h * sin.abs() - 1e-6).ceil().max(1.0) as u32;
    let out_h = (w * sin.abs() + h * cos.abs() - 1e-6).ceil().max(1.0) as u32;
    let (cx, cy) = (w / 2.0, h / 2.0);
    let (ocx, ocy) = (out_w as f64 / 2.0, out_h as f64 / 2.0);

    let mut out = RgbaImage::new(out_w, out_h);
    for oy in 0..out_h {
        for ox in 0..out_w {
            // inverse-map the output pixel back into the source
            let dx = ox as f64 + 0.5 - ocx;
            let dy = oy as f64 + 0.5 - ocy;
            let sx = dx * cos + dy * sin + cx;
            let sy = -dx * sin + dy * cos + cy;
            if sx >= 0.0 && sy >= 0.0 && sx < w && sy < h {
                out.put_pixel(ox, oy, *sprite.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    out
}

fn blend_glyph(
    canvas: &mut RgbaImage,
    coverage: &[u8],
    width: usize,
    height: usize,
    left: f64,
    top: f64,
    color: Rgba<u8>,
) {
    for gy in 0..height {
        for gx in 0..width {
            let a = coverage[gy * width + gx] as u32;
            if a == 0 {
                continue;
            }
            let cx = left + gx as f64;
            let cy = top + gy as f64;
            if cx < 0.0 || cy < 0.0 || cx >= canvas.width() as f64 || cy >= canvas.height() as f64
            {
                continue;
            }
            let px = canvas.get_pixel_mut(cx as u32, cy as u32);
            let a = a * color.0[3] as u32 / 255;
            for c in 0..3 {
                let src = color.0[c] as u32;
                let dst = px.0[c] as u32;
                px.0[c] = ((src * a + dst * (255 - a)) / 255) as u8;
            }
            px.0[3] = px.0[3].max(a as u8);
        }
    }
}

/// Parse `#rgb` / `#rgba` / `#rrggbb` / `#rrggbbaa` (black on anything
/// unparseable).
pub fn parse_color(value: &str) -> Rgba<u8> {
    let hex = value.trim_start_matches('#');
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2).unwrap_or("00"), 16).unwrap_or(0);
    // shorthand digits expand by duplication, per CSS
    let nibble =
        |i: usize| u8::from_str_radix(hex.get(i..i + 1).unwrap_or("0"), 16).unwrap_or(0) * 0x11;
    match hex.len() {
        3 => Rgba([nibble(0), nibble(1), nibble(2), 255]),
        4 => Rgba([nibble(0), nibble(1), nibble(2), nibble(3)]),
        6 => Rgba([channel(0), channel(2), channel(4), 255]),
        8 => Rgba([channel(0), channel(2), channel(4), channel(6)]),
        _ => Rgba([0, 0, 0, 255]),
    }
}

fn decode_data_uri(src: &str) -> Option<Vec<u8>> {
    let (_, payload) = src.split_once(";base64,")?;
    base64::engine::general_purpose::STANDARD.decode(payload).ok()
}
