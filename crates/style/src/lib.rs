//! Pure style/transform compiler shared by the live preview and the offline
//! render backends. Every function here is a deterministic function of the
//! item's `details` (plus an optional crop rectangle); no I/O, no state. If
//! the preview and the final render ever use different formulas the output
//! visibly diverges, so both backends call into this crate instead of
//! carrying their own copies.

use serde::{Deserialize, Serialize};
use timeline::{CropRect, ItemDetails};

/// Visual parameters of an item's outer container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStyle {
    /// Flip matrices concatenated with the declared transform string.
    pub transform: String,
    /// Opacity normalized to 0.0-1.0 from the editor's 0-100 scale.
    pub opacity: f64,
    /// CSS-style filter string, brightness then blur.
    pub filter: String,
    pub top: f64,
    pub left: f64,
    /// Rotation passed through as a degree string.
    pub rotate: String,
    pub width: f64,
    pub height: f64,
}

/// Placement of the media box inside its container once a crop rectangle is
/// applied. Cropping over-sizes the media and offsets it negatively rather
/// than clipping coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBox {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    /// Corner radius as a percentage of the smaller box edge.
    pub border_radius_pct: f64,
}

/// Resolved text styling for a text item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: f64,
    pub font_weight: String,
    pub font_style: String,
    pub line_height: f64,
    pub letter_spacing: f64,
    pub text_align: String,
    pub color: String,
    pub background_color: Option<String>,
    pub text_decoration: String,
    /// Stroke ring plus drop shadow, as a shadow list.
    pub text_shadow: String,
}

pub fn container_style(details: &ItemDetails) -> ContainerStyle {
    let mut transform = String::new();
    if details.flip_x {
        transform.push_str("scaleX(-1)");
    }
    if details.flip_y {
        if !transform.is_empty() {
            transform.push(' ');
        }
        transform.push_str("scaleY(-1)");
    }
    if let Some(declared) = details.transform.as_deref() {
        if !declared.is_empty() {
            if !transform.is_empty() {
                transform.push(' ');
            }
            transform.push_str(declared);
        }
    }
    if transform.is_empty() {
        transform.push_str("none");
    }

    ContainerStyle {
        transform,
        opacity: details.opacity_or_default() / 100.0,
        filter: format!(
            "brightness({}%) blur({}px)",
            fmt_num(details.brightness_or_default()),
            fmt_num(details.blur)
        ),
        top: details.top,
        left: details.left,
        rotate: details.rotate.clone().unwrap_or_else(|| "0deg".into()),
        width: details.width.unwrap_or(0.0),
        height: details.height.unwrap_or(0.0),
    }
}

pub fn media_box(details: &ItemDetails, crop: Option<&CropRect>) -> MediaBox {
    match crop {
        Some(c) => MediaBox {
            top: -c.y,
            left: -c.x,
            width: c.width,
            height: c.height,
            border_radius_pct: radius_pct(details.border_radius, c.width, c.height),
        },
        None => {
            let width = details.width.unwrap_or(0.0);
            let height = details.height.unwrap_or(0.0);
            MediaBox {
                top: 0.0,
                left: 0.0,
                width,
                height,
                border_radius_pct: radius_pct(details.border_radius, width, height),
            }
        }
    }
}

/// Border ring and drop shadow of a media item, as a box-shadow list. The
/// border is a zero-offset zero-blur ring whose spread is the border width.
pub fn border_shadow(details: &ItemDetails) -> String {
    let mut parts = Vec::new();
    if details.border_width > 0.0 {
        let color = details.border_color.as_deref().unwrap_or("#000000");
        parts.push(format!("0 0 0 {}px {}", fmt_num(details.border_width), color));
    }
    if let Some(shadow) = &details.box_shadow {
        parts.push(format!(
            "{}px {}px {}px {}",
            fmt_num(shadow.x),
            fmt_num(shadow.y),
            fmt_num(shadow.blur),
            shadow.color
        ));
    }
    parts.join(", ")
}

pub fn text_style(details: &ItemDetails) -> TextStyle {
    let mut shadow_parts = Vec::new();
    if let Some(stroke) = &details.stroke {
        if stroke.width > 0.0 {
            shadow_parts.push(format!("0 0 0 {}px {}", fmt_num(stroke.width), stroke.color));
        }
    }
    if let Some(shadow) = &details.box_shadow {
        shadow_parts.push(format!(
            "{}px {}px {}px {}",
            fmt_num(shadow.x),
            fmt_num(shadow.y),
            fmt_num(shadow.blur),
            shadow.color
        ));
    }

    TextStyle {
        font_family: details.font_family.clone().unwrap_or_else(|| "Arial".into()),
        font_size: details.font_size.unwrap_or(16.0),
        font_weight: details.font_weight.clone().unwrap_or_else(|| "normal".into()),
        font_style: details.font_style.clone().unwrap_or_else(|| "normal".into()),
        line_height: details.line_height.unwrap_or(1.2),
        letter_spacing: details.letter_spacing.unwrap_or(0.0),
        text_align: details.text_align.clone().unwrap_or_else(|| "left".into()),
        color: details.color.clone().unwrap_or_else(|| "#ffffff".into()),
        background_color: details.background_color.clone(),
        text_decoration: details
            .text_decoration
            .clone()
            .unwrap_or_else(|| "none".into()),
        text_shadow: shadow_parts.join(", "),
    }
}

/// Uniform scale factor of a declared `scale(x)` transform; 1.0 when the
/// transform declares none. Both render backends parse through here so they
/// agree with the preview.
pub fn scale_factor(transform: Option<&str>) -> f64 {
    let Some(t) = transform else { return 1.0 };
    let Some(start) = t.find("scale(") else { return 1.0 };
    let rest = &t[start + "scale(".len()..];
    let Some(end) = rest.find(')') else { return 1.0 };
    rest[..end]
        .split(',')
        .next()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(1.0)
}

/// Rotation in degrees from a declared `"45deg"` string.
pub fn rotation_deg(rotate: Option<&str>) -> f64 {
    rotate
        .and_then(|r| r.trim_end_matches("deg").trim().parse().ok())
        .unwrap_or(0.0)
}

fn radius_pct(radius: f64, width: f64, height: f64) -> f64 {
    let smaller = width.min(height);
    if smaller <= 0.0 {
        return 0.0;
    }
    radius / smaller * 100.0
}

/// Trim trailing zeros so `100.0` prints as `100` and `2.5` stays `2.5`,
/// matching the editor's serialization of these strings.
fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeline::{CropRect, ItemDetails, Shadow, Stroke};

    fn base_details() -> ItemDetails {
        ItemDetails {
            width: Some(640.0),
            height: Some(360.0),
            top: 12.0,
            left: -8.0,
            transform: Some("scale(1.5)".into()),
            rotate: Some("45deg".into()),
            opacity: Some(80.0),
            blur: 2.5,
            brightness: Some(110.0),
            flip_x: true,
            ..ItemDetails::default()
        }
    }

    #[test]
    fn container_combines_flip_and_declared_transform() {
        let style = container_style(&base_details());
        assert_eq!(style.transform, "scaleX(-1) scale(1.5)");
        assert_eq!(style.opacity, 0.8);
        assert_eq!(style.filter, "brightness(110%) blur(2.5px)");
        assert_eq!(style.rotate, "45deg");
        assert_eq!((style.top, style.left), (12.0, -8.0));
    }

    #[test]
    fn container_defaults_when_nothing_declared() {
        let style = container_style(&ItemDetails::default());
        assert_eq!(style.transform, "none");
        assert_eq!(style.opacity, 1.0);
        assert_eq!(style.filter, "brightness(100%) blur(0px)");
        assert_eq!(style.rotate, "0deg");
    }

    #[test]
    fn crop_offsets_negatively_and_sizes_to_crop() {
        let mut details = base_details();
        details.border_radius = 20.0;
        let crop = CropRect { x: 100.0, y: 50.0, width: 400.0, height: 200.0 };
        let bx = media_box(&details, Some(&crop));
        assert_eq!((bx.top, bx.left), (-50.0, -100.0));
        assert_eq!((bx.width, bx.height), (400.0, 200.0));
        // radius relative to the smaller crop edge
        assert_eq!(bx.border_radius_pct, 10.0);
    }

    #[test]
    fn border_is_zero_spread_ring_concatenated_with_shadow() {
        let mut details = ItemDetails::default();
        details.border_width = 3.0;
        details.border_color = Some("#ff0000".into());
        details.box_shadow = Some(Shadow { x: 4.0, y: 6.0, blur: 10.0, color: "#00000080".into() });
        assert_eq!(
            border_shadow(&details),
            "0 0 0 3px #ff0000, 4px 6px 10px #00000080"
        );
    }

    #[test]
    fn text_stroke_becomes_shadow_ring() {
        let mut details = ItemDetails::default();
        details.stroke = Some(Stroke { width: 2.0, color: "#000000".into() });
        details.box_shadow = Some(Shadow { x: 1.0, y: 1.0, blur: 2.0, color: "#333333".into() });
        let style = text_style(&details);
        assert_eq!(style.text_shadow, "0 0 0 2px #000000, 1px 1px 2px #333333");
        assert_eq!(style.font_size, 16.0);
    }

    #[test]
    fn scale_and_rotation_parse_declared_strings() {
        assert_eq!(scale_factor(Some("scale(1.5)")), 1.5);
        assert_eq!(scale_factor(Some("scale(2, 3)")), 2.0);
        assert_eq!(scale_factor(Some("translate(1px)")), 1.0);
        assert_eq!(scale_factor(None), 1.0);
        assert_eq!(rotation_deg(Some("45deg")), 45.0);
        assert_eq!(rotation_deg(Some("junk")), 0.0);
        assert_eq!(rotation_deg(None), 0.0);
    }

    #[test]
    fn compiler_is_pure() {
        let details = base_details();
        let crop = CropRect { x: 1.0, y: 2.0, width: 3.0, height: 4.0 };
        assert_eq!(container_style(&details), container_style(&details));
        assert_eq!(media_box(&details, Some(&crop)), media_box(&details, Some(&crop)));
        assert_eq!(text_style(&details), text_style(&details));
        assert_eq!(border_shadow(&details), border_shadow(&details));
    }
}
