//! Typed filter-graph construction. Chains are assembled programmatically
//! and serialized to ffmpeg's `-filter_complex` text only at the boundary,
//! so escaping stays in one place and graphs are testable without spawning
//! a process.

use std::fmt::Write;

/// One filter node, e.g. `scale=1920:1080` or `overlay=0:0:enable='...'`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    name: String,
    args: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn render(&self) -> String {
        if self.args.is_empty() {
            self.name.clone()
        } else {
            format!("{}={}", self.name, self.args.join(":"))
        }
    }

    // Constructors for the filters the item chain uses, in the order the
    // chain applies them.

    pub fn chroma_key(color: &str, similarity: f64, blend: f64) -> Self {
        Filter::new("colorkey")
            .arg(color.replace('#', "0x"))
            .arg(format!("{similarity}"))
            .arg(format!("{blend}"))
    }

    pub fn scale(w: i64, h: i64) -> Self {
        Filter::new("scale").arg(format!("{w}")).arg(format!("{h}"))
    }

    /// Alpha mix; requires an alpha-capable pixel format first.
    pub fn format_rgba() -> Self {
        Filter::new("format").arg("rgba")
    }

    pub fn opacity(alpha: f64) -> Self {
        Filter::new("colorchannelmixer").arg(format!("aa={alpha}"))
    }

    /// Editor brightness is 0-200%; ffmpeg `eq` brightness is -1.0..1.0.
    pub fn brightness(percent: f64) -> Self {
        Filter::new("eq").arg(format!("brightness={}", percent / 100.0 - 1.0))
    }

    pub fn blur(radius: f64) -> Self {
        Filter::new("boxblur").arg(format!("{}", radius.max(0.0)))
    }

    pub fn rotate_deg(deg: f64) -> Self {
        Filter::new("rotate").arg(format!("{deg}*PI/180"))
    }

    pub fn hflip() -> Self {
        Filter::new("hflip")
    }

    pub fn vflip() -> Self {
        Filter::new("vflip")
    }

    pub fn crop(w: i64, h: i64, x: i64, y: i64) -> Self {
        Filter::new("crop")
            .arg(format!("{w}"))
            .arg(format!("{h}"))
            .arg(format!("{x}"))
            .arg(format!("{y}"))
    }

    pub fn pad(canvas_w: u32, canvas_h: u32, x: i64, y: i64) -> Self {
        Filter::new("pad")
            .arg(format!("{canvas_w}"))
            .arg(format!("{canvas_h}"))
            .arg(format!("{x}"))
            .arg(format!("{y}"))
            .arg("black@0".to_string())
    }

    pub fn setpts_rate(rate: f64) -> Self {
        Filter::new("setpts").arg(format!("PTS/{rate}"))
    }

    /// Overlay gated by the item's display window, in seconds.
    pub fn overlay(x: i64, y: i64, from_s: f64, to_s: f64) -> Self {
        Filter::new("overlay")
            .arg(format!("{x}"))
            .arg(format!("{y}"))
            .arg(format!("enable='between(t,{from_s:.3},{to_s:.3})'"))
    }

    pub fn volume(v: f64) -> Self {
        Filter::new("volume").arg(format!("{v}"))
    }
}

/// A linear run of filters between labeled pads.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterChain {
    pub inputs: Vec<String>,
    pub filters: Vec<Filter>,
    pub output: String,
}

impl FilterChain {
    pub fn new(inputs: Vec<String>, output: impl Into<String>) -> Self {
        Self { inputs, filters: Vec::new(), output: output.into() }
    }

    pub fn push(&mut self, filter: Filter) {
        self.filters.push(filter);
    }

    pub fn render(&self) -> String {
        let mut s = String::new();
        for input in &self.inputs {
            let _ = write!(s, "[{input}]");
        }
        let body = if self.filters.is_empty() {
            "null".to_string()
        } else {
            self.filters
                .iter()
                .map(Filter::render)
                .collect::<Vec<_>>()
                .join(",")
        };
        let _ = write!(s, "{body}[{}]", self.output);
        s
    }
}

/// The whole `-filter_complex` graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterGraph {
    chains: Vec<FilterChain>,
}

impl FilterGraph {
    pub fn push(&mut self, chain: FilterChain) {
        self.chains.push(chain);
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn render(&self) -> String {
        self.chains
            .iter()
            .map(FilterChain::render)
            .collect::<Vec<_>>()
            .join(";")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_renders_name_and_args() {
        assert_eq!(Filter::scale(1920, 1080).render(), "scale=1920:1080");
        assert_eq!(Filter::hflip().render(), "hflip");
        assert_eq!(
            Filter::chroma_key("#00ff00", 0.3, 0.1).render(),
            "colorkey=0x00ff00:0.3:0.1"
        );
    }

    #[test]
    fn brightness_maps_percent_to_eq_range() {
        assert_eq!(Filter::brightness(100.0).render(), "eq=brightness=0");
        assert_eq!(Filter::brightness(150.0).render(), "eq=brightness=0.5");
        assert_eq!(Filter::brightness(50.0).render(), "eq=brightness=-0.5");
    }

    #[test]
    fn overlay_quotes_enable_window() {
        assert_eq!(
            Filter::overlay(10, -5, 0.0, 2.5).render(),
            "overlay=10:-5:enable='between(t,0.000,2.500)'"
        );
    }

    #[test]
    fn chain_renders_labels_and_commas() {
        let mut chain = FilterChain::new(vec!["0:v".into()], "v0");
        chain.push(Filter::scale(640, 360));
        chain.push(Filter::format_rgba());
        chain.push(Filter::opacity(0.5));
        assert_eq!(
            chain.render(),
            "[0:v]scale=640:360,format=rgba,colorchannelmixer=aa=0.5[v0]"
        );
    }

    #[test]
    fn empty_chain_renders_null_passthrough() {
        let chain = FilterChain::new(vec!["0:v".into()], "v0");
        assert_eq!(chain.render(), "[0:v]null[v0]");
    }

    #[test]
    fn graph_joins_chains_with_semicolons() {
        let mut graph = FilterGraph::default();
        let mut a = FilterChain::new(vec!["0:v".into()], "v0");
        a.push(Filter::scale(100, 100));
        graph.push(a);
        let mut b = FilterChain::new(vec!["base".into(), "v0".into()], "out");
        b.push(Filter::overlay(0, 0, 0.0, 1.0));
        graph.push(b);
        assert_eq!(
            graph.render(),
            "[0:v]scale=100:100[v0];[base][v0]overlay=0:0:enable='between(t,0.000,1.000)'[out]"
        );
    }
}
