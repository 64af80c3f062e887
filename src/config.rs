use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BarwaveError, BarwaveResult};
use crate::render::color::Rgba;
use crate::render::geometry::BarGeometry;

/// Largest accepted canvas side in pixels.
pub const MAX_CANVAS_SIDE: u32 = 8192;

/// Complete per-job configuration. Every section and field has a default;
/// unknown keys are rejected when loading.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VisualizerConfig {
    #[serde(default)]
    pub renderer: RendererKind,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub bars: BarsConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub envelope: EnvelopeConfig,
    #[serde(default)]
    pub colors: ColorConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    #[default]
    Linear,
    Ring,
}

/// Bar and segment geometry, in pixels unless noted.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BarsConfig {
    #[serde(default = "default_bar_count")]
    pub count: usize,
    #[serde(default = "default_bar_width")]
    pub width: u32,
    #[serde(default = "default_bar_gap")]
    pub gap: u32,
    #[serde(default = "default_segment_height")]
    pub segment_height: u32,
    #[serde(default = "default_segment_gap")]
    pub segment_gap: u32,
    #[serde(default = "default_corner_radius")]
    pub corner_radius: f32,
    /// Maximum bar length as a fraction of the canvas height (linear) or of
    /// half the shorter canvas side (ring).
    #[serde(default = "default_height_ratio")]
    pub height_ratio: f32,
    /// Distance of the bar baseline from the bottom edge, fraction of height.
    #[serde(default = "default_bottom_margin_ratio")]
    pub bottom_margin_ratio: f32,
    #[serde(default)]
    pub layout: Layout,
    /// Inner ring radius as a fraction of the shorter canvas side.
    #[serde(default = "default_ring_radius_ratio")]
    pub ring_radius_ratio: f32,
    #[serde(default)]
    pub static_bottom_segment: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudeScale {
    #[default]
    Decibel,
    Linear,
    Sqrt,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    #[serde(default = "default_min_freq")]
    pub min_freq: f32,
    #[serde(default = "default_max_freq")]
    pub max_freq: f32,
    /// Exponent of the frequency-to-bar curve; 1.0 is linear, larger values
    /// give the low bars narrower bands.
    #[serde(default = "default_frequency_curve")]
    pub frequency_curve: f32,
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,
    #[serde(default)]
    pub scale: AmplitudeScale,
    /// Level mapped to zero height when `scale = "decibel"`.
    #[serde(default = "default_db_floor")]
    pub db_floor: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SilencePolicy {
    /// Bars fall at the decay rate like any other quiet passage.
    #[default]
    Decay,
    /// Bars and peaks drop to zero on the first fully silent frame.
    Cut,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PeakHoldConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds the marker stays put after a new peak.
    #[serde(default = "default_hold_time")]
    pub hold_time: f32,
    /// Full-scale units per second once the hold expires.
    #[serde(default = "default_fall_rate")]
    pub fall_rate: f32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EnvelopeConfig {
    /// Seconds to rise across the full scale. Zero is instant.
    #[serde(default = "default_attack_time")]
    pub attack_time: f32,
    /// Seconds to fall across the full scale. Zero is instant.
    #[serde(default = "default_decay_time")]
    pub decay_time: f32,
    #[serde(default = "default_noise_gate")]
    pub noise_gate: f32,
    #[serde(default)]
    pub silence: SilencePolicy,
    #[serde(default)]
    pub peak_hold: PeakHoldConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ColorConfig {
    /// Fill used when no background image is supplied.
    #[serde(default = "default_background")]
    pub background: Rgba,
    #[serde(default = "default_bar_color")]
    pub bar: Rgba,
    #[serde(default = "default_peak_color")]
    pub peak: Rgba,
    /// Evenly spaced stops from the bottom to the top of a bar. Overrides
    /// `bar` when non-empty.
    #[serde(default)]
    pub gradient: Vec<Rgba>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TextConfig {
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_artist_color")]
    pub artist_color: Rgba,
    #[serde(default = "default_title_color")]
    pub title_color: Rgba,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    /// Path to a TTF/OTF file.
    #[serde(default)]
    pub font: Option<PathBuf>,
    #[serde(default)]
    pub font_url: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EncoderConfig {
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,
    /// Ignored when `bitrate` is set.
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RendererKind {
    #[default]
    Raster,
    Shader,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

impl Default for BarsConfig {
    fn default() -> Self {
        Self {
            count: default_bar_count(),
            width: default_bar_width(),
            gap: default_bar_gap(),
            segment_height: default_segment_height(),
            segment_gap: default_segment_gap(),
            corner_radius: default_corner_radius(),
            height_ratio: default_height_ratio(),
            bottom_margin_ratio: default_bottom_margin_ratio(),
            layout: Layout::default(),
            ring_radius_ratio: default_ring_radius_ratio(),
            static_bottom_segment: false,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_freq: default_min_freq(),
            max_freq: default_max_freq(),
            frequency_curve: default_frequency_curve(),
            sensitivity: default_sensitivity(),
            scale: AmplitudeScale::default(),
            db_floor: default_db_floor(),
        }
    }
}

impl Default for PeakHoldConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hold_time: default_hold_time(),
            fall_rate: default_fall_rate(),
        }
    }
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack_time: default_attack_time(),
            decay_time: default_decay_time(),
            noise_gate: default_noise_gate(),
            silence: SilencePolicy::default(),
            peak_hold: PeakHoldConfig::default(),
        }
    }
}

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            background: default_background(),
            bar: default_bar_color(),
            peak: default_peak_color(),
            gradient: Vec::new(),
        }
    }
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            artist: None,
            title: None,
            artist_color: default_artist_color(),
            title_color: default_title_color(),
            font_size: default_font_size(),
            font: None,
            font_url: None,
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            codec: default_codec(),
            pix_fmt: default_pix_fmt(),
            crf: default_crf(),
            preset: default_preset(),
            bitrate: None,
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

fn default_width() -> u32 { 1920 }
fn default_height() -> u32 { 1080 }
fn default_fps() -> u32 { 30 }
fn default_bar_count() -> usize { 48 }
fn default_bar_width() -> u32 { 24 }
fn default_bar_gap() -> u32 { 8 }
fn default_segment_height() -> u32 { 10 }
fn default_segment_gap() -> u32 { 4 }
fn default_corner_radius() -> f32 { 2.0 }
fn default_height_ratio() -> f32 { 0.45 }
fn default_bottom_margin_ratio() -> f32 { 0.1 }
fn default_ring_radius_ratio() -> f32 { 0.18 }
fn default_min_freq() -> f32 { 30.0 }
fn default_max_freq() -> f32 { 16_000.0 }
fn default_frequency_curve() -> f32 { 2.5 }
fn default_sensitivity() -> f32 { 1.0 }
fn default_db_floor() -> f32 { -60.0 }
fn default_true() -> bool { true }
fn default_hold_time() -> f32 { 0.4 }
fn default_fall_rate() -> f32 { 0.8 }
fn default_attack_time() -> f32 { 0.05 }
fn default_decay_time() -> f32 { 0.35 }
fn default_noise_gate() -> f32 { 0.05 }
fn default_background() -> Rgba { Rgba::rgb(11, 13, 18) }
fn default_bar_color() -> Rgba { Rgba::rgb(55, 198, 255) }
fn default_peak_color() -> Rgba { Rgba::rgb(255, 255, 255) }
fn default_artist_color() -> Rgba { Rgba::new(255, 255, 255, 180) }
fn default_title_color() -> Rgba { Rgba::rgb(255, 255, 255) }
fn default_font_size() -> f32 { 48.0 }
fn default_program() -> String { "ffmpeg".into() }
fn default_codec() -> String { "libx264".into() }
fn default_pix_fmt() -> String { "yuv420p".into() }
fn default_crf() -> u32 { 18 }
fn default_preset() -> String { "medium".into() }
fn default_audio_codec() -> String { "aac".into() }
fn default_audio_bitrate() -> String { "192k".into() }

impl VisualizerConfig {
    pub fn from_toml_str(content: &str) -> BarwaveResult<Self> {
        toml::from_str(content).map_err(|e| BarwaveError::input(format!("config: {e}")))
    }

    /// Checks every section once and returns the bar geometry the renderer
    /// will use. Nothing downstream re-validates.
    pub fn validate(&self) -> BarwaveResult<BarGeometry> {
        let out = &self.output;
        if out.width == 0 || out.height == 0 {
            return Err(BarwaveError::render_config("canvas width/height must be non-zero"));
        }
        if out.width % 2 != 0 || out.height % 2 != 0 {
            return Err(BarwaveError::render_config(
                "canvas width/height must be even (required for yuv420p output)",
            ));
        }
        if out.width > MAX_CANVAS_SIDE || out.height > MAX_CANVAS_SIDE {
            return Err(BarwaveError::render_config(format!(
                "canvas {}x{} exceeds the {MAX_CANVAS_SIDE}px limit",
                out.width, out.height
            )));
        }
        if out.fps == 0 {
            return Err(BarwaveError::input("fps must be non-zero"));
        }

        let a = &self.analysis;
        if !(a.min_freq >= 0.0 && a.max_freq > a.min_freq) || !a.max_freq.is_finite() {
            return Err(BarwaveError::input(format!(
                "frequency range {}..{} Hz is empty",
                a.min_freq, a.max_freq
            )));
        }
        if !(a.frequency_curve > 0.0) || !a.frequency_curve.is_finite() {
            return Err(BarwaveError::input("frequency_curve must be a positive number"));
        }
        if !(a.sensitivity > 0.0) || !a.sensitivity.is_finite() {
            return Err(BarwaveError::input("sensitivity must be a positive number"));
        }
        if a.scale == AmplitudeScale::Decibel && !(a.db_floor < 0.0 && a.db_floor.is_finite()) {
            return Err(BarwaveError::input("db_floor must be negative"));
        }

        let e = &self.envelope;
        for (name, v) in [
            ("attack_time", e.attack_time),
            ("decay_time", e.decay_time),
            ("peak_hold.hold_time", e.peak_hold.hold_time),
            ("peak_hold.fall_rate", e.peak_hold.fall_rate),
        ] {
            if !(v >= 0.0) || !v.is_finite() {
                return Err(BarwaveError::input(format!("{name} must be >= 0")));
            }
        }
        if !(0.0..1.0).contains(&e.noise_gate) {
            return Err(BarwaveError::input("noise_gate must be in [0, 1)"));
        }

        if !(self.text.font_size > 0.0) || !self.text.font_size.is_finite() {
            return Err(BarwaveError::input("text.font_size must be positive"));
        }

        BarGeometry::compute(self)
    }
}

pub fn load_config(path: &Path) -> BarwaveResult<VisualizerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))
        .map_err(|e| BarwaveError::input(format!("{e:#}")))?;
    VisualizerConfig::from_toml_str(&content)
}

/// Explicit path first, then `./barwave.toml`, then the per-user config dirs.
pub fn discover_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("barwave.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("barwave").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("barwave").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
