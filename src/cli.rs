use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use barwave::config::{Layout, RendererKind, VisualizerConfig};

#[derive(Parser, Debug)]
#[command(name = "barwave", about = "Render segmented spectrum bar videos from audio")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG, AAC)
    pub input: Option<PathBuf>,

    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    pub output: PathBuf,

    /// Background image, scaled to cover the canvas
    #[arg(long)]
    pub background: Option<PathBuf>,

    /// Config file (defaults to ./barwave.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Video width in pixels
    #[arg(long)]
    pub width: Option<u32>,

    /// Video height in pixels
    #[arg(long)]
    pub height: Option<u32>,

    /// Frames per second
    #[arg(long)]
    pub fps: Option<u32>,

    /// Number of bars
    #[arg(long)]
    pub bars: Option<usize>,

    /// Bar arrangement
    #[arg(long, value_enum)]
    pub layout: Option<LayoutArg>,

    /// Artist text overlay
    #[arg(long)]
    pub artist: Option<String>,

    /// Title text overlay
    #[arg(long)]
    pub title: Option<String>,

    /// Font file for the text overlay
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// FFmpeg video codec
    #[arg(long)]
    pub codec: Option<String>,

    /// H.264 CRF quality (0-51, lower = better). Ignored when --bitrate is set.
    #[arg(long)]
    pub crf: Option<u32>,

    /// Video bitrate (e.g. 2400k, 5M). When set, uses -b:v instead of -crf.
    #[arg(short, long)]
    pub bitrate: Option<String>,

    /// Rendering backend
    #[arg(long, value_enum)]
    pub renderer: Option<RendererArg>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,

    /// Print the final job status as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum LayoutArg {
    Linear,
    Ring,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum RendererArg {
    Raster,
    Shader,
}

impl Cli {
    /// Flags that were given win over the config file.
    pub fn apply(&self, cfg: &mut VisualizerConfig) {
        if let Some(v) = self.width {
            cfg.output.width = v;
        }
        if let Some(v) = self.height {
            cfg.output.height = v;
        }
        if let Some(v) = self.fps {
            cfg.output.fps = v;
        }
        if let Some(v) = self.bars {
            cfg.bars.count = v;
        }
        if let Some(v) = self.layout {
            cfg.bars.layout = match v {
                LayoutArg::Linear => Layout::Linear,
                LayoutArg::Ring => Layout::Ring,
            };
        }
        if self.artist.is_some() {
            cfg.text.artist = self.artist.clone();
        }
        if self.title.is_some() {
            cfg.text.title = self.title.clone();
        }
        if self.font.is_some() {
            cfg.text.font = self.font.clone();
        }
        if let Some(v) = &self.codec {
            cfg.encoder.codec = v.clone();
        }
        if let Some(v) = self.crf {
            cfg.encoder.crf = v;
        }
        if self.bitrate.is_some() {
            cfg.encoder.bitrate = self.bitrate.clone();
        }
        if let Some(v) = self.renderer {
            cfg.renderer = match v {
                RendererArg::Raster => RendererKind::Raster,
                RendererArg::Shader => RendererKind::Shader,
            };
        }
    }
}
