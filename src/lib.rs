//! Audio-reactive spectrum bar videos: decode a track, analyse it per video
//! frame, smooth the bars, render them and stream the frames to an encoder.

pub mod audio;
pub mod config;
pub mod encode;
pub mod error;
pub mod job;
pub mod render;

pub use config::VisualizerConfig;
pub use error::{BarwaveError, BarwaveResult, ErrorKind};
pub use job::{JobManager, JobRequest, JobState};
