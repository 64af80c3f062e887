pub mod ffmpeg;
pub mod process;

pub use ffmpeg::{EncodePipeline, EncodeSettings, EncoderState};
pub use process::{EncoderProcess, ProcessOutcome, ProcessSpawner, SystemSpawner};
