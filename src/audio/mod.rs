pub mod analysis;
pub mod decode;
pub mod envelope;
pub mod features;

pub use analysis::{AudioAnalyzer, SpectrumFrames};
pub use envelope::EnvelopeEngine;
pub use features::{AudioTrack, BarLevels, SpectrumFrame};
