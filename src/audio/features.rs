/// Decoded audio, downmixed to mono for analysis.
#[derive(Clone, Debug)]
pub struct AudioTrack {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Channel count of the source before downmixing.
    pub channels: usize,
}

impl AudioTrack {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: usize) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// `ceil(duration * fps)`, computed on integers so exact multiples do not
    /// pick up an extra frame from float error.
    pub fn frame_count(&self, fps: u32) -> usize {
        if self.sample_rate == 0 {
            return 0;
        }
        let num = self.samples.len() as u64 * fps as u64;
        num.div_ceil(self.sample_rate as u64) as usize
    }
}

/// Raw per-bar magnitudes for one output frame, normalized to [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct SpectrumFrame {
    pub index: usize,
    /// Start of the frame's time span, in seconds.
    pub time: f32,
    pub magnitudes: Vec<f32>,
}

/// Envelope output for one frame: what the renderer draws.
#[derive(Clone, Debug, PartialEq)]
pub struct BarLevels {
    pub index: usize,
    pub time: f32,
    pub heights: Vec<f32>,
    pub peaks: Option<Vec<f32>>,
}
