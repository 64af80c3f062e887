use rayon::prelude::*;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::collections::VecDeque;
use std::sync::Arc;

use super::features::{AudioTrack, SpectrumFrame};
use crate::config::{AmplitudeScale, VisualizerConfig};
use crate::error::{BarwaveError, BarwaveResult};

pub const FFT_SIZE: usize = 2048;

/// Frames analysed per parallel batch. Bounds how far analysis runs ahead of
/// the encoder.
const BATCH_FRAMES: usize = 32;

/// Per-frame spectral analysis of one track. Owns the track for the job.
pub struct AudioAnalyzer {
    track: AudioTrack,
    fps: u32,
    total_frames: usize,
    /// Band edges in Hz, `bar_count + 1` entries.
    edges: Vec<f32>,
    /// FFT bin range `[lo, hi)` aggregated into each bar.
    bands: Vec<(usize, usize)>,
    scale: AmplitudeScale,
    sensitivity: f32,
    db_floor: f32,
    window: Vec<f32>,
    /// Converts a raw bin magnitude so that a full-scale sine reads 1.0.
    norm: f32,
    fft: Arc<dyn Fft<f32>>,
}

impl AudioAnalyzer {
    pub fn new(track: AudioTrack, cfg: &VisualizerConfig) -> BarwaveResult<Self> {
        if track.samples.is_empty() || track.sample_rate == 0 {
            return Err(BarwaveError::EmptyAudioTrack);
        }

        let fps = cfg.output.fps;
        let a = &cfg.analysis;
        let nyquist = track.sample_rate as f32 / 2.0;
        if a.min_freq >= nyquist {
            return Err(BarwaveError::input(format!(
                "min_freq {} Hz is above the {} Hz Nyquist limit of the track",
                a.min_freq, nyquist
            )));
        }
        let max_freq = a.max_freq.min(nyquist);

        let edges = band_edges(cfg.bars.count, a.min_freq, max_freq, a.frequency_curve);
        let resolution = track.sample_rate as f32 / FFT_SIZE as f32;
        let bands = edges
            .windows(2)
            .map(|e| bin_range(e[0], e[1], resolution))
            .collect();

        let window = hann_window(FFT_SIZE);
        let norm = 2.0 / window.iter().sum::<f32>();

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        let total_frames = track.frame_count(fps);
        log::info!(
            "Analysis plan: {} frames @ {}fps, {} bars over {:.0}-{:.0} Hz (curve {:.2})",
            total_frames,
            fps,
            cfg.bars.count,
            a.min_freq,
            max_freq,
            a.frequency_curve
        );

        Ok(Self {
            track,
            fps,
            total_frames,
            edges,
            bands,
            scale: a.scale,
            sensitivity: a.sensitivity,
            db_floor: a.db_floor,
            window,
            norm,
            fft,
        })
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn duration(&self) -> f64 {
        self.track.duration()
    }

    pub fn band_edges(&self) -> &[f32] {
        &self.edges
    }

    /// Lazy, in-order sequence of every frame of the track.
    pub fn frames(&self) -> SpectrumFrames<'_> {
        SpectrumFrames {
            analyzer: self,
            next: 0,
            ready: VecDeque::with_capacity(BATCH_FRAMES),
        }
    }

    fn analyze_frame(&self, index: usize) -> SpectrumFrame {
        let samples = &self.track.samples;
        let sr = self.track.sample_rate as f64;

        // Window centred on the middle of the frame's time span.
        let center = ((index as f64 + 0.5) * sr / self.fps as f64).floor() as i64;
        let start = center - (FFT_SIZE / 2) as i64;

        let mut buffer: Vec<Complex<f32>> = (0..FFT_SIZE)
            .map(|i| {
                let pos = start + i as i64;
                let s = if pos >= 0 && (pos as usize) < samples.len() {
                    samples[pos as usize]
                } else {
                    0.0
                };
                Complex::new(s * self.window[i], 0.0)
            })
            .collect();
        self.fft.process(&mut buffer);

        let magnitudes = self
            .bands
            .iter()
            .map(|&(lo, hi)| {
                let peak = buffer[lo..hi]
                    .iter()
                    .map(|c| c.norm() * self.norm)
                    .fold(0.0f32, f32::max);
                self.scale_magnitude(peak)
            })
            .collect();

        SpectrumFrame {
            index,
            time: index as f32 / self.fps as f32,
            magnitudes,
        }
    }

    fn scale_magnitude(&self, magnitude: f32) -> f32 {
        let m = magnitude * self.sensitivity;
        let v = match self.scale {
            AmplitudeScale::Linear => m,
            AmplitudeScale::Sqrt => m.sqrt(),
            AmplitudeScale::Decibel => {
                let db = 20.0 * m.max(1e-10).log10();
                (db - self.db_floor) / -self.db_floor
            }
        };
        if v.is_finite() {
            v.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Forward-only iterator over a track's spectrum frames. Computes frames in
/// bounded parallel batches and yields them in index order.
pub struct SpectrumFrames<'a> {
    analyzer: &'a AudioAnalyzer,
    next: usize,
    ready: VecDeque<SpectrumFrame>,
}

impl Iterator for SpectrumFrames<'_> {
    type Item = SpectrumFrame;

    fn next(&mut self) -> Option<SpectrumFrame> {
        if self.ready.is_empty() && self.next < self.analyzer.total_frames {
            let end = (self.next + BATCH_FRAMES).min(self.analyzer.total_frames);
            let analyzer = self.analyzer;
            let batch: Vec<SpectrumFrame> = (self.next..end)
                .into_par_iter()
                .map(|i| analyzer.analyze_frame(i))
                .collect();
            self.ready.extend(batch);
            self.next = end;
        }
        self.ready.pop_front()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.analyzer.total_frames - self.next + self.ready.len();
        (left, Some(left))
    }
}

impl ExactSizeIterator for SpectrumFrames<'_> {}

/// `edge(i) = fmin + (fmax - fmin) * (i / n)^curve`.
fn band_edges(bars: usize, min_freq: f32, max_freq: f32, curve: f32) -> Vec<f32> {
    (0..=bars)
        .map(|i| {
            let t = i as f32 / bars as f32;
            min_freq + (max_freq - min_freq) * t.powf(curve)
        })
        .collect()
}

/// Bins whose centre lies inside `[lo_hz, hi_hz]`, or the nearest bin when the
/// band is narrower than one bin. Never includes the DC bin.
fn bin_range(lo_hz: f32, hi_hz: f32, resolution: f32) -> (usize, usize) {
    let last = FFT_SIZE / 2 - 1;
    let lo = ((lo_hz / resolution).ceil() as usize).clamp(1, last);
    let hi = ((hi_hz / resolution).floor() as usize).min(last);
    if hi >= lo {
        (lo, hi + 1)
    } else {
        let nearest = (((lo_hz + hi_hz) / 2.0 / resolution).round() as usize).clamp(1, last);
        (nearest, nearest + 1)
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}
