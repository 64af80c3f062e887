use super::features::{BarLevels, SpectrumFrame};
use crate::config::{EnvelopeConfig, SilencePolicy};
use crate::error::{BarwaveError, BarwaveResult};

/// Follower state for one bar.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct BarState {
    height: f32,
    peak: f32,
    /// Seconds since the peak was last raised.
    since_peak: f32,
}

impl BarState {
    /// Moves one frame forward towards `target` (already gated).
    fn step(&mut self, target: f32, dt: f32, cfg: &EnvelopeConfig) {
        if target > self.height {
            self.height = approach(self.height, target, dt, cfg.attack_time);
        } else {
            self.height = approach(self.height, target, dt, cfg.decay_time);
        }
        self.height = self.height.clamp(0.0, 1.0);

        let hold = &cfg.peak_hold;
        if !hold.enabled {
            self.peak = self.height;
            self.since_peak = 0.0;
            return;
        }

        if self.height > self.peak {
            self.peak = self.height;
            self.since_peak = 0.0;
        } else {
            let before = self.since_peak;
            self.since_peak += dt;
            // Only the part of this step past the hold window counts as falling time.
            let falling = (self.since_peak - before.max(hold.hold_time)).max(0.0);
            self.peak = (self.peak - hold.fall_rate * falling).max(self.height);
        }
        self.peak = self.peak.clamp(0.0, 1.0);
    }
}

/// Linear slew: covers the full scale in `time` seconds, zero is instant.
fn approach(from: f32, to: f32, dt: f32, time: f32) -> f32 {
    if time <= 0.0 {
        return to;
    }
    let step = dt / time;
    if to > from {
        (from + step).min(to)
    } else {
        (from - step).max(to)
    }
}

/// Turns raw per-bar magnitudes into smoothed, gated, peak-held levels.
/// Frames must be fed strictly in order.
pub struct EnvelopeEngine {
    cfg: EnvelopeConfig,
    bars: Vec<BarState>,
    last_index: Option<usize>,
}

impl EnvelopeEngine {
    pub fn new(bar_count: usize, cfg: &EnvelopeConfig) -> Self {
        Self {
            cfg: cfg.clone(),
            bars: vec![BarState::default(); bar_count],
            last_index: None,
        }
    }

    /// Advances every bar by one frame. `dt` is the time since the previous
    /// frame in seconds.
    pub fn process(&mut self, frame: &SpectrumFrame, dt: f32) -> BarwaveResult<BarLevels> {
        if frame.magnitudes.len() != self.bars.len() {
            return Err(BarwaveError::internal(format!(
                "spectrum frame {} has {} bars, expected {}",
                frame.index,
                frame.magnitudes.len(),
                self.bars.len()
            )));
        }
        if let Some(last) = self.last_index {
            if frame.index != last + 1 {
                return Err(BarwaveError::internal(format!(
                    "spectrum frame {} arrived after frame {}",
                    frame.index, last
                )));
            }
        }
        self.last_index = Some(frame.index);

        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let gate = self.cfg.noise_gate;
        let gated = |m: f32| if m < gate || !m.is_finite() { 0.0 } else { m.min(1.0) };

        let silent = frame.magnitudes.iter().all(|&m| gated(m) == 0.0);
        if silent && self.cfg.silence == SilencePolicy::Cut {
            self.bars.iter_mut().for_each(|b| *b = BarState::default());
        } else {
            for (bar, &m) in self.bars.iter_mut().zip(&frame.magnitudes) {
                bar.step(gated(m), dt, &self.cfg);
            }
        }

        Ok(BarLevels {
            index: frame.index,
            time: frame.time,
            heights: self.bars.iter().map(|b| b.height).collect(),
            peaks: self
                .cfg
                .peak_hold
                .enabled
                .then(|| self.bars.iter().map(|b| b.peak).collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeakHoldConfig;

    const FPS: f32 = 30.0;
    const DT: f32 = 1.0 / FPS;

    fn frame(index: usize, magnitudes: Vec<f32>) -> SpectrumFrame {
        SpectrumFrame {
            index,
            time: index as f32 * DT,
            magnitudes,
        }
    }

    fn config(attack: f32, decay: f32, peak: bool) -> EnvelopeConfig {
        EnvelopeConfig {
            attack_time: attack,
            decay_time: decay,
            noise_gate: 0.05,
            silence: SilencePolicy::Decay,
            peak_hold: PeakHoldConfig {
                enabled: peak,
                hold_time: 0.5,
                fall_rate: 0.5,
            },
        }
    }

    #[test]
    fn silence_converges_within_decay_time() {
        let cfg = config(0.0, 0.5, false);
        let mut engine = EnvelopeEngine::new(4, &cfg);
        engine.process(&frame(0, vec![1.0, 0.6, 0.3, 0.1]), DT).unwrap();

        let settle = (cfg.decay_time * FPS).ceil() as usize;
        let mut last = None;
        for i in 1..=settle + 1 {
            last = Some(engine.process(&frame(i, vec![0.0; 4]), DT).unwrap());
        }
        let levels = last.unwrap();
        assert!(levels.heights.iter().all(|&h| h == 0.0), "{:?}", levels.heights);
        assert!(levels.peaks.is_none());
    }

    #[test]
    fn attack_is_rate_limited_and_frame_rate_independent() {
        let cfg = config(0.2, 0.5, false);
        let mut at30 = EnvelopeEngine::new(1, &cfg);
        let mut at60 = EnvelopeEngine::new(1, &cfg);
        let mut h30 = 0.0;
        for i in 0..3 {
            h30 = at30.process(&frame(i, vec![1.0]), 1.0 / 30.0).unwrap().heights[0];
        }
        let mut h60 = 0.0;
        for i in 0..6 {
            h60 = at60.process(&frame(i, vec![1.0]), 1.0 / 60.0).unwrap().heights[0];
        }
        assert!((h30 - 0.5).abs() < 1e-5, "{h30}");
        assert!((h30 - h60).abs() < 1e-5);
    }

    #[test]
    fn noise_gate_zeroes_quiet_bars() {
        let cfg = config(0.0, 0.0, false);
        let mut engine = EnvelopeEngine::new(3, &cfg);
        let levels = engine.process(&frame(0, vec![0.04, 0.05, 0.9]), DT).unwrap();
        assert_eq!(levels.heights, vec![0.0, 0.05, 0.9]);
    }

    #[test]
    fn impulse_peak_holds_then_falls_above_the_amplitude() {
        let cfg = config(0.0, 1.0, true);
        let mut engine = EnvelopeEngine::new(1, &cfg);
        let first = engine.process(&frame(0, vec![1.0]), DT).unwrap();
        assert_eq!(first.heights[0], 1.0);
        assert_eq!(first.peaks.as_ref().unwrap()[0], 1.0);

        let hold_frames = (cfg.peak_hold.hold_time * FPS).round() as usize;
        let mut fell = false;
        for i in 1..=60 {
            let levels = engine.process(&frame(i, vec![0.0]), DT).unwrap();
            let height = levels.heights[0];
            let peak = levels.peaks.unwrap()[0];
            assert!(peak >= height, "frame {i}: peak {peak} < height {height}");
            assert!((0.0..=1.0).contains(&peak));
            if i < hold_frames {
                assert_eq!(peak, 1.0, "frame {i} is inside the hold window");
            } else if peak < 1.0 {
                fell = true;
            }
        }
        assert!(fell, "peak never fell after the hold window");
    }

    #[test]
    fn peak_tracks_rising_height() {
        let cfg = config(0.1, 1.0, true);
        let mut engine = EnvelopeEngine::new(1, &cfg);
        for i in 0..3 {
            let levels = engine.process(&frame(i, vec![1.0]), DT).unwrap();
            assert_eq!(levels.peaks.unwrap()[0], levels.heights[0]);
        }
    }

    #[test]
    fn cut_policy_drops_everything_on_silence() {
        let mut cfg = config(0.0, 2.0, true);
        cfg.silence = SilencePolicy::Cut;
        let mut engine = EnvelopeEngine::new(2, &cfg);
        engine.process(&frame(0, vec![0.8, 0.6]), DT).unwrap();
        let levels = engine.process(&frame(1, vec![0.01, 0.0]), DT).unwrap();
        assert_eq!(levels.heights, vec![0.0, 0.0]);
        assert_eq!(levels.peaks.unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn output_is_reproducible() {
        let cfg = config(0.05, 0.3, true);
        let input: Vec<Vec<f32>> = (0..90)
            .map(|i| (0..6).map(|b| ((i * 7 + b * 13) % 17) as f32 / 16.0).collect())
            .collect();
        let run = || {
            let mut engine = EnvelopeEngine::new(6, &cfg);
            input
                .iter()
                .enumerate()
                .map(|(i, m)| engine.process(&frame(i, m.clone()), DT).unwrap())
                .collect::<Vec<_>>()
        };
        let a = run();
        assert_eq!(a, run());
        assert!(a.iter().all(|l| l.heights.len() == 6));
    }

    #[test]
    fn rejects_wrong_width_and_out_of_order_frames() {
        let cfg = config(0.0, 0.0, false);
        let mut engine = EnvelopeEngine::new(2, &cfg);
        assert!(engine.process(&frame(0, vec![0.5]), DT).is_err());
        engine.process(&frame(0, vec![0.5, 0.5]), DT).unwrap();
        assert!(engine.process(&frame(2, vec![0.5, 0.5]), DT).is_err());
    }
}
