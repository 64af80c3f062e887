use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::store::{Job, JobId, JobStore};
use super::JobRequest;
use crate::audio::decode::decode_audio;
use crate::audio::{AudioAnalyzer, EnvelopeEngine};
use crate::encode::{EncodePipeline, EncodeSettings, ProcessSpawner};
use crate::error::{BarwaveError, BarwaveResult};
use crate::render::background::Background;
use crate::render::geometry::BarGeometry;
use crate::render::text::{resolve_font, TextLayer};
use crate::render::{build_producer, RenderAssets};

/// Everything one worker thread needs; nothing here is shared mutably with
/// other jobs.
pub(crate) struct JobContext {
    pub id: JobId,
    pub request: JobRequest,
    pub geometry: BarGeometry,
    pub store: Arc<dyn JobStore>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub cancel: Arc<AtomicBool>,
}

impl JobContext {
    /// Runs the job to a terminal state.
    pub fn run(self) {
        let id = self.id;
        if !self.store_update(|j| {
            j.start();
        }) {
            log::warn!("job {id}: missing from the store, not starting");
            return;
        }
        log::info!("job {id}: processing {}", self.request.audio_path.display());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.render()))
            .unwrap_or_else(|payload| {
                Err(BarwaveError::internal(format!(
                    "worker panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        match outcome {
            Ok(output) => {
                log::info!("job {id}: completed -> {}", output.display());
                self.store_update(|j| {
                    j.complete(output.clone());
                });
            }
            Err(e) => {
                log::error!("job {id}: failed: {e}");
                let (kind, message) = (e.kind(), e.to_string());
                self.store_update(|j| {
                    j.fail(kind, message.clone());
                });
            }
        }
    }

    fn store_update(&self, mut f: impl FnMut(&mut Job)) -> bool {
        self.store.update(self.id, &mut f)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Decode, analyse, render and encode, strictly one frame at a time.
    fn render(&self) -> BarwaveResult<PathBuf> {
        let req = &self.request;
        let cfg = &req.config;
        let (width, height, fps) = (cfg.output.width, cfg.output.height, cfg.output.fps);

        let track = decode_audio(&req.audio_path)?;
        let analyzer = AudioAnalyzer::new(track, cfg)?;
        let total = analyzer.total_frames();
        log::info!(
            "job {}: {:.2}s of audio -> {} frames at {}fps, {} bars",
            self.id,
            analyzer.duration(),
            total,
            fps,
            cfg.bars.count
        );

        let background = match &req.background_path {
            Some(path) => Background::load(path, width, height, cfg.colors.background)?,
            None => Background::Solid(cfg.colors.background),
        };
        let font = resolve_font(&cfg.text)?;
        let text = TextLayer::layout(font.as_ref(), &cfg.text, width, height);
        let mut producer = build_producer(
            cfg,
            self.geometry.clone(),
            RenderAssets { background, text },
        )?;
        log::debug!("job {}: rendering with the {} backend", self.id, producer.name());

        let mut envelope = EnvelopeEngine::new(cfg.bars.count, &cfg.envelope);
        let mut encoder = EncodePipeline::new(
            EncodeSettings {
                width,
                height,
                fps,
                encoder: cfg.encoder.clone(),
                output: req.output_path.clone(),
            },
            Arc::clone(&self.spawner),
        );
        encoder.open()?;

        let dt = 1.0 / fps as f32;
        for (written, frame) in analyzer.frames().enumerate() {
            if self.cancelled() {
                encoder.abort();
                return Err(BarwaveError::Cancelled);
            }
            let levels = envelope.process(&frame, dt)?;
            let rendered = producer.render(&levels)?;
            encoder.write_frame(&rendered)?;

            let progress = (written + 1) as f32 / total as f32;
            self.store_update(|j| j.set_progress(progress));
        }

        if self.cancelled() {
            encoder.abort();
            return Err(BarwaveError::Cancelled);
        }
        encoder.finalize()?;
        encoder.mux_audio(&req.audio_path)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
