use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::process::{EncoderProcess, ProcessOutcome, ProcessSpawner};
use crate::config::EncoderConfig;
use crate::error::{BarwaveError, BarwaveResult};
use crate::render::{frame_bytes, RenderedFrame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncoderState {
    Unopened,
    Open,
    /// Video stream closed and encoded; the muted file is ready for muxing.
    Finalizing,
    Muxed,
    Failed,
}

/// What the encoder produces and where.
#[derive(Clone, Debug)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub encoder: EncoderConfig,
    pub output: PathBuf,
}

/// Streams raw RGBA frames into an encoder process, then muxes the original
/// audio in a second pass. The output path is only ever written by the final
/// rename.
pub struct EncodePipeline {
    settings: EncodeSettings,
    spawner: Arc<dyn ProcessSpawner>,
    state: EncoderState,
    process: Option<Box<dyn EncoderProcess>>,
    frames_written: u64,
    video_path: PathBuf,
    partial_path: PathBuf,
}

impl EncodePipeline {
    pub fn new(settings: EncodeSettings, spawner: Arc<dyn ProcessSpawner>) -> Self {
        let video_path = sibling(&settings.output, "video-tmp");
        let partial_path = sibling(&settings.output, "mux-tmp");
        Self {
            settings,
            spawner,
            state: EncoderState::Unopened,
            process: None,
            frames_written: 0,
            video_path,
            partial_path,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn video_args(&self) -> Vec<String> {
        let s = &self.settings;
        let enc = &s.encoder;
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-loglevel".into(), "error".into(),
            "-f".into(), "rawvideo".into(),
            "-pixel_format".into(), "rgba".into(),
            "-video_size".into(), format!("{}x{}", s.width, s.height),
            "-framerate".into(), s.fps.to_string(),
            "-i".into(), "pipe:0".into(),
            "-an".into(),
            "-c:v".into(), enc.codec.clone(),
            "-pix_fmt".into(), enc.pix_fmt.clone(),
        ];

        if let Some(br) = &enc.bitrate {
            args.extend(["-b:v".to_string(), br.clone()]);
        } else {
            args.extend(["-crf".to_string(), enc.crf.to_string()]);
            args.extend(["-preset".to_string(), enc.preset.clone()]);
        }
        args.extend(faststart(&self.video_path).into_iter().flatten());
        args.push(path_arg(&self.video_path));
        args
    }

    pub fn mux_args(&self, audio: &Path) -> Vec<String> {
        let enc = &self.settings.encoder;
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-loglevel".into(), "error".into(),
            "-i".into(), path_arg(&self.video_path),
            "-i".into(), path_arg(audio),
            "-map".into(), "0:v:0".into(),
            "-map".into(), "1:a:0".into(),
            "-c:v".into(), "copy".into(),
            "-c:a".into(), enc.audio_codec.clone(),
            "-b:a".into(), enc.audio_bitrate.clone(),
        ];
        args.extend(faststart(&self.partial_path).into_iter().flatten());
        args.push(path_arg(&self.partial_path));
        args
    }

    /// Starts the video encoder. Valid once, from `Unopened`.
    pub fn open(&mut self) -> BarwaveResult<()> {
        self.expect_state(EncoderState::Unopened, "open")?;
        let s = &self.settings;
        if s.width == 0 || s.height == 0 || s.fps == 0 {
            self.state = EncoderState::Failed;
            return Err(BarwaveError::render_config("encoder needs a non-zero size and fps"));
        }
        let args = self.video_args();
        log::debug!("{} {}", s.encoder.program, args.join(" "));
        match self.spawner.spawn(&s.encoder.program, &args, true) {
            Ok(process) => {
                self.process = Some(process);
                self.state = EncoderState::Open;
                log::info!(
                    "Encoder started: {}x{} @ {}fps, codec={}",
                    s.width,
                    s.height,
                    s.fps,
                    s.encoder.codec
                );
                Ok(())
            }
            Err(e) => {
                self.state = EncoderState::Failed;
                Err(BarwaveError::encoder(format!(
                    "failed to start '{}': {e}. Is it installed?",
                    s.encoder.program
                )))
            }
        }
    }

    /// Writes one frame. Blocks while the encoder's pipe is full.
    pub fn write_frame(&mut self, frame: &RenderedFrame) -> BarwaveResult<()> {
        self.expect_state(EncoderState::Open, "write_frame")?;
        let s = &self.settings;
        let expected = frame_bytes(s.width, s.height);
        if frame.width != s.width || frame.height != s.height || frame.byte_len() != expected {
            return Err(BarwaveError::internal(format!(
                "frame {} is {}x{} ({} bytes), encoder expects {}x{} ({} bytes)",
                self.frames_written,
                frame.width,
                frame.height,
                frame.byte_len(),
                s.width,
                s.height,
                expected
            )));
        }
        let Some(process) = self.process.as_mut() else {
            return Err(BarwaveError::internal("encoder is open without a process"));
        };
        if let Err(e) = process.write_all(&frame.data) {
            // A broken pipe usually means the encoder died; its exit status says why.
            let outcome = process.wait().ok();
            self.fail();
            return Err(BarwaveError::encoder(describe_failure(
                &format!("writing frame {} failed: {e}", self.frames_written),
                outcome.as_ref(),
            )));
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Closes the video stream and waits for the encoder to finish.
    pub fn finalize(&mut self) -> BarwaveResult<()> {
        self.expect_state(EncoderState::Open, "finalize")?;
        let Some(mut process) = self.process.take() else {
            return Err(BarwaveError::internal("encoder is open without a process"));
        };
        process.close_stdin();
        match process.wait() {
            Ok(outcome) if outcome.success => {
                self.state = EncoderState::Finalizing;
                log::info!("Video stream finalized ({} frames)", self.frames_written);
                Ok(())
            }
            Ok(outcome) => {
                self.fail();
                Err(BarwaveError::encoder(describe_failure("video encode failed", Some(&outcome))))
            }
            Err(e) => {
                self.fail();
                Err(BarwaveError::encoder(format!("failed to wait for encoder: {e}")))
            }
        }
    }

    /// Muxes `audio` with the finished video and moves the result onto the
    /// output path.
    pub fn mux_audio(&mut self, audio: &Path) -> BarwaveResult<PathBuf> {
        self.expect_state(EncoderState::Finalizing, "mux_audio")?;
        let args = self.mux_args(audio);
        let program = self.settings.encoder.program.clone();
        log::debug!("{} {}", program, args.join(" "));

        let outcome = self
            .spawner
            .spawn(&program, &args, false)
            .and_then(|mut p| p.wait());
        match outcome {
            Ok(outcome) if outcome.success => {}
            Ok(outcome) => {
                self.fail();
                return Err(BarwaveError::encoder(describe_failure("audio mux failed", Some(&outcome))));
            }
            Err(e) => {
                self.fail();
                return Err(BarwaveError::encoder(format!("failed to run '{program}' for muxing: {e}")));
            }
        }

        if let Err(e) = std::fs::rename(&self.partial_path, &self.settings.output) {
            self.fail();
            return Err(BarwaveError::encoder(format!(
                "failed to move {} to {}: {e}",
                self.partial_path.display(),
                self.settings.output.display()
            )));
        }
        remove_quietly(&self.video_path);
        self.state = EncoderState::Muxed;
        log::info!("Wrote {}", self.settings.output.display());
        Ok(self.settings.output.clone())
    }

    /// Stops the encoder and removes everything but a completed output.
    pub fn abort(&mut self) {
        if matches!(self.state, EncoderState::Muxed) {
            return;
        }
        self.fail();
    }

    fn fail(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
        remove_quietly(&self.video_path);
        remove_quietly(&self.partial_path);
        self.state = EncoderState::Failed;
    }

    fn expect_state(&self, expected: EncoderState, op: &str) -> BarwaveResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BarwaveError::internal(format!(
                "{op} called in state {:?}, expected {:?}",
                self.state, expected
            )))
        }
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        if !matches!(self.state, EncoderState::Muxed | EncoderState::Unopened) {
            self.abort();
        }
    }
}

fn describe_failure(context: &str, outcome: Option<&ProcessOutcome>) -> String {
    match outcome {
        Some(o) => {
            let code = o.code.map_or_else(|| "signal".to_string(), |c| c.to_string());
            if o.diagnostics.trim().is_empty() {
                format!("{context} (exit {code})")
            } else {
                format!("{context} (exit {code}):\n{}", o.diagnostics.trim_end())
            }
        }
        None => context.to_string(),
    }
}

/// `{stem}.{tag}.{ext}` next to `output`, keeping the container extension so
/// the encoder picks the same muxer.
fn sibling(output: &Path, tag: &str) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "barwave".into());
    let name = match output.extension() {
        Some(ext) => format!("{stem}.{tag}.{}", ext.to_string_lossy()),
        None => format!("{stem}.{tag}"),
    };
    output.with_file_name(name)
}

fn faststart(path: &Path) -> Option<[String; 2]> {
    let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
    matches!(ext.as_str(), "mp4" | "mov" | "m4v")
        .then(|| ["-movflags".to_string(), "+faststart".to_string()])
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {e}", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    /// Records bytes and creates the last argument as a file when it succeeds.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Vec<String>>>,
        bytes: Arc<Mutex<usize>>,
        exit_codes: Mutex<Vec<i32>>,
    }

    struct RecordedProcess {
        output: PathBuf,
        bytes: Arc<Mutex<usize>>,
        code: i32,
    }

    impl EncoderProcess for RecordedProcess {
        fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
            *self.bytes.lock().unwrap() += bytes.len();
            Ok(())
        }
        fn close_stdin(&mut self) {}
        fn wait(&mut self) -> io::Result<ProcessOutcome> {
            std::fs::write(&self.output, b"media")?;
            Ok(ProcessOutcome {
                success: self.code == 0,
                code: Some(self.code),
                diagnostics: if self.code == 0 { String::new() } else { "bad codec".into() },
            })
        }
        fn kill(&mut self) {}
    }

    impl ProcessSpawner for Recorder {
        fn spawn(&self, _: &str, args: &[String], _: bool) -> io::Result<Box<dyn EncoderProcess>> {
            self.calls.lock().unwrap().push(args.to_vec());
            let mut codes = self.exit_codes.lock().unwrap();
            let code = if codes.is_empty() { 0 } else { codes.remove(0) };
            Ok(Box::new(RecordedProcess {
                output: PathBuf::from(args.last().cloned().unwrap_or_default()),
                bytes: Arc::clone(&self.bytes),
                code,
            }))
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("barwave-enc-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn pipeline(dir: &Path, recorder: Arc<Recorder>) -> EncodePipeline {
        let settings = EncodeSettings {
            width: 4,
            height: 2,
            fps: 30,
            encoder: EncoderConfig::default(),
            output: dir.join("out.mp4"),
        };
        EncodePipeline::new(settings, recorder)
    }

    #[test]
    fn video_args_describe_raw_rgba_input() {
        let p = pipeline(Path::new("/tmp"), Arc::new(Recorder::default()));
        let args = p.video_args().join(" ");
        assert!(args.contains("-f rawvideo -pixel_format rgba -video_size 4x2 -framerate 30 -i pipe:0"));
        assert!(args.contains("-crf 18 -preset medium"));
        assert!(args.contains("-movflags +faststart"));
        assert!(args.ends_with("out.video-tmp.mp4"));

        let mux = p.mux_args(Path::new("song.flac")).join(" ");
        assert!(mux.contains("-c:v copy -c:a aac -b:a 192k"));
        assert!(!mux.contains("-shortest"));
        assert!(mux.ends_with("out.mux-tmp.mp4"));
    }

    #[test]
    fn full_lifecycle_renames_onto_the_output() {
        let dir = temp_dir("ok");
        let recorder = Arc::new(Recorder::default());
        let mut p = pipeline(&dir, Arc::clone(&recorder));
        let frame = RenderedFrame::filled(4, 2, [1, 2, 3, 255]);

        p.open().unwrap();
        for _ in 0..3 {
            p.write_frame(&frame).unwrap();
        }
        p.finalize().unwrap();
        assert_eq!(p.state(), EncoderState::Finalizing);
        assert!(!dir.join("out.mp4").exists());

        let out = p.mux_audio(Path::new("song.wav")).unwrap();
        assert_eq!(p.state(), EncoderState::Muxed);
        assert_eq!(out, dir.join("out.mp4"));
        assert!(out.exists());
        assert!(!dir.join("out.video-tmp.mp4").exists());
        assert!(!dir.join("out.mux-tmp.mp4").exists());
        assert_eq!(*recorder.bytes.lock().unwrap(), 3 * 4 * 2 * 4);
        assert_eq!(p.frames_written(), 3);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn operations_out_of_order_are_internal_errors() {
        let dir = temp_dir("order");
        let mut p = pipeline(&dir, Arc::new(Recorder::default()));
        let frame = RenderedFrame::filled(4, 2, [0, 0, 0, 255]);
        let err = p.write_frame(&frame).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InternalRender);
        assert!(p.mux_audio(Path::new("a.wav")).is_err());

        p.open().unwrap();
        assert!(p.open().is_err());
        let wrong = RenderedFrame::filled(2, 2, [0, 0, 0, 255]);
        assert!(p.write_frame(&wrong).is_err());
        assert_eq!(p.state(), EncoderState::Open);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn non_zero_exit_fails_and_leaves_no_output() {
        let dir = temp_dir("fail");
        let recorder = Arc::new(Recorder::default());
        recorder.exit_codes.lock().unwrap().push(1);
        let mut p = pipeline(&dir, recorder);
        p.open().unwrap();
        p.write_frame(&RenderedFrame::filled(4, 2, [0, 0, 0, 255])).unwrap();
        let err = p.finalize().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::EncoderProcess);
        assert!(err.to_string().contains("bad codec"));
        assert_eq!(p.state(), EncoderState::Failed);
        assert!(!dir.join("out.mp4").exists());
        assert!(!dir.join("out.video-tmp.mp4").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn failed_mux_keeps_the_output_path_untouched() {
        let dir = temp_dir("mux");
        let recorder = Arc::new(Recorder::default());
        recorder.exit_codes.lock().unwrap().extend([0, 1]);
        let mut p = pipeline(&dir, recorder);
        p.open().unwrap();
        p.finalize().unwrap();
        assert!(p.mux_audio(Path::new("song.wav")).is_err());
        assert_eq!(p.state(), EncoderState::Failed);
        assert!(!dir.join("out.mp4").exists());
        assert!(!dir.join("out.mux-tmp.mp4").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn dropping_an_open_pipeline_cleans_up() {
        let dir = temp_dir("drop");
        {
            let mut p = pipeline(&dir, Arc::new(Recorder::default()));
            p.open().unwrap();
            p.finalize().unwrap();
            assert!(dir.join("out.video-tmp.mp4").exists());
        }
        assert!(!dir.join("out.video-tmp.mp4").exists());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn sibling_paths_keep_the_extension() {
        assert_eq!(sibling(Path::new("/a/b/clip.mkv"), "mux-tmp"), PathBuf::from("/a/b/clip.mux-tmp.mkv"));
        assert_eq!(sibling(Path::new("clip"), "video-tmp"), PathBuf::from("clip.video-tmp"));
    }
}
