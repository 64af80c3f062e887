mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use barwave::config::{self, VisualizerConfig};
use barwave::{JobManager, JobRequest, JobState};
use cli::Cli;

const PROGRESS_TICKS: u64 = 1000;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut cfg = match config::discover_config(cli.config.as_deref()) {
        Some(path) => {
            let cfg = config::load_config(&path)?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => VisualizerConfig::default(),
    };
    cli.apply(&mut cfg);

    if cli.dump_config {
        print!("{}", toml::to_string_pretty(&cfg).context("Failed to serialize config")?);
        return Ok(());
    }

    let input = cli.input.clone().context("Input audio file is required")?;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }

    log::info!("barwave - spectrum bar video renderer");
    log::info!("Input: {}", input.display());
    log::info!("Output: {}", cli.output.display());
    log::info!(
        "Resolution: {}x{} @ {}fps, {} bars ({:?})",
        cfg.output.width,
        cfg.output.height,
        cfg.output.fps,
        cfg.bars.count,
        cfg.bars.layout
    );

    let manager = JobManager::with_defaults();
    let id = manager.submit(JobRequest {
        audio_path: input,
        background_path: cli.background.clone(),
        output_path: cli.output.clone(),
        config: cfg,
    })?;

    let pb = ProgressBar::new(PROGRESS_TICKS);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent}% ({eta} remaining)")
            .context("Invalid progress template")?
            .progress_chars("=>-"),
    );
    while let Some(job) = manager.status(id) {
        if job.state.is_terminal() {
            break;
        }
        pb.set_position((job.progress * PROGRESS_TICKS as f32) as u64);
        std::thread::sleep(Duration::from_millis(100));
    }

    let job = manager.wait(id).context("Job disappeared from the store")?;
    match job.state {
        JobState::Completed => pb.finish_with_message("Rendering complete"),
        _ => pb.abandon(),
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&job)?);
    }

    match (&job.state, &job.error) {
        (JobState::Completed, _) => {
            let output = job.output_path.as_deref().unwrap_or(cli.output.as_path());
            log::info!("Done! Output: {}", output.display());
            Ok(())
        }
        (_, Some(err)) => anyhow::bail!("Render failed ({:?}): {}", err.kind, err.message),
        (state, None) => anyhow::bail!("Render ended in state {:?}", state),
    }
}
