//! Standalone Calf Box player: loads an initial patch, opens an audio
//! output stream, and serves the control surface (§6) over stdin until
//! told to quit.

mod audio;
mod config;
mod control;
mod patches;
mod status;

use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::Parser;

use audio::AudioOutput;
use config::EngineConfig;
use patches::PatchRegistry;
use status::StatusSnapshot;

#[derive(Parser)]
#[command(name = "calfbox")]
#[command(author, version, about = "Calf Box sampler engine, standalone")]
struct Args {
    /// SFZ file to load as program 0 on channel 0 at startup
    sfz: Option<PathBuf>,

    /// Directory samples referenced by `sfz` are resolved against
    /// (defaults to the SFZ file's own directory)
    #[arg(long)]
    sample_dir: Option<PathBuf>,

    /// Engine config file (TOML); falls back to the platform config dir
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured polyphony cap
    #[arg(long)]
    polyphony: Option<usize>,

    /// Output device name (defaults to the system default device)
    #[arg(long)]
    device: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(polyphony) = args.polyphony {
        config.max_voices = polyphony;
    }

    let mut sampler = calfbox_engine::Sampler::new(config.sample_rate, config.max_voices);
    let mut registry = PatchRegistry::new(config.sample_rate);

    if let Some(sfz_path) = &args.sfz {
        let sample_dir = args
            .sample_dir
            .or_else(|| sfz_path.parent().map(PathBuf::from))
            .unwrap_or_default();
        let program = registry.load_from_file(0, sample_dir, sfz_path)?;
        sampler.submit_program_change(0, program);
    }

    let status: status::SharedStatus = Arc::new(Mutex::new(StatusSnapshot::default()));
    let (command_tx, command_rx) = mpsc::sync_channel(64);

    let audio = AudioOutput::new(sampler, command_rx, status.clone(), args.device.as_deref())?;
    tracing::info!(sample_rate = audio.sample_rate(), "calfbox running, type /quit to exit");

    control::run(registry, status, command_tx);
    Ok(())
}
