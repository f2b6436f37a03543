use anyhow::{bail, Context, Result};
use clap::Parser;
use std::process;
use vocalnotch::args::Cli;
use vocalnotch::audio;
use vocalnotch::config::{Settings, SuppressorConfig};
use vocalnotch::notes::NoteEvent;
use vocalnotch::suppressor::Suppressor;
use vocalnotch::util::midi_to_hz;
use vocalnotch::ProcessSpec;
use directories::ProjectDirs;

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("Error: {:#}", e);
        process::exit(1);
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let config = match &cli.config {
        Some(path) => Some(SuppressorConfig::load(path)?),
        None => {
            let proj_dirs = ProjectDirs::from("com", "vocalnotch", "vocalnotch")
                .context("Could not determine project directories")?;
            let path = proj_dirs.config_dir().join("config.kdl");
            if path.exists() {
                log::info!("Using config {}", path.display());
                Some(SuppressorConfig::load(&path)?)
            } else {
                None
            }
        }
    };
    let mut settings = config.unwrap_or_default().settings()?;

    if let Some(estimator) = cli.estimator {
        settings.estimator = estimator;
    }
    if let Some(block_size) = cli.block_size {
        if block_size == 0 {
            bail!("Block size must be positive");
        }
        settings.block_size = block_size;
    }
    if let Some(harmonics) = cli.harmonics {
        settings.bank.harmonic_count = harmonics;
    }
    Ok(settings)
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let (mut channels, sample_rate) = audio::load_audio(&cli.in_file)
        .with_context(|| format!("Failed to load audio from {}", cli.in_file))?;

    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    if frames == 0 {
        audio::save_audio(&cli.out_file, &channels, sample_rate)
            .with_context(|| format!("Failed to save audio to {}", cli.out_file))?;
        return Ok(());
    }

    let spec = ProcessSpec {
        sample_rate,
        max_block_size: settings.block_size,
        channels: channels.len(),
    };
    let mut suppressor = Suppressor::from_settings(&settings);
    suppressor.prepare(&spec).context("Failed to prepare suppressor")?;

    let mut pitched = 0usize;
    let mut blocks = 0usize;
    let mut start = 0;
    while start < frames {
        let end = (start + settings.block_size).min(frames);
        let mut block: Vec<&mut [f32]> = channels.iter_mut().map(|c| &mut c[start..end]).collect();
        let report = suppressor.process_with_notes(&mut block, |event| {
            if settings.log {
                match event {
                    NoteEvent::On { note, position } => {
                        log::info!("Note on {} ({:.1}Hz) at sample {}", note, midi_to_hz(note as f32), position)
                    }
                    NoteEvent::Off { note, position } => log::info!("Note off {} at sample {}", note, position),
                }
            }
        });
        if report.outcome.frequency().is_some() {
            pitched += 1;
        }
        log::debug!(
            "Block {}: {:?}, tuned={:?}, harmonics={:?}",
            blocks, report.outcome, report.frequency, report.harmonics
        );
        blocks += 1;
        start = end;
    }

    log::info!(
        "Processed {} blocks, {} with pitch, estimator={}",
        blocks,
        pitched,
        suppressor.estimator().name()
    );

    audio::save_audio(&cli.out_file, &channels, sample_rate)
        .with_context(|| format!("Failed to save audio to {}", cli.out_file))?;

    Ok(())
}
