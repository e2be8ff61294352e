// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};
use drumpad::audio;
use drumpad::catalog::{Catalog, DirectoryCatalog};
use drumpad::config::EngineConfig;
use drumpad::{PadEngine, PadId, Pattern, Preset, SequenceEvent, StepSequencer};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A drum pad sample player and pattern sequencer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists and verifies all presets in the given directory.
    Presets {
        /// The directory containing preset manifests.
        presets_dir: PathBuf,
        /// The directory containing the preset samples.
        samples_dir: PathBuf,
    },
    /// Triggers pads one after another, printing their playback positions.
    Trigger {
        /// The path to the engine config.
        config_path: PathBuf,
        /// The preset to load.
        preset: String,
        /// The pads to trigger.
        #[arg(required = true)]
        pads: Vec<PadId>,
    },
    /// Plays a BeatSchool pattern.
    Play {
        /// The path to the engine config.
        config_path: PathBuf,
        /// The preset to load.
        preset: String,
        /// The pattern id.
        pattern: i64,
        /// The BeatSchool version the pattern belongs to.
        #[arg(short = 'v', long, default_value_t = 0)]
        pattern_version: u32,
        /// Overrides the preset's tempo.
        #[arg(short, long)]
        tempo: Option<u32>,
        /// Loops the pattern until enter is pressed.
        #[arg(short, long = "loop")]
        looping: bool,
    },
    /// Records one pass of a BeatSchool pattern and prints the rendered file.
    Record {
        /// The path to the engine config.
        config_path: PathBuf,
        /// The preset to load.
        preset: String,
        /// The pattern id.
        pattern: i64,
        /// The BeatSchool version the pattern belongs to.
        #[arg(short = 'v', long, default_value_t = 0)]
        pattern_version: u32,
        /// Overrides the preset's tempo.
        #[arg(short, long)]
        tempo: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Presets {
            presets_dir,
            samples_dir,
        } => {
            let catalog = DirectoryCatalog::new(&presets_dir, &samples_dir);
            let ids = catalog.list_ids()?;

            if ids.is_empty() {
                println!("No presets found in {}.", presets_dir.display());
                return Ok(());
            }

            println!("Presets (count: {}):", ids.len());
            for id in ids {
                match catalog.load(&id) {
                    Ok(preset) => {
                        println!("- {}", preset);
                        for pad in preset.pads() {
                            println!("  - {}", pad);
                        }
                    }
                    Err(e) => println!("- {}: {}", id, e),
                }
            }
        }
        Commands::Trigger {
            config_path,
            preset,
            pads,
        } => {
            let engine = engine_with_preset(&config_path, &preset).await?;

            for pad_id in pads {
                engine.trigger_pad(pad_id).await?;
                let mut positions = engine.subscribe_position(pad_id);
                while let Some(update) = positions.recv().await {
                    println!(
                        "pad {}: {:.3}s / {:.3}s ({:.0}%)",
                        update.pad_id,
                        update.current_time.as_secs_f64(),
                        update.duration.as_secs_f64(),
                        update.progress() * 100.0
                    );
                }
            }
        }
        Commands::Play {
            config_path,
            preset,
            pattern,
            pattern_version,
            tempo,
            looping,
        } => {
            let engine = Arc::new(engine_with_preset(&config_path, &preset).await?);
            let preset = current_preset(&engine).await?;
            let pattern = find_pattern(&preset, pattern_version, pattern)?;
            let sequencer = StepSequencer::new(engine.clone());

            let mut events = sequencer.subscribe();
            let printer = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    if let SequenceEvent::Step(progress) = event {
                        println!(
                            "step {}/{}",
                            progress.current_step + 1,
                            progress.total_steps
                        );
                    }
                }
            });

            sequencer
                .play(&pattern, tempo.unwrap_or(preset.tempo()), looping)
                .await?;
            if looping {
                println!("Looping, press enter to stop.");
                tokio::task::spawn_blocking(|| {
                    let mut line = String::new();
                    std::io::stdin().read_line(&mut line)
                })
                .await??;
                sequencer.stop().await;
            } else {
                sequencer.wait().await;
            }
            printer.abort();
        }
        Commands::Record {
            config_path,
            preset,
            pattern,
            pattern_version,
            tempo,
        } => {
            let engine = Arc::new(engine_with_preset(&config_path, &preset).await?);
            let preset = current_preset(&engine).await?;
            let pattern = find_pattern(&preset, pattern_version, pattern)?;
            let sequencer = StepSequencer::new(engine.clone());

            engine.start_recording().await?;
            sequencer
                .play(&pattern, tempo.unwrap_or(preset.tempo()), false)
                .await?;
            sequencer.wait().await;

            match engine.stop_recording().await? {
                Some(path) => println!("Recorded to {}", path.display()),
                None => println!("Nothing was recorded."),
            }
        }
    }

    Ok(())
}

/// Opens the configured device and loads the given preset.
async fn engine_with_preset(
    config_path: &std::path::Path,
    preset: &str,
) -> Result<PadEngine, Box<dyn Error>> {
    let config = EngineConfig::load(config_path)?;
    let engine = PadEngine::from_config(&config)?;
    let preset = engine.load_preset(preset).await?;
    println!("Loaded {}", preset);
    Ok(engine)
}

async fn current_preset(engine: &PadEngine) -> Result<Arc<Preset>, Box<dyn Error>> {
    engine
        .current_preset()
        .await
        .ok_or_else(|| "no preset loaded".into())
}

fn find_pattern(preset: &Preset, version: u32, id: i64) -> Result<Pattern, Box<dyn Error>> {
    preset
        .beat_school()
        .find(version, id)
        .cloned()
        .ok_or_else(|| format!("no pattern {} in BeatSchool v{}", id, version).into())
}
