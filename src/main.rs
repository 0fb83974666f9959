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
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ambience::audio::{self, Mixer, NodeId};
use ambience::config::{self, EngineConfig};
use ambience::drone::Drone;
use ambience::library::{DirectoryLibrary, SampleLibrary};
use ambience::notes;
use ambience::render::{PrerenderCache, ProgressFn, RenderQueue};
use ambience::samples::{BufferSet, Sampler};
use ambience::stage::{ActiveStage, Environment};
use clap::{crate_version, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A sample-rendering engine for generative ambient music."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shows which sample would play each note and how far it would be transposed.
    Resolve {
        /// The path to the sample library.
        library_path: String,
        /// The sample set to resolve against.
        set: String,
        /// The notes to resolve, e.g. C4 F#2 Bb3.
        #[arg(required = true)]
        notes: Vec<String>,
    },
    /// Renders every configured instrument into the sample library.
    Prerender {
        /// The path to the engine config.
        config_path: String,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Plays a drone on a configured instrument.
    Play {
        /// The path to the engine config.
        config_path: String,
        /// The name of the instrument to play.
        instrument: String,
        /// The notes the drone picks from, separated by commas.
        #[arg(short, long, default_value = "C3,G3,D4,A4")]
        notes: String,
        /// How often a new note starts.
        #[arg(short, long, default_value = "2s")]
        interval: String,
        /// How long to play for, in seconds.
        #[arg(short, long, default_value = "30", value_parser = parse_seconds)]
        seconds: Duration,
        /// The device name to play through. Defaults to the system output device.
        #[arg(short, long)]
        device: Option<String>,
    },
}

/// Parses a non-negative, finite number of seconds.
fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds '{}': {}", value, e))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| format!("invalid number of seconds '{}': {}", value, e))
}

/// Waits for the library to finish writing rendered sets to disk.
async fn flush(library: &DirectoryLibrary) {
    while library.pending_writes() > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
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
        Commands::Resolve {
            library_path,
            set,
            notes: requested,
        } => {
            let engine = EngineConfig::default();
            let library = DirectoryLibrary::new(library_path);
            let source = library
                .request(&[set.clone()])
                .await?
                .remove(&set)
                .ok_or_else(|| format!("no sample set named '{}'", set))?;
            let buffers = BufferSet::load(source, engine.sample_rate()).await?;
            let graph = Arc::new(Mixer::new(engine.channels(), engine.sample_rate()));
            let sampler = Sampler::new(graph, buffers, engine.sampler_options()?)?;

            println!("Notes (count: {}):", requested.len());
            for note in requested.iter() {
                match sampler.resolve(note) {
                    Ok((key, nearest)) => println!(
                        "- {} -> {} (offset {:+}, rate {:.4})",
                        note,
                        key,
                        nearest.semitone_offset,
                        notes::semitone_offset_to_rate(nearest.semitone_offset as f64)
                    ),
                    Err(ambience::Error::NoSampleWithinRange { bound, .. }) => {
                        println!("- {} -> skipped, no sample within {} semitones", note, bound)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Commands::Prerender { config_path } => {
            let engine = EngineConfig::deserialize(&PathBuf::from(&config_path))?;
            if engine.instruments().is_empty() {
                println!("No instruments configured in {}.", config_path);
                return Ok(());
            }

            let library = Arc::new(DirectoryLibrary::new(engine.library()));
            let cache = PrerenderCache::new(library.clone(), RenderQueue::new(), engine.sample_rate());
            for instrument in engine.instruments() {
                let name = instrument.name().to_string();
                let progress: ProgressFn = Arc::new(move |fraction| {
                    print!("\r{}: {:>3.0}%", name, fraction * 100.0);
                    let _ = std::io::stdout().flush();
                });
                let set = cache.prerender_instrument(instrument, Some(progress)).await?;
                println!(" ({} samples)", set.len()?);
            }
            flush(&library).await;
        }
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
        Commands::Play {
            config_path,
            instrument,
            notes: drone_notes,
            interval,
            seconds,
            device,
        } => {
            let engine = EngineConfig::deserialize(&PathBuf::from(&config_path))?;
            let instrument = engine.instrument(&instrument)?.clone();
            let interval = config::parse_duration(&interval)?;
            let fade = engine.fade()?;
            let device = audio::get_device(device.as_deref())?;

            let mixer = Arc::new(Mixer::new(engine.channels(), engine.sample_rate()));
            let library = Arc::new(DirectoryLibrary::new(engine.library()));
            let env = Environment {
                graph: mixer.clone(),
                destination: NodeId::MASTER,
                library: library.clone(),
                cache: Arc::new(PrerenderCache::new(
                    library.clone(),
                    RenderQueue::new(),
                    engine.sample_rate(),
                )),
                on_progress: None,
                sampler_options: engine.sampler_options()?,
            };

            let drone = Drone::new(
                instrument,
                drone_notes.split(',').map(|n| n.trim().to_string()).collect(),
                interval,
            )
            .with_release(fade);
            let stage = ActiveStage::new(fade).activate(&drone, &env).await?;
            let _stream = device.play(mixer)?;

            println!(
                "Playing through {} for {}s.",
                device,
                seconds.as_secs_f64()
            );
            let end = stage.schedule()?;
            tokio::time::sleep(seconds).await;
            end.end();
            stage.deactivate();

            // Let the fade out finish before the stream goes away.
            tokio::time::sleep(fade + Duration::from_millis(250)).await;
            flush(&library).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
        for bad in ["inf", "NaN", "-1", "1e400", "soon"] {
            assert!(parse_seconds(bad).is_err(), "expected {:?} to be rejected", bad);
        }
    }

    #[test]
    fn test_cli_rejects_infinite_seconds() {
        let parsed = Cli::try_parse_from([
            "ambience",
            "play",
            "engine.yaml",
            "pad",
            "--seconds",
            "inf",
        ]);
        assert!(parsed.is_err());

        let parsed =
            Cli::try_parse_from(["ambience", "play", "engine.yaml", "pad", "-s", "12"]).unwrap();
        match parsed.command {
            Commands::Play { seconds, .. } => assert_eq!(seconds, Duration::from_secs(12)),
            _ => panic!("expected play"),
        }
    }
}
