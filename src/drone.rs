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

//! A generative drone: random notes from a fixed set, played on a prerendered instrument.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::audio::{AudioGraph, NodeId};
use crate::config::InstrumentDefinition;
use crate::error::Error;
use crate::notes;
use crate::samples::{BufferSet, Sampler, SamplerOptions};
use crate::stage::{ActivePiece, EndFn, Environment, Piece, DEFAULT_FADE};

/// Notes are triggered this far ahead of the transport so they start on time.
const LOOKAHEAD: f64 = 0.05;

/// A drone piece.
#[derive(Debug, Clone)]
pub struct Drone {
    instrument: InstrumentDefinition,
    notes: Vec<String>,
    interval: Duration,
    release: Duration,
    seed: u64,
}

impl Drone {
    /// Creates a drone over `instrument` that plays one of `notes` every `interval`.
    pub fn new(instrument: InstrumentDefinition, notes: Vec<String>, interval: Duration) -> Drone {
        Drone {
            instrument,
            notes,
            interval,
            release: DEFAULT_FADE,
            seed: 0,
        }
    }

    /// Seeds note selection.
    pub fn with_seed(mut self, seed: u64) -> Drone {
        self.seed = seed;
        self
    }

    /// How long voices keep sounding after a schedule ends. Defaults to the stage fade.
    pub fn with_release(mut self, release: Duration) -> Drone {
        self.release = release;
        self
    }
}

#[async_trait]
impl Piece for Drone {
    async fn activate(&self, env: &Environment) -> Result<Box<dyn ActivePiece>, Error> {
        if self.notes.is_empty() {
            return Err(Error::Config(format!(
                "drone over '{}' has no notes",
                self.instrument.name()
            )));
        }
        // Unparsable notes fail activation rather than every trigger.
        for note in self.notes.iter() {
            notes::to_pitch_number(note)?;
        }
        let buffers = env.instrument(&self.instrument).await?;

        Ok(Box::new(ActiveDrone {
            graph: env.graph.clone(),
            options: env.sampler_options,
            buffers,
            notes: Arc::new(self.notes.clone()),
            interval: self.interval,
            release: self.release.as_secs_f64(),
            rng: StdRng::seed_from_u64(self.seed),
            handle: Handle::current(),
        }))
    }
}

/// A new set sharing the same audio as `buffers`.
fn copy_buffers(buffers: &BufferSet) -> Result<BufferSet, Error> {
    Ok(BufferSet::from_buffers(
        buffers
            .iter()?
            .map(|(key, buffer)| (key.clone(), buffer.clone()))
            .collect(),
    ))
}

struct ActiveDrone {
    graph: Arc<dyn AudioGraph>,
    options: SamplerOptions,
    buffers: BufferSet,
    notes: Arc<Vec<String>>,
    interval: Duration,
    release: f64,
    rng: StdRng,
    handle: Handle,
}

impl ActiveDrone {
    fn start(&mut self, destination: NodeId) -> Result<EndFn, Error> {
        let mut sampler = Sampler::new(self.graph.clone(), copy_buffers(&self.buffers)?, self.options)?;
        sampler.connect(destination)?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let graph = self.graph.clone();
        let notes = self.notes.clone();
        let interval = self.interval;
        let release = self.release;
        let mut rng = StdRng::seed_from_u64(self.rng.gen());

        self.handle.spawn(async move {
            loop {
                let note = &notes[rng.gen_range(0..notes.len())];
                // Now and then drop an octave.
                let shift = if rng.gen_bool(0.25) { 12 } else { 0 };
                if let Err(e) = sampler.trigger_attack(note, graph.now() + LOOKAHEAD, shift) {
                    warn!(note, err = %e, "Drone note failed");
                    break;
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = &mut stop_rx => break,
                }
            }

            // The output must outlive the stage's fade-out, so it is removed at the
            // release time rather than when the sampler drops.
            let until = graph.now() + release;
            if let Err(e) = sampler.dispose_at(until) {
                warn!(err = %e, "Unable to release drone voices");
            }
            debug!(output = %sampler.output(), until, "Drone schedule finished");
        });

        Ok(Box::new(move || {
            let _ = stop_tx.send(());
        }))
    }
}

impl ActivePiece for ActiveDrone {
    fn schedule(&mut self, destination: NodeId) -> Option<EndFn> {
        match self.start(destination) {
            Ok(end) => Some(end),
            Err(e) => {
                warn!(destination = %destination, err = %e, "Unable to schedule drone");
                None
            }
        }
    }

    fn deactivate(&mut self) {
        if let Err(e) = self.buffers.dispose() {
            warn!(err = %e, "Drone buffers were already released");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::audio::{AudioBuffer, Mixer};
    use crate::library::{MemoryLibrary, SampleLibrary};
    use crate::render::{PrerenderCache, RenderQueue};
    use crate::samples::{SampleData, SampleSource};
    use crate::stage::ActiveStage;
    use crate::testutil::eventually_async;

    const RATE: u32 = 1000;

    fn environment(mixer: Arc<Mixer>) -> Environment {
        let library = Arc::new(MemoryLibrary::new());
        let mut samples = BTreeMap::new();
        for note in ["C3", "C4"] {
            samples.insert(
                note.to_string(),
                SampleData::Decoded(AudioBuffer::new(vec![0.5; 5000], 1, RATE)),
            );
        }
        library.insert("piano", SampleSource::Named(samples));

        Environment {
            graph: mixer,
            destination: NodeId::MASTER,
            library: library.clone(),
            cache: Arc::new(PrerenderCache::new(library, RenderQueue::new(), RATE)),
            on_progress: None,
            sampler_options: SamplerOptions::default(),
        }
    }

    fn drone(notes: &[&str]) -> Drone {
        Drone::new(
            InstrumentDefinition::new("piano-drone", "piano", None, Vec::new()),
            notes.iter().map(|n| n.to_string()).collect(),
            Duration::from_millis(10),
        )
        .with_seed(7)
    }

    #[tokio::test]
    async fn test_drone_plays_and_stops() {
        let mixer = Arc::new(Mixer::new(1, RATE));
        let env = environment(mixer.clone());
        let stage = ActiveStage::default()
            .activate(&drone(&["C4", "E4", "G3"]), &env)
            .await
            .unwrap();

        let end = stage.schedule().unwrap();
        assert!(end.is_tracked());
        eventually_async(
            || {
                let playing = mixer.active_voice_count() > 1;
                async move { playing }
            },
            "Drone never played",
        )
        .await;

        stage.deactivate();
        eventually_async(
            || {
                mixer.advance(0.2);
                let silent = mixer.active_voice_count() == 0;
                async move { silent }
            },
            "Drone voices survived deactivation",
        )
        .await;
    }

    #[tokio::test]
    async fn test_drone_end_lets_stage_fade_out() {
        let mixer = Arc::new(Mixer::new(1, RATE));
        let env = environment(mixer.clone());
        let slow = Drone::new(
            InstrumentDefinition::new("piano-drone", "piano", None, Vec::new()),
            vec!["C4".to_string()],
            Duration::from_secs(60),
        );
        let stage = ActiveStage::default().activate(&slow, &env).await.unwrap();

        let end = stage.schedule().unwrap();
        eventually_async(
            || {
                let playing = mixer.active_voice_count() > 0;
                async move { playing }
            },
            "Drone never played",
        )
        .await;
        mixer.advance(0.3);
        let before = mixer.render_frames(1)[0];
        assert!((before - 0.5).abs() < 1e-3, "level before end: {}", before);

        end.end();
        // Let the drone task see the stop.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Halfway through the stage fade the drone is still audible.
        let out = mixer.render_frames(50);
        assert!(out[10] > 0.3, "level early in fade: {}", out[10]);
        assert!(out[49] > 0.1, "level mid fade: {}", out[49]);

        mixer.advance(0.2);
        assert_eq!(mixer.active_voice_count(), 0);
        let out = mixer.render_frames(10);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[tokio::test]
    async fn test_drone_rejects_bad_notes() {
        let mixer = Arc::new(Mixer::new(1, RATE));
        let env = environment(mixer);

        let result = ActiveStage::default().activate(&drone(&["H2"]), &env).await;
        assert!(matches!(result, Err(Error::InvalidNoteFormat(_))));

        let result = ActiveStage::default().activate(&drone(&[]), &env).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_drone_uses_prerendered_instrument() {
        let mixer = Arc::new(Mixer::new(1, RATE));
        let env = environment(mixer);
        let _stage = ActiveStage::default()
            .activate(&drone(&["C4"]), &env)
            .await
            .unwrap();

        let cached = env
            .library
            .request(&["piano-drone".to_string()])
            .await
            .unwrap();
        assert!(cached.contains_key("piano-drone"));
    }
}
