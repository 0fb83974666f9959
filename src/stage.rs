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

//! Click-free piece lifecycle.
//!
//! A piece is activated once into a [`Stage`]. Every [`Stage::schedule`] plays the piece
//! into a fresh gain node that fades in; ending that schedule fades the node out and then
//! removes it. Deactivating the stage ends everything still playing and is terminal.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::{AudioGraph, NodeId};
use crate::config::InstrumentDefinition;
use crate::error::Error;
use crate::library::SampleLibrary;
use crate::render::{PrerenderCache, ProgressFn};
use crate::samples::{BufferSet, Sampler, SamplerOptions};

/// Stops whatever a single schedule started.
pub type EndFn = Box<dyn FnOnce() + Send>;

/// The default fade applied when a schedule starts and ends.
pub const DEFAULT_FADE: Duration = Duration::from_millis(100);

/// Everything a piece needs to activate.
#[derive(Clone)]
pub struct Environment {
    pub graph: Arc<dyn AudioGraph>,
    /// Where the stage's gain nodes are routed.
    pub destination: NodeId,
    pub library: Arc<dyn SampleLibrary>,
    pub cache: Arc<PrerenderCache>,
    /// Receives prerender progress for instruments loaded through this environment.
    pub on_progress: Option<ProgressFn>,
    pub sampler_options: SamplerOptions,
}

impl Environment {
    /// Loads a sample set from the library at the graph's sample rate.
    pub async fn buffers(&self, name: &str) -> Result<BufferSet, Error> {
        let source = self
            .library
            .request(&[name.to_string()])
            .await?
            .remove(name)
            .ok_or_else(|| Error::Library(format!("no sample set named '{}'", name)))?;
        BufferSet::load(source, self.graph.sample_rate()).await
    }

    /// Loads a sample set and wraps it in an unconnected sampler.
    pub async fn sampler(&self, name: &str) -> Result<Sampler, Error> {
        let buffers = self.buffers(name).await?;
        Sampler::new(self.graph.clone(), buffers, self.sampler_options)
    }

    /// Prerenders a virtual instrument, or loads it if it has been rendered before.
    pub async fn instrument(&self, instrument: &InstrumentDefinition) -> Result<BufferSet, Error> {
        self.cache
            .prerender_instrument(instrument, self.on_progress.clone())
            .await
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("destination", &self.destination)
            .field("cache", &self.cache)
            .field("sampler_options", &self.sampler_options)
            .finish()
    }
}

/// A composition that can be activated onto a graph.
#[async_trait]
pub trait Piece: Send + Sync {
    /// Loads whatever the piece needs and returns its running form.
    async fn activate(&self, env: &Environment) -> Result<Box<dyn ActivePiece>, Error>;
}

/// An activated piece.
pub trait ActivePiece: Send {
    /// Starts playing into `destination`. The returned callback, if any, stops what this
    /// call started.
    fn schedule(&mut self, destination: NodeId) -> Option<EndFn>;

    /// Releases everything the piece holds. Called once, after every end has run.
    fn deactivate(&mut self);
}

/// Activates pieces into stages with a fixed fade window.
#[derive(Debug, Clone, Copy)]
pub struct ActiveStage {
    fade: Duration,
}

impl ActiveStage {
    pub fn new(fade: Duration) -> ActiveStage {
        ActiveStage { fade }
    }

    pub fn fade(&self) -> Duration {
        self.fade
    }

    /// Activates `piece` and wraps it in a stage routed to the environment's destination.
    pub async fn activate(&self, piece: &dyn Piece, env: &Environment) -> Result<Stage, Error> {
        let active = piece.activate(env).await?;
        info!(
            destination = %env.destination,
            fade_ms = self.fade.as_millis() as u64,
            "Piece activated"
        );
        Ok(Stage {
            inner: Arc::new(StageInner {
                graph: env.graph.clone(),
                destination: env.destination,
                fade: self.fade.as_secs_f64(),
                state: Mutex::new(StageState {
                    deactivated: false,
                    piece: active,
                    ends: BTreeMap::new(),
                    untracked: Vec::new(),
                    next_id: 0,
                }),
            }),
        })
    }
}

impl Default for ActiveStage {
    fn default() -> Self {
        ActiveStage::new(DEFAULT_FADE)
    }
}

/// A schedule that is still playing.
struct Tracked {
    gain: NodeId,
    end: EndFn,
}

struct StageState {
    deactivated: bool,
    piece: Box<dyn ActivePiece>,
    ends: BTreeMap<u64, Tracked>,
    /// Gains of schedules that returned no end callback. They live until deactivation.
    untracked: Vec<NodeId>,
    next_id: u64,
}

struct StageInner {
    graph: Arc<dyn AudioGraph>,
    destination: NodeId,
    fade: f64,
    state: Mutex<StageState>,
}

impl StageInner {
    /// Fades a gain out from its current value and removes it once silent.
    fn fade_out(&self, gain: NodeId) {
        let now = self.graph.now();
        if let Err(e) = self.graph.ramp_gain(gain, 0.0, now, now + self.fade) {
            warn!(gain = %gain, err = %e, "Unable to fade out stage gain");
        }
        self.graph.dispose_node(gain, now + self.fade);
    }

    fn finish(&self, tracked: Tracked) {
        self.fade_out(tracked.gain);
        (tracked.end)();
    }
}

/// One activation of a piece.
pub struct Stage {
    inner: Arc<StageInner>,
}

impl Stage {
    /// Starts the piece into a new gain node that fades in from silence.
    pub fn schedule(&self) -> Result<StageEnd, Error> {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.deactivated {
            return Err(Error::AlreadyDeactivated);
        }

        let now = inner.graph.now();
        let gain = inner.graph.create_gain(Some(inner.destination), 0.0);
        if let Err(e) = inner.graph.ramp_gain(gain, 1.0, now, now + inner.fade) {
            inner.graph.dispose_node(gain, now);
            return Err(e.into());
        }

        let id = match state.piece.schedule(gain) {
            Some(end) => {
                let id = state.next_id;
                state.next_id += 1;
                state.ends.insert(id, Tracked { gain, end });
                Some(id)
            }
            None => {
                state.untracked.push(gain);
                None
            }
        };
        debug!(gain = %gain, now, "Stage scheduled");

        Ok(StageEnd {
            stage: Arc::downgrade(&self.inner),
            id,
        })
    }

    /// Ends every schedule still playing, then deactivates the piece. Later calls do
    /// nothing.
    pub fn deactivate(&self) {
        let (ends, untracked) = {
            let mut state = self.inner.state.lock();
            if state.deactivated {
                return;
            }
            state.deactivated = true;
            (
                std::mem::take(&mut state.ends),
                std::mem::take(&mut state.untracked),
            )
        };

        info!(ends = ends.len(), untracked = untracked.len(), "Deactivating stage");
        for tracked in ends.into_values() {
            self.inner.finish(tracked);
        }
        for gain in untracked {
            self.inner.fade_out(gain);
        }
        self.inner.state.lock().piece.deactivate();
    }

    pub fn is_deactivated(&self) -> bool {
        self.inner.state.lock().deactivated
    }

    /// Number of schedules whose end has not run yet.
    pub fn active_ends(&self) -> usize {
        self.inner.state.lock().ends.len()
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Stage")
            .field("destination", &self.inner.destination)
            .field("deactivated", &state.deactivated)
            .field("ends", &state.ends.len())
            .finish()
    }
}

/// Ends a single schedule. Ending twice, or after the stage is gone, does nothing.
#[derive(Clone)]
pub struct StageEnd {
    stage: Weak<StageInner>,
    id: Option<u64>,
}

impl StageEnd {
    /// Fades the schedule's gain out and runs the piece's end callback.
    pub fn end(&self) {
        let Some(id) = self.id else {
            warn!("Piece schedule returned no end callback, nothing to end");
            return;
        };
        let Some(inner) = self.stage.upgrade() else {
            return;
        };
        let tracked = inner.state.lock().ends.remove(&id);
        if let Some(tracked) = tracked {
            debug!(gain = %tracked.gain, "Stage schedule ending");
            inner.finish(tracked);
        }
    }

    /// Whether the piece returned an end callback for this schedule.
    pub fn is_tracked(&self) -> bool {
        self.id.is_some()
    }
}

impl std::fmt::Debug for StageEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageEnd").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::audio::{AudioBuffer, Mixer};
    use crate::library::MemoryLibrary;
    use crate::render::RenderQueue;
    use crate::samples::{SampleData, SampleSource};

    const RATE: u32 = 1000;

    #[derive(Default)]
    struct Counts {
        schedules: AtomicUsize,
        ends: AtomicUsize,
        deactivates: AtomicUsize,
        destinations: Mutex<Vec<NodeId>>,
    }

    struct TestPiece {
        counts: Arc<Counts>,
        with_end: bool,
    }

    struct ActiveTestPiece {
        counts: Arc<Counts>,
        with_end: bool,
    }

    #[async_trait]
    impl Piece for TestPiece {
        async fn activate(&self, _env: &Environment) -> Result<Box<dyn ActivePiece>, Error> {
            Ok(Box::new(ActiveTestPiece {
                counts: self.counts.clone(),
                with_end: self.with_end,
            }))
        }
    }

    impl ActivePiece for ActiveTestPiece {
        fn schedule(&mut self, destination: NodeId) -> Option<EndFn> {
            self.counts.schedules.fetch_add(1, Ordering::SeqCst);
            self.counts.destinations.lock().push(destination);
            if !self.with_end {
                return None;
            }
            let counts = self.counts.clone();
            Some(Box::new(move || {
                counts.ends.fetch_add(1, Ordering::SeqCst);
            }))
        }

        fn deactivate(&mut self) {
            self.counts.deactivates.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn environment(mixer: Arc<Mixer>, library: Arc<MemoryLibrary>) -> Environment {
        Environment {
            graph: mixer,
            destination: NodeId::MASTER,
            library: library.clone(),
            cache: Arc::new(PrerenderCache::new(library, RenderQueue::new(), RATE)),
            on_progress: None,
            sampler_options: SamplerOptions {
                fade_in: 0.0,
                fade_out: 0.0,
                ..Default::default()
            },
        }
    }

    async fn activate(with_end: bool) -> (Arc<Mixer>, Arc<Counts>, Stage) {
        let mixer = Arc::new(Mixer::new(1, RATE));
        let env = environment(mixer.clone(), Arc::new(MemoryLibrary::new()));
        let counts = Arc::new(Counts::default());
        let piece = TestPiece {
            counts: counts.clone(),
            with_end,
        };
        let stage = ActiveStage::default()
            .activate(&piece, &env)
            .await
            .unwrap();
        (mixer, counts, stage)
    }

    #[tokio::test]
    async fn test_schedule_fades_in() {
        let (mixer, counts, stage) = activate(true).await;
        mixer.advance(0.5);

        stage.schedule().unwrap();
        let gain = counts.destinations.lock()[0];
        assert_ne!(gain, NodeId::MASTER);
        assert_eq!(mixer.gain_at(gain, 0.5), Some(0.0));
        assert!((mixer.gain_at(gain, 0.55).unwrap() - 0.5).abs() < 1e-4);
        assert_eq!(mixer.gain_at(gain, 0.7), Some(1.0));
        assert_eq!(stage.active_ends(), 1);
    }

    #[tokio::test]
    async fn test_end_fades_out_and_is_idempotent() {
        let (mixer, counts, stage) = activate(true).await;
        let end = stage.schedule().unwrap();
        let gain = counts.destinations.lock()[0];
        mixer.advance(0.2);

        end.end();
        end.end();
        end.clone().end();
        assert_eq!(counts.ends.load(Ordering::SeqCst), 1);
        assert_eq!(stage.active_ends(), 0);
        assert_eq!(mixer.gain_at(gain, 0.2), Some(1.0));
        assert_eq!(mixer.gain_at(gain, 0.35), Some(0.0));

        // The node is removed once the fade has finished.
        mixer.advance(0.2);
        assert_eq!(mixer.gain_at(gain, 0.4), None);
        assert_eq!(mixer.node_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_after_deactivate_fails() {
        let (_mixer, counts, stage) = activate(true).await;
        stage.deactivate();

        assert!(stage.is_deactivated());
        assert!(matches!(stage.schedule(), Err(Error::AlreadyDeactivated)));
        assert_eq!(counts.schedules.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deactivate_forces_ends_once() {
        let (mixer, counts, stage) = activate(true).await;
        let first = stage.schedule().unwrap();
        stage.schedule().unwrap();
        stage.schedule().unwrap();

        stage.deactivate();
        stage.deactivate();
        first.end();

        assert_eq!(counts.ends.load(Ordering::SeqCst), 3);
        assert_eq!(counts.deactivates.load(Ordering::SeqCst), 1);
        assert_eq!(stage.active_ends(), 0);

        mixer.advance(0.2);
        assert_eq!(mixer.node_count(), 0);
    }

    #[tokio::test]
    async fn test_schedule_without_end() {
        let (mixer, counts, stage) = activate(false).await;
        let end = stage.schedule().unwrap();
        assert!(!end.is_tracked());

        end.end();
        assert_eq!(stage.active_ends(), 0);
        assert_eq!(mixer.node_count(), 1);

        stage.deactivate();
        mixer.advance(0.2);
        assert_eq!(mixer.node_count(), 0);
        assert_eq!(counts.deactivates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_deactivates() {
        let (_mixer, counts, stage) = activate(true).await;
        let end = stage.schedule().unwrap();
        drop(stage);

        assert_eq!(counts.ends.load(Ordering::SeqCst), 1);
        assert_eq!(counts.deactivates.load(Ordering::SeqCst), 1);
        end.end();
        assert_eq!(counts.ends.load(Ordering::SeqCst), 1);
    }

    struct SamplerPiece;

    struct ActiveSamplerPiece {
        env: Environment,
        buffers: BufferSet,
        samplers: Arc<Mutex<Vec<Arc<Sampler>>>>,
    }

    #[async_trait]
    impl Piece for SamplerPiece {
        async fn activate(&self, env: &Environment) -> Result<Box<dyn ActivePiece>, Error> {
            Ok(Box::new(ActiveSamplerPiece {
                env: env.clone(),
                buffers: env.buffers("piano").await?,
                samplers: Arc::new(Mutex::new(Vec::new())),
            }))
        }
    }

    impl ActivePiece for ActiveSamplerPiece {
        fn schedule(&mut self, destination: NodeId) -> Option<EndFn> {
            let buffers = BufferSet::from_buffers(
                self.buffers
                    .iter()
                    .ok()?
                    .map(|(key, buffer)| (key.clone(), buffer.clone()))
                    .collect(),
            );
            let mut sampler =
                Sampler::new(self.env.graph.clone(), buffers, self.env.sampler_options).ok()?;
            sampler.connect(destination).ok()?;
            sampler
                .trigger_attack("E4", self.env.graph.now(), 0)
                .ok()?;
            let sampler = Arc::new(sampler);
            self.samplers.lock().push(sampler.clone());

            let graph = self.env.graph.clone();
            Some(Box::new(move || {
                let _ = sampler.release_all(graph.now());
            }))
        }

        fn deactivate(&mut self) {
            self.samplers.lock().clear();
            let _ = self.buffers.dispose();
        }
    }

    #[tokio::test]
    async fn test_deactivate_silences_sampler_voices() {
        let mixer = Arc::new(Mixer::new(1, RATE));
        let library = Arc::new(MemoryLibrary::new());
        let mut samples = std::collections::BTreeMap::new();
        samples.insert(
            "C4".to_string(),
            SampleData::Decoded(AudioBuffer::new(vec![1.0; 5000], 1, RATE)),
        );
        library.insert("piano", SampleSource::Named(samples));
        let env = environment(mixer.clone(), library);

        let stage = ActiveStage::default()
            .activate(&SamplerPiece, &env)
            .await
            .unwrap();
        stage.schedule().unwrap();
        mixer.advance(0.2);
        assert_eq!(mixer.active_voice_count(), 1);

        stage.deactivate();
        mixer.advance(0.2);
        assert_eq!(mixer.active_voice_count(), 0);

        stage.deactivate();
        assert_eq!(mixer.active_voice_count(), 0);
    }
}
