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

//! Pitch-shifting sampler.
//!
//! A requested note is played by the nearest sampled note, sped up or slowed down to
//! reach the requested pitch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::buffer_set::{BufferSet, SampleKey};
use super::voice::{next_voice_id, Voice, VoiceManager};
use crate::audio::{AudioGraph, NodeId, VoiceSpec};
use crate::error::Error;
use crate::notes::{self, NearestSample};

/// Envelope and search settings for a sampler.
#[derive(Debug, Clone, Copy)]
pub struct SamplerOptions {
    /// Fade-in applied to every voice, in seconds.
    pub fade_in: f64,
    /// Fade-out applied at the natural end of every voice, in seconds.
    pub fade_out: f64,
    /// How many semitones away from the requested note a sample may be.
    pub search_bound: u32,
    /// Voices beyond this count steal the earliest-started voice.
    pub max_voices: u32,
}

impl Default for SamplerOptions {
    fn default() -> Self {
        Self {
            fade_in: 0.005,
            fade_out: 0.05,
            search_bound: notes::DEFAULT_SEARCH_BOUND,
            max_voices: 64,
        }
    }
}

/// A sampled instrument that plays arbitrary notes from a [`BufferSet`].
pub struct Sampler {
    graph: Arc<dyn AudioGraph>,
    buffers: BufferSet,
    /// Pitch number to the sample recorded at that pitch. Index keys are not included.
    pitches: BTreeMap<i32, SampleKey>,
    available: BTreeSet<i32>,
    /// Every voice plays into this node.
    output: NodeId,
    destination: Option<NodeId>,
    voices: Arc<Mutex<VoiceManager>>,
    options: SamplerOptions,
}

impl Sampler {
    /// Creates a sampler over a loaded buffer set. Note-named keys must all parse.
    pub fn new(
        graph: Arc<dyn AudioGraph>,
        buffers: BufferSet,
        options: SamplerOptions,
    ) -> Result<Sampler, Error> {
        let mut pitches = BTreeMap::new();
        for key in buffers.keys()? {
            if let Some(pitch) = key.pitch() {
                pitches.insert(pitch?, key.clone());
            }
        }
        let available = pitches.keys().copied().collect();
        let output = graph.create_gain(None, 1.0);

        debug!(
            samples = buffers.len()?,
            pitched = pitches.len(),
            "Sampler created"
        );

        Ok(Sampler {
            graph,
            buffers,
            pitches,
            available,
            output,
            destination: None,
            voices: Arc::new(Mutex::new(VoiceManager::new(options.max_voices))),
            options,
        })
    }

    fn ensure_live(&self) -> Result<(), Error> {
        if self.buffers.is_disposed() {
            return Err(Error::Disposed("sampler"));
        }
        Ok(())
    }

    /// Routes every voice, past and future, to `destination`. A sampler can only be
    /// connected once.
    pub fn connect(&mut self, destination: NodeId) -> Result<(), Error> {
        self.ensure_live()?;
        self.graph.connect(self.output, destination)?;
        self.destination = Some(destination);
        debug!(output = %self.output, destination = %destination, "Sampler connected");
        Ok(())
    }

    /// The node every voice plays into.
    pub fn output(&self) -> NodeId {
        self.output
    }

    /// The node the sampler has been connected to, if any.
    pub fn destination(&self) -> Option<NodeId> {
        self.destination
    }

    /// Finds the sample that will play a note and how far it must be transposed.
    pub fn resolve(&self, note: &str) -> Result<(SampleKey, NearestSample), Error> {
        self.ensure_live()?;
        let target = notes::to_pitch_number(note)?;
        let nearest =
            notes::nearest_available_within(target, &self.available, self.options.search_bound)?;
        let key = self
            .pitches
            .get(&nearest.pitch)
            .cloned()
            .ok_or_else(|| Error::UnknownKey(notes::pitch_to_note_name(nearest.pitch).into()))?;
        Ok((key, nearest))
    }

    /// Plays `note` at `time`, transposed down by `pitch_shift` semitones.
    ///
    /// A note with no sample within the search bound is skipped. Unparsable notes and
    /// calls after disposal are errors.
    pub fn trigger_attack(&self, note: &str, time: f64, pitch_shift: i32) -> Result<(), Error> {
        let (key, nearest) = match self.resolve(note) {
            Ok(resolved) => resolved,
            Err(Error::NoSampleWithinRange { target, bound }) => {
                debug!(note, target, bound, "No sample within range, skipping note");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let rate = notes::semitone_offset_to_rate((nearest.semitone_offset - pitch_shift) as f64);
        self.start_voice(key, rate, time)
    }

    /// Plays a specific sample at its recorded pitch.
    pub fn play_key(&self, key: &SampleKey, time: f64) -> Result<(), Error> {
        self.ensure_live()?;
        self.start_voice(key.clone(), 1.0, time)
    }

    fn start_voice(&self, key: SampleKey, rate: f64, time: f64) -> Result<(), Error> {
        let buffer = self.buffers.get(&key)?;
        let id = next_voice_id();
        let voices = Arc::downgrade(&self.voices);

        // Hold the voice list across start so the ended callback can't run before the
        // voice is recorded.
        let mut manager = self.voices.lock();
        let graph_voice = self.graph.start_voice(
            VoiceSpec {
                buffer,
                rate,
                start: time,
                fade_in: self.options.fade_in,
                fade_out: self.options.fade_out,
                destination: self.output,
            },
            Box::new(move || {
                if let Some(voices) = voices.upgrade() {
                    voices.lock().remove(id);
                }
            }),
        );
        let stolen = manager.add_voice(Voice::new(id, key.clone(), rate, time, graph_voice));
        drop(manager);

        for voice in stolen {
            self.graph.stop_voice(voice, time, self.options.fade_in);
        }

        debug!(key = %key, rate, time, "Voice triggered");
        Ok(())
    }

    /// Stops every active voice at `time` without a fade.
    pub fn release_all(&self, time: f64) -> Result<(), Error> {
        self.ensure_live()?;
        let stopped = self.voices.lock().clear();
        for voice in stopped.iter() {
            self.graph.stop_voice(*voice, time, 0.0);
        }
        if !stopped.is_empty() {
            debug!(stopped = stopped.len(), time, "All voices released");
        }
        Ok(())
    }

    /// Number of voices that have been started and have not finished.
    pub fn active_voices(&self) -> usize {
        self.voices.lock().active_count()
    }

    /// A snapshot of the active voices.
    pub fn voices(&self) -> Vec<Voice> {
        self.voices.lock().voices()
    }

    pub fn is_disposed(&self) -> bool {
        self.buffers.is_disposed()
    }

    /// Stops every voice, releases the buffer set and removes the output node.
    /// A second call fails with [`Error::Disposed`].
    pub fn dispose(&mut self) -> Result<(), Error> {
        let now = self.graph.now();
        self.dispose_at(now)
    }

    /// Like [`Sampler::dispose`], but voices keep sounding and the output node stays
    /// connected until `time`.
    pub fn dispose_at(&mut self, time: f64) -> Result<(), Error> {
        self.buffers.dispose()?;

        let time = time.max(self.graph.now());
        let stopped = self.voices.lock().clear();
        for voice in stopped {
            self.graph.stop_voice(voice, time, 0.0);
        }
        self.graph.dispose_node(self.output, time);
        self.pitches.clear();
        self.available.clear();

        info!(output = %self.output, time, "Sampler disposed");
        Ok(())
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if !self.buffers.is_disposed() {
            let _ = self.dispose();
        }
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("output", &self.output)
            .field("destination", &self.destination)
            .field("pitches", &self.available)
            .field("voices", &self.active_voices())
            .finish()
    }
}
