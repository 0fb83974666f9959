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

//! Voice tracking for polyphonic sample playback.
//!
//! Handles voice bookkeeping and stealing when the polyphony limit is reached.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use super::SampleKey;
use crate::audio::VoiceId;

/// Global voice ID counter.
static NEXT_VOICE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates an ID for a voice that is about to be started.
pub fn next_voice_id() -> u64 {
    NEXT_VOICE_ID.fetch_add(1, Ordering::SeqCst)
}

/// Represents a voice playing a sample.
#[derive(Debug, Clone)]
pub struct Voice {
    /// Unique ID for this voice.
    id: u64,
    /// The sample being played.
    key: SampleKey,
    /// Playback-rate multiplier.
    rate: f64,
    /// Transport time at which the voice starts.
    start: f64,
    /// The voice in the audio graph.
    graph_voice: VoiceId,
}

impl Voice {
    /// Creates a new voice.
    pub fn new(id: u64, key: SampleKey, rate: f64, start: f64, graph_voice: VoiceId) -> Self {
        Self {
            id,
            key,
            rate,
            start,
            graph_voice,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &SampleKey {
        &self.key
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn graph_voice(&self) -> VoiceId {
        self.graph_voice
    }
}

/// Manages active voices for sample playback.
pub struct VoiceManager {
    /// Active voices.
    voices: Vec<Voice>,
    /// Global maximum voices limit.
    max_voices: u32,
}

impl VoiceManager {
    /// Creates a new voice manager.
    pub fn new(max_voices: u32) -> Self {
        Self {
            voices: Vec::new(),
            max_voices: max_voices.max(1),
        }
    }

    /// Adds a new voice, stealing the earliest-started voice if the limit is reached.
    /// Returns the graph voices that should be stopped.
    pub fn add_voice(&mut self, voice: Voice) -> Vec<VoiceId> {
        let mut voices_to_stop = Vec::new();

        if self.voices.len() >= self.max_voices as usize {
            if let Some(oldest) = self
                .voices
                .iter()
                .min_by(|a, b| a.start.total_cmp(&b.start))
            {
                voices_to_stop.push(oldest.graph_voice);
                let oldest_id = oldest.id;
                self.voices.retain(|v| v.id != oldest_id);
                warn!(
                    max_voices = self.max_voices,
                    "Voice limit reached, stealing oldest"
                );
            }
        }

        self.voices.push(voice);
        voices_to_stop
    }

    /// Removes a voice that has finished playing.
    pub fn remove(&mut self, id: u64) -> Option<Voice> {
        let index = self.voices.iter().position(|v| v.id == id)?;
        Some(self.voices.remove(index))
    }

    /// Returns the current number of active voices.
    pub fn active_count(&self) -> usize {
        self.voices.len()
    }

    /// Returns a snapshot of the active voices.
    pub fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    /// Clears all voices.
    /// Returns the graph voices that should be stopped.
    pub fn clear(&mut self) -> Vec<VoiceId> {
        self.voices.drain(..).map(|v| v.graph_voice).collect()
    }
}

impl std::fmt::Debug for VoiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceManager")
            .field("active_voices", &self.voices.len())
            .field("max_voices", &self.max_voices)
            .finish()
    }
}
