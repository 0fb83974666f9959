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
// Core audio mixing logic shared by the output device and offline rendering
use std::collections::HashMap;

use parking_lot::Mutex;

use super::buffer::AudioBuffer;
use super::graph::{AudioGraph, EndedCallback, GraphError, NodeId, VoiceId, VoiceSpec};

/// Gain chains deeper than this are treated as silent.
const MAX_CHAIN_DEPTH: usize = 64;

/// A sample-clocked, pull-based implementation of [`AudioGraph`].
///
/// Transport time only advances when [`Mixer::render`] is called, so the same mixer drives
/// both a real-time output callback and faster-than-real-time offline rendering.
pub struct Mixer {
    state: Mutex<MixerState>,
    /// Number of output channels
    num_channels: u16,
    /// Sample rate
    sample_rate: u32,
}

struct MixerState {
    /// Frames rendered so far; the transport clock.
    frame: u64,
    next_id: u64,
    nodes: HashMap<NodeId, GainNode>,
    voices: Vec<ActiveVoice>,
}

struct GainNode {
    destination: Option<NodeId>,
    automation: Automation,
    dispose_at: Option<f64>,
}

#[derive(Clone, Copy, Debug)]
struct AutomationEvent {
    time: f64,
    value: f32,
    /// Whether the value is reached by a linear ramp from the previous event.
    linear: bool,
}

/// A gain automation timeline, sorted by time. The first event is always at negative
/// infinity so there is a value for every time.
#[derive(Debug)]
struct Automation {
    events: Vec<AutomationEvent>,
}

impl Automation {
    fn new(initial: f32) -> Self {
        Self {
            events: vec![AutomationEvent {
                time: f64::NEG_INFINITY,
                value: initial,
                linear: false,
            }],
        }
    }

    fn value_at(&self, time: f64) -> f32 {
        let idx = self.events.partition_point(|e| e.time <= time).max(1);
        let prev = self.events[idx - 1];
        match self.events.get(idx) {
            Some(next) if next.linear && next.time > prev.time => {
                let progress = ((time - prev.time) / (next.time - prev.time)) as f32;
                prev.value + (next.value - prev.value) * progress
            }
            _ => prev.value,
        }
    }

    fn ramp(&mut self, target: f32, start: f64, end: f64) {
        let current = self.value_at(start);
        self.events.retain(|e| e.time < start);
        self.events.push(AutomationEvent {
            time: start,
            value: current,
            linear: false,
        });
        self.events.push(AutomationEvent {
            time: end.max(start),
            value: target,
            linear: true,
        });
    }

    /// Drops events that can no longer affect values at or after `time`.
    fn prune(&mut self, time: f64) {
        let idx = self.events.partition_point(|e| e.time <= time);
        if idx > 1 {
            self.events.drain(..idx - 1);
        }
    }
}

/// The state of a voice at a particular instant.
enum VoiceLevel {
    Pending,
    Playing { position: f64, envelope: f32 },
    Finished,
}

struct ActiveVoice {
    id: VoiceId,
    spec: VoiceSpec,
    stop: Option<(f64, f64)>,
    on_ended: Option<EndedCallback>,
    finished: bool,
}

impl ActiveVoice {
    fn level(&self, time: f64) -> VoiceLevel {
        let spec = &self.spec;
        if !(spec.rate > 0.0 && spec.rate.is_finite()) {
            return VoiceLevel::Finished;
        }
        let elapsed = time - spec.start;
        if elapsed < 0.0 {
            return VoiceLevel::Pending;
        }

        let frames_per_second = spec.rate * spec.buffer.sample_rate() as f64;
        let position = elapsed * frames_per_second;
        if position >= spec.buffer.frames() as f64 {
            return VoiceLevel::Finished;
        }

        let mut envelope = 1.0f64;
        if spec.fade_in > 0.0 && elapsed < spec.fade_in {
            envelope *= elapsed / spec.fade_in;
        }
        let remaining = (spec.buffer.frames() as f64 - position) / frames_per_second;
        if spec.fade_out > 0.0 && remaining < spec.fade_out {
            envelope *= remaining / spec.fade_out;
        }
        if let Some((at, fade)) = self.stop {
            if time >= at {
                if fade <= 0.0 || time >= at + fade {
                    return VoiceLevel::Finished;
                }
                envelope *= 1.0 - (time - at) / fade;
            }
        }

        VoiceLevel::Playing {
            position,
            envelope: envelope as f32,
        }
    }
}

impl MixerState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Returns the product of every gain between `node` and the master bus, or 0 if the
    /// chain never reaches it.
    fn chain_gain(nodes: &HashMap<NodeId, GainNode>, mut node: NodeId, time: f64) -> f32 {
        let mut gain = 1.0;
        for _ in 0..MAX_CHAIN_DEPTH {
            if node == NodeId::MASTER {
                return gain;
            }
            let Some(current) = nodes.get(&node) else {
                return 0.0;
            };
            gain *= current.automation.value_at(time);
            match current.destination {
                Some(destination) => node = destination,
                None => return 0.0,
            }
        }
        0.0
    }

    fn render(&mut self, out: &mut [f32], channels: usize, sample_rate: u32) -> Vec<EndedCallback> {
        out.fill(0.0);
        let frames = out.len() / channels;

        for i in 0..frames {
            let time = (self.frame + i as u64) as f64 / sample_rate as f64;
            for voice in self.voices.iter_mut().filter(|v| !v.finished) {
                let (position, envelope) = match voice.level(time) {
                    VoiceLevel::Pending => continue,
                    VoiceLevel::Finished => {
                        voice.finished = true;
                        continue;
                    }
                    VoiceLevel::Playing { position, envelope } => (position, envelope),
                };

                let gain = Self::chain_gain(&self.nodes, voice.spec.destination, time) * envelope;
                if gain == 0.0 {
                    continue;
                }
                let frame = &mut out[i * channels..(i + 1) * channels];
                for (channel, sample) in frame.iter_mut().enumerate() {
                    *sample += voice.spec.buffer.interpolate(position, channel) * gain;
                }
            }
        }
        self.frame += frames as u64;

        // Voices that have finished by the end of the block are released now.
        let now = self.frame as f64 / sample_rate as f64;
        let mut ended = Vec::new();
        self.voices.retain_mut(|voice| {
            if !voice.finished && matches!(voice.level(now), VoiceLevel::Finished) {
                voice.finished = true;
            }
            if voice.finished {
                if let Some(on_ended) = voice.on_ended.take() {
                    ended.push(on_ended);
                }
                return false;
            }
            true
        });

        self.nodes
            .retain(|_, node| node.dispose_at.map_or(true, |at| at > now));
        for node in self.nodes.values_mut() {
            node.automation.prune(now);
        }

        ended
    }
}

impl Mixer {
    /// Creates a new mixer.
    pub fn new(num_channels: u16, sample_rate: u32) -> Self {
        Self {
            state: Mutex::new(MixerState {
                frame: 0,
                next_id: 0,
                nodes: HashMap::new(),
                voices: Vec::new(),
            }),
            num_channels: num_channels.max(1),
            sample_rate,
        }
    }

    /// Returns the number of output channels.
    pub fn num_channels(&self) -> u16 {
        self.num_channels
    }

    /// Renders interleaved audio into `out`, advancing the transport clock by the number of
    /// frames written. Ended callbacks run after the mixer lock is released.
    pub fn render(&self, out: &mut [f32]) {
        let ended = {
            let mut state = self.state.lock();
            state.render(out, self.num_channels as usize, self.sample_rate)
        };
        for on_ended in ended {
            on_ended();
        }
    }

    /// Renders the given number of frames into a new interleaved vector.
    pub fn render_frames(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.num_channels as usize];
        self.render(&mut out);
        out
    }

    /// Advances the transport by roughly `seconds`, discarding the audio.
    pub fn advance(&self, seconds: f64) {
        let frames = (seconds * self.sample_rate as f64).round() as usize;
        const BLOCK: usize = 512;
        let mut block = vec![0.0; BLOCK * self.num_channels as usize];
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(BLOCK);
            self.render(&mut block[..n * self.num_channels as usize]);
            remaining -= n;
        }
    }

    /// Renders `seconds` of audio into a buffer.
    pub fn render_to_buffer(&self, seconds: f64) -> AudioBuffer {
        let frames = (seconds * self.sample_rate as f64).ceil() as usize;
        AudioBuffer::new(
            self.render_frames(frames),
            self.num_channels,
            self.sample_rate,
        )
    }

    /// Returns the number of voices that have not finished yet.
    pub fn active_voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    /// Returns the number of live gain nodes, not counting the master bus.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }
}

impl AudioGraph for Mixer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> f64 {
        self.state.lock().frame as f64 / self.sample_rate as f64
    }

    fn create_gain(&self, destination: Option<NodeId>, initial: f32) -> NodeId {
        let mut state = self.state.lock();
        let id = NodeId(state.allocate_id());
        state.nodes.insert(
            id,
            GainNode {
                destination,
                automation: Automation::new(initial),
                dispose_at: None,
            },
        );
        id
    }

    fn connect(&self, node: NodeId, destination: NodeId) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        if destination != NodeId::MASTER && !state.nodes.contains_key(&destination) {
            return Err(GraphError::UnknownNode(destination));
        }

        // Walk up from the destination; reaching `node` would close a loop.
        let mut cursor = Some(destination);
        while let Some(current) = cursor {
            if current == node {
                return Err(GraphError::Cycle(node, destination));
            }
            cursor = state.nodes.get(&current).and_then(|n| n.destination);
        }

        let gain = state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?;
        if gain.destination.is_some() {
            return Err(GraphError::AlreadyConnected(node));
        }
        gain.destination = Some(destination);
        Ok(())
    }

    fn ramp_gain(
        &self,
        node: NodeId,
        target: f32,
        start: f64,
        end: f64,
    ) -> Result<(), GraphError> {
        let mut state = self.state.lock();
        let gain = state
            .nodes
            .get_mut(&node)
            .ok_or(GraphError::UnknownNode(node))?;
        gain.automation.ramp(target, start, end);
        Ok(())
    }

    fn gain_at(&self, node: NodeId, time: f64) -> Option<f32> {
        if node == NodeId::MASTER {
            return Some(1.0);
        }
        let state = self.state.lock();
        state.nodes.get(&node).map(|n| n.automation.value_at(time))
    }

    fn dispose_node(&self, node: NodeId, at: f64) {
        let mut state = self.state.lock();
        if let Some(gain) = state.nodes.get_mut(&node) {
            gain.dispose_at = Some(gain.dispose_at.map_or(at, |existing| existing.min(at)));
        }
    }

    fn start_voice(&self, spec: VoiceSpec, on_ended: EndedCallback) -> VoiceId {
        let mut state = self.state.lock();
        let id = VoiceId(state.allocate_id());
        state.voices.push(ActiveVoice {
            id,
            spec,
            stop: None,
            on_ended: Some(on_ended),
            finished: false,
        });
        id
    }

    fn stop_voice(&self, voice: VoiceId, at: f64, fade: f64) {
        let mut state = self.state.lock();
        if let Some(active) = state.voices.iter_mut().find(|v| v.id == voice) {
            let earlier = match active.stop {
                Some((existing, _)) => at < existing,
                None => true,
            };
            if earlier {
                active.stop = Some((at, fade.max(0.0)));
            }
        }
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Mixer")
            .field("channels", &self.num_channels)
            .field("sample_rate", &self.sample_rate)
            .field("frame", &state.frame)
            .field("nodes", &state.nodes.len())
            .field("voices", &state.voices.len())
            .finish()
    }
}
