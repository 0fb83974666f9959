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

//! The audio-graph boundary used by samplers and stages.
//!
//! Times are transport seconds. Gain nodes form a tree that ends at [`NodeId::MASTER`];
//! voices play a buffer into one gain node.

use std::fmt;

use super::buffer::AudioBuffer;

/// Identifies a gain node in an audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The graph's output bus. It always exists and has unity gain.
    pub const MASTER: NodeId = NodeId(0);
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NodeId::MASTER {
            write!(f, "master")
        } else {
            write!(f, "node#{}", self.0)
        }
    }
}

/// Identifies a playing voice in an audio graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceId(pub u64);

/// Callback fired once when a voice stops producing sound.
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Errors from graph routing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("{0} is already connected")]
    AlreadyConnected(NodeId),

    #[error("connecting {0} to {1} would create a cycle")]
    Cycle(NodeId, NodeId),
}

/// Everything needed to start a voice.
#[derive(Clone, Debug)]
pub struct VoiceSpec {
    /// The audio to play.
    pub buffer: AudioBuffer,
    /// Playback-rate multiplier (2.0 plays an octave up).
    pub rate: f64,
    /// Transport time at which playback begins.
    pub start: f64,
    /// Length of the linear fade-in, in seconds.
    pub fade_in: f64,
    /// Length of the linear fade-out applied at the natural end of the buffer, in seconds.
    pub fade_out: f64,
    /// The gain node the voice plays into.
    pub destination: NodeId,
}

/// An audio graph: a transport clock, gain nodes with automation, and buffer voices.
pub trait AudioGraph: Send + Sync {
    /// The graph's sample rate.
    fn sample_rate(&self) -> u32;

    /// The current transport time in seconds.
    fn now(&self) -> f64;

    /// Creates a gain node. A node with no destination is silent until connected.
    fn create_gain(&self, destination: Option<NodeId>, initial: f32) -> NodeId;

    /// Routes an unconnected node to a destination. Nodes can only be connected once.
    fn connect(&self, node: NodeId, destination: NodeId) -> Result<(), GraphError>;

    /// Ramps a node's gain linearly from whatever value it holds at `start` to `target`
    /// at `end`, replacing any automation scheduled at or after `start`.
    fn ramp_gain(&self, node: NodeId, target: f32, start: f64, end: f64)
        -> Result<(), GraphError>;

    /// The gain value a node holds at the given time, if the node exists.
    fn gain_at(&self, node: NodeId, time: f64) -> Option<f32>;

    /// Schedules the removal of a node at the given time.
    fn dispose_node(&self, node: NodeId, at: f64);

    /// Starts a voice. `on_ended` fires once when the voice finishes, whether naturally
    /// or after [`AudioGraph::stop_voice`].
    fn start_voice(&self, spec: VoiceSpec, on_ended: EndedCallback) -> VoiceId;

    /// Stops a voice at `at` with a linear fade of `fade` seconds (zero stops instantly).
    fn stop_voice(&self, voice: VoiceId, at: f64, fade: f64);
}
