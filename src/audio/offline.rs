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

//! Faster-than-real-time rendering.
//!
//! Only one offline render may run at a time; callers go through
//! [`crate::render::RenderQueue`] rather than using this directly from concurrent tasks.

use super::buffer::AudioBuffer;
use super::effects::Effect;
use super::graph::{AudioGraph, NodeId, VoiceSpec};
use super::mixer::Mixer;

/// Frames rendered per block.
const BLOCK_FRAMES: usize = 1024;

/// An offline render: a private mixer, an effect chain on its output and a fixed length.
pub struct OfflineContext {
    mixer: Mixer,
    effects: Vec<Box<dyn Effect>>,
    length_secs: f64,
}

impl OfflineContext {
    /// Creates a context that renders `length_secs` of audio.
    pub fn new(channels: u16, sample_rate: u32, length_secs: f64) -> Self {
        Self {
            mixer: Mixer::new(channels, sample_rate),
            effects: Vec::new(),
            length_secs: length_secs.max(0.0),
        }
    }

    /// The graph voices should be scheduled on.
    pub fn graph(&self) -> &Mixer {
        &self.mixer
    }

    /// Appends an effect to the output chain.
    pub fn add_effect(&mut self, effect: Box<dyn Effect>) {
        self.effects.push(effect);
    }

    /// Renders the whole length and returns the result.
    pub fn render(mut self) -> AudioBuffer {
        let channels = self.mixer.num_channels() as usize;
        let sample_rate = self.mixer.sample_rate();
        // Absorb float error so 0.1s + 0.05s at 1kHz is 150 frames, not 151.
        let total_frames = (self.length_secs * sample_rate as f64 - 1e-6).ceil().max(0.0) as usize;

        let mut output = Vec::with_capacity(total_frames * channels);
        let mut block = vec![0.0f32; BLOCK_FRAMES * channels];
        let mut remaining = total_frames;
        while remaining > 0 {
            let frames = remaining.min(BLOCK_FRAMES);
            let block = &mut block[..frames * channels];
            self.mixer.render(block);
            for frame in block.chunks_exact_mut(channels) {
                for effect in self.effects.iter_mut() {
                    effect.process_frame(frame);
                }
            }
            output.extend_from_slice(block);
            remaining -= frames;
        }

        AudioBuffer::new(output, channels as u16, sample_rate)
    }
}

/// Renders a buffer through an effect chain, appending `tail_secs` so decaying effects are
/// not cut off. The output keeps the source's channel count and sample rate.
pub fn render_through(
    source: &AudioBuffer,
    effects: Vec<Box<dyn Effect>>,
    tail_secs: f64,
) -> AudioBuffer {
    let mut context = OfflineContext::new(
        source.channel_count(),
        source.sample_rate(),
        source.duration_secs() + tail_secs.max(0.0),
    );
    for effect in effects {
        context.add_effect(effect);
    }
    context.graph().start_voice(
        VoiceSpec {
            buffer: source.clone(),
            rate: 1.0,
            start: 0.0,
            fade_in: 0.0,
            fade_out: 0.0,
            destination: NodeId::MASTER,
        },
        Box::new(|| {}),
    );
    context.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::effects::{Echo, Gain};

    #[test]
    fn test_render_length_includes_tail() {
        let source = AudioBuffer::new(vec![0.5; 1000], 1, 1000);
        let rendered = render_through(&source, Vec::new(), 0.5);
        assert_eq!(rendered.frames(), 1500);
        assert_eq!(rendered.sample(10, 0), 0.5);
        assert_eq!(rendered.sample(1200, 0), 0.0);
    }

    #[test]
    fn test_render_applies_effects_in_order() {
        let source = AudioBuffer::new(vec![1.0; 100], 1, 1000);
        let rendered = render_through(
            &source,
            vec![Box::new(Gain::new(0.5)), Box::new(Gain::new(0.5))],
            0.0,
        );
        assert_eq!(rendered.sample(50, 0), 0.25);
    }

    #[test]
    fn test_echo_tail_is_rendered() {
        let mut impulse = vec![0.0; 10];
        impulse[0] = 1.0;
        let source = AudioBuffer::new(impulse, 1, 1000);
        let rendered = render_through(
            &source,
            vec![Box::new(Echo::new(0.1, 0.5, 1.0, 1, 1000))],
            0.5,
        );
        assert_eq!(rendered.sample(100, 0), 1.0);
        assert_eq!(rendered.sample(200, 0), 0.5);
    }

    #[test]
    fn test_voices_scheduled_on_context() {
        let context = OfflineContext::new(2, 1000, 0.2);
        context.graph().start_voice(
            VoiceSpec {
                buffer: AudioBuffer::new(vec![1.0; 50], 1, 1000),
                rate: 1.0,
                start: 0.1,
                fade_in: 0.0,
                fade_out: 0.0,
                destination: NodeId::MASTER,
            },
            Box::new(|| {}),
        );
        let rendered = context.render();
        assert_eq!(rendered.channel_count(), 2);
        assert_eq!(rendered.sample(50, 0), 0.0);
        assert_eq!(rendered.sample(120, 1), 1.0);
        assert_eq!(rendered.sample(170, 0), 0.0);
    }
}
