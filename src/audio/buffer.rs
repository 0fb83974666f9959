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
use std::sync::Arc;
use std::time::Duration;

/// Decoded PCM audio held entirely in memory.
///
/// Samples are interleaved f32. The data is stored behind an Arc so voices can read it
/// without copying; it is never mutated after construction.
#[derive(Clone)]
pub struct AudioBuffer {
    data: Arc<[f32]>,
    channel_count: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Creates a buffer from interleaved samples. A channel count of zero is treated as mono.
    pub fn new(interleaved: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            data: interleaved.into(),
            channel_count: channel_count.max(1),
            sample_rate,
        }
    }

    /// Creates a buffer of silence.
    pub fn silent(frames: usize, channel_count: u16, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1);
        Self::new(
            vec![0.0; frames * channel_count as usize],
            channel_count,
            sample_rate,
        )
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Returns the sample rate of the audio data.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    /// Returns the playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the playback length.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_secs())
    }

    /// Returns the raw interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.data
    }

    /// Returns a single sample. Channels beyond the buffer's own wrap around, so a mono
    /// buffer feeds every output channel.
    #[inline]
    pub fn sample(&self, frame: usize, channel: usize) -> f32 {
        let channels = self.channel_count as usize;
        self.data
            .get(frame * channels + channel % channels)
            .copied()
            .unwrap_or(0.0)
    }

    /// Reads the buffer at a fractional frame position using linear interpolation.
    #[inline]
    pub fn interpolate(&self, position: f64, channel: usize) -> f32 {
        if position < 0.0 {
            return 0.0;
        }
        let frame = position.floor() as usize;
        let frac = (position - frame as f64) as f32;
        let s0 = self.sample(frame, channel);
        let s1 = self.sample(frame + 1, channel);
        s0 + (s1 - s0) * frac
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Returns a copy of this buffer converted to the given sample rate using linear
    /// interpolation. Returns a cheap clone if the rates already match.
    pub fn resample(&self, target_rate: u32) -> AudioBuffer {
        if target_rate == self.sample_rate || self.sample_rate == 0 || target_rate == 0 {
            return self.clone();
        }

        let ratio = target_rate as f64 / self.sample_rate as f64;
        let channels = self.channel_count as usize;
        let target_frames = (self.frames() as f64 * ratio).ceil() as usize;
        let mut output = Vec::with_capacity(target_frames * channels);

        for target_frame in 0..target_frames {
            let source_pos = target_frame as f64 / ratio;
            for channel in 0..channels {
                output.push(self.interpolate(source_pos, channel));
            }
        }

        AudioBuffer::new(output, self.channel_count, target_rate)
    }

    /// Returns the largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.data.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
    }
}

impl std::fmt::Debug for AudioBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBuffer")
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}
