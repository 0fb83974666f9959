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

//! Small effects applied by offline rendering.

use crate::config::error::ConfigError;
use crate::config::EffectSpec;

/// An effect that processes interleaved frames in place.
pub trait Effect: Send {
    /// Processes a single interleaved frame.
    fn process_frame(&mut self, frame: &mut [f32]);
}

/// Builds an effect from its configuration.
pub fn from_spec(
    spec: &EffectSpec,
    channels: u16,
    sample_rate: u32,
) -> Result<Box<dyn Effect>, ConfigError> {
    Ok(match spec {
        EffectSpec::Gain { gain } => Box::new(Gain::new(*gain)),
        EffectSpec::Echo {
            delay,
            feedback,
            mix,
        } => {
            let delay = crate::config::parse_duration(delay)?;
            Box::new(Echo::new(
                delay.as_secs_f64(),
                *feedback,
                *mix,
                channels,
                sample_rate,
            ))
        }
        EffectSpec::Lowpass { cutoff } => Box::new(LowPass::new(*cutoff, channels, sample_rate)),
    })
}

/// Scales every sample by a constant.
pub struct Gain {
    gain: f32,
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl Effect for Gain {
    fn process_frame(&mut self, frame: &mut [f32]) {
        for sample in frame.iter_mut() {
            *sample *= self.gain;
        }
    }
}

/// A feedback delay line per channel.
pub struct Echo {
    lines: Vec<Vec<f32>>,
    position: usize,
    feedback: f32,
    mix: f32,
}

impl Echo {
    pub fn new(delay_secs: f64, feedback: f32, mix: f32, channels: u16, sample_rate: u32) -> Self {
        let length = ((delay_secs * sample_rate as f64).round() as usize).max(1);
        Self {
            lines: vec![vec![0.0; length]; channels.max(1) as usize],
            position: 0,
            // Feedback at or above unity never decays.
            feedback: feedback.clamp(0.0, 0.99),
            mix: mix.clamp(0.0, 1.0),
        }
    }
}

impl Effect for Echo {
    fn process_frame(&mut self, frame: &mut [f32]) {
        let channels = self.lines.len();
        for (channel, sample) in frame.iter_mut().enumerate() {
            let line = &mut self.lines[channel % channels];
            let delayed = line[self.position];
            let dry = *sample;
            line[self.position] = dry + delayed * self.feedback;
            *sample = dry + delayed * self.mix;
        }
        self.position = (self.position + 1) % self.lines[0].len();
    }
}

/// A one-pole low-pass filter per channel.
pub struct LowPass {
    alpha: f32,
    state: Vec<f32>,
}

impl LowPass {
    pub fn new(cutoff: f32, channels: u16, sample_rate: u32) -> Self {
        let cutoff = cutoff.clamp(1.0, sample_rate as f32 / 2.0);
        let alpha = 1.0 - (-2.0 * std::f32::consts::PI * cutoff / sample_rate as f32).exp();
        Self {
            alpha,
            state: vec![0.0; channels.max(1) as usize],
        }
    }
}

impl Effect for LowPass {
    fn process_frame(&mut self, frame: &mut [f32]) {
        let channels = self.state.len();
        for (channel, sample) in frame.iter_mut().enumerate() {
            let state = &mut self.state[channel % channels];
            *state += self.alpha * (*sample - *state);
            *sample = *state;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain() {
        let mut gain = Gain::new(0.5);
        let mut frame = [1.0, -1.0];
        gain.process_frame(&mut frame);
        assert_eq!(frame, [0.5, -0.5]);
    }

    #[test]
    fn test_echo_repeats_impulse() {
        let mut echo = Echo::new(0.004, 0.5, 1.0, 1, 1000);
        let mut output = Vec::new();
        for i in 0..13 {
            let mut frame = [if i == 0 { 1.0 } else { 0.0 }];
            echo.process_frame(&mut frame);
            output.push(frame[0]);
        }
        assert_eq!(output[0], 1.0);
        assert_eq!(output[4], 1.0);
        assert_eq!(output[8], 0.5);
        assert_eq!(output[12], 0.25);
        assert_eq!(output[3], 0.0);
    }

    #[test]
    fn test_lowpass_settles_on_dc() {
        let mut lowpass = LowPass::new(100.0, 1, 44100);
        let mut last = 0.0;
        for _ in 0..44100 {
            let mut frame = [1.0];
            lowpass.process_frame(&mut frame);
            assert!(frame[0] >= last);
            last = frame[0];
        }
        assert!((last - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_from_spec() {
        let spec = EffectSpec::Echo {
            delay: "250ms".to_string(),
            feedback: 0.4,
            mix: 0.3,
        };
        assert!(from_spec(&spec, 2, 44100).is_ok());

        let bad = EffectSpec::Echo {
            delay: "soon".to_string(),
            feedback: 0.4,
            mix: 0.3,
        };
        assert!(from_spec(&bad, 2, 44100).is_err());
    }
}
