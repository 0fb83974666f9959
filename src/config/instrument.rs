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
use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;
use super::parse_duration;

/// An effect in a prerender chain.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectSpec {
    /// Constant gain.
    Gain { gain: f32 },
    /// Feedback delay. `delay` is a duration such as `250ms`.
    Echo {
        delay: String,
        feedback: f32,
        mix: f32,
    },
    /// One-pole low-pass filter with a cutoff in Hz.
    Lowpass { cutoff: f32 },
}

/// A YAML representation of a virtual instrument: a sample set run through an
/// effect chain once and cached under its own name.
#[derive(Deserialize, Clone, Debug)]
pub struct InstrumentDefinition {
    /// The name the rendered set is cached under.
    name: String,

    /// The sample set to render.
    source: String,

    /// Extra audio rendered after each sample so effects can ring out.
    tail: Option<String>,

    /// The effect chain, applied in order.
    #[serde(default)]
    effects: Vec<EffectSpec>,
}

impl InstrumentDefinition {
    /// Creates a new instrument definition.
    pub fn new(
        name: &str,
        source: &str,
        tail: Option<&str>,
        effects: Vec<EffectSpec>,
    ) -> InstrumentDefinition {
        InstrumentDefinition {
            name: name.to_string(),
            source: source.to_string(),
            tail: tail.map(str::to_string),
            effects,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the tail length (default: none).
    pub fn tail(&self) -> Result<Duration, ConfigError> {
        match &self.tail {
            Some(tail) => parse_duration(tail),
            None => Ok(Duration::ZERO),
        }
    }

    pub fn effects(&self) -> &[EffectSpec] {
        &self.effects
    }
}
