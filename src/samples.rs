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

//! Sampled instruments.
//!
//! This module provides:
//! - Loading of sample sources into decoded buffer sets
//! - The pitch-shifting sampler that plays any note from the nearest sample
//! - Voice tracking with a polyphony limit

mod buffer_set;
mod sampler;
mod voice;

pub use buffer_set::{BufferSet, SampleData, SampleKey, SampleSource};
pub use sampler::{Sampler, SamplerOptions};
pub use voice::{Voice, VoiceManager};
