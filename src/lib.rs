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

//! A sample-rendering and instrument-lifecycle engine for generative ambient music.
//!
//! Pieces play pitch-shifted samplers ([`samples::Sampler`]) built from sample sets
//! ([`samples::BufferSet`]) that are either loaded from a [`library::SampleLibrary`] or
//! prerendered once through the [`render::PrerenderCache`]. Each activation of a piece is
//! wrapped in a [`stage::Stage`] so starting and stopping it never clicks.

pub mod audio;
pub mod config;
pub mod drone;
pub mod error;
pub mod library;
pub mod notes;
pub mod render;
pub mod samples;
pub mod stage;
#[cfg(test)]
pub mod testutil;

pub use error::Error;
