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
use std::error::Error;

pub mod buffer;
pub mod cpal;
pub mod decode;
pub mod effects;
pub mod graph;
pub mod mixer;
pub mod offline;

pub use buffer::AudioBuffer;
pub use graph::{AudioGraph, EndedCallback, GraphError, NodeId, VoiceId, VoiceSpec};
pub use mixer::Mixer;

/// Lists devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::Device>, Box<dyn Error>> {
    cpal::Device::list()
}

/// Gets a device with the given name, or the default output device.
pub fn get_device(name: Option<&str>) -> Result<cpal::Device, Box<dyn Error>> {
    cpal::Device::get(name)
}
