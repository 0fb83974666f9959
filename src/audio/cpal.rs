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
use std::{error::Error, fmt, sync::Arc};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info};

use super::mixer::Mixer;

/// A small wrapper around a cpal::Device.
pub struct Device {
    /// The name of the device.
    name: String,
    /// The maximum number of channels the device supports.
    max_channels: u16,
    /// The host ID of the device.
    host_id: cpal::HostId,
    /// The underlying cpal device.
    device: cpal::Device,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Channels={}) ({})",
            self.name,
            self.max_channels,
            self.host_id.name()
        )
    }
}

/// A running output stream. Audio stops when this is dropped.
pub struct OutputStream {
    _stream: cpal::Stream,
}

/// Integer callback: mix into a scratch buffer and convert.
fn create_converting_callback<T: cpal::SizedSample + cpal::FromSample<f32>>(
    mixer: Arc<Mixer>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut scratch = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        scratch.resize(data.len(), 0.0f32);
        mixer.render(&mut scratch);
        for (dst, &src) in data.iter_mut().zip(scratch.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

impl Device {
    /// Lists output devices across all available hosts.
    pub fn list() -> Result<Vec<Device>, Box<dyn Error>> {
        let mut devices: Vec<Device> = Vec::new();
        for host_id in cpal::available_hosts() {
            let host_devices = match cpal::host_from_id(host_id)?.devices() {
                Ok(host_devices) => host_devices,
                Err(e) => {
                    error!(
                        err = e.to_string(),
                        host = host_id.name(),
                        "Unable to list devices for host"
                    );
                    continue;
                }
            };

            for device in host_devices {
                let output_configs = match device.supported_output_configs() {
                    Ok(output_configs) => output_configs,
                    Err(_) => continue,
                };
                let max_channels = output_configs
                    .map(|output_config| output_config.channels())
                    .max()
                    .unwrap_or(0);

                if max_channels > 0 {
                    devices.push(Device {
                        name: device.name()?,
                        max_channels,
                        host_id,
                        device,
                    })
                }
            }
        }

        devices.sort_by_key(|device| device.name.to_string());
        Ok(devices)
    }

    /// Gets the named device, or the default output device when no name is given.
    pub fn get(name: Option<&str>) -> Result<Device, Box<dyn Error>> {
        match name {
            Some(name) => Device::list()?
                .into_iter()
                .find(|device| device.name.trim() == name)
                .ok_or_else(|| format!("no device found with name {}", name).into()),
            None => {
                let host = cpal::default_host();
                let device = host
                    .default_output_device()
                    .ok_or("no default output device")?;
                Ok(Device {
                    name: device.name()?,
                    max_channels: device.default_output_config()?.channels(),
                    host_id: host.id(),
                    device,
                })
            }
        }
    }

    /// The device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a stream that pulls its audio from the mixer.
    pub fn play(&self, mixer: Arc<Mixer>) -> Result<OutputStream, Box<dyn Error>> {
        let config = cpal::StreamConfig {
            channels: mixer.num_channels(),
            sample_rate: cpal::SampleRate(crate::audio::AudioGraph::sample_rate(mixer.as_ref())),
            buffer_size: cpal::BufferSize::Default,
        };
        let sample_format = self.device.default_output_config()?.sample_format();

        let stream = match sample_format {
            cpal::SampleFormat::F32 => {
                let mixer = mixer.clone();
                self.device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.render(data),
                    |err| error!("CPAL output stream error: {}", err),
                    None,
                )?
            }
            cpal::SampleFormat::I16 => self.device.build_output_stream(
                &config,
                create_converting_callback::<i16>(mixer.clone()),
                |err| error!("CPAL output stream error: {}", err),
                None,
            )?,
            cpal::SampleFormat::I32 => self.device.build_output_stream(
                &config,
                create_converting_callback::<i32>(mixer.clone()),
                |err| error!("CPAL output stream error: {}", err),
                None,
            )?,
            format => return Err(format!("unsupported sample format {}", format).into()),
        };

        stream.play()?;
        info!(
            device = self.name,
            channels = config.channels,
            sample_rate = config.sample_rate.0,
            "CPAL output stream started"
        );
        Ok(OutputStream { _stream: stream })
    }
}
