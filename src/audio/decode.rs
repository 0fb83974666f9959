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

//! Decoding of encoded audio bytes (WAV, FLAC, MP3, Ogg, ...) into memory.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use tracing::debug;

use super::buffer::AudioBuffer;

/// Error types for decoding operations
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Unsupported or unrecognized audio stream: {0}")]
    Unsupported(String),

    #[error("No audio track found")]
    NoAudioTrack,

    #[error("Audio stream contained no samples")]
    Empty,

    #[error("Audio file error: {0}")]
    AudioError(#[from] SymphoniaError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Decodes an encoded byte stream into an interleaved buffer at its native sample rate.
/// `extension` is an optional format hint such as `"wav"`.
pub fn decode(bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioBuffer, DecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension {
        hint.with_extension(extension);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();
    let probed = get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;
    let track_id = track.id;
    let declared_rate = track.codec_params.sample_rate;

    let decoder_opts: DecoderOptions = Default::default();
    let mut decoder = get_codecs()
        .make(&track.codec_params, &decoder_opts)
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let mut samples = Vec::new();
    let mut channels = 0u16;
    let mut sample_rate = declared_rate.unwrap_or(0);

    while let Some(packet) = read_next_packet(format_reader.as_mut(), decoder.as_mut())? {
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                decoder.decode(&packet)?
            }
            // A corrupt packet is skipped rather than failing the whole sample.
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = e, "Skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if decoded.frames() == 0 {
            continue;
        }
        channels = spec.channels.count() as u16;
        sample_rate = spec.rate;

        let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buffer.samples());
    }

    if samples.is_empty() || channels == 0 {
        return Err(DecodeError::Empty);
    }

    Ok(AudioBuffer::new(samples, channels, sample_rate))
}

/// Decodes an encoded byte stream and converts it to the given sample rate.
pub fn decode_to_rate(
    bytes: Vec<u8>,
    extension: Option<&str>,
    target_rate: u32,
) -> Result<AudioBuffer, DecodeError> {
    let buffer = decode(bytes, extension)?;
    if buffer.sample_rate() != target_rate {
        debug!(
            source_rate = buffer.sample_rate(),
            target_rate, "Transcoding sample"
        );
    }
    Ok(buffer.resample(target_rate))
}

/// Reads the next packet, treating end of stream as `None`. ResetRequired resets the
/// decoder and keeps reading.
fn read_next_packet(
    format_reader: &mut dyn FormatReader,
    decoder: &mut dyn Decoder,
) -> Result<Option<Packet>, DecodeError> {
    loop {
        match format_reader.next_packet() {
            Ok(packet) => return Ok(Some(packet)),
            Err(SymphoniaError::ResetRequired) => decoder.reset(),
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(None)
            }
            // Some formats report the end of the stream as a decode error.
            Err(SymphoniaError::DecodeError(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
}
