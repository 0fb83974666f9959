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
use crate::audio::decode::DecodeError;
use crate::audio::graph::GraphError;
use crate::config::error::ConfigError;
use crate::notes::NoteError;
use crate::samples::SampleKey;

/// Errors surfaced by the engine. Lifecycle and key errors indicate a caller bug and are
/// never swallowed; render failures carry only strings so that every caller sharing an
/// in-flight render can receive a copy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("invalid note format: '{0}'")]
    InvalidNoteFormat(String),

    #[error("no sample within {bound} semitones of pitch {target}")]
    NoSampleWithinRange { target: i32, bound: u32 },

    #[error("unknown sample key: {0}")]
    UnknownKey(SampleKey),

    #[error("{0} has been disposed")]
    Disposed(&'static str),

    #[error("render of '{key}' failed: {reason}")]
    RenderFailure { key: String, reason: String },

    #[error("stage has already been deactivated")]
    AlreadyDeactivated,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("audio graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("sample library error: {0}")]
    Library(String),

    #[error("config error: {0}")]
    Config(String),
}

impl From<NoteError> for Error {
    fn from(err: NoteError) -> Self {
        match err {
            NoteError::InvalidNoteFormat(note) => Error::InvalidNoteFormat(note),
            NoteError::NoSampleWithinRange { target, bound } => {
                Error::NoSampleWithinRange { target, bound }
            }
        }
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl Error {
    /// Wraps an arbitrary failure as a render failure for the given cache key.
    pub fn render_failure(key: &str, reason: impl std::fmt::Display) -> Self {
        Error::RenderFailure {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}
