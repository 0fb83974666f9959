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

//! Loaded, decoded sample sets.

use std::collections::BTreeMap;
use std::fmt;

use tokio::task::JoinSet;
use tracing::debug;

use crate::audio::decode;
use crate::audio::AudioBuffer;
use crate::error::Error;
use crate::notes::{self, NoteError};

/// Identifies one sample within an instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleKey {
    /// A note name such as `C#4`.
    Name(String),
    /// A position in an ordered list of samples.
    Index(usize),
}

impl SampleKey {
    /// The pitch number of a note-named key. Index keys have no pitch.
    pub fn pitch(&self) -> Option<Result<i32, NoteError>> {
        match self {
            SampleKey::Name(name) => Some(notes::to_pitch_number(name)),
            SampleKey::Index(_) => None,
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKey::Name(name) => write!(f, "{}", name),
            SampleKey::Index(index) => write!(f, "{}", index),
        }
    }
}

impl From<&str> for SampleKey {
    fn from(name: &str) -> Self {
        SampleKey::Name(name.to_string())
    }
}

impl From<String> for SampleKey {
    fn from(name: String) -> Self {
        SampleKey::Name(name)
    }
}

impl From<usize> for SampleKey {
    fn from(index: usize) -> Self {
        SampleKey::Index(index)
    }
}

/// One sample as supplied by a sample source: encoded bytes or an already decoded buffer.
#[derive(Clone, Debug)]
pub enum SampleData {
    Encoded {
        bytes: Vec<u8>,
        /// File extension used as a format hint, e.g. `wav`.
        extension: Option<String>,
    },
    Decoded(AudioBuffer),
}

impl SampleData {
    fn is_decoded(&self) -> bool {
        matches!(self, SampleData::Decoded(_))
    }
}

/// The samples making up an instrument, either as an ordered list or keyed by note name.
#[derive(Clone, Debug)]
pub enum SampleSource {
    Indexed(Vec<SampleData>),
    Named(BTreeMap<String, SampleData>),
}

impl SampleSource {
    /// Number of samples in the source.
    pub fn len(&self) -> usize {
        match self {
            SampleSource::Indexed(samples) => samples.len(),
            SampleSource::Named(samples) => samples.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens the source into keyed entries.
    pub fn into_entries(self) -> Vec<(SampleKey, SampleData)> {
        match self {
            SampleSource::Indexed(samples) => samples
                .into_iter()
                .enumerate()
                .map(|(index, data)| (SampleKey::Index(index), data))
                .collect(),
            SampleSource::Named(samples) => samples
                .into_iter()
                .map(|(name, data)| (SampleKey::Name(name), data))
                .collect(),
        }
    }

    /// Builds a source from decoded buffers. A set keyed entirely by name becomes
    /// `Named`; a set keyed by the indices `0..n` becomes `Indexed`. Mixed keys or gaps in
    /// the indices can't be represented and are rejected.
    pub fn from_buffers(buffers: &BTreeMap<SampleKey, AudioBuffer>) -> Result<Self, Error> {
        let decoded = |buffer: &AudioBuffer| SampleData::Decoded(buffer.clone());

        if buffers.keys().all(|key| matches!(key, SampleKey::Name(_))) {
            return Ok(SampleSource::Named(
                buffers
                    .iter()
                    .map(|(key, buffer)| (key.to_string(), decoded(buffer)))
                    .collect(),
            ));
        }

        let dense = buffers
            .keys()
            .enumerate()
            .all(|(position, key)| *key == SampleKey::Index(position));
        if !dense {
            return Err(Error::Library(format!(
                "sample keys must be all names or the indices 0..{}",
                buffers.len()
            )));
        }
        Ok(SampleSource::Indexed(buffers.values().map(decoded).collect()))
    }
}

/// A fully loaded set of decoded samples for one instrument.
///
/// A set is never observable half-loaded: [`BufferSet::load`] resolves only once every
/// member has been decoded. After [`BufferSet::dispose`] every read fails with
/// [`Error::Disposed`].
pub struct BufferSet {
    buffers: Option<BTreeMap<SampleKey, AudioBuffer>>,
}

impl BufferSet {
    /// Loads a sample source, converting every sample to `sample_rate`.
    ///
    /// If every entry is already decoded the set is ready without touching the blocking
    /// pool. Otherwise encoded entries are decoded concurrently and the set resolves once
    /// all of them have finished. The first decode failure fails the whole load.
    pub async fn load(source: SampleSource, sample_rate: u32) -> Result<BufferSet, Error> {
        let entries = source.into_entries();
        let mut buffers = BTreeMap::new();

        if entries.iter().all(|(_, data)| data.is_decoded()) {
            for (key, data) in entries {
                if let SampleData::Decoded(buffer) = data {
                    buffers.insert(key, buffer.resample(sample_rate));
                }
            }
            return Ok(BufferSet::from_buffers(buffers));
        }

        let mut decodes = JoinSet::new();
        for (key, data) in entries {
            match data {
                SampleData::Decoded(buffer) => {
                    buffers.insert(key, buffer.resample(sample_rate));
                }
                SampleData::Encoded { bytes, extension } => {
                    decodes.spawn_blocking(move || {
                        let result =
                            decode::decode_to_rate(bytes, extension.as_deref(), sample_rate);
                        (key, result)
                    });
                }
            }
        }

        while let Some(joined) = decodes.join_next().await {
            let (key, result) = joined.map_err(|e| Error::Decode(e.to_string()))?;
            let buffer = result.map_err(|e| Error::Decode(format!("{}: {}", key, e)))?;
            debug!(
                key = key.to_string(),
                frames = buffer.frames(),
                "Decoded sample"
            );
            buffers.insert(key, buffer);
        }

        Ok(BufferSet::from_buffers(buffers))
    }

    /// Wraps buffers that are already decoded at the right rate.
    pub fn from_buffers(buffers: BTreeMap<SampleKey, AudioBuffer>) -> BufferSet {
        BufferSet {
            buffers: Some(buffers),
        }
    }

    /// Consumes the set, returning its buffers.
    pub fn into_buffers(mut self) -> Result<BTreeMap<SampleKey, AudioBuffer>, Error> {
        self.buffers.take().ok_or(Error::Disposed("buffer set"))
    }

    fn buffers(&self) -> Result<&BTreeMap<SampleKey, AudioBuffer>, Error> {
        self.buffers.as_ref().ok_or(Error::Disposed("buffer set"))
    }

    /// Returns the buffer for a key.
    pub fn get(&self, key: &SampleKey) -> Result<AudioBuffer, Error> {
        self.buffers()?
            .get(key)
            .cloned()
            .ok_or_else(|| Error::UnknownKey(key.clone()))
    }

    /// The keys in the set, in order.
    pub fn keys(&self) -> Result<impl Iterator<Item = &SampleKey>, Error> {
        Ok(self.buffers()?.keys())
    }

    /// Iterates over every key and buffer.
    pub fn iter(&self) -> Result<impl Iterator<Item = (&SampleKey, &AudioBuffer)>, Error> {
        Ok(self.buffers()?.iter())
    }

    /// Number of samples in the set.
    pub fn len(&self) -> Result<usize, Error> {
        Ok(self.buffers()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.buffers()?.is_empty())
    }

    /// Total memory held by the set's PCM data.
    pub fn memory_size(&self) -> Result<usize, Error> {
        Ok(self.buffers()?.values().map(AudioBuffer::memory_size).sum())
    }

    pub fn is_disposed(&self) -> bool {
        self.buffers.is_none()
    }

    /// Releases every buffer. A second call fails with [`Error::Disposed`].
    pub fn dispose(&mut self) -> Result<(), Error> {
        match self.buffers.take() {
            Some(buffers) => {
                debug!(samples = buffers.len(), "Disposed buffer set");
                Ok(())
            }
            None => Err(Error::Disposed("buffer set")),
        }
    }
}

impl fmt::Debug for BufferSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.buffers {
            Some(buffers) => f
                .debug_struct("BufferSet")
                .field("keys", &buffers.keys().collect::<Vec<_>>())
                .finish(),
            None => f.debug_struct("BufferSet").field("disposed", &true).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::wav_bytes;

    fn encoded(samples: &[f32], sample_rate: u32) -> SampleData {
        SampleData::Encoded {
            bytes: wav_bytes(samples, 1, sample_rate),
            extension: Some("wav".to_string()),
        }
    }

    #[tokio::test]
    async fn test_load_decoded_named() {
        let mut samples = BTreeMap::new();
        samples.insert(
            "C4".to_string(),
            SampleData::Decoded(AudioBuffer::new(vec![0.1; 10], 1, 44100)),
        );
        samples.insert(
            "G4".to_string(),
            SampleData::Decoded(AudioBuffer::new(vec![0.2; 20], 1, 44100)),
        );

        let set = BufferSet::load(SampleSource::Named(samples), 44100)
            .await
            .unwrap();
        assert_eq!(set.len().unwrap(), 2);
        assert_eq!(set.get(&"G4".into()).unwrap().frames(), 20);
        let keys: Vec<_> = set.keys().unwrap().cloned().collect();
        assert_eq!(keys, vec![SampleKey::from("C4"), SampleKey::from("G4")]);
    }

    #[tokio::test]
    async fn test_load_encoded_indexed() {
        let source = SampleSource::Indexed(vec![
            encoded(&[0.5; 100], 44100),
            SampleData::Decoded(AudioBuffer::new(vec![0.25; 50], 1, 44100)),
            encoded(&[-0.5; 200], 44100),
        ]);

        let set = BufferSet::load(source, 44100).await.unwrap();
        assert_eq!(set.len().unwrap(), 3);
        assert_eq!(set.get(&0.into()).unwrap().frames(), 100);
        assert_eq!(set.get(&1.into()).unwrap().frames(), 50);
        assert_eq!(set.get(&2.into()).unwrap().frames(), 200);
    }

    #[tokio::test]
    async fn test_load_resamples() {
        let source = SampleSource::Indexed(vec![encoded(&[0.5; 441], 44100)]);
        let set = BufferSet::load(source, 48000).await.unwrap();
        let buffer = set.get(&0.into()).unwrap();
        assert_eq!(buffer.sample_rate(), 48000);
        assert!((buffer.frames() as i64 - 480).abs() <= 1);
    }

    #[tokio::test]
    async fn test_load_failure_is_all_or_nothing() {
        let source = SampleSource::Indexed(vec![
            encoded(&[0.5; 100], 44100),
            SampleData::Encoded {
                bytes: b"garbage".to_vec(),
                extension: None,
            },
        ]);
        let result = BufferSet::load(source, 44100).await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_unknown_key_and_dispose() {
        let mut buffers = BTreeMap::new();
        buffers.insert(SampleKey::from("C4"), AudioBuffer::silent(10, 1, 44100));
        let mut set = BufferSet::from_buffers(buffers);

        assert!(matches!(
            set.get(&"D4".into()),
            Err(Error::UnknownKey(SampleKey::Name(name))) if name == "D4"
        ));

        set.dispose().unwrap();
        assert!(set.is_disposed());
        assert!(matches!(set.get(&"C4".into()), Err(Error::Disposed(_))));
        assert!(matches!(set.len(), Err(Error::Disposed(_))));
        assert!(matches!(set.dispose(), Err(Error::Disposed(_))));
    }

    #[test]
    fn test_source_from_buffers() {
        let mut indexed = BTreeMap::new();
        indexed.insert(SampleKey::Index(1), AudioBuffer::silent(2, 1, 100));
        indexed.insert(SampleKey::Index(0), AudioBuffer::silent(1, 1, 100));
        match SampleSource::from_buffers(&indexed).unwrap() {
            SampleSource::Indexed(samples) => {
                assert_eq!(samples.len(), 2);
                assert!(matches!(&samples[0], SampleData::Decoded(b) if b.frames() == 1));
            }
            SampleSource::Named(_) => panic!("expected indexed source"),
        }

        let mut named = BTreeMap::new();
        named.insert(SampleKey::from("A3"), AudioBuffer::silent(2, 1, 100));
        match SampleSource::from_buffers(&named).unwrap() {
            SampleSource::Named(samples) => assert!(samples.contains_key("A3")),
            SampleSource::Indexed(_) => panic!("expected named source"),
        }
    }

    #[test]
    fn test_source_from_buffers_rejects_unrepresentable_keys() {
        let mut mixed = BTreeMap::new();
        mixed.insert(SampleKey::Index(0), AudioBuffer::silent(1, 1, 100));
        mixed.insert(SampleKey::from("C4"), AudioBuffer::silent(1, 1, 100));
        assert!(matches!(
            SampleSource::from_buffers(&mixed),
            Err(Error::Library(_))
        ));

        let mut sparse = BTreeMap::new();
        sparse.insert(SampleKey::Index(0), AudioBuffer::silent(1, 1, 100));
        sparse.insert(SampleKey::Index(2), AudioBuffer::silent(1, 1, 100));
        assert!(matches!(
            SampleSource::from_buffers(&sparse),
            Err(Error::Library(_))
        ));

        assert!(SampleSource::from_buffers(&BTreeMap::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_key_pitch() {
        assert_eq!(SampleKey::from("C4").pitch(), Some(Ok(60)));
        assert_eq!(SampleKey::Index(3).pitch(), None);
        assert_eq!(SampleKey::Index(3).to_string(), "3");
    }
}
