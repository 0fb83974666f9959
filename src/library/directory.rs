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

//! A sample library kept on disk.
//!
//! Each set lives in `<root>/<name>/`. A set written by this library has a
//! `manifest.json` listing its samples in key order; a hand-made directory without a
//! manifest is read as a note-named set, one audio file per note (`C4.wav`, `F#3.flac`).

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::SampleLibrary;
use crate::error::Error;
use crate::samples::{SampleData, SampleSource};

const MANIFEST: &str = "manifest.json";
const MANIFEST_TMP: &str = "manifest.json.tmp";
const AUDIO_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "ogg", "aif", "aiff"];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Layout {
    Indexed,
    Named,
}

#[derive(Serialize, Deserialize, Debug)]
struct ManifestEntry {
    key: String,
    file: String,
}

#[derive(Serialize, Deserialize, Debug)]
struct Manifest {
    layout: Layout,
    samples: Vec<ManifestEntry>,
}

/// Saves that have been accepted but not yet written.
#[derive(Default)]
struct PendingWrites {
    next_generation: u64,
    /// The newest save of each name and its generation. Requests are served from here
    /// first.
    sets: HashMap<String, (u64, SampleSource)>,
    /// Generation of the newest save ever accepted for each name.
    latest: HashMap<String, u64>,
}

impl PendingWrites {
    fn begin(&mut self, name: &str, source: SampleSource) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.sets.insert(name.to_string(), (generation, source));
        self.latest.insert(name.to_string(), generation);
        generation
    }

    fn is_current(&self, name: &str, generation: u64) -> bool {
        self.latest.get(name) == Some(&generation)
    }

    /// Clears the pending copy only if no newer save has replaced it.
    fn finish(&mut self, name: &str, generation: u64) {
        if matches!(self.sets.get(name), Some((current, _)) if *current == generation) {
            self.sets.remove(name);
        }
    }
}

/// A sample library rooted at a directory.
pub struct DirectoryLibrary {
    root: PathBuf,
    pending: Arc<Mutex<PendingWrites>>,
    /// Held while a set is written so two writes never interleave on disk.
    write_lock: Arc<Mutex<()>>,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> DirectoryLibrary {
        DirectoryLibrary {
            root: root.into(),
            pending: Arc::new(Mutex::new(PendingWrites::default())),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of saves still being written.
    pub fn pending_writes(&self) -> usize {
        self.pending.lock().sets.len()
    }

    fn set_dir(&self, name: &str) -> Result<PathBuf, Error> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
        {
            return Err(Error::Library(format!("invalid sample set name '{}'", name)));
        }
        Ok(self.root.join(name))
    }
}

fn io_error(path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Library(format!("{}: {}", path.display(), err))
}

fn read_entry(dir: &Path, file: &str) -> Result<SampleData, Error> {
    let path = dir.join(file);
    let bytes = fs::read(&path).map_err(|e| io_error(&path, e))?;
    Ok(SampleData::Encoded {
        bytes,
        extension: path
            .extension()
            .map(|extension| extension.to_string_lossy().to_lowercase()),
    })
}

/// Reads a set directory. Returns `None` if the directory doesn't hold a set.
fn read_set(dir: &Path) -> Result<Option<SampleSource>, Error> {
    if !dir.is_dir() {
        return Ok(None);
    }

    let manifest_path = dir.join(MANIFEST);
    if manifest_path.is_file() {
        let contents = fs::read(&manifest_path).map_err(|e| io_error(&manifest_path, e))?;
        let manifest: Manifest =
            serde_json::from_slice(&contents).map_err(|e| io_error(&manifest_path, e))?;

        let source = match manifest.layout {
            Layout::Indexed => SampleSource::Indexed(
                manifest
                    .samples
                    .iter()
                    .map(|entry| read_entry(dir, &entry.file))
                    .collect::<Result<Vec<_>, Error>>()?,
            ),
            Layout::Named => SampleSource::Named(
                manifest
                    .samples
                    .iter()
                    .map(|entry| Ok((entry.key.clone(), read_entry(dir, &entry.file)?)))
                    .collect::<Result<BTreeMap<_, _>, Error>>()?,
            ),
        };
        return Ok(Some(source));
    }

    let mut samples = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(|e| io_error(dir, e))? {
        let path = entry.map_err(|e| io_error(dir, e))?.path();
        let is_audio = path.extension().is_some_and(|extension| {
            AUDIO_EXTENSIONS.contains(&extension.to_string_lossy().to_lowercase().as_str())
        });
        let (Some(stem), Some(file)) = (path.file_stem(), path.file_name()) else {
            continue;
        };
        if is_audio && path.is_file() {
            samples.insert(
                stem.to_string_lossy().to_string(),
                read_entry(dir, &file.to_string_lossy())?,
            );
        }
    }

    if samples.is_empty() {
        return Ok(None);
    }
    Ok(Some(SampleSource::Named(samples)))
}

fn write_sample(path: &Path, data: &SampleData) -> Result<(), Error> {
    match data {
        SampleData::Encoded { bytes, .. } => fs::write(path, bytes).map_err(|e| io_error(path, e)),
        SampleData::Decoded(buffer) => {
            let spec = WavSpec {
                channels: buffer.channel_count(),
                sample_rate: buffer.sample_rate(),
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            };
            let mut writer = WavWriter::create(path, spec).map_err(|e| io_error(path, e))?;
            for sample in buffer.samples() {
                writer
                    .write_sample(*sample)
                    .map_err(|e| io_error(path, e))?;
            }
            writer.finalize().map_err(|e| io_error(path, e))
        }
    }
}

fn file_name(key: &str, data: &SampleData) -> String {
    match data {
        SampleData::Decoded(_) => format!("{}.wav", key),
        SampleData::Encoded { extension, .. } => {
            format!("{}.{}", key, extension.as_deref().unwrap_or("bin"))
        }
    }
}

/// Writes every sample, then the manifest. The manifest is renamed into place last so a
/// half-written set is never read back.
fn write_set(dir: &Path, source: &SampleSource) -> Result<(), Error> {
    fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

    let entries: Vec<(String, &SampleData)> = match source {
        SampleSource::Indexed(samples) => samples
            .iter()
            .enumerate()
            .map(|(index, data)| (index.to_string(), data))
            .collect(),
        SampleSource::Named(samples) => samples
            .iter()
            .map(|(name, data)| (name.clone(), data))
            .collect(),
    };

    let mut manifest = Manifest {
        layout: match source {
            SampleSource::Indexed(_) => Layout::Indexed,
            SampleSource::Named(_) => Layout::Named,
        },
        samples: Vec::with_capacity(entries.len()),
    };
    for (key, data) in entries {
        let file = file_name(&key, data);
        write_sample(&dir.join(&file), data)?;
        manifest.samples.push(ManifestEntry { key, file });
    }

    let tmp = dir.join(MANIFEST_TMP);
    let contents = serde_json::to_vec_pretty(&manifest).map_err(|e| io_error(&tmp, e))?;
    fs::write(&tmp, contents).map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, dir.join(MANIFEST)).map_err(|e| io_error(&tmp, e))
}

#[async_trait]
impl SampleLibrary for DirectoryLibrary {
    async fn request(&self, names: &[String]) -> Result<HashMap<String, SampleSource>, Error> {
        let mut found = HashMap::new();
        let mut to_read = Vec::new();
        {
            let pending = self.pending.lock();
            for name in names {
                match pending.sets.get(name) {
                    Some((_, source)) => {
                        found.insert(name.clone(), source.clone());
                    }
                    None => to_read.push((name.clone(), self.set_dir(name)?)),
                }
            }
        }

        let read = tokio::task::spawn_blocking(move || {
            let mut read = Vec::new();
            for (name, dir) in to_read {
                if let Some(source) = read_set(&dir)? {
                    debug!(name, samples = source.len(), "Read sample set");
                    read.push((name, source));
                }
            }
            Ok::<_, Error>(read)
        })
        .await
        .map_err(|e| Error::Library(e.to_string()))??;

        found.extend(read);
        Ok(found)
    }

    fn save(&self, pairs: Vec<(String, SampleSource)>) {
        for (name, source) in pairs {
            let dir = match self.set_dir(&name) {
                Ok(dir) => dir,
                Err(e) => {
                    error!(err = %e, "Unable to save sample set");
                    continue;
                }
            };

            let generation = self.pending.lock().begin(&name, source.clone());
            let pending = self.pending.clone();
            let write_lock = self.write_lock.clone();
            let write = move || {
                let _writing = write_lock.lock();
                if pending.lock().is_current(&name, generation) {
                    match write_set(&dir, &source) {
                        Ok(()) => info!(name, path = ?dir, "Saved sample set"),
                        Err(e) => error!(name, err = %e, "Unable to save sample set"),
                    }
                } else {
                    debug!(name, generation, "Skipping superseded save");
                }
                pending.lock().finish(&name, generation);
            };

            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(write);
                }
                Err(_) => write(),
            }
        }
    }
}

impl std::fmt::Debug for DirectoryLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryLibrary")
            .field("root", &self.root)
            .field("pending", &self.pending_writes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::samples::{BufferSet, SampleKey};
    use crate::testutil::{eventually_async, write_wav};

    async fn wait_for_writes(library: &DirectoryLibrary) {
        eventually_async(
            || async move { library.pending_writes() == 0 },
            "Sample set was never written",
        )
        .await;
    }

    #[tokio::test]
    async fn test_save_and_reload_indexed() {
        let root = tempfile::tempdir().unwrap();
        let library = DirectoryLibrary::new(root.path());

        let source = SampleSource::Indexed(vec![
            SampleData::Decoded(AudioBuffer::new(vec![0.5; 30], 1, 1000)),
            SampleData::Decoded(AudioBuffer::new(vec![-0.25; 20], 2, 1000)),
            SampleData::Decoded(AudioBuffer::new(vec![0.75; 10], 1, 1000)),
        ]);
        library.save(vec![("rendered".to_string(), source)]);

        // Served from the pending copy or from disk, the set is always complete.
        let found = library.request(&["rendered".to_string()]).await.unwrap();
        assert_eq!(found["rendered"].len(), 3);

        wait_for_writes(&library).await;
        assert!(root.path().join("rendered").join(MANIFEST).is_file());

        let fresh = DirectoryLibrary::new(root.path());
        let mut found = fresh.request(&["rendered".to_string()]).await.unwrap();
        let source = found.remove("rendered").unwrap();
        assert!(matches!(source, SampleSource::Indexed(_)));

        let set = BufferSet::load(source, 1000).await.unwrap();
        assert_eq!(set.get(&SampleKey::Index(0)).unwrap().frames(), 30);
        assert_eq!(set.get(&SampleKey::Index(1)).unwrap().frames(), 10);
        assert_eq!(set.get(&SampleKey::Index(1)).unwrap().channel_count(), 2);
        assert_eq!(set.get(&SampleKey::Index(2)).unwrap().sample(3, 0), 0.75);
    }

    #[tokio::test]
    async fn test_save_named_without_runtime_writes_inline() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().to_path_buf();

        std::thread::spawn(move || {
            let library = DirectoryLibrary::new(&path);
            let mut samples = BTreeMap::new();
            samples.insert(
                "C#4".to_string(),
                SampleData::Decoded(AudioBuffer::new(vec![0.1; 5], 1, 1000)),
            );
            library.save(vec![("harp".to_string(), SampleSource::Named(samples))]);
            assert_eq!(library.pending_writes(), 0);
        })
        .join()
        .unwrap();

        let library = DirectoryLibrary::new(root.path());
        let found = library.request(&["harp".to_string()]).await.unwrap();
        match &found["harp"] {
            SampleSource::Named(samples) => assert!(samples.contains_key("C#4")),
            SampleSource::Indexed(_) => panic!("expected a named set"),
        }
    }

    #[tokio::test]
    async fn test_scan_directory_without_manifest() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("piano");
        fs::create_dir_all(&dir).unwrap();
        write_wav(&dir.join("C4.wav"), &[0.5; 100], 1, 44100).unwrap();
        write_wav(&dir.join("G4.WAV"), &[0.5; 100], 1, 44100).unwrap();
        fs::write(dir.join("README.txt"), "not a sample").unwrap();

        let library = DirectoryLibrary::new(root.path());
        let mut found = library.request(&["piano".to_string()]).await.unwrap();
        let source = found.remove("piano").unwrap();
        assert_eq!(source.len(), 2);

        let set = BufferSet::load(source, 44100).await.unwrap();
        let keys: Vec<_> = set.keys().unwrap().cloned().collect();
        assert_eq!(keys, vec![SampleKey::from("C4"), SampleKey::from("G4")]);
    }

    #[test]
    fn test_older_write_keeps_newer_save_pending() {
        let mut pending = PendingWrites::default();
        let first = pending.begin("pad", SampleSource::Indexed(Vec::new()));
        let second = pending.begin(
            "pad",
            SampleSource::Indexed(vec![SampleData::Decoded(AudioBuffer::new(
                vec![0.5; 4],
                1,
                1000,
            ))]),
        );

        assert!(!pending.is_current("pad", first));
        assert!(pending.is_current("pad", second));

        pending.finish("pad", first);
        assert_eq!(pending.sets["pad"].1.len(), 1);

        pending.finish("pad", second);
        assert!(pending.sets.is_empty());
        // A stale write that runs after the newest one finished is still superseded.
        assert!(!pending.is_current("pad", first));
    }

    #[tokio::test]
    async fn test_repeated_saves_keep_the_newest_set() {
        let root = tempfile::tempdir().unwrap();
        let library = DirectoryLibrary::new(root.path());

        for count in 1..=5 {
            let source = SampleSource::Indexed(vec![
                SampleData::Decoded(AudioBuffer::new(vec![0.5; 10], 1, 1000));
                count
            ]);
            library.save(vec![("pad".to_string(), source)]);
            let found = library.request(&["pad".to_string()]).await.unwrap();
            assert_eq!(found["pad"].len(), count);
        }

        wait_for_writes(&library).await;
        let fresh = DirectoryLibrary::new(root.path());
        let found = fresh.request(&["pad".to_string()]).await.unwrap();
        assert_eq!(found["pad"].len(), 5);
    }

    #[tokio::test]
    async fn test_missing_and_invalid_names() {
        let root = tempfile::tempdir().unwrap();
        let library = DirectoryLibrary::new(root.path());

        let found = library.request(&["nothing".to_string()]).await.unwrap();
        assert!(found.is_empty());

        assert!(matches!(
            library.request(&["../escape".to_string()]).await,
            Err(Error::Library(_))
        ));
    }
}
