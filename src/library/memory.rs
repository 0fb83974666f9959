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
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::SampleLibrary;
use crate::error::Error;
use crate::samples::SampleSource;

/// A process-local sample library.
#[derive(Default)]
pub struct MemoryLibrary {
    sets: RwLock<HashMap<String, SampleSource>>,
    requests: AtomicUsize,
    saves: AtomicUsize,
}

impl MemoryLibrary {
    pub fn new() -> MemoryLibrary {
        MemoryLibrary::default()
    }

    /// Adds or replaces a set.
    pub fn insert(&self, name: &str, source: SampleSource) {
        self.sets.write().insert(name.to_string(), source);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sets.read().contains_key(name)
    }

    /// Number of `request` calls served.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Number of sets persisted through `save`.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SampleLibrary for MemoryLibrary {
    async fn request(&self, names: &[String]) -> Result<HashMap<String, SampleSource>, Error> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let sets = self.sets.read();
        Ok(names
            .iter()
            .filter_map(|name| sets.get(name).map(|source| (name.clone(), source.clone())))
            .collect())
    }

    fn save(&self, pairs: Vec<(String, SampleSource)>) {
        let mut sets = self.sets.write();
        for (name, source) in pairs {
            debug!(name, samples = source.len(), "Saved sample set");
            sets.insert(name, source);
            self.saves.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for MemoryLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLibrary")
            .field("sets", &self.sets.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::samples::SampleData;

    fn source() -> SampleSource {
        SampleSource::Indexed(vec![SampleData::Decoded(AudioBuffer::silent(10, 1, 100))])
    }

    #[tokio::test]
    async fn test_request_returns_known_sets_only() {
        let library = MemoryLibrary::new();
        library.insert("piano", source());

        let found = library
            .request(&["piano".to_string(), "organ".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["piano"].len(), 1);
        assert_eq!(library.request_count(), 1);
    }

    #[tokio::test]
    async fn test_save_is_visible() {
        let library = MemoryLibrary::new();
        library.save(vec![("rendered".to_string(), source())]);

        assert!(library.contains("rendered"));
        assert_eq!(library.save_count(), 1);
        let found = library.request(&["rendered".to_string()]).await.unwrap();
        assert!(found.contains_key("rendered"));
    }
}
