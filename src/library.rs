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

//! Where sample sets come from and where rendered sets are kept.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Error;
use crate::samples::SampleSource;

mod directory;
mod memory;

pub use directory::DirectoryLibrary;
pub use memory::MemoryLibrary;

/// A store of named sample sets.
#[async_trait]
pub trait SampleLibrary: Send + Sync {
    /// Fetches the named sets. Names the library doesn't know are left out of the result.
    async fn request(&self, names: &[String]) -> Result<HashMap<String, SampleSource>, Error>;

    /// Persists sets in the background. Failures are logged, not returned.
    fn save(&self, pairs: Vec<(String, SampleSource)>);
}
