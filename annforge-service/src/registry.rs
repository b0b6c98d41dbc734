// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Loaded index registry
//!
//! Maps opaque handles to loaded artifacts. Lookups hand out an `Arc` so a
//! query keeps its index alive even if another thread frees the handle.

use annforge_core::{AnnError, AnnResult};
use annforge_index::IndexArtifact;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Opaque reference to a loaded index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexHandle(u64);

impl IndexHandle {
    pub fn from_raw(raw: u64) -> Self {
        IndexHandle(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Concurrent handle table
#[derive(Debug)]
pub struct IndexRegistry {
    indexes: DashMap<u64, Arc<IndexArtifact>>,
    next_handle: AtomicU64,
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self {
            indexes: DashMap::new(),
            // Zero is never handed out
            next_handle: AtomicU64::new(1),
        }
    }

    pub fn insert(&self, artifact: IndexArtifact) -> IndexHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.indexes.insert(raw, Arc::new(artifact));
        IndexHandle(raw)
    }

    pub fn get(&self, handle: IndexHandle) -> AnnResult<Arc<IndexArtifact>> {
        self.indexes
            .get(&handle.0)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(AnnError::UnknownHandle(handle.0))
    }

    /// Unregister `handle`; in-flight queries keep their own reference
    pub fn remove(&self, handle: IndexHandle) -> AnnResult<Arc<IndexArtifact>> {
        self.indexes
            .remove(&handle.0)
            .map(|(_, artifact)| artifact)
            .ok_or(AnnError::UnknownHandle(handle.0))
    }

    pub fn handles(&self) -> Vec<IndexHandle> {
        let mut handles: Vec<IndexHandle> =
            self.indexes.iter().map(|entry| IndexHandle(*entry.key())).collect();
        handles.sort();
        handles
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}
