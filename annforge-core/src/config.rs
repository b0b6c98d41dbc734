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

//! Build configuration
//!
//! Defaults for everything the topology description and tuning parameters
//! leave open. Loaded from an optional TOML file, then overridden by
//! `ANNFORGE_*` environment variables.

use crate::error::{AnnError, AnnResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default number of cached worker pools
pub const DEFAULT_MAX_POOLS: usize = 4;

/// Default flush size for streamed vector transfers (64 MiB)
pub const DEFAULT_TRANSFER_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Engine-wide build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Worker threads used when a call passes no thread hint (0 = ambient pool)
    #[serde(default)]
    pub thread_count: usize,

    /// Upper bound on any thread hint (0 = available parallelism)
    #[serde(default)]
    pub max_threads: usize,

    /// Dedicated worker pools kept alive between calls
    #[serde(default = "default_max_pools")]
    pub max_pools: usize,

    /// Bytes staged per flush by `VectorTransfer`
    #[serde(default = "default_transfer_memory_limit")]
    pub transfer_memory_limit_bytes: usize,

    /// fsync artifacts after writing
    #[serde(default = "default_sync_on_write")]
    pub sync_on_write: bool,

    #[serde(default)]
    pub kmeans: KMeansConfig,

    #[serde(default)]
    pub graph: GraphDefaults,
}

fn default_transfer_memory_limit() -> usize {
    DEFAULT_TRANSFER_MEMORY_LIMIT
}

fn default_max_pools() -> usize {
    DEFAULT_MAX_POOLS
}

fn default_sync_on_write() -> bool {
    true
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            thread_count: 0,
            max_threads: 0,
            max_pools: DEFAULT_MAX_POOLS,
            transfer_memory_limit_bytes: DEFAULT_TRANSFER_MEMORY_LIMIT,
            sync_on_write: true,
            kmeans: KMeansConfig::default(),
            graph: GraphDefaults::default(),
        }
    }
}

/// k-means settings used to train inverted-file centroids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Lloyd iterations
    #[serde(default = "default_kmeans_iterations")]
    pub iterations: usize,

    /// Seed for initialization and subsampling
    #[serde(default = "default_kmeans_seed")]
    pub seed: u64,

    /// Below this many points per centroid a warning is logged
    #[serde(default = "default_min_points_per_centroid")]
    pub min_points_per_centroid: usize,

    /// Training samples beyond this many points per centroid are subsampled
    #[serde(default = "default_max_points_per_centroid")]
    pub max_points_per_centroid: usize,
}

fn default_kmeans_iterations() -> usize {
    25
}

fn default_kmeans_seed() -> u64 {
    1234
}

fn default_min_points_per_centroid() -> usize {
    39
}

fn default_max_points_per_centroid() -> usize {
    256
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            iterations: default_kmeans_iterations(),
            seed: default_kmeans_seed(),
            min_points_per_centroid: default_min_points_per_centroid(),
            max_points_per_centroid: default_max_points_per_centroid(),
        }
    }
}

/// Graph settings applied before tuning parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDefaults {
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,

    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

fn default_ef_construction() -> usize {
    40
}

fn default_ef_search() -> usize {
    16
}

impl Default for GraphDefaults {
    fn default() -> Self {
        Self {
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
        }
    }
}

impl BuildConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(config_file: Option<PathBuf>) -> AnnResult<Self> {
        let config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading build configuration from file: {:?}", path);
                Self::from_file(&path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        config.merge_with_env()
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> AnnResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AnnError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse TOML text
    pub fn from_toml(contents: &str) -> AnnResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// `max_threads` with zero resolved to the machine's parallelism
    pub fn thread_limit(&self) -> usize {
        if self.max_threads > 0 {
            return self.max_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Environment variables take priority over file values
    fn merge_with_env(mut self) -> AnnResult<Self> {
        if let Some(threads) = env_usize("ANNFORGE_THREAD_COUNT")? {
            self.thread_count = threads;
        }
        if let Some(threads) = env_usize("ANNFORGE_MAX_THREADS")? {
            self.max_threads = threads;
        }
        if let Some(pools) = env_usize("ANNFORGE_MAX_POOLS")? {
            self.max_pools = pools;
        }
        if let Some(limit) = env_usize("ANNFORGE_TRANSFER_MEMORY_LIMIT")? {
            self.transfer_memory_limit_bytes = limit;
        }
        if let Ok(value) = std::env::var("ANNFORGE_SYNC_ON_WRITE") {
            self.sync_on_write = value == "true" || value == "1";
        }
        Ok(self)
    }
}

fn env_usize(name: &str) -> AnnResult<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<usize>()
            .map(Some)
            .map_err(|e| AnnError::Config(format!("{}={}: {}", name, value, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = BuildConfig::default();
        assert_eq!(config.thread_count, 0);
        assert_eq!(config.max_pools, DEFAULT_MAX_POOLS);
        assert!(config.thread_limit() >= 1);
        assert_eq!(config.graph.ef_construction, 40);
        assert_eq!(config.graph.ef_search, 16);
        assert_eq!(config.kmeans.iterations, 25);
        assert!(config.sync_on_write);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BuildConfig::from_toml(
            r#"
            thread_count = 4

            [graph]
            ef_search = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.thread_count, 4);
        assert_eq!(config.graph.ef_search, 128);
        assert_eq!(config.graph.ef_construction, 40);
        assert_eq!(config.transfer_memory_limit_bytes, DEFAULT_TRANSFER_MEMORY_LIMIT);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annforge.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "sync_on_write = false").unwrap();
        writeln!(file, "[kmeans]").unwrap();
        writeln!(file, "iterations = 5").unwrap();

        let config = BuildConfig::from_file(&path).unwrap();
        assert!(!config.sync_on_write);
        assert_eq!(config.kmeans.iterations, 5);
        assert_eq!(config.kmeans.seed, 1234);
    }

    #[test]
    fn test_explicit_thread_limit() {
        let config = BuildConfig::from_toml("max_threads = 3\nmax_pools = 1").unwrap();
        assert_eq!(config.thread_limit(), 3);
        assert_eq!(config.max_pools, 1);
    }

    #[test]
    fn test_invalid_toml() {
        let err = BuildConfig::from_toml("thread_count = \"many\"").unwrap_err();
        assert!(matches!(err, AnnError::Config(_)));
    }
}
