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

//! Annforge Index Layer
//!
//! Approximate nearest neighbor indexes over float and packed-bit vectors,
//! and the machinery that configures them:
//!
//! - **Topologies** (`topology`): flat scan, inverted file, HNSW graph and a
//!   refining composite, all behind the closed [`AnyIndex`] enum.
//! - **Factory** (`factory`): description strings such as `IVF64_HNSW32,Flat`
//!   or `BHNSW16` turned into empty indexes.
//! - **Tuning** (`tuning`): runtime parameters applied recursively through
//!   nested quantizers and composite bases.
//! - **ID mapping** (`id_map`): external 64-bit ids over internal labels.
//! - **Persistence** (`persistence`): checksummed, self-describing artifacts.

pub mod factory;
pub mod flat;
pub mod hnsw;
pub mod id_map;
pub mod ivf;
pub mod kmeans;
pub mod persistence;
pub mod refine;
pub mod search;
pub mod space;
pub mod topology;
pub mod tuning;

pub use factory::{index_binary_factory, index_factory, IndexFactory};
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use id_map::IdMappedIndex;
pub use ivf::IvfIndex;
pub use persistence::{
    from_bytes, read_index, to_bytes, write_index, IndexArtifact, StoredIndex, FORMAT_VERSION,
    INDEX_MAGIC,
};
pub use refine::RefineIndex;
pub use search::{LabelFilter, Neighbor};
pub use space::{BinarySpace, FloatSpace, Space};
pub use topology::{AnyIndex, BinaryIndex, FloatIndex, IndexSettings, Topology};
pub use tuning::apply_parameters;
