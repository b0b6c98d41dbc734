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

//! Index topologies
//!
//! [`AnyIndex`] is the closed set of index shapes the engine can build. Nested
//! shapes own their children: an inverted file owns its coarse quantizer and a
//! composite owns its base, both reachable through explicit accessors so that
//! tuning can descend into them.

use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::ivf::IvfIndex;
use crate::refine::RefineIndex;
use crate::search::{Candidate, LabelFilter, Neighbor};
use crate::space::{BinarySpace, FloatSpace, Space};
use annforge_core::params::{COARSE_QUANTIZER, EF_CONSTRUCTION, EF_SEARCH, K_FACTOR, NPROBE};
use annforge_core::{AnnError, AnnResult};
use serde::{Deserialize, Serialize};
use std::fmt;

pub(crate) fn malformed(reason: impl fmt::Display) -> AnnError {
    AnnError::FormatMismatch(format!("inconsistent index: {}", reason))
}

/// Tag of an [`AnyIndex`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    Flat,
    InvertedFile,
    Graph,
    Composite,
}

impl Topology {
    /// Tuning keys this topology consumes itself
    pub fn supported_keys(&self) -> &'static [&'static str] {
        match self {
            Topology::Flat => &[],
            Topology::InvertedFile => &[NPROBE, COARSE_QUANTIZER],
            Topology::Graph => &[EF_CONSTRUCTION, EF_SEARCH],
            Topology::Composite => &[K_FACTOR],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Topology::Flat => "flat",
            Topology::InvertedFile => "inverted_file",
            Topology::Graph => "graph",
            Topology::Composite => "composite",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the tunable state of an index tree
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "topology", rename_all = "snake_case")]
pub enum IndexSettings {
    Flat,
    InvertedFile {
        nlist: usize,
        nprobe: usize,
        quantizer: Box<IndexSettings>,
    },
    Graph {
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    },
    Composite {
        k_factor: f32,
        base: Box<IndexSettings>,
    },
}

/// Any supported index over space `S`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Space", deserialize = "S: Space"))]
pub enum AnyIndex<S: Space> {
    Flat(FlatIndex<S>),
    InvertedFile(IvfIndex<S>),
    Graph(HnswIndex<S>),
    Composite(RefineIndex<S>),
}

/// Index over dense f32 vectors
pub type FloatIndex = AnyIndex<FloatSpace>;

/// Index over packed bit vectors
pub type BinaryIndex = AnyIndex<BinarySpace>;

impl<S: Space> AnyIndex<S> {
    pub fn topology(&self) -> Topology {
        match self {
            AnyIndex::Flat(_) => Topology::Flat,
            AnyIndex::InvertedFile(_) => Topology::InvertedFile,
            AnyIndex::Graph(_) => Topology::Graph,
            AnyIndex::Composite(_) => Topology::Composite,
        }
    }

    pub fn space(&self) -> &S {
        match self {
            AnyIndex::Flat(index) => index.space(),
            AnyIndex::InvertedFile(index) => index.space(),
            AnyIndex::Graph(index) => index.space(),
            AnyIndex::Composite(index) => index.base().space(),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            AnyIndex::Flat(index) => index.dimension(),
            AnyIndex::InvertedFile(index) => index.dimension(),
            AnyIndex::Graph(index) => index.dimension(),
            AnyIndex::Composite(index) => index.base().dimension(),
        }
    }

    /// Elements per stored vector
    pub fn unit_len(&self) -> usize {
        match self {
            AnyIndex::Flat(index) => index.unit_len(),
            AnyIndex::InvertedFile(index) => index.unit_len(),
            AnyIndex::Graph(index) => index.unit_len(),
            AnyIndex::Composite(index) => index.base().unit_len(),
        }
    }

    pub fn ntotal(&self) -> usize {
        match self {
            AnyIndex::Flat(index) => index.ntotal(),
            AnyIndex::InvertedFile(index) => index.ntotal(),
            AnyIndex::Graph(index) => index.ntotal(),
            AnyIndex::Composite(index) => index.ntotal(),
        }
    }

    /// Whether vectors can be added without a training pass
    pub fn is_trained(&self) -> bool {
        match self {
            AnyIndex::Flat(_) | AnyIndex::Graph(_) => true,
            AnyIndex::InvertedFile(index) => index.is_trained(),
            AnyIndex::Composite(index) => index.is_trained(),
        }
    }

    /// Coarse quantizer of an inverted file
    pub fn quantizer_mut(&mut self) -> Option<&mut AnyIndex<S>> {
        match self {
            AnyIndex::InvertedFile(index) => Some(index.quantizer_mut()),
            _ => None,
        }
    }

    /// Base of a composite
    pub fn base_mut(&mut self) -> Option<&mut AnyIndex<S>> {
        match self {
            AnyIndex::Composite(index) => Some(index.base_mut()),
            _ => None,
        }
    }

    /// Offline training pass; a no-op for topologies that need none
    pub fn train(&mut self, sample: &[S::Elem]) -> AnnResult<()> {
        if sample.len() < self.unit_len() {
            return Err(AnnError::EmptyInput);
        }
        match self {
            AnyIndex::Flat(_) | AnyIndex::Graph(_) => Ok(()),
            AnyIndex::InvertedFile(index) => index.train(sample),
            AnyIndex::Composite(index) => index.train(sample),
        }
    }

    /// Append vectors; labels continue from `ntotal()`
    pub fn add(&mut self, vectors: &[S::Elem]) -> AnnResult<()> {
        if !self.is_trained() {
            return Err(AnnError::UntrainedIndex);
        }
        match self {
            AnyIndex::Flat(index) => index.add(vectors),
            AnyIndex::InvertedFile(index) => index.add(vectors),
            AnyIndex::Graph(index) => index.add(vectors),
            AnyIndex::Composite(index) => index.add(vectors),
        }
    }

    pub(crate) fn search_candidates(
        &self,
        query: &[S::Elem],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        match self {
            AnyIndex::Flat(index) => index.search(query, k, filter),
            AnyIndex::InvertedFile(index) => index.search(query, k, filter),
            AnyIndex::Graph(index) => index.search(query, k, filter),
            AnyIndex::Composite(index) => index.search(query, k, filter),
        }
    }

    pub(crate) fn range_candidates(
        &self,
        query: &[S::Elem],
        max_cost: f32,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        match self {
            AnyIndex::Flat(index) => index.range_search(query, max_cost, filter),
            AnyIndex::InvertedFile(index) => index.range_search(query, max_cost, filter),
            AnyIndex::Graph(index) => index.range_search(query, max_cost, filter),
            AnyIndex::Composite(index) => index.range_search(query, max_cost, filter),
        }
    }

    /// Structural consistency check for an index decoded from storage
    pub fn validate(&self) -> AnnResult<()> {
        match self {
            AnyIndex::Flat(index) => index.validate(),
            AnyIndex::InvertedFile(index) => index.validate(),
            AnyIndex::Graph(index) => index.validate(),
            AnyIndex::Composite(index) => index.validate(),
        }
    }

    fn check_query(&self, query: &[S::Elem]) -> AnnResult<()> {
        if query.len() != self.unit_len() {
            return Err(AnnError::DimensionMismatch {
                expected: self.unit_len(),
                actual: query.len(),
            });
        }
        Ok(())
    }

    fn to_neighbors(&self, candidates: Vec<Candidate>) -> Vec<Neighbor> {
        let space = self.space();
        candidates
            .into_iter()
            .map(|c| Neighbor {
                label: c.label,
                distance: space.reported(c.cost),
            })
            .collect()
    }

    /// `k` nearest neighbors of `query`, best first
    pub fn search(
        &self,
        query: &[S::Elem],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> AnnResult<Vec<Neighbor>> {
        self.check_query(query)?;
        if k == 0 || self.ntotal() == 0 {
            return Ok(Vec::new());
        }
        Ok(self.to_neighbors(self.search_candidates(query, k, filter)))
    }

    /// Every neighbor within `radius` of `query`, best first.
    ///
    /// `radius` is in reported units: an upper bound on L2 and Hamming
    /// distances, a lower bound on inner product similarity.
    pub fn range_search(
        &self,
        query: &[S::Elem],
        radius: f32,
        filter: Option<&dyn LabelFilter>,
    ) -> AnnResult<Vec<Neighbor>> {
        self.check_query(query)?;
        let max_cost = self.space().to_cost(radius);
        Ok(self.to_neighbors(self.range_candidates(query, max_cost, filter)))
    }

    pub fn settings(&self) -> IndexSettings {
        match self {
            AnyIndex::Flat(_) => IndexSettings::Flat,
            AnyIndex::InvertedFile(index) => IndexSettings::InvertedFile {
                nlist: index.nlist(),
                nprobe: index.nprobe(),
                quantizer: Box::new(index.quantizer().settings()),
            },
            AnyIndex::Graph(index) => IndexSettings::Graph {
                m: index.m(),
                ef_construction: index.ef_construction(),
                ef_search: index.ef_search(),
            },
            AnyIndex::Composite(index) => IndexSettings::Composite {
                k_factor: index.k_factor(),
                base: Box::new(index.base().settings()),
            },
        }
    }
}
