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

//! Exact flat index
//!
//! Vectors are stored back to back; search is a linear scan. Also serves as
//! the vector storage of the graph and refine topologies.

use crate::search::{accepts, Candidate, LabelFilter, TopK};
use crate::space::Space;
use crate::topology::malformed;
use annforge_core::{AnnError, AnnResult, Element};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Space", deserialize = "S: Space"))]
pub struct FlatIndex<S: Space> {
    space: S,
    dimension: usize,
    unit_len: usize,
    data: Vec<S::Elem>,
}

impl<S: Space> FlatIndex<S> {
    pub fn new(space: S, dimension: usize) -> AnnResult<Self> {
        let unit_len = S::Elem::unit_len(dimension)?;
        Ok(Self {
            space,
            dimension,
            unit_len,
            data: Vec::new(),
        })
    }

    pub fn space(&self) -> &S {
        &self.space
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn unit_len(&self) -> usize {
        self.unit_len
    }

    pub fn ntotal(&self) -> usize {
        self.data.len() / self.unit_len
    }

    pub fn vector(&self, i: usize) -> &[S::Elem] {
        let start = i * self.unit_len;
        &self.data[start..start + self.unit_len]
    }

    pub fn data(&self) -> &[S::Elem] {
        &self.data
    }

    /// Append whole vectors; labels continue from the current count
    pub fn add(&mut self, vectors: &[S::Elem]) -> AnnResult<()> {
        if vectors.len() % self.unit_len != 0 {
            return Err(AnnError::DimensionMismatch {
                expected: self.unit_len,
                actual: vectors.len() % self.unit_len,
            });
        }
        self.data.extend_from_slice(vectors);
        Ok(())
    }

    pub(crate) fn validate(&self) -> AnnResult<()> {
        let expected = S::Elem::unit_len(self.dimension).map_err(malformed)?;
        if self.unit_len != expected {
            return Err(malformed(format_args!(
                "flat unit length {} does not match dimension {}",
                self.unit_len, self.dimension
            )));
        }
        if self.data.len() % self.unit_len != 0 {
            return Err(malformed(format_args!(
                "flat storage holds {} elements, not a multiple of {}",
                self.data.len(),
                self.unit_len
            )));
        }
        Ok(())
    }

    pub(crate) fn cost_to(&self, i: usize, query: &[S::Elem]) -> f32 {
        self.space.cost(self.vector(i), query)
    }

    pub(crate) fn search(
        &self,
        query: &[S::Elem],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        let mut top = TopK::new(k);
        for (i, vector) in self.data.chunks_exact(self.unit_len).enumerate() {
            let label = i as i64;
            if !accepts(filter, label) {
                continue;
            }
            top.push(Candidate::new(self.space.cost(vector, query), label));
        }
        top.into_sorted_vec()
    }

    /// Every vector with a cost strictly below `max_cost`, best first
    pub(crate) fn range_search(
        &self,
        query: &[S::Elem],
        max_cost: f32,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        let mut hits: Vec<Candidate> = self
            .data
            .chunks_exact(self.unit_len)
            .enumerate()
            .filter(|(i, _)| accepts(filter, *i as i64))
            .map(|(i, vector)| Candidate::new(self.space.cost(vector, query), i as i64))
            .filter(|c| c.cost < max_cost)
            .collect();
        hits.sort();
        hits
    }
}
