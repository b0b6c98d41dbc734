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

//! Refining composite
//!
//! Wraps a base index and keeps an exact copy of every vector. Searches ask the
//! base for `k * k_factor` candidates and re-rank them by exact cost.

use crate::flat::FlatIndex;
use crate::search::{Candidate, LabelFilter, TopK};
use crate::space::Space;
use crate::topology::{malformed, AnyIndex};
use annforge_core::{AnnError, AnnResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Space", deserialize = "S: Space"))]
pub struct RefineIndex<S: Space> {
    base: Box<AnyIndex<S>>,
    refine: FlatIndex<S>,
    k_factor: f32,
}

impl<S: Space> RefineIndex<S> {
    pub fn new(base: AnyIndex<S>) -> AnnResult<Self> {
        if base.ntotal() != 0 {
            return Err(AnnError::NotEmpty {
                ntotal: base.ntotal(),
            });
        }
        let refine = FlatIndex::new(base.space().clone(), base.dimension())?;
        Ok(Self {
            base: Box::new(base),
            refine,
            k_factor: 1.0,
        })
    }

    pub fn base(&self) -> &AnyIndex<S> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut AnyIndex<S> {
        &mut self.base
    }

    pub fn k_factor(&self) -> f32 {
        self.k_factor
    }

    pub fn set_k_factor(&mut self, k_factor: f32) {
        self.k_factor = k_factor;
    }

    pub fn ntotal(&self) -> usize {
        self.refine.ntotal()
    }

    pub fn is_trained(&self) -> bool {
        self.base.is_trained()
    }

    pub fn train(&mut self, sample: &[S::Elem]) -> AnnResult<()> {
        self.base.train(sample)
    }

    pub fn add(&mut self, vectors: &[S::Elem]) -> AnnResult<()> {
        self.base.add(vectors)?;
        self.refine.add(vectors)
    }

    pub(crate) fn validate(&self) -> AnnResult<()> {
        self.base.validate()?;
        self.refine.validate()?;
        if self.refine.unit_len() != self.base.unit_len() {
            return Err(malformed("refine storage width differs from base"));
        }
        if self.refine.ntotal() != self.base.ntotal() {
            return Err(malformed(format_args!(
                "refine storage holds {} vectors, base holds {}",
                self.refine.ntotal(),
                self.base.ntotal()
            )));
        }
        if !(self.k_factor.is_finite() && self.k_factor >= 1.0) {
            return Err(malformed(format_args!("k_factor {}", self.k_factor)));
        }
        Ok(())
    }

    pub(crate) fn search(
        &self,
        query: &[S::Elem],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        let fetch = ((k as f32) * self.k_factor).ceil() as usize;
        let mut top = TopK::new(k);
        for candidate in self.base.search_candidates(query, fetch.max(k), filter) {
            let exact = self.refine.cost_to(candidate.label as usize, query);
            top.push(Candidate::new(exact, candidate.label));
        }
        top.into_sorted_vec()
    }

    pub(crate) fn range_search(
        &self,
        query: &[S::Elem],
        max_cost: f32,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        self.refine.range_search(query, max_cost, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::HnswIndex;
    use crate::space::FloatSpace;

    #[test]
    fn test_refine_reranks_exactly() {
        let base = AnyIndex::Graph(HnswIndex::new(FloatSpace::default(), 2, 4, 40, 16).unwrap());
        let mut index = RefineIndex::new(base).unwrap();
        index.set_k_factor(4.0);
        index
            .add(&[0.0, 0.0, 1.0, 0.0, 2.0, 0.0, 3.0, 0.0])
            .unwrap();

        let hits = index.search(&[2.9, 0.0], 2, None);
        assert_eq!(hits[0].label, 3);
        assert_eq!(hits[1].label, 2);
        assert!((hits[0].cost - 0.01).abs() < 1e-5);
    }

    #[test]
    fn test_refine_requires_empty_base() {
        let mut flat = FlatIndex::new(FloatSpace::default(), 1).unwrap();
        flat.add(&[1.0]).unwrap();
        assert!(matches!(
            RefineIndex::new(AnyIndex::Flat(flat)),
            Err(AnnError::NotEmpty { ntotal: 1 })
        ));
    }
}
