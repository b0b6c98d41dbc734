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

//! External identifiers over any index
//!
//! The wrapped index numbers vectors `0..ntotal` in insertion order; the map
//! translates those labels to the host's 64-bit ids on the way out, and
//! translates filters over host ids on the way in.

use crate::search::{LabelFilter, Neighbor};
use crate::space::Space;
use crate::topology::{malformed, AnyIndex};
use annforge_core::{AnnError, AnnResult, VectorBatch};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Space", deserialize = "S: Space"))]
pub struct IdMappedIndex<S: Space> {
    index: AnyIndex<S>,
    ids: Vec<i64>,
}

impl<S: Space> IdMappedIndex<S> {
    /// Wrap an index that holds no vectors yet
    pub fn wrap(index: AnyIndex<S>) -> AnnResult<Self> {
        if index.ntotal() != 0 {
            return Err(AnnError::NotEmpty {
                ntotal: index.ntotal(),
            });
        }
        Ok(Self {
            index,
            ids: Vec::new(),
        })
    }

    pub fn index(&self) -> &AnyIndex<S> {
        &self.index
    }

    pub fn into_inner(self) -> AnyIndex<S> {
        self.index
    }

    /// External ids in insertion order
    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn ntotal(&self) -> usize {
        self.ids.len()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }

    /// Insert `vectors` under `ids`.
    ///
    /// Every check runs before the index is touched, so a failed call leaves
    /// the index as it was.
    pub fn add_with_ids(&mut self, vectors: &[S::Elem], ids: &[i64]) -> AnnResult<()> {
        if !self.index.is_trained() {
            return Err(AnnError::UntrainedIndex);
        }
        let unit_len = self.index.unit_len();
        if vectors.len() % unit_len != 0 {
            return Err(AnnError::DimensionMismatch {
                expected: unit_len,
                actual: vectors.len() % unit_len,
            });
        }
        let count = vectors.len() / unit_len;
        if count == 0 {
            return Err(AnnError::EmptyInput);
        }
        if ids.len() != count {
            return Err(AnnError::IdCountMismatch {
                ids: ids.len(),
                vectors: count,
            });
        }

        self.index.add(vectors)?;
        self.ids.extend_from_slice(ids);
        tracing::debug!(added = count, ntotal = self.ids.len(), "Added vectors with ids");
        Ok(())
    }

    /// Insert a validated batch
    pub fn add_batch(&mut self, batch: &VectorBatch<'_, S::Elem>, ids: &[i64]) -> AnnResult<()> {
        if batch.dimension() != self.index.dimension() {
            return Err(AnnError::DimensionMismatch {
                expected: self.index.dimension(),
                actual: batch.dimension(),
            });
        }
        self.add_with_ids(batch.as_slice(), ids)
    }

    pub(crate) fn validate(&self) -> AnnResult<()> {
        self.index.validate()?;
        if self.ids.len() != self.index.ntotal() {
            return Err(malformed(format_args!(
                "{} external ids for {} vectors",
                self.ids.len(),
                self.index.ntotal()
            )));
        }
        Ok(())
    }

    fn to_external(&self, mut hits: Vec<Neighbor>) -> Vec<Neighbor> {
        for hit in hits.iter_mut() {
            hit.label = self.ids[hit.label as usize];
        }
        hits
    }

    /// `k` nearest neighbors; `filter` sees external ids
    pub fn search(
        &self,
        query: &[S::Elem],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> AnnResult<Vec<Neighbor>> {
        let hits = match filter {
            Some(filter) => {
                let ids = &self.ids;
                let translated = move |label: i64| filter.accept(ids[label as usize]);
                self.index
                    .search(query, k, Some(&translated as &dyn LabelFilter))?
            }
            None => self.index.search(query, k, None)?,
        };
        Ok(self.to_external(hits))
    }

    /// Neighbors within `radius`; `filter` sees external ids
    pub fn range_search(
        &self,
        query: &[S::Elem],
        radius: f32,
        filter: Option<&dyn LabelFilter>,
    ) -> AnnResult<Vec<Neighbor>> {
        let hits = match filter {
            Some(filter) => {
                let ids = &self.ids;
                let translated = move |label: i64| filter.accept(ids[label as usize]);
                self.index
                    .range_search(query, radius, Some(&translated as &dyn LabelFilter))?
            }
            None => self.index.range_search(query, radius, None)?,
        };
        Ok(self.to_external(hits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{index_binary_factory, index_factory};
    use annforge_core::{Metric, VectorBuffer};
    use std::collections::HashSet;

    #[test]
    fn test_wrap_requires_empty_index() {
        let mut index = index_factory(2, "Flat", Metric::L2).unwrap();
        index.add(&[1.0, 1.0]).unwrap();
        assert!(matches!(
            IdMappedIndex::wrap(index),
            Err(AnnError::NotEmpty { ntotal: 1 })
        ));
    }

    #[test]
    fn test_untrained_index_rejected() {
        let index = index_factory(2, "IVF2,Flat", Metric::L2).unwrap();
        let mut mapped = IdMappedIndex::wrap(index).unwrap();
        assert!(matches!(
            mapped.add_with_ids(&[1.0, 2.0], &[7]),
            Err(AnnError::UntrainedIndex)
        ));
    }

    #[test]
    fn test_failed_add_leaves_index_untouched() {
        let mut mapped = IdMappedIndex::wrap(index_factory(2, "Flat", Metric::L2).unwrap()).unwrap();
        let err = mapped
            .add_with_ids(&[1.0, 2.0, 3.0, 4.0], &[10])
            .unwrap_err();
        assert!(matches!(err, AnnError::IdCountMismatch { ids: 1, vectors: 2 }));
        assert_eq!(mapped.ntotal(), 0);
        assert_eq!(mapped.index().ntotal(), 0);
    }

    #[test]
    fn test_search_returns_external_ids() {
        let mut mapped = IdMappedIndex::wrap(index_factory(1, "Flat", Metric::L2).unwrap()).unwrap();
        mapped
            .add_with_ids(&[0.0, 10.0, 20.0], &[100, 200, 300])
            .unwrap();
        let hits = mapped.search(&[9.0], 1, None).unwrap();
        assert_eq!(hits[0].label, 200);

        let allowed: HashSet<i64> = [100, 300].into_iter().collect();
        let filter = |id: i64| allowed.contains(&id);
        let hits = mapped
            .search(&[9.0], 3, Some(&filter as &dyn LabelFilter))
            .unwrap();
        let labels: Vec<i64> = hits.iter().map(|h| h.label).collect();
        assert_eq!(labels, vec![100, 300]);

        let hits = mapped.range_search(&[9.0], 2.0, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].label, 200);
    }

    #[test]
    fn test_add_binary_batch() {
        let data = vec![0b1010_1010u8; 16];
        let batch = VectorBatch::new(VectorBuffer::lend(&data), 8).unwrap();
        let ids: Vec<i64> = (0..16).collect();
        let mut mapped = IdMappedIndex::wrap(index_binary_factory(8, "BFlat").unwrap()).unwrap();
        mapped.add_batch(&batch, &ids).unwrap();
        assert_eq!(mapped.ntotal(), 16);
    }

    #[test]
    fn test_short_id_list_rejected_on_load() {
        use crate::persistence::{from_bytes, to_bytes, IndexArtifact, StoredIndex};

        let mut mapped = IdMappedIndex::wrap(index_factory(2, "Flat", Metric::L2).unwrap()).unwrap();
        mapped
            .add_with_ids(&[0.0, 0.0, 1.0, 1.0, 2.0, 2.0], &[5, 6, 7])
            .unwrap();
        mapped.ids.truncate(1);

        let bytes = to_bytes(&IndexArtifact::Float(StoredIndex::IdMapped(mapped))).unwrap();
        let err = from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, AnnError::FormatMismatch(_)), "{err}");
    }
}
