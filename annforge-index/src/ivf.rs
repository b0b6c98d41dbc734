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

//! Inverted-file index
//!
//! A coarse quantizer (any topology) holds `nlist` centroids; each vector is
//! stored uncompressed in the list of its nearest centroid. Queries scan the
//! `nprobe` closest lists. The index is untrained until the quantizer holds
//! exactly `nlist` centroids.

use crate::kmeans;
use crate::search::{accepts, Candidate, LabelFilter, TopK};
use crate::space::Space;
use crate::topology::{malformed, AnyIndex};
use annforge_core::{AnnError, AnnResult, Element, KMeansConfig};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(bound(serialize = "E: Serialize", deserialize = "E: serde::de::DeserializeOwned"))]
struct InvertedList<E> {
    labels: Vec<i64>,
    codes: Vec<E>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Space", deserialize = "S: Space"))]
pub struct IvfIndex<S: Space> {
    space: S,
    dimension: usize,
    unit_len: usize,
    nlist: usize,
    nprobe: usize,
    kmeans: KMeansConfig,
    quantizer: Box<AnyIndex<S>>,
    lists: Vec<InvertedList<S::Elem>>,
    ntotal: usize,
}

impl<S: Space> IvfIndex<S> {
    /// `quantizer` must be empty and share the space and dimension
    pub fn new(
        quantizer: AnyIndex<S>,
        nlist: usize,
        kmeans: KMeansConfig,
    ) -> AnnResult<Self> {
        if nlist == 0 {
            return Err(AnnError::invalid_parameter("nlist", "must be positive"));
        }
        if quantizer.ntotal() != 0 {
            return Err(AnnError::NotEmpty {
                ntotal: quantizer.ntotal(),
            });
        }
        let space = quantizer.space().clone();
        let dimension = quantizer.dimension();
        Ok(Self {
            space,
            dimension,
            unit_len: S::Elem::unit_len(dimension)?,
            nlist,
            nprobe: 1,
            kmeans,
            quantizer: Box::new(quantizer),
            lists: (0..nlist).map(|_| InvertedList::default()).collect(),
            ntotal: 0,
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
        self.ntotal
    }

    pub fn nlist(&self) -> usize {
        self.nlist
    }

    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    pub fn set_nprobe(&mut self, nprobe: usize) {
        self.nprobe = nprobe;
    }

    pub fn is_trained(&self) -> bool {
        self.quantizer.ntotal() == self.nlist
    }

    pub fn quantizer(&self) -> &AnyIndex<S> {
        &self.quantizer
    }

    pub fn quantizer_mut(&mut self) -> &mut AnyIndex<S> {
        &mut self.quantizer
    }

    /// Sizes of the inverted lists
    pub fn list_sizes(&self) -> Vec<usize> {
        self.lists.iter().map(|l| l.labels.len()).collect()
    }

    /// Learn the centroids and load them into the quantizer
    pub fn train(&mut self, sample: &[S::Elem]) -> AnnResult<()> {
        if self.is_trained() {
            tracing::debug!(nlist = self.nlist, "Inverted file already trained, skipping");
            return Ok(());
        }
        let centroids = kmeans::train(
            &self.space,
            sample,
            self.unit_len,
            self.nlist,
            &self.kmeans,
        )?;
        self.quantizer.add(&centroids)?;
        tracing::debug!(
            nlist = self.nlist,
            sample = sample.len() / self.unit_len,
            "Trained inverted file centroids"
        );
        Ok(())
    }

    pub fn add(&mut self, vectors: &[S::Elem]) -> AnnResult<()> {
        if !self.is_trained() {
            return Err(AnnError::UntrainedIndex);
        }
        if vectors.len() % self.unit_len != 0 {
            return Err(AnnError::DimensionMismatch {
                expected: self.unit_len,
                actual: vectors.len() % self.unit_len,
            });
        }

        let quantizer = &self.quantizer;
        let assignments: Vec<usize> = vectors
            .par_chunks(self.unit_len)
            .map(|v| {
                quantizer
                    .search_candidates(v, 1, None)
                    .first()
                    .map_or(0, |c| c.label as usize)
            })
            .collect();

        for (i, (vector, list)) in vectors
            .chunks_exact(self.unit_len)
            .zip(assignments.iter())
            .enumerate()
        {
            let inverted = &mut self.lists[*list];
            inverted.labels.push((self.ntotal + i) as i64);
            inverted.codes.extend_from_slice(vector);
        }
        self.ntotal += assignments.len();
        Ok(())
    }

    pub(crate) fn validate(&self) -> AnnResult<()> {
        self.quantizer.validate()?;
        if self.quantizer.unit_len() != self.unit_len || self.quantizer.dimension() != self.dimension {
            return Err(malformed("quantizer width differs from inverted file"));
        }
        if self.nlist == 0 || self.lists.len() != self.nlist {
            return Err(malformed(format_args!(
                "{} inverted lists for nlist {}",
                self.lists.len(),
                self.nlist
            )));
        }
        // quantizer labels index the lists, so it is either empty or full
        let centroids = self.quantizer.ntotal();
        if centroids != 0 && centroids != self.nlist {
            return Err(malformed(format_args!(
                "quantizer holds {} centroids for nlist {}",
                centroids, self.nlist
            )));
        }
        if centroids == 0 && self.ntotal != 0 {
            return Err(malformed("untrained inverted file holds vectors"));
        }

        let mut stored = 0usize;
        for list in &self.lists {
            if list.codes.len() != list.labels.len() * self.unit_len {
                return Err(malformed(format_args!(
                    "inverted list has {} labels but {} code elements",
                    list.labels.len(),
                    list.codes.len()
                )));
            }
            if let Some(label) = list
                .labels
                .iter()
                .find(|&&label| label < 0 || label as usize >= self.ntotal)
            {
                return Err(malformed(format_args!(
                    "label {} out of range for {} vectors",
                    label, self.ntotal
                )));
            }
            stored += list.labels.len();
        }
        if stored != self.ntotal {
            return Err(malformed(format_args!(
                "inverted lists hold {} vectors, expected {}",
                stored, self.ntotal
            )));
        }
        Ok(())
    }

    fn probe(&self, query: &[S::Elem]) -> Vec<usize> {
        self.quantizer
            .search_candidates(query, self.nprobe.min(self.nlist), None)
            .into_iter()
            .map(|c| c.label as usize)
            .collect()
    }

    pub(crate) fn search(
        &self,
        query: &[S::Elem],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        let mut top = TopK::new(k);
        for list_no in self.probe(query) {
            let list = &self.lists[list_no];
            for (label, code) in list.labels.iter().zip(list.codes.chunks_exact(self.unit_len)) {
                if accepts(filter, *label) {
                    top.push(Candidate::new(self.space.cost(code, query), *label));
                }
            }
        }
        top.into_sorted_vec()
    }

    pub(crate) fn range_search(
        &self,
        query: &[S::Elem],
        max_cost: f32,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        let mut hits = Vec::new();
        for list_no in self.probe(query) {
            let list = &self.lists[list_no];
            for (label, code) in list.labels.iter().zip(list.codes.chunks_exact(self.unit_len)) {
                if !accepts(filter, *label) {
                    continue;
                }
                let cost = self.space.cost(code, query);
                if cost < max_cost {
                    hits.push(Candidate::new(cost, *label));
                }
            }
        }
        hits.sort();
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::FlatIndex;
    use crate::persistence::{from_bytes, to_bytes, IndexArtifact, StoredIndex};
    use crate::space::FloatSpace;

    fn clustered(n_per: usize) -> Vec<f32> {
        let centers = [[0.0f32, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]];
        let mut data = Vec::new();
        for i in 0..n_per {
            for c in &centers {
                let jitter = (i as f32) * 0.01;
                data.extend_from_slice(&[c[0] + jitter, c[1] - jitter]);
            }
        }
        data
    }

    fn ivf(nlist: usize) -> IvfIndex<FloatSpace> {
        let quantizer = AnyIndex::Flat(FlatIndex::new(FloatSpace::default(), 2).unwrap());
        IvfIndex::new(quantizer, nlist, KMeansConfig::default()).unwrap()
    }

    #[test]
    fn test_untrained_until_centroids_loaded() {
        let mut index = ivf(4);
        assert!(!index.is_trained());
        assert!(matches!(index.add(&[1.0, 2.0]), Err(AnnError::UntrainedIndex)));

        index.train(&clustered(10)).unwrap();
        assert!(index.is_trained());
        assert_eq!(index.quantizer().ntotal(), 4);
    }

    #[test]
    fn test_add_distributes_over_lists() {
        let mut index = ivf(4);
        let data = clustered(10);
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        assert_eq!(index.ntotal(), 40);
        assert_eq!(index.list_sizes().iter().sum::<usize>(), 40);
        assert!(index.list_sizes().iter().all(|&size| size > 0));
    }

    #[test]
    fn test_search_finds_own_cluster() {
        let mut index = ivf(4);
        let data = clustered(10);
        index.train(&data).unwrap();
        index.add(&data).unwrap();

        let hits = index.search(&[10.0, 10.0], 3, None);
        assert_eq!(hits.len(), 3);
        // every fourth vector belongs to the (10, 10) cluster
        assert!(hits.iter().all(|c| c.label % 4 == 3));
    }

    #[test]
    fn test_nprobe_widens_search() {
        let mut index = ivf(4);
        let data = clustered(5);
        index.train(&data).unwrap();
        index.add(&data).unwrap();

        assert_eq!(index.search(&[0.0, 0.0], 20, None).len(), 5);
        index.set_nprobe(4);
        assert_eq!(index.search(&[0.0, 0.0], 20, None).len(), 20);
        index.set_nprobe(64);
        assert_eq!(index.search(&[0.0, 0.0], 20, None).len(), 20);
    }

    fn encode(index: IvfIndex<FloatSpace>) -> Vec<u8> {
        let artifact = IndexArtifact::Float(StoredIndex::Bare(AnyIndex::InvertedFile(index)));
        to_bytes(&artifact).unwrap()
    }

    #[test]
    fn test_trained_lists_pass_validation() {
        let mut index = ivf(4);
        let data = clustered(10);
        index.train(&data).unwrap();
        index.add(&data).unwrap();

        let loaded = from_bytes(&encode(index)).unwrap();
        assert_eq!(loaded.ntotal(), 40);
        assert!(loaded.is_trained());
    }

    #[test]
    fn test_truncated_lists_rejected_on_load() {
        let mut index = ivf(4);
        let data = clustered(10);
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        index.lists.truncate(1);

        assert!(matches!(from_bytes(&encode(index)), Err(AnnError::FormatMismatch(_))));
    }

    #[test]
    fn test_inconsistent_lists_rejected_on_load() {
        let mut index = ivf(4);
        let data = clustered(10);
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        index.lists[0].codes.pop();
        assert!(matches!(
            AnyIndex::InvertedFile(index).validate(),
            Err(AnnError::FormatMismatch(_))
        ));

        let mut index = ivf(4);
        index.train(&data).unwrap();
        index.add(&data).unwrap();
        index.lists[1].labels[0] = 400;
        assert!(matches!(
            AnyIndex::InvertedFile(index).validate(),
            Err(AnnError::FormatMismatch(_))
        ));

        // untrained template claiming vectors
        let mut index = ivf(4);
        index.ntotal = 3;
        assert!(matches!(from_bytes(&encode(index)), Err(AnnError::FormatMismatch(_))));
    }
}
