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

//! HNSW proximity graph
//!
//! Layered small-world graph over a flat vector store. Node levels are drawn
//! from a per-node seeded RNG so two builds over the same data produce the same
//! graph. Neighbor lists use the diversity heuristic with pruned candidates
//! filling leftover slots; level 0 allows `2 * M` links, upper levels `M`.
//!
//! Filtered search walks rejected nodes like any other node but never returns
//! them, so a selective filter degrades into a wider traversal rather than
//! fewer results.

use crate::flat::FlatIndex;
use crate::search::{accepts, Candidate, LabelFilter};
use crate::space::Space;
use crate::topology::malformed;
use annforge_core::{AnnError, AnnResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

const MAX_LEVEL: usize = 16;
const DEFAULT_SEED: u64 = 0x5eed_a11f;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Space", deserialize = "S: Space"))]
pub struct HnswIndex<S: Space> {
    storage: FlatIndex<S>,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    /// node -> level -> neighbor ids
    links: Vec<Vec<Vec<u32>>>,
    entry_point: Option<u32>,
    max_level: usize,
    level_mult: f64,
    seed: u64,
}

impl<S: Space> HnswIndex<S> {
    pub fn new(
        space: S,
        dimension: usize,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> AnnResult<Self> {
        if m < 2 {
            return Err(AnnError::invalid_parameter(
                "M",
                format!("graph degree must be at least 2, got {}", m),
            ));
        }
        Ok(Self {
            storage: FlatIndex::new(space, dimension)?,
            m,
            ef_construction: ef_construction.max(1),
            ef_search: ef_search.max(1),
            links: Vec::new(),
            entry_point: None,
            max_level: 0,
            level_mult: 1.0 / (m as f64).ln(),
            seed: DEFAULT_SEED,
        })
    }

    pub fn space(&self) -> &S {
        self.storage.space()
    }

    pub fn dimension(&self) -> usize {
        self.storage.dimension()
    }

    pub fn unit_len(&self) -> usize {
        self.storage.unit_len()
    }

    pub fn ntotal(&self) -> usize {
        self.storage.ntotal()
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn ef_construction(&self) -> usize {
        self.ef_construction
    }

    pub fn ef_search(&self) -> usize {
        self.ef_search
    }

    pub fn set_ef_construction(&mut self, ef_construction: usize) {
        self.ef_construction = ef_construction.max(1);
    }

    pub fn set_ef_search(&mut self, ef_search: usize) {
        self.ef_search = ef_search.max(1);
    }

    /// Highest populated level
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Insert vectors one node at a time
    pub fn add(&mut self, vectors: &[S::Elem]) -> AnnResult<()> {
        let start = self.storage.ntotal();
        self.storage.add(vectors)?;
        let end = self.storage.ntotal();
        for node in start..end {
            self.insert(node as u32);
        }
        tracing::debug!(
            added = end - start,
            ntotal = end,
            max_level = self.max_level,
            "Inserted vectors into graph"
        );
        Ok(())
    }

    pub(crate) fn validate(&self) -> AnnResult<()> {
        self.storage.validate()?;
        let ntotal = self.storage.ntotal();
        if self.m < 2 || self.ef_search == 0 || self.ef_construction == 0 {
            return Err(malformed(format_args!(
                "graph parameters M={} efSearch={} efConstruction={}",
                self.m, self.ef_search, self.ef_construction
            )));
        }
        if self.links.len() != ntotal {
            return Err(malformed(format_args!(
                "graph has {} adjacency lists for {} vectors",
                self.links.len(),
                ntotal
            )));
        }
        if self.max_level > MAX_LEVEL {
            return Err(malformed(format_args!("graph level {} too high", self.max_level)));
        }
        match self.entry_point {
            None if ntotal != 0 => return Err(malformed("populated graph has no entry point")),
            Some(ep) if ep as usize >= ntotal => {
                return Err(malformed(format_args!(
                    "entry point {} out of range for {} vectors",
                    ep, ntotal
                )))
            }
            _ => {}
        }
        for (node, levels) in self.links.iter().enumerate() {
            if levels.len() > MAX_LEVEL + 1 {
                return Err(malformed(format_args!("node {} has {} levels", node, levels.len())));
            }
            if let Some(neighbor) = levels.iter().flatten().find(|&&n| n as usize >= ntotal) {
                return Err(malformed(format_args!(
                    "node {} links to missing node {}",
                    node, neighbor
                )));
            }
        }
        Ok(())
    }

    fn max_degree(&self, level: usize) -> usize {
        if level == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    fn random_level(&self, node: u32) -> usize {
        let mut rng =
            StdRng::seed_from_u64(self.seed ^ (node as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        let r: f64 = rng.gen::<f64>().max(1e-15);
        ((-r.ln() * self.level_mult).floor() as usize).min(MAX_LEVEL)
    }

    fn insert(&mut self, node: u32) {
        let level = self.random_level(node);
        self.links.push(vec![Vec::new(); level + 1]);

        let ep = match self.entry_point {
            Some(ep) => ep,
            None => {
                self.entry_point = Some(node);
                self.max_level = level;
                return;
            }
        };

        let query = self.storage.vector(node as usize).to_vec();

        let mut current = ep;
        if level < self.max_level {
            for l in ((level + 1)..=self.max_level).rev() {
                current = self.greedy_closest(&query, current, l);
            }
        }

        let build_ef = self.ef_construction.max(self.m);
        let mut entry_points = vec![current];
        for l in (0..=level.min(self.max_level)).rev() {
            let candidates = self.search_layer(&query, &entry_points, build_ef, l, None);
            let neighbors = self.select_neighbors(candidates, self.m);
            let max_conn = self.max_degree(l);
            for &neighbor in &neighbors {
                self.connect(neighbor, node, l, max_conn);
            }
            if !neighbors.is_empty() {
                entry_points.clone_from(&neighbors);
            }
            self.links[node as usize][l] = neighbors;
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(node);
        }
    }

    /// Add a back link `from -> to`, shrinking the list if it overflows
    fn connect(&mut self, from: u32, to: u32, level: usize, max_conn: usize) {
        let overflow = match self.links[from as usize].get_mut(level) {
            Some(list) => {
                list.push(to);
                list.len() > max_conn
            }
            None => return,
        };
        if !overflow {
            return;
        }

        let base = self.storage.vector(from as usize);
        let candidates: Vec<Candidate> = self.links[from as usize][level]
            .iter()
            .map(|&n| Candidate::new(self.storage.cost_to(n as usize, base), n as i64))
            .collect();
        let kept = self.select_neighbors(candidates, max_conn);
        self.links[from as usize][level] = kept;
    }

    /// Diversity heuristic: keep a candidate only if it is closer to the base
    /// than to every neighbor already kept, then top up from the rejects.
    fn select_neighbors(&self, mut candidates: Vec<Candidate>, m: usize) -> Vec<u32> {
        candidates.sort_unstable();
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        let mut pruned: Vec<Candidate> = Vec::new();

        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let vector = self.storage.vector(candidate.label as usize);
            let diverse = selected
                .iter()
                .all(|s| self.storage.cost_to(s.label as usize, vector) >= candidate.cost);
            if diverse {
                selected.push(candidate);
            } else {
                pruned.push(candidate);
            }
        }

        for candidate in pruned {
            if selected.len() >= m {
                break;
            }
            selected.push(candidate);
        }

        selected.into_iter().map(|c| c.label as u32).collect()
    }

    fn greedy_closest(&self, query: &[S::Elem], entry: u32, level: usize) -> u32 {
        self.search_layer(query, &[entry], 1, level, None)
            .first()
            .map_or(entry, |c| c.label as u32)
    }

    fn search_layer(
        &self,
        query: &[S::Elem],
        entry_points: &[u32],
        ef: usize,
        level: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        let mut visited = vec![false; self.links.len()];
        let mut candidates: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut results: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef + 1);

        for &ep in entry_points {
            let idx = ep as usize;
            if idx >= visited.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;
            let candidate = Candidate::new(self.storage.cost_to(idx, query), ep as i64);
            candidates.push(Reverse(candidate));
            if accepts(filter, candidate.label) {
                results.push(candidate);
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current.cost > worst.cost {
                        break;
                    }
                }
            }

            let neighbors = match self.links[current.label as usize].get(level) {
                Some(neighbors) => neighbors,
                None => continue,
            };

            for &neighbor in neighbors {
                let idx = neighbor as usize;
                if visited[idx] {
                    continue;
                }
                visited[idx] = true;

                let candidate = Candidate::new(self.storage.cost_to(idx, query), neighbor as i64);
                let improves = results.len() < ef
                    || results.peek().map_or(true, |worst| candidate.cost < worst.cost);
                if !improves {
                    continue;
                }
                candidates.push(Reverse(candidate));
                if accepts(filter, candidate.label) {
                    results.push(candidate);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        results.into_sorted_vec()
    }

    pub(crate) fn search(
        &self,
        query: &[S::Elem],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        let ep = match self.entry_point {
            Some(ep) => ep,
            None => return Vec::new(),
        };

        let mut current = ep;
        for level in (1..=self.max_level).rev() {
            current = self.greedy_closest(query, current, level);
        }

        let mut hits = self.search_layer(query, &[current], self.ef_search.max(k), 0, filter);
        hits.truncate(k);
        hits
    }

    /// Exact scan over the stored vectors
    pub(crate) fn range_search(
        &self,
        query: &[S::Elem],
        max_cost: f32,
        filter: Option<&dyn LabelFilter>,
    ) -> Vec<Candidate> {
        self.storage.range_search(query, max_cost, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{BinarySpace, FloatSpace};
    use std::collections::HashSet;

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
    }

    #[test]
    fn test_recall_against_flat() {
        let dim = 8;
        let data = random_vectors(500, dim, 7);
        let mut graph = HnswIndex::new(FloatSpace::default(), dim, 16, 64, 64).unwrap();
        graph.add(&data).unwrap();
        let mut flat = FlatIndex::new(FloatSpace::default(), dim).unwrap();
        flat.add(&data).unwrap();

        let queries = random_vectors(20, dim, 99);
        let mut found = 0;
        for query in queries.chunks_exact(dim) {
            let truth: HashSet<i64> = flat.search(query, 10, None).iter().map(|c| c.label).collect();
            found += graph
                .search(query, 10, None)
                .iter()
                .filter(|c| truth.contains(&c.label))
                .count();
        }
        let recall = found as f64 / 200.0;
        assert!(recall >= 0.9, "recall {} too low", recall);
    }

    #[test]
    fn test_degree_limits() {
        let dim = 4;
        let mut graph = HnswIndex::new(FloatSpace::default(), dim, 4, 32, 16).unwrap();
        graph.add(&random_vectors(300, dim, 3)).unwrap();
        for node in &graph.links {
            for (level, neighbors) in node.iter().enumerate() {
                assert!(neighbors.len() <= graph.max_degree(level));
            }
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let dim = 4;
        let data = random_vectors(200, dim, 11);
        let mut a = HnswIndex::new(FloatSpace::default(), dim, 8, 40, 16).unwrap();
        let mut b = HnswIndex::new(FloatSpace::default(), dim, 8, 40, 16).unwrap();
        a.add(&data).unwrap();
        b.add(&data).unwrap();
        assert_eq!(a.links, b.links);
        assert_eq!(a.entry_point, b.entry_point);
    }

    #[test]
    fn test_filtered_search_only_returns_accepted() {
        let dim = 4;
        let mut graph = HnswIndex::new(FloatSpace::default(), dim, 8, 40, 16).unwrap();
        graph.add(&random_vectors(200, dim, 5)).unwrap();
        let even = |label: i64| label % 2 == 0;
        let hits = graph.search(&[0.0; 4], 5, Some(&even as &dyn LabelFilter));
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|c| c.label % 2 == 0));
    }

    #[test]
    fn test_binary_graph_finds_exact_match() {
        let data: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37)).collect();
        let mut graph = HnswIndex::new(BinarySpace, 8, 8, 64, 64).unwrap();
        graph.add(&data).unwrap();
        for (i, byte) in data.iter().enumerate() {
            let hits = graph.search(&[*byte], 1, None);
            assert_eq!(hits[0].cost, 0.0, "node {} not found", i);
        }
    }

    #[test]
    fn test_degree_below_two_rejected() {
        assert!(HnswIndex::new(FloatSpace::default(), 4, 1, 40, 16).is_err());
    }

    #[test]
    fn test_validate_catches_broken_links() {
        let mut graph = HnswIndex::new(FloatSpace::default(), 4, 8, 40, 16).unwrap();
        graph.add(&random_vectors(50, 4, 3)).unwrap();
        assert!(graph.validate().is_ok());

        let mut dangling = graph.clone();
        dangling.links[0][0].push(50);
        assert!(matches!(dangling.validate(), Err(AnnError::FormatMismatch(_))));

        let mut missing = graph.clone();
        missing.links.pop();
        assert!(matches!(missing.validate(), Err(AnnError::FormatMismatch(_))));

        let mut lost_entry = graph;
        lost_entry.entry_point = Some(50);
        assert!(matches!(lost_entry.validate(), Err(AnnError::FormatMismatch(_))));
    }
}
