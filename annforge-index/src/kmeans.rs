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

//! k-means clustering for inverted-file centroids
//!
//! Lloyd iterations after seeded k-means++ initialization. Assignment runs on the
//! current rayon pool. Oversized samples are subsampled to
//! `k * max_points_per_centroid` points; clusters that go empty are reseeded
//! from a random training point.

use crate::space::Space;
use annforge_core::{AnnError, AnnResult, KMeansConfig};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Train `k` centroids from `sample`, returned back to back
pub fn train<S: Space>(
    space: &S,
    sample: &[S::Elem],
    unit_len: usize,
    k: usize,
    config: &KMeansConfig,
) -> AnnResult<Vec<S::Elem>> {
    let n = sample.len() / unit_len;
    if n < k {
        return Err(AnnError::InsufficientSample {
            required: k,
            actual: n,
        });
    }
    if n < k * config.min_points_per_centroid {
        tracing::warn!(
            n,
            k,
            min_points_per_centroid = config.min_points_per_centroid,
            "Training sample is small for the number of centroids"
        );
    }

    let mut rng = StdRng::seed_from_u64(config.seed);

    let max_points = k.saturating_mul(config.max_points_per_centroid).max(k);
    let points: Vec<&[S::Elem]> = if n > max_points {
        tracing::debug!(n, max_points, "Subsampling k-means training set");
        let mut picked = index::sample(&mut rng, n, max_points).into_vec();
        picked.sort_unstable();
        picked
            .into_iter()
            .map(|i| &sample[i * unit_len..(i + 1) * unit_len])
            .collect()
    } else {
        sample[..n * unit_len].chunks_exact(unit_len).collect()
    };
    let n = points.len();

    let mut centroids = init_plus_plus(space, &points, unit_len, k, &mut rng);

    let mut assignments = vec![usize::MAX; n];
    for iteration in 0..config.iterations.max(1) {
        let next: Vec<usize> = points
            .par_iter()
            .map(|p| nearest(space, &centroids, unit_len, p).0)
            .collect();

        let changed = next
            .iter()
            .zip(assignments.iter())
            .filter(|(a, b)| a != b)
            .count();
        assignments = next;

        let mut members: Vec<Vec<&[S::Elem]>> = vec![Vec::new(); k];
        for (point, &cluster) in points.iter().zip(assignments.iter()) {
            members[cluster].push(*point);
        }

        let mut reseeded = 0usize;
        for (cluster, cluster_members) in members.iter().enumerate() {
            let slot = &mut centroids[cluster * unit_len..(cluster + 1) * unit_len];
            if cluster_members.is_empty() {
                let donor = rng.gen_range(0..n);
                slot.copy_from_slice(points[donor]);
                reseeded += 1;
            } else {
                slot.copy_from_slice(&space.centroid(cluster_members, unit_len));
            }
        }

        tracing::trace!(iteration, changed, reseeded, "k-means iteration");
        if changed == 0 && reseeded == 0 {
            tracing::debug!(iteration, "k-means converged");
            break;
        }
    }

    Ok(centroids)
}

/// k-means++ seeding: each next centroid is drawn with probability
/// proportional to its cost above the point's self-cost.
fn init_plus_plus<S: Space>(
    space: &S,
    points: &[&[S::Elem]],
    unit_len: usize,
    k: usize,
    rng: &mut StdRng,
) -> Vec<S::Elem> {
    let n = points.len();
    let mut centroids: Vec<S::Elem> = Vec::with_capacity(k * unit_len);
    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(points[first]);

    let self_cost: Vec<f32> = points.par_iter().map(|p| space.cost(p, p)).collect();
    let mut weights: Vec<f32> = points
        .par_iter()
        .zip(self_cost.par_iter())
        .map(|(p, s)| (space.cost(points[first], p) - s).max(0.0))
        .collect();

    for _ in 1..k {
        let total: f64 = weights.iter().map(|&w| w as f64).sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = n - 1;
            for (i, &w) in weights.iter().enumerate() {
                target -= w as f64;
                if target <= 0.0 && w > 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        } else {
            rng.gen_range(0..n)
        };

        let start = centroids.len();
        centroids.extend_from_slice(points[next]);
        let centroid = &centroids[start..];
        weights
            .par_iter_mut()
            .zip(points.par_iter())
            .zip(self_cost.par_iter())
            .for_each(|((w, p), s)| {
                let d = (space.cost(centroid, p) - s).max(0.0);
                if d < *w {
                    *w = d;
                }
            });
    }

    centroids
}

/// Closest centroid to `vector` as `(index, cost)`
pub(crate) fn nearest<S: Space>(
    space: &S,
    centroids: &[S::Elem],
    unit_len: usize,
    vector: &[S::Elem],
) -> (usize, f32) {
    centroids
        .chunks_exact(unit_len)
        .enumerate()
        .map(|(i, c)| (i, space.cost(c, vector)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, f32::INFINITY))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{BinarySpace, FloatSpace};

    fn two_blobs() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..20 {
            let jitter = i as f32 * 0.01;
            data.extend_from_slice(&[jitter, jitter]);
            data.extend_from_slice(&[10.0 + jitter, 10.0 - jitter]);
        }
        data
    }

    #[test]
    fn test_separates_two_blobs() {
        let space = FloatSpace::default();
        let data = two_blobs();
        let centroids = train(&space, &data, 2, 2, &KMeansConfig::default()).unwrap();
        assert_eq!(centroids.len(), 4);

        let (near_origin, _) = nearest(&space, &centroids, 2, &[0.0, 0.0]);
        let (near_ten, _) = nearest(&space, &centroids, 2, &[10.0, 10.0]);
        assert_ne!(near_origin, near_ten);
    }

    #[test]
    fn test_insufficient_sample() {
        let space = FloatSpace::default();
        let err = train(&space, &[1.0, 2.0, 3.0, 4.0], 2, 4, &KMeansConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            AnnError::InsufficientSample {
                required: 4,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_deterministic_for_seed() {
        let space = FloatSpace::default();
        let data = two_blobs();
        let config = KMeansConfig::default();
        let a = train(&space, &data, 2, 3, &config).unwrap();
        let b = train(&space, &data, 2, 3, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_subsampling_keeps_k_centroids() {
        let space = BinarySpace;
        let data: Vec<u8> = (0..=255u8).collect();
        let config = KMeansConfig {
            max_points_per_centroid: 4,
            ..KMeansConfig::default()
        };
        let centroids = train(&space, &data, 1, 8, &config).unwrap();
        assert_eq!(centroids.len(), 8);
    }
}
