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

//! Vector spaces
//!
//! A [`Space`] fixes the element type of a vector and the cost function the
//! indexes rank by. Costs are always "lower is closer"; [`Space::reported`]
//! turns a cost back into the distance callers expect (inner product is
//! reported as the raw similarity).

use annforge_core::{Element, Metric, SpaceKind, SpaceType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type and cost function of an index
pub trait Space:
    Clone + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Elem: Element + Serialize + DeserializeOwned;

    fn kind(&self) -> SpaceKind;

    /// Host-facing space type, used for score translation
    fn space_type(&self) -> SpaceType;

    /// Ranking cost between two vectors of equal length, lower is closer
    fn cost(&self, a: &[Self::Elem], b: &[Self::Elem]) -> f32;

    /// Distance reported to callers for a ranking cost
    fn reported(&self, cost: f32) -> f32;

    /// Inverse of [`Space::reported`]
    fn to_cost(&self, distance: f32) -> f32;

    /// Representative of a non-empty set of vectors, used as a k-means centroid
    fn centroid(&self, members: &[&[Self::Elem]], unit_len: usize) -> Vec<Self::Elem>;
}

/// Dense f32 vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FloatSpace {
    pub metric: Metric,
}

impl FloatSpace {
    pub fn new(metric: Metric) -> Self {
        Self { metric }
    }
}

impl Space for FloatSpace {
    type Elem = f32;

    fn kind(&self) -> SpaceKind {
        SpaceKind::Float
    }

    fn space_type(&self) -> SpaceType {
        self.metric.into()
    }

    #[inline]
    fn cost(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::L2 => l2_squared(a, b),
            Metric::InnerProduct => -inner_product(a, b),
        }
    }

    fn reported(&self, cost: f32) -> f32 {
        match self.metric {
            Metric::L2 => cost,
            Metric::InnerProduct => -cost,
        }
    }

    fn to_cost(&self, distance: f32) -> f32 {
        match self.metric {
            Metric::L2 => distance,
            Metric::InnerProduct => -distance,
        }
    }

    fn centroid(&self, members: &[&[f32]], unit_len: usize) -> Vec<f32> {
        let mut sum = vec![0.0f32; unit_len];
        for member in members {
            for (s, v) in sum.iter_mut().zip(member.iter()) {
                *s += v;
            }
        }
        let n = members.len().max(1) as f32;
        for s in sum.iter_mut() {
            *s /= n;
        }
        sum
    }
}

/// Packed bit vectors compared by Hamming distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BinarySpace;

impl Space for BinarySpace {
    type Elem = u8;

    fn kind(&self) -> SpaceKind {
        SpaceKind::Binary
    }

    fn space_type(&self) -> SpaceType {
        SpaceType::Hamming
    }

    #[inline]
    fn cost(&self, a: &[u8], b: &[u8]) -> f32 {
        hamming(a, b) as f32
    }

    fn reported(&self, cost: f32) -> f32 {
        cost
    }

    fn to_cost(&self, distance: f32) -> f32 {
        distance
    }

    /// Bitwise majority vote; ties resolve to 0
    fn centroid(&self, members: &[&[u8]], unit_len: usize) -> Vec<u8> {
        let mut ones = vec![0usize; unit_len * 8];
        for member in members {
            for (byte_idx, byte) in member.iter().enumerate() {
                for bit in 0..8 {
                    if byte & (1 << bit) != 0 {
                        ones[byte_idx * 8 + bit] += 1;
                    }
                }
            }
        }
        let majority = members.len() / 2;
        let mut out = vec![0u8; unit_len];
        for (i, count) in ones.iter().enumerate() {
            if *count > majority {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        out
    }
}

#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline]
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn hamming(a: &[u8], b: &[u8]) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inner_product_cost_is_negated() {
        let space = FloatSpace::new(Metric::InnerProduct);
        let cost = space.cost(&[1.0, 2.0], &[3.0, 4.0]);
        assert_eq!(cost, -11.0);
        assert_eq!(space.reported(cost), 11.0);
        assert_eq!(space.to_cost(11.0), cost);
    }

    #[test]
    fn test_float_centroid_is_mean() {
        let space = FloatSpace::default();
        let a = [0.0, 2.0];
        let b = [2.0, 4.0];
        assert_eq!(space.centroid(&[&a, &b], 2), vec![1.0, 3.0]);
    }

    #[test]
    fn test_hamming() {
        let space = BinarySpace;
        assert_eq!(space.cost(&[0b1111_0000], &[0b0000_1111]), 8.0);
        assert_eq!(space.cost(&[0xff, 0x01], &[0xff, 0x00]), 1.0);
    }

    #[test]
    fn test_binary_centroid_majority() {
        let space = BinarySpace;
        let a = [0b0000_0011u8];
        let b = [0b0000_0001u8];
        let c = [0b0000_0101u8];
        assert_eq!(space.centroid(&[&a, &b, &c], 1), vec![0b0000_0001]);
    }
}
