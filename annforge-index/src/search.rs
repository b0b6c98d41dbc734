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

//! Search result plumbing shared by every topology.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A search hit as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// Internal label for bare indexes, external id for ID-mapped ones
    pub label: i64,
    /// Raw distance in the space's convention (similarity for inner product)
    pub distance: f32,
}

/// Restricts which labels a search may return
pub trait LabelFilter: Sync {
    fn accept(&self, label: i64) -> bool;
}

impl<F> LabelFilter for F
where
    F: Fn(i64) -> bool + Sync,
{
    fn accept(&self, label: i64) -> bool {
        self(label)
    }
}

#[inline]
pub(crate) fn accepts(filter: Option<&dyn LabelFilter>, label: i64) -> bool {
    filter.map_or(true, |f| f.accept(label))
}

/// Ranking entry ordered by cost, then label
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub cost: f32,
    pub label: i64,
}

impl Candidate {
    pub fn new(cost: f32, label: i64) -> Self {
        Self { cost, label }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then_with(|| self.label.cmp(&other.label))
    }
}

/// Bounded collector keeping the `k` lowest-cost candidates
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.saturating_add(1).min(4096)),
        }
    }

    pub fn push(&mut self, candidate: Candidate) {
        if self.k == 0 {
            return;
        }
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    /// Sorted best first
    pub fn into_sorted_vec(self) -> Vec<Candidate> {
        self.heap.into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topk_keeps_lowest_costs() {
        let mut top = TopK::new(3);
        for (label, cost) in [5.0f32, 1.0, 4.0, 0.5, 3.0].iter().enumerate() {
            top.push(Candidate::new(*cost, label as i64));
        }
        let labels: Vec<i64> = top.into_sorted_vec().iter().map(|c| c.label).collect();
        assert_eq!(labels, vec![3, 1, 4]);
    }

    #[test]
    fn test_equal_costs_order_by_label() {
        let mut top = TopK::new(2);
        top.push(Candidate::new(1.0, 9));
        top.push(Candidate::new(1.0, 2));
        top.push(Candidate::new(1.0, 5));
        let labels: Vec<i64> = top.into_sorted_vec().iter().map(|c| c.label).collect();
        assert_eq!(labels, vec![2, 5]);
    }

    #[test]
    fn test_closure_filter() {
        let even = |label: i64| label % 2 == 0;
        let filter: &dyn LabelFilter = &even;
        assert!(accepts(Some(filter), 4));
        assert!(!accepts(Some(filter), 3));
        assert!(accepts(None, 3));
    }
}
