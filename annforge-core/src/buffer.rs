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

//! Vector buffers handed over by the host
//!
//! A [`VectorBuffer`] states who owns the allocation:
//!
//! - `Lent`: the host keeps ownership; the engine only reads the slice.
//! - `Transferred`: the engine owns the `Vec` and drops it when the batch
//!   goes out of scope (or earlier through [`VectorBatch::release`]).
//!
//! A [`VectorBatch`] adds the dimension and checks the count invariants before
//! any index object is allocated.

use crate::error::{AnnError, AnnResult};
use crate::metric::SpaceKind;
use std::fmt;

/// Element type of a vector lane
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Space this element type encodes
    const SPACE: SpaceKind;

    /// Dimensions packed into one element
    const DIMS_PER_ELEMENT: usize;

    /// Number of elements holding one vector of `dimension`
    fn unit_len(dimension: usize) -> AnnResult<usize>;
}

impl Element for f32 {
    const SPACE: SpaceKind = SpaceKind::Float;
    const DIMS_PER_ELEMENT: usize = 1;

    fn unit_len(dimension: usize) -> AnnResult<usize> {
        if dimension == 0 {
            return Err(AnnError::InvalidDimension(
                "dimension must be positive".to_string(),
            ));
        }
        Ok(dimension)
    }
}

impl Element for u8 {
    const SPACE: SpaceKind = SpaceKind::Binary;
    const DIMS_PER_ELEMENT: usize = 8;

    fn unit_len(dimension: usize) -> AnnResult<usize> {
        if dimension == 0 || dimension % 8 != 0 {
            return Err(AnnError::InvalidDimension(format!(
                "binary dimension {} should be a positive multiple of 8",
                dimension
            )));
        }
        Ok(dimension / 8)
    }
}

/// Who owns a vector buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Borrowed from the host, never freed by the engine
    Lent,
    /// Moved into the engine, freed when the engine is done with it
    Transferred,
}

/// Contiguous vector elements with explicit ownership
#[derive(Debug)]
pub enum VectorBuffer<'a, E: Element> {
    Lent(&'a [E]),
    Transferred(Vec<E>),
}

impl<'a, E: Element> VectorBuffer<'a, E> {
    /// Borrow host memory without taking ownership
    pub fn lend(data: &'a [E]) -> Self {
        VectorBuffer::Lent(data)
    }

    /// Take ownership of an allocation
    pub fn transfer(data: Vec<E>) -> Self {
        VectorBuffer::Transferred(data)
    }

    pub fn ownership(&self) -> Ownership {
        match self {
            VectorBuffer::Lent(_) => Ownership::Lent,
            VectorBuffer::Transferred(_) => Ownership::Transferred,
        }
    }

    pub fn as_slice(&self) -> &[E] {
        match self {
            VectorBuffer::Lent(data) => data,
            VectorBuffer::Transferred(data) => data.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A validated batch of fixed-width vectors
#[derive(Debug)]
pub struct VectorBatch<'a, E: Element> {
    buffer: VectorBuffer<'a, E>,
    dimension: usize,
    unit_len: usize,
    count: usize,
}

impl<'a, E: Element> VectorBatch<'a, E> {
    /// Interpret `buffer` as vectors of `dimension`.
    ///
    /// Fails with `InvalidDimension` before looking at the buffer length, then
    /// with `EmptyInput` if no complete vector is present.
    pub fn new(buffer: VectorBuffer<'a, E>, dimension: usize) -> AnnResult<Self> {
        let unit_len = E::unit_len(dimension)?;
        let count = buffer.len() / unit_len;
        if count == 0 {
            return Err(AnnError::EmptyInput);
        }

        let trailing = buffer.len() % unit_len;
        if trailing != 0 {
            tracing::warn!(
                trailing,
                dimension,
                count,
                "Ignoring trailing elements that do not form a complete vector"
            );
        }

        Ok(Self {
            buffer,
            dimension,
            unit_len,
            count,
        })
    }

    /// Like [`VectorBatch::new`], also checking the identifier count
    pub fn with_ids(buffer: VectorBuffer<'a, E>, dimension: usize, ids: &[i64]) -> AnnResult<Self> {
        let batch = Self::new(buffer, dimension)?;
        batch.check_ids(ids)?;
        Ok(batch)
    }

    /// Fail with `IdCountMismatch` unless there is exactly one id per vector
    pub fn check_ids(&self, ids: &[i64]) -> AnnResult<()> {
        if ids.len() != self.count {
            return Err(AnnError::IdCountMismatch {
                ids: ids.len(),
                vectors: self.count,
            });
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Elements per vector
    pub fn unit_len(&self) -> usize {
        self.unit_len
    }

    /// Number of complete vectors
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn space(&self) -> SpaceKind {
        E::SPACE
    }

    pub fn ownership(&self) -> Ownership {
        self.buffer.ownership()
    }

    /// All complete vectors, back to back
    pub fn as_slice(&self) -> &[E] {
        &self.buffer.as_slice()[..self.count * self.unit_len]
    }

    /// The `i`-th vector
    pub fn vector(&self, i: usize) -> &[E] {
        let start = i * self.unit_len;
        &self.as_slice()[start..start + self.unit_len]
    }

    pub fn iter(&self) -> impl Iterator<Item = &[E]> {
        self.as_slice().chunks_exact(self.unit_len)
    }

    /// Drop the batch now, freeing a transferred allocation.
    ///
    /// Returns the ownership the buffer had so callers can log what happened.
    pub fn release(self) -> Ownership {
        let ownership = self.buffer.ownership();
        drop(self.buffer);
        ownership
    }
}
