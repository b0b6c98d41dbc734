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

//! Streaming vector transfer
//!
//! Hosts that read vectors one document at a time stage them here. Vectors are
//! buffered and flushed into a single contiguous allocation in batches whose
//! size is derived from a memory limit, then handed to the engine as a
//! transferred [`VectorBuffer`].

use crate::buffer::{Element, VectorBuffer};
use crate::error::{AnnError, AnnResult};

/// Accumulates vectors into one contiguous allocation
#[derive(Debug)]
pub struct VectorTransfer<E: Element> {
    memory_limit_bytes: usize,
    total_vectors: usize,
    vectors_per_transfer: Option<usize>,
    unit_len: Option<usize>,
    pending: Vec<E>,
    pending_count: usize,
    storage: Vec<E>,
    transfers: usize,
}

impl<E: Element> VectorTransfer<E> {
    /// Create a transfer that flushes roughly every `memory_limit_bytes`.
    /// A limit of zero flushes everything at once.
    pub fn new(memory_limit_bytes: usize) -> Self {
        Self {
            memory_limit_bytes,
            total_vectors: 0,
            vectors_per_transfer: None,
            unit_len: None,
            pending: Vec::new(),
            pending_count: 0,
            storage: Vec::new(),
            transfers: 0,
        }
    }

    /// Start a new transfer of `total_vectors` vectors, discarding any prior state
    pub fn init(&mut self, total_vectors: usize) {
        self.total_vectors = total_vectors;
        self.vectors_per_transfer = None;
        self.unit_len = None;
        self.pending.clear();
        self.pending_count = 0;
        self.storage = Vec::new();
        self.transfers = 0;
    }

    /// Stage one vector; flushes when a full batch is pending
    pub fn add_vector(&mut self, vector: &[E]) -> AnnResult<()> {
        let unit_len = match self.unit_len {
            Some(expected) if expected != vector.len() => {
                return Err(AnnError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                })
            }
            Some(expected) => expected,
            None => {
                if vector.is_empty() {
                    return Err(AnnError::InvalidDimension(
                        "cannot transfer an empty vector".to_string(),
                    ));
                }
                self.unit_len = Some(vector.len());
                self.storage
                    .reserve_exact(self.total_vectors.max(1) * vector.len());
                vector.len()
            }
        };

        let per_transfer = match self.vectors_per_transfer {
            Some(per_transfer) => per_transfer,
            None => {
                let per_transfer = self.compute_vectors_per_transfer(unit_len);
                self.vectors_per_transfer = Some(per_transfer);
                per_transfer
            }
        };

        self.pending.extend_from_slice(vector);
        self.pending_count += 1;
        if self.pending_count >= per_transfer {
            self.flush();
        }
        Ok(())
    }

    fn compute_vectors_per_transfer(&self, unit_len: usize) -> usize {
        let total = self.total_vectors.max(1);
        if self.memory_limit_bytes == 0 {
            return total;
        }
        let bytes_per_vector = unit_len * std::mem::size_of::<E>();
        (self.memory_limit_bytes / bytes_per_vector).clamp(1, total)
    }

    /// Move pending vectors into the contiguous storage
    pub fn flush(&mut self) {
        if self.pending_count == 0 {
            return;
        }
        self.storage.extend_from_slice(&self.pending);
        self.pending.clear();
        self.pending_count = 0;
        self.transfers += 1;
    }

    /// Dimension inferred from the first vector
    pub fn dimension(&self) -> Option<usize> {
        self.unit_len.map(|len| len * E::DIMS_PER_ELEMENT)
    }

    /// Number of flushes performed so far
    pub fn transfers(&self) -> usize {
        self.transfers
    }

    /// Vectors staged so far, flushed or not
    pub fn len(&self) -> usize {
        match self.unit_len {
            Some(unit_len) => self.storage.len() / unit_len + self.pending_count,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush and hand the allocation over as a transferred buffer
    pub fn into_buffer(mut self) -> (VectorBuffer<'static, E>, Option<usize>) {
        self.flush();
        let dimension = self.dimension();
        (VectorBuffer::transfer(self.storage), dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Ownership, VectorBatch};

    #[test]
    fn test_batches_follow_memory_limit() {
        // 4 floats = 16 bytes per vector, 32 byte limit = 2 vectors per flush
        let mut transfer = VectorTransfer::<f32>::new(32);
        transfer.init(5);
        for i in 0..5 {
            transfer.add_vector(&[i as f32; 4]).unwrap();
        }
        assert_eq!(transfer.transfers(), 2);
        assert_eq!(transfer.len(), 5);

        let (buffer, dimension) = transfer.into_buffer();
        assert_eq!(dimension, Some(4));
        assert_eq!(buffer.ownership(), Ownership::Transferred);

        let batch = VectorBatch::new(buffer, 4).unwrap();
        assert_eq!(batch.count(), 5);
        assert_eq!(batch.vector(3), &[3.0; 4]);
    }

    #[test]
    fn test_zero_limit_flushes_once() {
        let mut transfer = VectorTransfer::<f32>::new(0);
        transfer.init(3);
        for _ in 0..3 {
            transfer.add_vector(&[1.0, 2.0]).unwrap();
        }
        assert_eq!(transfer.transfers(), 1);
    }

    #[test]
    fn test_binary_dimension_is_bits() {
        let mut transfer = VectorTransfer::<u8>::new(1024);
        transfer.init(2);
        transfer.add_vector(&[0xff, 0x00]).unwrap();
        transfer.add_vector(&[0x0f, 0xf0]).unwrap();
        assert_eq!(transfer.dimension(), Some(16));
    }

    #[test]
    fn test_width_change_rejected() {
        let mut transfer = VectorTransfer::<f32>::new(1024);
        transfer.init(2);
        transfer.add_vector(&[1.0, 2.0, 3.0]).unwrap();
        let err = transfer.add_vector(&[1.0]).unwrap_err();
        assert!(matches!(
            err,
            AnnError::DimensionMismatch {
                expected: 3,
                actual: 1
            }
        ));
    }
}
