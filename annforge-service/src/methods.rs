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

//! Index library entry points used by the construction services
//!
//! The services never call the factory, the resolver or the writer directly;
//! they go through an [`IndexMethods`] implementation so that hosts (and
//! tests) can observe or replace each step.

use annforge_core::{AnnError, AnnResult, Metric, TuningParams};
use annforge_index::{
    apply_parameters, from_bytes, write_index, BinaryIndex, FloatIndex, IndexArtifact,
    IndexFactory,
};
use std::path::Path;

pub trait IndexMethods: Send + Sync {
    fn index_factory(
        &self,
        factory: &IndexFactory,
        dimension: usize,
        description: &str,
        metric: Metric,
    ) -> AnnResult<FloatIndex>;

    fn index_binary_factory(
        &self,
        factory: &IndexFactory,
        dimension: usize,
        description: &str,
    ) -> AnnResult<BinaryIndex>;

    fn apply_parameters(&self, params: &TuningParams, index: &mut FloatIndex) -> AnnResult<()>;

    fn apply_binary_parameters(
        &self,
        params: &TuningParams,
        index: &mut BinaryIndex,
    ) -> AnnResult<()>;

    fn write_index(&self, artifact: &IndexArtifact, path: &Path, sync: bool) -> AnnResult<()>;

    /// Decode template bytes; undecodable input is a `MalformedTemplate`
    fn read_template(&self, bytes: &[u8]) -> AnnResult<IndexArtifact>;
}

/// Calls straight into `annforge-index`
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeIndexMethods;

impl IndexMethods for NativeIndexMethods {
    fn index_factory(
        &self,
        factory: &IndexFactory,
        dimension: usize,
        description: &str,
        metric: Metric,
    ) -> AnnResult<FloatIndex> {
        factory.float(dimension, description, metric)
    }

    fn index_binary_factory(
        &self,
        factory: &IndexFactory,
        dimension: usize,
        description: &str,
    ) -> AnnResult<BinaryIndex> {
        factory.binary(dimension, description)
    }

    fn apply_parameters(&self, params: &TuningParams, index: &mut FloatIndex) -> AnnResult<()> {
        apply_parameters(params, index)
    }

    fn apply_binary_parameters(
        &self,
        params: &TuningParams,
        index: &mut BinaryIndex,
    ) -> AnnResult<()> {
        apply_parameters(params, index)
    }

    fn write_index(&self, artifact: &IndexArtifact, path: &Path, sync: bool) -> AnnResult<()> {
        write_index(artifact, path, sync)
    }

    fn read_template(&self, bytes: &[u8]) -> AnnResult<IndexArtifact> {
        from_bytes(bytes).map_err(|e| match e {
            AnnError::FormatMismatch(reason) => AnnError::MalformedTemplate(reason),
            other => other,
        })
    }
}

impl<M: IndexMethods + ?Sized> IndexMethods for std::sync::Arc<M> {
    fn index_factory(
        &self,
        factory: &IndexFactory,
        dimension: usize,
        description: &str,
        metric: Metric,
    ) -> AnnResult<FloatIndex> {
        (**self).index_factory(factory, dimension, description, metric)
    }

    fn index_binary_factory(
        &self,
        factory: &IndexFactory,
        dimension: usize,
        description: &str,
    ) -> AnnResult<BinaryIndex> {
        (**self).index_binary_factory(factory, dimension, description)
    }

    fn apply_parameters(&self, params: &TuningParams, index: &mut FloatIndex) -> AnnResult<()> {
        (**self).apply_parameters(params, index)
    }

    fn apply_binary_parameters(
        &self,
        params: &TuningParams,
        index: &mut BinaryIndex,
    ) -> AnnResult<()> {
        (**self).apply_binary_parameters(params, index)
    }

    fn write_index(&self, artifact: &IndexArtifact, path: &Path, sync: bool) -> AnnResult<()> {
        (**self).write_index(artifact, path, sync)
    }

    fn read_template(&self, bytes: &[u8]) -> AnnResult<IndexArtifact> {
        (**self).read_template(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_template_is_malformed() {
        let err = NativeIndexMethods.read_template(b"not an index").unwrap_err();
        assert!(matches!(err, AnnError::MalformedTemplate(_)));
    }
}
