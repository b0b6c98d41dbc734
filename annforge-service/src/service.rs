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

//! Index construction services
//!
//! Two flows, each available for float and binary vectors:
//!
//! - **build new**: validate the batch, construct the topology from its
//!   description, apply tuning parameters, refuse untrained indexes, insert the
//!   vectors under their ids and persist the result.
//! - **build from template**: decode a trained template, insert the vectors
//!   under their ids, drop the vector buffer and persist. The factory and the
//!   parameter resolver are never consulted.

use crate::context::ExecutionContext;
use crate::methods::{IndexMethods, NativeIndexMethods};
use annforge_core::{
    AnnError, AnnResult, Element, Metric, Ownership, SpaceKind, TuningParams, VectorBatch,
    VectorBuffer,
};
use annforge_index::{
    AnyIndex, BinarySpace, FloatSpace, IdMappedIndex, IndexArtifact, IndexFactory, Space,
    StoredIndex, Topology,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Inputs of a "build new" call
#[derive(Debug)]
pub struct CreateIndexRequest<'a, E: Element> {
    /// Ignored by the binary service, which always uses Hamming distance
    pub metric: Metric,
    pub description: &'a str,
    pub dimension: usize,
    pub ids: &'a [i64],
    pub vectors: VectorBuffer<'a, E>,
    pub path: &'a Path,
    pub params: &'a TuningParams,
    pub context: &'a ExecutionContext,
}

/// Inputs of a "build from template" call
#[derive(Debug)]
pub struct TemplateIndexRequest<'a, E: Element> {
    pub template: &'a [u8],
    pub ids: &'a [i64],
    pub vectors: VectorBuffer<'a, E>,
    pub path: &'a Path,
    pub context: &'a ExecutionContext,
}

/// What a successful construction produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub path: PathBuf,
    pub space: SpaceKind,
    pub topology: Topology,
    pub dimension: usize,
    pub ntotal: usize,
    /// Ownership of the vector buffer the call consumed
    pub buffer: Ownership,
}

pub trait IndexService {
    type Elem: Element;

    fn create_index(&self, request: CreateIndexRequest<'_, Self::Elem>) -> AnnResult<BuildSummary>;

    fn create_index_from_template(
        &self,
        request: TemplateIndexRequest<'_, Self::Elem>,
    ) -> AnnResult<BuildSummary>;
}

/// Routes space-specific steps to the matching [`IndexMethods`] entry points
pub(crate) trait ServiceSpace: Space {
    fn construct<M: IndexMethods + ?Sized>(
        methods: &M,
        factory: &IndexFactory,
        metric: Metric,
        dimension: usize,
        description: &str,
    ) -> AnnResult<AnyIndex<Self>>;

    fn tune<M: IndexMethods + ?Sized>(
        methods: &M,
        params: &TuningParams,
        index: &mut AnyIndex<Self>,
    ) -> AnnResult<()>;

    fn into_artifact(stored: StoredIndex<Self>) -> IndexArtifact;

    /// `Err` carries the artifact back when it belongs to the other space
    fn from_artifact(artifact: IndexArtifact) -> Result<StoredIndex<Self>, IndexArtifact>;
}

impl ServiceSpace for FloatSpace {
    fn construct<M: IndexMethods + ?Sized>(
        methods: &M,
        factory: &IndexFactory,
        metric: Metric,
        dimension: usize,
        description: &str,
    ) -> AnnResult<AnyIndex<Self>> {
        methods.index_factory(factory, dimension, description, metric)
    }

    fn tune<M: IndexMethods + ?Sized>(
        methods: &M,
        params: &TuningParams,
        index: &mut AnyIndex<Self>,
    ) -> AnnResult<()> {
        methods.apply_parameters(params, index)
    }

    fn into_artifact(stored: StoredIndex<Self>) -> IndexArtifact {
        IndexArtifact::Float(stored)
    }

    fn from_artifact(artifact: IndexArtifact) -> Result<StoredIndex<Self>, IndexArtifact> {
        match artifact {
            IndexArtifact::Float(stored) => Ok(stored),
            other => Err(other),
        }
    }
}

impl ServiceSpace for BinarySpace {
    fn construct<M: IndexMethods + ?Sized>(
        methods: &M,
        factory: &IndexFactory,
        _metric: Metric,
        dimension: usize,
        description: &str,
    ) -> AnnResult<AnyIndex<Self>> {
        methods.index_binary_factory(factory, dimension, description)
    }

    fn tune<M: IndexMethods + ?Sized>(
        methods: &M,
        params: &TuningParams,
        index: &mut AnyIndex<Self>,
    ) -> AnnResult<()> {
        methods.apply_binary_parameters(params, index)
    }

    fn into_artifact(stored: StoredIndex<Self>) -> IndexArtifact {
        IndexArtifact::Binary(stored)
    }

    fn from_artifact(artifact: IndexArtifact) -> Result<StoredIndex<Self>, IndexArtifact> {
        match artifact {
            IndexArtifact::Binary(stored) => Ok(stored),
            other => Err(other),
        }
    }
}

fn summarize<S: Space>(
    mapped: &IdMappedIndex<S>,
    path: &Path,
    buffer: Ownership,
) -> BuildSummary {
    BuildSummary {
        path: path.to_path_buf(),
        space: mapped.index().space().kind(),
        topology: mapped.index().topology(),
        dimension: mapped.dimension(),
        ntotal: mapped.ntotal(),
        buffer,
    }
}

fn build_new<S, M>(
    methods: &M,
    factory: &IndexFactory,
    sync_on_write: bool,
    request: CreateIndexRequest<'_, S::Elem>,
) -> AnnResult<BuildSummary>
where
    S: ServiceSpace,
    M: IndexMethods + ?Sized,
{
    let space = <S::Elem as Element>::SPACE;
    let span = tracing::info_span!(
        "create_index",
        description = request.description,
        dimension = request.dimension,
        space = %space,
    );
    let _enter = span.enter();

    let batch = VectorBatch::with_ids(request.vectors, request.dimension, request.ids)?;
    tracing::debug!(count = batch.count(), ownership = ?batch.ownership(), "Validated vectors");

    let description = request.description;
    let params = request.params;
    let ids = request.ids;
    let path = request.path;
    let metric = request.metric;
    let dimension = request.dimension;

    request.context.run(move || {
        let mut index = S::construct(methods, factory, metric, dimension, description)?;
        S::tune(methods, params, &mut index)?;
        if !index.is_trained() {
            return Err(AnnError::NotTrained {
                description: description.to_string(),
            });
        }

        let mut mapped = IdMappedIndex::wrap(index)?;
        mapped.add_batch(&batch, ids)?;
        let summary = summarize(&mapped, path, batch.ownership());
        drop(batch);

        methods.write_index(&S::into_artifact(StoredIndex::IdMapped(mapped)), path, sync_on_write)?;
        tracing::info!(ntotal = summary.ntotal, topology = %summary.topology, "Built index");
        Ok(summary)
    })
}

fn build_from_template<S, M>(
    methods: &M,
    sync_on_write: bool,
    request: TemplateIndexRequest<'_, S::Elem>,
) -> AnnResult<BuildSummary>
where
    S: ServiceSpace,
    M: IndexMethods + ?Sized,
{
    let space = <S::Elem as Element>::SPACE;
    let span = tracing::info_span!(
        "create_index_from_template",
        template_bytes = request.template.len(),
        space = %space,
    );
    let _enter = span.enter();

    let index = match S::from_artifact(methods.read_template(request.template)?) {
        Ok(StoredIndex::Bare(index)) => index,
        Ok(StoredIndex::IdMapped(_)) => {
            return Err(AnnError::MalformedTemplate(
                "template already carries external ids".to_string(),
            ))
        }
        Err(other) => {
            return Err(AnnError::MalformedTemplate(format!(
                "template holds a {} index, expected {}",
                other.space_kind(),
                space
            )))
        }
    };
    if index.ntotal() != 0 {
        return Err(AnnError::MalformedTemplate(format!(
            "template already holds {} vectors",
            index.ntotal()
        )));
    }

    let batch = VectorBatch::with_ids(request.vectors, index.dimension(), request.ids)?;
    tracing::debug!(
        count = batch.count(),
        topology = %index.topology(),
        trained = index.is_trained(),
        "Loaded template"
    );

    let ids = request.ids;
    let path = request.path;

    request.context.run(move || {
        let mut mapped = IdMappedIndex::wrap(index)?;
        mapped.add_batch(&batch, ids)?;

        let ownership = batch.release();
        tracing::debug!(?ownership, "Released vector buffer");

        let summary = summarize(&mapped, path, ownership);
        methods.write_index(&S::into_artifact(StoredIndex::IdMapped(mapped)), path, sync_on_write)?;
        tracing::info!(ntotal = summary.ntotal, topology = %summary.topology, "Built index from template");
        Ok(summary)
    })
}

/// Construction service for f32 vectors
#[derive(Debug, Clone)]
pub struct FloatIndexService<M: IndexMethods = NativeIndexMethods> {
    methods: Arc<M>,
    factory: IndexFactory,
    sync_on_write: bool,
}

impl FloatIndexService<NativeIndexMethods> {
    pub fn native(factory: IndexFactory, sync_on_write: bool) -> Self {
        Self::new(Arc::new(NativeIndexMethods), factory, sync_on_write)
    }
}

impl<M: IndexMethods> FloatIndexService<M> {
    pub fn new(methods: Arc<M>, factory: IndexFactory, sync_on_write: bool) -> Self {
        Self {
            methods,
            factory,
            sync_on_write,
        }
    }
}

impl<M: IndexMethods> IndexService for FloatIndexService<M> {
    type Elem = f32;

    fn create_index(&self, request: CreateIndexRequest<'_, f32>) -> AnnResult<BuildSummary> {
        build_new::<FloatSpace, M>(&self.methods, &self.factory, self.sync_on_write, request)
    }

    fn create_index_from_template(
        &self,
        request: TemplateIndexRequest<'_, f32>,
    ) -> AnnResult<BuildSummary> {
        build_from_template::<FloatSpace, M>(&self.methods, self.sync_on_write, request)
    }
}

/// Construction service for packed-bit vectors; dimensions are in bits
#[derive(Debug, Clone)]
pub struct BinaryIndexService<M: IndexMethods = NativeIndexMethods> {
    methods: Arc<M>,
    factory: IndexFactory,
    sync_on_write: bool,
}

impl BinaryIndexService<NativeIndexMethods> {
    pub fn native(factory: IndexFactory, sync_on_write: bool) -> Self {
        Self::new(Arc::new(NativeIndexMethods), factory, sync_on_write)
    }
}

impl<M: IndexMethods> BinaryIndexService<M> {
    pub fn new(methods: Arc<M>, factory: IndexFactory, sync_on_write: bool) -> Self {
        Self {
            methods,
            factory,
            sync_on_write,
        }
    }
}

impl<M: IndexMethods> IndexService for BinaryIndexService<M> {
    type Elem = u8;

    fn create_index(&self, request: CreateIndexRequest<'_, u8>) -> AnnResult<BuildSummary> {
        build_new::<BinarySpace, M>(&self.methods, &self.factory, self.sync_on_write, request)
    }

    fn create_index_from_template(
        &self,
        request: TemplateIndexRequest<'_, u8>,
    ) -> AnnResult<BuildSummary> {
        build_from_template::<BinarySpace, M>(&self.methods, self.sync_on_write, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annforge_index::{index_factory, to_bytes};
    use tempfile::TempDir;

    fn request<'a>(
        description: &'a str,
        dimension: usize,
        ids: &'a [i64],
        vectors: &'a [f32],
        path: &'a Path,
        params: &'a TuningParams,
        context: &'a ExecutionContext,
    ) -> CreateIndexRequest<'a, f32> {
        CreateIndexRequest {
            metric: Metric::L2,
            description,
            dimension,
            ids,
            vectors: VectorBuffer::lend(vectors),
            path,
            params,
            context,
        }
    }

    #[test]
    fn test_build_new_hnsw() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hnsw.ann");
        let service = FloatIndexService::native(IndexFactory::default(), false);
        let data: Vec<f32> = (0..40).map(|i| i as f32).collect();
        let ids: Vec<i64> = (0..10).collect();
        let params = TuningParams::new().with("ef_search", 32);
        let context = ExecutionContext::with_threads(2).unwrap();

        let summary = service
            .create_index(request("HNSW8,Flat", 4, &ids, &data, &path, &params, &context))
            .unwrap();
        assert_eq!(summary.ntotal, 10);
        assert_eq!(summary.topology, Topology::Graph);
        assert_eq!(summary.buffer, Ownership::Lent);
        assert!(path.exists());
    }

    #[test]
    fn test_untrained_description_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ivf.ann");
        let service = FloatIndexService::native(IndexFactory::default(), false);
        let data = vec![0.5f32; 40];
        let ids: Vec<i64> = (0..10).collect();
        let params = TuningParams::new();
        let context = ExecutionContext::ambient();

        let err = service
            .create_index(request("IVF4,Flat", 4, &ids, &data, &path, &params, &context))
            .unwrap_err();
        assert!(matches!(err, AnnError::NotTrained { ref description } if description == "IVF4,Flat"));
        assert!(!path.exists());
    }

    #[test]
    fn test_template_of_wrong_space_rejected() {
        let dir = TempDir::new().unwrap();
        let template = to_bytes(&IndexArtifact::Float(StoredIndex::Bare(
            index_factory(8, "Flat", Metric::L2).unwrap(),
        )))
        .unwrap();
        let service = BinaryIndexService::native(IndexFactory::default(), false);
        let data = vec![0u8; 4];
        let ids: Vec<i64> = (0..4).collect();
        let context = ExecutionContext::ambient();

        let err = service
            .create_index_from_template(TemplateIndexRequest {
                template: &template,
                ids: &ids,
                vectors: VectorBuffer::transfer(data),
                path: &dir.path().join("out.ann"),
                context: &context,
            })
            .unwrap_err();
        assert!(matches!(err, AnnError::MalformedTemplate(_)));
    }
}
