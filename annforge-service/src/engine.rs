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

//! Host-facing engine
//!
//! [`KnnEngine`] is the boundary a host runtime talks to. It resolves thread
//! hints to execution contexts, routes vectors to the float or binary service,
//! trains templates, and keeps loaded indexes in a handle registry for
//! querying.

use crate::context::{ExecutionContext, PoolCache};
use crate::methods::{IndexMethods, NativeIndexMethods};
use crate::metrics::EngineMetrics;
use crate::registry::{IndexHandle, IndexRegistry};
use crate::service::{
    BinaryIndexService, BuildSummary, CreateIndexRequest, FloatIndexService, IndexService,
    ServiceSpace, TemplateIndexRequest,
};
use annforge_core::{
    AnnError, AnnResult, BuildConfig, Element, Metric, SpaceType, TuningParams, VectorBatch,
    VectorBuffer,
};
use annforge_index::{
    read_index, to_bytes, BinarySpace, FloatSpace, IndexArtifact, IndexFactory, LabelFilter,
    Neighbor, StoredIndex,
};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Vectors handed over by the host
#[derive(Debug)]
pub enum HostVectors<'a> {
    Float(VectorBuffer<'a, f32>),
    Binary(VectorBuffer<'a, u8>),
}

impl<'a> HostVectors<'a> {
    pub fn len(&self) -> usize {
        match self {
            HostVectors::Float(buffer) => buffer.len(),
            HostVectors::Binary(buffer) => buffer.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single query vector
#[derive(Debug, Clone, Copy)]
pub enum QueryVector<'a> {
    Float(&'a [f32]),
    Binary(&'a [u8]),
}

/// A search hit in host terms
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QueryResult {
    pub id: i64,
    pub distance: f32,
    /// Relevance derived from the distance, higher is better
    pub score: f32,
}

#[derive(Debug)]
pub struct BuildIndexRequest<'a> {
    pub ids: &'a [i64],
    pub vectors: HostVectors<'a>,
    pub description: &'a str,
    pub dimension: usize,
    /// Zero falls back to the configured thread count
    pub thread_hint: usize,
    pub path: &'a Path,
    pub space_type: SpaceType,
    pub params: &'a TuningParams,
}

#[derive(Debug)]
pub struct TemplateBuildRequest<'a> {
    pub ids: &'a [i64],
    pub vectors: HostVectors<'a>,
    pub template: &'a [u8],
    pub path: &'a Path,
    pub thread_hint: usize,
}

#[derive(Debug)]
pub struct TrainRequest<'a> {
    pub description: &'a str,
    pub dimension: usize,
    pub space_type: SpaceType,
    pub sample: HostVectors<'a>,
    pub params: &'a TuningParams,
    pub thread_hint: usize,
}

pub struct KnnEngine<M: IndexMethods = NativeIndexMethods> {
    config: BuildConfig,
    methods: Arc<M>,
    factory: IndexFactory,
    float: FloatIndexService<M>,
    binary: BinaryIndexService<M>,
    pools: PoolCache,
    registry: IndexRegistry,
    metrics: EngineMetrics,
}

impl KnnEngine<NativeIndexMethods> {
    pub fn new(config: BuildConfig) -> AnnResult<Self> {
        Self::with_methods(config, Arc::new(NativeIndexMethods))
    }
}

impl<M: IndexMethods> KnnEngine<M> {
    pub fn with_methods(config: BuildConfig, methods: Arc<M>) -> AnnResult<Self> {
        let metrics = EngineMetrics::new()
            .map_err(|e| AnnError::Execution(format!("failed to register metrics: {}", e)))?;
        let factory = IndexFactory::from_config(&config);

        tracing::info!(
            thread_count = config.thread_count,
            max_threads = config.thread_limit(),
            max_pools = config.max_pools,
            sync_on_write = config.sync_on_write,
            "Initialized k-NN engine"
        );

        Ok(Self {
            float: FloatIndexService::new(Arc::clone(&methods), factory.clone(), config.sync_on_write),
            binary: BinaryIndexService::new(Arc::clone(&methods), factory.clone(), config.sync_on_write),
            methods,
            factory,
            pools: PoolCache::with_limits(config.thread_limit(), config.max_pools),
            registry: IndexRegistry::new(),
            metrics,
            config,
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    fn context(&self, thread_hint: usize) -> AnnResult<ExecutionContext> {
        let threads = if thread_hint == 0 {
            self.config.thread_count
        } else {
            thread_hint
        };
        self.pools.context(threads)
    }

    fn observe<T>(&self, operation: &str, f: impl FnOnce() -> AnnResult<T>) -> AnnResult<T> {
        let start = Instant::now();
        let result = f();
        let elapsed = start.elapsed();
        match &result {
            Ok(_) => self.metrics.record(operation, elapsed, None),
            Err(e) => {
                tracing::warn!(operation, category = e.category().as_str(), error = %e, "Operation failed");
                self.metrics.record(operation, elapsed, Some(e));
            }
        }
        result
    }

    /// Build, tune, fill and persist a new index
    pub fn build_index(&self, request: BuildIndexRequest<'_>) -> AnnResult<BuildSummary> {
        self.observe("build_index", || {
            let context = self.context(request.thread_hint)?;
            let summary = match (request.space_type.metric(), request.vectors) {
                (Some(metric), HostVectors::Float(vectors)) => {
                    self.float.create_index(CreateIndexRequest {
                        metric,
                        description: request.description,
                        dimension: request.dimension,
                        ids: request.ids,
                        vectors,
                        path: request.path,
                        params: request.params,
                        context: &context,
                    })?
                }
                (None, HostVectors::Binary(vectors)) => {
                    self.binary.create_index(CreateIndexRequest {
                        metric: Metric::default(),
                        description: request.description,
                        dimension: request.dimension,
                        ids: request.ids,
                        vectors,
                        path: request.path,
                        params: request.params,
                        context: &context,
                    })?
                }
                (_, vectors) => {
                    return Err(space_mismatch(request.description, request.space_type, &vectors))
                }
            };
            self.metrics.add_vectors(summary.ntotal);
            Ok(summary)
        })
    }

    /// Fill and persist a copy of a trained template
    pub fn build_index_from_template(
        &self,
        request: TemplateBuildRequest<'_>,
    ) -> AnnResult<BuildSummary> {
        self.observe("build_index_from_template", || {
            let context = self.context(request.thread_hint)?;
            let summary = match request.vectors {
                HostVectors::Float(vectors) => {
                    self.float.create_index_from_template(TemplateIndexRequest {
                        template: request.template,
                        ids: request.ids,
                        vectors,
                        path: request.path,
                        context: &context,
                    })?
                }
                HostVectors::Binary(vectors) => {
                    self.binary.create_index_from_template(TemplateIndexRequest {
                        template: request.template,
                        ids: request.ids,
                        vectors,
                        path: request.path,
                        context: &context,
                    })?
                }
            };
            self.metrics.add_vectors(summary.ntotal);
            Ok(summary)
        })
    }

    /// Train an empty index on `sample` and return it as template bytes
    pub fn train_index(&self, request: TrainRequest<'_>) -> AnnResult<Vec<u8>> {
        self.observe("train_index", || {
            let TrainRequest {
                description,
                dimension,
                space_type,
                sample,
                params,
                thread_hint,
            } = request;
            let context = self.context(thread_hint)?;
            let span = tracing::info_span!(
                "train_index",
                description,
                dimension,
                space_type = %space_type,
            );
            let _enter = span.enter();

            let artifact = match (space_type.metric(), sample) {
                (Some(metric), HostVectors::Float(sample)) => train::<FloatSpace, M>(
                    &self.methods,
                    &self.factory,
                    &context,
                    metric,
                    description,
                    params,
                    VectorBatch::new(sample, dimension)?,
                )?,
                (None, HostVectors::Binary(sample)) => train::<BinarySpace, M>(
                    &self.methods,
                    &self.factory,
                    &context,
                    Metric::default(),
                    description,
                    params,
                    VectorBatch::new(sample, dimension)?,
                )?,
                (_, sample) => return Err(space_mismatch(description, space_type, &sample)),
            };

            let bytes = to_bytes(&artifact)?;
            tracing::info!(template_bytes = bytes.len(), "Trained template");
            Ok(bytes)
        })
    }

    /// Read a persisted index and register it for querying
    pub fn load_index(&self, path: &Path) -> AnnResult<IndexHandle> {
        self.observe("load_index", || {
            let artifact = read_index(path)?;
            let (dimension, ntotal) = (artifact.dimension(), artifact.ntotal());
            let handle = self.registry.insert(artifact);
            self.metrics.set_loaded(self.registry.len());
            tracing::info!(%handle, ?path, dimension, ntotal, "Loaded index");
            Ok(handle)
        })
    }

    /// `k` nearest neighbors, optionally restricted to `filter_ids`
    pub fn query_index(
        &self,
        handle: IndexHandle,
        query: QueryVector<'_>,
        k: usize,
        filter_ids: Option<&[i64]>,
    ) -> AnnResult<Vec<QueryResult>> {
        let artifact = self.registry.get(handle)?;
        let filter = id_filter(filter_ids);
        let filter = filter.as_ref().map(|f| f as &dyn LabelFilter);

        let hits = match (&*artifact, query) {
            (IndexArtifact::Float(stored), QueryVector::Float(query)) => match stored {
                StoredIndex::Bare(index) => index.search(query, k, filter)?,
                StoredIndex::IdMapped(mapped) => mapped.search(query, k, filter)?,
            },
            (IndexArtifact::Binary(stored), QueryVector::Binary(query)) => match stored {
                StoredIndex::Bare(index) => index.search(query, k, filter)?,
                StoredIndex::IdMapped(mapped) => mapped.search(query, k, filter)?,
            },
            (artifact, _) => return Err(query_mismatch(artifact)),
        };
        Ok(to_results(artifact.space_type(), hits))
    }

    /// Neighbors within `radius`, best first, at most `max_results`,
    /// optionally restricted to `filter_ids`
    pub fn range_search(
        &self,
        handle: IndexHandle,
        query: QueryVector<'_>,
        radius: f32,
        max_results: usize,
        filter_ids: Option<&[i64]>,
    ) -> AnnResult<Vec<QueryResult>> {
        let artifact = self.registry.get(handle)?;
        let filter = id_filter(filter_ids);
        let filter = filter.as_ref().map(|f| f as &dyn LabelFilter);
        let mut hits = match (&*artifact, query) {
            (IndexArtifact::Float(stored), QueryVector::Float(query)) => match stored {
                StoredIndex::Bare(index) => index.range_search(query, radius, filter)?,
                StoredIndex::IdMapped(mapped) => mapped.range_search(query, radius, filter)?,
            },
            (IndexArtifact::Binary(stored), QueryVector::Binary(query)) => match stored {
                StoredIndex::Bare(index) => index.range_search(query, radius, filter)?,
                StoredIndex::IdMapped(mapped) => mapped.range_search(query, radius, filter)?,
            },
            (artifact, _) => return Err(query_mismatch(artifact)),
        };
        hits.truncate(max_results);
        Ok(to_results(artifact.space_type(), hits))
    }

    /// Unregister a loaded index
    pub fn free(&self, handle: IndexHandle) -> AnnResult<()> {
        self.observe("free", || {
            self.registry.remove(handle)?;
            self.metrics.set_loaded(self.registry.len());
            tracing::debug!(%handle, "Freed index");
            Ok(())
        })
    }
}

/// Membership test over the host's id list
fn id_filter(filter_ids: Option<&[i64]>) -> Option<impl Fn(i64) -> bool + Sync> {
    filter_ids.map(|ids| {
        let allowed: HashSet<i64> = ids.iter().copied().collect();
        move |id: i64| allowed.contains(&id)
    })
}

fn train<S, M>(
    methods: &M,
    factory: &IndexFactory,
    context: &ExecutionContext,
    metric: Metric,
    description: &str,
    params: &TuningParams,
    batch: VectorBatch<'_, S::Elem>,
) -> AnnResult<IndexArtifact>
where
    S: ServiceSpace,
    M: IndexMethods + ?Sized,
{
    context.run(move || {
        let mut index = S::construct(methods, factory, metric, batch.dimension(), description)?;
        S::tune(methods, params, &mut index)?;
        index.train(batch.as_slice())?;
        tracing::debug!(
            samples = batch.count(),
            trained = index.is_trained(),
            "Finished training pass"
        );
        Ok(S::into_artifact(StoredIndex::Bare(index)))
    })
}

fn to_results(space_type: SpaceType, hits: Vec<Neighbor>) -> Vec<QueryResult> {
    hits.into_iter()
        .map(|hit| QueryResult {
            id: hit.label,
            distance: hit.distance,
            score: space_type.score(hit.distance),
        })
        .collect()
}

fn space_mismatch(description: &str, space_type: SpaceType, vectors: &HostVectors<'_>) -> AnnError {
    let given = match vectors {
        HostVectors::Float(_) => <f32 as Element>::SPACE,
        HostVectors::Binary(_) => <u8 as Element>::SPACE,
    };
    AnnError::unsupported(
        description,
        format!(
            "space type {} requires {} vectors, got {}",
            space_type,
            space_type.space_kind(),
            given
        ),
    )
}

fn query_mismatch(artifact: &IndexArtifact) -> AnnError {
    AnnError::invalid_parameter(
        "query",
        format!("index holds {} vectors", artifact.space_kind()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> KnnEngine {
        let config = BuildConfig {
            sync_on_write: false,
            ..BuildConfig::default()
        };
        KnnEngine::new(config).unwrap()
    }

    #[test]
    fn test_space_type_must_match_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine();
        let data = vec![0u8; 8];
        let ids: Vec<i64> = (0..8).collect();
        let err = engine
            .build_index(BuildIndexRequest {
                ids: &ids,
                vectors: HostVectors::Binary(VectorBuffer::lend(&data)),
                description: "Flat",
                dimension: 8,
                thread_hint: 0,
                path: &dir.path().join("x.ann"),
                space_type: SpaceType::L2,
                params: &TuningParams::new(),
            })
            .unwrap_err();
        assert!(matches!(err, AnnError::UnsupportedTopology { .. }));
    }

    #[test]
    fn test_unknown_handle() {
        let engine = engine();
        let handle = IndexHandle::from_raw(42);
        assert!(matches!(engine.free(handle), Err(AnnError::UnknownHandle(42))));
        assert!(matches!(
            engine.query_index(handle, QueryVector::Float(&[0.0]), 1, None),
            Err(AnnError::UnknownHandle(42))
        ));
    }

    #[test]
    fn test_thread_hint_falls_back_to_config() {
        let config = BuildConfig {
            thread_count: 2,
            max_threads: 4,
            ..BuildConfig::default()
        };
        let engine = KnnEngine::new(config).unwrap();
        assert_eq!(engine.context(0).unwrap().threads(), 2);
        assert_eq!(engine.context(3).unwrap().threads(), 3);
        assert_eq!(engine.context(64).unwrap().threads(), 4);
    }
}
