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

//! Annforge Service Layer
//!
//! Index construction for a host runtime:
//!
//! - **Services** (`service`): "build new" and "build from template" for float
//!   and binary vectors.
//! - **Engine** (`engine`): the host boundary, adding training, loading,
//!   querying and handle management on top of the services.
//! - **Execution** (`context`): per-call worker pools selected by thread hint.
//! - **Seams** (`methods`): the index library calls, replaceable for tests.

pub mod context;
pub mod engine;
pub mod methods;
pub mod metrics;
pub mod registry;
pub mod service;

pub use context::{ExecutionContext, PoolCache};
pub use engine::{
    BuildIndexRequest, HostVectors, KnnEngine, QueryResult, QueryVector, TemplateBuildRequest,
    TrainRequest,
};
pub use methods::{IndexMethods, NativeIndexMethods};
pub use metrics::{EngineMetrics, Outcome};
pub use registry::{IndexHandle, IndexRegistry};
pub use service::{
    BinaryIndexService, BuildSummary, CreateIndexRequest, FloatIndexService, IndexService,
    TemplateIndexRequest,
};
