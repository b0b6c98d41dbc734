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

//! Annforge Core
//!
//! Shared vocabulary for the index construction engine: vector buffers with
//! explicit ownership, distance metrics and space types, tuning parameters,
//! build configuration and the error taxonomy used by every annforge crate.

pub mod buffer;
pub mod config;
pub mod error;
pub mod metric;
pub mod params;
pub mod transfer;

pub use buffer::{Element, Ownership, VectorBatch, VectorBuffer};
pub use config::{BuildConfig, GraphDefaults, KMeansConfig};
pub use error::{AnnError, AnnResult, ErrorCategory};
pub use metric::{Metric, SpaceKind, SpaceType};
pub use params::{ParamValue, TuningParams};
pub use transfer::VectorTransfer;
