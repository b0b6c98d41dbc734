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

//! Parameter resolver
//!
//! Applies a [`TuningParams`] bag to an index tree. Each topology reads the
//! keys it understands; an inverted file hands its `coarse_quantizer` sub-map
//! to its quantizer and a composite passes the whole map on to its base.
//! Unknown keys are ignored. Setters assign, so applying the same map twice
//! leaves the index unchanged.

use crate::space::Space;
use crate::topology::AnyIndex;
use annforge_core::params::{COARSE_QUANTIZER, EF_CONSTRUCTION, EF_SEARCH, K_FACTOR, NPROBE};
use annforge_core::{AnnResult, TuningParams};

/// Apply `params` to `index` and, recursively, to its children
pub fn apply_parameters<S: Space>(params: &TuningParams, index: &mut AnyIndex<S>) -> AnnResult<()> {
    let topology = index.topology();
    for key in params.keys() {
        if !topology.supported_keys().iter().any(|supported| *supported == key) {
            tracing::trace!(key, %topology, "Tuning key not consumed at this level");
        }
    }

    match index {
        AnyIndex::Flat(_) => {}
        AnyIndex::InvertedFile(ivf) => {
            let nprobe = params.get_usize(NPROBE)?;
            let nested = params.get_map(COARSE_QUANTIZER)?;
            if let Some(nprobe) = nprobe {
                ivf.set_nprobe(nprobe);
            }
            if let Some(nested) = nested {
                apply_parameters(nested, ivf.quantizer_mut())?;
            }
        }
        AnyIndex::Graph(graph) => {
            let ef_construction = params.get_usize(EF_CONSTRUCTION)?;
            let ef_search = params.get_usize(EF_SEARCH)?;
            if let Some(ef_construction) = ef_construction {
                graph.set_ef_construction(ef_construction);
            }
            if let Some(ef_search) = ef_search {
                graph.set_ef_search(ef_search);
            }
        }
        AnyIndex::Composite(composite) => {
            if let Some(k_factor) = params.get_f32_at_least(K_FACTOR, 1.0)? {
                composite.set_k_factor(k_factor);
            }
            apply_parameters(params, composite.base_mut())?;
        }
    }
    Ok(())
}
