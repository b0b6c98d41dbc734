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

//! Index factory
//!
//! Turns a comma separated description into an index. Supported shapes:
//!
//! | Float                 | Binary            |
//! |-----------------------|-------------------|
//! | `Flat`                | `BFlat`           |
//! | `HNSW<M>[,Flat]`      | `BHNSW<M>`        |
//! | `IVF<n>,Flat`         | `BIVF<n>`         |
//! | `IVF<n>_HNSW<M>,Flat` | `BIVF<n>_HNSW<M>` |
//!
//! Any of them may end in `,RFlat` to re-rank results exactly. A leading `B`
//! marks a binary description.

use crate::flat::FlatIndex;
use crate::hnsw::HnswIndex;
use crate::ivf::IvfIndex;
use crate::refine::RefineIndex;
use crate::space::{BinarySpace, FloatSpace, Space};
use crate::topology::{AnyIndex, BinaryIndex, FloatIndex};
use annforge_core::{
    AnnError, AnnResult, BuildConfig, Element, GraphDefaults, KMeansConfig, Metric, SpaceKind,
};

const REFINE_SUFFIX: &str = "RFlat";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Flat,
    Graph { m: usize },
    InvertedFile { nlist: usize, quantizer_m: Option<usize> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Parsed {
    kind: SpaceKind,
    shape: Shape,
    refine: bool,
}

fn parse_count(description: &str, text: &str, what: &str, min: usize) -> AnnResult<usize> {
    let value = text.parse::<usize>().map_err(|_| {
        AnnError::unsupported(description, format!("'{}' is not a valid {}", text, what))
    })?;
    if value < min {
        return Err(AnnError::unsupported(
            description,
            format!("{} must be at least {}, got {}", what, min, value),
        ));
    }
    Ok(value)
}

fn parse(description: &str) -> AnnResult<Parsed> {
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Err(AnnError::unsupported(description, "description is empty"));
    }

    let mut parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
    let refine = parts.len() > 1 && parts.last() == Some(&REFINE_SUFFIX);
    if refine {
        parts.pop();
    }

    let (kind, head) = match parts[0].strip_prefix('B') {
        Some(rest) => (SpaceKind::Binary, rest),
        None => (SpaceKind::Float, parts[0]),
    };
    let payload = &parts[1..];
    let flat_payload = payload.len() == 1 && payload[0] == "Flat";

    let shape = if head == "Flat" {
        Shape::Flat
    } else if let Some(rest) = head.strip_prefix("HNSW") {
        Shape::Graph {
            m: parse_count(description, rest, "graph degree", 2)?,
        }
    } else if let Some(rest) = head.strip_prefix("IVF") {
        let (nlist, quantizer) = match rest.split_once('_') {
            Some((nlist, quantizer)) => (nlist, Some(quantizer)),
            None => (rest, None),
        };
        let quantizer_m = match quantizer {
            None => None,
            Some(q) => {
                let m = q.strip_prefix("HNSW").ok_or_else(|| {
                    AnnError::unsupported(
                        description,
                        format!("unsupported coarse quantizer '{}'", q),
                    )
                })?;
                Some(parse_count(description, m, "graph degree", 2)?)
            }
        };
        Shape::InvertedFile {
            nlist: parse_count(description, nlist, "list count", 1)?,
            quantizer_m,
        }
    } else {
        return Err(AnnError::unsupported(
            description,
            format!("unknown index component '{}'", parts[0]),
        ));
    };

    let payload_ok = match (kind, shape) {
        (SpaceKind::Binary, _) => payload.is_empty(),
        (SpaceKind::Float, Shape::Flat) => payload.is_empty(),
        (SpaceKind::Float, Shape::Graph { .. }) => payload.is_empty() || flat_payload,
        (SpaceKind::Float, Shape::InvertedFile { .. }) => flat_payload,
    };
    if !payload_ok {
        return Err(AnnError::unsupported(
            description,
            format!("unsupported payload '{}'", payload.join(",")),
        ));
    }

    Ok(Parsed {
        kind,
        shape,
        refine,
    })
}

/// Builds indexes with configured graph and clustering defaults
#[derive(Debug, Clone, Default)]
pub struct IndexFactory {
    graph: GraphDefaults,
    kmeans: KMeansConfig,
}

impl IndexFactory {
    pub fn new(graph: GraphDefaults, kmeans: KMeansConfig) -> Self {
        Self { graph, kmeans }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(config.graph, config.kmeans)
    }

    /// Build an empty index for `description` in `space`.
    ///
    /// The dimension is checked first, then the description.
    pub fn build<S: Space>(
        &self,
        space: S,
        dimension: usize,
        description: &str,
    ) -> AnnResult<AnyIndex<S>> {
        S::Elem::unit_len(dimension)?;
        let parsed = parse(description)?;
        if parsed.kind != space.kind() {
            return Err(AnnError::unsupported(
                description,
                format!(
                    "{} description cannot build a {} index",
                    parsed.kind,
                    space.kind()
                ),
            ));
        }

        let index = match parsed.shape {
            Shape::Flat => AnyIndex::Flat(FlatIndex::new(space, dimension)?),
            Shape::Graph { m } => AnyIndex::Graph(self.graph(space, dimension, m)?),
            Shape::InvertedFile { nlist, quantizer_m } => {
                let quantizer = match quantizer_m {
                    None => AnyIndex::Flat(FlatIndex::new(space, dimension)?),
                    Some(m) => AnyIndex::Graph(self.graph(space, dimension, m)?),
                };
                AnyIndex::InvertedFile(IvfIndex::new(quantizer, nlist, self.kmeans)?)
            }
        };
        let index = if parsed.refine {
            AnyIndex::Composite(RefineIndex::new(index)?)
        } else {
            index
        };

        tracing::debug!(
            description,
            dimension,
            topology = %index.topology(),
            trained = index.is_trained(),
            "Constructed index"
        );
        Ok(index)
    }

    fn graph<S: Space>(&self, space: S, dimension: usize, m: usize) -> AnnResult<HnswIndex<S>> {
        HnswIndex::new(
            space,
            dimension,
            m,
            self.graph.ef_construction,
            self.graph.ef_search,
        )
    }

    pub fn float(&self, dimension: usize, description: &str, metric: Metric) -> AnnResult<FloatIndex> {
        self.build(FloatSpace::new(metric), dimension, description)
    }

    pub fn binary(&self, dimension: usize, description: &str) -> AnnResult<BinaryIndex> {
        self.build(BinarySpace, dimension, description)
    }
}

/// Build a float index with default settings
pub fn index_factory(dimension: usize, description: &str, metric: Metric) -> AnnResult<FloatIndex> {
    IndexFactory::default().float(dimension, description, metric)
}

/// Build a binary index with default settings
pub fn index_binary_factory(dimension: usize, description: &str) -> AnnResult<BinaryIndex> {
    IndexFactory::default().binary(dimension, description)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{IndexSettings, Topology};

    #[test]
    fn test_float_grammar() {
        let flat = index_factory(16, "Flat", Metric::L2).unwrap();
        assert_eq!(flat.topology(), Topology::Flat);
        assert!(flat.is_trained());

        let graph = index_factory(16, "HNSW32,Flat", Metric::InnerProduct).unwrap();
        assert_eq!(
            graph.settings(),
            IndexSettings::Graph {
                m: 32,
                ef_construction: 40,
                ef_search: 16
            }
        );
        assert!(index_factory(16, "HNSW32", Metric::L2).is_ok());

        let ivf = index_factory(16, "IVF8,Flat", Metric::L2).unwrap();
        assert_eq!(ivf.topology(), Topology::InvertedFile);
        assert!(!ivf.is_trained());

        let nested = index_factory(16, "IVF8_HNSW16,Flat", Metric::L2).unwrap();
        assert_eq!(
            nested.settings(),
            IndexSettings::InvertedFile {
                nlist: 8,
                nprobe: 1,
                quantizer: Box::new(IndexSettings::Graph {
                    m: 16,
                    ef_construction: 40,
                    ef_search: 16
                }),
            }
        );
    }

    #[test]
    fn test_binary_grammar() {
        assert_eq!(
            index_binary_factory(64, "BFlat").unwrap().topology(),
            Topology::Flat
        );
        assert_eq!(
            index_binary_factory(64, "BHNSW8").unwrap().topology(),
            Topology::Graph
        );
        assert!(!index_binary_factory(64, "BIVF4").unwrap().is_trained());
        assert!(!index_binary_factory(64, "BIVF4_HNSW8").unwrap().is_trained());
    }

    #[test]
    fn test_refine_suffix() {
        let index = index_factory(8, "HNSW16,Flat,RFlat", Metric::L2).unwrap();
        assert_eq!(index.topology(), Topology::Composite);

        let index = index_binary_factory(8, "BIVF2,RFlat").unwrap();
        assert_eq!(index.topology(), Topology::Composite);
        assert!(!index.is_trained());
    }

    #[test]
    fn test_unsupported_descriptions() {
        for description in [
            "",
            "PQ16",
            "IVF0,Flat",
            "IVF4",
            "IVF4,PQ8",
            "IVF4_PQ8,Flat",
            "HNSW1",
            "HNSWx",
            "Flat,Flat",
            "BFlat",
        ] {
            let err = index_factory(16, description, Metric::L2).unwrap_err();
            assert!(
                matches!(err, AnnError::UnsupportedTopology { .. }),
                "{} gave {:?}",
                description,
                err
            );
        }

        for description in ["Flat", "BIVF4,Flat", "HNSW8"] {
            let err = index_binary_factory(16, description).unwrap_err();
            assert!(matches!(err, AnnError::UnsupportedTopology { .. }));
        }
    }

    #[test]
    fn test_dimension_checked_before_description() {
        assert!(matches!(
            index_binary_factory(7, "BFlat"),
            Err(AnnError::InvalidDimension(_))
        ));
        assert!(matches!(
            index_factory(0, "PQ16", Metric::L2),
            Err(AnnError::InvalidDimension(_))
        ));
    }

    #[test]
    fn test_configured_graph_defaults() {
        let factory = IndexFactory::new(
            GraphDefaults {
                ef_construction: 100,
                ef_search: 50,
            },
            KMeansConfig::default(),
        );
        let index = factory.float(4, "HNSW8", Metric::L2).unwrap();
        assert_eq!(
            index.settings(),
            IndexSettings::Graph {
                m: 8,
                ef_construction: 100,
                ef_search: 50
            }
        );
    }
}
