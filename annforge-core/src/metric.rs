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

//! Distance metrics, vector spaces and host-facing score translation.

use crate::error::{AnnError, AnnResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric for continuous (f32) vector spaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance, lower is closer
    #[default]
    L2,
    /// Inner product similarity, higher is closer
    InnerProduct,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::L2 => "l2",
            Metric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element family of a vector space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceKind {
    /// 32-bit float lanes
    Float,
    /// Packed bits, 8 dimensions per byte
    Binary,
}

impl SpaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceKind::Float => "float",
            SpaceKind::Binary => "binary",
        }
    }
}

impl fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Space type as requested by the host.
///
/// Couples a distance family with the translation from raw distance to the
/// relevance score handed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceType {
    #[default]
    L2,
    InnerProduct,
    Hamming,
}

impl SpaceType {
    /// Float metric backing this space type; `None` for Hamming
    pub fn metric(&self) -> Option<Metric> {
        match self {
            SpaceType::L2 => Some(Metric::L2),
            SpaceType::InnerProduct => Some(Metric::InnerProduct),
            SpaceType::Hamming => None,
        }
    }

    pub fn space_kind(&self) -> SpaceKind {
        match self {
            SpaceType::Hamming => SpaceKind::Binary,
            SpaceType::L2 | SpaceType::InnerProduct => SpaceKind::Float,
        }
    }

    /// Translate a raw distance reported by an index into a score where
    /// higher is always better.
    pub fn score(&self, distance: f32) -> f32 {
        match self {
            SpaceType::L2 | SpaceType::Hamming => 1.0 / (1.0 + distance),
            SpaceType::InnerProduct => {
                if distance >= 0.0 {
                    1.0 + distance
                } else {
                    1.0 / (1.0 - distance)
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceType::L2 => "l2",
            SpaceType::InnerProduct => "innerproduct",
            SpaceType::Hamming => "hamming",
        }
    }
}

impl From<Metric> for SpaceType {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::L2 => SpaceType::L2,
            Metric::InnerProduct => SpaceType::InnerProduct,
        }
    }
}

impl FromStr for SpaceType {
    type Err = AnnError;

    fn from_str(s: &str) -> AnnResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(SpaceType::L2),
            "innerproduct" | "inner_product" | "ip" => Ok(SpaceType::InnerProduct),
            "hamming" => Ok(SpaceType::Hamming),
            other => Err(AnnError::invalid_parameter(
                "space_type",
                format!("unknown space type '{}'", other),
            )),
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_translation() {
        assert_eq!(SpaceType::L2.score(0.0), 1.0);
        assert_eq!(SpaceType::L2.score(1.0), 0.5);
        assert_eq!(SpaceType::Hamming.score(3.0), 0.25);
        assert_eq!(SpaceType::InnerProduct.score(2.0), 3.0);
        assert_eq!(SpaceType::InnerProduct.score(-1.0), 0.5);
    }

    #[test]
    fn test_parse_space_type() {
        assert_eq!("L2".parse::<SpaceType>().unwrap(), SpaceType::L2);
        assert_eq!(
            "innerproduct".parse::<SpaceType>().unwrap(),
            SpaceType::InnerProduct
        );
        assert_eq!("hamming".parse::<SpaceType>().unwrap(), SpaceType::Hamming);
        assert!("cosine".parse::<SpaceType>().is_err());
    }

    #[test]
    fn test_hamming_has_no_float_metric() {
        assert_eq!(SpaceType::Hamming.metric(), None);
        assert_eq!(SpaceType::Hamming.space_kind(), SpaceKind::Binary);
        assert_eq!(SpaceType::InnerProduct.metric(), Some(Metric::InnerProduct));
    }
}
