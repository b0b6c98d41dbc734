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

//! Runtime tuning parameters
//!
//! A string-keyed bag of knobs that the topology description cannot express.
//! Values are loosely typed on the way in (hosts usually hand over JSON) and
//! converted to strongly typed settings by the accessors below.

use crate::error::{AnnError, AnnResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of inverted lists visited per query
pub const NPROBE: &str = "nprobe";

/// Nested parameter map applied to the coarse quantizer of an inverted-file index
pub const COARSE_QUANTIZER: &str = "coarse_quantizer";

/// Candidate list width while building a graph
pub const EF_CONSTRUCTION: &str = "ef_construction";

/// Candidate list width while searching a graph
pub const EF_SEARCH: &str = "ef_search";

/// Over-fetch factor of a refining composite
pub const K_FACTOR: &str = "k_factor";

/// A single tuning value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(TuningParams),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "\"{}\"", v),
            ParamValue::Map(m) => write!(f, "{{{} keys}}", m.len()),
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

impl From<TuningParams> for ParamValue {
    fn from(v: TuningParams) -> Self {
        ParamValue::Map(v)
    }
}

/// Tuning parameter bag, possibly nested
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TuningParams {
    entries: BTreeMap<String, ParamValue>,
}

impl TuningParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read a strictly positive integer.
    ///
    /// Absent keys yield `Ok(None)`; present keys of any other shape are an error.
    pub fn get_usize(&self, key: &str) -> AnnResult<Option<usize>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ParamValue::Int(v)) if *v > 0 => usize::try_from(*v)
                .map(Some)
                .map_err(|_| AnnError::invalid_parameter(key, format!("{} is out of range", v))),
            Some(other) => Err(AnnError::invalid_parameter(
                key,
                format!("expected a positive integer, got {}", other),
            )),
        }
    }

    /// Read a float that is at least `min`. Integers are widened.
    pub fn get_f32_at_least(&self, key: &str, min: f32) -> AnnResult<Option<f32>> {
        let value = match self.entries.get(key) {
            None => return Ok(None),
            Some(ParamValue::Int(v)) => *v as f32,
            Some(ParamValue::Float(v)) => *v as f32,
            Some(other) => {
                return Err(AnnError::invalid_parameter(
                    key,
                    format!("expected a number, got {}", other),
                ))
            }
        };
        if !value.is_finite() || value < min {
            return Err(AnnError::invalid_parameter(
                key,
                format!("{} must be a finite number >= {}", value, min),
            ));
        }
        Ok(Some(value))
    }

    /// Read a nested parameter map
    pub fn get_map(&self, key: &str) -> AnnResult<Option<&TuningParams>> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(ParamValue::Map(map)) => Ok(Some(map)),
            Some(other) => Err(AnnError::invalid_parameter(
                key,
                format!("expected a nested parameter map, got {}", other),
            )),
        }
    }

    /// Parse from a JSON object
    pub fn from_json(value: serde_json::Value) -> AnnResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| AnnError::invalid_parameter("parameters", e.to_string()))
    }

    /// Parse from JSON text
    pub fn from_json_str(text: &str) -> AnnResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| AnnError::invalid_parameter("parameters", e.to_string()))
    }
}
