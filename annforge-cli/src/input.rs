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

//! JSON input files
//!
//! Vector files look like `{"ids": [1, 2], "vectors": [[0.1, 0.2], [0.3, 0.4]]}`.
//! Binary vectors are arrays of bytes. Vectors are streamed through a
//! [`VectorTransfer`] so the engine receives one owned allocation.

use annforge_core::{Element, TuningParams, VectorBuffer, VectorTransfer};
use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct VectorFile<T> {
    #[serde(default)]
    ids: Vec<i64>,
    vectors: Vec<Vec<T>>,
}

/// Vectors read from a file, ready to hand to the engine
#[derive(Debug)]
pub struct LoadedVectors<E: Element> {
    pub ids: Vec<i64>,
    pub buffer: VectorBuffer<'static, E>,
    /// Inferred from the first vector, in dimensions (bits for binary)
    pub dimension: Option<usize>,
}

pub fn load_vectors<E>(path: &Path, memory_limit_bytes: usize) -> Result<LoadedVectors<E>>
where
    E: Element + DeserializeOwned,
{
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read vectors from {:?}", path))?;
    let file: VectorFile<E> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse vectors in {:?}", path))?;

    let mut transfer = VectorTransfer::new(memory_limit_bytes);
    transfer.init(file.vectors.len());
    for (i, vector) in file.vectors.iter().enumerate() {
        transfer
            .add_vector(vector)
            .with_context(|| format!("Vector {} in {:?}", i, path))?;
    }
    tracing::debug!(
        vectors = transfer.len(),
        transfers = transfer.transfers(),
        "Staged input vectors"
    );

    let (buffer, dimension) = transfer.into_buffer();
    Ok(LoadedVectors {
        ids: file.ids,
        buffer,
        dimension,
    })
}

/// Inline JSON object, or `@path` to a JSON file
pub fn parse_params(arg: Option<&str>) -> Result<TuningParams> {
    let text = match arg {
        None => return Ok(TuningParams::new()),
        Some(arg) => match arg.strip_prefix('@') {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read parameters from {}", path))?,
            None => arg.to_string(),
        },
    };
    Ok(TuningParams::from_json_str(&text)?)
}

/// A single vector given as a JSON array
pub fn parse_vector<T: DeserializeOwned>(text: &str) -> Result<Vec<T>> {
    let vector: Vec<T> = serde_json::from_str(text).context("Query must be a JSON array")?;
    if vector.is_empty() {
        bail!("Query vector is empty");
    }
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use annforge_core::Ownership;

    #[test]
    fn test_load_float_vectors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        std::fs::write(
            &path,
            r#"{"ids": [7, 8, 9], "vectors": [[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]}"#,
        )
        .unwrap();

        let loaded = load_vectors::<f32>(&path, 8).unwrap();
        assert_eq!(loaded.ids, vec![7, 8, 9]);
        assert_eq!(loaded.dimension, Some(2));
        assert_eq!(loaded.buffer.ownership(), Ownership::Transferred);
        assert_eq!(loaded.buffer.as_slice(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_load_binary_vectors_without_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bits.json");
        std::fs::write(&path, r#"{"vectors": [[255, 0], [15, 240]]}"#).unwrap();

        let loaded = load_vectors::<u8>(&path, 1024).unwrap();
        assert!(loaded.ids.is_empty());
        assert_eq!(loaded.dimension, Some(16));
    }

    #[test]
    fn test_ragged_vectors_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.json");
        std::fs::write(&path, r#"{"vectors": [[1.0, 2.0], [3.0]]}"#).unwrap();
        assert!(load_vectors::<f32>(&path, 1024).is_err());
    }

    #[test]
    fn test_parse_params() {
        assert!(parse_params(None).unwrap().is_empty());
        let params = parse_params(Some(r#"{"nprobe": 4}"#)).unwrap();
        assert_eq!(params.get_usize("nprobe").unwrap(), Some(4));
        assert!(parse_params(Some("[1, 2]")).is_err());
    }

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector::<f32>("[0.5, 1.5]").unwrap(), vec![0.5, 1.5]);
        assert!(parse_vector::<u8>("[]").is_err());
        assert!(parse_vector::<u8>("[256]").is_err());
    }
}
