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

//! Index artifacts on disk
//!
//! Layout (little endian):
//!
//! ```text
//! magic "ANNFIDX1" (8) | version u32 | payload_len u64 | payload | blake3(payload) (32)
//! ```
//!
//! The payload is the bincode encoding of an [`IndexArtifact`], which carries
//! the topology, training state, vectors and ids. Files are written to a
//! sibling `.tmp` path and renamed into place.

use crate::id_map::IdMappedIndex;
use crate::space::{BinarySpace, FloatSpace, Space};
use crate::topology::{AnyIndex, IndexSettings};
use annforge_core::{AnnError, AnnResult, SpaceKind, SpaceType};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

pub const INDEX_MAGIC: &[u8; 8] = b"ANNFIDX1";
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8 + 4 + 8;
const CHECKSUM_LEN: usize = 32;

/// An index as stored: bare (templates) or with external ids
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "S: Space", deserialize = "S: Space"))]
pub enum StoredIndex<S: Space> {
    Bare(AnyIndex<S>),
    IdMapped(IdMappedIndex<S>),
}

impl<S: Space> StoredIndex<S> {
    pub fn index(&self) -> &AnyIndex<S> {
        match self {
            StoredIndex::Bare(index) => index,
            StoredIndex::IdMapped(mapped) => mapped.index(),
        }
    }

    pub fn ids(&self) -> Option<&[i64]> {
        match self {
            StoredIndex::Bare(_) => None,
            StoredIndex::IdMapped(mapped) => Some(mapped.ids()),
        }
    }
    pub fn validate(&self) -> AnnResult<()> {
        match self {
            StoredIndex::Bare(index) => index.validate(),
            StoredIndex::IdMapped(mapped) => mapped.validate(),
        }
    }
}

/// Self-describing persisted index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexArtifact {
    Float(StoredIndex<FloatSpace>),
    Binary(StoredIndex<BinarySpace>),
}

impl IndexArtifact {
    pub fn space_kind(&self) -> SpaceKind {
        match self {
            IndexArtifact::Float(_) => SpaceKind::Float,
            IndexArtifact::Binary(_) => SpaceKind::Binary,
        }
    }

    pub fn space_type(&self) -> SpaceType {
        match self {
            IndexArtifact::Float(stored) => stored.index().space().space_type(),
            IndexArtifact::Binary(stored) => stored.index().space().space_type(),
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            IndexArtifact::Float(stored) => stored.index().dimension(),
            IndexArtifact::Binary(stored) => stored.index().dimension(),
        }
    }

    pub fn ntotal(&self) -> usize {
        match self {
            IndexArtifact::Float(stored) => stored.index().ntotal(),
            IndexArtifact::Binary(stored) => stored.index().ntotal(),
        }
    }

    pub fn is_trained(&self) -> bool {
        match self {
            IndexArtifact::Float(stored) => stored.index().is_trained(),
            IndexArtifact::Binary(stored) => stored.index().is_trained(),
        }
    }

    /// External ids, `None` for a bare index
    pub fn ids(&self) -> Option<&[i64]> {
        match self {
            IndexArtifact::Float(stored) => stored.ids(),
            IndexArtifact::Binary(stored) => stored.ids(),
        }
    }

    pub fn settings(&self) -> IndexSettings {
        match self {
            IndexArtifact::Float(stored) => stored.index().settings(),
            IndexArtifact::Binary(stored) => stored.index().settings(),
        }
    }
    /// Reject artifacts whose decoded shape would break search invariants
    pub fn validate(&self) -> AnnResult<()> {
        match self {
            IndexArtifact::Float(stored) => stored.validate(),
            IndexArtifact::Binary(stored) => stored.validate(),
        }
    }
}

/// Encode an artifact with header and checksum
pub fn to_bytes(artifact: &IndexArtifact) -> AnnResult<Vec<u8>> {
    let payload = bincode::serialize(artifact)
        .map_err(|e| AnnError::FormatMismatch(format!("failed to encode index: {}", e)))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);
    bytes.extend_from_slice(INDEX_MAGIC);
    // Writes into a Vec cannot fail
    let _ = bytes.write_u32::<LittleEndian>(FORMAT_VERSION);
    let _ = bytes.write_u64::<LittleEndian>(payload.len() as u64);
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(blake3::hash(&payload).as_bytes());
    Ok(bytes)
}

/// Decode and verify an artifact
pub fn from_bytes(bytes: &[u8]) -> AnnResult<IndexArtifact> {
    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(AnnError::FormatMismatch(format!(
            "artifact is {} bytes, shorter than its header",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes);
    let mut magic = [0u8; 8];
    cursor
        .read_exact(&mut magic)
        .map_err(|e| AnnError::FormatMismatch(e.to_string()))?;
    if &magic != INDEX_MAGIC {
        return Err(AnnError::FormatMismatch("bad magic".to_string()));
    }

    let version = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| AnnError::FormatMismatch(e.to_string()))?;
    if version != FORMAT_VERSION {
        return Err(AnnError::FormatMismatch(format!(
            "unsupported format version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let payload_len = cursor
        .read_u64::<LittleEndian>()
        .map_err(|e| AnnError::FormatMismatch(e.to_string()))? as usize;
    if bytes.len() - HEADER_LEN - CHECKSUM_LEN != payload_len {
        return Err(AnnError::FormatMismatch(format!(
            "payload length {} does not match artifact size {}",
            payload_len,
            bytes.len()
        )));
    }

    let payload = &bytes[HEADER_LEN..HEADER_LEN + payload_len];
    let checksum = &bytes[HEADER_LEN + payload_len..];
    if blake3::hash(payload).as_bytes() != checksum {
        tracing::warn!(payload_len, "Checksum mismatch in index artifact");
        return Err(AnnError::FormatMismatch("checksum mismatch".to_string()));
    }

    let artifact: IndexArtifact = bincode::deserialize(payload)
        .map_err(|e| AnnError::FormatMismatch(format!("failed to decode index: {}", e)))?;
    artifact.validate()?;
    Ok(artifact)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write an artifact to `path`, replacing any existing file
pub fn write_index(artifact: &IndexArtifact, path: &Path, sync: bool) -> AnnResult<()> {
    let bytes = to_bytes(artifact)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| AnnError::persistence(parent, e))?;
    }

    let tmp = temp_path(path);
    if let Err(e) = write_and_rename(&bytes, &tmp, path, sync) {
        if tmp.exists() {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                tracing::warn!(path = %tmp.display(), error = %cleanup, "Failed to remove partial artifact");
            }
        }
        return Err(e);
    }

    tracing::info!(
        path = %path.display(),
        bytes = bytes.len(),
        ntotal = artifact.ntotal(),
        "Wrote index artifact"
    );
    Ok(())
}

fn write_and_rename(bytes: &[u8], tmp: &Path, path: &Path, sync: bool) -> AnnResult<()> {
    let file = File::create(tmp).map_err(|e| AnnError::persistence(tmp, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .map_err(|e| AnnError::persistence(tmp, e))?;
    writer.flush().map_err(|e| AnnError::persistence(tmp, e))?;
    if sync {
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| AnnError::persistence(tmp, e))?;
    }
    drop(writer);
    fs::rename(tmp, path).map_err(|e| AnnError::persistence(path, e))
}

/// Read an artifact written by [`write_index`]
pub fn read_index(path: &Path) -> AnnResult<IndexArtifact> {
    if !path.exists() {
        return Err(AnnError::NotFound(path.to_path_buf()));
    }
    let bytes = fs::read(path).map_err(|e| AnnError::persistence(path, e))?;
    let artifact = from_bytes(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        ntotal = artifact.ntotal(),
        space = %artifact.space_kind(),
        "Read index artifact"
    );
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{index_binary_factory, index_factory};
    use annforge_core::Metric;
    use tempfile::TempDir;

    fn sample_artifact() -> IndexArtifact {
        let mut mapped =
            IdMappedIndex::wrap(index_factory(2, "HNSW8", Metric::L2).unwrap()).unwrap();
        mapped
            .add_with_ids(&[0.0, 0.0, 1.0, 1.0, 2.0, 2.0], &[11, 22, 33])
            .unwrap();
        IndexArtifact::Float(StoredIndex::IdMapped(mapped))
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("index.ann");
        write_index(&sample_artifact(), &path, true).unwrap();

        let loaded = read_index(&path).unwrap();
        assert_eq!(loaded.ids(), Some(&[11i64, 22, 33][..]));
        assert_eq!(loaded.dimension(), 2);
        assert_eq!(loaded.space_type(), SpaceType::L2);
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        // a non-empty directory cannot be replaced by a file
        let path = dir.path().join("occupied");
        fs::create_dir_all(path.join("child")).unwrap();

        let err = write_index(&sample_artifact(), &path, false).unwrap_err();
        assert!(matches!(err, AnnError::Persistence { .. }));
        assert!(!temp_path(&path).exists());
        assert!(path.join("child").is_dir());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = read_index(&dir.path().join("absent.ann")).unwrap_err();
        assert!(matches!(err, AnnError::NotFound(_)));
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = to_bytes(&sample_artifact()).unwrap();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0xff;
        assert!(matches!(from_bytes(&bytes), Err(AnnError::FormatMismatch(_))));

        let mut bytes = to_bytes(&sample_artifact()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(from_bytes(&bytes), Err(AnnError::FormatMismatch(_))));

        let bytes = to_bytes(&sample_artifact()).unwrap();
        assert!(matches!(
            from_bytes(&bytes[..bytes.len() - 1]),
            Err(AnnError::FormatMismatch(_))
        ));
        assert!(from_bytes(b"short").is_err());
    }

    #[test]
    fn test_untrained_template_keeps_state() {
        let artifact = IndexArtifact::Binary(StoredIndex::Bare(
            index_binary_factory(16, "BIVF4").unwrap(),
        ));
        let loaded = from_bytes(&to_bytes(&artifact).unwrap()).unwrap();
        assert_eq!(loaded.space_kind(), SpaceKind::Binary);
        assert!(!loaded.is_trained());
        assert_eq!(loaded.ids(), None);
    }
}
