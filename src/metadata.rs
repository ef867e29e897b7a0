use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const METADATA_FILE_NAME: &str = "META";
pub const TEMP_METADATA_FILE_NAME: &str = ".meta";

/// `chrono` layout of the descriptor's `CreateTime` stamp.
pub const TIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// One replica in the partition's consensus group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Peer {
    pub id: u64,
    pub addr: String,
}

/// Persistent partition descriptor, serialized as JSON into `META`.
///
/// Field names are pinned to the on-disk format shared by every replica;
/// peers are stored sorted ascending by id so the file content is
/// deterministic across replicas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionMetadata {
    #[serde(rename = "VolumeID")]
    pub volume_id: String,
    #[serde(rename = "PartitionID")]
    pub partition_id: u64,
    #[serde(rename = "PartitionSize")]
    pub partition_size: u64,
    #[serde(rename = "CreateTime")]
    pub create_time: String,
    #[serde(rename = "Peers", default)]
    pub peers: Vec<Peer>,
}

impl PartitionMetadata {
    /// Trims the volume id and rejects descriptors with missing identity.
    pub fn validate(&mut self) -> Result<(), MetadataError> {
        self.volume_id = self.volume_id.trim().to_string();
        if self.volume_id.is_empty() || self.partition_id == 0 || self.partition_size == 0 {
            return Err(MetadataError::Illegal);
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MetadataError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MetadataError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Loads and atomically persists the descriptor under a partition directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE_NAME)
    }

    /// Reads `META`, parses and validates the descriptor.
    pub fn load(&self) -> Result<PartitionMetadata, MetadataError> {
        let bytes = fs::read(self.metadata_path())?;
        let mut metadata = PartitionMetadata::from_bytes(&bytes)?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Writes the descriptor to `.meta`, flushes, then renames over `META`.
    ///
    /// Peers are sorted ascending by id before serialization. The rename
    /// normally consumes the temp file; the trailing removal covers
    /// filesystems where it does not.
    pub fn persist(&self, metadata: &PartitionMetadata) -> Result<(), MetadataError> {
        let mut record = metadata.clone();
        record.peers.sort_by_key(|peer| peer.id);
        let payload = record.to_bytes()?;

        let tmp = self.dir.join(TEMP_METADATA_FILE_NAME);
        let result = (|| -> Result<(), MetadataError> {
            let mut file = File::create(&tmp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, self.metadata_path())?;
            Ok(())
        })();
        let _ = fs::remove_file(&tmp);
        result
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("metadata parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("illegal partition metadata")]
    Illegal,
}
