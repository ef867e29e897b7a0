use crate::metadata::Peer;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub const APPLY_INDEX_FILE_NAME: &str = "APPLY";
pub const TEMP_APPLY_INDEX_FILE_NAME: &str = ".apply";

/// Membership change kinds proxied to the consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfChangeType {
    AddNode,
    RemoveNode,
    UpdateNode,
}

/// Everything the consensus engine needs to host one partition's log.
#[derive(Debug, Clone)]
pub struct RaftPartitionConfig {
    pub partition_id: u64,
    pub node_id: u64,
    pub peers: Vec<Peer>,
}

/// Handle onto one partition's replicated log.
pub trait RaftPartition: Send + Sync {
    /// Current `(leader_id, term)`; a zero leader id means no leader known.
    fn leader_term(&self) -> (u64, u64);
    fn change_member(
        &self,
        change: ConfChangeType,
        peer: Peer,
        context: Vec<u8>,
    ) -> Result<Vec<u8>, RaftError>;
    /// Discards log entries at or below `index`.
    fn truncate(&self, index: u64);
    fn stop(&self) -> Result<(), RaftError>;
}

/// Node-wide consensus engine capable of hosting partition logs.
pub trait RaftStore: Send + Sync {
    fn create_partition(
        &self,
        config: RaftPartitionConfig,
    ) -> Result<Arc<dyn RaftPartition>, RaftError>;
}

/// `APPLY` / `.apply` persistence of the highest durably applied log index,
/// written with the same temp-and-rename discipline as the descriptor.
#[derive(Debug, Clone)]
pub struct ApplyIndexStore {
    dir: PathBuf,
}

impl ApplyIndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn apply_index_path(&self) -> PathBuf {
        self.dir.join(APPLY_INDEX_FILE_NAME)
    }

    /// Reads the persisted apply index; a missing file reads as zero.
    pub fn load(&self) -> Result<u64, RaftError> {
        let text = match fs::read_to_string(self.apply_index_path()) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(RaftError::Io(err)),
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(0);
        }
        trimmed
            .parse()
            .map_err(|_| RaftError::CorruptApplyIndex { text })
    }

    pub fn persist(&self, index: u64) -> Result<(), RaftError> {
        let tmp = self.dir.join(TEMP_APPLY_INDEX_FILE_NAME);
        let result = (|| -> Result<(), RaftError> {
            let mut file = File::create(&tmp)?;
            file.write_all(index.to_string().as_bytes())?;
            file.sync_all()?;
            drop(file);
            fs::rename(&tmp, self.apply_index_path())?;
            Ok(())
        })();
        let _ = fs::remove_file(&tmp);
        result
    }
}

/// Resolves a peer's advertised address by id, used to map the consensus
/// leader id to an address.
pub fn peer_addr(peers: &[Peer], id: u64) -> Option<&str> {
    peers
        .iter()
        .find(|peer| peer.id == id)
        .map(|peer| peer.addr.as_str())
}

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("consensus I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("consensus partition not started")]
    NotStarted,
    #[error("corrupt apply index record: {text:?}")]
    CorruptApplyIndex { text: String },
    #[error("consensus engine error: {0}")]
    Engine(String),
}
