use crate::extent::ExtentError;
use crate::master::MasterError;
use crate::metadata::MetadataError;
use crate::raft::RaftError;
use crate::repair::RepairError;
use thiserror::Error;

/// Crate-level error ladder. Metadata errors are fatal at load; extent and
/// consensus errors are fatal at startup and transient afterwards; master
/// and repair errors are swallowed by the maintenance loop.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("partition I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Master(#[from] MasterError),
    #[error(transparent)]
    Extent(#[from] ExtentError),
    #[error(transparent)]
    Raft(#[from] RaftError),
    #[error(transparent)]
    Repair(#[from] RepairError),
}
