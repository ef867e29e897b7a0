//! Data partition subsystem of a distributed file system storage node.
//!
//! A storage node hosts many independent data partitions; each partition is
//! a replicated, crash-recoverable container for opaque variable-length
//! extents belonging to one logical volume. This crate implements the
//! partition lifecycle, the periodic maintenance loop, the extent repair
//! protocol and the consensus integration; the extent store, the consensus
//! engine, the control-plane transport and the repair planner sit behind
//! trait seams.
#![deny(unreachable_pub)]
#![deny(unused_must_use)]

pub mod config;
pub mod disk;
pub mod error;
pub mod extent;
pub mod master;
pub mod metadata;
pub mod metrics;
pub mod partition;
pub mod raft;
pub mod repair;
pub mod status;

pub use config::{
    PartitionConfig, DATA_PARTITION_PREFIX, DISK_SECTOR_SIZE, INTERVAL_TO_UPDATE_PARTITION_SIZE,
    INTERVAL_TO_UPDATE_REPLICA, MAX_ACTIVE_EXTENTS, MIN_TINY_EXTENTS_TO_REPAIR,
    NUM_FILES_TO_RECOVER_IN_PARALLEL,
};
pub use disk::{Disk, NodeGlobals};
pub use error::PartitionError;
pub use extent::{
    extent_file_name_regex, is_tiny_extent, parse_extent_file_name, ExtentDescriptor, ExtentError,
    ExtentKind, ExtentStore, ExtentStoreOpener, TINY_EXTENT_COUNT, TINY_EXTENT_START_ID,
};
pub use master::{
    DataPartitionView, HttpMasterClient, MasterClient, MasterError, ADMIN_GET_DATA_PARTITION,
};
pub use metadata::{
    MetadataError, MetadataStore, PartitionMetadata, Peer, METADATA_FILE_NAME,
    TEMP_METADATA_FILE_NAME, TIME_LAYOUT,
};
pub use metrics::PartitionMetrics;
pub use partition::{compare_replicas, DataPartition, PartitionSummary};
pub use raft::{
    ApplyIndexStore, ConfChangeType, RaftError, RaftPartition, RaftPartitionConfig, RaftStore,
    APPLY_INDEX_FILE_NAME, TEMP_APPLY_INDEX_FILE_NAME,
};
pub use repair::{RepairError, RepairExtent, RepairSource, RepairTask};
pub use status::PartitionStatus;
