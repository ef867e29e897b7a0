use crate::metadata::Peer;
use std::time::Duration;

/// Directory name prefix for every partition hosted on a disk.
pub const DATA_PARTITION_PREFIX: &str = "datapartition";

/// Window between on-disk usage recomputations, in seconds.
pub const INTERVAL_TO_UPDATE_PARTITION_SIZE: i64 = 60;

/// Window between replica-set refreshes from the control plane, in seconds.
pub const INTERVAL_TO_UPDATE_REPLICA: i64 = 600;

/// Physical sector size used to bill sparse tiny extents.
pub const DISK_SECTOR_SIZE: u64 = 512;

/// Extent count at which a partition stops accepting writes.
pub const MAX_ACTIVE_EXTENTS: u64 = 20_000;

/// Tiny extents queued for supervision when the broken queue runs dry.
pub const MIN_TINY_EXTENTS_TO_REPAIR: u64 = 10;

/// In-flight stream workers allowed within one repair cycle.
pub const NUM_FILES_TO_RECOVER_IN_PARALLEL: usize = 10;

/// Main maintenance tick.
pub const SCHEDULE_TICK: Duration = Duration::from_secs(10);

/// Latency metrics tick.
pub const METRIC_TICK: Duration = Duration::from_secs(5);

/// Replicated-log truncation cadence.
pub const RAFT_LOG_TRUNCATE_INTERVAL: Duration = Duration::from_secs(600);

/// Poll cadence of the deferred start-raft-after-repair task.
pub const RAFT_AFTER_REPAIR_POLL: Duration = Duration::from_secs(5);

/// Capacity of the apply-index persistence channel.
pub const APPLY_CHANNEL_CAP: usize = 128;

/// Immutable identity of one partition, rehydrated from the on-disk
/// descriptor on load and supplied by the control plane on create.
#[derive(Debug, Clone)]
pub struct PartitionConfig {
    pub volume_id: String,
    pub partition_id: u64,
    pub partition_size: u64,
    pub peers: Vec<Peer>,
    pub node_id: u64,
    pub cluster_id: String,
}
