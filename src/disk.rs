use crate::extent::ExtentStoreOpener;
use crate::master::MasterClient;
use crate::partition::DataPartition;
use crate::raft::RaftStore;
use crate::repair::RepairSource;
use crate::status::PartitionStatus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

/// Process-wide collaborators threaded explicitly through the disk so
/// partitions never reach for hidden singletons.
#[derive(Clone)]
pub struct NodeGlobals {
    pub node_id: u64,
    pub cluster_id: String,
    /// Locally advertised IP, compared against the control plane's host
    /// ordering to decide positional leadership.
    pub local_ip: String,
    pub master: Arc<dyn MasterClient>,
    pub raft_store: Arc<dyn RaftStore>,
    pub repair_source: Arc<dyn RepairSource>,
    pub extent_opener: Arc<dyn ExtentStoreOpener>,
}

/// One physical disk hosting partitions. The surrounding disk manager owns
/// partition lifetimes; the attach table here only tracks live partitions.
pub struct Disk {
    path: PathBuf,
    status: AtomicU8,
    globals: NodeGlobals,
    partitions: Mutex<HashMap<u64, Weak<DataPartition>>>,
}

impl Disk {
    pub fn new(path: impl Into<PathBuf>, globals: NodeGlobals) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            status: AtomicU8::new(PartitionStatus::ReadWrite.as_raw()),
            globals,
            partitions: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn status(&self) -> PartitionStatus {
        PartitionStatus::from_raw(self.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: PartitionStatus) {
        self.status.store(status.as_raw(), Ordering::Relaxed);
    }

    pub fn globals(&self) -> &NodeGlobals {
        &self.globals
    }

    pub fn attach(&self, partition: &Arc<DataPartition>) {
        self.partitions
            .lock()
            .insert(partition.id(), Arc::downgrade(partition));
    }

    pub fn detach(&self, partition_id: u64) {
        self.partitions.lock().remove(&partition_id);
    }

    pub fn partition(&self, partition_id: u64) -> Option<Arc<DataPartition>> {
        self.partitions.lock().get(&partition_id)?.upgrade()
    }

    pub fn partition_ids(&self) -> Vec<u64> {
        let mut guard = self.partitions.lock();
        guard.retain(|_, partition| partition.strong_count() > 0);
        guard.keys().copied().collect()
    }
}
