use crate::config::{
    PartitionConfig, APPLY_CHANNEL_CAP, DATA_PARTITION_PREFIX, DISK_SECTOR_SIZE,
    INTERVAL_TO_UPDATE_PARTITION_SIZE, INTERVAL_TO_UPDATE_REPLICA, MAX_ACTIVE_EXTENTS,
    METRIC_TICK, MIN_TINY_EXTENTS_TO_REPAIR, RAFT_AFTER_REPAIR_POLL, RAFT_LOG_TRUNCATE_INTERVAL,
    SCHEDULE_TICK,
};
use crate::disk::Disk;
use crate::error::PartitionError;
use crate::extent::{self, ExtentDescriptor, ExtentKind, ExtentStore};
use crate::master::MasterError;
use crate::metadata::{MetadataStore, PartitionMetadata, Peer, TIME_LAYOUT};
use crate::metrics::PartitionMetrics;
use crate::raft::{
    peer_addr, ApplyIndexStore, ConfChangeType, RaftError, RaftPartition, RaftPartitionConfig,
};
use crate::status::PartitionStatus;
use chrono::Local;
use crossbeam_channel::{bounded, select, tick, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

/// A replicated, crash-recoverable container for extents belonging to one
/// logical volume. The partition is the unit of replication, repair,
/// capacity accounting and consensus.
///
/// All mutable runtime state is written by the partition's own maintenance
/// scheduler; external readers go through the lock-free accessors and
/// accept momentarily stale values.
pub struct DataPartition {
    pub(crate) config: PartitionConfig,
    path: PathBuf,
    disk: Arc<Disk>,
    pub(crate) extent_store: Arc<dyn ExtentStore>,
    raft_partition: RwLock<Option<Arc<dyn RaftPartition>>>,
    metadata_store: MetadataStore,
    apply_index_store: ApplyIndexStore,
    create_time: String,

    status: AtomicU8,
    used: AtomicU64,
    replicas: RwLock<Vec<String>>,
    is_leader: AtomicBool,

    apply_id: AtomicU64,
    last_truncate_id: AtomicU64,
    min_applied_id: AtomicU64,
    max_applied_id: AtomicU64,

    should_repair_all_tiny_extents: AtomicBool,
    snapshot: RwLock<Arc<Vec<ExtentDescriptor>>>,
    last_replica_refresh: AtomicI64,
    last_usage_recompute: AtomicI64,
    pub(crate) metrics: PartitionMetrics,

    stopped: AtomicBool,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    apply_tx: Sender<u64>,
    apply_rx: Receiver<u64>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for DataPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataPartition")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Partition summary reported to the control plane on load requests.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub partition_id: u64,
    pub status: PartitionStatus,
    pub used: u64,
    pub snapshot: Vec<ExtentDescriptor>,
}

impl DataPartition {
    /// Creates a brand-new partition on `disk`: opens the extent store,
    /// spawns the maintenance scheduler and the deferred consensus tasks,
    /// then persists the descriptor.
    pub fn create(
        config: PartitionConfig,
        disk: &Arc<Disk>,
    ) -> Result<Arc<Self>, PartitionError> {
        let create_time = Local::now().format(TIME_LAYOUT).to_string();
        let partition = Self::build(config, disk, create_time)?;
        partition.start_raft_logging_schedule();
        partition.start_raft_after_repair();
        if let Err(err) = partition.persist_metadata() {
            partition.stop();
            disk.detach(partition.id());
            return Err(err);
        }
        info!(
            "partition({}) created on disk {}",
            partition.id(),
            disk.path().display()
        );
        Ok(partition)
    }

    /// Rehydrates a partition from its on-disk directory. A descriptor that
    /// fails to parse or validate surfaces as [`PartitionError::Metadata`]
    /// and the partition is not attached.
    pub fn load(partition_dir: &Path, disk: &Arc<Disk>) -> Result<Arc<Self>, PartitionError> {
        let PartitionMetadata {
            volume_id,
            partition_id,
            partition_size,
            create_time,
            peers,
        } = MetadataStore::new(partition_dir).load()?;
        let globals = disk.globals();
        let config = PartitionConfig {
            volume_id,
            partition_id,
            partition_size,
            peers,
            node_id: globals.node_id,
            cluster_id: globals.cluster_id.clone(),
        };
        let partition = Self::build(config, disk, create_time)?;
        if let Err(err) = partition.load_apply_index() {
            error!("partition({}) load apply index: {}", partition.id(), err);
        }
        if let Err(err) = partition.start_raft() {
            partition.stop();
            disk.detach(partition.id());
            return Err(err);
        }
        partition.start_raft_logging_schedule();
        Ok(partition)
    }

    fn build(
        config: PartitionConfig,
        disk: &Arc<Disk>,
        create_time: String,
    ) -> Result<Arc<Self>, PartitionError> {
        let path = disk.path().join(format!(
            "{}_{}_{}",
            DATA_PARTITION_PREFIX, config.partition_id, config.partition_size
        ));
        fs::create_dir_all(&path)?;
        let extent_store =
            disk.globals()
                .extent_opener
                .open(&path, config.partition_id, config.partition_size)?;
        let (stop_tx, stop_rx) = bounded(1);
        let (apply_tx, apply_rx) = bounded(APPLY_CHANNEL_CAP);
        let partition = Arc::new(Self {
            metadata_store: MetadataStore::new(&path),
            apply_index_store: ApplyIndexStore::new(&path),
            path,
            disk: Arc::clone(disk),
            extent_store,
            raft_partition: RwLock::new(None),
            create_time,
            status: AtomicU8::new(PartitionStatus::ReadWrite.as_raw()),
            used: AtomicU64::new(0),
            replicas: RwLock::new(Vec::new()),
            is_leader: AtomicBool::new(false),
            apply_id: AtomicU64::new(0),
            last_truncate_id: AtomicU64::new(0),
            min_applied_id: AtomicU64::new(0),
            max_applied_id: AtomicU64::new(0),
            should_repair_all_tiny_extents: AtomicBool::new(true),
            snapshot: RwLock::new(Arc::new(Vec::new())),
            last_replica_refresh: AtomicI64::new(0),
            last_usage_recompute: AtomicI64::new(0),
            metrics: PartitionMetrics::new(),
            stopped: AtomicBool::new(false),
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            apply_tx,
            apply_rx,
            scheduler: Mutex::new(None),
            background: Mutex::new(Vec::new()),
            config,
        });
        disk.attach(&partition);
        let scheduler = {
            let dp = Arc::clone(&partition);
            let stop_rx = partition.stop_rx.clone();
            thread::spawn(move || dp.run_scheduler(stop_rx))
        };
        *partition.scheduler.lock() = Some(scheduler);
        Ok(partition)
    }

    /// Stops the partition: closes the stop signal, joins the background
    /// tasks, closes the extent store, then stops the consensus partition.
    /// Safe to call more than once.
    pub fn stop(&self) {
        let Some(stop_tx) = self.stop_tx.lock().take() else {
            return;
        };
        self.stopped.store(true, Ordering::SeqCst);
        drop(stop_tx);
        if let Some(handle) = self.scheduler.lock().take() {
            let _ = handle.join();
        }
        for handle in self.background.lock().drain(..) {
            let _ = handle.join();
        }
        self.extent_store.close();
        self.stop_raft();
        info!("partition({}) stopped", self.id());
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    // ---- accessors ------------------------------------------------------

    pub fn id(&self) -> u64 {
        self.config.partition_id
    }

    pub fn volume_id(&self) -> &str {
        &self.config.volume_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn disk(&self) -> &Arc<Disk> {
        &self.disk
    }

    pub fn status(&self) -> PartitionStatus {
        PartitionStatus::from_raw(self.status.load(Ordering::Relaxed))
    }

    pub fn size(&self) -> u64 {
        self.config.partition_size
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> u64 {
        self.config.partition_size.saturating_sub(self.used())
    }

    pub fn replicas(&self) -> Vec<String> {
        self.replicas.read().clone()
    }

    /// Positional leadership: this node is element 0 of the control plane's
    /// host ordering. Distinct from consensus leadership.
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::Relaxed)
    }

    pub fn extent_count(&self) -> u64 {
        self.extent_store.extent_count()
    }

    pub fn extent_store(&self) -> &Arc<dyn ExtentStore> {
        &self.extent_store
    }

    pub fn metrics(&self) -> &PartitionMetrics {
        &self.metrics
    }

    pub fn should_repair_all_tiny_extents(&self) -> bool {
        self.should_repair_all_tiny_extents.load(Ordering::Relaxed)
    }

    pub(crate) fn clear_repair_all_tiny_extents(&self) {
        self.should_repair_all_tiny_extents
            .store(false, Ordering::Relaxed);
    }

    pub fn flush_delete(&self) -> Result<(), PartitionError> {
        Ok(self.extent_store.flush_delete()?)
    }

    pub fn summary(&self) -> PartitionSummary {
        PartitionSummary {
            partition_id: self.id(),
            status: self.status(),
            used: self.used(),
            snapshot: self.snapshot().as_ref().clone(),
        }
    }

    // ---- maintenance scheduler ------------------------------------------

    fn run_scheduler(&self, stop_rx: Receiver<()>) {
        let ticker = tick(SCHEDULE_TICK);
        let metric_ticker = tick(METRIC_TICK);
        let mut index: u32 = 0;
        loop {
            select! {
                recv(ticker) -> _ => {
                    index = index.wrapping_add(1);
                    self.recompute_usage();
                    self.recompute_status();
                    if index % 2 == 0 {
                        self.launch_repair(ExtentKind::Tiny);
                    } else {
                        self.launch_repair(ExtentKind::Normal);
                    }
                    self.reload_snapshot();
                }
                recv(metric_ticker) -> _ => self.metrics.recompute_latency(),
                recv(stop_rx) -> _ => return,
            }
        }
    }

    /// Rescans the partition directory and re-derives `used`. Rate limited
    /// to one scan per [`INTERVAL_TO_UPDATE_PARTITION_SIZE`] window; a
    /// failed scan leaves the previous value in place.
    pub fn recompute_usage(&self) {
        let now = unix_now();
        if now - self.last_usage_recompute.load(Ordering::Relaxed)
            < INTERVAL_TO_UPDATE_PARTITION_SIZE
        {
            return;
        }
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("partition({}) usage scan failed: {}", self.id(), err);
                return;
            }
        };
        let mut used = 0u64;
        for entry in entries.flatten() {
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(_) => continue,
            };
            if !metadata.is_file() {
                continue;
            }
            used += actual_size(&entry.file_name(), &metadata);
        }
        self.used.store(used, Ordering::Relaxed);
        self.last_usage_recompute.store(now, Ordering::Relaxed);
    }

    /// Re-derives the partition status from capacity, extent count and the
    /// hosting disk's health.
    pub fn recompute_status(&self) {
        let mut status = PartitionStatus::ReadWrite;
        if self.used() >= self.config.partition_size {
            status = PartitionStatus::ReadOnly;
        }
        if self.extent_store.extent_count() >= MAX_ACTIVE_EXTENTS {
            status = PartitionStatus::ReadOnly;
        }
        self.status
            .store(status.min(self.disk.status()).as_raw(), Ordering::Relaxed);
    }

    /// Publishes a fresh extent listing; a failed listing keeps the
    /// previous snapshot.
    pub fn reload_snapshot(&self) {
        match self.extent_store.snapshot() {
            Ok(files) => *self.snapshot.write() = Arc::new(files),
            Err(err) => debug!("partition({}) snapshot reload failed: {}", self.id(), err),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<ExtentDescriptor>> {
        Arc::clone(&self.snapshot.read())
    }

    // ---- replica refresh ------------------------------------------------

    /// Reconciles the local replica view from the control plane. A no-op
    /// within [`INTERVAL_TO_UPDATE_REPLICA`] of the previous successful
    /// refresh; failures leave the replica list untouched.
    pub fn update_replicas(&self) -> Result<(), MasterError> {
        let now = unix_now();
        if now - self.last_replica_refresh.load(Ordering::Relaxed) <= INTERVAL_TO_UPDATE_REPLICA {
            return Ok(());
        }
        self.is_leader.store(false, Ordering::Relaxed);
        let view = self
            .disk
            .globals()
            .master
            .get_data_partition(self.config.partition_id)?;
        let is_leader = view
            .hosts
            .first()
            .map(|addr| leader_host_matches(addr, &self.disk.globals().local_ip))
            .unwrap_or(false);
        {
            let mut replicas = self.replicas.write();
            if !compare_replicas(&replicas, &view.hosts) {
                info!(
                    "partition({}) replicas changed from {:?} to {:?}",
                    self.id(),
                    *replicas,
                    view.hosts
                );
            }
            *replicas = view.hosts;
        }
        self.is_leader.store(is_leader, Ordering::Relaxed);
        self.last_replica_refresh.store(now, Ordering::Relaxed);
        Ok(())
    }

    // ---- repair launch --------------------------------------------------

    /// Kicks one repair cycle for `kind`. Skipped outright when the
    /// partition is unavailable, the control plane is unreachable, or this
    /// node is not the positional leader.
    pub fn launch_repair(&self, kind: ExtentKind) {
        if self.status() == PartitionStatus::Unavailable {
            return;
        }
        if let Err(err) = self.update_replicas() {
            error!("partition({}) replica refresh failed: {}", self.id(), err);
            return;
        }
        if !self.is_leader() {
            return;
        }
        if self.extent_store.broken_tiny_extent_count() == 0 {
            self.extent_store
                .move_all_to_broken_tiny_extent_channel(MIN_TINY_EXTENTS_TO_REPAIR);
        }
        self.repair(kind);
    }

    // ---- metadata persistence -------------------------------------------

    /// Atomically rewrites the on-disk descriptor.
    pub fn persist_metadata(&self) -> Result<(), PartitionError> {
        let metadata = PartitionMetadata {
            volume_id: self.config.volume_id.clone(),
            partition_id: self.config.partition_id,
            partition_size: self.config.partition_size,
            create_time: self.create_time.clone(),
            peers: self.config.peers.clone(),
        };
        self.metadata_store.persist(&metadata)?;
        Ok(())
    }

    // ---- consensus ------------------------------------------------------

    /// Creates the partition's replicated log. Idempotent.
    pub fn start_raft(&self) -> Result<(), PartitionError> {
        let mut guard = self.raft_partition.write();
        if guard.is_some() {
            return Ok(());
        }
        let raft = self
            .disk
            .globals()
            .raft_store
            .create_partition(RaftPartitionConfig {
                partition_id: self.config.partition_id,
                node_id: self.config.node_id,
                peers: self.config.peers.clone(),
            })?;
        *guard = Some(raft);
        info!("partition({}) consensus log started", self.id());
        Ok(())
    }

    fn stop_raft(&self) {
        if let Some(raft) = self.raft_partition.write().take() {
            if let Err(err) = raft.stop() {
                warn!("partition({}) consensus stop failed: {}", self.id(), err);
            }
        }
    }

    /// Consensus leadership, independent of positional leadership.
    pub fn is_raft_leader(&self) -> bool {
        let guard = self.raft_partition.read();
        let Some(raft) = guard.as_ref() else {
            return false;
        };
        let (leader_id, _term) = raft.leader_term();
        leader_id != 0 && leader_id == self.config.node_id
    }

    /// Advertised address of the current consensus leader, if any.
    pub fn raft_leader_addr(&self) -> Option<String> {
        let guard = self.raft_partition.read();
        let raft = guard.as_ref()?;
        let (leader_id, _term) = raft.leader_term();
        if leader_id == 0 {
            return None;
        }
        peer_addr(&self.config.peers, leader_id).map(str::to_string)
    }

    /// Proxies a membership change into the replicated log.
    pub fn change_raft_member(
        &self,
        change: ConfChangeType,
        peer: Peer,
        context: Vec<u8>,
    ) -> Result<Vec<u8>, PartitionError> {
        let guard = self.raft_partition.read();
        let raft = guard.as_ref().ok_or(RaftError::NotStarted)?;
        Ok(raft.change_member(change, peer, context)?)
    }

    /// Apply callback target: records the applied index and queues it for
    /// persistence. A full queue drops the update; a later apply re-queues
    /// a higher index.
    pub fn advance_apply_id(&self, index: u64) {
        self.apply_id.store(index, Ordering::Relaxed);
        if self.max_applied_id.load(Ordering::Relaxed) < index {
            self.max_applied_id.store(index, Ordering::Relaxed);
        }
        if self.apply_tx.try_send(index).is_err() {
            debug!(
                "partition({}) apply index {} not queued for persistence",
                self.id(),
                index
            );
        }
    }

    pub fn apply_id(&self) -> u64 {
        self.apply_id.load(Ordering::Relaxed)
    }

    pub fn last_truncate_id(&self) -> u64 {
        self.last_truncate_id.load(Ordering::Relaxed)
    }

    pub fn min_applied_id(&self) -> u64 {
        self.min_applied_id.load(Ordering::Relaxed)
    }

    pub fn max_applied_id(&self) -> u64 {
        self.max_applied_id.load(Ordering::Relaxed)
    }

    /// Lowest apply index across the replica set, fed by the node protocol.
    pub fn set_min_applied_id(&self, index: u64) {
        self.min_applied_id.store(index, Ordering::Relaxed);
    }

    pub fn set_max_applied_id(&self, index: u64) {
        self.max_applied_id.store(index, Ordering::Relaxed);
    }

    fn load_apply_index(&self) -> Result<(), PartitionError> {
        let index = self.apply_index_store.load()?;
        self.apply_id.store(index, Ordering::Relaxed);
        Ok(())
    }

    fn persist_apply_index(&self, index: u64) {
        if let Err(err) = self.apply_index_store.persist(index) {
            error!(
                "partition({}) persist apply index {}: {}",
                self.id(),
                index,
                err
            );
        }
    }

    /// Truncates the replicated log once every replica has applied past the
    /// previous truncation checkpoint.
    fn truncate_raft_log(&self) {
        let raft = self.raft_partition.read().clone();
        let Some(raft) = raft else {
            return;
        };
        let min_applied = self.min_applied_id.load(Ordering::Relaxed);
        if min_applied == 0 || min_applied <= self.last_truncate_id.load(Ordering::Relaxed) {
            return;
        }
        raft.truncate(min_applied);
        self.last_truncate_id.store(min_applied, Ordering::Relaxed);
        info!(
            "partition({}) truncated replicated log at {}",
            self.id(),
            min_applied
        );
    }

    /// Long-running consensus bookkeeping: drains queued apply indexes to
    /// `APPLY` and drives periodic log truncation.
    fn start_raft_logging_schedule(self: &Arc<Self>) {
        let dp = Arc::clone(self);
        let stop_rx = self.stop_rx.clone();
        let handle = thread::spawn(move || {
            let truncate_ticker = tick(RAFT_LOG_TRUNCATE_INTERVAL);
            let apply_rx = dp.apply_rx.clone();
            loop {
                select! {
                    recv(apply_rx) -> msg => match msg {
                        Ok(index) => dp.persist_apply_index(index),
                        Err(_) => return,
                    },
                    recv(truncate_ticker) -> _ => dp.truncate_raft_log(),
                    recv(stop_rx) -> _ => return,
                }
            }
        });
        self.background.lock().push(handle);
    }

    /// Create-path-only task: holds consensus back until the first
    /// tiny-extent repair cycle has succeeded, then starts it.
    fn start_raft_after_repair(self: &Arc<Self>) {
        let dp = Arc::clone(self);
        let stop_rx = self.stop_rx.clone();
        let handle = thread::spawn(move || loop {
            match stop_rx.recv_timeout(RAFT_AFTER_REPAIR_POLL) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {
                    if dp.should_repair_all_tiny_extents() {
                        continue;
                    }
                    match dp.start_raft() {
                        Ok(()) => {
                            info!(
                                "partition({}) consensus started after initial repair",
                                dp.id()
                            );
                            return;
                        }
                        Err(err) => warn!(
                            "partition({}) deferred consensus start failed: {}",
                            dp.id(),
                            err
                        ),
                    }
                }
            }
        });
        self.background.lock().push(handle);
    }
}

impl fmt::Display for DataPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            DATA_PARTITION_PREFIX, self.config.partition_id, self.config.partition_size
        )
    }
}

/// Order-sensitive replica comparison; leadership is positional, so a
/// reordering counts as a change.
pub fn compare_replicas(a: &[String], b: &[String]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y)
}

fn leader_host_matches(addr: &str, local_ip: &str) -> bool {
    let mut parts = addr.splitn(2, ':');
    match (parts.next(), parts.next()) {
        (Some(host), Some(_port)) => host.trim() == local_ip,
        _ => false,
    }
}

/// Accounted size of one directory entry: logical length, except sparse
/// tiny extents which bill their physically allocated blocks.
fn actual_size(name: &OsStr, metadata: &fs::Metadata) -> u64 {
    let Some(name) = name.to_str() else {
        return metadata.len();
    };
    let Some(extent_id) = extent::parse_extent_file_name(name) else {
        return metadata.len();
    };
    if !extent::is_tiny_extent(extent_id) {
        return metadata.len();
    }
    allocated_size(metadata)
}

#[cfg(unix)]
fn allocated_size(metadata: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.blocks() * DISK_SECTOR_SIZE
}

#[cfg(not(unix))]
fn allocated_size(metadata: &fs::Metadata) -> u64 {
    metadata.len()
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
