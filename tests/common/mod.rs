//! Shared fakes for the checkpoint suites: an in-memory extent store, a
//! scripted control plane, a recording consensus engine and a scripted
//! repair planner.
#![allow(dead_code)]

use datapart::{
    ConfChangeType, DataPartitionView, Disk, ExtentDescriptor, ExtentError, ExtentKind,
    ExtentStore, ExtentStoreOpener, MasterClient, MasterError, NodeGlobals, PartitionConfig, Peer,
    RaftError, RaftPartition, RaftPartitionConfig, RaftStore, RepairError, RepairSource,
    RepairTask, TINY_EXTENT_COUNT, TINY_EXTENT_START_ID,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct MemExtentStore {
    extents: Mutex<BTreeMap<u64, Vec<u8>>>,
    broken_tiny: Mutex<VecDeque<u64>>,
    create_failures: Mutex<HashSet<u64>>,
    created_order: Mutex<Vec<u64>>,
    snapshot_fails: AtomicBool,
    closed: AtomicBool,
}

impl MemExtentStore {
    pub fn new() -> Self {
        Self {
            extents: Mutex::new(BTreeMap::new()),
            broken_tiny: Mutex::new(VecDeque::new()),
            create_failures: Mutex::new(HashSet::new()),
            created_order: Mutex::new(Vec::new()),
            snapshot_fails: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_fail_snapshot(&self, fail: bool) {
        self.snapshot_fails.store(fail, Ordering::SeqCst);
    }

    pub fn insert_extent(&self, extent_id: u64, data: Vec<u8>) {
        self.extents.lock().insert(extent_id, data);
    }

    pub fn contents(&self, extent_id: u64) -> Option<Vec<u8>> {
        self.extents.lock().get(&extent_id).cloned()
    }

    pub fn fail_create(&self, extent_id: u64) {
        self.create_failures.lock().insert(extent_id);
    }

    pub fn created_order(&self) -> Vec<u64> {
        self.created_order.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ExtentStore for MemExtentStore {
    fn create(&self, extent_id: u64, _inode: u64) -> Result<(), ExtentError> {
        if self.create_failures.lock().contains(&extent_id) {
            return Err(ExtentError::Io(io::Error::other("injected create failure")));
        }
        let mut extents = self.extents.lock();
        if extents.contains_key(&extent_id) {
            return Err(ExtentError::AlreadyExists { extent_id });
        }
        extents.insert(extent_id, Vec::new());
        self.created_order.lock().push(extent_id);
        Ok(())
    }

    fn has_extent(&self, extent_id: u64) -> bool {
        self.extents.lock().contains_key(&extent_id)
    }

    fn extent_count(&self) -> u64 {
        self.extents.lock().len() as u64
    }

    fn broken_tiny_extent_count(&self) -> u64 {
        self.broken_tiny.lock().len() as u64
    }

    fn move_all_to_broken_tiny_extent_channel(&self, limit: u64) {
        let mut queue = self.broken_tiny.lock();
        for extent_id in TINY_EXTENT_START_ID..TINY_EXTENT_START_ID + TINY_EXTENT_COUNT {
            if queue.len() as u64 >= limit {
                break;
            }
            if !queue.contains(&extent_id) {
                queue.push_back(extent_id);
            }
        }
    }

    fn watermark(&self, extent_id: u64) -> Result<u64, ExtentError> {
        self.extents
            .lock()
            .get(&extent_id)
            .map(|data| data.len() as u64)
            .ok_or(ExtentError::NotFound { extent_id })
    }

    fn append(&self, extent_id: u64, offset: u64, data: &[u8]) -> Result<(), ExtentError> {
        let mut extents = self.extents.lock();
        let extent = extents
            .get_mut(&extent_id)
            .ok_or(ExtentError::NotFound { extent_id })?;
        if extent.len() as u64 != offset {
            return Err(ExtentError::Io(io::Error::other("append past watermark")));
        }
        extent.extend_from_slice(data);
        Ok(())
    }

    fn snapshot(&self) -> Result<Vec<ExtentDescriptor>, ExtentError> {
        if self.snapshot_fails.load(Ordering::SeqCst) {
            return Err(ExtentError::Io(io::Error::other(
                "injected snapshot failure",
            )));
        }
        Ok(self
            .extents
            .lock()
            .iter()
            .map(|(extent_id, data)| ExtentDescriptor {
                extent_id: *extent_id,
                size: data.len() as u64,
                crc: 0,
                modified: 0,
                source: String::new(),
                deleted: false,
            })
            .collect())
    }

    fn flush_delete(&self) -> Result<(), ExtentError> {
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct MemExtentOpener {
    pub store: Arc<MemExtentStore>,
}

impl ExtentStoreOpener for MemExtentOpener {
    fn open(
        &self,
        _path: &Path,
        _partition_id: u64,
        _partition_size: u64,
    ) -> Result<Arc<dyn ExtentStore>, ExtentError> {
        Ok(self.store.clone())
    }
}

pub struct ScriptedMaster {
    hosts: Mutex<Vec<String>>,
    fail: AtomicBool,
    calls: AtomicU64,
}

impl ScriptedMaster {
    pub fn new(hosts: &[&str]) -> Self {
        Self {
            hosts: Mutex::new(hosts.iter().map(|host| host.to_string()).collect()),
            fail: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_hosts(&self, hosts: &[&str]) {
        *self.hosts.lock() = hosts.iter().map(|host| host.to_string()).collect();
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl MasterClient for ScriptedMaster {
    fn get_data_partition(&self, partition_id: u64) -> Result<DataPartitionView, MasterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(MasterError::Timeout);
        }
        let hosts = self.hosts.lock().clone();
        Ok(DataPartitionView {
            partition_id,
            replica_num: hosts.len() as u8,
            hosts,
        })
    }
}

pub struct RecordingRaftPartition {
    pub leader_id: AtomicU64,
    pub term: AtomicU64,
    pub truncated: Mutex<Vec<u64>>,
    pub member_changes: Mutex<Vec<(ConfChangeType, Peer)>>,
    pub stopped: AtomicBool,
}

impl RecordingRaftPartition {
    fn new() -> Self {
        Self {
            leader_id: AtomicU64::new(0),
            term: AtomicU64::new(1),
            truncated: Mutex::new(Vec::new()),
            member_changes: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn set_leader(&self, leader_id: u64) {
        self.leader_id.store(leader_id, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl RaftPartition for RecordingRaftPartition {
    fn leader_term(&self) -> (u64, u64) {
        (
            self.leader_id.load(Ordering::SeqCst),
            self.term.load(Ordering::SeqCst),
        )
    }

    fn change_member(
        &self,
        change: ConfChangeType,
        peer: Peer,
        _context: Vec<u8>,
    ) -> Result<Vec<u8>, RaftError> {
        self.member_changes.lock().push((change, peer));
        Ok(Vec::new())
    }

    fn truncate(&self, index: u64) {
        self.truncated.lock().push(index);
    }

    fn stop(&self) -> Result<(), RaftError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct RecordingRaftStore {
    pub created: Mutex<Vec<Arc<RecordingRaftPartition>>>,
    fail: AtomicBool,
}

impl RecordingRaftStore {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn last_partition(&self) -> Option<Arc<RecordingRaftPartition>> {
        self.created.lock().last().cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }
}

impl RaftStore for RecordingRaftStore {
    fn create_partition(
        &self,
        _config: RaftPartitionConfig,
    ) -> Result<Arc<dyn RaftPartition>, RaftError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RaftError::Engine("injected start failure".into()));
        }
        let partition = Arc::new(RecordingRaftPartition::new());
        self.created.lock().push(partition.clone());
        Ok(partition)
    }
}

pub struct ScriptedRepairSource {
    task: Mutex<Option<RepairTask>>,
    source_data: Mutex<HashMap<u64, Vec<u8>>>,
    build_calls: Mutex<Vec<(u64, ExtentKind, Vec<String>)>>,
    read_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedRepairSource {
    pub fn new() -> Self {
        Self {
            task: Mutex::new(None),
            source_data: Mutex::new(HashMap::new()),
            build_calls: Mutex::new(Vec::new()),
            read_delay: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn set_task(&self, task: RepairTask) {
        *self.task.lock() = Some(task);
    }

    pub fn set_source_data(&self, extent_id: u64, data: Vec<u8>) {
        self.source_data.lock().insert(extent_id, data);
    }

    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock() = delay;
    }

    pub fn build_calls(&self) -> Vec<(u64, ExtentKind, Vec<String>)> {
        self.build_calls.lock().clone()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl RepairSource for ScriptedRepairSource {
    fn build_repair_task(
        &self,
        partition_id: u64,
        kind: ExtentKind,
        replicas: &[String],
    ) -> Result<Option<RepairTask>, RepairError> {
        self.build_calls
            .lock()
            .push((partition_id, kind, replicas.to_vec()));
        Ok(self.task.lock().take())
    }

    fn read_extent_range(
        &self,
        source: &str,
        _partition_id: u64,
        extent_id: u64,
        offset: u64,
        max_bytes: u64,
    ) -> Result<Vec<u8>, RepairError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let delay = *self.read_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        let result = {
            let data = self.source_data.lock();
            match data.get(&extent_id) {
                Some(bytes) => {
                    let start = (offset as usize).min(bytes.len());
                    let end = (offset + max_bytes).min(bytes.len() as u64) as usize;
                    Ok(bytes[start..end].to_vec())
                }
                None => Err(RepairError::Protocol(format!(
                    "source {source} has no extent {extent_id}"
                ))),
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub disk: Arc<Disk>,
    pub store: Arc<MemExtentStore>,
    pub master: Arc<ScriptedMaster>,
    pub raft: Arc<RecordingRaftStore>,
    pub source: Arc<ScriptedRepairSource>,
}

pub fn test_env(local_ip: &str, hosts: &[&str]) -> TestEnv {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = Arc::new(MemExtentStore::new());
    let master = Arc::new(ScriptedMaster::new(hosts));
    let raft = Arc::new(RecordingRaftStore::new());
    let source = Arc::new(ScriptedRepairSource::new());
    let globals = NodeGlobals {
        node_id: 1,
        cluster_id: "cluster-test".into(),
        local_ip: local_ip.into(),
        master: master.clone(),
        raft_store: raft.clone(),
        repair_source: source.clone(),
        extent_opener: Arc::new(MemExtentOpener {
            store: store.clone(),
        }),
    };
    let disk = Disk::new(dir.path(), globals);
    TestEnv {
        dir,
        disk,
        store,
        master,
        raft,
        source,
    }
}

pub fn partition_config(partition_id: u64, partition_size: u64) -> PartitionConfig {
    PartitionConfig {
        volume_id: "v1".into(),
        partition_id,
        partition_size,
        peers: vec![
            Peer {
                id: 3,
                addr: "h3:9000".into(),
            },
            Peer {
                id: 1,
                addr: "h1:9000".into(),
            },
            Peer {
                id: 2,
                addr: "h2:9000".into(),
            },
        ],
        node_id: 1,
        cluster_id: "cluster-test".into(),
    }
}
