use crate::config::NUM_FILES_TO_RECOVER_IN_PARALLEL;
use crate::extent::{is_tiny_extent, ExtentError, ExtentKind};
use crate::partition::DataPartition;
use log::{debug, warn};
use std::io;
use std::thread;
use thiserror::Error;

/// Bytes requested from the source replica per stream read.
pub const REPAIR_READ_CHUNK: u64 = 64 * 1024;

/// One extent to reconcile: either absent locally or smaller than the
/// leader's record. `source` names the replica to stream from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairExtent {
    pub extent_id: u64,
    pub inode: u64,
    pub size: u64,
    pub source: String,
}

/// Per-cycle repair plan produced by the node protocol's extent diff.
#[derive(Debug, Clone, Default)]
pub struct RepairTask {
    pub extents_to_be_created: Vec<RepairExtent>,
    pub extents_to_be_repaired: Vec<RepairExtent>,
}

/// Seam towards the node protocol: plans repair cycles by diffing the
/// leader's extent set against followers, and streams extent bytes from a
/// source replica.
pub trait RepairSource: Send + Sync {
    /// `Ok(None)` means the replica set is already converged for `kind`.
    fn build_repair_task(
        &self,
        partition_id: u64,
        kind: ExtentKind,
        replicas: &[String],
    ) -> Result<Option<RepairTask>, RepairError>;

    fn read_extent_range(
        &self,
        source: &str,
        partition_id: u64,
        extent_id: u64,
        offset: u64,
        max_bytes: u64,
    ) -> Result<Vec<u8>, RepairError>;
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("repair I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Extent(#[from] ExtentError),
    #[error("repair source {source_addr} returned no data for extent {extent_id}")]
    ShortRead { source_addr: String, extent_id: u64 },
    #[error("repair protocol error: {0}")]
    Protocol(String),
}

impl DataPartition {
    /// One repair cycle: plan, reconcile, and on tiny-extent success clear
    /// the first-startup repair-everything flag. Planning failures skip the
    /// cycle; the next tick retries.
    pub(crate) fn repair(&self, kind: ExtentKind) {
        let replicas = self.replicas();
        let task = match self.disk().globals().repair_source.build_repair_task(
            self.id(),
            kind,
            &replicas,
        ) {
            Ok(Some(task)) => task,
            Ok(None) => {
                if kind == ExtentKind::Tiny {
                    self.clear_repair_all_tiny_extents();
                }
                return;
            }
            Err(err) => {
                warn!(
                    "partition({}) {} repair planning failed: {}",
                    self.id(),
                    kind,
                    err
                );
                return;
            }
        };
        self.do_extent_store_repair(task);
        if kind == ExtentKind::Tiny {
            self.clear_repair_all_tiny_extents();
        }
    }

    /// Executes a repair task against the local extent store.
    ///
    /// Missing extents are created first (tiny extents are pre-allocated
    /// and never created here; redundant entries fold into the repair
    /// list), then stream workers grow each under-sized extent from its
    /// source replica. Workers are joined after every
    /// [`NUM_FILES_TO_RECOVER_IN_PARALLEL`] dispatches and once more at the
    /// end, so no worker outlives the call. Individual failures are
    /// counted and swallowed; later cycles reconverge.
    pub fn do_extent_store_repair(&self, task: RepairTask) {
        let RepairTask {
            extents_to_be_created,
            mut extents_to_be_repaired,
        } = task;
        for info in extents_to_be_created {
            if is_tiny_extent(info.extent_id) {
                continue;
            }
            if self.extent_store.has_extent(info.extent_id) {
                extents_to_be_repaired.push(info);
                continue;
            }
            if let Err(err) = self.extent_store.create(info.extent_id, info.inode) {
                self.metrics.note_repair_failure();
                debug!(
                    "partition({}) create extent {} for repair failed: {}",
                    self.id(),
                    info.extent_id,
                    err
                );
                continue;
            }
            extents_to_be_repaired.push(info);
        }

        thread::scope(|scope| {
            let mut in_flight = Vec::new();
            for info in &extents_to_be_repaired {
                if self.is_stopped() {
                    break;
                }
                if !self.extent_store.has_extent(info.extent_id) {
                    continue;
                }
                in_flight.push(scope.spawn(move || {
                    if let Err(err) = self.stream_extent_repair(info) {
                        self.metrics.note_repair_failure();
                        warn!(
                            "partition({}) extent {} repair from {} failed: {}",
                            self.id(),
                            info.extent_id,
                            info.source,
                            err
                        );
                    }
                }));
                if in_flight.len() >= NUM_FILES_TO_RECOVER_IN_PARALLEL {
                    for handle in in_flight.drain(..) {
                        let _ = handle.join();
                    }
                }
            }
            for handle in in_flight {
                let _ = handle.join();
            }
        });
    }

    /// Streams bytes from the source replica until the local extent reaches
    /// the task's recorded size.
    fn stream_extent_repair(&self, info: &RepairExtent) -> Result<(), RepairError> {
        let source = &self.disk().globals().repair_source;
        let mut local = self.extent_store.watermark(info.extent_id)?;
        while local < info.size {
            let want = (info.size - local).min(REPAIR_READ_CHUNK);
            let data =
                source.read_extent_range(&info.source, self.id(), info.extent_id, local, want)?;
            if data.is_empty() {
                return Err(RepairError::ShortRead {
                    source_addr: info.source.clone(),
                    extent_id: info.extent_id,
                });
            }
            self.extent_store.append(info.extent_id, local, &data)?;
            local += data.len() as u64;
        }
        Ok(())
    }
}
