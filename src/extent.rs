use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// First id of the reserved tiny-extent band.
pub const TINY_EXTENT_START_ID: u64 = 1;

/// Number of pre-allocated tiny extents per partition.
pub const TINY_EXTENT_COUNT: u64 = 64;

/// Tells whether an extent id falls in the reserved low-id band.
pub fn is_tiny_extent(extent_id: u64) -> bool {
    (TINY_EXTENT_START_ID..TINY_EXTENT_START_ID + TINY_EXTENT_COUNT).contains(&extent_id)
}

/// Pattern matched by extent file names within a partition directory.
pub fn extent_file_name_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d)+$").expect("extent file name pattern"))
}

/// Parses a directory entry name into an extent id, if it names an extent.
pub fn parse_extent_file_name(name: &str) -> Option<u64> {
    if !extent_file_name_regex().is_match(name) {
        return None;
    }
    name.parse().ok()
}

/// The two repair categories, alternated by the maintenance scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtentKind {
    Tiny,
    Normal,
}

impl fmt::Display for ExtentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtentKind::Tiny => write!(f, "tiny"),
            ExtentKind::Normal => write!(f, "normal"),
        }
    }
}

/// One entry of the published extent listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtentDescriptor {
    pub extent_id: u64,
    pub size: u64,
    pub crc: u32,
    pub modified: i64,
    pub source: String,
    pub deleted: bool,
}

/// Byte-level extent container backing one partition. The on-disk layout,
/// I/O paths and tiny-extent free-space management live behind this seam.
pub trait ExtentStore: Send + Sync {
    fn create(&self, extent_id: u64, inode: u64) -> Result<(), ExtentError>;
    fn has_extent(&self, extent_id: u64) -> bool;
    fn extent_count(&self) -> u64;
    fn broken_tiny_extent_count(&self) -> u64;
    /// Queues up to `limit` tiny extents onto the broken-tiny channel so
    /// supervision always has work.
    fn move_all_to_broken_tiny_extent_channel(&self, limit: u64);
    /// Current committed size of an extent.
    fn watermark(&self, extent_id: u64) -> Result<u64, ExtentError>;
    /// Repair write path: appends `data` at `offset`.
    fn append(&self, extent_id: u64, offset: u64, data: &[u8]) -> Result<(), ExtentError>;
    fn snapshot(&self) -> Result<Vec<ExtentDescriptor>, ExtentError>;
    fn flush_delete(&self) -> Result<(), ExtentError>;
    fn close(&self);
}

/// Opens the extent store rooted at a partition directory.
pub trait ExtentStoreOpener: Send + Sync {
    fn open(
        &self,
        path: &Path,
        partition_id: u64,
        partition_size: u64,
    ) -> Result<Arc<dyn ExtentStore>, ExtentError>;
}

#[derive(Debug, Error)]
pub enum ExtentError {
    #[error("extent I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("extent {extent_id} not found")]
    NotFound { extent_id: u64 },
    #[error("extent {extent_id} already exists")]
    AlreadyExists { extent_id: u64 },
    #[error("extent store closed")]
    Closed,
}
