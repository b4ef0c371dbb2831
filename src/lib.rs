//! pbm-core - topology classification and restore-stream decoding for MongoDB backups
//!
//! Two independent pieces live here:
//! 1. Topology: classify a node from its `isMaster` reply and decide whether it
//!    may coordinate a cluster-wide backup or restore
//! 2. Compression: turn a compression tag from backup metadata into a reader
//!    that yields the original bytes of a stored file

pub mod compression;
pub mod config;
pub mod error;
pub mod oplog;
pub mod restore;
pub mod topology;

pub use compression::{decompress, CompressionType, Decompressor};
pub use error::{CompressionError, ConfigError, PbmError, PbmResult, RestoreError};
pub use restore::{decode_file, decode_unit, decode_units, RestoreUnit, UnitOutcome, UnitStats};
pub use topology::{IsMaster, OpTime, ReplRole, ReplsetStatus, Timestamp};

/// Classification of one node, as handed to leader election
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct NodeClassification {
    pub standalone: bool,
    pub sharded: bool,
    pub role: ReplRole,
    pub leader: bool,
}

impl From<&IsMaster> for NodeClassification {
    fn from(im: &IsMaster) -> Self {
        Self {
            standalone: im.is_standalone(),
            sharded: im.is_sharded(),
            role: im.replset_role(),
            leader: im.is_leader(),
        }
    }
}
