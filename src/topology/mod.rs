//! Replica-set topology documents and backup-leader classification
//!
//! A node's `isMaster` reply tells us whether it belongs to a replica set and,
//! if so, whether that set is part of a sharded cluster. Only config-server
//! members (or members of a plain replica set) may coordinate a cluster-wide
//! backup; ordinary shard members defer to them.

pub mod ejson;
pub mod shard;
pub mod status;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

pub use ejson::{Binary, Timestamp};
pub use shard::{AuthInfo, AuthUser, AuthUserRoles, ConnectionStatus, Shard};
pub use status::{NodeHealth, NodeState, NodeStatus, ReplsetStatus, StatusOpTimes};

/// `configsvr` value a config-server replica set member reports
pub const CONFIG_SERVER_FLAG: i32 = 2;

/// Position in the replication log: timestamp plus election term
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpTime {
    pub ts: Timestamp,
    #[serde(with = "ejson::int64")]
    pub t: i64,
}

impl OpTime {
    pub fn new(ts: Timestamp, t: i64) -> Self {
        Self { ts, t }
    }
}

impl Ord for OpTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.t.cmp(&other.t).then_with(|| self.ts.cmp(&other.ts))
    }
}

impl PartialOrd for OpTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.ts, self.t)
    }
}

/// Last write applied on the node and the last one acknowledged by a majority
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsMasterLastWrite {
    #[serde(default)]
    pub op_time: OpTime,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub last_write_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub majority_op_time: OpTime,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub majority_write_date: Option<DateTime<Utc>>,
}

/// Signed cluster time gossiped with every reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    pub cluster_time: Timestamp,
    #[serde(default)]
    pub signature: ClusterTimeSignature,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTimeSignature {
    #[serde(default)]
    pub hash: Binary,
    #[serde(default, with = "ejson::int64")]
    pub key_id: i64,
}

/// Present only on shard members: the config server optime the shard last saw
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigServerState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_time: Option<OpTime>,
}

/// Role of a replica set inside a sharded cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplRole {
    #[serde(rename = "configsrv")]
    ConfigServer,
    #[serde(rename = "shard")]
    ShardMember,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl ReplRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplRole::ConfigServer => "configsrv",
            ReplRole::ShardMember => "shard",
            ReplRole::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ReplRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reply to `db.runCommand({ isMaster: 1 })`
///
/// Every field is optional or defaulted: a mongos reply, a standalone reply
/// and a replica set member reply all deserialize into this one shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsMaster {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub msg: String,
    #[serde(default, with = "ejson::int64")]
    pub max_bson_object_size: i64,
    #[serde(default, with = "ejson::int64")]
    pub max_message_size_bytes: i64,
    #[serde(default, with = "ejson::int64")]
    pub max_write_batch_size: i64,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub local_time: Option<DateTime<Utc>>,
    #[serde(default, with = "ejson::int64")]
    pub logical_session_timeout_minutes: i64,
    #[serde(default, with = "ejson::int64")]
    pub max_wire_version: i64,
    #[serde(default, with = "ejson::int64")]
    pub min_wire_version: i64,
    #[serde(default, with = "ejson::double")]
    pub ok: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub set_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(default, with = "ejson::opt_int32", skip_serializing_if = "Option::is_none")]
    pub set_version: Option<i32>,
    #[serde(default, rename = "ismaster")]
    pub is_master: bool,
    #[serde(default)]
    pub secondary: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, rename = "configsvr", with = "ejson::opt_int32", skip_serializing_if = "Option::is_none")]
    pub config_svr: Option<i32>,
    #[serde(default)]
    pub me: String,
    #[serde(default)]
    pub last_write: IsMasterLastWrite,
    #[serde(default, rename = "$clusterTime", skip_serializing_if = "Option::is_none")]
    pub cluster_time: Option<ClusterTime>,
    #[serde(default, rename = "$configServerState", skip_serializing_if = "Option::is_none")]
    pub config_server_state: Option<ConfigServerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_time: Option<Timestamp>,
}

impl IsMaster {
    /// Parse a reply from its extended JSON rendering
    pub fn from_json(doc: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(doc)
    }

    /// True if the node is not part of a replica set
    pub fn is_standalone(&self) -> bool {
        self.set_name.is_empty()
    }

    /// True if the node's replica set is part of a sharded cluster
    pub fn is_sharded(&self) -> bool {
        !self.is_standalone() && (self.config_server_state.is_some() || self.is_config_server())
    }

    /// Role of the node's replica set in a sharded cluster. A config server
    /// that also carries shard state is still a config server; a standalone
    /// node has no role at all.
    pub fn replset_role(&self) -> ReplRole {
        if self.is_standalone() {
            ReplRole::Unknown
        } else if self.is_config_server() {
            ReplRole::ConfigServer
        } else if self.config_server_state.is_some() {
            ReplRole::ShardMember
        } else {
            ReplRole::Unknown
        }
    }

    /// True if the node may coordinate a backup: it belongs to a non-sharded
    /// deployment or to the config server replica set
    pub fn is_leader(&self) -> bool {
        let leader = !self.is_sharded() || self.replset_role() == ReplRole::ConfigServer;
        tracing::debug!(
            set_name = %self.set_name,
            role = %self.replset_role(),
            sharded = self.is_sharded(),
            leader,
            "classified node"
        );
        leader
    }

    /// True if this node is the replica set primary
    pub fn is_primary(&self) -> bool {
        self.is_master && !self.is_standalone()
    }

    /// Seconds the majority commit point trails the last applied write
    pub fn last_write_lag(&self) -> i64 {
        i64::from(self.last_write.op_time.ts.t) - i64::from(self.last_write.majority_op_time.ts.t)
    }

    fn is_config_server(&self) -> bool {
        self.config_svr == Some(CONFIG_SERVER_FLAG)
    }
}
