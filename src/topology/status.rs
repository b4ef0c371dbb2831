//! Replica set status (`replSetGetStatus`) documents

use super::ejson::{self, Timestamp};
use super::{ClusterTime, ConfigServerState, OpTime};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Member health as seen by the node answering the status query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ejson::Double", into = "f64")]
pub enum NodeHealth {
    #[default]
    Down,
    Up,
}

impl From<f64> for NodeHealth {
    fn from(value: f64) -> Self {
        // The server reports health as a double, 1 for up and 0 for down
        if value >= 1.0 {
            NodeHealth::Up
        } else {
            NodeHealth::Down
        }
    }
}

impl From<ejson::Double> for NodeHealth {
    fn from(value: ejson::Double) -> Self {
        NodeHealth::from(value.0)
    }
}

impl From<NodeHealth> for f64 {
    fn from(health: NodeHealth) -> Self {
        match health {
            NodeHealth::Down => 0.0,
            NodeHealth::Up => 1.0,
        }
    }
}

/// Replica set member state, numbered as the server numbers it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ejson::Int32", into = "i32")]
pub enum NodeState {
    Startup,
    Primary,
    Secondary,
    Recovering,
    Startup2,
    #[default]
    Unknown,
    Arbiter,
    Down,
    Rollback,
    Removed,
}

impl From<i32> for NodeState {
    fn from(code: i32) -> Self {
        match code {
            0 => NodeState::Startup,
            1 => NodeState::Primary,
            2 => NodeState::Secondary,
            3 => NodeState::Recovering,
            5 => NodeState::Startup2,
            7 => NodeState::Arbiter,
            8 => NodeState::Down,
            9 => NodeState::Rollback,
            10 => NodeState::Removed,
            _ => NodeState::Unknown,
        }
    }
}

impl From<ejson::Int32> for NodeState {
    fn from(code: ejson::Int32) -> Self {
        NodeState::from(code.0)
    }
}

impl From<NodeState> for i32 {
    fn from(state: NodeState) -> Self {
        match state {
            NodeState::Startup => 0,
            NodeState::Primary => 1,
            NodeState::Secondary => 2,
            NodeState::Recovering => 3,
            NodeState::Startup2 => 5,
            NodeState::Unknown => 6,
            NodeState::Arbiter => 7,
            NodeState::Down => 8,
            NodeState::Rollback => 9,
            NodeState::Removed => 10,
        }
    }
}

impl NodeState {
    /// Name the server uses in `stateStr`
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Startup => "STARTUP",
            NodeState::Primary => "PRIMARY",
            NodeState::Secondary => "SECONDARY",
            NodeState::Recovering => "RECOVERING",
            NodeState::Startup2 => "STARTUP2",
            NodeState::Unknown => "UNKNOWN",
            NodeState::Arbiter => "ARBITER",
            NodeState::Down => "DOWN",
            NodeState::Rollback => "ROLLBACK",
            NodeState::Removed => "REMOVED",
        }
    }

    /// Primaries and secondaries hold data that can be read for a backup
    pub fn is_readable(&self) -> bool {
        matches!(self, NodeState::Primary | NodeState::Secondary)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOpTimes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_committed_op_time: Option<OpTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_concern_majority_op_time: Option<OpTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_op_time: Option<OpTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub durable_op_time: Option<OpTime>,
}

/// One entry of `members` in a status reply
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(rename = "_id", with = "ejson::int32")]
    pub id: i32,
    pub name: String,
    #[serde(default)]
    pub health: NodeHealth,
    #[serde(default)]
    pub state: NodeState,
    #[serde(default)]
    pub state_str: String,
    #[serde(default, with = "ejson::int64")]
    pub uptime: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optime: Option<OpTime>,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub optime_date: Option<DateTime<Utc>>,
    #[serde(default, with = "ejson::int32")]
    pub config_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub election_time: Option<Timestamp>,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub election_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub info_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optime_durable: Option<OpTime>,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub optime_durable_date: Option<DateTime<Utc>>,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_recv: Option<DateTime<Utc>>,
    #[serde(default, with = "ejson::int64")]
    pub ping_ms: i64,
    #[serde(default, rename = "self")]
    pub is_self: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub syncing_to: String,
}

impl NodeStatus {
    pub fn is_healthy(&self) -> bool {
        self.health == NodeHealth::Up
    }
}

/// Reply to `db.adminCommand({ replSetGetStatus: 1 })`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplsetStatus {
    #[serde(default)]
    pub set: String,
    #[serde(default, with = "ejson::date", skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub my_state: NodeState,
    #[serde(default)]
    pub members: Vec<NodeStatus>,
    #[serde(default, with = "ejson::int64")]
    pub term: i64,
    #[serde(default, with = "ejson::int64")]
    pub heartbeat_interval_millis: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimes: Option<StatusOpTimes>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub errmsg: String,
    #[serde(default, with = "ejson::double")]
    pub ok: f64,
    #[serde(default, rename = "$clusterTime", skip_serializing_if = "Option::is_none")]
    pub cluster_time: Option<ClusterTime>,
    #[serde(default, rename = "$configServerState", skip_serializing_if = "Option::is_none")]
    pub config_server_state: Option<ConfigServerState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_time: Option<Timestamp>,
}

impl ReplsetStatus {
    /// Parse a reply from its extended JSON rendering
    pub fn from_json(doc: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(doc)
    }

    /// Current primary, if the set has one
    pub fn primary(&self) -> Option<&NodeStatus> {
        self.members.iter().find(|m| m.state == NodeState::Primary)
    }

    /// The member that answered the status query
    pub fn self_member(&self) -> Option<&NodeStatus> {
        self.members.iter().find(|m| m.is_self)
    }

    pub fn member(&self, name: &str) -> Option<&NodeStatus> {
        self.members.iter().find(|m| m.name == name)
    }

    /// Secondaries that are up, freshest optime first
    pub fn healthy_secondaries(&self) -> Vec<&NodeStatus> {
        let mut secondaries: Vec<&NodeStatus> = self
            .members
            .iter()
            .filter(|m| m.is_healthy() && m.state == NodeState::Secondary)
            .collect();
        secondaries.sort_by(|a, b| b.optime.cmp(&a.optime));
        secondaries
    }
}
