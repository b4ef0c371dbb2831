//! Oplog entry operation kinds

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value of the `op` field of an oplog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "i")]
    Insert,
    #[serde(rename = "n")]
    Noop,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
    #[serde(rename = "c")]
    Command,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "i",
            Operation::Noop => "n",
            Operation::Update => "u",
            Operation::Delete => "d",
            Operation::Command => "c",
        }
    }

    /// Noops carry no data and are skipped on replay
    pub fn is_noop(&self) -> bool {
        matches!(self, Operation::Noop)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "i" => Ok(Operation::Insert),
            "n" => Ok(Operation::Noop),
            "u" => Ok(Operation::Update),
            "d" => Ok(Operation::Delete),
            "c" => Ok(Operation::Command),
            other => Err(format!("unknown oplog operation: {}", other)),
        }
    }
}
