//! Sharded-cluster registry entries and connection auth status

use serde::{Deserialize, Serialize};

/// Entry of the `config.shards` collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    #[serde(rename = "_id")]
    pub id: String,
    /// Connection string, `rsName/host1:port,host2:port`
    pub host: String,
}

impl Shard {
    /// Split the shard's connection string into replica set name and hosts.
    /// A host string without a set prefix yields an empty set name.
    pub fn replset(&self) -> (&str, Vec<&str>) {
        let (set_name, hosts) = match self.host.split_once('/') {
            Some((name, hosts)) => (name, hosts),
            None => ("", self.host.as_str()),
        };
        let hosts = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .collect();
        (set_name, hosts)
    }
}

/// Reply to `db.runCommand({ connectionStatus: 1 })`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    #[serde(default)]
    pub auth_info: AuthInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    #[serde(default, rename = "authenticatedUsers")]
    pub users: Vec<AuthUser>,
    #[serde(default, rename = "authenticatedUserRoles")]
    pub user_roles: Vec<AuthUserRoles>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user: String,
    pub db: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserRoles {
    pub role: String,
    pub db: String,
}

impl ConnectionStatus {
    /// True if the connection holds `role` on database `db`
    pub fn has_role(&self, role: &str, db: &str) -> bool {
        self.auth_info
            .user_roles
            .iter()
            .any(|r| r.role == role && r.db == db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shard_replset() {
        let shard = Shard {
            id: "rs1".to_string(),
            host: "rs1/10.0.0.1:27018,10.0.0.2:27018".to_string(),
        };
        let (name, hosts) = shard.replset();
        assert_eq!(name, "rs1");
        assert_eq!(hosts, vec!["10.0.0.1:27018", "10.0.0.2:27018"]);
    }

    #[test]
    fn test_shard_without_set_prefix() {
        let shard = Shard {
            id: "legacy".to_string(),
            host: "10.0.0.1:27018".to_string(),
        };
        let (name, hosts) = shard.replset();
        assert_eq!(name, "");
        assert_eq!(hosts, vec!["10.0.0.1:27018"]);
    }

    #[test]
    fn test_connection_status_roles() {
        let status: ConnectionStatus = serde_json::from_value(json!({
            "authInfo": {
                "authenticatedUsers": [{"user": "pbm", "db": "admin"}],
                "authenticatedUserRoles": [
                    {"role": "backup", "db": "admin"},
                    {"role": "clusterMonitor", "db": "admin"}
                ]
            },
            "ok": 1
        }))
        .unwrap();

        assert_eq!(status.auth_info.users[0].user, "pbm");
        assert!(status.has_role("backup", "admin"));
        assert!(!status.has_role("restore", "admin"));
        assert!(!status.has_role("backup", "local"));
    }
}
