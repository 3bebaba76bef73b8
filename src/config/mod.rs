// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Server configuration, loaded from a toml file.

use serde::Deserialize;

mod bridge;
mod cluster;
mod general;
mod listener;
mod log;
mod security;
mod storage;

pub use self::log::{Log, LogLevel};
pub use bridge::{Bridge, BridgeRule};
pub use cluster::Cluster;
pub use general::General;
pub use listener::{Listener, Protocol};
pub use security::Security;
pub use storage::Storage;

/// Server main config.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    general: General,

    #[serde(default = "Listener::default_listeners")]
    listeners: Vec<Listener>,

    #[serde(default)]
    security: Security,

    #[serde(default)]
    storage: Storage,

    #[serde(default)]
    log: Log,

    #[serde(default)]
    cluster: Cluster,

    #[serde(default)]
    bridges: Vec<Bridge>,
}

impl Config {
    #[must_use]
    pub const fn general(&self) -> &General {
        &self.general
    }

    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    #[must_use]
    pub const fn security(&self) -> &Security {
        &self.security
    }

    #[must_use]
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    #[must_use]
    pub const fn log(&self) -> &Log {
        &self.log
    }

    #[must_use]
    pub const fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    #[must_use]
    pub fn bridges(&self) -> &[Bridge] {
        &self.bridges
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: General::default(),
            listeners: Listener::default_listeners(),
            security: Security::default(),
            storage: Storage::default(),
            log: Log::default(),
            cluster: Cluster::default(),
            bridges: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listeners().len(), 1);
        assert!(config.security().allow_anonymous);
        assert!(!config.cluster().enable);
        assert!(config.bridges().is_empty());
    }

    #[test]
    fn test_parse_cluster_section() {
        let content = r#"
[cluster]
enable = true
node_id = "n1"
cluster_name = "tianhe"
cluster_port = 11883
seed_nodes = ["10.0.0.2:11883", "10.0.0.3:11883"]
"#;
        let config: Config = toml::from_str(content).unwrap();
        assert!(config.cluster().enable);
        assert_eq!(config.cluster().node_id, "n1");
        assert_eq!(config.cluster().seed_nodes.len(), 2);
    }
}
