// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

/// Cluster section in config.
#[derive(Debug, Deserialize, Clone)]
pub struct Cluster {
    /// Join a broker cluster.
    ///
    /// Default is false.
    #[serde(default)]
    pub enable: bool,

    /// Unique id of this node.
    ///
    /// Default is a random `tianhe-` prefixed string, which changes on
    /// every restart; set an explicit id in production.
    #[serde(default = "Cluster::default_node_id")]
    pub node_id: String,

    /// Peers refuse connections from nodes with a different cluster name.
    ///
    /// Default is "tianhe".
    #[serde(default = "Cluster::default_cluster_name")]
    pub cluster_name: String,

    /// Address the cluster listener binds to.
    ///
    /// Default is 0.0.0.0.
    #[serde(default = "Cluster::default_bind_address")]
    pub bind_address: String,

    /// Port dedicated to cluster traffic.
    ///
    /// Default is 11883.
    #[serde(default = "Cluster::default_cluster_port")]
    pub cluster_port: u16,

    /// Addresses of known nodes, dialed in parallel on start. Further
    /// peers are learned through handshakes and discover messages.
    #[serde(default)]
    pub seed_nodes: Vec<String>,

    /// Interval between heartbeats to every connected peer.
    ///
    /// Default is 5000.
    #[serde(default = "Cluster::default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// A peer whose last heartbeat is older than this is dropped.
    ///
    /// Default is 15000.
    #[serde(default = "Cluster::default_node_timeout_ms")]
    pub node_timeout_ms: u64,

    /// Suppress duplicated publishes flooding through the peer graph.
    ///
    /// Default is true.
    #[serde(default = "Cluster::default_enable_deduplication")]
    pub enable_deduplication: bool,

    /// Lifetime of entries in the message id cache. Must exceed the widest
    /// end-to-end round trip between any two peers, or a flooded publish
    /// may be re-delivered.
    ///
    /// Default is 60.
    #[serde(default = "Cluster::default_message_id_cache_expiry_seconds")]
    pub message_id_cache_expiry_seconds: u64,

    /// Delay before re-dialing a lost seed node.
    ///
    /// Default is 5000.
    #[serde(default = "Cluster::default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl Cluster {
    pub fn default_node_id() -> String {
        codec::utils::random_client_id("tianhe-")
    }

    pub fn default_cluster_name() -> String {
        "tianhe".to_string()
    }

    pub fn default_bind_address() -> String {
        "0.0.0.0".to_string()
    }

    pub const fn default_cluster_port() -> u16 {
        11883
    }

    pub const fn default_heartbeat_interval_ms() -> u64 {
        5000
    }

    pub const fn default_node_timeout_ms() -> u64 {
        15000
    }

    pub const fn default_enable_deduplication() -> bool {
        true
    }

    pub const fn default_message_id_cache_expiry_seconds() -> u64 {
        60
    }

    pub const fn default_reconnect_delay_ms() -> u64 {
        5000
    }

    /// Cluster listener bind address as one string.
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.cluster_port)
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self {
            enable: false,
            node_id: Self::default_node_id(),
            cluster_name: Self::default_cluster_name(),
            bind_address: Self::default_bind_address(),
            cluster_port: Self::default_cluster_port(),
            seed_nodes: Vec::new(),
            heartbeat_interval_ms: Self::default_heartbeat_interval_ms(),
            node_timeout_ms: Self::default_node_timeout_ms(),
            enable_deduplication: Self::default_enable_deduplication(),
            message_id_cache_expiry_seconds: Self::default_message_id_cache_expiry_seconds(),
            reconnect_delay_ms: Self::default_reconnect_delay_ms(),
        }
    }
}
