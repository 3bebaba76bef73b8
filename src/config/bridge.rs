// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

use codec::{ProtocolLevel, QoS};

/// One topic mapping rule of a bridge.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BridgeRule {
    /// Topic filter matched against local publishes (upstream rules) or
    /// subscribed on the remote broker (downstream rules).
    pub local_topic_filter: String,

    /// Prefix added to the topic when forwarding upstream, and stripped
    /// from remote topics coming downstream.
    #[serde(default)]
    pub remote_topic_prefix: Option<String>,

    /// Prefix added to remote topics before they are injected locally.
    #[serde(default)]
    pub local_topic_prefix: Option<String>,

    /// `QoS` used for this rule; falls back to the bridge default.
    #[serde(default)]
    pub qos: Option<QoS>,

    /// Disabled rules are kept in config but ignored.
    #[serde(default = "BridgeRule::default_enabled")]
    pub enabled: bool,
}

impl BridgeRule {
    pub const fn default_enabled() -> bool {
        true
    }
}

/// One bridge instance in config.
///
/// A bridge is an outbound MQTT client session to a remote (parent) broker.
#[derive(Debug, Deserialize, Clone)]
pub struct Bridge {
    /// Name of this bridge, used in logs.
    pub name: String,

    pub remote_host: String,

    /// Default is 1883.
    #[serde(default = "Bridge::default_remote_port")]
    pub remote_port: u16,

    /// Client id used on the remote broker.
    ///
    /// Default is a random `tianhe-bridge-` prefixed string.
    #[serde(default = "Bridge::default_client_id")]
    pub client_id: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Connect to the remote broker over TLS.
    ///
    /// Default is false.
    #[serde(default)]
    pub use_tls: bool,

    /// Protocol version spoken to the remote broker.
    ///
    /// Default is 4 (MQTT 3.1.1).
    #[serde(default)]
    pub protocol_version: ProtocolLevel,

    /// Default is 60.
    #[serde(default = "Bridge::default_keep_alive_seconds")]
    pub keep_alive_seconds: u16,

    /// Delay between reconnect attempts.
    ///
    /// Default is 5000.
    #[serde(default = "Bridge::default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Give up one connect attempt after this many seconds.
    ///
    /// Default is 30.
    #[serde(default = "Bridge::default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,

    /// Default `QoS` for rules without an explicit one.
    ///
    /// Default is 0.
    #[serde(default)]
    pub qos: QoS,

    /// Keep the retain flag on messages forwarded upstream.
    ///
    /// Default is true.
    #[serde(default = "Bridge::default_sync_retain_flag")]
    pub sync_retain_flag: bool,

    /// Republish locally stored retained messages through the upstream
    /// rules after every successful connect.
    ///
    /// Default is false.
    #[serde(default)]
    pub sync_retained_messages: bool,

    /// Local publishes matching these filters are forwarded to the remote
    /// broker.
    #[serde(default)]
    pub upstream_rules: Vec<BridgeRule>,

    /// Remote topics subscribed on connect and injected locally.
    #[serde(default)]
    pub downstream_rules: Vec<BridgeRule>,
}

impl Bridge {
    pub const fn default_remote_port() -> u16 {
        1883
    }

    pub fn default_client_id() -> String {
        codec::utils::random_client_id("tianhe-bridge-")
    }

    pub const fn default_keep_alive_seconds() -> u16 {
        60
    }

    pub const fn default_reconnect_delay_ms() -> u64 {
        5000
    }

    pub const fn default_connection_timeout_seconds() -> u64 {
        30
    }

    pub const fn default_sync_retain_flag() -> bool {
        true
    }

    /// Remote address as one string.
    #[must_use]
    pub fn remote_address(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}
