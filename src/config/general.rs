// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

/// General section in config.
#[derive(Debug, Deserialize, Clone)]
pub struct General {
    /// Set maximum size for publish message payload.
    ///
    /// Received messages that exceed this size are rejected with reason
    /// code 0x95 (v5) or silently dropped (v3.1.1). MQTT itself imposes
    /// a maximum of 268435455 bytes.
    ///
    /// Default is 256KiB.
    #[serde(default = "General::default_max_message_size")]
    pub max_message_size: usize,

    /// A connection which has not finished its connect handshake within
    /// this many seconds is dropped.
    ///
    /// Default is 30.
    #[serde(default = "General::default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,

    /// A session whose last inbound byte is older than
    /// `keep_alive * keep_alive_tolerance` seconds is considered stale and
    /// disconnected [MQTT-3.1.2-24].
    ///
    /// Default is 1.5.
    #[serde(default = "General::default_keep_alive_tolerance")]
    pub keep_alive_tolerance: f64,
}

impl General {
    pub const fn default_max_message_size() -> usize {
        256 * 1024
    }

    pub const fn default_connection_timeout_seconds() -> u64 {
        30
    }

    pub const fn default_keep_alive_tolerance() -> f64 {
        1.5
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            max_message_size: Self::default_max_message_size(),
            connection_timeout_seconds: Self::default_connection_timeout_seconds(),
            keep_alive_tolerance: Self::default_keep_alive_tolerance(),
        }
    }
}
