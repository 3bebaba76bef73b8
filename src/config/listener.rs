// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::PathBuf;

/// Binding protocol of one listener.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain MQTT over TCP.
    #[default]
    Mqtt,

    /// MQTT over TLS.
    Mqtts,
}

/// Listener represents an unique ip/port combination and mqtt connection
/// protocol.
#[derive(Debug, Deserialize, Clone)]
pub struct Listener {
    /// Binding protocol.
    ///
    /// Default is mqtt.
    #[serde(default)]
    pub protocol: Protocol,

    /// Binding address, including ip and port.
    ///
    /// Common addresses are:
    /// - 0.0.0.0:1883, for mqtt
    /// - 0.0.0.0:8883, for mqtts
    ///
    /// Default is 0.0.0.0:1883.
    #[serde(default = "Listener::default_address")]
    pub address: String,

    /// The maximum number of client connections to this listener allowed.
    ///
    /// Note that other process limits mean that unlimited connections are
    /// not really possible.
    ///
    /// Default is 0, which means unlimited connections.
    #[serde(default = "Listener::default_max_connections")]
    pub max_connections: usize,

    /// Path to TLS cert file.
    ///
    /// Default is None.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// Path to TLS private key file.
    ///
    /// Default is None.
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Require clients to present a certificate.
    ///
    /// Only meaningful for mqtts listeners. Default is false.
    #[serde(default)]
    pub require_client_certificate: bool,
}

impl Listener {
    pub fn default_address() -> String {
        "0.0.0.0:1883".to_string()
    }

    pub const fn default_max_connections() -> usize {
        0
    }

    pub fn default_listeners() -> Vec<Self> {
        vec![Self::default()]
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            address: Self::default_address(),
            max_connections: Self::default_max_connections(),
            cert_file: None,
            key_file: None,
            require_client_certificate: false,
        }
    }
}
