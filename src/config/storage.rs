// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

/// Storage section in config.
///
/// All state is kept in memory; nothing survives a broker restart.
#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    /// Store retained messages and replay them to new subscribers.
    ///
    /// Default is true.
    #[serde(default = "Storage::default_enable_retained_messages")]
    pub enable_retained_messages: bool,

    /// Keep subscriptions of sessions with clean_session=false across
    /// reconnects.
    ///
    /// Default is true.
    #[serde(default = "Storage::default_enable_persistent_sessions")]
    pub enable_persistent_sessions: bool,

    /// Bound of the per-client offline message queue. When the queue is
    /// full, the oldest message is dropped.
    ///
    /// Default is 100.
    #[serde(default = "Storage::default_max_offline_messages_per_client")]
    pub max_offline_messages_per_client: usize,

    /// Deliver queued offline messages right after a persistent session
    /// reconnects.
    ///
    /// Default is true.
    #[serde(default = "Storage::default_auto_deliver_offline_messages")]
    pub auto_deliver_offline_messages: bool,
}

impl Storage {
    pub const fn default_enable_retained_messages() -> bool {
        true
    }

    pub const fn default_enable_persistent_sessions() -> bool {
        true
    }

    pub const fn default_max_offline_messages_per_client() -> usize {
        100
    }

    pub const fn default_auto_deliver_offline_messages() -> bool {
        true
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            enable_retained_messages: Self::default_enable_retained_messages(),
            enable_persistent_sessions: Self::default_enable_persistent_sessions(),
            max_offline_messages_per_client: Self::default_max_offline_messages_per_client(),
            auto_deliver_offline_messages: Self::default_auto_deliver_offline_messages(),
        }
    }
}
