// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::time::Duration;

use crate::config;

/// Session runtime options, derived from the general config section by the
/// owning listener.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    connect_timeout: Duration,
    keep_alive_tolerance: f64,
    max_message_size: usize,
}

impl SessionConfig {
    #[must_use]
    pub fn new(general: &config::General) -> Self {
        Self {
            connect_timeout: Duration::from_secs(general.connection_timeout_seconds),
            keep_alive_tolerance: general.keep_alive_tolerance,
            max_message_size: general.max_message_size,
        }
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Effective keep alive window for `keep_alive` seconds.
    #[must_use]
    pub fn keep_alive_window(&self, keep_alive: u64) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        #[allow(clippy::cast_sign_loss)]
        #[allow(clippy::cast_possible_truncation)]
        Duration::from_millis((keep_alive as f64 * self.keep_alive_tolerance * 1000.0) as u64)
    }

    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }
}
