// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;

/// Security section in config.
#[derive(Debug, Deserialize, Clone)]
pub struct Security {
    /// Determine whether clients which connect without a username are
    /// allowed to connect.
    ///
    /// It is highly recommended to set this to false in production.
    ///
    /// Default is true.
    #[serde(default = "Security::default_allow_anonymous")]
    pub allow_anonymous: bool,
}

impl Security {
    pub const fn default_allow_anonymous() -> bool {
        true
    }
}

impl Default for Security {
    fn default() -> Self {
        Self {
            allow_anonymous: Self::default_allow_anonymous(),
        }
    }
}
