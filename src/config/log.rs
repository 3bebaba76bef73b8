// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Log section in config.
#[derive(Debug, Deserialize, Clone)]
pub struct Log {
    /// Also print log to console.
    ///
    /// Default is true.
    #[serde(default = "Log::default_console_log")]
    console_log: bool,

    /// Set minimum log level.
    ///
    /// Available values are: off, error, warn, info, debug and trace.
    ///
    /// Default is info.
    #[serde(default = "Log::default_log_level")]
    log_level: LogLevel,

    /// Path to log file.
    ///
    /// Default is `/var/log/tianhe/tianhe.log`.
    #[serde(default = "Log::default_log_file")]
    log_file: PathBuf,
}

impl Log {
    pub const fn default_console_log() -> bool {
        true
    }

    pub const fn default_log_level() -> LogLevel {
        LogLevel::Info
    }

    pub fn default_log_file() -> PathBuf {
        PathBuf::from("/var/log/tianhe/tianhe.log")
    }

    #[must_use]
    pub const fn console_log(&self) -> bool {
        self.console_log
    }

    #[must_use]
    pub const fn log_level(&self) -> LogLevel {
        self.log_level
    }

    #[must_use]
    pub fn log_file(&self) -> &Path {
        self.log_file.as_path()
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            console_log: Self::default_console_log(),
            log_level: Self::default_log_level(),
            log_file: Self::default_log_file(),
        }
    }
}
