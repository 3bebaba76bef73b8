// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;

use crate::commands::{
    AclToListenerCmd, AuthToListenerCmd, BridgeToDispatcherCmd, ClusterToDispatcherCmd,
    DispatcherToBridgeCmd, DispatcherToClusterCmd, DispatcherToListenerCmd, ListenerToAclCmd,
    ListenerToAuthCmd, ListenerToDispatcherCmd, ListenerToSessionCmd, SessionToListenerCmd,
};

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Send packet error.
    SendError,

    /// Socket stream error.
    SocketError,

    /// Cert files error.
    CertError,

    /// Session with id not found.
    SessionNotFound,

    /// mpsc channel error.
    ChannelError,

    /// Invalid config file.
    ConfigError,

    /// Failed to init logger.
    LoggerError,

    /// Violation of protocol rules, like a second connect packet on one
    /// connection.
    ProtocolError,

    /// Command line parameter error.
    ParameterError,

    /// Error in cluster peer connection.
    ClusterError,

    /// Error in bridge connection.
    BridgeError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::from_string(ErrorKind::ConfigError, format!("{err:?}"))
    }
}

// Internal error conversions.
impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

macro_rules! convert_send_error {
    ($cmd_type: ident) => {
        impl From<mpsc::error::SendError<$cmd_type>> for Error {
            fn from(err: mpsc::error::SendError<$cmd_type>) -> Self {
                Self::from_string(
                    ErrorKind::ChannelError,
                    format!("{} channel error: {}", stringify!($cmd_type), err),
                )
            }
        }
    };
}

convert_send_error!(AclToListenerCmd);
convert_send_error!(AuthToListenerCmd);
convert_send_error!(BridgeToDispatcherCmd);
convert_send_error!(ClusterToDispatcherCmd);
convert_send_error!(DispatcherToBridgeCmd);
convert_send_error!(DispatcherToClusterCmd);
convert_send_error!(DispatcherToListenerCmd);
convert_send_error!(ListenerToAclCmd);
convert_send_error!(ListenerToAuthCmd);
convert_send_error!(ListenerToDispatcherCmd);
convert_send_error!(ListenerToSessionCmd);
convert_send_error!(SessionToListenerCmd);
