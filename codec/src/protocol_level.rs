// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Protocol version byte in connect packet variable header.
///
/// The Protocol Level is checked first so that the whole dispatch over packet
/// parsers is a single match on this value.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProtocolLevel {
    /// MQTT 3.1
    V31 = 3,

    /// MQTT 3.1.1
    #[default]
    V311 = 4,

    /// MQTT 5.0
    V5 = 5,
}

impl ProtocolLevel {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<ProtocolLevel> for u8 {
    fn from(level: ProtocolLevel) -> Self {
        level as Self
    }
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            3 => Ok(Self::V31),
            4 => Ok(Self::V311),
            5 => Ok(Self::V5),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

impl DecodePacket for ProtocolLevel {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let byte = ba.read_byte()?;
        Self::try_from(byte)
    }
}

impl EncodePacket for ProtocolLevel {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}
