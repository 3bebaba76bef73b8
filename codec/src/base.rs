// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;

use crate::header::PacketType;
use crate::var_int::VarIntError;
use crate::{ByteArray, DecodeError, EncodeError};

/// Protocol name can only be "MQTT" [MQTT-3.1.2-1].
pub const PROTOCOL_NAME: &str = "MQTT";

/// Parse object from byte stream.
pub trait DecodePacket: Sized {
    /// # Errors
    ///
    /// Returns error if byte stream is malformed.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Serialize object into byte stream, returns number of bytes written.
pub trait EncodePacket {
    /// # Errors
    ///
    /// Returns error if fields in this object are invalid.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Common packet interface.
pub trait Packet: Send + fmt::Debug {
    fn packet_type(&self) -> PacketType;

    /// Get byte length of the whole packet, including fixed header.
    ///
    /// # Errors
    ///
    /// Returns error if packet size is invalid.
    fn bytes(&self) -> Result<usize, VarIntError>;
}

/// Packet identifier.
///
/// SUBSCRIBE, UNSUBSCRIBE, and PUBLISH (in cases where QoS > 0) Control
/// Packets MUST contain a non-zero 16-bit Packet Identifier [MQTT-2.3.1-1].
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PacketId(u16);

impl PacketId {
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        2
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PacketId {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodePacket for PacketId {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.extend_from_slice(&self.0.to_be_bytes());
        Ok(Self::bytes())
    }
}

/// Quality of service level of an application message.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl QoS {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as Self
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_ord_is_downgrade() {
        // Delivered qos is min(published, granted).
        assert_eq!(QoS::ExactOnce.min(QoS::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::AtMostOnce.min(QoS::ExactOnce), QoS::AtMostOnce);
    }

    #[test]
    fn test_packet_id_round_trip() {
        let packet_id = PacketId::new(0x1234);
        let mut buf = Vec::new();
        packet_id.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x12, 0x34]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PacketId::decode(&mut ba).unwrap(), packet_id);
    }
}
