// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketType, VarIntError,
};

/// Return code in a connect acknowledgement.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectReturnCode {
    /// Connection accepted.
    #[default]
    Accepted = 0,

    /// The Server does not support the level of the MQTT protocol requested
    /// by the Client.
    UnacceptedProtocol = 1,

    /// The Client identifier is correct UTF-8 but not allowed by the Server.
    IdentifierRejected = 2,

    /// The Network Connection has been made but the MQTT service
    /// is unavailable.
    ServerUnavailable = 3,

    /// The data in the user name or password is malformed.
    BadUserNameOrPassword = 4,

    /// The Client is not authorized to connect.
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptedProtocol),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadUserNameOrPassword),
            5 => Ok(Self::NotAuthorized),
            _ => Err(DecodeError::InvalidReturnCode),
        }
    }
}

/// `ConnectAckPacket` is sent by the Server in response to a `ConnectPacket`.
///
/// The first packet sent from the Server to the Client MUST be a CONNACK
/// Packet [MQTT-3.2.0-1]. A v3.1.1 connect acknowledgement is exactly
/// 4 bytes long:
///
/// ```txt
///  7                  0
/// +--------------------+
/// | Fixed header       |
/// |                    |
/// +--------------------+
/// | Ack flags          |
/// +--------------------+
/// | Return code        |
/// +--------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectAckPacket {
    /// Bit 0 of the ack flags is the Session Present flag; bits 7-1 are
    /// reserved and MUST be set to 0 [MQTT-3.2.2-1].
    ///
    /// If the Server accepts a connection with CleanSession set to 1, the
    /// Server MUST set Session Present to 0 [MQTT-3.2.2-1]. If the Server
    /// accepts a connection with CleanSession set to 0 and the Server has
    /// stored Session state, it MUST set Session Present to 1
    /// [MQTT-3.2.2-2].
    session_present: bool,

    return_code: ConnectReturnCode,
}

impl ConnectAckPacket {
    #[must_use]
    pub fn new(session_present: bool, return_code: ConnectReturnCode) -> Self {
        Self {
            session_present,
            return_code,
        }
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
    }

    #[must_use]
    pub const fn return_code(&self) -> ConnectReturnCode {
        self.return_code
    }
}

impl EncodePacket for ConnectAckPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = FixedHeader::new(PacketType::ConnectAck, 2)?;
        fixed_header.encode(v)?;

        let ack_flags = u8::from(self.session_present);
        v.push(ack_flags);
        v.push(self.return_code as u8);

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for ConnectAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::ConnectAck {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() != 2 {
            return Err(DecodeError::InvalidRemainingLength);
        }

        let ack_flags = ba.read_byte()?;
        if ack_flags & 0b1111_1110 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let session_present = ack_flags & 0b0000_0001 == 0b0000_0001;
        let return_code = ConnectReturnCode::try_from(ba.read_byte()?)?;

        Ok(Self {
            session_present,
            return_code,
        })
    }
}

impl Packet for ConnectAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnectAck
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        Ok(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_four_bytes() {
        let packet = ConnectAckPacket::new(true, ConnectReturnCode::Accepted);
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x20, 0x02, 0x01, 0x00]);
    }

    #[test]
    fn test_decode() {
        let buf = [0x20, 0x02, 0x00, 0x05];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectAckPacket::decode(&mut ba).unwrap();
        assert!(!packet.session_present());
        assert_eq!(packet.return_code(), ConnectReturnCode::NotAuthorized);
    }
}
