// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketType, VarIntError,
};

/// The `DisconnectPacket` is the final packet sent from the Client to the
/// Server. It indicates that the Client is disconnecting cleanly.
///
/// On receipt the Server MUST discard any Will Message associated with the
/// current connection without publishing it [MQTT-3.14.4-3]. A v3.1.1
/// disconnect has no variable header and no payload.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisconnectPacket {}

impl DisconnectPacket {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }
}

impl EncodePacket for DisconnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let fixed_header = FixedHeader::new(PacketType::Disconnect, 0)?;
        fixed_header.encode(v)
    }
}

impl DecodePacket for DisconnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Disconnect {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self {})
    }
}

impl Packet for DisconnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Disconnect
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        Ok(2)
    }
}
