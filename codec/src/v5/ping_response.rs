// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketType, VarIntError,
};

/// The v5 `PingResponsePacket` is identical to the v3 one: exactly two bytes
/// `0xd0 0x00`.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PingResponsePacket {}

impl PingResponsePacket {
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }
}

impl EncodePacket for PingResponsePacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let fixed_header = FixedHeader::new(PacketType::PingResponse, 0)?;
        fixed_header.encode(v)
    }
}

impl DecodePacket for PingResponsePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PingResponse {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self {})
    }
}

impl Packet for PingResponsePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PingResponse
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        Ok(2)
    }
}
