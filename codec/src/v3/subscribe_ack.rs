// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, QoS, VarIntError,
};

/// Result for one topic filter in a subscribe acknowledgement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscribeAck {
    /// Subscription accepted with this maximum `QoS`.
    QoS(QoS),

    /// Failure (0x80).
    Failed,
}

impl SubscribeAck {
    fn decode(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0x00 => Ok(Self::QoS(QoS::AtMostOnce)),
            0x01 => Ok(Self::QoS(QoS::AtLeastOnce)),
            0x02 => Ok(Self::QoS(QoS::ExactOnce)),
            0x80 => Ok(Self::Failed),
            _ => Err(DecodeError::InvalidQoS),
        }
    }

    const fn as_byte(self) -> u8 {
        match self {
            Self::QoS(qos) => qos as u8,
            Self::Failed => 0x80,
        }
    }
}

/// `SubscribeAckPacket` is sent by the Server to the Client to confirm
/// receipt and processing of a `SubscribePacket`.
///
/// The payload contains a list of return codes, one for each Topic Filter
/// in the SUBSCRIBE packet being acknowledged, in the same order
/// [MQTT-3.9.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribeAckPacket {
    packet_id: PacketId,
    acks: Vec<SubscribeAck>,
}

impl SubscribeAckPacket {
    #[must_use]
    pub fn new(ack: SubscribeAck, packet_id: PacketId) -> Self {
        Self {
            packet_id,
            acks: vec![ack],
        }
    }

    #[must_use]
    pub fn with_vec(acks: Vec<SubscribeAck>, packet_id: PacketId) -> Self {
        Self { packet_id, acks }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn acks(&self) -> &[SubscribeAck] {
        &self.acks
    }
}

impl DecodePacket for SubscribeAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::SubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }
        if fixed_header.remaining_length() < PacketId::bytes() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        let packet_id = PacketId::decode(ba)?;
        let mut acks = Vec::new();
        let remaining = fixed_header.remaining_length() - PacketId::bytes();
        for _ in 0..remaining {
            acks.push(SubscribeAck::decode(ba.read_byte()?)?);
        }

        Ok(Self { packet_id, acks })
    }
}

impl EncodePacket for SubscribeAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let remaining_length = PacketId::bytes() + self.acks.len();
        let fixed_header = FixedHeader::new(PacketType::SubscribeAck, remaining_length)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        for ack in &self.acks {
            buf.push(ack.as_byte());
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for SubscribeAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubscribeAck
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let remaining_length = PacketId::bytes() + self.acks.len();
        let fixed_header = FixedHeader::new(PacketType::SubscribeAck, remaining_length)?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let packet = SubscribeAckPacket::with_vec(
            vec![
                SubscribeAck::QoS(QoS::AtLeastOnce),
                SubscribeAck::Failed,
                SubscribeAck::QoS(QoS::AtMostOnce),
            ],
            PacketId::new(9),
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x90, 0x05, 0x00, 0x09, 0x01, 0x80, 0x00]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(SubscribeAckPacket::decode(&mut ba).unwrap(), packet);
    }
}
