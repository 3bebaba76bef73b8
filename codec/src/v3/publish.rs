// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, PubTopic, QoS, VarIntError,
};

/// `PublishPacket` is used to transport application messages from the Client
/// to the Server, or from the Server to the Client.
///
/// Basic structure of packet:
///
/// ```txt
///  7                     0
/// +-----------------------+
/// | Fixed header          |
/// |                       |
/// +-----------------------+
/// | Topic name length     |
/// |                       |
/// +-----------------------+
/// | Topic name ...        |
/// +-----------------------+
/// | Packet Identifier     |
/// |                       |
/// +-----------------------+
/// | Msg payload ...       |
/// +-----------------------+
/// ```
///
/// Note that `packet_id` is only present in `QoS` 1 and `QoS` 2 packets.
///
/// Response of `PublishPacket`:
/// * `QoS` 0, no response
/// * `QoS` 1, `PublishAckPacket`
/// * `QoS` 2, `PublishReceivedPacket`
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    /// If false, this is the first occasion of the packet; if true, it might
    /// be the re-delivery of an earlier attempt.
    ///
    /// The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
    dup: bool,

    /// Level of assurance for delivery.
    qos: QoS,

    /// If set in a packet sent to the Server, the message is stored as the
    /// new retained message for its topic; a retained message with a zero
    /// byte payload removes the stored one. When the Server sends a retained
    /// message to a new subscriber it keeps this flag set; for all other
    /// deliveries the flag is cleared [MQTT-3.3.1-9].
    retain: bool,

    /// Topic name, MUST NOT contain wildcard characters [MQTT-3.3.2-2].
    topic: PubTopic,

    /// Only meaningful when `QoS` is 1 or 2.
    packet_id: PacketId,

    /// Payload bytes, shared between clones of this packet.
    msg: Bytes,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: Bytes) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            qos,
            dup: false,
            retain: false,
            topic,
            packet_id: PacketId::new(0),
            msg,
        })
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    /// Update `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error if `dup` is set on a `QoS` 0 packet.
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.packet_id = PacketId::new(0);
        }
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update topic.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn set_topic(&mut self, topic: &str) -> Result<&mut Self, EncodeError> {
        self.topic = PubTopic::new(topic)?;
        Ok(self)
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn message(&self) -> &Bytes {
        &self.msg
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.topic.bytes() + self.msg.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }

        let packet_type = PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;

        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        // The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let topic = PubTopic::decode(ba)?;
        if topic.is_empty() {
            // A v3 publish topic is never empty; only a v5 publish may
            // resolve its topic through an alias.
            return Err(DecodeError::InvalidTopic);
        }

        // The Packet Identifier field is only present in PUBLISH Packets
        // where the QoS level is 1 or 2.
        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                // PUBLISH (in cases where QoS > 0) Control Packets MUST
                // contain a non-zero Packet Identifier [MQTT-2.3.1-1].
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        // It is valid for a PUBLISH Packet to contain a zero length payload.
        if fixed_header.remaining_length() < topic.bytes() {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let mut msg_len = fixed_header.remaining_length() - topic.bytes();
        if qos != QoS::AtMostOnce {
            if msg_len < PacketId::bytes() {
                return Err(DecodeError::InvalidRemainingLength);
            }
            msg_len -= PacketId::bytes();
        }

        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);
        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        // Write variable header
        self.topic.encode(v)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(v)?;
        }

        // Write payload
        v.write_all(&self.msg)?;

        Ok(v.len() - old_len)
    }
}

impl Packet for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish {
            dup: self.dup,
            retain: self.retain,
            qos: self.qos,
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = self.get_fixed_header()?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode() {
        let buf = [
            0x30, 0x14, 0x00, 0x0b, b's', b'e', b'n', b's', b'o', b'r', b's', b'/', b't', b'm',
            b'p', b'3', b'2', b'.', b'5', b'0', b'1', b'9',
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.topic(), "sensors/tmp");
        assert_eq!(packet.qos(), QoS::AtMostOnce);
        assert_eq!(packet.message().as_ref(), b"32.5019");
    }

    #[test]
    fn test_round_trip_qos1() {
        let mut packet =
            PublishPacket::new("home/light", QoS::AtLeastOnce, Bytes::from_static(b"on")).unwrap();
        packet.set_packet_id(PacketId::new(42));
        packet.set_retain(true);

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_zero_packet_id_rejected() {
        let buf = [
            0x32, 0x09, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x00, b'h', b'i',
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketId)
        );
    }
}
