// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, QoS, SubTopic, VarIntError,
};

/// Properties available in a subscribe packet.
pub const SUBSCRIBE_PROPERTIES: &[PropertyType] = &[
    PropertyType::SubscriptionIdentifier,
    PropertyType::UserProperty,
];

/// How retained messages are handled when a subscription is created.
///
/// Carried in bits 4 and 5 of the subscription options byte. The broker
/// parses and stores the value; dispatch treats every subscription as
/// `SendAtSubscribe`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    SendAtSubscribe = 0,

    /// Send retained messages only if the subscription does not
    /// currently exist.
    SendAtSubscribeIfNew = 1,

    /// Do not send retained messages.
    DoNotSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::SendAtSubscribe),
            1 => Ok(Self::SendAtSubscribeIfNew),
            2 => Ok(Self::DoNotSend),
            _ => Err(DecodeError::InvalidPacketFlags),
        }
    }
}

/// One topic filter with its subscription options byte.
///
/// ```txt
///   7 - 6     5 - 4       3        2      1 - 0
/// +--------+---------+--------+----------+-----+
/// | Unused | Retain  | Retain | No Local | QoS |
/// |        | Handling| as Pub |          |     |
/// +--------+---------+--------+----------+-----+
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeTopic {
    topic: SubTopic,
    qos: QoS,
    no_local: bool,
    retain_as_published: bool,
    retain_handling: RetainHandling,
}

impl SubscribeTopic {
    /// Create a new subscribe topic with default options.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` filter is invalid.
    pub fn new(topic: &str, qos: QoS) -> Result<Self, EncodeError> {
        let topic = SubTopic::parse(topic)?;
        Ok(Self {
            topic,
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::default(),
        })
    }

    #[must_use]
    pub const fn topic(&self) -> &SubTopic {
        &self.topic
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn no_local(&self) -> bool {
        self.no_local
    }

    #[must_use]
    pub const fn retain_as_published(&self) -> bool {
        self.retain_as_published
    }

    #[must_use]
    pub const fn retain_handling(&self) -> RetainHandling {
        self.retain_handling
    }

    /// Get byte length used in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.topic.bytes() + 1
    }
}

impl DecodePacket for SubscribeTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let topic = SubTopic::decode(ba)?;
        let options = ba.read_byte()?;
        // Bits 6 and 7 of the Subscription Options byte are reserved for
        // future use. The Server MUST treat a SUBSCRIBE packet as malformed
        // if any of Reserved bits in the Payload are non-zero
        // [MQTT-3.8.3-5].
        if options & 0b1100_0000 != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let qos = QoS::try_from(options & 0b0000_0011)?;
        let no_local = options & 0b0000_0100 == 0b0000_0100;
        let retain_as_published = options & 0b0000_1000 == 0b0000_1000;
        let retain_handling = RetainHandling::try_from((options & 0b0011_0000) >> 4)?;
        Ok(Self {
            topic,
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        })
    }
}

impl EncodePacket for SubscribeTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        self.topic.encode(buf)?;
        let mut options = u8::from(self.qos);
        if self.no_local {
            options |= 0b0000_0100;
        }
        if self.retain_as_published {
            options |= 0b0000_1000;
        }
        options |= (self.retain_handling as u8) << 4;
        buf.push(options);
        Ok(self.bytes())
    }
}

/// A v5 `SubscribePacket` carries a property block and one or more
/// `{topic filter, options}` pairs.
///
/// The payload MUST contain at least one pair [MQTT-3.8.3-3].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscribePacket {
    packet_id: PacketId,
    properties: Properties,
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// Create a subscribe packet with one `topic`.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topic = SubscribeTopic::new(topic, qos)?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    #[must_use]
    pub fn with_topics(packet_id: PacketId, topics: Vec<SubscribeTopic>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            topics,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }
}

impl DecodePacket for SubscribePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Subscribe {
            return Err(DecodeError::InvalidPacketType);
        }
        let end_offset = ba.offset() + fixed_header.remaining_length();

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), SUBSCRIBE_PROPERTIES)
        {
            log::error!(
                "v5/SubscribePacket: property type {property_type:?} cannot be used in properties!",
            );
            return Err(DecodeError::InvalidPropertyType);
        }

        let mut topics = Vec::new();
        while ba.offset() < end_offset {
            topics.push(SubscribeTopic::decode(ba)?);
        }
        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }
        if topics.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }

        Ok(Self {
            packet_id,
            properties,
            topics,
        })
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let mut remaining_length = PacketId::bytes() + self.properties.bytes();
        for topic in &self.topics {
            remaining_length += topic.bytes();
        }

        let fixed_header = FixedHeader::new(PacketType::Subscribe, remaining_length)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        self.properties.encode(buf)?;
        for topic in &self.topics {
            topic.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let mut remaining_length = PacketId::bytes() + self.properties.bytes();
        for topic in &self.topics {
            remaining_length += topic.bytes();
        }
        let fixed_header = FixedHeader::new(PacketType::Subscribe, remaining_length)?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_options() {
        // Options byte 0x2d: retain handling 2, retain-as-published,
        // no-local, qos 1.
        let buf = [
            0x82, 0x0c, 0x00, 0x08, 0x00, 0x00, 0x06, b'h', b'o', b'm', b'e', b'/', b'#', 0x2d,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = SubscribePacket::decode(&mut ba).unwrap();
        let topic = &packet.topics()[0];
        assert_eq!(topic.qos(), QoS::AtLeastOnce);
        assert!(topic.no_local());
        assert!(topic.retain_as_published());
        assert_eq!(topic.retain_handling(), RetainHandling::DoNotSend);

        let mut out = Vec::new();
        packet.encode(&mut out).unwrap();
        assert_eq!(out.as_slice(), &buf);
    }

    #[test]
    fn test_reserved_option_bits() {
        let buf = [
            0x82, 0x0c, 0x00, 0x08, 0x00, 0x00, 0x06, b'h', b'o', b'm', b'e', b'/', b'#', 0x41,
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            SubscribePacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
