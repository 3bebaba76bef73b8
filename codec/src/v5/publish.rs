// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;
use std::io::Write;

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, PubTopic, QoS, VarIntError,
};

/// Properties available in a publish packet.
pub const PUBLISH_PROPERTIES: &[PropertyType] = &[
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::TopicAlias,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
    PropertyType::ContentType,
];

/// A v5 `PublishPacket` transports an application message together with its
/// property block.
///
/// The topic name may be empty when a topic alias property is set; the
/// receiver then resolves the name through its alias mapping
/// [MQTT-3.3.2-5].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    /// The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
    dup: bool,

    qos: QoS,

    retain: bool,

    topic: PubTopic,

    /// Only present when `QoS` is 1 or 2.
    packet_id: PacketId,

    properties: Properties,

    /// Payload bytes, shared between clones of this packet.
    msg: Bytes,
}

impl PublishPacket {
    /// Create a new v5 publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is invalid.
    pub fn new(topic: &str, qos: QoS, msg: Bytes) -> Result<Self, EncodeError> {
        let topic = PubTopic::new(topic)?;
        Ok(Self {
            qos,
            topic,
            msg,
            ..Self::default()
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
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub fn message(&self) -> &Bytes {
        &self.msg
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.topic.bytes() + self.properties.bytes() + self.msg.len();
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
        let end_offset = ba.offset() + fixed_header.remaining_length();

        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let topic = PubTopic::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), PUBLISH_PROPERTIES)
        {
            log::error!(
                "v5/PublishPacket: property type {property_type:?} cannot be used in properties!",
            );
            return Err(DecodeError::InvalidPropertyType);
        }

        // An empty topic name requires a topic alias property.
        if topic.is_empty() && properties.topic_alias().is_none() {
            return Err(DecodeError::InvalidTopic);
        }

        if ba.offset() > end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let msg_len = end_offset - ba.offset();
        let msg = Bytes::copy_from_slice(ba.read_bytes(msg_len)?);

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            msg,
        })
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        self.topic.encode(v)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(v)?;
        }
        self.properties.encode(v)?;
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
    use crate::v5::Property;
    use crate::{StringPairData, U16Data};

    #[test]
    fn test_round_trip_with_properties() {
        let mut packet = PublishPacket::new(
            "sensors/kitchen/temp",
            QoS::AtLeastOnce,
            Bytes::from_static(b"25.5"),
        )
        .unwrap();
        packet.set_packet_id(PacketId::new(11));
        packet
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(8)))
            .push(Property::UserProperty(
                StringPairData::from("origin", "gateway").unwrap(),
            ));

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.properties().topic_alias(), Some(8));
    }

    #[test]
    fn test_empty_topic_requires_alias() {
        // Empty topic name, no properties, payload "x".
        let buf = [0x30, 0x04, 0x00, 0x00, 0x00, b'x'];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba),
            Err(DecodeError::InvalidTopic)
        );
    }

    #[test]
    fn test_empty_topic_with_alias() {
        // Empty topic name with TopicAlias(4).
        let buf = [0x30, 0x07, 0x00, 0x00, 0x03, 0x23, 0x00, 0x04, b'x'];
        let mut ba = ByteArray::new(&buf);
        let packet = PublishPacket::decode(&mut ba).unwrap();
        assert!(packet.topic().is_empty());
        assert_eq!(packet.properties().topic_alias(), Some(4));
    }
}
