// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Application messages as routed between sessions, cluster peers and
//! bridges.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use codec::v5::{Properties, Property};
use codec::{BinaryData, EncodeError, PacketId, PubTopic, QoS, StringData, StringPairData};

/// Protocol family a message entered the broker through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceProtocol {
    /// Plain MQTT client connection.
    Mqtt,

    /// MQTT-SN gateway connection.
    MqttSn,

    /// Replicated from a cluster peer.
    Cluster,

    /// Forwarded from a remote broker by a bridge.
    Bridge,
}

/// Optional v5 metadata carried alongside a message.
///
/// The user property list keeps its original order, and the same name may
/// appear more than once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageMetadata {
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub subscription_identifiers: Vec<usize>,
    pub user_properties: Vec<(String, String)>,
}

impl MessageMetadata {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Collect metadata from a v5 publish property block.
    #[must_use]
    pub fn from_properties(properties: &Properties) -> Self {
        let mut metadata = Self::default();
        for property in properties.props() {
            match property {
                Property::PayloadFormatIndicator(v) => {
                    metadata.payload_format_indicator = Some(v.value());
                }
                Property::MessageExpiryInterval(v) => {
                    metadata.message_expiry_interval = Some(v.value());
                }
                Property::ResponseTopic(topic) => {
                    metadata.response_topic = Some(topic.as_ref().to_string());
                }
                Property::CorrelationData(data) => {
                    metadata.correlation_data = Some(data.as_ref().to_vec());
                }
                Property::ContentType(s) => {
                    metadata.content_type = Some(s.as_ref().to_string());
                }
                Property::SubscriptionIdentifier(var_int) => {
                    metadata.subscription_identifiers.push(var_int.value());
                }
                Property::UserProperty(pair) => {
                    metadata
                        .user_properties
                        .push((pair.name().to_string(), pair.value().to_string()));
                }
                _ => (),
            }
        }
        metadata
    }

    /// Convert metadata back into a v5 property block.
    ///
    /// # Errors
    ///
    /// Returns error if any stored string became invalid.
    pub fn to_properties(&self) -> Result<Properties, EncodeError> {
        let mut properties = Properties::new();
        if let Some(indicator) = self.payload_format_indicator {
            properties.push(Property::PayloadFormatIndicator(codec::BoolData::new(
                indicator,
            )));
        }
        if let Some(interval) = self.message_expiry_interval {
            properties.push(Property::MessageExpiryInterval(codec::U32Data::new(
                interval,
            )));
        }
        if let Some(topic) = &self.response_topic {
            properties.push(Property::ResponseTopic(PubTopic::new(topic)?));
        }
        if let Some(data) = &self.correlation_data {
            properties.push(Property::CorrelationData(BinaryData::from_slice(data)?));
        }
        if let Some(content_type) = &self.content_type {
            properties.push(Property::ContentType(StringData::from(content_type)?));
        }
        for id in &self.subscription_identifiers {
            properties.push(Property::SubscriptionIdentifier(
                codec::VarInt::from(*id).map_err(|_e| EncodeError::InvalidVarInt)?,
            ));
        }
        for (name, value) in &self.user_properties {
            properties.push(Property::UserProperty(StringPairData::from(name, value)?));
        }
        Ok(properties)
    }
}

/// A routable application message.
///
/// Identity is the tuple (topic, payload, qos, retain, source protocol,
/// source client id, publish time). The payload is a shared immutable byte
/// buffer, so fan-out to many sessions never deep-copies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationMessage {
    topic: String,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    source_protocol: SourceProtocol,
    source_client_id: String,
    published_at: DateTime<Utc>,
    metadata: MessageMetadata,
}

impl ApplicationMessage {
    #[must_use]
    pub fn new(
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
        source_protocol: SourceProtocol,
        source_client_id: &str,
    ) -> Self {
        Self {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
            source_protocol,
            source_client_id: source_client_id.to_string(),
            published_at: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = published_at;
        self
    }

    /// Build a message from a parsed v3 publish packet.
    #[must_use]
    pub fn from_publish_v3(
        client_id: &str,
        source_protocol: SourceProtocol,
        packet: &codec::v3::PublishPacket,
    ) -> Self {
        Self::new(
            packet.topic(),
            packet.message().clone(),
            packet.qos(),
            packet.retain(),
            source_protocol,
            client_id,
        )
    }

    /// Build a message from a parsed v5 publish packet, copying its
    /// property metadata. `topic` is passed separately because it may have
    /// been resolved from a topic alias.
    #[must_use]
    pub fn from_publish_v5(
        client_id: &str,
        source_protocol: SourceProtocol,
        topic: &str,
        packet: &codec::v5::PublishPacket,
    ) -> Self {
        Self::new(
            topic,
            packet.message().clone(),
            packet.qos(),
            packet.retain(),
            source_protocol,
            client_id,
        )
        .with_metadata(MessageMetadata::from_properties(packet.properties()))
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub const fn source_protocol(&self) -> SourceProtocol {
        self.source_protocol
    }

    #[must_use]
    pub fn source_client_id(&self) -> &str {
        &self.source_client_id
    }

    #[must_use]
    pub const fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    #[must_use]
    pub const fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Build an outbound v3 publish packet for one recipient.
    ///
    /// `qos` is the already downgraded delivery qos; `packet_id` is
    /// ignored for `QoS` 0.
    pub fn to_publish_v3(
        &self,
        qos: QoS,
        packet_id: PacketId,
        retain: bool,
    ) -> Result<codec::v3::PublishPacket, EncodeError> {
        let mut packet = codec::v3::PublishPacket::new(&self.topic, qos, self.payload.clone())?;
        packet.set_retain(retain);
        if qos != QoS::AtMostOnce {
            packet.set_packet_id(packet_id);
        }
        Ok(packet)
    }

    /// Build an outbound v5 publish packet for one recipient, carrying the
    /// stored metadata properties.
    pub fn to_publish_v5(
        &self,
        qos: QoS,
        packet_id: PacketId,
        retain: bool,
    ) -> Result<codec::v5::PublishPacket, EncodeError> {
        let mut packet = codec::v5::PublishPacket::new(&self.topic, qos, self.payload.clone())?;
        packet.set_retain(retain);
        if qos != QoS::AtMostOnce {
            packet.set_packet_id(packet_id);
        }
        *packet.properties_mut() = self.metadata.to_properties()?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_is_shared_on_clone() {
        let payload = Bytes::from_static(b"25.5");
        let msg = ApplicationMessage::new(
            "sensors/kitchen/temp",
            payload.clone(),
            QoS::AtMostOnce,
            false,
            SourceProtocol::Mqtt,
            "b",
        );
        let copy = msg.clone();
        // Both clones point at the same buffer.
        assert_eq!(msg.payload().as_ptr(), copy.payload().as_ptr());
    }

    #[test]
    fn test_metadata_round_trip() {
        let mut metadata = MessageMetadata::default();
        metadata.message_expiry_interval = Some(120);
        metadata.content_type = Some("application/json".to_string());
        metadata.user_properties.push(("a".into(), "1".into()));
        metadata.user_properties.push(("a".into(), "2".into()));

        let properties = metadata.to_properties().unwrap();
        assert_eq!(MessageMetadata::from_properties(&properties), metadata);
    }
}
