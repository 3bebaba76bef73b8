// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Property block shared by MQTT 5.0 packets.
//!
//! The last field in the Variable Header of most v5 packets is a set of
//! Properties: a Variable Byte Integer counting the bytes of the block,
//! followed by `{identifier, value}` entries. The value encoding depends on
//! the identifier.

use std::convert::TryFrom;

use crate::{
    BinaryData, BoolData, ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket,
    PubTopic, QoS, StringData, StringPairData, U16Data, U32Data, VarInt,
};

/// Property types which may appear more than once in one property block.
pub const MULTIPLE_PROPERTIES: &[PropertyType] = &[
    PropertyType::UserProperty,
    PropertyType::SubscriptionIdentifier,
];

/// Check that every property in `properties` is listed in `types`, and that
/// no property outside of [`MULTIPLE_PROPERTIES`] repeats.
///
/// # Errors
///
/// Returns the offending property type.
pub fn check_property_type_list(
    properties: &[Property],
    types: &[PropertyType],
) -> Result<(), PropertyType> {
    if properties.is_empty() {
        return Ok(());
    }

    for property in properties {
        if !types.contains(&property.property_type()) {
            return Err(property.property_type());
        }
    }

    for property_type in types {
        let count = properties
            .iter()
            .filter(|p| p.property_type() == *property_type)
            .count();
        if count > 1 && !MULTIPLE_PROPERTIES.contains(property_type) {
            return Err(*property_type);
        }
    }

    Ok(())
}

#[allow(clippy::module_name_repetitions)]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    PayloadFormatIndicator = 0x01,
    MessageExpiryInterval = 0x02,
    ContentType = 0x03,
    ResponseTopic = 0x08,
    CorrelationData = 0x09,
    SubscriptionIdentifier = 0x0b,
    SessionExpiryInterval = 0x11,
    AssignedClientIdentifier = 0x12,
    ServerKeepAlive = 0x13,
    AuthenticationMethod = 0x15,
    AuthenticationData = 0x16,
    RequestProblemInformation = 0x17,
    WillDelayInterval = 0x18,
    RequestResponseInformation = 0x19,
    ResponseInformation = 0x1a,
    ServerReference = 0x1c,
    ReasonString = 0x1f,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    UserProperty = 0x26,
    MaximumPacketSize = 0x27,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2a,
}

impl PropertyType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for PropertyType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::PayloadFormatIndicator),
            0x02 => Ok(Self::MessageExpiryInterval),
            0x03 => Ok(Self::ContentType),
            0x08 => Ok(Self::ResponseTopic),
            0x09 => Ok(Self::CorrelationData),
            0x0b => Ok(Self::SubscriptionIdentifier),
            0x11 => Ok(Self::SessionExpiryInterval),
            0x12 => Ok(Self::AssignedClientIdentifier),
            0x13 => Ok(Self::ServerKeepAlive),
            0x15 => Ok(Self::AuthenticationMethod),
            0x16 => Ok(Self::AuthenticationData),
            0x17 => Ok(Self::RequestProblemInformation),
            0x18 => Ok(Self::WillDelayInterval),
            0x19 => Ok(Self::RequestResponseInformation),
            0x1a => Ok(Self::ResponseInformation),
            0x1c => Ok(Self::ServerReference),
            0x1f => Ok(Self::ReasonString),
            0x21 => Ok(Self::ReceiveMaximum),
            0x22 => Ok(Self::TopicAliasMaximum),
            0x23 => Ok(Self::TopicAlias),
            0x24 => Ok(Self::MaximumQoS),
            0x25 => Ok(Self::RetainAvailable),
            0x26 => Ok(Self::UserProperty),
            0x27 => Ok(Self::MaximumPacketSize),
            0x28 => Ok(Self::WildcardSubscriptionAvailable),
            0x29 => Ok(Self::SubscriptionIdentifierAvailable),
            0x2a => Ok(Self::SharedSubscriptionAvailable),
            _ => Err(DecodeError::InvalidPropertyType),
        }
    }
}

/// A single typed property entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// Byte. Used in PUBLISH, Will Properties.
    ///
    /// 0 means the payload is unspecified bytes, 1 means it is UTF-8
    /// encoded character data.
    PayloadFormatIndicator(BoolData),

    /// Four Byte Integer. Used in PUBLISH, Will Properties.
    ///
    /// Lifetime of the message in seconds.
    MessageExpiryInterval(U32Data),

    /// UTF-8 String. Used in PUBLISH, Will Properties.
    ContentType(StringData),

    /// UTF-8 String. Used in PUBLISH, Will Properties.
    ///
    /// Topic Name for a response message. Its presence identifies the
    /// message as a request.
    ResponseTopic(PubTopic),

    /// Binary Data. Used in PUBLISH, Will Properties.
    ///
    /// Used by the sender of a Request Message to identify which request
    /// the Response Message is for.
    CorrelationData(BinaryData),

    /// Variable Byte Integer. Used in PUBLISH, SUBSCRIBE.
    ///
    /// Identifier of the subscription, 1 to 268,435,455. It is a Protocol
    /// Error if it has the value 0. May appear multiple times in a PUBLISH
    /// when the publication matched several subscriptions.
    SubscriptionIdentifier(VarInt),

    /// Four Byte Integer. Used in CONNECT, CONNACK, DISCONNECT.
    ///
    /// Session Expiry Interval in seconds; 0 or absent means the Session
    /// ends when the Network Connection is closed.
    SessionExpiryInterval(U32Data),

    /// UTF-8 String. Used in CONNACK.
    ///
    /// The Client Identifier which was assigned by the Server because a
    /// zero length Client Identifier was found in the CONNECT packet
    /// [MQTT-3.2.2-16].
    AssignedClientIdentifier(StringData),

    /// Two Byte Integer. Used in CONNACK.
    ///
    /// Keep Alive time assigned by the Server, overriding the value the
    /// Client sent [MQTT-3.2.2-21].
    ServerKeepAlive(U16Data),

    /// UTF-8 String. Used in CONNECT, CONNACK, AUTH.
    AuthenticationMethod(StringData),

    /// Binary Data. Used in CONNECT, CONNACK, AUTH.
    ///
    /// Contents are defined by the authentication method.
    AuthenticationData(BinaryData),

    /// Byte. Used in CONNECT.
    ///
    /// Whether Reason String or User Properties may be sent in the case
    /// of failures.
    RequestProblemInformation(BoolData),

    /// Four Byte Integer. Used in Will Properties.
    ///
    /// Delay in seconds before the Server publishes the Will Message.
    WillDelayInterval(U32Data),

    /// Byte. Used in CONNECT.
    RequestResponseInformation(BoolData),

    /// UTF-8 String. Used in CONNACK.
    ///
    /// Basis for creating a Response Topic.
    ResponseInformation(StringData),

    /// UTF-8 String. Used in CONNACK, DISCONNECT.
    ///
    /// Names another Server for the Client to use, together with reason
    /// code 0x9C (Use another server) or 0x9D (Server moved).
    ServerReference(StringData),

    /// UTF-8 String. Used in CONNACK, PUBACK, PUBREC, PUBREL, PUBCOMP,
    /// SUBACK, UNSUBACK, DISCONNECT, AUTH.
    ///
    /// Human readable diagnostic string, not to be parsed by the receiver.
    ReasonString(StringData),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// Limit of unacknowledged QoS 1 / QoS 2 publications the sender is
    /// willing to process concurrently.
    ReceiveMaximum(U16Data),

    /// Two Byte Integer. Used in CONNECT, CONNACK.
    ///
    /// Highest topic alias value accepted from the peer.
    TopicAliasMaximum(U16Data),

    /// Two Byte Integer. Used in PUBLISH.
    ///
    /// Integer which replaces the Topic Name in subsequent publishes.
    /// A Topic Alias of 0 is a Protocol Error.
    TopicAlias(U16Data),

    /// Byte. Used in CONNACK.
    MaximumQoS(QoS),

    /// Byte. Used in CONNACK.
    RetainAvailable(BoolData),

    /// UTF-8 String Pair. Usable in every packet which carries properties.
    ///
    /// The same name is allowed to appear more than once; the order of
    /// pairs is preserved end to end [MQTT-3.1.3-10].
    UserProperty(StringPairData),

    /// Four Byte Integer. Used in CONNECT, CONNACK.
    MaximumPacketSize(U32Data),

    /// Byte. Used in CONNACK.
    WildcardSubscriptionAvailable(BoolData),

    /// Byte. Used in CONNACK.
    SubscriptionIdentifierAvailable(BoolData),

    /// Byte. Used in CONNACK.
    SharedSubscriptionAvailable(BoolData),
}

impl Property {
    #[must_use]
    pub const fn property_type(&self) -> PropertyType {
        match self {
            Self::PayloadFormatIndicator(_) => PropertyType::PayloadFormatIndicator,
            Self::MessageExpiryInterval(_) => PropertyType::MessageExpiryInterval,
            Self::ContentType(_) => PropertyType::ContentType,
            Self::ResponseTopic(_) => PropertyType::ResponseTopic,
            Self::CorrelationData(_) => PropertyType::CorrelationData,
            Self::SubscriptionIdentifier(_) => PropertyType::SubscriptionIdentifier,
            Self::SessionExpiryInterval(_) => PropertyType::SessionExpiryInterval,
            Self::AssignedClientIdentifier(_) => PropertyType::AssignedClientIdentifier,
            Self::ServerKeepAlive(_) => PropertyType::ServerKeepAlive,
            Self::AuthenticationMethod(_) => PropertyType::AuthenticationMethod,
            Self::AuthenticationData(_) => PropertyType::AuthenticationData,
            Self::RequestProblemInformation(_) => PropertyType::RequestProblemInformation,
            Self::WillDelayInterval(_) => PropertyType::WillDelayInterval,
            Self::RequestResponseInformation(_) => PropertyType::RequestResponseInformation,
            Self::ResponseInformation(_) => PropertyType::ResponseInformation,
            Self::ServerReference(_) => PropertyType::ServerReference,
            Self::ReasonString(_) => PropertyType::ReasonString,
            Self::ReceiveMaximum(_) => PropertyType::ReceiveMaximum,
            Self::TopicAliasMaximum(_) => PropertyType::TopicAliasMaximum,
            Self::TopicAlias(_) => PropertyType::TopicAlias,
            Self::MaximumQoS(_) => PropertyType::MaximumQoS,
            Self::RetainAvailable(_) => PropertyType::RetainAvailable,
            Self::UserProperty(_) => PropertyType::UserProperty,
            Self::MaximumPacketSize(_) => PropertyType::MaximumPacketSize,
            Self::WildcardSubscriptionAvailable(_) => PropertyType::WildcardSubscriptionAvailable,
            Self::SubscriptionIdentifierAvailable(_) => {
                PropertyType::SubscriptionIdentifierAvailable
            }
            Self::SharedSubscriptionAvailable(_) => PropertyType::SharedSubscriptionAvailable,
        }
    }

    /// Get byte length used in packet, including the identifier byte.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let value_bytes = match self {
            Self::PayloadFormatIndicator(_)
            | Self::RequestProblemInformation(_)
            | Self::RequestResponseInformation(_)
            | Self::RetainAvailable(_)
            | Self::WildcardSubscriptionAvailable(_)
            | Self::SubscriptionIdentifierAvailable(_)
            | Self::SharedSubscriptionAvailable(_) => BoolData::bytes(),
            Self::MaximumQoS(_) => QoS::bytes(),
            Self::ServerKeepAlive(_)
            | Self::ReceiveMaximum(_)
            | Self::TopicAliasMaximum(_)
            | Self::TopicAlias(_) => U16Data::bytes(),
            Self::MessageExpiryInterval(_)
            | Self::SessionExpiryInterval(_)
            | Self::WillDelayInterval(_)
            | Self::MaximumPacketSize(_) => U32Data::bytes(),
            Self::SubscriptionIdentifier(var_int) => var_int.bytes(),
            Self::ContentType(s)
            | Self::AssignedClientIdentifier(s)
            | Self::AuthenticationMethod(s)
            | Self::ResponseInformation(s)
            | Self::ServerReference(s)
            | Self::ReasonString(s) => s.bytes(),
            Self::ResponseTopic(topic) => topic.bytes(),
            Self::CorrelationData(b) | Self::AuthenticationData(b) => b.bytes(),
            Self::UserProperty(pair) => pair.bytes(),
        };
        PropertyType::bytes() + value_bytes
    }
}

impl DecodePacket for Property {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let property_type = PropertyType::try_from(ba.read_byte()?)?;
        match property_type {
            PropertyType::PayloadFormatIndicator => {
                Ok(Self::PayloadFormatIndicator(BoolData::decode(ba)?))
            }
            PropertyType::MessageExpiryInterval => {
                Ok(Self::MessageExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::ContentType => Ok(Self::ContentType(StringData::decode(ba)?)),
            PropertyType::ResponseTopic => Ok(Self::ResponseTopic(PubTopic::decode(ba)?)),
            PropertyType::CorrelationData => Ok(Self::CorrelationData(BinaryData::decode(ba)?)),
            PropertyType::SubscriptionIdentifier => {
                let var_int = VarInt::decode(ba)?;
                if var_int.value() == 0 {
                    // A Subscription Identifier of 0 is a Protocol Error.
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::SubscriptionIdentifier(var_int))
            }
            PropertyType::SessionExpiryInterval => {
                Ok(Self::SessionExpiryInterval(U32Data::decode(ba)?))
            }
            PropertyType::AssignedClientIdentifier => {
                Ok(Self::AssignedClientIdentifier(StringData::decode(ba)?))
            }
            PropertyType::ServerKeepAlive => Ok(Self::ServerKeepAlive(U16Data::decode(ba)?)),
            PropertyType::AuthenticationMethod => {
                Ok(Self::AuthenticationMethod(StringData::decode(ba)?))
            }
            PropertyType::AuthenticationData => {
                Ok(Self::AuthenticationData(BinaryData::decode(ba)?))
            }
            PropertyType::RequestProblemInformation => {
                Ok(Self::RequestProblemInformation(BoolData::decode(ba)?))
            }
            PropertyType::WillDelayInterval => Ok(Self::WillDelayInterval(U32Data::decode(ba)?)),
            PropertyType::RequestResponseInformation => {
                Ok(Self::RequestResponseInformation(BoolData::decode(ba)?))
            }
            PropertyType::ResponseInformation => {
                Ok(Self::ResponseInformation(StringData::decode(ba)?))
            }
            PropertyType::ServerReference => Ok(Self::ServerReference(StringData::decode(ba)?)),
            PropertyType::ReasonString => Ok(Self::ReasonString(StringData::decode(ba)?)),
            PropertyType::ReceiveMaximum => Ok(Self::ReceiveMaximum(U16Data::decode(ba)?)),
            PropertyType::TopicAliasMaximum => Ok(Self::TopicAliasMaximum(U16Data::decode(ba)?)),
            PropertyType::TopicAlias => {
                let alias = U16Data::decode(ba)?;
                if alias.value() == 0 {
                    // A Topic Alias of 0 is a Protocol Error.
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::TopicAlias(alias))
            }
            PropertyType::MaximumQoS => {
                let qos = QoS::try_from(ba.read_byte()?)?;
                if qos == QoS::ExactOnce {
                    // Only 0 and 1 are legal values of Maximum QoS.
                    return Err(DecodeError::InvalidPropertyValue);
                }
                Ok(Self::MaximumQoS(qos))
            }
            PropertyType::RetainAvailable => Ok(Self::RetainAvailable(BoolData::decode(ba)?)),
            PropertyType::UserProperty => Ok(Self::UserProperty(StringPairData::decode(ba)?)),
            PropertyType::MaximumPacketSize => Ok(Self::MaximumPacketSize(U32Data::decode(ba)?)),
            PropertyType::WildcardSubscriptionAvailable => {
                Ok(Self::WildcardSubscriptionAvailable(BoolData::decode(ba)?))
            }
            PropertyType::SubscriptionIdentifierAvailable => Ok(
                Self::SubscriptionIdentifierAvailable(BoolData::decode(ba)?),
            ),
            PropertyType::SharedSubscriptionAvailable => {
                Ok(Self::SharedSubscriptionAvailable(BoolData::decode(ba)?))
            }
        }
    }
}

impl EncodePacket for Property {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.property_type() as u8);
        let value_bytes = match self {
            Self::PayloadFormatIndicator(v)
            | Self::RequestProblemInformation(v)
            | Self::RequestResponseInformation(v)
            | Self::RetainAvailable(v)
            | Self::WildcardSubscriptionAvailable(v)
            | Self::SubscriptionIdentifierAvailable(v)
            | Self::SharedSubscriptionAvailable(v) => v.encode(buf)?,
            Self::MaximumQoS(qos) => {
                buf.push(u8::from(*qos));
                QoS::bytes()
            }
            Self::ServerKeepAlive(v)
            | Self::ReceiveMaximum(v)
            | Self::TopicAliasMaximum(v)
            | Self::TopicAlias(v) => v.encode(buf)?,
            Self::MessageExpiryInterval(v)
            | Self::SessionExpiryInterval(v)
            | Self::WillDelayInterval(v)
            | Self::MaximumPacketSize(v) => v.encode(buf)?,
            Self::SubscriptionIdentifier(v) => v.encode(buf)?,
            Self::ContentType(v)
            | Self::AssignedClientIdentifier(v)
            | Self::AuthenticationMethod(v)
            | Self::ResponseInformation(v)
            | Self::ServerReference(v)
            | Self::ReasonString(v) => v.encode(buf)?,
            Self::ResponseTopic(v) => v.encode(buf)?,
            Self::CorrelationData(v) | Self::AuthenticationData(v) => v.encode(buf)?,
            Self::UserProperty(v) => v.encode(buf)?,
        };
        Ok(PropertyType::bytes() + value_bytes)
    }
}

/// Ordered list of properties with its Variable Byte Integer length prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(Vec<Property>);

impl Properties {
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    #[must_use]
    pub fn props(&self) -> &[Property] {
        &self.0
    }

    pub fn push(&mut self, property: Property) -> &mut Self {
        self.0.push(property);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    fn payload_bytes(&self) -> usize {
        self.0.iter().map(Property::bytes).sum()
    }

    /// Get byte length used in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        let payload_bytes = self.payload_bytes();
        let len_bytes = VarInt::from(payload_bytes).map_or(4, |len| len.bytes());
        len_bytes + payload_bytes
    }

    /// Get first occurrence of `property_type`.
    #[must_use]
    pub fn first_of(&self, property_type: PropertyType) -> Option<&Property> {
        self.0
            .iter()
            .find(|p| p.property_type() == property_type)
    }

    /// Get topic alias value, if present.
    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        if let Some(Property::TopicAlias(alias)) = self.first_of(PropertyType::TopicAlias) {
            Some(alias.value())
        } else {
            None
        }
    }

    /// Get message expiry interval in seconds, if present.
    #[must_use]
    pub fn message_expiry_interval(&self) -> Option<u32> {
        if let Some(Property::MessageExpiryInterval(interval)) =
            self.first_of(PropertyType::MessageExpiryInterval)
        {
            Some(interval.value())
        } else {
            None
        }
    }

    /// Get all user property pairs in their original order.
    #[must_use]
    pub fn user_properties(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter_map(|p| {
                if let Property::UserProperty(pair) = p {
                    Some((pair.name().to_string(), pair.value().to_string()))
                } else {
                    None
                }
            })
            .collect()
    }
}

impl DecodePacket for Properties {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let total_bytes = VarInt::decode(ba)?;
        let end_offset = ba.offset() + total_bytes.value();

        let mut properties = Vec::new();
        while ba.offset() < end_offset {
            properties.push(Property::decode(ba)?);
        }
        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(Self(properties))
    }
}

impl EncodePacket for Properties {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let payload_bytes = self.payload_bytes();
        let len = VarInt::from(payload_bytes).map_err(|_e| EncodeError::InvalidVarInt)?;
        len.encode(buf)?;
        for property in &self.0 {
            property.encode(buf)?;
        }
        Ok(buf.len() - old_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::StringError;

    fn pair(name: &str, value: &str) -> Result<Property, StringError> {
        Ok(Property::UserProperty(StringPairData::from(name, value)?))
    }

    #[test]
    fn test_round_trip_preserves_order_and_duplicates() {
        let mut properties = Properties::new();
        properties
            .push(Property::TopicAlias(U16Data::new(4)))
            .push(pair("region", "cn-north").unwrap())
            .push(pair("region", "cn-south").unwrap())
            .push(Property::MessageExpiryInterval(U32Data::new(30)));

        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = Properties::decode(&mut ba).unwrap();
        assert_eq!(decoded, properties);
        assert_eq!(
            decoded.user_properties(),
            vec![
                ("region".to_string(), "cn-north".to_string()),
                ("region".to_string(), "cn-south".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_block_is_one_byte() {
        let properties = Properties::new();
        let mut buf = Vec::new();
        properties.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x00]);
    }

    #[test]
    fn test_unknown_property_id() {
        // Id 0x7f does not exist.
        let buf = [0x03, 0x7f, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyType)
        );
    }

    #[test]
    fn test_zero_topic_alias_rejected() {
        let buf = [0x03, 0x23, 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            Properties::decode(&mut ba),
            Err(DecodeError::InvalidPropertyValue)
        );
    }

    #[test]
    fn test_check_property_type_list() {
        let mut properties = Properties::new();
        properties.push(Property::TopicAlias(U16Data::new(1)));
        assert!(check_property_type_list(
            properties.props(),
            &[PropertyType::TopicAlias, PropertyType::UserProperty]
        )
        .is_ok());
        assert_eq!(
            check_property_type_list(properties.props(), &[PropertyType::UserProperty]),
            Err(PropertyType::TopicAlias)
        );

        // Repeating a single-occurrence property is invalid.
        properties.push(Property::TopicAlias(U16Data::new(2)));
        assert_eq!(
            check_property_type_list(properties.props(), &[PropertyType::TopicAlias]),
            Err(PropertyType::TopicAlias)
        );
    }
}
