// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use super::property::check_property_type_list;
use super::{Properties, PropertyType};
use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, ConnectFlags, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, KeepAlive, Packet, PacketType, ProtocolLevel, PubTopic, QoS, StringData,
    VarIntError, PROTOCOL_NAME,
};

/// Properties available in a connect packet.
pub const CONNECT_PROPERTIES: &[PropertyType] = &[
    PropertyType::SessionExpiryInterval,
    PropertyType::ReceiveMaximum,
    PropertyType::MaximumPacketSize,
    PropertyType::TopicAliasMaximum,
    PropertyType::RequestResponseInformation,
    PropertyType::RequestProblemInformation,
    PropertyType::UserProperty,
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
];

/// Properties available in the will block of a connect packet.
pub const CONNECT_WILL_PROPERTIES: &[PropertyType] = &[
    PropertyType::WillDelayInterval,
    PropertyType::PayloadFormatIndicator,
    PropertyType::MessageExpiryInterval,
    PropertyType::ContentType,
    PropertyType::ResponseTopic,
    PropertyType::CorrelationData,
    PropertyType::UserProperty,
];

/// A v5 `ConnectPacket` extends the v3 one with two property blocks.
///
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol name              |
/// |                            |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// |                            |
/// +----------------------------+
/// | Properties ...             |
/// +----------------------------+
/// | Client id                  |
/// |                            |
/// +----------------------------+
/// | Will properties ...        |
/// +----------------------------+
/// | Will topic                 |
/// +----------------------------+
/// | Will payload               |
/// +----------------------------+
/// | Username                   |
/// +----------------------------+
/// | Password                   |
/// +----------------------------+
/// ```
///
/// The payload fields, if present, MUST appear in the order Client
/// Identifier, Will Properties, Will Topic, Will Payload, User Name,
/// Password [MQTT-3.1.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectPacket {
    protocol_name: StringData,

    protocol_level: ProtocolLevel,

    connect_flags: ConnectFlags,

    keep_alive: KeepAlive,

    properties: Properties,

    client_id: StringData,

    will_properties: Properties,

    will_topic: Option<PubTopic>,

    will_message: BinaryData,

    username: StringData,

    password: BinaryData,
}

impl ConnectPacket {
    /// Create a new v5 connect packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        validate_client_id(client_id).map_err(|_err| EncodeError::InvalidClientId)?;
        let protocol_name = StringData::from(PROTOCOL_NAME)?;
        let client_id = StringData::from(client_id)?;
        Ok(Self {
            protocol_name,
            protocol_level: ProtocolLevel::V5,
            keep_alive: KeepAlive::new(60),
            client_id,
            ..Self::default()
        })
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    pub fn set_connect_flags(&mut self, flags: ConnectFlags) -> &mut Self {
        self.connect_flags = flags;
        self
    }

    pub fn set_keep_alive(&mut self, keep_alive: u16) -> &mut Self {
        self.keep_alive = KeepAlive::new(keep_alive);
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive.value()
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.connect_flags.clean_session()
    }

    pub fn set_clean_session(&mut self, clean_session: bool) -> &mut Self {
        self.connect_flags.set_clean_session(clean_session);
        self
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    /// Update client id.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is invalid.
    pub fn set_client_id(&mut self, client_id: &str) -> Result<&mut Self, EncodeError> {
        validate_client_id(client_id).map_err(|_err| EncodeError::InvalidClientId)?;
        self.client_id = StringData::from(client_id)?;
        Ok(self)
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    /// Update username value.
    ///
    /// # Errors
    ///
    /// Returns error if `username` is invalid.
    pub fn set_username(&mut self, username: Option<&str>) -> Result<&mut Self, EncodeError> {
        if let Some(username) = username {
            self.username = StringData::from(username)?;
            self.connect_flags.set_has_username(true);
        } else {
            self.connect_flags.set_has_username(false);
            self.username = StringData::new();
        }
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> &str {
        self.username.as_ref()
    }

    /// Update password value.
    ///
    /// # Errors
    ///
    /// Returns error if `password` is out of range.
    pub fn set_password(&mut self, password: Option<&[u8]>) -> Result<&mut Self, EncodeError> {
        match password {
            Some(password) => {
                self.connect_flags.set_has_password(true);
                self.password = BinaryData::from_slice(password)?;
            }
            None => {
                self.connect_flags.set_has_password(false);
                self.password.clear();
            }
        }
        Ok(self)
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        self.password.as_ref()
    }

    /// Set will topic, payload and flags.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` or `message` is invalid.
    pub fn set_will(
        &mut self,
        topic: &str,
        message: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<&mut Self, EncodeError> {
        self.will_topic = Some(PubTopic::new(topic)?);
        self.will_message = BinaryData::from_slice(message)?;
        self.connect_flags
            .set_will(true)
            .set_will_qos(qos)
            .set_will_retain(retain);
        Ok(self)
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        self.will_message.as_ref()
    }

    #[must_use]
    pub const fn will_properties(&self) -> &Properties {
        &self.will_properties
    }

    pub fn will_properties_mut(&mut self) -> &mut Properties {
        &mut self.will_properties
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.protocol_name.bytes()
            + ProtocolLevel::bytes()
            + ConnectFlags::bytes()
            + KeepAlive::bytes()
            + self.properties.bytes()
            + self.client_id.bytes();

        if self.connect_flags.will() {
            remaining_length += self.will_properties.bytes();
            if let Some(will_topic) = &self.will_topic {
                remaining_length += will_topic.bytes();
            }
            remaining_length += self.will_message.bytes();
        }
        if self.connect_flags.has_username() {
            remaining_length += self.username.bytes();
        }
        if self.connect_flags.has_password() {
            remaining_length += self.password.bytes();
        }

        FixedHeader::new(PacketType::Connect, remaining_length)
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        // Write variable header
        self.protocol_name.encode(v)?;
        self.protocol_level.encode(v)?;
        self.connect_flags.encode(v)?;
        self.keep_alive.encode(v)?;
        self.properties.encode(v)?;

        // Write payload
        self.client_id.encode(v)?;
        if self.connect_flags.will() {
            self.will_properties.encode(v)?;
            if let Some(will_topic) = &self.will_topic {
                will_topic.encode(v)?;
            }
            self.will_message.encode(v)?;
        }
        if self.connect_flags.has_username() {
            self.username.encode(v)?;
        }
        if self.connect_flags.has_password() {
            self.password.encode(v)?;
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }
        let end_offset = ba.offset() + fixed_header.remaining_length();

        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;

        let connect_flags = ConnectFlags::decode(ba)?;
        if !connect_flags.will()
            && (connect_flags.will_qos() != QoS::AtMostOnce || connect_flags.will_retain())
        {
            return Err(DecodeError::InvalidConnectFlags);
        }
        if !connect_flags.has_username() && connect_flags.has_password() {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let keep_alive = KeepAlive::decode(ba)?;

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), CONNECT_PROPERTIES)
        {
            log::error!(
                "v5/ConnectPacket: property type {property_type:?} cannot be used in properties!",
            );
            return Err(DecodeError::InvalidPropertyType);
        }

        let client_id = StringData::decode(ba).map_err(|_err| DecodeError::InvalidClientId)?;
        if client_id.is_empty() && !connect_flags.clean_session() {
            return Err(DecodeError::InvalidClientId);
        }
        validate_client_id(client_id.as_ref()).map_err(|_err| DecodeError::InvalidClientId)?;

        let will_properties = if connect_flags.will() {
            Properties::decode(ba)?
        } else {
            Properties::new()
        };
        if let Err(property_type) =
            check_property_type_list(will_properties.props(), CONNECT_WILL_PROPERTIES)
        {
            log::error!(
                "v5/ConnectPacket: property type {property_type:?} cannot be used in will properties!",
            );
            return Err(DecodeError::InvalidPropertyType);
        }

        let will_topic = if connect_flags.will() {
            Some(PubTopic::decode(ba)?)
        } else {
            None
        };
        let will_message = if connect_flags.will() {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        let username = if connect_flags.has_username() {
            StringData::decode(ba)?
        } else {
            StringData::new()
        };
        let password = if connect_flags.has_password() {
            BinaryData::decode(ba)?
        } else {
            BinaryData::new()
        };

        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            protocol_name,
            protocol_level,
            connect_flags,
            keep_alive,
            properties,
            client_id,
            will_properties,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

impl Packet for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
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
    use crate::U16Data;

    #[test]
    fn test_decode() {
        let buf: Vec<u8> = vec![
            0x10, 0x15, 0x00, 0x04, 0x4d, 0x51, 0x54, 0x54, 0x05, 0x02, 0x00, 0x3c, 0x00, 0x00,
            0x08, 0x77, 0x76, 0x50, 0x54, 0x58, 0x63, 0x43, 0x77,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.client_id(), "wvPTXcCw");
        assert_eq!(packet.protocol_level(), ProtocolLevel::V5);
    }

    #[test]
    fn test_round_trip_with_properties() {
        let mut packet = ConnectPacket::new("tianhe-bridge-01").unwrap();
        packet.set_clean_session(true);
        packet
            .properties_mut()
            .push(Property::TopicAliasMaximum(U16Data::new(16)));
        packet
            .set_will("status/bridge", b"gone", QoS::AtLeastOnce, true)
            .unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(ConnectPacket::decode(&mut ba).unwrap(), packet);
    }

    #[test]
    fn test_illegal_property() {
        // TopicAlias (0x23) is not allowed in CONNECT properties.
        let mut packet = ConnectPacket::new("c1").unwrap();
        packet.set_clean_session(true);
        packet
            .properties_mut()
            .push(Property::TopicAlias(U16Data::new(3)));
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidPropertyType)
        );
    }
}
