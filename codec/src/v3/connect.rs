// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::utils::validate_client_id;
use crate::{
    BinaryData, ByteArray, ConnectFlags, DecodeError, DecodePacket, EncodeError, EncodePacket,
    FixedHeader, KeepAlive, Packet, PacketType, ProtocolLevel, PubTopic, QoS, StringData,
    VarIntError, PROTOCOL_NAME,
};

/// `ConnectPacket` is the first packet sent from the Client to the Server
/// after a Network Connection is established [MQTT-3.1.0-1].
///
/// Basic structure of the packet:
/// ```txt
///  7                          0
/// +----------------------------+
/// | Fixed header               |
/// |                            |
/// +----------------------------+
/// | Protocol name length       |
/// |                            |
/// +----------------------------+
/// | Protocol name ...          |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// |                            |
/// +----------------------------+
/// | Client id length           |
/// |                            |
/// +----------------------------+
/// | Client id string ...       |
/// +----------------------------+
/// | Will topic length          |
/// |                            |
/// +----------------------------+
/// | Will topic string ...      |
/// +----------------------------+
/// | Will message length        |
/// |                            |
/// +----------------------------+
/// | Will message bytes ...     |
/// +----------------------------+
/// | Username length            |
/// |                            |
/// +----------------------------+
/// | Username string ...        |
/// +----------------------------+
/// | Password length            |
/// |                            |
/// +----------------------------+
/// | Password bytes ...         |
/// +----------------------------+
/// ```
///
/// The payload fields, if present, MUST appear in the order Client
/// Identifier, Will Topic, Will Message, User Name, Password
/// [MQTT-3.1.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectPacket {
    /// Protocol name can only be `MQTT` in specification.
    protocol_name: StringData,

    protocol_level: ProtocolLevel,

    connect_flags: ConnectFlags,

    /// Time interval measured in seconds.
    ///
    /// A value of zero turns off the keep alive mechanism.
    keep_alive: KeepAlive,

    /// Identifies the Client to the Server. The ClientID MUST be used by
    /// Clients and by Servers to identify state that they hold relating to
    /// this MQTT Session [MQTT-3.1.3-2].
    ///
    /// A zero length client id is accepted; the Server then assigns
    /// a unique one [MQTT-3.1.3-6].
    client_id: StringData,

    /// Topic of the Will Message, present iff the will flag is set.
    will_topic: Option<PubTopic>,

    /// Payload of the Will Message, present iff the will flag is set.
    will_message: BinaryData,

    /// Present iff the username flag is set.
    username: StringData,

    /// Present iff the password flag is set.
    password: BinaryData,
}

impl ConnectPacket {
    /// Create a new connect packet with `client_id`.
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
            keep_alive: KeepAlive::new(60),
            client_id,
            ..Self::default()
        })
    }

    pub fn set_protocol_level(&mut self, level: ProtocolLevel) -> &mut Self {
        self.protocol_level = level;
        self
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    pub fn set_connect_flags(&mut self, flags: ConnectFlags) -> &mut Self {
        self.connect_flags = flags;
        self
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
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

    /// Set will topic and message and raise the will flag.
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

    fn get_fixed_header(&self) -> Result<FixedHeader, VarIntError> {
        let mut remaining_length = self.protocol_name.bytes()
            + ProtocolLevel::bytes()
            + ConnectFlags::bytes()
            + KeepAlive::bytes()
            + self.client_id.bytes();

        if self.connect_flags.will() {
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

        // Write payload
        self.client_id.encode(v)?;
        if self.connect_flags.will() {
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

        // A Server which supports multiple protocols uses the Protocol Name
        // to determine whether the data is MQTT [MQTT-3.1.2-1].
        let protocol_name = StringData::decode(ba)?;
        if protocol_name.as_ref() != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }

        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;

        let connect_flags = ConnectFlags::decode(ba)?;
        // If the Will Flag is set to 0, then Will QoS MUST be 0 and Will
        // Retain MUST be 0 [MQTT-3.1.2-13].
        if !connect_flags.will()
            && (connect_flags.will_qos() != QoS::AtMostOnce || connect_flags.will_retain())
        {
            return Err(DecodeError::InvalidConnectFlags);
        }
        // If the User Name Flag is set to 0, the Password Flag MUST be
        // set to 0 [MQTT-3.1.2-22].
        if !connect_flags.has_username() && connect_flags.has_password() {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let keep_alive = KeepAlive::decode(ba)?;

        let client_id = StringData::decode(ba).map_err(|_err| DecodeError::InvalidClientId)?;
        // A zero length client id requires a clean session [MQTT-3.1.3-7].
        if client_id.is_empty() && !connect_flags.clean_session() {
            return Err(DecodeError::InvalidClientId);
        }
        validate_client_id(client_id.as_ref()).map_err(|_err| DecodeError::InvalidClientId)?;

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
            client_id,
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

    #[test]
    fn test_decode() {
        let buf: Vec<u8> = vec![
            0x10, 0x14, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x3c, 0x00, 0x08,
            0x77, 0x76, 0x50, 0x54, 0x58, 0x63, 0x43, 0x77,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.protocol_level(), ProtocolLevel::V311);
        assert_eq!(packet.client_id(), "wvPTXcCw");
        assert!(packet.clean_session());
        assert_eq!(packet.keep_alive(), 60);
    }

    #[test]
    fn test_round_trip_with_will() {
        let mut packet = ConnectPacket::new("b").unwrap();
        packet.set_clean_session(true);
        packet
            .set_will("home/light", b"offline", QoS::AtLeastOnce, true)
            .unwrap();
        packet.set_username(Some("user")).unwrap();
        packet.set_password(Some(b"passwd")).unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.will_topic(), Some("home/light"));
        assert_eq!(decoded.will_message(), b"offline");
    }

    #[test]
    fn test_invalid_protocol_name() {
        let buf: Vec<u8> = vec![
            0x10, 0x0c, 0x00, 0x04, b'M', b'Q', b'T', b'X', 0x04, 0x02, 0x00, 0x3c, 0x00, 0x00,
        ];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba),
            Err(DecodeError::InvalidProtocolName)
        );
    }
}
