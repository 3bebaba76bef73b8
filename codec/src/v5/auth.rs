// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use super::property::check_property_type_list;
use super::{Properties, PropertyType, ReasonCode};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet,
    PacketType, VarIntError,
};

/// Properties available in an auth packet.
pub const AUTH_PROPERTIES: &[PropertyType] = &[
    PropertyType::AuthenticationMethod,
    PropertyType::AuthenticationData,
    PropertyType::ReasonString,
    PropertyType::UserProperty,
];

/// Reason codes available in an auth packet.
pub const AUTH_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::ContinueAuthentication,
    ReasonCode::ReAuthenticate,
];

/// An `AuthPacket` is sent from Client to Server or Server to Client as part
/// of an extended authentication exchange. MQTT 5.0 only.
///
/// A remaining length of 0 is equivalent to reason code 0x00 (Success).
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthPacket {
    reason_code: ReasonCode,
    properties: Properties,
}

impl AuthPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    fn remaining_length(&self) -> usize {
        if self.reason_code == ReasonCode::Success && self.properties.is_empty() {
            0
        } else {
            ReasonCode::bytes() + self.properties.bytes()
        }
    }
}

impl EncodePacket for AuthPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = FixedHeader::new(PacketType::Auth, self.remaining_length())?;
        fixed_header.encode(v)?;
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            self.reason_code.encode(v)?;
            self.properties.encode(v)?;
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for AuthPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Auth {
            return Err(DecodeError::InvalidPacketType);
        }
        let end_offset = ba.offset() + fixed_header.remaining_length();

        let reason_code = if ba.offset() < end_offset {
            let reason_code = ReasonCode::decode(ba)?;
            if !AUTH_REASONS.contains(&reason_code) {
                return Err(DecodeError::InvalidReasonCode);
            }
            reason_code
        } else {
            ReasonCode::Success
        };
        let properties = if ba.offset() < end_offset {
            Properties::decode(ba)?
        } else {
            Properties::new()
        };
        if let Err(property_type) = check_property_type_list(properties.props(), AUTH_PROPERTIES) {
            log::error!(
                "v5/AuthPacket: property type {property_type:?} cannot be used in properties!",
            );
            return Err(DecodeError::InvalidPropertyType);
        }

        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            reason_code,
            properties,
        })
    }
}

impl Packet for AuthPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Auth
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(PacketType::Auth, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}
