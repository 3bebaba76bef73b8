// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use super::property::check_property_type_list;
use super::{Properties, PropertyType, ReasonCode};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, VarIntError,
};

/// Properties available in a publish received packet.
pub const PUBLISH_RECEIVED_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// Reason codes available in a publish received packet.
pub const PUBLISH_RECEIVED_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoMatchingSubscribers,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::TopicAliasInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::PayloadFormatInvalid,
];

/// `PublishReceivedPacket` is the response to a v5 `PublishPacket` with
/// `QoS` 2, the second packet of the `QoS` 2 exchange.
///
/// Like `PublishAckPacket` it has a 2-byte short form when the reason is
/// Success and there are no properties.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReceivedPacket {
    packet_id: PacketId,
    reason_code: ReasonCode,
    properties: Properties,
}

impl PublishReceivedPacket {
    #[must_use]
    pub fn new(packet_id: PacketId) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::Success,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_reason(packet_id: PacketId, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub const fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    fn remaining_length(&self) -> usize {
        if self.reason_code == ReasonCode::Success && self.properties.is_empty() {
            PacketId::bytes()
        } else {
            PacketId::bytes() + ReasonCode::bytes() + self.properties.bytes()
        }
    }
}

impl EncodePacket for PublishReceivedPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = FixedHeader::new(PacketType::PublishReceived, self.remaining_length())?;
        fixed_header.encode(v)?;
        self.packet_id.encode(v)?;
        if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
            self.reason_code.encode(v)?;
            self.properties.encode(v)?;
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for PublishReceivedPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PublishReceived {
            return Err(DecodeError::InvalidPacketType);
        }
        let end_offset = ba.offset() + fixed_header.remaining_length();

        let packet_id = PacketId::decode(ba)?;
        let reason_code = if ba.offset() < end_offset {
            let reason_code = ReasonCode::decode(ba)?;
            if !PUBLISH_RECEIVED_REASONS.contains(&reason_code) {
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
        if let Err(property_type) =
            check_property_type_list(properties.props(), PUBLISH_RECEIVED_PROPERTIES)
        {
            log::error!(
                "v5/PublishReceivedPacket: property type {property_type:?} cannot be used in properties!",
            );
            return Err(DecodeError::InvalidPropertyType);
        }

        if ba.offset() != end_offset {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            packet_id,
            reason_code,
            properties,
        })
    }
}

impl Packet for PublishReceivedPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PublishReceived
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let fixed_header = FixedHeader::new(PacketType::PublishReceived, self.remaining_length())?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}
