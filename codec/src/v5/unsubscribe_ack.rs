// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use super::property::check_property_type_list;
use super::{Properties, PropertyType, ReasonCode};
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, Packet, PacketId,
    PacketType, VarIntError,
};

/// Properties available in an unsubscribe acknowledgement.
pub const UNSUBSCRIBE_ACK_PROPERTIES: &[PropertyType] =
    &[PropertyType::ReasonString, PropertyType::UserProperty];

/// Reason codes available in an unsubscribe acknowledgement.
pub const UNSUBSCRIBE_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoSubscriptionExisted,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::PacketIdentifierInUse,
];

/// `UnsubscribeAckPacket` contains a reason code for every topic filter of
/// the acknowledged `UnsubscribePacket`, in the same order [MQTT-3.11.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UnsubscribeAckPacket {
    packet_id: PacketId,
    properties: Properties,
    reasons: Vec<ReasonCode>,
}

impl UnsubscribeAckPacket {
    #[must_use]
    pub fn new(reason: ReasonCode, packet_id: PacketId) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons: vec![reason],
        }
    }

    #[must_use]
    pub fn with_vec(reasons: Vec<ReasonCode>, packet_id: PacketId) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons,
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

    #[must_use]
    pub fn reasons(&self) -> &[ReasonCode] {
        &self.reasons
    }
}

impl DecodePacket for UnsubscribeAckPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::UnsubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }
        let end_offset = ba.offset() + fixed_header.remaining_length();

        let packet_id = PacketId::decode(ba)?;

        let properties = Properties::decode(ba)?;
        if let Err(property_type) =
            check_property_type_list(properties.props(), UNSUBSCRIBE_ACK_PROPERTIES)
        {
            log::error!(
                "v5/UnsubscribeAckPacket: property type {property_type:?} cannot be used in properties!",
            );
            return Err(DecodeError::InvalidPropertyType);
        }

        let mut reasons = Vec::new();
        while ba.offset() < end_offset {
            let reason_code = ReasonCode::decode(ba)?;
            if !UNSUBSCRIBE_REASONS.contains(&reason_code) {
                return Err(DecodeError::InvalidReasonCode);
            }
            reasons.push(reason_code);
        }

        Ok(Self {
            packet_id,
            properties,
            reasons,
        })
    }
}

impl EncodePacket for UnsubscribeAckPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let remaining_length =
            PacketId::bytes() + self.properties.bytes() + self.reasons.len();
        let fixed_header = FixedHeader::new(PacketType::UnsubscribeAck, remaining_length)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        self.properties.encode(buf)?;
        for reason in &self.reasons {
            reason.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl Packet for UnsubscribeAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubscribeAck
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        let remaining_length =
            PacketId::bytes() + self.properties.bytes() + self.reasons.len();
        let fixed_header = FixedHeader::new(PacketType::UnsubscribeAck, remaining_length)?;
        Ok(fixed_header.bytes() + fixed_header.remaining_length())
    }
}
