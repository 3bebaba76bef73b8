// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// A Reason Code is a one byte unsigned value that indicates the result of
/// an operation.
///
/// Reason Codes less than 0x80 indicate successful completion of an
/// operation. The normal Reason Code for success is 0. Reason Code values
/// of 0x80 or greater indicate failure. Which codes are legal depends on
/// the packet type; each packet module defines its own `*_REASONS` list.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReasonCode {
    /// Success / Normal disconnection / Granted QoS 0.
    #[default]
    Success = 0x00,

    /// Granted QoS 1.
    GrantedQoS1 = 0x01,

    /// Granted QoS 2.
    GrantedQoS2 = 0x02,

    /// Disconnect with Will Message.
    DisconnectWithWillMessage = 0x04,

    /// No matching subscribers.
    NoMatchingSubscribers = 0x10,

    /// No subscription existed.
    NoSubscriptionExisted = 0x11,

    /// Continue authentication.
    ContinueAuthentication = 0x18,

    /// Re-authenticate.
    ReAuthenticate = 0x19,

    /// Unspecified error.
    UnspecifiedError = 0x80,

    /// Malformed packet.
    MalformedPacket = 0x81,

    /// Protocol error.
    ProtocolError = 0x82,

    /// Implementation specific error.
    ImplementationSpecificError = 0x83,

    /// Unsupported protocol version.
    UnsupportedProtocolVersion = 0x84,

    /// Client identifier not valid.
    ClientIdentifierNotValid = 0x85,

    /// Bad user name or password.
    BadUserNameOrPassword = 0x86,

    /// Not authorized.
    NotAuthorized = 0x87,

    /// Server unavailable.
    ServerUnavailable = 0x88,

    /// Server busy.
    ServerBusy = 0x89,

    /// Banned.
    Banned = 0x8a,

    /// Server shutting down.
    ServerShuttingDown = 0x8b,

    /// Bad authentication method.
    BadAuthenticationMethod = 0x8c,

    /// Keep alive timeout.
    KeepAliveTimeout = 0x8d,

    /// Session taken over.
    SessionTakenOver = 0x8e,

    /// Topic filter invalid.
    TopicFilterInvalid = 0x8f,

    /// Topic name invalid.
    TopicNameInvalid = 0x90,

    /// Packet identifier in use.
    PacketIdentifierInUse = 0x91,

    /// Packet identifier not found.
    PacketIdentifierNotFound = 0x92,

    /// Receive maximum exceeded.
    ReceiveMaximumExceeded = 0x93,

    /// Topic alias invalid.
    TopicAliasInvalid = 0x94,

    /// Packet too large.
    PacketTooLarge = 0x95,

    /// Message rate too high.
    MessageRateTooHigh = 0x96,

    /// Quota exceeded.
    QuotaExceeded = 0x97,

    /// Administrative action.
    AdministrativeAction = 0x98,

    /// Payload format invalid.
    PayloadFormatInvalid = 0x99,

    /// Retain not supported.
    RetainNotSupported = 0x9a,

    /// QoS not supported.
    QoSNotSupported = 0x9b,

    /// Use another server.
    UseAnotherServer = 0x9c,

    /// Server moved.
    ServerMoved = 0x9d,

    /// Shared subscriptions not supported.
    SharedSubscriptionsNotSupported = 0x9e,

    /// Connection rate exceeded.
    ConnectionRateExceeded = 0x9f,

    /// Maximum connect time.
    MaximumConnectTime = 0xa0,

    /// Subscription identifiers not supported.
    SubscriptionIdentifiersNotSupported = 0xa1,

    /// Wildcard subscriptions not supported.
    WildcardSubscriptionsNotSupported = 0xa2,
}

impl ReasonCode {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// Returns true if this code indicates failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        (*self as u8) >= 0x80
    }
}

impl TryFrom<u8> for ReasonCode {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x00 => Ok(Self::Success),
            0x01 => Ok(Self::GrantedQoS1),
            0x02 => Ok(Self::GrantedQoS2),
            0x04 => Ok(Self::DisconnectWithWillMessage),
            0x10 => Ok(Self::NoMatchingSubscribers),
            0x11 => Ok(Self::NoSubscriptionExisted),
            0x18 => Ok(Self::ContinueAuthentication),
            0x19 => Ok(Self::ReAuthenticate),
            0x80 => Ok(Self::UnspecifiedError),
            0x81 => Ok(Self::MalformedPacket),
            0x82 => Ok(Self::ProtocolError),
            0x83 => Ok(Self::ImplementationSpecificError),
            0x84 => Ok(Self::UnsupportedProtocolVersion),
            0x85 => Ok(Self::ClientIdentifierNotValid),
            0x86 => Ok(Self::BadUserNameOrPassword),
            0x87 => Ok(Self::NotAuthorized),
            0x88 => Ok(Self::ServerUnavailable),
            0x89 => Ok(Self::ServerBusy),
            0x8a => Ok(Self::Banned),
            0x8b => Ok(Self::ServerShuttingDown),
            0x8c => Ok(Self::BadAuthenticationMethod),
            0x8d => Ok(Self::KeepAliveTimeout),
            0x8e => Ok(Self::SessionTakenOver),
            0x8f => Ok(Self::TopicFilterInvalid),
            0x90 => Ok(Self::TopicNameInvalid),
            0x91 => Ok(Self::PacketIdentifierInUse),
            0x92 => Ok(Self::PacketIdentifierNotFound),
            0x93 => Ok(Self::ReceiveMaximumExceeded),
            0x94 => Ok(Self::TopicAliasInvalid),
            0x95 => Ok(Self::PacketTooLarge),
            0x96 => Ok(Self::MessageRateTooHigh),
            0x97 => Ok(Self::QuotaExceeded),
            0x98 => Ok(Self::AdministrativeAction),
            0x99 => Ok(Self::PayloadFormatInvalid),
            0x9a => Ok(Self::RetainNotSupported),
            0x9b => Ok(Self::QoSNotSupported),
            0x9c => Ok(Self::UseAnotherServer),
            0x9d => Ok(Self::ServerMoved),
            0x9e => Ok(Self::SharedSubscriptionsNotSupported),
            0x9f => Ok(Self::ConnectionRateExceeded),
            0xa0 => Ok(Self::MaximumConnectTime),
            0xa1 => Ok(Self::SubscriptionIdentifiersNotSupported),
            0xa2 => Ok(Self::WildcardSubscriptionsNotSupported),
            _ => Err(DecodeError::InvalidReasonCode),
        }
    }
}

impl DecodePacket for ReasonCode {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let byte = ba.read_byte()?;
        Self::try_from(byte)
    }
}

impl EncodePacket for ReasonCode {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}
