// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from the owning listener.

use codec::v5::{Property, ReasonCode};
use codec::{PacketId, ProtocolLevel, QoS, StringData, U16Data};

use super::{Session, Status};
use crate::commands::{ConnectAckResult, ListenerToSessionCmd, SubscribeAckResult};
use crate::error::Error;
use crate::hooks::PublishAckReason;
use crate::message::ApplicationMessage;

impl Session {
    pub(super) async fn handle_listener_cmd(
        &mut self,
        cmd: ListenerToSessionCmd,
    ) -> Result<(), Error> {
        match cmd {
            ListenerToSessionCmd::ConnectAck {
                result,
                assigned_client_id,
            } => self.on_listener_connect_ack(result, assigned_client_id).await,
            ListenerToSessionCmd::PublishAck {
                packet_id,
                qos,
                reason,
                send_ack,
            } => {
                self.on_listener_publish_ack(packet_id, qos, reason, send_ack)
                    .await
            }
            ListenerToSessionCmd::Publish {
                message,
                granted_qos,
                retain,
            } => self.on_listener_publish(&message, granted_qos, retain).await,
            ListenerToSessionCmd::SubscribeAck { packet_id, acks } => {
                self.on_listener_subscribe_ack(packet_id, &acks).await
            }
            ListenerToSessionCmd::UnsubscribeAck { packet_id, existed } => {
                self.on_listener_unsubscribe_ack(packet_id, &existed).await
            }
            ListenerToSessionCmd::Disconnect => {
                // Force close, used when another connect takes over this
                // client id. The will must not fire; the listener already
                // dropped it.
                self.send_disconnect().await
            }
        }
    }

    async fn on_listener_connect_ack(
        &mut self,
        result: ConnectAckResult,
        assigned_client_id: Option<String>,
    ) -> Result<(), Error> {
        let accepted = result.is_accepted();
        let ret = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let (session_present, return_code) = match result {
                    ConnectAckResult::Accepted { session_present } => {
                        (session_present, codec::v3::ConnectReturnCode::Accepted)
                    }
                    ConnectAckResult::UnacceptedProtocol => {
                        (false, codec::v3::ConnectReturnCode::UnacceptedProtocol)
                    }
                    ConnectAckResult::IdentifierRejected => {
                        (false, codec::v3::ConnectReturnCode::IdentifierRejected)
                    }
                    ConnectAckResult::ServerUnavailable => {
                        (false, codec::v3::ConnectReturnCode::ServerUnavailable)
                    }
                    ConnectAckResult::BadUserNameOrPassword => {
                        (false, codec::v3::ConnectReturnCode::BadUserNameOrPassword)
                    }
                    ConnectAckResult::NotAuthorized => {
                        (false, codec::v3::ConnectReturnCode::NotAuthorized)
                    }
                };
                self.send(codec::v3::ConnectAckPacket::new(session_present, return_code))
                    .await
            }
            ProtocolLevel::V5 => {
                let (session_present, reason_code) = match result {
                    ConnectAckResult::Accepted { session_present } => {
                        (session_present, ReasonCode::Success)
                    }
                    ConnectAckResult::UnacceptedProtocol => {
                        (false, ReasonCode::UnsupportedProtocolVersion)
                    }
                    ConnectAckResult::IdentifierRejected => {
                        (false, ReasonCode::ClientIdentifierNotValid)
                    }
                    ConnectAckResult::ServerUnavailable => (false, ReasonCode::ServerUnavailable),
                    ConnectAckResult::BadUserNameOrPassword => {
                        (false, ReasonCode::BadUserNameOrPassword)
                    }
                    ConnectAckResult::NotAuthorized => (false, ReasonCode::NotAuthorized),
                };
                let mut packet = codec::v5::ConnectAckPacket::new(session_present, reason_code);
                if accepted {
                    // If the client connected with a zero length client id,
                    // the server MUST return the assigned one
                    // [MQTT-3.2.2-16].
                    if let Some(client_id) = assigned_client_id {
                        if let Ok(client_id) = StringData::from(&client_id) {
                            packet
                                .properties_mut()
                                .push(Property::AssignedClientIdentifier(client_id));
                        }
                    }
                }
                self.send(packet).await
            }
        };

        if accepted {
            self.status = Status::Connected;
        } else {
            self.status = Status::Disconnected;
        }
        ret
    }

    async fn on_listener_publish_ack(
        &mut self,
        packet_id: PacketId,
        qos: QoS,
        reason: PublishAckReason,
        send_ack: bool,
    ) -> Result<(), Error> {
        if !send_ack || qos == QoS::AtMostOnce {
            return Ok(());
        }
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => match qos {
                // v3 has no error codes in acks; a rejected publish is
                // dropped silently but still acknowledged.
                QoS::AtLeastOnce => self.send(codec::v3::PublishAckPacket::new(packet_id)).await,
                QoS::ExactOnce => {
                    self.send(codec::v3::PublishReceivedPacket::new(packet_id))
                        .await
                }
                QoS::AtMostOnce => Ok(()),
            },
            ProtocolLevel::V5 => {
                let reason_code = map_publish_ack_reason(reason);
                match qos {
                    QoS::AtLeastOnce => {
                        self.send(codec::v5::PublishAckPacket::with_reason(
                            packet_id,
                            reason_code,
                        ))
                        .await
                    }
                    QoS::ExactOnce => {
                        self.send(codec::v5::PublishReceivedPacket::with_reason(
                            packet_id,
                            reason_code,
                        ))
                        .await
                    }
                    QoS::AtMostOnce => Ok(()),
                }
            }
        }
    }

    /// Deliver one message copy to the connected client.
    async fn on_listener_publish(
        &mut self,
        message: &ApplicationMessage,
        granted_qos: QoS,
        retain: bool,
    ) -> Result<(), Error> {
        if self.status != Status::Connected {
            return Ok(());
        }

        // Delivered QoS is the lower of the published and the granted one.
        let qos = message.qos().min(granted_qos);
        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            self.next_packet_id()
        };

        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let packet = message.to_publish_v3(qos, packet_id, retain)?;
                self.send(packet).await
            }
            ProtocolLevel::V5 => {
                let mut packet = message.to_publish_v5(qos, packet_id, retain)?;
                if let Some(alias) = self.next_outbound_alias(message.topic()) {
                    if alias.1 {
                        // Alias already established: elide the topic name.
                        packet.set_topic("")?;
                    }
                    packet
                        .properties_mut()
                        .push(Property::TopicAlias(U16Data::new(alias.0)));
                }
                self.send(packet).await
            }
        }
    }

    /// Pick an outbound topic alias for `topic` within the limit announced
    /// by the client. Returns `(alias, established)`; `established` tells
    /// whether the mapping was already known to the client.
    fn next_outbound_alias(&mut self, topic: &str) -> Option<(u16, bool)> {
        if self.outbound_alias_max == 0 {
            return None;
        }
        if let Some(&alias) = self.outbound_aliases.get(topic) {
            return Some((alias, true));
        }
        let next = u16::try_from(self.outbound_aliases.len()).ok()? + 1;
        if next > self.outbound_alias_max {
            return None;
        }
        self.outbound_aliases.insert(topic.to_string(), next);
        Some((next, false))
    }

    async fn on_listener_subscribe_ack(
        &mut self,
        packet_id: PacketId,
        acks: &[SubscribeAckResult],
    ) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let acks = acks
                    .iter()
                    .map(|ack| match ack {
                        SubscribeAckResult::GrantedQoS(qos) => codec::v3::SubscribeAck::QoS(*qos),
                        SubscribeAckResult::NotAuthorized | SubscribeAckResult::Failed => {
                            codec::v3::SubscribeAck::Failed
                        }
                    })
                    .collect();
                self.send(codec::v3::SubscribeAckPacket::with_vec(acks, packet_id))
                    .await
            }
            ProtocolLevel::V5 => {
                let reasons = acks
                    .iter()
                    .map(|ack| match ack {
                        SubscribeAckResult::GrantedQoS(QoS::AtMostOnce) => ReasonCode::Success,
                        SubscribeAckResult::GrantedQoS(QoS::AtLeastOnce) => ReasonCode::GrantedQoS1,
                        SubscribeAckResult::GrantedQoS(QoS::ExactOnce) => ReasonCode::GrantedQoS2,
                        SubscribeAckResult::NotAuthorized => ReasonCode::NotAuthorized,
                        SubscribeAckResult::Failed => ReasonCode::UnspecifiedError,
                    })
                    .collect();
                self.send(codec::v5::SubscribeAckPacket::with_vec(reasons, packet_id))
                    .await
            }
        }
    }

    async fn on_listener_unsubscribe_ack(
        &mut self,
        packet_id: PacketId,
        existed: &[bool],
    ) -> Result<(), Error> {
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                self.send(codec::v3::UnsubscribeAckPacket::new(packet_id))
                    .await
            }
            ProtocolLevel::V5 => {
                let reasons = existed
                    .iter()
                    .map(|existed| {
                        if *existed {
                            ReasonCode::Success
                        } else {
                            ReasonCode::NoSubscriptionExisted
                        }
                    })
                    .collect();
                self.send(codec::v5::UnsubscribeAckPacket::with_vec(
                    reasons, packet_id,
                ))
                .await
            }
        }
    }
}

const fn map_publish_ack_reason(reason: PublishAckReason) -> ReasonCode {
    match reason {
        PublishAckReason::Success => ReasonCode::Success,
        PublishAckReason::NotAuthorized => ReasonCode::NotAuthorized,
        PublishAckReason::TopicAliasInvalid => ReasonCode::TopicAliasInvalid,
        PublishAckReason::PacketTooLarge => ReasonCode::PacketTooLarge,
        PublishAckReason::UnspecifiedError => ReasonCode::UnspecifiedError,
    }
}
