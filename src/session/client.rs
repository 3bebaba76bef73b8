// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for packets arriving from the client.

use bytes::Bytes;

use codec::v5::PropertyType;
use codec::{ByteArray, DecodeError, DecodePacket, PacketId, ProtocolLevel, QoS, VarInt};

use super::{Session, Status};
use crate::commands::{ConnectData, SessionToListenerCmd, WillMessage};
use crate::error::{Error, ErrorKind};
use crate::message::{ApplicationMessage, MessageMetadata, SourceProtocol};

impl Session {
    pub(super) async fn on_client_connect(&mut self, frame: &[u8]) -> Result<(), Error> {
        // A client can only send the CONNECT packet once over a network
        // connection. A second one is a protocol violation [MQTT-3.1.0-2].
        if self.status != Status::Invalid {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("session {}: got second connect packet", self.id),
            ));
        }

        // The connect packet size is bounded before its body is parsed;
        // oversized ones are dropped without a CONNACK.
        if frame.len() > self.config.max_message_size() + 1024 {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("session {}: connect packet too large", self.id),
            ));
        }

        let protocol_level = peek_protocol_level(frame)?;
        let data = match protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => self.parse_connect_v3(frame),
            ProtocolLevel::V5 => self.parse_connect_v5(frame),
        };
        let data = match data {
            Ok(data) => data,
            Err(err) => {
                if err.kind() == ErrorKind::ProtocolError {
                    // The Server MUST respond with CONNACK return code 0x01
                    // (unacceptable protocol level) and then disconnect the
                    // client [MQTT-3.1.2-2].
                    let ack_packet = codec::v3::ConnectAckPacket::new(
                        false,
                        codec::v3::ConnectReturnCode::UnacceptedProtocol,
                    );
                    self.status = Status::Connecting;
                    let _ret = self.send(ack_packet).await;
                    self.status = Status::Disconnected;
                }
                return Err(err);
            }
        };

        self.protocol_level = data.protocol_level;
        self.client_id = data.client_id.clone();
        self.clean_session = data.clean_session;
        self.keep_alive = u64::from(data.keep_alive);
        self.status = Status::Connecting;

        self.sender
            .send(SessionToListenerCmd::Connect(self.id, data))
            .await
            .map(drop)?;
        Ok(())
    }

    fn parse_connect_v3(&mut self, frame: &[u8]) -> Result<ConnectData, Error> {
        let mut ba = ByteArray::new(frame);
        let packet = codec::v3::ConnectPacket::decode(&mut ba).map_err(map_connect_error)?;

        let (client_id, assigned_client_id) = assign_client_id(packet.client_id());
        let will = if packet.connect_flags().will() {
            packet.will_topic().map(|topic| WillMessage {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(packet.will_message()),
                qos: packet.connect_flags().will_qos(),
                retain: packet.connect_flags().will_retain(),
            })
        } else {
            None
        };

        Ok(ConnectData {
            protocol_level: packet.protocol_level(),
            client_id,
            assigned_client_id,
            clean_session: packet.clean_session(),
            keep_alive: packet.keep_alive(),
            username: flag_option(
                packet.connect_flags().has_username(),
                packet.username().to_string(),
            ),
            password: flag_option(
                packet.connect_flags().has_password(),
                packet.password().to_vec(),
            ),
            will,
        })
    }

    fn parse_connect_v5(&mut self, frame: &[u8]) -> Result<ConnectData, Error> {
        let mut ba = ByteArray::new(frame);
        let packet = codec::v5::ConnectPacket::decode(&mut ba).map_err(map_connect_error)?;

        // Remember how many aliases the client accepts for outbound
        // publishes.
        if let Some(codec::v5::Property::TopicAliasMaximum(max)) = packet
            .properties()
            .first_of(PropertyType::TopicAliasMaximum)
        {
            self.outbound_alias_max = max.value();
        }

        let (client_id, assigned_client_id) = assign_client_id(packet.client_id());
        let will = if packet.connect_flags().will() {
            packet.will_topic().map(|topic| WillMessage {
                topic: topic.to_string(),
                payload: Bytes::copy_from_slice(packet.will_message()),
                qos: packet.connect_flags().will_qos(),
                retain: packet.connect_flags().will_retain(),
            })
        } else {
            None
        };

        Ok(ConnectData {
            protocol_level: packet.protocol_level(),
            client_id,
            assigned_client_id,
            clean_session: packet.clean_session(),
            keep_alive: packet.keep_alive(),
            username: flag_option(
                packet.connect_flags().has_username(),
                packet.username().to_string(),
            ),
            password: flag_option(
                packet.connect_flags().has_password(),
                packet.password().to_vec(),
            ),
            will,
        })
    }

    pub(super) async fn on_client_publish(&mut self, frame: &[u8]) -> Result<(), Error> {
        let (message, packet_id, qos) = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut ba = ByteArray::new(frame);
                let packet = codec::v3::PublishPacket::decode(&mut ba)?;
                let message = ApplicationMessage::from_publish_v3(
                    &self.client_id,
                    SourceProtocol::Mqtt,
                    &packet,
                );
                (message, packet.packet_id(), packet.qos())
            }
            ProtocolLevel::V5 => {
                let mut ba = ByteArray::new(frame);
                let packet = codec::v5::PublishPacket::decode(&mut ba)?;
                let Some(topic) = self.resolve_publish_topic(&packet) else {
                    // Unknown alias: answer with reason 0x94, drop the
                    // publish, keep the connection.
                    self.send_alias_invalid_ack(packet.packet_id(), packet.qos())
                        .await?;
                    return Ok(());
                };
                let message = ApplicationMessage::from_publish_v5(
                    &self.client_id,
                    SourceProtocol::Mqtt,
                    &topic,
                    &packet,
                );
                (message, packet.packet_id(), packet.qos())
            }
        };

        if qos == QoS::ExactOnce {
            // Already received and answered with PUBREC, but not released
            // yet: this is a retransmission, do not dispatch again.
            if !self.pub_recv_packets.insert(packet_id) {
                return self
                    .send(codec::v3::PublishReceivedPacket::new(packet_id))
                    .await;
            }
        }

        self.sender
            .send(SessionToListenerCmd::Publish(self.id, packet_id, message))
            .await
            .map(drop)?;
        Ok(())
    }

    /// Resolve the effective topic of a v5 publish through the inbound
    /// alias table. Returns None when an unknown alias is referenced.
    fn resolve_publish_topic(&mut self, packet: &codec::v5::PublishPacket) -> Option<String> {
        let Some(alias) = packet.properties().topic_alias() else {
            return Some(packet.topic().to_string());
        };
        if packet.topic().is_empty() {
            self.inbound_aliases.get(&alias).cloned()
        } else {
            self.inbound_aliases
                .insert(alias, packet.topic().to_string());
            Some(packet.topic().to_string())
        }
    }

    async fn send_alias_invalid_ack(
        &mut self,
        packet_id: PacketId,
        qos: QoS,
    ) -> Result<(), Error> {
        log::warn!(
            "session {}: publish with unknown topic alias from {}",
            self.id,
            self.client_id
        );
        match qos {
            QoS::AtMostOnce => Ok(()),
            QoS::AtLeastOnce => {
                self.send(codec::v5::PublishAckPacket::with_reason(
                    packet_id,
                    codec::v5::ReasonCode::TopicAliasInvalid,
                ))
                .await
            }
            QoS::ExactOnce => {
                self.send(codec::v5::PublishReceivedPacket::with_reason(
                    packet_id,
                    codec::v5::ReasonCode::TopicAliasInvalid,
                ))
                .await
            }
        }
    }

    /// Client acknowledged one of our `QoS` 1 deliveries.
    pub(super) fn on_client_publish_ack(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let packet = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                codec::v3::PublishAckPacket::decode(&mut ba)?.packet_id()
            }
            ProtocolLevel::V5 => codec::v5::PublishAckPacket::decode(&mut ba)?.packet_id(),
        };
        log::trace!("session {}: puback for {packet}", self.id);
        Ok(())
    }

    /// Client received one of our `QoS` 2 deliveries; release it.
    pub(super) async fn on_client_publish_received(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let packet_id = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                codec::v3::PublishReceivedPacket::decode(&mut ba)?.packet_id()
            }
            ProtocolLevel::V5 => codec::v5::PublishReceivedPacket::decode(&mut ba)?.packet_id(),
        };
        self.send(codec::v3::PublishReleasePacket::new(packet_id))
            .await
    }

    /// Third leg of an inbound `QoS` 2 exchange.
    pub(super) async fn on_client_publish_release(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let packet_id = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                codec::v3::PublishReleasePacket::decode(&mut ba)?.packet_id()
            }
            ProtocolLevel::V5 => codec::v5::PublishReleasePacket::decode(&mut ba)?.packet_id(),
        };
        let known = self.pub_recv_packets.remove(&packet_id);
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                self.send(codec::v3::PublishCompletePacket::new(packet_id))
                    .await
            }
            ProtocolLevel::V5 => {
                let packet = if known {
                    codec::v5::PublishCompletePacket::new(packet_id)
                } else {
                    codec::v5::PublishCompletePacket::with_reason(
                        packet_id,
                        codec::v5::ReasonCode::PacketIdentifierNotFound,
                    )
                };
                self.send(packet).await
            }
        }
    }

    pub(super) fn on_client_publish_complete(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let packet_id = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                codec::v3::PublishCompletePacket::decode(&mut ba)?.packet_id()
            }
            ProtocolLevel::V5 => codec::v5::PublishCompletePacket::decode(&mut ba)?.packet_id(),
        };
        log::trace!("session {}: pubcomp for {packet_id}", self.id);
        Ok(())
    }

    pub(super) async fn on_client_subscribe(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let (packet_id, topics) = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let packet = codec::v3::SubscribePacket::decode(&mut ba)?;
                let topics = packet
                    .topics()
                    .iter()
                    .map(|topic| (topic.topic().as_ref().to_string(), topic.qos()))
                    .collect();
                (packet.packet_id(), topics)
            }
            ProtocolLevel::V5 => {
                let packet = codec::v5::SubscribePacket::decode(&mut ba)?;
                let topics = packet
                    .topics()
                    .iter()
                    .map(|topic| (topic.topic().as_ref().to_string(), topic.qos()))
                    .collect();
                (packet.packet_id(), topics)
            }
        };

        self.sender
            .send(SessionToListenerCmd::Subscribe(self.id, packet_id, topics))
            .await
            .map(drop)?;
        Ok(())
    }

    pub(super) async fn on_client_unsubscribe(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let (packet_id, topics) = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let packet = codec::v3::UnsubscribePacket::decode(&mut ba)?;
                let topics = packet
                    .topics()
                    .iter()
                    .map(|topic| topic.as_ref().to_string())
                    .collect();
                (packet.packet_id(), topics)
            }
            ProtocolLevel::V5 => {
                let packet = codec::v5::UnsubscribePacket::decode(&mut ba)?;
                let topics = packet
                    .topics()
                    .iter()
                    .map(|topic| topic.as_ref().to_string())
                    .collect();
                (packet.packet_id(), topics)
            }
        };

        self.sender
            .send(SessionToListenerCmd::Unsubscribe(
                self.id, packet_id, topics,
            ))
            .await
            .map(drop)?;
        Ok(())
    }

    pub(super) async fn on_client_ping(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let _packet = codec::v3::PingRequestPacket::decode(&mut ba)?;
        self.send(codec::v3::PingResponsePacket::new()).await
    }

    pub(super) fn on_client_disconnect(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let _packet = codec::v3::DisconnectPacket::decode(&mut ba)?;
                // A v3 disconnect always discards the will message
                // [MQTT-3.14.4-3].
                self.clean_disconnect = true;
            }
            ProtocolLevel::V5 => {
                let packet = codec::v5::DisconnectPacket::decode(&mut ba)?;
                // Reason 0x00 discards the will; any other reason keeps it
                // for publishing [MQTT-3.14.4-3].
                self.clean_disconnect =
                    packet.reason_code() == codec::v5::ReasonCode::Success;
            }
        }
        self.status = Status::Disconnected;
        Ok(())
    }
}

fn flag_option<T>(present: bool, value: T) -> Option<T> {
    if present {
        Some(value)
    } else {
        None
    }
}

/// Generate a client id when the client sent an empty one [MQTT-3.1.3-6].
fn assign_client_id(client_id: &str) -> (String, bool) {
    if client_id.is_empty() {
        (codec::utils::random_client_id("tianhe-"), true)
    } else {
        (client_id.to_string(), false)
    }
}

fn map_connect_error(err: DecodeError) -> Error {
    match err {
        DecodeError::InvalidProtocolName | DecodeError::InvalidProtocolLevel => Error::from_string(
            ErrorKind::ProtocolError,
            format!("unsupported protocol: {err:?}"),
        ),
        _ => err.into(),
    }
}

/// Read the protocol level byte of a connect packet without parsing the
/// whole body. It sits right behind the fixed header and the 6 bytes of
/// the protocol name field.
fn peek_protocol_level(frame: &[u8]) -> Result<ProtocolLevel, Error> {
    let mut ba = ByteArray::new(frame);
    let _packet_type = ba.read_byte().map_err(codec::DecodeError::from)?;
    let _remaining_length = VarInt::decode(&mut ba)?;
    let _protocol_name = codec::StringData::decode(&mut ba)?;
    let level = ba.read_byte().map_err(codec::DecodeError::from)?;
    ProtocolLevel::try_from(level).map_err(|_err| {
        Error::from_string(
            ErrorKind::ProtocolError,
            format!("unsupported protocol level: {level}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_protocol_level() {
        let mut packet = codec::v3::ConnectPacket::new("pk").unwrap();
        packet.set_clean_session(true);
        let mut buf = Vec::new();
        use codec::EncodePacket;
        packet.encode(&mut buf).unwrap();
        assert_eq!(peek_protocol_level(&buf).unwrap(), ProtocolLevel::V311);

        let packet = codec::v5::ConnectPacket::new("pk").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf).unwrap();
        assert_eq!(peek_protocol_level(&buf).unwrap(), ProtocolLevel::V5);
    }

    #[test]
    fn test_assign_client_id() {
        let (id, assigned) = assign_client_id("device-7");
        assert_eq!(id, "device-7");
        assert!(!assigned);

        let (id, assigned) = assign_client_id("");
        assert!(id.starts_with("tianhe-"));
        assert!(assigned);
    }
}
