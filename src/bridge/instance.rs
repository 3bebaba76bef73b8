// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! One bridge connection: a long-lived MQTT client session to a remote
//! broker with automatic reconnect.

use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};

use codec::{
    ByteArray, DecodePacket, EncodePacket, FixedHeader, PacketId, PacketType, ProtocolLevel, QoS,
};

use super::rule::Rule;
use super::stream::BridgeStream;
use super::BridgeInstanceCmd;
use crate::commands::BridgeToDispatcherCmd;
use crate::config;
use crate::error::{Error, ErrorKind};
use crate::message::{ApplicationMessage, SourceProtocol};
use crate::session::frame_length;

/// Why the connected phase ended.
enum ConnectedExit {
    /// Transport failed or remote closed; reconnect after the delay.
    Reconnect,

    /// The server is shutting down.
    Shutdown,
}

pub struct BridgeInstance {
    config: config::Bridge,
    upstream_rules: Vec<Rule>,
    downstream_rules: Vec<Rule>,

    packet_id_counter: u16,

    dispatcher_sender: Sender<BridgeToDispatcherCmd>,
    receiver: Receiver<BridgeInstanceCmd>,
}

impl BridgeInstance {
    #[must_use]
    pub fn new(
        config: config::Bridge,
        dispatcher_sender: Sender<BridgeToDispatcherCmd>,
        receiver: Receiver<BridgeInstanceCmd>,
    ) -> Self {
        let upstream_rules = parse_rules(&config.upstream_rules, config.qos, &config.name);
        let downstream_rules = parse_rules(&config.downstream_rules, config.qos, &config.name);
        Self {
            config,
            upstream_rules,
            downstream_rules,
            packet_id_counter: 0,
            dispatcher_sender,
            receiver,
        }
    }

    pub async fn run_loop(mut self) {
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);
        loop {
            match self.connect().await {
                Ok(mut stream) => {
                    log::info!(
                        "bridge {}: connected to {}",
                        self.config.name,
                        self.config.remote_address()
                    );
                    match self.run_connected(&mut stream).await {
                        Ok(ConnectedExit::Shutdown) => return,
                        Ok(ConnectedExit::Reconnect) => (),
                        Err(err) => {
                            log::warn!(
                                "bridge {}: connection lost: {err}, will reconnect",
                                self.config.name
                            );
                        }
                    }
                }
                Err(err) => {
                    log::warn!(
                        "bridge {}: connect to {} failed: {err}",
                        self.config.name,
                        self.config.remote_address()
                    );
                }
            }

            // While disconnected, forward-path messages are dropped; only
            // the shutdown command is honored.
            if self.wait_reconnect(reconnect_delay).await {
                return;
            }
        }
    }

    /// Sleep until the next reconnect attempt, discarding pipeline traffic.
    /// Returns true on shutdown.
    async fn wait_reconnect(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                () = tokio::time::sleep_until(deadline) => return false,
                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(BridgeInstanceCmd::Shutdown) | None => return true,
                        Some(_cmd) => (),
                    }
                }
            }
        }
    }

    fn next_packet_id(&mut self) -> PacketId {
        crate::session::next_packet_id(&mut self.packet_id_counter)
    }

    /// Open the transport and run the connect handshake.
    async fn connect(&mut self) -> Result<BridgeStream, Error> {
        let timeout = Duration::from_secs(self.config.connection_timeout_seconds);
        let mut stream = tokio::time::timeout(
            timeout,
            BridgeStream::connect(
                &self.config.remote_host,
                self.config.remote_port,
                self.config.use_tls,
            ),
        )
        .await
        .map_err(|_elapsed| {
            Error::from_string(
                ErrorKind::BridgeError,
                format!("bridge {}: connect timed out", self.config.name),
            )
        })??;

        let mut buf = Vec::new();
        match self.config.protocol_version {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let mut packet = codec::v3::ConnectPacket::new(&self.config.client_id)?;
                packet.set_clean_session(true);
                packet.set_keep_alive(self.config.keep_alive_seconds);
                packet.set_username(self.config.username.as_deref())?;
                packet.set_password(self.config.password.as_deref().map(str::as_bytes))?;
                packet.encode(&mut buf)?;
            }
            ProtocolLevel::V5 => {
                let mut packet = codec::v5::ConnectPacket::new(&self.config.client_id)?;
                packet.set_clean_session(true);
                packet.set_keep_alive(self.config.keep_alive_seconds);
                packet.set_username(self.config.username.as_deref())?;
                packet.set_password(self.config.password.as_deref().map(str::as_bytes))?;
                packet.encode(&mut buf)?;
            }
        }
        stream.write(&buf).await?;

        let frame = tokio::time::timeout(timeout, read_one_frame(&mut stream))
            .await
            .map_err(|_elapsed| {
                Error::from_string(
                    ErrorKind::BridgeError,
                    format!("bridge {}: connack timed out", self.config.name),
                )
            })??;
        self.check_connect_ack(&frame)?;
        Ok(stream)
    }

    fn check_connect_ack(&self, frame: &[u8]) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        match self.config.protocol_version {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let packet = codec::v3::ConnectAckPacket::decode(&mut ba)?;
                if packet.return_code() == codec::v3::ConnectReturnCode::Accepted {
                    Ok(())
                } else {
                    Err(Error::from_string(
                        ErrorKind::BridgeError,
                        format!(
                            "bridge {}: connect rejected: {:?}",
                            self.config.name,
                            packet.return_code()
                        ),
                    ))
                }
            }
            ProtocolLevel::V5 => {
                let packet = codec::v5::ConnectAckPacket::decode(&mut ba)?;
                if packet.reason_code() == codec::v5::ReasonCode::Success {
                    Ok(())
                } else {
                    Err(Error::from_string(
                        ErrorKind::BridgeError,
                        format!(
                            "bridge {}: connect rejected: {:?}",
                            self.config.name,
                            packet.reason_code()
                        ),
                    ))
                }
            }
        }
    }

    async fn run_connected(&mut self, stream: &mut BridgeStream) -> Result<ConnectedExit, Error> {
        self.subscribe_downstream(stream).await?;

        if self.config.sync_retained_messages {
            self.dispatcher_sender
                .send(BridgeToDispatcherCmd::RetainedSnapshotRequest {
                    bridge_name: self.config.name.clone(),
                })
                .await
                .map(drop)?;
        }

        let keep_alive = u64::from(self.config.keep_alive_seconds);
        let mut ping = tokio::time::interval(Duration::from_secs(keep_alive.max(10)));
        // The first tick fires immediately; skip it.
        ping.tick().await;

        let mut buf = Vec::with_capacity(4096);
        loop {
            tokio::select! {
                ret = stream.read_buf(&mut buf) => {
                    match ret {
                        Ok(0) => return Ok(ConnectedExit::Reconnect),
                        Ok(_n) => self.process_buffer(stream, &mut buf).await?,
                        Err(err) => return Err(err),
                    }
                }
                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(BridgeInstanceCmd::Publish(message)) => {
                            self.forward_upstream(stream, &message, false).await?;
                        }
                        Some(BridgeInstanceCmd::RetainedSnapshot(messages)) => {
                            log::info!(
                                "bridge {}: syncing {} retained messages upstream",
                                self.config.name,
                                messages.len()
                            );
                            for message in messages {
                                self.forward_upstream(stream, &message, true).await?;
                            }
                        }
                        Some(BridgeInstanceCmd::Shutdown) | None => {
                            let mut out = Vec::new();
                            codec::v3::DisconnectPacket::new().encode(&mut out)?;
                            let _ret = stream.write(&out).await;
                            return Ok(ConnectedExit::Shutdown);
                        }
                    }
                }
                _instant = ping.tick() => {
                    if keep_alive > 0 {
                        let mut out = Vec::new();
                        codec::v3::PingRequestPacket::new().encode(&mut out)?;
                        stream.write(&out).await?;
                    }
                }
            }
        }
    }

    /// Subscribe every downstream rule on the remote broker.
    async fn subscribe_downstream(&mut self, stream: &mut BridgeStream) -> Result<(), Error> {
        let rules: Vec<(String, QoS)> = self
            .downstream_rules
            .iter()
            .map(|rule| (rule.remote_filter(), rule.qos()))
            .collect();
        for (filter, qos) in rules {
            let packet_id = self.next_packet_id();
            let mut out = Vec::new();
            match self.config.protocol_version {
                ProtocolLevel::V31 | ProtocolLevel::V311 => {
                    codec::v3::SubscribePacket::new(&filter, qos, packet_id)?.encode(&mut out)?;
                }
                ProtocolLevel::V5 => {
                    codec::v5::SubscribePacket::new(&filter, qos, packet_id)?.encode(&mut out)?;
                }
            }
            stream.write(&out).await?;
            log::info!(
                "bridge {}: subscribed {filter} on remote broker",
                self.config.name
            );
        }
        Ok(())
    }

    /// Forward one local message through every matching upstream rule.
    async fn forward_upstream(
        &mut self,
        stream: &mut BridgeStream,
        message: &ApplicationMessage,
        retained_sync: bool,
    ) -> Result<(), Error> {
        let matching: Vec<(String, QoS)> = self
            .upstream_rules
            .iter()
            .filter(|rule| rule.matches_local(message.topic()))
            .map(|rule| (rule.upstream_topic(message.topic()), rule.qos()))
            .collect();
        for (topic, qos) in matching {
            let retain = if retained_sync {
                self.config.sync_retain_flag
            } else {
                self.config.sync_retain_flag && message.retain()
            };
            let packet_id = if qos == QoS::AtMostOnce {
                PacketId::new(0)
            } else {
                self.next_packet_id()
            };

            let mut out = Vec::new();
            match self.config.protocol_version {
                ProtocolLevel::V31 | ProtocolLevel::V311 => {
                    let mut packet =
                        codec::v3::PublishPacket::new(&topic, qos, message.payload().clone())?;
                    packet.set_retain(retain);
                    if qos != QoS::AtMostOnce {
                        packet.set_packet_id(packet_id);
                    }
                    packet.encode(&mut out)?;
                }
                ProtocolLevel::V5 => {
                    let mut packet =
                        codec::v5::PublishPacket::new(&topic, qos, message.payload().clone())?;
                    packet.set_retain(retain);
                    if qos != QoS::AtMostOnce {
                        packet.set_packet_id(packet_id);
                    }
                    *packet.properties_mut() = message.metadata().to_properties()?;
                    packet.encode(&mut out)?;
                }
            }
            stream.write(&out).await?;
        }
        Ok(())
    }

    async fn process_buffer(
        &mut self,
        stream: &mut BridgeStream,
        buf: &mut Vec<u8>,
    ) -> Result<(), Error> {
        loop {
            let Some(frame_len) = frame_length(buf)? else {
                return Ok(());
            };
            let frame: Vec<u8> = buf.drain(..frame_len).collect();
            self.handle_remote_packet(stream, &frame).await?;
        }
    }

    async fn handle_remote_packet(
        &mut self,
        stream: &mut BridgeStream,
        frame: &[u8],
    ) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let fixed_header = FixedHeader::decode(&mut ba)?;
        match fixed_header.packet_type() {
            PacketType::Publish { .. } => self.on_remote_publish(stream, frame).await,
            PacketType::PublishRelease => {
                // Second half of an inbound QoS 2 exchange.
                let mut ba = ByteArray::new(frame);
                let packet_id = codec::v3::PublishReleasePacket::decode(&mut ba)?.packet_id();
                let mut out = Vec::new();
                codec::v3::PublishCompletePacket::new(packet_id).encode(&mut out)?;
                stream.write(&out).await
            }
            PacketType::PublishAck
            | PacketType::PublishReceived
            | PacketType::PublishComplete
            | PacketType::SubscribeAck
            | PacketType::UnsubscribeAck
            | PacketType::PingResponse => Ok(()),
            PacketType::Disconnect => Err(Error::from_string(
                ErrorKind::BridgeError,
                format!("bridge {}: remote broker sent disconnect", self.config.name),
            )),
            packet_type => {
                log::warn!(
                    "bridge {}: unexpected packet from remote broker: {packet_type:?}",
                    self.config.name
                );
                Ok(())
            }
        }
    }

    /// A downstream message arrived; rewrite the topic and inject it into
    /// the local pipeline.
    async fn on_remote_publish(
        &mut self,
        stream: &mut BridgeStream,
        frame: &[u8],
    ) -> Result<(), Error> {
        let mut ba = ByteArray::new(frame);
        let (topic, payload, qos, retain, packet_id) = match self.config.protocol_version {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                let packet = codec::v3::PublishPacket::decode(&mut ba)?;
                (
                    packet.topic().to_string(),
                    packet.message().clone(),
                    packet.qos(),
                    packet.retain(),
                    packet.packet_id(),
                )
            }
            ProtocolLevel::V5 => {
                let packet = codec::v5::PublishPacket::decode(&mut ba)?;
                (
                    packet.topic().to_string(),
                    packet.message().clone(),
                    packet.qos(),
                    packet.retain(),
                    packet.packet_id(),
                )
            }
        };

        // Acknowledge per QoS before routing.
        match qos {
            QoS::AtMostOnce => (),
            QoS::AtLeastOnce => {
                let mut out = Vec::new();
                codec::v3::PublishAckPacket::new(packet_id).encode(&mut out)?;
                stream.write(&out).await?;
            }
            QoS::ExactOnce => {
                let mut out = Vec::new();
                codec::v3::PublishReceivedPacket::new(packet_id).encode(&mut out)?;
                stream.write(&out).await?;
            }
        }

        let local_topic = self
            .downstream_rules
            .iter()
            .find(|rule| rule.matches_remote(&topic))
            .and_then(|rule| rule.downstream_topic(&topic));
        let Some(local_topic) = local_topic else {
            log::debug!(
                "bridge {}: remote publish {topic} matches no downstream rule",
                self.config.name
            );
            return Ok(());
        };

        let message = ApplicationMessage::new(
            &local_topic,
            payload,
            qos,
            retain,
            SourceProtocol::Bridge,
            &self.config.client_id,
        );
        self.dispatcher_sender
            .send(BridgeToDispatcherCmd::Publish(message))
            .await
            .map(drop)?;
        Ok(())
    }
}

fn parse_rules(rules: &[config::BridgeRule], default_qos: QoS, bridge_name: &str) -> Vec<Rule> {
    let mut parsed = Vec::new();
    for rule in rules {
        match Rule::from_config(rule, default_qos) {
            Ok(Some(rule)) => parsed.push(rule),
            Ok(None) => (),
            Err(err) => log::error!(
                "bridge {bridge_name}: invalid rule filter {}: {err:?}",
                rule.local_topic_filter
            ),
        }
    }
    parsed
}

/// Read one complete packet frame from the stream.
async fn read_one_frame(stream: &mut BridgeStream) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(64);
    loop {
        if let Some(frame_len) = frame_length(&buf)? {
            if buf.len() >= frame_len {
                // Any coalesced bytes behind the first frame are dropped;
                // nothing else is expected during the handshake.
                buf.truncate(frame_len);
                return Ok(buf);
            }
        }
        let n_read = stream.read_buf(&mut buf).await?;
        if n_read == 0 {
            return Err(Error::new(
                ErrorKind::BridgeError,
                "connection closed during handshake",
            ));
        }
    }
}
