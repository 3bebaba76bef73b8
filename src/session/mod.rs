// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Per-connection session state machine.
//!
//! A session owns its transport stream and is the only task which ever
//! writes to it, so outbound packets are serialized without any lock.
//! Inbound bytes are accumulated in one buffer; complete packet frames
//! are split off and dispatched as they arrive, which also handles
//! clients coalescing several packets into one TCP segment.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{Receiver, Sender};

use codec::{
    ByteArray, DecodePacket, EncodePacket, FixedHeader, Packet, PacketId, PacketType,
    ProtocolLevel,
};

use crate::commands::{ListenerToSessionCmd, SessionToListenerCmd};
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;
use crate::types::SessionId;

mod client;
mod config;
mod listener;

pub use config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No connect packet received yet.
    Invalid,

    /// Connect packet forwarded to listener, waiting for the verdict.
    Connecting,

    Connected,

    Disconnecting,

    Disconnected,
}

/// A session represents one client connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    stream: Stream,

    status: Status,
    protocol_level: ProtocolLevel,
    client_id: String,
    clean_session: bool,
    keep_alive: u64,

    /// Set when the client sent a normal DISCONNECT, which discards
    /// the will message.
    clean_disconnect: bool,

    /// Updated on every inbound byte; drives the keep alive check.
    last_activity: Instant,
    created_at: Instant,

    packet_id_counter: u16,

    /// `QoS` 2 publishes acknowledged with PUBREC but not yet released.
    pub_recv_packets: HashSet<PacketId>,

    /// v5 topic aliases announced by the client, alias -> topic.
    inbound_aliases: HashMap<u16, String>,

    /// v5 topic aliases assigned by us, topic -> alias.
    outbound_aliases: HashMap<String, u16>,

    /// Highest alias value the client accepts; 0 disables outbound
    /// aliasing.
    outbound_alias_max: u16,

    sender: Sender<SessionToListenerCmd>,
    receiver: Receiver<ListenerToSessionCmd>,
}

impl Session {
    pub fn new(
        id: SessionId,
        config: SessionConfig,
        stream: Stream,
        sender: Sender<SessionToListenerCmd>,
        receiver: Receiver<ListenerToSessionCmd>,
    ) -> Self {
        Self {
            id,
            config,
            stream,

            status: Status::Invalid,
            protocol_level: ProtocolLevel::V311,
            client_id: String::new(),
            clean_session: true,
            keep_alive: 0,
            clean_disconnect: false,

            last_activity: Instant::now(),
            created_at: Instant::now(),

            packet_id_counter: 0,
            pub_recv_packets: HashSet::new(),
            inbound_aliases: HashMap::new(),
            outbound_aliases: HashMap::new(),
            outbound_alias_max: 0,

            sender,
            receiver,
        }
    }

    pub async fn run_loop(mut self) {
        let mut buf = Vec::with_capacity(1024);

        loop {
            if self.status == Status::Disconnected {
                break;
            }

            let idle_timeout = self.idle_timeout();
            tokio::select! {
                ret = self.stream.read_buf(&mut buf) => {
                    match ret {
                        Ok(0) => {
                            log::info!("session {}: connection closed by peer", self.id);
                            break;
                        }
                        Ok(_n) => {
                            self.last_activity = Instant::now();
                            if let Err(err) = self.process_buffer(&mut buf).await {
                                log::error!(
                                    "session {}: failed to handle packet: {err}", self.id
                                );
                                self.send_malformed_disconnect().await;
                                break;
                            }
                        }
                        Err(err) => {
                            log::info!("session {}: read failed: {err}", self.id);
                            break;
                        }
                    }
                }
                Some(cmd) = self.receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("session {}: failed to handle listener cmd: {err}", self.id);
                        break;
                    }
                }
                () = tokio::time::sleep(idle_timeout) => {
                    if self.is_timed_out() {
                        break;
                    }
                }
            }
        }

        if let Err(err) = self
            .sender
            .send(SessionToListenerCmd::Disconnect {
                session_id: self.id,
                clean_disconnect: self.clean_disconnect,
            })
            .await
        {
            log::error!(
                "session {}: failed to send disconnect cmd to listener: {err:?}",
                self.id
            );
        }
    }

    /// How long select may block before the timeout state has to be
    /// re-checked.
    fn idle_timeout(&self) -> Duration {
        match self.status {
            Status::Invalid | Status::Connecting => self
                .config
                .connect_timeout()
                .saturating_sub(self.created_at.elapsed()),
            _ => {
                if self.keep_alive == 0 {
                    // Keep alive disabled; wake up occasionally anyway.
                    Duration::from_secs(3600)
                } else {
                    self.config
                        .keep_alive_window(self.keep_alive)
                        .saturating_sub(self.last_activity.elapsed())
                }
            }
        }
    }

    fn is_timed_out(&self) -> bool {
        match self.status {
            Status::Invalid | Status::Connecting => {
                // If the Server does not receive a CONNECT packet within
                // a reasonable amount of time after the network connection
                // is established, the Server SHOULD close the connection.
                if self.created_at.elapsed() >= self.config.connect_timeout() {
                    log::info!("session {}: connect timeout reached", self.id);
                    return true;
                }
                false
            }
            Status::Connected | Status::Disconnecting => {
                // If the Keep Alive value is non-zero and the Server does
                // not receive a Control Packet from the Client within one
                // and a half times the Keep Alive time period, it MUST
                // disconnect [MQTT-3.1.2-24].
                if self.keep_alive > 0
                    && self.last_activity.elapsed() >= self.config.keep_alive_window(self.keep_alive)
                {
                    log::warn!(
                        "session {}: keep alive window passed, disconnect client {}",
                        self.id,
                        self.client_id
                    );
                    return true;
                }
                false
            }
            Status::Disconnected => true,
        }
    }

    /// Split complete packet frames off `buf` and dispatch them.
    async fn process_buffer(&mut self, buf: &mut Vec<u8>) -> Result<(), Error> {
        loop {
            let Some(frame_len) = frame_length(buf)? else {
                return Ok(());
            };
            let frame: Vec<u8> = buf.drain(..frame_len).collect();
            self.handle_client_packet(&frame).await?;
            if self.status == Status::Disconnected {
                buf.clear();
                return Ok(());
            }
        }
    }

    /// Allocate the next outbound packet id.
    fn next_packet_id(&mut self) -> PacketId {
        next_packet_id(&mut self.packet_id_counter)
    }

    async fn send<P: EncodePacket + Packet>(&mut self, packet: P) -> Result<(), Error> {
        // After sending a DISCONNECT packet neither side may send any more
        // control packets on this connection [MQTT-3.14.4-2].
        if self.status == Status::Disconnected {
            return Err(Error::from_string(
                ErrorKind::SendError,
                format!(
                    "session {}: cannot send {:?} on disconnected stream",
                    self.id,
                    packet.packet_type()
                ),
            ));
        }

        let mut buf = Vec::new();
        packet.encode(&mut buf)?;
        self.stream.write(&buf).await.map(drop)?;
        Ok(())
    }

    /// Tell a v5 client why its connection is being closed; a v3 server
    /// never sends DISCONNECT.
    async fn send_malformed_disconnect(&mut self) {
        if self.protocol_level == ProtocolLevel::V5 && self.status == Status::Connected {
            let packet = codec::v5::DisconnectPacket::with_reason(
                codec::v5::ReasonCode::MalformedPacket,
            );
            if let Err(err) = self.send(packet).await {
                log::debug!("session {}: failed to send disconnect: {err}", self.id);
            }
        }
        self.status = Status::Disconnected;
    }

    async fn send_disconnect(&mut self) -> Result<(), Error> {
        self.status = Status::Disconnecting;
        let ret = match self.protocol_level {
            ProtocolLevel::V31 | ProtocolLevel::V311 => {
                // A v3 server never sends DISCONNECT; just close.
                Ok(())
            }
            ProtocolLevel::V5 => {
                self.send(codec::v5::DisconnectPacket::with_reason(
                    codec::v5::ReasonCode::SessionTakenOver,
                ))
                .await
            }
        };
        self.status = Status::Disconnected;
        ret
    }

    fn parse_fixed_header(frame: &[u8]) -> Result<FixedHeader, Error> {
        let mut ba = ByteArray::new(frame);
        FixedHeader::decode(&mut ba).map_err(Into::into)
    }

    async fn handle_client_packet(&mut self, frame: &[u8]) -> Result<(), Error> {
        let fixed_header = Self::parse_fixed_header(frame)?;
        if !fixed_header.is_valid_header(self.protocol_level) {
            return Err(Error::new(
                ErrorKind::ProtocolError,
                "auth packet is only valid in mqtt 5.0",
            ));
        }

        // The first packet on a connection MUST be CONNECT [MQTT-3.1.0-1].
        if self.status == Status::Invalid && fixed_header.packet_type() != PacketType::Connect {
            return Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!(
                    "session {}: got {:?} before connect",
                    self.id,
                    fixed_header.packet_type()
                ),
            ));
        }

        match fixed_header.packet_type() {
            PacketType::Connect => self.on_client_connect(frame).await,
            PacketType::Publish { .. } => self.on_client_publish(frame).await,
            PacketType::PublishAck => self.on_client_publish_ack(frame),
            PacketType::PublishReceived => self.on_client_publish_received(frame).await,
            PacketType::PublishRelease => self.on_client_publish_release(frame).await,
            PacketType::PublishComplete => self.on_client_publish_complete(frame),
            PacketType::Subscribe => self.on_client_subscribe(frame).await,
            PacketType::Unsubscribe => self.on_client_unsubscribe(frame).await,
            PacketType::PingRequest => self.on_client_ping(frame).await,
            PacketType::Disconnect => self.on_client_disconnect(frame),
            PacketType::Auth => {
                log::warn!(
                    "session {}: extended authentication is not supported",
                    self.id
                );
                Err(Error::new(
                    ErrorKind::ProtocolError,
                    "unexpected auth packet",
                ))
            }
            packet_type => Err(Error::from_string(
                ErrorKind::ProtocolError,
                format!("session {}: unexpected packet {packet_type:?}", self.id),
            )),
        }
    }
}

/// Advance a packet id counter; wraps around at 65535 and never yields
/// zero [MQTT-2.3.1-1].
pub(crate) fn next_packet_id(counter: &mut u16) -> PacketId {
    *counter = counter.wrapping_add(1);
    if *counter == 0 {
        *counter = 1;
    }
    PacketId::new(*counter)
}

/// Total byte length of the first complete packet in `buf`, or None when
/// more bytes are needed.
///
/// # Errors
///
/// Returns error if the remaining-length field uses more than 4 bytes.
pub(crate) fn frame_length(buf: &[u8]) -> Result<Option<usize>, Error> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let mut remaining: usize = 0;
    let mut multiplier: usize = 1;
    let mut header_bytes = 1;
    loop {
        if header_bytes > 4 {
            return Err(Error::new(
                ErrorKind::DecodeError,
                "remaining length field exceeds 4 bytes",
            ));
        }
        let Some(&byte) = buf.get(header_bytes) else {
            return Ok(None);
        };
        remaining += (byte as usize & 0x7f) * multiplier;
        multiplier *= 128;
        header_bytes += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    Ok(Some(header_bytes + remaining))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_id_cycle_skips_zero() {
        let mut counter = 0;
        assert_eq!(next_packet_id(&mut counter).value(), 1);
        assert_eq!(next_packet_id(&mut counter).value(), 2);

        let mut counter = u16::MAX - 1;
        assert_eq!(next_packet_id(&mut counter).value(), u16::MAX);
        // Wrap around: zero is skipped.
        assert_eq!(next_packet_id(&mut counter).value(), 1);
        assert_eq!(next_packet_id(&mut counter).value(), 2);
    }

    #[test]
    fn test_frame_length() {
        // PINGREQ.
        assert_eq!(frame_length(&[0xc0, 0x00]).unwrap(), Some(2));
        // Partial header.
        assert_eq!(frame_length(&[0x30]).unwrap(), None);
        // Publish with 19 remaining bytes, body incomplete: length is known
        // even before the body arrives.
        assert_eq!(frame_length(&[0x30, 0x13, 0x00]).unwrap(), Some(21));
        // Two byte remaining length.
        assert_eq!(frame_length(&[0x30, 0x92, 0x01, 0x00]).unwrap(), Some(149));
        // Five continuation bytes are malformed.
        assert!(frame_length(&[0x30, 0xff, 0xff, 0xff, 0xff, 0x7f]).is_err());
    }
}
