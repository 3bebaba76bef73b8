// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Cluster wire protocol.
//!
//! Every message on a peer connection is framed as:
//!
//! ```txt
//! +--------------+
//! | Type    (1B) |
//! +--------------+
//! | Length  (4B) |
//! |  big endian  |
//! +--------------+
//! | Payload ...  |
//! +--------------+
//! ```

use byteorder::{BigEndian, WriteBytesExt};
use bytes::Bytes;
use std::convert::TryFrom;

use codec::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS, StringData};

/// Version byte carried in handshakes. Nodes speaking a different version
/// are rejected.
pub const CLUSTER_PROTOCOL_VERSION: u8 = 1;

/// Upper bound of one frame payload; a peer claiming more is broken.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Byte size of the frame header (type + length).
pub const FRAME_HEADER_LEN: usize = 5;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Heartbeat = 0x01,
    HandshakeRequest = 0x02,
    HandshakeResponse = 0x03,
    Publish = 0x10,
    Subscribe = 0x20,
    Unsubscribe = 0x21,
    NodeLeave = 0x30,
    DiscoverRequest = 0x40,
    DiscoverResponse = 0x41,
    RetainedSyncRequest = 0x50,
    RetainedSyncData = 0x51,
}

impl TryFrom<u8> for FrameType {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Self::Heartbeat),
            0x02 => Ok(Self::HandshakeRequest),
            0x03 => Ok(Self::HandshakeResponse),
            0x10 => Ok(Self::Publish),
            0x20 => Ok(Self::Subscribe),
            0x21 => Ok(Self::Unsubscribe),
            0x30 => Ok(Self::NodeLeave),
            0x40 => Ok(Self::DiscoverRequest),
            0x41 => Ok(Self::DiscoverResponse),
            0x50 => Ok(Self::RetainedSyncRequest),
            0x51 => Ok(Self::RetainedSyncData),
            _ => Err(DecodeError::InvalidPacketType),
        }
    }
}

/// Identity exchanged when two nodes connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u8,
    pub node_id: String,
    pub cluster_name: String,

    /// Port the cluster listener of this node is bound to, so that peers
    /// learned through discovery can be dialed back.
    pub listen_port: u16,

    /// Advertised address of this node, if configured.
    pub node_address: Option<String>,

    /// Wall clock seconds at send time.
    pub timestamp: i64,
}

/// One node seen in a discover response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub node_id: String,
    pub address: String,
}

/// One entry of a retained sync block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedEntry {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterMessage {
    Heartbeat,

    HandshakeRequest(Handshake),

    HandshakeResponse(Handshake),

    /// A replicated application message.
    ///
    /// `ticks` is the publish wall time in seconds; together with the
    /// source node, topic and payload hash it forms the deduplication
    /// fingerprint, so every node derives the same one.
    Publish {
        source_node: String,
        topic: String,
        qos: QoS,
        retain: bool,
        ticks: i64,
        payload: Bytes,
    },

    /// A node gained its first local subscription on `filter`.
    Subscribe { node_id: String, filter: String },

    /// A node lost its last local subscription on `filter`.
    Unsubscribe { node_id: String, filter: String },

    NodeLeave { node_id: String },

    DiscoverRequest,

    DiscoverResponse { peers: Vec<PeerInfo> },

    RetainedSyncRequest,

    /// Self-contained binary block of retained messages:
    ///
    /// ```txt
    /// count : u32 big-endian
    /// repeat count times:
    ///   topic_len : u16 big-endian
    ///   topic     : UTF-8 bytes
    ///   flags     : u8    (bits 0-1 qos, bit 2 retain)
    ///   pl_len    : u32 big-endian
    ///   payload   : pl_len bytes
    /// ```
    RetainedSyncData { entries: Vec<RetainedEntry> },
}

impl ClusterMessage {
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::Heartbeat => FrameType::Heartbeat,
            Self::HandshakeRequest(_) => FrameType::HandshakeRequest,
            Self::HandshakeResponse(_) => FrameType::HandshakeResponse,
            Self::Publish { .. } => FrameType::Publish,
            Self::Subscribe { .. } => FrameType::Subscribe,
            Self::Unsubscribe { .. } => FrameType::Unsubscribe,
            Self::NodeLeave { .. } => FrameType::NodeLeave,
            Self::DiscoverRequest => FrameType::DiscoverRequest,
            Self::DiscoverResponse { .. } => FrameType::DiscoverResponse,
            Self::RetainedSyncRequest => FrameType::RetainedSyncRequest,
            Self::RetainedSyncData { .. } => FrameType::RetainedSyncData,
        }
    }

    /// Serialize the whole frame including type and length header.
    ///
    /// # Errors
    ///
    /// Returns error if a string field is invalid.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        buf.push(self.frame_type() as u8);
        // Payload length is patched after the payload was written.
        buf.extend_from_slice(&[0, 0, 0, 0]);
        let payload_start = buf.len();

        match self {
            Self::Heartbeat | Self::DiscoverRequest | Self::RetainedSyncRequest => (),
            Self::HandshakeRequest(handshake) | Self::HandshakeResponse(handshake) => {
                encode_handshake(handshake, buf)?;
            }
            Self::Publish {
                source_node,
                topic,
                qos,
                retain,
                ticks,
                payload,
            } => {
                StringData::from(source_node)?.encode(buf)?;
                StringData::from(topic)?.encode(buf)?;
                buf.push(message_flags(*qos, *retain));
                #[allow(clippy::cast_sign_loss)]
                buf.write_u64::<BigEndian>(*ticks as u64)?;
                write_chunk(payload, buf)?;
            }
            Self::Subscribe { node_id, filter } | Self::Unsubscribe { node_id, filter } => {
                StringData::from(node_id)?.encode(buf)?;
                StringData::from(filter)?.encode(buf)?;
            }
            Self::NodeLeave { node_id } => {
                StringData::from(node_id)?.encode(buf)?;
            }
            Self::DiscoverResponse { peers } => {
                let count = u16::try_from(peers.len()).map_err(|_e| EncodeError::TooManyData)?;
                buf.write_u16::<BigEndian>(count)?;
                for peer in peers {
                    StringData::from(&peer.node_id)?.encode(buf)?;
                    StringData::from(&peer.address)?.encode(buf)?;
                }
            }
            Self::RetainedSyncData { entries } => {
                let count = u32::try_from(entries.len()).map_err(|_e| EncodeError::TooManyData)?;
                buf.write_u32::<BigEndian>(count)?;
                for entry in entries {
                    StringData::from(&entry.topic)?.encode(buf)?;
                    buf.push(message_flags(entry.qos, entry.retain));
                    write_chunk(&entry.payload, buf)?;
                }
            }
        }

        let payload_len =
            u32::try_from(buf.len() - payload_start).map_err(|_e| EncodeError::TooManyData)?;
        buf[old_len + 1..old_len + 5].copy_from_slice(&payload_len.to_be_bytes());
        Ok(buf.len() - old_len)
    }

    /// Parse a frame payload.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is malformed.
    pub fn decode(frame_type: FrameType, payload: &[u8]) -> Result<Self, DecodeError> {
        let mut ba = ByteArray::new(payload);
        let message = match frame_type {
            FrameType::Heartbeat => Self::Heartbeat,
            FrameType::HandshakeRequest => Self::HandshakeRequest(decode_handshake(&mut ba)?),
            FrameType::HandshakeResponse => Self::HandshakeResponse(decode_handshake(&mut ba)?),
            FrameType::Publish => {
                let source_node = StringData::decode(&mut ba)?.as_ref().to_string();
                let topic = StringData::decode(&mut ba)?.as_ref().to_string();
                let flags = ba.read_byte()?;
                let (qos, retain) = parse_message_flags(flags)?;
                #[allow(clippy::cast_possible_wrap)]
                let ticks = ba.read_u64()? as i64;
                let payload = read_chunk(&mut ba)?;
                Self::Publish {
                    source_node,
                    topic,
                    qos,
                    retain,
                    ticks,
                    payload,
                }
            }
            FrameType::Subscribe => {
                let node_id = StringData::decode(&mut ba)?.as_ref().to_string();
                let filter = StringData::decode(&mut ba)?.as_ref().to_string();
                Self::Subscribe { node_id, filter }
            }
            FrameType::Unsubscribe => {
                let node_id = StringData::decode(&mut ba)?.as_ref().to_string();
                let filter = StringData::decode(&mut ba)?.as_ref().to_string();
                Self::Unsubscribe { node_id, filter }
            }
            FrameType::NodeLeave => {
                let node_id = StringData::decode(&mut ba)?.as_ref().to_string();
                Self::NodeLeave { node_id }
            }
            FrameType::DiscoverRequest => Self::DiscoverRequest,
            FrameType::DiscoverResponse => {
                let count = ba.read_u16()?;
                let mut peers = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let node_id = StringData::decode(&mut ba)?.as_ref().to_string();
                    let address = StringData::decode(&mut ba)?.as_ref().to_string();
                    peers.push(PeerInfo { node_id, address });
                }
                Self::DiscoverResponse { peers }
            }
            FrameType::RetainedSyncRequest => Self::RetainedSyncRequest,
            FrameType::RetainedSyncData => {
                let count = ba.read_u32()?;
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let topic = StringData::decode(&mut ba)?.as_ref().to_string();
                    let flags = ba.read_byte()?;
                    let (qos, retain) = parse_message_flags(flags)?;
                    let payload = read_chunk(&mut ba)?;
                    entries.push(RetainedEntry {
                        topic,
                        qos,
                        retain,
                        payload,
                    });
                }
                Self::RetainedSyncData { entries }
            }
        };

        if ba.remaining_bytes() != 0 {
            return Err(DecodeError::InvalidRemainingLength);
        }
        Ok(message)
    }
}

fn encode_handshake(handshake: &Handshake, buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    buf.push(handshake.protocol_version);
    StringData::from(&handshake.node_id)?.encode(buf)?;
    StringData::from(&handshake.cluster_name)?.encode(buf)?;
    buf.write_u16::<BigEndian>(handshake.listen_port)?;
    match &handshake.node_address {
        Some(address) => {
            buf.push(1);
            StringData::from(address)?.encode(buf)?;
        }
        None => buf.push(0),
    }
    #[allow(clippy::cast_sign_loss)]
    buf.write_u64::<BigEndian>(handshake.timestamp as u64)?;
    Ok(())
}

fn decode_handshake(ba: &mut ByteArray) -> Result<Handshake, DecodeError> {
    let protocol_version = ba.read_byte()?;
    let node_id = StringData::decode(ba)?.as_ref().to_string();
    let cluster_name = StringData::decode(ba)?.as_ref().to_string();
    let listen_port = ba.read_u16()?;
    let node_address = match ba.read_byte()? {
        0 => None,
        1 => Some(StringData::decode(ba)?.as_ref().to_string()),
        _ => return Err(DecodeError::InvalidPropertyValue),
    };
    #[allow(clippy::cast_possible_wrap)]
    let timestamp = ba.read_u64()? as i64;
    Ok(Handshake {
        protocol_version,
        node_id,
        cluster_name,
        listen_port,
        node_address,
        timestamp,
    })
}

const fn message_flags(qos: QoS, retain: bool) -> u8 {
    let mut flags = qos as u8;
    if retain {
        flags |= 0b0000_0100;
    }
    flags
}

fn parse_message_flags(flags: u8) -> Result<(QoS, bool), DecodeError> {
    let qos = QoS::try_from(flags & 0b0000_0011)?;
    let retain = flags & 0b0000_0100 == 0b0000_0100;
    Ok((qos, retain))
}

fn write_chunk(payload: &[u8], buf: &mut Vec<u8>) -> Result<(), EncodeError> {
    let len = u32::try_from(payload.len()).map_err(|_e| EncodeError::TooManyData)?;
    buf.write_u32::<BigEndian>(len)?;
    buf.extend_from_slice(payload);
    Ok(())
}

fn read_chunk(ba: &mut ByteArray) -> Result<Bytes, DecodeError> {
    let len = ba.read_u32()? as usize;
    Ok(Bytes::copy_from_slice(ba.read_bytes(len)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(message: &ClusterMessage) -> ClusterMessage {
        let mut buf = Vec::new();
        message.encode(&mut buf).unwrap();
        let frame_type = FrameType::try_from(buf[0]).unwrap();
        let payload_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        assert_eq!(buf.len(), FRAME_HEADER_LEN + payload_len);
        ClusterMessage::decode(frame_type, &buf[FRAME_HEADER_LEN..]).unwrap()
    }

    #[test]
    fn test_heartbeat_frame() {
        let mut buf = Vec::new();
        ClusterMessage::Heartbeat.encode(&mut buf).unwrap();
        assert_eq!(&buf, &[0x01, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_handshake_round_trip() {
        let message = ClusterMessage::HandshakeRequest(Handshake {
            protocol_version: CLUSTER_PROTOCOL_VERSION,
            node_id: "n1".to_string(),
            cluster_name: "tianhe".to_string(),
            listen_port: 11883,
            node_address: Some("10.0.0.1:11883".to_string()),
            timestamp: 1_700_000_000,
        });
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_publish_round_trip() {
        let message = ClusterMessage::Publish {
            source_node: "n2".to_string(),
            topic: "t/hello".to_string(),
            qos: QoS::AtLeastOnce,
            retain: false,
            ticks: 1_700_000_123,
            payload: Bytes::from_static(b"hi"),
        };
        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_retained_sync_block_layout() {
        let message = ClusterMessage::RetainedSyncData {
            entries: vec![RetainedEntry {
                topic: "home/light".to_string(),
                qos: QoS::AtLeastOnce,
                retain: true,
                payload: Bytes::from_static(b"on"),
            }],
        };
        let mut buf = Vec::new();
        message.encode(&mut buf).unwrap();
        // Frame header.
        assert_eq!(buf[0], 0x51);
        // count = 1.
        assert_eq!(&buf[5..9], &[0x00, 0x00, 0x00, 0x01]);
        // topic_len = 10, topic bytes.
        assert_eq!(&buf[9..11], &[0x00, 0x0a]);
        assert_eq!(&buf[11..21], b"home/light");
        // flags: qos 1, retain bit set.
        assert_eq!(buf[21], 0b0000_0101);
        // pl_len = 2, payload.
        assert_eq!(&buf[22..26], &[0x00, 0x00, 0x00, 0x02]);
        assert_eq!(&buf[26..28], b"on");

        assert_eq!(round_trip(&message), message);
    }

    #[test]
    fn test_discover_round_trip() {
        let message = ClusterMessage::DiscoverResponse {
            peers: vec![
                PeerInfo {
                    node_id: "n2".to_string(),
                    address: "10.0.0.2:11883".to_string(),
                },
                PeerInfo {
                    node_id: "n3".to_string(),
                    address: "10.0.0.3:11883".to_string(),
                },
            ],
        };
        assert_eq!(round_trip(&message), message);
    }
}
