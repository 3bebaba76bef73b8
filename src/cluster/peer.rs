// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Peer connection handling.
//!
//! A [`PeerBuilder`] owns the socket while the handshake runs; turning it
//! into a [`Peer`] consumes the builder, so the transport always ends up
//! owned by exactly one peer. Each peer gets one reader task and one
//! writer task; the writer's channel serializes outbound frames.

use std::convert::TryFrom;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinHandle;

use super::message::{ClusterMessage, FrameType, FRAME_HEADER_LEN, MAX_FRAME_SIZE};
use crate::error::{Error, ErrorKind};
use crate::types::NodeId;

const PEER_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDirection {
    /// Accepted on the cluster listener.
    Inbound,

    /// Dialed by us, from seeds or discovery.
    Outbound,
}

/// Events produced by peer reader tasks.
#[derive(Debug)]
pub enum PeerEvent {
    Message {
        node_id: NodeId,
        message: ClusterMessage,
    },

    Closed {
        node_id: NodeId,
    },
}

/// Socket owner during the handshake phase.
pub struct PeerBuilder {
    stream: TcpStream,
}

impl PeerBuilder {
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Read one framed message, used during the handshake.
    ///
    /// # Errors
    ///
    /// Returns error on socket failure or a malformed frame.
    pub async fn read_message(&mut self) -> Result<ClusterMessage, Error> {
        read_frame(&mut self.stream).await
    }

    /// Write one framed message, used during the handshake.
    ///
    /// # Errors
    ///
    /// Returns error on socket failure.
    pub async fn write_message(&mut self, message: &ClusterMessage) -> Result<(), Error> {
        let mut buf = Vec::new();
        message.encode(&mut buf)?;
        self.stream.write_all(&buf).await?;
        Ok(())
    }

    /// Finish the handshake: consume the builder and hand the socket to
    /// the final peer, spawning its reader and writer tasks.
    #[must_use]
    pub fn into_peer(
        self,
        node_id: NodeId,
        address: String,
        direction: PeerDirection,
        event_sender: Sender<PeerEvent>,
    ) -> Peer {
        let (read_half, write_half) = self.stream.into_split();
        let (sender, receiver) = tokio::sync::mpsc::channel(PEER_CHANNEL_CAPACITY);

        let reader_handle = tokio::spawn(reader_loop(
            read_half,
            node_id.clone(),
            event_sender,
        ));
        tokio::spawn(writer_loop(write_half, node_id.clone(), receiver));

        Peer {
            node_id,
            address,
            direction,
            joined_at: Instant::now(),
            last_heartbeat: Instant::now(),
            sender,
            reader_handle,
        }
    }
}

/// One connected cluster node.
#[derive(Debug)]
pub struct Peer {
    node_id: NodeId,
    address: String,
    direction: PeerDirection,
    joined_at: Instant,
    last_heartbeat: Instant,

    sender: Sender<ClusterMessage>,
    reader_handle: JoinHandle<()>,
}

impl Peer {
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    #[must_use]
    pub const fn direction(&self) -> PeerDirection {
        self.direction
    }

    #[must_use]
    pub const fn joined_at(&self) -> Instant {
        self.joined_at
    }

    /// Record a heartbeat from this peer.
    pub fn touch(&mut self) {
        self.last_heartbeat = Instant::now();
    }

    #[must_use]
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() > timeout
    }

    /// Queue a message on the writer task.
    pub async fn send(&self, message: ClusterMessage) -> Result<(), Error> {
        self.sender.send(message).await.map_err(|err| {
            Error::from_string(
                ErrorKind::ClusterError,
                format!("peer {}: writer gone: {err}", self.node_id),
            )
        })
    }

    /// Stop both connection tasks. Dropping the sender ends the writer;
    /// the reader is aborted since it may be parked in a read.
    pub fn shutdown(self) {
        self.reader_handle.abort();
    }
}

async fn reader_loop(
    mut read_half: OwnedReadHalf,
    node_id: NodeId,
    event_sender: Sender<PeerEvent>,
) {
    loop {
        match read_frame(&mut read_half).await {
            Ok(message) => {
                if event_sender
                    .send(PeerEvent::Message {
                        node_id: node_id.clone(),
                        message,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(err) => {
                log::info!("cluster: peer {node_id} read failed: {err}");
                let _ret = event_sender.send(PeerEvent::Closed { node_id }).await;
                return;
            }
        }
    }
}

async fn writer_loop(
    mut write_half: OwnedWriteHalf,
    node_id: NodeId,
    mut receiver: Receiver<ClusterMessage>,
) {
    let mut buf = Vec::new();
    while let Some(message) = receiver.recv().await {
        buf.clear();
        if let Err(err) = message.encode(&mut buf) {
            log::error!("cluster: peer {node_id}: failed to encode frame: {err:?}");
            continue;
        }
        if let Err(err) = write_half.write_all(&buf).await {
            log::info!("cluster: peer {node_id} write failed: {err}");
            return;
        }
    }
}

/// Read one `{type, length, payload}` frame.
async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<ClusterMessage, Error> {
    let mut header = [0_u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let frame_type = FrameType::try_from(header[0])?;
    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if payload_len > MAX_FRAME_SIZE {
        return Err(Error::from_string(
            ErrorKind::ClusterError,
            format!("frame of {payload_len} bytes exceeds limit"),
        ));
    }
    let mut payload = vec![0_u8; payload_len];
    reader.read_exact(&mut payload).await?;
    ClusterMessage::decode(frame_type, &payload).map_err(Into::into)
}
