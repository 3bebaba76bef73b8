// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Cluster app: best-effort replication of publishes, subscriptions and
//! retained messages across broker nodes.
//!
//! Nodes form an unstructured peer graph. Publishes flood through it;
//! the message id cache terminates the flood. There is no consensus and
//! no ordering guarantee across nodes.

use chrono::{TimeZone, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{
    ClusterToDispatcherCmd, DispatcherToClusterCmd, ServerContextToClusterCmd,
};
use crate::config;
use crate::error::Error;
use crate::message::{ApplicationMessage, SourceProtocol};
use crate::types::NodeId;

mod cache;
mod message;
mod peer;

pub use cache::{fingerprint, MessageIdCache};
pub use message::{
    ClusterMessage, FrameType, Handshake, PeerInfo, RetainedEntry, CLUSTER_PROTOCOL_VERSION,
};
pub use peer::{Peer, PeerBuilder, PeerDirection, PeerEvent};

const CHANNEL_CAPACITY: usize = 64;

/// A finished handshake waiting to be admitted by the app.
struct NewPeer {
    builder: PeerBuilder,
    handshake: Handshake,
    direction: PeerDirection,

    /// Remote ip as seen on the socket, used to derive a dial-back address
    /// when the peer did not advertise one.
    remote_host: Option<String>,
}

pub struct ClusterApp {
    config: config::Cluster,
    cache: MessageIdCache,
    peers: HashMap<NodeId, Peer>,

    /// Which nodes announced subscriptions on which filters. Not used for
    /// routing; kept for observability.
    sub_index: HashMap<String, HashSet<NodeId>>,

    dispatcher_sender: Sender<ClusterToDispatcherCmd>,
    dispatcher_receiver: Receiver<DispatcherToClusterCmd>,

    server_ctx_receiver: Receiver<ServerContextToClusterCmd>,

    peer_event_sender: Sender<PeerEvent>,
    peer_event_receiver: Receiver<PeerEvent>,

    new_peer_sender: Sender<NewPeer>,
    new_peer_receiver: Receiver<NewPeer>,
}

impl ClusterApp {
    #[must_use]
    pub fn new(
        config: config::Cluster,
        dispatcher_sender: Sender<ClusterToDispatcherCmd>,
        dispatcher_receiver: Receiver<DispatcherToClusterCmd>,
        server_ctx_receiver: Receiver<ServerContextToClusterCmd>,
    ) -> Self {
        let (peer_event_sender, peer_event_receiver) =
            tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
        let (new_peer_sender, new_peer_receiver) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
        let cache = MessageIdCache::new(Duration::from_secs(
            config.message_id_cache_expiry_seconds,
        ));
        Self {
            config,
            cache,
            peers: HashMap::new(),
            sub_index: HashMap::new(),

            dispatcher_sender,
            dispatcher_receiver,
            server_ctx_receiver,

            peer_event_sender,
            peer_event_receiver,

            new_peer_sender,
            new_peer_receiver,
        }
    }

    fn local_handshake(&self) -> Handshake {
        Handshake {
            protocol_version: CLUSTER_PROTOCOL_VERSION,
            node_id: self.config.node_id.clone(),
            cluster_name: self.config.cluster_name.clone(),
            listen_port: self.config.cluster_port,
            node_address: None,
            timestamp: Utc::now().timestamp(),
        }
    }

    /// # Errors
    ///
    /// Returns error if the cluster listener cannot be bound.
    pub async fn run_loop(&mut self) -> Result<(), Error> {
        if !self.config.enable {
            return self.run_disabled_loop().await;
        }

        let listener = TcpListener::bind(self.config.listen_address()).await?;
        log::info!(
            "cluster: node {} listening on {}",
            self.config.node_id,
            self.config.listen_address()
        );

        for seed in self.config.seed_nodes.clone() {
            self.dial(seed);
        }

        let mut heartbeat = tokio::time::interval(Duration::from_millis(
            self.config.heartbeat_interval_ms,
        ));
        // Entries expire at ttl; sweeping at half that cadence bounds how
        // long dead entries linger.
        let mut sweep = tokio::time::interval(Duration::from_secs(
            (self.config.message_id_cache_expiry_seconds / 2).max(1),
        ));

        loop {
            tokio::select! {
                ret = listener.accept() => {
                    match ret {
                        Ok((stream, address)) => {
                            log::info!("cluster: inbound connection from {address}");
                            self.spawn_inbound_handshake(stream, address.ip().to_string());
                        }
                        Err(err) => log::error!("cluster: accept failed: {err}"),
                    }
                }
                Some(new_peer) = self.new_peer_receiver.recv() => {
                    self.on_new_peer(new_peer).await;
                }
                Some(event) = self.peer_event_receiver.recv() => {
                    if let Err(err) = self.on_peer_event(event).await {
                        log::error!("cluster: peer event failed: {err}");
                    }
                }
                Some(cmd) = self.dispatcher_receiver.recv() => {
                    if let Err(err) = self.handle_dispatcher_cmd(cmd).await {
                        log::error!("cluster: dispatcher cmd failed: {err}");
                    }
                }
                _instant = heartbeat.tick() => {
                    self.on_heartbeat_tick().await;
                }
                _instant = sweep.tick() => {
                    self.cache.sweep();
                }
                Some(cmd) = self.server_ctx_receiver.recv() => {
                    match cmd {
                        ServerContextToClusterCmd::Shutdown => {
                            self.shutdown().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Keep the channels alive when clustering is turned off, so the
    /// dispatcher does not observe a closed endpoint.
    async fn run_disabled_loop(&mut self) -> Result<(), Error> {
        loop {
            tokio::select! {
                Some(_cmd) = self.dispatcher_receiver.recv() => (),
                Some(cmd) = self.server_ctx_receiver.recv() => {
                    match cmd {
                        ServerContextToClusterCmd::Shutdown => return Ok(()),
                    }
                }
            }
        }
    }

    fn spawn_inbound_handshake(&self, stream: TcpStream, remote_host: String) {
        let local = self.local_handshake();
        let new_peer_sender = self.new_peer_sender.clone();
        tokio::spawn(async move {
            let mut builder = PeerBuilder::new(stream);
            let handshake = match builder.read_message().await {
                Ok(ClusterMessage::HandshakeRequest(handshake)) => handshake,
                Ok(message) => {
                    log::warn!(
                        "cluster: expected handshake request, got {:?}",
                        message.frame_type()
                    );
                    return;
                }
                Err(err) => {
                    log::warn!("cluster: inbound handshake failed: {err}");
                    return;
                }
            };
            if let Err(err) = builder
                .write_message(&ClusterMessage::HandshakeResponse(local))
                .await
            {
                log::warn!("cluster: failed to answer handshake: {err}");
                return;
            }
            let _ret = new_peer_sender
                .send(NewPeer {
                    builder,
                    handshake,
                    direction: PeerDirection::Inbound,
                    remote_host: Some(remote_host),
                })
                .await;
        });
    }

    /// Dial a remote node, retrying until the connection and handshake
    /// succeed.
    fn dial(&self, address: String) {
        let local = self.local_handshake();
        let new_peer_sender = self.new_peer_sender.clone();
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);
        tokio::spawn(async move {
            loop {
                match dial_once(&address, local.clone()).await {
                    Ok((builder, handshake)) => {
                        let _ret = new_peer_sender
                            .send(NewPeer {
                                builder,
                                handshake,
                                direction: PeerDirection::Outbound,
                                remote_host: None,
                            })
                            .await;
                        return;
                    }
                    Err(err) => {
                        log::warn!("cluster: dial {address} failed: {err}, retrying");
                        tokio::time::sleep(reconnect_delay).await;
                    }
                }
            }
        });
    }

    async fn on_new_peer(&mut self, new_peer: NewPeer) {
        let handshake = new_peer.handshake;
        if handshake.protocol_version != CLUSTER_PROTOCOL_VERSION {
            log::warn!(
                "cluster: rejecting {} with protocol version {}",
                handshake.node_id,
                handshake.protocol_version
            );
            return;
        }
        // A node from a different cluster is rejected by dropping the
        // socket; the builder owns it and closes it here.
        if handshake.cluster_name != self.config.cluster_name {
            log::warn!(
                "cluster: rejecting {} from cluster {:?}",
                handshake.node_id,
                handshake.cluster_name
            );
            return;
        }
        if handshake.node_id == self.config.node_id {
            log::warn!("cluster: refusing connection to self");
            return;
        }
        // The existing connection wins over a duplicate.
        if self.peers.contains_key(&handshake.node_id) {
            log::info!(
                "cluster: duplicate connection from {}, keeping the old one",
                handshake.node_id
            );
            return;
        }

        let address = handshake.node_address.clone().unwrap_or_else(|| {
            let host = new_peer.remote_host.unwrap_or_default();
            format!("{host}:{}", handshake.listen_port)
        });
        let peer = new_peer.builder.into_peer(
            handshake.node_id.clone(),
            address,
            new_peer.direction,
            self.peer_event_sender.clone(),
        );
        log::info!(
            "cluster: node {} joined ({:?})",
            handshake.node_id,
            new_peer.direction
        );

        // Pull the retained set of the fresh peer and ask it for further
        // nodes.
        if let Err(err) = peer.send(ClusterMessage::RetainedSyncRequest).await {
            log::error!("cluster: failed to request retained sync: {err}");
        }
        if let Err(err) = peer.send(ClusterMessage::DiscoverRequest).await {
            log::error!("cluster: failed to request discovery: {err}");
        }

        self.peers.insert(handshake.node_id, peer);
    }

    async fn on_peer_event(&mut self, event: PeerEvent) -> Result<(), Error> {
        match event {
            PeerEvent::Message { node_id, message } => {
                self.on_peer_message(node_id, message).await
            }
            PeerEvent::Closed { node_id } => {
                self.remove_peer(&node_id);
                Ok(())
            }
        }
    }

    async fn on_peer_message(
        &mut self,
        node_id: NodeId,
        message: ClusterMessage,
    ) -> Result<(), Error> {
        match message {
            ClusterMessage::Heartbeat => {
                if let Some(peer) = self.peers.get_mut(&node_id) {
                    peer.touch();
                }
                Ok(())
            }
            ClusterMessage::Publish {
                source_node,
                topic,
                qos,
                retain,
                ticks,
                payload,
            } => {
                self.on_peer_publish(&node_id, source_node, topic, qos, retain, ticks, payload)
                    .await
            }
            ClusterMessage::Subscribe {
                node_id: subscriber,
                filter,
            } => {
                self.sub_index
                    .entry(filter)
                    .or_default()
                    .insert(subscriber);
                Ok(())
            }
            ClusterMessage::Unsubscribe {
                node_id: subscriber,
                filter,
            } => {
                if let Some(nodes) = self.sub_index.get_mut(&filter) {
                    nodes.remove(&subscriber);
                    if nodes.is_empty() {
                        self.sub_index.remove(&filter);
                    }
                }
                Ok(())
            }
            ClusterMessage::NodeLeave {
                node_id: leaving_node,
            } => {
                log::info!("cluster: node {leaving_node} left");
                self.remove_peer(&leaving_node);
                Ok(())
            }
            ClusterMessage::DiscoverRequest => {
                let peers = self
                    .peers
                    .values()
                    .filter(|peer| peer.node_id() != node_id)
                    .map(|peer| PeerInfo {
                        node_id: peer.node_id().to_string(),
                        address: peer.address().to_string(),
                    })
                    .collect();
                self.send_to_peer(&node_id, ClusterMessage::DiscoverResponse { peers })
                    .await;
                Ok(())
            }
            ClusterMessage::DiscoverResponse { peers } => {
                for info in peers {
                    if info.node_id != self.config.node_id
                        && !self.peers.contains_key(&info.node_id)
                    {
                        log::info!(
                            "cluster: discovered node {} at {}",
                            info.node_id,
                            info.address
                        );
                        self.dial(info.address);
                    }
                }
                Ok(())
            }
            ClusterMessage::RetainedSyncRequest => {
                self.dispatcher_sender
                    .send(ClusterToDispatcherCmd::RetainedSnapshotRequest { node_id })
                    .await
                    .map(drop)?;
                Ok(())
            }
            ClusterMessage::RetainedSyncData { entries } => {
                let messages = entries
                    .into_iter()
                    .map(|entry| {
                        ApplicationMessage::new(
                            &entry.topic,
                            entry.payload,
                            entry.qos,
                            entry.retain,
                            SourceProtocol::Cluster,
                            &node_id,
                        )
                    })
                    .collect();
                self.dispatcher_sender
                    .send(ClusterToDispatcherCmd::InstallRetained(messages))
                    .await
                    .map(drop)?;
                Ok(())
            }
            ClusterMessage::HandshakeRequest(_) | ClusterMessage::HandshakeResponse(_) => {
                log::warn!("cluster: unexpected handshake frame from {node_id}");
                Ok(())
            }
        }
    }

    /// A peer replicated a publish: deliver locally once and keep the
    /// flood going, with the cache terminating cycles.
    #[allow(clippy::too_many_arguments)]
    async fn on_peer_publish(
        &mut self,
        from_node: &str,
        source_node: String,
        topic: String,
        qos: codec::QoS,
        retain: bool,
        ticks: i64,
        payload: bytes::Bytes,
    ) -> Result<(), Error> {
        if self.config.enable_deduplication {
            let fp = fingerprint(&source_node, &topic, &payload, ticks);
            if !self.cache.insert(fp) {
                log::debug!("cluster: suppressed duplicate publish of {topic}");
                return Ok(());
            }
        }

        let published_at = Utc
            .timestamp_opt(ticks, 0)
            .single()
            .unwrap_or_else(Utc::now);
        let message = ApplicationMessage::new(
            &topic,
            payload.clone(),
            qos,
            retain,
            SourceProtocol::Cluster,
            &source_node,
        )
        .with_published_at(published_at);
        self.dispatcher_sender
            .send(ClusterToDispatcherCmd::Publish(message))
            .await
            .map(drop)?;

        // Forward to every peer which cannot have seen it from us:
        // neither the one it came from nor its origin.
        let wire = ClusterMessage::Publish {
            source_node: source_node.clone(),
            topic,
            qos,
            retain,
            ticks,
            payload,
        };
        self.broadcast(&wire, &[from_node, &source_node]).await;
        Ok(())
    }

    pub(crate) async fn handle_dispatcher_cmd(
        &mut self,
        cmd: DispatcherToClusterCmd,
    ) -> Result<(), Error> {
        match cmd {
            DispatcherToClusterCmd::Publish(message) => {
                self.on_local_publish(&message).await;
                Ok(())
            }
            DispatcherToClusterCmd::SubscriptionAdded(filter) => {
                let wire = ClusterMessage::Subscribe {
                    node_id: self.config.node_id.clone(),
                    filter,
                };
                self.broadcast(&wire, &[]).await;
                Ok(())
            }
            DispatcherToClusterCmd::SubscriptionRemoved(filter) => {
                let wire = ClusterMessage::Unsubscribe {
                    node_id: self.config.node_id.clone(),
                    filter,
                };
                self.broadcast(&wire, &[]).await;
                Ok(())
            }
            DispatcherToClusterCmd::RetainedSnapshot { node_id, messages } => {
                let entries = messages
                    .into_iter()
                    .map(|message| RetainedEntry {
                        topic: message.topic().to_string(),
                        qos: message.qos(),
                        retain: true,
                        payload: message.payload().clone(),
                    })
                    .collect();
                self.send_to_peer(&node_id, ClusterMessage::RetainedSyncData { entries })
                    .await;
                Ok(())
            }
        }
    }

    /// Broadcast a locally published message to every peer.
    async fn on_local_publish(&mut self, message: &ApplicationMessage) {
        let ticks = message.published_at().timestamp();
        if self.config.enable_deduplication {
            let fp = fingerprint(
                &self.config.node_id,
                message.topic(),
                message.payload(),
                ticks,
            );
            if !self.cache.insert(fp) {
                log::debug!(
                    "cluster: local publish of {} already broadcast",
                    message.topic()
                );
                return;
            }
        }

        let wire = ClusterMessage::Publish {
            source_node: self.config.node_id.clone(),
            topic: message.topic().to_string(),
            qos: message.qos(),
            retain: message.retain(),
            ticks,
            payload: message.payload().clone(),
        };
        self.broadcast(&wire, &[]).await;
    }

    async fn broadcast(&self, message: &ClusterMessage, except: &[&str]) {
        for peer in self.peers.values() {
            if except.contains(&peer.node_id()) {
                continue;
            }
            if let Err(err) = peer.send(message.clone()).await {
                log::error!("cluster: broadcast to {} failed: {err}", peer.node_id());
            }
        }
    }

    async fn send_to_peer(&self, node_id: &str, message: ClusterMessage) {
        if let Some(peer) = self.peers.get(node_id) {
            if let Err(err) = peer.send(message).await {
                log::error!("cluster: send to {node_id} failed: {err}");
            }
        } else {
            log::warn!("cluster: no peer with node id {node_id}");
        }
    }

    fn remove_peer(&mut self, node_id: &str) {
        if let Some(peer) = self.peers.remove(node_id) {
            peer.shutdown();
            log::info!("cluster: removed peer {node_id}");
        }
        for nodes in self.sub_index.values_mut() {
            nodes.remove(node_id);
        }
        self.sub_index.retain(|_filter, nodes| !nodes.is_empty());
    }

    /// Send heartbeats and drop peers which went silent.
    async fn on_heartbeat_tick(&mut self) {
        let timeout = Duration::from_millis(self.config.node_timeout_ms);
        let stale: Vec<NodeId> = self
            .peers
            .values()
            .filter(|peer| peer.is_stale(timeout))
            .map(|peer| peer.node_id().to_string())
            .collect();
        for node_id in stale {
            log::warn!("cluster: peer {node_id} timed out");
            self.remove_peer(&node_id);
        }

        self.broadcast(&ClusterMessage::Heartbeat, &[]).await;
    }

    async fn shutdown(&mut self) {
        log::info!("cluster: shutting down, leaving {} peers", self.peers.len());
        let wire = ClusterMessage::NodeLeave {
            node_id: self.config.node_id.clone(),
        };
        self.broadcast(&wire, &[]).await;
        for (_node_id, peer) in self.peers.drain() {
            peer.shutdown();
        }
    }
}

async fn dial_once(
    address: &str,
    local: Handshake,
) -> Result<(PeerBuilder, Handshake), Error> {
    let stream = TcpStream::connect(address).await?;
    let mut builder = PeerBuilder::new(stream);
    builder
        .write_message(&ClusterMessage::HandshakeRequest(local))
        .await?;
    match builder.read_message().await? {
        ClusterMessage::HandshakeResponse(handshake) => Ok((builder, handshake)),
        message => Err(Error::from_string(
            crate::error::ErrorKind::ClusterError,
            format!(
                "expected handshake response, got {:?}",
                message.frame_type()
            ),
        )),
    }
}
