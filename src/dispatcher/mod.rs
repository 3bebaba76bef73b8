// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Dispatcher app: the message router.
//!
//! Owns subscriptions, the retained store, offline queues and persistent
//! session records, and coordinates the publish pipeline across listeners,
//! cluster and bridges.

use std::collections::HashMap;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{
    BridgeToDispatcherCmd, ClusterToDispatcherCmd, DispatcherToBridgeCmd, DispatcherToClusterCmd,
    DispatcherToListenerCmd, ListenerToDispatcherCmd, ServerContextToDispatcherCmd,
};
use crate::config;
use crate::events::EventSender;
use crate::types::{ListenerId, SessionGid};

mod bridge;
mod cluster;
mod listener;
mod offline;
mod retain;
mod sessions;
mod trie;

pub use offline::OfflineQueues;
pub use retain::RetainedStore;
pub use sessions::CachedSessions;
pub use trie::SubTrie;

/// Info kept per live session.
#[derive(Debug, Clone)]
struct SessionRecord {
    client_id: String,
}

pub struct Dispatcher {
    storage_config: config::Storage,
    cluster_enabled: bool,

    sub_trie: SubTrie,
    cached_sessions: CachedSessions,
    retained: RetainedStore,
    offline: OfflineQueues,

    session_records: HashMap<SessionGid, SessionRecord>,
    client_index: HashMap<String, SessionGid>,

    /// Live subscription count per filter, driving cluster gossip on the
    /// 0 -> 1 and 1 -> 0 transitions.
    filter_counts: HashMap<String, usize>,

    event_sender: EventSender,

    listener_senders: HashMap<ListenerId, Sender<DispatcherToListenerCmd>>,
    listener_receiver: Receiver<ListenerToDispatcherCmd>,

    cluster_sender: Sender<DispatcherToClusterCmd>,
    cluster_receiver: Receiver<ClusterToDispatcherCmd>,

    bridge_sender: Sender<DispatcherToBridgeCmd>,
    bridge_receiver: Receiver<BridgeToDispatcherCmd>,

    server_ctx_receiver: Receiver<ServerContextToDispatcherCmd>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        storage_config: config::Storage,
        cluster_enabled: bool,
        event_sender: EventSender,
        listener_senders: Vec<(ListenerId, Sender<DispatcherToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToDispatcherCmd>,
        cluster_sender: Sender<DispatcherToClusterCmd>,
        cluster_receiver: Receiver<ClusterToDispatcherCmd>,
        bridge_sender: Sender<DispatcherToBridgeCmd>,
        bridge_receiver: Receiver<BridgeToDispatcherCmd>,
        server_ctx_receiver: Receiver<ServerContextToDispatcherCmd>,
    ) -> Self {
        let offline = OfflineQueues::new(storage_config.max_offline_messages_per_client);
        Self {
            storage_config,
            cluster_enabled,

            sub_trie: SubTrie::new(),
            cached_sessions: CachedSessions::new(),
            retained: RetainedStore::new(),
            offline,

            session_records: HashMap::new(),
            client_index: HashMap::new(),
            filter_counts: HashMap::new(),

            event_sender,

            listener_senders: listener_senders.into_iter().collect(),
            listener_receiver,

            cluster_sender,
            cluster_receiver,

            bridge_sender,
            bridge_receiver,

            server_ctx_receiver,
        }
    }

    pub async fn run_loop(&mut self) {
        loop {
            tokio::select! {
                Some(cmd) = self.listener_receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("dispatcher: listener cmd failed: {err}");
                    }
                }
                Some(cmd) = self.cluster_receiver.recv() => {
                    if let Err(err) = self.handle_cluster_cmd(cmd).await {
                        log::error!("dispatcher: cluster cmd failed: {err}");
                    }
                }
                Some(cmd) = self.bridge_receiver.recv() => {
                    if let Err(err) = self.handle_bridge_cmd(cmd).await {
                        log::error!("dispatcher: bridge cmd failed: {err}");
                    }
                }
                Some(cmd) = self.server_ctx_receiver.recv() => {
                    match cmd {
                        ServerContextToDispatcherCmd::Shutdown => {
                            log::info!("dispatcher: shutting down");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn send_to_listener(&self, session_gid: SessionGid, cmd: DispatcherToListenerCmd) {
        if let Some(sender) = self.listener_senders.get(&session_gid.listener_id()) {
            if let Err(err) = sender.send(cmd).await {
                log::error!(
                    "dispatcher: failed to send cmd to listener {}: {err}",
                    session_gid.listener_id()
                );
            }
        } else {
            log::error!(
                "dispatcher: no listener sender with id {}",
                session_gid.listener_id()
            );
        }
    }
}
