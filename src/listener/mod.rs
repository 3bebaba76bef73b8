// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Listener app: owns one accepting socket and all sessions accepted
//! from it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{
    AclToListenerCmd, AuthToListenerCmd, ConnectData, DispatcherToListenerCmd, ListenerToAclCmd,
    ListenerToAuthCmd, ListenerToDispatcherCmd, ListenerToSessionCmd, ServerContextToListenerCmd,
    SessionToListenerCmd, WillMessage,
};
use crate::config;
use crate::hooks::PacketHooks;
use crate::session::SessionConfig;
use crate::stream::Acceptor;
use crate::types::{ListenerId, SessionGid, SessionId};

mod acl;
mod auth;
mod dispatcher;
mod init;
mod run;
mod session;

pub(crate) const CHANNEL_CAPACITY: usize = 16;

/// State kept for one accepted session.
#[derive(Debug, Clone)]
struct SessionCtx {
    client_id: String,
    username: Option<String>,
    clean_session: bool,

    /// Will message captured at connect; dropped on clean disconnect or
    /// when another connect takes the client id over.
    will: Option<WillMessage>,

    /// Set when the broker generated the client id.
    assigned_client_id: Option<String>,
}

pub struct Listener {
    id: ListenerId,
    config: config::Listener,
    session_config: SessionConfig,
    allow_anonymous: bool,
    max_message_size: usize,
    hooks: Arc<dyn PacketHooks>,

    acceptor: Acceptor,
    current_session_id: SessionId,

    session_senders: HashMap<SessionId, Sender<ListenerToSessionCmd>>,
    client_ids: BTreeMap<String, SessionId>,
    session_ctxs: HashMap<SessionId, SessionCtx>,

    /// Connects forwarded to the auth app, waiting for the verdict.
    pending_connects: HashMap<SessionId, ConnectData>,

    session_sender: Sender<SessionToListenerCmd>,
    session_receiver: Option<Receiver<SessionToListenerCmd>>,

    auth_sender: Sender<ListenerToAuthCmd>,
    auth_receiver: Option<Receiver<AuthToListenerCmd>>,

    acl_sender: Sender<ListenerToAclCmd>,
    acl_receiver: Option<Receiver<AclToListenerCmd>>,

    dispatcher_sender: Sender<ListenerToDispatcherCmd>,
    dispatcher_receiver: Option<Receiver<DispatcherToListenerCmd>>,

    server_ctx_receiver: Option<Receiver<ServerContextToListenerCmd>>,
}

impl Listener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ListenerId,
        config: config::Listener,
        general: &config::General,
        security: &config::Security,
        hooks: Arc<dyn PacketHooks>,
        acceptor: Acceptor,
        // session module
        session_sender: Sender<SessionToListenerCmd>,
        session_receiver: Receiver<SessionToListenerCmd>,
        // auth app
        auth_sender: Sender<ListenerToAuthCmd>,
        auth_receiver: Receiver<AuthToListenerCmd>,
        // acl app
        acl_sender: Sender<ListenerToAclCmd>,
        acl_receiver: Receiver<AclToListenerCmd>,
        // dispatcher app
        dispatcher_sender: Sender<ListenerToDispatcherCmd>,
        dispatcher_receiver: Receiver<DispatcherToListenerCmd>,
        // server context
        server_ctx_receiver: Receiver<ServerContextToListenerCmd>,
    ) -> Self {
        Self {
            id,
            config,
            session_config: SessionConfig::new(general),
            allow_anonymous: security.allow_anonymous,
            max_message_size: general.max_message_size,
            hooks,

            acceptor,
            current_session_id: 0,

            session_senders: HashMap::new(),
            client_ids: BTreeMap::new(),
            session_ctxs: HashMap::new(),
            pending_connects: HashMap::new(),

            session_sender,
            session_receiver: Some(session_receiver),

            auth_sender,
            auth_receiver: Some(auth_receiver),

            acl_sender,
            acl_receiver: Some(acl_receiver),

            dispatcher_sender,
            dispatcher_receiver: Some(dispatcher_receiver),

            server_ctx_receiver: Some(server_ctx_receiver),
        }
    }

    const fn session_gid(&self, session_id: SessionId) -> SessionGid {
        SessionGid::new(self.id, session_id)
    }

    fn next_session_id(&mut self) -> SessionId {
        self.current_session_id += 1;
        self.current_session_id
    }

    /// Send a command to one session, ignoring sessions which are already
    /// gone.
    async fn send_session_cmd(&mut self, session_id: SessionId, cmd: ListenerToSessionCmd) {
        if let Some(sender) = self.session_senders.get(&session_id) {
            if let Err(err) = sender.send(cmd).await {
                log::error!(
                    "listener {}: failed to send cmd to session {session_id}: {err}",
                    self.id
                );
            }
        } else {
            log::debug!(
                "listener {}: session {session_id} already removed",
                self.id
            );
        }
    }
}
