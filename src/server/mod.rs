// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Server context: builds the channel mesh between apps, spawns them and
//! coordinates shutdown.

use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use crate::acl::AclApp;
use crate::auth::AuthApp;
use crate::bridge::BridgeApp;
use crate::cluster::ClusterApp;
use crate::commands::{
    ServerContextToAclCmd, ServerContextToAuthCmd, ServerContextToBridgeCmd,
    ServerContextToClusterCmd, ServerContextToDispatcherCmd, ServerContextToListenerCmd,
};
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::events::{EventDispatcher, EventHandler, DEFAULT_EVENT_QUEUE_CAPACITY};
use crate::hooks::{
    AllowAllAuthenticator, AllowAllAuthorizer, Authenticator, Authorizer, NoopPacketHooks,
    PacketHooks,
};
use crate::listener::Listener;
use crate::stream::Acceptor;
use crate::types::ListenerId;

pub mod run;

const CHANNEL_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Owns configuration and pluggable hooks, and drives the whole broker.
pub struct ServerContext {
    config: Config,

    authenticator: Arc<dyn Authenticator>,
    authorizer: Arc<dyn Authorizer>,
    hooks: Arc<dyn PacketHooks>,
    event_handlers: Vec<Box<dyn EventHandler>>,
    on_event_error: Option<Box<dyn Fn(&Error) + Send>>,
}

impl ServerContext {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            authenticator: Arc::new(AllowAllAuthenticator),
            authorizer: Arc::new(AllowAllAuthorizer),
            hooks: Arc::new(NoopPacketHooks),
            event_handlers: Vec::new(),
            on_event_error: None,
        }
    }

    pub fn set_authenticator(&mut self, authenticator: Arc<dyn Authenticator>) -> &mut Self {
        self.authenticator = authenticator;
        self
    }

    pub fn set_authorizer(&mut self, authorizer: Arc<dyn Authorizer>) -> &mut Self {
        self.authorizer = authorizer;
        self
    }

    pub fn set_packet_hooks(&mut self, hooks: Arc<dyn PacketHooks>) -> &mut Self {
        self.hooks = hooks;
        self
    }

    pub fn add_event_handler(&mut self, handler: Box<dyn EventHandler>) -> &mut Self {
        self.event_handlers.push(handler);
        self
    }

    pub fn set_on_event_error(&mut self, callback: Box<dyn Fn(&Error) + Send>) -> &mut Self {
        self.on_event_error = Some(callback);
        self
    }

    /// Run the broker until ctrl-c.
    ///
    /// # Errors
    ///
    /// Returns error if binding sockets fails.
    pub fn run_loop(&mut self, runtime: &Runtime) -> Result<(), Error> {
        runtime.block_on(self.run_internal())
    }

    #[allow(clippy::too_many_lines)]
    async fn run_internal(&mut self) -> Result<(), Error> {
        // Shared app-side channels: every listener sends into the same
        // dispatcher/auth/acl queues.
        let (listener_to_auth_sender, listener_to_auth_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let (listener_to_acl_sender, listener_to_acl_receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (listener_to_dispatcher_sender, listener_to_dispatcher_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);

        let (dispatcher_to_cluster_sender, dispatcher_to_cluster_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let (cluster_to_dispatcher_sender, cluster_to_dispatcher_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let (dispatcher_to_bridge_sender, dispatcher_to_bridge_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);
        let (bridge_to_dispatcher_sender, bridge_to_dispatcher_receiver) =
            mpsc::channel(CHANNEL_CAPACITY);

        // Server context command channels.
        let (ctx_to_auth_sender, ctx_to_auth_receiver) = mpsc::channel(1);
        let (ctx_to_acl_sender, ctx_to_acl_receiver) = mpsc::channel(1);
        let (ctx_to_dispatcher_sender, ctx_to_dispatcher_receiver) = mpsc::channel(1);
        let (ctx_to_cluster_sender, ctx_to_cluster_receiver) = mpsc::channel(1);
        let (ctx_to_bridge_sender, ctx_to_bridge_receiver) = mpsc::channel(1);
        let mut ctx_to_listener_senders = Vec::new();

        // Event dispatcher.
        let mut event_dispatcher = EventDispatcher::new(DEFAULT_EVENT_QUEUE_CAPACITY);
        for handler in std::mem::take(&mut self.event_handlers) {
            event_dispatcher.add_handler(handler);
        }
        if let Some(on_event_error) = self.on_event_error.take() {
            event_dispatcher.set_on_event_error(on_event_error);
        }
        let event_sender = event_dispatcher.sender();
        tokio::spawn(async move {
            event_dispatcher.run_loop().await;
        });

        // Listeners.
        let mut auth_to_listener_senders = Vec::new();
        let mut acl_to_listener_senders = Vec::new();
        let mut dispatcher_to_listener_senders = Vec::new();
        let mut listener_id: ListenerId = 0;
        for listener_config in self.config.listeners().to_vec() {
            listener_id += 1;
            let acceptor = Acceptor::bind(&listener_config).await?;
            log::info!(
                "listener {listener_id}: bound to {} ({:?})",
                listener_config.address,
                listener_config.protocol
            );

            let (session_sender, session_receiver) = mpsc::channel(CHANNEL_CAPACITY);
            let (auth_to_listener_sender, auth_to_listener_receiver) =
                mpsc::channel(CHANNEL_CAPACITY);
            let (acl_to_listener_sender, acl_to_listener_receiver) =
                mpsc::channel(CHANNEL_CAPACITY);
            let (dispatcher_to_listener_sender, dispatcher_to_listener_receiver) =
                mpsc::channel(CHANNEL_CAPACITY);
            let (ctx_to_listener_sender, ctx_to_listener_receiver) = mpsc::channel(1);

            auth_to_listener_senders.push((listener_id, auth_to_listener_sender));
            acl_to_listener_senders.push((listener_id, acl_to_listener_sender));
            dispatcher_to_listener_senders.push((listener_id, dispatcher_to_listener_sender));
            ctx_to_listener_senders.push(ctx_to_listener_sender);

            let mut listener = Listener::new(
                listener_id,
                listener_config,
                self.config.general(),
                self.config.security(),
                Arc::clone(&self.hooks),
                acceptor,
                session_sender,
                session_receiver,
                listener_to_auth_sender.clone(),
                auth_to_listener_receiver,
                listener_to_acl_sender.clone(),
                acl_to_listener_receiver,
                listener_to_dispatcher_sender.clone(),
                dispatcher_to_listener_receiver,
                ctx_to_listener_receiver,
            );
            tokio::spawn(async move {
                if let Err(err) = listener.run_loop().await {
                    log::error!("listener: run loop failed: {err}");
                }
            });
        }

        // Auth app.
        let mut auth_app = AuthApp::new(
            Arc::clone(&self.authenticator),
            auth_to_listener_senders,
            listener_to_auth_receiver,
            ctx_to_auth_receiver,
        );
        tokio::spawn(async move {
            auth_app.run_loop().await;
        });

        // Acl app.
        let mut acl_app = AclApp::new(
            Arc::clone(&self.authorizer),
            acl_to_listener_senders,
            listener_to_acl_receiver,
            ctx_to_acl_receiver,
        );
        tokio::spawn(async move {
            acl_app.run_loop().await;
        });

        // Dispatcher app.
        let mut dispatcher = Dispatcher::new(
            self.config.storage().clone(),
            self.config.cluster().enable,
            event_sender,
            dispatcher_to_listener_senders,
            listener_to_dispatcher_receiver,
            dispatcher_to_cluster_sender,
            cluster_to_dispatcher_receiver,
            dispatcher_to_bridge_sender,
            bridge_to_dispatcher_receiver,
            ctx_to_dispatcher_receiver,
        );
        tokio::spawn(async move {
            dispatcher.run_loop().await;
        });

        // Cluster app.
        let mut cluster_app = ClusterApp::new(
            self.config.cluster().clone(),
            cluster_to_dispatcher_sender,
            dispatcher_to_cluster_receiver,
            ctx_to_cluster_receiver,
        );
        tokio::spawn(async move {
            if let Err(err) = cluster_app.run_loop().await {
                log::error!("cluster: run loop failed: {err}");
            }
        });

        // Bridge app.
        let mut bridge_app = BridgeApp::new(
            self.config.bridges(),
            &bridge_to_dispatcher_sender,
            dispatcher_to_bridge_receiver,
            ctx_to_bridge_receiver,
        );
        tokio::spawn(async move {
            bridge_app.run_loop().await;
        });

        log::info!("tianhe broker is up");
        tokio::signal::ctrl_c().await?;
        log::info!("got ctrl-c, shutting down");

        // Stop accepting and close sessions first, then the overlay
        // connections, then the core.
        for sender in &ctx_to_listener_senders {
            let _ret = sender.send(ServerContextToListenerCmd::Shutdown).await;
        }
        let _ret = ctx_to_cluster_sender
            .send(ServerContextToClusterCmd::Shutdown)
            .await;
        let _ret = ctx_to_bridge_sender
            .send(ServerContextToBridgeCmd::Shutdown)
            .await;
        let _ret = ctx_to_dispatcher_sender
            .send(ServerContextToDispatcherCmd::Shutdown)
            .await;
        let _ret = ctx_to_auth_sender.send(ServerContextToAuthCmd::Shutdown).await;
        let _ret = ctx_to_acl_sender.send(ServerContextToAclCmd::Shutdown).await;

        // No app may block shutdown longer than the grace period.
        tokio::time::sleep(SHUTDOWN_GRACE).await;
        Ok(())
    }
}
