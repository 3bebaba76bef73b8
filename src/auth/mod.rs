// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Auth app: runs the pluggable [`Authenticator`] for connect requests.

use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{
    AuthToListenerCmd, ListenerToAuthCmd, ServerContextToAuthCmd,
};
use crate::error::{Error, ErrorKind};
use crate::hooks::{AuthContext, Authenticator};
use crate::types::{ListenerId, SessionId};

pub struct AuthApp {
    authenticator: Arc<dyn Authenticator>,

    listener_senders: Vec<(ListenerId, Sender<AuthToListenerCmd>)>,
    listener_receiver: Receiver<ListenerToAuthCmd>,

    server_ctx_receiver: Receiver<ServerContextToAuthCmd>,
}

impl AuthApp {
    #[must_use]
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        listener_senders: Vec<(ListenerId, Sender<AuthToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToAuthCmd>,
        server_ctx_receiver: Receiver<ServerContextToAuthCmd>,
    ) -> Self {
        Self {
            authenticator,
            listener_senders,
            listener_receiver,
            server_ctx_receiver,
        }
    }

    pub async fn run_loop(&mut self) {
        loop {
            tokio::select! {
                Some(cmd) = self.listener_receiver.recv() => {
                    if let Err(err) = self.handle_listener_cmd(cmd).await {
                        log::error!("auth: failed to handle listener cmd: {err}");
                    }
                }
                Some(cmd) = self.server_ctx_receiver.recv() => {
                    match cmd {
                        ServerContextToAuthCmd::Shutdown => return,
                    }
                }
            }
        }
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToAuthCmd) -> Result<(), Error> {
        match cmd {
            ListenerToAuthCmd::RequestAuth(listener_id, session_id, context) => {
                self.on_listener_request_auth(listener_id, session_id, &context)
                    .await
            }
        }
    }

    async fn on_listener_request_auth(
        &mut self,
        listener_id: ListenerId,
        session_id: SessionId,
        context: &AuthContext,
    ) -> Result<(), Error> {
        let result = self.authenticator.authenticate(context);
        if let Err(failure) = result {
            log::warn!(
                "auth: rejected client {}: {failure:?}",
                context.client_id
            );
        }

        for (sender_listener_id, sender) in &self.listener_senders {
            if *sender_listener_id == listener_id {
                let cmd = AuthToListenerCmd::ResponseAuth(session_id, result);
                sender.send(cmd).await?;
                return Ok(());
            }
        }

        Err(Error::from_string(
            ErrorKind::ChannelError,
            format!("auth: no listener sender with id {listener_id}"),
        ))
    }
}
