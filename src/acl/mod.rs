// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Acl app: runs the pluggable [`Authorizer`] for publish and subscribe
//! requests.

use std::sync::Arc;
use tokio::sync::mpsc::{Receiver, Sender};

use codec::PacketId;

use crate::commands::{
    AclToListenerCmd, ListenerToAclCmd, ServerContextToAclCmd,
};
use crate::error::{Error, ErrorKind};
use crate::hooks::{Authorizer, SubscribeRequest};
use crate::message::ApplicationMessage;
use crate::types::{ListenerId, SessionGid};

pub struct AclApp {
    authorizer: Arc<dyn Authorizer>,

    listener_senders: Vec<(ListenerId, Sender<AclToListenerCmd>)>,
    listener_receiver: Receiver<ListenerToAclCmd>,

    server_ctx_receiver: Receiver<ServerContextToAclCmd>,
}

impl AclApp {
    #[must_use]
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        listener_senders: Vec<(ListenerId, Sender<AclToListenerCmd>)>,
        listener_receiver: Receiver<ListenerToAclCmd>,
        server_ctx_receiver: Receiver<ServerContextToAclCmd>,
    ) -> Self {
        Self {
            authorizer,
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
                        log::error!("acl: failed to handle listener cmd: {err}");
                    }
                }
                Some(cmd) = self.server_ctx_receiver.recv() => {
                    match cmd {
                        ServerContextToAclCmd::Shutdown => return,
                    }
                }
            }
        }
    }

    async fn handle_listener_cmd(&mut self, cmd: ListenerToAclCmd) -> Result<(), Error> {
        match cmd {
            ListenerToAclCmd::Publish {
                session_gid,
                username,
                packet_id,
                message,
            } => {
                self.on_listener_check_publish(session_gid, username.as_deref(), packet_id, message)
                    .await
            }
            ListenerToAclCmd::Subscribe {
                session_gid,
                client_id,
                username,
                packet_id,
                requests,
            } => {
                self.on_listener_check_subscribe(
                    session_gid,
                    &client_id,
                    username.as_deref(),
                    packet_id,
                    requests,
                )
                .await
            }
        }
    }

    async fn on_listener_check_publish(
        &mut self,
        session_gid: SessionGid,
        username: Option<&str>,
        packet_id: PacketId,
        message: ApplicationMessage,
    ) -> Result<(), Error> {
        let accepted =
            self.authorizer
                .can_publish(message.source_client_id(), username, message.topic());
        let cmd = AclToListenerCmd::PublishAck {
            session_id: session_gid.session_id(),
            packet_id,
            message,
            accepted,
        };
        self.send_to_listener(session_gid.listener_id(), cmd).await
    }

    /// The authorizer is the last word on each filter: it is only asked
    /// about requests the pre-subscribe hook left accepted, and a denial
    /// here cannot be undone by anything downstream.
    async fn on_listener_check_subscribe(
        &mut self,
        session_gid: SessionGid,
        client_id: &str,
        username: Option<&str>,
        packet_id: PacketId,
        mut requests: Vec<SubscribeRequest>,
    ) -> Result<(), Error> {
        for request in &mut requests {
            request.accept = request.accept
                && self
                    .authorizer
                    .can_subscribe(client_id, username, &request.filter);
        }
        let cmd = AclToListenerCmd::SubscribeAck {
            session_id: session_gid.session_id(),
            packet_id,
            requests,
        };
        self.send_to_listener(session_gid.listener_id(), cmd).await
    }

    async fn send_to_listener(
        &mut self,
        listener_id: ListenerId,
        cmd: AclToListenerCmd,
    ) -> Result<(), Error> {
        for (sender_listener_id, sender) in &self.listener_senders {
            if *sender_listener_id == listener_id {
                sender.send(cmd).await?;
                return Ok(());
            }
        }
        Err(Error::from_string(
            ErrorKind::ChannelError,
            format!("acl: no listener sender with id {listener_id}"),
        ))
    }
}
