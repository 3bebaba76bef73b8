// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from sessions.

use codec::{PacketId, QoS};

use super::{Listener, SessionCtx};
use crate::commands::{
    ConnectAckResult, ConnectData, ListenerToAclCmd, ListenerToAuthCmd, ListenerToDispatcherCmd,
    ListenerToSessionCmd, SessionToListenerCmd,
};
use crate::error::Error;
use crate::hooks::{AuthContext, SubscribeRequest};
use crate::message::{ApplicationMessage, SourceProtocol};
use crate::types::SessionId;

impl Listener {
    pub(super) async fn handle_session_cmd(
        &mut self,
        cmd: SessionToListenerCmd,
    ) -> Result<(), Error> {
        match cmd {
            SessionToListenerCmd::Connect(session_id, data) => {
                self.on_session_connect(session_id, data).await
            }
            SessionToListenerCmd::Publish(session_id, packet_id, message) => {
                self.on_session_publish(session_id, packet_id, message).await
            }
            SessionToListenerCmd::Subscribe(session_id, packet_id, topics) => {
                self.on_session_subscribe(session_id, packet_id, topics)
                    .await
            }
            SessionToListenerCmd::Unsubscribe(session_id, packet_id, topics) => {
                self.on_session_unsubscribe(session_id, packet_id, topics)
                    .await
            }
            SessionToListenerCmd::Disconnect {
                session_id,
                clean_disconnect,
            } => self.on_session_disconnect(session_id, clean_disconnect).await,
        }
    }

    async fn on_session_connect(
        &mut self,
        session_id: SessionId,
        data: ConnectData,
    ) -> Result<(), Error> {
        // Reject anonymous clients before running the authenticator.
        if !self.allow_anonymous && data.username.is_none() {
            log::warn!(
                "listener {}: anonymous connect rejected, client {}",
                self.id,
                data.client_id
            );
            self.send_session_cmd(
                session_id,
                ListenerToSessionCmd::ConnectAck {
                    result: ConnectAckResult::NotAuthorized,
                    assigned_client_id: None,
                },
            )
            .await;
            return Ok(());
        }

        let context = AuthContext {
            client_id: data.client_id.clone(),
            username: data.username.clone(),
            password: data.password.clone(),
            protocol_level: data.protocol_level,
        };
        self.pending_connects.insert(session_id, data);
        self.auth_sender
            .send(ListenerToAuthCmd::RequestAuth(self.id, session_id, context))
            .await
            .map(drop)?;
        Ok(())
    }

    /// Continue the connect handshake once the authenticator answered.
    pub(super) async fn finish_session_connect(
        &mut self,
        session_id: SessionId,
        data: ConnectData,
    ) -> Result<(), Error> {
        // An existing session with the same client id is force-closed. The
        // replacement neither inherits nor fires the old will message.
        if let Some(&old_session_id) = self.client_ids.get(&data.client_id) {
            if old_session_id != session_id {
                log::info!(
                    "listener {}: client id {} taken over by session {session_id}",
                    self.id,
                    data.client_id
                );
                if let Some(old_ctx) = self.session_ctxs.remove(&old_session_id) {
                    self.dispatcher_sender
                        .send(ListenerToDispatcherCmd::SessionDisconnected {
                            session_gid: self.session_gid(old_session_id),
                            client_id: old_ctx.client_id,
                            clean_session: old_ctx.clean_session,
                        })
                        .await
                        .map(drop)?;
                }
                self.send_session_cmd(old_session_id, ListenerToSessionCmd::Disconnect)
                    .await;
            }
        }

        self.client_ids.insert(data.client_id.clone(), session_id);
        self.session_ctxs.insert(
            session_id,
            SessionCtx {
                client_id: data.client_id.clone(),
                username: data.username.clone(),
                clean_session: data.clean_session,
                will: data.will.clone(),
                assigned_client_id: if data.assigned_client_id {
                    Some(data.client_id.clone())
                } else {
                    None
                },
            },
        );

        // The dispatcher answers with the session-present flag; the CONNACK
        // goes out when that answer arrives.
        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::SessionConnected {
                session_gid: self.session_gid(session_id),
                client_id: data.client_id,
                clean_session: data.clean_session,
            })
            .await
            .map(drop)?;
        Ok(())
    }

    async fn on_session_publish(
        &mut self,
        session_id: SessionId,
        packet_id: PacketId,
        message: ApplicationMessage,
    ) -> Result<(), Error> {
        let Some(ctx) = self.session_ctxs.get(&session_id) else {
            log::warn!(
                "listener {}: publish from unknown session {session_id}",
                self.id
            );
            return Ok(());
        };
        self.acl_sender
            .send(ListenerToAclCmd::Publish {
                session_gid: self.session_gid(session_id),
                username: ctx.username.clone(),
                packet_id,
                message,
            })
            .await
            .map(drop)?;
        Ok(())
    }

    async fn on_session_subscribe(
        &mut self,
        session_id: SessionId,
        packet_id: PacketId,
        topics: Vec<(String, QoS)>,
    ) -> Result<(), Error> {
        let Some(ctx) = self.session_ctxs.get(&session_id) else {
            log::warn!(
                "listener {}: subscribe from unknown session {session_id}",
                self.id
            );
            return Ok(());
        };
        let client_id = ctx.client_id.clone();
        let username = ctx.username.clone();

        // Every filter starts out accepted; the pre-subscribe hook may
        // reject or downgrade, and the authorizer gets the final word in
        // the acl app.
        let mut requests: Vec<SubscribeRequest> = topics
            .into_iter()
            .map(|(filter, qos)| SubscribeRequest {
                filter,
                accept: true,
                granted_qos: qos,
            })
            .collect();
        self.hooks.client_subscribing(&client_id, &mut requests);

        self.acl_sender
            .send(ListenerToAclCmd::Subscribe {
                session_gid: self.session_gid(session_id),
                client_id,
                username,
                packet_id,
                requests,
            })
            .await
            .map(drop)?;
        Ok(())
    }

    async fn on_session_unsubscribe(
        &mut self,
        session_id: SessionId,
        packet_id: PacketId,
        topics: Vec<String>,
    ) -> Result<(), Error> {
        let Some(ctx) = self.session_ctxs.get(&session_id) else {
            return Ok(());
        };
        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::Unsubscribe {
                session_gid: self.session_gid(session_id),
                client_id: ctx.client_id.clone(),
                packet_id,
                topics,
            })
            .await
            .map(drop)?;
        Ok(())
    }

    async fn on_session_disconnect(
        &mut self,
        session_id: SessionId,
        clean_disconnect: bool,
    ) -> Result<(), Error> {
        self.session_senders.remove(&session_id);
        self.pending_connects.remove(&session_id);

        // No context: the session never finished its connect handshake,
        // or it was superseded and its state was handed over already.
        let Some(ctx) = self.session_ctxs.remove(&session_id) else {
            return Ok(());
        };

        if self.client_ids.get(&ctx.client_id) == Some(&session_id) {
            self.client_ids.remove(&ctx.client_id);
        }

        // The will fires on every termination which was not a clean
        // client DISCONNECT.
        if !clean_disconnect {
            if let Some(will) = ctx.will {
                log::info!(
                    "listener {}: publishing will of client {}",
                    self.id,
                    ctx.client_id
                );
                let message = ApplicationMessage::new(
                    &will.topic,
                    will.payload,
                    will.qos,
                    will.retain,
                    SourceProtocol::Mqtt,
                    &ctx.client_id,
                );
                self.dispatcher_sender
                    .send(ListenerToDispatcherCmd::Publish { message })
                    .await
                    .map(drop)?;
            }
        }

        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::SessionDisconnected {
                session_gid: self.session_gid(session_id),
                client_id: ctx.client_id,
                clean_session: ctx.clean_session,
            })
            .await
            .map(drop)?;
        Ok(())
    }
}
