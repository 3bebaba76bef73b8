// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from the acl app.

use codec::PacketId;

use super::Listener;
use crate::commands::{
    AclToListenerCmd, ListenerToDispatcherCmd, ListenerToSessionCmd,
};
use crate::error::Error;
use crate::hooks::{PublishAckReason, SubscribeRequest};
use crate::message::ApplicationMessage;
use crate::types::SessionId;

impl Listener {
    pub(super) async fn handle_acl_cmd(&mut self, cmd: AclToListenerCmd) -> Result<(), Error> {
        match cmd {
            AclToListenerCmd::PublishAck {
                session_id,
                packet_id,
                message,
                accepted,
            } => {
                self.on_acl_publish_ack(session_id, packet_id, message, accepted)
                    .await
            }
            AclToListenerCmd::SubscribeAck {
                session_id,
                packet_id,
                requests,
            } => {
                self.on_acl_subscribe_ack(session_id, packet_id, requests)
                    .await
            }
        }
    }

    /// Publish pipeline after authorization: size check, pre-publish hook,
    /// ack decision, then hand-over to the dispatcher.
    async fn on_acl_publish_ack(
        &mut self,
        session_id: SessionId,
        packet_id: PacketId,
        message: ApplicationMessage,
        accepted: bool,
    ) -> Result<(), Error> {
        let qos = message.qos();

        if !accepted {
            log::warn!(
                "listener {}: publish to {} denied for {}",
                self.id,
                message.topic(),
                message.source_client_id()
            );
            self.send_session_cmd(
                session_id,
                ListenerToSessionCmd::PublishAck {
                    packet_id,
                    qos,
                    reason: PublishAckReason::NotAuthorized,
                    send_ack: true,
                },
            )
            .await;
            return Ok(());
        }

        if message.payload().len() > self.max_message_size {
            log::warn!(
                "listener {}: publish to {} exceeds max message size",
                self.id,
                message.topic()
            );
            self.send_session_cmd(
                session_id,
                ListenerToSessionCmd::PublishAck {
                    packet_id,
                    qos,
                    reason: PublishAckReason::PacketTooLarge,
                    send_ack: true,
                },
            )
            .await;
            return Ok(());
        }

        // The pre-publish hook may drop the message, suppress the ack or
        // override its reason code.
        let action = self
            .hooks
            .message_publishing(message.source_client_id(), &message);
        self.send_session_cmd(
            session_id,
            ListenerToSessionCmd::PublishAck {
                packet_id,
                qos,
                reason: action.reason,
                send_ack: action.send_ack,
            },
        )
        .await;

        if action.process_message {
            self.dispatcher_sender
                .send(ListenerToDispatcherCmd::Publish { message })
                .await
                .map(drop)?;
        }
        Ok(())
    }

    /// The hook ran before the acl round trip and the authorizer already
    /// had the final word; the surviving requests go straight to the
    /// dispatcher.
    async fn on_acl_subscribe_ack(
        &mut self,
        session_id: SessionId,
        packet_id: PacketId,
        requests: Vec<SubscribeRequest>,
    ) -> Result<(), Error> {
        let Some(ctx) = self.session_ctxs.get(&session_id) else {
            return Ok(());
        };
        let client_id = ctx.client_id.clone();

        self.dispatcher_sender
            .send(ListenerToDispatcherCmd::Subscribe {
                session_gid: self.session_gid(session_id),
                client_id,
                packet_id,
                requests,
            })
            .await
            .map(drop)?;
        Ok(())
    }
}
