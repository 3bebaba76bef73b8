// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from the dispatcher app.

use super::Listener;
use crate::commands::{ConnectAckResult, DispatcherToListenerCmd, ListenerToSessionCmd};
use crate::error::Error;
use crate::types::SessionId;

impl Listener {
    pub(super) async fn handle_dispatcher_cmd(
        &mut self,
        cmd: DispatcherToListenerCmd,
    ) -> Result<(), Error> {
        match cmd {
            DispatcherToListenerCmd::SessionPresent {
                session_id,
                present,
            } => {
                self.on_dispatcher_session_present(session_id, present)
                    .await;
                Ok(())
            }
            DispatcherToListenerCmd::Publish {
                session_id,
                message,
                granted_qos,
                retain,
            } => {
                self.send_session_cmd(
                    session_id,
                    ListenerToSessionCmd::Publish {
                        message,
                        granted_qos,
                        retain,
                    },
                )
                .await;
                Ok(())
            }
            DispatcherToListenerCmd::SubscribeAck {
                session_id,
                packet_id,
                acks,
            } => {
                self.send_session_cmd(
                    session_id,
                    ListenerToSessionCmd::SubscribeAck { packet_id, acks },
                )
                .await;
                Ok(())
            }
            DispatcherToListenerCmd::UnsubscribeAck {
                session_id,
                packet_id,
                existed,
            } => {
                self.send_session_cmd(
                    session_id,
                    ListenerToSessionCmd::UnsubscribeAck { packet_id, existed },
                )
                .await;
                Ok(())
            }
        }
    }

    /// Complete the connect handshake with the session-present flag
    /// computed by the dispatcher.
    async fn on_dispatcher_session_present(&mut self, session_id: SessionId, present: bool) {
        let assigned_client_id = self
            .session_ctxs
            .get(&session_id)
            .and_then(|ctx| ctx.assigned_client_id.clone());
        self.send_session_cmd(
            session_id,
            ListenerToSessionCmd::ConnectAck {
                result: ConnectAckResult::Accepted {
                    session_present: present,
                },
                assigned_client_id,
            },
        )
        .await;
    }
}
