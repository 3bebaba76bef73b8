// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from the auth app.

use super::Listener;
use crate::commands::{AuthToListenerCmd, ConnectAckResult, ListenerToSessionCmd};
use crate::error::Error;
use crate::hooks::AuthFailure;
use crate::types::SessionId;

impl Listener {
    pub(super) async fn handle_auth_cmd(&mut self, cmd: AuthToListenerCmd) -> Result<(), Error> {
        match cmd {
            AuthToListenerCmd::ResponseAuth(session_id, result) => {
                self.on_auth_response(session_id, result).await
            }
        }
    }

    async fn on_auth_response(
        &mut self,
        session_id: SessionId,
        result: Result<(), AuthFailure>,
    ) -> Result<(), Error> {
        let Some(data) = self.pending_connects.remove(&session_id) else {
            // The session went away while the auth check was running.
            log::debug!(
                "listener {}: auth response for unknown session {session_id}",
                self.id
            );
            return Ok(());
        };

        match result {
            Ok(()) => self.finish_session_connect(session_id, data).await,
            Err(failure) => {
                log::warn!(
                    "listener {}: connect of {} rejected: {failure:?}",
                    self.id,
                    data.client_id
                );
                self.send_session_cmd(
                    session_id,
                    ListenerToSessionCmd::ConnectAck {
                        result: ConnectAckResult::from(failure),
                        assigned_client_id: None,
                    },
                )
                .await;
                Ok(())
            }
        }
    }
}
