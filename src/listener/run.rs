// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

use super::Listener;
use crate::commands::{ListenerToSessionCmd, ServerContextToListenerCmd};
use crate::error::{Error, ErrorKind};

impl Listener {
    /// # Errors
    ///
    /// Returns error if one of the receivers was taken already.
    pub async fn run_loop(&mut self) -> Result<(), Error> {
        let mut session_receiver = self
            .session_receiver
            .take()
            .ok_or_else(|| Error::new(ErrorKind::ChannelError, "session_receiver is None"))?;
        let mut auth_receiver = self
            .auth_receiver
            .take()
            .ok_or_else(|| Error::new(ErrorKind::ChannelError, "auth_receiver is None"))?;
        let mut acl_receiver = self
            .acl_receiver
            .take()
            .ok_or_else(|| Error::new(ErrorKind::ChannelError, "acl_receiver is None"))?;
        let mut dispatcher_receiver = self
            .dispatcher_receiver
            .take()
            .ok_or_else(|| Error::new(ErrorKind::ChannelError, "dispatcher_receiver is None"))?;
        let mut server_ctx_receiver = self
            .server_ctx_receiver
            .take()
            .ok_or_else(|| Error::new(ErrorKind::ChannelError, "server_ctx_receiver is None"))?;

        loop {
            tokio::select! {
                ret = self.acceptor.accept() => {
                    match ret {
                        Ok((stream, address)) => self.new_connection(stream, address),
                        Err(err) => {
                            log::error!("listener {}: accept failed: {err}", self.id);
                        }
                    }
                }
                Some(cmd) = session_receiver.recv() => {
                    if let Err(err) = self.handle_session_cmd(cmd).await {
                        log::error!("listener {}: session cmd failed: {err}", self.id);
                    }
                }
                Some(cmd) = auth_receiver.recv() => {
                    if let Err(err) = self.handle_auth_cmd(cmd).await {
                        log::error!("listener {}: auth cmd failed: {err}", self.id);
                    }
                }
                Some(cmd) = acl_receiver.recv() => {
                    if let Err(err) = self.handle_acl_cmd(cmd).await {
                        log::error!("listener {}: acl cmd failed: {err}", self.id);
                    }
                }
                Some(cmd) = dispatcher_receiver.recv() => {
                    if let Err(err) = self.handle_dispatcher_cmd(cmd).await {
                        log::error!("listener {}: dispatcher cmd failed: {err}", self.id);
                    }
                }
                Some(cmd) = server_ctx_receiver.recv() => {
                    match cmd {
                        ServerContextToListenerCmd::Shutdown => {
                            self.shutdown().await;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Force-close every session; their will messages do not fire.
    async fn shutdown(&mut self) {
        log::info!("listener {}: shutting down", self.id);
        let session_ids: Vec<_> = self.session_senders.keys().copied().collect();
        for session_id in session_ids {
            self.send_session_cmd(session_id, ListenerToSessionCmd::Disconnect)
                .await;
        }
    }
}
