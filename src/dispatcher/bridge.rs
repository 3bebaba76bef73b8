// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from the bridge app.

use super::Dispatcher;
use crate::commands::{BridgeToDispatcherCmd, DispatcherToBridgeCmd};
use crate::error::Error;

impl Dispatcher {
    pub(super) async fn handle_bridge_cmd(
        &mut self,
        cmd: BridgeToDispatcherCmd,
    ) -> Result<(), Error> {
        match cmd {
            BridgeToDispatcherCmd::Publish(message) => {
                // Downstream message from the remote broker; `on_publish`
                // does not forward bridge-sourced messages back upstream.
                self.on_publish(message).await;
                Ok(())
            }
            BridgeToDispatcherCmd::RetainedSnapshotRequest { bridge_name } => {
                let messages = self.retained.snapshot();
                self.bridge_sender
                    .send(DispatcherToBridgeCmd::RetainedSnapshot {
                        bridge_name,
                        messages,
                    })
                    .await
                    .map(drop)?;
                Ok(())
            }
        }
    }
}
