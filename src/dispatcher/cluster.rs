// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from the cluster app.

use super::Dispatcher;
use crate::commands::{ClusterToDispatcherCmd, DispatcherToClusterCmd};
use crate::error::Error;
use crate::types::NodeId;

impl Dispatcher {
    pub(super) async fn handle_cluster_cmd(
        &mut self,
        cmd: ClusterToDispatcherCmd,
    ) -> Result<(), Error> {
        match cmd {
            ClusterToDispatcherCmd::Publish(message) => {
                // Replicated publish: deliver locally; `on_publish` skips
                // the cluster broadcast for cluster-sourced messages.
                self.on_publish(message).await;
                Ok(())
            }
            ClusterToDispatcherCmd::RetainedSnapshotRequest { node_id } => {
                self.on_retained_snapshot_request(node_id).await
            }
            ClusterToDispatcherCmd::InstallRetained(messages) => {
                log::info!(
                    "dispatcher: installing {} retained messages from peer",
                    messages.len()
                );
                for message in messages {
                    self.retained.install(message);
                }
                Ok(())
            }
        }
    }

    async fn on_retained_snapshot_request(&mut self, node_id: NodeId) -> Result<(), Error> {
        let messages = self.retained.snapshot();
        self.cluster_sender
            .send(DispatcherToClusterCmd::RetainedSnapshot { node_id, messages })
            .await
            .map(drop)?;
        Ok(())
    }
}
