// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Bridge app: outbound MQTT client sessions mirroring topics to and from
//! remote brokers.

use tokio::sync::mpsc::{Receiver, Sender};

use crate::commands::{
    BridgeToDispatcherCmd, DispatcherToBridgeCmd, ServerContextToBridgeCmd,
};
use crate::config;
use crate::message::ApplicationMessage;

mod instance;
mod rule;
mod stream;

pub use instance::BridgeInstance;
pub use rule::Rule;
pub use stream::BridgeStream;

const CHANNEL_CAPACITY: usize = 64;

/// Commands sent from the bridge app to one bridge instance.
#[derive(Debug, Clone)]
pub enum BridgeInstanceCmd {
    /// A local publish to match against the upstream rules.
    Publish(ApplicationMessage),

    /// Retained messages to replay upstream after a connect.
    RetainedSnapshot(Vec<ApplicationMessage>),

    Shutdown,
}

/// Fans pipeline traffic out to all configured bridge instances.
pub struct BridgeApp {
    instance_senders: Vec<(String, Sender<BridgeInstanceCmd>)>,

    dispatcher_receiver: Receiver<DispatcherToBridgeCmd>,
    server_ctx_receiver: Receiver<ServerContextToBridgeCmd>,
}

impl BridgeApp {
    /// Spawn one instance task per configured bridge.
    #[must_use]
    pub fn new(
        bridges: &[config::Bridge],
        dispatcher_sender: &Sender<BridgeToDispatcherCmd>,
        dispatcher_receiver: Receiver<DispatcherToBridgeCmd>,
        server_ctx_receiver: Receiver<ServerContextToBridgeCmd>,
    ) -> Self {
        let mut instance_senders = Vec::with_capacity(bridges.len());
        for bridge_config in bridges {
            let (sender, receiver) = tokio::sync::mpsc::channel(CHANNEL_CAPACITY);
            let instance = BridgeInstance::new(
                bridge_config.clone(),
                dispatcher_sender.clone(),
                receiver,
            );
            instance_senders.push((bridge_config.name.clone(), sender));
            tokio::spawn(instance.run_loop());
        }

        Self {
            instance_senders,
            dispatcher_receiver,
            server_ctx_receiver,
        }
    }

    pub async fn run_loop(&mut self) {
        loop {
            tokio::select! {
                Some(cmd) = self.dispatcher_receiver.recv() => {
                    self.handle_dispatcher_cmd(cmd).await;
                }
                Some(cmd) = self.server_ctx_receiver.recv() => {
                    match cmd {
                        ServerContextToBridgeCmd::Shutdown => {
                            self.shutdown().await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn handle_dispatcher_cmd(&mut self, cmd: DispatcherToBridgeCmd) {
        match cmd {
            DispatcherToBridgeCmd::Publish(message) => {
                for (name, sender) in &self.instance_senders {
                    if let Err(err) = sender
                        .send(BridgeInstanceCmd::Publish(message.clone()))
                        .await
                    {
                        log::error!("bridge: failed to send publish to {name}: {err}");
                    }
                }
            }
            DispatcherToBridgeCmd::RetainedSnapshot {
                bridge_name,
                messages,
            } => {
                let instance = self
                    .instance_senders
                    .iter()
                    .find(|(name, _sender)| *name == bridge_name);
                if let Some((name, sender)) = instance {
                    if let Err(err) = sender
                        .send(BridgeInstanceCmd::RetainedSnapshot(messages))
                        .await
                    {
                        log::error!("bridge: failed to send retained snapshot to {name}: {err}");
                    }
                } else {
                    log::warn!("bridge: no instance named {bridge_name}");
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        log::info!("bridge: stopping {} instances", self.instance_senders.len());
        for (_name, sender) in &self.instance_senders {
            let _ret = sender.send(BridgeInstanceCmd::Shutdown).await;
        }
    }
}
