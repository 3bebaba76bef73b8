// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Handlers for commands arriving from listener apps, including the tail
//! of the publish pipeline.

use codec::{PacketId, SubTopic};

use super::{Dispatcher, SessionRecord};
use crate::commands::{
    DispatcherToBridgeCmd, DispatcherToClusterCmd, DispatcherToListenerCmd,
    ListenerToDispatcherCmd, SubscribeAckResult,
};
use crate::error::Error;
use crate::events::ServerEvent;
use crate::hooks::SubscribeRequest;
use crate::message::{ApplicationMessage, SourceProtocol};
use crate::types::SessionGid;

impl Dispatcher {
    pub(super) async fn handle_listener_cmd(
        &mut self,
        cmd: ListenerToDispatcherCmd,
    ) -> Result<(), Error> {
        match cmd {
            ListenerToDispatcherCmd::SessionConnected {
                session_gid,
                client_id,
                clean_session,
            } => {
                self.on_session_connected(session_gid, client_id, clean_session)
                    .await
            }
            ListenerToDispatcherCmd::SessionDisconnected {
                session_gid,
                client_id,
                clean_session,
            } => {
                self.on_session_disconnected(session_gid, &client_id, clean_session)
                    .await;
                Ok(())
            }
            ListenerToDispatcherCmd::Publish { message } => {
                self.on_publish(message).await;
                Ok(())
            }
            ListenerToDispatcherCmd::Subscribe {
                session_gid,
                client_id,
                packet_id,
                requests,
            } => {
                self.on_subscribe(session_gid, &client_id, packet_id, requests)
                    .await;
                Ok(())
            }
            ListenerToDispatcherCmd::Unsubscribe {
                session_gid,
                client_id,
                packet_id,
                topics,
            } => {
                self.on_unsubscribe(session_gid, &client_id, packet_id, &topics)
                    .await;
                Ok(())
            }
        }
    }

    async fn on_session_connected(
        &mut self,
        session_gid: SessionGid,
        client_id: String,
        clean_session: bool,
    ) -> Result<(), Error> {
        self.client_index.insert(client_id.clone(), session_gid);
        self.session_records.insert(
            session_gid,
            SessionRecord {
                client_id: client_id.clone(),
            },
        );

        let session_present = if clean_session {
            // Starting clean discards every piece of stored state.
            self.cached_sessions.remove(&client_id);
            self.offline.remove(&client_id);
            false
        } else if let Some(patterns) = self.cached_sessions.take(&client_id) {
            for pattern in &patterns {
                self.filter_subscribed(pattern.topic().as_ref()).await;
            }
            self.sub_trie.insert_session(session_gid, patterns);
            true
        } else {
            false
        };

        self.send_to_listener(
            session_gid,
            DispatcherToListenerCmd::SessionPresent {
                session_id: session_gid.session_id(),
                present: session_present,
            },
        )
        .await;

        self.event_sender.post(ServerEvent::ClientConnected {
            client_id: client_id.clone(),
            session_present,
        });

        if session_present && self.storage_config.auto_deliver_offline_messages {
            self.deliver_offline_messages(session_gid, &client_id).await;
        }
        Ok(())
    }

    /// Replay queued messages to a freshly resumed session, oldest first.
    async fn deliver_offline_messages(&mut self, session_gid: SessionGid, client_id: &str) {
        let queued = self.offline.drain(client_id);
        if queued.is_empty() {
            return;
        }
        log::info!(
            "dispatcher: delivering {} queued messages to {client_id}",
            queued.len()
        );
        for message in queued {
            let granted_qos = self
                .sub_trie
                .patterns(session_gid)
                .and_then(|patterns| {
                    patterns
                        .iter()
                        .find(|p| p.topic().is_match(message.topic()))
                        .map(codec::SubscribePattern::qos)
                })
                .unwrap_or_else(|| message.qos());
            self.send_to_listener(
                session_gid,
                DispatcherToListenerCmd::Publish {
                    session_id: session_gid.session_id(),
                    message,
                    granted_qos,
                    retain: false,
                },
            )
            .await;
        }
    }

    async fn on_session_disconnected(
        &mut self,
        session_gid: SessionGid,
        client_id: &str,
        clean_session: bool,
    ) {
        self.session_records.remove(&session_gid);
        if self.client_index.get(client_id) == Some(&session_gid) {
            self.client_index.remove(client_id);
        }

        let patterns = self.sub_trie.remove_session(session_gid);
        if let Some(patterns) = patterns {
            for pattern in &patterns {
                self.filter_unsubscribed(pattern.topic().as_ref()).await;
            }
            if !clean_session && self.storage_config.enable_persistent_sessions {
                self.cached_sessions.store(client_id, patterns);
            }
        }
        if clean_session || !self.storage_config.enable_persistent_sessions {
            self.offline.remove(client_id);
        }

        self.event_sender.post(ServerEvent::ClientDisconnected {
            client_id: client_id.to_string(),
        });
    }

    /// The tail of the publish pipeline: retained store, fan-out, offline
    /// queues, cluster broadcast, bridge forwarding and events.
    pub(super) async fn on_publish(&mut self, message: ApplicationMessage) {
        if self.storage_config.enable_retained_messages && message.retain() {
            self.retained.apply(&message);
        }

        let delivered = self.fan_out(&message).await;

        self.enqueue_offline(&message);

        // Cluster and bridge only see messages which originated here;
        // replicated traffic must not loop back.
        if self.cluster_enabled && message.source_protocol() != SourceProtocol::Cluster {
            if let Err(err) = self
                .cluster_sender
                .send(DispatcherToClusterCmd::Publish(message.clone()))
                .await
            {
                log::error!("dispatcher: failed to send publish to cluster: {err}");
            }
        }
        if message.source_protocol() == SourceProtocol::Mqtt
            || message.source_protocol() == SourceProtocol::MqttSn
        {
            if let Err(err) = self
                .bridge_sender
                .send(DispatcherToBridgeCmd::Publish(message.clone()))
                .await
            {
                log::error!("dispatcher: failed to send publish to bridge: {err}");
            }
        }

        if delivered == 0 {
            self.event_sender.post(ServerEvent::MessageNotDelivered {
                topic: message.topic().to_string(),
            });
        }
        self.event_sender.post(ServerEvent::MessagePublished {
            topic: message.topic().to_string(),
            delivered,
        });
    }

    /// Deliver one copy to every matching live session except the source.
    async fn fan_out(&mut self, message: &ApplicationMessage) -> usize {
        let mut delivered = 0;
        for (session_gid, granted_qos) in self.sub_trie.match_topic(message.topic()) {
            let Some(record) = self.session_records.get(&session_gid) else {
                continue;
            };
            if record.client_id == message.source_client_id() {
                continue;
            }
            let client_id = record.client_id.clone();
            self.send_to_listener(
                session_gid,
                DispatcherToListenerCmd::Publish {
                    session_id: session_gid.session_id(),
                    message: message.clone(),
                    granted_qos,
                    // Live deliveries always clear the retain flag
                    // [MQTT-3.3.1-9].
                    retain: false,
                },
            )
            .await;
            self.event_sender.post(ServerEvent::MessageDelivered {
                client_id,
                topic: message.topic().to_string(),
            });
            delivered += 1;
        }
        delivered
    }

    /// Queue the message for persistent sessions which are currently
    /// offline and hold a matching subscription.
    fn enqueue_offline(&mut self, message: &ApplicationMessage) {
        if !self.storage_config.enable_persistent_sessions {
            return;
        }
        let recipients: Vec<String> = self
            .cached_sessions
            .iter()
            .filter(|(client_id, patterns)| {
                *client_id != message.source_client_id()
                    && !self.client_index.contains_key(*client_id)
                    && patterns.iter().any(|p| p.topic().is_match(message.topic()))
            })
            .map(|(client_id, _patterns)| client_id.clone())
            .collect();
        for client_id in recipients {
            self.offline.push(&client_id, message.clone());
        }
    }

    async fn on_subscribe(
        &mut self,
        session_gid: SessionGid,
        client_id: &str,
        packet_id: PacketId,
        requests: Vec<SubscribeRequest>,
    ) {
        let mut acks = Vec::with_capacity(requests.len());
        let mut accepted_filters = Vec::new();

        for request in &requests {
            if !request.accept {
                acks.push(SubscribeAckResult::NotAuthorized);
                continue;
            }
            match self
                .sub_trie
                .subscribe(session_gid, &request.filter, request.granted_qos)
            {
                Ok(newly_added) => {
                    if newly_added {
                        self.filter_subscribed(&request.filter).await;
                    }
                    acks.push(SubscribeAckResult::GrantedQoS(request.granted_qos));
                    accepted_filters.push((request.filter.clone(), request.granted_qos));
                }
                Err(err) => {
                    log::error!(
                        "dispatcher: invalid subscribe filter {} from {client_id}: {err:?}",
                        request.filter
                    );
                    acks.push(SubscribeAckResult::Failed);
                }
            }
        }

        // The suback goes out first; retained replays follow on the same
        // ordered channel.
        self.send_to_listener(
            session_gid,
            DispatcherToListenerCmd::SubscribeAck {
                session_id: session_gid.session_id(),
                packet_id,
                acks,
            },
        )
        .await;

        for (filter, granted_qos) in accepted_filters {
            if self.storage_config.enable_retained_messages {
                self.replay_retained(session_gid, &filter, granted_qos).await;
            }
            self.event_sender.post(ServerEvent::ClientSubscribed {
                client_id: client_id.to_string(),
                filter,
                granted_qos,
            });
        }
    }

    /// Deliver retained messages matching a fresh subscription, with the
    /// retain flag kept set on the wire.
    async fn replay_retained(
        &mut self,
        session_gid: SessionGid,
        filter: &str,
        granted_qos: codec::QoS,
    ) {
        let Ok(parsed) = SubTopic::parse(filter) else {
            return;
        };
        for message in self.retained.matches(&parsed) {
            self.send_to_listener(
                session_gid,
                DispatcherToListenerCmd::Publish {
                    session_id: session_gid.session_id(),
                    message,
                    granted_qos,
                    retain: true,
                },
            )
            .await;
        }
    }

    async fn on_unsubscribe(
        &mut self,
        session_gid: SessionGid,
        client_id: &str,
        packet_id: PacketId,
        topics: &[String],
    ) {
        let mut existed = Vec::with_capacity(topics.len());
        for filter in topics {
            let removed = self.sub_trie.unsubscribe(session_gid, filter);
            if removed {
                self.filter_unsubscribed(filter).await;
                self.event_sender.post(ServerEvent::ClientUnsubscribed {
                    client_id: client_id.to_string(),
                    filter: filter.clone(),
                });
            }
            existed.push(removed);
        }

        self.send_to_listener(
            session_gid,
            DispatcherToListenerCmd::UnsubscribeAck {
                session_id: session_gid.session_id(),
                packet_id,
                existed,
            },
        )
        .await;
    }

    /// Track live filter usage; gossip the 0 -> 1 transition to peers.
    async fn filter_subscribed(&mut self, filter: &str) {
        let count = self.filter_counts.entry(filter.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 && self.cluster_enabled {
            if let Err(err) = self
                .cluster_sender
                .send(DispatcherToClusterCmd::SubscriptionAdded(
                    filter.to_string(),
                ))
                .await
            {
                log::error!("dispatcher: failed to gossip subscription: {err}");
            }
        }
    }

    /// Track live filter usage; gossip the 1 -> 0 transition to peers.
    async fn filter_unsubscribed(&mut self, filter: &str) {
        let Some(count) = self.filter_counts.get_mut(filter) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.filter_counts.remove(filter);
            if self.cluster_enabled {
                if let Err(err) = self
                    .cluster_sender
                    .send(DispatcherToClusterCmd::SubscriptionRemoved(
                        filter.to_string(),
                    ))
                    .await
                {
                    log::error!("dispatcher: failed to gossip unsubscription: {err}");
                }
            }
        }
    }
}
