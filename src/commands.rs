// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Command enums passed between apps.
//!
//! Packets never cross app boundaries in wire form; they are lifted into
//! protocol version neutral values here, and the session app lowers them
//! back into v3 or v5 packets for its own connection.

use bytes::Bytes;

use codec::{PacketId, ProtocolLevel, QoS};

use crate::hooks::{AuthContext, AuthFailure, PublishAckReason, SubscribeRequest};
use crate::message::ApplicationMessage;
use crate::types::{ListenerId, NodeId, SessionGid, SessionId};

/// Will message captured from a connect packet.
///
/// Published through the normal pipeline when the owning session ends
/// without a clean disconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

/// Parsed connect data, protocol version neutral.
#[derive(Debug, Clone)]
pub struct ConnectData {
    pub protocol_level: ProtocolLevel,

    /// Client id, already replaced with a generated one when the client
    /// sent an empty string.
    pub client_id: String,

    /// True if `client_id` was generated by the broker.
    pub assigned_client_id: bool,

    pub clean_session: bool,

    pub keep_alive: u16,

    pub username: Option<String>,

    pub password: Option<Vec<u8>>,

    pub will: Option<WillMessage>,
}

/// Connect results, protocol version neutral.
///
/// The session lowers this into a v3 return code or a v5 reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAckResult {
    Accepted { session_present: bool },
    UnacceptedProtocol,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
}

impl ConnectAckResult {
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }
}

impl From<AuthFailure> for ConnectAckResult {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::IdentifierRejected => Self::IdentifierRejected,
            AuthFailure::NotAuthorized => Self::NotAuthorized,
            AuthFailure::BadUserNameOrPassword => Self::BadUserNameOrPassword,
        }
    }
}

/// Per-filter subscribe results, protocol version neutral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAckResult {
    /// Granted with this maximum `QoS`.
    GrantedQoS(QoS),

    /// v5 reason 0x87; lowered to plain failure for v3 clients.
    NotAuthorized,

    /// 0x80 in both protocol versions.
    Failed,
}

#[derive(Debug, Clone)]
pub enum SessionToListenerCmd {
    /// Client sent a connect packet.
    Connect(SessionId, ConnectData),

    /// Client published a message; topic aliases are already resolved.
    Publish(SessionId, PacketId, ApplicationMessage),

    /// Client requested subscriptions: `(filter, requested qos)` pairs
    /// in packet order.
    Subscribe(SessionId, PacketId, Vec<(String, QoS)>),

    Unsubscribe(SessionId, PacketId, Vec<String>),

    /// Session ended. `clean_disconnect` is true iff the client sent
    /// DISCONNECT with a normal reason, which discards the will message.
    Disconnect {
        session_id: SessionId,
        clean_disconnect: bool,
    },
}

#[derive(Debug, Clone)]
pub enum ListenerToSessionCmd {
    /// Answer to the connect handshake.
    ConnectAck {
        result: ConnectAckResult,
        /// Set when the broker generated the client id; v5 sessions return
        /// it in the `AssignedClientIdentifier` property.
        assigned_client_id: Option<String>,
    },

    /// Decision for an inbound publish: emit PUBACK/PUBREC per `qos`.
    PublishAck {
        packet_id: PacketId,
        qos: QoS,
        reason: PublishAckReason,
        send_ack: bool,
    },

    /// Deliver one message copy to this session's client.
    Publish {
        message: ApplicationMessage,
        granted_qos: QoS,
        /// Retain flag on the wire: true only for retained-store replays.
        retain: bool,
    },

    SubscribeAck {
        packet_id: PacketId,
        acks: Vec<SubscribeAckResult>,
    },

    UnsubscribeAck {
        packet_id: PacketId,
        /// Whether each filter existed, in request order. Only v5 clients
        /// see the difference.
        existed: Vec<bool>,
    },

    /// Force-close this session without firing its will.
    Disconnect,
}

#[derive(Debug, Clone)]
pub enum ListenerToAuthCmd {
    RequestAuth(ListenerId, SessionId, AuthContext),
}

#[derive(Debug, Clone)]
pub enum AuthToListenerCmd {
    ResponseAuth(SessionId, Result<(), AuthFailure>),
}

#[derive(Debug, Clone)]
pub enum ListenerToAclCmd {
    /// Check a publish. The message is carried through the round trip.
    Publish {
        session_gid: SessionGid,
        username: Option<String>,
        packet_id: PacketId,
        message: ApplicationMessage,
    },

    /// Check a subscribe request list. The pre-subscribe hook already ran;
    /// the authorizer only inspects requests the hook left accepted and
    /// has the final word.
    Subscribe {
        session_gid: SessionGid,
        client_id: String,
        username: Option<String>,
        packet_id: PacketId,
        requests: Vec<SubscribeRequest>,
    },
}

#[derive(Debug, Clone)]
pub enum AclToListenerCmd {
    PublishAck {
        session_id: SessionId,
        packet_id: PacketId,
        message: ApplicationMessage,
        accepted: bool,
    },

    /// One request per filter, in input order, with `accept` reflecting
    /// both the hook decision and the authorization result.
    SubscribeAck {
        session_id: SessionId,
        packet_id: PacketId,
        requests: Vec<SubscribeRequest>,
    },
}

#[derive(Debug, Clone)]
pub enum ListenerToDispatcherCmd {
    SessionConnected {
        session_gid: SessionGid,
        client_id: String,
        clean_session: bool,
    },

    SessionDisconnected {
        session_gid: SessionGid,
        client_id: String,
        clean_session: bool,
    },

    /// An accepted publish enters the routing pipeline.
    Publish { message: ApplicationMessage },

    Subscribe {
        session_gid: SessionGid,
        client_id: String,
        packet_id: PacketId,
        requests: Vec<SubscribeRequest>,
    },

    Unsubscribe {
        session_gid: SessionGid,
        client_id: String,
        packet_id: PacketId,
        topics: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub enum DispatcherToListenerCmd {
    /// Answer to `SessionConnected`, carrying the session-present flag.
    SessionPresent {
        session_id: SessionId,
        present: bool,
    },

    Publish {
        session_id: SessionId,
        message: ApplicationMessage,
        granted_qos: QoS,
        retain: bool,
    },

    SubscribeAck {
        session_id: SessionId,
        packet_id: PacketId,
        acks: Vec<SubscribeAckResult>,
    },

    UnsubscribeAck {
        session_id: SessionId,
        packet_id: PacketId,
        existed: Vec<bool>,
    },
}

#[derive(Debug, Clone)]
pub enum DispatcherToClusterCmd {
    /// Broadcast a locally published message to peers.
    Publish(ApplicationMessage),

    /// First local session subscribed to this filter.
    SubscriptionAdded(String),

    /// Last local session unsubscribed from this filter.
    SubscriptionRemoved(String),

    /// Answer to `RetainedSnapshotRequest`.
    RetainedSnapshot {
        node_id: NodeId,
        messages: Vec<ApplicationMessage>,
    },
}

#[derive(Debug, Clone)]
pub enum ClusterToDispatcherCmd {
    /// A peer replicated a publish to us; deliver locally.
    Publish(ApplicationMessage),

    /// A freshly joined peer asked for our retained messages.
    RetainedSnapshotRequest { node_id: NodeId },

    /// Retained messages received from a peer; install without
    /// re-broadcasting.
    InstallRetained(Vec<ApplicationMessage>),
}

#[derive(Debug, Clone)]
pub enum DispatcherToBridgeCmd {
    /// A local publish which may match upstream rules.
    Publish(ApplicationMessage),

    /// Answer to `RetainedSnapshotRequest`.
    RetainedSnapshot {
        bridge_name: String,
        messages: Vec<ApplicationMessage>,
    },
}

#[derive(Debug, Clone)]
pub enum BridgeToDispatcherCmd {
    /// A remote publish arriving through a downstream rule.
    Publish(ApplicationMessage),

    /// Bridge connected and wants to sync retained messages upstream.
    RetainedSnapshotRequest { bridge_name: String },
}

// Server context commands, used for shutdown propagation.

#[derive(Debug, Clone, Copy)]
pub enum ServerContextToListenerCmd {
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub enum ServerContextToDispatcherCmd {
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub enum ServerContextToAuthCmd {
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub enum ServerContextToAclCmd {
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub enum ServerContextToClusterCmd {
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub enum ServerContextToBridgeCmd {
    Shutdown,
}
