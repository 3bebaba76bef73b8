// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Pluggable authentication, authorization and packet hooks.
//!
//! The default implementations allow everything; a deployment installs its
//! own by passing trait objects to `ServerContext`. Hook calls happen on
//! the app task which owns them, behind one channel round trip, so a slow
//! implementation delays only its own app.

use codec::{ProtocolLevel, QoS};

use crate::message::ApplicationMessage;

/// Request context for an authentication check at CONNECT time.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub protocol_level: ProtocolLevel,
}

/// Reasons an authenticator may reject a connection.
///
/// Each maps to a v5 reason code, and through it to a v3 return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Reason 0x85, v3 `IdentifierRejected`.
    IdentifierRejected,

    /// Reason 0x87, v3 `NotAuthorized`.
    NotAuthorized,

    /// Everything else, v3 `BadUserNameOrPassword`.
    BadUserNameOrPassword,
}

/// Authentication check invoked once per CONNECT.
pub trait Authenticator: Send + Sync {
    /// # Errors
    ///
    /// Returns the failure kind when the connection shall be rejected.
    fn authenticate(&self, context: &AuthContext) -> Result<(), AuthFailure>;
}

/// Default authenticator which accepts every client.
#[derive(Debug, Default, Clone)]
pub struct AllowAllAuthenticator;

impl Authenticator for AllowAllAuthenticator {
    fn authenticate(&self, _context: &AuthContext) -> Result<(), AuthFailure> {
        Ok(())
    }
}

/// Authorization checks invoked per publish and per subscribe.
pub trait Authorizer: Send + Sync {
    fn can_publish(&self, client_id: &str, username: Option<&str>, topic: &str) -> bool;

    fn can_subscribe(&self, client_id: &str, username: Option<&str>, filter: &str) -> bool;
}

/// Default authorizer which accepts every operation.
#[derive(Debug, Default, Clone)]
pub struct AllowAllAuthorizer;

impl Authorizer for AllowAllAuthorizer {
    fn can_publish(&self, _client_id: &str, _username: Option<&str>, _topic: &str) -> bool {
        true
    }

    fn can_subscribe(&self, _client_id: &str, _username: Option<&str>, _filter: &str) -> bool {
        true
    }
}

/// Ack reasons produced on the publish path, protocol version neutral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishAckReason {
    #[default]
    Success,

    /// v5 reason 0x87.
    NotAuthorized,

    /// v5 reason 0x94.
    TopicAliasInvalid,

    /// v5 reason 0x95.
    PacketTooLarge,

    /// v5 reason 0x80.
    UnspecifiedError,
}

/// Decision returned by the pre-publish hook.
#[derive(Debug, Clone, Copy)]
pub struct PublishingAction {
    /// Continue into retained-store update and fan-out.
    pub process_message: bool,

    /// Send PUBACK/PUBREC to the publishing client at all.
    pub send_ack: bool,

    /// Reason code to put into the ack.
    pub reason: PublishAckReason,
}

impl Default for PublishingAction {
    fn default() -> Self {
        Self {
            process_message: true,
            send_ack: true,
            reason: PublishAckReason::Success,
        }
    }
}

/// One topic filter being subscribed, as seen by the pre-subscribe hook.
///
/// Requests start out with `accept` set; a hook may reject one or lower
/// its `granted_qos`. The authorizer runs afterwards and only ever turns
/// `accept` off, so a hook cannot grant a subscription the authorizer
/// denies.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub filter: String,
    pub accept: bool,
    pub granted_qos: QoS,
}

/// Synchronous packet hooks which can influence protocol replies.
///
/// Post-hoc notifications go through the asynchronous event dispatcher
/// instead, see [`crate::events`].
pub trait PacketHooks: Send + Sync {
    /// Invoked after authorization, before the publish ack is sent.
    fn message_publishing(
        &self,
        _client_id: &str,
        _message: &ApplicationMessage,
    ) -> PublishingAction {
        PublishingAction::default()
    }

    /// Invoked before authorization; `can_subscribe` only sees requests
    /// this hook left accepted and makes the final decision.
    fn client_subscribing(&self, _client_id: &str, _requests: &mut Vec<SubscribeRequest>) {}
}

/// Default hooks which leave every packet untouched.
#[derive(Debug, Default, Clone)]
pub struct NoopPacketHooks;

impl PacketHooks for NoopPacketHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let authenticator = AllowAllAuthenticator;
        let context = AuthContext {
            client_id: "a".to_string(),
            username: None,
            password: None,
            protocol_level: ProtocolLevel::V311,
        };
        assert!(authenticator.authenticate(&context).is_ok());

        let authorizer = AllowAllAuthorizer;
        assert!(authorizer.can_publish("a", None, "home/light"));
        assert!(authorizer.can_subscribe("a", None, "home/#"));
    }

    #[test]
    fn test_default_publishing_action() {
        let action = PublishingAction::default();
        assert!(action.process_message);
        assert!(action.send_ack);
        assert_eq!(action.reason, PublishAckReason::Success);
    }
}
