// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Control packets of MQTT 5.0.

mod auth;
mod connect;
mod connect_ack;
mod disconnect;
mod ping_request;
mod ping_response;
mod property;
mod publish;
mod publish_ack;
mod publish_complete;
mod publish_received;
mod publish_release;
mod reason_code;
mod subscribe;
mod subscribe_ack;
mod unsubscribe;
mod unsubscribe_ack;

pub use auth::{AuthPacket, AUTH_PROPERTIES, AUTH_REASONS};
pub use connect::{ConnectPacket, CONNECT_PROPERTIES, CONNECT_WILL_PROPERTIES};
pub use connect_ack::{ConnectAckPacket, CONNECT_ACK_PROPERTIES, CONNECT_REASONS};
pub use disconnect::{DisconnectPacket, DISCONNECT_PROPERTIES, DISCONNECT_REASONS};
pub use ping_request::PingRequestPacket;
pub use ping_response::PingResponsePacket;
pub use property::{
    check_property_type_list, Properties, Property, PropertyType, MULTIPLE_PROPERTIES,
};
pub use publish::{PublishPacket, PUBLISH_PROPERTIES};
pub use publish_ack::{PublishAckPacket, PUBLISH_ACK_PROPERTIES, PUBLISH_ACK_REASONS};
pub use publish_complete::{
    PublishCompletePacket, PUBLISH_COMPLETE_PROPERTIES, PUBLISH_COMPLETE_REASONS,
};
pub use publish_received::{
    PublishReceivedPacket, PUBLISH_RECEIVED_PROPERTIES, PUBLISH_RECEIVED_REASONS,
};
pub use publish_release::{
    PublishReleasePacket, PUBLISH_RELEASE_PROPERTIES, PUBLISH_RELEASE_REASONS,
};
pub use reason_code::ReasonCode;
pub use subscribe::{SubscribePacket, SubscribeTopic, RetainHandling, SUBSCRIBE_PROPERTIES};
pub use subscribe_ack::{SubscribeAckPacket, SUBSCRIBE_ACK_PROPERTIES, SUBSCRIBE_REASONS};
pub use unsubscribe::{UnsubscribePacket, UNSUBSCRIBE_PROPERTIES};
pub use unsubscribe_ack::{UnsubscribeAckPacket, UNSUBSCRIBE_ACK_PROPERTIES, UNSUBSCRIBE_REASONS};
