// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Control packets of MQTT 3.1 and 3.1.1.

mod connect;
mod connect_ack;
mod disconnect;
mod ping_request;
mod ping_response;
mod publish;
mod publish_ack;
mod publish_complete;
mod publish_received;
mod publish_release;
mod subscribe;
mod subscribe_ack;
mod unsubscribe;
mod unsubscribe_ack;

pub use connect::ConnectPacket;
pub use connect_ack::{ConnectAckPacket, ConnectReturnCode};
pub use disconnect::DisconnectPacket;
pub use ping_request::PingRequestPacket;
pub use ping_response::PingResponsePacket;
pub use publish::PublishPacket;
pub use publish_ack::PublishAckPacket;
pub use publish_complete::PublishCompletePacket;
pub use publish_received::PublishReceivedPacket;
pub use publish_release::PublishReleasePacket;
pub use subscribe::{SubscribePacket, SubscribeTopic};
pub use subscribe_ack::{SubscribeAck, SubscribeAckPacket};
pub use unsubscribe::UnsubscribePacket;
pub use unsubscribe_ack::UnsubscribeAckPacket;
