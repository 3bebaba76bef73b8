// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// The Keep Alive is a Two Byte Integer which is a time interval measured
/// in seconds.
///
/// If the Keep Alive value is non-zero and the Server does not receive an MQTT
/// Control Packet from the Client within one and a half times the Keep Alive
/// time period, it MUST close the Network Connection to the Client as if
/// the network had failed [MQTT-3.1.2-22].
///
/// A Keep Alive value of 0 has the effect of turning off the Keep Alive
/// mechanism.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeepAlive(u16);

impl KeepAlive {
    #[must_use]
    pub const fn new(seconds: u16) -> Self {
        Self(seconds)
    }

    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        2
    }
}

impl DecodePacket for KeepAlive {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let value = ba.read_u16()?;
        Ok(Self(value))
    }
}

impl EncodePacket for KeepAlive {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.extend_from_slice(&self.0.to_be_bytes());
        Ok(Self::bytes())
    }
}
