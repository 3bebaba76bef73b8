// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Single byte property value which may only be 0 or 1.
///
/// Any other value is a Protocol Error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoolData(bool);

impl BoolData {
    #[must_use]
    pub const fn new(value: bool) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> bool {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl DecodePacket for BoolData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        match ba.read_byte()? {
            0x00 => Ok(Self(false)),
            0x01 => Ok(Self(true)),
            _ => Err(DecodeError::InvalidPropertyValue),
        }
    }
}

impl EncodePacket for BoolData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(u8::from(self.0));
        Ok(Self::bytes())
    }
}
