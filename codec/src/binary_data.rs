// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::Write;

use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Binary Data is represented by a Two Byte Integer length which indicates
/// the number of data bytes, followed by that many bytes of data.
///
/// Thus, the length of Binary Data is limited to the range of 0 to 65,535
/// bytes.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct BinaryData(Vec<u8>);

impl BinaryData {
    /// Create an empty binary data chunk.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Copy bytes from a slice.
    ///
    /// # Errors
    ///
    /// Returns error if `data` is longer than 64KiB.
    pub fn from_slice(data: &[u8]) -> Result<Self, EncodeError> {
        if data.len() > usize::from(u16::MAX) {
            return Err(EncodeError::TooManyData);
        }
        Ok(Self(data.to_vec()))
    }

    /// Get byte length used in packet, including the 2-byte length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Returns true if data chunk is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clear inner bytes.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl AsRef<[u8]> for BinaryData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl DecodePacket for BinaryData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let bytes = ba.read_bytes(len as usize)?;
        Ok(Self(bytes.to_vec()))
    }
}

impl EncodePacket for BinaryData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(&self.0)?;
        Ok(self.bytes())
    }
}
