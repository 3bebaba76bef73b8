// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use byteorder::{BigEndian, WriteBytesExt};
use std::fmt;
use std::io::Write;

use crate::utils::{validate_utf8_string, StringError};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

/// Text fields within the MQTT Control Packets are encoded as UTF-8 strings.
///
/// String Data is represented by a Two Byte Integer length which indicates
/// the number of data bytes, followed by that many bytes of character data.
/// Thus the length of String Data is limited to the range of 0 to 65,535
/// bytes.
///
/// ```txt
/// +-------------------+
/// | String Length     |
/// |                   |
/// +-------------------+
/// | String ...        |
/// +-------------------+
/// ```
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct StringData(String);

impl StringData {
    /// Create an empty string data.
    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Convert string slice into string data.
    ///
    /// # Errors
    ///
    /// Returns error if string slice is too long or contains disallowed
    /// code points.
    pub fn from(s: &str) -> Result<Self, StringError> {
        validate_utf8_string(s)?;
        Ok(Self(s.to_string()))
    }

    /// Get byte length used in packet, including the 2-byte length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Returns true if string data is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Clear inner string.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for StringData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StringData {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl DecodePacket for StringData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        Ok(Self(s))
    }
}

impl EncodePacket for StringData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let s = StringData::from("home/light").unwrap();
        let mut buf = Vec::new();
        s.encode(&mut buf).unwrap();
        assert_eq!(buf[0..2], [0x00, 0x0a]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(StringData::decode(&mut ba).unwrap(), s);
    }
}
