// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt;

use crate::utils::StringError;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, StringData};

/// A UTF-8 String Pair consists of two UTF-8 Encoded Strings.
///
/// This data type is used to hold name-value pairs. The first string serves
/// as the name, and the second string contains the value. Both strings MUST
/// comply with the requirements for UTF-8 Encoded Strings [MQTT-1.5.7-1].
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct StringPairData {
    name: StringData,
    value: StringData,
}

impl StringPairData {
    /// Create a new string pair.
    ///
    /// # Errors
    ///
    /// Returns error if either string is invalid.
    pub fn from(name: &str, value: &str) -> Result<Self, StringError> {
        Ok(Self {
            name: StringData::from(name)?,
            value: StringData::from(value)?,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    #[must_use]
    pub fn value(&self) -> &str {
        self.value.as_ref()
    }

    /// Get byte length used in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.name.bytes() + self.value.bytes()
    }
}

impl fmt::Display for StringPairData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.value)
    }
}

impl DecodePacket for StringPairData {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let name = StringData::decode(ba)?;
        let value = StringData::decode(ba)?;
        Ok(Self { name, value })
    }
}

impl EncodePacket for StringPairData {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let n_name = self.name.encode(buf)?;
        let n_value = self.value.encode(buf)?;
        Ok(n_name + n_value)
    }
}
