// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Length of string exceeds 64KiB.
    TooLong,

    /// Contains null character or other disallowed code points.
    InvalidChar,

    /// Not a well formed UTF-8 sequence.
    Utf8Error,
}

/// Generate random alphanumeric string with `len` chars.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Check that `s` may be used as a packet string field.
///
/// The character data in a UTF-8 Encoded String MUST be well-formed UTF-8
/// as defined by the Unicode specification and restated in RFC 3629.
/// A UTF-8 Encoded String MUST NOT include an encoding of the null
/// character U+0000 [MQTT-1.5.4-2].
///
/// # Errors
///
/// Returns error if `s` is longer than 64KiB or contains U+0000.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > usize::from(u16::MAX) {
        return Err(StringError::TooLong);
    }
    if s.chars().any(|c| c == '\u{0000}') {
        return Err(StringError::InvalidChar);
    }
    Ok(())
}

/// Convert a raw byte chunk into a validated string.
///
/// # Errors
///
/// Returns error if `bytes` is not a valid UTF-8 sequence or contains
/// disallowed code points.
pub fn to_utf8_string(bytes: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(bytes.to_vec()).map_err(|_e| StringError::Utf8Error)?;
    validate_utf8_string(&s)?;
    Ok(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientIdError {
    /// Larger than 512 chars.
    TooLong,

    /// Contains control or other invalid characters.
    InvalidChars,
}

/// Check client id from a connect packet.
///
/// The Server MUST allow ClientIDs which are between 1 and 23 UTF-8 encoded
/// bytes in length, and that contain only alphanumeric characters
/// [MQTT-3.1.3-5]. Like most brokers we are more tolerant than that and only
/// reject control characters and unreasonable lengths. An empty client id
/// is accepted here; the server assigns a random one in that case
/// [MQTT-3.1.3-6].
///
/// # Errors
///
/// Returns error if `client_id` is invalid.
pub fn validate_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.len() > 512 {
        return Err(ClientIdError::TooLong);
    }
    if client_id.chars().any(char::is_control) {
        return Err(ClientIdError::InvalidChars);
    }
    Ok(())
}

/// Generate a random client id with the given prefix.
#[must_use]
pub fn random_client_id(prefix: &str) -> String {
    format!("{prefix}{}", random_string(12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let s = random_string(12);
        assert_eq!(s.len(), 12);
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("tianhe-E4wSyZKgPUbO").is_ok());
        assert!(validate_client_id("").is_ok());
        assert_eq!(
            validate_client_id("bad\nid"),
            Err(ClientIdError::InvalidChars)
        );
    }

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("sensors/kitchen/temp").is_ok());
        assert_eq!(
            validate_utf8_string("nul\u{0000}char"),
            Err(StringError::InvalidChar)
        );
    }
}
