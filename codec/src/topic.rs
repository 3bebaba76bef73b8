// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Topic names, topic filters and filter matching.

use byteorder::{BigEndian, WriteBytesExt};
use std::cmp::Ordering;
use std::fmt;
use std::io::Write;

use crate::utils::validate_utf8_string;
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, QoS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicError {
    /// Topic is longer than 64KiB.
    TooLong,

    /// Topic contains disallowed code points.
    InvalidChar,

    /// Topic name contains `+` or `#`.
    ContainsWildcard,

    /// Topic filter is empty.
    EmptyFilter,

    /// `#` is not the last segment, or a wildcard char appears inside
    /// a segment.
    InvalidWildcard,
}

/// One `/`-separated segment of a topic filter.
#[derive(Debug, Clone, Default, Hash, PartialEq, Eq)]
pub enum TopicPart {
    /// Normal segment, matched byte for byte.
    Str(String),

    /// Zero length segment, like the middle one in `a//b`.
    #[default]
    Empty,

    /// `#` char, matches all remaining segments including none.
    /// Must be the last segment of the filter.
    MultiWildcard,

    /// `+` char, matches exactly one segment.
    SingleWildcard,
}

impl TopicPart {
    fn parse(s: &str) -> Result<Self, TopicError> {
        match s {
            "" => Ok(Self::Empty),
            "#" => Ok(Self::MultiWildcard),
            "+" => Ok(Self::SingleWildcard),
            _ => {
                if s.contains(['#', '+']) {
                    // Wildcard chars are only valid as a whole segment.
                    Err(TopicError::InvalidWildcard)
                } else {
                    Ok(Self::Str(s.to_string()))
                }
            }
        }
    }

    fn is_match(&self, segment: &str) -> bool {
        match self {
            Self::Str(s) => s == segment,
            Self::Empty => segment.is_empty(),
            Self::MultiWildcard | Self::SingleWildcard => true,
        }
    }
}

/// Topic name used in publish packets.
///
/// The Topic Name in a PUBLISH packet MUST NOT contain wildcard characters
/// [MQTT-3.3.2-2]. An empty topic name is accepted by the codec because a
/// v5 publish may carry an empty name together with a topic alias; the
/// server rejects empty names everywhere else.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct PubTopic(String);

impl PubTopic {
    /// Create a new topic name.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` contains wildcard chars or is invalid.
    pub fn new(topic: &str) -> Result<Self, TopicError> {
        validate_pub_topic(topic)?;
        Ok(Self(topic.to_string()))
    }

    /// Get byte length used in packet, including the 2-byte length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Returns true if topic name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<str> for PubTopic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl DecodePacket for PubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let topic = ba.read_string(len as usize)?;
        validate_pub_topic(&topic)?;
        Ok(Self(topic))
    }
}

impl EncodePacket for PubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

fn validate_pub_topic(topic: &str) -> Result<(), TopicError> {
    validate_utf8_string(topic).map_err(|_e| TopicError::InvalidChar)?;
    if topic.len() > usize::from(u16::MAX) {
        return Err(TopicError::TooLong);
    }
    if topic.contains(['#', '+']) {
        return Err(TopicError::ContainsWildcard);
    }
    Ok(())
}

/// Topic filter used in subscribe packets.
///
/// A filter matches a topic if, walking `/`-separated segments left to
/// right, every filter segment matches the corresponding topic segment and
/// both run out at the same time; `#` swallows all remaining segments
/// including none, `+` matches exactly one.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct SubTopic {
    filter: String,
    parts: Vec<TopicPart>,
}

impl SubTopic {
    /// Parse a topic filter.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is empty or wildcards are misplaced.
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        validate_utf8_string(filter).map_err(|_e| TopicError::InvalidChar)?;
        if filter.is_empty() {
            return Err(TopicError::EmptyFilter);
        }
        if filter.len() > usize::from(u16::MAX) {
            return Err(TopicError::TooLong);
        }

        let mut parts = Vec::new();
        let segments: Vec<&str> = filter.split('/').collect();
        let last = segments.len() - 1;
        for (index, segment) in segments.iter().enumerate() {
            let part = TopicPart::parse(segment)?;
            // The multi-level wildcard character MUST be the last character
            // used in the Topic Filter [MQTT-4.7.1-2].
            if part == TopicPart::MultiWildcard && index != last {
                return Err(TopicError::InvalidWildcard);
            }
            parts.push(part);
        }

        Ok(Self {
            filter: filter.to_string(),
            parts,
        })
    }

    /// Check whether `topic` matches this filter.
    #[must_use]
    pub fn is_match(&self, topic: &str) -> bool {
        let segments: Vec<&str> = topic.split('/').collect();
        let mut index = 0;
        for part in &self.parts {
            if part == &TopicPart::MultiWildcard {
                // Matches the remaining segments, including none at all.
                return true;
            }
            if index >= segments.len() || !part.is_match(segments[index]) {
                return false;
            }
            index += 1;
        }
        index == segments.len()
    }

    /// Returns true if filter contains `+` or `#`.
    #[must_use]
    pub fn has_wildcard(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, TopicPart::MultiWildcard | TopicPart::SingleWildcard))
    }

    /// Get byte length used in packet, including the 2-byte length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.filter.len()
    }
}

impl AsRef<str> for SubTopic {
    fn as_ref(&self) -> &str {
        &self.filter
    }
}

impl fmt::Display for SubTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.filter)
    }
}

impl DecodePacket for SubTopic {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let filter = ba.read_string(len as usize)?;
        Self::parse(&filter).map_err(DecodeError::from)
    }
}

impl EncodePacket for SubTopic {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.filter.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.filter.as_bytes())?;
        Ok(self.bytes())
    }
}

/// A parsed topic filter together with its granted `QoS`.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct SubscribePattern {
    topic: SubTopic,
    qos: QoS,
}

impl SubscribePattern {
    /// Parse filter string into pattern.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is invalid.
    pub fn parse(filter: &str, qos: QoS) -> Result<Self, TopicError> {
        let topic = SubTopic::parse(filter)?;
        Ok(Self { topic, qos })
    }

    #[must_use]
    pub const fn topic(&self) -> &SubTopic {
        &self.topic
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }
}

impl PartialOrd for SubscribePattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SubscribePattern {
    fn cmp(&self, other: &Self) -> Ordering {
        self.topic
            .filter
            .cmp(&other.topic.filter)
            .then(self.qos.cmp(&other.qos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filters() {
        assert!(SubTopic::parse("sensors/+/temp").is_ok());
        assert!(SubTopic::parse("#").is_ok());
        assert!(SubTopic::parse("a/+/b/#").is_ok());
        assert!(SubTopic::parse("sport/tennis/#").is_ok());

        assert_eq!(SubTopic::parse(""), Err(TopicError::EmptyFilter));
        assert_eq!(SubTopic::parse("a/#/b"), Err(TopicError::InvalidWildcard));
        assert_eq!(SubTopic::parse("a/b#"), Err(TopicError::InvalidWildcard));
        assert_eq!(SubTopic::parse("a/b+/c"), Err(TopicError::InvalidWildcard));
    }

    #[test]
    fn test_multi_wildcard_matches_everything() {
        let filter = SubTopic::parse("#").unwrap();
        assert!(filter.is_match("a"));
        assert!(filter.is_match("a/b/c"));
        assert!(filter.is_match(""));
    }

    #[test]
    fn test_single_wildcard() {
        let filter = SubTopic::parse("sensors/+/temp").unwrap();
        assert!(filter.is_match("sensors/kitchen/temp"));
        assert!(filter.is_match("sensors//temp"));
        assert!(!filter.is_match("sensors/kitchen/bedroom/temp"));
        assert!(!filter.is_match("sensors/temp"));
    }

    #[test]
    fn test_mixed_wildcards() {
        let filter = SubTopic::parse("a/+/b/#").unwrap();
        assert!(filter.is_match("a/x/b"));
        assert!(filter.is_match("a/x/b/y"));
        assert!(filter.is_match("a/x/b/y/z"));
        assert!(!filter.is_match("a/b"));
        assert!(!filter.is_match("a/x/c/b"));
    }

    #[test]
    fn test_exact_filter() {
        let filter = SubTopic::parse("home/light").unwrap();
        assert!(filter.is_match("home/light"));
        assert!(!filter.is_match("home/light/kitchen"));
        assert!(!filter.is_match("home"));
    }

    #[test]
    fn test_parent_level_wildcard() {
        // `sport/tennis/#` also matches the parent level `sport/tennis`.
        let filter = SubTopic::parse("sport/tennis/#").unwrap();
        assert!(filter.is_match("sport/tennis"));
        assert!(filter.is_match("sport/tennis/player1/ranking"));
        assert!(!filter.is_match("sport/golf"));
    }

    #[test]
    fn test_pub_topic_rejects_wildcards() {
        assert!(PubTopic::new("sensors/kitchen/temp").is_ok());
        assert_eq!(
            PubTopic::new("sensors/#"),
            Err(TopicError::ContainsWildcard)
        );
        assert_eq!(PubTopic::new("a/+"), Err(TopicError::ContainsWildcard));
    }
}
