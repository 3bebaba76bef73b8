// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Subscription store and topic matching.

use std::collections::{BTreeMap, BTreeSet};

use codec::{QoS, SubscribePattern, TopicError};

use crate::types::SessionGid;

/// Per-session subscription sets.
///
/// Patterns of one session are kept in a sorted set, so iteration order is
/// stable and "the first matching filter wins" is deterministic.
#[derive(Debug, Default, Clone)]
pub struct SubTrie {
    map: BTreeMap<SessionGid, BTreeSet<SubscribePattern>>,
}

impl SubTrie {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Add a subscription. Returns true when the session did not hold this
    /// filter before.
    ///
    /// A repeated subscribe with the same filter replaces the granted
    /// `QoS` [MQTT-3.8.4-3].
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is invalid.
    pub fn subscribe(
        &mut self,
        session_gid: SessionGid,
        filter: &str,
        qos: QoS,
    ) -> Result<bool, TopicError> {
        let pattern = SubscribePattern::parse(filter, qos)?;
        let patterns = self.map.entry(session_gid).or_default();
        let had_filter = patterns
            .iter()
            .any(|p| p.topic().as_ref() == filter);
        patterns.retain(|p| p.topic().as_ref() != filter);
        patterns.insert(pattern);
        Ok(!had_filter)
    }

    /// Remove a subscription. Returns true when the filter existed.
    pub fn unsubscribe(&mut self, session_gid: SessionGid, filter: &str) -> bool {
        let Some(patterns) = self.map.get_mut(&session_gid) else {
            return false;
        };
        let old_len = patterns.len();
        patterns.retain(|p| p.topic().as_ref() != filter);
        patterns.len() != old_len
    }

    /// Remove the whole session, returning its patterns.
    pub fn remove_session(&mut self, session_gid: SessionGid) -> Option<BTreeSet<SubscribePattern>> {
        self.map.remove(&session_gid)
    }

    /// Install a pattern set, used when a persistent session resumes.
    pub fn insert_session(
        &mut self,
        session_gid: SessionGid,
        patterns: BTreeSet<SubscribePattern>,
    ) {
        self.map.insert(session_gid, patterns);
    }

    #[must_use]
    pub fn patterns(&self, session_gid: SessionGid) -> Option<&BTreeSet<SubscribePattern>> {
        self.map.get(&session_gid)
    }

    /// Match `topic` against all sessions.
    ///
    /// Each session appears at most once in the result, with the granted
    /// `QoS` of its first matching filter.
    #[must_use]
    pub fn match_topic(&self, topic: &str) -> Vec<(SessionGid, QoS)> {
        let mut matches = Vec::new();
        for (session_gid, patterns) in &self.map {
            for pattern in patterns {
                if pattern.topic().is_match(topic) {
                    matches.push((*session_gid, pattern.qos()));
                    break;
                }
            }
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GID_A: SessionGid = SessionGid::new(1, 1);
    const GID_B: SessionGid = SessionGid::new(1, 2);

    #[test]
    fn test_at_most_one_match_per_session() {
        let mut trie = SubTrie::new();
        trie.subscribe(GID_A, "sensors/#", QoS::AtMostOnce).unwrap();
        trie.subscribe(GID_A, "sensors/+/temp", QoS::AtLeastOnce)
            .unwrap();
        trie.subscribe(GID_B, "sensors/kitchen/temp", QoS::ExactOnce)
            .unwrap();

        let matches = trie.match_topic("sensors/kitchen/temp");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches.iter().filter(|(gid, _)| *gid == GID_A).count(), 1);
    }

    #[test]
    fn test_resubscribe_replaces_qos() {
        let mut trie = SubTrie::new();
        assert!(trie.subscribe(GID_A, "home/#", QoS::AtMostOnce).unwrap());
        // Same filter again: not a new subscription, qos updated.
        assert!(!trie.subscribe(GID_A, "home/#", QoS::ExactOnce).unwrap());
        let matches = trie.match_topic("home/light");
        assert_eq!(matches, vec![(GID_A, QoS::ExactOnce)]);
    }

    #[test]
    fn test_unsubscribe() {
        let mut trie = SubTrie::new();
        trie.subscribe(GID_A, "home/#", QoS::AtMostOnce).unwrap();
        assert!(trie.unsubscribe(GID_A, "home/#"));
        assert!(!trie.unsubscribe(GID_A, "home/#"));
        assert!(trie.match_topic("home/light").is_empty());
    }

    #[test]
    fn test_invalid_filter() {
        let mut trie = SubTrie::new();
        assert!(trie.subscribe(GID_A, "a/#/b", QoS::AtMostOnce).is_err());
    }
}
