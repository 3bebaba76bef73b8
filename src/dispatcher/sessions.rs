// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Persistent session records.

use std::collections::{BTreeSet, HashMap};

use codec::SubscribePattern;

/// Subscription sets of disconnected sessions with clean_session=false,
/// keyed by client id.
///
/// A record is consumed when the client reconnects with clean_session
/// still false, and discarded when it reconnects with clean_session=true.
#[derive(Debug, Default, Clone)]
pub struct CachedSessions {
    map: HashMap<String, BTreeSet<SubscribePattern>>,
}

impl CachedSessions {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn store(&mut self, client_id: &str, patterns: BTreeSet<SubscribePattern>) {
        self.map.insert(client_id.to_string(), patterns);
    }

    pub fn take(&mut self, client_id: &str) -> Option<BTreeSet<SubscribePattern>> {
        self.map.remove(client_id)
    }

    pub fn remove(&mut self, client_id: &str) {
        self.map.remove(client_id);
    }

    #[must_use]
    pub fn contains(&self, client_id: &str) -> bool {
        self.map.contains_key(client_id)
    }

    /// Iterate over stored records.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<SubscribePattern>)> {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::QoS;

    #[test]
    fn test_store_and_take() {
        let mut sessions = CachedSessions::new();
        let mut patterns = BTreeSet::new();
        patterns.insert(SubscribePattern::parse("home/#", QoS::AtLeastOnce).unwrap());
        sessions.store("a", patterns.clone());

        assert!(sessions.contains("a"));
        assert_eq!(sessions.take("a"), Some(patterns));
        assert!(!sessions.contains("a"));
    }
}
