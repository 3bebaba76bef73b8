// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Retained message store.

use std::collections::HashMap;

use codec::SubTopic;

use crate::message::ApplicationMessage;

/// Last retained message per topic.
///
/// A retained publish with an empty payload removes the stored entry
/// [MQTT-3.3.1-10]; any other retained publish replaces it.
#[derive(Debug, Default, Clone)]
pub struct RetainedStore {
    map: HashMap<String, ApplicationMessage>,
}

impl RetainedStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Apply a retained publish to the store.
    pub fn apply(&mut self, message: &ApplicationMessage) {
        if message.payload().is_empty() {
            if self.map.remove(message.topic()).is_some() {
                log::info!("retain: removed retained message of {}", message.topic());
            }
        } else {
            self.map
                .insert(message.topic().to_string(), message.clone());
        }
    }

    /// Install an entry received from a cluster peer, without the empty
    /// payload deletion rule.
    pub fn install(&mut self, message: ApplicationMessage) {
        self.map.insert(message.topic().to_string(), message);
    }

    /// Collect retained messages whose topic matches `filter`.
    #[must_use]
    pub fn matches(&self, filter: &SubTopic) -> Vec<ApplicationMessage> {
        self.map
            .values()
            .filter(|message| filter.is_match(message.topic()))
            .cloned()
            .collect()
    }

    /// Copy of the whole store, used for cluster and bridge sync.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ApplicationMessage> {
        self.map.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SourceProtocol;
    use bytes::Bytes;
    use codec::QoS;

    fn retained(topic: &str, payload: &'static [u8]) -> ApplicationMessage {
        ApplicationMessage::new(
            topic,
            Bytes::from_static(payload),
            QoS::AtLeastOnce,
            true,
            SourceProtocol::Mqtt,
            "b",
        )
    }

    #[test]
    fn test_replace_and_match() {
        let mut store = RetainedStore::new();
        store.apply(&retained("home/light", b"on"));
        store.apply(&retained("home/door", b"closed"));
        store.apply(&retained("home/light", b"off"));

        let filter = SubTopic::parse("home/#").unwrap();
        let mut matches = store.matches(&filter);
        matches.sort_by(|a, b| a.topic().cmp(b.topic()));
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[1].payload().as_ref(), b"off");
    }

    #[test]
    fn test_empty_payload_deletes() {
        let mut store = RetainedStore::new();
        store.apply(&retained("home/light", b"on"));
        assert_eq!(store.len(), 1);

        store.apply(&retained("home/light", b""));
        assert!(store.is_empty());

        let filter = SubTopic::parse("home/#").unwrap();
        assert!(store.matches(&filter).is_empty());
    }
}
