// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Bounded per-client offline message queues.

use std::collections::{HashMap, VecDeque};

use crate::message::ApplicationMessage;

/// Messages waiting for a persistent session to reconnect, FIFO per
/// client id. When a queue is full the oldest message is dropped.
#[derive(Debug, Default, Clone)]
pub struct OfflineQueues {
    map: HashMap<String, VecDeque<ApplicationMessage>>,
    capacity: usize,
}

impl OfflineQueues {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            capacity,
        }
    }

    pub fn push(&mut self, client_id: &str, message: ApplicationMessage) {
        if self.capacity == 0 {
            return;
        }
        let queue = self.map.entry(client_id.to_string()).or_default();
        if queue.len() >= self.capacity {
            let _oldest = queue.pop_front();
            log::warn!("offline: queue of {client_id} full, dropped oldest message");
        }
        queue.push_back(message);
    }

    /// Take all queued messages of `client_id` in arrival order.
    pub fn drain(&mut self, client_id: &str) -> Vec<ApplicationMessage> {
        self.map
            .remove(client_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub fn remove(&mut self, client_id: &str) {
        self.map.remove(client_id);
    }

    #[must_use]
    pub fn queued(&self, client_id: &str) -> usize {
        self.map.get(client_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SourceProtocol;
    use bytes::Bytes;
    use codec::QoS;

    fn message(topic: &str) -> ApplicationMessage {
        ApplicationMessage::new(
            topic,
            Bytes::from_static(b"x"),
            QoS::AtLeastOnce,
            false,
            SourceProtocol::Mqtt,
            "b",
        )
    }

    #[test]
    fn test_fifo_order() {
        let mut queues = OfflineQueues::new(8);
        queues.push("a", message("t/1"));
        queues.push("a", message("t/2"));
        let drained = queues.drain("a");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].topic(), "t/1");
        assert_eq!(drained[1].topic(), "t/2");
        assert_eq!(queues.queued("a"), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut queues = OfflineQueues::new(2);
        queues.push("a", message("t/1"));
        queues.push("a", message("t/2"));
        queues.push("a", message("t/3"));
        let drained = queues.drain("a");
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].topic(), "t/2");
        assert_eq!(drained[1].topic(), "t/3");
    }
}
