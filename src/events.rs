// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Asynchronous server event dispatching.
//!
//! Post-hoc notifications are enqueued on a bounded in-memory queue and
//! consumed by a single task, so handler latency never back-pressures the
//! packet path. When the queue is full the oldest event is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use codec::QoS;

use crate::error::Error;

pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 10_000;

/// Notifications emitted by the broker after the fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        client_id: String,
        session_present: bool,
    },

    ClientDisconnected {
        client_id: String,
    },

    ClientSubscribed {
        client_id: String,
        filter: String,
        granted_qos: QoS,
    },

    ClientUnsubscribed {
        client_id: String,
        filter: String,
    },

    /// A publish finished fan-out; `delivered` is the number of sessions
    /// which received a copy.
    MessagePublished {
        topic: String,
        delivered: usize,
    },

    /// A publish matched no subscriber at all.
    MessageNotDelivered {
        topic: String,
    },

    /// One copy was handed to one recipient session.
    MessageDelivered {
        client_id: String,
        topic: String,
    },
}

/// Receives dispatched events, one at a time, in queue order.
pub trait EventHandler: Send {
    /// # Errors
    ///
    /// Errors are reported through the dispatcher's `on_event_error`
    /// callback and do not stop dispatching.
    fn handle_event(&mut self, event: &ServerEvent) -> Result<(), Error>;
}

#[derive(Debug, Default)]
struct EventQueue {
    events: VecDeque<ServerEvent>,
    dropped: u64,
}

/// Cheap cloneable handle used by apps to post events.
///
/// Posting never blocks: when the queue is at capacity the oldest queued
/// event is discarded to make room.
#[derive(Clone)]
pub struct EventSender {
    queue: Arc<Mutex<EventQueue>>,
    notify: Arc<Notify>,
    capacity: usize,
}

impl EventSender {
    pub fn post(&self, event: ServerEvent) {
        if let Ok(mut queue) = self.queue.lock() {
            if queue.events.len() >= self.capacity {
                let _oldest = queue.events.pop_front();
                queue.dropped += 1;
                if queue.dropped % 1000 == 1 {
                    log::warn!("events: queue saturated, {} events dropped", queue.dropped);
                }
            }
            queue.events.push_back(event);
        }
        self.notify.notify_one();
    }
}

/// Single-consumer event dispatch app.
pub struct EventDispatcher {
    queue: Arc<Mutex<EventQueue>>,
    notify: Arc<Notify>,
    capacity: usize,
    handlers: Vec<Box<dyn EventHandler>>,
    on_event_error: Option<Box<dyn Fn(&Error) + Send>>,
}

impl EventDispatcher {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(EventQueue::default())),
            notify: Arc::new(Notify::new()),
            capacity,
            handlers: Vec::new(),
            on_event_error: None,
        }
    }

    #[must_use]
    pub fn sender(&self) -> EventSender {
        EventSender {
            queue: Arc::clone(&self.queue),
            notify: Arc::clone(&self.notify),
            capacity: self.capacity,
        }
    }

    pub fn add_handler(&mut self, handler: Box<dyn EventHandler>) -> &mut Self {
        self.handlers.push(handler);
        self
    }

    pub fn set_on_event_error(&mut self, callback: Box<dyn Fn(&Error) + Send>) -> &mut Self {
        self.on_event_error = Some(callback);
        self
    }

    fn pop_event(&self) -> Option<ServerEvent> {
        self.queue.lock().ok()?.events.pop_front()
    }

    /// Deliver all currently queued events to all handlers.
    pub fn drain(&mut self) {
        while let Some(event) = self.pop_event() {
            for handler in &mut self.handlers {
                if let Err(err) = handler.handle_event(&event) {
                    log::error!("events: handler failed: {err}");
                    if let Some(on_event_error) = &self.on_event_error {
                        on_event_error(&err);
                    }
                }
            }
        }
    }

    pub async fn run_loop(&mut self) {
        loop {
            self.notify.notified().await;
            self.drain();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collector {
        seen: Arc<Mutex<Vec<ServerEvent>>>,
    }

    impl EventHandler for Collector {
        fn handle_event(&mut self, event: &ServerEvent) -> Result<(), Error> {
            self.seen.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    #[test]
    fn test_events_keep_order() {
        let mut dispatcher = EventDispatcher::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_handler(Box::new(Collector {
            seen: Arc::clone(&seen),
        }));
        let sender = dispatcher.sender();

        sender.post(ServerEvent::ClientConnected {
            client_id: "a".to_string(),
            session_present: false,
        });
        sender.post(ServerEvent::ClientDisconnected {
            client_id: "a".to_string(),
        });
        dispatcher.drain();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(matches!(seen[0], ServerEvent::ClientConnected { .. }));
        assert!(matches!(seen[1], ServerEvent::ClientDisconnected { .. }));
    }

    #[test]
    fn test_post_wakes_consumer() {
        tokio_test::block_on(async {
            let mut dispatcher = EventDispatcher::new(4);
            let seen = Arc::new(Mutex::new(Vec::new()));
            dispatcher.add_handler(Box::new(Collector {
                seen: Arc::clone(&seen),
            }));
            let sender = dispatcher.sender();
            sender.post(ServerEvent::ClientDisconnected {
                client_id: "a".to_string(),
            });
            // The notification posted before the consumer parked is not
            // lost.
            dispatcher.notify.notified().await;
            dispatcher.drain();
            assert_eq!(seen.lock().unwrap().len(), 1);
        });
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut dispatcher = EventDispatcher::new(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.add_handler(Box::new(Collector {
            seen: Arc::clone(&seen),
        }));
        let sender = dispatcher.sender();

        for topic in ["t/0", "t/1", "t/2"] {
            sender.post(ServerEvent::MessageNotDelivered {
                topic: topic.to_string(),
            });
        }
        dispatcher.drain();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ServerEvent::MessageNotDelivered {
                    topic: "t/1".to_string()
                },
                ServerEvent::MessageNotDelivered {
                    topic: "t/2".to_string()
                },
            ]
        );
    }
}
