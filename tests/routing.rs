// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Routing semantics across the subscription store, the retained store
//! and the bridge rules.

use bytes::Bytes;

use codec::{QoS, SubTopic};
use tianhe::bridge::Rule;
use tianhe::cluster::{fingerprint, MessageIdCache};
use tianhe::config::BridgeRule;
use tianhe::dispatcher::{OfflineQueues, RetainedStore, SubTrie};
use tianhe::message::{ApplicationMessage, SourceProtocol};
use tianhe::types::SessionGid;

fn publish(topic: &str, payload: &'static [u8], qos: QoS, retain: bool) -> ApplicationMessage {
    ApplicationMessage::new(
        topic,
        Bytes::from_static(payload),
        qos,
        retain,
        SourceProtocol::Mqtt,
        "b",
    )
}

#[test]
fn basic_pub_sub_qos0() {
    // Client a subscribes sensors/+/temp with QoS 0; client b publishes
    // sensors/kitchen/temp "25.5" QoS 0 retain=false.
    let gid_a = SessionGid::new(1, 1);
    let mut trie = SubTrie::new();
    trie.subscribe(gid_a, "sensors/+/temp", QoS::AtMostOnce)
        .unwrap();

    let message = publish("sensors/kitchen/temp", b"25.5", QoS::AtMostOnce, false);
    let matches = trie.match_topic(message.topic());
    assert_eq!(matches.len(), 1);
    let (gid, granted_qos) = matches[0];
    assert_eq!(gid, gid_a);
    assert_eq!(message.qos().min(granted_qos), QoS::AtMostOnce);

    // The retained store stays empty for retain=false publishes.
    let mut retained = RetainedStore::new();
    if message.retain() {
        retained.apply(&message);
    }
    assert!(retained.is_empty());
}

#[test]
fn retained_replay_with_downgrade() {
    // b publishes home/light "on" QoS 1 retain=true and disconnects; a
    // then subscribes home/# with QoS 2 and receives the retained message
    // with min(1, 2) = 1.
    let mut retained = RetainedStore::new();
    retained.apply(&publish("home/light", b"on", QoS::AtLeastOnce, true));

    let filter = SubTopic::parse("home/#").unwrap();
    let granted_qos = QoS::ExactOnce;
    let replayed = retained.matches(&filter);
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].topic(), "home/light");
    assert_eq!(replayed[0].payload().as_ref(), b"on");
    assert_eq!(replayed[0].qos().min(granted_qos), QoS::AtLeastOnce);
}

#[test]
fn retained_deletion() {
    // Publishing an empty retained payload removes the entry; a new
    // subscriber to home/# receives nothing.
    let mut retained = RetainedStore::new();
    retained.apply(&publish("home/light", b"on", QoS::AtLeastOnce, true));
    retained.apply(&publish("home/light", b"", QoS::AtLeastOnce, true));

    let filter = SubTopic::parse("home/#").unwrap();
    assert!(retained.matches(&filter).is_empty());
}

#[test]
fn at_most_one_copy_per_session() {
    // A session holding several overlapping filters still receives one
    // copy per publish.
    let gid = SessionGid::new(1, 7);
    let mut trie = SubTrie::new();
    trie.subscribe(gid, "t/#", QoS::AtMostOnce).unwrap();
    trie.subscribe(gid, "t/+", QoS::AtLeastOnce).unwrap();
    trie.subscribe(gid, "t/hello", QoS::ExactOnce).unwrap();

    let matches = trie.match_topic("t/hello");
    assert_eq!(matches.len(), 1);
}

#[test]
fn persistent_session_round_trip() {
    // Subscriptions survive a disconnect with clean_session=false and are
    // identical after resumption.
    let gid_old = SessionGid::new(1, 3);
    let gid_new = SessionGid::new(1, 9);
    let mut trie = SubTrie::new();
    trie.subscribe(gid_old, "home/#", QoS::AtLeastOnce).unwrap();
    trie.subscribe(gid_old, "sensors/+/temp", QoS::AtMostOnce)
        .unwrap();

    let stored = trie.remove_session(gid_old).unwrap();
    assert!(trie.match_topic("home/light").is_empty());

    trie.insert_session(gid_new, stored);
    let matches = trie.match_topic("home/light");
    assert_eq!(matches, vec![(gid_new, QoS::AtLeastOnce)]);
}

#[test]
fn offline_queue_bound() {
    let mut queues = OfflineQueues::new(3);
    for index in 0..5 {
        queues.push(
            "a",
            publish("t/x", b"payload", QoS::AtLeastOnce, false).with_published_at(
                chrono::Utc::now() + chrono::Duration::seconds(index),
            ),
        );
    }
    assert_eq!(queues.queued("a"), 3);
}

#[test]
fn cluster_dedup_suppresses_rebroadcast() {
    // A publish originated at n2 floods to n1 and n3; the same message
    // arriving again over another path is suppressed on every node.
    let ticks = 1_700_000_321;
    let fp = fingerprint("n2", "t/hello", b"hi", ticks);

    let ttl = std::time::Duration::from_secs(60);
    let mut cache_n1 = MessageIdCache::new(ttl);
    let mut cache_n2 = MessageIdCache::new(ttl);
    let mut cache_n3 = MessageIdCache::new(ttl);

    // n2 records the fingerprint when broadcasting.
    assert!(cache_n2.insert(fp.clone()));
    // n1 and n3 record it on first receipt and deliver locally once.
    assert!(cache_n1.insert(fp.clone()));
    assert!(cache_n3.insert(fp.clone()));

    // n3 re-broadcasts to n1; n1 drops the duplicate.
    assert!(!cache_n1.insert(fp.clone()));
    assert!(cache_n1.contains(&fp));
    assert!(cache_n2.contains(&fp));
    assert!(cache_n3.contains(&fp));
}

#[test]
fn bridge_upstream_rewrite() {
    // Upstream rule {filter: "sensor/#", remote_prefix: "site-a/"}: a
    // local publish of sensor/temperature goes upstream with the prefix.
    let rule = Rule::from_config(
        &BridgeRule {
            local_topic_filter: "sensor/#".to_string(),
            remote_topic_prefix: Some("site-a/".to_string()),
            local_topic_prefix: None,
            qos: None,
            enabled: true,
        },
        QoS::AtMostOnce,
    )
    .unwrap()
    .unwrap();

    let message = publish("sensor/temperature", b"22", QoS::AtMostOnce, false);
    assert!(rule.matches_local(message.topic()));
    assert_eq!(
        rule.upstream_topic(message.topic()),
        "site-a/sensor/temperature"
    );
}
