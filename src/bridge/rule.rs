// Copyright (c) 2022 Tianhe Project Authors. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Topic mapping rules of a bridge.

use codec::{QoS, SubTopic, TopicError};

use crate::config;

/// A parsed, enabled bridge rule.
///
/// Upstream direction: local topics matching `filter` are forwarded to the
/// remote broker with `remote_prefix` prepended. Downstream direction: the
/// remote filter `remote_prefix + filter` is subscribed; incoming topics
/// get `remote_prefix` stripped and `local_prefix` prepended before they
/// are injected locally.
#[derive(Debug, Clone)]
pub struct Rule {
    filter: SubTopic,
    remote_prefix: Option<String>,
    local_prefix: Option<String>,
    qos: QoS,
}

impl Rule {
    /// Build a rule from config; disabled rules yield None.
    ///
    /// # Errors
    ///
    /// Returns error if the filter is invalid.
    pub fn from_config(
        rule: &config::BridgeRule,
        default_qos: QoS,
    ) -> Result<Option<Self>, TopicError> {
        if !rule.enabled {
            return Ok(None);
        }
        let filter = SubTopic::parse(&rule.local_topic_filter)?;
        Ok(Some(Self {
            filter,
            remote_prefix: rule.remote_topic_prefix.clone(),
            local_prefix: rule.local_topic_prefix.clone(),
            qos: rule.qos.unwrap_or(default_qos),
        }))
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    /// Whether a local topic matches the upstream side of this rule.
    #[must_use]
    pub fn matches_local(&self, topic: &str) -> bool {
        self.filter.is_match(topic)
    }

    /// Topic published on the remote broker for a matching local topic.
    #[must_use]
    pub fn upstream_topic(&self, topic: &str) -> String {
        self.remote_prefix
            .as_ref()
            .map_or_else(|| topic.to_string(), |prefix| format!("{prefix}{topic}"))
    }

    /// Filter subscribed on the remote broker for the downstream
    /// direction.
    #[must_use]
    pub fn remote_filter(&self) -> String {
        self.remote_prefix.as_ref().map_or_else(
            || self.filter.as_ref().to_string(),
            |prefix| format!("{prefix}{}", self.filter.as_ref()),
        )
    }

    /// Whether a topic arriving from the remote broker belongs to this
    /// rule.
    #[must_use]
    pub fn matches_remote(&self, remote_topic: &str) -> bool {
        self.strip_remote_prefix(remote_topic)
            .is_some_and(|topic| self.filter.is_match(topic))
    }

    /// Local topic for a matching remote topic.
    ///
    /// Returns None when the remote topic does not carry the expected
    /// prefix.
    #[must_use]
    pub fn downstream_topic(&self, remote_topic: &str) -> Option<String> {
        let topic = self.strip_remote_prefix(remote_topic)?;
        Some(
            self.local_prefix
                .as_ref()
                .map_or_else(|| topic.to_string(), |prefix| format!("{prefix}{topic}")),
        )
    }

    fn strip_remote_prefix<'a>(&self, remote_topic: &'a str) -> Option<&'a str> {
        match &self.remote_prefix {
            Some(prefix) => remote_topic.strip_prefix(prefix.as_str()),
            None => Some(remote_topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(filter: &str, remote_prefix: Option<&str>, local_prefix: Option<&str>) -> Rule {
        let config_rule = config::BridgeRule {
            local_topic_filter: filter.to_string(),
            remote_topic_prefix: remote_prefix.map(ToString::to_string),
            local_topic_prefix: local_prefix.map(ToString::to_string),
            qos: None,
            enabled: true,
        };
        Rule::from_config(&config_rule, QoS::AtMostOnce)
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_upstream_rewrite() {
        let rule = rule("sensor/#", Some("site-a/"), None);
        assert!(rule.matches_local("sensor/temperature"));
        assert_eq!(
            rule.upstream_topic("sensor/temperature"),
            "site-a/sensor/temperature"
        );
        assert!(!rule.matches_local("actuator/valve"));
    }

    #[test]
    fn test_downstream_rewrite() {
        let rule = rule("cmd/#", Some("site-a/"), Some("parent/"));
        assert_eq!(rule.remote_filter(), "site-a/cmd/#");
        assert!(rule.matches_remote("site-a/cmd/restart"));
        assert_eq!(
            rule.downstream_topic("site-a/cmd/restart"),
            Some("parent/cmd/restart".to_string())
        );
        assert!(!rule.matches_remote("site-b/cmd/restart"));
    }

    #[test]
    fn test_disabled_rule() {
        let config_rule = config::BridgeRule {
            local_topic_filter: "a/#".to_string(),
            remote_topic_prefix: None,
            local_topic_prefix: None,
            qos: None,
            enabled: false,
        };
        assert!(Rule::from_config(&config_rule, QoS::AtMostOnce)
            .unwrap()
            .is_none());
    }
}
