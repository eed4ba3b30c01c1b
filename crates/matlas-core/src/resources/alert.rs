use super::KindSpec;
use crate::kind::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMatcher {
    pub field_name: String,
    pub operator: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotification {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    /// Channel-specific settings (webhook URLs, Slack channels, ...).
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThreshold {
    pub operator: String,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// A project alert configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfigSpec {
    #[serde(default)]
    pub event_type_name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<AlertMatcher>,
    #[serde(default)]
    pub notifications: Vec<AlertNotification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<AlertThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_threshold: Option<AlertThreshold>,
}

impl Default for AlertConfigSpec {
    fn default() -> Self {
        Self {
            event_type_name: String::new(),
            enabled: true,
            matchers: Vec::new(),
            notifications: Vec::new(),
            threshold: None,
            metric_threshold: None,
        }
    }
}

impl KindSpec for AlertConfigSpec {
    const KIND: ResourceKind = ResourceKind::AlertConfig;

    /// Atlas alert configurations carry no name, so the event type plus its
    /// matchers identify one.
    fn natural_key(&self) -> String {
        let mut matchers: Vec<String> = self
            .matchers
            .iter()
            .map(|m| format!("{}{}{}", m.field_name.trim(), m.operator.trim(), m.value.trim()))
            .collect();
        matchers.sort();
        if matchers.is_empty() {
            self.event_type_name.trim().to_string()
        } else {
            format!("{}[{}]", self.event_type_name.trim(), matchers.join(","))
        }
    }

    fn normalize(&mut self) {
        self.event_type_name = self.event_type_name.trim().to_ascii_uppercase();
        for matcher in &mut self.matchers {
            matcher.field_name = matcher.field_name.trim().to_string();
            matcher.operator = matcher.operator.trim().to_ascii_uppercase();
            matcher.value = matcher.value.trim().to_string();
        }
        self.matchers.sort();
        for notification in &mut self.notifications {
            notification.type_name = notification.type_name.trim().to_ascii_uppercase();
        }
    }

    spec_variant!(AlertConfigSpec, AlertConfig);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_ignores_matcher_order() {
        let a = AlertConfigSpec {
            event_type_name: "HOST_DOWN".into(),
            matchers: vec![
                AlertMatcher {
                    field_name: "HOSTNAME".into(),
                    operator: "EQUALS".into(),
                    value: "a".into(),
                },
                AlertMatcher {
                    field_name: "PORT".into(),
                    operator: "EQUALS".into(),
                    value: "27017".into(),
                },
            ],
            ..Default::default()
        };
        let mut b = a.clone();
        b.matchers.reverse();
        assert_eq!(a.natural_key(), b.natural_key());
    }
}
