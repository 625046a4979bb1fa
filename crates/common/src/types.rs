use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// Context value reserved for the global (default) scope.
pub const GLOBAL_CONTEXT: &str = "*";

/// Notification variables: placeholder name → substituted value.
pub type Variables = BTreeMap<String, String>;

/// Role carried by every authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    SuperAdmin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::SuperAdmin => write!(f, "super_admin"),
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "super_admin" => Ok(Role::SuperAdmin),
            other => Err(AppError::Validation(format!("Unknown role '{other}'"))),
        }
    }
}

/// Kinds of notifications the service knows how to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Alert,
    Report,
    Notification,
}

impl NotificationType {
    pub const ALL: [NotificationType; 3] = [
        NotificationType::Alert,
        NotificationType::Report,
        NotificationType::Notification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Alert => "alert",
            NotificationType::Report => "report",
            NotificationType::Notification => "notification",
        }
    }

    /// Placeholders a template of this type may reference.
    pub fn allowed_variables(&self) -> &'static [&'static str] {
        match self {
            NotificationType::Alert => &["serverName", "environment", "status", "message"],
            NotificationType::Report => &["reportType", "period", "data"],
            NotificationType::Notification => &["title", "message", "actionUrl"],
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Invalid notification type: {s}")))
    }
}

/// Delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Slack,
    InApp,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Slack, Channel::InApp];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Slack => "slack",
            Channel::InApp => "in_app",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Invalid channel: {s}")))
    }
}

/// Template sort key, rendered as `type#channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeChannel {
    pub notification_type: NotificationType,
    pub channel: Channel,
}

impl TypeChannel {
    pub fn new(notification_type: NotificationType, channel: Channel) -> Self {
        Self {
            notification_type,
            channel,
        }
    }
}

impl std::fmt::Display for TypeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.notification_type, self.channel)
    }
}

impl FromStr for TypeChannel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (notification_type, channel) = s.split_once('#').ok_or_else(|| {
            AppError::Validation("Template ID must be in format 'type#channel'".to_string())
        })?;
        Ok(Self::new(notification_type.parse()?, channel.parse()?))
    }
}

impl TryFrom<String> for TypeChannel {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TypeChannel> for String {
    fn from(value: TypeChannel) -> Self {
        value.to_string()
    }
}

/// A user of the notification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A notification template scoped to a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub context: String,
    #[serde(rename = "type#channel")]
    pub type_channel: TypeChannel,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-type delivery preference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceItem {
    #[serde(default)]
    pub channels: BTreeSet<Channel>,
    #[serde(default)]
    pub enabled: bool,
}

pub type Preferences = BTreeMap<NotificationType, PreferenceItem>;

/// Preferences of one context (`*` or a user id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub context: String,
    pub preferences: Preferences,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InAppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_app_ids: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Channel settings of one context. A channel that is `None` is absent,
/// which is distinct from a channel present with `enabled: false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<SlackConfig>,
    #[serde(default, rename = "inApp", skip_serializing_if = "Option::is_none")]
    pub in_app: Option<InAppConfig>,
}

impl ChannelSettings {
    /// The `enabled` flag of a channel, `None` when the channel or flag is absent.
    pub fn enabled(&self, channel: Channel) -> Option<bool> {
        match channel {
            Channel::Email => self.email.as_ref().and_then(|c| c.enabled),
            Channel::Slack => self.slack.as_ref().and_then(|c| c.enabled),
            Channel::InApp => self.in_app.as_ref().and_then(|c| c.enabled),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.slack.is_none() && self.in_app.is_none()
    }
}

/// System channel configuration of one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfigRecord {
    pub context: String,
    pub config: ChannelSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    #[default]
    Cron,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    pub expression: String,
    #[serde(default, rename = "type")]
    pub kind: ScheduleKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Paused,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleStatus::Active => write!(f, "active"),
            ScheduleStatus::Paused => write!(f, "paused"),
        }
    }
}

/// A cron-bound notification owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledNotification {
    pub schedule_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Variables,
    pub schedule: ScheduleSpec,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A request to notify a set of recipients, as carried by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub recipients: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Variables,
}

/// Identity of one delivery attempt: `id#userId#type#channel`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryKey {
    pub request_id: String,
    pub recipient_id: String,
    pub notification_type: NotificationType,
    pub channel: Channel,
}

impl std::fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}#{}#{}#{}",
            self.request_id, self.recipient_id, self.notification_type, self.channel
        )
    }
}

/// Outcome of one delivery attempt. Exactly one of `content` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    #[serde(rename = "id#userId#type#channel")]
    pub key: String,
    pub request_id: String,
    pub recipient_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn delivered(key: &DeliveryKey, content: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::new(key, Some(content), None, now, ttl)
    }

    pub fn failed(key: &DeliveryKey, error: String, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::new(key, None, Some(error), now, ttl)
    }

    fn new(
        key: &DeliveryKey,
        content: Option<String>,
        error: Option<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            key: key.to_string(),
            request_id: key.request_id.clone(),
            recipient_id: key.recipient_id.clone(),
            notification_type: key.notification_type,
            channel: key.channel,
            content,
            error,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Cron binding of a schedule, owned by the trigger source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    pub schedule_id: String,
    pub expression: String,
    pub enabled: bool,
    /// Occurrences at or before this instant are never fired.
    pub armed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// Accept a map of JSON scalars and stringify numbers and booleans.
/// Null values are dropped; nested values are rejected.
pub fn deserialize_variables<'de, D>(deserializer: D) -> Result<Variables, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(deserialize_optional_variables(deserializer)?.unwrap_or_default())
}

/// Like [`deserialize_variables`], keeping an absent or null map as `None`.
pub fn deserialize_optional_variables<'de, D>(
    deserializer: D,
) -> Result<Option<Variables>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, serde_json::Value>> = Option::deserialize(deserializer)?;
    raw.map(stringify_variables)
        .transpose()
        .map_err(D::Error::custom)
}

fn stringify_variables(raw: BTreeMap<String, serde_json::Value>) -> Result<Variables, String> {
    let mut variables = Variables::new();
    for (name, value) in raw {
        let value = match value {
            serde_json::Value::String(s) => s,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => continue,
            other => return Err(format!("variable '{name}' must be a scalar, got {other}")),
        };
        variables.insert(name, value);
    }
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_channel_round_trip_through_string() {
        let tc: TypeChannel = "alert#in_app".parse().unwrap();
        assert_eq!(tc.notification_type, NotificationType::Alert);
        assert_eq!(tc.channel, Channel::InApp);
        assert_eq!(serde_json::to_value(tc).unwrap(), json!("alert#in_app"));
    }

    #[test]
    fn test_type_channel_rejects_unknown_parts() {
        assert!("alert".parse::<TypeChannel>().is_err());
        assert!("digest#email".parse::<TypeChannel>().is_err());
        assert!("alert#sms".parse::<TypeChannel>().is_err());
    }

    #[test]
    fn test_channel_settings_wire_names() {
        let settings: ChannelSettings = serde_json::from_value(json!({
            "email": {"fromAddress": "ops@example.com", "enabled": true},
            "inApp": {"platformAppIds": ["app-1"], "enabled": false}
        }))
        .unwrap();
        assert_eq!(settings.enabled(Channel::Email), Some(true));
        assert_eq!(settings.enabled(Channel::InApp), Some(false));
        assert_eq!(settings.enabled(Channel::Slack), None);

        let value = serde_json::to_value(&settings).unwrap();
        assert!(value.get("slack").is_none());
        assert_eq!(value["inApp"]["platformAppIds"], json!(["app-1"]));
    }

    #[test]
    fn test_notification_request_accepts_scalar_variables() {
        let request: NotificationRequest = serde_json::from_value(json!({
            "id": "req-1",
            "type": "alert",
            "recipients": ["u1"],
            "variables": {"serverName": "db-1", "status": 500, "paged": true, "note": null}
        }))
        .unwrap();
        assert_eq!(request.variables["status"], "500");
        assert_eq!(request.variables["paged"], "true");
        assert!(!request.variables.contains_key("note"));
    }

    #[test]
    fn test_notification_request_rejects_nested_variables() {
        let result: Result<NotificationRequest, _> = serde_json::from_value(json!({
            "id": "req-1",
            "type": "alert",
            "recipients": [],
            "variables": {"data": {"nested": 1}}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_delivery_key_format() {
        let key = DeliveryKey {
            request_id: "req-1".to_string(),
            recipient_id: "user-1".to_string(),
            notification_type: NotificationType::Report,
            channel: Channel::InApp,
        };
        assert_eq!(key.to_string(), "req-1#user-1#report#in_app");

        let now = Utc::now();
        let record = DeliveryRecord::failed(&key, "boom".into(), now, Duration::hours(1));
        assert!(!record.is_expired(now));
        assert!(record.is_expired(now + Duration::hours(2)));
    }
}
