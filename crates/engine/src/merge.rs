//! Context merge engine.
//!
//! Write side: validates preference and channel-config payloads and merges
//! them into the stored record with a [`MergeStrategy`]. Read side: resolves
//! the effective settings of a recipient from the global (`*`) record and the
//! recipient's own record.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use herald_common::error::AppError;
use herald_common::types::{
    Channel, ChannelSettings, EmailConfig, GLOBAL_CONTEXT, InAppConfig, NotificationType,
    PreferenceItem, PreferenceRecord, Preferences, Role, SlackConfig, SystemConfigRecord,
};
use herald_store::Store;

use crate::authz::RequestContext;

/// How an update is folded into the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Present fields replace stored ones; absent fields are preserved.
    PartialMerge,
    /// The submitted object replaces the stored one wholesale.
    FullReplace,
}

impl MergeStrategy {
    pub fn select(context: &str, role: Role) -> Self {
        if context == GLOBAL_CONTEXT && role == Role::SuperAdmin {
            MergeStrategy::FullReplace
        } else {
            MergeStrategy::PartialMerge
        }
    }
}

// ============================================================
// Preferences
// ============================================================

/// A preference item as submitted. Strings are kept raw so that unknown
/// channels produce a precise validation message.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferenceItemInput {
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub type PreferencesInput = BTreeMap<String, PreferenceItemInput>;

/// A validated preference item whose absent fields are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencePatch {
    pub channels: Option<BTreeSet<Channel>>,
    pub enabled: Option<bool>,
}

impl PreferencePatch {
    fn into_item(self) -> PreferenceItem {
        PreferenceItem {
            channels: self.channels.unwrap_or_default(),
            enabled: self.enabled.unwrap_or(false),
        }
    }

    fn apply_to(self, item: &mut PreferenceItem) {
        if let Some(channels) = self.channels {
            item.channels = channels;
        }
        if let Some(enabled) = self.enabled {
            item.enabled = enabled;
        }
    }
}

/// Check every notification type and channel name of a payload.
pub fn validate_preferences(
    input: &PreferencesInput,
) -> Result<BTreeMap<NotificationType, PreferencePatch>, AppError> {
    input
        .iter()
        .map(|(name, item)| -> Result<_, AppError> {
            let notification_type: NotificationType = name.parse()?;
            let channels = item
                .channels
                .as_ref()
                .map(|names| {
                    names
                        .iter()
                        .map(|c| c.parse::<Channel>())
                        .collect::<Result<BTreeSet<_>, _>>()
                })
                .transpose()?;
            Ok((
                notification_type,
                PreferencePatch {
                    channels,
                    enabled: item.enabled,
                },
            ))
        })
        .collect()
}

/// Build the preferences of a new record.
pub fn new_preferences(patch: BTreeMap<NotificationType, PreferencePatch>) -> Preferences {
    patch
        .into_iter()
        .map(|(t, p)| (t, p.into_item()))
        .collect()
}

/// Fold a validated update into stored preferences. Partial merges work per
/// notification type; types absent from the update are kept.
pub fn merge_preferences(
    strategy: MergeStrategy,
    stored: &Preferences,
    patch: BTreeMap<NotificationType, PreferencePatch>,
) -> Preferences {
    match strategy {
        MergeStrategy::FullReplace => new_preferences(patch),
        MergeStrategy::PartialMerge => {
            let mut merged = stored.clone();
            for (notification_type, item) in patch {
                item.apply_to(merged.entry(notification_type).or_default());
            }
            merged
        }
    }
}

// ============================================================
// Channel config
// ============================================================

fn is_set(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

fn sets_email_addresses(config: &ChannelSettings) -> bool {
    config
        .email
        .as_ref()
        .is_some_and(|e| is_set(&e.from_address) || is_set(&e.reply_to_address))
}

fn sets_delivery_targets(config: &ChannelSettings) -> bool {
    let webhook = config
        .slack
        .as_ref()
        .is_some_and(|s| is_set(&s.webhook_url));
    let app_ids = config
        .in_app
        .as_ref()
        .and_then(|c| c.platform_app_ids.as_ref())
        .is_some_and(|ids| !ids.is_empty());
    webhook || app_ids
}

/// Reject fields the writer may not set on `context`.
///
/// Users may only toggle `enabled`. Email addresses are global-only; Slack
/// webhooks and in-app platform app ids are per-user and only an admin may
/// provision them.
pub fn check_config_permissions(
    actor: &RequestContext,
    context: &str,
    config: &ChannelSettings,
) -> Result<(), AppError> {
    if !actor.is_admin() {
        if sets_email_addresses(config) || sets_delivery_targets(config) {
            return Err(AppError::Forbidden(
                "Users can only change the enabled flag of a channel".to_string(),
            ));
        }
        return Ok(());
    }

    if context == GLOBAL_CONTEXT {
        if sets_delivery_targets(config) {
            return Err(AppError::Forbidden(
                "Slack webhook URL and in-app platform app ids cannot be set globally".to_string(),
            ));
        }
    } else if sets_email_addresses(config) {
        return Err(AppError::Forbidden(
            "Email addresses can only be set on the global context".to_string(),
        ));
    }

    Ok(())
}

/// Fold a config update into the stored settings.
pub fn merge_config(
    strategy: MergeStrategy,
    stored: &ChannelSettings,
    update: ChannelSettings,
) -> ChannelSettings {
    match strategy {
        MergeStrategy::FullReplace => update,
        MergeStrategy::PartialMerge => ChannelSettings {
            email: merge_channel(&stored.email, update.email, |s, u| EmailConfig {
                from_address: u.from_address.or_else(|| s.from_address.clone()),
                reply_to_address: u.reply_to_address.or_else(|| s.reply_to_address.clone()),
                enabled: u.enabled.or(s.enabled),
            }),
            slack: merge_channel(&stored.slack, update.slack, |s, u| SlackConfig {
                webhook_url: u.webhook_url.or_else(|| s.webhook_url.clone()),
                enabled: u.enabled.or(s.enabled),
            }),
            in_app: merge_channel(&stored.in_app, update.in_app, |s, u| InAppConfig {
                platform_app_ids: u.platform_app_ids.or_else(|| s.platform_app_ids.clone()),
                enabled: u.enabled.or(s.enabled),
            }),
        },
    }
}

fn merge_channel<T: Clone>(
    stored: &Option<T>,
    update: Option<T>,
    merge: impl FnOnce(&T, T) -> T,
) -> Option<T> {
    match (stored, update) {
        (Some(s), Some(u)) => Some(merge(s, u)),
        (s, None) => s.clone(),
        (None, u) => u,
    }
}

// ============================================================
// Effective settings
// ============================================================

/// Global and user-scoped records of one recipient, loaded together.
#[derive(Debug, Clone, Default)]
pub struct EffectiveSettings {
    pub global_preferences: Option<PreferenceRecord>,
    pub user_preferences: Option<PreferenceRecord>,
    pub global_config: Option<SystemConfigRecord>,
    pub user_config: Option<SystemConfigRecord>,
}

impl EffectiveSettings {
    pub async fn load(store: &Store, user_id: &str) -> Result<Self, AppError> {
        Ok(Self {
            global_preferences: store.get_preferences(GLOBAL_CONTEXT).await?,
            user_preferences: store.get_preferences(user_id).await?,
            global_config: store.get_config(GLOBAL_CONTEXT).await?,
            user_config: store.get_config(user_id).await?,
        })
    }

    /// The user's item for the type, falling back to the global one.
    pub fn preference(&self, notification_type: NotificationType) -> Option<&PreferenceItem> {
        fn lookup(
            record: &Option<PreferenceRecord>,
            notification_type: NotificationType,
        ) -> Option<&PreferenceItem> {
            record
                .as_ref()
                .and_then(|r| r.preferences.get(&notification_type))
        }
        lookup(&self.user_preferences, notification_type)
            .or_else(|| lookup(&self.global_preferences, notification_type))
    }

    /// Global flag must be on; the user flag restricts only when present.
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        let global = self
            .global_config
            .as_ref()
            .and_then(|c| c.config.enabled(channel));
        let user = self
            .user_config
            .as_ref()
            .and_then(|c| c.config.enabled(channel));
        global == Some(true) && user != Some(false)
    }

    /// Channels on which the type should be delivered.
    pub fn enabled_channels(&self, notification_type: NotificationType) -> Vec<Channel> {
        match self.preference(notification_type) {
            Some(item) if item.enabled => item
                .channels
                .iter()
                .copied()
                .filter(|c| self.channel_enabled(*c))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn slack_webhook(&self) -> Option<&str> {
        self.user_config
            .as_ref()
            .and_then(|c| c.config.slack.as_ref())
            .and_then(|s| s.webhook_url.as_deref())
            .filter(|url| !url.is_empty())
    }

    pub fn platform_app_ids(&self) -> Option<&BTreeSet<String>> {
        self.user_config
            .as_ref()
            .and_then(|c| c.config.in_app.as_ref())
            .and_then(|c| c.platform_app_ids.as_ref())
            .filter(|ids| !ids.is_empty())
    }

    pub fn email_from(&self) -> Option<&str> {
        self.global_email()
            .and_then(|e| e.from_address.as_deref())
            .filter(|a| !a.is_empty())
    }

    pub fn email_reply_to(&self) -> Option<&str> {
        self.global_email()
            .and_then(|e| e.reply_to_address.as_deref())
            .filter(|a| !a.is_empty())
    }

    fn global_email(&self) -> Option<&EmailConfig> {
        self.global_config
            .as_ref()
            .and_then(|c| c.config.email.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn settings(value: serde_json::Value) -> ChannelSettings {
        serde_json::from_value(value).unwrap()
    }

    fn config_record(context: &str, value: serde_json::Value) -> SystemConfigRecord {
        let now = Utc::now();
        SystemConfigRecord {
            context: context.to_string(),
            config: settings(value),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn preference_record(context: &str, value: serde_json::Value) -> PreferenceRecord {
        let now = Utc::now();
        PreferenceRecord {
            context: context.to_string(),
            preferences: serde_json::from_value(value).unwrap(),
            timezone: None,
            language: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(
            MergeStrategy::select("*", Role::SuperAdmin),
            MergeStrategy::FullReplace
        );
        assert_eq!(
            MergeStrategy::select("u1", Role::SuperAdmin),
            MergeStrategy::PartialMerge
        );
        assert_eq!(
            MergeStrategy::select("u1", Role::User),
            MergeStrategy::PartialMerge
        );
    }

    #[test]
    fn test_validate_preferences_rejects_unknown_names() {
        let bad_type: PreferencesInput =
            serde_json::from_value(json!({"digest": {"channels": ["email"]}})).unwrap();
        let err = validate_preferences(&bad_type).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Invalid notification type: digest");

        let bad_channel: PreferencesInput =
            serde_json::from_value(json!({"alert": {"channels": ["sms"]}})).unwrap();
        let err = validate_preferences(&bad_channel).unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Invalid channel: sms");
    }

    #[test]
    fn test_partial_preference_merge_is_per_type() {
        let stored: Preferences = serde_json::from_value(json!({
            "alert": {"channels": ["email", "slack"], "enabled": true},
            "report": {"channels": ["email"], "enabled": true}
        }))
        .unwrap();
        let input: PreferencesInput =
            serde_json::from_value(json!({"alert": {"enabled": false}})).unwrap();
        let patch = validate_preferences(&input).unwrap();

        let merged = merge_preferences(MergeStrategy::PartialMerge, &stored, patch.clone());
        let alert = &merged[&NotificationType::Alert];
        assert!(!alert.enabled);
        assert_eq!(alert.channels.len(), 2);
        assert!(merged.contains_key(&NotificationType::Report));

        let replaced = merge_preferences(MergeStrategy::FullReplace, &stored, patch);
        assert_eq!(replaced.len(), 1);
        assert!(replaced[&NotificationType::Alert].channels.is_empty());
    }

    #[test]
    fn test_user_config_permissions() {
        let actor = RequestContext::new("u1", Role::User);
        let enabled_only = settings(json!({"slack": {"enabled": false}}));
        assert!(check_config_permissions(&actor, "u1", &enabled_only).is_ok());

        for forbidden in [
            json!({"email": {"fromAddress": "a@b.c"}}),
            json!({"email": {"replyToAddress": "a@b.c"}}),
            json!({"slack": {"webhookUrl": "https://hooks"}}),
            json!({"inApp": {"platformAppIds": ["app"]}}),
        ] {
            let err = check_config_permissions(&actor, "u1", &settings(forbidden)).unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)));
        }
    }

    #[test]
    fn test_admin_config_permissions() {
        let actor = RequestContext::new("root", Role::SuperAdmin);
        let addresses = settings(json!({"email": {"fromAddress": "ops@x.io", "enabled": true}}));
        let targets = settings(json!({"slack": {"webhookUrl": "https://hooks"}}));

        assert!(check_config_permissions(&actor, "*", &addresses).is_ok());
        assert!(check_config_permissions(&actor, "*", &targets).is_err());
        assert!(check_config_permissions(&actor, "u1", &targets).is_ok());
        assert!(check_config_permissions(&actor, "u1", &addresses).is_err());
    }

    #[test]
    fn test_partial_config_merge_preserves_omitted_fields() {
        let stored = settings(json!({
            "slack": {"webhookUrl": "https://hooks/u1", "enabled": true},
            "email": {"enabled": true}
        }));
        let update = settings(json!({"slack": {"enabled": false}}));

        let merged = merge_config(MergeStrategy::PartialMerge, &stored, update.clone());
        let slack = merged.slack.unwrap();
        assert_eq!(slack.webhook_url.as_deref(), Some("https://hooks/u1"));
        assert_eq!(slack.enabled, Some(false));
        assert_eq!(merged.email.unwrap().enabled, Some(true));

        let replaced = merge_config(MergeStrategy::FullReplace, &stored, update);
        assert!(replaced.email.is_none());
        assert!(replaced.slack.unwrap().webhook_url.is_none());
    }

    #[test]
    fn test_effective_channels() {
        let effective = EffectiveSettings {
            global_preferences: Some(preference_record(
                "*",
                json!({"alert": {"channels": ["email", "slack", "in_app"], "enabled": true}}),
            )),
            user_preferences: Some(preference_record(
                "u1",
                json!({"alert": {"channels": ["slack"], "enabled": true}}),
            )),
            global_config: Some(config_record(
                "*",
                json!({
                    "email": {"enabled": true},
                    "slack": {"enabled": true},
                    "inApp": {"enabled": false}
                }),
            )),
            user_config: None,
        };

        assert_eq!(
            effective.enabled_channels(NotificationType::Alert),
            vec![Channel::Slack]
        );
        assert!(effective.enabled_channels(NotificationType::Report).is_empty());
        assert!(!effective.channel_enabled(Channel::InApp));
    }

    #[test]
    fn test_user_flag_only_restricts() {
        let mut effective = EffectiveSettings {
            global_config: Some(config_record("*", json!({"slack": {"enabled": true}}))),
            user_config: Some(config_record("u1", json!({"slack": {"enabled": false}}))),
            ..Default::default()
        };
        assert!(!effective.channel_enabled(Channel::Slack));

        effective.user_config = Some(config_record("u1", json!({"slack": {"enabled": true}})));
        effective.global_config = None;
        assert!(!effective.channel_enabled(Channel::Slack));
    }

    #[test]
    fn test_delivery_targets_come_from_user_config() {
        let effective = EffectiveSettings {
            global_config: Some(config_record(
                "*",
                json!({"email": {"fromAddress": "ops@x.io"}}),
            )),
            user_config: Some(config_record(
                "u1",
                json!({
                    "slack": {"webhookUrl": "https://hooks/u1"},
                    "inApp": {"platformAppIds": ["web"]}
                }),
            )),
            ..Default::default()
        };
        assert_eq!(effective.slack_webhook(), Some("https://hooks/u1"));
        assert_eq!(effective.platform_app_ids().unwrap().len(), 1);
        assert_eq!(effective.email_from(), Some("ops@x.io"));
        assert_eq!(effective.email_reply_to(), None);
    }
}
