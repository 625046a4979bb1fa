//! Fan-out processor.
//!
//! Expands one notification request into per-recipient, per-channel
//! deliveries:
//! 1. Resolve the recipient's effective preferences and channel flags
//! 2. Resolve and render the template of every enabled channel
//! 3. Hand the rendered content to the channel dispatcher
//! 4. Upsert one ledger record per `(id, recipient, type, channel)`
//!
//! Expected conditions (missing template, sender rejection) are recorded in
//! the ledger. A delivery without a configured target still records its
//! rendered content; the dispatcher decides whether anything is sent. Only
//! store failures are returned, which makes the queue redeliver the request.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use herald_common::error::AppError;
use herald_common::types::{
    Channel, DeliveryKey, DeliveryRecord, NotificationRequest, TypeChannel,
};
use herald_store::Store;

use crate::merge::EffectiveSettings;
use crate::resolver::{ResolveError, TemplateResolver};

/// Where a rendered notification goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryTarget {
    Email {
        to: String,
        from: Option<String>,
        reply_to: Option<String>,
    },
    Slack {
        webhook_url: String,
    },
    InApp {
        platform_app_ids: Vec<String>,
    },
}

/// One rendered notification ready to send. `target` is `None` when the
/// recipient has no delivery address configured for the channel.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub key: DeliveryKey,
    pub target: Option<DeliveryTarget>,
    pub content: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0} channel is not configured")]
    NotConfigured(Channel),

    #[error("Delivery rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Channel-specific senders.
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    async fn dispatch(&self, delivery: &Delivery) -> Result<(), DispatchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Delivered,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    pub recipient_id: String,
    pub channel: Channel,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of one processed request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingReport {
    pub request_id: String,
    pub total_recipients: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Recipients with no enabled channel for the type.
    pub skipped: usize,
    pub outcomes: Vec<ChannelOutcome>,
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Store(#[from] AppError),

    #[error("{0}")]
    Terminal(String),
}

impl From<ResolveError> for AttemptError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Store(e) => AttemptError::Store(e),
            other => AttemptError::Terminal(other.to_string()),
        }
    }
}

impl From<DispatchError> for AttemptError {
    fn from(err: DispatchError) -> Self {
        AttemptError::Terminal(err.to_string())
    }
}

pub struct FanOutProcessor {
    store: Store,
    resolver: TemplateResolver,
    dispatcher: Arc<dyn ChannelDispatcher>,
    ledger_ttl: Duration,
    default_email_from: Option<String>,
}

impl FanOutProcessor {
    pub fn new(store: Store, dispatcher: Arc<dyn ChannelDispatcher>, ledger_ttl: Duration) -> Self {
        Self {
            resolver: TemplateResolver::new(store.clone()),
            store,
            dispatcher,
            ledger_ttl,
            default_email_from: None,
        }
    }

    /// Sender address used when the global email config has none.
    pub fn with_default_email_from(mut self, from: Option<String>) -> Self {
        self.default_email_from = from;
        self
    }

    /// Process one request. Safe to repeat: ledger writes are upserts.
    pub async fn process(
        &self,
        request: &NotificationRequest,
    ) -> Result<ProcessingReport, AppError> {
        let mut report = ProcessingReport {
            request_id: request.id.clone(),
            ..Default::default()
        };

        let mut seen = HashSet::new();
        for recipient in &request.recipients {
            if !seen.insert(recipient.as_str()) {
                continue;
            }
            report.total_recipients += 1;
            self.process_recipient(request, recipient, &mut report)
                .await?;
        }

        tracing::info!(
            request_id = %request.id,
            notification_type = %request.notification_type,
            recipients = report.total_recipients,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "Notification request processed"
        );

        Ok(report)
    }

    async fn process_recipient(
        &self,
        request: &NotificationRequest,
        recipient: &str,
        report: &mut ProcessingReport,
    ) -> Result<(), AppError> {
        let settings = EffectiveSettings::load(&self.store, recipient).await?;
        let channels = settings.enabled_channels(request.notification_type);
        if channels.is_empty() {
            tracing::debug!(
                recipient,
                notification_type = %request.notification_type,
                "No enabled channels for recipient"
            );
            report.skipped += 1;
            return Ok(());
        }

        for channel in channels {
            let key = DeliveryKey {
                request_id: request.id.clone(),
                recipient_id: recipient.to_string(),
                notification_type: request.notification_type,
                channel,
            };
            let now = Utc::now();

            let (record, outcome) = match self.attempt(request, &key, &settings).await {
                Ok(content) => (
                    DeliveryRecord::delivered(&key, content, now, self.ledger_ttl),
                    ChannelOutcome {
                        recipient_id: key.recipient_id.clone(),
                        channel,
                        outcome: Outcome::Delivered,
                        error: None,
                    },
                ),
                Err(AttemptError::Terminal(reason)) => {
                    tracing::warn!(delivery = %key, error = %reason, "Delivery failed");
                    (
                        DeliveryRecord::failed(&key, reason.clone(), now, self.ledger_ttl),
                        ChannelOutcome {
                            recipient_id: key.recipient_id.clone(),
                            channel,
                            outcome: Outcome::Failed,
                            error: Some(reason),
                        },
                    )
                }
                Err(AttemptError::Store(e)) => return Err(e),
            };

            self.store.put_delivery(&record).await?;
            match outcome.outcome {
                Outcome::Delivered => report.delivered += 1,
                Outcome::Failed => report.failed += 1,
            }
            report.outcomes.push(outcome);
        }

        Ok(())
    }

    async fn attempt(
        &self,
        request: &NotificationRequest,
        key: &DeliveryKey,
        settings: &EffectiveSettings,
    ) -> Result<String, AttemptError> {
        let type_channel = TypeChannel::new(key.notification_type, key.channel);
        let content = self
            .resolver
            .resolve(&key.recipient_id, type_channel, &request.variables)
            .await?;

        let target = self.target(key, settings).await?;
        let delivery = Delivery {
            key: key.clone(),
            target,
            content,
        };
        self.dispatcher.dispatch(&delivery).await?;

        tracing::debug!(delivery = %key, "Delivered");
        Ok(delivery.content)
    }

    async fn target(
        &self,
        key: &DeliveryKey,
        settings: &EffectiveSettings,
    ) -> Result<Option<DeliveryTarget>, AppError> {
        let target = match key.channel {
            Channel::Email => {
                let user = self.store.get_user(&key.recipient_id).await?;
                user.map(|u| u.email)
                    .filter(|e| !e.is_empty())
                    .map(|to| DeliveryTarget::Email {
                        to,
                        from: settings
                            .email_from()
                            .map(str::to_string)
                            .or_else(|| self.default_email_from.clone()),
                        reply_to: settings.email_reply_to().map(str::to_string),
                    })
            }
            Channel::Slack => settings.slack_webhook().map(|url| DeliveryTarget::Slack {
                webhook_url: url.to_string(),
            }),
            Channel::InApp => settings
                .platform_app_ids()
                .map(|ids| DeliveryTarget::InApp {
                    platform_app_ids: ids.iter().cloned().collect(),
                }),
        };
        if target.is_none() {
            tracing::debug!(delivery = %key, "No delivery target configured");
        }
        Ok(target)
    }
}
