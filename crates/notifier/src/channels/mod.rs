//! Channel senders and the dispatcher that routes deliveries to them.

pub mod email;
pub mod in_app;
pub mod slack;

use async_trait::async_trait;

use herald_common::types::Channel;
use herald_engine::processor::{ChannelDispatcher, Delivery, DeliveryTarget, DispatchError};

use self::email::EmailSender;
use self::in_app::InAppPublisher;
use self::slack::SlackSender;

/// Routes a delivery to the sender of its target. Unconfigured senders fail
/// the delivery; a delivery without a target is not sent.
#[derive(Clone, Default)]
pub struct ChannelRouter {
    email: Option<EmailSender>,
    slack: Option<SlackSender>,
    in_app: Option<InAppPublisher>,
}

impl ChannelRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_email(mut self, sender: EmailSender) -> Self {
        self.email = Some(sender);
        self
    }

    pub fn with_slack(mut self, sender: SlackSender) -> Self {
        self.slack = Some(sender);
        self
    }

    pub fn with_in_app(mut self, publisher: InAppPublisher) -> Self {
        self.in_app = Some(publisher);
        self
    }
}

#[async_trait]
impl ChannelDispatcher for ChannelRouter {
    async fn dispatch(&self, delivery: &Delivery) -> Result<(), DispatchError> {
        let Some(target) = &delivery.target else {
            tracing::warn!(
                delivery = %delivery.key,
                "No delivery target configured, content recorded without sending"
            );
            return Ok(());
        };

        match target {
            DeliveryTarget::Email { to, from, reply_to } => {
                let sender = self
                    .email
                    .as_ref()
                    .ok_or(DispatchError::NotConfigured(Channel::Email))?;
                sender
                    .send(to, from.as_deref(), reply_to.as_deref(), &delivery.content)
                    .await
            }
            DeliveryTarget::Slack { webhook_url } => {
                let sender = self
                    .slack
                    .as_ref()
                    .ok_or(DispatchError::NotConfigured(Channel::Slack))?;
                sender.send(webhook_url, &delivery.content).await
            }
            DeliveryTarget::InApp { platform_app_ids } => {
                let publisher = self
                    .in_app
                    .as_ref()
                    .ok_or(DispatchError::NotConfigured(Channel::InApp))?;
                publisher
                    .publish(&delivery.key, platform_app_ids, &delivery.content)
                    .await
            }
        }
    }
}
