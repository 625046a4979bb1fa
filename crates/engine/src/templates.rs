//! Template service: CRUD for notification templates.
//!
//! A template is keyed by `(context, type#channel)`. Its placeholders must
//! belong to the fixed variable set of its notification type, and email
//! templates must be a JSON object with `subject` and `body`.

use chrono::Utc;
use serde::Deserialize;

use herald_common::error::AppError;
use herald_common::types::{Channel, NotificationType, Template, TypeChannel};
use herald_store::{Page, PageRequest, Store};

use crate::authz::{self, Operation, RequestContext};
use crate::resolver::{self, EmailContent};

pub struct TemplateService;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTemplatePayload {
    #[serde(default)]
    pub context: String,
    #[serde(rename = "type", default)]
    pub notification_type: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTemplatePayload {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl TemplateService {
    pub async fn create(
        store: &Store,
        actor: &RequestContext,
        payload: CreateTemplatePayload,
    ) -> Result<Template, AppError> {
        let context = authz::require(actor, Operation::Create, &payload.context)?;

        let notification_type: NotificationType = payload
            .notification_type
            .parse()
            .map_err(|_| AppError::Validation("Valid notification type is required".to_string()))?;
        let channel: Channel = payload
            .channel
            .parse()
            .map_err(|_| AppError::Validation("Valid channel is required".to_string()))?;
        let type_channel = TypeChannel::new(notification_type, channel);

        if payload.content.is_empty() {
            return Err(AppError::Validation(
                "Template content is required".to_string(),
            ));
        }
        validate_content(type_channel, &payload.content)?;

        let now = Utc::now();
        let template = Template {
            context: context.clone(),
            type_channel,
            content: payload.content,
            created_at: now,
            updated_at: now,
        };

        if !store.create_template(&template).await? {
            return Err(AppError::Conflict(format!(
                "Template {type_channel} already exists for context '{context}'"
            )));
        }

        tracing::info!(context = %context, template = %type_channel, "Template created");
        Ok(template)
    }

    pub async fn get(
        store: &Store,
        actor: &RequestContext,
        context: &str,
        template_id: &str,
    ) -> Result<Template, AppError> {
        let context = authz::require(actor, Operation::Read, context)?;
        let type_channel: TypeChannel = template_id.parse()?;
        store
            .get_template(&context, type_channel)
            .await?
            .ok_or_else(|| not_found(&context, type_channel))
    }

    /// Templates of one context.
    pub async fn list(
        store: &Store,
        actor: &RequestContext,
        context: &str,
        page: &PageRequest,
    ) -> Result<Page<Template>, AppError> {
        let context = authz::require(actor, Operation::Read, context)?;
        store.list_templates(&context, page).await
    }

    /// Replace the content of an existing template.
    pub async fn update(
        store: &Store,
        actor: &RequestContext,
        template_id: &str,
        payload: UpdateTemplatePayload,
    ) -> Result<Template, AppError> {
        let context = authz::require(actor, Operation::Update, &payload.context)?;
        let type_channel: TypeChannel = template_id.parse()?;

        let content = payload
            .content
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::Validation("At least one field must be provided".to_string()))?;
        validate_content(type_channel, &content)?;

        let existing = store
            .get_template(&context, type_channel)
            .await?
            .ok_or_else(|| not_found(&context, type_channel))?;
        let template = Template {
            content,
            updated_at: Utc::now(),
            ..existing
        };

        if !store.replace_template(&template).await? {
            return Err(not_found(&context, type_channel));
        }

        tracing::info!(context = %context, template = %type_channel, "Template updated");
        Ok(template)
    }

    pub async fn delete(
        store: &Store,
        actor: &RequestContext,
        context: &str,
        template_id: &str,
    ) -> Result<(), AppError> {
        let context = authz::require(actor, Operation::Delete, context)?;
        let type_channel: TypeChannel = template_id.parse()?;
        if !store.delete_template(&context, type_channel).await? {
            return Err(not_found(&context, type_channel));
        }
        tracing::info!(context = %context, template = %type_channel, "Template deleted");
        Ok(())
    }
}

fn not_found(context: &str, type_channel: TypeChannel) -> AppError {
    AppError::NotFound(format!(
        "Template {type_channel} not found for context '{context}'"
    ))
}

/// Check placeholders against the variable set of the type, and the shape of
/// email content.
pub fn validate_content(type_channel: TypeChannel, content: &str) -> Result<(), AppError> {
    let allowed = type_channel.notification_type.allowed_variables();
    let invalid: Vec<&str> = resolver::placeholders(content)
        .into_iter()
        .filter(|name| !allowed.contains(name))
        .collect();
    if !invalid.is_empty() {
        return Err(AppError::Validation(format!(
            "Invalid variables for type {}: {}",
            type_channel.notification_type,
            invalid.join(", ")
        )));
    }

    if type_channel.channel == Channel::Email
        && serde_json::from_str::<EmailContent>(content).is_err()
    {
        return Err(AppError::Validation(
            "Email template content must be a JSON object with 'subject' and 'body'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_content_checks_variable_set() {
        let alert_slack = TypeChannel::new(NotificationType::Alert, Channel::Slack);
        assert!(validate_content(alert_slack, "{{serverName}} is {{status}}").is_ok());

        let err = validate_content(alert_slack, "{{title}} {{serverName}}").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: Invalid variables for type alert: title"
        );
    }

    #[test]
    fn test_validate_content_requires_email_shape() {
        let report_email = TypeChannel::new(NotificationType::Report, Channel::Email);
        assert!(
            validate_content(
                report_email,
                r#"{"subject":"{{reportType}}","body":"{{data}}"}"#
            )
            .is_ok()
        );
        assert!(validate_content(report_email, "{{reportType}}").is_err());
        assert!(validate_content(report_email, r#"{"subject":"x"}"#).is_err());
    }
}
