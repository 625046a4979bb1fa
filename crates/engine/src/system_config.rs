//! System config service: CRUD for per-context channel settings.

use chrono::Utc;
use serde::Deserialize;

use herald_common::error::AppError;
use herald_common::types::{ChannelSettings, SystemConfigRecord};
use herald_store::{Page, PageRequest, Store};

use crate::authz::{self, Operation, RequestContext};
use crate::merge::{self, MergeStrategy};

pub struct SystemConfigService;

/// Body of a create or update call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfigPayload {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub config: Option<ChannelSettings>,
    #[serde(default)]
    pub description: Option<String>,
}

impl SystemConfigService {
    pub async fn create(
        store: &Store,
        actor: &RequestContext,
        payload: SystemConfigPayload,
    ) -> Result<SystemConfigRecord, AppError> {
        let context = authz::require(actor, Operation::Create, &payload.context)?;

        let config = payload
            .config
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AppError::Validation("Config is required".to_string()))?;
        merge::check_config_permissions(actor, &context, &config)?;

        let now = Utc::now();
        let record = SystemConfigRecord {
            context: context.clone(),
            config,
            description: payload.description.filter(|d| !d.is_empty()),
            created_at: now,
            updated_at: now,
        };

        if !store.create_config(&record).await? {
            return Err(AppError::Conflict(format!(
                "System config already exists for context '{context}'"
            )));
        }

        tracing::info!(context = %context, actor = %actor.user_id, "System config created");
        Ok(record)
    }

    /// Apply an update. User contexts merge field by field; an admin update
    /// of the global context replaces the whole config object.
    pub async fn update(
        store: &Store,
        actor: &RequestContext,
        payload: SystemConfigPayload,
    ) -> Result<SystemConfigRecord, AppError> {
        let context = authz::require(actor, Operation::Update, &payload.context)?;

        let config = payload.config.filter(|c| !c.is_empty());
        let description = payload.description.filter(|d| !d.is_empty());
        if config.is_none() && description.is_none() {
            return Err(AppError::Validation(
                "At least one field must be provided for update, config or description"
                    .to_string(),
            ));
        }
        if let Some(config) = &config {
            merge::check_config_permissions(actor, &context, config)?;
        }

        let existing = Self::get(store, actor, &context).await?;
        let strategy = MergeStrategy::select(&context, actor.role);

        let merged = match config {
            Some(update) => merge::merge_config(strategy, &existing.config, update),
            None => existing.config.clone(),
        };
        let record = SystemConfigRecord {
            config: merged,
            description: description.or(existing.description),
            updated_at: Utc::now(),
            ..existing
        };

        if !store.replace_config(&record).await? {
            return Err(AppError::NotFound(format!(
                "System config for context '{context}' not found"
            )));
        }

        tracing::info!(context = %context, ?strategy, "System config updated");
        Ok(record)
    }

    pub async fn get(
        store: &Store,
        actor: &RequestContext,
        context: &str,
    ) -> Result<SystemConfigRecord, AppError> {
        let context = authz::require(actor, Operation::Read, context)?;
        store.get_config(&context).await?.ok_or_else(|| {
            AppError::NotFound(format!("System config for context '{context}' not found"))
        })
    }

    pub async fn delete(
        store: &Store,
        actor: &RequestContext,
        context: &str,
    ) -> Result<(), AppError> {
        let context = authz::require(actor, Operation::Delete, context)?;
        if !store.delete_config(&context).await? {
            return Err(AppError::NotFound(format!(
                "System config for context '{context}' not found"
            )));
        }
        tracing::info!(context = %context, "System config deleted");
        Ok(())
    }

    /// Every config record. Admin only.
    pub async fn list(
        store: &Store,
        actor: &RequestContext,
        page: &PageRequest,
    ) -> Result<Page<SystemConfigRecord>, AppError> {
        authz::require(actor, Operation::ListAll, "")?;
        store.list_configs(page).await
    }
}
