//! Preference service: CRUD for per-context notification preferences.

use chrono::Utc;
use serde::Deserialize;

use herald_common::error::AppError;
use herald_common::types::PreferenceRecord;
use herald_store::{Page, PageRequest, Store};

use crate::authz::{self, Operation, RequestContext};
use crate::merge::{self, MergeStrategy, PreferencesInput};

/// Service layer for preference records.
pub struct PreferenceService;

/// Body of a create or update call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferencesPayload {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub preferences: Option<PreferencesInput>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl PreferenceService {
    /// Create the preferences of a context. Fails with a conflict when the
    /// context already has a record.
    pub async fn create(
        store: &Store,
        actor: &RequestContext,
        payload: PreferencesPayload,
    ) -> Result<PreferenceRecord, AppError> {
        let context = authz::require(actor, Operation::Create, &payload.context)?;

        let input = payload
            .preferences
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Validation("Preferences are required".to_string()))?;
        let patch = merge::validate_preferences(input)?;

        let now = Utc::now();
        let record = PreferenceRecord {
            context: context.clone(),
            preferences: merge::new_preferences(patch),
            timezone: non_empty(payload.timezone),
            language: non_empty(payload.language),
            created_at: now,
            updated_at: now,
        };

        if !store.create_preferences(&record).await? {
            return Err(AppError::Conflict(format!(
                "Preferences already exist for context '{context}'"
            )));
        }

        tracing::info!(context = %context, actor = %actor.user_id, "Preferences created");
        Ok(record)
    }

    /// Update the preferences of a context with the strategy selected for
    /// the actor and context.
    pub async fn update(
        store: &Store,
        actor: &RequestContext,
        payload: PreferencesPayload,
    ) -> Result<PreferenceRecord, AppError> {
        let context = authz::require(actor, Operation::Update, &payload.context)?;

        let timezone = non_empty(payload.timezone);
        let language = non_empty(payload.language);
        let input = payload.preferences.filter(|p| !p.is_empty());
        if input.is_none() && timezone.is_none() && language.is_none() {
            return Err(AppError::Validation(
                "At least one field must be provided".to_string(),
            ));
        }
        let patch = input.as_ref().map(merge::validate_preferences).transpose()?;

        let existing = Self::get(store, actor, &context).await?;
        let strategy = MergeStrategy::select(&context, actor.role);

        let preferences = match patch {
            Some(patch) => merge::merge_preferences(strategy, &existing.preferences, patch),
            None => existing.preferences.clone(),
        };
        let record = PreferenceRecord {
            preferences,
            timezone: timezone.or(existing.timezone),
            language: language.or(existing.language),
            updated_at: Utc::now(),
            ..existing
        };

        if !store.replace_preferences(&record).await? {
            return Err(AppError::NotFound(format!(
                "Preferences for context '{context}' not found"
            )));
        }

        tracing::info!(context = %context, ?strategy, "Preferences updated");
        Ok(record)
    }

    pub async fn get(
        store: &Store,
        actor: &RequestContext,
        context: &str,
    ) -> Result<PreferenceRecord, AppError> {
        let context = authz::require(actor, Operation::Read, context)?;
        store
            .get_preferences(&context)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Preferences for context '{context}' not found")))
    }

    pub async fn delete(
        store: &Store,
        actor: &RequestContext,
        context: &str,
    ) -> Result<(), AppError> {
        let context = authz::require(actor, Operation::Delete, context)?;
        if !store.delete_preferences(&context).await? {
            return Err(AppError::NotFound(format!(
                "Preferences for context '{context}' not found"
            )));
        }
        tracing::info!(context = %context, "Preferences deleted");
        Ok(())
    }

    /// Every preference record. Admin only.
    pub async fn list(
        store: &Store,
        actor: &RequestContext,
        page: &PageRequest,
    ) -> Result<Page<PreferenceRecord>, AppError> {
        authz::require(actor, Operation::ListAll, "")?;
        store.list_preferences(page).await
    }
}
