//! Scheduled notifications.
//!
//! Each schedule owns a cron trigger held by a [`TriggerSource`]. The
//! trigger is armed on create, disarmed on pause, re-armed on resume,
//! rescheduled on update and removed on delete. When a trigger fires for an
//! active schedule, a notification request addressed to the owner is handed
//! to a [`NotificationSink`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{
    NotificationRequest, NotificationType, ScheduleKind, ScheduleSpec, ScheduleStatus,
    ScheduledNotification, Trigger, Variables, deserialize_optional_variables,
    deserialize_variables,
};
use herald_store::{Page, PageRequest, Store};

use crate::authz::{self, Operation, RequestContext};
use crate::cron_expr::CronExpression;

/// Cron trigger source.
#[async_trait]
pub trait TriggerSource: Send + Sync {
    /// Create or re-enable the trigger. Occurrences up to now are skipped.
    async fn arm(&self, schedule_id: &str, expression: &CronExpression) -> Result<(), AppError>;

    /// Stop firing without forgetting the trigger.
    async fn disarm(&self, schedule_id: &str) -> Result<(), AppError>;

    /// Replace the expression, keeping the enabled state.
    async fn reschedule(
        &self,
        schedule_id: &str,
        expression: &CronExpression,
    ) -> Result<(), AppError>;

    async fn remove(&self, schedule_id: &str) -> Result<(), AppError>;
}

/// Entry point of the fan-out pipeline, usually the request queue.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn submit(&self, request: &NotificationRequest) -> Result<(), AppError>;
}

/// Trigger source backed by the trigger collection of the store.
#[derive(Clone)]
pub struct StoreTriggerSource {
    store: Store,
}

impl StoreTriggerSource {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TriggerSource for StoreTriggerSource {
    async fn arm(&self, schedule_id: &str, expression: &CronExpression) -> Result<(), AppError> {
        let last_fired_at = self
            .store
            .get_trigger(schedule_id)
            .await?
            .and_then(|t| t.last_fired_at);
        let trigger = Trigger {
            schedule_id: schedule_id.to_string(),
            expression: expression.to_string(),
            enabled: true,
            armed_at: Utc::now(),
            last_fired_at,
        };
        self.store.put_trigger(&trigger).await?;
        tracing::debug!(schedule_id, expression = %expression, "Trigger armed");
        Ok(())
    }

    async fn disarm(&self, schedule_id: &str) -> Result<(), AppError> {
        let mut trigger = self.store.get_trigger(schedule_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Trigger for schedule {schedule_id} not found"))
        })?;
        trigger.enabled = false;
        self.store.put_trigger(&trigger).await?;
        tracing::debug!(schedule_id, "Trigger disarmed");
        Ok(())
    }

    async fn reschedule(
        &self,
        schedule_id: &str,
        expression: &CronExpression,
    ) -> Result<(), AppError> {
        let mut trigger = self.store.get_trigger(schedule_id).await?.ok_or_else(|| {
            AppError::NotFound(format!("Trigger for schedule {schedule_id} not found"))
        })?;
        trigger.expression = expression.to_string();
        trigger.armed_at = Utc::now();
        self.store.put_trigger(&trigger).await?;
        tracing::debug!(schedule_id, expression = %expression, "Trigger rescheduled");
        Ok(())
    }

    async fn remove(&self, schedule_id: &str) -> Result<(), AppError> {
        self.store.delete_trigger(schedule_id).await?;
        tracing::debug!(schedule_id, "Trigger removed");
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleInput {
    #[serde(default)]
    pub expression: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

impl ScheduleInput {
    fn validate(&self) -> Result<CronExpression, AppError> {
        if let Some(kind) = self.kind.as_deref()
            && kind != "cron"
        {
            return Err(AppError::Validation(
                "Only cron schedule type is supported".to_string(),
            ));
        }
        if self.expression.trim().is_empty() {
            return Err(AppError::Validation(
                "Schedule expression is required".to_string(),
            ));
        }
        CronExpression::parse(&self.expression)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateSchedulePayload {
    #[serde(rename = "type", default)]
    pub notification_type: String,
    #[serde(default, deserialize_with = "deserialize_variables")]
    pub variables: Variables,
    #[serde(default)]
    pub schedule: Option<ScheduleInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateSchedulePayload {
    #[serde(default, deserialize_with = "deserialize_optional_variables")]
    pub variables: Option<Variables>,
    #[serde(default)]
    pub schedule: Option<ScheduleInput>,
}

/// What happened when a trigger fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// A request with this id was submitted.
    Emitted(String),
    /// The schedule is paused.
    Suppressed,
    /// The schedule no longer exists; its trigger was removed.
    Orphaned,
}

#[derive(Clone)]
pub struct ScheduleService {
    store: Store,
    triggers: Arc<dyn TriggerSource>,
}

impl ScheduleService {
    pub fn new(store: Store, triggers: Arc<dyn TriggerSource>) -> Self {
        Self { store, triggers }
    }

    /// Create an active schedule owned by the actor.
    pub async fn create(
        &self,
        actor: &RequestContext,
        payload: CreateSchedulePayload,
    ) -> Result<ScheduledNotification, AppError> {
        if payload.notification_type.is_empty() {
            return Err(AppError::Validation("Type is required".to_string()));
        }
        let notification_type: NotificationType = payload.notification_type.parse()?;
        let cron = payload
            .schedule
            .as_ref()
            .ok_or_else(|| AppError::Validation("Schedule is required".to_string()))?
            .validate()?;

        let schedule_id = Uuid::new_v4().to_string();
        self.triggers.arm(&schedule_id, &cron).await?;

        let now = Utc::now();
        let schedule = ScheduledNotification {
            schedule_id: schedule_id.clone(),
            user_id: actor.user_id.clone(),
            notification_type,
            variables: payload.variables,
            schedule: ScheduleSpec {
                expression: cron.to_string(),
                kind: ScheduleKind::Cron,
            },
            status: ScheduleStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let persisted = match self.store.create_schedule(&schedule).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::Conflict(format!(
                "Scheduled notification {schedule_id} already exists"
            ))),
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            if let Err(cleanup) = self.triggers.remove(&schedule_id).await {
                tracing::error!(schedule_id = %schedule_id, error = %cleanup, "Failed to remove trigger");
            }
            return Err(e);
        }

        tracing::info!(
            schedule_id = %schedule_id,
            user_id = %actor.user_id,
            expression = %cron,
            "Scheduled notification created"
        );
        Ok(schedule)
    }

    /// Readable by its owner and by admins.
    pub async fn get(
        &self,
        actor: &RequestContext,
        schedule_id: &str,
    ) -> Result<ScheduledNotification, AppError> {
        let schedule = self.load(schedule_id).await?;
        authz::require(actor, Operation::Read, &schedule.user_id)?;
        Ok(schedule)
    }

    /// The actor's own schedules.
    pub async fn list(
        &self,
        actor: &RequestContext,
        page: &PageRequest,
    ) -> Result<Page<ScheduledNotification>, AppError> {
        self.store
            .list_schedules_for_user(&actor.user_id, page)
            .await
    }

    /// Change variables and/or the cron expression. The status is kept.
    pub async fn update(
        &self,
        actor: &RequestContext,
        schedule_id: &str,
        payload: UpdateSchedulePayload,
    ) -> Result<ScheduledNotification, AppError> {
        if payload.variables.is_none() && payload.schedule.is_none() {
            return Err(AppError::Validation(
                "At least one field must be provided".to_string(),
            ));
        }
        let cron = payload
            .schedule
            .as_ref()
            .map(ScheduleInput::validate)
            .transpose()?;

        let mut schedule = self.owned(actor, schedule_id).await?;
        if let Some(cron) = &cron {
            self.triggers.reschedule(schedule_id, cron).await?;
            schedule.schedule.expression = cron.to_string();
        }
        if let Some(variables) = payload.variables {
            schedule.variables = variables;
        }
        schedule.updated_at = Utc::now();

        self.replace(&schedule).await?;
        tracing::info!(schedule_id, status = %schedule.status, "Scheduled notification updated");
        Ok(schedule)
    }

    pub async fn pause(
        &self,
        actor: &RequestContext,
        schedule_id: &str,
    ) -> Result<ScheduledNotification, AppError> {
        let mut schedule = self.owned(actor, schedule_id).await?;
        if schedule.status == ScheduleStatus::Paused {
            return Err(AppError::Conflict(
                "Scheduled notification is already paused".to_string(),
            ));
        }

        // The record goes first, so a concurrently deleted schedule leaves the
        // trigger untouched. A still-armed trigger of a paused record is
        // suppressed on fire.
        schedule.status = ScheduleStatus::Paused;
        schedule.updated_at = Utc::now();
        self.replace(&schedule).await?;
        self.triggers.disarm(schedule_id).await?;

        tracing::info!(schedule_id, "Scheduled notification paused");
        Ok(schedule)
    }

    pub async fn resume(
        &self,
        actor: &RequestContext,
        schedule_id: &str,
    ) -> Result<ScheduledNotification, AppError> {
        let mut schedule = self.owned(actor, schedule_id).await?;
        if schedule.status == ScheduleStatus::Active {
            return Err(AppError::Conflict(
                "Scheduled notification is already active".to_string(),
            ));
        }

        let cron = CronExpression::parse(&schedule.schedule.expression)?;
        schedule.status = ScheduleStatus::Active;
        schedule.updated_at = Utc::now();
        self.replace(&schedule).await?;
        self.triggers.arm(schedule_id, &cron).await?;

        tracing::info!(schedule_id, "Scheduled notification resumed");
        Ok(schedule)
    }

    /// Remove the trigger, then the record. A trigger failure does not stop
    /// the deletion.
    pub async fn delete(&self, actor: &RequestContext, schedule_id: &str) -> Result<(), AppError> {
        self.owned(actor, schedule_id).await?;

        if let Err(e) = self.triggers.remove(schedule_id).await {
            tracing::error!(schedule_id, error = %e, "Failed to remove trigger");
        }
        if !self.store.delete_schedule(schedule_id).await? {
            return Err(not_found(schedule_id));
        }

        tracing::info!(schedule_id, user_id = %actor.user_id, "Scheduled notification deleted");
        Ok(())
    }

    /// Trigger entry point, invoked once per cron occurrence.
    pub async fn fire(
        &self,
        schedule_id: &str,
        occurrence: DateTime<Utc>,
        sink: &dyn NotificationSink,
    ) -> Result<FireOutcome, AppError> {
        let Some(schedule) = self.store.get_schedule(schedule_id).await? else {
            tracing::warn!(schedule_id, "Trigger fired for a missing schedule");
            self.triggers.remove(schedule_id).await?;
            return Ok(FireOutcome::Orphaned);
        };

        if schedule.status == ScheduleStatus::Paused {
            tracing::debug!(schedule_id, "Trigger fired while paused, suppressed");
            return Ok(FireOutcome::Suppressed);
        }

        let request = NotificationRequest {
            id: request_id(schedule_id, occurrence),
            notification_type: schedule.notification_type,
            recipients: vec![schedule.user_id],
            variables: schedule.variables,
        };
        sink.submit(&request).await?;

        tracing::info!(schedule_id, request_id = %request.id, "Scheduled notification emitted");
        Ok(FireOutcome::Emitted(request.id))
    }

    async fn load(&self, schedule_id: &str) -> Result<ScheduledNotification, AppError> {
        self.store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| not_found(schedule_id))
    }

    /// Mutations are owner-only, admins included.
    async fn owned(
        &self,
        actor: &RequestContext,
        schedule_id: &str,
    ) -> Result<ScheduledNotification, AppError> {
        let schedule = self.load(schedule_id).await?;
        if schedule.user_id != actor.user_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }
        Ok(schedule)
    }

    async fn replace(&self, schedule: &ScheduledNotification) -> Result<(), AppError> {
        if !self.store.replace_schedule(schedule).await? {
            return Err(not_found(&schedule.schedule_id));
        }
        Ok(())
    }
}

/// Request id of one occurrence, stable across duplicate ticks.
pub fn request_id(schedule_id: &str, occurrence: DateTime<Utc>) -> String {
    format!("{schedule_id}-{}", occurrence.format("%Y%m%d%H%M"))
}

fn not_found(schedule_id: &str) -> AppError {
    AppError::NotFound(format!("Scheduled notification {schedule_id} not found"))
}
