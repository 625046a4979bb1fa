//! User service. Users are read-only over the API; records are created at
//! account provisioning.

use chrono::Utc;

use herald_common::error::AppError;
use herald_common::types::{Role, User};
use herald_store::{Page, PageRequest, Store};

use crate::authz::{self, Operation, RequestContext};

pub struct UserService;

impl UserService {
    /// Every user. Admin only.
    pub async fn list(
        store: &Store,
        actor: &RequestContext,
        page: &PageRequest,
    ) -> Result<Page<User>, AppError> {
        authz::require(actor, Operation::ListAll, "")?;
        store.list_users(page).await
    }

    /// A user's own record, or any record for an admin.
    pub async fn get(
        store: &Store,
        actor: &RequestContext,
        user_id: &str,
    ) -> Result<User, AppError> {
        let user_id = authz::require(actor, Operation::Read, user_id)?;
        store
            .get_user(&user_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("User {user_id} not found")))
    }

    /// Create the record of a newly provisioned account.
    pub async fn provision(
        store: &Store,
        user_id: &str,
        email: &str,
        role: Role,
    ) -> Result<User, AppError> {
        if user_id.is_empty() || email.is_empty() {
            return Err(AppError::Validation(
                "User id and email are required".to_string(),
            ));
        }

        let now = Utc::now();
        let user = User {
            user_id: user_id.to_string(),
            email: email.to_string(),
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        if !store.create_user(&user).await? {
            return Err(AppError::Conflict(format!("User {user_id} already exists")));
        }

        tracing::info!(user_id, %role, "User provisioned");
        Ok(user)
    }
}
