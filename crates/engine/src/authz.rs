//! Authorization guard.
//!
//! A pure decision function over the acting user, the operation and the
//! target context. Every service consults it before touching the store.

use herald_common::error::AppError;
use herald_common::types::{GLOBAL_CONTEXT, Role};

/// Identity of the caller, passed explicitly through every service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub user_id: String,
    pub email: Option<String>,
    pub role: Role,
}

impl RequestContext {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
            role,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Create,
    Update,
    Delete,
    /// Enumerate every record of a collection.
    ListAll,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Operation::Read => "read",
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::ListAll => "list",
        };
        f.write_str(name)
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    GlobalContextReserved,
    ForeignContext(String),
    AdminOnly(Operation),
}

impl std::fmt::Display for Denial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Denial::GlobalContextReserved => {
                write!(f, "The global context is only accessible to super admins")
            }
            Denial::ForeignContext(context) => {
                write!(f, "Cannot access context '{context}' of another user")
            }
            Denial::AdminOnly(op) => write!(f, "Only super admins can {op} all records"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Carries the resolved target context.
    Allow(String),
    Deny(Denial),
}

impl Decision {
    /// Map a denial to a 403.
    pub fn into_result(self) -> Result<String, AppError> {
        match self {
            Decision::Allow(context) => Ok(context),
            Decision::Deny(denial) => Err(AppError::Forbidden(denial.to_string())),
        }
    }
}

/// Decide whether `actor` may perform `operation` on `target`.
///
/// An empty target means the actor's own context, for admins too.
pub fn authorize(actor: &RequestContext, operation: Operation, target: &str) -> Decision {
    if operation == Operation::ListAll {
        return if actor.is_admin() {
            Decision::Allow(String::new())
        } else {
            Decision::Deny(Denial::AdminOnly(operation))
        };
    }

    let context = if target.is_empty() {
        actor.user_id.as_str()
    } else {
        target
    };

    if actor.is_admin() || context == actor.user_id {
        return Decision::Allow(context.to_string());
    }

    if context == GLOBAL_CONTEXT {
        Decision::Deny(Denial::GlobalContextReserved)
    } else {
        Decision::Deny(Denial::ForeignContext(context.to_string()))
    }
}

/// [`authorize`] mapped to `Result`.
pub fn require(
    actor: &RequestContext,
    operation: Operation,
    target: &str,
) -> Result<String, AppError> {
    authorize(actor, operation, target).into_result()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> RequestContext {
        RequestContext::new(id, Role::User)
    }

    fn admin(id: &str) -> RequestContext {
        RequestContext::new(id, Role::SuperAdmin)
    }

    #[test]
    fn test_user_own_context_allowed() {
        let actor = user("u1");
        for op in [
            Operation::Read,
            Operation::Create,
            Operation::Update,
            Operation::Delete,
        ] {
            assert_eq!(authorize(&actor, op, "u1"), Decision::Allow("u1".into()));
            assert_eq!(authorize(&actor, op, ""), Decision::Allow("u1".into()));
        }
    }

    #[test]
    fn test_user_global_and_foreign_denied() {
        let actor = user("u1");
        for op in [
            Operation::Read,
            Operation::Create,
            Operation::Update,
            Operation::Delete,
        ] {
            assert_eq!(
                authorize(&actor, op, "*"),
                Decision::Deny(Denial::GlobalContextReserved)
            );
            assert_eq!(
                authorize(&actor, op, "u2"),
                Decision::Deny(Denial::ForeignContext("u2".into()))
            );
        }
    }

    #[test]
    fn test_admin_any_context() {
        let actor = admin("root");
        assert_eq!(
            authorize(&actor, Operation::Update, "*"),
            Decision::Allow("*".into())
        );
        assert_eq!(
            authorize(&actor, Operation::Delete, "u2"),
            Decision::Allow("u2".into())
        );
        assert_eq!(
            authorize(&actor, Operation::Read, ""),
            Decision::Allow("root".into())
        );
    }

    #[test]
    fn test_listing_is_admin_only() {
        assert!(matches!(
            authorize(&admin("root"), Operation::ListAll, ""),
            Decision::Allow(_)
        ));
        assert_eq!(
            authorize(&user("u1"), Operation::ListAll, ""),
            Decision::Deny(Denial::AdminOnly(Operation::ListAll))
        );
    }

    #[test]
    fn test_denial_maps_to_forbidden() {
        let err = require(&user("u1"), Operation::Read, "*").unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
