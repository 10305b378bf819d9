/// Authorization policy
///
/// Every handler routes its access decision through [`can_access`]; nothing
/// else in the crate compares roles or ids to decide permissions.
use crate::error::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(ApiError::Validation(format!("Invalid role: {}", s))),
        }
    }
}

/// The authenticated party making a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

/// The resource an action applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    /// Account owning the resource. `None` for collection-wide actions.
    pub owner_id: Option<i64>,
}

impl Target {
    pub fn account(id: i64) -> Self {
        Self { owner_id: Some(id) }
    }

    pub fn all_accounts() -> Self {
        Self { owner_id: None }
    }
}

/// Actions subject to authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    ReadProfile,
    UpdateProfile,
    SoftDelete,
    UpdateAvatar,
    ReadActivityLog,
    ListAccounts,
    HardDelete,
    Restore,
    ChangeRole,
}

impl Action {
    /// Whether owning the target is enough to perform this action
    pub fn is_self_service(&self) -> bool {
        matches!(
            self,
            Action::ReadProfile
                | Action::UpdateProfile
                | Action::SoftDelete
                | Action::UpdateAvatar
                | Action::ReadActivityLog
        )
    }
}

/// Decide whether `caller` may perform `action` on `target`.
///
/// Admins may do anything. Owners may perform self-service actions on their
/// own account. Everything else is denied.
pub fn can_access(caller: &Caller, target: &Target, action: Action) -> bool {
    if caller.role == Role::Admin {
        return true;
    }

    action.is_self_service() && target.owner_id == Some(caller.id)
}

/// [`can_access`] as a `Result`, for use with `?`
pub fn authorize(caller: &Caller, target: &Target, action: Action) -> ApiResult<()> {
    if can_access(caller, target, action) {
        Ok(())
    } else {
        tracing::warn!(
            caller_id = caller.id,
            role = %caller.role,
            target = ?target.owner_id,
            ?action,
            "Authorization denied"
        );
        Err(ApiError::Forbidden("Access denied".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ACTIONS: [Action; 9] = [
        Action::ReadProfile,
        Action::UpdateProfile,
        Action::SoftDelete,
        Action::UpdateAvatar,
        Action::ReadActivityLog,
        Action::ListAccounts,
        Action::HardDelete,
        Action::Restore,
        Action::ChangeRole,
    ];

    fn user(id: i64) -> Caller {
        Caller { id, role: Role::User }
    }

    fn admin(id: i64) -> Caller {
        Caller { id, role: Role::Admin }
    }

    #[test]
    fn test_admin_dominates_every_action() {
        for action in ALL_ACTIONS {
            assert!(can_access(&admin(1), &Target::account(99), action));
            assert!(can_access(&admin(1), &Target::account(1), action));
            assert!(can_access(&admin(1), &Target::all_accounts(), action));
        }
    }

    #[test]
    fn test_owner_gets_self_service_only() {
        let caller = user(5);
        let own = Target::account(5);

        assert!(can_access(&caller, &own, Action::ReadProfile));
        assert!(can_access(&caller, &own, Action::UpdateProfile));
        assert!(can_access(&caller, &own, Action::SoftDelete));
        assert!(can_access(&caller, &own, Action::UpdateAvatar));
        assert!(can_access(&caller, &own, Action::ReadActivityLog));

        // Ownership never substitutes for admin
        assert!(!can_access(&caller, &own, Action::HardDelete));
        assert!(!can_access(&caller, &own, Action::Restore));
        assert!(!can_access(&caller, &own, Action::ChangeRole));
        assert!(!can_access(&caller, &own, Action::ListAccounts));
    }

    #[test]
    fn test_non_owner_is_denied_everything() {
        for action in ALL_ACTIONS {
            assert!(!can_access(&user(5), &Target::account(6), action));
            assert!(!can_access(&user(5), &Target::all_accounts(), action));
        }
    }

    #[test]
    fn test_decisions_are_repeatable() {
        let callers = [user(1), user(2), admin(3)];
        let targets = [Target::account(1), Target::account(3), Target::all_accounts()];

        for caller in &callers {
            for target in &targets {
                for action in ALL_ACTIONS {
                    let first = can_access(caller, target, action);
                    for _ in 0..3 {
                        assert_eq!(can_access(caller, target, action), first);
                    }
                }
            }
        }
    }

    #[test]
    fn test_authorize_maps_to_forbidden() {
        assert!(authorize(&user(1), &Target::account(1), Action::ReadProfile).is_ok());
        assert!(matches!(
            authorize(&user(1), &Target::account(2), Action::ReadProfile),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("USER".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::User);
    }
}
