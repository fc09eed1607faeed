//! Koji user module - accounts, permissions and principals

use std::collections::BTreeSet;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::diff::{task_diff_data, TaskDiff};
use crate::error::{Error, Result};
use crate::reconcile::collection::{CollectionOps, CollectionPlan};
use crate::reconcile::principals::ensure_krb_principals;
use crate::reconcile::{de, mutate, ReconciliationResult};
use crate::session::{
    KojiSession, SessionExt, UserInfo, USER_STATUS_BLOCKED, USER_STATUS_NORMAL,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Desired state for a user account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UserState {
    #[default]
    Enabled,
    Disabled,
}

impl UserState {
    fn status(self) -> i64 {
        match self {
            UserState::Enabled => USER_STATUS_NORMAL,
            UserState::Disabled => USER_STATUS_BLOCKED,
        }
    }

    fn of(status: i64) -> Self {
        if status == USER_STATUS_NORMAL {
            UserState::Enabled
        } else {
            UserState::Disabled
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            UserState::Enabled => "enabled",
            UserState::Disabled => "disabled",
        }
    }
}

/// Parameters of the `koji_user` module.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserParams {
    pub name: String,
    /// `None` leaves permissions alone; a list is applied exactly
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub permissions: Option<Vec<String>>,
    /// Only used when the account is created
    #[serde(default)]
    pub krb_principal: Option<String>,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub krb_principals: Option<Vec<String>>,
    #[serde(default)]
    pub state: UserState,
    #[serde(default)]
    pub koji: Option<String>,
}

#[derive(Debug, Serialize)]
struct UserSettings {
    state: UserState,
}

struct PermissionOps<'a> {
    user: &'a str,
}

impl CollectionOps<String, ()> for PermissionOps<'_> {
    fn add_message(&self, perm: &String, _: &()) -> String {
        format!("grant {perm}")
    }

    fn remove_message(&self, perm: &String, _: &()) -> String {
        format!("revoke {perm}")
    }

    fn add(&self, session: &dyn KojiSession, perm: &String, _: &()) -> Result<()> {
        session.grant_permission(self.user, perm, true)
    }

    fn remove(&self, session: &dyn KojiSession, perm: &String, _: &()) -> Result<()> {
        session.revoke_permission(self.user, perm)
    }
}

fn ensure_permissions(
    session: &dyn KojiSession,
    user: &UserInfo,
    exists: bool,
    desired: &[String],
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let current: BTreeSet<String> = if exists {
        session.get_user_perms(user.id)?.into_iter().collect()
    } else {
        BTreeSet::new()
    };
    let wanted: BTreeSet<String> = desired.iter().cloned().collect();
    let plan = CollectionPlan::from_sets(&current, &wanted);
    let mut result = plan.apply(session, &PermissionOps { user: &user.name }, dry_run)?;
    if result.changed {
        result.diff = Some(TaskDiff::section(
            "permissions",
            serde_json::json!(current),
            serde_json::json!(wanted),
        ));
    }
    Ok(result)
}

/// Converge a user account.
pub fn ensure_user(
    session: &dyn KojiSession,
    params: &UserParams,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let name = params.name.as_str();
    let desired = params.state;
    let mut result = ReconciliationResult::new();

    let (user, exists) = match session.get_user(name)? {
        Some(user) => {
            let current = UserState::of(user.status);
            if current != desired {
                let action = format!("{} user {name}", desired.as_str());
                mutate(session, dry_run, &action, |s| match desired {
                    UserState::Enabled => s.enable_user(name),
                    UserState::Disabled => s.disable_user(name),
                })?;
                result.change(format!("{} {name} user", desired.as_str()));
                result.diff = Some(task_diff_data(
                    Some(&UserSettings { state: current }),
                    Some(&UserSettings { state: desired }),
                    name,
                    "user",
                )?);
            }
            (user, true)
        }
        None => {
            result.diff = Some(task_diff_data(
                None::<&UserSettings>,
                Some(&UserSettings { state: desired }),
                name,
                "user",
            )?);
            let mut created = None;
            mutate(session, dry_run, &format!("create user {name}"), |s| {
                let id = s.create_user(name, desired.status(), params.krb_principal.as_deref())?;
                created = s.get_user(id)?;
                Ok(())
            })?;
            result.change(format!("created {name} user"));
            match created {
                Some(user) => (user, true),
                None if dry_run => {
                    warn!(user = %name, "User not found, previewing against the new account");
                    let user = UserInfo {
                        id: 0,
                        name: name.to_string(),
                        status: desired.status(),
                        usertype: 0,
                        krb_principals: params.krb_principal.iter().cloned().collect(),
                    };
                    (user, false)
                }
                None => return Err(Error::not_found("user", name)),
            }
        }
    };

    if let Some(perms) = &params.permissions {
        let sub = ensure_permissions(session, &user, exists, perms, dry_run)?;
        result.absorb("user", name, sub);
    }
    if let Some(principals) = &params.krb_principals {
        let sub = ensure_krb_principals(session, &user, principals, dry_run)?;
        result.absorb("user", name, sub);
    }
    Ok(result)
}

/// Module for user accounts
pub struct KojiUserModule;

impl Module for KojiUserModule {
    fn name(&self) -> &'static str {
        "koji_user"
    }

    fn description(&self) -> &'static str {
        "Create, enable or disable a user and manage its permissions"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let _: UserParams = params.parse()?;
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let parsed: UserParams = params.parse()?;
        let session = context.session_for(parsed.koji.as_deref())?;
        let result = ensure_user(session.as_ref(), &parsed, context.check_mode)?;
        let msg = if result.changed {
            format!("User '{}' changed", parsed.name)
        } else {
            format!("User '{}' already in desired state", parsed.name)
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryHub;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params(value: serde_json::Value) -> UserParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_with_permissions() {
        let hub = MemoryHub::new();
        let p = params(json!({"name": "kdreyer", "permissions": ["admin", "repo"]}));

        let preview = ensure_user(&hub, &p, true).unwrap();
        assert!(hub.mutating_calls().is_empty());

        let result = ensure_user(&hub, &p, false).unwrap();
        assert_eq!(
            result.messages,
            vec!["created kdreyer user", "grant admin", "grant repo"]
        );
        assert_eq!(preview.messages, result.messages);
        assert_eq!(preview.diff, result.diff);
        assert_eq!(hub.user_perms("kdreyer"), vec!["admin", "repo"]);
        assert!(!ensure_user(&hub, &p, false).unwrap().changed);
    }

    #[test]
    fn test_disable_does_not_mutate_in_check_mode() {
        let hub = MemoryHub::new();
        hub.seed_user("alice").unwrap();
        let p = params(json!({"name": "alice", "state": "disabled"}));

        let preview = ensure_user(&hub, &p, true).unwrap();
        assert_eq!(preview.messages, vec!["disabled alice user"]);
        assert!(hub.mutating_calls().is_empty());
        assert_eq!(hub.user("alice").unwrap().status, USER_STATUS_NORMAL);

        ensure_user(&hub, &p, false).unwrap();
        assert_eq!(hub.user("alice").unwrap().status, USER_STATUS_BLOCKED);
    }

    #[test]
    fn test_revoke_unlisted_permissions() {
        let hub = MemoryHub::new();
        hub.seed_user("bob").unwrap();
        hub.seed_perm("admin").unwrap();
        hub.seed_perm("build").unwrap();
        hub.seed_user_perm("bob", "admin").unwrap();
        hub.seed_user_perm("bob", "build").unwrap();

        let p = params(json!({"name": "bob", "permissions": ["build"]}));
        let result = ensure_user(&hub, &p, false).unwrap();
        assert_eq!(result.messages, vec!["revoke admin"]);
        assert_eq!(hub.user_perms("bob"), vec!["build"]);

        let untouched = params(json!({"name": "bob"}));
        assert!(!ensure_user(&hub, &untouched, false).unwrap().changed);
    }
}
