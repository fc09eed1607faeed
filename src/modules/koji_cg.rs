//! Koji content generator module
//!
//! Grants or revokes a user's access to a content generator. Hubs without
//! `listCGs` give no way to read the current grants, so a grant is judged by
//! the conflict it raises and a revoke is always reported as a change.

use super::{
    parse_state, Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};
use crate::error::Result;
use crate::reconcile::{mutate, ReconciliationResult};
use crate::session::{KojiSession, SessionExt};
use tracing::{debug, warn};

const ALREADY_GRANTED: &str = "User already has access to content generator";

/// Current access of `user` to `cg`, or `None` when the hub cannot say.
fn has_access(session: &dyn KojiSession, user: &str, cg: &str) -> Result<Option<bool>> {
    match session.list_cgs() {
        Ok(cgs) => Ok(Some(
            cgs.get(cg).is_some_and(|c| c.users.iter().any(|u| u == user)),
        )),
        Err(e) if e.is_unknown_method() => {
            warn!("Hub has no listCGs, falling back to blind grant and revoke");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Ensure `user` may import builds through content generator `cg`.
pub fn grant_cg_access(
    session: &dyn KojiSession,
    user: &str,
    cg: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    let known = has_access(session, user, cg)?;
    if known == Some(true) {
        return Ok(result);
    }
    let action = format!("grant {user} access to {cg}");
    match mutate(session, dry_run, &action, |s| s.grant_cg_access(user, cg, true)) {
        Ok(()) => result.change(action),
        Err(e) if known.is_none() && e.is_conflict(ALREADY_GRANTED) => {
            debug!(user = %user, cg = %cg, "Access already granted");
        }
        Err(e) => return Err(e),
    }
    Ok(result)
}

/// Ensure `user` may not use content generator `cg`.
pub fn revoke_cg_access(
    session: &dyn KojiSession,
    user: &str,
    cg: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    if has_access(session, user, cg)? == Some(false) {
        return Ok(result);
    }
    let action = format!("revoke {user} access to {cg}");
    mutate(session, dry_run, &action, |s| s.revoke_cg_access(user, cg))?;
    result.change(action);
    Ok(result)
}

/// Module for content generator access
pub struct KojiCgModule;

impl Module for KojiCgModule {
    fn name(&self) -> &'static str {
        "koji_cg"
    }

    fn description(&self) -> &'static str {
        "Grant or revoke content generator access"
    }

    fn required_params(&self) -> &[&'static str] {
        &["name", "user", "state"]
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        parse_state(params, &["present", "absent"], "present").map(|_| ())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let name = params.get_string_required("name")?;
        let user = params.get_string_required("user")?;
        let state = parse_state(params, &["present", "absent"], "present")?;
        let session = context.session(params)?;

        let result = if state == "present" {
            grant_cg_access(session.as_ref(), &user, &name, context.check_mode)?
        } else {
            revoke_cg_access(session.as_ref(), &user, &name, context.check_mode)?
        };
        let msg = if result.changed {
            format!("Access of '{}' to '{}' changed", user, name)
        } else {
            format!("Access of '{}' to '{}' already in desired state", user, name)
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}
