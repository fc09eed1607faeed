//! Kerberos principals of a user or host account.
//!
//! All mappings go out in one `editUser` call; the hub applies them as a
//! batch.

use std::collections::BTreeSet;

use super::collection::CollectionPlan;
use super::{mutate, ReconciliationResult};
use crate::diff::TaskDiff;
use crate::error::Result;
use crate::session::{KojiSession, SessionExt, UserInfo};

/// Converge the principals of `user` to `desired`.
pub fn ensure_krb_principals(
    session: &dyn KojiSession,
    user: &UserInfo,
    desired: &[String],
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let current: BTreeSet<String> = user.krb_principals.iter().cloned().collect();
    let wanted: BTreeSet<String> = desired.iter().cloned().collect();
    let plan = CollectionPlan::from_sets(&current, &wanted);

    let mut result = ReconciliationResult::new();
    if plan.is_empty() {
        return Ok(result);
    }

    let mut mappings = Vec::new();
    for (principal, ()) in &plan.to_remove {
        result.change(format!("remove {principal} krb principal"));
        mappings.push((Some(principal.clone()), None));
    }
    for (principal, ()) in &plan.to_add {
        result.change(format!("add {principal} krb principal"));
        mappings.push((None, Some(principal.clone())));
    }

    let action = format!("edit krb principals of {}", user.name);
    mutate(session, dry_run, &action, |s| {
        s.edit_user_principals(user.id, &mappings)
    })?;

    result.diff = Some(TaskDiff::section(
        "krb_principals",
        serde_json::json!(current),
        serde_json::json!(wanted),
    ));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryHub;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_principals_add_and_remove_in_one_call() {
        let hub = MemoryHub::new();
        hub.seed_user("alice").unwrap();
        hub.seed_principal("alice", "alice@OLD.EXAMPLE.COM").unwrap();
        hub.clear_calls();

        let user = hub.user("alice").unwrap();
        let desired = vec!["alice@EXAMPLE.COM".to_string()];
        let result = ensure_krb_principals(&hub, &user, &desired, false).unwrap();
        assert_eq!(
            result.messages,
            vec![
                "remove alice@OLD.EXAMPLE.COM krb principal",
                "add alice@EXAMPLE.COM krb principal",
            ]
        );
        assert_eq!(hub.mutating_methods(), vec!["editUser"]);
        assert_eq!(
            hub.user("alice").unwrap().krb_principals,
            vec!["alice@EXAMPLE.COM"]
        );

        let user = hub.user("alice").unwrap();
        assert!(!ensure_krb_principals(&hub, &user, &desired, false).unwrap().changed);
    }

    #[test]
    fn test_dry_run_sends_nothing() {
        let hub = MemoryHub::new();
        hub.seed_user("bob").unwrap();
        hub.clear_calls();
        let user = hub.user("bob").unwrap();
        let result =
            ensure_krb_principals(&hub, &user, &["bob@EXAMPLE.COM".to_string()], true).unwrap();
        assert!(result.changed);
        assert!(hub.mutating_calls().is_empty());
    }
}
