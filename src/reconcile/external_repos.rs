//! External repo bindings of a tag.
//!
//! A binding is identified by repo name. The hub has no safe in-place edit
//! of a binding's priority, so a binding whose priority (or explicitly
//! requested merge mode) changed is removed and added back. All removals
//! run before any addition to free priority slots, which must stay unique
//! per tag.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::de;
use super::{mutate, ReconciliationResult};
use crate::diff::TaskDiff;
use crate::error::{Error, Result};
use crate::session::{KojiSession, MergeMode, SessionExt, TagExternalRepo};

/// A desired external repo binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalRepoBinding {
    /// External repo name
    pub repo: String,
    #[serde(deserialize_with = "de::int")]
    pub priority: i64,
    /// When absent, an existing binding's merge mode is left as is
    #[serde(default)]
    pub merge_mode: Option<MergeMode>,
}

impl ExternalRepoBinding {
    pub fn new(repo: impl Into<String>, priority: i64) -> Self {
        Self {
            repo: repo.into(),
            priority,
            merge_mode: None,
        }
    }

    #[must_use]
    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = Some(mode);
        self
    }
}

/// Reject duplicate names or priorities among desired bindings.
pub fn validate_bindings(bindings: &[ExternalRepoBinding]) -> Result<()> {
    let mut names = BTreeSet::new();
    let mut priorities = BTreeSet::new();
    for binding in bindings {
        if !names.insert(binding.repo.as_str()) {
            return Err(Error::DuplicateName {
                kind: "external repo",
                name: binding.repo.clone(),
            });
        }
        if !priorities.insert(binding.priority) {
            return Err(Error::DuplicatePriority {
                kind: "external repo",
                priority: binding.priority,
            });
        }
    }
    Ok(())
}

/// Removals and additions needed to converge a tag's bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoPlan {
    pub to_remove: Vec<TagExternalRepo>,
    pub to_add: Vec<ExternalRepoBinding>,
}

impl RepoPlan {
    /// Compare validated `desired` bindings against `current`.
    pub fn compute(desired: &[ExternalRepoBinding], current: &[TagExternalRepo]) -> Self {
        let wanted: BTreeMap<&str, &ExternalRepoBinding> =
            desired.iter().map(|b| (b.repo.as_str(), b)).collect();
        let existing: BTreeMap<&str, &TagExternalRepo> = current
            .iter()
            .map(|r| (r.external_repo_name.as_str(), r))
            .collect();

        let mut plan = Self::default();
        for repo in current {
            let stale = match wanted.get(repo.external_repo_name.as_str()) {
                None => true,
                Some(binding) => {
                    binding.priority != repo.priority
                        || binding
                            .merge_mode
                            .is_some_and(|mode| Some(mode) != repo.merge_mode)
                }
            };
            if stale {
                plan.to_remove.push(repo.clone());
            }
        }
        plan.to_remove.sort_by_key(|r| r.priority);

        for binding in desired {
            match existing.get(binding.repo.as_str()) {
                Some(repo) if !plan.to_remove.contains(repo) => {}
                Some(repo) => {
                    // keep the current merge mode when none was asked for
                    let mut readd = binding.clone();
                    if readd.merge_mode.is_none() {
                        readd.merge_mode = repo.merge_mode;
                    }
                    plan.to_add.push(readd);
                }
                None => plan.to_add.push(binding.clone()),
            }
        }
        plan.to_add.sort_by_key(|b| b.priority);
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

fn describe_current(repos: &[TagExternalRepo]) -> Value {
    let mut repos: Vec<&TagExternalRepo> = repos.iter().collect();
    repos.sort_by_key(|r| r.priority);
    Value::Array(
        repos
            .into_iter()
            .map(|r| {
                json!({
                    "repo": r.external_repo_name,
                    "priority": r.priority,
                    "merge_mode": r.merge_mode,
                })
            })
            .collect(),
    )
}

fn project(current: &[TagExternalRepo], plan: &RepoPlan) -> Vec<TagExternalRepo> {
    let mut projected: Vec<TagExternalRepo> = current
        .iter()
        .filter(|r| !plan.to_remove.contains(r))
        .cloned()
        .collect();
    projected.extend(plan.to_add.iter().map(|b| TagExternalRepo {
        external_repo_id: 0,
        external_repo_name: b.repo.clone(),
        priority: b.priority,
        merge_mode: Some(b.merge_mode.unwrap_or(MergeMode::Koji)),
        url: None,
        tag_id: None,
    }));
    projected
}

/// Converge the external repos of `tag` to `desired`.
///
/// `current` is the tag's bindings as the hub reports them, or empty for a
/// tag that does not exist yet.
pub fn reconcile(
    session: &dyn KojiSession,
    tag: &str,
    desired: &[ExternalRepoBinding],
    current: &[TagExternalRepo],
    dry_run: bool,
) -> Result<ReconciliationResult> {
    validate_bindings(desired)?;
    let plan = RepoPlan::compute(desired, current);
    let mut result = ReconciliationResult::new();
    if plan.is_empty() {
        return Ok(result);
    }

    for repo in &plan.to_remove {
        let message = format!("removed {} repo from {} tag", repo.external_repo_name, tag);
        mutate(session, dry_run, &message, |s| {
            s.remove_external_repo_from_tag(tag, &repo.external_repo_name)
        })?;
        result.change(message);
    }
    for binding in &plan.to_add {
        let message = format!("add {} external repo to {}", binding.repo, tag);
        mutate(session, dry_run, &message, |s| {
            s.add_external_repo_to_tag(tag, &binding.repo, binding.priority, binding.merge_mode)
        })?;
        result.change(message);
    }

    result.diff = Some(TaskDiff::section(
        "external_repos",
        describe_current(current),
        describe_current(&project(current, &plan)),
    ));
    Ok(result)
}

/// Fetch the current bindings of `tag` and converge them to `desired`.
///
/// `exists` is false for a tag that is only being created in a dry run.
pub fn ensure_external_repos(
    session: &dyn KojiSession,
    tag: &str,
    exists: bool,
    desired: &[ExternalRepoBinding],
    dry_run: bool,
) -> Result<ReconciliationResult> {
    validate_bindings(desired)?;
    let current = if exists {
        session.get_tag_external_repos(tag)?
    } else {
        Vec::new()
    };
    reconcile(session, tag, desired, &current, dry_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryHub;
    use pretty_assertions::assert_eq;

    fn hub() -> MemoryHub {
        let hub = MemoryHub::new();
        hub.seed_tag("f40-build").unwrap();
        for repo in ["epel", "cr", "extras"] {
            hub.seed_external_repo(repo, &format!("https://mirror.example.com/{repo}/"))
                .unwrap();
        }
        hub
    }

    fn bindings(hub: &MemoryHub) -> Vec<(String, i64, Option<MergeMode>)> {
        hub.tag_repos("f40-build")
            .into_iter()
            .map(|r| (r.external_repo_name, r.priority, r.merge_mode))
            .collect()
    }

    #[test]
    fn test_duplicate_priority_rejected_before_calls() {
        let hub = hub();
        let desired = vec![ExternalRepoBinding::new("a", 10), ExternalRepoBinding::new("b", 10)];
        let err = ensure_external_repos(&hub, "f40-build", true, &desired, false).unwrap_err();
        assert!(matches!(err, Error::DuplicatePriority { priority: 10, .. }));
        assert!(hub.calls().is_empty());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let desired = vec![ExternalRepoBinding::new("a", 10), ExternalRepoBinding::new("a", 20)];
        assert!(matches!(
            validate_bindings(&desired),
            Err(Error::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_priority_change_removes_then_adds() {
        let hub = hub();
        hub.seed_tag_repo("f40-build", "epel", 10, None).unwrap();
        hub.seed_tag_repo("f40-build", "cr", 20, None).unwrap();

        // move epel into cr's slot and drop cr
        let desired = vec![ExternalRepoBinding::new("epel", 20)];
        let result = ensure_external_repos(&hub, "f40-build", true, &desired, false).unwrap();
        assert_eq!(
            result.messages,
            vec![
                "removed epel repo from f40-build tag",
                "removed cr repo from f40-build tag",
                "add epel external repo to f40-build",
            ]
        );
        assert_eq!(
            hub.mutating_methods(),
            vec![
                "removeExternalRepoFromTag",
                "removeExternalRepoFromTag",
                "addExternalRepoToTag"
            ]
        );
        assert_eq!(
            bindings(&hub),
            vec![("epel".to_string(), 20, Some(MergeMode::Koji))]
        );
    }

    #[test]
    fn test_merge_mode_absent_means_dont_care() {
        let hub = hub();
        hub.seed_tag_repo("f40-build", "epel", 10, Some(MergeMode::Bare))
            .unwrap();

        let desired = vec![ExternalRepoBinding::new("epel", 10)];
        let result = ensure_external_repos(&hub, "f40-build", true, &desired, false).unwrap();
        assert!(!result.changed);

        let desired = vec![ExternalRepoBinding::new("epel", 10).with_merge_mode(MergeMode::Simple)];
        let result = ensure_external_repos(&hub, "f40-build", true, &desired, false).unwrap();
        assert!(result.changed);
        assert_eq!(
            bindings(&hub),
            vec![("epel".to_string(), 10, Some(MergeMode::Simple))]
        );
    }

    #[test]
    fn test_readd_keeps_merge_mode() {
        let hub = hub();
        hub.seed_tag_repo("f40-build", "epel", 10, Some(MergeMode::Bare))
            .unwrap();
        let desired = vec![ExternalRepoBinding::new("epel", 30)];
        ensure_external_repos(&hub, "f40-build", true, &desired, false).unwrap();
        assert_eq!(
            bindings(&hub),
            vec![("epel".to_string(), 30, Some(MergeMode::Bare))]
        );
    }

    #[test]
    fn test_dry_run_matches_real_run() {
        let hub = hub();
        hub.seed_tag_repo("f40-build", "cr", 5, None).unwrap();
        let desired = vec![
            ExternalRepoBinding::new("extras", 5),
            ExternalRepoBinding::new("epel", 15),
        ];

        let preview = ensure_external_repos(&hub, "f40-build", true, &desired, true).unwrap();
        assert!(hub.mutating_calls().is_empty());
        let applied = ensure_external_repos(&hub, "f40-build", true, &desired, false).unwrap();
        assert_eq!(preview, applied);

        let again = ensure_external_repos(&hub, "f40-build", true, &desired, false).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn test_binding_from_params() {
        let binding: ExternalRepoBinding =
            serde_json::from_value(json!({"repo": "epel", "priority": "10", "merge_mode": "simple"}))
                .unwrap();
        assert_eq!(
            binding,
            ExternalRepoBinding::new("epel", 10).with_merge_mode(MergeMode::Simple)
        );
    }
}
