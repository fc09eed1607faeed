//! Koji build target module
//!
//! A target maps a name to a build tag and a destination tag. Both tags must
//! exist before the target can point at them.

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::diff::task_diff_data;
use crate::error::{Error, Result};
use crate::reconcile::{mutate, ReconciliationResult};
use crate::session::{BuildTarget, KojiSession, SessionExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum TargetState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetParams {
    name: String,
    #[serde(default)]
    build_tag: Option<String>,
    #[serde(default)]
    dest_tag: Option<String>,
    #[serde(default)]
    state: TargetState,
    #[serde(default)]
    koji: Option<String>,
}

#[derive(Debug, Serialize)]
struct TargetSettings<'a> {
    name: &'a str,
    build_tag_name: &'a str,
    dest_tag_name: &'a str,
}

impl<'a> From<&'a BuildTarget> for TargetSettings<'a> {
    fn from(target: &'a BuildTarget) -> Self {
        Self {
            name: &target.name,
            build_tag_name: &target.build_tag_name,
            dest_tag_name: &target.dest_tag_name,
        }
    }
}

fn require_tag(session: &dyn KojiSession, kind: &'static str, tag: &str, dry_run: bool) -> Result<()> {
    if session.get_tag(tag)?.is_some() {
        return Ok(());
    }
    if dry_run {
        warn!(tag = %tag, "{kind} not found, it must exist before the target is created");
        return Ok(());
    }
    Err(Error::not_found(kind, tag))
}

/// Ensure target `name` exists and builds from `build_tag` into `dest_tag`.
pub fn ensure_target(
    session: &dyn KojiSession,
    name: &str,
    build_tag: &str,
    dest_tag: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    require_tag(session, "build tag", build_tag, dry_run)?;
    require_tag(session, "destination tag", dest_tag, dry_run)?;

    let mut result = ReconciliationResult::new();
    let desired = TargetSettings {
        name,
        build_tag_name: build_tag,
        dest_tag_name: dest_tag,
    };

    let Some(target) = session.get_build_target(name)? else {
        result.diff = Some(task_diff_data(None::<&Value>, Some(&desired), name, "target")?);
        let mut created = None;
        mutate(session, dry_run, &format!("create target {name}"), |s| {
            s.create_build_target(name, build_tag, dest_tag)?;
            created = s.get_build_target(name)?;
            Ok(())
        })?;
        match created {
            Some(target) => result.change(format!("created target {}", target.id)),
            None => result.change(format!("would create target {name}")),
        }
        return Ok(result);
    };

    let mut edits = Vec::new();
    if target.build_tag_name != build_tag {
        edits.push(format!("build_tag_name: {build_tag}"));
    }
    if target.dest_tag_name != dest_tag {
        edits.push(format!("dest_tag_name: {dest_tag}"));
    }
    if edits.is_empty() {
        return Ok(result);
    }
    result.diff = Some(task_diff_data(
        Some(&TargetSettings::from(&target)),
        Some(&desired),
        name,
        "target",
    )?);
    mutate(session, dry_run, &format!("edit target {name}"), |s| {
        s.edit_build_target(name, build_tag, dest_tag)
    })?;
    for line in edits {
        result.change(line);
    }
    Ok(result)
}

/// Ensure target `name` does not exist.
pub fn delete_target(
    session: &dyn KojiSession,
    name: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    let Some(target) = session.get_build_target(name)? else {
        return Ok(result);
    };
    result.diff = Some(task_diff_data(
        Some(&TargetSettings::from(&target)),
        None::<&Value>,
        name,
        "target",
    )?);
    mutate(session, dry_run, &format!("delete target {name}"), |s| {
        s.delete_build_target(target.id)
    })?;
    result.change(format!("deleted target {}", target.id));
    Ok(result)
}

/// Module for build targets
pub struct KojiTargetModule;

impl Module for KojiTargetModule {
    fn name(&self) -> &'static str {
        "koji_target"
    }

    fn description(&self) -> &'static str {
        "Create, update or delete a build target"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let parsed: TargetParams = params.parse()?;
        if parsed.state == TargetState::Present {
            for (key, value) in [("build_tag", &parsed.build_tag), ("dest_tag", &parsed.dest_tag)] {
                if value.is_none() {
                    return Err(ModuleError::MissingParameter(key.to_string()));
                }
            }
        }
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let parsed: TargetParams = params.parse()?;
        let session = context.session_for(parsed.koji.as_deref())?;
        let name = parsed.name.as_str();

        match parsed.state {
            TargetState::Present => {
                let build_tag = params.get_string_required("build_tag")?;
                let dest_tag = params.get_string_required("dest_tag")?;
                let result = ensure_target(
                    session.as_ref(),
                    name,
                    &build_tag,
                    &dest_tag,
                    context.check_mode,
                )?;
                let msg = if result.changed {
                    format!("Target '{}' changed", name)
                } else {
                    format!("Target '{}' already in desired state", name)
                };
                Ok(ModuleOutput::from_result(result, context, msg))
            }
            TargetState::Absent => {
                let result = delete_target(session.as_ref(), name, context.check_mode)?;
                let msg = if result.changed {
                    format!("Target '{}' deleted", name)
                } else {
                    format!("Target '{}' already absent", name)
                };
                Ok(ModuleOutput::from_result(result, context, msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryHub;
    use pretty_assertions::assert_eq;

    fn hub() -> MemoryHub {
        let hub = MemoryHub::new();
        for tag in ["f40-build", "f40-updates-candidate", "f40-override"] {
            hub.seed_tag(tag).unwrap();
        }
        hub
    }

    #[test]
    fn test_create_then_retarget() {
        let hub = hub();

        let preview = ensure_target(&hub, "f40", "f40-build", "f40-updates-candidate", true).unwrap();
        assert_eq!(preview.messages, vec!["would create target f40"]);
        assert!(hub.mutating_calls().is_empty());

        let created = ensure_target(&hub, "f40", "f40-build", "f40-updates-candidate", false).unwrap();
        assert!(created.messages[0].starts_with("created target "));
        assert!(!ensure_target(&hub, "f40", "f40-build", "f40-updates-candidate", false)
            .unwrap()
            .changed);

        let edited = ensure_target(&hub, "f40", "f40-build", "f40-override", false).unwrap();
        assert_eq!(edited.messages, vec!["dest_tag_name: f40-override"]);
        let diff = edited.diff.unwrap();
        assert_eq!(diff.after["dest_tag_name"], "f40-override");
        assert_eq!(hub.target("f40").unwrap().dest_tag_name, "f40-override");
    }

    #[test]
    fn test_missing_build_tag() {
        let hub = hub();
        let err = ensure_target(&hub, "f40", "nope", "f40-override", false).unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "build tag", .. }));
        assert!(ensure_target(&hub, "f40", "nope", "f40-override", true).unwrap().changed);
    }

    #[test]
    fn test_delete() {
        let hub = hub();
        hub.seed_target("f40", "f40-build", "f40-updates-candidate").unwrap();
        let id = hub.target("f40").unwrap().id;

        let result = delete_target(&hub, "f40", false).unwrap();
        assert_eq!(result.messages, vec![format!("deleted target {id}")]);
        assert!(result.diff.unwrap().after.is_empty());
        assert!(hub.target("f40").is_none());
    }
}
