//! Koji tag module - tag settings and contents
//!
//! Creates, edits or deletes a tag, then converges the optional parts of its
//! contents: inheritance, external repos, package list, blocked packages and
//! comps groups. Each part is left alone when its parameter is not given.

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::diff::task_diff_data;
use crate::error::{Error, Result};
use crate::reconcile::external_repos::{
    ensure_external_repos, validate_bindings, ExternalRepoBinding,
};
use crate::reconcile::groups::{ensure_groups, GroupMap};
use crate::reconcile::inheritance::{
    validate_specs, InheritanceReconciler, InheritanceSpec, MISSING_TAG_ID,
};
use crate::reconcile::packages::{
    normalize_owner_map, OwnerMap, PackageReconciler, PackageRequest,
};
use crate::reconcile::{de, mutate, PermissionCache, ReconciliationResult};
use crate::session::{KojiSession, SessionExt, TagInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Desired state for a tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagState {
    #[default]
    Present,
    Absent,
}

/// Parameters of the `koji_tag` module.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagParams {
    pub name: String,
    /// Hub profile
    #[serde(default)]
    pub koji: Option<String>,
    #[serde(default)]
    pub state: TagState,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub inheritance: Option<Vec<InheritanceSpec>>,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub external_repos: Option<Vec<ExternalRepoBinding>>,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub packages: Option<OwnerMap>,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub blocked_packages: Option<Vec<String>>,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub groups: Option<GroupMap>,
    #[serde(default)]
    pub arches: Option<String>,
    #[serde(default)]
    pub perm: Option<String>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub maven_support: bool,
    #[serde(default)]
    pub maven_include_all: bool,
    /// `None` leaves extra fields alone; a map is applied exactly
    #[serde(default)]
    pub extra: Option<Map<String, Value>>,
}

impl TagParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    fn perm(&self) -> Option<&str> {
        self.perm.as_deref().filter(|p| !p.is_empty())
    }

    /// Reject malformed contents before talking to the hub.
    pub fn validate(&self) -> Result<()> {
        if let Some(specs) = &self.inheritance {
            validate_specs(specs)?;
        }
        if let Some(bindings) = &self.external_repos {
            validate_bindings(bindings)?;
        }
        if let Some(packages) = &self.packages {
            normalize_owner_map(packages)?;
        }
        Ok(())
    }
}

/// The editable settings of a tag, as shown in diffs.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct TagSettings {
    arches: Option<String>,
    perm: Option<String>,
    locked: bool,
    maven_support: bool,
    maven_include_all: bool,
    extra: Map<String, Value>,
}

impl From<&TagInfo> for TagSettings {
    fn from(info: &TagInfo) -> Self {
        Self {
            arches: info.arches.clone(),
            perm: info.perm.clone(),
            locked: info.locked,
            maven_support: info.maven_support,
            maven_include_all: info.maven_include_all,
            extra: info.extra.clone(),
        }
    }
}

impl From<&TagParams> for TagSettings {
    fn from(params: &TagParams) -> Self {
        Self {
            arches: params.arches.clone(),
            perm: params.perm().map(str::to_string),
            locked: params.locked,
            maven_support: params.maven_support,
            maven_include_all: params.maven_include_all,
            extra: params.extra.clone().unwrap_or_default(),
        }
    }
}

/// Render a value the way the hub's own tooling prints it.
fn display(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Edits needed to bring `info` to `params`, with one log line per edit.
fn plan_edits(info: &TagInfo, params: &TagParams) -> (Map<String, Value>, Vec<String>) {
    let name = &params.name;
    let mut edits = Map::new();
    let mut log = Vec::new();

    let mut scalar = |key: &str, current: Value, desired: Option<Value>| {
        if let Some(desired) = desired {
            if current != desired {
                log.push(format!(
                    "{name}: changed {key} from \"{}\" to \"{}\"",
                    display(&current),
                    display(&desired)
                ));
                edits.insert(key.to_string(), desired);
            }
        }
    };
    scalar("arches", info.arches.clone().into(), params.arches.clone().map(Value::from));
    scalar("perm", info.perm.clone().into(), params.perm().map(Value::from));
    scalar("locked", info.locked.into(), Some(params.locked.into()));
    scalar(
        "maven_support",
        info.maven_support.into(),
        Some(params.maven_support.into()),
    );
    scalar(
        "maven_include_all",
        info.maven_include_all.into(),
        Some(params.maven_include_all.into()),
    );

    if let Some(extra) = &params.extra {
        if extra.iter().any(|(k, v)| info.extra.get(k) != Some(v)) {
            log.push(format!(
                "{name}: changed extra from \"{}\" to \"{}\"",
                Value::Object(info.extra.clone()),
                Value::Object(extra.clone())
            ));
            edits.insert("extra".to_string(), Value::Object(extra.clone()));
        }
        let removed: Vec<&String> = info.extra.keys().filter(|k| !extra.contains_key(*k)).collect();
        if !removed.is_empty() {
            let quoted: Vec<&str> = removed.iter().map(|k| k.as_str()).collect();
            log.push(format!(
                "{name}: remove extra fields \"{}\"",
                quoted.join("\", \"")
            ));
            edits.insert("remove_extra".to_string(), Value::from(quoted));
        }
    }
    (edits, log)
}

/// Look up the id of the tag's `perm`.
///
/// A missing permission fails a real run; a dry run notes it and carries on
/// without an id.
fn resolve_perm(
    session: &dyn KojiSession,
    perms: &PermissionCache,
    perm: &str,
    dry_run: bool,
    result: &mut ReconciliationResult,
) -> Result<Option<i64>> {
    match perms.id_of(session, perm) {
        Ok(id) => Ok(Some(id)),
        Err(err @ Error::NotFound { .. }) if dry_run => {
            warn!("{err}, continuing check mode preview");
            result.note(err.to_string());
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn create_options(params: &TagParams, perm_id: Option<i64>) -> Map<String, Value> {
    let mut options = Map::new();
    if let Some(arches) = &params.arches {
        options.insert("arches".to_string(), arches.clone().into());
    }
    if let Some(id) = perm_id {
        options.insert("perm".to_string(), id.into());
    }
    options.insert("locked".to_string(), params.locked.into());
    options.insert("maven_support".to_string(), params.maven_support.into());
    options.insert("maven_include_all".to_string(), params.maven_include_all.into());
    if let Some(extra) = &params.extra {
        options.insert("extra".to_string(), Value::Object(extra.clone()));
    }
    options
}

/// Converge a tag and its optional contents.
pub fn ensure_tag(
    session: &dyn KojiSession,
    perms: &PermissionCache,
    params: &TagParams,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    params.validate()?;
    let name = params.name.as_str();
    let mut result = ReconciliationResult::new();

    let tag_id = match session.get_tag(name)? {
        None => {
            let after = TagSettings::from(params);
            result.diff = Some(task_diff_data(None::<&Value>, Some(&after), name, "tag")?);
            let perm_id = match params.perm() {
                Some(perm) => resolve_perm(session, perms, perm, dry_run, &mut result)?,
                None => None,
            };
            let mut created = None;
            mutate(session, dry_run, &format!("create tag {name}"), |s| {
                created = Some(s.create_tag(name, create_options(params, perm_id))?);
                Ok(())
            })?;
            match created {
                Some(id) => result.change(format!("created tag id {id}")),
                None => result.change(format!("would create tag {name}")),
            }
            created
        }
        Some(info) => {
            let (edits, log) = plan_edits(&info, params);
            if let (Some(perm), true) = (params.perm(), edits.contains_key("perm")) {
                resolve_perm(session, perms, perm, dry_run, &mut result)?;
            }
            if !edits.is_empty() {
                let before = TagSettings::from(&info);
                let mut after = before.clone();
                after.arches = params.arches.clone().or(after.arches);
                if let Some(perm) = params.perm() {
                    after.perm = Some(perm.to_string());
                }
                after.locked = params.locked;
                after.maven_support = params.maven_support;
                after.maven_include_all = params.maven_include_all;
                if let Some(extra) = &params.extra {
                    after.extra = extra.clone();
                }
                result.diff = Some(task_diff_data(Some(&before), Some(&after), name, "tag")?);
                mutate(session, dry_run, &format!("edit tag {name}"), |s| {
                    s.edit_tag(name, edits)
                })?;
                for line in log {
                    result.change(line);
                }
            }
            Some(info.id)
        }
    };

    if let Some(specs) = &params.inheritance {
        let child_id = tag_id.unwrap_or(MISSING_TAG_ID);
        let sub = InheritanceReconciler::new(session, dry_run).ensure(name, child_id, specs)?;
        result.absorb("tag", name, sub);
    }
    if let Some(bindings) = &params.external_repos {
        let sub = ensure_external_repos(session, name, tag_id.is_some(), bindings, dry_run)?;
        result.absorb("tag", name, sub);
    }
    if params.packages.is_some() || params.blocked_packages.is_some() {
        let request = PackageRequest {
            owners: params.packages.clone(),
            blocked: params.blocked_packages.clone(),
        };
        let sub = PackageReconciler::new(session, name, tag_id, dry_run).ensure(&request)?;
        result.absorb("tag", name, sub);
    }
    if let Some(groups) = &params.groups {
        let sub = ensure_groups(session, tag_id, groups, dry_run)?;
        result.absorb("tag", name, sub);
    }
    Ok(result)
}

/// Ensure the tag does not exist.
pub fn delete_tag(
    session: &dyn KojiSession,
    name: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    let Some(info) = session.get_tag(name)? else {
        return Ok(result);
    };
    mutate(session, dry_run, &format!("delete tag {name}"), |s| s.delete_tag(name))?;
    result.change(format!("deleted tag {}", info.id));
    let before = TagSettings::from(&info);
    result.diff = Some(task_diff_data(Some(&before), None::<&Value>, name, "tag")?);
    Ok(result)
}

/// Module for tag management
pub struct KojiTagModule;

impl Module for KojiTagModule {
    fn name(&self) -> &'static str {
        "koji_tag"
    }

    fn description(&self) -> &'static str {
        "Create, edit or delete a tag and manage its contents"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let parsed: TagParams = params.parse()?;
        parsed.validate()?;
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let parsed: TagParams = params.parse()?;
        let session = context.session_for(parsed.koji.as_deref())?;
        let name = parsed.name.clone();

        match parsed.state {
            TagState::Present => {
                let result =
                    ensure_tag(session.as_ref(), &context.perms, &parsed, context.check_mode)?;
                let msg = if result.changed {
                    format!("Tag '{}' changed", name)
                } else {
                    format!("Tag '{}' already in desired state", name)
                };
                Ok(ModuleOutput::from_result(result, context, msg))
            }
            TagState::Absent => {
                let result = delete_tag(session.as_ref(), &name, context.check_mode)?;
                let msg = if result.changed {
                    format!("Tag '{}' deleted", name)
                } else {
                    format!("Tag '{}' already absent", name)
                };
                Ok(ModuleOutput::from_result(result, context, msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::session::MemoryHub;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn params(value: Value) -> TagParams {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_create_tag_with_perm() {
        let hub = MemoryHub::new();
        hub.seed_perm("admin").unwrap();
        let perms = PermissionCache::new();
        let p = params(json!({"name": "f40", "arches": "x86_64", "perm": "admin"}));

        let preview = ensure_tag(&hub, &perms, &p, true).unwrap();
        assert_eq!(preview.messages, vec!["would create tag f40"]);
        assert!(hub.mutating_calls().is_empty());

        let result = ensure_tag(&hub, &perms, &p, false).unwrap();
        assert!(result.messages[0].starts_with("created tag id "));
        assert_eq!(preview.diff, result.diff);
        let tag = hub.tag("f40").unwrap();
        assert_eq!(tag.perm.as_deref(), Some("admin"));
        assert_eq!(tag.arches.as_deref(), Some("x86_64"));

        assert!(!ensure_tag(&hub, &perms, &p, false).unwrap().changed);
    }

    #[test]
    fn test_unknown_perm() {
        let hub = MemoryHub::new();
        hub.seed_tag("f41").unwrap();
        let perms = PermissionCache::new();

        let create = params(json!({"name": "f40", "perm": "nope"}));
        let preview = ensure_tag(&hub, &perms, &create, true).unwrap();
        assert_eq!(
            preview.messages,
            vec!["permission 'nope' not found", "would create tag f40"]
        );
        assert!(matches!(
            ensure_tag(&hub, &perms, &create, false),
            Err(Error::NotFound { kind: "permission", .. })
        ));
        assert!(hub.tag("f40").is_none());

        let edit = params(json!({"name": "f41", "perm": "nope"}));
        let preview = ensure_tag(&hub, &perms, &edit, true).unwrap();
        assert_eq!(preview.messages[0], "permission 'nope' not found");
        assert!(matches!(
            ensure_tag(&hub, &perms, &edit, false),
            Err(Error::NotFound { kind: "permission", .. })
        ));
        assert!(hub.mutating_calls().is_empty());
    }

    #[test]
    fn test_edit_messages() {
        let hub = MemoryHub::new();
        hub.seed_tag("f40").unwrap();
        let perms = PermissionCache::new();
        let p = params(json!({"name": "f40", "arches": "x86_64", "locked": true}));

        let result = ensure_tag(&hub, &perms, &p, false).unwrap();
        assert_eq!(
            result.messages,
            vec![
                "f40: changed arches from \"None\" to \"x86_64\"",
                "f40: changed locked from \"False\" to \"True\"",
            ]
        );
        let diff = result.diff.unwrap();
        assert_eq!(diff.before_header, "Original tag 'f40'");
        assert_eq!(diff.after["locked"], json!(true));
    }

    #[test]
    fn test_extra_absent_means_untouched() {
        let hub = MemoryHub::new();
        hub.seed_tag("f40").unwrap();
        let perms = PermissionCache::new();
        let p = params(json!({"name": "f40", "extra": {"mock.package_manager": "dnf", "keep": 1}}));
        ensure_tag(&hub, &perms, &p, false).unwrap();

        // no extra parameter: nothing removed
        let untouched = params(json!({"name": "f40"}));
        assert!(!ensure_tag(&hub, &perms, &untouched, false).unwrap().changed);
        assert_eq!(hub.tag("f40").unwrap().extra.len(), 2);

        // explicit map: exact
        let exact = params(json!({"name": "f40", "extra": {"keep": 1}}));
        let result = ensure_tag(&hub, &perms, &exact, false).unwrap();
        assert_eq!(
            result.messages,
            vec!["f40: remove extra fields \"mock.package_manager\""]
        );
        assert_eq!(hub.tag("f40").unwrap().extra.len(), 1);
    }

    #[test]
    fn test_missing_tag_previews_contents() {
        let hub = MemoryHub::new();
        hub.seed_tag("f40-base").unwrap();
        let perms = PermissionCache::new();
        let p = params(json!({
            "name": "f40-build",
            "inheritance": [{"parent": "f40-base", "priority": 0}],
            "groups": {"build": ["bash"]},
        }));

        let result = ensure_tag(&hub, &perms, &p, true).unwrap();
        assert_eq!(
            result.messages,
            vec![
                "would create tag f40-build",
                "current inheritance:",
                "new inheritance:",
                "   0   .... f40-base",
                "added group build",
                "added pkg bash to group build",
            ]
        );
        let diff = result.diff.unwrap();
        assert_eq!(diff.before_header, "Not present");
        assert!(diff.after.contains_key("inheritance"));
        assert!(diff.after.contains_key("groups"));
        assert!(hub.mutating_calls().is_empty());
    }

    #[test]
    fn test_invalid_contents_rejected_before_calls() {
        let hub = MemoryHub::new();
        let p = params(json!({
            "name": "f40",
            "external_repos": [{"repo": "a", "priority": 5}, {"repo": "b", "priority": 5}],
        }));
        let err = ensure_tag(&hub, &PermissionCache::new(), &p, false).unwrap_err();
        assert!(matches!(err, Error::DuplicatePriority { .. }));
        assert!(hub.calls().is_empty());
    }

    #[test]
    fn test_delete_tag() {
        let hub = MemoryHub::new();
        let id = hub.seed_tag("f40").unwrap();
        let result = delete_tag(&hub, "f40", false).unwrap();
        assert_eq!(result.messages, vec![format!("deleted tag {id}")]);
        assert_eq!(result.diff.unwrap().after_header, "Not present");
        assert!(!delete_tag(&hub, "f40", false).unwrap().changed);
    }

    #[test]
    fn test_empty_compound_params_are_ignored() {
        let p = params(json!({"name": "f40", "inheritance": "", "packages": null}));
        assert!(p.inheritance.is_none());
        assert!(p.packages.is_none());
        assert!(serde_json::from_value::<TagParams>(json!({"name": "f40", "colour": "red"})).is_err());
    }
}
