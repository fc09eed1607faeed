//! Koji external repo module
//!
//! Manages the global external repo record (name and URL). Attaching a repo
//! to a tag is done through the `external_repos` parameter of `koji_tag`.

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::diff::task_diff_data;
use crate::error::Result;
use crate::reconcile::{mutate, ReconciliationResult};
use crate::session::{ExternalRepoInfo, KojiSession, SessionExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RepoState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExternalRepoParams {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    state: RepoState,
    #[serde(default)]
    koji: Option<String>,
}

#[derive(Debug, Serialize)]
struct RepoSettings<'a> {
    name: &'a str,
    url: &'a str,
}

impl<'a> From<&'a ExternalRepoInfo> for RepoSettings<'a> {
    fn from(info: &'a ExternalRepoInfo) -> Self {
        Self {
            name: &info.name,
            url: &info.url,
        }
    }
}

/// Ensure the external repo `name` exists and points at `url`.
pub fn ensure_external_repo(
    session: &dyn KojiSession,
    name: &str,
    url: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    let desired = RepoSettings { name, url };

    match session.get_external_repo(name)? {
        None => {
            result.diff = Some(task_diff_data(None::<&Value>, Some(&desired), name, "external repo")?);
            let mut created = None;
            mutate(session, dry_run, &format!("create external repo {name}"), |s| {
                created = Some(s.create_external_repo(name, url)?);
                Ok(())
            })?;
            match created {
                Some(info) => result.change(format!("created repo id {}", info.id)),
                None => result.change(format!("would create repo {name}")),
            }
        }
        Some(info) if info.url != url => {
            result.diff = Some(task_diff_data(
                Some(&RepoSettings::from(&info)),
                Some(&desired),
                name,
                "external repo",
            )?);
            mutate(session, dry_run, &format!("edit external repo {name}"), |s| {
                s.edit_external_repo(info.id, url)
            })?;
            result.change(format!("set url to {url}"));
        }
        Some(_) => {}
    }
    Ok(result)
}

/// Ensure the external repo `name` does not exist.
pub fn delete_external_repo(
    session: &dyn KojiSession,
    name: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    let Some(info) = session.get_external_repo(name)? else {
        return Ok(result);
    };
    result.diff = Some(task_diff_data(
        Some(&RepoSettings::from(&info)),
        None::<&Value>,
        name,
        "external repo",
    )?);
    mutate(session, dry_run, &format!("delete external repo {name}"), |s| {
        s.delete_external_repo(name)
    })?;
    result.change(format!("deleted external repo {name}"));
    Ok(result)
}

/// Module for external repo records
pub struct KojiExternalRepoModule;

impl Module for KojiExternalRepoModule {
    fn name(&self) -> &'static str {
        "koji_external_repo"
    }

    fn description(&self) -> &'static str {
        "Create, update or delete an external repository"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let parsed: ExternalRepoParams = params.parse()?;
        if parsed.state == RepoState::Present && parsed.url.as_deref().map_or(true, str::is_empty) {
            return Err(ModuleError::MissingParameter("url".to_string()));
        }
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let parsed: ExternalRepoParams = params.parse()?;
        let session = context.session_for(parsed.koji.as_deref())?;
        let name = parsed.name.as_str();

        let result = match parsed.state {
            RepoState::Present => {
                let url = parsed
                    .url
                    .as_deref()
                    .ok_or_else(|| ModuleError::MissingParameter("url".to_string()))?;
                ensure_external_repo(session.as_ref(), name, url, context.check_mode)?
            }
            RepoState::Absent => delete_external_repo(session.as_ref(), name, context.check_mode)?,
        };
        let msg = match (parsed.state, result.changed) {
            (RepoState::Present, true) => format!("External repo '{}' changed", name),
            (RepoState::Present, false) => format!("External repo '{}' already in desired state", name),
            (RepoState::Absent, true) => format!("External repo '{}' deleted", name),
            (RepoState::Absent, false) => format!("External repo '{}' already absent", name),
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryHub;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://dl.example.com/epel/9/$arch/";

    #[test]
    fn test_create_edit_delete() {
        let hub = MemoryHub::new();

        let preview = ensure_external_repo(&hub, "epel9", URL, true).unwrap();
        assert_eq!(preview.messages, vec!["would create repo epel9"]);
        assert!(hub.mutating_calls().is_empty());

        let created = ensure_external_repo(&hub, "epel9", URL, false).unwrap();
        assert!(created.messages[0].starts_with("created repo id "));
        assert_eq!(preview.diff, created.diff);
        assert!(!ensure_external_repo(&hub, "epel9", URL, false).unwrap().changed);

        let moved = "https://mirror.example.com/epel/9/$arch/";
        let edited = ensure_external_repo(&hub, "epel9", moved, false).unwrap();
        assert_eq!(edited.messages, vec![format!("set url to {moved}")]);
        assert_eq!(hub.external_repo("epel9").unwrap().url, moved);

        let deleted = delete_external_repo(&hub, "epel9", false).unwrap();
        assert_eq!(deleted.messages, vec!["deleted external repo epel9"]);
        assert!(hub.external_repo("epel9").is_none());
        assert!(!delete_external_repo(&hub, "epel9", false).unwrap().changed);
    }

    #[test]
    fn test_present_requires_url() {
        let params: ModuleParams =
            serde_json::from_value(serde_json::json!({"name": "epel9"})).unwrap();
        assert!(matches!(
            KojiExternalRepoModule.validate_params(&params),
            Err(ModuleError::MissingParameter(_))
        ));
        let absent: ModuleParams =
            serde_json::from_value(serde_json::json!({"name": "epel9", "state": "absent"}))
                .unwrap();
        assert!(KojiExternalRepoModule.validate_params(&absent).is_ok());
    }
}
