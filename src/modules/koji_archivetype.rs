//! Koji archive type module
//!
//! The hub can add archive types but never removes them, so `absent` is
//! rejected.

use super::{
    parse_state, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};
use crate::diff::task_diff_data;
use crate::error::Result;
use crate::reconcile::{mutate, ReconciliationResult};
use crate::session::{KojiSession, SessionExt};
use serde_json::{json, Value};

/// Add archive type `name` unless it exists.
///
/// An existing type is left alone even if its description or extensions
/// differ; the hub has no call to edit them.
pub fn ensure_archive_type(
    session: &dyn KojiSession,
    name: &str,
    description: &str,
    extensions: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    if session.get_archive_type(name)?.is_some() {
        return Ok(result);
    }
    mutate(session, dry_run, &format!("add archive type {name}"), |s| {
        s.add_archive_type(name, description, extensions)
    })?;
    result.change(format!("added archive type {name}"));
    let after = json!({"name": name, "description": description, "extensions": extensions});
    result.diff = Some(task_diff_data(None::<&Value>, Some(&after), name, "archive type")?);
    Ok(result)
}

/// Module for archive types
pub struct KojiArchiveTypeModule;

impl Module for KojiArchiveTypeModule {
    fn name(&self) -> &'static str {
        "koji_archivetype"
    }

    fn description(&self) -> &'static str {
        "Add an archive type"
    }

    fn required_params(&self) -> &[&'static str] {
        &["name", "description", "extensions"]
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if parse_state(params, &["present", "absent"], "present")? == "absent" {
            return Err(ModuleError::Unsupported(
                "Cannot remove Koji archive types.".to_string(),
            ));
        }
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        self.validate_params(params)?;
        let name = params.get_string_required("name")?;
        let description = params.get_string_required("description")?;
        let extensions = params.get_string_required("extensions")?;
        let session = context.session(params)?;

        let result = ensure_archive_type(
            session.as_ref(),
            &name,
            &description,
            &extensions,
            context.check_mode,
        )?;
        let msg = if result.changed {
            format!("Archive type '{}' added", name)
        } else {
            format!("Archive type '{}' already exists", name)
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemoryHub;

    #[test]
    fn test_add_once() {
        let hub = MemoryHub::new();
        assert!(ensure_archive_type(&hub, "deb", "Debian package", "deb", true)
            .unwrap()
            .changed);
        assert!(hub.mutating_calls().is_empty());

        let result = ensure_archive_type(&hub, "deb", "Debian package", "deb", false).unwrap();
        assert_eq!(result.messages, vec!["added archive type deb"]);
        assert_eq!(hub.archive_type("deb").unwrap().extensions, "deb");
        assert!(!ensure_archive_type(&hub, "deb", "other", "udeb", false)
            .unwrap()
            .changed);
    }

    #[test]
    fn test_absent_is_unsupported() {
        let params: ModuleParams = serde_json::from_value(json!({
            "name": "deb",
            "description": "Debian package",
            "extensions": "deb",
            "state": "absent",
        }))
        .unwrap();
        assert!(matches!(
            KojiArchiveTypeModule.validate_params(&params),
            Err(ModuleError::Unsupported(_))
        ));
    }
}
