//! Koji build type module

use super::{
    parse_state, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult,
    ParamExt,
};
use crate::error::Result;
use crate::reconcile::{mutate, ReconciliationResult};
use crate::session::{KojiSession, SessionExt};

/// Add build type `name` unless the hub already lists it.
pub fn ensure_btype(
    session: &dyn KojiSession,
    name: &str,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let mut result = ReconciliationResult::new();
    if session.list_btypes()?.iter().any(|b| b.name == name) {
        return Ok(result);
    }
    mutate(session, dry_run, &format!("add btype {name}"), |s| s.add_btype(name))?;
    result.change(format!("added btype {name}"));
    Ok(result)
}

/// Module for build types
pub struct KojiBtypeModule;

impl Module for KojiBtypeModule {
    fn name(&self) -> &'static str {
        "koji_btype"
    }

    fn description(&self) -> &'static str {
        "Add a build type"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if parse_state(params, &["present", "absent"], "present")? == "absent" {
            return Err(ModuleError::Unsupported(
                "Cannot remove Koji build types.".to_string(),
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
        let session = context.session(params)?;
        let result = ensure_btype(session.as_ref(), &name, context.check_mode)?;
        let msg = if result.changed {
            format!("Build type '{}' added", name)
        } else {
            format!("Build type '{}' already exists", name)
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}
