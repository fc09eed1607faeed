//! Koji tag inheritance module - one parent link at a time
//!
//! Unlike the `inheritance` parameter of `koji_tag`, which owns a tag's
//! whole parent list, this module adds or removes a single link and leaves
//! the tag's other parents untouched.

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};
use crate::reconcile::de;
use crate::reconcile::inheritance::{InheritanceReconciler, InheritanceSpec};
use serde::Deserialize;

/// Desired state for an inheritance link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct InheritanceParams {
    child_tag: String,
    #[serde(default)]
    parent_tag: Option<String>,
    #[serde(default, deserialize_with = "de::opt_int")]
    priority: Option<i64>,
    #[serde(default, deserialize_with = "de::opt_int")]
    maxdepth: Option<i64>,
    #[serde(default, deserialize_with = "de::string_or_null")]
    pkg_filter: String,
    #[serde(default)]
    intransitive: bool,
    #[serde(default)]
    noconfig: bool,
    #[serde(default)]
    state: LinkState,
    #[serde(default)]
    koji: Option<String>,
}

impl InheritanceParams {
    fn spec(&self) -> ModuleResult<InheritanceSpec> {
        let parent = self
            .parent_tag
            .clone()
            .ok_or_else(|| ModuleError::MissingParameter("parent_tag".to_string()))?;
        let priority = self.priority.ok_or_else(|| {
            ModuleError::MissingParameter("specify a \"priority\" integer".to_string())
        })?;
        let spec = InheritanceSpec {
            parent,
            priority,
            maxdepth: self.maxdepth,
            pkg_filter: self.pkg_filter.clone(),
            intransitive: self.intransitive,
            noconfig: self.noconfig,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Module for single inheritance links
pub struct KojiTagInheritanceModule;

impl Module for KojiTagInheritanceModule {
    fn name(&self) -> &'static str {
        "koji_tag_inheritance"
    }

    fn description(&self) -> &'static str {
        "Add or remove one inheritance link between two tags"
    }

    fn required_params(&self) -> &[&'static str] {
        &["child_tag"]
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let parsed: InheritanceParams = params.parse()?;
        match parsed.state {
            LinkState::Present => parsed.spec().map(|_| ()),
            LinkState::Absent if parsed.parent_tag.is_none() && parsed.priority.is_none() => {
                Err(ModuleError::MissingParameter(
                    "parent_tag or priority".to_string(),
                ))
            }
            LinkState::Absent => Ok(()),
        }
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let parsed: InheritanceParams = params.parse()?;
        let session = context.session_for(parsed.koji.as_deref())?;
        let reconciler = InheritanceReconciler::new(session.as_ref(), context.check_mode);
        let child = parsed.child_tag.as_str();

        let result = match parsed.state {
            LinkState::Present => reconciler.add_link(child, &parsed.spec()?)?,
            LinkState::Absent => reconciler.remove_link(
                child,
                parsed.parent_tag.as_deref(),
                parsed.priority,
            )?,
        };
        let msg = if result.changed {
            format!("Inheritance of '{}' changed", child)
        } else {
            format!("Inheritance of '{}' already in desired state", child)
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{KojiSession, MemoryHub};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn params(value: serde_json::Value) -> ModuleParams {
        serde_json::from_value::<HashMap<String, serde_json::Value>>(value).unwrap()
    }

    fn context(hub: &Arc<MemoryHub>) -> ModuleContext {
        let session: Arc<dyn KojiSession> = hub.clone();
        ModuleContext::new().with_profile("koji").with_session(session)
    }

    #[test]
    fn test_add_then_remove_link() {
        let hub = Arc::new(MemoryHub::new());
        hub.seed_tag("f40-build").unwrap();
        hub.seed_tag("f40").unwrap();
        let module = KojiTagInheritanceModule;

        let add = params(json!({"child_tag": "f40-build", "parent_tag": "f40", "priority": "10"}));
        let output = module.execute(&add, &context(&hub)).unwrap();
        assert!(output.changed);
        assert_eq!(output.stdout_lines, vec!["add inheritance link:", "  10   .... f40"]);
        assert!(!module.execute(&add, &context(&hub)).unwrap().changed);

        let remove = params(json!({"child_tag": "f40-build", "parent_tag": "f40", "state": "absent"}));
        let output = module.execute(&remove, &context(&hub)).unwrap();
        assert!(output.changed);
        assert!(hub.inheritance("f40-build").is_empty());
    }

    #[test]
    fn test_present_requires_priority() {
        let module = KojiTagInheritanceModule;
        let missing = params(json!({"child_tag": "a", "parent_tag": "b"}));
        assert!(matches!(
            module.validate_params(&missing),
            Err(ModuleError::MissingParameter(_))
        ));
        let bad_filter = params(json!({"child_tag": "a", "parent_tag": "b", "priority": 1, "pkg_filter": "("}));
        assert!(module.validate_params(&bad_filter).is_err());
        let absent = params(json!({"child_tag": "a", "state": "absent"}));
        assert!(module.validate_params(&absent).is_err());
    }
}
