//! Koji tag packages module - partial package list management
//!
//! `present` adds missing packages and fixes owners but never removes a
//! package it was not told about. `absent` removes only the listed packages.

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::error::Error;
use crate::reconcile::packages::{normalize_owner_map, OwnerMap, PackageReconciler};
use crate::session::SessionExt;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PackagesState {
    #[default]
    Present,
    Absent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TagPackagesParams {
    tag: String,
    packages: OwnerMap,
    #[serde(default)]
    state: PackagesState,
    #[serde(default)]
    koji: Option<String>,
}

/// Module for adding and removing packages on a tag
pub struct KojiTagPackagesModule;

impl Module for KojiTagPackagesModule {
    fn name(&self) -> &'static str {
        "koji_tag_packages"
    }

    fn description(&self) -> &'static str {
        "Add or remove packages on a tag without owning the whole list"
    }

    fn required_params(&self) -> &[&'static str] {
        &["tag", "packages"]
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let parsed: TagPackagesParams = params.parse()?;
        normalize_owner_map(&parsed.packages)?;
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let parsed: TagPackagesParams = params.parse()?;
        let session = context.session_for(parsed.koji.as_deref())?;
        let tag = parsed.tag.as_str();

        let tag_id = match session.get_tag(tag)? {
            Some(info) => Some(info.id),
            None if context.check_mode => {
                warn!(tag = %tag, "Tag not found, previewing against an empty package list");
                None
            }
            None => return Err(Error::not_found("tag", tag).into()),
        };

        let reconciler = PackageReconciler::new(session.as_ref(), tag, tag_id, context.check_mode);
        let result = match parsed.state {
            PackagesState::Present => reconciler.ensure_present(&parsed.packages)?,
            PackagesState::Absent => reconciler.ensure_absent(&parsed.packages)?,
        };
        let msg = if result.changed {
            format!("Packages of tag '{}' changed", tag)
        } else {
            format!("Packages of tag '{}' already in desired state", tag)
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}
