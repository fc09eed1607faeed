//! Koji host module - builder hosts
//!
//! Creates a builder with `addHost`, then converges its enabled flag, the
//! editable host fields, its channel memberships and the Kerberos
//! principals of its user account.

use std::collections::BTreeSet;

use super::{Module, ModuleContext, ModuleOutput, ModuleParams, ModuleResult, ParamExt};
use crate::diff::{task_diff_data, TaskDiff};
use crate::error::{Error, Result};
use crate::reconcile::collection::{CollectionOps, CollectionPlan};
use crate::reconcile::principals::ensure_krb_principals;
use crate::reconcile::{de, mutate, ReconciliationResult};
use crate::session::{HostInfo, KojiSession, SessionExt, UserInfo, USER_STATUS_NORMAL};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Capacity the hub gives a new host.
const DEFAULT_CAPACITY: f64 = 2.0;

/// Desired state for a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostState {
    #[default]
    Enabled,
    Disabled,
}

/// Parameters of the `koji_host` module.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostParams {
    pub name: String,
    pub arches: Vec<String>,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub channels: Option<Vec<String>>,
    /// Only used when the host is created
    #[serde(default)]
    pub krb_principal: Option<String>,
    #[serde(default, deserialize_with = "de::opt_compound")]
    pub krb_principals: Option<Vec<String>>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub state: HostState,
    #[serde(default)]
    pub koji: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct HostSettings {
    arches: String,
    enabled: bool,
    capacity: f64,
    description: Option<String>,
    comment: Option<String>,
}

impl From<&HostInfo> for HostSettings {
    fn from(host: &HostInfo) -> Self {
        Self {
            arches: host.arches.clone(),
            enabled: host.enabled,
            capacity: host.capacity,
            description: host.description.clone(),
            comment: host.comment.clone(),
        }
    }
}

/// What a host looks like right after `addHost`, for previews.
fn placeholder(params: &HostParams) -> HostInfo {
    HostInfo {
        id: 0,
        name: params.name.clone(),
        arches: params.arches.join(" "),
        enabled: true,
        capacity: DEFAULT_CAPACITY,
        description: None,
        comment: None,
    }
}

/// `editHost` keywords needed to bring `host` to `params`, in field order.
fn plan_edits(host: &HostInfo, params: &HostParams) -> Vec<(&'static str, Value)> {
    let mut edits = Vec::new();
    let arches = params.arches.join(" ");
    if arches != host.arches {
        edits.push(("arches", arches.into()));
    }
    if let Some(capacity) = params.capacity {
        if (capacity - host.capacity).abs() > f64::EPSILON {
            edits.push(("capacity", capacity.into()));
        }
    }
    if let Some(description) = &params.description {
        if host.description.as_ref() != Some(description) {
            edits.push(("description", description.clone().into()));
        }
    }
    if let Some(comment) = &params.comment {
        if host.comment.as_ref() != Some(comment) {
            edits.push(("comment", comment.clone().into()));
        }
    }
    edits
}

struct ChannelOps<'a> {
    host: &'a str,
}

impl CollectionOps<String, ()> for ChannelOps<'_> {
    fn add_message(&self, channel: &String, _: &()) -> String {
        format!("added host to channel {channel}")
    }

    fn remove_message(&self, channel: &String, _: &()) -> String {
        format!("removed host from channel {channel}")
    }

    fn add(&self, session: &dyn KojiSession, channel: &String, _: &()) -> Result<()> {
        session.add_host_to_channel(self.host, channel, true)
    }

    fn remove(&self, session: &dyn KojiSession, channel: &String, _: &()) -> Result<()> {
        session.remove_host_from_channel(self.host, channel)
    }
}

/// Make `host` a member of exactly the `desired` channels.
fn ensure_channels(
    session: &dyn KojiSession,
    host: &HostInfo,
    exists: bool,
    desired: &[String],
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let current: BTreeSet<String> = if exists {
        session
            .list_channels(host.id)?
            .into_iter()
            .map(|c| c.name)
            .collect()
    } else {
        BTreeSet::new()
    };
    let wanted: BTreeSet<String> = desired.iter().cloned().collect();
    let plan = CollectionPlan::from_sets(&current, &wanted);
    let ops = ChannelOps { host: &host.name };
    let mut result = plan.apply(session, &ops, dry_run)?;
    if result.changed {
        result.diff = Some(TaskDiff::section(
            "channels",
            serde_json::json!(current),
            serde_json::json!(wanted),
        ));
    }
    Ok(result)
}

/// Converge a builder host.
pub fn ensure_host(
    session: &dyn KojiSession,
    params: &HostParams,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let name = params.name.as_str();
    let mut result = ReconciliationResult::new();

    let existing = session.get_host(name)?;
    let before = existing.as_ref().map(HostSettings::from);
    let (host, exists) = match existing {
        Some(host) => (host, true),
        None => {
            let mut created = None;
            mutate(session, dry_run, &format!("add host {name}"), |s| {
                let id = s.add_host(name, &params.arches, params.krb_principal.as_deref())?;
                created = s.get_host(id)?;
                Ok(())
            })?;
            result.change("created host");
            match created {
                Some(host) => (host, true),
                None if dry_run => (placeholder(params), false),
                None => return Err(Error::not_found("host", name)),
            }
        }
    };
    let mut after = HostSettings::from(&host);

    match params.state {
        HostState::Enabled if !host.enabled => {
            mutate(session, dry_run, &format!("enable host {name}"), |s| s.enable_host(name))?;
            result.change("enabled host");
            after.enabled = true;
        }
        HostState::Disabled if host.enabled => {
            mutate(session, dry_run, &format!("disable host {name}"), |s| s.disable_host(name))?;
            result.change("disabled host");
            after.enabled = false;
        }
        _ => {}
    }

    let edits = plan_edits(&host, params);
    if !edits.is_empty() {
        let keys: Vec<&str> = edits.iter().map(|(key, _)| *key).collect();
        let edits: Map<String, Value> = edits
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        after.arches = params.arches.join(" ");
        after.capacity = params.capacity.unwrap_or(after.capacity);
        after.description = params.description.clone().or(after.description);
        after.comment = params.comment.clone().or(after.comment);
        mutate(session, dry_run, &format!("edit host {name}"), |s| s.edit_host(name, edits))?;
        for key in keys {
            result.change(format!("edited host {key}"));
        }
    }

    if before.as_ref() != Some(&after) {
        result.diff = Some(task_diff_data(before.as_ref(), Some(&after), name, "host")?);
    }

    if let Some(channels) = &params.channels {
        let sub = ensure_channels(session, &host, exists, channels, dry_run)?;
        result.absorb("host", name, sub);
    }

    if let Some(principals) = &params.krb_principals {
        let user = match session.get_user(name)? {
            Some(user) => user,
            None if dry_run => {
                warn!(host = %name, "Host account not found, previewing principals against the new account");
                UserInfo {
                    id: 0,
                    name: name.to_string(),
                    status: USER_STATUS_NORMAL,
                    usertype: 1,
                    krb_principals: params.krb_principal.iter().cloned().collect(),
                }
            }
            None => return Err(Error::not_found("host user", name)),
        };
        let sub = ensure_krb_principals(session, &user, principals, dry_run)?;
        result.absorb("host", name, sub);
    }
    Ok(result)
}

/// Module for builder hosts
pub struct KojiHostModule;

impl Module for KojiHostModule {
    fn name(&self) -> &'static str {
        "koji_host"
    }

    fn description(&self) -> &'static str {
        "Create and configure a builder host"
    }

    fn required_params(&self) -> &[&'static str] {
        &["name", "arches"]
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let _: HostParams = params.parse()?;
        Ok(())
    }

    fn execute(
        &self,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let parsed: HostParams = params.parse()?;
        let session = context.session_for(parsed.koji.as_deref())?;
        let result = ensure_host(session.as_ref(), &parsed, context.check_mode)?;
        let msg = if result.changed {
            format!("Host '{}' changed", parsed.name)
        } else {
            format!("Host '{}' already in desired state", parsed.name)
        };
        Ok(ModuleOutput::from_result(result, context, msg))
    }
}
