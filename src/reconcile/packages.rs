//! Package lists of a tag.
//!
//! Ownership and blocking are reconciled as two passes over a single
//! snapshot taken before any change:
//!
//! 1. the owner pass adds, removes and re-owns entries so that the tag's
//!    package list matches the owner map
//! 2. the blocked pass blocks and unblocks entries so that the blocked set
//!    matches the desired one
//!
//! A package can be blocked without being listed under any owner, so a
//! blocked entry that is wanted blocked is never removed by the owner pass.
//!
//! The blocked pass lists packages with `with_owners=False`. Hubs that
//! predate that keyword reject it; the call is retried once without it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::collection::{CollectionOps, CollectionPlan};
use super::ReconciliationResult;
use crate::diff::TaskDiff;
use crate::error::{Error, Result};
use crate::session::{KojiSession, PackageEntry, SessionExt};

/// Per-package options in an owner map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageOptions {
    #[serde(default)]
    pub blocked: bool,
}

/// One entry under an owner: a bare name or `{name: {blocked: true}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PackageItem {
    Name(String),
    Detailed(BTreeMap<String, PackageOptions>),
}

/// Owner name to the packages that owner maintains.
pub type OwnerMap = BTreeMap<String, Vec<PackageItem>>;

/// Desired state of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPackage {
    pub owner: String,
    pub blocked: bool,
}

/// Flatten an owner map into package name -> desired state.
///
/// A package listed under two owners is a configuration error.
pub fn normalize_owner_map(owners: &OwnerMap) -> Result<BTreeMap<String, DesiredPackage>> {
    let mut packages = BTreeMap::new();
    for (owner, items) in owners {
        for item in items {
            let entries: Vec<(String, bool)> = match item {
                PackageItem::Name(name) => vec![(name.clone(), false)],
                PackageItem::Detailed(map) => map
                    .iter()
                    .map(|(name, opts)| (name.clone(), opts.blocked))
                    .collect(),
            };
            for (name, blocked) in entries {
                let desired = DesiredPackage {
                    owner: owner.clone(),
                    blocked,
                };
                if packages.insert(name.clone(), desired).is_some() {
                    return Err(Error::DuplicateName {
                        kind: "package",
                        name,
                    });
                }
            }
        }
    }
    Ok(packages)
}

/// List a tag's packages without owners, falling back to a plain listing on
/// hubs that do not know `with_owners`.
pub fn list_packages_without_owners(
    session: &dyn KojiSession,
    tag_id: i64,
) -> Result<Vec<PackageEntry>> {
    match session.list_packages(tag_id, Some(false)) {
        Err(err) if err.is_unexpected_argument("with_owners") => {
            warn!("hub does not support listPackages(with_owners), retrying without it");
            session.list_packages(tag_id, None)
        }
        other => other,
    }
}

/// Wording used by the messages of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wording {
    /// `package bash was added`
    Tag,
    /// `added pkg bash`
    TagPackages,
}

struct OwnerOps<'a> {
    tag: &'a str,
    wording: Wording,
}

impl CollectionOps<String, String> for OwnerOps<'_> {
    fn add_message(&self, package: &String, _owner: &String) -> String {
        match self.wording {
            Wording::Tag => format!("package {package} was added"),
            Wording::TagPackages => format!("added pkg {package}"),
        }
    }

    fn remove_message(&self, package: &String, _owner: &String) -> String {
        match self.wording {
            Wording::Tag => format!("package {package} was removed"),
            Wording::TagPackages => format!("remove pkg {package}"),
        }
    }

    fn update_message(&self, package: &String, _current: &String, owner: &String) -> String {
        match self.wording {
            Wording::Tag => format!("package {package} was assigned to owner {owner}"),
            Wording::TagPackages => format!("set {package} owner {owner}"),
        }
    }

    fn add(&self, session: &dyn KojiSession, package: &String, owner: &String) -> Result<()> {
        session.package_list_add(self.tag, package, owner)
    }

    fn remove(&self, session: &dyn KojiSession, package: &String, _owner: &String) -> Result<()> {
        session.package_list_remove(self.tag, package)
    }

    fn update(
        &self,
        session: &dyn KojiSession,
        package: &String,
        _current: &String,
        owner: &String,
    ) -> Result<()> {
        session.package_list_set_owner(self.tag, package, owner)
    }
}

struct BlockOps<'a> {
    tag: &'a str,
}

impl CollectionOps<String, ()> for BlockOps<'_> {
    fn add_message(&self, package: &String, _: &()) -> String {
        format!("package {package} was blocked")
    }

    fn remove_message(&self, package: &String, _: &()) -> String {
        format!("package {package} was unblocked")
    }

    fn add(&self, session: &dyn KojiSession, package: &String, _: &()) -> Result<()> {
        session.package_list_block(self.tag, package)
    }

    fn remove(&self, session: &dyn KojiSession, package: &String, _: &()) -> Result<()> {
        session.package_list_unblock(self.tag, package)
    }
}

/// Desired package state of a tag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageRequest {
    /// Owner map; `None` leaves ownership alone
    pub owners: Option<OwnerMap>,
    /// Packages to block; `None` only blocks packages flagged in the owner
    /// map and unblocks other packages of the owner map
    pub blocked: Option<Vec<String>>,
}

/// Reconciler for the package list of one tag.
pub struct PackageReconciler<'a> {
    session: &'a dyn KojiSession,
    tag: &'a str,
    /// `None` for a tag that is only being created in a dry run
    tag_id: Option<i64>,
    dry_run: bool,
}

impl<'a> PackageReconciler<'a> {
    pub fn new(
        session: &'a dyn KojiSession,
        tag: &'a str,
        tag_id: Option<i64>,
        dry_run: bool,
    ) -> Self {
        Self {
            session,
            tag,
            tag_id,
            dry_run,
        }
    }

    fn snapshot(&self) -> Result<Vec<PackageEntry>> {
        match self.tag_id {
            Some(id) => self.session.list_packages(id, None),
            None => Ok(Vec::new()),
        }
    }

    fn blocked_snapshot(&self) -> Result<BTreeSet<String>> {
        let entries = match self.tag_id {
            Some(id) => list_packages_without_owners(self.session, id)?,
            None => Vec::new(),
        };
        Ok(entries
            .into_iter()
            .filter(|p| p.blocked)
            .map(|p| p.package_name)
            .collect())
    }

    /// Converge ownership and blocking to `request`.
    pub fn ensure(&self, request: &PackageRequest) -> Result<ReconciliationResult> {
        let desired = match &request.owners {
            Some(owners) => Some(normalize_owner_map(owners)?),
            None => None,
        };
        let mut result = ReconciliationResult::new();
        if desired.is_none() && request.blocked.is_none() {
            return Ok(result);
        }

        let mut want_blocked: BTreeSet<String> = request
            .blocked
            .iter()
            .flatten()
            .cloned()
            .collect();
        if let Some(desired) = &desired {
            want_blocked.extend(
                desired
                    .iter()
                    .filter(|(_, d)| d.blocked)
                    .map(|(name, _)| name.clone()),
            );
        }

        let snapshot = self.snapshot()?;
        let mut blocked_now = self.blocked_snapshot()?;

        let mut before = serde_json::Map::new();
        let mut after = serde_json::Map::new();

        if let Some(desired) = &desired {
            // blocked-only entries belong to the blocked pass
            let current: BTreeMap<String, String> = snapshot
                .iter()
                .filter(|p| {
                    !(p.blocked
                        && want_blocked.contains(&p.package_name)
                        && !desired.contains_key(&p.package_name))
                })
                .map(|p| {
                    (
                        p.package_name.clone(),
                        p.owner_name.clone().unwrap_or_default(),
                    )
                })
                .collect();
            let wanted: BTreeMap<String, String> = desired
                .iter()
                .map(|(name, d)| (name.clone(), d.owner.clone()))
                .collect();

            let plan = CollectionPlan::compute(&current, &wanted);
            let ops = OwnerOps {
                tag: self.tag,
                wording: Wording::Tag,
            };
            let owners = plan.apply(self.session, &ops, self.dry_run)?;
            result.changed |= owners.changed;
            result.messages.extend(owners.messages);

            for (name, _) in &plan.to_remove {
                blocked_now.remove(name);
            }
            before.insert("packages".to_string(), json!(group_by_owner(&current)));
            after.insert(
                "packages".to_string(),
                json!(group_by_owner(&plan.projected(&current))),
            );
        }

        let scope: Option<BTreeSet<&String>> = match (&request.blocked, &desired) {
            (Some(_), _) => None,
            (None, Some(desired)) => Some(desired.keys().collect()),
            (None, None) => Some(BTreeSet::new()),
        };
        let plan = CollectionPlan::from_sets(&blocked_now, &want_blocked)
            .protect(|name, _| scope.as_ref().is_some_and(|s| !s.contains(&name)));
        let blocked = plan.apply(self.session, &BlockOps { tag: self.tag }, self.dry_run)?;
        result.changed |= blocked.changed;
        result.messages.extend(blocked.messages);
        if blocked.changed {
            let current: BTreeMap<String, ()> =
                blocked_now.iter().map(|n| (n.clone(), ())).collect();
            let projected: Vec<String> = plan.projected(&current).into_keys().collect();
            before.insert("blocked_packages".to_string(), json!(blocked_now));
            after.insert("blocked_packages".to_string(), json!(projected));
        }

        if result.changed {
            let mut diff = TaskDiff::default();
            diff.before.extend(before);
            diff.after.extend(after);
            result.diff = Some(diff);
        }
        Ok(result)
    }

    /// Add missing packages and fix owners, leaving unlisted packages alone.
    pub fn ensure_present(&self, owners: &OwnerMap) -> Result<ReconciliationResult> {
        let desired = normalize_owner_map(owners)?;
        let current: BTreeMap<String, String> = self
            .snapshot()?
            .into_iter()
            .map(|p| (p.package_name, p.owner_name.unwrap_or_default()))
            .collect();
        let wanted: BTreeMap<String, String> = desired
            .into_iter()
            .map(|(name, d)| (name, d.owner))
            .collect();
        let plan = CollectionPlan::compute(&current, &wanted).without_removals();
        let ops = OwnerOps {
            tag: self.tag,
            wording: Wording::TagPackages,
        };
        plan.apply(self.session, &ops, self.dry_run)
    }

    /// Remove the listed packages that are on the tag.
    pub fn ensure_absent(&self, owners: &OwnerMap) -> Result<ReconciliationResult> {
        let desired = normalize_owner_map(owners)?;
        let present: BTreeMap<String, String> = self
            .snapshot()?
            .into_iter()
            .filter(|p| desired.contains_key(&p.package_name))
            .map(|p| (p.package_name, p.owner_name.unwrap_or_default()))
            .collect();
        let plan = CollectionPlan::compute(&present, &BTreeMap::new());
        let ops = OwnerOps {
            tag: self.tag,
            wording: Wording::TagPackages,
        };
        plan.apply(self.session, &ops, self.dry_run)
    }
}

fn group_by_owner(packages: &BTreeMap<String, String>) -> BTreeMap<&str, Vec<&str>> {
    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (package, owner) in packages {
        grouped.entry(owner.as_str()).or_default().push(package.as_str());
    }
    grouped
}
