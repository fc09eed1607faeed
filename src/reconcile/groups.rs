//! Comps groups of a tag.
//!
//! Groups are read with inheritance so that the preview shows the
//! buildroot as the hub resolves it. Rows (groups or group packages) whose
//! `tag_id` is another tag's come from a parent; they are treated as present
//! but never removed from the tag under edit.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use super::collection::{CollectionOps, CollectionPlan};
use super::{mutate, ReconciliationResult};
use crate::diff::TaskDiff;
use crate::error::Result;
use crate::session::{KojiSession, SessionExt, TagGroup};

/// Group name to package names.
pub type GroupMap = BTreeMap<String, Vec<String>>;

/// Whether a row is owned by the tag (`false`) or inherited (`true`).
type Inherited = bool;

struct GroupPackageOps<'a> {
    tag_id: i64,
    group: &'a str,
}

impl CollectionOps<String, Inherited> for GroupPackageOps<'_> {
    fn add_message(&self, package: &String, _: &Inherited) -> String {
        format!("added pkg {package} to group {}", self.group)
    }

    fn remove_message(&self, package: &String, _: &Inherited) -> String {
        format!("removed pkg {package} from group {}", self.group)
    }

    fn add(&self, session: &dyn KojiSession, package: &String, _: &Inherited) -> Result<()> {
        session.group_package_list_add(self.tag_id, self.group, package)
    }

    fn remove(&self, session: &dyn KojiSession, package: &String, _: &Inherited) -> Result<()> {
        session.group_package_list_remove(self.tag_id, self.group, package)
    }
}

fn describe(groups: &BTreeMap<String, BTreeSet<String>>) -> serde_json::Value {
    json!(groups)
}

/// Converge the comps groups of tag `tag_id` to `desired`.
///
/// `tag_id` is `None` for a tag that is only being created in a dry run.
pub fn ensure_groups(
    session: &dyn KojiSession,
    tag_id: Option<i64>,
    desired: &GroupMap,
    dry_run: bool,
) -> Result<ReconciliationResult> {
    let current: Vec<TagGroup> = match tag_id {
        Some(id) => session.get_tag_groups(id, true)?,
        None => Vec::new(),
    };
    let id = tag_id.unwrap_or_default();
    let mut result = ReconciliationResult::new();

    let mut before: BTreeMap<String, BTreeSet<String>> = current
        .iter()
        .map(|g| {
            let packages = g.packagelist.iter().map(|p| p.package.clone()).collect();
            (g.name.clone(), packages)
        })
        .collect();
    let mut after = before.clone();

    for group in &current {
        if desired.contains_key(&group.name) || group.tag_id != id {
            continue;
        }
        let message = format!("removed group {}", group.name);
        mutate(session, dry_run, &message, |s| {
            s.group_list_remove(id, &group.name)
        })?;
        result.change(message);
        after.remove(&group.name);
    }

    for (name, packages) in desired {
        let existing = current.iter().find(|g| &g.name == name);
        if existing.is_none() {
            let message = format!("added group {name}");
            mutate(session, dry_run, &message, |s| s.group_list_add(id, name))?;
            result.change(message);
        }

        let rows: BTreeMap<String, Inherited> = existing
            .into_iter()
            .flat_map(|g| &g.packagelist)
            .map(|p| (p.package.clone(), p.tag_id != id))
            .collect();
        let wanted: BTreeMap<String, Inherited> =
            packages.iter().map(|p| (p.clone(), false)).collect();

        // only membership matters; ownership of a wanted row is not changed
        let plan = CollectionPlan::compute(&rows, &wanted).protect(|_, inherited| *inherited);
        let plan = CollectionPlan {
            to_update: Vec::new(),
            ..plan
        };
        let ops = GroupPackageOps {
            tag_id: id,
            group: name,
        };
        let changes = plan.apply(session, &ops, dry_run)?;
        result.changed |= changes.changed;
        result.messages.extend(changes.messages);
        after.insert(name.clone(), plan.projected(&rows).into_keys().collect());
    }

    if result.changed {
        // inherited-only groups stay out of the report
        before.retain(|name, _| {
            current
                .iter()
                .any(|g| &g.name == name && (g.tag_id == id || desired.contains_key(name)))
        });
        after.retain(|name, _| before.contains_key(name) || desired.contains_key(name));
        result.diff = Some(TaskDiff::section(
            "groups",
            describe(&before),
            describe(&after),
        ));
    }
    Ok(result)
}
