//! Tag inheritance reconciliation.
//!
//! Two variants share the rule normalization and display code:
//!
//! - [`InheritanceReconciler::ensure`] treats a tag's whole parent list as
//!   one value and, when it differs, replaces it with a single
//!   `setInheritanceData(clear=True)` call.
//! - [`InheritanceReconciler::add_link`] and
//!   [`InheritanceReconciler::remove_link`] manage one parent link and leave
//!   the others alone.
//!
//! The hub allows at most one active link per parent and per priority. When
//! a single new link collides with an existing one on exactly one of those
//! keys (same parent at another priority, or another parent at the same
//! priority), the existing link is sent with the `delete link` marker ahead
//! of the new one in the same call. A link colliding on both keys is either
//! identical (nothing to do) or differs only in its flags, in which case the
//! hub overwrites it in place.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::de;
use super::{mutate, ReconciliationResult};
use crate::diff::TaskDiff;
use crate::error::{Error, Result};
use crate::session::{InheritanceRule, KojiSession, SessionExt};

/// Identifier substituted for a missing tag during a dry run.
pub const MISSING_TAG_ID: i64 = 0;

/// One desired parent of a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InheritanceSpec {
    /// Parent tag name
    pub parent: String,
    #[serde(deserialize_with = "de::int")]
    pub priority: i64,
    #[serde(default, deserialize_with = "de::opt_int")]
    pub maxdepth: Option<i64>,
    #[serde(default, deserialize_with = "de::string_or_null")]
    pub pkg_filter: String,
    #[serde(default)]
    pub intransitive: bool,
    #[serde(default)]
    pub noconfig: bool,
}

impl InheritanceSpec {
    pub fn new(parent: impl Into<String>, priority: i64) -> Self {
        Self {
            parent: parent.into(),
            priority,
            maxdepth: None,
            pkg_filter: String::new(),
            intransitive: false,
            noconfig: false,
        }
    }

    /// Check the package filter compiles as a regular expression.
    pub fn validate(&self) -> Result<()> {
        if !self.pkg_filter.is_empty() {
            Regex::new(&self.pkg_filter).map_err(|e| {
                Error::InvalidParameter(format!(
                    "pkg_filter for parent '{}' is not a valid regular expression: {e}",
                    self.parent
                ))
            })?;
        }
        if let Some(depth) = self.maxdepth {
            if depth < 0 {
                return Err(Error::InvalidParameter(format!(
                    "maxdepth for parent '{}' must not be negative",
                    self.parent
                )));
            }
        }
        Ok(())
    }

    /// The hub representation of this link.
    pub fn to_rule(&self, child_id: i64, parent_id: i64) -> InheritanceRule {
        InheritanceRule {
            child_id,
            parent_id,
            name: self.parent.clone(),
            priority: self.priority,
            maxdepth: self.maxdepth,
            pkg_filter: self.pkg_filter.clone(),
            intransitive: self.intransitive,
            noconfig: self.noconfig,
            delete_link: false,
        }
    }
}

/// Validate a whole desired parent list.
///
/// Priorities and parent names must both be unique.
pub fn validate_specs(specs: &[InheritanceSpec]) -> Result<()> {
    let mut priorities = BTreeSet::new();
    let mut parents = BTreeSet::new();
    for spec in specs {
        spec.validate()?;
        if !priorities.insert(spec.priority) {
            return Err(Error::DuplicatePriority {
                kind: "inheritance",
                priority: spec.priority,
            });
        }
        if !parents.insert(spec.parent.as_str()) {
            return Err(Error::DuplicateName {
                kind: "inheritance parent",
                name: spec.parent.clone(),
            });
        }
    }
    Ok(())
}

/// Describe a rule the way `koji taginfo` prints it.
///
/// The first line carries the priority, a four-column flag field and the
/// parent name; optional lines follow for the depth limit and filter.
pub fn describe_rule(rule: &InheritanceRule) -> Vec<String> {
    let flag = |set: bool, c: char| if set { c } else { '.' };
    let flags: String = [
        flag(rule.maxdepth.is_some(), 'M'),
        flag(!rule.pkg_filter.is_empty(), 'F'),
        flag(rule.intransitive, 'I'),
        flag(rule.noconfig, 'N'),
    ]
    .iter()
    .collect();
    let mut lines = vec![format!("{:4}   {} {}", rule.priority, flags, rule.name)];
    if let Some(depth) = rule.maxdepth {
        lines.push(format!("    maxdepth: {depth}"));
    }
    if !rule.pkg_filter.is_empty() {
        lines.push(format!("    package filter: {}", rule.pkg_filter));
    }
    lines
}

pub fn describe_rules(rules: &[InheritanceRule]) -> Vec<String> {
    rules.iter().flat_map(describe_rule).collect()
}

/// Reconciler for tag inheritance.
pub struct InheritanceReconciler<'a> {
    session: &'a dyn KojiSession,
    dry_run: bool,
}

impl<'a> InheritanceReconciler<'a> {
    pub fn new(session: &'a dyn KojiSession, dry_run: bool) -> Self {
        Self { session, dry_run }
    }

    /// Look up a tag id, downgrading a missing tag to a note plus
    /// [`MISSING_TAG_ID`] during a dry run.
    fn resolve_tag(
        &self,
        kind: &'static str,
        name: &str,
        result: &mut ReconciliationResult,
    ) -> Result<i64> {
        match self.session.get_tag(name)? {
            Some(tag) => Ok(tag.id),
            None if self.dry_run => {
                let err = Error::not_found(kind, name);
                warn!("{err}, continuing check mode preview");
                result.note(err.to_string());
                Ok(MISSING_TAG_ID)
            }
            None => Err(Error::not_found(kind, name)),
        }
    }

    fn current_rules(&self, child_id: i64) -> Result<Vec<InheritanceRule>> {
        if child_id == MISSING_TAG_ID {
            return Ok(Vec::new());
        }
        let mut rules = self.session.get_inheritance_data(child_id)?;
        rules.sort_by_key(|r| r.priority);
        Ok(rules)
    }

    /// Make the desired list the complete parent list of `tag`.
    pub fn ensure(
        &self,
        tag: &str,
        child_id: i64,
        desired: &[InheritanceSpec],
    ) -> Result<ReconciliationResult> {
        validate_specs(desired)?;
        let mut result = ReconciliationResult::new();

        let mut specs: Vec<&InheritanceSpec> = desired.iter().collect();
        specs.sort_by_key(|s| s.priority);
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            let parent_id = self.resolve_tag("parent tag", &spec.parent, &mut result)?;
            rules.push(spec.to_rule(child_id, parent_id));
        }

        let current = self.current_rules(child_id)?;
        self.reconcile(tag, rules, &current, result)
    }

    /// Compare resolved `rules` against `current` and replace the whole list
    /// if they differ.
    pub fn reconcile(
        &self,
        tag: &str,
        rules: Vec<InheritanceRule>,
        current: &[InheritanceRule],
        mut result: ReconciliationResult,
    ) -> Result<ReconciliationResult> {
        if current == rules.as_slice() {
            debug!(tag, "inheritance already up to date");
            return Ok(result);
        }

        let before = describe_rules(current);
        let after = describe_rules(&rules);
        result.change("current inheritance:");
        result.messages.extend(before.iter().cloned());
        result.messages.push("new inheritance:".to_string());
        result.messages.extend(after.iter().cloned());
        result.diff = Some(TaskDiff::section("inheritance", json!(before), json!(after)));

        mutate(
            self.session,
            self.dry_run,
            &format!("replace inheritance of {tag}"),
            |s| s.set_inheritance_data(tag, &rules, true),
        )?;
        Ok(result)
    }

    /// Ensure a single link from `child` to `spec.parent` exists.
    pub fn add_link(&self, child: &str, spec: &InheritanceSpec) -> Result<ReconciliationResult> {
        spec.validate()?;
        let mut result = ReconciliationResult::new();
        let child_id = self.resolve_tag("child tag", child, &mut result)?;
        let parent_id = self.resolve_tag("parent tag", &spec.parent, &mut result)?;
        let current = self.current_rules(child_id)?;

        let new_rule = spec.to_rule(child_id, parent_id);
        if current.contains(&new_rule) {
            return Ok(result);
        }

        let mut deletions = Vec::new();
        for rule in &current {
            let same_name = rule.name == new_rule.name;
            let same_priority = rule.priority == new_rule.priority;
            if same_name != same_priority {
                result.note("dissimilar rules:");
                result
                    .messages
                    .extend(describe_rule(rule).into_iter().map(|l| format!(" -{l}")));
                result
                    .messages
                    .extend(describe_rule(&new_rule).into_iter().map(|l| format!(" +{l}")));
                deletions.push(rule.marked_for_deletion());
            }
        }

        if !deletions.is_empty() {
            result.note("remove inheritance link:");
            result.messages.extend(describe_rules(&deletions));
        }
        result.change("add inheritance link:");
        result.messages.extend(describe_rule(&new_rule));

        let mut projected: Vec<InheritanceRule> = current
            .iter()
            .filter(|r| {
                !deletions.iter().any(|d| d.parent_id == r.parent_id)
                    && !(r.name == new_rule.name && r.priority == new_rule.priority)
            })
            .cloned()
            .collect();
        projected.push(new_rule.clone());
        projected.sort_by_key(|r| r.priority);
        result.diff = Some(TaskDiff::section(
            "inheritance",
            json!(describe_rules(&current)),
            json!(describe_rules(&projected)),
        ));

        let mut payload = deletions;
        payload.push(new_rule);
        mutate(
            self.session,
            self.dry_run,
            &format!("add inheritance link {} -> {}", child, spec.parent),
            |s| s.set_inheritance_data(child, &payload, false),
        )?;
        Ok(result)
    }

    /// Ensure no link from `child` matching `parent` and/or `priority`
    /// exists.
    ///
    /// With both given, a link must match both to be removed.
    pub fn remove_link(
        &self,
        child: &str,
        parent: Option<&str>,
        priority: Option<i64>,
    ) -> Result<ReconciliationResult> {
        if parent.is_none() && priority.is_none() {
            return Err(Error::MissingParameter(
                "parent_tag or priority is required to remove an inheritance link".to_string(),
            ));
        }
        let mut result = ReconciliationResult::new();
        let Some(child_tag) = self.session.get_tag(child)? else {
            debug!(child, "child tag absent, no inheritance to remove");
            return Ok(result);
        };
        let current = self.current_rules(child_tag.id)?;

        let found = current.iter().find(|rule| {
            parent.map_or(true, |p| rule.name == p) && priority.map_or(true, |p| rule.priority == p)
        });
        let Some(found) = found else {
            return Ok(result);
        };

        let deletion = found.marked_for_deletion();
        result.change("remove inheritance link:");
        result.messages.extend(describe_rule(&deletion));

        let remaining: Vec<InheritanceRule> = current
            .iter()
            .filter(|r| r.parent_id != found.parent_id)
            .cloned()
            .collect();
        result.diff = Some(TaskDiff::section(
            "inheritance",
            json!(describe_rules(&current)),
            json!(describe_rules(&remaining)),
        ));

        mutate(
            self.session,
            self.dry_run,
            &format!("remove inheritance link {} -> {}", child, found.name),
            |s| s.set_inheritance_data(child, &[deletion], false),
        )?;
        Ok(result)
    }
}
