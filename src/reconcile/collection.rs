//! Generic add/remove/update reconciliation over keyed collections.
//!
//! A [`CollectionPlan`] is computed from two maps keyed by natural identity
//! (package name, channel name, permission name...). Keys only in the
//! desired map are added, keys only in the current map are removed, keys in
//! both with different values are updated. The plan is then applied through
//! a [`CollectionOps`] implementation that knows the hub calls and message
//! wording for one collection type.
//!
//! Operations run removals first, then additions, then updates, each in key
//! order, so message order is stable.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::session::KojiSession;

use super::{mutate, ReconciliationResult};

/// Hub calls and messages for one collection type.
pub trait CollectionOps<K, V> {
    fn add_message(&self, key: &K, value: &V) -> String;

    fn remove_message(&self, key: &K, value: &V) -> String;

    fn update_message(&self, key: &K, _current: &V, desired: &V) -> String {
        self.add_message(key, desired)
    }

    fn add(&self, session: &dyn KojiSession, key: &K, value: &V) -> Result<()>;

    fn remove(&self, session: &dyn KojiSession, key: &K, value: &V) -> Result<()>;

    /// Replace `current` with `desired`. Defaults to remove-then-add.
    fn update(&self, session: &dyn KojiSession, key: &K, current: &V, desired: &V) -> Result<()> {
        self.remove(session, key, current)?;
        self.add(session, key, desired)
    }
}

/// Planned changes to a keyed collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionPlan<K, V> {
    pub to_remove: Vec<(K, V)>,
    pub to_add: Vec<(K, V)>,
    /// `(key, current, desired)`
    pub to_update: Vec<(K, V, V)>,
}

impl<K, V> Default for CollectionPlan<K, V> {
    fn default() -> Self {
        Self {
            to_remove: Vec::new(),
            to_add: Vec::new(),
            to_update: Vec::new(),
        }
    }
}

impl<K: Ord + Clone, V: PartialEq + Clone> CollectionPlan<K, V> {
    /// Diff `current` against `desired`.
    pub fn compute(current: &BTreeMap<K, V>, desired: &BTreeMap<K, V>) -> Self {
        let mut plan = Self::default();
        for (key, value) in current {
            if !desired.contains_key(key) {
                plan.to_remove.push((key.clone(), value.clone()));
            }
        }
        for (key, value) in desired {
            match current.get(key) {
                None => plan.to_add.push((key.clone(), value.clone())),
                Some(existing) if existing != value => {
                    plan.to_update
                        .push((key.clone(), existing.clone(), value.clone()));
                }
                Some(_) => {}
            }
        }
        plan
    }

    /// Drop planned removals for which `keep` returns true.
    #[must_use]
    pub fn protect<F>(mut self, keep: F) -> Self
    where
        F: Fn(&K, &V) -> bool,
    {
        self.to_remove.retain(|(k, v)| !keep(k, v));
        self
    }

    /// Drop all planned removals.
    #[must_use]
    pub fn without_removals(mut self) -> Self {
        self.to_remove.clear();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty() && self.to_update.is_empty()
    }

    /// Apply the plan, or only describe it when `dry_run` is set.
    pub fn apply<O>(
        &self,
        session: &dyn KojiSession,
        ops: &O,
        dry_run: bool,
    ) -> Result<ReconciliationResult>
    where
        O: CollectionOps<K, V> + ?Sized,
    {
        let mut result = ReconciliationResult::new();
        for (key, value) in &self.to_remove {
            let message = ops.remove_message(key, value);
            mutate(session, dry_run, &message, |s| ops.remove(s, key, value))?;
            result.change(message);
        }
        for (key, value) in &self.to_add {
            let message = ops.add_message(key, value);
            mutate(session, dry_run, &message, |s| ops.add(s, key, value))?;
            result.change(message);
        }
        for (key, current, desired) in &self.to_update {
            let message = ops.update_message(key, current, desired);
            mutate(session, dry_run, &message, |s| {
                ops.update(s, key, current, desired)
            })?;
            result.change(message);
        }
        Ok(result)
    }

    /// The collection as it will look once the plan is applied.
    pub fn projected(&self, current: &BTreeMap<K, V>) -> BTreeMap<K, V> {
        let mut projected = current.clone();
        for (key, _) in &self.to_remove {
            projected.remove(key);
        }
        for (key, value) in &self.to_add {
            projected.insert(key.clone(), value.clone());
        }
        for (key, _, desired) in &self.to_update {
            projected.insert(key.clone(), desired.clone());
        }
        projected
    }
}

impl<K: Ord + Clone> CollectionPlan<K, ()> {
    /// Diff two plain sets; updates never occur.
    pub fn from_sets(current: &BTreeSet<K>, desired: &BTreeSet<K>) -> Self {
        let to_map = |set: &BTreeSet<K>| set.iter().map(|k| (k.clone(), ())).collect();
        Self::compute(&to_map(current), &to_map(desired))
    }
}
