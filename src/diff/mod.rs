//! Before/after reporting for reconciliation passes.
//!
//! Every reconciler describes what it changed (or would change) as a
//! [`TaskDiff`]: two ordered maps plus a header for each side. The headers
//! follow three framings:
//!
//! - creation: `Not present` / `New {kind} '{name}'`
//! - deletion: `{kind} '{name}'` / `Not present`
//! - modification: `Original {kind} '{name}'` / `Modified {kind} '{name}'`
//!
//! Diffs produced by sub-reconcilers for the same entity are merged with
//! [`TaskDiff::combine`], which shallow-updates both sides under namespaced
//! keys such as `inheritance` or `external_repos`.
//!
//! # Example
//!
//! ```rust
//! use kojible::diff::task_diff_data;
//! use serde_json::json;
//!
//! let before = json!({"id": 4, "name": "f40-candidate", "build_tag_name": "f40-build"});
//! let after = json!({"name": "f40-candidate", "build_tag_name": "f40-build-side"});
//! let diff = task_diff_data(Some(&before), Some(&after), "f40-candidate", "target").unwrap();
//!
//! assert_eq!(diff.before_header, "Original target 'f40-candidate'");
//! assert!(!diff.before.contains_key("id"));
//! ```

mod render;

pub use render::{render, DiffStats, RenderOptions};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Header used for the missing side of a creation or deletion.
pub const NOT_PRESENT: &str = "Not present";

/// A structured before/after description of one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskDiff {
    pub before: IndexMap<String, Value>,
    pub after: IndexMap<String, Value>,
    pub before_header: String,
    pub after_header: String,
}

impl TaskDiff {
    /// An empty modification frame for an entity.
    pub fn modification(kind: &str, name: &str) -> Self {
        let mut before = IndexMap::new();
        before.insert(kind.to_string(), Value::String(name.to_string()));
        Self {
            after: before.clone(),
            before,
            before_header: format!("Original {kind} '{name}'"),
            after_header: format!("Modified {kind} '{name}'"),
        }
    }

    /// A diff with one namespaced key on each side, as produced by a
    /// sub-reconciler.
    pub fn section(key: &str, before: Value, after: Value) -> Self {
        let mut diff = Self::default();
        diff.before.insert(key.to_string(), before);
        diff.after.insert(key.to_string(), after);
        diff
    }

    /// Whether the two sides differ.
    pub fn has_changes(&self) -> bool {
        self.before != self.after
    }

    /// Merge `other` into `target`, creating a modification frame for
    /// `kind`/`name` if `target` is still empty.
    ///
    /// Keys of `other` overwrite keys already present, on each side.
    pub fn combine(target: &mut Option<TaskDiff>, kind: &str, name: &str, other: TaskDiff) {
        let diff = target.get_or_insert_with(|| Self::modification(kind, name));
        diff.before.extend(other.before);
        diff.after.extend(other.after);
    }
}

fn to_map(value: &Value) -> IndexMap<String, Value> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Null => IndexMap::new(),
        other => {
            let mut map = IndexMap::new();
            map.insert("value".to_string(), other.clone());
            map
        }
    }
}

/// Build a diff for an entity of type `kind` named `name`.
///
/// `None` for `before` frames a creation, `None` for `after` a deletion.
/// The synthetic `id` key is dropped from `before` unless `after` carries it
/// too, so primary keys never show up as spurious changes.
pub fn task_diff_data<B, A>(
    before: Option<&B>,
    after: Option<&A>,
    name: &str,
    kind: &str,
) -> Result<TaskDiff>
where
    B: Serialize + ?Sized,
    A: Serialize + ?Sized,
{
    task_diff_data_with(before, after, name, kind, &[], &[])
}

/// Like [`task_diff_data`], with extra shaping of a modification diff.
///
/// Keys in `keys_to_copy` present in `before` but missing from `after` are
/// copied over; keys in `keys_to_omit` present only in `before` are dropped.
pub fn task_diff_data_with<B, A>(
    before: Option<&B>,
    after: Option<&A>,
    name: &str,
    kind: &str,
    keys_to_copy: &[&str],
    keys_to_omit: &[&str],
) -> Result<TaskDiff>
where
    B: Serialize + ?Sized,
    A: Serialize + ?Sized,
{
    let before = before.map(serde_json::to_value).transpose()?;
    let after = after.map(serde_json::to_value).transpose()?;

    let diff = match (before, after) {
        (None, after) => TaskDiff {
            before: IndexMap::new(),
            after: after.as_ref().map(to_map).unwrap_or_default(),
            before_header: NOT_PRESENT.to_string(),
            after_header: format!("New {kind} '{name}'"),
        },
        (Some(before), None) => TaskDiff {
            before: to_map(&before),
            after: IndexMap::new(),
            before_header: format!("{kind} '{name}'"),
            after_header: NOT_PRESENT.to_string(),
        },
        (Some(before), Some(after)) => {
            let mut before = to_map(&before);
            let mut after = to_map(&after);
            for key in keys_to_copy {
                if let Some(value) = before.get(*key) {
                    if !after.contains_key(*key) {
                        after.insert((*key).to_string(), value.clone());
                    }
                }
            }
            for key in keys_to_omit.iter().copied().chain(std::iter::once("id")) {
                if !after.contains_key(key) {
                    before.shift_remove(key);
                }
            }
            TaskDiff {
                before,
                after,
                before_header: format!("Original {kind} '{name}'"),
                after_header: format!("Modified {kind} '{name}'"),
            }
        }
    };
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_creation_framing() {
        let after = json!({"name": "f40"});
        let diff = task_diff_data(None::<&Value>, Some(&after), "f40", "tag").unwrap();
        assert_eq!(diff.before_header, "Not present");
        assert_eq!(diff.after_header, "New tag 'f40'");
        assert!(diff.before.is_empty());
        assert_eq!(diff.after["name"], json!("f40"));
    }

    #[test]
    fn test_deletion_framing() {
        let before = json!({"id": 3, "name": "f40"});
        let diff = task_diff_data(Some(&before), None::<&Value>, "f40", "target").unwrap();
        assert_eq!(diff.before_header, "target 'f40'");
        assert_eq!(diff.after_header, "Not present");
        assert!(diff.after.is_empty());
        // deletions keep the full record
        assert_eq!(diff.before["id"], json!(3));
    }

    #[test]
    fn test_modification_strips_id() {
        let before = json!({"id": 3, "name": "t", "build_tag_name": "a"});
        let after = json!({"name": "t", "build_tag_name": "a"});
        let diff = task_diff_data(Some(&before), Some(&after), "t", "target").unwrap();
        assert!(!diff.before.contains_key("id"));
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_copy_and_omit() {
        let before = json!({"name": "h", "arches": "x86_64", "comment": "old", "ready": true});
        let after = json!({"name": "h", "comment": "new"});
        let diff = task_diff_data_with(
            Some(&before),
            Some(&after),
            "h",
            "host",
            &["arches"],
            &["ready"],
        )
        .unwrap();
        assert_eq!(diff.after["arches"], json!("x86_64"));
        assert!(!diff.before.contains_key("ready"));
        assert!(diff.has_changes());
    }

    #[test]
    fn test_combine_namespaces() {
        let mut combined = None;
        TaskDiff::combine(
            &mut combined,
            "tag",
            "f40-build",
            TaskDiff::section("inheritance", json!([]), json!(["   0   .... base"])),
        );
        TaskDiff::combine(
            &mut combined,
            "tag",
            "f40-build",
            TaskDiff::section("packages", json!({}), json!({"alice": ["bash"]})),
        );
        let diff = combined.unwrap();
        assert_eq!(diff.before_header, "Original tag 'f40-build'");
        assert_eq!(diff.before["tag"], json!("f40-build"));
        let keys: Vec<&String> = diff.after.keys().collect();
        assert_eq!(keys, vec!["tag", "inheritance", "packages"]);
    }
}
