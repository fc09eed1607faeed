//! Tests for single inheritance links managed by `koji_tag_inheritance`.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

use kojible::modules::{ModuleError, ModuleRegistry};
use kojible::session::InheritanceRule;

fn last_payload(hub: &kojible::session::MemoryHub) -> Vec<InheritanceRule> {
    let call = hub
        .mutating_calls()
        .into_iter()
        .rev()
        .find(|c| c.method == "setInheritanceData")
        .expect("setInheritanceData was called");
    assert_eq!(call.args.get(2, "clear"), Some(&json!(false)));
    serde_json::from_value(call.args.get(1, "data").unwrap().clone()).unwrap()
}

#[test]
fn test_new_priority_replaces_link_to_same_parent() {
    let hub = hub_with_tags(&["child", "p"]);
    hub.seed_inheritance("child", "p", 10).unwrap();
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({"child_tag": "child", "parent_tag": "p", "priority": 50}));

    hub.clear_calls();
    let output = registry
        .execute("koji_tag_inheritance", &p, &context(&hub))
        .unwrap();
    assert!(output.changed);

    let payload = last_payload(&hub);
    assert_eq!(payload.len(), 2);
    assert!(payload[0].delete_link);
    assert_eq!(payload[0].priority, 10);
    assert!(!payload[1].delete_link);
    assert_eq!(payload[1].priority, 50);

    let links = hub.inheritance("child");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].priority, 50);
}

#[test]
fn test_swap_removes_both_conflicting_links() {
    let hub = hub_with_tags(&["child", "c", "d"]);
    hub.seed_inheritance("child", "c", 10).unwrap();
    hub.seed_inheritance("child", "d", 20).unwrap();
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({"child_tag": "child", "parent_tag": "d", "priority": 10}));

    hub.clear_calls();
    let output = registry
        .execute("koji_tag_inheritance", &p, &context(&hub))
        .unwrap();
    assert!(output.changed);
    assert!(output.stdout_lines.contains(&"dissimilar rules:".to_string()));

    let payload = last_payload(&hub);
    let deleted: Vec<&str> = payload
        .iter()
        .filter(|r| r.delete_link)
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(deleted, vec!["c", "d"]);
    assert_eq!(payload.last().unwrap().name, "d");
    assert_eq!(payload.last().unwrap().priority, 10);

    let links = hub.inheritance("child");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].name, "d");
    assert_eq!(links[0].priority, 10);
}

#[test]
fn test_existing_link_is_unchanged() {
    let hub = hub_with_tags(&["child", "p"]);
    hub.seed_inheritance("child", "p", 10).unwrap();
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({"child_tag": "child", "parent_tag": "p", "priority": 10}));

    hub.clear_calls();
    let output = registry
        .execute("koji_tag_inheritance", &p, &context(&hub))
        .unwrap();
    assert!(!output.changed);
    assert!(hub.mutating_calls().is_empty());
}

#[test]
fn test_add_then_remove_link() {
    let hub = hub_with_tags(&["child", "p"]);
    let registry = ModuleRegistry::with_builtins();
    let ctx = context(&hub);

    let add = params(json!({"child_tag": "child", "parent_tag": "p", "priority": 0}));
    let (_, applied) = assert_preview_matches(&registry, &hub, "koji_tag_inheritance", &add, &ctx);
    assert!(applied.changed);
    assert_eq!(hub.inheritance("child").len(), 1);

    let remove = params(json!({"child_tag": "child", "parent_tag": "p", "state": "absent"}));
    assert_idempotent(&registry, "koji_tag_inheritance", &remove, &ctx);
    assert!(hub.inheritance("child").is_empty());
}

#[test]
fn test_missing_priority_for_present_link() {
    let hub = hub_with_tags(&["child", "p"]);
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({"child_tag": "child", "parent_tag": "p"}));

    let err = registry
        .execute("koji_tag_inheritance", &p, &context(&hub))
        .unwrap_err();
    assert!(matches!(err, ModuleError::MissingParameter(_)));
}
