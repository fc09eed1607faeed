//! End-to-end tests for the `koji_tag` module.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;

use kojible::error::Error;
use kojible::modules::{ModuleError, ModuleRegistry};
use kojible::session::{InheritanceRule, MergeMode};

#[test]
fn test_single_parent_inheritance() {
    let hub = hub_with_tags(&["base", "child"]);
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({
        "name": "child",
        "inheritance": [{"parent": "base", "priority": 0}],
    }));

    assert_idempotent(&registry, "koji_tag", &p, &context(&hub));

    let child = hub.tag("child").unwrap();
    let base = hub.tag("base").unwrap();
    assert_eq!(
        hub.inheritance("child"),
        vec![InheritanceRule {
            child_id: child.id,
            parent_id: base.id,
            name: "base".to_string(),
            priority: 0,
            maxdepth: None,
            pkg_filter: String::new(),
            intransitive: false,
            noconfig: false,
            delete_link: false,
        }]
    );
}

#[test]
fn test_owner_change_is_one_call() {
    let hub = hub_with_tags(&["f40"]);
    hub.seed_package("f40", "pkgA", "bob", false).unwrap();
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({"name": "f40", "packages": {"alice": ["pkgA"]}}));

    hub.clear_calls();
    let output = registry.execute("koji_tag", &p, &context(&hub)).unwrap();
    assert!(output.changed);
    assert_eq!(hub.mutating_methods(), vec!["packageListSetOwner"]);

    let packages = hub.packages("f40");
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].owner_name.as_deref(), Some("alice"));
}

#[test]
fn test_inherited_group_rows_are_kept() {
    let hub = hub_with_tags(&["base", "child"]);
    hub.seed_group_package("child", "build", "gcc", "base").unwrap();
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({"name": "child", "groups": {"build": ["bash"]}}));

    hub.clear_calls();
    let output = registry.execute("koji_tag", &p, &context(&hub)).unwrap();
    assert!(output.changed);
    assert_eq!(hub.mutating_methods(), vec!["groupPackageListAdd"]);
    assert!(output
        .stdout_lines
        .contains(&"added pkg bash to group build".to_string()));

    let packages: Vec<String> = hub.groups("child")[0]
        .packagelist
        .iter()
        .map(|p| p.package.clone())
        .collect();
    assert!(packages.contains(&"gcc".to_string()));
    assert!(packages.contains(&"bash".to_string()));
}

#[test]
fn test_duplicate_repo_priority_is_rejected() {
    let hub = hub_with_tags(&["f40"]);
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({
        "name": "f40",
        "external_repos": [
            {"repo": "centos-base", "priority": 10},
            {"repo": "epel", "priority": 10},
        ],
    }));

    hub.clear_calls();
    let err = registry.execute("koji_tag", &p, &context(&hub)).unwrap_err();
    assert!(matches!(
        err,
        ModuleError::Koji(Error::DuplicatePriority { .. })
    ));
    assert!(hub.calls().is_empty());
}

#[test]
fn test_full_tag_creation() {
    let hub = hub_with_tags(&["f40-base"]);
    hub.seed_external_repo("epel", "https://mirror.example.com/epel/$arch/")
        .unwrap();
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({
        "name": "f40-build",
        "arches": "x86_64 aarch64",
        "locked": false,
        "inheritance": [{"parent": "f40-base", "priority": 0}],
        "external_repos": [{"repo": "epel", "priority": 5, "merge_mode": "simple"}],
        "packages": {"releng": ["bash", "coreutils"]},
        "groups": {"build": ["bash", "coreutils"], "srpm-build": ["rpm-build"]},
    }));
    let ctx = context(&hub);

    let (preview, applied) = assert_preview_matches(&registry, &hub, "koji_tag", &p, &ctx);
    assert!(preview.changed);
    assert_eq!(preview.stdout_lines[0], "would create tag f40-build");
    assert!(applied.stdout_lines[0].starts_with("created tag id "));

    let tag = hub.tag("f40-build").unwrap();
    assert_eq!(tag.arches.as_deref(), Some("x86_64 aarch64"));
    assert_eq!(hub.inheritance("f40-build").len(), 1);
    let repos = hub.tag_repos("f40-build");
    assert_eq!(repos.len(), 1);
    assert_eq!(repos[0].merge_mode, Some(MergeMode::Simple));
    assert_eq!(hub.packages("f40-build").len(), 2);
    assert_eq!(hub.groups("f40-build").len(), 2);

    let again = registry.execute("koji_tag", &p, &ctx).unwrap();
    assert!(!again.changed, "{:?}", again.stdout_lines);
}

#[test]
fn test_tag_absent() {
    let hub = hub_with_tags(&["scratch"]);
    let registry = ModuleRegistry::with_builtins();
    let p = params(json!({"name": "scratch", "state": "absent"}));

    assert_idempotent(&registry, "koji_tag", &p, &context(&hub));
    assert!(hub.tag("scratch").is_none());
}
