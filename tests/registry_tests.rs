//! Tests for module lookup, parameter checks and session resolution.

mod common;

use std::sync::Arc;

use common::*;
use serde_json::json;
use serial_test::serial;

use kojible::modules::{ModuleContext, ModuleError, ModuleRegistry, ModuleResult, SessionProvider};
use kojible::session::KojiSession;

#[test]
fn test_builtin_names() {
    let registry = ModuleRegistry::with_builtins();
    assert_eq!(
        registry.names(),
        vec![
            "koji_archivetype",
            "koji_btype",
            "koji_cg",
            "koji_external_repo",
            "koji_host",
            "koji_tag",
            "koji_tag_inheritance",
            "koji_tag_packages",
            "koji_target",
            "koji_user",
        ]
    );
}

#[test]
fn test_unknown_module() {
    let hub = hub_with_tags(&[]);
    let registry = ModuleRegistry::with_builtins();
    let err = registry
        .execute("koji_channel", &params(json!({"name": "x"})), &context(&hub))
        .unwrap_err();
    assert!(matches!(err, ModuleError::NotFound(name) if name == "koji_channel"));
}

#[test]
fn test_missing_required_params() {
    let hub = hub_with_tags(&[]);
    let registry = ModuleRegistry::with_builtins();
    let ctx = context(&hub);

    let err = registry
        .execute("koji_target", &params(json!({"build_tag": "a"})), &ctx)
        .unwrap_err();
    assert!(matches!(err, ModuleError::MissingParameter(p) if p == "name"));

    let err = registry
        .execute("koji_cg", &params(json!({"name": "debian", "user": "a"})), &ctx)
        .unwrap_err();
    assert!(matches!(err, ModuleError::MissingParameter(p) if p == "state"));
    assert!(hub.calls().is_empty());
}

#[test]
fn test_unknown_parameter_rejected() {
    let hub = hub_with_tags(&[]);
    let registry = ModuleRegistry::with_builtins();
    let err = registry
        .execute(
            "koji_tag",
            &params(json!({"name": "f40", "colour": "red"})),
            &context(&hub),
        )
        .unwrap_err();
    assert!(matches!(err, ModuleError::InvalidParameter(_)));
}

#[test]
#[serial]
fn test_missing_profile() {
    std::env::remove_var("KOJI_PROFILE");
    let hub = hub_with_tags(&[]);
    let session: Arc<dyn KojiSession> = hub.clone();
    let ctx = ModuleContext::new().with_session(session);
    let registry = ModuleRegistry::with_builtins();

    let err = registry
        .execute("koji_btype", &params(json!({"name": "debian"})), &ctx)
        .unwrap_err();
    match err {
        ModuleError::MissingParameter(msg) => {
            assert!(msg.contains("\"koji\""), "{msg}");
            assert!(msg.contains("KOJI_PROFILE"), "{msg}");
        }
        other => panic!("expected a missing profile, got {other:?}"),
    }
    assert!(hub.calls().is_empty());
}

#[test]
#[serial]
fn test_profile_from_environment() {
    std::env::set_var("KOJI_PROFILE", "stg");
    let hub = hub_with_tags(&[]);
    let session: Arc<dyn KojiSession> = hub.clone();
    let ctx = ModuleContext::new().with_session(session);
    let registry = ModuleRegistry::with_builtins();

    let output = registry
        .execute("koji_btype", &params(json!({"name": "debian"})), &ctx)
        .unwrap();
    assert!(output.changed);
    std::env::remove_var("KOJI_PROFILE");
}

/// Serves one hub under one profile name.
struct OneProfile {
    profile: &'static str,
    hub: Arc<kojible::session::MemoryHub>,
}

impl SessionProvider for OneProfile {
    fn session(&self, profile: &str) -> ModuleResult<Arc<dyn KojiSession>> {
        if profile == self.profile {
            let session: Arc<dyn KojiSession> = self.hub.clone();
            Ok(session)
        } else {
            Err(ModuleError::NoSession(profile.to_string()))
        }
    }
}

#[test]
fn test_task_profile_selects_session() {
    let hub = hub_with_tags(&["f40-build", "f40-dest"]);
    hub.seed_user("releng").unwrap();
    let provider = Arc::new(OneProfile { profile: "stg", hub: hub.clone() });
    let ctx = ModuleContext::new()
        .with_profile("koji")
        .with_session_provider(provider);
    let registry = ModuleRegistry::with_builtins();

    let cases = [
        ("koji_tag", json!({"name": "f40-side"})),
        (
            "koji_tag_inheritance",
            json!({"child_tag": "f40-dest", "parent_tag": "f40-build", "priority": 0}),
        ),
        ("koji_tag_packages", json!({"tag": "f40-build", "packages": {"releng": ["bash"]}})),
        ("koji_external_repo", json!({"name": "epel", "url": "https://mirror.example.com/epel/"})),
        ("koji_target", json!({"name": "f40", "build_tag": "f40-build", "dest_tag": "f40-dest"})),
    ];

    for (module, value) in cases {
        let err = registry.execute(module, &params(value.clone()), &ctx).unwrap_err();
        assert!(
            matches!(&err, ModuleError::NoSession(p) if p == "koji"),
            "{module}: {err:?}"
        );

        let mut with_profile = value;
        with_profile["koji"] = json!("stg");
        let output = registry.execute(module, &params(with_profile), &ctx).unwrap();
        assert!(output.changed, "{module} should change the stg hub");
    }
}

#[test]
fn test_no_session_provider() {
    let registry = ModuleRegistry::with_builtins();
    let ctx = ModuleContext::new().with_profile("koji");
    let err = registry
        .execute("koji_btype", &params(json!({"name": "debian"})), &ctx)
        .unwrap_err();
    assert!(matches!(err, ModuleError::NoSession(p) if p == "koji"));
}

#[test]
fn test_check_mode_through_registry() {
    let hub = hub_with_tags(&["f40-build", "f40-dest"]);
    let registry = ModuleRegistry::with_builtins();
    let ctx = context(&hub).with_check_mode(true);
    let p = params(json!({"name": "f40", "build_tag": "f40-build", "dest_tag": "f40-dest"}));

    hub.clear_calls();
    let output = registry.execute("koji_target", &p, &ctx).unwrap();
    assert!(output.changed);
    assert!(hub.mutating_calls().is_empty());
    assert!(hub.target("f40").is_none());
}

#[test]
fn test_exit_codes() {
    let err = ModuleError::MissingParameter("name".to_string());
    assert_eq!(err.exit_code(), 4);
}
