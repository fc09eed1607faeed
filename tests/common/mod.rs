//! Shared test utilities and fixtures for the Kojible test suite.
//!
//! This module provides:
//! - Hub fixtures built on `MemoryHub`
//! - Module contexts wired to a fixture hub
//! - Parameter construction from JSON
//! - Idempotency and check-mode assertions
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::sync::Arc;

use kojible::modules::{ModuleContext, ModuleOutput, ModuleParams, ModuleRegistry};
use kojible::session::{KojiSession, MemoryHub};

// ============================================================================
// Fixtures
// ============================================================================

/// A hub holding the given tags.
pub fn hub_with_tags(tags: &[&str]) -> Arc<MemoryHub> {
    let hub = Arc::new(MemoryHub::new());
    for tag in tags {
        hub.seed_tag(tag).expect("seed tag");
    }
    hub
}

/// A context that runs every module against `hub`.
pub fn context(hub: &Arc<MemoryHub>) -> ModuleContext {
    let session: Arc<dyn KojiSession> = hub.clone();
    ModuleContext::new()
        .with_profile("koji")
        .with_diff_mode(true)
        .with_session(session)
}

/// Build module parameters from a JSON object.
pub fn params(value: serde_json::Value) -> ModuleParams {
    serde_json::from_value(value).expect("params must be a JSON object")
}

// ============================================================================
// Assertions
// ============================================================================

/// Run a module twice; the first run must change, the second must not.
pub fn assert_idempotent(
    registry: &ModuleRegistry,
    module: &str,
    params: &ModuleParams,
    context: &ModuleContext,
) -> ModuleOutput {
    let first = registry
        .execute(module, params, context)
        .expect("first execution should succeed");
    assert!(first.changed, "first run of {module} should change: {}", first.msg);

    let second = registry
        .execute(module, params, context)
        .expect("second execution should succeed");
    assert!(
        !second.changed,
        "second run of {module} should be idempotent, got {:?}",
        second.stdout_lines
    );
    first
}

/// Preview a module, then run it for real.
///
/// The preview must not mutate the hub and must report the same diff as the
/// real run. Returns `(preview, applied)`.
pub fn assert_preview_matches(
    registry: &ModuleRegistry,
    hub: &MemoryHub,
    module: &str,
    params: &ModuleParams,
    context: &ModuleContext,
) -> (ModuleOutput, ModuleOutput) {
    hub.clear_calls();
    let preview = registry
        .execute(module, params, &context.clone().with_check_mode(true))
        .expect("check mode run should succeed");
    assert!(
        hub.mutating_calls().is_empty(),
        "check mode issued {:?}",
        hub.mutating_methods()
    );

    let applied = registry
        .execute(module, params, context)
        .expect("real run should succeed");
    assert_eq!(preview.changed, applied.changed);
    assert_eq!(preview.diff, applied.diff);
    (preview, applied)
}
