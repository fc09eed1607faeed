//! # Kojible - Declarative Koji hub configuration
//!
//! Kojible converges the configuration of a Koji build hub (tags, targets,
//! builder hosts, users, external repos, content generators) to a desired
//! state described in playbook-style task parameters. Every module is
//! idempotent: running it twice with the same parameters changes nothing
//! the second time.
//!
//! ## Core Concepts
//!
//! - **Sessions**: A [`KojiSession`](session::KojiSession) issues hub RPCs;
//!   [`MemoryHub`](session::MemoryHub) is a faithful in-memory stand-in
//! - **Reconcilers**: Compare the hub's current state against the desired
//!   state and issue only the calls needed to close the gap
//! - **Modules**: One per entity type, parameter parsing plus a reconciler
//! - **Check mode**: Every reconciler can describe its changes without
//!   making them, with the same messages and diffs as a real run
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    Module Registry (koji_* modules)                  │
//! │               parameter parsing, check mode, diff mode               │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Reconcilers                               │
//! │   inheritance · external repos · packages · groups · principals      │
//! │               (generic collection plan underneath)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    KojiSession (typed hub calls)                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kojible::prelude::*;
//!
//! let hub = Arc::new(MemoryHub::new());
//! let session: Arc<dyn KojiSession> = hub.clone();
//! let context = ModuleContext::new().with_profile("koji").with_session(session);
//!
//! let registry = ModuleRegistry::with_builtins();
//! let params: ModuleParams = serde_json::from_value(serde_json::json!({
//!     "name": "f40-build",
//!     "arches": "x86_64 aarch64",
//! }))
//! .unwrap();
//! let output = registry.execute("koji_tag", &params, &context).unwrap();
//! assert!(output.changed);
//! assert!(hub.tag("f40-build").is_some());
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, Result};

    // Hub sessions
    pub use crate::session::{KojiSession, MemoryHub, SessionExt};

    // Module system
    pub use crate::modules::{
        Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleRegistry,
        ModuleResult, SessionProvider,
    };

    // Reconciliation
    pub use crate::diff::TaskDiff;
    pub use crate::reconcile::{PermissionCache, ReconciliationResult};

    // Configuration
    pub use crate::config::Config;
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for Kojible operations.
pub mod error;

/// Layered configuration: files, then environment.
pub mod config;

/// `tracing` subscriber initialisation.
pub mod logging;

// ============================================================================
// Hub Access
// ============================================================================

/// The hub RPC interface, typed hub records and the in-memory hub.
pub mod session;

// ============================================================================
// Reconciliation
// ============================================================================

/// Before/after descriptions of changes.
pub mod diff;

/// Reconcilers shared by the entity modules.
pub mod reconcile;

/// Entity modules and the module registry.
///
/// # Available Modules
///
/// - `koji_tag`: tag settings, inheritance, external repos, packages, groups
/// - `koji_tag_inheritance`: a single inheritance link
/// - `koji_tag_packages`: add or remove packages without owning the list
/// - `koji_external_repo`: external repo records
/// - `koji_target`: build targets
/// - `koji_host`: builder hosts and their channels
/// - `koji_user`: users and their permissions
/// - `koji_cg`: content generator access
/// - `koji_archivetype`, `koji_btype`: hub-wide type tables
pub mod modules;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of Kojible.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
