//! Reconciliation core.
//!
//! Each reconciler compares a desired state against what the hub reports,
//! then issues the smallest set of mutating calls that converges the two.
//! All of them share the same contract:
//!
//! - configuration mistakes are rejected before any remote call
//! - in dry-run mode no mutating call is issued, but every message and diff
//!   is produced exactly as a real run would produce it
//! - a second run against the converged hub reports no change
//!
//! The submodules hold one reconciler each; [`collection`] is the generic
//! add/remove/update engine the list-shaped ones are built on.

pub mod collection;
pub mod de;
pub mod external_repos;
pub mod groups;
pub mod inheritance;
pub mod packages;
pub mod perms;
pub mod principals;

pub use collection::{CollectionOps, CollectionPlan};
pub use perms::PermissionCache;

use tracing::info;

use crate::diff::TaskDiff;
use crate::error::Result;
use crate::session::{ensure_logged_in, KojiSession};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationResult {
    /// Whether anything changed (or would change, in dry-run mode)
    pub changed: bool,
    /// Human-readable lines, in the order the changes were made
    pub messages: Vec<String>,
    /// Structured before/after description
    pub diff: Option<TaskDiff>,
}

impl ReconciliationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change.
    pub fn change(&mut self, message: impl Into<String>) {
        self.changed = true;
        self.messages.push(message.into());
    }

    /// Record a line that does not by itself mean something changed.
    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    /// Fold a sub-reconciler's result into this one.
    ///
    /// The sub-result's diff, if any, is merged under the entity frame
    /// `kind`/`name`.
    pub fn absorb(&mut self, kind: &str, name: &str, other: ReconciliationResult) {
        self.changed |= other.changed;
        self.messages.extend(other.messages);
        if let Some(diff) = other.diff {
            if other.changed {
                TaskDiff::combine(&mut self.diff, kind, name, diff);
            }
        }
    }
}

/// Issue one mutating call unless in dry-run mode.
///
/// Logs in lazily, so a pass that changes nothing never authenticates.
pub fn mutate<F>(session: &dyn KojiSession, dry_run: bool, action: &str, call: F) -> Result<()>
where
    F: FnOnce(&dyn KojiSession) -> Result<()>,
{
    if dry_run {
        info!(check_mode = true, "Would {action}");
        return Ok(());
    }
    ensure_logged_in(session)?;
    info!("{action}");
    call(session)
}
