//! Permission name/id lookups.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::{KojiSession, SessionExt};

/// Read-through cache of the hub's permission table.
///
/// Filled from `getAllPerms` on first use and kept until [`reset`] is
/// called. Shared between modules through the module context.
///
/// [`reset`]: PermissionCache::reset
#[derive(Debug, Default)]
pub struct PermissionCache {
    perms: RwLock<Option<BTreeMap<String, i64>>>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&self, session: &dyn KojiSession) -> Result<BTreeMap<String, i64>> {
        if let Some(perms) = self.perms.read().as_ref() {
            return Ok(perms.clone());
        }
        let perms: BTreeMap<String, i64> = session
            .get_all_perms()?
            .into_iter()
            .map(|p| (p.name, p.id))
            .collect();
        debug!(count = perms.len(), "Loaded permission table");
        *self.perms.write() = Some(perms.clone());
        Ok(perms)
    }

    /// ID of the permission called `name`.
    pub fn id_of(&self, session: &dyn KojiSession, name: &str) -> Result<i64> {
        self.load(session)?
            .get(name)
            .copied()
            .ok_or_else(|| Error::not_found("permission", name))
    }

    /// Name of the permission with ID `id`, if any.
    pub fn name_of(&self, session: &dyn KojiSession, id: i64) -> Result<Option<String>> {
        Ok(self
            .load(session)?
            .into_iter()
            .find_map(|(name, perm_id)| (perm_id == id).then_some(name)))
    }

    /// Forget the cached table.
    pub fn reset(&self) {
        *self.perms.write() = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.perms.read().is_some()
    }
}
