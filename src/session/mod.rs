//! Hub session abstraction.
//!
//! Every reconciler talks to the build hub through the [`KojiSession`]
//! trait: a single `call(method, args)` capability plus login state. The
//! transport itself (XML-RPC, TLS, Kerberos) lives outside this crate; a
//! caller plugs in whatever client it has by implementing the trait.
//!
//! [`SessionExt`] layers typed wrappers over the raw calls so that
//! reconcilers work with [`TagInfo`], [`InheritanceRule`] and friends rather
//! than loose JSON. [`memory::MemoryHub`] is an in-memory implementation
//! with hub-like semantics, used by the test suite and for offline previews.

pub mod memory;

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::Result;

pub use memory::MemoryHub;

/// User status value for an active account.
pub const USER_STATUS_NORMAL: i64 = 0;
/// User status value for a blocked account.
pub const USER_STATUS_BLOCKED: i64 = 1;

// ============================================================================
// Call arguments
// ============================================================================

/// Arguments to a remote procedure: positional values followed by keyword
/// values, mirroring how the hub's API is invoked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Positional arguments in call order
    pub positional: Vec<Value>,
    /// Keyword arguments
    pub named: Map<String, Value>,
}

impl CallArgs {
    /// Create an empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Set a keyword argument.
    #[must_use]
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(key.into(), value.into());
        self
    }

    /// Merge a map of keyword arguments.
    #[must_use]
    pub fn kwargs(mut self, values: Map<String, Value>) -> Self {
        self.named.extend(values);
        self
    }

    /// Look up an argument by position, falling back to its keyword name.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional
            .get(index)
            .or_else(|| self.named.get(name))
            .filter(|v| !v.is_null())
    }
}

impl fmt::Display for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.positional.iter().map(Value::to_string).collect();
        parts.extend(self.named.iter().map(|(k, v)| format!("{k}={v}")));
        write!(f, "{}", parts.join(", "))
    }
}

// ============================================================================
// Session trait
// ============================================================================

/// A connection to a build hub.
///
/// Implementations must be usable from a shared reference; login state is
/// expected to live behind interior mutability.
pub trait KojiSession: Send + Sync {
    /// Invoke a named remote procedure.
    fn call(&self, method: &str, args: CallArgs) -> Result<Value>;

    /// Whether the session is authenticated.
    fn logged_in(&self) -> bool;

    /// Authenticate the session.
    fn login(&self) -> Result<()>;
}

/// Authenticate this session if it is not already.
///
/// Reads never need a login; every reconciler calls this right before its
/// first mutating call so that check mode stays anonymous.
pub fn ensure_logged_in(session: &(impl KojiSession + ?Sized)) -> Result<()> {
    if !session.logged_in() {
        info!("Logging in to hub");
        session.login()?;
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn decode_opt<T: DeserializeOwned>(value: Value) -> Result<Option<T>> {
    if value.is_null() {
        return Ok(None);
    }
    decode(value).map(Some)
}

// ============================================================================
// Hub records
// ============================================================================

/// A tag as returned by `getTag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagInfo {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub arches: Option<String>,
    /// Permission name required to edit the tag
    #[serde(default)]
    pub perm: Option<String>,
    #[serde(default)]
    pub perm_id: Option<i64>,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub maven_support: bool,
    #[serde(default)]
    pub maven_include_all: bool,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// One inheritance link of a child tag, in the hub's representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InheritanceRule {
    pub child_id: i64,
    pub parent_id: i64,
    /// Parent tag name
    pub name: String,
    pub priority: i64,
    #[serde(default)]
    pub maxdepth: Option<i64>,
    #[serde(default)]
    pub pkg_filter: String,
    #[serde(default)]
    pub intransitive: bool,
    #[serde(default)]
    pub noconfig: bool,
    /// Deletion marker understood by `setInheritanceData`
    #[serde(
        rename = "delete link",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub delete_link: bool,
}

impl InheritanceRule {
    /// Return a copy of this rule carrying the deletion marker.
    #[must_use]
    pub fn marked_for_deletion(&self) -> Self {
        Self {
            delete_link: true,
            ..self.clone()
        }
    }
}

/// Strategy the hub uses when merging an external repo into a buildroot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    Koji,
    Simple,
    Bare,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Koji => write!(f, "koji"),
            MergeMode::Simple => write!(f, "simple"),
            MergeMode::Bare => write!(f, "bare"),
        }
    }
}

/// An external repo attached to a tag, as returned by `getTagExternalRepos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagExternalRepo {
    pub external_repo_id: i64,
    pub external_repo_name: String,
    pub priority: i64,
    #[serde(default)]
    pub merge_mode: Option<MergeMode>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tag_id: Option<i64>,
}

/// An external repo definition, as returned by `getExternalRepo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRepoInfo {
    pub id: i64,
    pub name: String,
    pub url: String,
}

/// One row of a tag's package list, as returned by `listPackages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub package_name: String,
    /// Absent when listed with `with_owners=False`
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub blocked: bool,
    pub tag_id: i64,
    #[serde(default)]
    pub extra_arches: Option<String>,
}

/// A package row inside a comps group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupPackage {
    pub package: String,
    /// Tag that owns this row; differs from the queried tag for inherited rows
    pub tag_id: i64,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// A comps group of a tag, as returned by `getTagGroups`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagGroup {
    pub name: String,
    pub tag_id: i64,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub packagelist: Vec<GroupPackage>,
}

/// A builder host, as returned by `getHost`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub id: i64,
    pub name: String,
    /// Space-separated arch list
    pub arches: String,
    pub enabled: bool,
    #[serde(default)]
    pub capacity: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// A host channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
}

/// A user (person or host account), as returned by `getUser`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub status: i64,
    #[serde(default)]
    pub usertype: i64,
    #[serde(default)]
    pub krb_principals: Vec<String>,
}

/// A permission record from `getAllPerms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: i64,
    pub name: String,
}

/// A build target, as returned by `getBuildTarget`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub id: i64,
    pub name: String,
    pub build_tag: i64,
    pub build_tag_name: String,
    pub dest_tag: i64,
    pub dest_tag_name: String,
}

/// An archive type, as returned by `getArchiveType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveType {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub extensions: String,
}

/// A build type from `listBTypes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BType {
    pub id: i64,
    pub name: String,
}

/// A content generator, as returned in the `listCGs` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentGenerator {
    pub id: i64,
    #[serde(default)]
    pub users: Vec<String>,
}

// ============================================================================
// Typed calls
// ============================================================================

/// Typed wrappers over the hub API.
///
/// Lookups that the hub answers with `null` for a missing entity return
/// `Ok(None)`.
pub trait SessionExt: KojiSession {
    /// Invoke a method, logging it at debug level.
    fn invoke(&self, method: &str, args: CallArgs) -> Result<Value> {
        debug!(method, args = %args, "hub call");
        self.call(method, args)
    }

    fn get_tag(&self, tag: impl Into<Value>) -> Result<Option<TagInfo>> {
        decode_opt(self.invoke("getTag", CallArgs::new().arg(tag))?)
    }

    fn create_tag(&self, name: &str, options: Map<String, Value>) -> Result<i64> {
        decode(self.invoke(
            "createTag",
            CallArgs::new()
                .arg(name)
                .kwarg("parent", Value::Null)
                .kwargs(options),
        )?)
    }

    fn edit_tag(&self, name: &str, edits: Map<String, Value>) -> Result<()> {
        self.invoke("editTag2", CallArgs::new().arg(name).kwargs(edits))?;
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.invoke("deleteTag", CallArgs::new().arg(name))?;
        Ok(())
    }

    fn get_inheritance_data(&self, tag: impl Into<Value>) -> Result<Vec<InheritanceRule>> {
        decode(self.invoke("getInheritanceData", CallArgs::new().arg(tag))?)
    }

    fn set_inheritance_data(
        &self,
        tag: impl Into<Value>,
        rules: &[InheritanceRule],
        clear: bool,
    ) -> Result<()> {
        self.invoke(
            "setInheritanceData",
            CallArgs::new()
                .arg(tag)
                .arg(serde_json::to_value(rules)?)
                .kwarg("clear", clear),
        )?;
        Ok(())
    }

    fn get_tag_external_repos(&self, tag: impl Into<Value>) -> Result<Vec<TagExternalRepo>> {
        decode(self.invoke(
            "getTagExternalRepos",
            CallArgs::new().kwarg("tag_info", tag),
        )?)
    }

    fn add_external_repo_to_tag(
        &self,
        tag: &str,
        repo: &str,
        priority: i64,
        merge_mode: Option<MergeMode>,
    ) -> Result<()> {
        let mut args = CallArgs::new().arg(tag).arg(repo).arg(priority);
        if let Some(mode) = merge_mode {
            args = args.kwarg("merge_mode", mode.to_string());
        }
        self.invoke("addExternalRepoToTag", args)?;
        Ok(())
    }

    fn remove_external_repo_from_tag(&self, tag: &str, repo: &str) -> Result<()> {
        self.invoke(
            "removeExternalRepoFromTag",
            CallArgs::new().arg(tag).arg(repo),
        )?;
        Ok(())
    }

    fn get_external_repo(&self, name: &str) -> Result<Option<ExternalRepoInfo>> {
        decode_opt(self.invoke("getExternalRepo", CallArgs::new().arg(name))?)
    }

    fn create_external_repo(&self, name: &str, url: &str) -> Result<ExternalRepoInfo> {
        decode(self.invoke("createExternalRepo", CallArgs::new().arg(name).arg(url))?)
    }

    fn edit_external_repo(&self, id: i64, url: &str) -> Result<()> {
        self.invoke(
            "editExternalRepo",
            CallArgs::new().kwarg("info", id).kwarg("url", url),
        )?;
        Ok(())
    }

    fn delete_external_repo(&self, name: &str) -> Result<()> {
        self.invoke("deleteExternalRepo", CallArgs::new().arg(name))?;
        Ok(())
    }

    /// List a tag's direct package entries. `with_owners` is only sent when
    /// set, because older hubs reject the keyword.
    fn list_packages(&self, tag_id: i64, with_owners: Option<bool>) -> Result<Vec<PackageEntry>> {
        let mut args = CallArgs::new().kwarg("tagID", tag_id);
        if let Some(with_owners) = with_owners {
            args = args.kwarg("with_owners", with_owners);
        }
        decode(self.invoke("listPackages", args)?)
    }

    fn package_list_add(&self, tag: &str, package: &str, owner: &str) -> Result<()> {
        self.invoke(
            "packageListAdd",
            CallArgs::new().arg(tag).arg(package).arg(owner),
        )?;
        Ok(())
    }

    fn package_list_remove(&self, tag: &str, package: &str) -> Result<()> {
        self.invoke("packageListRemove", CallArgs::new().arg(tag).arg(package))?;
        Ok(())
    }

    fn package_list_set_owner(&self, tag: &str, package: &str, owner: &str) -> Result<()> {
        self.invoke(
            "packageListSetOwner",
            CallArgs::new().arg(tag).arg(package).arg(owner),
        )?;
        Ok(())
    }

    fn package_list_block(&self, tag: &str, package: &str) -> Result<()> {
        self.invoke("packageListBlock", CallArgs::new().arg(tag).arg(package))?;
        Ok(())
    }

    fn package_list_unblock(&self, tag: &str, package: &str) -> Result<()> {
        self.invoke("packageListUnblock", CallArgs::new().arg(tag).arg(package))?;
        Ok(())
    }

    fn get_tag_groups(&self, tag_id: i64, inherit: bool) -> Result<Vec<TagGroup>> {
        decode(self.invoke(
            "getTagGroups",
            CallArgs::new().arg(tag_id).kwarg("inherit", inherit),
        )?)
    }

    fn group_list_add(&self, tag_id: i64, group: &str) -> Result<()> {
        self.invoke("groupListAdd", CallArgs::new().arg(tag_id).arg(group))?;
        Ok(())
    }

    fn group_list_remove(&self, tag_id: i64, group: &str) -> Result<()> {
        self.invoke("groupListRemove", CallArgs::new().arg(tag_id).arg(group))?;
        Ok(())
    }

    fn group_package_list_add(&self, tag_id: i64, group: &str, package: &str) -> Result<()> {
        self.invoke(
            "groupPackageListAdd",
            CallArgs::new().arg(tag_id).arg(group).arg(package),
        )?;
        Ok(())
    }

    fn group_package_list_remove(&self, tag_id: i64, group: &str, package: &str) -> Result<()> {
        self.invoke(
            "groupPackageListRemove",
            CallArgs::new().arg(tag_id).arg(group).arg(package),
        )?;
        Ok(())
    }

    fn get_host(&self, host: impl Into<Value>) -> Result<Option<HostInfo>> {
        decode_opt(self.invoke("getHost", CallArgs::new().arg(host))?)
    }

    fn add_host(&self, name: &str, arches: &[String], krb_principal: Option<&str>) -> Result<i64> {
        decode(self.invoke(
            "addHost",
            CallArgs::new()
                .arg(name)
                .arg(arches.to_vec())
                .kwarg("krb_principal", krb_principal),
        )?)
    }

    fn edit_host(&self, name: &str, edits: Map<String, Value>) -> Result<()> {
        self.invoke("editHost", CallArgs::new().arg(name).kwargs(edits))?;
        Ok(())
    }

    fn enable_host(&self, name: &str) -> Result<()> {
        self.invoke("enableHost", CallArgs::new().arg(name))?;
        Ok(())
    }

    fn disable_host(&self, name: &str) -> Result<()> {
        self.invoke("disableHost", CallArgs::new().arg(name))?;
        Ok(())
    }

    fn list_channels(&self, host_id: i64) -> Result<Vec<Channel>> {
        decode(self.invoke("listChannels", CallArgs::new().kwarg("hostID", host_id))?)
    }

    fn add_host_to_channel(&self, host: &str, channel: &str, create: bool) -> Result<()> {
        self.invoke(
            "addHostToChannel",
            CallArgs::new().arg(host).arg(channel).kwarg("create", create),
        )?;
        Ok(())
    }

    fn remove_host_from_channel(&self, host: &str, channel: &str) -> Result<()> {
        self.invoke(
            "removeHostFromChannel",
            CallArgs::new().arg(host).arg(channel),
        )?;
        Ok(())
    }

    fn get_user(&self, user: impl Into<Value>) -> Result<Option<UserInfo>> {
        decode_opt(self.invoke(
            "getUser",
            CallArgs::new().arg(user).kwarg("krb_princs", true),
        )?)
    }

    fn create_user(&self, name: &str, status: i64, krb_principal: Option<&str>) -> Result<i64> {
        decode(self.invoke(
            "createUser",
            CallArgs::new()
                .arg(name)
                .kwarg("status", status)
                .kwarg("krb_principal", krb_principal),
        )?)
    }

    fn enable_user(&self, name: &str) -> Result<()> {
        self.invoke("enableUser", CallArgs::new().arg(name))?;
        Ok(())
    }

    fn disable_user(&self, name: &str) -> Result<()> {
        self.invoke("disableUser", CallArgs::new().arg(name))?;
        Ok(())
    }

    /// Apply Kerberos principal mappings; each entry is `(old, new)`.
    fn edit_user_principals(
        &self,
        user_id: i64,
        mappings: &[(Option<String>, Option<String>)],
    ) -> Result<()> {
        let mappings: Vec<Value> = mappings
            .iter()
            .map(|(old, new)| serde_json::json!({ "old": old, "new": new }))
            .collect();
        self.invoke(
            "editUser",
            CallArgs::new()
                .arg(user_id)
                .kwarg("krb_principal_mappings", mappings),
        )?;
        Ok(())
    }

    fn get_user_perms(&self, user_id: i64) -> Result<Vec<String>> {
        decode(self.invoke("getUserPerms", CallArgs::new().arg(user_id))?)
    }

    fn grant_permission(&self, user: &str, permission: &str, create: bool) -> Result<()> {
        self.invoke(
            "grantPermission",
            CallArgs::new()
                .arg(user)
                .arg(permission)
                .kwarg("create", create),
        )?;
        Ok(())
    }

    fn revoke_permission(&self, user: &str, permission: &str) -> Result<()> {
        self.invoke(
            "revokePermission",
            CallArgs::new().arg(user).arg(permission),
        )?;
        Ok(())
    }

    fn get_all_perms(&self) -> Result<Vec<Permission>> {
        decode(self.invoke("getAllPerms", CallArgs::new())?)
    }

    fn get_build_target(&self, name: &str) -> Result<Option<BuildTarget>> {
        decode_opt(self.invoke("getBuildTarget", CallArgs::new().arg(name))?)
    }

    fn create_build_target(&self, name: &str, build_tag: &str, dest_tag: &str) -> Result<()> {
        self.invoke(
            "createBuildTarget",
            CallArgs::new().arg(name).arg(build_tag).arg(dest_tag),
        )?;
        Ok(())
    }

    fn edit_build_target(&self, name: &str, build_tag: &str, dest_tag: &str) -> Result<()> {
        self.invoke(
            "editBuildTarget",
            CallArgs::new()
                .arg(name)
                .arg(name)
                .arg(build_tag)
                .arg(dest_tag),
        )?;
        Ok(())
    }

    fn delete_build_target(&self, id: i64) -> Result<()> {
        self.invoke("deleteBuildTarget", CallArgs::new().arg(id))?;
        Ok(())
    }

    fn get_archive_type(&self, name: &str) -> Result<Option<ArchiveType>> {
        decode_opt(self.invoke(
            "getArchiveType",
            CallArgs::new().kwarg("type_name", name),
        )?)
    }

    fn add_archive_type(&self, name: &str, description: &str, extensions: &str) -> Result<()> {
        self.invoke(
            "addArchiveType",
            CallArgs::new().arg(name).arg(description).arg(extensions),
        )?;
        Ok(())
    }

    fn list_btypes(&self) -> Result<Vec<BType>> {
        decode(self.invoke("listBTypes", CallArgs::new())?)
    }

    fn add_btype(&self, name: &str) -> Result<()> {
        self.invoke("addBType", CallArgs::new().arg(name))?;
        Ok(())
    }

    fn grant_cg_access(&self, user: &str, cg: &str, create: bool) -> Result<()> {
        self.invoke(
            "grantCGAccess",
            CallArgs::new().arg(user).arg(cg).kwarg("create", create),
        )?;
        Ok(())
    }

    fn revoke_cg_access(&self, user: &str, cg: &str) -> Result<()> {
        self.invoke("revokeCGAccess", CallArgs::new().arg(user).arg(cg))?;
        Ok(())
    }

    fn list_cgs(&self) -> Result<BTreeMap<String, ContentGenerator>> {
        decode(self.invoke("listCGs", CallArgs::new())?)
    }
}

impl<T: KojiSession + ?Sized> SessionExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_args_lookup() {
        let args = CallArgs::new()
            .arg("mytag")
            .kwarg("clear", true)
            .kwarg("missing", Value::Null);
        assert_eq!(args.get(0, "tag"), Some(&json!("mytag")));
        assert_eq!(args.get(1, "clear"), Some(&json!(true)));
        assert_eq!(args.get(2, "missing"), None);
        assert_eq!(args.to_string(), "\"mytag\", clear=true, missing=null");
    }

    #[test]
    fn test_inheritance_rule_delete_marker() {
        let rule: InheritanceRule = serde_json::from_value(json!({
            "child_id": 2,
            "parent_id": 1,
            "name": "base",
            "priority": 0,
            "maxdepth": null,
            "pkg_filter": "",
            "intransitive": false,
            "noconfig": false,
        }))
        .unwrap();
        assert!(!rule.delete_link);
        let plain = serde_json::to_value(&rule).unwrap();
        assert!(plain.get("delete link").is_none());

        let marked = serde_json::to_value(rule.marked_for_deletion()).unwrap();
        assert_eq!(marked["delete link"], json!(true));
    }

    #[test]
    fn test_merge_mode_serde() {
        let mode: MergeMode = serde_json::from_value(json!("simple")).unwrap();
        assert_eq!(mode, MergeMode::Simple);
        assert_eq!(MergeMode::Bare.to_string(), "bare");
    }
}
