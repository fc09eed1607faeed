//! In-memory hub.
//!
//! [`MemoryHub`] answers the subset of the hub API that the reconcilers use,
//! with the same constraints a real hub enforces: inheritance priorities and
//! parents must be unique per child, external repo priorities must be unique
//! per tag, mutating calls require a login, duplicate grants raise the same
//! conflict messages. Every call is recorded so tests can assert on exactly
//! what a reconciliation pass sent.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::trace;

use super::{
    ArchiveType, BType, BuildTarget, CallArgs, ContentGenerator, ExternalRepoInfo, GroupPackage,
    HostInfo, InheritanceRule, KojiSession, MergeMode, PackageEntry, TagExternalRepo, TagGroup,
    TagInfo, UserInfo, USER_STATUS_BLOCKED, USER_STATUS_NORMAL,
};
use crate::error::{Error, FaultKind, Result};

/// Methods that change hub state.
const MUTATING_METHODS: &[&str] = &[
    "createTag",
    "editTag2",
    "deleteTag",
    "setInheritanceData",
    "addExternalRepoToTag",
    "removeExternalRepoFromTag",
    "createExternalRepo",
    "editExternalRepo",
    "deleteExternalRepo",
    "packageListAdd",
    "packageListRemove",
    "packageListSetOwner",
    "packageListBlock",
    "packageListUnblock",
    "groupListAdd",
    "groupListRemove",
    "groupPackageListAdd",
    "groupPackageListRemove",
    "addHost",
    "editHost",
    "enableHost",
    "disableHost",
    "addHostToChannel",
    "removeHostFromChannel",
    "createUser",
    "enableUser",
    "disableUser",
    "editUser",
    "grantPermission",
    "revokePermission",
    "createBuildTarget",
    "editBuildTarget",
    "deleteBuildTarget",
    "addArchiveType",
    "addBType",
    "grantCGAccess",
    "revokeCGAccess",
];

/// Returns true if `method` changes hub state.
pub fn is_mutating(method: &str) -> bool {
    MUTATING_METHODS.contains(&method)
}

/// A call received by the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub args: CallArgs,
}

#[derive(Debug, Default)]
struct HubState {
    next_id: i64,
    tags: BTreeMap<String, TagInfo>,
    inheritance: BTreeMap<i64, Vec<InheritanceRule>>,
    external_repos: BTreeMap<String, ExternalRepoInfo>,
    tag_repos: BTreeMap<i64, Vec<TagExternalRepo>>,
    packages: BTreeMap<i64, Vec<PackageEntry>>,
    groups: BTreeMap<i64, Vec<TagGroup>>,
    hosts: BTreeMap<String, HostInfo>,
    channels: BTreeMap<String, i64>,
    host_channels: BTreeMap<i64, BTreeSet<String>>,
    users: BTreeMap<String, UserInfo>,
    user_perms: BTreeMap<i64, BTreeSet<String>>,
    perms: BTreeMap<String, i64>,
    targets: BTreeMap<String, BuildTarget>,
    archive_types: BTreeMap<String, ArchiveType>,
    btypes: BTreeMap<String, i64>,
    cgs: BTreeMap<String, ContentGenerator>,
    calls: Vec<RecordedCall>,
    logged_in: bool,
    logins: usize,
}

/// Behavior switches emulating older hub versions.
#[derive(Debug, Clone, Copy)]
struct HubQuirks {
    /// `listPackages` rejects the `with_owners` keyword
    legacy_list_packages: bool,
    /// `listCGs` is available
    list_cgs: bool,
}

/// An in-memory hub implementing [`KojiSession`].
#[derive(Debug)]
pub struct MemoryHub {
    state: Mutex<HubState>,
    quirks: HubQuirks,
    /// Account name the session logs in as
    user: String,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

fn fault(method: &str, kind: FaultKind, message: impl Into<String>) -> Error {
    Error::rpc(method, kind, message)
}

fn req<'a>(method: &str, args: &'a CallArgs, index: usize, name: &str) -> Result<&'a Value> {
    args.get(index, name).ok_or_else(|| {
        fault(
            method,
            FaultKind::Parameter,
            format!("{method}() missing required argument: '{name}'"),
        )
    })
}

fn req_str(method: &str, args: &CallArgs, index: usize, name: &str) -> Result<String> {
    match req(method, args, index, name)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(fault(
            method,
            FaultKind::Parameter,
            format!("{name} must be a string, not {other}"),
        )),
    }
}

fn req_i64(method: &str, args: &CallArgs, index: usize, name: &str) -> Result<i64> {
    req(method, args, index, name)?.as_i64().ok_or_else(|| {
        fault(
            method,
            FaultKind::Parameter,
            format!("{name} must be an integer"),
        )
    })
}

fn opt_str(args: &CallArgs, index: usize, name: &str) -> Option<String> {
    args.get(index, name)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn opt_bool(args: &CallArgs, index: usize, name: &str) -> bool {
    args.get(index, name)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn reject_unknown(method: &str, args: &CallArgs, allowed: &[&str]) -> Result<()> {
    match args.named.keys().find(|k| !allowed.contains(&k.as_str())) {
        Some(key) => Err(fault(
            method,
            FaultKind::Parameter,
            format!("{method}() got an unexpected keyword argument '{key}'"),
        )),
        None => Ok(()),
    }
}

impl HubState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn find_tag(&self, info: &Value) -> Option<TagInfo> {
        match info {
            Value::String(name) => self.tags.get(name).cloned(),
            Value::Number(n) => {
                let id = n.as_i64()?;
                self.tags.values().find(|t| t.id == id).cloned()
            }
            _ => None,
        }
    }

    fn tag(&self, method: &str, info: &Value) -> Result<TagInfo> {
        self.find_tag(info)
            .ok_or_else(|| fault(method, FaultKind::Generic, format!("No such tagInfo: {info}")))
    }

    fn find_user(&self, info: &Value) -> Option<UserInfo> {
        match info {
            Value::String(name) => self.users.get(name).cloned(),
            Value::Number(n) => {
                let id = n.as_i64()?;
                self.users.values().find(|u| u.id == id).cloned()
            }
            _ => None,
        }
    }

    fn user(&self, method: &str, info: &Value) -> Result<UserInfo> {
        self.find_user(info)
            .ok_or_else(|| fault(method, FaultKind::Generic, format!("No such user: {info}")))
    }

    fn find_host(&self, info: &Value) -> Option<HostInfo> {
        match info {
            Value::String(name) => self.hosts.get(name).cloned(),
            Value::Number(n) => {
                let id = n.as_i64()?;
                self.hosts.values().find(|h| h.id == id).cloned()
            }
            _ => None,
        }
    }

    fn host(&self, method: &str, info: &Value) -> Result<HostInfo> {
        self.find_host(info)
            .ok_or_else(|| fault(method, FaultKind::Generic, format!("No such host: {info}")))
    }

    fn resolve_perm(&self, method: &str, perm: &Value) -> Result<Option<(String, i64)>> {
        match perm {
            Value::Null => Ok(None),
            Value::String(name) => self
                .perms
                .get(name)
                .map(|id| Some((name.clone(), *id)))
                .ok_or_else(|| {
                    fault(method, FaultKind::Generic, format!("No such permission: {name}"))
                }),
            Value::Number(n) => {
                let id = n.as_i64().unwrap_or_default();
                self.perms
                    .iter()
                    .find(|(_, pid)| **pid == id)
                    .map(|(name, pid)| Some((name.clone(), *pid)))
                    .ok_or_else(|| {
                        fault(method, FaultKind::Generic, format!("No such permission: {id}"))
                    })
            }
            other => Err(fault(
                method,
                FaultKind::Parameter,
                format!("invalid permission: {other}"),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    fn create_tag(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        reject_unknown(
            method,
            args,
            &[
                "parent",
                "arches",
                "perm",
                "locked",
                "maven_support",
                "maven_include_all",
                "extra",
            ],
        )?;
        let name = req_str(method, args, 0, "name")?;
        if self.tags.contains_key(&name) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!("A tag with the name {name} already exists"),
            ));
        }
        let perm = self.resolve_perm(method, args.named.get("perm").unwrap_or(&Value::Null))?;
        let id = self.allocate_id();
        let extra = args
            .named
            .get("extra")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        self.tags.insert(
            name.clone(),
            TagInfo {
                id,
                name,
                arches: opt_str(args, usize::MAX, "arches"),
                perm: perm.as_ref().map(|(n, _)| n.clone()),
                perm_id: perm.map(|(_, i)| i),
                locked: opt_bool(args, usize::MAX, "locked"),
                maven_support: opt_bool(args, usize::MAX, "maven_support"),
                maven_include_all: opt_bool(args, usize::MAX, "maven_include_all"),
                extra,
            },
        );
        Ok(json!(id))
    }

    fn edit_tag(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        reject_unknown(
            method,
            args,
            &[
                "name",
                "arches",
                "perm",
                "locked",
                "maven_support",
                "maven_include_all",
                "extra",
                "remove_extra",
            ],
        )?;
        let current = self.tag(method, req(method, args, 0, "tagInfo")?)?;
        let mut tag = current.clone();
        for (key, value) in &args.named {
            match key.as_str() {
                "arches" => tag.arches = value.as_str().map(str::to_string),
                "perm" => {
                    let perm = self.resolve_perm(method, value)?;
                    tag.perm = perm.as_ref().map(|(n, _)| n.clone());
                    tag.perm_id = perm.map(|(_, i)| i);
                }
                "locked" => tag.locked = value.as_bool().unwrap_or(false),
                "maven_support" => tag.maven_support = value.as_bool().unwrap_or(false),
                "maven_include_all" => tag.maven_include_all = value.as_bool().unwrap_or(false),
                "extra" => {
                    if let Some(extra) = value.as_object() {
                        tag.extra.extend(extra.clone());
                    }
                }
                "remove_extra" => {
                    for key in value.as_array().into_iter().flatten() {
                        if let Some(key) = key.as_str() {
                            tag.extra.remove(key);
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(Value::String(new_name)) = args.named.get("name") {
            tag.name = new_name.clone();
        }
        self.tags.remove(&current.name);
        self.tags.insert(tag.name.clone(), tag);
        Ok(Value::Null)
    }

    fn delete_tag(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "tagInfo")?)?;
        self.tags.remove(&tag.name);
        self.inheritance.remove(&tag.id);
        self.tag_repos.remove(&tag.id);
        self.packages.remove(&tag.id);
        self.groups.remove(&tag.id);
        for rules in self.inheritance.values_mut() {
            rules.retain(|r| r.parent_id != tag.id);
        }
        Ok(Value::Null)
    }

    fn inheritance_data(&self, method: &str, args: &CallArgs) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "tag")?)?;
        let rules = self.inheritance.get(&tag.id).cloned().unwrap_or_default();
        Ok(serde_json::to_value(rules)?)
    }

    fn set_inheritance(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let child = self.tag(method, req(method, args, 0, "tag")?)?;
        let incoming: Vec<InheritanceRule> =
            serde_json::from_value(req(method, args, 1, "data")?.clone())?;
        let clear = opt_bool(args, 2, "clear");

        let mut links: BTreeMap<i64, InheritanceRule> = if clear {
            BTreeMap::new()
        } else {
            self.inheritance
                .get(&child.id)
                .into_iter()
                .flatten()
                .map(|r| (r.parent_id, r.clone()))
                .collect()
        };

        for rule in incoming {
            if rule.delete_link {
                links.remove(&rule.parent_id);
                continue;
            }
            let parent = self.tag(method, &json!(rule.parent_id))?;
            if parent.id == child.id {
                return Err(fault(
                    method,
                    FaultKind::Generic,
                    format!("Tag {} cannot inherit from itself", child.name),
                ));
            }
            links.insert(
                parent.id,
                InheritanceRule {
                    child_id: child.id,
                    name: parent.name,
                    delete_link: false,
                    ..rule
                },
            );
        }

        let mut priorities = BTreeSet::new();
        for link in links.values() {
            if !priorities.insert(link.priority) {
                return Err(fault(
                    method,
                    FaultKind::Conflict,
                    format!(
                        "Inheritance priorities must be unique (priority {} in tag {})",
                        link.priority, child.name
                    ),
                ));
            }
        }

        let mut rules: Vec<InheritanceRule> = links.into_values().collect();
        rules.sort_by_key(|r| r.priority);
        self.inheritance.insert(child.id, rules);
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // External repos
    // ------------------------------------------------------------------

    fn tag_external_repos(&self, method: &str, args: &CallArgs) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "tag_info")?)?;
        let mut repos = self.tag_repos.get(&tag.id).cloned().unwrap_or_default();
        repos.sort_by_key(|r| r.priority);
        Ok(serde_json::to_value(repos)?)
    }

    fn add_repo_to_tag(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "tag_info")?)?;
        let repo_name = req_str(method, args, 1, "repo_info")?;
        let priority = req_i64(method, args, 2, "priority")?;
        let merge_mode: MergeMode = match args.get(3, "merge_mode") {
            Some(mode) => serde_json::from_value(mode.clone()).map_err(|_| {
                fault(method, FaultKind::Generic, format!("No such merge mode: {mode}"))
            })?,
            None => MergeMode::Koji,
        };
        let repo = self.external_repos.get(&repo_name).cloned().ok_or_else(|| {
            fault(method, FaultKind::Generic, format!("No such repo: {repo_name}"))
        })?;
        let attached = self.tag_repos.entry(tag.id).or_default();
        if attached.iter().any(|r| r.external_repo_id == repo.id) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!(
                    "tag {} already associated with external repo {}",
                    tag.name, repo.name
                ),
            ));
        }
        if attached.iter().any(|r| r.priority == priority) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!(
                    "tag {} already associated with an external repo at priority {}",
                    tag.name, priority
                ),
            ));
        }
        attached.push(TagExternalRepo {
            external_repo_id: repo.id,
            external_repo_name: repo.name,
            priority,
            merge_mode: Some(merge_mode),
            url: Some(repo.url),
            tag_id: Some(tag.id),
        });
        Ok(Value::Null)
    }

    fn remove_repo_from_tag(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "tag_info")?)?;
        let repo_name = req_str(method, args, 1, "repo_info")?;
        let attached = self.tag_repos.entry(tag.id).or_default();
        let before = attached.len();
        attached.retain(|r| r.external_repo_name != repo_name);
        if attached.len() == before {
            return Err(fault(
                method,
                FaultKind::Generic,
                format!(
                    "external repo {} not associated with tag {}",
                    repo_name, tag.name
                ),
            ));
        }
        Ok(Value::Null)
    }

    fn create_external_repo(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let name = req_str(method, args, 0, "name")?;
        let url = req_str(method, args, 1, "url")?;
        if self.external_repos.contains_key(&name) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!("An external repo named \"{name}\" already exists"),
            ));
        }
        let info = ExternalRepoInfo {
            id: self.allocate_id(),
            name: name.clone(),
            url,
        };
        self.external_repos.insert(name, info.clone());
        Ok(serde_json::to_value(info)?)
    }

    fn edit_external_repo(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let info = req(method, args, 0, "info")?.clone();
        let url = opt_str(args, 2, "url");
        let repo = self
            .external_repos
            .values_mut()
            .find(|r| match &info {
                Value::String(name) => &r.name == name,
                other => other.as_i64() == Some(r.id),
            })
            .ok_or_else(|| fault(method, FaultKind::Generic, format!("No such repo: {info}")))?;
        if let Some(url) = url {
            repo.url = url.clone();
            let id = repo.id;
            for attached in self.tag_repos.values_mut().flatten() {
                if attached.external_repo_id == id {
                    attached.url = Some(url.clone());
                }
            }
        }
        Ok(Value::Null)
    }

    fn delete_external_repo(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let name = req_str(method, args, 0, "info")?;
        let repo = self
            .external_repos
            .remove(&name)
            .ok_or_else(|| fault(method, FaultKind::Generic, format!("No such repo: {name}")))?;
        for attached in self.tag_repos.values_mut() {
            attached.retain(|r| r.external_repo_id != repo.id);
        }
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // Package lists
    // ------------------------------------------------------------------

    fn list_packages(&self, method: &str, args: &CallArgs, quirks: HubQuirks) -> Result<Value> {
        if quirks.legacy_list_packages {
            reject_unknown(method, args, &["tagID", "inherited"])?;
        }
        let tag = self.tag(method, req(method, args, 0, "tagID")?)?;
        let with_owners = args
            .named
            .get("with_owners")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let entries: Vec<PackageEntry> = self
            .packages
            .get(&tag.id)
            .into_iter()
            .flatten()
            .map(|p| PackageEntry {
                owner_name: if with_owners { p.owner_name.clone() } else { None },
                ..p.clone()
            })
            .collect();
        Ok(serde_json::to_value(entries)?)
    }

    fn package_entry<'a>(
        &'a mut self,
        method: &str,
        tag: &TagInfo,
        package: &str,
    ) -> Result<&'a mut PackageEntry> {
        self.packages
            .entry(tag.id)
            .or_default()
            .iter_mut()
            .find(|p| p.package_name == package)
            .ok_or_else(|| {
                fault(
                    method,
                    FaultKind::Generic,
                    format!("package {} not in list for tag {}", package, tag.name),
                )
            })
    }

    fn package_list_change(&mut self, method: &str, args: &CallArgs, user: &str) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "taginfo")?)?;
        let package = req_str(method, args, 1, "pkginfo")?;
        let exists = self
            .packages
            .get(&tag.id)
            .is_some_and(|list| list.iter().any(|p| p.package_name == package));

        match method {
            "packageListAdd" => {
                let owner = req_str(method, args, 2, "owner")?;
                if exists {
                    return Err(fault(
                        method,
                        FaultKind::Conflict,
                        format!("package {} already in tag {}", package, tag.name),
                    ));
                }
                self.packages.entry(tag.id).or_default().push(PackageEntry {
                    package_name: package,
                    owner_name: Some(owner),
                    blocked: false,
                    tag_id: tag.id,
                    extra_arches: None,
                });
            }
            "packageListRemove" => {
                self.package_entry(method, &tag, &package)?;
                if let Some(list) = self.packages.get_mut(&tag.id) {
                    list.retain(|p| p.package_name != package);
                }
            }
            "packageListSetOwner" => {
                let owner = req_str(method, args, 2, "owner")?;
                self.package_entry(method, &tag, &package)?.owner_name = Some(owner);
            }
            "packageListBlock" => {
                if exists {
                    let entry = self.package_entry(method, &tag, &package)?;
                    if entry.blocked {
                        return Err(fault(
                            method,
                            FaultKind::Conflict,
                            format!("package {} already blocked in tag {}", package, tag.name),
                        ));
                    }
                    entry.blocked = true;
                } else {
                    self.packages.entry(tag.id).or_default().push(PackageEntry {
                        package_name: package,
                        owner_name: Some(user.to_string()),
                        blocked: true,
                        tag_id: tag.id,
                        extra_arches: None,
                    });
                }
            }
            "packageListUnblock" => {
                let entry = self.package_entry(method, &tag, &package)?;
                if !entry.blocked {
                    return Err(fault(
                        method,
                        FaultKind::Generic,
                        format!("package {} is not blocked in tag {}", package, tag.name),
                    ));
                }
                entry.blocked = false;
            }
            _ => unreachable!("package_list_change called for {method}"),
        }
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // Comps groups
    // ------------------------------------------------------------------

    fn tag_groups(&self, method: &str, args: &CallArgs) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "tag")?)?;
        let inherit = args
            .get(usize::MAX, "inherit")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let groups: Vec<TagGroup> = self
            .groups
            .get(&tag.id)
            .into_iter()
            .flatten()
            .filter(|g| inherit || g.tag_id == tag.id)
            .map(|g| TagGroup {
                packagelist: g
                    .packagelist
                    .iter()
                    .filter(|p| inherit || p.tag_id == tag.id)
                    .cloned()
                    .collect(),
                ..g.clone()
            })
            .collect();
        Ok(serde_json::to_value(groups)?)
    }

    fn group_list_change(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let tag = self.tag(method, req(method, args, 0, "taginfo")?)?;
        let group = req_str(method, args, 1, "grpinfo")?;
        let groups = self.groups.entry(tag.id).or_default();
        let position = groups.iter().position(|g| g.name == group);

        match method {
            "groupListAdd" => match position {
                Some(i) => groups[i].tag_id = tag.id,
                None => groups.push(TagGroup {
                    name: group,
                    tag_id: tag.id,
                    blocked: false,
                    packagelist: Vec::new(),
                }),
            },
            "groupListRemove" => match position {
                Some(i) if groups[i].tag_id == tag.id => {
                    groups.remove(i);
                }
                _ => {
                    return Err(fault(
                        method,
                        FaultKind::Generic,
                        format!("group {} not present in tag {}", group, tag.name),
                    ))
                }
            },
            "groupPackageListAdd" => {
                let package = req_str(method, args, 2, "pkg_name")?;
                let i = position.unwrap_or_else(|| {
                    groups.push(TagGroup {
                        name: group.clone(),
                        tag_id: tag.id,
                        blocked: false,
                        packagelist: Vec::new(),
                    });
                    groups.len() - 1
                });
                let rows = &mut groups[i].packagelist;
                if !rows.iter().any(|p| p.package == package) {
                    rows.push(GroupPackage {
                        package,
                        tag_id: tag.id,
                        blocked: false,
                        kind: Some("mandatory".to_string()),
                    });
                }
            }
            "groupPackageListRemove" => {
                let package = req_str(method, args, 2, "pkg_name")?;
                let removed = match position {
                    Some(i) => {
                        let rows = &mut groups[i].packagelist;
                        let before = rows.len();
                        rows.retain(|p| !(p.package == package && p.tag_id == tag.id));
                        rows.len() != before
                    }
                    None => false,
                };
                if !removed {
                    return Err(fault(
                        method,
                        FaultKind::Generic,
                        format!(
                            "package {} not in group {} of tag {}",
                            package, group, tag.name
                        ),
                    ));
                }
            }
            _ => unreachable!("group_list_change called for {method}"),
        }
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // Hosts and channels
    // ------------------------------------------------------------------

    fn add_host(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let name = req_str(method, args, 0, "hostname")?;
        let arches: Vec<String> = req(method, args, 1, "arches")?
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        let principal = opt_str(args, 2, "krb_principal");
        if self.hosts.contains_key(&name) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!("host already exists: {name}"),
            ));
        }
        let id = self.allocate_id();
        self.hosts.insert(
            name.clone(),
            HostInfo {
                id,
                name: name.clone(),
                arches: arches.join(" "),
                enabled: true,
                capacity: 2.0,
                description: None,
                comment: None,
            },
        );
        if !self.users.contains_key(&name) {
            let user_id = self.allocate_id();
            self.users.insert(
                name.clone(),
                UserInfo {
                    id: user_id,
                    name,
                    status: USER_STATUS_NORMAL,
                    usertype: 1,
                    krb_principals: principal.into_iter().collect(),
                },
            );
        }
        if !self.channels.contains_key("default") {
            let channel_id = self.allocate_id();
            self.channels.insert("default".to_string(), channel_id);
        }
        self.host_channels
            .entry(id)
            .or_default()
            .insert("default".to_string());
        Ok(json!(id))
    }

    fn edit_host(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        reject_unknown(
            method,
            args,
            &["name", "arches", "capacity", "description", "comment"],
        )?;
        let current = self.host(method, req(method, args, 0, "hostInfo")?)?;
        let mut host = current.clone();
        for (key, value) in &args.named {
            match key.as_str() {
                "arches" => host.arches = value.as_str().unwrap_or_default().to_string(),
                "capacity" => host.capacity = value.as_f64().unwrap_or(host.capacity),
                "description" => host.description = value.as_str().map(str::to_string),
                "comment" => host.comment = value.as_str().map(str::to_string),
                "name" => host.name = value.as_str().unwrap_or(&host.name).to_string(),
                _ => {}
            }
        }
        let changed = host != current;
        self.hosts.remove(&current.name);
        self.hosts.insert(host.name.clone(), host);
        Ok(json!(changed))
    }

    fn set_host_enabled(&mut self, method: &str, args: &CallArgs, enabled: bool) -> Result<Value> {
        let host = self.host(method, req(method, args, 0, "hostname")?)?;
        if let Some(h) = self.hosts.get_mut(&host.name) {
            h.enabled = enabled;
        }
        Ok(Value::Null)
    }

    fn list_channels(&self, method: &str, args: &CallArgs) -> Result<Value> {
        let host_id = req_i64(method, args, 0, "hostID")?;
        let channels: Vec<Value> = self
            .host_channels
            .get(&host_id)
            .into_iter()
            .flatten()
            .map(|name| json!({ "id": self.channels.get(name), "name": name }))
            .collect();
        Ok(Value::Array(channels))
    }

    fn host_channel_change(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let host = self.host(method, req(method, args, 0, "hostname")?)?;
        let channel = req_str(method, args, 1, "channel_name")?;
        let subscribed = self
            .host_channels
            .get(&host.id)
            .is_some_and(|c| c.contains(&channel));

        if method == "addHostToChannel" {
            if !self.channels.contains_key(&channel) {
                if !opt_bool(args, 2, "create") {
                    return Err(fault(
                        method,
                        FaultKind::Generic,
                        format!("No such channel: {channel}"),
                    ));
                }
                let id = self.allocate_id();
                self.channels.insert(channel.clone(), id);
            }
            if subscribed {
                return Err(fault(
                    method,
                    FaultKind::Conflict,
                    format!(
                        "host {} is already subscribed to the {} channel",
                        host.name, channel
                    ),
                ));
            }
            self.host_channels.entry(host.id).or_default().insert(channel);
        } else {
            if !subscribed {
                return Err(fault(
                    method,
                    FaultKind::Generic,
                    format!(
                        "host {} is not subscribed to the {} channel",
                        host.name, channel
                    ),
                ));
            }
            if let Some(channels) = self.host_channels.get_mut(&host.id) {
                channels.remove(&channel);
            }
        }
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // Users and permissions
    // ------------------------------------------------------------------

    fn create_user(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let name = req_str(method, args, 0, "username")?;
        if self.users.contains_key(&name) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!("user already exists: {name}"),
            ));
        }
        let status = args
            .get(1, "status")
            .and_then(Value::as_i64)
            .unwrap_or(USER_STATUS_NORMAL);
        let id = self.allocate_id();
        self.users.insert(
            name.clone(),
            UserInfo {
                id,
                name,
                status,
                usertype: 0,
                krb_principals: opt_str(args, 2, "krb_principal").into_iter().collect(),
            },
        );
        Ok(json!(id))
    }

    fn set_user_status(&mut self, method: &str, args: &CallArgs, status: i64) -> Result<Value> {
        let user = self.user(method, req(method, args, 0, "username")?)?;
        if let Some(u) = self.users.get_mut(&user.name) {
            u.status = status;
        }
        Ok(Value::Null)
    }

    fn edit_user(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        reject_unknown(method, args, &["name", "krb_principal_mappings"])?;
        let user = self.user(method, req(method, args, 0, "userInfo")?)?;
        let mut principals = user.krb_principals.clone();
        let mappings = args
            .named
            .get("krb_principal_mappings")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for mapping in mappings {
            let old = mapping.get("old").and_then(Value::as_str);
            let new = mapping.get("new").and_then(Value::as_str);
            if let Some(old) = old {
                let before = principals.len();
                principals.retain(|p| p != old);
                if principals.len() == before {
                    return Err(fault(
                        method,
                        FaultKind::Generic,
                        format!("Cannot change non-existing krb_principal {old}"),
                    ));
                }
            }
            if let Some(new) = new {
                if principals.iter().any(|p| p == new) {
                    return Err(fault(
                        method,
                        FaultKind::Conflict,
                        format!("krb_principal {new} already in use"),
                    ));
                }
                principals.push(new.to_string());
            }
        }
        if let Some(u) = self.users.get_mut(&user.name) {
            u.krb_principals = principals;
        }
        Ok(Value::Null)
    }

    fn permission_change(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let user = self.user(method, req(method, args, 0, "userinfo")?)?;
        let perm = req_str(method, args, 1, "permission")?;
        let granted = self.user_perms.entry(user.id).or_default();

        if method == "grantPermission" {
            if !self.perms.contains_key(&perm) {
                if !opt_bool(args, 2, "create") {
                    return Err(fault(
                        method,
                        FaultKind::Generic,
                        format!("No such permission: {perm}"),
                    ));
                }
                self.next_id += 1;
                self.perms.insert(perm.clone(), self.next_id);
            }
            if !granted.insert(perm.clone()) {
                return Err(fault(
                    method,
                    FaultKind::Conflict,
                    format!("user {} already has permission: {}", user.name, perm),
                ));
            }
        } else if !granted.remove(&perm) {
            return Err(fault(
                method,
                FaultKind::Generic,
                format!("user {} does not have permission: {}", user.name, perm),
            ));
        }
        Ok(Value::Null)
    }

    // ------------------------------------------------------------------
    // Targets, archive types, build types, content generators
    // ------------------------------------------------------------------

    fn find_target(&self, info: &Value) -> Option<BuildTarget> {
        match info {
            Value::String(name) => self.targets.get(name).cloned(),
            other => {
                let id = other.as_i64()?;
                self.targets.values().find(|t| t.id == id).cloned()
            }
        }
    }

    fn write_target(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let (offset, existing) = if method == "editBuildTarget" {
            let info = req(method, args, 0, "buildTargetInfo")?;
            let target = self.find_target(info).ok_or_else(|| {
                fault(method, FaultKind::Generic, format!("No such build target: {info}"))
            })?;
            (1, Some(target))
        } else {
            (0, None)
        };
        let name = req_str(method, args, offset, "name")?;
        let build_tag = self.tag(method, req(method, args, offset + 1, "build_tag")?)?;
        let dest_tag = self.tag(method, req(method, args, offset + 2, "dest_tag")?)?;

        let id = match existing {
            Some(target) => {
                self.targets.remove(&target.name);
                target.id
            }
            None => {
                if self.targets.contains_key(&name) {
                    return Err(fault(
                        method,
                        FaultKind::Conflict,
                        format!("A build target with the name '{name}' already exists"),
                    ));
                }
                self.allocate_id()
            }
        };
        self.targets.insert(
            name.clone(),
            BuildTarget {
                id,
                name,
                build_tag: build_tag.id,
                build_tag_name: build_tag.name,
                dest_tag: dest_tag.id,
                dest_tag_name: dest_tag.name,
            },
        );
        Ok(Value::Null)
    }

    fn delete_target(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let info = req(method, args, 0, "buildTargetInfo")?;
        let target = self.find_target(info).ok_or_else(|| {
            fault(method, FaultKind::Generic, format!("No such build target: {info}"))
        })?;
        self.targets.remove(&target.name);
        Ok(Value::Null)
    }

    fn add_archive_type(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let name = req_str(method, args, 0, "name")?;
        let description = req_str(method, args, 1, "description")?;
        let extensions = req_str(method, args, 2, "extensions")?;
        if self.archive_types.contains_key(&name) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!("archivetype {name} already exists"),
            ));
        }
        let id = self.allocate_id();
        self.archive_types.insert(
            name.clone(),
            ArchiveType {
                id,
                name,
                description,
                extensions,
            },
        );
        Ok(Value::Null)
    }

    fn add_btype(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let name = req_str(method, args, 0, "name")?;
        if self.btypes.contains_key(&name) {
            return Err(fault(
                method,
                FaultKind::Conflict,
                format!("btype already exists: {name}"),
            ));
        }
        let id = self.allocate_id();
        self.btypes.insert(name, id);
        Ok(Value::Null)
    }

    fn cg_access_change(&mut self, method: &str, args: &CallArgs) -> Result<Value> {
        let user = self.user(method, req(method, args, 0, "user")?)?;
        let cg = req_str(method, args, 1, "cg")?;
        if !self.cgs.contains_key(&cg) {
            if method == "grantCGAccess" && opt_bool(args, 2, "create") {
                let id = self.allocate_id();
                self.cgs.insert(
                    cg.clone(),
                    ContentGenerator {
                        id,
                        users: Vec::new(),
                    },
                );
            } else {
                return Err(fault(
                    method,
                    FaultKind::Generic,
                    format!("No such content generator: {cg}"),
                ));
            }
        }
        let Some(entry) = self.cgs.get_mut(&cg) else {
            return Ok(Value::Null);
        };
        if method == "grantCGAccess" {
            if entry.users.contains(&user.name) {
                return Err(fault(
                    method,
                    FaultKind::Conflict,
                    format!("User already has access to content generator {cg}"),
                ));
            }
            entry.users.push(user.name);
            entry.users.sort();
        } else {
            entry.users.retain(|u| u != &user.name);
        }
        Ok(Value::Null)
    }

    fn dispatch(
        &mut self,
        method: &str,
        args: &CallArgs,
        quirks: HubQuirks,
        user: &str,
    ) -> Result<Value> {
        match method {
            "getTag" => Ok(self
                .find_tag(req(method, args, 0, "tagInfo")?)
                .map(serde_json::to_value)
                .transpose()?
                .unwrap_or(Value::Null)),
            "createTag" => self.create_tag(method, args),
            "editTag2" => self.edit_tag(method, args),
            "deleteTag" => self.delete_tag(method, args),
            "getInheritanceData" => self.inheritance_data(method, args),
            "setInheritanceData" => self.set_inheritance(method, args),
            "getTagExternalRepos" => self.tag_external_repos(method, args),
            "addExternalRepoToTag" => self.add_repo_to_tag(method, args),
            "removeExternalRepoFromTag" => self.remove_repo_from_tag(method, args),
            "getExternalRepo" => {
                let name = req_str(method, args, 0, "info")?;
                Ok(serde_json::to_value(self.external_repos.get(&name))?)
            }
            "createExternalRepo" => self.create_external_repo(method, args),
            "editExternalRepo" => self.edit_external_repo(method, args),
            "deleteExternalRepo" => self.delete_external_repo(method, args),
            "listPackages" => self.list_packages(method, args, quirks),
            "packageListAdd" | "packageListRemove" | "packageListSetOwner"
            | "packageListBlock" | "packageListUnblock" => {
                self.package_list_change(method, args, user)
            }
            "getTagGroups" => self.tag_groups(method, args),
            "groupListAdd" | "groupListRemove" | "groupPackageListAdd"
            | "groupPackageListRemove" => self.group_list_change(method, args),
            "getHost" => Ok(serde_json::to_value(
                self.find_host(req(method, args, 0, "hostInfo")?),
            )?),
            "addHost" => self.add_host(method, args),
            "editHost" => self.edit_host(method, args),
            "enableHost" => self.set_host_enabled(method, args, true),
            "disableHost" => self.set_host_enabled(method, args, false),
            "listChannels" => self.list_channels(method, args),
            "addHostToChannel" | "removeHostFromChannel" => {
                self.host_channel_change(method, args)
            }
            "getUser" => Ok(serde_json::to_value(
                self.find_user(req(method, args, 0, "userInfo")?),
            )?),
            "createUser" => self.create_user(method, args),
            "enableUser" => self.set_user_status(method, args, USER_STATUS_NORMAL),
            "disableUser" => self.set_user_status(method, args, USER_STATUS_BLOCKED),
            "editUser" => self.edit_user(method, args),
            "getUserPerms" => {
                let user = self.user(method, req(method, args, 0, "userID")?)?;
                let perms: Vec<&String> = self.user_perms.get(&user.id).into_iter().flatten().collect();
                Ok(serde_json::to_value(perms)?)
            }
            "grantPermission" | "revokePermission" => self.permission_change(method, args),
            "getAllPerms" => {
                let mut perms: Vec<Value> = self
                    .perms
                    .iter()
                    .map(|(name, id)| json!({ "id": id, "name": name }))
                    .collect();
                perms.sort_by_key(|p| p["id"].as_i64());
                Ok(Value::Array(perms))
            }
            "getBuildTarget" => Ok(serde_json::to_value(
                self.find_target(req(method, args, 0, "info")?),
            )?),
            "createBuildTarget" | "editBuildTarget" => self.write_target(method, args),
            "deleteBuildTarget" => self.delete_target(method, args),
            "getArchiveType" => {
                let name = req_str(method, args, 1, "type_name")?;
                Ok(serde_json::to_value(self.archive_types.get(&name))?)
            }
            "addArchiveType" => self.add_archive_type(method, args),
            "listBTypes" => Ok(Value::Array(
                self.btypes
                    .iter()
                    .map(|(name, id)| json!({ "id": id, "name": name }))
                    .collect(),
            )),
            "addBType" => self.add_btype(method, args),
            "listCGs" if quirks.list_cgs => Ok(serde_json::to_value(&self.cgs)?),
            "grantCGAccess" | "revokeCGAccess" => self.cg_access_change(method, args),
            _ => Err(fault(
                method,
                FaultKind::Generic,
                format!("Invalid method: {method}"),
            )),
        }
    }
}

impl MemoryHub {
    /// Create an empty hub with current-version behavior.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            quirks: HubQuirks {
                legacy_list_packages: false,
                list_cgs: true,
            },
            user: "kojiadmin".to_string(),
        }
    }

    /// Emulate a hub whose `listPackages` predates the `with_owners` keyword.
    #[must_use]
    pub fn with_legacy_list_packages(mut self) -> Self {
        self.quirks.legacy_list_packages = true;
        self
    }

    /// Emulate a hub without the `listCGs` call.
    #[must_use]
    pub fn without_list_cgs(mut self) -> Self {
        self.quirks.list_cgs = false;
        self
    }

    /// Run a call as part of seeding: not recorded, no login required.
    fn seed(&self, method: &str, args: CallArgs) -> Result<Value> {
        let mut state = self.state.lock();
        state.dispatch(method, &args, self.quirks, &self.user)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// All calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Calls received so far that change hub state.
    pub fn mutating_calls(&self) -> Vec<RecordedCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| is_mutating(&c.method))
            .cloned()
            .collect()
    }

    /// Names of the state-changing methods called so far, in order.
    pub fn mutating_methods(&self) -> Vec<String> {
        self.mutating_calls().into_iter().map(|c| c.method).collect()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of times the session logged in.
    pub fn login_count(&self) -> usize {
        self.state.lock().logins
    }

    pub fn tag(&self, name: &str) -> Option<TagInfo> {
        self.state.lock().tags.get(name).cloned()
    }

    pub fn inheritance(&self, tag: &str) -> Vec<InheritanceRule> {
        let state = self.state.lock();
        state
            .tags
            .get(tag)
            .and_then(|t| state.inheritance.get(&t.id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn tag_repos(&self, tag: &str) -> Vec<TagExternalRepo> {
        let state = self.state.lock();
        let mut repos = state
            .tags
            .get(tag)
            .and_then(|t| state.tag_repos.get(&t.id))
            .cloned()
            .unwrap_or_default();
        repos.sort_by_key(|r| r.priority);
        repos
    }

    pub fn external_repo(&self, name: &str) -> Option<ExternalRepoInfo> {
        self.state.lock().external_repos.get(name).cloned()
    }

    pub fn packages(&self, tag: &str) -> Vec<PackageEntry> {
        let state = self.state.lock();
        state
            .tags
            .get(tag)
            .and_then(|t| state.packages.get(&t.id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn groups(&self, tag: &str) -> Vec<TagGroup> {
        let state = self.state.lock();
        state
            .tags
            .get(tag)
            .and_then(|t| state.groups.get(&t.id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn host(&self, name: &str) -> Option<HostInfo> {
        self.state.lock().hosts.get(name).cloned()
    }

    pub fn host_channels(&self, host: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .hosts
            .get(host)
            .and_then(|h| state.host_channels.get(&h.id))
            .map(|c| c.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user(&self, name: &str) -> Option<UserInfo> {
        self.state.lock().users.get(name).cloned()
    }

    pub fn user_perms(&self, user: &str) -> Vec<String> {
        let state = self.state.lock();
        state
            .users
            .get(user)
            .and_then(|u| state.user_perms.get(&u.id))
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn target(&self, name: &str) -> Option<BuildTarget> {
        self.state.lock().targets.get(name).cloned()
    }

    pub fn archive_type(&self, name: &str) -> Option<ArchiveType> {
        self.state.lock().archive_types.get(name).cloned()
    }

    pub fn btypes(&self) -> Vec<BType> {
        self.state
            .lock()
            .btypes
            .iter()
            .map(|(name, id)| BType {
                id: *id,
                name: name.clone(),
            })
            .collect()
    }

    pub fn cg_users(&self, cg: &str) -> Vec<String> {
        self.state
            .lock()
            .cgs
            .get(cg)
            .map(|c| c.users.clone())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Create a tag and return its id.
    pub fn seed_tag(&self, name: &str) -> Result<i64> {
        let id = self.seed("createTag", CallArgs::new().arg(name))?;
        Ok(id.as_i64().unwrap_or_default())
    }

    /// Attach `parent` to `child` at `priority` with default link flags.
    pub fn seed_inheritance(&self, child: &str, parent: &str, priority: i64) -> Result<()> {
        let parent_id = self
            .tag(parent)
            .map(|t| t.id)
            .ok_or_else(|| Error::not_found("tag", parent))?;
        let rule = json!([{
            "child_id": 0,
            "parent_id": parent_id,
            "name": parent,
            "priority": priority,
            "maxdepth": null,
            "pkg_filter": "",
            "intransitive": false,
            "noconfig": false,
        }]);
        self.seed("setInheritanceData", CallArgs::new().arg(child).arg(rule))?;
        Ok(())
    }

    /// Define an external repo and return its id.
    pub fn seed_external_repo(&self, name: &str, url: &str) -> Result<i64> {
        let info = self.seed("createExternalRepo", CallArgs::new().arg(name).arg(url))?;
        Ok(info["id"].as_i64().unwrap_or_default())
    }

    /// Attach an existing external repo to a tag.
    pub fn seed_tag_repo(
        &self,
        tag: &str,
        repo: &str,
        priority: i64,
        merge_mode: Option<MergeMode>,
    ) -> Result<()> {
        let mut args = CallArgs::new().arg(tag).arg(repo).arg(priority);
        if let Some(mode) = merge_mode {
            args = args.arg(mode.to_string());
        }
        self.seed("addExternalRepoToTag", args)?;
        Ok(())
    }

    /// Add a package entry to a tag's package list.
    pub fn seed_package(&self, tag: &str, package: &str, owner: &str, blocked: bool) -> Result<()> {
        self.seed(
            "packageListAdd",
            CallArgs::new().arg(tag).arg(package).arg(owner),
        )?;
        if blocked {
            self.seed("packageListBlock", CallArgs::new().arg(tag).arg(package))?;
        }
        Ok(())
    }

    /// Add a group package row to `tag`, owned by `owner_tag`.
    ///
    /// Passing a parent tag as `owner_tag` emulates a row that `tag` sees
    /// through inheritance.
    pub fn seed_group_package(
        &self,
        tag: &str,
        group: &str,
        package: &str,
        owner_tag: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let tag_id = state.tag("seed", &json!(tag))?.id;
        let owner_id = state.tag("seed", &json!(owner_tag))?.id;
        let groups = state.groups.entry(tag_id).or_default();
        let index = match groups.iter().position(|g| g.name == group) {
            Some(i) => i,
            None => {
                groups.push(TagGroup {
                    name: group.to_string(),
                    tag_id: owner_id,
                    blocked: false,
                    packagelist: Vec::new(),
                });
                groups.len() - 1
            }
        };
        groups[index].packagelist.push(GroupPackage {
            package: package.to_string(),
            tag_id: owner_id,
            blocked: false,
            kind: Some("mandatory".to_string()),
        });
        Ok(())
    }

    /// Define a permission and return its id.
    pub fn seed_perm(&self, name: &str) -> Result<i64> {
        let mut state = self.state.lock();
        if let Some(id) = state.perms.get(name) {
            return Ok(*id);
        }
        let id = state.allocate_id();
        state.perms.insert(name.to_string(), id);
        Ok(id)
    }

    /// Create a user and return its id.
    pub fn seed_user(&self, name: &str) -> Result<i64> {
        let id = self.seed("createUser", CallArgs::new().arg(name))?;
        Ok(id.as_i64().unwrap_or_default())
    }

    /// Set a user's status directly.
    pub fn seed_user_status(&self, name: &str, status: i64) -> Result<()> {
        self.state
            .lock()
            .set_user_status("seed", &CallArgs::new().arg(name), status)?;
        Ok(())
    }

    /// Grant an existing user a permission, creating the permission if needed.
    pub fn seed_user_perm(&self, user: &str, perm: &str) -> Result<()> {
        self.seed(
            "grantPermission",
            CallArgs::new().arg(user).arg(perm).kwarg("create", true),
        )?;
        Ok(())
    }

    /// Add a Kerberos principal to an existing user.
    pub fn seed_principal(&self, user: &str, principal: &str) -> Result<()> {
        let mapping = json!([{ "old": null, "new": principal }]);
        self.seed(
            "editUser",
            CallArgs::new()
                .arg(user)
                .kwarg("krb_principal_mappings", mapping),
        )?;
        Ok(())
    }

    /// Create a builder host (member of the "default" channel) and return its id.
    pub fn seed_host(&self, name: &str, arches: &[&str]) -> Result<i64> {
        let arches: Vec<Value> = arches.iter().map(|a| json!(a)).collect();
        let id = self.seed("addHost", CallArgs::new().arg(name).arg(arches))?;
        Ok(id.as_i64().unwrap_or_default())
    }

    /// Subscribe a host to a channel, creating the channel if needed.
    pub fn seed_host_channel(&self, host: &str, channel: &str) -> Result<()> {
        self.seed(
            "addHostToChannel",
            CallArgs::new()
                .arg(host)
                .arg(channel)
                .kwarg("create", true),
        )?;
        Ok(())
    }

    /// Disable a host directly.
    pub fn seed_host_disabled(&self, host: &str) -> Result<()> {
        self.seed("disableHost", CallArgs::new().arg(host))?;
        Ok(())
    }

    /// Create a build target between two existing tags.
    pub fn seed_target(&self, name: &str, build_tag: &str, dest_tag: &str) -> Result<()> {
        self.seed(
            "createBuildTarget",
            CallArgs::new().arg(name).arg(build_tag).arg(dest_tag),
        )?;
        Ok(())
    }

    pub fn seed_archive_type(&self, name: &str, description: &str, extensions: &str) -> Result<()> {
        self.seed(
            "addArchiveType",
            CallArgs::new().arg(name).arg(description).arg(extensions),
        )?;
        Ok(())
    }

    pub fn seed_btype(&self, name: &str) -> Result<()> {
        self.seed("addBType", CallArgs::new().arg(name))?;
        Ok(())
    }

    /// Create a content generator with the given users.
    pub fn seed_cg(&self, name: &str, users: &[&str]) -> Result<()> {
        let mut state = self.state.lock();
        let id = state.allocate_id();
        let mut users: Vec<String> = users.iter().map(|u| (*u).to_string()).collect();
        users.sort();
        state.cgs.insert(name.to_string(), ContentGenerator { id, users });
        Ok(())
    }
}

impl KojiSession for MemoryHub {
    fn call(&self, method: &str, args: CallArgs) -> Result<Value> {
        let mut state = self.state.lock();
        state.calls.push(RecordedCall {
            method: method.to_string(),
            args: args.clone(),
        });
        if is_mutating(method) && !state.logged_in {
            return Err(fault(method, FaultKind::Auth, "this call requires a login"));
        }
        trace!(method, "memory hub dispatch");
        state.dispatch(method, &args, self.quirks, &self.user)
    }

    fn logged_in(&self) -> bool {
        self.state.lock().logged_in
    }

    fn login(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.logged_in = true;
        state.logins += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ensure_logged_in, SessionExt};

    fn hub_with_tags() -> MemoryHub {
        let hub = MemoryHub::new();
        hub.seed_tag("base").unwrap();
        hub.seed_tag("extras").unwrap();
        hub.seed_tag("child").unwrap();
        hub
    }

    #[test]
    fn test_mutation_requires_login() {
        let hub = hub_with_tags();
        let err = hub.delete_tag("child").unwrap_err();
        assert!(matches!(
            err,
            Error::Rpc {
                fault: FaultKind::Auth,
                ..
            }
        ));

        ensure_logged_in(&hub).unwrap();
        ensure_logged_in(&hub).unwrap();
        assert_eq!(hub.login_count(), 1);
        hub.delete_tag("child").unwrap();
        assert!(hub.tag("child").is_none());
    }

    #[test]
    fn test_inheritance_priority_collision_rejected() {
        let hub = hub_with_tags();
        hub.seed_inheritance("child", "base", 10).unwrap();
        let err = hub.seed_inheritance("child", "extras", 10).unwrap_err();
        assert!(err.is_conflict("priorities must be unique"));
        assert_eq!(hub.inheritance("child").len(), 1);
    }

    #[test]
    fn test_inheritance_delete_link() {
        let hub = hub_with_tags();
        hub.seed_inheritance("child", "base", 10).unwrap();
        hub.login().unwrap();
        let current = hub.get_inheritance_data("child").unwrap();
        let deletion = vec![current[0].marked_for_deletion()];
        hub.set_inheritance_data("child", &deletion, false).unwrap();
        assert!(hub.inheritance("child").is_empty());
    }

    #[test]
    fn test_external_repo_priority_unique() {
        let hub = hub_with_tags();
        hub.seed_external_repo("epel", "https://example.com/epel/")
            .unwrap();
        hub.seed_external_repo("cr", "https://example.com/cr/").unwrap();
        hub.seed_tag_repo("child", "epel", 5, None).unwrap();
        let err = hub.seed_tag_repo("child", "cr", 5, None).unwrap_err();
        assert!(err.is_conflict("at priority 5"));
        assert_eq!(
            hub.tag_repos("child")[0].merge_mode,
            Some(MergeMode::Koji)
        );
    }

    #[test]
    fn test_legacy_list_packages_rejects_with_owners() {
        let hub = MemoryHub::new().with_legacy_list_packages();
        let id = hub.seed_tag("child").unwrap();
        let err = hub.list_packages(id, Some(false)).unwrap_err();
        assert!(err.is_unexpected_argument("with_owners"));
        assert!(hub.list_packages(id, None).unwrap().is_empty());
    }

    #[test]
    fn test_list_packages_without_owners() {
        let hub = hub_with_tags();
        hub.seed_package("child", "bash", "alice", false).unwrap();
        let id = hub.tag("child").unwrap().id;
        let rows = hub.list_packages(id, Some(false)).unwrap();
        assert_eq!(rows[0].owner_name, None);
        let rows = hub.list_packages(id, None).unwrap();
        assert_eq!(rows[0].owner_name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_cg_double_grant_conflict() {
        let hub = MemoryHub::new();
        hub.seed_user("osbs").unwrap();
        hub.login().unwrap();
        hub.grant_cg_access("osbs", "atomic-reactor", true).unwrap();
        let err = hub
            .grant_cg_access("osbs", "atomic-reactor", true)
            .unwrap_err();
        assert!(err.is_conflict("User already has access to content generator"));
    }

    #[test]
    fn test_unknown_method() {
        let hub = MemoryHub::new().without_list_cgs();
        let err = hub.list_cgs().unwrap_err();
        assert!(err.is_conflict("Invalid method"));
    }

    #[test]
    fn test_calls_recorded() {
        let hub = hub_with_tags();
        hub.get_tag("base").unwrap();
        hub.login().unwrap();
        hub.delete_tag("base").unwrap();
        assert_eq!(hub.calls().len(), 2);
        assert_eq!(hub.mutating_methods(), vec!["deleteTag".to_string()]);
        hub.clear_calls();
        assert!(hub.calls().is_empty());
    }
}
