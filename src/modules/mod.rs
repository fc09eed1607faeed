//! Module system for Kojible
//!
//! This module provides the core traits, types, and registry for the Kojible
//! module system. Each module converges one kind of hub entity (a tag, a
//! build target, a user...) to the state described by its parameters.

pub mod koji_archivetype;
pub mod koji_btype;
pub mod koji_cg;
pub mod koji_external_repo;
pub mod koji_host;
pub mod koji_tag;
pub mod koji_tag_inheritance;
pub mod koji_tag_packages;
pub mod koji_target;
pub mod koji_user;

use crate::diff::{render, RenderOptions, TaskDiff};
use crate::reconcile::{PermissionCache, ReconciliationResult};
use crate::session::KojiSession;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Environment variable naming the hub profile when a task sets none.
pub const PROFILE_ENV: &str = "KOJI_PROFILE";

/// Errors that can occur during module execution
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("No hub session available for profile '{0}'")]
    NoSession(String),

    #[error(transparent)]
    Koji(#[from] crate::error::Error),
}

impl ModuleError {
    /// Process exit code a harness should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ModuleError::Koji(err) => err.exit_code(),
            _ => 4,
        }
    }
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Status of a module execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    /// Module executed successfully and made changes
    Changed,
    /// Module executed successfully but no changes were needed
    Ok,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Changed => write!(f, "changed"),
            ModuleStatus::Ok => write!(f, "ok"),
        }
    }
}

/// Result of a module execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Whether the module changed anything
    pub changed: bool,
    /// Human-readable message about what happened
    pub msg: String,
    /// Status of the execution
    pub status: ModuleStatus,
    /// One line per change, in the order the changes were made
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stdout_lines: Vec<String>,
    /// Structured before/after description, only in diff mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<TaskDiff>,
    /// Additional data returned by the module
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

impl ModuleOutput {
    /// Create a new successful output with no changes
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            changed: false,
            msg: msg.into(),
            status: ModuleStatus::Ok,
            stdout_lines: Vec::new(),
            diff: None,
            data: HashMap::new(),
        }
    }

    /// Create a new successful output with changes
    pub fn changed(msg: impl Into<String>) -> Self {
        Self {
            changed: true,
            msg: msg.into(),
            status: ModuleStatus::Changed,
            stdout_lines: Vec::new(),
            diff: None,
            data: HashMap::new(),
        }
    }

    /// Build the output of a reconciliation pass.
    ///
    /// The diff is only kept when the context asks for diffs.
    pub fn from_result(
        result: ReconciliationResult,
        context: &ModuleContext,
        msg: impl Into<String>,
    ) -> Self {
        let mut output = if result.changed {
            Self::changed(msg)
        } else {
            Self::ok(msg)
        };
        output.stdout_lines = result.messages;
        if context.diff_mode {
            output.diff = result.diff;
        }
        output
    }

    /// Add data to the output
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Render the diff, if any, as unified text.
    pub fn render_diff(&self, options: &RenderOptions) -> ModuleResult<Option<String>> {
        match &self.diff {
            Some(diff) => Ok(Some(render(diff, options)?.0)),
            None => Ok(None),
        }
    }
}

/// Parameters passed to a module
pub type ModuleParams = HashMap<String, serde_json::Value>;

/// Yields a hub session for a profile name.
pub trait SessionProvider: Send + Sync {
    fn session(&self, profile: &str) -> ModuleResult<Arc<dyn KojiSession>>;
}

/// A provider that hands out the same session for every profile.
struct FixedSession(Arc<dyn KojiSession>);

impl SessionProvider for FixedSession {
    fn session(&self, _profile: &str) -> ModuleResult<Arc<dyn KojiSession>> {
        Ok(Arc::clone(&self.0))
    }
}

/// Context for module execution
#[derive(Clone)]
pub struct ModuleContext {
    /// Whether to run in check mode (dry run)
    pub check_mode: bool,
    /// Whether to show diffs
    pub diff_mode: bool,
    /// Hub profile used when a task does not name one
    pub profile: Option<String>,
    /// Source of hub sessions
    pub sessions: Option<Arc<dyn SessionProvider>>,
    /// Permission table shared by all modules of a run
    pub perms: Arc<PermissionCache>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("check_mode", &self.check_mode)
            .field("diff_mode", &self.diff_mode)
            .field("profile", &self.profile)
            .field("sessions", &self.sessions.is_some())
            .field("perms_loaded", &self.perms.is_loaded())
            .finish()
    }
}

impl Default for ModuleContext {
    fn default() -> Self {
        Self {
            check_mode: false,
            diff_mode: false,
            profile: None,
            sessions: None,
            perms: Arc::new(PermissionCache::new()),
        }
    }
}

impl ModuleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    pub fn with_diff_mode(mut self, diff_mode: bool) -> Self {
        self.diff_mode = diff_mode;
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Use one session for every profile.
    pub fn with_session(mut self, session: Arc<dyn KojiSession>) -> Self {
        self.sessions = Some(Arc::new(FixedSession(session)));
        self
    }

    pub fn with_session_provider(mut self, provider: Arc<dyn SessionProvider>) -> Self {
        self.sessions = Some(provider);
        self
    }

    /// Pick the hub profile: the task's `koji` parameter, then the
    /// context's profile, then `KOJI_PROFILE`.
    pub fn resolve_profile(&self, explicit: Option<&str>) -> ModuleResult<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.profile.clone())
            .or_else(|| std::env::var(PROFILE_ENV).ok().filter(|p| !p.is_empty()))
            .ok_or_else(|| {
                ModuleError::MissingParameter(format!(
                    "set a profile \"koji\" argument for this task, or set the {PROFILE_ENV} environment variable"
                ))
            })
    }

    /// Open the hub session for a task's `koji` parameter.
    pub fn session(&self, params: &ModuleParams) -> ModuleResult<Arc<dyn KojiSession>> {
        self.session_for(params.get_string("koji")?.as_deref())
    }

    /// Open the hub session for an already parsed profile name.
    pub fn session_for(&self, profile: Option<&str>) -> ModuleResult<Arc<dyn KojiSession>> {
        let profile = self.resolve_profile(profile)?;
        let provider = self
            .sessions
            .as_ref()
            .ok_or_else(|| ModuleError::NoSession(profile.clone()))?;
        provider.session(&profile)
    }
}

/// Trait that all modules must implement
pub trait Module: Send + Sync {
    /// Returns the name of the module
    fn name(&self) -> &'static str;

    /// Returns a description of what the module does
    fn description(&self) -> &'static str;

    /// Execute the module with the given parameters
    fn execute(&self, params: &ModuleParams, context: &ModuleContext)
        -> ModuleResult<ModuleOutput>;

    /// Check what would change without making changes (for check mode)
    fn check(&self, params: &ModuleParams, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let check_context = ModuleContext {
            check_mode: true,
            ..context.clone()
        };
        self.execute(params, &check_context)
    }

    /// Validate the parameters before execution
    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let _ = params;
        Ok(())
    }

    /// Returns the list of required parameters
    fn required_params(&self) -> &[&'static str] {
        &["name"]
    }
}

/// Helper trait for extracting parameters
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
    /// Deserialize the whole parameter map into a typed struct.
    fn parse<T: DeserializeOwned>(&self) -> ModuleResult<T>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(v) => Ok(Some(v.to_string().trim_matches('"').to_string())),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(serde_json::Value::Array(arr)) => Ok(Some(
                arr.iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s.clone(),
                        v => v.to_string().trim_matches('"').to_string(),
                    })
                    .collect(),
            )),
            Some(serde_json::Value::String(s)) => {
                // Handle comma-separated string
                Ok(Some(s.split(',').map(|s| s.trim().to_string()).collect()))
            }
            Some(serde_json::Value::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be an array",
                key
            ))),
        }
    }

    fn parse<T: DeserializeOwned>(&self) -> ModuleResult<T> {
        let object: serde_json::Map<String, serde_json::Value> = self
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| ModuleError::InvalidParameter(e.to_string()))
    }
}

/// Parse a `state` parameter against the values a module accepts.
pub(crate) fn parse_state<'a>(
    params: &ModuleParams,
    allowed: &[&'a str],
    default: &'a str,
) -> ModuleResult<&'a str> {
    let Some(state) = params.get_string("state")? else {
        return Ok(default);
    };
    allowed
        .iter()
        .copied()
        .find(|s| s.eq_ignore_ascii_case(&state))
        .ok_or_else(|| {
            ModuleError::InvalidParameter(format!(
                "Invalid state '{}'. Valid states: {}",
                state,
                allowed.join(", ")
            ))
        })
}

/// Registry for looking up modules by name
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        // Tags and their contents
        registry.register(Arc::new(koji_tag::KojiTagModule));
        registry.register(Arc::new(koji_tag_inheritance::KojiTagInheritanceModule));
        registry.register(Arc::new(koji_tag_packages::KojiTagPackagesModule));
        registry.register(Arc::new(koji_external_repo::KojiExternalRepoModule));
        registry.register(Arc::new(koji_target::KojiTargetModule));

        // Accounts
        registry.register(Arc::new(koji_host::KojiHostModule));
        registry.register(Arc::new(koji_user::KojiUserModule));
        registry.register(Arc::new(koji_cg::KojiCgModule));

        // Hub-wide type tables
        registry.register(Arc::new(koji_archivetype::KojiArchiveTypeModule));
        registry.register(Arc::new(koji_btype::KojiBtypeModule));
        registry
    }

    /// Register a module
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Check if a module exists
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Get all module names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Execute a module by name
    pub fn execute(
        &self,
        name: &str,
        params: &ModuleParams,
        context: &ModuleContext,
    ) -> ModuleResult<ModuleOutput> {
        let module = self
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        for param in module.required_params() {
            if !params.contains_key(*param) {
                return Err(ModuleError::MissingParameter((*param).to_string()));
            }
        }
        module.validate_params(params)?;

        if context.check_mode {
            module.check(params, context)
        } else {
            module.execute(params, context)
        }
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
