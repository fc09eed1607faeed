//! Error types for Kojible.
//!
//! This module defines the error types used throughout Kojible. The variants
//! follow the failure classes a reconciliation pass can hit: caller
//! configuration mistakes (detected before any remote call), missing
//! referenced entities, and faults reported by the hub itself.

use std::fmt;
use thiserror::Error;

/// Result type alias for Kojible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a fault returned by the hub.
///
/// Koji reports failures as XML-RPC faults carrying an exception class name
/// and a free-form message. The transport layer maps the class name onto one
/// of these kinds; reconcilers only ever branch on the kind plus, for a few
/// well-known cases, a message fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind {
    /// `koji.GenericError` and anything unclassified.
    Generic,
    /// The requested change collides with existing state
    /// (for example "already has access").
    Conflict,
    /// `koji.ActionNotAllowed`: the session lacks a required permission.
    Permission,
    /// The hub could not find a referenced entity.
    NotFound,
    /// `koji.ParameterError`: the call signature was rejected.
    Parameter,
    /// `koji.AuthError`: login failed or is required.
    Auth,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::Generic => write!(f, "GenericError"),
            FaultKind::Conflict => write!(f, "ConflictError"),
            FaultKind::Permission => write!(f, "ActionNotAllowed"),
            FaultKind::NotFound => write!(f, "NotFoundError"),
            FaultKind::Parameter => write!(f, "ParameterError"),
            FaultKind::Auth => write!(f, "AuthError"),
        }
    }
}

/// The main error type for Kojible.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors (raised before any remote call)
    // ========================================================================
    /// Two desired entries share the same name.
    #[error("duplicate {kind} name '{name}'")]
    DuplicateName {
        /// Kind of entry (for example "external repo")
        kind: &'static str,
        /// Offending name
        name: String,
    },

    /// Two desired entries share the same priority.
    #[error("duplicate {kind} priority {priority}")]
    DuplicatePriority {
        /// Kind of entry (for example "inheritance")
        kind: &'static str,
        /// Offending priority
        priority: i64,
    },

    /// A parameter has an invalid value.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A required parameter is missing.
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    /// The requested operation is not supported by the hub.
    #[error("{0}")]
    Unsupported(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// A referenced entity does not exist on the hub.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Kind of entity (for example "parent tag")
        kind: &'static str,
        /// Entity name
        name: String,
    },

    // ========================================================================
    // Remote Errors
    // ========================================================================
    /// The hub rejected a call.
    #[error("{method} failed ({fault}): {message}")]
    Rpc {
        /// Name of the remote procedure
        method: String,
        /// Fault classification
        fault: FaultKind,
        /// Message reported by the hub
        message: String,
    },

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// YAML serialization error, raised while rendering diffs.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error, also raised when a hub reply has an unexpected shape.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Error {
    /// Creates a new remote fault.
    pub fn rpc(method: impl Into<String>, fault: FaultKind, message: impl Into<String>) -> Self {
        Self::Rpc {
            method: method.into(),
            fault,
            message: message.into(),
        }
    }

    /// Creates a new not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns true for configuration errors, which are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::DuplicateName { .. }
                | Error::DuplicatePriority { .. }
                | Error::InvalidParameter(_)
                | Error::MissingParameter(_)
                | Error::Unsupported(_)
                | Error::Config(_)
        )
    }

    /// Returns true if the hub reported a fault whose message contains
    /// `fragment`.
    ///
    /// Used for calls whose only signal of prior state is the fault itself,
    /// such as granting content generator access twice.
    pub fn is_conflict(&self, fragment: &str) -> bool {
        match self {
            Error::Rpc { message, .. } => message.contains(fragment),
            _ => false,
        }
    }

    /// Returns true if the hub rejected the keyword argument `arg`.
    ///
    /// Older hubs raise a `ParameterError` (or a bare `TypeError` relayed as
    /// a generic fault) mentioning the argument name.
    pub fn is_unexpected_argument(&self, arg: &str) -> bool {
        match self {
            Error::Rpc {
                fault: FaultKind::Parameter | FaultKind::Generic,
                message,
                ..
            } => {
                message.contains("unexpected keyword argument")
                    && message.contains(&format!("'{arg}'"))
            }
            _ => false,
        }
    }

    /// Returns true if the hub does not know the method at all.
    pub fn is_unknown_method(&self) -> bool {
        match self {
            Error::Rpc {
                method, message, ..
            } => message.contains(&format!("Invalid method: {method}")),
            _ => false,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            e if e.is_configuration() => 4,
            Error::NotFound { .. } => 5,
            Error::Rpc {
                fault: FaultKind::Permission | FaultKind::Auth,
                ..
            } => 3,
            Error::Rpc { .. } => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detection() {
        let err = Error::rpc(
            "grantCGAccess",
            FaultKind::Generic,
            "User already has access to content generator",
        );
        assert!(err.is_conflict("already has access"));
        assert!(!err.is_conflict("no such user"));
        assert!(!Error::not_found("user", "bob").is_conflict("already"));
    }

    #[test]
    fn test_unexpected_argument_detection() {
        let err = Error::rpc(
            "listPackages",
            FaultKind::Parameter,
            "listPackages() got an unexpected keyword argument 'with_owners'",
        );
        assert!(err.is_unexpected_argument("with_owners"));
        assert!(!err.is_unexpected_argument("inherited"));

        let denied = Error::rpc(
            "listPackages",
            FaultKind::Permission,
            "got an unexpected keyword argument 'with_owners'",
        );
        assert!(!denied.is_unexpected_argument("with_owners"));
    }

    #[test]
    fn test_unknown_method_detection() {
        let err = Error::rpc("listCGs", FaultKind::Generic, "Invalid method: listCGs");
        assert!(err.is_unknown_method());
        let other = Error::rpc("getTag", FaultKind::Generic, "Invalid method: listCGs");
        assert!(!other.is_unknown_method());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            Error::DuplicatePriority {
                kind: "external repo",
                priority: 10
            }
            .exit_code(),
            4
        );
        assert_eq!(Error::not_found("parent tag", "base").exit_code(), 5);
        assert_eq!(
            Error::rpc("createTag", FaultKind::Permission, "admin required").exit_code(),
            3
        );
        assert_eq!(
            Error::rpc("createTag", FaultKind::Generic, "boom").exit_code(),
            2
        );
    }

    #[test]
    fn test_display() {
        let err = Error::not_found("parent tag", "base");
        assert_eq!(err.to_string(), "parent tag 'base' not found");

        let err = Error::DuplicateName {
            kind: "external repo",
            name: "centos".into(),
        };
        assert_eq!(err.to_string(), "duplicate external repo name 'centos'");
    }
}
