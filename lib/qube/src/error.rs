//! Qube Error Types

use thiserror::Error;

use crate::types::EntryKind;

/// Exit code for validation, not-found, duplicate and integrity failures.
pub const EXIT_VALIDATION: i32 = 3;

/// Outcome of a failed Cluster Resource Controller call.
///
/// Only `NotFound` is benign; callers decide whether `Failed` aborts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Controller call failed: {0}")]
    Failed(String),
}

impl ControllerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::NotFound(_))
    }
}

#[derive(Error, Debug)]
pub enum QubeError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{kind} [{identity}] not found. Known: [{}]", .known.join(", "))]
    NotFound {
        kind: EntryKind,
        identity: String,
        known: Vec<String>,
    },

    #[error("{kind} name [{identity}] already exists, names must be unique")]
    DuplicateIdentity { kind: EntryKind, identity: String },

    #[error("Resource absent: {0}")]
    ResourceAbsent(String),

    #[error("Failed to resolve {what} for [{identity}]: {reason}")]
    ResourceQuery {
        what: &'static str,
        identity: String,
        reason: String,
    },

    #[error("Assertion failed: {0}")]
    Assertion(String),

    #[error("Registry integrity error: {0}")]
    Integrity(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cluster controller error: {0}")]
    Controller(String),
}

impl From<ControllerError> for QubeError {
    fn from(e: ControllerError) -> Self {
        match e {
            ControllerError::NotFound(resource) => QubeError::ResourceAbsent(resource),
            ControllerError::Failed(reason) => QubeError::Controller(reason),
        }
    }
}

impl QubeError {
    pub fn not_found(kind: EntryKind, identity: &str, known: Vec<String>) -> Self {
        QubeError::NotFound {
            kind,
            identity: identity.to_string(),
            known,
        }
    }

    /// Process exit code for this error when surfaced by a command.
    pub fn exit_code(&self) -> i32 {
        match self {
            QubeError::Validation(_)
            | QubeError::NotFound { .. }
            | QubeError::DuplicateIdentity { .. }
            | QubeError::Assertion(_)
            | QubeError::Integrity(_)
            | QubeError::Parse(_) => EXIT_VALIDATION,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_lists_known_identities() {
        let err = QubeError::not_found(
            EntryKind::Node,
            "nonexistent",
            vec!["n1".to_string(), "n2".to_string()],
        );
        let msg = err.to_string();
        assert!(msg.contains("nonexistent"));
        assert!(msg.contains("n1, n2"));
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
    }

    #[test]
    fn test_duplicate_identity_display() {
        let err = QubeError::DuplicateIdentity {
            kind: EntryKind::ExternalNode,
            identity: "fed-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "external node name [fed-1] already exists, names must be unique"
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(QubeError::Validation("x".into()).exit_code(), 3);
        assert_eq!(QubeError::Assertion("x".into()).exit_code(), 3);
        assert_eq!(QubeError::Integrity("x".into()).exit_code(), 3);
        assert_eq!(
            QubeError::from(ControllerError::Failed("boom".into())).exit_code(),
            1
        );
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(QubeError::from(io_err).exit_code(), 1);
    }

    #[test]
    fn test_controller_error_classification() {
        assert!(ControllerError::NotFound("deployment/n1".into()).is_not_found());
        assert!(!ControllerError::Failed("timeout".into()).is_not_found());
    }

    #[test]
    fn test_from_controller_error() {
        let absent: QubeError = ControllerError::NotFound("service/n1".into()).into();
        assert!(matches!(absent, QubeError::ResourceAbsent(ref r) if r == "service/n1"));

        let failed: QubeError = ControllerError::Failed("forbidden".into()).into();
        assert!(matches!(failed, QubeError::Controller(_)));
    }

    #[test]
    fn test_from_yaml_error() {
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>("a: [unclosed").unwrap_err();
        let err: QubeError = yaml_err.into();
        assert!(matches!(err, QubeError::Yaml(_)));
    }

    #[test]
    fn test_error_variants_display() {
        let errors: Vec<QubeError> = vec![
            QubeError::Validation("missing config".to_string()),
            QubeError::ResourceAbsent("service/n1".to_string()),
            QubeError::ResourceQuery {
                what: "enode url",
                identity: "n1".to_string(),
                reason: "no line".to_string(),
            },
            QubeError::Assertion("dir not empty".to_string()),
            QubeError::Integrity("duplicate".to_string()),
            QubeError::Parse("bad yaml".to_string()),
            QubeError::Controller("x".to_string()),
        ];

        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }
}
