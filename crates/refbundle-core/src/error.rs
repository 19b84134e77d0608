//! Error types for reference resolution.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-readable error codes.
///
/// Variant names and their serialized `snake_case` strings are part of the
/// public contract and must not change across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// A `$ref` string has invalid syntax (bad escape, non-pointer fragment).
    MalformedPointer,
    /// An external source could not be read.
    SourceNotFound,
    /// A source was read but is not valid JSON/YAML.
    ParseError,
    /// A pointer names a path that does not exist in its target document.
    UnresolvableReference,
    /// A circular reference was found where it cannot be tolerated.
    CircularReference,
    /// The root document cannot hold the rewritten output.
    InvalidRoot,
}

/// Low-level cause of a [`ResolveError::Parse`].
#[derive(Debug, Clone, Error)]
pub enum ParseCause {
    #[error(transparent)]
    Json(Arc<serde_json::Error>),

    #[error(transparent)]
    Yaml(Arc<serde_yaml::Error>),

    #[error("{0}")]
    Unsupported(String),
}

impl From<serde_json::Error> for ParseCause {
    fn from(err: serde_json::Error) -> Self {
        ParseCause::Json(Arc::new(err))
    }
}

impl From<serde_yaml::Error> for ParseCause {
    fn from(err: serde_yaml::Error) -> Self {
        ParseCause::Yaml(Arc::new(err))
    }
}

/// Every way a bundle or dereference run can fail. All are terminal.
///
/// The type is `Clone` so a failed load can be cached and handed to every
/// caller waiting on the same source.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ResolveError {
    #[error("Invalid $ref pointer \"{pointer}\" at {location}: {reason}")]
    MalformedPointer {
        pointer: String,
        location: String,
        reason: String,
    },

    #[error("Error opening file \"{source_id}\": {cause}")]
    SourceNotFound {
        source_id: String,
        #[source]
        cause: Arc<io::Error>,
    },

    #[error("Error parsing {source_id}: {cause}")]
    Parse {
        source_id: String,
        #[source]
        cause: ParseCause,
    },

    #[error(
        "Error resolving $ref pointer \"{pointer}\" at {location}. Token \"{token}\" does not exist."
    )]
    UnresolvableReference {
        pointer: String,
        location: String,
        token: String,
    },

    #[error("Circular $ref pointer found at {location}")]
    CircularReference { pointer: String, location: String },

    #[error("Cannot rewrite {source_id}: {reason}")]
    InvalidRoot { source_id: String, reason: String },
}

impl ResolveError {
    pub(crate) fn source_not_found(source_id: impl ToString, cause: io::Error) -> Self {
        ResolveError::SourceNotFound {
            source_id: source_id.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn parse(source_id: impl ToString, cause: impl Into<ParseCause>) -> Self {
        ResolveError::Parse {
            source_id: source_id.to_string(),
            cause: cause.into(),
        }
    }

    /// Returns the stable error code for this error variant.
    pub fn code(&self) -> ErrorCode {
        match self {
            ResolveError::MalformedPointer { .. } => ErrorCode::MalformedPointer,
            ResolveError::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            ResolveError::Parse { .. } => ErrorCode::ParseError,
            ResolveError::UnresolvableReference { .. } => ErrorCode::UnresolvableReference,
            ResolveError::CircularReference { .. } => ErrorCode::CircularReference,
            ResolveError::InvalidRoot { .. } => ErrorCode::InvalidRoot,
        }
    }

    /// The offending `$ref` string, when the error is about one.
    pub fn pointer(&self) -> Option<&str> {
        match self {
            ResolveError::MalformedPointer { pointer, .. }
            | ResolveError::UnresolvableReference { pointer, .. }
            | ResolveError::CircularReference { pointer, .. } => Some(pointer),
            _ => None,
        }
    }

    /// Where the error happened: `source#/path` of the reference node, or
    /// the source itself for load failures.
    pub fn location(&self) -> &str {
        match self {
            ResolveError::MalformedPointer { location, .. }
            | ResolveError::UnresolvableReference { location, .. }
            | ResolveError::CircularReference { location, .. } => location,
            ResolveError::SourceNotFound { source_id, .. }
            | ResolveError::Parse { source_id, .. }
            | ResolveError::InvalidRoot { source_id, .. } => source_id,
        }
    }

    /// Produces a structured JSON error.
    ///
    /// Format: `{"code": "...", "message": "...", "location": "...", "pointer": "..." | null}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "location": self.location(),
            "pointer": self.pointer(),
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::error::Error as _;

    #[test]
    fn test_error_code_serializes_snake_case() {
        let json = serde_json::to_value(ErrorCode::UnresolvableReference).unwrap();
        assert_eq!(json, json!("unresolvable_reference"));
    }

    #[test]
    fn test_unresolvable_message_names_token() {
        let err = ResolveError::UnresolvableReference {
            pointer: "#/definitions/Missing".to_string(),
            location: "api.yaml#/paths/~1pets/get".to_string(),
            token: "definitions".to_string(),
        };
        assert!(err.to_string().contains("Token \"definitions\" does not exist."));
        assert_eq!(err.code(), ErrorCode::UnresolvableReference);
        assert_eq!(err.pointer(), Some("#/definitions/Missing"));
    }

    #[test]
    fn test_source_not_found_keeps_cause_chain() {
        let err = ResolveError::source_not_found(
            "/tmp/missing.yaml",
            io::Error::new(io::ErrorKind::NotFound, "no such file or directory"),
        );
        assert!(err
            .to_string()
            .starts_with("Error opening file \"/tmp/missing.yaml\""));
        let cause = err.source().expect("cause should be chained");
        assert!(cause.to_string().contains("no such file or directory"));
    }

    #[test]
    fn test_to_json_shape() {
        let err = ResolveError::CircularReference {
            pointer: "#/definitions/A".to_string(),
            location: "api.yaml#/definitions/B/properties/a".to_string(),
        };
        let json = err.to_json();
        assert_eq!(json["code"], json!("circular_reference"));
        assert_eq!(json["location"], json!("api.yaml#/definitions/B/properties/a"));
        assert_eq!(json["pointer"], json!("#/definitions/A"));
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = ResolveError::source_not_found(
            "b.yaml",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
