//! Configuration for resolution runs and output emission.

use serde::{Deserialize, Serialize};

/// What dereferencing does with a reference that closes a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircularPolicy {
    /// Leave the reference in place as a pointer (the output is only
    /// partially dereferenced but still valid).
    #[default]
    Ignore,
    /// Fail the run with `ResolveError::CircularReference`.
    Error,
}

/// Options for a bundle or dereference run.
///
/// ## Serialization Format
///
/// Fields are serialized in `kebab-case` (e.g., `namespace-prefix`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ResolveOptions {
    /// Circular reference handling for dereferencing. Bundling always keeps
    /// cycles as pointers.
    pub circular: CircularPolicy,
    /// Prefix of the top-level keys that hold merged external documents
    /// in bundle output.
    pub namespace_prefix: String,
    /// Upper bound on sources loaded concurrently. `0` or `1` loads strictly
    /// one source at a time.
    pub max_parallel_loads: usize,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            circular: CircularPolicy::Ignore,
            namespace_prefix: "x-bundled-".to_string(),
            max_parallel_loads: 4,
        }
    }
}

/// Output serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

/// Formatting options for [`crate::emit::emit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct EmitOptions {
    pub format: OutputFormat,
    /// Spaces per nesting level. For JSON, `0` means compact output.
    pub indent: usize,
    /// YAML only: fold long strings at this column. `None` never folds.
    pub wrap: Option<usize>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::Json,
            indent: 2,
            wrap: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_options_serde_round_trip() {
        let opts = ResolveOptions {
            circular: CircularPolicy::Error,
            namespace_prefix: "x-ext-".to_string(),
            max_parallel_loads: 1,
        };

        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"namespace-prefix\""));
        assert!(json.contains("\"max-parallel-loads\""));
        assert!(json.contains("\"error\""));

        let deserialized: ResolveOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.circular, CircularPolicy::Error);
        assert_eq!(deserialized.namespace_prefix, "x-ext-");
        assert_eq!(deserialized.max_parallel_loads, 1);
    }

    #[test]
    fn test_partial_options_fill_defaults() {
        let opts: ResolveOptions = serde_json::from_str(r#"{"circular": "error"}"#).unwrap();
        assert_eq!(opts.circular, CircularPolicy::Error);
        assert_eq!(opts.namespace_prefix, "x-bundled-");

        let emit: EmitOptions = serde_json::from_str(r#"{"format": "yaml", "wrap": 80}"#).unwrap();
        assert_eq!(emit.format, OutputFormat::Yaml);
        assert_eq!(emit.indent, 2);
        assert_eq!(emit.wrap, Some(80));
    }
}
