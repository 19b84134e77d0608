//! `$ref` string parsing and JSON Pointer (RFC 6901) helpers.
//!
//! A reference string has the shape `{source}#/{segment}/{segment}/...`:
//!
//! - `source` is empty for same-document pointers, otherwise a relative or
//!   absolute location of another document.
//! - The fragment is either empty (the whole document) or a JSON Pointer.
//!
//! Segments are escaped per RFC 6901 (`~1` → `/`, `~0` → `~`).

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// Mapping key denoting a reference.
pub const REF_KEY: &str = "$ref";

/// A parsed `$ref` string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPointer {
    /// The part before `#`, or `None` when the pointer targets its own document.
    pub source: Option<String>,
    /// Decoded path segments. Empty means the document root.
    pub segments: Vec<String>,
}

impl RefPointer {
    /// True when the pointer stays inside the document that contains it.
    pub fn is_local(&self) -> bool {
        self.source.is_none()
    }

    /// The fragment part, re-encoded (`#`, `#/a~1b`, ...).
    pub fn fragment(&self) -> String {
        to_fragment(&self.segments)
    }
}

impl fmt::Display for RefPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            f.write_str(source)?;
        }
        f.write_str(&self.fragment())
    }
}

/// Why a reference string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PointerSyntaxError {
    #[error("fragment must be empty or start with '/', found \"{0}\"")]
    NotAPointer(String),

    #[error("invalid escape in segment \"{0}\" ('~' must be followed by '0' or '1')")]
    InvalidEscape(String),
}

/// Parse a `$ref` string into its source part and decoded segments.
///
/// A string with no `#` names a whole external document.
pub fn parse_reference(reference: &str) -> Result<RefPointer, PointerSyntaxError> {
    let (source, fragment) = match reference.split_once('#') {
        Some((source, fragment)) => (source, fragment),
        None => (reference, ""),
    };

    let source = if source.is_empty() {
        None
    } else {
        Some(source.to_string())
    };

    Ok(RefPointer {
        source,
        segments: split_fragment(fragment)?,
    })
}

/// Split a fragment (without or with its leading `#`) into decoded segments.
///
/// `""` and `"#"` yield no segments. `"#/"` yields one empty segment, which
/// addresses the empty-string key.
pub fn split_fragment(fragment: &str) -> Result<Vec<String>, PointerSyntaxError> {
    let stripped = fragment.strip_prefix('#').unwrap_or(fragment);
    if stripped.is_empty() {
        return Ok(Vec::new());
    }

    let Some(rest) = stripped.strip_prefix('/') else {
        return Err(PointerSyntaxError::NotAPointer(stripped.to_string()));
    };

    rest.split('/')
        .map(|segment| unescape_segment(segment).map(Cow::into_owned))
        .collect()
}

/// Escape a single path segment per RFC 6901.
///
/// - `~` → `~0`
/// - `/` → `~1`
///
/// Returns `Cow::Borrowed` when no escaping is needed (the common case).
pub fn escape_segment(segment: &str) -> Cow<'_, str> {
    if segment.contains('~') || segment.contains('/') {
        Cow::Owned(segment.replace('~', "~0").replace('/', "~1"))
    } else {
        Cow::Borrowed(segment)
    }
}

/// Decode a single path segment per RFC 6901.
///
/// Decoding is a single left-to-right scan, so `~01` becomes `~1` and never
/// `/`. A `~` that does not start `~0` or `~1` is an error.
pub fn unescape_segment(segment: &str) -> Result<Cow<'_, str>, PointerSyntaxError> {
    if !segment.contains('~') {
        return Ok(Cow::Borrowed(segment));
    }

    let mut out = String::with_capacity(segment.len());
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('~'),
            Some('1') => out.push('/'),
            _ => return Err(PointerSyntaxError::InvalidEscape(segment.to_string())),
        }
    }
    Ok(Cow::Owned(out))
}

/// Build a `#`-prefixed fragment from decoded segments.
///
/// # Example
/// ```
/// use refbundle_core::pointer::to_fragment;
/// assert_eq!(to_fragment(&["paths", "/pets"]), "#/paths/~1pets");
/// assert_eq!(to_fragment::<&str>(&[]), "#");
/// ```
pub fn to_fragment<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::from("#");
    for segment in segments {
        out.push('/');
        out.push_str(&escape_segment(segment.as_ref()));
    }
    out
}

// ===========================================================================
// Tests
// ===========================================================================
