//! Source identities and the I/O boundary.
//!
//! [`SourceId`] is the canonical identity of a loadable document: an absolute,
//! fragment-free URL (`file://` for local files). [`SourceIo`] is the seam to
//! whatever actually reads bytes; the engine never touches the file system
//! directly.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

// ---------------------------------------------------------------------------
// SourceId
// ---------------------------------------------------------------------------

/// Canonical identity of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(Url);

impl SourceId {
    /// Identity of a local file. Relative paths are taken against the
    /// current directory.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&absolute).map(Self).map_err(|()| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot express {} as a URL", absolute.display()),
            )
        })
    }

    /// Parse an absolute URL. Any fragment is dropped.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(input)?;
        url.set_fragment(None);
        Ok(Self(url))
    }

    /// Resolve a relative reference (`../common.yaml`, `https://...`)
    /// against this source.
    pub fn join(&self, reference: &str) -> Result<Self, url::ParseError> {
        let mut url = self.0.join(reference)?;
        url.set_fragment(None);
        Ok(Self(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// The local path for `file:` identities.
    pub fn to_file_path(&self) -> Option<PathBuf> {
        if self.0.scheme() == "file" {
            self.0.to_file_path().ok()
        } else {
            None
        }
    }

    /// Last path segment, e.g. `pet.yaml`.
    pub fn file_name(&self) -> &str {
        self.0
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .unwrap_or_default()
    }

    /// File name without its extension, e.g. `pet`.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => Some(&name[idx + 1..]),
            _ => None,
        }
    }

    /// This identity written relative to `base` (`defs/pet.yaml`), or as an
    /// absolute URL when no relative form exists.
    pub fn relative_to(&self, base: &SourceId) -> String {
        base.0
            .make_relative(&self.0)
            .filter(|relative| !relative.is_empty())
            .unwrap_or_else(|| self.0.to_string())
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_file_path() {
            Some(path) => write!(f, "{}", path.display()),
            None => write!(f, "{}", self.0),
        }
    }
}

impl Serialize for SourceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SourceId::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// SourceIo
// ---------------------------------------------------------------------------

/// Reads raw document text and answers identity questions.
///
/// Implementations must be `Sync`: independent sources may be read from
/// several threads at once.
pub trait SourceIo: Sync {
    /// Read the full text of a source.
    fn read(&self, source: &SourceId) -> io::Result<String>;

    /// Map an identity to its canonical form, so that two spellings of the
    /// same document share one cache entry. Relative references keep
    /// resolving against the spelling a document was reached through.
    fn canonicalize(&self, source: &SourceId) -> SourceId {
        source.clone()
    }

    /// Resolve the source part of a `$ref` against the referencing document.
    fn resolve_relative(
        &self,
        base: &SourceId,
        reference: &str,
    ) -> Result<SourceId, url::ParseError> {
        base.join(reference)
    }
}

/// Local file-system access. Only `file:` identities can be read.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsSourceIo;

impl SourceIo for FsSourceIo {
    fn read(&self, source: &SourceId) -> io::Result<String> {
        let path = source.to_file_path().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported source scheme \"{}\"", source.url().scheme()),
            )
        })?;
        fs::read_to_string(path)
    }

    fn canonicalize(&self, source: &SourceId) -> SourceId {
        source
            .to_file_path()
            .and_then(|path| fs::canonicalize(path).ok())
            .and_then(|path| SourceId::from_path(path).ok())
            .unwrap_or_else(|| source.clone())
    }
}

/// In-memory documents, with a read counter per source.
#[derive(Debug, Default)]
pub struct MemorySourceIo {
    files: HashMap<SourceId, String>,
    reads: Mutex<HashMap<SourceId, usize>>,
}

impl MemorySourceIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: SourceId, content: impl Into<String>) {
        self.files.insert(source, content.into());
    }

    /// Builder form of [`MemorySourceIo::insert`].
    pub fn with(mut self, source: SourceId, content: impl Into<String>) -> Self {
        self.insert(source, content);
        self
    }

    /// How many times `source` has been read.
    pub fn read_count(&self, source: &SourceId) -> usize {
        self.reads.lock().get(source).copied().unwrap_or(0)
    }
}

impl SourceIo for MemorySourceIo {
    fn read(&self, source: &SourceId) -> io::Result<String> {
        *self.reads.lock().entry(source.clone()).or_insert(0) += 1;
        self.files.get(source).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such file or directory: {}", source),
            )
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> SourceId {
        SourceId::parse(s).unwrap()
    }

    #[test]
    fn test_join_normalizes_dot_segments() {
        let base = id("file:///specs/api/openapi.yaml");
        let a = base.join("../common/pet.yaml#/Pet").unwrap();
        let b = base.join("./../common/./pet.yaml").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.url().as_str(), "file:///specs/common/pet.yaml");
    }

    #[test]
    fn test_parse_drops_fragment() {
        assert_eq!(
            id("https://example.com/api.json#/paths").url().as_str(),
            "https://example.com/api.json"
        );
    }

    #[test]
    fn test_stem_and_extension() {
        let source = id("file:///specs/pet.store.yaml");
        assert_eq!(source.file_name(), "pet.store.yaml");
        assert_eq!(source.stem(), "pet.store");
        assert_eq!(source.extension(), Some("yaml"));

        let bare = id("file:///specs/.hidden");
        assert_eq!(bare.stem(), ".hidden");
        assert_eq!(bare.extension(), None);
    }

    #[test]
    fn test_relative_to() {
        let root = id("file:///specs/api.yaml");
        let other = id("file:///specs/defs/pet.yaml");
        assert_eq!(other.relative_to(&root), "defs/pet.yaml");

        let remote = id("https://example.com/pet.yaml");
        assert_eq!(remote.relative_to(&root), "https://example.com/pet.yaml");
    }

    #[test]
    fn test_display_uses_file_path() {
        let source = SourceId::from_path("/tmp/api.yaml").unwrap();
        assert_eq!(source.to_string(), "/tmp/api.yaml");
    }

    #[test]
    fn test_memory_io_counts_reads() {
        let source = id("file:///api.yaml");
        let io = MemorySourceIo::new().with(source.clone(), "openapi: 3.0.0");
        assert_eq!(io.read(&source).unwrap(), "openapi: 3.0.0");
        assert_eq!(io.read_count(&source), 1);

        let missing = id("file:///missing.yaml");
        let err = io.read(&missing).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_serializes_as_url() {
        let source = id("file:///specs/api.yaml");
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, "\"file:///specs/api.yaml\"");
        let back: SourceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn test_fs_io_rejects_remote_scheme() {
        let err = FsSourceIo
            .read(&id("https://example.com/api.yaml"))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
