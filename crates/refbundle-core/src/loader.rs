//! Document loading and per-run caching.
//!
//! The [`Loader`] owns the Document Set of one run. Each canonical
//! [`SourceId`] gets exactly one slot; the first caller fills it and every
//! other caller (on any thread) waits for and shares that result, error
//! included.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::{Map, Number, Value};

use crate::error::{ParseCause, ResolveError};
use crate::source::{SourceId, SourceIo};

/// A parsed document and its canonical identity.
#[derive(Debug)]
pub struct Document {
    pub id: SourceId,
    pub root: Value,
}

type LoadSlot = Arc<OnceLock<Result<Arc<Document>, ResolveError>>>;

pub(crate) struct Loader<'io> {
    io: &'io dyn SourceIo,
    slots: Mutex<HashMap<SourceId, LoadSlot>>,
    max_parallel: usize,
}

impl<'io> Loader<'io> {
    pub fn new(io: &'io dyn SourceIo, max_parallel: usize) -> Self {
        Self {
            io,
            slots: Mutex::new(HashMap::new()),
            max_parallel,
        }
    }

    pub fn io(&self) -> &'io dyn SourceIo {
        self.io
    }

    /// Load a source, or return the cached result of an earlier load.
    pub fn load(&self, source: &SourceId) -> Result<Arc<Document>, ResolveError> {
        let canonical = self.io.canonicalize(source);
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(slots.entry(canonical.clone()).or_default())
        };
        slot.get_or_init(|| self.read_and_parse(&canonical)).clone()
    }

    /// Warm the cache for several independent sources concurrently.
    ///
    /// Failures are cached, not returned: they surface only if the source
    /// is later requested through [`Loader::load`].
    pub fn prefetch(&self, sources: &[SourceId]) {
        if self.max_parallel <= 1 || sources.len() < 2 {
            return;
        }

        let next = AtomicUsize::new(0);
        let workers = self.max_parallel.min(sources.len());
        tracing::debug!(count = sources.len(), workers, "prefetching sources");

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let idx = next.fetch_add(1, Ordering::Relaxed);
                    let Some(source) = sources.get(idx) else {
                        break;
                    };
                    let _ = self.load(source);
                });
            }
        });
    }

    fn read_and_parse(&self, source: &SourceId) -> Result<Arc<Document>, ResolveError> {
        let text = self
            .io
            .read(source)
            .map_err(|err| ResolveError::source_not_found(source, err))?;
        let root = parse_document(source, &text)?;
        tracing::debug!(source = %source, bytes = text.len(), "loaded source");
        Ok(Arc::new(Document {
            id: source.clone(),
            root,
        }))
    }
}

/// Parse document text, choosing the parser by file extension.
///
/// `.json` goes through serde_json; everything else through serde_yaml,
/// which also accepts JSON.
pub(crate) fn parse_document(source: &SourceId, text: &str) -> Result<Value, ResolveError> {
    let is_json = source
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        return serde_json::from_str(text).map_err(|err| ResolveError::parse(source, err));
    }

    let yaml: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|err| ResolveError::parse(source, err))?;
    yaml_to_json(yaml).map_err(|cause| ResolveError::parse(source, cause))
}

/// Convert a YAML tree into the JSON data model.
///
/// Non-string mapping keys (`200:`, `true:`) become their string form and
/// tags are dropped.
fn yaml_to_json(value: serde_yaml::Value) -> Result<Value, ParseCause> {
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => yaml_number(&n)?,
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut obj = Map::with_capacity(mapping.len());
            for (key, val) in mapping {
                obj.insert(yaml_key(key)?, yaml_to_json(val)?);
            }
            Value::Object(obj)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

fn yaml_number(n: &serde_yaml::Number) -> Result<Value, ParseCause> {
    if let Some(i) = n.as_u64() {
        return Ok(Value::Number(i.into()));
    }
    if let Some(i) = n.as_i64() {
        return Ok(Value::Number(i.into()));
    }
    n.as_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ParseCause::Unsupported(format!("non-finite number {}", n)))
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, ParseCause> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => yaml_key(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(ParseCause::Unsupported(
            "mapping keys must be scalars".to_string(),
        )),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
