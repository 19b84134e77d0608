//! Bundling: one self-contained document, references kept as pointers.
//!
//! Each external document that is the target of at least one edge gets a
//! namespace: a generated top-level key of the root document. The referenced
//! subtrees of that document are merged under it at their original paths,
//! and every pointer in the output that used to leave the root document is
//! rewritten to point into the namespace. Cycles need no special handling:
//! nothing is expanded, only pointers change.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ResolveOptions;
use crate::error::ResolveError;
use crate::graph::{ref_string, value_at, DocId, Location, RefGraph};
use crate::pointer::{parse_reference, to_fragment, REF_KEY};
use crate::source::SourceId;
use crate::tree::Tree;

/// A generated top-level key and the document merged under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub key: String,
    pub source: SourceId,
}

fn sanitize(stem: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.-]+").expect("valid regex"));
    let cleaned = re.replace_all(stem, "_");
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.into_owned()
    }
}

/// Bundle the documents of `graph` into one tree.
pub(crate) fn bundle_graph(
    graph: &RefGraph,
    options: &ResolveOptions,
) -> Result<(Tree, Vec<Namespace>), ResolveError> {
    let root = &graph.root().root;
    let targeted = targeted_documents(graph);

    if !targeted.is_empty() && !root.is_object() {
        return Err(ResolveError::InvalidRoot {
            source_id: graph.root().id.to_string(),
            reason: "external references can only be bundled into a mapping root".to_string(),
        });
    }

    let keys = assign_namespaces(graph, root, &targeted, &options.namespace_prefix);
    let bundler = Bundler {
        graph,
        keys: targeted.iter().copied().zip(keys.iter().cloned()).collect(),
    };

    let mut output = bundler.rewrite(0, root, &mut Vec::new());
    if let Value::Object(obj) = &mut output {
        for (doc, key) in targeted.iter().zip(&keys) {
            let mut slot = Value::Null;
            for path in merge_roots(graph, *doc) {
                let Some(subtree) = value_at(&graph.document(*doc).root, &path) else {
                    continue;
                };
                let rewritten = bundler.rewrite(*doc, subtree, &mut path.clone());
                insert_at(&mut slot, &path, rewritten);
            }
            obj.insert(key.clone(), slot);
        }
    }

    let namespaces = targeted
        .iter()
        .zip(keys)
        .map(|(doc, key)| Namespace {
            key,
            source: graph.document(*doc).id.clone(),
        })
        .collect();

    Ok((Tree::from_value(&output), namespaces))
}

/// External documents that some edge points into, in discovery order.
fn targeted_documents(graph: &RefGraph) -> Vec<DocId> {
    let targeted: HashSet<DocId> = graph
        .edges()
        .iter()
        .map(|edge| edge.target.doc)
        .filter(|&doc| doc != 0)
        .collect();
    (1..graph.documents().len())
        .filter(|doc| targeted.contains(doc))
        .collect()
}

/// One collision-free key per targeted document.
fn assign_namespaces(
    graph: &RefGraph,
    root: &Value,
    targeted: &[DocId],
    prefix: &str,
) -> Vec<String> {
    let mut used: HashSet<String> = root
        .as_object()
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default();

    targeted
        .iter()
        .map(|&doc| {
            let source = graph.base(doc);
            let base = format!("{}{}", prefix, sanitize(source.stem()));
            let mut key = base.clone();
            let mut n = 2;
            while used.contains(&key) {
                key = format!("{}-{}", base, n);
                n += 1;
            }
            tracing::debug!(namespace = %key, source = %source, "assigned bundle namespace");
            used.insert(key.clone());
            key
        })
        .collect()
}

/// Target paths in `doc` that must be copied, minus those already covered
/// by a copied ancestor.
fn merge_roots(graph: &RefGraph, doc: DocId) -> Vec<Vec<String>> {
    let mut paths: Vec<&Vec<String>> = Vec::new();
    for edge in graph.edges() {
        if edge.target.doc == doc && !paths.contains(&&edge.target.path) {
            paths.push(&edge.target.path);
        }
    }
    paths
        .iter()
        .filter(|path| {
            !paths
                .iter()
                .any(|other| other.len() < path.len() && path.starts_with(other))
        })
        .map(|path| (*path).clone())
        .collect()
}

fn insert_at(slot: &mut Value, path: &[String], value: Value) {
    let Some((head, rest)) = path.split_first() else {
        *slot = value;
        return;
    };
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(obj) = slot {
        let entry = obj.entry(head.clone()).or_insert(Value::Null);
        insert_at(entry, rest, value);
    }
}

struct Bundler<'a> {
    graph: &'a RefGraph,
    keys: HashMap<DocId, String>,
}

impl Bundler<'_> {
    /// Copy `node` (found at `path` in `doc`), rewriting reference pointers.
    fn rewrite(&self, doc: DocId, node: &Value, path: &mut Vec<String>) -> Value {
        match node {
            Value::Object(obj) => {
                let edge = ref_string(node).and_then(|_| {
                    self.graph.edge_at(&Location {
                        doc,
                        path: path.clone(),
                    })
                });

                let mut out = Map::with_capacity(obj.len());
                for (key, child) in obj {
                    match edge {
                        Some(edge) if key == REF_KEY => {
                            out.insert(key.clone(), Value::String(self.pointer_for(edge)));
                            continue;
                        }
                        _ => {}
                    }
                    path.push(key.clone());
                    out.insert(key.clone(), self.rewrite(doc, child, path));
                    path.pop();
                }
                Value::Object(out)
            }
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(i.to_string());
                    out.push(self.rewrite(doc, item, path));
                    path.pop();
                }
                Value::Array(out)
            }
            scalar => scalar.clone(),
        }
    }

    fn pointer_for(&self, edge: usize) -> String {
        let edge = &self.graph.edges()[edge];
        // Fragment-only pointers inside the root keep their text.
        let fragment_only = parse_reference(&edge.pointer).is_ok_and(|p| p.source.is_none());
        if edge.origin.doc == 0 && !edge.is_external() && fragment_only {
            return edge.pointer.clone();
        }
        self.output_pointer(&edge.target)
    }

    /// Where a node of the input ends up in the bundle.
    fn output_pointer(&self, target: &Location) -> String {
        if target.doc == 0 {
            return target.fragment();
        }
        match self.keys.get(&target.doc) {
            Some(key) => {
                let mut segments = Vec::with_capacity(target.path.len() + 1);
                segments.push(key.as_str());
                segments.extend(target.path.iter().map(String::as_str));
                to_fragment(&segments)
            }
            None => target.fragment(),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_graph;
    use crate::loader::Loader;
    use crate::source::MemorySourceIo;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn id(s: &str) -> SourceId {
        SourceId::parse(s).unwrap()
    }

    fn bundle_io(io: &MemorySourceIo, root: &str) -> Result<(Value, Vec<Namespace>), ResolveError> {
        let loader = Loader::new(io, 1);
        let graph = build_graph(&id(root), &loader)?;
        let (tree, namespaces) = bundle_graph(&graph, &ResolveOptions::default())?;
        Ok((tree.to_value(), namespaces))
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("pet store"), "pet_store");
        assert_eq!(sanitize("v1.models"), "v1.models");
        assert_eq!(sanitize("%%"), "_");
        assert_eq!(sanitize(""), "document");
    }

    #[test]
    fn test_local_refs_are_untouched() {
        let io = MemorySourceIo::new().with(
            id("file:///api.json"),
            r##"{"a": {"$ref": "#/defs/S"}, "defs": {"S": {"type": "string"}}}"##,
        );
        let (out, namespaces) = bundle_io(&io, "file:///api.json").unwrap();
        assert!(namespaces.is_empty());
        assert_eq!(
            out,
            json!({"a": {"$ref": "#/defs/S"}, "defs": {"S": {"type": "string"}}})
        );
    }

    #[test]
    fn test_root_naming_itself_by_file_becomes_internal() {
        let io = MemorySourceIo::new().with(
            id("file:///specs/api.json"),
            r##"{"a": {"$ref": "api.json#/defs/S"}, "b": {"$ref": "./api.json"}, "defs": {"S": {"type": "string"}}}"##,
        );
        let (out, namespaces) = bundle_io(&io, "file:///specs/api.json").unwrap();
        assert!(namespaces.is_empty());
        assert_eq!(out["a"], json!({"$ref": "#/defs/S"}));
        assert_eq!(out["b"], json!({"$ref": "#"}));
    }

    #[test]
    fn test_external_subtree_merged_under_namespace() {
        let io = MemorySourceIo::new()
            .with(
                id("file:///fileA.json"),
                r#"{"thing": {"$ref": "fileB.json#/Widget"}}"#,
            )
            .with(
                id("file:///fileB.json"),
                r##"{"Widget": {"properties": {"part": {"$ref": "#/Part"}}}, "Part": {"type": "string"}, "Unused": {}}"##,
            );
        let (out, namespaces) = bundle_io(&io, "file:///fileA.json").unwrap();
        assert_eq!(namespaces[0].key, "x-bundled-fileB");
        assert_eq!(
            out,
            json!({
                "thing": {"$ref": "#/x-bundled-fileB/Widget"},
                "x-bundled-fileB": {
                    "Widget": {"properties": {"part": {"$ref": "#/x-bundled-fileB/Part"}}},
                    "Part": {"type": "string"}
                }
            })
        );
    }

    #[test]
    fn test_equal_stems_get_suffixes() {
        let io = MemorySourceIo::new()
            .with(
                id("file:///api.json"),
                r#"{"a": {"$ref": "v1/models.json#/A"}, "b": {"$ref": "v2/models.json#/B"}, "x-bundled-models-3": 1}"#,
            )
            .with(id("file:///v1/models.json"), r#"{"A": {"type": "string"}}"#)
            .with(id("file:///v2/models.json"), r#"{"B": {"type": "integer"}}"#);
        let (out, namespaces) = bundle_io(&io, "file:///api.json").unwrap();
        let keys: Vec<&str> = namespaces.iter().map(|ns| ns.key.as_str()).collect();
        assert_eq!(keys, ["x-bundled-models", "x-bundled-models-2"]);
        assert_eq!(out["b"], json!({"$ref": "#/x-bundled-models-2/B"}));
        assert_eq!(out["x-bundled-models-2"]["B"], json!({"type": "integer"}));
    }

    #[test]
    fn test_nested_targets_merged_once() {
        let io = MemorySourceIo::new()
            .with(
                id("file:///api.json"),
                r#"{"inner": {"$ref": "lib.json#/A/properties/x"}, "outer": {"$ref": "lib.json#/A"}}"#,
            )
            .with(
                id("file:///lib.json"),
                r#"{"A": {"properties": {"x": {"type": "string"}}}}"#,
            );
        let (out, _) = bundle_io(&io, "file:///api.json").unwrap();
        assert_eq!(
            out["x-bundled-lib"],
            json!({"A": {"properties": {"x": {"type": "string"}}}})
        );
        assert_eq!(out["inner"], json!({"$ref": "#/x-bundled-lib/A/properties/x"}));
    }

    #[test]
    fn test_whole_document_reference() {
        let io = MemorySourceIo::new()
            .with(id("file:///api.json"), r#"{"pet": {"$ref": "pet.json"}}"#)
            .with(id("file:///pet.json"), r#"{"type": "object"}"#);
        let (out, _) = bundle_io(&io, "file:///api.json").unwrap();
        assert_eq!(
            out,
            json!({"pet": {"$ref": "#/x-bundled-pet"}, "x-bundled-pet": {"type": "object"}})
        );
    }

    #[test]
    fn test_cycle_back_into_root_is_rewritten() {
        let io = MemorySourceIo::new()
            .with(
                id("file:///a.json"),
                r#"{"A": {"next": {"$ref": "b.json#/B"}}}"#,
            )
            .with(
                id("file:///b.json"),
                r#"{"B": {"next": {"$ref": "a.json#/A"}}}"#,
            );
        let (out, _) = bundle_io(&io, "file:///a.json").unwrap();
        assert_eq!(
            out,
            json!({
                "A": {"next": {"$ref": "#/x-bundled-b/B"}},
                "x-bundled-b": {"B": {"next": {"$ref": "#/A"}}}
            })
        );
    }

    #[test]
    fn test_sibling_keys_survive() {
        let io = MemorySourceIo::new()
            .with(
                id("file:///api.json"),
                r#"{"p": {"$ref": "lib.json#/S", "description": "site"}}"#,
            )
            .with(id("file:///lib.json"), r#"{"S": {"type": "string"}}"#);
        let (out, _) = bundle_io(&io, "file:///api.json").unwrap();
        assert_eq!(
            out["p"],
            json!({"$ref": "#/x-bundled-lib/S", "description": "site"})
        );
    }

    #[test]
    fn test_non_object_root_with_external_refs_fails() {
        let io = MemorySourceIo::new()
            .with(id("file:///api.json"), r#"[{"$ref": "lib.json#/S"}]"#)
            .with(id("file:///lib.json"), r#"{"S": {}}"#);
        let err = bundle_io(&io, "file:///api.json").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::InvalidRoot);
    }
}
