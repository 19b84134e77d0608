//! Reference graph construction.
//!
//! Walks the root document depth-first. Every Reference Node found becomes
//! an [`Edge`] from its own location to the concrete node it points at; the
//! target's subtree is walked right away, loading further documents as they
//! are referenced. Each subtree is walked at most once, so the walk
//! terminates even when the references form cycles.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ResolveError;
use crate::loader::{Document, Loader};
use crate::pointer::{parse_reference, to_fragment, RefPointer, REF_KEY};
use crate::source::SourceId;

/// Index of a document in discovery order. The root document is `0`.
pub type DocId = usize;

/// A node position: a document and a path of decoded segments into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    pub doc: DocId,
    pub path: Vec<String>,
}

impl Location {
    pub fn root(doc: DocId) -> Self {
        Self {
            doc,
            path: Vec::new(),
        }
    }

    pub fn child(&self, token: impl Into<String>) -> Self {
        let mut path = self.path.clone();
        path.push(token.into());
        Self {
            doc: self.doc,
            path,
        }
    }

    pub fn fragment(&self) -> String {
        to_fragment(&self.path)
    }

    /// True when `other` is this node or lies below it.
    pub fn contains(&self, other: &Location) -> bool {
        self.doc == other.doc && other.path.starts_with(&self.path)
    }
}

/// One Reference Node, resolved.
#[derive(Debug, Clone)]
pub struct Edge {
    /// Where the Reference Node sits.
    pub origin: Location,
    /// The concrete node it designates.
    pub target: Location,
    /// The `$ref` string as written.
    pub pointer: String,
}

impl Edge {
    pub fn is_external(&self) -> bool {
        self.origin.doc != self.target.doc
    }
}

/// Every document and edge reachable from the root.
#[derive(Debug)]
pub struct RefGraph {
    documents: Vec<Arc<Document>>,
    /// The spelling each document was first reached through. Relative
    /// references resolve against it, not against the canonical id.
    bases: Vec<SourceId>,
    edges: Vec<Edge>,
    by_origin: HashMap<Location, usize>,
}

impl RefGraph {
    pub fn root(&self) -> &Document {
        &self.documents[0]
    }

    pub fn documents(&self) -> &[Arc<Document>] {
        &self.documents
    }

    pub fn document(&self, doc: DocId) -> &Document {
        &self.documents[doc]
    }

    pub fn base(&self, doc: DocId) -> &SourceId {
        &self.bases[doc]
    }

    /// Edges in discovery order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The edge whose Reference Node sits exactly at `origin`.
    pub fn edge_at(&self, origin: &Location) -> Option<usize> {
        self.by_origin.get(origin).copied()
    }

    /// Edges whose Reference Node lies inside the subtree at `loc`, in
    /// discovery order.
    pub fn edges_within<'a>(&'a self, loc: &'a Location) -> impl Iterator<Item = usize> + 'a {
        self.edges
            .iter()
            .enumerate()
            .filter(move |(_, edge)| loc.contains(&edge.origin))
            .map(|(idx, _)| idx)
    }

    pub fn value_at(&self, loc: &Location) -> Option<&Value> {
        value_at(&self.documents[loc.doc].root, &loc.path)
    }

    /// `source#/path` form of a location, for messages.
    pub fn describe(&self, loc: &Location) -> String {
        format!("{}{}", self.documents[loc.doc].id, loc.fragment())
    }
}

/// Load `root` and everything reachable from it.
pub(crate) fn build_graph(root: &SourceId, loader: &Loader<'_>) -> Result<RefGraph, ResolveError> {
    let mut builder = GraphBuilder {
        loader,
        documents: Vec::new(),
        bases: Vec::new(),
        doc_ids: HashMap::new(),
        edges: Vec::new(),
        by_origin: HashMap::new(),
        traversed: Vec::new(),
    };

    let root_doc = loader.load(root)?;
    let root_id = builder.register(root_doc, root);
    builder.traverse(Location::root(root_id))?;

    tracing::debug!(
        documents = builder.documents.len(),
        edges = builder.edges.len(),
        "reference graph built"
    );

    Ok(RefGraph {
        documents: builder.documents,
        bases: builder.bases,
        edges: builder.edges,
        by_origin: builder.by_origin,
    })
}

/// The `$ref` string of a Reference Node, if `node` is one.
pub(crate) fn ref_string(node: &Value) -> Option<&str> {
    node.as_object()?.get(REF_KEY)?.as_str()
}

pub(crate) fn value_at<'v>(root: &'v Value, path: &[String]) -> Option<&'v Value> {
    path.iter().try_fold(root, |node, token| child(node, token))
}

fn child<'v>(node: &'v Value, token: &str) -> Option<&'v Value> {
    match node {
        Value::Object(obj) => obj.get(token),
        Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

struct GraphBuilder<'l, 'io> {
    loader: &'l Loader<'io>,
    documents: Vec<Arc<Document>>,
    bases: Vec<SourceId>,
    doc_ids: HashMap<SourceId, DocId>,
    edges: Vec<Edge>,
    by_origin: HashMap<Location, usize>,
    /// Roots of subtrees already walked.
    traversed: Vec<Location>,
}

impl GraphBuilder<'_, '_> {
    fn register(&mut self, doc: Arc<Document>, base: &SourceId) -> DocId {
        if let Some(&id) = self.doc_ids.get(&doc.id) {
            return id;
        }
        let id = self.documents.len();
        self.doc_ids.insert(doc.id.clone(), id);
        self.prefetch_external(&doc, base);
        self.documents.push(doc);
        self.bases.push(base.clone());
        id
    }

    /// Start loading every external source a fresh document mentions.
    fn prefetch_external(&self, doc: &Document, base: &SourceId) {
        let mut references = Vec::new();
        collect_ref_strings(&doc.root, &mut references);

        let io = self.loader.io();
        let mut sources: Vec<SourceId> = Vec::new();
        for reference in references {
            let Ok(RefPointer {
                source: Some(source),
                ..
            }) = parse_reference(reference)
            else {
                continue;
            };
            let Ok(id) = io.resolve_relative(base, &source) else {
                continue;
            };
            if id != *base && !self.doc_ids.contains_key(&id) && !sources.contains(&id) {
                sources.push(id);
            }
        }

        self.loader.prefetch(&sources);
    }

    fn traverse(&mut self, loc: Location) -> Result<(), ResolveError> {
        if self.traversed.iter().any(|done| done.contains(&loc)) {
            return Ok(());
        }
        self.traversed.push(loc.clone());

        let doc = Arc::clone(&self.documents[loc.doc]);
        let Some(node) = value_at(&doc.root, &loc.path) else {
            return Ok(());
        };
        let mut path = loc.path;
        self.walk(loc.doc, node, &mut path)
    }

    fn walk(&mut self, doc: DocId, node: &Value, path: &mut Vec<String>) -> Result<(), ResolveError> {
        match node {
            Value::Object(obj) => {
                let reference = ref_string(node);
                if let Some(reference) = reference {
                    self.record(doc, path, reference)?;
                }
                for (key, child) in obj {
                    if reference.is_some() && key == REF_KEY {
                        continue;
                    }
                    path.push(key.clone());
                    self.walk(doc, child, path)?;
                    path.pop();
                }
            }
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    path.push(i.to_string());
                    self.walk(doc, item, path)?;
                    path.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn record(&mut self, doc: DocId, path: &[String], reference: &str) -> Result<(), ResolveError> {
        let origin = Location {
            doc,
            path: path.to_vec(),
        };
        if self.by_origin.contains_key(&origin) {
            return Ok(());
        }

        let target = self.resolve(&origin, reference)?;
        tracing::trace!(
            origin = %self.describe(&origin),
            target = %self.describe(&target),
            "edge"
        );

        self.by_origin.insert(origin.clone(), self.edges.len());
        self.edges.push(Edge {
            origin,
            target: target.clone(),
            pointer: reference.to_string(),
        });

        self.traverse(target)
    }

    /// Resolve the `$ref` string found at `origin` to a concrete location.
    fn resolve(&mut self, origin: &Location, reference: &str) -> Result<Location, ResolveError> {
        let pointer = self.parse(origin, reference)?;
        let doc = match &pointer.source {
            None => origin.doc,
            Some(source) => self.load_relative(origin, source, reference)?,
        };
        let mut hops = Vec::new();
        self.locate(doc, &pointer.segments, reference, origin, &mut hops)
    }

    fn parse(&self, origin: &Location, reference: &str) -> Result<RefPointer, ResolveError> {
        parse_reference(reference).map_err(|err| ResolveError::MalformedPointer {
            pointer: reference.to_string(),
            location: self.describe(origin),
            reason: err.to_string(),
        })
    }

    fn load_relative(
        &mut self,
        origin: &Location,
        source: &str,
        reference: &str,
    ) -> Result<DocId, ResolveError> {
        let base = &self.bases[origin.doc];
        let id = self
            .loader
            .io()
            .resolve_relative(base, source)
            .map_err(|err| ResolveError::MalformedPointer {
                pointer: reference.to_string(),
                location: self.describe(origin),
                reason: err.to_string(),
            })?;
        let doc = self.loader.load(&id)?;
        Ok(self.register(doc, &id))
    }

    /// Walk `segments` inside `doc`. A Reference Node met before the last
    /// segment is followed, so the result is always the concrete node.
    fn locate(
        &mut self,
        doc: DocId,
        segments: &[String],
        reference: &str,
        origin: &Location,
        hops: &mut Vec<Location>,
    ) -> Result<Location, ResolveError> {
        let document = Arc::clone(&self.documents[doc]);
        let mut node = &document.root;

        for (i, token) in segments.iter().enumerate() {
            // Sibling keys of an extended reference override its target.
            let sibling = token != REF_KEY && child(node, token).is_some();
            if let Some(inner) = ref_string(node).filter(|_| !sibling) {
                let here = Location {
                    doc,
                    path: segments[..i].to_vec(),
                };
                if hops.contains(&here) {
                    return Err(ResolveError::CircularReference {
                        pointer: reference.to_string(),
                        location: self.describe(origin),
                    });
                }
                hops.push(here.clone());

                let inner_pointer = self.parse(&here, inner)?;
                let inner_doc = match &inner_pointer.source {
                    None => doc,
                    Some(source) => self.load_relative(&here, source, inner)?,
                };
                let base = self.locate(inner_doc, &inner_pointer.segments, inner, &here, hops)?;

                let mut rest = base.path;
                rest.extend_from_slice(&segments[i..]);
                return self.locate(base.doc, &rest, reference, origin, hops);
            }

            node = child(node, token).ok_or_else(|| ResolveError::UnresolvableReference {
                pointer: reference.to_string(),
                location: self.describe(origin),
                token: token.clone(),
            })?;
        }

        Ok(Location {
            doc,
            path: segments.to_vec(),
        })
    }

    fn describe(&self, loc: &Location) -> String {
        format!("{}{}", self.documents[loc.doc].id, loc.fragment())
    }
}

fn collect_ref_strings<'v>(node: &'v Value, out: &mut Vec<&'v str>) {
    match node {
        Value::Object(obj) => {
            if let Some(reference) = ref_string(node) {
                out.push(reference);
            }
            for child in obj.values() {
                collect_ref_strings(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_ref_strings(item, out);
            }
        }
        _ => {}
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::source::MemorySourceIo;

    fn id(s: &str) -> SourceId {
        SourceId::parse(s).unwrap()
    }

    fn build(io: &MemorySourceIo, root: &str) -> Result<RefGraph, ResolveError> {
        let loader = Loader::new(io, 1);
        build_graph(&id(root), &loader)
    }

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_ref_free_document_has_no_edges() {
        let io = MemorySourceIo::new().with(id("file:///api.yaml"), "info:\n  title: t\n");
        let graph = build(&io, "file:///api.yaml").unwrap();
        assert!(graph.edges().is_empty());
        assert_eq!(graph.documents().len(), 1);
    }

    #[test]
    fn test_local_edges_in_document_order() {
        let io = MemorySourceIo::new().with(
            id("file:///api.yaml"),
            r##"
paths:
  /pets:
    get:
      schema:
        $ref: "#/definitions/Pet"
definitions:
  Pet:
    properties:
      owner:
        $ref: "#/definitions/Owner"
  Owner:
    type: object
"##,
        );
        let graph = build(&io, "file:///api.yaml").unwrap();
        let edges = graph.edges();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].origin.path, path(&["paths", "/pets", "get", "schema"]));
        assert_eq!(edges[0].target, Location { doc: 0, path: path(&["definitions", "Pet"]) });
        assert_eq!(edges[1].pointer, "#/definitions/Owner");
        assert!(!edges[0].is_external());
    }

    #[test]
    fn test_external_document_loaded_once() {
        let io = MemorySourceIo::new()
            .with(
                id("file:///specs/fileA.yaml"),
                "a:\n  $ref: fileB.yaml#/Widget\nb:\n  $ref: ./fileB.yaml#/Widget\n",
            )
            .with(id("file:///specs/fileB.yaml"), "Widget:\n  type: object\n");
        let graph = build(&io, "file:///specs/fileA.yaml").unwrap();

        assert_eq!(graph.documents().len(), 2);
        assert_eq!(io.read_count(&id("file:///specs/fileB.yaml")), 1);
        let edges = graph.edges();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(Edge::is_external));
        assert_eq!(edges[0].target, edges[1].target);
    }

    #[test]
    fn test_references_inside_external_docs_resolve_relative_to_them() {
        let io = MemorySourceIo::new()
            .with(id("file:///api.yaml"), "pet:\n  $ref: defs/pet.yaml#/Pet\n")
            .with(
                id("file:///defs/pet.yaml"),
                "Pet:\n  properties:\n    tag:\n      $ref: '#/Tag'\n    owner:\n      $ref: ../people/owner.yaml\nTag:\n  type: string\n",
            )
            .with(id("file:///people/owner.yaml"), "type: object\n");
        let graph = build(&io, "file:///api.yaml").unwrap();

        assert_eq!(graph.documents().len(), 3);
        let pet_doc = graph.edges()[0].target.doc;
        let tag = &graph.edges()[1];
        assert_eq!(tag.origin.doc, pet_doc);
        assert_eq!(tag.target, Location { doc: pet_doc, path: path(&["Tag"]) });
        let owner = &graph.edges()[2];
        assert_eq!(graph.document(owner.target.doc).id, id("file:///people/owner.yaml"));
        assert!(owner.target.path.is_empty());
    }

    #[test]
    fn test_unreferenced_parts_of_external_docs_are_not_walked() {
        let io = MemorySourceIo::new()
            .with(id("file:///api.yaml"), "w:\n  $ref: lib.yaml#/Used\n")
            .with(
                id("file:///lib.yaml"),
                "Used:\n  type: string\nUnused:\n  $ref: missing.yaml\n",
            );
        let graph = build(&io, "file:///api.yaml").unwrap();
        assert_eq!(graph.edges().len(), 1);
    }

    #[test]
    fn test_pointer_through_intermediate_reference() {
        let io = MemorySourceIo::new()
            .with(
                id("file:///api.yaml"),
                "definitions:\n  A:\n    $ref: models.yaml#/Pet\nname:\n  $ref: '#/definitions/A/properties/name'\n",
            )
            .with(
                id("file:///models.yaml"),
                "Pet:\n  properties:\n    name:\n      type: string\n",
            );
        let graph = build(&io, "file:///api.yaml").unwrap();
        let name_edge = graph
            .edge_at(&Location { doc: 0, path: path(&["name"]) })
            .unwrap();
        let target = &graph.edges()[name_edge].target;
        assert_eq!(target.doc, 1);
        assert_eq!(target.path, path(&["Pet", "properties", "name"]));
    }

    #[test]
    fn test_pointer_into_extended_reference_sibling() {
        let io = MemorySourceIo::new().with(
            id("file:///api.json"),
            r##"{"p": {"$ref": "#/defs/S", "description": "site"},
                 "d": {"$ref": "#/p/description"},
                 "t": {"$ref": "#/p/type"},
                 "defs": {"S": {"type": "string"}}}"##,
        );
        let graph = build(&io, "file:///api.json").unwrap();
        let target = |key: &str| {
            let edge = graph
                .edge_at(&Location { doc: 0, path: path(&[key]) })
                .unwrap();
            graph.edges()[edge].target.path.clone()
        };
        assert_eq!(target("d"), path(&["p", "description"]));
        assert_eq!(target("t"), path(&["defs", "S", "type"]));
    }

    #[test]
    fn test_missing_token_is_unresolvable() {
        let io = MemorySourceIo::new().with(
            id("file:///api.yaml"),
            "paths:\n  /x:\n    $ref: '#/definitions/Missing'\n",
        );
        let err = build(&io, "file:///api.yaml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnresolvableReference);
        assert!(err.to_string().contains("Token \"definitions\" does not exist."));
        assert_eq!(err.location(), "/api.yaml#/paths/~1x");
    }

    #[test]
    fn test_array_index_out_of_range() {
        let io = MemorySourceIo::new().with(
            id("file:///api.yaml"),
            "list: [a, b]\nr:\n  $ref: '#/list/5'\n",
        );
        let err = build(&io, "file:///api.yaml").unwrap_err();
        assert!(err.to_string().contains("Token \"5\" does not exist."));
    }

    #[test]
    fn test_missing_file_is_source_not_found() {
        let io = MemorySourceIo::new()
            .with(id("file:///api.yaml"), "x:\n  $ref: nope.yaml#/A\n");
        let err = build(&io, "file:///api.yaml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::SourceNotFound);
        assert!(err.to_string().contains("/nope.yaml"));
    }

    #[test]
    fn test_bad_escape_is_malformed_pointer() {
        let io = MemorySourceIo::new()
            .with(id("file:///api.yaml"), "x:\n  $ref: '#/a~b'\na~b: 1\n");
        let err = build(&io, "file:///api.yaml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::MalformedPointer);
        assert_eq!(err.pointer(), Some("#/a~b"));
    }

    #[test]
    fn test_cyclic_documents_terminate() {
        let io = MemorySourceIo::new()
            .with(id("file:///a.yaml"), "A:\n  next:\n    $ref: b.yaml#/B\n")
            .with(id("file:///b.yaml"), "B:\n  next:\n    $ref: a.yaml#/A\n");
        let graph = build(&io, "file:///a.yaml").unwrap();
        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.edges()[1].target, Location { doc: 0, path: path(&["A"]) });
    }

    #[test]
    fn test_looping_intermediate_chain_fails() {
        let io = MemorySourceIo::new().with(
            id("file:///api.yaml"),
            "a:\n  $ref: '#/a/b'\n",
        );
        let err = build(&io, "file:///api.yaml").unwrap_err();
        assert_eq!(err.code(), ErrorCode::CircularReference);
    }

    #[test]
    fn test_non_string_ref_is_plain_data() {
        let io = MemorySourceIo::new().with(
            id("file:///api.json"),
            r#"{"properties": {"$ref": {"type": "string"}}}"#,
        );
        let graph = build(&io, "file:///api.json").unwrap();
        assert!(graph.edges().is_empty());
    }
}
