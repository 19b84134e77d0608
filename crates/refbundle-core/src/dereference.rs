//! Dereferencing: inline every reference that does not close a cycle.
//!
//! The output is built top-down from the root document. Each container is
//! materialized once per [`Location`] and memoized, so every reference to a
//! target, and the target's own position in the root document, yields the
//! same [`Tree`] handle.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::config::{CircularPolicy, ResolveOptions};
use crate::cycles::CycleReport;
use crate::error::ResolveError;
use crate::graph::{ref_string, Edge, Location, RefGraph};
use crate::pointer::REF_KEY;
use crate::tree::{Node, Tree};

pub(crate) fn dereference_graph(
    graph: &RefGraph,
    report: &CycleReport,
    options: &ResolveOptions,
) -> Result<Tree, ResolveError> {
    if options.circular == CircularPolicy::Error {
        if let Some(&idx) = report.back_edges().first() {
            let edge = &graph.edges()[idx];
            return Err(ResolveError::CircularReference {
                pointer: edge.pointer.clone(),
                location: graph.describe(&edge.origin),
            });
        }
    }

    let mut dereferencer = Dereferencer {
        graph,
        report,
        memo: HashMap::new(),
    };
    Ok(dereferencer.build(&Location::root(0)))
}

struct Dereferencer<'a> {
    graph: &'a RefGraph,
    report: &'a CycleReport,
    memo: HashMap<Location, Tree>,
}

impl<'a> Dereferencer<'a> {
    fn build(&mut self, loc: &Location) -> Tree {
        if let Some(tree) = self.memo.get(loc) {
            return tree.clone();
        }

        let graph = self.graph;
        let Some(value) = graph.value_at(loc) else {
            return Tree::new(Node::Null);
        };

        let tree = match value {
            Value::Object(obj) => match ref_string(value).and_then(|_| graph.edge_at(loc)) {
                Some(edge) => self.reference(loc, obj, edge),
                None => self.object(loc, obj),
            },
            Value::Array(items) => Tree::new(Node::Array(
                (0..items.len())
                    .map(|i| self.build(&loc.child(i.to_string())))
                    .collect(),
            )),
            scalar => return Tree::from_value(scalar),
        };

        self.memo.insert(loc.clone(), tree.clone());
        tree
    }

    fn object(&mut self, loc: &Location, obj: &'a Map<String, Value>) -> Tree {
        let entries = obj
            .keys()
            .map(|key| (key.clone(), self.build(&loc.child(key.as_str()))))
            .collect();
        Tree::new(Node::Object(entries))
    }

    fn reference(&mut self, loc: &Location, obj: &'a Map<String, Value>, idx: usize) -> Tree {
        let graph = self.graph;
        let edge = &graph.edges()[idx];

        if self.report.is_cyclic(idx) {
            let pointer = self.root_relative(edge);
            tracing::warn!(
                location = %graph.describe(loc),
                pointer = %pointer,
                "circular $ref left in place"
            );
            let mut entries = IndexMap::with_capacity(obj.len());
            for key in obj.keys() {
                let child = if key == REF_KEY {
                    Tree::new(Node::String(pointer.clone()))
                } else {
                    self.build(&loc.child(key.as_str()))
                };
                entries.insert(key.clone(), child);
            }
            return Tree::new(Node::Object(entries));
        }

        let target = self.build(&edge.target);
        if obj.len() == 1 {
            return target;
        }

        let base = match &*target.borrow() {
            Node::Object(entries) => Some(entries.clone()),
            _ => None,
        };
        let Some(mut merged) = base else {
            tracing::warn!(
                location = %graph.describe(loc),
                "target of extended $ref is not a mapping; sibling keys dropped"
            );
            return target;
        };

        for key in obj.keys().filter(|key| *key != REF_KEY) {
            let child = self.build(&loc.child(key.as_str()));
            merged.insert(key.clone(), child);
        }
        Tree::new(Node::Object(merged))
    }

    /// A pointer to `edge`'s target that resolves from the root document.
    fn root_relative(&self, edge: &Edge) -> String {
        let target = &edge.target;
        if target.doc == 0 {
            return target.fragment();
        }
        let source = self
            .graph
            .base(target.doc)
            .relative_to(self.graph.base(0));
        if target.path.is_empty() {
            source
        } else {
            format!("{}{}", source, target.fragment())
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
