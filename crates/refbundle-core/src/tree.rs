//! Output tree with shared ownership.
//!
//! A [`Tree`] is a handle to a node; cloning the handle shares the node.
//! Dereferencing hands out one handle per target, so two references to the
//! same target produce subtrees that are the same allocation: a mutation
//! through one handle is visible through every other.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::{Number, Value};

use crate::pointer::split_fragment;

/// One node of the output tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Tree>),
    /// Mapping in document order.
    Object(IndexMap<String, Tree>),
}

/// Shared handle to a [`Node`].
#[derive(Debug, Clone)]
pub struct Tree(Rc<RefCell<Node>>);

impl Tree {
    pub fn new(node: Node) -> Self {
        Tree(Rc::new(RefCell::new(node)))
    }

    /// Deep conversion from a JSON value. No sharing is introduced.
    pub fn from_value(value: &Value) -> Self {
        Tree::new(match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Number(n) => Node::Number(n.clone()),
            Value::String(s) => Node::String(s.clone()),
            Value::Array(items) => Node::Array(items.iter().map(Tree::from_value).collect()),
            Value::Object(obj) => Node::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Tree::from_value(v)))
                    .collect(),
            ),
        })
    }

    /// Deep conversion to a JSON value. Shared subtrees are copied out at
    /// every position they occupy.
    pub fn to_value(&self) -> Value {
        match &*self.borrow() {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => Value::Number(n.clone()),
            Node::String(s) => Value::String(s.clone()),
            Node::Array(items) => Value::Array(items.iter().map(Tree::to_value).collect()),
            Node::Object(obj) => Value::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect(),
            ),
        }
    }

    /// True when both handles point at the same node.
    pub fn ptr_eq(&self, other: &Tree) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn borrow(&self) -> Ref<'_, Node> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Node> {
        self.0.borrow_mut()
    }

    /// Child of a mapping by key, or of a sequence by decimal index.
    pub fn get(&self, key: &str) -> Option<Tree> {
        match &*self.borrow() {
            Node::Object(obj) => obj.get(key).cloned(),
            Node::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
            _ => None,
        }
    }

    /// Look up a node by JSON Pointer fragment (`#/a/b` or `/a/b`).
    pub fn pointer(&self, fragment: &str) -> Option<Tree> {
        let segments = split_fragment(fragment).ok()?;
        let mut current = self.clone();
        for segment in &segments {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn as_str(&self) -> Option<String> {
        match &*self.borrow() {
            Node::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl PartialEq for Tree {
    /// Structural equality.
    fn eq(&self, other: &Tree) -> bool {
        self.ptr_eq(other) || *self.borrow() == *other.borrow()
    }
}

impl From<&Value> for Tree {
    fn from(value: &Value) -> Self {
        Tree::from_value(value)
    }
}

impl Serialize for Tree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &*self.borrow() {
            Node::Null => serializer.serialize_unit(),
            Node::Bool(b) => serializer.serialize_bool(*b),
            Node::Number(n) => n.serialize(serializer),
            Node::String(s) => serializer.serialize_str(s),
            Node::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Node::Object(obj) => {
                let mut map = serializer.serialize_map(Some(obj.len()))?;
                for (k, v) in obj {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}
