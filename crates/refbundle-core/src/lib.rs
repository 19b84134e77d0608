//! Resolve `$ref` pointers across multi-file JSON/YAML API descriptions.
//!
//! Two operations share one pipeline (load, build the reference graph,
//! detect cycles, rewrite):
//!
//! - [`bundle`] produces a single self-contained document in which every
//!   reference is an internal pointer. External documents are merged under
//!   generated top-level keys.
//! - [`dereference`] inlines every reference that does not close a cycle.
//!   Repeated references share one output node.
//!
//! ```no_run
//! use refbundle_core::{bundle, emit, EmitOptions, FsSourceIo, ResolveOptions, SourceId};
//!
//! let root = SourceId::from_path("openapi.yaml")?;
//! let resolved = bundle(&root, &FsSourceIo, &ResolveOptions::default())?;
//! println!("{}", emit(&resolved.tree, &EmitOptions::default())?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod emit;
pub mod error;
pub mod pointer;
pub mod source;
pub mod tree;

mod bundle;
mod cycles;
mod dereference;
mod graph;
mod loader;

pub use bundle::Namespace;
pub use config::{CircularPolicy, EmitOptions, OutputFormat, ResolveOptions};
pub use cycles::CircularRef;
pub use emit::{emit, EmitError};
pub use error::{ErrorCode, ResolveError};
pub use loader::Document;
pub use source::{FsSourceIo, MemorySourceIo, SourceId, SourceIo};
pub use tree::{Node, Tree};

use cycles::{detect_cycles, CycleReport};
use graph::{build_graph, RefGraph};
use loader::Loader;

/// Output of a [`bundle`] or [`dereference`] run.
#[derive(Debug)]
pub struct Resolved {
    /// The rewritten document.
    pub tree: Tree,
    /// Every document loaded, in discovery order; the root comes first.
    pub sources: Vec<SourceId>,
    /// References that close a cycle, in detection order.
    pub circular_refs: Vec<CircularRef>,
    /// Bundle namespaces assigned to external documents. Always empty for
    /// [`dereference`].
    pub namespaces: Vec<Namespace>,
}

impl Resolved {
    /// True when at least one circular reference was left as a pointer.
    pub fn has_circular_refs(&self) -> bool {
        !self.circular_refs.is_empty()
    }
}

/// Bundle `root` and every document it references into one tree.
///
/// Circular references are never an error here: they stay pointers.
pub fn bundle(
    root: &SourceId,
    io: &dyn SourceIo,
    options: &ResolveOptions,
) -> Result<Resolved, ResolveError> {
    let (graph, report) = analyze(root, io, options)?;
    let (tree, namespaces) = bundle::bundle_graph(&graph, options)?;
    tracing::debug!(namespaces = namespaces.len(), "bundle complete");
    Ok(finish(&graph, &report, tree, namespaces))
}

/// Replace every non-circular reference reachable from `root` with the
/// content it points at.
///
/// With [`CircularPolicy::Error`], any circular reference fails the run.
pub fn dereference(
    root: &SourceId,
    io: &dyn SourceIo,
    options: &ResolveOptions,
) -> Result<Resolved, ResolveError> {
    let (graph, report) = analyze(root, io, options)?;
    let tree = dereference::dereference_graph(&graph, &report, options)?;
    tracing::debug!("dereference complete");
    Ok(finish(&graph, &report, tree, Vec::new()))
}

fn analyze(
    root: &SourceId,
    io: &dyn SourceIo,
    options: &ResolveOptions,
) -> Result<(RefGraph, CycleReport), ResolveError> {
    let loader = Loader::new(io, options.max_parallel_loads);
    let graph = build_graph(root, &loader)?;
    let report = detect_cycles(&graph);
    Ok((graph, report))
}

fn finish(graph: &RefGraph, report: &CycleReport, tree: Tree, namespaces: Vec<Namespace>) -> Resolved {
    Resolved {
        tree,
        sources: graph.documents().iter().map(|doc| doc.id.clone()).collect(),
        circular_refs: report.circular_refs(graph),
        namespaces,
    }
}
