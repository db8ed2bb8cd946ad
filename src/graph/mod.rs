pub mod edge;

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;

use crate::classify;
use crate::parser;
use crate::walker;
use edge::DependencyKind;

/// Upper bound on graph-build workers; small repos saturate long before this.
const MAX_BUILD_WORKERS: usize = 10;

/// The project dependency graph.
///
/// Edges point from the importing file to its dependency, so the forward view
/// is the outgoing edge set and the reverse view is the incoming edge set of
/// the same graph — the two can never disagree. `pending` indexes imports
/// whose target did not exist at parse time, keyed by the extensionless
/// absolute path the import would resolve to, so a later file creation links
/// them up with direct lookups instead of a scan.
///
/// All maps sit behind one many-readers / one-writer lock; parsing always
/// happens outside it.
pub struct DependencyGraph {
    inner: RwLock<GraphInner>,
}

struct GraphInner {
    graph: StableGraph<PathBuf, DependencyKind>,
    /// Maps file paths to their node indices for O(1) lookup.
    file_index: HashMap<PathBuf, NodeIndex>,
    /// Lookup key (absolute path without extension, or parent dir for index
    /// files) -> importing file -> kind.
    pending: HashMap<PathBuf, HashMap<PathBuf, DependencyKind>>,
}

impl DependencyGraph {
    /// Create an empty dependency graph.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                graph: StableGraph::new(),
                file_index: HashMap::new(),
                pending: HashMap::new(),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, GraphInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, GraphInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Walk `root` and index every source file, fanning parsing out across a
    /// bounded worker pool. Safe to call on a populated graph: each file's
    /// edges are replaced wholesale.
    pub fn build(&self, root: &Path) {
        let files: Vec<PathBuf> = walker::stream_files(root)
            .filter(|p| classify::is_source_file(p))
            .collect();

        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_BUILD_WORKERS);

        match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => pool.install(|| files.par_iter().for_each(|path| self.update(path))),
            Err(_) => files.iter().for_each(|path| self.update(path)),
        }
    }

    /// Re-parse `path` and replace its outgoing edges.
    ///
    /// Unresolved imports are filed under `pending`; afterwards, any pending
    /// imports that `path` itself satisfies are promoted to live edges.
    pub fn update(&self, path: &Path) {
        if !classify::is_source_file(path) {
            return;
        }

        // Parse outside the lock.
        let result = parser::parse_imports(path);

        let mut inner = self.write();
        let src_idx = inner.intern(path);

        // Clear the file's old outgoing edges; incoming edges stay.
        let old: Vec<_> = inner.graph.edges(src_idx).map(|e| e.id()).collect();
        for edge_id in old {
            inner.graph.remove_edge(edge_id);
        }

        for import in &result.resolved {
            let dep_idx = inner.intern(&import.path);
            inner.graph.update_edge(src_idx, dep_idx, import.kind);
        }

        for pending in &result.unresolved {
            inner
                .pending
                .entry(pending.key.clone())
                .or_default()
                .insert(path.to_path_buf(), pending.kind);
        }

        // Keys this file could satisfy: the exact path, the path without its
        // extension, and the parent directory for index files.
        let mut candidates = vec![path.to_path_buf()];
        let stem = path.with_extension("");
        if stem != path {
            candidates.push(stem.clone());
        }
        if stem.file_name() == Some(OsStr::new("index"))
            && let Some(parent) = path.parent()
        {
            candidates.push(parent.to_path_buf());
        }

        for key in candidates {
            if let Some(dependents) = inner.pending.remove(&key) {
                for (dependent, kind) in dependents {
                    let dep_idx = inner.intern(&dependent);
                    inner.graph.update_edge(dep_idx, src_idx, kind);
                }
            }
        }
    }

    /// All files that depend on `path`, transitively: BFS over incoming
    /// edges, each file visited at most once, `path` itself excluded.
    /// Mocked edges are followed — callers prune them when selecting tests.
    pub fn dependents_of(&self, path: &Path) -> Vec<PathBuf> {
        let inner = self.read();
        let Some(&start) = inner.file_index.get(path) else {
            return Vec::new();
        };

        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue: VecDeque<NodeIndex> = VecDeque::from([start]);
        let mut dependents = Vec::new();

        while let Some(current) = queue.pop_front() {
            for edge in inner.graph.edges_directed(current, Direction::Incoming) {
                let source = edge.source();
                if visited.insert(source) {
                    dependents.push(inner.graph[source].clone());
                    queue.push_back(source);
                }
            }
        }

        dependents
    }

    /// The kind of the direct edge `source -> dependency`, defaulting to
    /// `Regular` when no such edge exists.
    pub fn dependency_kind(&self, source: &Path, dependency: &Path) -> DependencyKind {
        let inner = self.read();
        let (Some(&src), Some(&dep)) = (
            inner.file_index.get(source),
            inner.file_index.get(dependency),
        ) else {
            return DependencyKind::Regular;
        };
        inner
            .graph
            .find_edge(src, dep)
            .map(|e| inner.graph[e])
            .unwrap_or(DependencyKind::Regular)
    }

    /// Transitive dependents of `path` filtered down to test files.
    pub fn related_tests(&self, path: &Path) -> Vec<PathBuf> {
        self.dependents_of(path)
            .into_iter()
            .filter(|p| classify::is_test_file(p))
            .collect()
    }

    /// Forward view of a single file: its direct dependencies with kinds.
    pub fn direct_dependencies_of(&self, path: &Path) -> Vec<(PathBuf, DependencyKind)> {
        let inner = self.read();
        let Some(&idx) = inner.file_index.get(path) else {
            return Vec::new();
        };
        inner
            .graph
            .edges(idx)
            .map(|e| (inner.graph[e.target()].clone(), *e.weight()))
            .collect()
    }

    /// Reverse view of a single file: its direct dependents with kinds.
    pub fn direct_dependents_of(&self, path: &Path) -> Vec<(PathBuf, DependencyKind)> {
        let inner = self.read();
        let Some(&idx) = inner.file_index.get(path) else {
            return Vec::new();
        };
        inner
            .graph
            .edges_directed(idx, Direction::Incoming)
            .map(|e| (inner.graph[e.source()].clone(), *e.weight()))
            .collect()
    }

    /// Lookup keys currently awaiting a file creation.
    pub fn pending_keys(&self) -> Vec<PathBuf> {
        self.read().pending.keys().cloned().collect()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphInner {
    fn intern(&mut self, path: &Path) -> NodeIndex {
        if let Some(&idx) = self.file_index.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(path.to_path_buf());
        self.file_index.insert(path.to_path_buf(), idx);
        idx
    }
}
