use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::walker::TreeNode;

/// The current state of a test file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestStatus {
    /// Not running and never finished.
    #[default]
    Idle,
    /// Currently executing.
    Running,
    /// Last run passed.
    Pass,
    /// Last run failed.
    Fail,
}

/// A lightweight handle to a test being (re)run — just enough identity for
/// the runner and the status maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestNode {
    pub name: String,
    pub path: PathBuf,
}

impl TestNode {
    pub fn from_path(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_owned();
        Self { name, path }
    }
}

/// The core state store, owned and mutated exclusively by the engine's
/// message handler. Presentation layers read it through the engine's
/// accessors.
#[derive(Debug)]
pub struct State {
    pub root: PathBuf,
    /// Latest test-tree snapshot; immutable between refreshes.
    pub tree: Option<TreeNode>,
    /// Paths whose tests re-run automatically on relevant changes.
    /// Ordered, so accessors iterate deterministically.
    pub watched: BTreeSet<PathBuf>,

    /// FIFO of tests awaiting execution; never contains duplicates.
    pub queue: VecDeque<PathBuf>,
    pub statuses: HashMap<PathBuf, TestStatus>,
    pub outputs: HashMap<PathBuf, String>,

    pub running: Option<TestNode>,
    pub last_run: Option<TestNode>,
    /// Output accumulated for the run in progress (or the last finished run).
    pub current_output: String,
}

impl State {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            tree: None,
            watched: BTreeSet::new(),
            queue: VecDeque::new(),
            statuses: HashMap::new(),
            outputs: HashMap::new(),
            running: None,
            last_run: None,
            current_output: String::new(),
        }
    }

    pub fn status_of(&self, path: &Path) -> TestStatus {
        self.statuses.get(path).copied().unwrap_or_default()
    }
}
