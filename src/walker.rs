use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::classify;

/// Directory/file basenames that are always skipped, regardless of .gitignore.
pub const DEFAULT_IGNORES: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "coverage",
    ".DS_Store",
];

/// Whether `name` is in the hardcoded default ignore set.
pub fn is_default_ignored(name: &str) -> bool {
    DEFAULT_IGNORES.contains(&name)
}

/// A directory or file in the presentation tree rooted at the project root.
///
/// Only test files appear as leaves; directories appear when they sit on the
/// path from the root to an included test. The tree is rebuilt wholesale on
/// refresh and treated as immutable in between. A node's parent is recoverable
/// from its path (`Path::parent`); no back-pointers are stored.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn new_dir(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            is_dir: true,
            children: Vec::new(),
        }
    }
}

/// Stream every non-ignored file under `root`, lazily.
///
/// Skips the default ignore set and anything matched by `.gitignore` rules.
/// Never yields directories. Subtrees that fail with I/O errors are skipped;
/// the stream itself never fails.
pub fn stream_files(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|entry| {
            let name = entry.file_name().to_str().unwrap_or("");
            !is_default_ignored(name)
        })
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .map(|entry| entry.into_path())
}

/// Walk `root` and build the tree of test files for presentation.
///
/// Intermediate directory nodes are created on demand, so only directories
/// that (transitively) contain a test appear.
pub fn build_tree(root: &Path) -> TreeNode {
    let name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_owned();
    let mut tree = TreeNode::new_dir(name, root.to_path_buf());

    for file in stream_files(root) {
        if classify::is_test_file(&file) {
            add_path_to_tree(&mut tree, &file, root);
        }
    }

    tree
}

/// Insert `path` into the tree, creating intermediate directory nodes as needed.
fn add_path_to_tree(root: &mut TreeNode, path: &Path, root_path: &Path) {
    let Ok(rel) = path.strip_prefix(root_path) else {
        return;
    };
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    let mut current = root;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            current.children.push(TreeNode {
                name: part.clone(),
                path: path.to_path_buf(),
                is_dir: false,
                children: Vec::new(),
            });
            return;
        }

        let pos = current
            .children
            .iter()
            .position(|c| c.is_dir && c.name == *part);
        let idx = match pos {
            Some(idx) => idx,
            None => {
                let dir_path = current.path.join(part);
                current
                    .children
                    .push(TreeNode::new_dir(part.clone(), dir_path));
                current.children.len() - 1
            }
        };
        current = &mut current.children[idx];
    }
}
