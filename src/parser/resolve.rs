use std::fs;
use std::path::{Component, Path, PathBuf};

/// Suffixes probed, in order, when resolving an extensionless import specifier.
/// The empty suffix handles imports that spell out the extension.
const RESOLUTION_SUFFIXES: &[&str] = &[
    "",
    ".ts",
    ".js",
    ".tsx",
    ".jsx",
    "/index.ts",
    "/index.js",
    "/index.tsx",
    "/index.jsx",
];

/// Lexically normalize a path: resolve `.` and `..` components without
/// touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Try to find an on-disk file for `stem` (an absolute path that may lack an
/// extension) by probing each resolution suffix in order. The first hit wins.
///
/// Matching of the final path component is case-insensitive so that imports
/// written with drifted casing still resolve, as they would on a
/// case-insensitive filesystem. The returned path carries the on-disk casing.
pub fn find_file(stem: &Path) -> Option<PathBuf> {
    let stem_str = stem.to_string_lossy();
    for suffix in RESOLUTION_SUFFIXES {
        let candidate = PathBuf::from(format!("{stem_str}{suffix}"));
        if let Some(found) = probe(&candidate) {
            return Some(found);
        }
    }
    None
}

/// Look for `candidate` in its parent directory. An exact-case entry wins;
/// otherwise the first case-insensitive match is returned.
fn probe(candidate: &Path) -> Option<PathBuf> {
    let parent = candidate.parent()?;
    let want = candidate.file_name()?.to_str()?;

    let entries = fs::read_dir(parent).ok()?;
    let mut fold_hit: Option<PathBuf> = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name_str) = name.to_str() else {
            continue;
        };
        if !entry.path().is_file() {
            continue;
        }
        if name_str == want {
            return Some(parent.join(name));
        }
        if fold_hit.is_none() && name_str.eq_ignore_ascii_case(want) {
            fold_hit = Some(parent.join(&name));
        }
    }
    fold_hit
}
