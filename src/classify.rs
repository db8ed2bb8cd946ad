//! Pure path predicates used by the walker, watcher, and engine.
//!
//! All predicates operate on names only — no filesystem access. They accept
//! either a bare filename or a full path; only the final component matters.

use std::path::Path;

/// Suffixes that mark a file as a test file.
const TEST_SUFFIXES: &[&str] = &[
    ".test.ts", ".test.tsx", ".test.js", ".test.jsx", ".spec.ts", ".spec.tsx", ".spec.js",
    ".spec.jsx",
];

/// Extensions of compilable source files. Test files are source files too.
const SOURCE_SUFFIXES: &[&str] = &[".ts", ".tsx", ".js", ".jsx"];

/// Config basenames that affect how tests run.
const CONFIG_NAMES: &[&str] = &["package.json", "tsconfig.json"];
const CONFIG_PREFIXES: &[&str] = &[
    "vite.config.",
    "jest.config.",
    "babel.config.",
    "webpack.config.",
];

fn file_name(path: &Path) -> &str {
    path.file_name().and_then(|n| n.to_str()).unwrap_or("")
}

/// Whether the path names a test file (`.test.*` / `.spec.*` with a JS/TS extension).
pub fn is_test_file(path: impl AsRef<Path>) -> bool {
    let name = file_name(path.as_ref());
    TEST_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Whether the path names a compilable source file.
pub fn is_source_file(path: impl AsRef<Path>) -> bool {
    let name = file_name(path.as_ref());
    SOURCE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Whether the path names a project config file (`package.json`, `tsconfig.json`,
/// or a `vite`/`jest`/`babel`/`webpack` config).
pub fn is_config_file(path: impl AsRef<Path>) -> bool {
    let name = file_name(path.as_ref());
    CONFIG_NAMES.contains(&name) || CONFIG_PREFIXES.iter().any(|p| name.starts_with(p))
}
