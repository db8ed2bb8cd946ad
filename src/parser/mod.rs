//! Regex-level import extraction.
//!
//! This deliberately does not parse JavaScript: three patterns catch the
//! import forms that matter for dependency tracking (`import … from`,
//! side-effect `import`, and `require`), plus the jest mock declarations that
//! demote an edge to [`DependencyKind::Mocked`]. Only relative specifiers are
//! kept — package imports are out of scope.

pub mod resolve;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::graph::edge::DependencyKind;

// [\s\S]*? spans newlines, so multi-line `import { … } from '…'` matches too.
static IMPORT_FROM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import[\s\S]*?from\s+['"]([^'"]+)['"]"#).unwrap());
static IMPORT_SIDE_EFFECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"import\s+['"]([^'"]+)['"]"#).unwrap());
static REQUIRE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap());
static JEST_MOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"jest\.(?:mock|doMock|setMock)\s*\(\s*['"]([^'"]+)['"]"#).unwrap());

/// An import that resolved to a file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImport {
    /// Absolute path with on-disk casing.
    pub path: PathBuf,
    pub kind: DependencyKind,
}

/// An import whose target does not (yet) exist on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImport {
    /// Absolute path prefix without extension, used as the lookup key when a
    /// later file creation might satisfy this import.
    pub key: PathBuf,
    pub kind: DependencyKind,
}

/// The outcome of parsing one source file.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub resolved: Vec<ResolvedImport>,
    pub unresolved: Vec<PendingImport>,
}

/// Extract and resolve the relative imports of `file_path`.
///
/// Never fails: an unreadable file yields an empty result, and bytes that are
/// not valid UTF-8 are decoded lossily.
pub fn parse_imports(file_path: &Path) -> ImportResult {
    let Ok(bytes) = fs::read(file_path) else {
        return ImportResult::default();
    };
    let text = String::from_utf8_lossy(&bytes);

    let mut raw_imports: Vec<&str> = Vec::new();
    for re in [&*IMPORT_FROM_RE, &*IMPORT_SIDE_EFFECT_RE, &*REQUIRE_RE] {
        for caps in re.captures_iter(&text) {
            if let Some(m) = caps.get(1) {
                raw_imports.push(m.as_str());
            }
        }
    }

    let mocked: HashSet<&str> = JEST_MOCK_RE
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    resolve_specifiers(file_path, &raw_imports, &mocked)
}

/// Turn raw specifiers into resolved/pending entries relative to `source_path`.
fn resolve_specifiers(
    source_path: &Path,
    specifiers: &[&str],
    mocked: &HashSet<&str>,
) -> ImportResult {
    let mut result = ImportResult::default();
    let Some(dir) = source_path.parent() else {
        return result;
    };

    for specifier in specifiers {
        // Package imports (react, lodash/fp, @scope/pkg) are not tracked.
        if !specifier.starts_with('.') {
            continue;
        }

        let kind = if mocked.contains(specifier) {
            DependencyKind::Mocked
        } else {
            DependencyKind::Regular
        };

        let abs = resolve::normalize(&dir.join(specifier));
        match resolve::find_file(&abs) {
            Some(path) => result.resolved.push(ResolvedImport { path, kind }),
            None => result.unresolved.push(PendingImport { key: abs, kind }),
        }
    }

    result
}
