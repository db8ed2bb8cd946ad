use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use globset::GlobBuilder;

use super::config;

/// A prepared test execution: argv plus the directory to run it from.
#[derive(Debug, Clone)]
pub struct TestJob {
    pub command: String,
    pub args: Vec<String>,
    /// Execution root — the nearest ancestor of the test containing package.json.
    pub root: PathBuf,
}

/// Find the execution root for `test_path`: the nearest ancestor directory
/// containing a `package.json`.
pub fn execution_root(test_path: &Path) -> anyhow::Result<PathBuf> {
    let mut dir = test_path
        .parent()
        .ok_or_else(|| anyhow!("test path has no parent directory"))?;
    loop {
        if dir.join("package.json").exists() {
            return Ok(dir.to_path_buf());
        }
        dir = dir.parent().ok_or_else(|| {
            anyhow!(
                "no package.json found in any ancestor of {}",
                test_path.display()
            )
        })?;
    }
}

/// Prepare the job for a test file: locate the execution root, load config,
/// pick the command template (first matching override wins), substitute the
/// relative test path, and split into argv.
pub fn prepare_job(test_path: &Path) -> anyhow::Result<TestJob> {
    let exec_root = execution_root(test_path)?;
    let config = config::load_config(&exec_root);

    let rel = test_path
        .strip_prefix(&exec_root)
        .with_context(|| format!("{} is outside {}", test_path.display(), exec_root.display()))?;
    let rel_str = rel.to_string_lossy();
    // Patterns are written with forward slashes regardless of platform.
    let match_path = rel_str.replace(std::path::MAIN_SEPARATOR, "/");

    let mut template = config.command.as_str();
    for override_ in &config.overrides {
        if match_pattern(&override_.pattern, &match_path) {
            template = &override_.command;
            break;
        }
    }

    let (command, args) = config::build_command(template, &rel_str)
        .ok_or_else(|| anyhow!("empty command template"))?;

    Ok(TestJob {
        command,
        args,
        root: exec_root,
    })
}

/// Match an override pattern against a root-relative path.
///
/// `prefix/**` matches any path under `prefix`; everything else is a shell
/// glob where `*` does not cross path separators.
fn match_pattern(pattern: &str, path: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("**") {
        return path.starts_with(prefix);
    }

    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher().is_match(path))
        .unwrap_or(false)
}
