use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, bail};

/// Absolute paths of files git considers modified or untracked under `root`.
///
/// `git status --porcelain` gives a stable, easy-to-parse listing: two status
/// characters, a space, then the path (quoted when it contains specials).
pub fn changed_files(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let output = Command::new("git")
        .arg("status")
        .arg("--porcelain")
        .current_dir(root)
        .output()
        .context("failed to invoke git")?;

    if !output.status.success() {
        bail!("{}", String::from_utf8_lossy(&output.stderr).trim());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut files = Vec::new();
    for line in stdout.lines() {
        if line.len() < 4 {
            continue;
        }
        let rel = line[3..].trim_matches('"');
        files.push(root.join(rel));
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_changed_files_sees_untracked_file() {
        let dir = tempfile::tempdir().unwrap();
        let status = Command::new("git")
            .arg("init")
            .current_dir(dir.path())
            .output()
            .expect("git must be available for this test");
        assert!(status.status.success());

        let file = dir.path().join("test.txt");
        fs::write(&file, "hello").unwrap();

        let files = changed_files(dir.path()).unwrap();
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn test_changed_files_outside_a_repo_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(changed_files(dir.path()).is_err());
    }
}
