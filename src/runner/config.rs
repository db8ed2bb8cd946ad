use std::fs;
use std::path::Path;

use serde::Deserialize;

/// The command template used when no `.lazytest.json` provides one.
const DEFAULT_COMMAND: &str = "npx jest <path> --colors";

/// Runner configuration, loaded from `.lazytest.json`.
///
/// Unknown fields are ignored; a missing or malformed file degrades to
/// defaults with no hard error.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Command template. `<path>` is replaced with the test file's path
    /// relative to the execution root; if absent, the path is appended.
    #[serde(default)]
    pub command: String,

    /// Per-pattern command overrides, tried in order; first match wins.
    #[serde(default)]
    pub overrides: Vec<Override>,

    /// Path globs excluded from the test tree (kept for presentation-layer
    /// filtering).
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// A custom command for test paths matching `pattern`.
#[derive(Debug, Clone, Deserialize)]
pub struct Override {
    pub pattern: String,
    pub command: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_owned(),
            overrides: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

/// Look for `.lazytest.json` starting at `root` and walking up; return the
/// first one that exists. Defaults when none is found or parsing fails.
pub fn load_config(root: &Path) -> Config {
    let mut dir = root;
    loop {
        let config_file = dir.join(".lazytest.json");
        if config_file.exists() {
            let Ok(data) = fs::read_to_string(&config_file) else {
                return Config::default();
            };
            let Ok(mut config) = serde_json::from_str::<Config>(&data) else {
                return Config::default();
            };
            if config.command.is_empty() {
                config.command = DEFAULT_COMMAND.to_owned();
            }
            return config;
        }

        match dir.parent() {
            Some(parent) => dir = parent,
            None => return Config::default(),
        }
    }
}

/// Substitute the test path into `template` and split into (command, args).
///
/// `<path>` is replaced textually; without the token the path is appended.
/// Tokenization is a plain whitespace split — no shell expansion.
pub fn build_command(template: &str, test_path: &str) -> Option<(String, Vec<String>)> {
    let cmd_str = if template.contains("<path>") {
        template.replace("<path>", test_path)
    } else {
        format!("{template} {test_path}")
    };

    let mut parts = cmd_str.split_whitespace().map(str::to_owned);
    let command = parts.next()?;
    Some((command, parts.collect()))
}
