use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use lazytest::engine::Engine;
use lazytest::{classify, git};

/// Watch a JavaScript/TypeScript project and re-run the tests affected by
/// each change.
#[derive(Parser)]
#[command(name = "lazytest", version, about)]
struct Cli {
    /// Project root to watch (defaults to the current directory).
    path: Option<PathBuf>,

    /// Test file to watch; may be repeated. Watched tests re-run
    /// automatically when a file they depend on changes.
    #[arg(long = "watch", value_name = "TEST")]
    watch: Vec<PathBuf>,

    /// Also watch every test related to a file git reports as changed.
    #[arg(long)]
    changed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = cli
        .path
        .unwrap_or_else(|| PathBuf::from("."))
        .canonicalize()
        .context("project root does not exist")?;

    let mut engine = Engine::new(root.clone());

    for test in cli.watch {
        let test = test.canonicalize().context("watched test does not exist")?;
        engine.toggle_watch(test);
    }

    if cli.changed {
        // Needs the graph up front to map changed files to their tests.
        eprintln!("Indexing {}...", root.display());
        engine.build_graph();
        for changed in git::changed_files(&root)? {
            if classify::is_test_file(&changed) {
                if !engine.is_watched(&changed) {
                    engine.toggle_watch(changed);
                }
                continue;
            }
            for test in engine.find_related_tests(&changed) {
                if !engine.is_watched(&test) {
                    engine.toggle_watch(test);
                }
            }
        }
    }

    let watched = engine.watched_files();
    match watched.len() {
        0 => eprintln!("Watching {} (no tests watched yet)", root.display()),
        n => {
            eprintln!("Watching {} ({n} tests)", root.display());
            for test in &watched {
                eprintln!("  {}", test.display());
            }
        }
    }

    engine.run().await;
    Ok(())
}
