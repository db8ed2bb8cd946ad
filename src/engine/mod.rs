//! The scheduling core: one task, one ordered inbox.
//!
//! Every producer — the watcher bridge, the runner's update stream, tree
//! refreshes — feeds a single [`EngineEvent`] channel, and all state mutation
//! happens inside [`Engine::handle_event`]. A change event updates the graph,
//! queues the watched tests it affects, and dispatches the queue head when no
//! test is running; runner status messages advance the queue.

pub mod state;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::graph::DependencyGraph;
use crate::graph::edge::DependencyKind;
use crate::runner::{self, Runner, RunnerUpdate};
use crate::walker::{self, TreeNode};
use crate::watcher::{self, WatcherHandle};

use state::{State, TestNode, TestStatus};

/// Everything the engine reacts to, multiplexed onto one ordered channel.
#[derive(Debug)]
pub enum EngineEvent {
    /// The watcher is up; the handle keeps it alive for the engine's lifetime.
    WatcherReady(WatcherHandle),
    /// A file settled after debounce.
    Change(PathBuf),
    /// A fresh test-tree snapshot.
    TreeLoaded(TreeNode),
    /// Output or terminal status from the runner.
    Runner(RunnerUpdate),
}

/// The application core: owns the state store, the dependency graph, and the
/// runner, and serializes every mutation through its event loop.
pub struct Engine {
    state: State,
    graph: Arc<DependencyGraph>,
    runner: Runner,
    runner_rx: Option<mpsc::Receiver<RunnerUpdate>>,
    watcher: Option<WatcherHandle>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    graph_built: bool,
}

impl Engine {
    pub fn new(root: PathBuf) -> Self {
        let (runner, runner_rx) = Runner::new();
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            state: State::new(root),
            graph: Arc::new(DependencyGraph::new()),
            runner,
            runner_rx: Some(runner_rx),
            watcher: None,
            events_tx,
            events_rx,
            graph_built: false,
        }
    }

    /// Build the dependency graph synchronously, before the event loop.
    /// `run` skips its own build when this has been called.
    pub fn build_graph(&mut self) {
        self.graph.build(&self.state.root);
        self.graph_built = true;
    }

    /// Run the engine until every producer is gone: refresh the tree, start
    /// the watcher, build the graph, and consume events — all concurrent.
    /// Activity is reported on stderr for headless use.
    pub async fn run(mut self) {
        self.start();
        while let Some(event) = self.events_rx.recv().await {
            self.log_event(&event);
            self.handle_event(event);
        }
        // In-flight child processes get cancelled on the way out.
        self.runner.kill();
    }

    /// Spawn the startup activities feeding the event channel.
    fn start(&mut self) {
        self.spawn_tree_refresh();

        // Watcher: send the handle, then forward settled paths.
        let events_tx = self.events_tx.clone();
        let root = self.state.root.clone();
        tokio::spawn(async move {
            match watcher::start_watcher(&root) {
                Ok((handle, mut watch_rx)) => {
                    if events_tx
                        .send(EngineEvent::WatcherReady(handle))
                        .await
                        .is_err()
                    {
                        return;
                    }
                    while let Some(path) = watch_rx.recv().await {
                        if events_tx.send(EngineEvent::Change(path)).await.is_err() {
                            return; // engine gone, shutdown
                        }
                    }
                }
                Err(err) => eprintln!("[watcher] failed to start: {err}"),
            }
        });

        if !self.graph_built {
            let graph = Arc::clone(&self.graph);
            let root = self.state.root.clone();
            tokio::task::spawn_blocking(move || graph.build(&root));
            self.graph_built = true;
        }

        // Runner updates flow into the same inbox as everything else.
        if let Some(mut runner_rx) = self.runner_rx.take() {
            let events_tx = self.events_tx.clone();
            tokio::spawn(async move {
                while let Some(update) = runner_rx.recv().await {
                    if events_tx.send(EngineEvent::Runner(update)).await.is_err() {
                        return;
                    }
                }
            });
        }
    }

    /// Process one inbound event. All state mutation funnels through here.
    pub fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::WatcherReady(handle) => {
                self.watcher = Some(handle);
            }
            EngineEvent::Change(path) => self.handle_change(path),
            EngineEvent::TreeLoaded(tree) => {
                self.state.tree = Some(tree);
            }
            EngineEvent::Runner(RunnerUpdate::Output(line)) => {
                self.state.current_output.push_str(&line);
                self.state.current_output.push('\n');
                if let Some(node) = &self.state.running {
                    self.state
                        .outputs
                        .insert(node.path.clone(), self.state.current_output.clone());
                }
            }
            EngineEvent::Runner(RunnerUpdate::Status(result)) => self.handle_status(result),
        }
    }

    /// A file changed: update the graph, queue the affected watched tests,
    /// dispatch if idle, and re-arm a tree refresh.
    fn handle_change(&mut self, path: PathBuf) {
        self.graph.update(&path);

        let dependents: HashSet<PathBuf> = self.graph.dependents_of(&path).into_iter().collect();

        let affected: Vec<PathBuf> = self
            .state
            .watched
            .iter()
            .filter(|watched| {
                let watched = watched.as_path();
                if watched == path {
                    return true;
                }
                // A test that mocks the changed file is not affected by it.
                dependents.contains(watched)
                    && self.graph.dependency_kind(watched, &path) != DependencyKind::Mocked
            })
            .cloned()
            .collect();

        for test in affected {
            let running_here = self
                .state
                .running
                .as_ref()
                .is_some_and(|node| node.path == test);
            if !running_here && !self.state.queue.contains(&test) {
                self.state.queue.push_back(test);
            }
        }

        if self.state.running.is_none() {
            self.dispatch_next();
        }

        self.spawn_tree_refresh();
    }

    /// The running test finished: record pass/fail, then advance the queue.
    fn handle_status(&mut self, result: anyhow::Result<()>) {
        if let Some(node) = self.state.running.take() {
            match &result {
                Ok(()) => {
                    self.state.statuses.insert(node.path.clone(), TestStatus::Pass);
                    self.state.current_output.push_str("\nPASS\n");
                }
                Err(err) => {
                    self.state.statuses.insert(node.path.clone(), TestStatus::Fail);
                    self.state
                        .current_output
                        .push_str(&format!("\nFAIL: {err}\n"));
                }
            }
            self.state
                .outputs
                .insert(node.path, self.state.current_output.clone());
        }

        self.dispatch_next();
    }

    /// Pop the queue head and start it, if anything is waiting.
    fn dispatch_next(&mut self) {
        if let Some(next) = self.state.queue.pop_front() {
            self.trigger_test(&TestNode::from_path(next));
        }
    }

    /// Start `node` immediately, replacing any run in flight.
    pub fn trigger_test(&mut self, node: &TestNode) {
        self.state.running = Some(node.clone());
        self.state.last_run = Some(node.clone());
        self.state.current_output = format!("Running {}...\n", node.name);
        self.state
            .outputs
            .insert(node.path.clone(), self.state.current_output.clone());
        self.state
            .statuses
            .insert(node.path.clone(), TestStatus::Running);

        match runner::prepare_job(&node.path) {
            Ok(job) => {
                self.state
                    .outputs
                    .insert(node.path.clone(), self.state.current_output.clone());
                self.runner.run(&job.command, &job.args, &job.root);
            }
            Err(_) => {
                self.state
                    .current_output
                    .push_str("Error: Could not find package.json\n");
                self.state
                    .outputs
                    .insert(node.path.clone(), self.state.current_output.clone());
                self.state
                    .statuses
                    .insert(node.path.clone(), TestStatus::Fail);
                // Unrunnable: free the slot so the queue keeps moving.
                self.state.running = None;
                self.dispatch_next();
            }
        }
    }

    /// Re-run whatever ran last, if anything has.
    pub fn rerun_last(&mut self) {
        if let Some(last) = self.state.last_run.clone() {
            self.trigger_test(&last);
        }
    }

    /// Rebuild the tree snapshot off-thread and deliver it as an event.
    fn spawn_tree_refresh(&self) {
        let events_tx = self.events_tx.clone();
        let root = self.state.root.clone();
        tokio::spawn(async move {
            let tree = tokio::task::spawn_blocking(move || walker::build_tree(&root)).await;
            if let Ok(tree) = tree {
                let _ = events_tx.send(EngineEvent::TreeLoaded(tree)).await;
            }
        });
    }

    fn log_event(&self, event: &EngineEvent) {
        match event {
            EngineEvent::Change(path) => {
                eprintln!("[watch] changed: {}", path.display());
            }
            EngineEvent::Runner(RunnerUpdate::Status(result)) => {
                if let Some(node) = &self.state.running {
                    let verdict = if result.is_ok() { "PASS" } else { "FAIL" };
                    eprintln!("[run] {}: {}", node.name, verdict);
                }
            }
            _ => {}
        }
    }

    // Watched-set operations.

    /// Add `path` to the watched set, or remove it if already present.
    pub fn toggle_watch(&mut self, path: PathBuf) {
        if !self.state.watched.remove(&path) {
            self.state.watched.insert(path);
        }
    }

    pub fn clear_watched(&mut self) {
        self.state.watched.clear();
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.state.watched.contains(path)
    }

    /// Whether the filesystem watcher has come up.
    pub fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }

    /// Watched paths in stable (sorted) order.
    pub fn watched_files(&self) -> Vec<PathBuf> {
        self.state.watched.iter().cloned().collect()
    }

    // Read-only accessors for a presentation layer.

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn tree(&self) -> Option<&TreeNode> {
        self.state.tree.as_ref()
    }

    pub fn running_node(&self) -> Option<&TestNode> {
        self.state.running.as_ref()
    }

    pub fn current_output(&self) -> &str {
        &self.state.current_output
    }

    pub fn test_output(&self, path: &Path) -> Option<&str> {
        self.state.outputs.get(path).map(String::as_str)
    }

    pub fn node_status(&self, path: &Path) -> TestStatus {
        self.state.status_of(path)
    }

    /// Tests transitively depending on `path` — dependents filtered to test
    /// files.
    pub fn find_related_tests(&self, path: &Path) -> Vec<PathBuf> {
        self.graph.related_tests(path)
    }

    /// For tests: drain the runner's update stream directly instead of
    /// through the running event loop.
    pub fn take_runner_updates(&mut self) -> Option<mpsc::Receiver<RunnerUpdate>> {
        self.runner_rx.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tokio::time::timeout;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Feed runner updates back into the engine until a status lands.
    async fn pump_runner(engine: &mut Engine, rx: &mut mpsc::Receiver<RunnerUpdate>) {
        loop {
            let update = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for runner update")
                .expect("runner channel closed");
            let terminal = matches!(update, RunnerUpdate::Status(_));
            engine.handle_event(EngineEvent::Runner(update));
            if terminal {
                return;
            }
        }
    }

    #[test]
    fn test_new_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(dir.path().to_path_buf());
        assert_eq!(engine.state().root, dir.path());
        assert!(engine.tree().is_none());
        assert!(engine.running_node().is_none());
    }

    #[test]
    fn test_toggle_watch() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(dir.path().to_path_buf());
        let path = dir.path().join("foo.test.js");

        engine.toggle_watch(path.clone());
        assert!(engine.is_watched(&path));

        engine.toggle_watch(path.clone());
        assert!(!engine.is_watched(&path));
    }

    #[test]
    fn test_clear_watched() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(dir.path().to_path_buf());
        engine.toggle_watch(dir.path().join("a.test.ts"));
        engine.toggle_watch(dir.path().join("b.test.ts"));
        assert_eq!(engine.watched_files().len(), 2);

        engine.clear_watched();
        assert!(engine.watched_files().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_test_runs_to_pass() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", "{}");
        write(dir.path(), ".lazytest.json", r#"{"command": "echo test run"}"#);
        let test_file = write(dir.path(), "foo.test.js", "test");

        let mut engine = Engine::new(dir.path().to_path_buf());
        let mut runner_rx = engine.take_runner_updates().unwrap();

        engine.trigger_test(&TestNode::from_path(test_file.clone()));
        assert_eq!(engine.running_node().unwrap().path, test_file);
        assert_eq!(engine.node_status(&test_file), TestStatus::Running);

        pump_runner(&mut engine, &mut runner_rx).await;

        assert_eq!(engine.node_status(&test_file), TestStatus::Pass);
        assert!(engine.running_node().is_none());
        let output = engine.test_output(&test_file).unwrap();
        assert!(output.contains("test run"), "got {output:?}");
        assert!(output.contains("PASS"), "got {output:?}");
    }

    #[tokio::test]
    async fn test_trigger_test_without_execution_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = write(dir.path(), "foo.test.js", "test");

        let mut engine = Engine::new(dir.path().to_path_buf());
        engine.trigger_test(&TestNode::from_path(test_file.clone()));

        assert_eq!(engine.node_status(&test_file), TestStatus::Fail);
        assert!(engine.running_node().is_none(), "slot must be freed");
        assert!(
            engine
                .test_output(&test_file)
                .unwrap()
                .contains("Could not find package.json")
        );
    }

    #[tokio::test]
    async fn test_watcher_ready_stores_the_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(dir.path().to_path_buf());
        assert!(!engine.is_watching());

        let (handle, _rx) = crate::watcher::start_watcher(dir.path()).unwrap();
        engine.handle_event(EngineEvent::WatcherReady(handle));
        assert!(engine.is_watching());
    }

    #[tokio::test]
    async fn test_output_and_status_updates() {
        let dir = tempfile::tempdir().unwrap();
        let node = TestNode::from_path(dir.path().join("foo.test.js"));

        let mut engine = Engine::new(dir.path().to_path_buf());
        engine.state.running = Some(node.clone());

        engine.handle_event(EngineEvent::Runner(RunnerUpdate::Output("hello".into())));
        assert_eq!(engine.current_output(), "hello\n");

        engine.handle_event(EngineEvent::Runner(RunnerUpdate::Status(Ok(()))));
        assert_eq!(engine.node_status(&node.path), TestStatus::Pass);
        assert!(engine.running_node().is_none());
    }

    #[tokio::test]
    async fn test_change_event_queues_affected_watched_tests() {
        let dir = tempfile::tempdir().unwrap();
        let utils = write(dir.path(), "utils.ts", "export const foo = 1;");
        let test = write(
            dir.path(),
            "utils.test.ts",
            "import { foo } from './utils';",
        );
        let unrelated = write(dir.path(), "other.test.ts", "const x = 1;");

        let mut engine = Engine::new(dir.path().to_path_buf());
        engine.build_graph();
        engine.toggle_watch(test.clone());
        engine.toggle_watch(unrelated.clone());
        // Occupy the running slot so dispatch doesn't drain the queue.
        engine.state.running = Some(TestNode::from_path(dir.path().join("busy.test.ts")));

        engine.handle_event(EngineEvent::Change(utils.clone()));

        assert_eq!(engine.state().queue.len(), 1);
        assert_eq!(engine.state().queue[0], test);
    }

    #[tokio::test]
    async fn test_same_change_twice_enqueues_once() {
        let dir = tempfile::tempdir().unwrap();
        let utils = write(dir.path(), "utils.ts", "export const foo = 1;");
        let test = write(
            dir.path(),
            "utils.test.ts",
            "import { foo } from './utils';",
        );

        let mut engine = Engine::new(dir.path().to_path_buf());
        engine.build_graph();
        engine.toggle_watch(test.clone());
        engine.state.running = Some(TestNode::from_path(dir.path().join("busy.test.ts")));

        engine.handle_event(EngineEvent::Change(utils.clone()));
        engine.handle_event(EngineEvent::Change(utils.clone()));

        assert_eq!(engine.state().queue.len(), 1, "queue: {:?}", engine.state().queue);
    }

    #[tokio::test]
    async fn test_running_test_is_not_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let test = write(dir.path(), "utils.test.ts", "import './utils';");
        write(dir.path(), "utils.ts", "export const foo = 1;");

        let mut engine = Engine::new(dir.path().to_path_buf());
        engine.build_graph();
        engine.toggle_watch(test.clone());
        engine.state.running = Some(TestNode::from_path(test.clone()));

        engine.handle_event(EngineEvent::Change(test.clone()));

        assert!(
            engine.state().queue.is_empty(),
            "running test must not be re-enqueued: {:?}",
            engine.state().queue
        );
    }

    #[tokio::test]
    async fn test_mocked_dependency_is_pruned_from_selection() {
        let dir = tempfile::tempdir().unwrap();
        let utils = write(dir.path(), "u.ts", "export const foo = 1;");
        let real = write(dir.path(), "real.test.ts", "import { foo } from './u';");
        let mocked = write(
            dir.path(),
            "mock.test.ts",
            "import { foo } from './u';\njest.mock('./u');",
        );

        let mut engine = Engine::new(dir.path().to_path_buf());
        engine.build_graph();
        engine.toggle_watch(real.clone());
        engine.toggle_watch(mocked.clone());
        engine.state.running = Some(TestNode::from_path(dir.path().join("busy.test.ts")));

        engine.handle_event(EngineEvent::Change(utils.clone()));

        assert_eq!(
            engine.state().queue.iter().collect::<Vec<_>>(),
            vec![&real],
            "only the non-mocking test is affected"
        );
    }

    #[tokio::test]
    async fn test_status_advances_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", "{}");
        write(dir.path(), ".lazytest.json", r#"{"command": "echo ran"}"#);
        let first = write(dir.path(), "a.test.ts", "");
        let second = write(dir.path(), "b.test.ts", "");

        let mut engine = Engine::new(dir.path().to_path_buf());
        let mut runner_rx = engine.take_runner_updates().unwrap();
        engine.state.running = Some(TestNode::from_path(first.clone()));
        engine.state.queue.push_back(second.clone());

        // First test finishes; the queued one is dispatched.
        engine.handle_event(EngineEvent::Runner(RunnerUpdate::Status(Ok(()))));
        assert_eq!(engine.node_status(&first), TestStatus::Pass);
        assert_eq!(engine.running_node().unwrap().path, second);

        pump_runner(&mut engine, &mut runner_rx).await;
        assert_eq!(engine.node_status(&second), TestStatus::Pass);
        assert!(engine.running_node().is_none());
    }

    #[tokio::test]
    async fn test_rerun_last() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "package.json", "{}");
        write(dir.path(), ".lazytest.json", r#"{"command": "echo again"}"#);
        let test_file = write(dir.path(), "foo.test.js", "");

        let mut engine = Engine::new(dir.path().to_path_buf());
        let mut runner_rx = engine.take_runner_updates().unwrap();

        engine.trigger_test(&TestNode::from_path(test_file.clone()));
        pump_runner(&mut engine, &mut runner_rx).await;
        assert!(engine.running_node().is_none());

        engine.rerun_last();
        assert_eq!(engine.running_node().unwrap().path, test_file);
        pump_runner(&mut engine, &mut runner_rx).await;
        assert_eq!(engine.node_status(&test_file), TestStatus::Pass);
    }
}
