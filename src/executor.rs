//! The resolution phase of a build.
//!
//! A [`Build`] is what remains of a [`Project`](crate::Project) once the
//! configuration phase is over: a sealed task graph, the hook table and the
//! variants. Nothing can be registered anymore. What can be done is asking for
//! values, which runs exactly the tasks producing them and everything those
//! tasks need, each at most once per build.

mod diagnostics;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError, channel};
use std::time::{Duration, Instant};

use console::style;
use petgraph::Direction;
use petgraph::graph::NodeIndex;
use serde::Serialize;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::Settings;
use crate::core::ArcStr;
use crate::deferred::Deferred;
use crate::error::WiringError;
use crate::hooks::{HookKind, HookTable};
use crate::project::PhaseState;
use crate::task::{TaskContext, TaskGraph, TaskRef};
use crate::variant::Variant;

pub use diagnostics::{Diagnostics, TaskExecution};

pub struct Build {
    settings: Settings,
    tasks: TaskGraph,
    hooks: HookTable,
    variants: Vec<Variant>,
    main: BTreeMap<ArcStr, Vec<TaskRef>>,
    executed: HashSet<NodeIndex>,
}

impl Build {
    pub(crate) fn new(
        settings: Settings,
        tasks: TaskGraph,
        hooks: HookTable,
        variants: Vec<Variant>,
        main: BTreeMap<ArcStr, Vec<TaskRef>>,
    ) -> Self {
        Self {
            settings,
            tasks,
            hooks,
            variants,
            main,
            executed: HashSet::new(),
        }
    }

    pub fn state(&self) -> PhaseState {
        PhaseState::Closed
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn tasks(&self) -> &TaskGraph {
        &self.tasks
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn variant(&self, name: &str) -> Result<&Variant, WiringError> {
        self.variants
            .iter()
            .find(|variant| variant.name() == name)
            .ok_or_else(|| WiringError::UnknownVariant(name.to_string()))
    }

    /// Whether the task already ran in this build.
    pub fn has_run(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .is_some_and(|task| self.executed.contains(&task.index()))
    }

    /// Runs the named tasks and everything they depend on.
    pub fn run(&mut self, targets: &[&str]) -> Result<Diagnostics, WiringError> {
        let roots = targets
            .iter()
            .map(|name| {
                self.tasks
                    .get(name)
                    .ok_or_else(|| WiringError::UnknownTask(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.run_tasks(&roots)
    }

    /// Resolves a value, running its producers first if needed.
    ///
    /// Values that are already available are returned without running
    /// anything, as are fixed values, which have no producer at all.
    pub fn resolve<T>(&mut self, value: &Deferred<T>) -> Result<T, WiringError>
    where
        T: Clone + Send + Sync + 'static,
    {
        if !value.is_available() {
            self.run_tasks(&value.producers())?;
        }

        value.resolve()
    }

    /// Builds a variant: first every pre-work hook, then the variant's main
    /// work together with whatever it depends on, source contributors included.
    ///
    /// Pre-work has no edge to the main work. The ordering is only guaranteed
    /// by this method running it in a separate, earlier wave.
    pub fn assemble(&mut self, variant: &str) -> Result<Diagnostics, WiringError> {
        let name = self.variant(variant)?.name().to_string();

        let pre_work = self.hooks.hooks_for(&name, HookKind::PreWork).to_vec();
        let main = self.main.get(name.as_str()).cloned().unwrap_or_default();

        eprintln!(
            "Assembling {} ({} pre-work, {} main).",
            style(&name).blue(),
            pre_work.len(),
            main.len()
        );

        let mut diagnostics = self.run_tasks(&pre_work)?;
        diagnostics.extend(self.run_tasks(&main)?);

        Ok(diagnostics)
    }

    /// Snapshot of the wiring, for inspection and tooling.
    pub fn report(&self) -> WiringReport {
        let variants = self
            .variants
            .iter()
            .map(|variant| VariantReport {
                name: variant.name().to_string(),
                source_sets: variant.source_sets(),
                layers: variant
                    .sources
                    .iter()
                    .map(|(kind, sources)| (kind.dir_name().to_string(), sources.layers()))
                    .collect(),
                hooks: self
                    .hooks
                    .kinds_for(variant.name())
                    .map(|(kind, tasks)| {
                        let names = tasks.iter().map(|task| task.name().to_string()).collect();
                        (kind.to_string(), names)
                    })
                    .collect(),
            })
            .collect();

        let tasks = self
            .tasks
            .graph
            .node_indices()
            .map(|index| {
                let node = &self.tasks.graph[index];
                TaskReport {
                    name: node.name.to_string(),
                    description: node.description.as_ref().map(|text| text.to_string()),
                    dependencies: node
                        .dependencies()
                        .iter()
                        .map(|task| task.name().to_string())
                        .collect(),
                    executed: self.executed.contains(&index),
                }
            })
            .collect();

        WiringReport { variants, tasks }
    }

    /// Runs `roots` and their transitive dependencies, skipping what already
    /// ran in this build.
    ///
    /// Tasks are executed on the rayon pool as soon as their dependencies
    /// completed. The first failure stops scheduling; tasks already in flight
    /// are allowed to finish, and the error is returned.
    pub fn run_tasks(&mut self, roots: &[TaskRef]) -> Result<Diagnostics, WiringError> {
        let graph = &self.tasks.graph;

        let mut pending: HashSet<NodeIndex> = HashSet::new();
        let mut stack: Vec<NodeIndex> = roots.iter().map(TaskRef::index).collect();
        while let Some(index) = stack.pop() {
            if self.executed.contains(&index) || !pending.insert(index) {
                continue;
            }
            stack.extend(graph.neighbors_directed(index, Direction::Incoming));
        }

        let total = pending.len() as u64;
        if total == 0 {
            return Ok(Diagnostics::default());
        }

        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for edge in graph.raw_edges() {
            if pending.contains(&edge.source()) && pending.contains(&edge.target()) {
                dependents
                    .entry(edge.source())
                    .or_default()
                    .push(edge.target());
            }
        }

        let mut dependency_counts: HashMap<NodeIndex, usize> = pending
            .iter()
            .map(|&index| {
                let count = graph
                    .neighbors_directed(index, Direction::Incoming)
                    .filter(|dep| pending.contains(dep))
                    .count();
                (index, count)
            })
            .collect();

        let root_span = tracing::span!(Level::INFO, "running_tasks");
        root_span.pb_set_length(total);
        root_span.pb_set_style(&crate::utils::get_style_build());
        root_span.pb_set_message("Running tasks...");
        let _enter = root_span.enter();

        let settings = &self.settings;
        let pb_style = crate::utils::get_style_task();

        let mut diagnostics = Diagnostics::default();
        let mut completed = HashSet::new();

        // The scheduler loop stays on the calling thread, so it never takes a
        // pool worker away from the tasks it waits for.
        let result = rayon::in_place_scope(|s| -> Result<(), WiringError> {
            let (sender, receiver) =
                channel::<(NodeIndex, Result<(), WiringError>, Instant, Duration)>();

            let spawn_task = |index: NodeIndex| {
                let node = &graph[index];
                let sender = sender.clone();
                let pb_style = pb_style.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "task", name = &*node.name);
                    span.pb_set_style(&pb_style);
                    span.pb_set_message(&format!("Running {}", node.name));
                    let _enter = span.enter();

                    let start = Instant::now();
                    let execute = || -> anyhow::Result<()> {
                        let mut ctx =
                            TaskContext::new(&node.name, settings, &node.outputs, span.clone());
                        (node.action)(&mut ctx)?;
                        ctx.commit()?;
                        Ok(())
                    };

                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(execute))
                        .unwrap_or_else(|panic| {
                            let msg = if let Some(text) = panic.downcast_ref::<&str>() {
                                format!("task panicked: {text}")
                            } else if let Some(text) = panic.downcast_ref::<String>() {
                                format!("task panicked: {text}")
                            } else {
                                String::from("task panicked with unknown payload")
                            };
                            Err(anyhow::anyhow!(msg))
                        })
                        .map_err(|error| WiringError::Task {
                            task: node.name.to_string(),
                            error,
                        });

                    // The receiver is gone if the scheduler already bailed.
                    let _ = sender.send((index, result, start, start.elapsed()));
                });
            };

            for &index in &pending {
                if dependency_counts.get(&index).copied().unwrap_or(0) == 0 {
                    spawn_task(index);
                }
            }

            let mut in_flight = dependency_counts.values().filter(|&&n| n == 0).count();
            let mut failure = None;

            while in_flight > 0 {
                let Some((index, result, start, duration)) = receive(&receiver) else {
                    break;
                };
                in_flight -= 1;
                root_span.pb_inc(1);

                if let Err(err) = result {
                    tracing::error!("{}", err);
                    failure.get_or_insert(err);
                    continue;
                }

                completed.insert(index);
                diagnostics.executions.push(TaskExecution {
                    task: TaskRef::new(index, graph[index].name.clone()),
                    start,
                    duration,
                });

                if failure.is_some() {
                    continue;
                }

                for &dependent in dependents.get(&index).into_iter().flatten() {
                    if let Some(count) = dependency_counts.get_mut(&dependent) {
                        *count -= 1;
                        if *count == 0 {
                            in_flight += 1;
                            spawn_task(dependent);
                        }
                    }
                }
            }

            match failure {
                Some(err) => Err(err),
                None => Ok(()),
            }
        });

        // Successful tasks stay done even if a sibling failed.
        self.executed.extend(completed);
        result?;

        tracing::info!("ran {} tasks", diagnostics.len());
        Ok(diagnostics)
    }
}

/// Waits for the next task result.
///
/// When called from a pool worker, for instance inside a single-threaded
/// pool, queued tasks are run here while waiting, since they may be the very
/// tasks being waited for.
fn receive<T>(receiver: &Receiver<T>) -> Option<T> {
    loop {
        match receiver.try_recv() {
            Ok(message) => return Some(message),
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => {}
        }

        match rayon::yield_now() {
            Some(rayon::Yield::Executed) => {}
            Some(rayon::Yield::Idle) => match receiver.recv_timeout(Duration::from_millis(1)) {
                Ok(message) => return Some(message),
                Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => {}
            },
            None => return receiver.recv().ok(),
        }
    }
}

/// Serializable view of a closed build.
#[derive(Debug, Clone, Serialize)]
pub struct WiringReport {
    pub variants: Vec<VariantReport>,
    pub tasks: Vec<TaskReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantReport {
    pub name: String,
    pub source_sets: Vec<String>,
    pub layers: BTreeMap<String, usize>,
    pub hooks: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub dependencies: Vec<String>,
    pub executed: bool,
}

impl WiringReport {
    pub fn to_json(&self) -> Result<String, WiringError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::project::Project;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (count.clone(), count)
    }

    #[test]
    fn test_runs_only_what_is_needed() {
        let mut project = Project::new(Settings::default());
        let a = Deferred::<u32>::new("a");
        let b = Deferred::<u32>::new("b");
        let (ran_b, seen_b) = counter();

        let tasks = project.tasks();
        tasks
            .task("makeA")
            .output(&a)
            .run({
                let a = a.clone();
                move |ctx: &mut TaskContext<'_>| Ok(ctx.fulfill(&a, 1)?)
            })
            .unwrap();
        tasks
            .task("makeB")
            .output(&b)
            .run({
                let b = b.clone();
                move |ctx: &mut TaskContext<'_>| {
                    ran_b.fetch_add(1, Ordering::SeqCst);
                    Ok(ctx.fulfill(&b, 2)?)
                }
            })
            .unwrap();

        let sum = a.zip(&b).map("sum", |(a, b)| a + b);
        let mut build = project.close().unwrap();

        assert_eq!(build.resolve(&a).unwrap(), 1);
        assert!(!build.has_run("makeB"));

        assert_eq!(build.resolve(&sum).unwrap(), 3);
        assert_eq!(build.resolve(&sum).unwrap(), 3);
        assert_eq!(seen_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dependency_order() {
        let mut project = Project::new(Settings::default());
        let first = Deferred::<Vec<&'static str>>::new("first");
        let second = Deferred::<Vec<&'static str>>::new("second");

        let tasks = project.tasks();
        tasks
            .task("second")
            .input(first.clone())
            .output(&second)
            .run({
                let second = second.clone();
                move |ctx: &mut TaskContext<'_>, mut trail: Vec<&'static str>| {
                    trail.push("second");
                    Ok(ctx.fulfill(&second, trail)?)
                }
            })
            .unwrap();
        tasks
            .task("first")
            .output(&first)
            .run({
                let first = first.clone();
                move |ctx: &mut TaskContext<'_>| Ok(ctx.fulfill(&first, vec!["first"])?)
            })
            .unwrap();

        let mut build = project.close().unwrap();
        let diagnostics = build.run(&["second"]).unwrap();

        assert_eq!(diagnostics.names(), ["first", "second"]);
        assert_eq!(build.resolve(&second).unwrap(), ["first", "second"]);
    }

    #[test]
    fn test_single_thread_pool() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();

        let names = pool.install(|| {
            let mut project = Project::new(Settings::default());
            let first = Deferred::<u32>::new("first");
            let second = Deferred::<u32>::new("second");

            let tasks = project.tasks();
            tasks
                .task("first")
                .output(&first)
                .run({
                    let first = first.clone();
                    move |ctx: &mut TaskContext<'_>| Ok(ctx.fulfill(&first, 1)?)
                })
                .unwrap();
            tasks
                .task("second")
                .input(first)
                .output(&second)
                .run({
                    let second = second.clone();
                    move |ctx: &mut TaskContext<'_>, n: u32| Ok(ctx.fulfill(&second, n + 1)?)
                })
                .unwrap();

            let mut build = project.close().unwrap();
            let diagnostics = build.run(&["second"]).unwrap();
            assert_eq!(build.resolve(&second).unwrap(), 2);

            diagnostics
                .names()
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        });

        assert_eq!(names, ["first", "second"]);
    }

    #[test]
    fn test_failure_leaves_outputs_unfulfilled() {
        let mut project = Project::new(Settings::default());
        let out = Deferred::<u32>::new("out");

        project
            .tasks()
            .task("broken")
            .output(&out)
            .run(|_| anyhow::bail!("nope"))
            .unwrap();

        let mut build = project.close().unwrap();
        let err = build.resolve(&out).unwrap_err();

        assert!(matches!(&err, WiringError::Task { task, .. } if task == "broken"));
        assert!(!out.is_available());
        assert!(!build.has_run("broken"));
    }

    #[test]
    fn test_incomplete_output_is_an_error() {
        let mut project = Project::new(Settings::default());
        let out = Deferred::<u32>::new("out");

        project.tasks().task("lazy").output(&out).run(|_| Ok(())).unwrap();

        let mut build = project.close().unwrap();
        let err = build.run(&["lazy"]).unwrap_err();

        assert!(matches!(err.root(), WiringError::IncompleteOutput { .. }));
    }

    #[test]
    fn test_panicking_task() {
        let mut project = Project::new(Settings::default());
        project
            .tasks()
            .task("panics")
            .run(|_| panic!("boom"))
            .unwrap();

        let mut build = project.close().unwrap();
        let err = build.run(&["panics"]).unwrap_err();

        assert!(err.to_string().contains("panics"));
    }

    #[test]
    fn test_unknown_task() {
        let project = Project::new(Settings::default());
        let mut build = project.close().unwrap();

        assert!(matches!(
            build.run(&["nothing"]),
            Err(WiringError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_fixed_values_need_no_task() {
        let project = Project::new(Settings::default());
        let mut build = project.close().unwrap();

        let value = Deferred::fixed("literal", 7u8);
        assert_eq!(build.resolve(&value).unwrap(), 7);
    }

    #[test]
    fn test_report_json() {
        let mut project = Project::new(Settings::default());
        project.discover(Variant::named("debug")).unwrap();

        let build = project.close().unwrap();
        let json = build.report().to_json().unwrap();

        assert!(json.contains("mergeDebugAssets"));
        assert!(json.contains("\"assets\": 1"));
    }
}
