//! Task nodes and the graph they live in.
//!
//! A task is a named unit of deferred work. It declares the [`Deferred`]
//! values it reads (its inputs) and the ones it fulfills (its outputs), plus an
//! action. Registering a task does not run it; the executor decides that later,
//! based on which outputs are actually needed.
//!
//! ## Wiring
//!
//! Inputs are anything implementing [`Inputs`]: a single `Deferred<T>`, a
//! tuple of them, a `Vec`, or an `Option`. The action receives the resolved
//! values, so `(Deferred<A>, Deferred<B>)` turns into `(A, B)`.
//!
//! Dependency edges are not stored at registration time. They are derived when
//! the configuration phase closes, by asking every input which tasks produce
//! it. A layered source collection may still grow after a consumer has been
//! registered, so edges computed any earlier would be incomplete.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use camino::Utf8PathBuf;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::config::Settings;
use crate::core::{ArcStr, PhaseGate};
use crate::deferred::{Deferred, DeferredId, Erased};
use crate::error::WiringError;

/// A reference to a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub(crate) index: NodeIndex,
    name: ArcStr,
}

impl TaskRef {
    pub(crate) fn new(index: NodeIndex, name: ArcStr) -> Self {
        Self { index, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the underlying `NodeIndex` of the task in the graph.
    pub fn index(&self) -> NodeIndex {
        self.index
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

type Action = Arc<dyn Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync>;

pub(crate) struct TaskNode {
    pub name: ArcStr,
    pub description: Option<Cow<'static, str>>,
    pub inputs: Vec<Arc<dyn Erased>>,
    pub outputs: Vec<Arc<dyn Erased>>,
    pub action: Action,
}

impl TaskNode {
    /// Every task producing one of this node's inputs.
    pub(crate) fn dependencies(&self) -> Vec<TaskRef> {
        let mut dependencies: Vec<TaskRef> = vec![];
        for input in &self.inputs {
            for task in input.producers() {
                if !dependencies.contains(&task) {
                    dependencies.push(task);
                }
            }
        }
        dependencies
    }
}

/// A collection of [`Deferred`] values that can be used as the inputs of a
/// task.
pub trait Inputs: Send + Sync + 'static {
    /// The resolved form, e.g. `(A, B)` for `(Deferred<A>, Deferred<B>)`.
    type Output;

    /// Type-erased handles of every value in the collection.
    #[doc(hidden)]
    fn erased(&self) -> Vec<Arc<dyn Erased>>;

    fn resolve(&self) -> Result<Self::Output, WiringError>;
}

impl Inputs for () {
    type Output = ();

    fn erased(&self) -> Vec<Arc<dyn Erased>> {
        vec![]
    }

    fn resolve(&self) -> Result<Self::Output, WiringError> {
        Ok(())
    }
}

impl<T> Inputs for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn erased(&self) -> Vec<Arc<dyn Erased>> {
        vec![Deferred::erased(self)]
    }

    fn resolve(&self) -> Result<Self::Output, WiringError> {
        Deferred::resolve(self)
    }
}

impl<I> Inputs for Vec<I>
where
    I: Inputs,
{
    type Output = Vec<I::Output>;

    fn erased(&self) -> Vec<Arc<dyn Erased>> {
        self.iter().flat_map(Inputs::erased).collect()
    }

    fn resolve(&self) -> Result<Self::Output, WiringError> {
        self.iter().map(Inputs::resolve).collect()
    }
}

impl<I> Inputs for Option<I>
where
    I: Inputs,
{
    type Output = Option<I::Output>;

    fn erased(&self) -> Vec<Arc<dyn Erased>> {
        self.as_ref().map(Inputs::erased).unwrap_or_default()
    }

    fn resolve(&self) -> Result<Self::Output, WiringError> {
        self.as_ref().map(Inputs::resolve).transpose()
    }
}

macro_rules! impl_inputs {
    ($($I:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($I),*> Inputs for ($($I,)*)
        where
            $($I: Inputs),* {
            type Output = ($($I::Output,)*);

            fn erased(&self) -> Vec<Arc<dyn Erased>> {
                let ($($I,)*) = self;
                let mut erased = vec![];
                $(erased.extend(Inputs::erased($I));)*
                erased
            }

            fn resolve(&self) -> Result<Self::Output, WiringError> {
                let ($($I,)*) = self;
                Ok(($(Inputs::resolve($I)?,)*))
            }
        }
    };
}

impl_inputs!(A);
impl_inputs!(A, B);
impl_inputs!(A, B, C);
impl_inputs!(A, B, C, D);
impl_inputs!(A, B, C, D, E);
impl_inputs!(A, B, C, D, E, F);
impl_inputs!(A, B, C, D, E, F, G);
impl_inputs!(A, B, C, D, E, F, G, H);

type Commit = Box<dyn FnOnce() -> Result<(), WiringError> + Send>;

/// The context passed to every task action.
///
/// Outputs fulfilled through the context are staged, and only committed once
/// the action returned successfully with every declared output accounted for.
/// A failing task therefore never leaves a partially fulfilled set of outputs
/// behind.
pub struct TaskContext<'a> {
    name: &'a str,
    settings: &'a Settings,
    declared: &'a [Arc<dyn Erased>],
    staged: Vec<(DeferredId, Commit)>,
    /// Tracing span assigned to this task.
    pub(crate) span: tracing::Span,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        name: &'a str,
        settings: &'a Settings,
        declared: &'a [Arc<dyn Erased>],
        span: tracing::Span,
    ) -> Self {
        Self {
            name,
            settings,
            declared,
            staged: vec![],
            span,
        }
    }

    /// Name of the running task.
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// The directory the engine assigns to this task's outputs,
    /// `<build_root>/<intermediates_dir>/<task name>`.
    ///
    /// The directory is not created.
    pub fn output_dir(&self) -> Utf8PathBuf {
        self.settings.intermediates().join(self.name)
    }

    /// Stages the value of one of the declared outputs.
    pub fn fulfill<T>(&mut self, output: &Deferred<T>, value: T) -> Result<(), WiringError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = output.id();

        if !self.declared.iter().any(|d| d.id() == id) {
            return Err(WiringError::UndeclaredOutput {
                task: self.name.to_string(),
                value: output.label().to_string(),
            });
        }

        if self.staged.iter().any(|(staged, _)| *staged == id) {
            return Err(WiringError::AlreadyFulfilled {
                value: output.label().to_string(),
            });
        }

        let output = output.clone();
        self.staged
            .push((id, Box::new(move || output.commit(value))));

        Ok(())
    }

    pub(crate) fn commit(self) -> Result<(), WiringError> {
        for declared in self.declared {
            if !self.staged.iter().any(|(id, _)| *id == declared.id()) {
                return Err(WiringError::IncompleteOutput {
                    task: self.name.to_string(),
                    value: declared.label().to_string(),
                });
            }
        }

        // Checked up front so that either every output is written or none.
        for declared in self.declared {
            if declared.is_available() {
                return Err(WiringError::AlreadyFulfilled {
                    value: declared.label().to_string(),
                });
            }
        }

        for (_, commit) in self.staged {
            commit()?;
        }

        Ok(())
    }
}

/// The graph of every task registered during configuration.
pub struct TaskGraph {
    pub(crate) graph: Graph<TaskNode, ()>,
    names: HashMap<ArcStr, NodeIndex>,
    gate: PhaseGate,
}

impl TaskGraph {
    pub(crate) fn new(gate: PhaseGate) -> Self {
        Self {
            graph: Graph::new(),
            names: HashMap::new(),
            gate,
        }
    }

    /// The entry point for registering a task.
    pub fn task(&mut self, name: impl Into<ArcStr>) -> TaskDef<'_> {
        TaskDef {
            graph: self,
            name: name.into(),
            description: None,
            outputs: vec![],
        }
    }

    pub fn get(&self, name: &str) -> Option<TaskRef> {
        self.names
            .get_key_value(name)
            .map(|(name, index)| TaskRef::new(*index, name.clone()))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.graph.node_weights().map(|node| &*node.name)
    }

    fn add(
        &mut self,
        name: ArcStr,
        description: Option<Cow<'static, str>>,
        inputs: Vec<Arc<dyn Erased>>,
        outputs: Vec<Arc<dyn Erased>>,
        action: Action,
    ) -> Result<TaskRef, WiringError> {
        self.gate.check("register a task")?;

        if self.names.contains_key(&name) {
            return Err(WiringError::DuplicateTaskName(name.to_string()));
        }

        let mut unique: Vec<Arc<dyn Erased>> = Vec::with_capacity(outputs.len());
        for output in outputs {
            output.check_claim()?;
            if !unique.iter().any(|o| o.id() == output.id()) {
                unique.push(output);
            }
        }

        let index = self.graph.add_node(TaskNode {
            name: name.clone(),
            description,
            inputs,
            outputs: unique,
            action,
        });

        let task = TaskRef::new(index, name.clone());
        for output in &self.graph[index].outputs {
            output.claim(task.clone())?;
        }

        self.names.insert(name, index);
        tracing::debug!("registered task {}", task);

        Ok(task)
    }

    /// Turns declared inputs into dependency edges and rejects cycles.
    pub(crate) fn seal(&mut self) -> Result<(), WiringError> {
        self.graph.clear_edges();

        let edges: Vec<_> = self
            .graph
            .node_indices()
            .flat_map(|index| {
                self.graph[index]
                    .dependencies()
                    .into_iter()
                    .map(move |dependency| (dependency.index, index))
            })
            .collect();

        for (from, to) in edges {
            self.graph.update_edge(from, to, ());
        }

        petgraph::algo::toposort(&self.graph, None)
            .map_err(|cycle| WiringError::Cycle(self.graph[cycle.node_id()].name.to_string()))?;

        Ok(())
    }
}

impl std::fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name.replace('"', "\\\"");
            writeln!(f, "    {}[\"{}\"]", index.index(), name)?;
        }

        // Edges only exist once the graph is sealed, so derive them here.
        for index in self.graph.node_indices() {
            let node = &self.graph[index];
            for input in &node.inputs {
                for producer in input.producers() {
                    let label = input.label().replace('"', "\\\"");
                    writeln!(
                        f,
                        "    {} -- \"{}\" --> {}",
                        producer.index.index(),
                        label,
                        index.index()
                    )?;
                }
            }
        }

        Ok(())
    }
}

pub struct TaskDef<'a> {
    graph: &'a mut TaskGraph,
    name: ArcStr,
    description: Option<Cow<'static, str>>,
    outputs: Vec<Arc<dyn Erased>>,
}

impl<'a> TaskDef<'a> {
    pub fn description(mut self, text: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(text.into());
        self
    }

    /// Declares a value this task fulfills.
    pub fn output<T>(mut self, output: &Deferred<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.outputs.push(output.erased());
        self
    }

    pub fn input<D>(self, inputs: D) -> TaskBinder<'a, D>
    where
        D: Inputs,
    {
        TaskBinder {
            graph: self.graph,
            name: self.name,
            description: self.description,
            outputs: self.outputs,
            inputs,
        }
    }

    pub fn run<F>(self, action: F) -> Result<TaskRef, WiringError>
    where
        F: Fn(&mut TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.input(()).run(move |ctx, ()| action(ctx))
    }
}

pub struct TaskBinder<'a, D> {
    graph: &'a mut TaskGraph,
    name: ArcStr,
    description: Option<Cow<'static, str>>,
    outputs: Vec<Arc<dyn Erased>>,
    inputs: D,
}

impl<'a, D> TaskBinder<'a, D>
where
    D: Inputs,
{
    pub fn description(mut self, text: impl Into<Cow<'static, str>>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn output<T>(mut self, output: &Deferred<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.outputs.push(output.erased());
        self
    }

    pub fn run<F>(self, action: F) -> Result<TaskRef, WiringError>
    where
        F: Fn(&mut TaskContext<'_>, D::Output) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let erased = self.inputs.erased();
        let inputs = self.inputs;

        let action: Action = Arc::new(move |ctx: &mut TaskContext<'_>| {
            let resolved = inputs.resolve()?;
            action(ctx, resolved)
        });

        self.graph
            .add(self.name, self.description, erased, self.outputs, action)
    }
}
