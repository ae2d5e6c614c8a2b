//! The configuration phase of a build.
//!
//! A [`Project`] is the single, explicit object through which plugins wire
//! tasks during configuration. It owns the task graph, the hook table and the
//! discovered variants. Plugins subscribe to variant discovery with
//! [`Project::on_variant`]; the discovery driver then feeds variants in with
//! [`Project::discover`], one at a time.
//!
//! [`Project::close`] ends the configuration phase. From then on every
//! registration surface, including handles that plugins kept around, rejects
//! further changes, and the returned [`Build`] only resolves and executes.

use std::collections::BTreeMap;

use crate::config::Settings;
use crate::core::{ArcStr, Directory, PhaseGate};
use crate::deferred::Deferred;
use crate::error::WiringError;
use crate::executor::Build;
use crate::hooks::{HookKind, HookTable};
use crate::layered::LayeredSources;
use crate::merge::merge_directories;
use crate::plugin::Plugin;
use crate::task::{TaskContext, TaskGraph, TaskRef};
use crate::variant::{ArtifactKind, SourceKind, Variant};

type VariantCallback = Box<dyn Fn(&mut Project, &Variant) -> Result<(), WiringError>>;

/// Where the project is in its configuration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    /// No plugin applied yet.
    Uninitialized,
    /// Plugins are applied and variants are being discovered.
    AwaitingVariants,
    /// Configuration is over, only resolution remains.
    Closed,
}

/// A variant together with the tasks doing its main build work.
pub(crate) struct VariantEntry {
    pub variant: Variant,
    pub main: Vec<TaskRef>,
}

pub struct Project {
    settings: Settings,
    state: PhaseState,
    gate: PhaseGate,
    tasks: TaskGraph,
    hooks: HookTable,
    variants: Vec<VariantEntry>,
    callbacks: Vec<VariantCallback>,
    plugins: Vec<&'static str>,
    /// Variant whose wiring failed, if any.
    aborted: Option<String>,
}

impl Project {
    pub fn new(settings: Settings) -> Self {
        let gate = PhaseGate::default();

        Self {
            settings,
            state: PhaseState::Uninitialized,
            tasks: TaskGraph::new(gate.clone()),
            hooks: HookTable::new(gate.clone()),
            gate,
            variants: vec![],
            callbacks: vec![],
            plugins: vec![],
            aborted: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn tasks(&mut self) -> &mut TaskGraph {
        &mut self.tasks
    }

    pub fn hooks(&self) -> &HookTable {
        &self.hooks
    }

    pub fn plugins(&self) -> &[&'static str] {
        &self.plugins
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants
            .iter()
            .map(|entry| &entry.variant)
            .find(|variant| variant.name() == name)
    }

    pub fn variants(&self) -> impl Iterator<Item = &Variant> {
        self.variants.iter().map(|entry| &entry.variant)
    }

    /// Applies a plugin, moving the project into the variant discovery state.
    pub fn apply(&mut self, plugin: impl Plugin) -> Result<&mut Self, WiringError> {
        self.gate.check("apply a plugin")?;

        tracing::debug!("applying plugin {}", plugin.name());
        self.state = PhaseState::AwaitingVariants;
        plugin.apply(self)?;
        self.plugins.push(plugin.name());

        Ok(self)
    }

    /// Subscribes to variant discovery.
    ///
    /// The callback runs once per variant, in discovery order. Variants
    /// discovered before the subscription are not replayed.
    pub fn on_variant<F>(&mut self, callback: F) -> Result<(), WiringError>
    where
        F: Fn(&mut Project, &Variant) -> Result<(), WiringError> + 'static,
    {
        self.gate.check("subscribe to variants")?;
        self.callbacks.push(Box::new(callback));
        Ok(())
    }

    /// Attaches a pre-work, source contributor or custom hook to a variant.
    pub fn register_hook(
        &mut self,
        variant: &Variant,
        kind: HookKind,
        task: &TaskRef,
    ) -> Result<(), WiringError> {
        self.hooks.register_hook(variant.name(), kind, task)
    }

    /// Adds the output of `task` as a new generated layer of the variant's
    /// sources of `kind`, and records the task as a source contributor.
    pub fn add_generated_source(
        &mut self,
        variant: &Variant,
        kind: SourceKind,
        task: &TaskRef,
        output: &Deferred<Directory>,
    ) -> Result<(), WiringError> {
        let sources = variant.require_sources(kind)?;

        if !output.producers().contains(task) {
            return Err(WiringError::UndeclaredOutput {
                task: task.name().to_string(),
                value: output.label().to_string(),
            });
        }

        sources.add_layer(output.clone())?;
        self.hooks
            .register_hook(variant.name(), HookKind::SourceContributor, task)
    }

    /// Feeds a discovered variant through the host wiring and every
    /// subscribed callback.
    ///
    /// A failing callback aborts configuration; the error names the variant.
    /// After that, neither discovery nor [`Project::close`] succeed anymore.
    pub fn discover(&mut self, variant: Variant) -> Result<(), WiringError> {
        self.gate.check("discover a variant")?;
        self.check_aborted()?;

        let name = variant.name().to_string();
        if self.variant(&name).is_some() {
            return Err(WiringError::DuplicateVariant(name));
        }

        let wrap = |source: WiringError| WiringError::Variant {
            variant: name.clone(),
            source: Box::new(source),
        };

        let (variant, main) = match self.wire_variant(variant) {
            Ok(wired) => wired,
            Err(err) => {
                self.aborted = Some(name.clone());
                return Err(wrap(err));
            }
        };
        self.variants.push(VariantEntry {
            variant: variant.clone(),
            main,
        });

        tracing::debug!("discovered variant {}", name);

        // Callbacks get `&mut self`, so they are moved out for the duration.
        let callbacks = std::mem::take(&mut self.callbacks);
        let result = callbacks
            .iter()
            .try_for_each(|callback| callback(self, &variant));
        let added = std::mem::replace(&mut self.callbacks, callbacks);
        self.callbacks.extend(added);

        if let Err(err) = result {
            tracing::error!("wiring of variant {} failed", name);
            self.aborted = Some(name.clone());
            return Err(wrap(err));
        }

        Ok(())
    }

    fn check_aborted(&self) -> Result<(), WiringError> {
        match &self.aborted {
            Some(variant) => Err(WiringError::ConfigurationAborted {
                variant: variant.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn discover_all(
        &mut self,
        variants: impl IntoIterator<Item = Variant>,
    ) -> Result<(), WiringError> {
        variants
            .into_iter()
            .try_for_each(|variant| self.discover(variant))
    }

    /// Sets up what the build tool itself provides for a variant: the
    /// layered asset sources seeded with the static source sets, and the
    /// merge task publishing the merged assets artifact.
    fn wire_variant(&mut self, mut variant: Variant) -> Result<(Variant, Vec<TaskRef>), WiringError> {
        let mut main = vec![];

        for kind in [SourceKind::Assets, SourceKind::Resources] {
            let sources = LayeredSources::new(
                format!("{}.{}", variant.name(), kind.dir_name()),
                self.gate.clone(),
            );
            let dirs: Vec<_> = variant
                .source_sets()
                .into_iter()
                .map(|set| self.settings.source_root.join(set).join(kind.dir_name()))
                .collect();
            sources.add_static_dirs(dirs)?;
            variant.sources.insert(kind, sources);
        }

        let merged = Deferred::<Directory>::new(format!("{}.mergedAssets", variant.name()));
        let all = variant.sources[&SourceKind::Assets].flatten();

        let task = self
            .tasks
            .task(format!("merge{}Assets", variant.capitalized()))
            .description("Merges every asset layer, later layers win")
            .input(all)
            .output(&merged)
            .run({
                let merged = merged.clone();
                move |ctx: &mut TaskContext<'_>, dirs: Vec<Directory>| {
                    let dest = ctx.output_dir();
                    let report = merge_directories(&dirs, &dest)?;
                    tracing::info!("merged {} assets from {} layers", report.len(), dirs.len());
                    ctx.fulfill(&merged, Directory::new(dest))?;
                    Ok(())
                }
            })?;

        variant.artifacts.insert(ArtifactKind::MergedAssets, merged);
        main.push(task);

        Ok((variant, main))
    }

    /// Ends the configuration phase.
    ///
    /// Fails if the wiring of a variant failed earlier.
    pub fn close(mut self) -> Result<Build, WiringError> {
        self.gate.close();
        self.state = PhaseState::Closed;
        self.check_aborted()?;
        self.tasks.seal()?;

        let main: BTreeMap<ArcStr, Vec<TaskRef>> = self
            .variants
            .iter()
            .map(|entry| (entry.variant.name().into(), entry.main.clone()))
            .collect();

        let variants = self.variants.into_iter().map(|entry| entry.variant).collect();

        Ok(Build::new(self.settings, self.tasks, self.hooks, variants, main))
    }
}
