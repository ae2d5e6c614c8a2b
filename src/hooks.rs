//! Per-variant lifecycle hooks.
//!
//! The hook table only records which tasks were attached to which point of a
//! variant's lifecycle. It never adds a dependency edge: a pre-work hook runs
//! because the lifecycle consumer schedules it ahead of the variant's main
//! work, not because some artifact requested it. Requesting an unrelated
//! artifact therefore never drags pre-work along.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::{ArcStr, PhaseGate};
use crate::error::WiringError;
use crate::task::TaskRef;

/// Points of a variant's lifecycle a task can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum HookKind {
    /// Runs before the variant's main build work.
    PreWork,
    /// Contributes a generated source directory.
    SourceContributor,
    /// Anything else a plugin wants to tag.
    Custom(&'static str),
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HookKind::PreWork => f.write_str("pre-work"),
            HookKind::SourceContributor => f.write_str("source-contributor"),
            HookKind::Custom(name) => f.write_str(name),
        }
    }
}

/// Append-only table of hooks, keyed by variant name and hook kind.
pub struct HookTable {
    hooks: BTreeMap<(ArcStr, HookKind), Vec<TaskRef>>,
    gate: PhaseGate,
}

impl HookTable {
    pub(crate) fn new(gate: PhaseGate) -> Self {
        Self {
            hooks: BTreeMap::new(),
            gate,
        }
    }

    /// Appends `task` to the hooks of `kind` for `variant`.
    ///
    /// Registering the same triple twice fails and leaves the list as it was.
    pub fn register_hook(
        &mut self,
        variant: &str,
        kind: HookKind,
        task: &TaskRef,
    ) -> Result<(), WiringError> {
        self.gate.check("register a hook")?;

        let list = self.hooks.entry((variant.into(), kind)).or_default();

        if list.contains(task) {
            return Err(WiringError::DuplicateHookRegistration {
                variant: variant.to_string(),
                kind: kind.to_string(),
                task: task.name().to_string(),
            });
        }

        tracing::debug!("{}: {} hook {}", variant, kind, task);
        list.push(task.clone());

        Ok(())
    }

    /// Hooks of `kind` for `variant`, in registration order.
    pub fn hooks_for(&self, variant: &str, kind: HookKind) -> &[TaskRef] {
        self.hooks
            .get(&(ArcStr::from(variant), kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every hook kind registered for `variant` with its tasks.
    pub fn kinds_for<'a>(
        &'a self,
        variant: &'a str,
    ) -> impl Iterator<Item = (HookKind, &'a [TaskRef])> + 'a {
        self.hooks
            .iter()
            .filter(move |((name, _), _)| &**name == variant)
            .map(|((_, kind), tasks)| (*kind, tasks.as_slice()))
    }
}
