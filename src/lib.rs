#![forbid(unsafe_code)]
//! Lazy wiring of task outputs for build tool plugins.
//!
//! Plugins register tasks per build variant while the project is being
//! configured. They get back [`Deferred`] handles to task outputs, feed those
//! into [`LayeredSources`] and attach tasks to variant lifecycle points through
//! the [`HookTable`]. None of this resolves anything: directories are only
//! read, and tasks only run, once configuration is closed and something asks
//! for a value.
//!
//! ```no_run
//! use variantwire::{GeneratedAssetsPlugin, PreBuildPlugin, Project, Settings, Variant};
//!
//! # fn main() -> Result<(), variantwire::WiringError> {
//! let mut project = Project::new(Settings::default());
//! project
//!     .apply(GeneratedAssetsPlugin)?
//!     .apply(PreBuildPlugin::new())?;
//! project.discover_all([Variant::named("debug"), Variant::named("release")])?;
//!
//! let mut build = project.close()?;
//! build.assemble("debug")?;
//! build.run(&["verifyDebugAsset"])?;
//! # Ok(())
//! # }
//! ```

mod config;
mod core;
mod deferred;
mod error;
mod executor;
mod hooks;
mod layered;
pub mod merge;
mod plugin;
mod project;
mod task;
mod utils;
mod variant;
pub mod verify;

pub use crate::config::Settings;
pub use crate::core::Directory;
pub use crate::deferred::{Deferred, DeferredId};
pub use crate::error::WiringError;
pub use crate::executor::{
    Build, Diagnostics, TaskExecution, TaskReport, VariantReport, WiringReport,
};
pub use crate::hooks::{HookKind, HookTable};
pub use crate::layered::{Layer, LayeredSources};
pub use crate::plugin::{GeneratedAssetsPlugin, Plugin, PreBuildPlugin};
pub use crate::project::{PhaseState, Project};
pub use crate::task::{Inputs, TaskBinder, TaskContext, TaskDef, TaskGraph, TaskRef};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::variant::{ArtifactKind, SourceKind, Variant};
