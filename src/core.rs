use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::WiringError;

/// Atomic reference-counted string type used for identifiers.
pub(crate) type ArcStr = Arc<str>;

/// A directory on disk, as handed out by task outputs and source layers.
///
/// This is only a path. Whether the directory exists depends on the task that
/// produced it having run, which is the whole point of handing it out through a
/// [`Deferred`](crate::Deferred).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Directory(Utf8PathBuf);

impl Directory {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.0
    }

    /// Path of a file inside this directory.
    pub fn file(&self, name: impl AsRef<Utf8Path>) -> Utf8PathBuf {
        self.0.join(name)
    }

    /// The last component of the path, e.g. the task name for engine-assigned
    /// output directories.
    pub fn name(&self) -> Option<&str> {
        self.0.file_name()
    }

    pub fn exists(&self) -> bool {
        self.0.is_dir()
    }
}

impl std::fmt::Display for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Utf8PathBuf> for Directory {
    fn from(value: Utf8PathBuf) -> Self {
        Self(value)
    }
}

impl From<&Utf8Path> for Directory {
    fn from(value: &Utf8Path) -> Self {
        Self(value.to_path_buf())
    }
}

impl From<&str> for Directory {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

/// Shared flag marking the end of the configuration phase.
///
/// Every registration surface (task graph, hook table, layered sources) holds a
/// clone, so closing the project closes all of them at once, including handles
/// that escaped into plugin code.
#[derive(Debug, Clone, Default)]
pub(crate) struct PhaseGate(Arc<AtomicBool>);

impl PhaseGate {
    pub(crate) fn close(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self, operation: &str) -> Result<(), WiringError> {
        if self.is_closed() {
            return Err(WiringError::ConfigurationPhaseClosed {
                operation: operation.to_string(),
            });
        }

        Ok(())
    }
}
