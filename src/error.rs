use camino::Utf8PathBuf;
use thiserror::Error;

/// Every way wiring or executing the task graph can fail.
///
/// None of these are transient. They point at a defect in how plugins wired
/// their tasks, so the enclosing configuration or execution step is aborted as
/// soon as one is raised.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error("Task '{0}' is already registered")]
    DuplicateTaskName(String),

    #[error("Task '{task}' is already registered as a {kind} hook of variant '{variant}'")]
    DuplicateHookRegistration {
        variant: String,
        kind: String,
        task: String,
    },

    #[error("Variant '{0}' was already discovered")]
    DuplicateVariant(String),

    #[error("Value '{value}' was already fulfilled")]
    AlreadyFulfilled { value: String },

    #[error("Value '{value}' is derived or fixed and cannot be fulfilled")]
    ReadOnlyValue { value: String },

    #[error("Value '{value}' is already produced by task '{producer}'")]
    ProducerConflict { value: String, producer: String },

    #[error("Value '{value}' was resolved before it was produced")]
    Unresolved { value: String },

    #[error("Task '{task}' finished without fulfilling its output '{value}'")]
    IncompleteOutput { task: String, value: String },

    #[error("Task '{task}' tried to fulfill '{value}', which it does not declare as output")]
    UndeclaredOutput { task: String, value: String },

    #[error("Cannot {operation}: the configuration phase is closed")]
    ConfigurationPhaseClosed { operation: String },

    #[error("Cannot {operation}: the configuration phase is still open")]
    ConfigurationPhaseOpen { operation: String },

    #[error("Configuration was aborted by a failure while wiring variant '{variant}'")]
    ConfigurationAborted { variant: String },

    #[error("Expected artifact '{artifact}' missing from {location}")]
    ValidationFailed {
        artifact: String,
        location: Utf8PathBuf,
    },

    #[error("Task '{0}' not found")]
    UnknownTask(String),

    #[error("Variant '{0}' not found")]
    UnknownVariant(String),

    #[error("Variant '{variant}' has no {artifact} artifact")]
    UnknownArtifact { variant: String, artifact: String },

    #[error("Cycle detected in task graph at task '{0}'")]
    Cycle(String),

    #[error("Variant '{variant}':\n{source}")]
    Variant {
        variant: String,
        source: Box<WiringError>,
    },

    #[error("Task '{task}':\n{error}")]
    Task { task: String, error: anyhow::Error },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Couldn't compile glob pattern.\n{0}")]
    GlobPattern(#[from] glob::PatternError),

    #[error("Couldn't run glob.\n{0}")]
    Glob(#[from] glob::GlobError),

    #[error("Couldn't convert path to UTF-8.\n{0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error("Invalid settings.\n{0}")]
    Config(#[from] serde_json::Error),
}

impl WiringError {
    /// The innermost wiring error, looking through the variant and task
    /// wrappers that only add context.
    pub fn root(&self) -> &WiringError {
        match self {
            WiringError::Variant { source, .. } => source.root(),
            WiringError::Task { error, .. } => match error.downcast_ref::<WiringError>() {
                Some(inner) => inner.root(),
                None => self,
            },
            _ => self,
        }
    }
}
