//! Write-once, read-many values bridging configuration and execution.
//!
//! A [`Deferred<T>`] is handed out while the task graph is being wired, long
//! before anything has run. Holding one never forces evaluation: the value only
//! materializes when a consumer calls [`Deferred::resolve`] during execution.
//!
//! There are three flavours of deferred value:
//!
//! * **slots**, created with [`Deferred::new`], fulfilled exactly once by the
//!   task that declares them as an output;
//! * **fixed** values, created with [`Deferred::fixed`], already available and
//!   produced by nobody, which makes them a way to pass a literal without
//!   creating a dependency edge;
//! * **derived** values, created with [`Deferred::map`], [`Deferred::zip`] and
//!   [`Deferred::all`], computed at most once from their sources on first
//!   resolution.
//!
//! Derived values remember where they came from, so [`Deferred::producers`]
//! can follow a value through any number of transformations back to the tasks
//! that must run first, without resolving anything.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::core::ArcStr;
use crate::error::WiringError;
use crate::task::TaskRef;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of a deferred value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeferredId(u64);

impl DeferredId {
    fn next() -> Self {
        DeferredId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

type Compute<T> = Box<dyn Fn() -> Result<T, WiringError> + Send + Sync>;
type Upstream = Box<dyn Fn() -> Vec<Arc<dyn Erased>> + Send + Sync>;

enum Source<T> {
    Slot {
        value: OnceLock<T>,
        producer: OnceLock<TaskRef>,
    },
    Fixed(T),
    Derived {
        cache: Mutex<Option<T>>,
        compute: Compute<T>,
        upstream: Upstream,
    },
}

struct Inner<T> {
    id: DeferredId,
    label: ArcStr,
    source: Source<T>,
}

/// Type-erased view used by the task graph to inspect values it cannot name.
pub trait Erased: Send + Sync {
    fn id(&self) -> DeferredId;

    fn label(&self) -> &str;

    /// Tasks that have to run before this value becomes available.
    fn producers(&self) -> Vec<TaskRef>;

    fn is_available(&self) -> bool;

    /// Fails if this value cannot be declared as the output of a task.
    fn check_claim(&self) -> Result<(), WiringError>;

    fn claim(&self, task: TaskRef) -> Result<(), WiringError>;
}

impl<T> Erased for Inner<T>
where
    T: Send + Sync + 'static,
{
    fn id(&self) -> DeferredId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn producers(&self) -> Vec<TaskRef> {
        match &self.source {
            Source::Slot { producer, .. } => producer.get().cloned().into_iter().collect(),
            Source::Fixed(_) => vec![],
            Source::Derived { upstream, .. } => {
                let mut producers: Vec<TaskRef> = vec![];
                for source in upstream() {
                    for task in source.producers() {
                        if !producers.contains(&task) {
                            producers.push(task);
                        }
                    }
                }
                producers
            }
        }
    }

    fn is_available(&self) -> bool {
        match &self.source {
            Source::Slot { value, .. } => value.get().is_some(),
            Source::Fixed(_) => true,
            Source::Derived { upstream, .. } => upstream().iter().all(|s| s.is_available()),
        }
    }

    fn check_claim(&self) -> Result<(), WiringError> {
        match &self.source {
            Source::Slot { producer, .. } => match producer.get() {
                Some(task) => Err(WiringError::ProducerConflict {
                    value: self.label.to_string(),
                    producer: task.name().to_string(),
                }),
                None => Ok(()),
            },
            _ => Err(WiringError::ReadOnlyValue {
                value: self.label.to_string(),
            }),
        }
    }

    fn claim(&self, task: TaskRef) -> Result<(), WiringError> {
        self.check_claim()?;

        match &self.source {
            Source::Slot { producer, .. } => producer.set(task).map_err(|_| {
                WiringError::ProducerConflict {
                    value: self.label.to_string(),
                    producer: producer.get().map(|t| t.name().to_string()).unwrap_or_default(),
                }
            }),
            _ => unreachable!("check_claim rejects non-slot values"),
        }
    }
}

/// A lazily available value of type `T`.
///
/// Cloning a `Deferred` is cheap and yields another handle to the same value.
pub struct Deferred<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> PartialEq for Deferred<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for Deferred<T> {}

impl<T> Debug for Deferred<T>
where
    T: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("available", &self.inner.is_available())
            .finish()
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty slot, to be fulfilled by the task declaring it as an
    /// output.
    pub fn new(label: impl Into<ArcStr>) -> Self {
        Self::from_source(
            label,
            Source::Slot {
                value: OnceLock::new(),
                producer: OnceLock::new(),
            },
        )
    }

    /// Creates a value which is available right away and has no producer.
    pub fn fixed(label: impl Into<ArcStr>, value: T) -> Self {
        Self::from_source(label, Source::Fixed(value))
    }

    pub(crate) fn derived<C, U>(label: impl Into<ArcStr>, upstream: U, compute: C) -> Self
    where
        C: Fn() -> Result<T, WiringError> + Send + Sync + 'static,
        U: Fn() -> Vec<Arc<dyn Erased>> + Send + Sync + 'static,
    {
        Self::from_source(
            label,
            Source::Derived {
                cache: Mutex::new(None),
                compute: Box::new(compute),
                upstream: Box::new(upstream),
            },
        )
    }

    fn from_source(label: impl Into<ArcStr>, source: Source<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: DeferredId::next(),
                label: label.into(),
                source,
            }),
        }
    }

    pub fn id(&self) -> DeferredId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Sets the value of a slot. A slot can be fulfilled once.
    ///
    /// Slots declared as the output of a task can only be fulfilled by that
    /// task, through its [`TaskContext`](crate::TaskContext).
    pub fn fulfill(&self, value: T) -> Result<(), WiringError> {
        if let Source::Slot { producer, .. } = &self.inner.source
            && let Some(task) = producer.get()
        {
            return Err(WiringError::ProducerConflict {
                value: self.label().to_string(),
                producer: task.name().to_string(),
            });
        }

        self.commit(value)
    }

    /// Stores the value of a slot on behalf of its producer.
    pub(crate) fn commit(&self, value: T) -> Result<(), WiringError> {
        match &self.inner.source {
            Source::Slot { value: cell, .. } => {
                cell.set(value).map_err(|_| WiringError::AlreadyFulfilled {
                    value: self.label().to_string(),
                })
            }
            _ => Err(WiringError::ReadOnlyValue {
                value: self.label().to_string(),
            }),
        }
    }

    /// Returns the value, computing derived values on first access.
    ///
    /// Resolving a slot whose producer has not run yet is an error, never a
    /// default value.
    pub fn resolve(&self) -> Result<T, WiringError> {
        match &self.inner.source {
            Source::Slot { value, .. } => {
                value.get().cloned().ok_or_else(|| WiringError::Unresolved {
                    value: self.label().to_string(),
                })
            }
            Source::Fixed(value) => Ok(value.clone()),
            Source::Derived { cache, compute, .. } => {
                let mut cache = cache.lock().expect("deferred cache lock poisoned");

                if let Some(value) = cache.as_ref() {
                    return Ok(value.clone());
                }

                let value = compute()?;
                *cache = Some(value.clone());
                Ok(value)
            }
        }
    }

    /// Tasks which must run before this value can be resolved.
    pub fn producers(&self) -> Vec<TaskRef> {
        self.inner.producers()
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    /// Derives a new value by applying `f` once the current one is available.
    pub fn map<U, F>(&self, label: impl Into<ArcStr>, f: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let source = self.clone();
        let upstream = self.erased();

        Deferred::derived(
            label,
            move || vec![upstream.clone()],
            move || source.resolve().map(&f),
        )
    }

    /// Pairs two values; the result is available once both are.
    pub fn zip<U>(&self, other: &Deferred<U>) -> Deferred<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let label = format!("({}, {})", self.label(), other.label());
        let (a, b) = (self.clone(), other.clone());
        let upstream = [self.erased(), other.erased()];

        Deferred::derived(
            label,
            move || upstream.to_vec(),
            move || Ok((a.resolve()?, b.resolve()?)),
        )
    }

    /// Collects several values into one list, keeping their order.
    pub fn all(label: impl Into<ArcStr>, values: Vec<Deferred<T>>) -> Deferred<Vec<T>> {
        let upstream: Vec<_> = values.iter().map(Deferred::erased).collect();

        Deferred::derived(
            label,
            move || upstream.clone(),
            move || values.iter().map(Deferred::resolve).collect(),
        )
    }

    pub(crate) fn erased(&self) -> Arc<dyn Erased> {
        self.inner.clone()
    }
}
