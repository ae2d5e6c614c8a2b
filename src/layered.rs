//! Ordered, layered collections of source directories.
//!
//! A [`LayeredSources`] collects contributors of source directories for one
//! source kind of one variant. Each contributor is a *layer*; layers keep the
//! order in which they were added, which is the priority order used by the
//! merge step: earlier layers lose conflicts against later ones.
//!
//! Nothing here resolves a directory eagerly. [`LayeredSources::flatten`]
//! returns a [`Deferred`] list which reads the layers only when it is resolved,
//! after the configuration phase closed and the contributing tasks ran.

use std::sync::{Arc, OnceLock, RwLock, Weak};

use camino::Utf8PathBuf;

use crate::core::{ArcStr, Directory, PhaseGate};
use crate::deferred::{Deferred, Erased};
use crate::error::WiringError;

/// One contributor of directories.
#[derive(Debug, Clone)]
pub enum Layer {
    Directory(Deferred<Directory>),
    Directories(Deferred<Vec<Directory>>),
}

impl Layer {
    fn erased(&self) -> Arc<dyn Erased> {
        match self {
            Layer::Directory(dir) => dir.erased(),
            Layer::Directories(dirs) => dirs.erased(),
        }
    }

    fn resolve_into(&self, acc: &mut Vec<Directory>) -> Result<(), WiringError> {
        match self {
            Layer::Directory(dir) => acc.push(dir.resolve()?),
            Layer::Directories(dirs) => acc.extend(dirs.resolve()?),
        }

        Ok(())
    }
}

impl From<Deferred<Directory>> for Layer {
    fn from(value: Deferred<Directory>) -> Self {
        Layer::Directory(value)
    }
}

impl From<Deferred<Vec<Directory>>> for Layer {
    fn from(value: Deferred<Vec<Directory>>) -> Self {
        Layer::Directories(value)
    }
}

struct Inner {
    name: ArcStr,
    layers: RwLock<Vec<Layer>>,
    flattened: OnceLock<Deferred<Vec<Directory>>>,
    gate: PhaseGate,
}

/// An append-only, order-preserving collection of source layers.
///
/// Cloning yields another handle to the same collection.
#[derive(Clone)]
pub struct LayeredSources {
    inner: Arc<Inner>,
}

impl LayeredSources {
    pub(crate) fn new(name: impl Into<ArcStr>, gate: PhaseGate) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                layers: RwLock::new(vec![]),
                flattened: OnceLock::new(),
                gate,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of registered layers.
    pub fn layers(&self) -> usize {
        self.inner.layers.read().expect("layer lock poisoned").len()
    }

    /// Appends a layer at the tail. Only allowed during configuration.
    pub fn add_layer(&self, layer: impl Into<Layer>) -> Result<(), WiringError> {
        self.inner.gate.check("add a source layer")?;

        let layer = layer.into();
        tracing::debug!("{}: adding layer {}", self.name(), layer.erased().label());

        self.inner
            .layers
            .write()
            .expect("layer lock poisoned")
            .push(layer);

        Ok(())
    }

    /// Appends a layer made of directories known at configuration time.
    pub fn add_static_dirs<I, P>(&self, dirs: I) -> Result<(), WiringError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        let dirs: Vec<Directory> = dirs.into_iter().map(Directory::new).collect();
        let label = format!("{}.static", self.name());
        self.add_layer(Deferred::fixed(label, dirs))
    }

    /// The final ordered list of directories, as a lazily resolved value.
    ///
    /// The same handle is returned on every call. It can only be resolved once
    /// the configuration phase is closed, and then reflects every layer in
    /// registration order; within a layer, the order that layer resolves to is
    /// kept.
    pub fn flatten(&self) -> Deferred<Vec<Directory>> {
        self.inner
            .flattened
            .get_or_init(|| {
                // The cached handle lives inside the collection, so it must not
                // keep the collection alive.
                let upstream = Arc::downgrade(&self.inner);
                let compute = Arc::downgrade(&self.inner);
                let label = format!("{}.all", self.inner.name);

                Deferred::derived(
                    label.clone(),
                    move || match upstream.upgrade() {
                        Some(inner) => inner
                            .layers
                            .read()
                            .expect("layer lock poisoned")
                            .iter()
                            .map(Layer::erased)
                            .collect(),
                        None => vec![],
                    },
                    move || flatten_layers(&compute, &label),
                )
            })
            .clone()
    }
}

fn flatten_layers(inner: &Weak<Inner>, label: &str) -> Result<Vec<Directory>, WiringError> {
    let inner = inner.upgrade().ok_or_else(|| WiringError::Unresolved {
        value: label.to_string(),
    })?;

    // The result is cached, so it must not be computed while layers can still
    // be added.
    if !inner.gate.is_closed() {
        return Err(WiringError::ConfigurationPhaseOpen {
            operation: format!("resolve {label}"),
        });
    }

    let layers = inner.layers.read().expect("layer lock poisoned");
    let mut acc = Vec::new();
    for layer in layers.iter() {
        layer.resolve_into(&mut acc)?;
    }

    Ok(acc)
}

impl std::fmt::Debug for LayeredSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredSources")
            .field("name", &self.inner.name)
            .field("layers", &self.layers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources() -> (LayeredSources, PhaseGate) {
        let gate = PhaseGate::default();
        (LayeredSources::new("debug.assets", gate.clone()), gate)
    }

    fn dirs(list: &[&str]) -> Vec<Directory> {
        list.iter().map(|d| Directory::from(*d)).collect()
    }

    #[test]
    fn test_registration_order_not_fulfilment_order() {
        let (sources, gate) = sources();
        let first = Deferred::<Directory>::new("first");
        let second = Deferred::<Vec<Directory>>::new("second");
        let third = Deferred::<Directory>::new("third");

        sources.add_layer(first.clone()).unwrap();
        sources.add_layer(second.clone()).unwrap();
        sources.add_layer(third.clone()).unwrap();

        let all = sources.flatten();
        gate.close();

        third.fulfill(Directory::from("c")).unwrap();
        second.fulfill(dirs(&["b1", "b2"])).unwrap();
        first.fulfill(Directory::from("a")).unwrap();

        assert_eq!(all.resolve().unwrap(), dirs(&["a", "b1", "b2", "c"]));
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let (sources, gate) = sources();
        sources.add_static_dirs(["src/main/assets"]).unwrap();
        gate.close();

        let a = sources.flatten();
        let b = sources.flatten();

        assert_eq!(a.id(), b.id());
        assert_eq!(a.resolve().unwrap(), b.resolve().unwrap());
    }

    #[test]
    fn test_flatten_sees_layers_added_later() {
        let (sources, gate) = sources();
        let all = sources.flatten();

        sources.add_static_dirs(["src/main/assets"]).unwrap();
        sources
            .add_layer(Deferred::fixed("gen", Directory::from("gen")))
            .unwrap();
        gate.close();

        assert_eq!(all.resolve().unwrap(), dirs(&["src/main/assets", "gen"]));
    }

    #[test]
    fn test_empty_layer_keeps_order() {
        let (sources, gate) = sources();
        sources.add_static_dirs(["a"]).unwrap();
        sources.add_static_dirs(Vec::<&str>::new()).unwrap();
        sources.add_static_dirs(["c"]).unwrap();
        gate.close();

        assert_eq!(sources.layers(), 3);
        assert_eq!(sources.flatten().resolve().unwrap(), dirs(&["a", "c"]));
    }

    #[test]
    fn test_add_layer_after_close() {
        let (sources, gate) = sources();
        sources.add_static_dirs(["a"]).unwrap();
        gate.close();

        let result = sources.add_layer(Deferred::fixed("late", Directory::from("late")));

        assert!(matches!(
            result,
            Err(WiringError::ConfigurationPhaseClosed { .. })
        ));
        assert_eq!(sources.layers(), 1);
        assert_eq!(sources.flatten().resolve().unwrap(), dirs(&["a"]));
    }

    #[test]
    fn test_unproduced_layer_fails() {
        let (sources, gate) = sources();
        sources.add_layer(Deferred::<Directory>::new("pending")).unwrap();
        gate.close();

        assert!(matches!(
            sources.flatten().resolve(),
            Err(WiringError::Unresolved { value }) if value == "pending"
        ));
    }

    #[test]
    fn test_no_resolution_during_configuration() {
        let (sources, gate) = sources();
        sources.add_static_dirs(["src/main/assets"]).unwrap();
        let all = sources.flatten();

        assert!(matches!(
            all.resolve(),
            Err(WiringError::ConfigurationPhaseOpen { .. })
        ));

        sources
            .add_layer(Deferred::fixed("gen", Directory::from("gen")))
            .unwrap();
        gate.close();

        assert_eq!(all.resolve().unwrap(), dirs(&["src/main/assets", "gen"]));
    }
}
