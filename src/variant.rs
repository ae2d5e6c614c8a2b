use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::{ArcStr, Directory};
use crate::deferred::Deferred;
use crate::error::WiringError;
use crate::layered::LayeredSources;
use crate::utils::capitalize;

/// Kinds of sources a variant merges from layered directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Assets,
    Resources,
}

impl SourceKind {
    /// Directory name of this kind inside a source set.
    pub fn dir_name(self) -> &'static str {
        match self {
            SourceKind::Assets => "assets",
            SourceKind::Resources => "res",
        }
    }
}

/// Final artifacts a variant publishes for other tasks to consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// The merged assets directory.
    MergedAssets,
}

/// A named build configuration, such as `debug` or `freeRelease`.
///
/// The identity of a variant is its name. The source collections and
/// artifacts are attached by the project when the variant is discovered and
/// are shared handles, so a `Variant` can be passed around by reference while
/// plugins register into it.
#[derive(Debug, Clone)]
pub struct Variant {
    name: ArcStr,
    build_type: ArcStr,
    flavors: Vec<ArcStr>,
    pub(crate) sources: BTreeMap<SourceKind, LayeredSources>,
    pub(crate) artifacts: BTreeMap<ArtifactKind, Deferred<Directory>>,
}

impl Variant {
    /// A variant combining a build type with product flavors, named the usual
    /// way: `Variant::new("release", ["free"])` is `freeRelease`.
    pub fn new<I, S>(build_type: &str, flavors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let flavors: Vec<ArcStr> = flavors.into_iter().map(|f| f.as_ref().into()).collect();

        let mut name = String::new();
        for flavor in &flavors {
            if name.is_empty() {
                name.push_str(flavor);
            } else {
                name.push_str(&capitalize(flavor));
            }
        }
        if name.is_empty() {
            name.push_str(build_type);
        } else {
            name.push_str(&capitalize(build_type));
        }

        Self {
            name: name.into(),
            build_type: build_type.into(),
            flavors,
            sources: BTreeMap::new(),
            artifacts: BTreeMap::new(),
        }
    }

    /// A variant without flavors.
    pub fn named(build_type: &str) -> Self {
        Self::new(build_type, Vec::<&str>::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name with its first letter in upper case, used to derive task
    /// names such as `createDebugAsset`.
    pub fn capitalized(&self) -> String {
        capitalize(&self.name)
    }

    pub fn build_type(&self) -> &str {
        &self.build_type
    }

    pub fn flavors(&self) -> impl Iterator<Item = &str> {
        self.flavors.iter().map(|f| &**f)
    }

    /// Source set names from lowest to highest priority.
    pub fn source_sets(&self) -> Vec<String> {
        let mut sets = vec!["main".to_string()];
        sets.extend(self.flavors.iter().map(|f| f.to_string()));
        sets.push(self.build_type.to_string());
        if !self.flavors.is_empty() {
            sets.push(self.name.to_string());
        }
        sets
    }

    /// The layered sources of the given kind, if this variant has them.
    pub fn sources(&self, kind: SourceKind) -> Option<&LayeredSources> {
        self.sources.get(&kind)
    }

    /// Like [`Variant::sources`], failing for kinds the variant lacks.
    pub fn require_sources(&self, kind: SourceKind) -> Result<&LayeredSources, WiringError> {
        self.sources
            .get(&kind)
            .ok_or_else(|| WiringError::UnknownArtifact {
                variant: self.name.to_string(),
                artifact: format!("{kind:?} sources"),
            })
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Result<Deferred<Directory>, WiringError> {
        self.artifacts
            .get(&kind)
            .cloned()
            .ok_or_else(|| WiringError::UnknownArtifact {
                variant: self.name.to_string(),
                artifact: format!("{kind:?}"),
            })
    }
}

impl PartialEq for Variant {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Variant {}
