//! Capabilities attached to recognized objects.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::types::{FileGroupKey, FileId};

/// The closed set of capability kinds known to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacetKind {
    Open,
    Edit,
    Container,
    Instance,
    Link,
}

impl FacetKind {
    /// Parse the lowercase name used in configuration files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(FacetKind::Open),
            "edit" => Some(FacetKind::Edit),
            "container" => Some(FacetKind::Container),
            "instance" => Some(FacetKind::Instance),
            "link" => Some(FacetKind::Link),
            _ => None,
        }
    }
}

/// One capability value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Facet {
    /// Can be opened by the presentation layer.
    Open,
    /// Editable content of the given mime type.
    Edit { mime: String },
    /// A folder whose children are recognized by a folder task.
    Container { folder: FileId },
    /// Provides an instance of a named type.
    Instance { type_name: String },
    /// Points at another object's group.
    Link { target: FileGroupKey },
}

impl Facet {
    pub fn kind(&self) -> FacetKind {
        match self {
            Facet::Open => FacetKind::Open,
            Facet::Edit { .. } => FacetKind::Edit,
            Facet::Container { .. } => FacetKind::Container,
            Facet::Instance { .. } => FacetKind::Instance,
            Facet::Link { .. } => FacetKind::Link,
        }
    }
}

/// Capability set of one object: closed facets plus a typed extension table
/// for recognizer-specific values.
#[derive(Clone, Default)]
pub struct Facets {
    builtin: BTreeMap<FacetKind, Facet>,
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Facets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Facets::insert`].
    pub fn with(mut self, facet: Facet) -> Self {
        self.insert(facet);
        self
    }

    /// Builder form of [`Facets::insert_extension`].
    pub fn with_extension<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.insert_extension(value);
        self
    }

    /// Add a facet, replacing any facet of the same kind.
    pub fn insert(&mut self, facet: Facet) {
        self.builtin.insert(facet.kind(), facet);
    }

    pub fn insert_extension<T: Any + Send + Sync>(&mut self, value: T) {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get(&self, kind: FacetKind) -> Option<&Facet> {
        self.builtin.get(&kind)
    }

    pub fn has(&self, kind: FacetKind) -> bool {
        self.builtin.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = FacetKind> + '_ {
        self.builtin.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Facet> + '_ {
        self.builtin.values()
    }

    /// Look up a recognizer-specific extension by type.
    pub fn extension<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.extensions
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn is_empty(&self) -> bool {
        self.builtin.is_empty() && self.extensions.is_empty()
    }
}

impl fmt::Debug for Facets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Facets")
            .field("builtin", &self.builtin)
            .field("extensions", &self.extensions.len())
            .finish()
    }
}

bitflags! {
    /// Operations an object allows on its files.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectOps: u8 {
        const DELETE = 1;
        const COPY = 1 << 1;
        const MOVE = 1 << 2;
        const RENAME = 1 << 3;
        const SHADOW = 1 << 4;
    }
}

impl Default for ObjectOps {
    fn default() -> Self {
        ObjectOps::all()
    }
}
