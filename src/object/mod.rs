//! Canonical objects produced by recognition.
//!
//! A [`TypedObject`] is created only by the
//! [`IdentityRegistry`](crate::registry::IdentityRegistry), after the owning
//! recognizer's `build` returned successfully. Its validity only ever moves
//! from `Valid` to `Invalidated`; a later lookup for the same files yields a
//! new instance with a new [`ObjectId`].

mod facet;

pub use facet::{Facet, FacetKind, Facets, ObjectOps};

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde::Serialize;

use crate::types::{FileGroupKey, FileId, ObjectId, RecognizerId};

/// Which files an object spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum ObjectShape {
    SingleFile {
        primary: FileId,
    },
    MultiFile {
        primary: FileId,
        secondaries: BTreeSet<FileId>,
    },
    /// A link file standing in for another group.
    Shadow {
        link: FileId,
        target: FileGroupKey,
    },
    /// A link file whose target cannot be resolved.
    BrokenShadow {
        link: FileId,
        reason: String,
    },
}

impl ObjectShape {
    /// Shape for a primary file and its secondaries.
    pub fn for_group(primary: FileId, secondaries: &BTreeSet<FileId>) -> Self {
        if secondaries.is_empty() {
            ObjectShape::SingleFile { primary }
        } else {
            ObjectShape::MultiFile {
                primary,
                secondaries: secondaries.clone(),
            }
        }
    }

    pub fn primary(&self) -> FileId {
        match self {
            ObjectShape::SingleFile { primary } | ObjectShape::MultiFile { primary, .. } => *primary,
            ObjectShape::Shadow { link, .. } | ObjectShape::BrokenShadow { link, .. } => *link,
        }
    }

    pub fn secondaries(&self) -> BTreeSet<FileId> {
        match self {
            ObjectShape::MultiFile { secondaries, .. } => secondaries.clone(),
            _ => BTreeSet::new(),
        }
    }

    /// Primary first, then secondaries in id order.
    pub fn files(&self) -> Vec<FileId> {
        let mut files = vec![self.primary()];
        files.extend(self.secondaries());
        files
    }
}

/// Validity of a [`TypedObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Validity {
    Valid,
    Invalidated,
}

/// What a recognizer's `build` hands back to the registry.
///
/// The registry turns it into a [`TypedObject`] only after `build` returned,
/// so nothing half-constructed is ever published.
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub type_name: Arc<str>,
    pub facets: Facets,
    pub ops: ObjectOps,
    /// Explicit shape; derived from the file group when `None`.
    pub shape: Option<ObjectShape>,
}

impl ObjectSpec {
    pub fn new(type_name: impl Into<Arc<str>>) -> Self {
        Self {
            type_name: type_name.into(),
            facets: Facets::new(),
            ops: ObjectOps::default(),
            shape: None,
        }
    }

    pub fn facet(mut self, facet: Facet) -> Self {
        self.facets.insert(facet);
        self
    }

    pub fn facets(mut self, facets: Facets) -> Self {
        self.facets = facets;
        self
    }

    pub fn ops(mut self, ops: ObjectOps) -> Self {
        self.ops = ops;
        self
    }

    pub fn shape(mut self, shape: ObjectShape) -> Self {
        self.shape = Some(shape);
        self
    }
}

/// The canonical, identity-cached representation of a recognized file group.
pub struct TypedObject {
    id: ObjectId,
    key: FileGroupKey,
    recognizer: RecognizerId,
    type_name: Arc<str>,
    shape: RwLock<ObjectShape>,
    facets: Facets,
    ops: ObjectOps,
    valid: AtomicBool,
    modified: AtomicBool,
    placeholder: bool,
}

impl TypedObject {
    pub(crate) fn new(
        id: ObjectId,
        key: FileGroupKey,
        recognizer: RecognizerId,
        shape: ObjectShape,
        spec: ObjectSpec,
    ) -> Self {
        Self {
            id,
            key,
            recognizer,
            type_name: spec.type_name,
            shape: RwLock::new(shape),
            facets: spec.facets,
            ops: spec.ops,
            valid: AtomicBool::new(true),
            modified: AtomicBool::new(false),
            placeholder: false,
        }
    }

    /// Degraded stand-in returned when a lookup would otherwise deadlock.
    ///
    /// Never registered, born invalidated, no facets and no operations.
    pub(crate) fn placeholder(id: ObjectId, key: FileGroupKey, recognizer: RecognizerId) -> Self {
        Self {
            id,
            key,
            recognizer,
            type_name: Arc::from("placeholder"),
            shape: RwLock::new(ObjectShape::SingleFile {
                primary: key.primary(),
            }),
            facets: Facets::new(),
            ops: ObjectOps::empty(),
            valid: AtomicBool::new(false),
            modified: AtomicBool::new(false),
            placeholder: true,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn key(&self) -> FileGroupKey {
        self.key
    }

    pub fn primary(&self) -> FileId {
        self.shape.read().primary()
    }

    pub fn recognizer(&self) -> &RecognizerId {
        &self.recognizer
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn shape(&self) -> ObjectShape {
        self.shape.read().clone()
    }

    pub fn files(&self) -> Vec<FileId> {
        self.shape.read().files()
    }

    pub fn contains(&self, file: FileId) -> bool {
        self.shape.read().files().contains(&file)
    }

    pub fn facets(&self) -> &Facets {
        &self.facets
    }

    pub fn facet(&self, kind: FacetKind) -> Option<&Facet> {
        self.facets.get(kind)
    }

    pub fn ops(&self) -> ObjectOps {
        self.ops
    }

    pub fn allows(&self, op: ObjectOps) -> bool {
        self.ops.contains(op)
    }

    pub fn validity(&self) -> Validity {
        if self.valid.load(Ordering::SeqCst) {
            Validity::Valid
        } else {
            Validity::Invalidated
        }
    }

    pub fn is_valid(&self) -> bool {
        self.validity() == Validity::Valid
    }

    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    /// Returns `true` if this call made the transition.
    pub(crate) fn mark_invalid(&self) -> bool {
        self.valid.swap(false, Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub(crate) fn set_modified(&self, modified: bool) -> bool {
        self.modified.swap(modified, Ordering::SeqCst)
    }

    pub(crate) fn set_shape(&self, shape: ObjectShape) {
        *self.shape.write() = shape;
    }
}

impl PartialEq for TypedObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypedObject {}

impl fmt::Debug for TypedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedObject")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("type", &self.type_name)
            .field("recognizer", &self.recognizer)
            .field("shape", &*self.shape.read())
            .field("validity", &self.validity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(v: u32) -> FileId {
        FileId::new(v).unwrap()
    }

    fn object(primary: FileId) -> TypedObject {
        TypedObject::new(
            ObjectId::new(1).unwrap(),
            FileGroupKey::of(primary),
            RecognizerId::from("test"),
            ObjectShape::SingleFile { primary },
            ObjectSpec::new("test").facet(Facet::Open),
        )
    }

    #[test]
    fn test_shape_for_group() {
        let single = ObjectShape::for_group(id(2), &BTreeSet::new());
        assert_eq!(single, ObjectShape::SingleFile { primary: id(2) });

        let multi = ObjectShape::for_group(id(2), &BTreeSet::from([id(4), id(3)]));
        assert_eq!(multi.files(), vec![id(2), id(3), id(4)]);
    }

    #[test]
    fn test_invalidation_is_one_way() {
        let obj = object(id(2));
        assert!(obj.is_valid());

        assert!(obj.mark_invalid());
        assert!(!obj.mark_invalid());
        assert_eq!(obj.validity(), Validity::Invalidated);
    }

    #[test]
    fn test_placeholder_is_degraded() {
        let obj = TypedObject::placeholder(
            ObjectId::new(9).unwrap(),
            FileGroupKey::of(id(2)),
            RecognizerId::from("test"),
        );
        assert!(obj.is_placeholder());
        assert!(!obj.is_valid());
        assert!(obj.facets().is_empty());
        assert!(obj.ops().is_empty());
    }

    #[test]
    fn test_shape_can_grow_secondaries() {
        let obj = object(id(2));
        obj.set_shape(ObjectShape::for_group(id(2), &BTreeSet::from([id(3)])));
        assert!(obj.contains(id(3)));
        assert_eq!(obj.primary(), id(2));
    }
}
