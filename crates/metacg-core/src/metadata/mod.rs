//! Type-erased metadata attached to nodes, edges and whole graphs.
//!
//! Analysis passes define their own metadata types by implementing
//! [`Metadata`] (behaviour on an instance) and [`MetadataKind`] (the string
//! key and the JSON decoder). The codec never needs compile-time knowledge of
//! a type: it looks decoders up by key in a
//! [`MetadataRegistry`](registry::MetadataRegistry) and encodes through the
//! trait object.
//!
//! Node references inside metadata are stored as [`NodeId`]s. Translating
//! them to and from the textual identifiers used by a particular file goes
//! through [`NodeToStr`] and [`StrToNode`].

pub mod analysis;
pub mod builtin;
pub mod opaque;
pub mod registry;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::id::NodeId;
use crate::merge::{GraphMapping, MergeAction};

pub use analysis::{
    GlobalLoopDepthMd, LoopCallDepthMd, LoopDepthMd, MallocVariableMd, NumConditionalBranchesMd,
    NumOperationsMd, UniqueTypeMd,
};
pub use builtin::{
    CodeStatisticsMd, EntryFunctionMd, FilePropertiesMd, InlineMd, NumStatementsMd, OverrideMd,
};
pub use opaque::OpaqueMetadata;
pub use registry::MetadataRegistry;

/// Maps a node id to the textual identifier used in a particular file.
pub trait NodeToStr {
    fn node_to_str(&self, id: NodeId) -> Option<String>;
}

/// Resolves a textual identifier from a file back to a node id.
pub trait StrToNode {
    fn str_to_node(&self, id: &str) -> Option<NodeId>;
}

/// Upcasting helper so trait objects can be downcast to concrete types.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Cloning helper for boxed metadata.
pub trait CloneMetadata {
    fn clone_box(&self) -> Box<dyn Metadata>;
}

impl<T: Metadata + Clone> CloneMetadata for T {
    fn clone_box(&self) -> Box<dyn Metadata> {
        Box::new(self.clone())
    }
}

/// Behaviour shared by every metadata instance.
pub trait Metadata: AsAny + CloneMetadata + fmt::Debug + Send + Sync {
    /// Key under which the instance is stored and serialized.
    fn key(&self) -> &str;

    /// Serializes the instance, expressing embedded node ids through `ids`.
    fn to_json(&self, ids: &dyn NodeToStr) -> Result<Value, CoreError>;

    /// Folds `other` (same key, from a merge source graph) into `self`.
    ///
    /// `action` is the merge decision for the owning node, or `None` for
    /// edge and graph-level metadata. Node ids held by `other` are source
    /// ids and must be translated through `mapping`.
    fn merge(
        &mut self,
        other: &dyn Metadata,
        action: Option<&MergeAction>,
        mapping: &GraphMapping,
    ) -> Result<(), CoreError>;

    /// Rewrites embedded node ids after the instance was copied into another
    /// graph. Types without node references keep the default.
    fn apply_mapping(&mut self, _mapping: &GraphMapping) -> Result<(), CoreError> {
        Ok(())
    }
}

/// A concrete metadata type with a compile-time key and a JSON decoder.
pub trait MetadataKind: Metadata + Sized {
    const KEY: &'static str;

    fn from_json(value: &Value, ids: &dyn StrToNode) -> Result<Self, CoreError>;
}

/// Downcasts `other` to the type of the receiver during a merge.
pub(crate) fn downcast_other<'a, T: MetadataKind>(
    other: &'a dyn Metadata,
) -> Result<&'a T, CoreError> {
    other
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| CoreError::MetadataTypeMismatch {
            key: other.key().to_string(),
        })
}

/// Builds a decode error for `T` from anything printable.
pub(crate) fn decode_error<T: MetadataKind>(reason: impl fmt::Display) -> CoreError {
    CoreError::MetadataDecode {
        key: T::KEY.to_string(),
        reason: reason.to_string(),
    }
}

// -----------------------------------------------------------------------
// MetadataMap
// -----------------------------------------------------------------------

/// String-keyed metadata container holding at most one instance per key.
///
/// Iteration is in key order so serialized output is deterministic.
#[derive(Debug, Default)]
pub struct MetadataMap {
    entries: BTreeMap<String, Box<dyn Metadata>>,
}

impl Clone for MetadataMap {
    fn clone(&self) -> Self {
        MetadataMap {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone_box()))
                .collect(),
        }
    }
}

impl MetadataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if an instance is stored under `key`.
    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns true if an instance of `T` is stored.
    pub fn has_kind<T: MetadataKind>(&self) -> bool {
        self.get::<T>().is_some()
    }

    /// Typed lookup. Returns `None` if absent or stored with another type.
    pub fn get<T: MetadataKind>(&self) -> Option<&T> {
        let md: &dyn Metadata = self.entries.get(T::KEY)?.as_ref();
        md.as_any().downcast_ref::<T>()
    }

    pub fn get_mut<T: MetadataKind>(&mut self) -> Option<&mut T> {
        let md: &mut dyn Metadata = self.entries.get_mut(T::KEY)?.as_mut();
        md.as_any_mut().downcast_mut::<T>()
    }

    /// Untyped lookup by key.
    pub fn get_dyn(&self, key: &str) -> Option<&dyn Metadata> {
        self.entries.get(key).map(|md| md.as_ref())
    }

    pub fn get_dyn_mut(&mut self, key: &str) -> Option<&mut (dyn Metadata + 'static)> {
        self.entries.get_mut(key).map(|md| md.as_mut())
    }

    /// Attaches a boxed instance.
    ///
    /// Returns [`CoreError::DuplicateMetadata`] if the key is already taken.
    pub fn add(&mut self, md: Box<dyn Metadata>) -> Result<(), CoreError> {
        let key = md.key().to_string();
        if self.entries.contains_key(&key) {
            return Err(CoreError::DuplicateMetadata { key });
        }
        self.entries.insert(key, md);
        Ok(())
    }

    /// Typed variant of [`add`](Self::add).
    pub fn insert<T: MetadataKind>(&mut self, md: T) -> Result<(), CoreError> {
        self.add(Box::new(md))
    }

    /// Returns the stored `T`, creating a default instance first if absent.
    pub fn get_or_create<T: MetadataKind + Default>(&mut self) -> Result<&mut T, CoreError> {
        let md: &mut dyn Metadata = self
            .entries
            .entry(T::KEY.to_string())
            .or_insert_with(|| Box::new(T::default()))
            .as_mut();
        md.as_any_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| CoreError::MetadataTypeMismatch {
                key: T::KEY.to_string(),
            })
    }

    /// Detaches and returns the instance stored under `key`.
    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Metadata>> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &dyn Metadata)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Serializes every entry into a JSON object keyed by metadata key.
    pub fn to_json(&self, ids: &dyn NodeToStr) -> Result<Map<String, Value>, CoreError> {
        let mut out = Map::new();
        for (key, md) in self.iter() {
            out.insert(key.to_string(), md.to_json(ids)?);
        }
        Ok(out)
    }
}
