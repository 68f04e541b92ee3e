//! Metadata decoder registry.
//!
//! Maps a metadata key to the function that decodes it from JSON. Readers
//! hold a [`MetadataRegistry`] value; analysis modules that want their types
//! picked up by every reader in the process register them once in the
//! [`global`] registry at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

use crate::error::CoreError;
use crate::metadata::analysis::{
    GlobalLoopDepthMd, LoopCallDepthMd, LoopDepthMd, MallocVariableMd, NumConditionalBranchesMd,
    NumOperationsMd, UniqueTypeMd,
};
use crate::metadata::builtin::{
    CodeStatisticsMd, EntryFunctionMd, FilePropertiesMd, InlineMd, NumStatementsMd, OverrideMd,
};
use crate::metadata::opaque::OpaqueMetadata;
use crate::metadata::{Metadata, MetadataKind, StrToNode};

/// Factory decoding one metadata key.
pub type DecodeFn = fn(&Value, &dyn StrToNode) -> Result<Box<dyn Metadata>, CoreError>;

fn decode_kind<T: MetadataKind>(
    value: &Value,
    ids: &dyn StrToNode,
) -> Result<Box<dyn Metadata>, CoreError> {
    Ok(Box::new(T::from_json(value, ids)?))
}

/// Table of metadata decoders keyed by metadata key.
#[derive(Clone, Default)]
pub struct MetadataRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

impl MetadataRegistry {
    /// Creates an empty registry. Every key decodes as opaque JSON.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in metadata types registered.
    pub fn with_builtins() -> Self {
        let builtins: [(&str, DecodeFn); 13] = [
            (OverrideMd::KEY, decode_kind::<OverrideMd>),
            (FilePropertiesMd::KEY, decode_kind::<FilePropertiesMd>),
            (NumStatementsMd::KEY, decode_kind::<NumStatementsMd>),
            (CodeStatisticsMd::KEY, decode_kind::<CodeStatisticsMd>),
            (InlineMd::KEY, decode_kind::<InlineMd>),
            (EntryFunctionMd::KEY, decode_kind::<EntryFunctionMd>),
            (LoopDepthMd::KEY, decode_kind::<LoopDepthMd>),
            (GlobalLoopDepthMd::KEY, decode_kind::<GlobalLoopDepthMd>),
            (LoopCallDepthMd::KEY, decode_kind::<LoopCallDepthMd>),
            (NumOperationsMd::KEY, decode_kind::<NumOperationsMd>),
            (NumConditionalBranchesMd::KEY, decode_kind::<NumConditionalBranchesMd>),
            (MallocVariableMd::KEY, decode_kind::<MallocVariableMd>),
            (UniqueTypeMd::KEY, decode_kind::<UniqueTypeMd>),
        ];
        MetadataRegistry {
            decoders: builtins
                .into_iter()
                .map(|(key, decode)| (key.to_string(), decode))
                .collect(),
        }
    }

    /// Registers `T` under [`MetadataKind::KEY`].
    ///
    /// Returns [`CoreError::DuplicateRegistration`] if the key is taken.
    pub fn register<T: MetadataKind>(&mut self) -> Result<(), CoreError> {
        self.register_fn(T::KEY, decode_kind::<T>)
    }

    /// Registers a decoder for a key chosen at runtime.
    pub fn register_fn(&mut self, key: &str, decode: DecodeFn) -> Result<(), CoreError> {
        if self.decoders.contains_key(key) {
            return Err(CoreError::DuplicateRegistration {
                key: key.to_string(),
            });
        }
        self.decoders.insert(key.to_string(), decode);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.decoders.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Registered keys in sorted order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Decodes `value` stored under `key`.
    ///
    /// Keys without a registered decoder are kept as [`OpaqueMetadata`] so
    /// that data written by unknown analysis passes survives a conversion.
    pub fn decode(
        &self,
        key: &str,
        value: &Value,
        ids: &dyn StrToNode,
    ) -> Result<Box<dyn Metadata>, CoreError> {
        match self.decoders.get(key) {
            Some(decode) => decode(value, ids),
            None => {
                tracing::warn!(key, "no decoder registered for metadata, keeping raw JSON");
                Ok(Box::new(OpaqueMetadata::new(key, value.clone())))
            }
        }
    }
}

// -----------------------------------------------------------------------
// Process-wide registry
// -----------------------------------------------------------------------

static GLOBAL: OnceLock<RwLock<MetadataRegistry>> = OnceLock::new();

/// The process-wide registry, initialised with the built-in types.
pub fn global() -> &'static RwLock<MetadataRegistry> {
    GLOBAL.get_or_init(|| RwLock::new(MetadataRegistry::with_builtins()))
}

fn read_global() -> RwLockReadGuard<'static, MetadataRegistry> {
    global().read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_global() -> RwLockWriteGuard<'static, MetadataRegistry> {
    global().write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registers `T` in the process-wide registry.
pub fn register_global<T: MetadataKind>() -> Result<(), CoreError> {
    write_global().register::<T>()
}

/// Copy of the process-wide registry, taken when a reader is created.
pub fn global_snapshot() -> MetadataRegistry {
    read_global().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;
    use crate::merge::{GraphMapping, MergeAction};
    use crate::metadata::NodeToStr;
    use serde_json::json;

    struct NoIds;
    impl StrToNode for NoIds {
        fn str_to_node(&self, _id: &str) -> Option<NodeId> {
            None
        }
    }

    #[derive(Debug, Clone, Default)]
    struct LoadImbalance {
        flagged: bool,
    }

    impl Metadata for LoadImbalance {
        fn key(&self) -> &str {
            Self::KEY
        }

        fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
            Ok(json!({ "flagged": self.flagged }))
        }

        fn merge(
            &mut self,
            other: &dyn Metadata,
            _action: Option<&MergeAction>,
            _mapping: &GraphMapping,
        ) -> Result<(), CoreError> {
            self.flagged |= crate::metadata::downcast_other::<Self>(other)?.flagged;
            Ok(())
        }
    }

    impl MetadataKind for LoadImbalance {
        const KEY: &'static str = "loadImbalance";

        fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
            Ok(LoadImbalance {
                flagged: value["flagged"].as_bool().unwrap_or(false),
            })
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = MetadataRegistry::with_builtins();
        assert_eq!(
            registry.keys(),
            vec![
                "codeStatistics",
                "entryFunction",
                "fileProperties",
                "globalLoopDepth",
                "inlineInfo",
                "loopCallDepth",
                "loopDepth",
                "mallocCollector",
                "numConditionalBranches",
                "numOperations",
                "numStatements",
                "overrideMD",
                "uniqueTypeMetaData",
            ]
        );
    }

    #[test]
    fn analysis_types_decode_to_concrete_types() {
        let registry = MetadataRegistry::with_builtins();
        let md = registry
            .decode("loopCallDepth", &json!({"inner": 2}), &NoIds)
            .unwrap();
        let md: &dyn Metadata = md.as_ref();
        let depth = md.as_any().downcast_ref::<LoopCallDepthMd>().unwrap();
        assert_eq!(depth.calls["inner"], 2);
        assert!(registry.decode("numOperations", &json!(3), &NoIds).is_err());
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = MetadataRegistry::new();
        registry.register::<LoadImbalance>().unwrap();
        let err = registry.register::<LoadImbalance>().unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRegistration { key } if key == "loadImbalance"));
    }

    #[test]
    fn registered_type_decodes_to_concrete_type() {
        let mut registry = MetadataRegistry::new();
        registry.register::<LoadImbalance>().unwrap();
        let md = registry
            .decode("loadImbalance", &json!({"flagged": true}), &NoIds)
            .unwrap();
        let md: &dyn Metadata = md.as_ref();
        assert!(md.as_any().downcast_ref::<LoadImbalance>().unwrap().flagged);
    }

    #[test]
    fn unknown_key_decodes_as_opaque() {
        let registry = MetadataRegistry::new();
        let md = registry
            .decode("someTool", &json!({"x": [1, 2]}), &NoIds)
            .unwrap();
        assert_eq!(md.key(), "someTool");
        let md: &dyn Metadata = md.as_ref();
        assert!(md.as_any().downcast_ref::<OpaqueMetadata>().is_some());
    }

    #[test]
    fn global_registry_accepts_new_types_once() {
        register_global::<LoadImbalance>().unwrap();
        assert!(global_snapshot().contains("loadImbalance"));
        assert!(global_snapshot().contains("overrideMD"));
        assert!(register_global::<LoadImbalance>().is_err());
    }
}
