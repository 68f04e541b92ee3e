//! Raw JSON kept for metadata keys nobody registered a decoder for.

use serde_json::Value;

use crate::error::CoreError;
use crate::merge::{GraphMapping, MergeAction};
use crate::metadata::{Metadata, NodeToStr};

/// Metadata whose type is unknown to this process.
///
/// The value is written back verbatim. Node references inside it cannot be
/// translated, so they are only meaningful for the id scheme of the file the
/// value was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct OpaqueMetadata {
    key: String,
    value: Value,
}

impl OpaqueMetadata {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        OpaqueMetadata {
            key: key.into(),
            value,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl Metadata for OpaqueMetadata {
    fn key(&self) -> &str {
        &self.key
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(self.value.clone())
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        if let Some(other) = other.as_any().downcast_ref::<OpaqueMetadata>() {
            if other.value != self.value {
                tracing::warn!(key = %self.key, "cannot merge unknown metadata, keeping existing value");
            }
        }
        Ok(())
    }
}
