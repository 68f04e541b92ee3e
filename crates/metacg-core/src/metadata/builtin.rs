//! Metadata types shipped with the library.
//!
//! | key              | JSON shape                                                      |
//! |------------------|-----------------------------------------------------------------|
//! | `overrideMD`     | `{"overrides": [id], "overriddenBy": [id]}`                     |
//! | `fileProperties` | `{"systemInclude": bool}`                                       |
//! | `numStatements`  | integer                                                         |
//! | `codeStatistics` | `{"numVars": integer}`                                          |
//! | `inlineInfo`     | `{"markedInline", "likelyInline", "markedAlwaysInline", "isTemplate"}` |
//! | `entryFunction`  | node id string                                                  |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::id::NodeId;
use crate::merge::{GraphMapping, MergeAction};
use crate::metadata::{decode_error, downcast_other, Metadata, MetadataKind, NodeToStr, StrToNode};

fn encode_ids<T: MetadataKind>(
    nodes: &[NodeId],
    ids: &dyn NodeToStr,
) -> Result<Vec<Value>, CoreError> {
    nodes
        .iter()
        .map(|&id| {
            ids.node_to_str(id)
                .map(Value::String)
                .ok_or_else(|| CoreError::MetadataEncode {
                    key: T::KEY.to_string(),
                    reason: format!("node {id} has no textual identifier"),
                })
        })
        .collect()
}

fn decode_ids<T: MetadataKind>(
    value: &Value,
    field: &str,
    ids: &dyn StrToNode,
) -> Result<Vec<NodeId>, CoreError> {
    let list = value
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| decode_error::<T>(format!("'{field}' must be an array")))?;
    list.iter()
        .map(|entry| {
            let text = entry
                .as_str()
                .ok_or_else(|| decode_error::<T>(format!("'{field}' entries must be strings")))?;
            ids.str_to_node(text)
                .ok_or_else(|| decode_error::<T>(format!("unknown node '{text}' in '{field}'")))
        })
        .collect()
}

/// Appends the mapped ids from `src` that `dst` does not hold yet.
fn merge_id_lists(
    dst: &mut Vec<NodeId>,
    src: &[NodeId],
    mapping: &GraphMapping,
) -> Result<(), CoreError> {
    for &id in src {
        let mapped = mapping.map(id)?;
        if !dst.contains(&mapped) {
            dst.push(mapped);
        }
    }
    Ok(())
}

fn remap_ids(list: &mut [NodeId], mapping: &GraphMapping) -> Result<(), CoreError> {
    for id in list.iter_mut() {
        *id = mapping.map(*id)?;
    }
    Ok(())
}

// -----------------------------------------------------------------------
// overrideMD
// -----------------------------------------------------------------------

/// Virtual-function override relations. Its presence marks a node virtual.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideMd {
    pub overrides: Vec<NodeId>,
    pub overridden_by: Vec<NodeId>,
}

impl Metadata for OverrideMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!({
            "overrides": encode_ids::<Self>(&self.overrides, ids)?,
            "overriddenBy": encode_ids::<Self>(&self.overridden_by, ids)?,
        }))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        let other = downcast_other::<Self>(other)?;
        merge_id_lists(&mut self.overridden_by, &other.overridden_by, mapping)?;
        merge_id_lists(&mut self.overrides, &other.overrides, mapping)
    }

    fn apply_mapping(&mut self, mapping: &GraphMapping) -> Result<(), CoreError> {
        remap_ids(&mut self.overrides, mapping)?;
        remap_ids(&mut self.overridden_by, mapping)
    }
}

impl MetadataKind for OverrideMd {
    const KEY: &'static str = "overrideMD";

    fn from_json(value: &Value, ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Ok(OverrideMd {
            overrides: decode_ids::<Self>(value, "overrides", ids)?,
            overridden_by: decode_ids::<Self>(value, "overriddenBy", ids)?,
        })
    }
}

// -----------------------------------------------------------------------
// fileProperties
// -----------------------------------------------------------------------

/// Properties of the file a function was found in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePropertiesMd {
    #[serde(rename = "systemInclude", default)]
    pub system_include: bool,
}

impl FilePropertiesMd {
    pub fn new(system_include: bool) -> Self {
        FilePropertiesMd { system_include }
    }
}

impl Metadata for FilePropertiesMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!({ "systemInclude": self.system_include }))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        self.system_include |= downcast_other::<Self>(other)?.system_include;
        Ok(())
    }
}

impl MetadataKind for FilePropertiesMd {
    const KEY: &'static str = "fileProperties";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        // Older files nest the node origin here as well; it is ignored.
        Self::deserialize(value).map_err(decode_error::<Self>)
    }
}

// -----------------------------------------------------------------------
// numStatements
// -----------------------------------------------------------------------

/// Number of statements in a function body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumStatementsMd {
    count: i64,
}

impl NumStatementsMd {
    pub fn new(count: i64) -> Self {
        NumStatementsMd { count }
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn set_count(&mut self, count: i64) {
        self.count = count;
    }
}

impl Metadata for NumStatementsMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!(self.count))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        let other = downcast_other::<Self>(other)?;
        if self.count != other.count && self.count != 0 && other.count != 0 {
            tracing::warn!(
                ours = self.count,
                theirs = other.count,
                "merging differing statement counts, keeping the larger"
            );
        }
        self.count = self.count.max(other.count);
        Ok(())
    }
}

impl MetadataKind for NumStatementsMd {
    const KEY: &'static str = "numStatements";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        value
            .as_i64()
            .map(NumStatementsMd::new)
            .ok_or_else(|| decode_error::<Self>("expected an integer"))
    }
}

// -----------------------------------------------------------------------
// codeStatistics
// -----------------------------------------------------------------------

/// Simple per-function code statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStatisticsMd {
    #[serde(rename = "numVars")]
    pub num_vars: i64,
}

impl Metadata for CodeStatisticsMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!({ "numVars": self.num_vars }))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        let other = downcast_other::<Self>(other)?;
        if self.num_vars != other.num_vars {
            if self.num_vars != 0 && other.num_vars != 0 {
                tracing::warn!(
                    ours = self.num_vars,
                    theirs = other.num_vars,
                    "merging differing variable counts, summing"
                );
            }
            self.num_vars += other.num_vars;
        }
        Ok(())
    }
}

impl MetadataKind for CodeStatisticsMd {
    const KEY: &'static str = "codeStatistics";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Self::deserialize(value).map_err(decode_error::<Self>)
    }
}

// -----------------------------------------------------------------------
// inlineInfo
// -----------------------------------------------------------------------

/// Inlining hints collected from the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineMd {
    pub marked_inline: bool,
    pub likely_inline: bool,
    pub marked_always_inline: bool,
    #[serde(rename = "isTemplate")]
    pub is_template: bool,
}

impl Metadata for InlineMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        serde_json::to_value(self).map_err(|e| CoreError::MetadataEncode {
            key: Self::KEY.to_string(),
            reason: e.to_string(),
        })
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        let other = downcast_other::<Self>(other)?;
        if self.is_template != other.is_template {
            tracing::warn!("merging inline info of a template with a non-template");
        }
        self.marked_inline |= other.marked_inline;
        self.likely_inline |= other.likely_inline;
        self.marked_always_inline |= other.marked_always_inline;
        self.is_template |= other.is_template;
        Ok(())
    }
}

impl MetadataKind for InlineMd {
    const KEY: &'static str = "inlineInfo";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Self::deserialize(value).map_err(decode_error::<Self>)
    }
}

// -----------------------------------------------------------------------
// entryFunction
// -----------------------------------------------------------------------

/// Graph-level pointer to the program entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFunctionMd {
    pub entry: Option<NodeId>,
}

impl EntryFunctionMd {
    pub fn new(entry: NodeId) -> Self {
        EntryFunctionMd { entry: Some(entry) }
    }
}

impl Metadata for EntryFunctionMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        match self.entry {
            Some(id) => {
                let text = encode_ids::<Self>(&[id], ids)?;
                Ok(text.into_iter().next().unwrap_or(Value::Null))
            }
            None => Ok(Value::String(String::new())),
        }
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        action: Option<&MergeAction>,
        mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        if action.is_some() {
            tracing::warn!("entryFunction attached to a node is not merged");
            return Ok(());
        }
        let other = downcast_other::<Self>(other)?;
        match (self.entry, other.entry) {
            (None, Some(theirs)) => self.entry = Some(mapping.map(theirs)?),
            (Some(ours), Some(_)) => {
                tracing::warn!(entry = %ours, "both graphs define an entry function, keeping ours");
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_mapping(&mut self, mapping: &GraphMapping) -> Result<(), CoreError> {
        if let Some(id) = self.entry {
            self.entry = Some(mapping.map(id)?);
        }
        Ok(())
    }
}

impl MetadataKind for EntryFunctionMd {
    const KEY: &'static str = "entryFunction";

    fn from_json(value: &Value, ids: &dyn StrToNode) -> Result<Self, CoreError> {
        // Accept both a bare string and a single-element array of one.
        let text = match value {
            Value::String(s) => s.as_str(),
            Value::Array(items) if items.len() == 1 => items[0]
                .as_str()
                .ok_or_else(|| decode_error::<Self>("expected a node id string"))?,
            _ => return Err(decode_error::<Self>("expected a node id string")),
        };
        if text.is_empty() {
            return Ok(EntryFunctionMd::default());
        }
        ids.str_to_node(text)
            .map(EntryFunctionMd::new)
            .ok_or_else(|| decode_error::<Self>(format!("unknown entry function '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Names(HashMap<NodeId, String>);

    impl NodeToStr for Names {
        fn node_to_str(&self, id: NodeId) -> Option<String> {
            self.0.get(&id).cloned()
        }
    }

    impl StrToNode for Names {
        fn str_to_node(&self, text: &str) -> Option<NodeId> {
            self.0.iter().find(|(_, v)| v.as_str() == text).map(|(k, _)| *k)
        }
    }

    fn names() -> Names {
        Names(
            [(NodeId(0), "base".to_string()), (NodeId(1), "derived".to_string())]
                .into_iter()
                .collect(),
        )
    }

    #[test]
    fn override_json_uses_textual_ids() {
        let md = OverrideMd {
            overrides: vec![NodeId(0)],
            overridden_by: vec![],
        };
        let json = md.to_json(&names()).unwrap();
        assert_eq!(json, json!({"overrides": ["base"], "overriddenBy": []}));
        assert_eq!(OverrideMd::from_json(&json, &names()).unwrap(), md);
    }

    #[test]
    fn override_decode_rejects_unknown_node() {
        let err = OverrideMd::from_json(
            &json!({"overrides": ["missing"], "overriddenBy": []}),
            &names(),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::MetadataDecode { key, .. } if key == "overrideMD"));
    }

    #[test]
    fn override_merge_maps_and_dedups() {
        let mut mapping = GraphMapping::new();
        mapping.insert(NodeId(10), NodeId(0));
        mapping.insert(NodeId(11), NodeId(3));

        let mut ours = OverrideMd {
            overrides: vec![NodeId(0)],
            overridden_by: vec![],
        };
        let theirs = OverrideMd {
            overrides: vec![NodeId(10), NodeId(11)],
            overridden_by: vec![NodeId(11)],
        };
        ours.merge(&theirs, None, &mapping).unwrap();
        assert_eq!(ours.overrides, vec![NodeId(0), NodeId(3)]);
        assert_eq!(ours.overridden_by, vec![NodeId(3)]);
    }

    #[test]
    fn override_apply_mapping_requires_complete_mapping() {
        let mut md = OverrideMd {
            overrides: vec![NodeId(4)],
            overridden_by: vec![],
        };
        assert!(matches!(
            md.apply_mapping(&GraphMapping::new()),
            Err(CoreError::UnmappedNode { id }) if id == NodeId(4)
        ));
    }

    #[test]
    fn file_properties_ignore_nested_origin() {
        let md = FilePropertiesMd::from_json(
            &json!({"origin": "main.cpp", "systemInclude": true}),
            &names(),
        )
        .unwrap();
        assert!(md.system_include);
        assert_eq!(md.to_json(&names()).unwrap(), json!({"systemInclude": true}));
    }

    #[test]
    fn num_statements_merge_keeps_max() {
        let mut ours = NumStatementsMd::new(4);
        ours.merge(&NumStatementsMd::new(9), None, &GraphMapping::new())
            .unwrap();
        assert_eq!(ours.count(), 9);
        assert!(NumStatementsMd::from_json(&json!("x"), &names()).is_err());
    }

    #[test]
    fn code_statistics_merge_sums_differing_counts() {
        let mut ours = CodeStatisticsMd { num_vars: 2 };
        ours.merge(&CodeStatisticsMd { num_vars: 3 }, None, &GraphMapping::new())
            .unwrap();
        assert_eq!(ours.num_vars, 5);
        ours.merge(&CodeStatisticsMd { num_vars: 5 }, None, &GraphMapping::new())
            .unwrap();
        assert_eq!(ours.num_vars, 5);
    }

    #[test]
    fn inline_info_roundtrip_and_merge() {
        let json = json!({
            "markedInline": true,
            "likelyInline": false,
            "markedAlwaysInline": false,
            "isTemplate": false
        });
        let mut md = InlineMd::from_json(&json, &names()).unwrap();
        assert_eq!(md.to_json(&names()).unwrap(), json);

        let other = InlineMd {
            likely_inline: true,
            ..InlineMd::default()
        };
        md.merge(&other, None, &GraphMapping::new()).unwrap();
        assert!(md.marked_inline && md.likely_inline);
    }

    #[test]
    fn entry_function_accepts_string_or_single_array() {
        let a = EntryFunctionMd::from_json(&json!("derived"), &names()).unwrap();
        let b = EntryFunctionMd::from_json(&json!(["derived"]), &names()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.entry, Some(NodeId(1)));
        assert_eq!(a.to_json(&names()).unwrap(), json!("derived"));
    }

    #[test]
    fn entry_function_merge_adopts_missing_entry() {
        let mut mapping = GraphMapping::new();
        mapping.insert(NodeId(7), NodeId(2));
        let mut ours = EntryFunctionMd::default();
        ours.merge(&EntryFunctionMd::new(NodeId(7)), None, &mapping)
            .unwrap();
        assert_eq!(ours.entry, Some(NodeId(2)));

        ours.merge(&EntryFunctionMd::new(NodeId(7)), None, &mapping)
            .unwrap();
        assert_eq!(ours.entry, Some(NodeId(2)));
    }

    #[test]
    fn merging_mismatched_types_is_an_error() {
        let mut ours = NumStatementsMd::new(1);
        let err = ours
            .merge(&FilePropertiesMd::new(true), None, &GraphMapping::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::MetadataTypeMismatch { .. }));
    }
}
