//! Metadata produced by the loop, operation and allocation analyses.
//!
//! | key                      | JSON shape                                                  |
//! |--------------------------|-------------------------------------------------------------|
//! | `loopDepth`              | integer                                                     |
//! | `globalLoopDepth`        | integer                                                     |
//! | `loopCallDepth`          | `{"<callee name>": integer}`                                |
//! | `numOperations`          | `{"numberOfIntOps", "numberOfFloatOps", "numberOfControlFlowOps", "numberOfMemoryAccesses"}` |
//! | `numConditionalBranches` | integer                                                     |
//! | `mallocCollector`        | `[{"global": name, "allocStmt": text}]`                     |
//! | `uniqueTypeMetaData`     | integer                                                     |
//!
//! Counters measured per definition (`numOperations`,
//! `numConditionalBranches`, `uniqueTypeMetaData`) are summed when two
//! differing values meet in a merge. Depths keep the maximum.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::merge::{GraphMapping, MergeAction};
use crate::metadata::{decode_error, downcast_other, Metadata, MetadataKind, NodeToStr, StrToNode};

fn decode_int<T: MetadataKind>(value: &Value) -> Result<i64, CoreError> {
    value
        .as_i64()
        .ok_or_else(|| decode_error::<T>("expected an integer"))
}

/// Adds `theirs` to `ours` when they differ. Returns true if both were set.
fn sum_differing(ours: &mut i64, theirs: i64) -> bool {
    if *ours == theirs {
        return false;
    }
    let conflict = *ours != 0 && theirs != 0;
    *ours += theirs;
    conflict
}

// -----------------------------------------------------------------------
// Loop depths
// -----------------------------------------------------------------------

/// Deepest loop nesting inside the function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopDepthMd {
    pub depth: i64,
}

impl Metadata for LoopDepthMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!(self.depth))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        self.depth = self.depth.max(downcast_other::<Self>(other)?.depth);
        Ok(())
    }
}

impl MetadataKind for LoopDepthMd {
    const KEY: &'static str = "loopDepth";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Ok(LoopDepthMd {
            depth: decode_int::<Self>(value)?,
        })
    }
}

/// Loop depth including the loops of all callers.
///
/// Only a whole-graph pass yields the right value after a merge; merging
/// keeps the larger value as an approximation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalLoopDepthMd {
    pub depth: i64,
}

impl Metadata for GlobalLoopDepthMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!(self.depth))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        let other = downcast_other::<Self>(other)?;
        tracing::warn!("globalLoopDepth needs a separate pass over the merged graph, keeping the larger value");
        self.depth = self.depth.max(other.depth);
        Ok(())
    }
}

impl MetadataKind for GlobalLoopDepthMd {
    const KEY: &'static str = "globalLoopDepth";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Ok(GlobalLoopDepthMd {
            depth: decode_int::<Self>(value)?,
        })
    }
}

/// Loop depth at which each callee is called, keyed by callee name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoopCallDepthMd {
    pub calls: BTreeMap<String, i64>,
}

impl Metadata for LoopCallDepthMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!(self.calls))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        for (callee, &depth) in &downcast_other::<Self>(other)?.calls {
            let ours = self.calls.entry(callee.clone()).or_insert(depth);
            *ours = (*ours).max(depth);
        }
        Ok(())
    }
}

impl MetadataKind for LoopCallDepthMd {
    const KEY: &'static str = "loopCallDepth";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Self::deserialize(value).map_err(decode_error::<Self>)
    }
}

// -----------------------------------------------------------------------
// Operation counts
// -----------------------------------------------------------------------

/// Instruction mix of a function body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumOperationsMd {
    #[serde(rename = "numberOfIntOps")]
    pub int_ops: i64,
    #[serde(rename = "numberOfFloatOps")]
    pub float_ops: i64,
    #[serde(rename = "numberOfControlFlowOps")]
    pub control_flow_ops: i64,
    #[serde(rename = "numberOfMemoryAccesses")]
    pub memory_accesses: i64,
}

impl Metadata for NumOperationsMd {
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
        if *self == *other {
            return Ok(());
        }
        // All four counters are summed together once any of them differs.
        let conflict = [
            (self.int_ops, other.int_ops),
            (self.float_ops, other.float_ops),
            (self.control_flow_ops, other.control_flow_ops),
            (self.memory_accesses, other.memory_accesses),
        ]
        .iter()
        .any(|&(ours, theirs)| ours != theirs && ours != 0 && theirs != 0);
        self.int_ops += other.int_ops;
        self.float_ops += other.float_ops;
        self.control_flow_ops += other.control_flow_ops;
        self.memory_accesses += other.memory_accesses;
        if conflict {
            tracing::warn!("merging differing operation counts, summing");
        }
        Ok(())
    }
}

impl MetadataKind for NumOperationsMd {
    const KEY: &'static str = "numOperations";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Self::deserialize(value).map_err(decode_error::<Self>)
    }
}

/// Number of conditional branches in a function body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NumConditionalBranchesMd {
    pub count: i64,
}

impl Metadata for NumConditionalBranchesMd {
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
        let theirs = downcast_other::<Self>(other)?.count;
        if sum_differing(&mut self.count, theirs) {
            tracing::warn!(theirs, "merging differing conditional branch counts, summing");
        }
        Ok(())
    }
}

impl MetadataKind for NumConditionalBranchesMd {
    const KEY: &'static str = "numConditionalBranches";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Ok(NumConditionalBranchesMd {
            count: decode_int::<Self>(value)?,
        })
    }
}

/// Number of distinct types used by a function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueTypeMd {
    pub num_types: i64,
}

impl Metadata for UniqueTypeMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        Ok(json!(self.num_types))
    }

    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        let theirs = downcast_other::<Self>(other)?.num_types;
        if sum_differing(&mut self.num_types, theirs) {
            tracing::warn!(theirs, "merging differing type counts, summing");
        }
        Ok(())
    }
}

impl MetadataKind for UniqueTypeMd {
    const KEY: &'static str = "uniqueTypeMetaData";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        Ok(UniqueTypeMd {
            num_types: decode_int::<Self>(value)?,
        })
    }
}

// -----------------------------------------------------------------------
// mallocCollector
// -----------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct AllocEntry {
    global: String,
    #[serde(rename = "allocStmt")]
    alloc_stmt: String,
}

/// Globals assigned from heap allocations, with the allocating statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MallocVariableMd {
    pub allocs: BTreeMap<String, String>,
}

impl Metadata for MallocVariableMd {
    fn key(&self) -> &str {
        Self::KEY
    }

    fn to_json(&self, _ids: &dyn NodeToStr) -> Result<Value, CoreError> {
        let entries: Vec<AllocEntry> = self
            .allocs
            .iter()
            .map(|(global, stmt)| AllocEntry {
                global: global.clone(),
                alloc_stmt: stmt.clone(),
            })
            .collect();
        serde_json::to_value(entries).map_err(|e| CoreError::MetadataEncode {
            key: Self::KEY.to_string(),
            reason: e.to_string(),
        })
    }

    /// Globals the destination already records keep their statement.
    fn merge(
        &mut self,
        other: &dyn Metadata,
        _action: Option<&MergeAction>,
        _mapping: &GraphMapping,
    ) -> Result<(), CoreError> {
        for (global, stmt) in &downcast_other::<Self>(other)?.allocs {
            self.allocs
                .entry(global.clone())
                .or_insert_with(|| stmt.clone());
        }
        Ok(())
    }
}

impl MetadataKind for MallocVariableMd {
    const KEY: &'static str = "mallocCollector";

    fn from_json(value: &Value, _ids: &dyn StrToNode) -> Result<Self, CoreError> {
        let entries = Vec::<AllocEntry>::deserialize(value).map_err(decode_error::<Self>)?;
        Ok(MallocVariableMd {
            allocs: entries
                .into_iter()
                .map(|entry| (entry.global, entry.alloc_stmt))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::NodeId;

    struct NoIds;

    impl NodeToStr for NoIds {
        fn node_to_str(&self, _id: NodeId) -> Option<String> {
            None
        }
    }

    impl StrToNode for NoIds {
        fn str_to_node(&self, _id: &str) -> Option<NodeId> {
            None
        }
    }

    fn merge_into<T: MetadataKind>(ours: &mut T, theirs: &T) {
        ours.merge(theirs, None, &GraphMapping::new()).unwrap();
    }

    #[test]
    fn loop_depths_keep_the_maximum() {
        let mut depth = LoopDepthMd { depth: 2 };
        merge_into(&mut depth, &LoopDepthMd { depth: 5 });
        assert_eq!(depth.depth, 5);

        let mut global = GlobalLoopDepthMd { depth: 4 };
        merge_into(&mut global, &GlobalLoopDepthMd { depth: 1 });
        assert_eq!(global.depth, 4);
        assert_eq!(GlobalLoopDepthMd::from_json(&json!(3), &NoIds).unwrap().depth, 3);
        assert!(LoopDepthMd::from_json(&json!("deep"), &NoIds).is_err());
    }

    #[test]
    fn loop_call_depth_takes_per_callee_maximum() {
        let mut ours = LoopCallDepthMd::from_json(&json!({"a": 1, "b": 3}), &NoIds).unwrap();
        let theirs = LoopCallDepthMd::from_json(&json!({"b": 2, "c": 4}), &NoIds).unwrap();
        merge_into(&mut ours, &theirs);
        assert_eq!(ours.to_json(&NoIds).unwrap(), json!({"a": 1, "b": 3, "c": 4}));
    }

    #[test]
    fn operation_counts_sum_when_any_differs() {
        let json = json!({
            "numberOfIntOps": 1,
            "numberOfFloatOps": 2,
            "numberOfControlFlowOps": 3,
            "numberOfMemoryAccesses": 4
        });
        let mut ours = NumOperationsMd::from_json(&json, &NoIds).unwrap();
        assert_eq!(ours.to_json(&NoIds).unwrap(), json);

        let same = ours.clone();
        merge_into(&mut ours, &same);
        assert_eq!(ours.int_ops, 1);

        let theirs = NumOperationsMd {
            int_ops: 10,
            ..NumOperationsMd::default()
        };
        merge_into(&mut ours, &theirs);
        assert_eq!((ours.int_ops, ours.float_ops, ours.memory_accesses), (11, 2, 4));
        assert!(NumOperationsMd::from_json(&json!({"numberOfIntOps": 1}), &NoIds).is_err());
    }

    #[test]
    fn counters_sum_differing_values_only() {
        let mut branches = NumConditionalBranchesMd { count: 3 };
        merge_into(&mut branches, &NumConditionalBranchesMd { count: 3 });
        assert_eq!(branches.count, 3);
        merge_into(&mut branches, &NumConditionalBranchesMd { count: 2 });
        assert_eq!(branches.count, 5);

        let mut types = UniqueTypeMd { num_types: 0 };
        merge_into(&mut types, &UniqueTypeMd { num_types: 7 });
        assert_eq!(types.num_types, 7);
        assert_eq!(types.to_json(&NoIds).unwrap(), json!(7));
    }

    #[test]
    fn malloc_collector_round_trip_and_merge() {
        let json = json!([
            {"global": "buf", "allocStmt": "buf = malloc(n)"},
            {"global": "tab", "allocStmt": "tab = calloc(4, 8)"}
        ]);
        let mut ours = MallocVariableMd::from_json(&json, &NoIds).unwrap();
        assert_eq!(ours.to_json(&NoIds).unwrap(), json);

        let theirs = MallocVariableMd::from_json(
            &json!([
                {"global": "buf", "allocStmt": "buf = realloc(buf, m)"},
                {"global": "pool", "allocStmt": "pool = malloc(64)"}
            ]),
            &NoIds,
        )
        .unwrap();
        merge_into(&mut ours, &theirs);
        assert_eq!(ours.allocs.len(), 3);
        assert_eq!(ours.allocs["buf"], "buf = malloc(n)");
        assert!(MallocVariableMd::from_json(&json!([{"global": "x"}]), &NoIds).is_err());
    }
}
