//! One part's execution variant: an op graph plus the slot bindings that let the
//! section builder and glue engine wire it up to its neighbours.

use std::collections::HashMap;
use std::sync::Arc;

use crate::op::{BlockConfig, PleKernelId};
use crate::op_graph::{BufferId, OpGraph};
use crate::part::{PartId, Slot};

/// Where in a cascade a requested plan will sit. The plan generator uses this to decide
/// which stripe strategies are legal: a `Middle` plan, for instance, must not emit a
/// partial first stripe with no way to resume it.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub enum CascadePhase {
    /// Not part of any section; plans for this phase are considered in isolation.
    Lonely,
    /// First part of a section.
    Beginning,
    /// An interior part of a section, with prior output buffers already chosen.
    Middle,
    /// The last part of a section.
    End,
}

/// One chosen implementation of a part.
#[derive(Debug, Clone)]
pub struct Plan {
    pub graph: Arc<OpGraph>,
    /// Bijection between a subset of `graph`'s buffers and the part's input slots.
    pub input_mapping: HashMap<Slot, BufferId>,
    /// Bijection between a subset of `graph`'s buffers and the part's output slots.
    pub output_mapping: HashMap<Slot, BufferId>,
    pub block_config: Option<BlockConfig>,
    /// True for plans generated by a concat-style part whose SRAM buffers already carry
    /// offsets from a previous pass; the section builder must not reallocate them.
    pub is_preallocated: bool,
}

impl Plan {
    pub fn input_buffer(&self, slot: Slot) -> Option<BufferId> {
        self.input_mapping.get(&slot).copied()
    }

    pub fn output_buffer(&self, slot: Slot) -> Option<BufferId> {
        self.output_mapping.get(&slot).copied()
    }

    /// Output slots in ascending slot-index order, for deterministic iteration during
    /// merge (§4.5 requires slot order, never a map's hash order).
    pub fn output_slots_ordered(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.output_mapping.keys().copied().collect();
        slots.sort_by_key(|s| s.index);
        slots
    }

    pub fn input_slots_ordered(&self) -> Vec<Slot> {
        let mut slots: Vec<Slot> = self.input_mapping.keys().copied().collect();
        slots.sort_by_key(|s| s.index);
        slots
    }

    /// Information about this plan's PLE kernel, if it has one. Returns `None` for
    /// plans with no PLE op (pure MCE or DMA/concat plans).
    pub fn ple_kernel_info(&self) -> Option<PleKernelInfo> {
        self.graph.ple_ops().next().map(|op_id| {
            let op = self.graph.op(op_id).as_ple().expect("filtered to PLE ops");
            PleKernelInfo {
                kernel_id: op.kernel_id,
                size_bytes: op.kernel_size_bytes,
                op: op_id,
            }
        })
    }

    /// Whether every one of this plan's output buffers is a full-tensor checkpoint.
    /// Used by [`crate::section::deallocate_unused_buffers`] to decide whether a live
    /// SRAM buffer can be released as soon as this plan finishes, or must be kept alive
    /// until the cascade it belongs to ends.
    pub fn produces_full_tensor_outputs(&self) -> bool {
        self.output_mapping.values().all(|&id| match self.graph.buffer(id) {
            crate::buffer::Buffer::Sram(b) => b.is_full_tensor(),
            _ => true,
        })
    }
}

#[derive(Debug, Copy, Clone)]
pub struct PleKernelInfo {
    pub kernel_id: PleKernelId,
    pub size_bytes: u64,
    pub op: crate::op_graph::OpId,
}

/// Inputs the plan generator needs beyond the part itself: which cascade phase is being
/// planned, which block config the rest of the section has committed to, which buffers
/// were already chosen for this part's inputs (non-empty for `Middle`/`End`), and how
/// many weight stripes to use.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub part: PartId,
    pub phase: CascadePhase,
    pub block_config: Option<BlockConfig>,
    pub chosen_inputs: Vec<(Slot, BufferId, Arc<OpGraph>)>,
    pub num_weight_stripes: u32,
}

/// External plan generator (§6.2): produces the candidate plans for one part.
/// `cascade_phase == Middle` must yield at most one plan (§7, `BudgetExceeded`).
pub trait PlanGenerator: Send + Sync {
    fn get_plans(&self, request: &PlanRequest) -> Vec<Plan>;
    /// Whether this part supports double-buffering its weights (2 stripes instead of
    /// 1). The section builder only asks for the 2-stripe variant when this is `true`.
    fn can_double_buffer_weights(&self, part: PartId) -> bool;
}

/// External weight preprocessor (§6.3): a fire-and-forget side effect that must
/// complete before any plan using `part`'s weights is estimated. The driver queues this
/// from the creator thread before queueing any plan work for the same part on the pool
/// (see [`crate::thread_pool::ThreadPool`]'s no-recursive-enqueue invariant).
pub trait WeightPreprocessor: Send + Sync {
    fn preprocess_weights_async(&self, part: PartId);
}
