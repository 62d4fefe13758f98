//! Growing a section one part at a time (§4.3): a [`SectionContext`] tracks everything
//! that must stay consistent across every plan in a cascade — the scratchpad
//! allocations made so far, which SRAM buffers are still needed by a part later in the
//! section, the block config the whole section has committed to, and which PLE kernel
//! (if any) is already resident.
//!
//! `SectionContext` is deliberately cheap to clone: the [`SectionBuilder`] explores many
//! candidate continuations from the same prefix, and cloning the allocator's `Vec`-based
//! chunk lists is far simpler to reason about than threading shared mutable state
//! through a fallible search.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::allocator::{AllocationPreference, ScratchpadAllocator};
use crate::op_graph::BufferId;
use crate::part::{PartGraphView, PartId, Slot};
use crate::plan::{CascadePhase, Plan};

/// One SRAM buffer's bookkeeping while it is alive inside a section: which plan's graph
/// it belongs to, its id in that graph, its scratchpad offset, and which parts still
/// downstream of the current frontier have not yet consumed it (§4.3
/// `DeallocateUnusedBuffers`'s owner set).
#[derive(Debug, Clone)]
struct LiveBuffer {
    #[allow(dead_code)]
    graph: Arc<crate::op_graph::OpGraph>,
    offset: u64,
    owners: HashSet<PartId>,
}

/// Which side of the scratchpad a part's buffers should be allocated from. The builder
/// alternates this by part-id parity (the only fragmentation heuristic the design
/// specifies) so that a long cascade's buffers interleave from both ends rather than
/// all piling up at the start.
pub fn preference_for_part(part: PartId) -> AllocationPreference {
    if part.0 % 2 == 0 {
        AllocationPreference::Start
    } else {
        AllocationPreference::End
    }
}

/// The state threaded through a section as it grows: one plan per part so far, plus the
/// scratchpad allocator, PLE kernel residency, weight-stripe width, and pending
/// producer-to-consumer connections that section has committed to.
#[derive(Debug, Clone)]
pub struct SectionContext {
    allocator: ScratchpadAllocator,
    live: HashMap<(PartId, BufferId), LiveBuffer>,
    plans: Vec<(PartId, Arc<Plan>)>,
    resident_ple_kernel: Option<crate::op::PleKernelId>,
    block_config: Option<crate::op::BlockConfig>,
    weight_stripes: Option<u32>,
    /// Destination slots of connections produced by a part already in this section, not
    /// yet consumed by a later part in the same section (§4.3 `unresolved_outputs`).
    unresolved_outputs: HashSet<Slot>,
}

impl SectionContext {
    pub fn new(sram_capacity: u64) -> Self {
        Self {
            allocator: ScratchpadAllocator::new(sram_capacity),
            live: HashMap::new(),
            plans: Vec::new(),
            resident_ple_kernel: None,
            block_config: None,
            weight_stripes: None,
            unresolved_outputs: HashSet::new(),
        }
    }

    pub fn plans(&self) -> &[(PartId, Arc<Plan>)] {
        &self.plans
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn resident_ple_kernel(&self) -> Option<crate::op::PleKernelId> {
        self.resident_ple_kernel
    }

    pub fn block_config(&self) -> Option<crate::op::BlockConfig> {
        self.block_config
    }

    pub fn weight_stripes(&self) -> Option<u32> {
        self.weight_stripes
    }

    pub fn sram_used_bytes(&self) -> u64 {
        self.allocator.used_bytes()
    }

    pub fn has_unresolved_outputs(&self) -> bool {
        !self.unresolved_outputs.is_empty()
    }

    /// Allocate every as-yet-unallocated SRAM buffer `plan` introduces (I4), skipping
    /// pre-allocated plans ([`Plan::is_preallocated`]) whose offsets are already fixed.
    /// Returns `None` if the scratchpad cannot fit them, leaving `self` unmodified.
    pub fn allocate_sram(&mut self, part: PartId, plan: &Arc<Plan>) -> Option<()> {
        if plan.is_preallocated {
            for id in plan.graph.sram_buffers() {
                let sram = plan.graph.buffer(id).as_sram()?;
                let offset = sram.offset?;
                self.live.insert(
                    (part, id),
                    LiveBuffer {
                        graph: Arc::clone(&plan.graph),
                        offset,
                        owners: [part].into_iter().collect(),
                    },
                );
            }
            return Some(());
        }

        let preference = preference_for_part(part);
        let mut allocated = Vec::new();
        for id in plan.graph.sram_buffers() {
            let sram = plan.graph.buffer(id).as_sram()?;
            let tag = format!("{part}:{id:?}");
            match self.allocator.allocate(sram.size_bytes, preference, 16, tag) {
                Some(offset) => allocated.push((id, offset)),
                None => {
                    for (_, offset) in &allocated {
                        self.allocator.free(*offset);
                    }
                    return None;
                }
            }
        }
        for (id, offset) in allocated {
            self.live.insert(
                (part, id),
                LiveBuffer {
                    graph: Arc::clone(&plan.graph),
                    offset,
                    owners: [part].into_iter().collect(),
                },
            );
        }
        Some(())
    }

    /// Release every SRAM buffer `part`'s `plan` no longer needs (§4.3
    /// `DeallocateUnusedBuffers`): a buffer `part` owns is handed forward to every
    /// consumer of a full-tensor output (or is itself one of those outputs), then
    /// `part` drops its own ownership; a buffer with no remaining owner is freed.
    pub fn deallocate_unused_buffers(&mut self, part: PartId, plan: &Plan, parts: &dyn PartGraphView) {
        let produces_full_tensor = plan.produces_full_tensor_outputs();
        let own_outputs: HashSet<BufferId> = plan.output_mapping.values().copied().collect();

        let mut to_free = Vec::new();
        for (key, buffer) in self.live.iter_mut() {
            if key.0 != part {
                continue;
            }
            if produces_full_tensor || own_outputs.contains(&key.1) {
                for slot in plan.output_slots_ordered() {
                    if plan.output_buffer(slot) == Some(key.1) {
                        for consumer in parts.connected_input_slots(slot) {
                            buffer.owners.insert(consumer.part);
                        }
                    }
                }
            }
            buffer.owners.remove(&part);
            if buffer.owners.is_empty() {
                to_free.push(*key);
            }
        }
        for key in to_free {
            if let Some(buffer) = self.live.remove(&key) {
                self.allocator.free(buffer.offset);
            }
        }
    }

    /// Record `part`'s outgoing connections as pending for a later part in the same
    /// section to resolve (§4.3: seeded by `StartSection`/`ContinueSection` once a plan
    /// has joined).
    pub fn seed_outputs(&mut self, plan: &Plan, parts: &dyn PartGraphView) {
        for slot in plan.output_slots_ordered() {
            for consumer in parts.connected_input_slots(slot) {
                self.unresolved_outputs.insert(consumer);
            }
        }
    }

    /// Match `part`'s input slots against pending outputs from earlier in this section.
    /// Returns `false` (leaving `self` unmodified) if none of `part`'s inputs connect to
    /// anything produced so far — a disconnected continuation (§4.3 step 1).
    pub fn resolve_inputs(&mut self, part: PartId, parts: &dyn PartGraphView) -> bool {
        let matched: Vec<Slot> = parts
            .input_slots(part)
            .into_iter()
            .filter(|slot| self.unresolved_outputs.contains(slot))
            .collect();
        if matched.is_empty() {
            return false;
        }
        for slot in matched {
            self.unresolved_outputs.remove(&slot);
        }
        true
    }

    /// Record that `part`'s `plan`, requesting `weight_stripes` weight stripes, has
    /// joined the section, and that the section has now committed to `plan`'s block
    /// config, weight-stripe width, and (if it has one) its PLE kernel.
    pub fn push_plan(&mut self, part: PartId, plan: Arc<Plan>, weight_stripes: u32) {
        if self.block_config.is_none() {
            self.block_config = plan.block_config;
        }
        if self.weight_stripes.is_none() {
            self.weight_stripes = Some(weight_stripes);
        }
        if let Some(info) = plan.ple_kernel_info() {
            self.resident_ple_kernel = Some(info.kernel_id);
        }
        self.plans.push((part, plan));
    }

    /// Whether `plan`'s block config is compatible with what the section has already
    /// committed to (I3, I5): the first plan in a section is free to choose any config,
    /// every later plan must match it exactly.
    pub fn accepts_block_config(&self, plan: &Plan) -> bool {
        match (self.block_config, plan.block_config) {
            (None, _) => true,
            (Some(committed), Some(candidate)) => committed == candidate,
            (Some(_), None) => true,
        }
    }

    /// Whether `plan`'s PLE kernel (if any) can be added without violating the
    /// at-most-one-resident-kernel-per-section rule (I3). A plan reusing the already
    /// resident kernel (`load_kernel == false`) is always accepted.
    pub fn accepts_ple_kernel(&self, plan: &Plan) -> bool {
        match plan.ple_kernel_info() {
            None => true,
            Some(info) => match self.resident_ple_kernel {
                None => true,
                Some(resident) => resident == info.kernel_id,
            },
        }
    }

    /// Whether a candidate's chosen weight-stripe width is compatible with what the
    /// section has already committed to: once a section has decided how many weight
    /// stripes it double-buffers, every later plan must request the same count.
    pub fn accepts_weight_stripes(&self, weight_stripes: u32) -> bool {
        match self.weight_stripes {
            None => true,
            Some(committed) => committed == weight_stripes,
        }
    }
}

/// Builds up sections of a part-graph cascade one part at a time, bottoming out in the
/// set of every complete section starting at a given part (§4.3,
/// `CalculateSectionsOfAllLengths`).
#[derive(Derivative)]
#[derivative(Debug)]
pub struct SectionBuilder<'a> {
    pub sram_capacity: u64,
    pub max_section_length: usize,
    #[derivative(Debug = "ignore")]
    pub parts: Arc<dyn PartGraphView>,
    /// Candidate plans (paired with the weight-stripe width used to request them) for
    /// `part` at `phase`, given the section built so far.
    #[derivative(Debug = "ignore")]
    pub plans_for: &'a dyn Fn(PartId, CascadePhase, &SectionContext) -> Vec<(Arc<Plan>, u32)>,
}

impl<'a> SectionBuilder<'a> {
    /// Enumerate every section of every valid length starting at `start`, as the
    /// resulting [`SectionContext`] once each section's last part has joined. A section
    /// of length 1 is always included provided at least one plan fits.
    pub fn calculate_sections_of_all_lengths(
        &self,
        start: PartId,
        max_parts: usize,
    ) -> Vec<SectionContext> {
        let mut results = Vec::new();
        self.grow(start, max_parts, true, SectionContext::new(self.sram_capacity), &mut results);
        results
    }

    /// Try to join `part` to `predecessor` at `phase`: for every plan candidate (each
    /// requesting a weight-stripe width the section still accepts), allocate its SRAM
    /// and free whatever the predecessor no longer needs. Does *not* resolve `part`'s
    /// inputs against `predecessor.unresolved_outputs`, nor seed `part`'s own outputs —
    /// the caller decides whether that belongs before (continuation) or counts against
    /// emptiness (ending).
    fn try_join(&self, part: PartId, phase: CascadePhase, predecessor: &SectionContext) -> Vec<SectionContext> {
        let mut joined = Vec::new();
        for (plan, weight_stripes) in (self.plans_for)(part, phase, predecessor) {
            if !predecessor.accepts_block_config(&plan)
                || !predecessor.accepts_ple_kernel(&plan)
                || !predecessor.accepts_weight_stripes(weight_stripes)
            {
                continue;
            }
            let mut next = predecessor.clone();
            if next.allocate_sram(part, &plan).is_none() {
                continue;
            }
            next.push_plan(part, Arc::clone(&plan), weight_stripes);
            next.deallocate_unused_buffers(part, &plan, &*self.parts);
            joined.push(next);
        }
        joined
    }

    /// Recursively explore every section starting at `start` through `part`: try
    /// ending the section here (§4.3 `EndSection`, or `Lonely` for a length-1 section),
    /// and, budget permitting, try continuing it into `part + 1` (§4.3
    /// `ContinueSection`/`StartSection`).
    fn grow(&self, part: PartId, remaining_budget: usize, is_start: bool, context: SectionContext, results: &mut Vec<SectionContext>) {
        if remaining_budget == 0 || context.plans().len() >= self.max_section_length {
            return;
        }

        let mut resolved = context.clone();
        if !is_start && !resolved.resolve_inputs(part, &*self.parts) {
            return; // disconnected continuation: this Part shares no output with the section so far
        }

        let end_phase = if is_start { CascadePhase::Lonely } else { CascadePhase::End };
        for ended in self.try_join(part, end_phase, &resolved) {
            if !ended.has_unresolved_outputs() {
                results.push(ended);
            }
        }

        if remaining_budget > 1 {
            let continue_phase = if is_start { CascadePhase::Beginning } else { CascadePhase::Middle };
            for mut continued in self.try_join(part, continue_phase, &resolved) {
                let (_, plan) = continued.plans().last().expect("try_join only returns non-empty sections").clone();
                continued.seed_outputs(&plan, &*self.parts);
                self.grow(PartId(part.0 + 1), remaining_budget - 1, false, continued, results);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, BufferFormat, DataType, QuantizationInfo, SramBuffer, TensorShape};
    use crate::op_graph::OpGraph;
    use crate::part::tests::FakePartGraph;

    fn single_buffer_plan(size_bytes: u64) -> Plan {
        let mut graph = OpGraph::new();
        let buffer = graph.add_buffer(Buffer::Sram(SramBuffer {
            tensor_shape: TensorShape([1, 1, 1, 1]),
            stripe_shape: TensorShape([1, 1, 1, 1]),
            num_stripes: 1,
            slot_size_bytes: size_bytes,
            size_bytes,
            format: BufferFormat::NHWC,
            data_type: DataType::U8,
            quant_info: QuantizationInfo::default(),
            offset: None,
        }));
        Plan {
            graph: Arc::new(graph),
            input_mapping: HashMap::new(),
            output_mapping: [(crate::part::Slot::new(PartId(0), 0), buffer)].into_iter().collect(),
            block_config: None,
            is_preallocated: false,
        }
    }

    #[test]
    fn allocate_sram_fails_cleanly_when_out_of_space() {
        let mut ctx = SectionContext::new(128);
        let plan = Arc::new(single_buffer_plan(256));
        assert!(ctx.allocate_sram(PartId(0), &plan).is_none());
        assert_eq!(ctx.sram_used_bytes(), 0);
    }

    #[test]
    fn allocate_sram_succeeds_within_budget() {
        let mut ctx = SectionContext::new(1024);
        let plan = Arc::new(single_buffer_plan(256));
        assert!(ctx.allocate_sram(PartId(0), &plan).is_some());
        assert_eq!(ctx.sram_used_bytes(), 256);
    }

    #[test]
    fn deallocate_unused_buffers_frees_a_full_tensor_output_with_no_consumers() {
        let mut ctx = SectionContext::new(1024);
        let plan = single_buffer_plan(256);
        let plan = Arc::new(plan);
        ctx.allocate_sram(PartId(0), &plan).unwrap();
        let parts = FakePartGraph::linear_chain(&[(0, 1)]);
        ctx.deallocate_unused_buffers(PartId(0), &plan, &parts);
        assert_eq!(ctx.sram_used_bytes(), 0);
    }

    #[test]
    fn resolve_inputs_rejects_a_disconnected_part() {
        let mut ctx = SectionContext::new(1024);
        let parts = FakePartGraph::linear_chain(&[(0, 1), (1, 1)]);
        // Nothing has been produced yet, so part 1 has no pending output to resolve.
        assert!(!ctx.resolve_inputs(PartId(1), &parts));
    }

    #[test]
    fn resolve_inputs_accepts_a_connected_continuation() {
        let mut ctx = SectionContext::new(1024);
        let parts = FakePartGraph::linear_chain(&[(0, 1), (1, 1)]);
        let plan = single_buffer_plan(256);
        ctx.seed_outputs(&plan, &parts);
        assert!(ctx.resolve_inputs(PartId(1), &parts));
        assert!(!ctx.has_unresolved_outputs());
    }
}
