//! The combiner's top-level algorithm (§4.5): for every part, in reverse topological
//! order, find the best way to start a section there, combine it with the best
//! already-known way to finish everything after it, and keep a running best-so-far.
//! Because parts are numbered in topological order, "after it" is always a suffix
//! `[part + 1, n)`, which is what makes this a simple backward tail DP rather than a
//! general shortest-path search.
//!
//! Phases 1-2 (lonely-plan search, per-start-part section enumeration) are independent
//! per part and are fanned out across [`ThreadPool`]; phase 3 (the tail DP) is strictly
//! sequential and runs on the calling thread once every part's sections are in hand.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::buffer::{Buffer, DramBuffer, DramBufferType};
use crate::combination::Combination;
use crate::estimator::{EstimationOptions, Estimator};
use crate::glue::{self, Glue};
use crate::op_graph::{BufferId, OpGraph};
use crate::part::{PartGraphView, PartId, Slot};
use crate::plan::{CascadePhase, Plan, PlanGenerator, PlanRequest, WeightPreprocessor};
use crate::section::{SectionBuilder, SectionContext};
use crate::thread_pool::ThreadPool;

/// Tunables that don't belong to the hardware capabilities trait because they govern
/// the search itself rather than the target chip.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub num_worker_threads: usize,
    pub max_section_length: usize,
    pub estimation_options: EstimationOptions,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            num_worker_threads: 0,
            max_section_length: 8,
            estimation_options: EstimationOptions::default(),
        }
    }
}

/// Runs the combiner over one part graph, given the caller's plan generator, estimator
/// and hardware capabilities.
///
/// Collaborators are taken as `Arc<dyn Trait>` rather than borrowed references so that
/// per-part work can be fanned out across [`ThreadPool`]'s worker threads, which require
/// `'static` tasks.
#[derive(Clone)]
pub struct CombinerDriver {
    pub parts: Arc<dyn PartGraphView>,
    pub plan_generator: Arc<dyn PlanGenerator>,
    pub estimator: Arc<dyn Estimator>,
    pub weight_preprocessor: Option<Arc<dyn WeightPreprocessor>>,
    pub sram_capacity: u64,
    pub config: DriverConfig,
}

impl CombinerDriver {
    /// Run the full combiner, returning the single merged [`OpGraph`] for the whole
    /// part graph.
    ///
    /// # Errors
    /// Returns [`crate::error::Error::NoValidCombination`] if no assignment of plans
    /// covers every part (e.g. a part whose generator returned no plans at all).
    pub fn run(&self) -> crate::error::Result<OpGraph> {
        let part_ids = self.parts.part_ids();
        if let Some(preprocessor) = &self.weight_preprocessor {
            for &part in &part_ids {
                preprocessor.preprocess_weights_async(part);
            }
        }

        let pool = ThreadPool::new(self.config.num_worker_threads);

        // Phase 2: enumerate every section starting at each part, independently and in
        // parallel. Every task only touches Arc-owned collaborators, never `self`.
        let receivers: Vec<_> = part_ids
            .iter()
            .map(|&part| {
                let driver = self.clone();
                pool.submit(move |_worker_id| driver.enumerate_sections(part))
            })
            .collect();
        let mut sections_by_start: HashMap<PartId, Vec<SectionContext>> = HashMap::new();
        for (i, receiver) in receivers.into_iter().enumerate() {
            let sections = futures::executor::block_on(receiver)
                .map_err(|_| crate::error::Error::WorkerPanicked("section enumeration dropped".into()))?;
            sections_by_start.insert(part_ids[i], sections);
        }

        // Phase 3: sequential backward tail DP. best_suffix[i] is the best combination
        // covering parts[i..].
        let mut best_suffix: Vec<Combination> = vec![Combination::empty(); part_ids.len() + 1];
        for i in (0..part_ids.len()).rev() {
            let part = part_ids[i];
            let tail = best_suffix[i + 1].clone();
            let sections = sections_by_start.get(&part).map(Vec::as_slice).unwrap_or(&[]);

            let mut best: Option<Combination> = None;
            for context in sections {
                if let Some(candidate) = self.combination_for_section(context, &tail) {
                    if candidate.is_valid() && best.as_ref().map_or(true, |b| candidate.metric() < b.metric()) {
                        best = Some(candidate);
                    }
                }
            }

            best_suffix[i] = match best {
                Some(combination) => combination,
                None => {
                    warn!("no valid section starting at {part} combines with its tail");
                    Combination::invalid()
                }
            };
        }

        let overall = best_suffix.into_iter().next().unwrap_or_else(Combination::invalid);
        if !overall.is_valid() {
            return Err(crate::error::Error::NoValidCombination.into());
        }
        info!("combiner selected a plan for every part with total cost {:?}", overall.metric());
        self.merge(&overall, &part_ids)
    }

    fn enumerate_sections(&self, start: PartId) -> Vec<SectionContext> {
        let generator = Arc::clone(&self.plan_generator);
        // For each candidate weight-stripe width this part is allowed to request (both
        // 1 and 2 if the part supports double-buffering and the section hasn't already
        // committed to a width, else whatever the section already committed to), ask
        // the plan generator and tag every returned plan with the width that produced
        // it so the section builder can enforce I3's single-width-per-section rule.
        let plans_for = move |part: PartId, phase: CascadePhase, context: &SectionContext| -> Vec<(Arc<Plan>, u32)> {
            let widths: Vec<u32> = match context.weight_stripes() {
                Some(committed) => vec![committed],
                None if generator.can_double_buffer_weights(part) => vec![1, 2],
                None => vec![1],
            };
            let mut out = Vec::new();
            for width in widths {
                let request = PlanRequest {
                    part,
                    phase,
                    block_config: context.block_config(),
                    chosen_inputs: Vec::new(),
                    num_weight_stripes: width,
                };
                let mut plans = generator.get_plans(&request);
                if phase == CascadePhase::Middle && plans.len() > 1 {
                    warn!("plan generator returned {} plans for a Middle-phase part, truncating to 1", plans.len());
                    plans.truncate(1);
                }
                out.extend(plans.into_iter().map(|plan| (Arc::new(plan), width)));
            }
            out
        };
        let builder = SectionBuilder {
            sram_capacity: self.sram_capacity,
            max_section_length: self.config.max_section_length,
            parts: Arc::clone(&self.parts),
            plans_for: &plans_for,
        };
        builder.calculate_sections_of_all_lengths(start, self.config.max_section_length)
    }

    fn combination_for_section(&self, section: &SectionContext, tail: &Combination) -> Option<Combination> {
        let mut combination = Combination::empty();
        for (part, plan) in section.plans() {
            let cost = self.estimator.estimate_plan(*part, plan, &self.config.estimation_options);
            combination = combination.with_plan(*part, Arc::clone(plan), cost);
        }

        // Glue every output this section produces that crosses its own boundary: either
        // to the tail's chosen input plan(s), or out to an external output if nothing
        // downstream consumes it (L3).
        for (_, plan) in section.plans() {
            for slot in plan.output_slots_ordered() {
                let mut consumers = self.parts.connected_input_slots(slot);
                consumers.sort_by_key(|s| (s.part.0, s.index));
                let remote: Vec<Slot> = consumers
                    .into_iter()
                    .filter(|c| !section.plans().iter().any(|(p, _)| *p == c.part))
                    .collect();

                if remote.is_empty() {
                    let glue = self.build_dead_output_glue(plan, slot)?;
                    let cost = self.estimator.estimate_glue(&glue, &self.config.estimation_options);
                    combination = combination.with_glue(slot, Arc::new(glue)).with_cost(cost);
                    continue;
                }

                let is_only_consumer = remote.len() == 1;
                let mut candidate_glues = Vec::with_capacity(remote.len());
                for consumer_slot in &remote {
                    let consumer_plan = tail.plan(consumer_slot.part)?; // downstream part has no chosen plan yet: infeasible
                    candidate_glues.push(self.build_glue(plan, slot, consumer_plan, *consumer_slot, is_only_consumer)?);
                }

                // A fan-out producer may reuse one DRAM buffer across several consumers
                // (§4.4); find which of this slot's candidate glues share a mergeable
                // DRAM buffer and keep only the representative's glue.
                let candidates: Vec<(usize, DramBuffer)> = candidate_glues
                    .iter()
                    .enumerate()
                    .filter_map(|(i, g)| {
                        let id = g.ending.replacement_buffer?;
                        let dram = g.ending.graph.buffer(id).as_dram()?;
                        Some((i, dram.clone()))
                    })
                    .collect();
                let representative_index = if candidates.is_empty() {
                    0
                } else {
                    let sharing = glue::share_dram_buffers(&candidates);
                    let anchor = candidates[0].0;
                    *sharing.get(&anchor).unwrap_or(&anchor)
                };
                let glue = candidate_glues.into_iter().nth(representative_index)?;

                let cost = self.estimator.estimate_glue(&glue, &self.config.estimation_options);
                combination = combination.with_glue(slot, Arc::new(glue)).with_cost(cost);
            }
        }

        Some(combination.concat(tail.clone()))
    }

    /// Glue for an output slot with no downstream Part consumer at all (L3): an SRAM
    /// output still needs materialising into a real external output buffer; a DRAM
    /// output is already externally visible and needs nothing further.
    fn build_dead_output_glue(&self, plan: &Plan, slot: Slot) -> Option<Glue> {
        let buffer_id = plan.output_buffer(slot)?;
        let buffer = plan.graph.buffer(buffer_id);
        let ending = match buffer.as_sram() {
            Some(sram) => glue::external_output_ending_glue(sram, crate::buffer::ExternalBinding::default()).ok()?,
            None => glue::EndingGlue::default(),
        };
        Some(Glue {
            ending,
            starting: glue::StartingGlue::default(),
        })
    }

    /// Build the glue for one producer-output-slot -> consumer-input-slot connection,
    /// following the §4.4 case table over (producer location, consumer location).
    fn build_glue(&self, producer: &Plan, producer_slot: Slot, consumer: &Plan, consumer_slot: Slot, is_only_consumer: bool) -> Option<Glue> {
        let producer_buffer = producer.output_buffer(producer_slot)?;
        let consumer_buffer = consumer.input_buffer(consumer_slot)?;
        let producer_buf = producer.graph.buffer(producer_buffer);
        let consumer_buf = consumer.graph.buffer(consumer_buffer);

        match (producer_buf.is_sram(), consumer_buf.is_sram()) {
            (true, true) => {
                // SRAM->SRAM always hops through DRAM; direct copy is forbidden.
                let ending = glue::sram_to_dram_ending_glue(&producer.graph, producer_buffer).ok()?;
                let starting = glue::dram_to_sram_starting_glue(consumer_buf.clone()).ok()?;
                Some(Glue { ending, starting })
            }
            (true, false) => {
                let dram = consumer_buf.as_dram()?;
                let ending = match dram.buffer_type {
                    DramBufferType::Output => {
                        glue::external_output_ending_glue(producer_buf.as_sram()?, dram.binding).ok()?
                    }
                    _ => glue::sram_to_dram_ending_glue(&producer.graph, producer_buffer).ok()?,
                };
                Some(Glue {
                    ending,
                    starting: glue::StartingGlue::default(),
                })
            }
            (false, true) => {
                let starting = glue::dram_to_sram_starting_glue(consumer_buf.clone()).ok()?;
                Some(Glue {
                    ending: glue::EndingGlue::default(),
                    starting,
                })
            }
            (false, false) => {
                let producer_dram = producer_buf.as_dram()?;
                let consumer_dram = consumer_buf.as_dram()?;
                if producer_dram.compatible_for_merge(consumer_dram) {
                    if is_only_consumer
                        && producer_dram.buffer_type == DramBufferType::Intermediate
                        && consumer_dram.buffer_type == DramBufferType::Output
                    {
                        // Merge: the producer writes straight into a buffer that inherits
                        // the consumer's external binding, so the consumer needs no
                        // further copy at all.
                        let mut merge_graph = OpGraph::new();
                        let merged = merge_graph.add_buffer(Buffer::Dram(DramBuffer {
                            buffer_type: DramBufferType::Output,
                            binding: consumer_dram.binding,
                            ..producer_dram.clone()
                        }));
                        Some(Glue {
                            ending: glue::EndingGlue {
                                graph: merge_graph,
                                replacement_buffer: Some(merged),
                            },
                            starting: glue::StartingGlue::default(),
                        })
                    } else {
                        // Formats already match and no merge applies: the consumer reads
                        // the producer's buffer as-is.
                        Some(Glue::default())
                    }
                } else {
                    let mut ending_graph = OpGraph::new();
                    let source = ending_graph.add_buffer(producer_buf.clone());
                    let replacement =
                        glue::add_copy_between_buffers(&mut ending_graph, source, consumer_buf.clone(), consumer_dram.format).ok()?;
                    Some(Glue {
                        ending: glue::EndingGlue {
                            graph: ending_graph,
                            replacement_buffer: Some(replacement),
                        },
                        starting: glue::StartingGlue::default(),
                    })
                }
            }
        }
    }

    /// Stitch every plan's op graph, plus its glue, into one merged graph, rewriting
    /// buffer references through an `{old -> effective}` map so that a connection whose
    /// consumer was glued to a replacement buffer resolves to that replacement rather
    /// than the producer's original output.
    fn merge(&self, combination: &Combination, part_ids: &[PartId]) -> crate::error::Result<OpGraph> {
        let mut merged = OpGraph::new();
        let mut buffer_map: HashMap<(PartId, BufferId), BufferId> = HashMap::new();

        for &part in part_ids {
            let Some(plan) = combination.plan(part) else {
                return Err(crate::error::Error::NoValidCombination.into());
            };
            self.splice(&mut merged, &plan.graph, part, &mut buffer_map);

            // Incoming glue first (Phase 5): a StartingGlue's replacement buffer takes
            // over whatever this Part's own input buffer would otherwise resolve to, so
            // the plan's ops end up reading from the glue's materialised buffer.
            for slot in plan.input_slots_ordered() {
                let Some(producer_slot) = self.parts.connected_output_slot(slot) else {
                    continue;
                };
                let Some(glue) = combination.glue_at(producer_slot) else {
                    continue;
                };
                self.splice(&mut merged, &glue.starting.graph, part, &mut buffer_map);
                if let (Some(original), Some(replacement)) = (plan.input_buffer(slot), glue.starting.replacement_buffer) {
                    if let Some(&mapped_replacement) = buffer_map.get(&(part, replacement)) {
                        buffer_map.insert((part, original), mapped_replacement);
                    }
                }
            }

            for slot in plan.output_slots_ordered() {
                if let Some(glue) = combination.glue_at(slot) {
                    self.splice(&mut merged, &glue.ending.graph, part, &mut buffer_map);
                    if let Some(original) = plan.output_buffer(slot) {
                        if buffer_map.contains_key(&(part, original)) {
                            if let Some(replacement) = glue.ending.replacement_buffer {
                                if let Some(&mapped_replacement) = buffer_map.get(&(part, replacement)) {
                                    buffer_map.insert((part, original), mapped_replacement);
                                }
                            }
                        }
                    }
                }
            }
        }

        debug!("merged op graph has {} buffers and {} ops", merged.num_buffers(), merged.num_ops());
        Ok(merged)
    }

    /// Copy every buffer and op from `source` into `dest`, recording the id mapping so
    /// later splices (glue fragments referencing the same part's buffers) land on the
    /// same merged buffers instead of duplicating them.
    fn splice(
        &self,
        dest: &mut OpGraph,
        source: &OpGraph,
        part: PartId,
        buffer_map: &mut HashMap<(PartId, BufferId), BufferId>,
    ) {
        let mut local_map = HashMap::new();
        for id in source.buffer_ids() {
            let new_id = dest.add_buffer(source.buffer(id).clone());
            local_map.insert(id, new_id);
            buffer_map.insert((part, id), new_id);
        }
        for id in source.op_ids() {
            let op = remap_op(source.op(id), &local_map);
            let _ = dest.add_op(op);
        }
    }
}

fn remap_op(op: &crate::op::Op, map: &HashMap<BufferId, BufferId>) -> crate::op::Op {
    use crate::op::Op;
    let remap = |id: &BufferId| *map.get(id).unwrap_or(id);
    match op {
        Op::Mce(o) => Op::Mce(crate::op::MceOp {
            inputs: o.inputs.iter().map(remap).collect(),
            output: remap(&o.output),
            block_config: o.block_config,
        }),
        Op::Ple(o) => Op::Ple(crate::op::PleOp {
            kernel_id: o.kernel_id,
            kernel_size_bytes: o.kernel_size_bytes,
            offset: o.offset,
            load_kernel: o.load_kernel,
            inputs: o.inputs.iter().map(remap).collect(),
            output: remap(&o.output),
        }),
        Op::Dma(o) => Op::Dma(crate::op::DmaOp {
            input: remap(&o.input),
            output: remap(&o.output),
            format: o.format,
        }),
        Op::Concat(o) => Op::Concat(crate::op::ConcatOp {
            inputs: o.inputs.iter().map(remap).collect(),
            output: remap(&o.output),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::TEST_CAPABILITIES;
    use crate::estimator::tests::CountingEstimator;
    use crate::part::tests::FakePartGraph;
    use crate::part::Slot as PartSlot;
    use std::collections::HashMap as Map;

    struct OnePlanPerPart;

    impl PlanGenerator for OnePlanPerPart {
        fn get_plans(&self, request: &PlanRequest) -> Vec<Plan> {
            let mut graph = crate::op_graph::OpGraph::new();
            let output = graph.add_buffer(crate::buffer::Buffer::Sram(crate::buffer::SramBuffer {
                tensor_shape: crate::buffer::TensorShape([1, 1, 1, 1]),
                stripe_shape: crate::buffer::TensorShape([1, 1, 1, 1]),
                num_stripes: 1,
                slot_size_bytes: 64,
                size_bytes: 64,
                format: crate::buffer::BufferFormat::NHWC,
                data_type: crate::buffer::DataType::U8,
                quant_info: crate::buffer::QuantizationInfo::default(),
                offset: None,
            }));
            vec![Plan {
                graph: Arc::new(graph),
                input_mapping: Map::new(),
                output_mapping: [(PartSlot::new(request.part, 0), output)].into_iter().collect(),
                block_config: None,
                is_preallocated: false,
            }]
        }

        fn can_double_buffer_weights(&self, _part: PartId) -> bool {
            false
        }
    }

    #[test]
    fn single_part_graph_produces_a_merged_graph() {
        let parts = Arc::new(FakePartGraph::linear_chain(&[(0, 1)]));
        let driver = CombinerDriver {
            parts,
            plan_generator: Arc::new(OnePlanPerPart),
            estimator: Arc::new(CountingEstimator),
            weight_preprocessor: None,
            sram_capacity: TEST_CAPABILITIES.total_sram_size,
            config: DriverConfig::default(),
        };
        let merged = driver.run().expect("single part must always combine");
        // The plan's own Sram buffer, plus the dead-output glue's Sram clone and the
        // Dram buffer it DMAs into (L3: a consumer-less Sram output still needs
        // materialising as a real external output).
        assert_eq!(merged.num_buffers(), 3);
        assert_eq!(merged.num_ops(), 1);
    }

    struct DramOutputPart;

    impl PlanGenerator for DramOutputPart {
        fn get_plans(&self, request: &PlanRequest) -> Vec<Plan> {
            let mut graph = crate::op_graph::OpGraph::new();
            let output = graph.add_buffer(crate::buffer::Buffer::Dram(crate::buffer::DramBuffer {
                tensor_shape: crate::buffer::TensorShape([1, 1, 1, 1]),
                format: crate::buffer::BufferFormat::NHWC,
                data_type: crate::buffer::DataType::U8,
                quant_info: crate::buffer::QuantizationInfo::default(),
                buffer_type: crate::buffer::DramBufferType::Output,
                binding: crate::buffer::ExternalBinding::default(),
            }));
            vec![Plan {
                graph: Arc::new(graph),
                input_mapping: Map::new(),
                output_mapping: [(PartSlot::new(request.part, 0), output)].into_iter().collect(),
                block_config: None,
                is_preallocated: false,
            }]
        }

        fn can_double_buffer_weights(&self, _part: PartId) -> bool {
            false
        }
    }

    #[test]
    fn dead_dram_output_needs_no_extra_glue() {
        let parts = Arc::new(FakePartGraph::linear_chain(&[(0, 1)]));
        let driver = CombinerDriver {
            parts,
            plan_generator: Arc::new(DramOutputPart),
            estimator: Arc::new(CountingEstimator),
            weight_preprocessor: None,
            sram_capacity: TEST_CAPABILITIES.total_sram_size,
            config: DriverConfig::default(),
        };
        let merged = driver.run().expect("single part must always combine");
        assert_eq!(merged.num_buffers(), 1);
        assert_eq!(merged.num_ops(), 0);
    }

    /// A plan generator whose plan shape depends on the requested weight-stripe width,
    /// for exercising the double-buffering path (Scenario 2).
    struct DoubleBufferablePart;

    impl PlanGenerator for DoubleBufferablePart {
        fn get_plans(&self, request: &PlanRequest) -> Vec<Plan> {
            let mut graph = crate::op_graph::OpGraph::new();
            let output = graph.add_buffer(crate::buffer::Buffer::Sram(crate::buffer::SramBuffer {
                tensor_shape: crate::buffer::TensorShape([1, 1, 1, 1]),
                stripe_shape: crate::buffer::TensorShape([1, 1, 1, 1]),
                num_stripes: 1,
                slot_size_bytes: 64 * request.num_weight_stripes as u64,
                size_bytes: 64 * request.num_weight_stripes as u64,
                format: crate::buffer::BufferFormat::NHWC,
                data_type: crate::buffer::DataType::U8,
                quant_info: crate::buffer::QuantizationInfo::default(),
                offset: None,
            }));
            vec![Plan {
                graph: Arc::new(graph),
                input_mapping: Map::new(),
                output_mapping: [(PartSlot::new(request.part, 0), output)].into_iter().collect(),
                block_config: None,
                is_preallocated: false,
            }]
        }

        fn can_double_buffer_weights(&self, _part: PartId) -> bool {
            true
        }
    }

    #[test]
    fn enumerate_sections_tries_both_weight_stripe_widths() {
        let parts = Arc::new(FakePartGraph::linear_chain(&[(0, 1)]));
        let driver = CombinerDriver {
            parts,
            plan_generator: Arc::new(DoubleBufferablePart),
            estimator: Arc::new(CountingEstimator),
            weight_preprocessor: None,
            sram_capacity: TEST_CAPABILITIES.total_sram_size,
            config: DriverConfig::default(),
        };
        let sections = driver.enumerate_sections(PartId(0));
        let widths: std::collections::HashSet<Option<u32>> =
            sections.iter().map(SectionContext::weight_stripes).collect();
        assert!(widths.contains(&Some(1)));
        assert!(widths.contains(&Some(2)));
    }
}
