//! Data-movement ops synthesized at a section boundary: wherever a connection crosses
//! from one section into another, or touches an external input/output, the buffer on
//! one side needs translating into what the other side expects. A [`Glue`] is the pair
//! of small op-graph fragments that do that translation, one appended to the producer's
//! plan (`ending`) and one prepended to the consumer's plan (`starting`).

use std::collections::HashMap;

use crate::buffer::{Buffer, BufferFormat, DramBuffer, DramBufferType, ExternalBinding};
use crate::error::Error;
use crate::op::{DmaOp, Op};
use crate::op_graph::{BufferId, OpGraph};

/// Ops and buffers appended after a plan's output buffer, before it crosses a section
/// boundary.
#[derive(Debug, Clone, Default)]
pub struct EndingGlue {
    pub graph: OpGraph,
    /// The buffer in `graph` that every downstream consumer should bind to instead of
    /// the plan's original output. `None` means the plan's own output is used as-is
    /// (no glue was necessary).
    pub replacement_buffer: Option<BufferId>,
}

/// Ops and buffers prepended before a plan's input buffer, bridging a predecessor's
/// output (possibly glued through DRAM) to what this plan expects.
#[derive(Debug, Clone, Default)]
pub struct StartingGlue {
    pub graph: OpGraph,
    pub replacement_buffer: Option<BufferId>,
}

/// The glue for one connection, combining what its producer's plan needs appended and
/// what its consumer's plan needs prepended. Either half may be empty.
#[derive(Debug, Clone, Default)]
pub struct Glue {
    pub ending: EndingGlue,
    pub starting: StartingGlue,
}

/// Append a DMA copying `source` into a freshly-added buffer of kind `destination`,
/// returning the new buffer's id.
///
/// # Errors
/// Returns [`Error::DirectSramToSramCopy`] if both `source` and `destination` are SRAM
/// buffers: the hardware has no SRAM-to-SRAM transfer, only SRAM<->DRAM.
pub fn add_copy_between_buffers(
    graph: &mut OpGraph,
    source: BufferId,
    destination: Buffer,
    format: BufferFormat,
) -> crate::error::Result<BufferId> {
    if graph.buffer(source).is_sram() && destination.is_sram() {
        return Err(Error::DirectSramToSramCopy.into());
    }
    let destination_id = graph.add_buffer(destination);
    graph.add_op(Op::Dma(DmaOp {
        input: source,
        output: destination_id,
        format,
    }))?;
    Ok(destination_id)
}

/// Build the ending glue that copies an SRAM plan output to a DRAM intermediate buffer,
/// for a connection that crosses a section boundary. Returns the glue plus the id (in
/// its own graph) of the new DRAM buffer, which callers use as the key for
/// [`share_dram_buffers`].
pub fn sram_to_dram_ending_glue(
    producer_graph: &OpGraph,
    producer_output: BufferId,
) -> crate::error::Result<EndingGlue> {
    let source = producer_graph.buffer(producer_output);
    let sram = source.as_sram().ok_or(Error::BufferNotFound)?;
    let mut graph = OpGraph::new();
    // The glue's graph only ever references buffers it owns; it is stitched onto the
    // producer's graph by the driver's final merge (§4.5), not by sharing ids directly.
    let external_input = graph.add_buffer(source.clone());
    let dram = graph.add_buffer(Buffer::Dram(DramBuffer {
        tensor_shape: sram.tensor_shape,
        format: sram.format,
        data_type: sram.data_type,
        quant_info: sram.quant_info,
        buffer_type: DramBufferType::Intermediate,
        binding: ExternalBinding::default(),
    }));
    graph.add_op(Op::Dma(DmaOp {
        input: external_input,
        output: dram,
        format: sram.format,
    }))?;
    Ok(EndingGlue {
        graph,
        replacement_buffer: Some(dram),
    })
}

/// Build the starting glue that copies a DRAM buffer into a fresh SRAM buffer shaped
/// like `wanted`, for a consumer plan that needs its input resident in SRAM.
pub fn dram_to_sram_starting_glue(wanted: Buffer) -> crate::error::Result<StartingGlue> {
    let format = wanted.format().ok_or(Error::BufferNotFound)?;
    let data_type = match &wanted {
        Buffer::Sram(b) => b.data_type,
        _ => return Err(Error::BufferNotFound.into()),
    };
    let mut graph = OpGraph::new();
    let tensor_shape = match &wanted {
        Buffer::Sram(b) => b.tensor_shape,
        _ => unreachable!(),
    };
    let quant_info = match &wanted {
        Buffer::Sram(b) => b.quant_info,
        _ => unreachable!(),
    };
    let external_input = graph.add_buffer(Buffer::Dram(DramBuffer {
        tensor_shape,
        format,
        data_type,
        quant_info,
        buffer_type: DramBufferType::Intermediate,
        binding: ExternalBinding::default(),
    }));
    let sram = graph.add_buffer(wanted);
    graph.add_op(Op::Dma(DmaOp {
        input: external_input,
        output: sram,
        format,
    }))?;
    Ok(StartingGlue {
        graph,
        replacement_buffer: Some(sram),
    })
}

/// Build the ending glue that binds a plan's SRAM output directly to the compiled
/// graph's external output, tagging it with the caller-supplied binding. Used for parts
/// with no downstream consumer (graph outputs).
pub fn external_output_ending_glue(
    sram_output: &crate::buffer::SramBuffer,
    binding: ExternalBinding,
) -> crate::error::Result<EndingGlue> {
    let mut graph = OpGraph::new();
    let external_input = graph.add_buffer(Buffer::Sram(sram_output.clone()));
    let dram = graph.add_buffer(Buffer::Dram(DramBuffer {
        tensor_shape: sram_output.tensor_shape,
        format: sram_output.format,
        data_type: sram_output.data_type,
        quant_info: sram_output.quant_info,
        buffer_type: DramBufferType::Output,
        binding,
    }));
    graph.add_op(Op::Dma(DmaOp {
        input: external_input,
        output: dram,
        format: sram_output.format,
    }))?;
    Ok(EndingGlue {
        graph,
        replacement_buffer: Some(dram),
    })
}

/// A merge key for a DRAM intermediate buffer: two ending glues may reuse the same DRAM
/// buffer whenever the buffers they'd otherwise allocate are
/// [`DramBuffer::compatible_for_merge`]-equal, so a fan-out producer only pays for one
/// DRAM round trip instead of one per consumer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MergeKey {
    tensor_shape: [u32; 4],
    format: &'static str,
    data_type: &'static str,
}

impl MergeKey {
    fn of(buffer: &DramBuffer) -> Self {
        Self {
            tensor_shape: buffer.tensor_shape.0,
            format: buffer.format.0,
            data_type: buffer.data_type.0,
        }
    }
}

/// Given the DRAM buffers newly produced by a batch of ending glues, group the ones
/// that are mergeable (same shape/format/data type) so the driver only keeps one
/// physical DRAM allocation per group.
///
/// The input order must already be deterministic (callers sort candidates by producer
/// slot before calling this); we never depend on hash order here, only walk `candidates`
/// once and assign the first-seen representative of each key as the group's buffer.
pub fn share_dram_buffers(candidates: &[(usize, DramBuffer)]) -> HashMap<usize, usize> {
    let mut representative_by_key: HashMap<MergeKey, usize> = HashMap::new();
    let mut assignment = HashMap::new();
    let mut ordered = candidates.to_vec();
    ordered.sort_by_key(|(index, _)| *index);
    for (index, buffer) in &ordered {
        let key = MergeKey::of(buffer);
        let representative = *representative_by_key.entry(key).or_insert(*index);
        assignment.insert(*index, representative);
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{DataType, QuantizationInfo, SramBuffer, TensorShape};

    fn sram(shape: [u32; 4]) -> SramBuffer {
        SramBuffer {
            tensor_shape: TensorShape(shape),
            stripe_shape: TensorShape(shape),
            num_stripes: 1,
            slot_size_bytes: 256,
            size_bytes: 256,
            format: BufferFormat::NHWC,
            data_type: DataType::U8,
            quant_info: QuantizationInfo::default(),
            offset: None,
        }
    }

    #[test]
    fn add_copy_between_sram_buffers_is_rejected() {
        let mut graph = OpGraph::new();
        let source = graph.add_buffer(Buffer::Sram(sram([1, 2, 2, 4])));
        let err = add_copy_between_buffers(&mut graph, source, Buffer::Sram(sram([1, 2, 2, 4])), BufferFormat::NHWC);
        assert!(err.is_err());
    }

    #[test]
    fn sram_to_dram_glue_adds_a_dma_and_dram_buffer() {
        let mut producer_graph = OpGraph::new();
        let output = producer_graph.add_buffer(Buffer::Sram(sram([1, 4, 4, 8])));
        let glue = sram_to_dram_ending_glue(&producer_graph, output).unwrap();
        let replacement = glue.replacement_buffer.unwrap();
        assert!(glue.graph.buffer(replacement).is_dram());
        assert_eq!(glue.graph.num_ops(), 1);
    }

    #[test]
    fn dram_to_sram_glue_targets_the_requested_buffer() {
        let wanted = Buffer::Sram(sram([1, 4, 4, 8]));
        let glue = dram_to_sram_starting_glue(wanted).unwrap();
        let replacement = glue.replacement_buffer.unwrap();
        assert!(glue.graph.buffer(replacement).is_sram());
    }

    #[test]
    fn compatible_dram_buffers_share_a_representative() {
        let a = DramBuffer {
            tensor_shape: TensorShape([1, 4, 4, 8]),
            format: BufferFormat::NHWC,
            data_type: DataType::U8,
            quant_info: QuantizationInfo::default(),
            buffer_type: DramBufferType::Intermediate,
            binding: ExternalBinding::default(),
        };
        let b = a.clone();
        let c = DramBuffer {
            tensor_shape: TensorShape([1, 8, 8, 8]),
            ..a.clone()
        };
        let assignment = share_dram_buffers(&[(0, a), (1, b), (2, c)]);
        assert_eq!(assignment[&0], assignment[&1]);
        assert_ne!(assignment[&0], assignment[&2]);
    }
}
