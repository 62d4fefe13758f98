//! Op types that can appear in an [`OpGraph`](crate::op_graph::OpGraph).

use crate::op_graph::BufferId;

/// A unique identifier for one PLE kernel's machine code, as understood by the external
/// PLE kernel database. Opaque to the combiner beyond equality comparison.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct PleKernelId(pub u32);

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Default)]
pub struct BlockConfig {
    pub width: u32,
    pub height: u32,
}

impl BlockConfig {
    pub const DEFAULT: BlockConfig = BlockConfig {
        width: 16,
        height: 16,
    };
}

/// The matrix-compute engine op. Carries no extra state the combiner inspects; its
/// cost is entirely the estimator's concern.
#[derive(Debug, Clone)]
pub struct MceOp {
    pub inputs: Vec<BufferId>,
    pub output: BufferId,
    pub block_config: Option<BlockConfig>,
}

/// The vector post-processing engine op. Requires resident kernel code in SRAM; the
/// section builder is responsible for loading it at most once per section (I3).
#[derive(Debug, Clone)]
pub struct PleOp {
    pub kernel_id: PleKernelId,
    pub kernel_size_bytes: u64,
    /// Resolved once the section builder places the kernel's code.
    pub offset: Option<u64>,
    /// Whether this particular op instance needs to issue the kernel load, or whether
    /// it reuses kernel code already resident from an earlier op in the same section.
    pub load_kernel: bool,
    pub inputs: Vec<BufferId>,
    pub output: BufferId,
}

/// A transfer between SRAM and DRAM.
#[derive(Debug, Clone)]
pub struct DmaOp {
    pub input: BufferId,
    pub output: BufferId,
    pub format: crate::buffer::BufferFormat,
}

/// Concatenates multiple inputs into one output along some part-defined axis. The
/// combiner treats concat parts as pre-planned and pre-allocated (see
/// [`Plan::is_preallocated`](crate::plan::Plan::is_preallocated)).
#[derive(Debug, Clone)]
pub struct ConcatOp {
    pub inputs: Vec<BufferId>,
    pub output: BufferId,
}

#[derive(Debug, Clone)]
pub enum Op {
    Mce(MceOp),
    Ple(PleOp),
    Dma(DmaOp),
    Concat(ConcatOp),
}

impl Op {
    pub fn inputs(&self) -> &[BufferId] {
        match self {
            Op::Mce(op) => &op.inputs,
            Op::Ple(op) => &op.inputs,
            Op::Dma(op) => std::slice::from_ref(&op.input),
            Op::Concat(op) => &op.inputs,
        }
    }

    pub fn output(&self) -> BufferId {
        match self {
            Op::Mce(op) => op.output,
            Op::Ple(op) => op.output,
            Op::Dma(op) => op.output,
            Op::Concat(op) => op.output,
        }
    }

    pub fn as_ple(&self) -> Option<&PleOp> {
        match self {
            Op::Ple(op) => Some(op),
            _ => None,
        }
    }

    pub fn as_ple_mut(&mut self) -> Option<&mut PleOp> {
        match self {
            Op::Ple(op) => Some(op),
            _ => None,
        }
    }
}
