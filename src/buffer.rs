//! Buffer types that can appear in an [`OpGraph`](crate::op_graph::OpGraph).

/// Shape of a 4D NHWC-ish tensor. The combiner never interprets the individual
/// dimensions; it only compares shapes for equality and multiplies them for sizing.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Default)]
pub struct TensorShape(pub [u32; 4]);

impl TensorShape {
    pub fn elements(&self) -> u64 {
        self.0.iter().map(|&d| d as u64).product()
    }
}

/// How tensor data is laid out in memory. Real hardware formats (`NHWC`, `NHWCB`,
/// `FCAF`, ...) are left opaque to the combiner: it only needs to compare them for
/// equality and hand them to the format/compatibility oracle (§6.5).
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct BufferFormat(pub &'static str);

impl BufferFormat {
    pub const NHWC: BufferFormat = BufferFormat("NHWC");
    pub const NHWCB: BufferFormat = BufferFormat("NHWCB");
}

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct DataType(pub &'static str);

impl DataType {
    pub const U8: DataType = DataType("U8");
    pub const I8: DataType = DataType("I8");
    pub const I32: DataType = DataType("I32");
}

/// Per-tensor affine quantization parameters.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct QuantizationInfo {
    pub scale: f32,
    pub zero_point: i32,
}

impl Default for QuantizationInfo {
    fn default() -> Self {
        Self {
            scale: 1.0,
            zero_point: 0,
        }
    }
}

impl Eq for QuantizationInfo {}

impl std::hash::Hash for QuantizationInfo {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.scale.to_bits().hash(state);
        self.zero_point.hash(state);
    }
}

/// What role a DRAM buffer plays for external bookkeeping (command-stream generation,
/// which is out of scope for the combiner but needs these tags preserved).
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub enum DramBufferType {
    Input,
    Output,
    Intermediate,
    ConstantDma,
}

/// External identifiers a DRAM output buffer carries through to the command-stream
/// generator. Only meaningful for [`DramBufferType::Output`] buffers.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, Default)]
pub struct ExternalBinding {
    pub operation_id: Option<u32>,
    pub producer_output_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SramBuffer {
    pub tensor_shape: TensorShape,
    pub stripe_shape: TensorShape,
    pub num_stripes: u32,
    pub slot_size_bytes: u64,
    pub size_bytes: u64,
    pub format: BufferFormat,
    pub data_type: DataType,
    pub quant_info: QuantizationInfo,
    /// Resolved once the scratchpad allocator places this buffer (I4).
    pub offset: Option<u64>,
}

impl SramBuffer {
    /// True if a single stripe holds the whole tensor: downstream consumers see a
    /// complete checkpoint rather than a partial, in-flight cascade result.
    pub fn is_full_tensor(&self) -> bool {
        self.num_stripes == 1 && self.stripe_shape == self.tensor_shape
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DramBuffer {
    pub tensor_shape: TensorShape,
    pub format: BufferFormat,
    pub data_type: DataType,
    pub quant_info: QuantizationInfo,
    pub buffer_type: DramBufferType,
    pub binding: ExternalBinding,
}

impl DramBuffer {
    pub fn compatible_for_merge(&self, other: &DramBuffer) -> bool {
        self.tensor_shape == other.tensor_shape
            && self.format == other.format
            && self.data_type == other.data_type
            && self.quant_info == other.quant_info
    }
}

/// A tagged buffer record. See §3 of the design for the full set of invariants.
#[derive(Debug, Clone, PartialEq)]
pub enum Buffer {
    Sram(SramBuffer),
    Dram(DramBuffer),
    /// Transient staging area consumed immediately by a PLE op; never independently
    /// allocated by the scratchpad allocator.
    PleInputSram {
        tensor_shape: TensorShape,
        size_bytes: u64,
    },
}

impl Buffer {
    pub fn as_sram(&self) -> Option<&SramBuffer> {
        match self {
            Buffer::Sram(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_sram_mut(&mut self) -> Option<&mut SramBuffer> {
        match self {
            Buffer::Sram(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_dram(&self) -> Option<&DramBuffer> {
        match self {
            Buffer::Dram(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_sram(&self) -> bool {
        matches!(self, Buffer::Sram(_))
    }

    pub fn is_dram(&self) -> bool {
        matches!(self, Buffer::Dram(_))
    }

    pub fn format(&self) -> Option<BufferFormat> {
        match self {
            Buffer::Sram(b) => Some(b.format),
            Buffer::Dram(b) => Some(b.format),
            Buffer::PleInputSram {
                ..
            } => None,
        }
    }
}
