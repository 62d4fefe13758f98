//! Optional dot-file dumps of the merged op graph, gated by [`crate::config`] so normal
//! runs pay nothing for it.

use std::fmt;
use std::fs;
use std::path::Path;

use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;

use crate::op_graph::OpGraph;

struct BufferLabel<'a>(&'a crate::buffer::Buffer);

impl fmt::Display for BufferLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            crate::buffer::Buffer::Sram(b) => write!(f, "sram {:?} ({}B)", b.tensor_shape.0, b.size_bytes),
            crate::buffer::Buffer::Dram(b) => write!(f, "dram {:?}", b.tensor_shape.0),
            crate::buffer::Buffer::PleInputSram { tensor_shape, .. } => write!(f, "ple-in {:?}", tensor_shape.0),
        }
    }
}

/// Render `graph` as Graphviz dot source, one node per buffer, one edge per op input.
/// Used only for human debugging; never parsed back in.
pub fn to_dot(graph: &OpGraph) -> String {
    let mut viz = DiGraph::<String, &'static str>::new();
    let mut nodes = Vec::with_capacity(graph.num_buffers());
    for id in graph.buffer_ids() {
        let label = BufferLabel(graph.buffer(id)).to_string();
        nodes.push(viz.add_node(label));
    }
    for op_id in graph.op_ids() {
        let op = graph.op(op_id);
        let output = nodes[op.output().0];
        for input in op.inputs() {
            viz.add_edge(nodes[input.0], output, op_kind(op));
        }
    }
    format!("{:?}", Dot::with_config(&viz, &[Config::EdgeNoLabel]))
}

fn op_kind(op: &crate::op::Op) -> &'static str {
    match op {
        crate::op::Op::Mce(_) => "mce",
        crate::op::Op::Ple(_) => "ple",
        crate::op::Op::Dma(_) => "dma",
        crate::op::Op::Concat(_) => "concat",
    }
}

/// Write `graph`'s dot rendering to `dir/name.dot`, if [`crate::config::debug_dir`] is
/// set. Silently does nothing otherwise.
pub fn dump_if_enabled(graph: &OpGraph, name: &str) {
    let Some(dir) = crate::config::debug_dir() else {
        return;
    };
    let path = Path::new(&dir).join(format!("{name}.dot"));
    if let Err(err) = fs::write(&path, to_dot(graph)) {
        log::warn!("failed to write debug dot file {}: {err}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, BufferFormat, DataType, QuantizationInfo, SramBuffer, TensorShape};
    use crate::op::{DmaOp, Op};

    #[test]
    fn renders_a_small_graph_without_panicking() {
        let mut graph = OpGraph::new();
        let a = graph.add_buffer(Buffer::Sram(SramBuffer {
            tensor_shape: TensorShape([1, 1, 1, 1]),
            stripe_shape: TensorShape([1, 1, 1, 1]),
            num_stripes: 1,
            slot_size_bytes: 4,
            size_bytes: 4,
            format: BufferFormat::NHWC,
            data_type: DataType::U8,
            quant_info: QuantizationInfo::default(),
            offset: None,
        }));
        let b = graph.add_buffer(Buffer::PleInputSram {
            tensor_shape: TensorShape([1, 1, 1, 1]),
            size_bytes: 4,
        });
        graph
            .add_op(Op::Dma(DmaOp {
                input: a,
                output: b,
                format: BufferFormat::NHWC,
            }))
            .unwrap();
        let dot = to_dot(&graph);
        assert!(dot.contains("digraph"));
    }
}
