//! Identifiers for the input graph of partitioned computation units ("Parts") and the
//! read-only view the combiner uses to query it.
//!
//! The part graph itself, and the plan generator that turns one part into a set of
//! candidate [`Plan`](crate::plan::Plan)s, are external collaborators (see the design's
//! "out of scope" section); this module only specifies the narrow contract the combiner
//! needs from them.

use std::fmt::{Display, Formatter};

/// A dense, non-negative part identifier. Parts in the input graph are numbered so that
/// topological order equals numeric order: the combiner never needs to sort them.
#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartId(pub usize);

impl Display for PartId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Part({})", self.0)
    }
}

impl From<usize> for PartId {
    fn from(value: usize) -> Self {
        PartId(value)
    }
}

/// A `(part, index)` pair identifying one of a part's input or output slots.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Slot {
    pub part: PartId,
    pub index: usize,
}

impl Slot {
    pub fn new(part: PartId, index: usize) -> Self {
        Self {
            part,
            index,
        }
    }
}

/// A connection is a directed edge from one output slot to one input slot. An output
/// slot may feed many input slots, but every input slot is fed by exactly one
/// connection (enforced by the part graph, not by this type).
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct Connection {
    pub source: Slot,
    pub destination: Slot,
}

/// Read-only view of the part graph, provided by the caller. Every method is expected
/// to be cheap and side-effect free; the combiner may call these concurrently from
/// multiple worker threads.
pub trait PartGraphView: Send + Sync {
    /// All part ids, in topological (== numeric) order.
    fn part_ids(&self) -> Vec<PartId>;
    /// Number of input slots a part declares.
    fn num_inputs(&self, part: PartId) -> usize;
    /// Number of output slots a part declares.
    fn num_outputs(&self, part: PartId) -> usize;
    /// Connections whose source is one of `part`'s output slots.
    fn source_connections(&self, part: PartId) -> Vec<Connection>;
    /// Connections whose destination is one of `part`'s input slots.
    fn destination_connections(&self, part: PartId) -> Vec<Connection>;
    /// All input slots fed by the given output slot (possibly many, possibly none).
    fn connected_input_slots(&self, output: Slot) -> Vec<Slot>;
    /// The single output slot feeding the given input slot, if connected.
    fn connected_output_slot(&self, input: Slot) -> Option<Slot>;

    /// Part inputs that are not fed by any other part in the graph, in slot order.
    fn input_slots(&self, part: PartId) -> Vec<Slot> {
        (0..self.num_inputs(part)).map(|index| Slot::new(part, index)).collect()
    }

    /// All of a part's output slots, in slot order.
    fn output_slots(&self, part: PartId) -> Vec<Slot> {
        (0..self.num_outputs(part)).map(|index| Slot::new(part, index)).collect()
    }
}

#[cfg(test)]
pub mod tests {
    use std::collections::HashMap;

    use super::*;

    /// A simple in-memory part graph used throughout the combiner's unit tests.
    #[derive(Default)]
    pub struct FakePartGraph {
        pub num_inputs: HashMap<PartId, usize>,
        pub num_outputs: HashMap<PartId, usize>,
        pub connections: Vec<Connection>,
    }

    impl FakePartGraph {
        pub fn linear_chain(part_io: &[(usize, usize)]) -> Self {
            let mut graph = FakePartGraph::default();
            for (i, &(ins, outs)) in part_io.iter().enumerate() {
                graph.num_inputs.insert(PartId(i), ins);
                graph.num_outputs.insert(PartId(i), outs);
            }
            for i in 0..part_io.len().saturating_sub(1) {
                graph.connections.push(Connection {
                    source: Slot::new(PartId(i), 0),
                    destination: Slot::new(PartId(i + 1), 0),
                });
            }
            graph
        }
    }

    impl PartGraphView for FakePartGraph {
        fn part_ids(&self) -> Vec<PartId> {
            let mut ids: Vec<_> = self.num_inputs.keys().copied().collect();
            ids.sort();
            ids
        }

        fn num_inputs(&self, part: PartId) -> usize {
            *self.num_inputs.get(&part).unwrap_or(&0)
        }

        fn num_outputs(&self, part: PartId) -> usize {
            *self.num_outputs.get(&part).unwrap_or(&0)
        }

        fn source_connections(&self, part: PartId) -> Vec<Connection> {
            self.connections.iter().filter(|c| c.source.part == part).copied().collect()
        }

        fn destination_connections(&self, part: PartId) -> Vec<Connection> {
            self.connections.iter().filter(|c| c.destination.part == part).copied().collect()
        }

        fn connected_input_slots(&self, output: Slot) -> Vec<Slot> {
            self.connections
                .iter()
                .filter(|c| c.source == output)
                .map(|c| c.destination)
                .collect()
        }

        fn connected_output_slot(&self, input: Slot) -> Option<Slot> {
            self.connections.iter().find(|c| c.destination == input).map(|c| c.source)
        }
    }
}
