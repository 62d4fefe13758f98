//! The bipartite DAG of [`Op`]s and [`Buffer`]s that makes up a [`Plan`](crate::plan::Plan)
//! or a piece of [`Glue`](crate::glue::Glue).
//!
//! `OpGraph` is an index-keyed arena: `BufferId`/`OpId` are stable for the arena's
//! lifetime (nothing is ever removed), and every other type in the combiner refers to
//! buffers and ops through these handles rather than borrowing them directly.

use thiserror::Error;

use crate::buffer::Buffer;
use crate::op::Op;

/// Stable handle to a [`Buffer`] owned by some [`OpGraph`]. Only meaningful relative to
/// the arena that produced it.
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferId(pub(crate) usize);

/// Stable handle to an [`Op`] owned by some [`OpGraph`].
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct OpId(pub(crate) usize);

#[derive(Debug, Error)]
pub enum OpGraphError {
    #[error("buffer {0:?} already has a producer op")]
    BufferAlreadyProduced(BufferId),
    #[error("buffer handle from a different op graph")]
    ForeignBuffer,
}

/// Owning arena of buffers and ops forming one bipartite DAG: every buffer has at most
/// one producer op (I1), and every op declares its input buffers up front.
#[derive(Debug, Default, Clone)]
pub struct OpGraph {
    buffers: Vec<Buffer>,
    producers: Vec<Option<OpId>>,
    ops: Vec<Op>,
}

impl OpGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a buffer with no producer yet. Returns a handle stable for this graph's
    /// lifetime.
    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        self.buffers.push(buffer);
        self.producers.push(None);
        BufferId(self.buffers.len() - 1)
    }

    /// Add an op, recording it as the producer of its declared output buffer.
    /// # Errors
    /// Fails if the output buffer already has a producer (I1), or if the op references
    /// a buffer id from a different `OpGraph`.
    pub fn add_op(&mut self, op: Op) -> Result<OpId, OpGraphError> {
        let output = op.output();
        self.check_owned(output)?;
        for &input in op.inputs() {
            self.check_owned(input)?;
        }
        if self.producers[output.0].is_some() {
            return Err(OpGraphError::BufferAlreadyProduced(output));
        }
        self.ops.push(op);
        let id = OpId(self.ops.len() - 1);
        self.producers[output.0] = Some(id);
        Ok(id)
    }

    fn check_owned(&self, buffer: BufferId) -> Result<(), OpGraphError> {
        if buffer.0 >= self.buffers.len() {
            return Err(OpGraphError::ForeignBuffer);
        }
        Ok(())
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.0]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut Buffer {
        &mut self.buffers[id.0]
    }

    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id.0]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Op {
        &mut self.ops[id.0]
    }

    pub fn producer_of(&self, buffer: BufferId) -> Option<OpId> {
        self.producers[buffer.0]
    }

    pub fn buffer_ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        (0..self.buffers.len()).map(BufferId)
    }

    pub fn op_ids(&self) -> impl Iterator<Item = OpId> + '_ {
        (0..self.ops.len()).map(OpId)
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// Every SRAM buffer, for the scratchpad allocator to walk over (§4.3).
    pub fn sram_buffers(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffer_ids().filter(|&id| self.buffer(id).is_sram())
    }

    /// Every PLE op in this graph, for the section builder's kernel residency checks.
    pub fn ple_ops(&self) -> impl Iterator<Item = OpId> + '_ {
        self.op_ids().filter(|&id| self.op(id).as_ple().is_some())
    }

    /// (P1): exactly one producer per buffer holds by construction; this additionally
    /// checks that following input edges never revisits a buffer already on the current
    /// path, i.e. the graph is acyclic.
    pub fn is_acyclic(&self) -> bool {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.ops.len()];

        fn visit(graph: &OpGraph, op: OpId, marks: &mut [Mark]) -> bool {
            match marks[op.0] {
                Mark::Done => return true,
                Mark::InProgress => return false,
                Mark::Unvisited => {}
            }
            marks[op.0] = Mark::InProgress;
            for &input in graph.op(op).inputs() {
                if let Some(producer) = graph.producer_of(input) {
                    if !visit(graph, producer, marks) {
                        return false;
                    }
                }
            }
            marks[op.0] = Mark::Done;
            true
        }

        for id in self.op_ids() {
            if !visit(self, id, &mut marks) {
                return false;
            }
        }
        true
    }
}
