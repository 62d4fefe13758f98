//! Exposes the combiner's error type.

use std::sync::PoisonError;

use thiserror::Error;

use crate::part::PartId;

/// Error type that the combiner can return.
///
/// Most failure modes described in the design (allocation failure, a disconnected
/// continuation, dangling outputs at the end of a section) are *not* represented here:
/// those are pruning decisions private to the section builder and never escape as an
/// `Error`. Only programmer errors and the final "no compilation possible" outcome
/// reach the driver's public API.
#[derive(Error, Debug)]
pub enum Error {
    /// No part graph was given, or it referenced parts that do not exist.
    #[error("part {0} referenced in the graph does not exist")]
    UnknownPart(PartId),
    /// The plan generator returned more than one plan for cascade phase `Middle`, which
    /// would make the dynamic program's combinatorics unbounded.
    #[error("plan generator returned {0} plans for cascade phase Middle (must be <= 1)")]
    BudgetExceeded(usize),
    /// The tail dynamic program could not find any valid assignment of plans to every
    /// part in the graph. This is a hard compile failure.
    #[error("no valid combination of plans covers the whole part graph")]
    NoValidCombination,
    /// A glue boundary already had an `EndingGlue` or `StartingGlue` set; setting it again
    /// would silently discard data-movement ops that were already materialized.
    #[error("glue already set for this connection")]
    GlueAlreadySet,
    /// The glue engine was asked to build a direct SRAM-to-SRAM copy, which the hardware
    /// cannot do. Callers must always route such copies through a DRAM buffer.
    #[error("cannot copy directly between two SRAM buffers, a DRAM hop is required")]
    DirectSramToSramCopy,
    /// A buffer handle did not belong to the `OpGraph` it was looked up in.
    #[error("buffer handle not found in this op graph")]
    BufferNotFound,
    /// An op handle did not belong to the `OpGraph` it was looked up in.
    #[error("op handle not found in this op graph")]
    OpNotFound,
    /// An `Sram` buffer reached the final merge step without a resolved offset.
    #[error("sram buffer {0:?} has no allocated offset")]
    UnallocatedSramBuffer(crate::op_graph::BufferId),
    /// The scratchpad allocator was asked to free an offset it does not own.
    #[error("no allocation at offset {0}")]
    UnknownAllocation(u64),
    /// A background worker in the thread pool panicked before completing its task.
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
    /// A mutex guarding shared combiner state was poisoned by a panicking thread.
    #[error("poisoned lock")]
    PoisonError,
    /// Uncategorized error, used sparingly for conditions that genuinely have no better home.
    #[error("{0}")]
    Uncategorized(&'static str),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::PoisonError
    }
}

pub type Result<T> = std::result::Result<T, anyhow::Error>;
