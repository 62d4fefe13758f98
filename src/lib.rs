//! Plan-selection, section-cascading and glue-insertion optimizer for a multi-core NPU
//! compiler.
//!
//! A backend compiler splits a network into a DAG of independently-plannable "parts"
//! (convolutions, activations, concatenations, ...), then hands that part graph to
//! [`driver::CombinerDriver`] along with three caller-supplied collaborators:
//!
//! - a [`plan::PlanGenerator`], producing candidate op-graph implementations per part,
//! - an [`estimator::Estimator`], scoring those candidates and the glue between them,
//! - a [`capabilities::HardwareCapabilities`], describing the target chip's scratchpad.
//!
//! The driver finds the lowest-cost way to group parts into cascaded sections that
//! share on-chip SRAM, inserts the DMA glue needed at every section boundary, and
//! returns a single merged [`op_graph::OpGraph`] ready for code generation.
//!
//! ```no_run
//! use std::sync::Arc;
//! use npu_combiner::driver::{CombinerDriver, DriverConfig};
//!
//! # fn example(
//! #     parts: Arc<dyn npu_combiner::part::PartGraphView>,
//! #     plan_generator: Arc<dyn npu_combiner::plan::PlanGenerator>,
//! #     estimator: Arc<dyn npu_combiner::estimator::Estimator>,
//! # ) -> npu_combiner::error::Result<()> {
//! let driver = CombinerDriver {
//!     parts,
//!     plan_generator,
//!     estimator,
//!     weight_preprocessor: None,
//!     sram_capacity: 1024 * 1024,
//!     config: DriverConfig::default(),
//! };
//! let merged_graph = driver.run()?;
//! # let _ = merged_graph;
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate derivative;

pub mod allocator;
pub mod buffer;
pub mod capabilities;
pub mod combination;
pub mod config;
pub mod debug;
pub mod driver;
pub mod error;
pub mod estimator;
pub mod glue;
pub mod op;
pub mod op_graph;
pub mod part;
pub mod plan;
pub mod section;
pub mod thread_pool;
mod util;

pub use error::{Error, Result};
