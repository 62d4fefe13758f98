//! The external cost model (§6.4). The combiner is mechanically indifferent to cycles
//! and bytes; it only needs a total ordering over candidate [`Combination`](crate::combination::Combination)s,
//! which the estimator supplies one plan (or one glue fragment) at a time so the driver
//! can fold costs incrementally instead of re-estimating whole combinations.

use crate::combination::Metric;
use crate::glue::Glue;
use crate::op_graph::OpGraph;
use crate::part::PartId;
use crate::plan::Plan;

/// Options threaded through to every estimation call, for variants the estimator wants
/// to expose without changing its trait signature (e.g. whether to weight DRAM
/// bandwidth or on-chip cycles more heavily).
#[derive(Debug, Clone, Default)]
pub struct EstimationOptions {
    pub weight_factor: f64,
}

/// An op graph paired with the per-op cost the estimator assigned it, kept around for
/// diagnostics and the debug dot-renderer.
#[derive(Debug, Clone)]
pub struct EstimatedOpGraph {
    pub graph: OpGraph,
    pub metric: Metric,
}

/// External cost model, supplied by the caller.
pub trait Estimator: Send + Sync {
    /// Cost of running `plan` for `part` in isolation (a lonely plan, or the anchor
    /// estimate before any cascading discount is applied).
    fn estimate_plan(&self, part: PartId, plan: &Plan, options: &EstimationOptions) -> Metric;

    /// Cost of the ops a glue fragment adds at a section boundary.
    fn estimate_glue(&self, glue: &Glue, options: &EstimationOptions) -> Metric;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Counts ops and bytes without modeling real hardware, for driver/DP unit tests
    /// that only care about relative ordering.
    pub struct CountingEstimator;

    impl Estimator for CountingEstimator {
        fn estimate_plan(&self, _part: PartId, plan: &Plan, _options: &EstimationOptions) -> Metric {
            Metric {
                cycles: plan.graph.num_ops() as f64,
                sram_usage_bytes: plan
                    .graph
                    .sram_buffers()
                    .map(|id| plan.graph.buffer(id).as_sram().map(|b| b.size_bytes).unwrap_or(0))
                    .sum(),
            }
        }

        fn estimate_glue(&self, glue: &Glue, _options: &EstimationOptions) -> Metric {
            Metric {
                cycles: (glue.ending.graph.num_ops() + glue.starting.graph.num_ops()) as f64,
                sram_usage_bytes: 0,
            }
        }
    }
}
