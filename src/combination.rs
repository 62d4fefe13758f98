//! A `Combination` is a partial assignment of plans (and the glue stitching them
//! together) to a contiguous run of parts, plus its accumulated cost. The tail dynamic
//! program (§4.5 phase 3) builds these bottom-up: a combination for parts `[i, n)` is
//! formed by picking one section starting at `i` and gluing it to the combination
//! already computed for parts `[i + section_len, n)`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::glue::Glue;
use crate::part::{PartId, Slot};
use crate::plan::Plan;

/// The metric a combination is ranked by. Lower is better; the driver never inspects
/// the components, only sums and compares totals, so the estimator is free to weight
/// them however the target hardware needs.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Metric {
    pub cycles: f64,
    pub sram_usage_bytes: u64,
}

impl Metric {
    pub fn combine(self, other: Metric) -> Metric {
        Metric {
            cycles: self.cycles + other.cycles,
            sram_usage_bytes: self.sram_usage_bytes.max(other.sram_usage_bytes),
        }
    }
}

impl PartialOrd for Metric {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.cycles.partial_cmp(&other.cycles)
    }
}

/// A partial (or complete) assignment of plans to parts, with the glue needed at every
/// boundary it has decided. `Combination::invalid()` is the dynamic program's
/// representation of "no assignment exists here"; it combines as an absorbing element
/// so a single unreachable part poisons only the combinations that route through it.
#[derive(Debug, Clone)]
pub struct Combination {
    plans: HashMap<PartId, Arc<Plan>>,
    glue: HashMap<Slot, Arc<Glue>>,
    metric: Metric,
    valid: bool,
}

impl Combination {
    pub fn empty() -> Self {
        Self {
            plans: HashMap::new(),
            glue: HashMap::new(),
            metric: Metric::default(),
            valid: true,
        }
    }

    pub fn invalid() -> Self {
        Self {
            plans: HashMap::new(),
            glue: HashMap::new(),
            metric: Metric::default(),
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn with_plan(mut self, part: PartId, plan: Arc<Plan>, cost: Metric) -> Self {
        if !self.valid {
            return self;
        }
        self.metric = self.metric.combine(cost);
        self.plans.insert(part, plan);
        self
    }

    pub fn with_glue(mut self, boundary: Slot, glue: Arc<Glue>) -> Self {
        if !self.valid {
            return self;
        }
        self.glue.insert(boundary, glue);
        self
    }

    /// Fold an extra cost into this combination's metric without attributing it to any
    /// part's plan. Used for glue: it has a real cost (the ops it adds) but is not
    /// itself a plan, so it has no `PartId` to key off of in `with_plan`.
    pub fn with_cost(mut self, cost: Metric) -> Self {
        if !self.valid {
            return self;
        }
        self.metric = self.metric.combine(cost);
        self
    }

    pub fn plan(&self, part: PartId) -> Option<&Arc<Plan>> {
        self.plans.get(&part)
    }

    pub fn glue_at(&self, boundary: Slot) -> Option<&Arc<Glue>> {
        self.glue.get(&boundary)
    }

    pub fn parts(&self) -> impl Iterator<Item = PartId> + '_ {
        self.plans.keys().copied()
    }

    /// Concatenate two non-overlapping combinations (L1: associative, L2: `empty()` is
    /// the identity). The result is invalid if either input is, or if the two disagree
    /// on a part they both cover.
    pub fn concat(mut self, other: Combination) -> Combination {
        if !self.valid || !other.valid {
            return Combination::invalid();
        }
        for part in other.plans.keys() {
            if self.plans.contains_key(part) {
                return Combination::invalid();
            }
        }
        self.metric = self.metric.combine(other.metric);
        self.plans.extend(other.plans);
        self.glue.extend(other.glue);
        self
    }
}

impl std::ops::Add for Combination {
    type Output = Combination;

    fn add(self, rhs: Combination) -> Combination {
        self.concat(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_absorbing() {
        let valid = Combination::empty();
        let combined = valid + Combination::invalid();
        assert!(!combined.is_valid());
    }

    #[test]
    fn empty_is_identity_for_concat() {
        let a = Combination::empty();
        let metric_before = a.metric();
        let combined = a.concat(Combination::empty());
        assert!(combined.is_valid());
        assert_eq!(combined.metric(), metric_before);
    }

    #[test]
    fn metric_combine_sums_cycles_and_takes_max_sram() {
        let a = Metric {
            cycles: 10.0,
            sram_usage_bytes: 100,
        };
        let b = Metric {
            cycles: 5.0,
            sram_usage_bytes: 200,
        };
        let combined = a.combine(b);
        assert_eq!(combined.cycles, 15.0);
        assert_eq!(combined.sram_usage_bytes, 200);
    }
}
