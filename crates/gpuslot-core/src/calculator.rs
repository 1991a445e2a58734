//! Pluggable resource comparison and normalization strategies

use std::cmp::Ordering;

use crate::resource::{Resource, ResourceType};

/// Strategy for comparing, dividing and normalizing resources.
///
/// Ordering may depend on the cluster capacity, which is why most methods
/// take it as the first argument.
pub trait ResourceCalculator: Send + Sync {
    /// Order two resources relative to the cluster capacity
    fn compare(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> Ordering;

    /// How many `required` containers fit into `available`
    fn compute_available_containers(&self, available: &Resource, required: &Resource) -> i64;

    /// Ratio of `lhs` to `rhs` relative to the cluster capacity
    fn divide(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> f64;

    /// Whether `divisor` has a zero in a dimension this calculator divides by
    fn is_invalid_divisor(&self, divisor: &Resource) -> bool;

    /// Ratio of `lhs` to `rhs`, ignoring cluster capacity
    fn ratio(&self, lhs: &Resource, rhs: &Resource) -> f64;

    /// Get the calculator name
    fn name(&self) -> &'static str;

    /// Divide every dimension by `divisor`, rounding up
    fn divide_and_ceil(&self, resource: &Resource, divisor: i64) -> Resource {
        Resource::new(
            divide_and_ceil(resource.memory, divisor),
            divide_and_ceil(resource.vcores as i64, divisor) as i32,
            divide_and_ceil(resource.gpu_memory, divisor),
        )
    }

    /// Raise each dimension to at least `min`, round it up to a multiple of
    /// `increment`, then cap it at `max`.
    fn normalize(
        &self,
        resource: &Resource,
        min: &Resource,
        max: &Resource,
        increment: &Resource,
    ) -> Resource {
        let dim = |kind: ResourceType| {
            let raised = resource.get(kind).max(min.get(kind));
            round_up(raised, increment.get(kind)).min(max.get(kind))
        };
        Resource::new(
            dim(ResourceType::Memory),
            dim(ResourceType::Cpu) as i32,
            dim(ResourceType::GpuMemory),
        )
    }

    /// Round every dimension up to a multiple of `step`
    fn round_up(&self, resource: &Resource, step: &Resource) -> Resource {
        Resource::new(
            round_up(resource.memory, step.memory),
            round_up(resource.vcores as i64, step.vcores as i64) as i32,
            round_up(resource.gpu_memory, step.gpu_memory),
        )
    }

    /// Round every dimension down to a multiple of `step`
    fn round_down(&self, resource: &Resource, step: &Resource) -> Resource {
        Resource::new(
            round_down(resource.memory, step.memory),
            round_down(resource.vcores as i64, step.vcores as i64) as i32,
            round_down(resource.gpu_memory, step.gpu_memory),
        )
    }

    /// Multiply, then round up to a multiple of `step`
    fn multiply_and_normalize_up(&self, resource: &Resource, by: f64, step: &Resource) -> Resource {
        let scaled = Resource::new(
            (resource.memory as f64 * by).ceil() as i64,
            (resource.vcores as f64 * by).ceil() as i32,
            (resource.gpu_memory as f64 * by).ceil() as i64,
        );
        self.round_up(&scaled, step)
    }

    /// Multiply, then round down to a multiple of `step`
    fn multiply_and_normalize_down(
        &self,
        resource: &Resource,
        by: f64,
        step: &Resource,
    ) -> Resource {
        self.round_down(&resource.multiply_and_round_down(by), step)
    }

    fn less_than(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> bool {
        self.compare(cluster, lhs, rhs) == Ordering::Less
    }

    fn less_than_or_equal(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> bool {
        self.compare(cluster, lhs, rhs) != Ordering::Greater
    }

    fn greater_than(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> bool {
        self.compare(cluster, lhs, rhs) == Ordering::Greater
    }

    fn greater_than_or_equal(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> bool {
        self.compare(cluster, lhs, rhs) != Ordering::Less
    }

    /// The smaller of two resources under this calculator's ordering
    fn min(&self, cluster: &Resource, lhs: Resource, rhs: Resource) -> Resource {
        if self.less_than_or_equal(cluster, &lhs, &rhs) {
            lhs
        } else {
            rhs
        }
    }

    /// The larger of two resources under this calculator's ordering
    fn max(&self, cluster: &Resource, lhs: Resource, rhs: Resource) -> Resource {
        if self.greater_than_or_equal(cluster, &lhs, &rhs) {
            lhs
        } else {
            rhs
        }
    }
}

fn round_up(value: i64, step: i64) -> i64 {
    if step == 0 {
        return value;
    }
    divide_and_ceil(value, step).saturating_mul(step)
}

fn round_down(value: i64, step: i64) -> i64 {
    if step == 0 {
        return value;
    }
    value.div_euclid(step) * step
}

fn divide_and_ceil(value: i64, divisor: i64) -> i64 {
    if divisor == 0 {
        return 0;
    }
    let quotient = value / divisor;
    if value % divisor != 0 && (value > 0) == (divisor > 0) {
        quotient + 1
    } else {
        quotient
    }
}

/// Share of `value` in `total`, treating an empty total as no share.
fn share(value: i64, total: i64) -> f64 {
    if total == 0 {
        0.0
    } else {
        value as f64 / total as f64
    }
}

/// Calculator that only looks at memory
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResourceCalculator;

impl ResourceCalculator for DefaultResourceCalculator {
    fn compare(&self, _cluster: &Resource, lhs: &Resource, rhs: &Resource) -> Ordering {
        lhs.memory.cmp(&rhs.memory)
    }

    fn compute_available_containers(&self, available: &Resource, required: &Resource) -> i64 {
        if required.memory == 0 {
            return i64::MAX;
        }
        available.memory / required.memory
    }

    fn divide(&self, _cluster: &Resource, lhs: &Resource, rhs: &Resource) -> f64 {
        self.ratio(lhs, rhs)
    }

    fn is_invalid_divisor(&self, divisor: &Resource) -> bool {
        divisor.memory == 0
    }

    fn ratio(&self, lhs: &Resource, rhs: &Resource) -> f64 {
        lhs.memory as f64 / rhs.memory as f64
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Calculator that orders resources by their dominant share of the cluster
/// across all three dimensions, falling back to the next-highest share on
/// ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct DominantResourceCalculator;

impl DominantResourceCalculator {
    /// Shares of the cluster per dimension, sorted descending
    fn sorted_shares(cluster: &Resource, resource: &Resource) -> [f64; 3] {
        let mut shares = ResourceType::ALL.map(|kind| share(resource.get(kind), cluster.get(kind)));
        shares.sort_by(|a, b| b.total_cmp(a));
        shares
    }

    fn dominant_share(cluster: &Resource, resource: &Resource) -> f64 {
        Self::sorted_shares(cluster, resource)[0]
    }
}

impl ResourceCalculator for DominantResourceCalculator {
    fn compare(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> Ordering {
        if lhs == rhs {
            return Ordering::Equal;
        }
        let l = Self::sorted_shares(cluster, lhs);
        let r = Self::sorted_shares(cluster, rhs);
        l.iter()
            .zip(r.iter())
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    fn compute_available_containers(&self, available: &Resource, required: &Resource) -> i64 {
        ResourceType::ALL
            .iter()
            .filter(|kind| required.get(**kind) != 0)
            .map(|kind| available.get(*kind) / required.get(*kind))
            .min()
            .unwrap_or(i64::MAX)
    }

    fn divide(&self, cluster: &Resource, lhs: &Resource, rhs: &Resource) -> f64 {
        let l = Self::dominant_share(cluster, lhs);
        let r = Self::dominant_share(cluster, rhs);
        if r == 0.0 {
            return if l == 0.0 { 0.0 } else { f64::INFINITY };
        }
        l / r
    }

    fn is_invalid_divisor(&self, divisor: &Resource) -> bool {
        ResourceType::ALL.iter().any(|kind| divisor.get(*kind) == 0)
    }

    fn ratio(&self, lhs: &Resource, rhs: &Resource) -> f64 {
        ResourceType::ALL
            .iter()
            .filter(|kind| rhs.get(**kind) != 0)
            .map(|kind| lhs.get(*kind) as f64 / rhs.get(*kind) as f64)
            .fold(0.0, f64::max)
    }

    fn name(&self) -> &'static str {
        "dominant"
    }
}
