//! Dominant Resource Fairness ordering
//!
//! `compare(a, b) == Less` means `a` should receive the next unit of
//! resource before `b`.

use gpuslot_core::{Resource, ResourceType};
use std::cmp::Ordering;

/// Something that competes for cluster resources
pub trait Schedulable {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Resources currently held
    fn resource_usage(&self) -> Resource;

    /// Guaranteed minimum; usage below it makes the entity needy
    fn min_share(&self) -> Resource;

    /// Per-dimension weights applied to usage
    fn weights(&self) -> ResourceWeights {
        ResourceWeights::NEUTRAL
    }
}

/// Per-dimension scheduling weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceWeights {
    weights: [f64; 3],
}

impl ResourceWeights {
    /// Weight 1.0 on every dimension
    pub const NEUTRAL: ResourceWeights = ResourceWeights::uniform(1.0);

    /// Same weight on every dimension
    pub const fn uniform(weight: f64) -> Self {
        Self {
            weights: [weight; 3],
        }
    }

    /// Separate memory, cpu and GPU memory weights
    pub const fn new(memory: f64, cpu: f64, gpu_memory: f64) -> Self {
        Self {
            weights: [memory, cpu, gpu_memory],
        }
    }

    /// Weight of one dimension
    pub fn weight(&self, kind: ResourceType) -> f64 {
        self.weights[index(kind)]
    }

    /// Set the weight of one dimension
    pub fn set_weight(&mut self, kind: ResourceType, weight: f64) {
        self.weights[index(kind)] = weight;
    }
}

impl Default for ResourceWeights {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

fn index(kind: ResourceType) -> usize {
    match kind {
        ResourceType::Memory => 0,
        ResourceType::Cpu => 1,
        ResourceType::GpuMemory => 2,
    }
}

/// Ordering policy over schedulables
pub trait SchedulingPolicy: Send + Sync {
    /// Policy name
    fn name(&self) -> &'static str;

    /// Which of two schedulables should be served first
    fn compare(&self, lhs: &dyn Schedulable, rhs: &dyn Schedulable) -> Ordering;
}

/// Weighted per-dimension shares, highest share first
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionShares {
    shares: Vec<(ResourceType, f64)>,
}

impl DimensionShares {
    /// Dimensions ordered by descending share
    pub fn order(&self) -> Vec<ResourceType> {
        self.shares.iter().map(|(kind, _)| *kind).collect()
    }

    /// Share of one dimension, if it was considered
    pub fn share(&self, kind: ResourceType) -> Option<f64> {
        self.shares
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, share)| *share)
    }

    /// The dimension with the highest share and that share
    pub fn dominant(&self) -> Option<(ResourceType, f64)> {
        self.shares.first().copied()
    }

    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.shares.iter().map(|(_, share)| *share)
    }
}

/// Everything the comparator needs to know about one schedulable
#[derive(Debug)]
struct FairnessKey {
    /// Usage over min share, permuted into cluster-share order
    needy_ratios: Option<Vec<f64>>,
    cluster: DimensionShares,
}

/// Dominant Resource Fairness comparator for one cluster capacity.
///
/// Each schedulable is reduced to its weighted cluster shares sorted in
/// descending order. A schedulable is needy when its usage on its dominant
/// dimension is below its min share. Needy schedulables come first and are
/// ordered by how far below their min share they are; everything else is
/// ordered by dominant share, then by the next-highest share and so on.
/// The ordering is a total preorder, so it can be used directly as a sort key.
#[derive(Debug, Clone)]
pub struct DominantResourceFairness {
    capacity: Resource,
    dimensions: Vec<ResourceType>,
}

impl DominantResourceFairness {
    /// Comparator over all dimensions
    pub fn new(capacity: Resource) -> Self {
        Self::with_dimensions(capacity, &ResourceType::ALL)
    }

    /// Comparator restricted to `dimensions`, e.g. memory and cpu only
    pub fn with_dimensions(capacity: Resource, dimensions: &[ResourceType]) -> Self {
        let mut dims: Vec<ResourceType> = Vec::with_capacity(dimensions.len());
        for kind in dimensions {
            if !dims.contains(kind) {
                dims.push(*kind);
            }
        }
        Self {
            capacity,
            dimensions: dims,
        }
    }

    /// Cluster capacity shares are computed against
    pub fn capacity(&self) -> Resource {
        self.capacity
    }

    /// Replace the cluster capacity, e.g. after nodes join or leave
    pub fn set_capacity(&mut self, capacity: Resource) {
        self.capacity = capacity;
    }

    /// Dimensions taken into account
    pub fn dimensions(&self) -> &[ResourceType] {
        &self.dimensions
    }

    /// Weighted share of `usage` in `capacity` for every considered dimension.
    ///
    /// A zero weight yields an infinite share. A zero capacity yields no share
    /// unless there is usage, in which case the share is infinite. Equal shares
    /// keep the canonical dimension order.
    pub fn calculate_shares(
        &self,
        usage: &Resource,
        capacity: &Resource,
        weights: &ResourceWeights,
    ) -> DimensionShares {
        let mut shares: Vec<(ResourceType, f64)> = self
            .dimensions
            .iter()
            .map(|kind| {
                let share = weighted_share(
                    usage.get(*kind),
                    capacity.get(*kind),
                    weights.weight(*kind),
                );
                (*kind, share)
            })
            .collect();
        shares.sort_by(|a, b| b.1.total_cmp(&a.1));
        DimensionShares { shares }
    }

    fn key(&self, schedulable: &dyn Schedulable) -> FairnessKey {
        let usage = schedulable.resource_usage();
        let min_share = schedulable.min_share();
        let cluster = self.calculate_shares(&usage, &self.capacity, &schedulable.weights());

        let ratios: Vec<f64> = cluster
            .order()
            .into_iter()
            .map(|kind| min_share_ratio(usage.get(kind), min_share.get(kind)))
            .collect();
        let needy = ratios.first().map_or(false, |dominant| *dominant < 1.0);

        FairnessKey {
            needy_ratios: needy.then_some(ratios),
            cluster,
        }
    }

    fn compare_keys(lhs: &FairnessKey, rhs: &FairnessKey) -> Ordering {
        match (&lhs.needy_ratios, &rhs.needy_ratios) {
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(l), Some(r)) => compare_vectors(l.iter().copied(), r.iter().copied())
                .then_with(|| compare_vectors(lhs.cluster.values(), rhs.cluster.values())),
            (None, None) => compare_vectors(lhs.cluster.values(), rhs.cluster.values()),
        }
    }

    /// Stable sort, most deserving first; full ties keep arrival order
    pub fn sort_schedulables<S: Schedulable>(&self, schedulables: &mut [S]) {
        let keys: Vec<FairnessKey> = schedulables.iter().map(|s| self.key(s)).collect();
        let mut order: Vec<usize> = (0..schedulables.len()).collect();
        order.sort_by(|a, b| Self::compare_keys(&keys[*a], &keys[*b]));
        apply_permutation(schedulables, order);
    }
}

impl SchedulingPolicy for DominantResourceFairness {
    fn name(&self) -> &'static str {
        "drf"
    }

    fn compare(&self, lhs: &dyn Schedulable, rhs: &dyn Schedulable) -> Ordering {
        Self::compare_keys(&self.key(lhs), &self.key(rhs))
    }
}

fn weighted_share(usage: i64, capacity: i64, weight: f64) -> f64 {
    if weight <= 0.0 {
        return f64::INFINITY;
    }
    if capacity == 0 {
        return if usage > 0 { f64::INFINITY } else { 0.0 };
    }
    usage as f64 / weight / capacity as f64
}

fn min_share_ratio(usage: i64, min_share: i64) -> f64 {
    if min_share <= 0 {
        f64::INFINITY
    } else {
        usage as f64 / min_share as f64
    }
}

fn compare_vectors(lhs: impl Iterator<Item = f64>, rhs: impl Iterator<Item = f64>) -> Ordering {
    for (l, r) in lhs.zip(rhs) {
        match l.total_cmp(&r) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Reorder `items` so that position `i` holds the element previously at `order[i]`
fn apply_permutation<T>(items: &mut [T], order: Vec<usize>) {
    let mut target: Vec<usize> = vec![0; order.len()];
    for (position, source) in order.into_iter().enumerate() {
        target[source] = position;
    }
    for i in 0..items.len() {
        while target[i] != i {
            let j = target[i];
            items.swap(i, j);
            target.swap(i, j);
        }
    }
}
