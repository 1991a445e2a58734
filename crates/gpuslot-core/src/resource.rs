//! Three-dimensional resource vector and arithmetic helpers

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// A resource dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    /// Host memory in MiB
    Memory,
    /// Virtual cores (cpu shares)
    Cpu,
    /// GPU memory in MiB
    GpuMemory,
}

impl ResourceType {
    /// All dimensions in canonical order
    pub const ALL: [ResourceType; 3] = [
        ResourceType::Memory,
        ResourceType::Cpu,
        ResourceType::GpuMemory,
    ];
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Memory => write!(f, "memory"),
            ResourceType::Cpu => write!(f, "vCores"),
            ResourceType::GpuMemory => write!(f, "gpuMemory"),
        }
    }
}

/// Resource vector: memory, virtual cores and GPU memory.
///
/// `Resource` is `Copy`, so every operation works on an owned value and the
/// named sentinels [`Resource::NONE`] and [`Resource::UNBOUNDED`] can never be
/// mutated through a shared reference. Arithmetic saturates instead of
/// wrapping so that adding to `UNBOUNDED` stays unbounded.
///
/// `(a + b) - b == a` holds whenever `a + b` does not saturate. Once a
/// component has clamped at its bound the lost amount is not recovered, so
/// `(UNBOUNDED + b) - b` is `UNBOUNDED - b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resource {
    /// Memory in MiB
    pub memory: i64,
    /// Virtual cores
    pub vcores: i32,
    /// GPU memory in MiB
    #[serde(default)]
    pub gpu_memory: i64,
}

impl Resource {
    /// The empty resource
    pub const NONE: Resource = Resource {
        memory: 0,
        vcores: 0,
        gpu_memory: 0,
    };

    /// The largest representable resource
    pub const UNBOUNDED: Resource = Resource {
        memory: i64::MAX,
        vcores: i32::MAX,
        gpu_memory: i64::MAX,
    };

    /// Create a new resource vector
    pub const fn new(memory: i64, vcores: i32, gpu_memory: i64) -> Self {
        Self {
            memory,
            vcores,
            gpu_memory,
        }
    }

    /// Memory-and-GPU constructor; a non-zero memory request implies one core.
    pub const fn with_memory(memory: i64, gpu_memory: i64) -> Self {
        Self::new(memory, if memory > 0 { 1 } else { 0 }, gpu_memory)
    }

    /// Value of a single dimension
    pub fn get(&self, kind: ResourceType) -> i64 {
        match kind {
            ResourceType::Memory => self.memory,
            ResourceType::Cpu => self.vcores as i64,
            ResourceType::GpuMemory => self.gpu_memory,
        }
    }

    /// Whether every dimension is zero
    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }

    /// Add `rhs` into `self` in place
    pub fn add_to(&mut self, rhs: Resource) -> &mut Self {
        self.memory = self.memory.saturating_add(rhs.memory);
        self.vcores = self.vcores.saturating_add(rhs.vcores);
        self.gpu_memory = self.gpu_memory.saturating_add(rhs.gpu_memory);
        self
    }

    /// Subtract `rhs` from `self` in place
    pub fn subtract_from(&mut self, rhs: Resource) -> &mut Self {
        self.memory = self.memory.saturating_sub(rhs.memory);
        self.vcores = self.vcores.saturating_sub(rhs.vcores);
        self.gpu_memory = self.gpu_memory.saturating_sub(rhs.gpu_memory);
        self
    }

    /// Scale every dimension, truncating toward zero
    pub fn multiply(&self, by: f64) -> Resource {
        Resource::new(
            (self.memory as f64 * by) as i64,
            (self.vcores as f64 * by) as i32,
            (self.gpu_memory as f64 * by) as i64,
        )
    }

    /// Scale every dimension, rounding toward negative infinity
    pub fn multiply_and_round_down(&self, by: f64) -> Resource {
        Resource::new(
            (self.memory as f64 * by).floor() as i64,
            (self.vcores as f64 * by).floor() as i32,
            (self.gpu_memory as f64 * by).floor() as i64,
        )
    }

    /// Per-dimension minimum
    pub fn component_wise_min(&self, other: &Resource) -> Resource {
        Resource::new(
            self.memory.min(other.memory),
            self.vcores.min(other.vcores),
            self.gpu_memory.min(other.gpu_memory),
        )
    }

    /// Per-dimension maximum
    pub fn component_wise_max(&self, other: &Resource) -> Resource {
        Resource::new(
            self.memory.max(other.memory),
            self.vcores.max(other.vcores),
            self.gpu_memory.max(other.gpu_memory),
        )
    }

    /// True iff every dimension of `self` is at most the matching dimension of `bigger`
    pub fn fits_in(&self, bigger: &Resource) -> bool {
        fits_in(self, bigger)
    }
}

/// True iff every dimension of `smaller` is at most the matching dimension of `bigger`
pub fn fits_in(smaller: &Resource, bigger: &Resource) -> bool {
    smaller.memory <= bigger.memory
        && smaller.vcores <= bigger.vcores
        && smaller.gpu_memory <= bigger.gpu_memory
}

impl Add for Resource {
    type Output = Resource;

    fn add(mut self, rhs: Resource) -> Resource {
        self.add_to(rhs);
        self
    }
}

impl AddAssign for Resource {
    fn add_assign(&mut self, rhs: Resource) {
        self.add_to(rhs);
    }
}

impl Sub for Resource {
    type Output = Resource;

    fn sub(mut self, rhs: Resource) -> Resource {
        self.subtract_from(rhs);
        self
    }
}

impl SubAssign for Resource {
    fn sub_assign(&mut self, rhs: Resource) {
        self.subtract_from(rhs);
    }
}

impl Neg for Resource {
    type Output = Resource;

    fn neg(self) -> Resource {
        Resource::NONE - self
    }
}

impl std::iter::Sum for Resource {
    fn sum<I: Iterator<Item = Resource>>(iter: I) -> Resource {
        iter.fold(Resource::NONE, |acc, r| acc + r)
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<memory:{}, vCores:{}, gpuMemory:{}>",
            self.memory, self.vcores, self.gpu_memory
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_and_subtract() {
        let a = Resource::new(1024, 2, 256);
        let b = Resource::new(512, 1, 128);
        assert_eq!(a + b, Resource::new(1536, 3, 384));
        assert_eq!(a - b, Resource::new(512, 1, 128));
        assert_eq!(-b, Resource::new(-512, -1, -128));
    }

    #[test]
    fn test_in_place_forms() {
        let mut r = Resource::new(10, 1, 10);
        r.add_to(Resource::new(5, 1, 5)).subtract_from(Resource::new(1, 1, 1));
        assert_eq!(r, Resource::new(14, 1, 14));
    }

    #[test]
    fn test_sentinels_saturate() {
        let r = Resource::UNBOUNDED + Resource::new(1, 1, 1);
        assert_eq!(r, Resource::UNBOUNDED);
        assert!(Resource::NONE.is_none());
        assert!(Resource::NONE.fits_in(&Resource::UNBOUNDED));
    }

    #[test]
    fn test_saturated_sum_does_not_restore() {
        let one = Resource::new(1, 1, 1);
        let r = (Resource::UNBOUNDED + one) - one;
        assert_eq!(r, Resource::new(i64::MAX - 1, i32::MAX - 1, i64::MAX - 1));
        assert_eq!((Resource::UNBOUNDED - one) + one, Resource::UNBOUNDED);
    }

    #[test]
    fn test_with_memory_implies_core() {
        assert_eq!(Resource::with_memory(1024, 0).vcores, 1);
        assert_eq!(Resource::with_memory(0, 256).vcores, 0);
    }

    #[test]
    fn test_multiply() {
        let r = Resource::new(1000, 3, 255);
        assert_eq!(r.multiply(0.5), Resource::new(500, 1, 127));
        assert_eq!(r.multiply_and_round_down(0.5), Resource::new(500, 1, 127));
        assert_eq!(
            Resource::new(-3, -3, -3).multiply_and_round_down(0.5),
            Resource::new(-2, -2, -2)
        );
        assert_eq!(Resource::new(-3, -3, -3).multiply(0.5), Resource::new(-1, -1, -1));
    }

    #[test]
    fn test_component_wise() {
        let a = Resource::new(100, 4, 10);
        let b = Resource::new(50, 8, 20);
        assert_eq!(a.component_wise_min(&b), Resource::new(50, 4, 10));
        assert_eq!(a.component_wise_max(&b), Resource::new(100, 8, 20));
    }

    #[test]
    fn test_fits_in() {
        let small = Resource::new(100, 1, 10);
        let big = Resource::new(200, 2, 10);
        assert!(fits_in(&small, &big));
        assert!(!fits_in(&big, &small));
        assert!(!Resource::new(100, 3, 0).fits_in(&big));
    }

    #[test]
    fn test_get_by_type() {
        let r = Resource::new(1, 2, 3);
        let values: Vec<i64> = ResourceType::ALL.iter().map(|t| r.get(*t)).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_sum() {
        let total: Resource = vec![Resource::new(1, 1, 1), Resource::new(2, 2, 2)]
            .into_iter()
            .sum();
        assert_eq!(total, Resource::new(3, 3, 3));
    }

    fn resource() -> impl Strategy<Value = Resource> {
        (0i64..1 << 40, 0i32..1 << 20, 0i64..1 << 40)
            .prop_map(|(m, c, g)| Resource::new(m, c, g))
    }

    proptest! {
        #[test]
        fn add_then_subtract_is_identity(a in resource(), b in resource()) {
            prop_assert_eq!((a + b) - b, a);
        }

        #[test]
        fn resource_fits_in_itself(a in resource()) {
            prop_assert!(fits_in(&a, &a));
        }

        #[test]
        fn component_wise_min_fits_in_both(a in resource(), b in resource()) {
            let min = a.component_wise_min(&b);
            prop_assert!(min.fits_in(&a));
            prop_assert!(min.fits_in(&b));
        }
    }
}
