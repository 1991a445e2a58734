//! gpuslot-scheduler: Fair ordering, placement and reservation admission
//!
//! This crate provides the decision logic on top of live device data:
//! - Dominant Resource Fairness ordering of schedulables
//! - GPU device placement
//! - Time-indexed reservation plans with pluggable admission policies

pub mod curve;
pub mod fairness;
pub mod placement;
pub mod plan;
pub mod policy;
pub mod reservation;

pub use curve::ResourceCurve;
pub use fairness::{
    DimensionShares, DominantResourceFairness, ResourceWeights, Schedulable, SchedulingPolicy,
};
pub use placement::{LeastUtilizedPlacement, PlacementDecision, PlacementStrategy};
pub use plan::Plan;
pub use policy::{
    policy_from_config, AdmissionContext, NoOverCommitPolicy, SharingPolicy, UserShareCapPolicy,
};
pub use reservation::{
    ReservationAllocation, ReservationId, ReservationInterval, ReservationState,
};
