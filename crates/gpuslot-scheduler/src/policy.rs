//! Admission policies for reservation plans

use gpuslot_core::{GpuslotError, GpuslotResult, Resource, SharingPolicyConfig};
use std::sync::Arc;

use crate::curve::ResourceCurve;
use crate::reservation::ReservationAllocation;

/// What a policy sees when a reservation is proposed.
///
/// Both curves already include the proposal and exclude any previous
/// version of it.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionContext<'a> {
    /// The proposed reservation
    pub reservation: &'a ReservationAllocation,
    /// Candidate total demand of the plan
    pub aggregate: &'a ResourceCurve,
    /// Candidate total demand of the proposing user
    pub user_aggregate: &'a ResourceCurve,
    /// Queue capacity
    pub capacity: Resource,
}

/// Decides whether a plan may take on a reservation
pub trait SharingPolicy: Send + Sync {
    /// Policy name
    fn name(&self) -> &'static str;

    /// Accept the proposal or explain why not
    fn validate(&self, context: &AdmissionContext<'_>) -> GpuslotResult<()>;
}

/// Rejects a reservation only if total demand exceeds capacity at some instant
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOverCommitPolicy;

impl SharingPolicy for NoOverCommitPolicy {
    fn name(&self) -> &'static str {
        "no-over-commit"
    }

    fn validate(&self, context: &AdmissionContext<'_>) -> GpuslotResult<()> {
        check_curve(context.reservation, context.aggregate, &context.capacity)
    }
}

/// No over-commit, and no single user above a fraction of capacity
#[derive(Debug, Clone, Copy)]
pub struct UserShareCapPolicy {
    max_share: f64,
}

impl UserShareCapPolicy {
    /// `max_share` is clamped to `[0, 1]`
    pub fn new(max_share: f64) -> Self {
        Self {
            max_share: max_share.clamp(0.0, 1.0),
        }
    }

    /// Per-user limit for a given capacity
    pub fn user_limit(&self, capacity: &Resource) -> Resource {
        capacity.multiply_and_round_down(self.max_share)
    }
}

impl SharingPolicy for UserShareCapPolicy {
    fn name(&self) -> &'static str {
        "user-share-cap"
    }

    fn validate(&self, context: &AdmissionContext<'_>) -> GpuslotResult<()> {
        NoOverCommitPolicy.validate(context)?;
        let limit = self.user_limit(&context.capacity);
        check_curve(context.reservation, context.user_aggregate, &limit)
    }
}

/// Build the policy selected in configuration
pub fn policy_from_config(config: &SharingPolicyConfig) -> Arc<dyn SharingPolicy> {
    match config {
        SharingPolicyConfig::NoOverCommit => Arc::new(NoOverCommitPolicy),
        SharingPolicyConfig::UserShareCap { max_share } => {
            Arc::new(UserShareCapPolicy::new(*max_share))
        }
    }
}

/// First instant in the reservation window where `curve` does not fit in `limit`
fn check_curve(
    reservation: &ReservationAllocation,
    curve: &ResourceCurve,
    limit: &Resource,
) -> GpuslotResult<()> {
    let violation = curve
        .range(reservation.start_time, reservation.end_time)
        .find(|(_, demand)| !demand.fits_in(limit));

    match violation {
        Some((instant, demand)) => Err(GpuslotError::CapacityViolation {
            reservation_id: reservation.id.to_string(),
            instant,
            demand,
            capacity: *limit,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reservation::ReservationId;

    const STEP: i64 = 1000;

    fn reservation(user: &str, demand: Resource) -> (ReservationAllocation, ResourceCurve) {
        let r = ReservationAllocation::new(
            ReservationId::new(),
            user,
            "dedicated",
            0,
            3 * STEP,
            ReservationAllocation::steps(0, STEP, &[demand; 3]),
        );
        let curve = r.curve(STEP);
        (r, curve)
    }

    #[test]
    fn test_no_over_commit() {
        let capacity = Resource::new(100, 10, 10);
        let (fits, curve) = reservation("u1", Resource::new(100, 10, 10));
        let context = AdmissionContext {
            reservation: &fits,
            aggregate: &curve,
            user_aggregate: &curve,
            capacity,
        };
        assert!(NoOverCommitPolicy.validate(&context).is_ok());

        let (over, curve) = reservation("u1", Resource::new(100, 11, 10));
        let context = AdmissionContext {
            reservation: &over,
            aggregate: &curve,
            user_aggregate: &curve,
            capacity,
        };
        match NoOverCommitPolicy.validate(&context).unwrap_err() {
            GpuslotError::CapacityViolation {
                instant, capacity: limit, ..
            } => {
                assert_eq!(instant, 0);
                assert_eq!(limit, capacity);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_user_share_cap() {
        let capacity = Resource::new(100, 10, 10);
        let policy = UserShareCapPolicy::new(0.5);
        assert_eq!(policy.user_limit(&capacity), Resource::new(50, 5, 5));

        let (r, user_curve) = reservation("u1", Resource::new(60, 1, 1));
        let aggregate = user_curve.clone();
        let context = AdmissionContext {
            reservation: &r,
            aggregate: &aggregate,
            user_aggregate: &user_curve,
            capacity,
        };
        assert!(NoOverCommitPolicy.validate(&context).is_ok());
        let err = policy.validate(&context).unwrap_err();
        assert!(err.is_capacity_violation());
    }

    #[test]
    fn test_policy_from_config() {
        assert_eq!(
            policy_from_config(&SharingPolicyConfig::NoOverCommit).name(),
            "no-over-commit"
        );
        assert_eq!(
            policy_from_config(&SharingPolicyConfig::UserShareCap { max_share: 0.3 }).name(),
            "user-share-cap"
        );
    }

    #[test]
    fn test_share_is_clamped() {
        let policy = UserShareCapPolicy::new(3.0);
        let capacity = Resource::new(10, 10, 10);
        assert_eq!(policy.user_limit(&capacity), capacity);
    }
}
