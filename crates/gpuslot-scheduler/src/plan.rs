//! Reservation plan with admission control

use gpuslot_core::{GpuslotError, GpuslotResult, PlanConfig, Resource};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::curve::ResourceCurve;
use crate::policy::{policy_from_config, AdmissionContext, SharingPolicy};
use crate::reservation::{ReservationAllocation, ReservationId, ReservationState};

struct Admitted {
    allocation: ReservationAllocation,
    curve: ResourceCurve,
}

struct PlanState {
    reservations: HashMap<ReservationId, Admitted>,
    /// Sum of all admitted curves
    aggregate: ResourceCurve,
    /// Sum of admitted curves per user
    per_user: HashMap<String, ResourceCurve>,
}

impl PlanState {
    fn user_curve(&self, user: &str, step: i64) -> ResourceCurve {
        self.per_user
            .get(user)
            .cloned()
            .unwrap_or_else(|| ResourceCurve::new(step))
    }

    fn store_user_curve(&mut self, user: &str, curve: ResourceCurve) {
        if curve.is_empty() {
            self.per_user.remove(user);
        } else {
            self.per_user.insert(user.to_string(), curve);
        }
    }

    fn remove(&mut self, id: &ReservationId, step: i64) -> Option<ReservationAllocation> {
        let admitted = self.reservations.remove(id)?;
        self.aggregate.subtract(&admitted.curve);
        let mut user_curve = self.user_curve(&admitted.allocation.user, step);
        user_curve.subtract(&admitted.curve);
        self.store_user_curve(&admitted.allocation.user, user_curve);
        Some(admitted.allocation)
    }
}

/// Accepted reservations of one queue and their total demand over time.
///
/// Every mutation runs the sharing policy against the candidate total and is
/// applied only if the policy accepts it, so the plan never holds a rejected
/// reservation. Mutations and the admission check run under one write lock.
pub struct Plan {
    queue_name: String,
    step: i64,
    capacity: Resource,
    policy: Arc<dyn SharingPolicy>,
    state: RwLock<PlanState>,
}

impl Plan {
    /// Create an empty plan
    pub fn new(
        queue_name: impl Into<String>,
        step: i64,
        capacity: Resource,
        policy: Arc<dyn SharingPolicy>,
    ) -> GpuslotResult<Self> {
        if step <= 0 {
            return Err(GpuslotError::Config(format!(
                "plan step must be positive, got {}",
                step
            )));
        }
        let queue_name = queue_name.into();

        info!(
            queue = %queue_name,
            step_ms = step,
            capacity = %capacity,
            policy = policy.name(),
            "Plan initialized"
        );

        Ok(Self {
            queue_name,
            step,
            capacity,
            policy,
            state: RwLock::new(PlanState {
                reservations: HashMap::new(),
                aggregate: ResourceCurve::new(step),
                per_user: HashMap::new(),
            }),
        })
    }

    /// Create a plan from configuration
    pub fn from_config(config: &PlanConfig) -> GpuslotResult<Self> {
        Self::new(
            config.queue_name.clone(),
            config.step_ms,
            config.capacity,
            policy_from_config(&config.policy),
        )
    }

    /// Queue this plan admits reservations for
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Curve sampling step in milliseconds
    pub fn step(&self) -> i64 {
        self.step
    }

    /// Queue capacity
    pub fn capacity(&self) -> Resource {
        self.capacity
    }

    fn check_shape(&self, allocation: &ReservationAllocation) -> GpuslotResult<()> {
        if allocation.queue_name != self.queue_name {
            return Err(GpuslotError::InvalidReservation(format!(
                "{} targets queue {}, plan serves {}",
                allocation.id, allocation.queue_name, self.queue_name
            )));
        }
        allocation.validate()
    }

    /// Admit a new reservation, or leave the plan unchanged
    pub async fn add_reservation(&self, allocation: ReservationAllocation) -> GpuslotResult<()> {
        self.check_shape(&allocation)?;
        let curve = allocation.curve(self.step);

        let mut state = self.state.write().await;
        if state.reservations.contains_key(&allocation.id) {
            return Err(GpuslotError::DuplicateReservation(allocation.id.to_string()));
        }

        let mut aggregate = state.aggregate.clone();
        aggregate.add(&curve);
        let mut user_aggregate = state.user_curve(&allocation.user, self.step);
        user_aggregate.add(&curve);

        self.admit(&allocation, &aggregate, &user_aggregate)?;

        info!(
            reservation = %allocation.id,
            user = %allocation.user,
            queue = %self.queue_name,
            start = allocation.start_time,
            end = allocation.end_time,
            "Reservation admitted"
        );

        state.aggregate = aggregate;
        state.store_user_curve(&allocation.user, user_aggregate);
        state
            .reservations
            .insert(allocation.id, Admitted { allocation, curve });
        Ok(())
    }

    /// Replace a reservation owned by the same user.
    ///
    /// The new version goes through admission with the old one taken out; if
    /// it is rejected the old version stays in force.
    pub async fn update_reservation(&self, allocation: ReservationAllocation) -> GpuslotResult<()> {
        self.check_shape(&allocation)?;
        let curve = allocation.curve(self.step);

        let mut state = self.state.write().await;
        let previous = state
            .reservations
            .get(&allocation.id)
            .ok_or_else(|| GpuslotError::ReservationNotFound(allocation.id.to_string()))?;
        check_owner(&previous.allocation, &allocation.user)?;

        let mut aggregate = state.aggregate.clone();
        aggregate.subtract(&previous.curve);
        aggregate.add(&curve);
        let mut user_aggregate = state.user_curve(&allocation.user, self.step);
        user_aggregate.subtract(&previous.curve);
        user_aggregate.add(&curve);

        self.admit(&allocation, &aggregate, &user_aggregate)?;

        info!(
            reservation = %allocation.id,
            user = %allocation.user,
            start = allocation.start_time,
            end = allocation.end_time,
            "Reservation updated"
        );

        state.aggregate = aggregate;
        state.store_user_curve(&allocation.user, user_aggregate);
        state
            .reservations
            .insert(allocation.id, Admitted { allocation, curve });
        Ok(())
    }

    /// Remove a reservation on behalf of its owner
    pub async fn delete_reservation(
        &self,
        id: &ReservationId,
        user: &str,
    ) -> GpuslotResult<ReservationAllocation> {
        let mut state = self.state.write().await;
        let existing = state
            .reservations
            .get(id)
            .ok_or_else(|| GpuslotError::ReservationNotFound(id.to_string()))?;
        check_owner(&existing.allocation, user)?;

        let removed = state
            .remove(id, self.step)
            .ok_or_else(|| GpuslotError::ReservationNotFound(id.to_string()))?;
        info!(reservation = %id, user = %user, "Reservation deleted");
        Ok(removed)
    }

    /// Drop every reservation that ended at or before `now`
    pub async fn archive_completed_reservations(&self, now: i64) -> Vec<ReservationId> {
        let mut state = self.state.write().await;
        let completed: Vec<ReservationId> = state
            .reservations
            .values()
            .filter(|r| r.allocation.state_at(now) == ReservationState::Completed)
            .map(|r| r.allocation.id)
            .collect();

        for id in &completed {
            state.remove(id, self.step);
            debug!(reservation = %id, "Reservation archived");
        }
        if !completed.is_empty() {
            info!(archived = completed.len(), now = now, "Archived completed reservations");
        }
        completed
    }

    /// Look up a reservation
    pub async fn get_reservation(&self, id: &ReservationId) -> Option<ReservationAllocation> {
        self.state
            .read()
            .await
            .reservations
            .get(id)
            .map(|r| r.allocation.clone())
    }

    /// Reservations whose window contains `instant`, earliest start first
    pub async fn reservations_at(&self, instant: i64) -> Vec<ReservationAllocation> {
        let state = self.state.read().await;
        let mut active: Vec<ReservationAllocation> = state
            .reservations
            .values()
            .filter(|r| r.allocation.is_active(instant))
            .map(|r| r.allocation.clone())
            .collect();
        active.sort_by(|a, b| (a.start_time, a.id).cmp(&(b.start_time, b.id)));
        active
    }

    /// Total admitted demand at `instant`
    pub async fn total_committed_resources(&self, instant: i64) -> Resource {
        self.state.read().await.aggregate.at(instant)
    }

    /// Admitted demand of one user at `instant`
    pub async fn user_committed_resources(&self, user: &str, instant: i64) -> Resource {
        self.state
            .read()
            .await
            .per_user
            .get(user)
            .map(|c| c.at(instant))
            .unwrap_or(Resource::NONE)
    }

    /// Lifecycle state of a reservation at `now`
    pub async fn reservation_state(&self, id: &ReservationId, now: i64) -> Option<ReservationState> {
        self.state
            .read()
            .await
            .reservations
            .get(id)
            .map(|r| r.allocation.state_at(now))
    }

    /// Number of admitted reservations
    pub async fn reservation_count(&self) -> usize {
        self.state.read().await.reservations.len()
    }

    fn admit(
        &self,
        allocation: &ReservationAllocation,
        aggregate: &ResourceCurve,
        user_aggregate: &ResourceCurve,
    ) -> GpuslotResult<()> {
        let context = AdmissionContext {
            reservation: allocation,
            aggregate,
            user_aggregate,
            capacity: self.capacity,
        };
        self.policy.validate(&context).map_err(|e| {
            warn!(
                reservation = %allocation.id,
                user = %allocation.user,
                policy = self.policy.name(),
                error = %e,
                "Reservation rejected"
            );
            e
        })
    }
}

fn check_owner(existing: &ReservationAllocation, user: &str) -> GpuslotResult<()> {
    if existing.user != user {
        return Err(GpuslotError::OwnershipMismatch {
            reservation_id: existing.id.to_string(),
            owner: existing.user.clone(),
            requested_by: user.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{NoOverCommitPolicy, UserShareCapPolicy};
    use gpuslot_core::SharingPolicyConfig;

    const STEP: i64 = 1000;
    const TOTAL_CONTAINERS: i64 = 1_000_000;
    const MIN_ALLOC: Resource = Resource::new(1024, 1, 256);
    /// Not aligned to the step on purpose
    const INIT_TIME: i64 = 1_700_000_000_123;

    fn containers(count: i64) -> Resource {
        Resource::new(
            MIN_ALLOC.memory * count,
            MIN_ALLOC.vcores * count as i32,
            MIN_ALLOC.gpu_memory * count,
        )
    }

    fn plan() -> Plan {
        Plan::new(
            "dedicated",
            STEP,
            containers(TOTAL_CONTAINERS),
            Arc::new(NoOverCommitPolicy),
        )
        .unwrap()
    }

    fn reservation_for(id: ReservationId, user: &str, count: i64) -> ReservationAllocation {
        let demands = vec![containers(count); 3600];
        ReservationAllocation::new(
            id,
            user,
            "dedicated",
            INIT_TIME,
            INIT_TIME + demands.len() as i64 * STEP,
            ReservationAllocation::steps(INIT_TIME, STEP, &demands),
        )
    }

    fn reservation(user: &str, count: i64) -> ReservationAllocation {
        reservation_for(ReservationId::new(), user, count)
    }

    fn percent(p: i64) -> i64 {
        TOTAL_CONTAINERS * p / 100
    }

    #[tokio::test]
    async fn test_single_user_easy_fit() {
        let plan = plan();
        plan.add_reservation(reservation("u1", percent(20))).await.unwrap();
        assert_eq!(plan.reservation_count().await, 1);
        assert_eq!(
            plan.total_committed_resources(INIT_TIME + 10 * STEP).await,
            containers(percent(20))
        );
    }

    #[tokio::test]
    async fn test_single_user_barely_fits() {
        let plan = plan();
        plan.add_reservation(reservation("u1", TOTAL_CONTAINERS)).await.unwrap();
        assert_eq!(
            plan.total_committed_resources(INIT_TIME).await,
            plan.capacity()
        );
    }

    #[tokio::test]
    async fn test_single_user_over_capacity_is_rejected() {
        let plan = plan();
        let err = plan
            .add_reservation(reservation("u1", percent(110)))
            .await
            .unwrap_err();

        assert!(err.is_capacity_violation());
        assert_eq!(plan.reservation_count().await, 0);
        assert_eq!(plan.total_committed_resources(INIT_TIME).await, Resource::NONE);
    }

    #[tokio::test]
    async fn test_window_at_end_of_time() {
        use crate::reservation::ReservationInterval;

        let plan = plan();
        let start = i64::MAX - 500;
        let demand = Resource::new(1, 1, 1);
        let r = ReservationAllocation::new(
            ReservationId::new(),
            "u1",
            "dedicated",
            start,
            i64::MAX,
            [(ReservationInterval::new(start, i64::MAX), demand)]
                .into_iter()
                .collect(),
        );
        plan.add_reservation(r.clone()).await.unwrap();
        assert_eq!(plan.total_committed_resources(i64::MAX - 1).await, demand);

        let removed = plan.delete_reservation(&r.id, "u1").await.unwrap();
        assert_eq!(removed, r);
        assert_eq!(plan.total_committed_resources(start).await, Resource::NONE);
    }

    #[tokio::test]
    async fn test_update_by_other_user_is_rejected() {
        let plan = plan();
        let id = ReservationId::new();
        let original = reservation_for(id, "u1", percent(50));
        plan.add_reservation(original.clone()).await.unwrap();

        let err = plan
            .update_reservation(reservation_for(id, "u2", percent(50)))
            .await
            .unwrap_err();
        match err {
            GpuslotError::OwnershipMismatch {
                owner, requested_by, ..
            } => {
                assert_eq!(owner, "u1");
                assert_eq!(requested_by, "u2");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(plan.get_reservation(&id).await, Some(original));
    }

    #[tokio::test]
    async fn test_multi_tenant_fits() {
        let plan = plan();
        for i in 0..4 {
            plan.add_reservation(reservation(&format!("u{i}"), percent(25)))
                .await
                .unwrap();
        }
        assert_eq!(plan.reservation_count().await, 4);
        assert_eq!(
            plan.total_committed_resources(INIT_TIME + 3599 * STEP).await,
            plan.capacity()
        );
    }

    #[tokio::test]
    async fn test_multi_tenant_over_capacity() {
        let plan = plan();
        for i in 0..4 {
            plan.add_reservation(reservation(&format!("u{i}"), percent(25)))
                .await
                .unwrap();
        }
        let err = plan
            .add_reservation(reservation("u4", percent(25)))
            .await
            .unwrap_err();
        assert!(err.is_capacity_violation());
        assert_eq!(plan.reservation_count().await, 4);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_rejected() {
        let plan = plan();
        let id = ReservationId::new();
        plan.add_reservation(reservation_for(id, "u1", 10)).await.unwrap();
        let err = plan
            .add_reservation(reservation_for(id, "u1", 10))
            .await
            .unwrap_err();
        assert!(matches!(err, GpuslotError::DuplicateReservation(_)));
        assert_eq!(plan.total_committed_resources(INIT_TIME).await, containers(10));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_original() {
        let plan = plan();
        let id = ReservationId::new();
        plan.add_reservation(reservation_for(id, "u1", percent(60)))
            .await
            .unwrap();
        plan.add_reservation(reservation("u2", percent(30))).await.unwrap();

        let err = plan
            .update_reservation(reservation_for(id, "u1", percent(80)))
            .await
            .unwrap_err();
        assert!(err.is_capacity_violation());
        assert_eq!(
            plan.total_committed_resources(INIT_TIME).await,
            containers(percent(90))
        );

        // shrinking goes through and frees capacity
        plan.update_reservation(reservation_for(id, "u1", percent(70)))
            .await
            .unwrap();
        assert_eq!(plan.total_committed_resources(INIT_TIME).await, plan.capacity());
        assert_eq!(
            plan.user_committed_resources("u1", INIT_TIME).await,
            containers(percent(70))
        );
    }

    #[tokio::test]
    async fn test_update_unknown_reservation() {
        let plan = plan();
        let err = plan.update_reservation(reservation("u1", 1)).await.unwrap_err();
        assert!(matches!(err, GpuslotError::ReservationNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_checks_owner_and_frees_capacity() {
        let plan = plan();
        let id = ReservationId::new();
        plan.add_reservation(reservation_for(id, "u1", TOTAL_CONTAINERS))
            .await
            .unwrap();

        let err = plan.delete_reservation(&id, "u2").await.unwrap_err();
        assert!(matches!(err, GpuslotError::OwnershipMismatch { .. }));
        assert_eq!(plan.reservation_count().await, 1);

        let removed = plan.delete_reservation(&id, "u1").await.unwrap();
        assert_eq!(removed.id, id);
        assert_eq!(plan.reservation_count().await, 0);
        assert_eq!(plan.total_committed_resources(INIT_TIME).await, Resource::NONE);
        assert_eq!(plan.user_committed_resources("u1", INIT_TIME).await, Resource::NONE);

        plan.add_reservation(reservation("u2", TOTAL_CONTAINERS)).await.unwrap();
        assert!(matches!(
            plan.delete_reservation(&id, "u1").await,
            Err(GpuslotError::ReservationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_queue_and_bad_shape() {
        let plan = plan();
        let mut other_queue = reservation("u1", 1);
        other_queue.queue_name = "default".to_string();
        assert!(matches!(
            plan.add_reservation(other_queue).await,
            Err(GpuslotError::InvalidReservation(_))
        ));

        let mut inverted = reservation("u1", 1);
        inverted.end_time = inverted.start_time;
        assert!(matches!(
            plan.add_reservation(inverted).await,
            Err(GpuslotError::InvalidReservation(_))
        ));
        assert_eq!(plan.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn test_states_and_archiving() {
        let plan = plan();
        let early = ReservationAllocation::new(
            ReservationId::new(),
            "u1",
            "dedicated",
            0,
            2 * STEP,
            ReservationAllocation::steps(0, STEP, &[containers(5); 2]),
        );
        let late = ReservationAllocation::new(
            ReservationId::new(),
            "u2",
            "dedicated",
            STEP,
            4 * STEP,
            ReservationAllocation::steps(STEP, STEP, &[containers(7); 3]),
        );
        plan.add_reservation(early.clone()).await.unwrap();
        plan.add_reservation(late.clone()).await.unwrap();

        assert_eq!(plan.total_committed_resources(STEP).await, containers(12));
        let ids: Vec<ReservationId> = plan
            .reservations_at(STEP)
            .await
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![early.id, late.id]);

        assert_eq!(
            plan.reservation_state(&late.id, 0).await,
            Some(ReservationState::Admitted)
        );
        assert_eq!(
            plan.reservation_state(&early.id, STEP).await,
            Some(ReservationState::Active)
        );

        let archived = plan.archive_completed_reservations(2 * STEP).await;
        assert_eq!(archived, vec![early.id]);
        assert_eq!(plan.reservation_state(&early.id, 2 * STEP).await, None);
        assert_eq!(plan.total_committed_resources(STEP).await, containers(7));
        assert!(plan.archive_completed_reservations(2 * STEP).await.is_empty());
    }

    #[tokio::test]
    async fn test_user_share_cap() {
        let plan = Plan::new(
            "dedicated",
            STEP,
            containers(100),
            Arc::new(UserShareCapPolicy::new(0.5)),
        )
        .unwrap();

        plan.add_reservation(reservation("u1", 40)).await.unwrap();
        let err = plan.add_reservation(reservation("u1", 20)).await.unwrap_err();
        assert!(err.is_capacity_violation());

        plan.add_reservation(reservation("u2", 50)).await.unwrap();
        assert_eq!(plan.total_committed_resources(INIT_TIME).await, containers(90));
    }

    #[tokio::test]
    async fn test_concurrent_admission_never_over_commits() {
        let plan = Arc::new(plan());
        let mut handles = Vec::new();
        for i in 0..8 {
            let plan = plan.clone();
            handles.push(tokio::spawn(async move {
                plan.add_reservation(reservation(&format!("u{i}"), percent(25)))
                    .await
                    .is_ok()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
        assert_eq!(plan.total_committed_resources(INIT_TIME).await, plan.capacity());
    }

    #[test]
    fn test_from_config() {
        let config = PlanConfig {
            queue_name: "research".to_string(),
            step_ms: 60_000,
            capacity: containers(8),
            policy: SharingPolicyConfig::UserShareCap { max_share: 0.25 },
        };
        let plan = Plan::from_config(&config).unwrap();
        assert_eq!(plan.queue_name(), "research");
        assert_eq!(plan.step(), 60_000);

        let bad = PlanConfig {
            step_ms: 0,
            ..config
        };
        assert!(matches!(Plan::from_config(&bad), Err(GpuslotError::Config(_))));
    }
}
