//! Error types for gpuslot

use thiserror::Error;

use crate::resource::Resource;

/// Main error type for gpuslot
#[derive(Error, Debug)]
pub enum GpuslotError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Admitting a reservation would exceed the allowed capacity at some instant
    #[error(
        "Capacity violation: reservation {reservation_id} needs {demand} at t={instant}, allowed {capacity}"
    )]
    CapacityViolation {
        reservation_id: String,
        instant: i64,
        demand: Resource,
        capacity: Resource,
    },

    /// Update or delete attempted by someone other than the reservation owner
    #[error(
        "Ownership mismatch: reservation {reservation_id} belongs to {owner}, not {requested_by}"
    )]
    OwnershipMismatch {
        reservation_id: String,
        owner: String,
        requested_by: String,
    },

    /// Reservation not found
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    /// Reservation id already present in the plan
    #[error("Reservation already exists: {0}")]
    DuplicateReservation(String),

    /// Malformed reservation request
    #[error("Invalid reservation: {0}")]
    InvalidReservation(String),

    /// Device status query failed
    #[error("Sampling error: {0}")]
    Sampling(String),

    /// Resource exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for gpuslot operations
pub type GpuslotResult<T> = Result<T, GpuslotError>;

impl GpuslotError {
    /// Whether this error is an admission rejection that may succeed later
    /// once other reservations are released.
    pub fn is_capacity_violation(&self) -> bool {
        matches!(self, GpuslotError::CapacityViolation { .. })
    }
}

impl From<toml::de::Error> for GpuslotError {
    fn from(err: toml::de::Error) -> Self {
        GpuslotError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GpuslotError::Config("invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: invalid config");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GpuslotError = io_err.into();
        assert!(matches!(err, GpuslotError::Io(_)));
    }

    #[test]
    fn test_capacity_violation_display() {
        let err = GpuslotError::CapacityViolation {
            reservation_id: "r1".to_string(),
            instant: 1000,
            demand: Resource::new(2048, 2, 0),
            capacity: Resource::new(1024, 1, 0),
        };
        assert!(err.is_capacity_violation());
        assert_eq!(
            err.to_string(),
            "Capacity violation: reservation r1 needs <memory:2048, vCores:2, gpuMemory:0> \
             at t=1000, allowed <memory:1024, vCores:1, gpuMemory:0>"
        );
    }

    #[test]
    fn test_ownership_mismatch_is_not_capacity_violation() {
        let err = GpuslotError::OwnershipMismatch {
            reservation_id: "r1".to_string(),
            owner: "u1".to_string(),
            requested_by: "u2".to_string(),
        };
        assert!(!err.is_capacity_violation());
    }
}
