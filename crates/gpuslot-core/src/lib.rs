//! gpuslot-core: Core types for gpuslot
//!
//! This crate provides the fundamental types used throughout gpuslot:
//! - The three-dimensional resource vector and its arithmetic
//! - Pluggable resource calculators
//! - GPU device records and device selection
//! - Configuration types
//! - Error handling

pub mod calculator;
pub mod config;
pub mod device;
pub mod error;
pub mod resource;

pub use calculator::*;
pub use config::*;
pub use device::*;
pub use error::*;
pub use resource::*;
