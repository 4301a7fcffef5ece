//! Simulation library for drift-adaptive 5G radio resource allocation
//!
//! This crate provides the core functionality for:
//! - Synthetic and replayed network metric sources
//! - Feature preprocessing and demand prediction
//! - Residual drift detection and debounced alerting
//! - Capacity-constrained resource allocation
//! - The per-tick orchestration loop and its event sinks
//! - Health checks, observability and the dashboard API

pub mod allocator;
pub mod api;
pub mod config;
pub mod drift;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod predictor;
pub mod source;

pub use config::SimulationConfig;
pub use error::{Result, SimError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{SimMetrics, StructuredLogger};
