//! Observability setup for the Tollgate gateway.

pub mod tracing_setup;
