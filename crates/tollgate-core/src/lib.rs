//! Business logic for the Tollgate gateway.
//!
//! This crate defines the adapter contract ("ports") that tollgate-infra
//! implements, plus every coordination component of the dispatch pipeline:
//! budget guard, single-flighted response cache, circuit breaker, health
//! tracking, the dispatcher itself, the conversation service, and the
//! usage analytics aggregator. It depends only on `tollgate-types`.

pub mod adapter;
pub mod analytics;
pub mod breaker;
pub mod budget;
pub mod cache;
pub mod conversation;
pub mod dispatch;
pub mod estimate;
pub mod health;
