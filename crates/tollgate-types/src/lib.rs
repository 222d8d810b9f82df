//! Shared domain types for the Tollgate gateway.
//!
//! This crate has zero dependencies on other tollgate crates. It holds the
//! unified request/response shapes, provider configuration, conversation
//! records, usage analytics rows, and the error taxonomy.

pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod provider;
pub mod usage;
