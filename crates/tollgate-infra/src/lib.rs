//! Infrastructure implementations for the Tollgate gateway.
//!
//! Concrete adapters for the ports defined in `tollgate-core`: HTTP
//! provider adapters (Anthropic, OpenAI-compatible, Ollama), the SQLite
//! conversation repository, the pricing catalog, and the TOML
//! configuration loader.

pub mod config;
pub mod pricing;
pub mod providers;
pub mod sqlite;
