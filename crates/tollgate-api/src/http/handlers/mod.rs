//! HTTP request handlers for the REST API.

pub mod chat;
pub mod generate;
pub mod health;
pub mod provider;
pub mod usage;
