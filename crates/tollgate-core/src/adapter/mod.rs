//! Provider adapter abstractions.
//!
//! - [`ProviderAdapter`]: RPITIT trait that concrete backends implement
//! - [`BoxAdapter`]: object-safe wrapper for runtime adapter selection
//! - [`AdapterFactory`]: callback that builds adapters from settings

pub mod box_adapter;
pub mod contract;

pub use box_adapter::BoxAdapter;
pub use contract::{AdapterFactory, ProviderAdapter};
