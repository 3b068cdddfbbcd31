//! Strata Agents - Capability Registry
//!
//! Agents are plain data plus an executor: each declares a static list of
//! [`Capability`](strata_core::Capability) values and implements
//! [`CapabilityExecutor`] to run them. The [`CapabilityRegistry`] maps names
//! to declarations and agent ids to executors.

pub mod executor;
pub mod registry;

pub use executor::{CapabilityExecutor, ExecutionContext, ExecutorError};
pub use registry::CapabilityRegistry;
