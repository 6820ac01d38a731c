//! Core domain models for provisioning
//!
//! This module defines the step graph, the resource handles steps exchange,
//! and the deployment configuration.

pub mod config;
pub mod handle;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod step;

pub use handle::{Address, ContractRef, HandleValue};
pub use pipeline::*;
pub use registry::{HandleRegistry, HandleView, RegistryError};
pub use state::*;
pub use step::*;
