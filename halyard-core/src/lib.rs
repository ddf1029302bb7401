//! Halyard Core functionality.
//!
//! This crate contains the high-availability routing core of the Halyard
//! gateway: per-service URL selection policies, the factory that builds them
//! from HA descriptors, and the [`HaRouter`] facade the proxy consults on
//! every request.
//!
//! The core performs no I/O. Callers honor the failover sleep and retry
//! budget from [`HaServiceConfig`] themselves.

pub mod config;
pub mod discovery;
pub mod error;
pub mod policy;
pub mod registry;
pub mod router;

pub use config::{HaDescriptor, HaServiceConfig, PolicyKind};
pub use discovery::{LeaderBoard, LeaderDiscovery, LeaderLookup};
pub use error::HaError;
pub use policy::{RoutingPolicy, ServicePolicy};
pub use registry::PolicyRegistry;
pub use router::HaRouter;
