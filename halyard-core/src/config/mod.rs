//! Configuration models consumed by the HA routing core.

pub mod descriptor;

pub use descriptor::{HaDescriptor, HaDescriptorBuilder, HaServiceConfig, PolicyKind};
