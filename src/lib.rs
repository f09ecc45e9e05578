//! Regenesis - region snapshot and budgeted regeneration for voxel worlds

pub mod core;
pub mod math;
pub mod voxel;
pub mod host;
pub mod snapshot;
pub mod persist;
pub mod regen;
