//! Spatial math for region bounds

pub mod bounds;

pub use bounds::{RegionBounds, VoxelPos};
