//! Budgeted region regeneration
//!
//! Regeneration restores a region's live voxels, entities and incidental
//! state from its snapshot without stalling the host simulation: the voxel
//! work runs as a resumable job that applies a bounded number of writes per
//! host step. The [`RegenerationEngine`] owns the full region lifecycle
//! (create, resize, delete) plus job admission, occupant policy and
//! completion.

pub mod engine;
pub mod job;
pub mod options;

pub use engine::{CaptureRequest, RegenerationEngine};
pub use job::{RegenJob, RegenReport, StepOutcome};
pub use options::{OccupantPolicy, RegenOptions, RegenSpeed, StepBudget};
