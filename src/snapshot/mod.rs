//! Region snapshots: data model, on-disk store, registry

pub mod entity;
pub mod incidental;
pub mod region;
pub mod registry;
pub mod store;
pub mod wire;

pub use entity::EntityRecord;
pub use incidental::{IncidentalState, TaggedValue};
pub use region::{RegionMetadata, RegionSnapshot, SpawnPoint};
pub use registry::{DirtyTracker, RegionRegistry};
pub use store::{SnapshotStore, StreamingWriter, FORMAT_VERSION, SNAPSHOT_EXTENSION};
