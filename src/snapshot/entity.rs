//! Captured entity records
//!
//! Entities are stored as serializable attribute bags: a structured core that
//! every entity has, plus a flattened map of type-specific extra fields. The
//! snapshot body stores the JSON encoding as a length-prefixed opaque blob,
//! so new fields never change the wire layout.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::Error;
use crate::core::types::Result;

/// An active potion/status effect on an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEffect {
    pub name: String,
    pub duration_ticks: u32,
    pub amplifier: u8,
}

/// Serializable attribute bag for one captured entity
///
/// Only non-player, serializable entities are captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity type identifier, e.g. `zombie`
    pub kind: String,
    /// Orientation
    pub yaw: f32,
    pub pitch: f32,
    /// Velocity at capture time
    pub velocity: [f64; 3],
    pub health: f32,
    /// Equipped item identifiers, slot order is host-defined
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equipment: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<StatusEffect>,
    /// Type-specific extra fields, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityRecord {
    /// Minimal record for an entity type
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            yaw: 0.0,
            pitch: 0.0,
            velocity: [0.0; 3],
            health: 0.0,
            equipment: Vec::new(),
            effects: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Serialize to the opaque blob stored in the snapshot body
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Corrupt(format!("entity encode: {}", e)))
    }

    /// Parse a blob read back from a snapshot body
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        serde_json::from_slice(blob).map_err(|e| Error::Corrupt(format!("entity decode: {}", e)))
    }
}
