//! Voxel state type

use std::collections::BTreeMap;

/// Decoded state of one voxel: material kind plus orientation/properties.
///
/// Properties live in a `BTreeMap` so that iteration order, and therefore the
/// encoded token, is canonical. Equality at this level is what "unmodified"
/// means to only-modified regeneration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VoxelState {
    /// Material kind, a lowercase identifier like `stone` or `oak_stairs`
    pub kind: String,
    /// Orientation and other block properties, e.g. `facing=north`
    pub props: BTreeMap<String, String>,
}

impl VoxelState {
    /// The inert/empty voxel, substituted for any undecodable token
    pub const AIR_KIND: &'static str = "air";

    /// Create a state with no properties
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            props: BTreeMap::new(),
        }
    }

    /// The inert/empty voxel
    pub fn air() -> Self {
        Self::new(Self::AIR_KIND)
    }

    /// Builder-style property setter
    pub fn with_prop(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    /// Check if this is the inert/empty voxel
    pub fn is_air(&self) -> bool {
        self.kind == Self::AIR_KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air() {
        assert!(VoxelState::air().is_air());
        assert!(!VoxelState::new("stone").is_air());
    }

    #[test]
    fn test_equality_ignores_insert_order() {
        let a = VoxelState::new("stairs").with_prop("facing", "north").with_prop("half", "top");
        let b = VoxelState::new("stairs").with_prop("half", "top").with_prop("facing", "north");
        assert_eq!(a, b);
    }
}
