//! Integer voxel coordinates and inclusive axis-aligned region bounds

use serde::{Deserialize, Serialize};

/// Edge length of one host paging chunk, in voxels
pub const CHUNK_SIZE: i32 = 16;

/// Integer voxel coordinate in world space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoxelPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl VoxelPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Coordinate of the host paging chunk containing this voxel
    pub fn chunk(&self) -> VoxelPos {
        VoxelPos::new(
            self.x.div_euclid(CHUNK_SIZE),
            self.y.div_euclid(CHUNK_SIZE),
            self.z.div_euclid(CHUNK_SIZE),
        )
    }
}

impl std::fmt::Display for VoxelPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Axis-aligned box of voxels, inclusive on all three axes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionBounds {
    pub min: VoxelPos,
    pub max: VoxelPos,
}

impl RegionBounds {
    /// Create bounds from two corners (in any order)
    pub fn new(a: VoxelPos, b: VoxelPos) -> Self {
        Self {
            min: VoxelPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: VoxelPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Create bounds from an origin corner and positive extents
    pub fn from_origin_extent(origin: VoxelPos, width: i32, height: i32, depth: i32) -> Self {
        debug_assert!(width > 0 && height > 0 && depth > 0);
        Self {
            min: origin,
            max: VoxelPos::new(origin.x + width - 1, origin.y + height - 1, origin.z + depth - 1),
        }
    }

    /// Extents along each axis (always >= 1 for valid bounds)
    pub fn width(&self) -> i32 {
        self.max.x - self.min.x + 1
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y + 1
    }

    pub fn depth(&self) -> i32 {
        self.max.z - self.min.z + 1
    }

    /// Total voxel count of the box
    pub fn volume(&self) -> u64 {
        self.width() as u64 * self.height() as u64 * self.depth() as u64
    }

    /// Check if a voxel coordinate lies inside the box
    pub fn contains(&self, p: VoxelPos) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if a floating-point position lies inside the box
    ///
    /// Voxel (x, y, z) occupies [x, x+1) on each axis, so the box covers
    /// min..max+1 in continuous space.
    pub fn contains_point(&self, x: f64, y: f64, z: f64) -> bool {
        x >= self.min.x as f64 && x < (self.max.x + 1) as f64 &&
        y >= self.min.y as f64 && y < (self.max.y + 1) as f64 &&
        z >= self.min.z as f64 && z < (self.max.z + 1) as f64
    }

    /// Check if two boxes intersect (inclusive on all axes)
    pub fn intersects(&self, other: &RegionBounds) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Iterate every voxel coordinate in the box, x-major then y then z
    pub fn iter(&self) -> impl Iterator<Item = VoxelPos> + '_ {
        let (min, max) = (self.min, self.max);
        (min.x..=max.x).flat_map(move |x| {
            (min.y..=max.y).flat_map(move |y| {
                (min.z..=max.z).map(move |z| VoxelPos::new(x, y, z))
            })
        })
    }

    /// Iterate the chunk coordinates the box touches, in sorted order
    pub fn chunks(&self) -> impl Iterator<Item = VoxelPos> + '_ {
        let lo = self.min.chunk();
        let hi = self.max.chunk();
        (lo.x..=hi.x).flat_map(move |x| {
            (lo.y..=hi.y).flat_map(move |y| {
                (lo.z..=hi.z).map(move |z| VoxelPos::new(x, y, z))
            })
        })
    }

    /// Number of chunks the box touches
    pub fn chunk_count(&self) -> usize {
        let lo = self.min.chunk();
        let hi = self.max.chunk();
        ((hi.x - lo.x + 1) * (hi.y - lo.y + 1) * (hi.z - lo.z + 1)) as usize
    }

    /// Clip a chunk's voxel range to this box, returning None if disjoint
    pub fn clip_chunk(&self, chunk: VoxelPos) -> Option<RegionBounds> {
        let chunk_box = RegionBounds {
            min: VoxelPos::new(chunk.x * CHUNK_SIZE, chunk.y * CHUNK_SIZE, chunk.z * CHUNK_SIZE),
            max: VoxelPos::new(
                chunk.x * CHUNK_SIZE + CHUNK_SIZE - 1,
                chunk.y * CHUNK_SIZE + CHUNK_SIZE - 1,
                chunk.z * CHUNK_SIZE + CHUNK_SIZE - 1,
            ),
        };
        if !self.intersects(&chunk_box) {
            return None;
        }
        Some(RegionBounds {
            min: VoxelPos::new(
                self.min.x.max(chunk_box.min.x),
                self.min.y.max(chunk_box.min.y),
                self.min.z.max(chunk_box.min.z),
            ),
            max: VoxelPos::new(
                self.max.x.min(chunk_box.max.x),
                self.max.y.min(chunk_box.max.y),
                self.max.z.min(chunk_box.max.z),
            ),
        })
    }
}
