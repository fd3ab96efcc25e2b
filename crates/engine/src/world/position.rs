/// Absolute block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockPos {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// The chunk this block belongs to.
    pub const fn chunk(&self) -> ChunkPos {
        ChunkPos {
            x: (self.x >> 4) as i32,
            z: (self.z >> 4) as i32,
        }
    }

    /// Position within the chunk (0..16 for x and z, absolute y).
    pub const fn local(&self) -> LocalBlockPos {
        LocalBlockPos {
            x: (self.x & 0xF) as u8,
            y: self.y,
            z: (self.z & 0xF) as u8,
        }
    }

    pub const fn offset(&self, dx: i64, dy: i64, dz: i64) -> BlockPos {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub const fn above(&self) -> BlockPos {
        self.offset(0, 1, 0)
    }

    pub const fn below(&self) -> BlockPos {
        self.offset(0, -1, 0)
    }

    /// Whether the y coordinate falls outside the vertical range.
    pub const fn out_of_bounds(&self, range: Range) -> bool {
        self.y < range.min || self.y > range.max
    }

    /// The six cardinal neighbors.
    pub const fn neighbors(&self) -> [BlockPos; 6] {
        [
            Self::new(self.x + 1, self.y, self.z),
            Self::new(self.x - 1, self.y, self.z),
            Self::new(self.x, self.y + 1, self.z),
            Self::new(self.x, self.y - 1, self.z),
            Self::new(self.x, self.y, self.z + 1),
            Self::new(self.x, self.y, self.z - 1),
        ]
    }

    /// The cardinal neighbors that lie inside `range`.
    pub fn neighbors_within(&self, range: Range) -> impl Iterator<Item = BlockPos> {
        self.neighbors()
            .into_iter()
            .filter(move |n| !n.out_of_bounds(range))
    }

    /// The four horizontal neighbors (±X, ±Z).
    pub const fn horizontal_neighbors(&self) -> [BlockPos; 4] {
        [
            Self::new(self.x + 1, self.y, self.z),
            Self::new(self.x - 1, self.y, self.z),
            Self::new(self.x, self.y, self.z + 1),
            Self::new(self.x, self.y, self.z - 1),
        ]
    }
}

/// Chunk column position (each chunk is 16x16 blocks horizontally).
///
/// The derived `Ord` (x first, then z) is the lock acquisition order for any
/// operation holding more than one chunk at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

impl ChunkPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub const fn block_origin(&self, y: i64) -> BlockPos {
        BlockPos::new((self.x as i64) << 4, y, (self.z as i64) << 4)
    }

    /// Chebyshev distance in chunks.
    pub fn distance(&self, other: ChunkPos) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

/// Block position local to a chunk (x, z in 0..16).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalBlockPos {
    pub x: u8,
    pub y: i64,
    pub z: u8,
}

impl LocalBlockPos {
    pub const fn new(x: u8, y: i64, z: u8) -> Self {
        Self { x, y, z }
    }

    pub const fn section_index(&self) -> i32 {
        (self.y >> 4) as i32
    }

    pub const fn section_local_y(&self) -> u8 {
        (self.y.rem_euclid(16)) as u8
    }
}

/// Inclusive vertical range of a world, e.g. `[0, 255]` or `[-64, 319]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    /// Number of blocks covered.
    pub const fn height(&self) -> i64 {
        self.max - self.min + 1
    }

    pub const fn contains(&self, y: i64) -> bool {
        y >= self.min && y <= self.max
    }

    /// Index of the lowest sub-chunk (`min >> 4`).
    pub const fn min_section(&self) -> i32 {
        (self.min >> 4) as i32
    }

    /// Number of 16-high sub-chunks needed to cover the range.
    pub const fn section_count(&self) -> usize {
        (((self.max >> 4) - (self.min >> 4)) + 1) as usize
    }
}

impl Default for Range {
    fn default() -> Self {
        Self::new(0, 255)
    }
}

/// Continuous position, used for entities, particles and sounds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn block(&self) -> BlockPos {
        BlockPos::new(self.x.floor() as i64, self.y.floor() as i64, self.z.floor() as i64)
    }

    pub fn chunk(&self) -> ChunkPos {
        self.block().chunk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_positions_map_to_negative_chunks() {
        let pos = BlockPos::new(-1, 5, -17);
        assert_eq!(pos.chunk(), ChunkPos::new(-1, -2));
        let local = pos.local();
        assert_eq!((local.x, local.z), (15, 15));
    }

    #[test]
    fn neighbors_are_clipped_to_range() {
        let range = Range::new(0, 255);
        let bottom: Vec<_> = BlockPos::new(0, 0, 0).neighbors_within(range).collect();
        assert_eq!(bottom.len(), 5);
        assert!(!bottom.contains(&BlockPos::new(0, -1, 0)));
    }

    #[test]
    fn range_sections() {
        assert_eq!(Range::new(0, 255).section_count(), 16);
        assert_eq!(Range::new(-64, 319).section_count(), 24);
        assert_eq!(Range::new(-64, 319).min_section(), -4);
    }

    #[test]
    fn vec3_floors_towards_negative_infinity() {
        let v = Vec3::new(-0.5, 64.9, 15.99);
        assert_eq!(v.block(), BlockPos::new(-1, 64, 15));
        assert_eq!(v.chunk(), ChunkPos::new(-1, 0));
    }
}
