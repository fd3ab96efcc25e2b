use super::block::{BlockId, BlockRegistry};
use super::position::Range;

/// Number of blocks along each axis of a sub-chunk.
pub const SECTION_SIZE: usize = 16;
/// Total block count in one sub-chunk.
pub const SECTION_VOLUME: usize = SECTION_SIZE * SECTION_SIZE * SECTION_SIZE;
/// Foreground layer.
pub const LAYER_BLOCK: u8 = 0;
/// Liquid overlay layer, used for liquids sitting inside a displacing block.
pub const LAYER_LIQUID: u8 = 1;

/// Biome identifier. Biome tables live outside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BiomeId(pub u32);

impl BiomeId {
    pub const OCEAN: BiomeId = BiomeId(0);
}

type Layer = Box<[BlockId; SECTION_VOLUME]>;

/// Per-voxel values held as a single value until two voxels differ.
#[derive(Clone)]
enum Voxels<T: Copy> {
    Uniform(T),
    Full(Box<[T; SECTION_VOLUME]>),
}

impl<T: Copy + PartialEq> Voxels<T> {
    #[inline]
    fn get(&self, i: usize) -> T {
        match self {
            Voxels::Uniform(v) => *v,
            Voxels::Full(a) => a[i],
        }
    }

    #[inline]
    fn set(&mut self, i: usize, value: T) {
        match self {
            Voxels::Uniform(v) if *v == value => {}
            Voxels::Uniform(v) => {
                let mut a = Box::new([*v; SECTION_VOLUME]);
                a[i] = value;
                *self = Voxels::Full(a);
            }
            Voxels::Full(a) => a[i] = value,
        }
    }

    fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..SECTION_VOLUME).map(|i| self.get(i))
    }

    fn is_uniform(&self) -> bool {
        matches!(self, Voxels::Uniform(_))
    }

    /// Fall back to a single value when every voxel agrees.
    fn compact(&mut self) {
        if let Voxels::Full(a) = self {
            let first = a[0];
            if a.iter().all(|v| *v == first) {
                *self = Voxels::Uniform(first);
            }
        }
    }
}

/// A 16x16x16 cube of voxels.
///
/// Block layers are stored as flat arrays in YZX order (x varies fastest) and
/// only allocated once something other than air is written to them. Light
/// and biome arrays stay a single value until some voxel differs, and
/// [`Chunk::compact`] folds them back when they become uniform again.
#[derive(Clone)]
pub struct SubChunk {
    layers: Vec<Layer>,
    sky_light: Voxels<u8>,
    block_light: Voxels<u8>,
    biomes: Voxels<BiomeId>,
}

impl SubChunk {
    pub fn new_empty() -> Self {
        Self {
            layers: Vec::new(),
            sky_light: Voxels::Uniform(0),
            block_light: Voxels::Uniform(0),
            biomes: Voxels::Uniform(BiomeId::OCEAN),
        }
    }

    #[inline]
    pub const fn index(x: u8, y: u8, z: u8) -> usize {
        (y as usize) * SECTION_SIZE * SECTION_SIZE + (z as usize) * SECTION_SIZE + (x as usize)
    }

    #[inline]
    pub fn block(&self, x: u8, y: u8, z: u8, layer: u8) -> BlockId {
        match self.layers.get(layer as usize) {
            Some(l) => l[Self::index(x, y, z)],
            None => BlockId::AIR,
        }
    }

    pub fn set_block(&mut self, x: u8, y: u8, z: u8, layer: u8, block: BlockId) {
        let layer = layer as usize;
        if layer >= self.layers.len() {
            if block == BlockId::AIR {
                return;
            }
            while self.layers.len() <= layer {
                self.layers.push(Box::new([BlockId::AIR; SECTION_VOLUME]));
            }
        }
        self.layers[layer][Self::index(x, y, z)] = block;
    }

    /// Number of allocated layers.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Raw layer contents, for persistence.
    pub fn layer(&self, layer: u8) -> Option<&[BlockId; SECTION_VOLUME]> {
        self.layers.get(layer as usize).map(|l| &**l)
    }

    pub fn is_empty(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.iter().all(|b| *b == BlockId::AIR))
    }

    #[inline]
    pub fn sky_light(&self, x: u8, y: u8, z: u8) -> u8 {
        self.sky_light.get(Self::index(x, y, z))
    }

    #[inline]
    pub fn block_light(&self, x: u8, y: u8, z: u8) -> u8 {
        self.block_light.get(Self::index(x, y, z))
    }

    #[inline]
    pub fn set_sky_light(&mut self, x: u8, y: u8, z: u8, level: u8) {
        self.sky_light.set(Self::index(x, y, z), level);
    }

    #[inline]
    pub fn set_block_light(&mut self, x: u8, y: u8, z: u8, level: u8) {
        self.block_light.set(Self::index(x, y, z), level);
    }

    #[inline]
    pub fn biome(&self, x: u8, y: u8, z: u8) -> BiomeId {
        self.biomes.get(Self::index(x, y, z))
    }

    #[inline]
    pub fn set_biome(&mut self, x: u8, y: u8, z: u8, biome: BiomeId) {
        self.biomes.set(Self::index(x, y, z), biome);
    }

    /// Every biome in index order.
    pub fn biomes(&self) -> impl Iterator<Item = BiomeId> + '_ {
        self.biomes.iter()
    }

    /// Whether light and biomes are each held as a single value.
    pub fn is_uniform(&self) -> bool {
        self.sky_light.is_uniform() && self.block_light.is_uniform() && self.biomes.is_uniform()
    }

    /// Drop trailing layers that hold nothing but air and fold uniform
    /// light and biome arrays.
    fn compact(&mut self) {
        self.sky_light.compact();
        self.block_light.compact();
        self.biomes.compact();
        while self
            .layers
            .last()
            .is_some_and(|l| l.iter().all(|b| *b == BlockId::AIR))
        {
            self.layers.pop();
        }
    }
}

/// A column of sub-chunks covering the world's vertical range.
pub struct Chunk {
    range: Range,
    subs: Vec<SubChunk>,
}

impl Chunk {
    pub fn new(range: Range) -> Self {
        Self {
            range,
            subs: (0..range.section_count()).map(|_| SubChunk::new_empty()).collect(),
        }
    }

    pub fn range(&self) -> Range {
        self.range
    }

    /// Index into `subs` of the sub-chunk holding absolute `y`.
    #[inline]
    pub fn sub_index(&self, y: i64) -> Option<usize> {
        if !self.range.contains(y) {
            return None;
        }
        Some(((y >> 4) as i32 - self.range.min_section()) as usize)
    }

    /// Absolute y of the bottom of sub-chunk `index`.
    pub fn sub_base_y(&self, index: usize) -> i64 {
        ((index as i64) + self.range.min_section() as i64) << 4
    }

    pub fn sub_chunks(&self) -> &[SubChunk] {
        &self.subs
    }

    pub fn sub_chunks_mut(&mut self) -> &mut [SubChunk] {
        &mut self.subs
    }

    pub fn block(&self, x: u8, y: i64, z: u8, layer: u8) -> BlockId {
        match self.sub_index(y) {
            Some(i) => self.subs[i].block(x & 15, (y & 15) as u8, z & 15, layer),
            None => BlockId::AIR,
        }
    }

    pub fn set_block(&mut self, x: u8, y: i64, z: u8, layer: u8, block: BlockId) {
        if let Some(i) = self.sub_index(y) {
            self.subs[i].set_block(x & 15, (y & 15) as u8, z & 15, layer, block);
        }
    }

    pub fn biome(&self, x: u8, y: i64, z: u8) -> BiomeId {
        match self.sub_index(y) {
            Some(i) => self.subs[i].biome(x & 15, (y & 15) as u8, z & 15),
            None => BiomeId::OCEAN,
        }
    }

    pub fn set_biome(&mut self, x: u8, y: i64, z: u8, biome: BiomeId) {
        if let Some(i) = self.sub_index(y) {
            self.subs[i].set_biome(x & 15, (y & 15) as u8, z & 15, biome);
        }
    }

    /// Combined light level: the brighter of sky and block light.
    pub fn light(&self, x: u8, y: i64, z: u8) -> u8 {
        self.sky_light(x, y, z).max(self.block_light(x, y, z))
    }

    pub fn sky_light(&self, x: u8, y: i64, z: u8) -> u8 {
        match self.sub_index(y) {
            Some(i) => self.subs[i].sky_light(x & 15, (y & 15) as u8, z & 15),
            None => 0,
        }
    }

    pub fn block_light(&self, x: u8, y: i64, z: u8) -> u8 {
        match self.sub_index(y) {
            Some(i) => self.subs[i].block_light(x & 15, (y & 15) as u8, z & 15),
            None => 0,
        }
    }

    pub fn set_sky_light(&mut self, x: u8, y: i64, z: u8, level: u8) {
        if let Some(i) = self.sub_index(y) {
            self.subs[i].set_sky_light(x & 15, (y & 15) as u8, z & 15, level);
        }
    }

    pub fn set_block_light(&mut self, x: u8, y: i64, z: u8, level: u8) {
        if let Some(i) = self.sub_index(y) {
            self.subs[i].set_block_light(x & 15, (y & 15) as u8, z & 15, level);
        }
    }

    /// Y of the highest non-air foreground block in the column, or `range.min`.
    pub fn highest_block(&self, x: u8, z: u8) -> i64 {
        for (i, sub) in self.subs.iter().enumerate().rev() {
            if sub.layer_count() == 0 {
                continue;
            }
            for y in (0..SECTION_SIZE as u8).rev() {
                if sub.block(x, y, z, LAYER_BLOCK) != BlockId::AIR {
                    return self.sub_base_y(i) + y as i64;
                }
            }
        }
        self.range.min
    }

    /// Y of the highest block that fully blocks light, or `range.min`.
    pub fn highest_light_blocker(&self, x: u8, z: u8, registry: &BlockRegistry) -> i64 {
        for (i, sub) in self.subs.iter().enumerate().rev() {
            if sub.layer_count() == 0 {
                continue;
            }
            for y in (0..SECTION_SIZE as u8).rev() {
                let blocked = (0..sub.layer_count() as u8)
                    .any(|layer| registry.light_filter(sub.block(x, y, z, layer)) >= 15);
                if blocked {
                    return self.sub_base_y(i) + y as i64;
                }
            }
        }
        self.range.min
    }

    /// Free block layers that hold nothing but air, and per-voxel light and
    /// biome arrays whose voxels all agree.
    pub fn compact(&mut self) {
        for sub in &mut self.subs {
            sub.compact();
        }
    }

    /// Number of sub-chunks with at least one allocated layer.
    pub fn section_count(&self) -> usize {
        self.subs.iter().filter(|s| s.layer_count() > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_voxels_read_as_air() {
        let chunk = Chunk::new(Range::new(-64, 319));
        assert_eq!(chunk.block(3, -64, 3, LAYER_BLOCK), BlockId::AIR);
        assert_eq!(chunk.block(3, 400, 3, LAYER_BLOCK), BlockId::AIR);
        assert_eq!(chunk.section_count(), 0);
    }

    #[test]
    fn layers_are_independent() {
        let mut chunk = Chunk::new(Range::default());
        chunk.set_block(1, 10, 1, LAYER_BLOCK, BlockId(5));
        chunk.set_block(1, 10, 1, LAYER_LIQUID, BlockId(7));
        assert_eq!(chunk.block(1, 10, 1, LAYER_BLOCK), BlockId(5));
        assert_eq!(chunk.block(1, 10, 1, LAYER_LIQUID), BlockId(7));
        assert_eq!(chunk.sub_chunks()[0].layer_count(), 2);
    }

    #[test]
    fn compact_frees_air_layers() {
        let mut chunk = Chunk::new(Range::default());
        chunk.set_block(0, 70, 0, LAYER_BLOCK, BlockId(2));
        chunk.set_block(0, 70, 0, LAYER_LIQUID, BlockId(3));
        chunk.set_block(0, 70, 0, LAYER_LIQUID, BlockId::AIR);
        chunk.compact();
        let sub = &chunk.sub_chunks()[chunk.sub_index(70).unwrap()];
        assert_eq!(sub.layer_count(), 1);

        chunk.set_block(0, 70, 0, LAYER_BLOCK, BlockId::AIR);
        chunk.compact();
        assert_eq!(chunk.section_count(), 0);
    }

    #[test]
    fn highest_block_scans_from_top() {
        let mut chunk = Chunk::new(Range::new(-64, 319));
        assert_eq!(chunk.highest_block(4, 4), -64);
        chunk.set_block(4, -10, 4, LAYER_BLOCK, BlockId(1));
        chunk.set_block(4, 100, 4, LAYER_BLOCK, BlockId(1));
        assert_eq!(chunk.highest_block(4, 4), 100);
    }

    #[test]
    fn open_sections_stay_uniform() {
        let mut chunk = Chunk::new(Range::new(0, 31));
        chunk.set_sky_light(2, 20, 2, 15);
        chunk.set_biome(2, 20, 2, BiomeId(4));
        assert!(chunk.sub_chunks()[0].is_uniform());
        assert!(!chunk.sub_chunks()[1].is_uniform());
        assert_eq!(chunk.sky_light(2, 20, 2), 15);
        assert_eq!(chunk.sky_light(3, 20, 2), 0);
        assert_eq!(chunk.biome(2, 20, 2), BiomeId(4));

        for x in 0..16 {
            for y in 16..32 {
                for z in 0..16 {
                    chunk.set_sky_light(x, y, z, 15);
                }
            }
        }
        chunk.set_biome(2, 20, 2, BiomeId::OCEAN);
        chunk.compact();
        assert!(chunk.sub_chunks()[1].is_uniform());
        assert_eq!(chunk.sky_light(9, 30, 9), 15);
        assert!(chunk.sub_chunks()[1].biomes().all(|b| b == BiomeId::OCEAN));
    }
}
