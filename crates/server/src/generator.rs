//! Superflat terrain.

use keystone_engine::world::block::{Block, BlockId, BlockRegistry};
use keystone_engine::world::chunk::{BiomeId, Chunk, LAYER_BLOCK, SECTION_SIZE};
use keystone_engine::world::position::ChunkPos;
use keystone_engine::world::provider::Generator;

use crate::block;

/// Plains, as numbered by the server's biome table.
pub const PLAINS: BiomeId = BiomeId(1);

/// Fills every chunk with the same stack of layers, bottom up from `base_y`.
pub struct FlatGenerator {
    base_y: i64,
    layers: Vec<(BlockId, u32)>,
    biome: BiomeId,
}

impl FlatGenerator {
    /// `layers` are `(block, thickness)` pairs from the bottom up.
    ///
    /// Panics if a layer block is not registered.
    pub fn new(registry: &BlockRegistry, base_y: i64, layers: &[(Block, u32)]) -> Self {
        Self {
            base_y,
            layers: layers
                .iter()
                .map(|(b, n)| (registry.runtime_id(b), *n))
                .collect(),
            biome: PLAINS,
        }
    }

    /// Bedrock at y=60, stone up to 63, dirt at 64 and 65, grass on top.
    pub fn standard(registry: &BlockRegistry) -> Self {
        Self::new(
            registry,
            60,
            &[
                (block::block(block::BEDROCK), 1),
                (block::block(block::STONE), 3),
                (block::block(block::DIRT), 2),
                (block::grass_block(), 1),
            ],
        )
    }

    /// y of the first air block above the layers.
    pub fn surface(&self) -> i64 {
        self.base_y + self.layers.iter().map(|(_, n)| *n as i64).sum::<i64>()
    }
}

impl Generator for FlatGenerator {
    fn generate_chunk(&self, _pos: ChunkPos, chunk: &mut Chunk) {
        let range = chunk.range();
        for x in 0..SECTION_SIZE as u8 {
            for z in 0..SECTION_SIZE as u8 {
                let mut y = self.base_y;
                for (id, n) in &self.layers {
                    for _ in 0..*n {
                        if range.contains(y) {
                            chunk.set_block(x, y, z, LAYER_BLOCK, *id);
                        }
                        y += 1;
                    }
                }
            }
        }
        for sub in chunk.sub_chunks_mut() {
            for x in 0..SECTION_SIZE as u8 {
                for y in 0..SECTION_SIZE as u8 {
                    for z in 0..SECTION_SIZE as u8 {
                        sub.set_biome(x, y, z, self.biome);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_engine::world::position::Range;

    #[test]
    fn layers_stack_from_the_base() {
        let registry = block::vanilla();
        let g = FlatGenerator::standard(&registry);
        assert_eq!(g.surface(), 67);

        let mut chunk = Chunk::new(Range::new(-64, 319));
        g.generate_chunk(ChunkPos::new(3, -2), &mut chunk);
        let at = |y| registry.block(chunk.block(5, y, 9, LAYER_BLOCK)).unwrap();
        assert_eq!(at(59), registry.air());
        assert_eq!(at(60).name(), block::BEDROCK);
        assert_eq!(at(63).name(), block::STONE);
        assert_eq!(at(65).name(), block::DIRT);
        assert_eq!(at(66).name(), block::GRASS_BLOCK);
        assert_eq!(at(67), registry.air());
        assert_eq!(chunk.biome(0, 100, 0), PLAINS);
    }

    #[test]
    fn layers_outside_the_range_are_cut() {
        let registry = block::vanilla();
        let g = FlatGenerator::new(&registry, 250, &[(block::block(block::STONE), 10)]);
        let mut chunk = Chunk::new(Range::new(0, 255));
        g.generate_chunk(ChunkPos::new(0, 0), &mut chunk);
        assert_eq!(chunk.highest_block(0, 0), 255);
    }
}
