//! Sky and block light over one chunk or a 3x3 neighbourhood of chunks.
//!
//! `fill` seeds a freshly loaded chunk on its own. `spread` runs once the
//! chunk's whole neighbourhood is resident and lets light cross chunk borders.
//! Light at the edge of a chunk is provisional until that happens.

use std::collections::VecDeque;

use super::block::BlockRegistry;
use super::chunk::{Chunk, LAYER_BLOCK, LAYER_LIQUID, SECTION_SIZE};
use super::position::{ChunkPos, Range};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Sky,
    Block,
}

/// A square of locked chunks addressed by absolute block coordinates.
pub struct LightArea<'a> {
    chunks: Vec<&'a mut Chunk>,
    base: ChunkPos,
    width: i32,
    range: Range,
    registry: &'a BlockRegistry,
}

impl<'a> LightArea<'a> {
    /// `chunks` must be square and ordered by ascending x, then z, starting at
    /// `base` (the same order chunk locks are taken in).
    pub fn new(chunks: Vec<&'a mut Chunk>, base: ChunkPos, registry: &'a BlockRegistry) -> Self {
        let width = (chunks.len() as f64).sqrt() as i32;
        assert_eq!((width * width) as usize, chunks.len(), "light area must be square");
        let range = chunks[0].range();
        Self {
            chunks,
            base,
            width,
            range,
            registry,
        }
    }

    /// Compute sky and block light from scratch, confined to the area.
    pub fn fill(&mut self) {
        let mut sky = VecDeque::new();
        let mut block = VecDeque::new();
        for ci in 0..self.chunks.len() {
            let origin = self.chunk_origin(ci);
            let chunk = &mut *self.chunks[ci];
            for x in 0..SECTION_SIZE as u8 {
                for z in 0..SECTION_SIZE as u8 {
                    let mut level = 15u8;
                    for y in (self.range.min..=self.range.max).rev() {
                        let filter = column_filter(chunk, self.registry, x, y, z);
                        level = level.saturating_sub(filter);
                        chunk.set_sky_light(x, y, z, level);

                        let id = chunk.block(x, y, z, LAYER_BLOCK);
                        let emission = self.registry.light_emission(id);
                        chunk.set_block_light(x, y, z, emission);
                        if emission > 1 {
                            block.push_back((origin.0 + x as i64, y, origin.1 + z as i64));
                        }
                    }
                }
            }
        }
        // Sky light only needs to flow sideways where a neighbour is darker.
        for ci in 0..self.chunks.len() {
            let origin = self.chunk_origin(ci);
            for x in 0..SECTION_SIZE as i64 {
                for z in 0..SECTION_SIZE as i64 {
                    for y in self.range.min..=self.range.max {
                        let pos = (origin.0 + x, y, origin.1 + z);
                        let level = self.get(Channel::Sky, pos).unwrap_or(0);
                        if level > 1 && self.has_darker_neighbour(Channel::Sky, pos, level) {
                            sky.push_back(pos);
                        }
                    }
                }
            }
        }
        self.propagate(Channel::Sky, sky);
        self.propagate(Channel::Block, block);
        self.compact();
    }

    /// Spread light across the borders between the chunks of the area.
    pub fn spread(&mut self) {
        for channel in [Channel::Sky, Channel::Block] {
            let mut queue = VecDeque::new();
            for ci in 0..self.chunks.len() {
                let origin = self.chunk_origin(ci);
                for a in 0..SECTION_SIZE as i64 {
                    for edge in [0, SECTION_SIZE as i64 - 1] {
                        for y in self.range.min..=self.range.max {
                            for pos in [
                                (origin.0 + edge, y, origin.1 + a),
                                (origin.0 + a, y, origin.1 + edge),
                            ] {
                                if self.get(channel, pos).unwrap_or(0) > 1 {
                                    queue.push_back(pos);
                                }
                            }
                        }
                    }
                }
            }
            self.propagate(channel, queue);
        }
        self.compact();
    }

    fn compact(&mut self) {
        for chunk in &mut self.chunks {
            chunk.compact();
        }
    }

    fn propagate(&mut self, channel: Channel, mut queue: VecDeque<(i64, i64, i64)>) {
        while let Some(pos) = queue.pop_front() {
            let Some(level) = self.get(channel, pos) else {
                continue;
            };
            if level <= 1 {
                continue;
            }
            for n in neighbours(pos) {
                let Some(current) = self.get(channel, n) else {
                    continue;
                };
                let filter = self.filter(n).max(1);
                let next = level.saturating_sub(filter);
                if next > current {
                    self.set(channel, n, next);
                    if next > 1 {
                        queue.push_back(n);
                    }
                }
            }
        }
    }

    fn has_darker_neighbour(&self, channel: Channel, pos: (i64, i64, i64), level: u8) -> bool {
        neighbours(pos)
            .into_iter()
            .any(|n| self.get(channel, n).is_some_and(|l| l + 1 < level))
    }

    fn chunk_origin(&self, index: usize) -> (i64, i64) {
        let dx = index as i32 / self.width;
        let dz = index as i32 % self.width;
        (
            ((self.base.x + dx) as i64) << 4,
            ((self.base.z + dz) as i64) << 4,
        )
    }

    fn locate(&self, (x, y, z): (i64, i64, i64)) -> Option<(usize, u8, i64, u8)> {
        if !self.range.contains(y) {
            return None;
        }
        let dx = (x >> 4) as i32 - self.base.x;
        let dz = (z >> 4) as i32 - self.base.z;
        if dx < 0 || dz < 0 || dx >= self.width || dz >= self.width {
            return None;
        }
        Some(((dx * self.width + dz) as usize, (x & 15) as u8, y, (z & 15) as u8))
    }

    fn get(&self, channel: Channel, pos: (i64, i64, i64)) -> Option<u8> {
        let (ci, x, y, z) = self.locate(pos)?;
        let chunk = &*self.chunks[ci];
        Some(match channel {
            Channel::Sky => chunk.sky_light(x, y, z),
            Channel::Block => chunk.block_light(x, y, z),
        })
    }

    fn set(&mut self, channel: Channel, pos: (i64, i64, i64), level: u8) {
        if let Some((ci, x, y, z)) = self.locate(pos) {
            let chunk = &mut *self.chunks[ci];
            match channel {
                Channel::Sky => chunk.set_sky_light(x, y, z, level),
                Channel::Block => chunk.set_block_light(x, y, z, level),
            }
        }
    }

    fn filter(&self, pos: (i64, i64, i64)) -> u8 {
        match self.locate(pos) {
            Some((ci, x, y, z)) => column_filter(&*self.chunks[ci], self.registry, x, y, z),
            None => 15,
        }
    }
}

/// The strongest light filter over every layer of a voxel.
fn column_filter(chunk: &Chunk, registry: &BlockRegistry, x: u8, y: i64, z: u8) -> u8 {
    let a = registry.light_filter(chunk.block(x, y, z, LAYER_BLOCK));
    let b = registry.light_filter(chunk.block(x, y, z, LAYER_LIQUID));
    a.max(b)
}

fn neighbours((x, y, z): (i64, i64, i64)) -> [(i64, i64, i64); 6] {
    [
        (x + 1, y, z),
        (x - 1, y, z),
        (x, y + 1, z),
        (x, y - 1, z),
        (x, y, z + 1),
        (x, y, z - 1),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::{BlockDescriptor, BlockId, BlockState};

    fn registry() -> (BlockRegistry, BlockId, BlockId) {
        let mut b = BlockRegistry::builder();
        let stone = b.register(BlockDescriptor::solid(BlockState::new("stone")));
        let torch = b.register(
            BlockDescriptor::transparent(BlockState::new("torch")).light_emission(14),
        );
        (b.build(), stone, torch)
    }

    #[test]
    fn open_sky_is_fully_lit() {
        let (registry, _, _) = registry();
        let mut chunk = Chunk::new(Range::new(0, 63));
        LightArea::new(vec![&mut chunk], ChunkPos::new(0, 0), &registry).fill();
        assert_eq!(chunk.sky_light(3, 0, 3), 15);
        assert_eq!(chunk.light(3, 63, 3), 15);
    }

    #[test]
    fn roof_blocks_sky_and_light_leaks_sideways() {
        let (registry, stone, _) = registry();
        let mut chunk = Chunk::new(Range::new(0, 63));
        // Roof over x in 0..8 at y=20.
        for x in 0..8 {
            for z in 0..16 {
                chunk.set_block(x, 20, z, LAYER_BLOCK, stone);
            }
        }
        LightArea::new(vec![&mut chunk], ChunkPos::new(0, 0), &registry).fill();
        assert_eq!(chunk.sky_light(8, 10, 5), 15);
        assert_eq!(chunk.sky_light(7, 10, 5), 14);
        assert_eq!(chunk.sky_light(0, 10, 5), 7);
        assert_eq!(chunk.sky_light(3, 20, 5), 0);
    }

    #[test]
    fn emitters_light_their_surroundings() {
        let (registry, _, torch) = registry();
        let mut chunk = Chunk::new(Range::new(0, 31));
        chunk.set_block(8, 5, 8, LAYER_BLOCK, torch);
        LightArea::new(vec![&mut chunk], ChunkPos::new(0, 0), &registry).fill();
        assert_eq!(chunk.block_light(8, 5, 8), 14);
        assert_eq!(chunk.block_light(10, 5, 8), 12);
    }

    #[test]
    fn spread_crosses_chunk_borders() {
        let (registry, _, torch) = registry();
        let range = Range::new(0, 15);
        let mut chunks: Vec<Chunk> = (0..9).map(|_| Chunk::new(range)).collect();
        // Centre chunk (index 4 -> dx=1, dz=1), torch at its west edge.
        chunks[4].set_block(0, 5, 8, LAYER_BLOCK, torch);
        for c in chunks.iter_mut() {
            LightArea::new(vec![c], ChunkPos::new(0, 0), &registry).fill();
        }
        assert_eq!(chunks[1].block_light(15, 5, 8), 0);

        let refs: Vec<&mut Chunk> = chunks.iter_mut().collect();
        LightArea::new(refs, ChunkPos::new(-1, -1), &registry).spread();
        // Chunk (-1, 0) is index 1; its east edge touches the torch.
        assert_eq!(chunks[1].block_light(15, 5, 8), 13);
    }
}
