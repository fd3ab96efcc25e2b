use parking_lot::lock_api::ArcMutexGuard;

use super::block::{Block, BlockId};
use super::chunk::{LAYER_BLOCK, LAYER_LIQUID};
use super::light::LightArea;
use super::position::{BlockPos, ChunkPos};
use super::World;

/// A box of blocks that can be written into a World in one pass.
pub trait Structure {
    /// Width (x), height (y) and length (z).
    fn dimensions(&self) -> [i64; 3];

    /// The block and liquid to place at offset `(x, y, z)` from the origin.
    /// `None` for the block leaves the existing one; `None` for the liquid
    /// clears the overlay layer. `blocks` reads the World at offsets relative
    /// to the origin, including positions outside the structure.
    fn at(
        &self,
        x: i64,
        y: i64,
        z: i64,
        blocks: &mut dyn FnMut(i64, i64, i64) -> Block,
    ) -> (Option<Block>, Option<Block>);
}

impl World {
    /// Write a structure with its minimum corner at `origin`, one chunk at a
    /// time. Viewers receive each finished chunk whole instead of per-block
    /// updates, and no neighbour updates are queued.
    pub fn build_structure(&self, origin: BlockPos, structure: &dyn Structure) {
        if self.is_closed() {
            return;
        }
        let [width, height, length] = structure.dimensions();
        if width <= 0 || height <= 0 || length <= 0 {
            return;
        }
        let max = origin.offset(width, height, length);
        let (min_y, max_y) = (origin.y.max(self.range.min), max.y.min(self.range.max + 1));

        for cx in (origin.x >> 4)..=((max.x - 1) >> 4) {
            for cz in (origin.z >> 4)..=((max.z - 1) >> 4) {
                let cpos = ChunkPos::new(cx as i32, cz as i32);
                let (base_x, base_z) = (cx << 4, cz << 4);
                let mut c = self.chunk(cpos);

                for y in min_y..max_y {
                    for x in origin.x.max(base_x)..max.x.min(base_x + 16) {
                        for z in origin.z.max(base_z)..max.z.min(base_z + 16) {
                            let (block, liquid) = {
                                let mut lookup = |dx: i64, dy: i64, dz: i64| {
                                    let p = origin.offset(dx, dy, dz);
                                    if p.chunk() == cpos {
                                        return self.block_in_chunk(&c, p);
                                    }
                                    // Never hold two chunk locks at once here.
                                    let b = ArcMutexGuard::unlocked(&mut c, || self.block(p));
                                    if c.evicted {
                                        c = self.chunk(cpos);
                                    }
                                    b
                                };
                                structure.at(x - origin.x, y - origin.y, z - origin.z, &mut lookup)
                            };

                            let pos = BlockPos::new(x, y, z);
                            let (lx, lz) = ((x - base_x) as u8, (z - base_z) as u8);
                            if let Some(b) = block {
                                let id = self.registry.runtime_id(&b);
                                c.chunk.set_block(lx, y, lz, LAYER_BLOCK, id);
                                if self.registry.has_nbt(id) {
                                    c.block_entities.insert(pos, b);
                                } else {
                                    c.block_entities.remove(&pos);
                                }
                            }
                            let liquid_id = match liquid {
                                Some(l) => self.registry.runtime_id(&l),
                                None => BlockId::AIR,
                            };
                            c.chunk.set_block(lx, y, lz, LAYER_LIQUID, liquid_id);
                        }
                    }
                }

                LightArea::new(vec![&mut c.chunk], cpos, &self.registry).fill();
                let viewers = c.viewers.clone();
                for v in &viewers {
                    v.view_chunk(cpos, &c.chunk, &c.block_entities);
                }
                drop(c);
                self.spread_light_around(cpos);
            }
        }
    }
}
