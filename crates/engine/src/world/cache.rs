//! The resident chunk set.
//!
//! Lock order: the store lock (`World::cache`) may be held while taking a
//! chunk lock only with `try_lock`, so nothing ever waits on a chunk lock
//! while holding the store lock. Code that blocks on more than one chunk lock
//! takes them in ascending [`ChunkPos`] order. Only eviction takes the store
//! lock while holding chunk locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RawMutex};
use parking_lot::lock_api::ArcMutexGuard;
use rayon::prelude::*;
use tracing::{debug, error, info, trace};

use super::block::{Block, BlockId, NbtCompound};
use super::chunk::{Chunk, LAYER_BLOCK};
use super::entity::Entity;
use super::light::LightArea;
use super::loader::LoaderKey;
use super::position::{BlockPos, ChunkPos};
use super::viewer::Viewer;
use super::World;

/// A resident chunk plus everything hanging off it.
pub struct ChunkData {
    pub(crate) chunk: Chunk,
    /// Blocks with NBT, keyed by absolute position.
    pub(crate) block_entities: HashMap<BlockPos, Block>,
    pub(crate) viewers: Vec<Arc<dyn Viewer>>,
    /// Parallel to `viewers`: the loader that registered each one.
    pub(crate) loaders: Vec<LoaderKey>,
    pub(crate) entities: Vec<Arc<dyn Entity>>,
    /// Set once the chunk has been saved on its way out of the store. Holders
    /// of a stale handle re-fetch when they see it.
    pub(crate) evicted: bool,
}

impl ChunkData {
    fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            block_entities: HashMap::new(),
            viewers: Vec::new(),
            loaders: Vec::new(),
            entities: Vec::new(),
            evicted: false,
        }
    }
}

pub(crate) type ChunkRef = Arc<Mutex<ChunkData>>;
pub(crate) type ChunkGuard = ArcMutexGuard<RawMutex, ChunkData>;

#[derive(Default)]
pub(crate) struct ChunkCache {
    chunks: HashMap<ChunkPos, ChunkRef>,
    /// Most recently used chunk, checked before the map.
    last: Option<(ChunkPos, ChunkRef)>,
}

impl ChunkCache {
    fn get(&mut self, pos: ChunkPos) -> Option<ChunkRef> {
        if let Some((last, c)) = &self.last {
            if *last == pos {
                return Some(Arc::clone(c));
            }
        }
        let c = Arc::clone(self.chunks.get(&pos)?);
        self.last = Some((pos, Arc::clone(&c)));
        Some(c)
    }

    fn remove(&mut self, pos: ChunkPos) -> Option<ChunkRef> {
        if self.last.as_ref().is_some_and(|(p, _)| *p == pos) {
            self.last = None;
        }
        self.chunks.remove(&pos)
    }
}

impl World {
    /// Lock the chunk at `pos`, loading or generating it first if it is not
    /// resident. Exactly one caller performs the load; concurrent callers
    /// block on the chunk lock until it is done.
    pub(crate) fn chunk(&self, pos: ChunkPos) -> ChunkGuard {
        loop {
            let mut cache = self.cache.lock();
            if let Some(c) = cache.get(pos) {
                drop(cache);
                let guard = c.lock_arc();
                if guard.evicted {
                    // Saved already: drop the stale entry and load it afresh.
                    drop(guard);
                    self.forget_chunk(pos, &c);
                    continue;
                }
                return guard;
            }

            let c: ChunkRef = Arc::new(Mutex::new(ChunkData::new(Chunk::new(self.range))));
            let mut guard = c.lock_arc();
            cache.chunks.insert(pos, Arc::clone(&c));
            cache.last = Some((pos, Arc::clone(&c)));
            drop(cache);

            self.load_chunk(pos, &mut guard);
            drop(guard);
            self.spread_light_around(pos);
        }
    }

    /// The chunk at `pos` if it is resident. Never loads.
    pub(crate) fn chunk_from_cache(&self, pos: ChunkPos) -> Option<ChunkRef> {
        self.cache.lock().get(pos)
    }

    pub fn is_chunk_loaded(&self, pos: ChunkPos) -> bool {
        self.cache.lock().chunks.contains_key(&pos)
    }

    pub fn loaded_chunk_count(&self) -> usize {
        self.cache.lock().chunks.len()
    }

    /// Fill a freshly inserted chunk from the provider, falling back to the
    /// generator when nothing is stored or the provider fails.
    fn load_chunk(&self, pos: ChunkPos, data: &mut ChunkData) {
        let provider = self.provider();
        match provider.load_chunk(pos, self.range) {
            Ok(Some(chunk)) => {
                data.chunk = chunk;
                match provider.load_entities(pos) {
                    Ok(entities) => {
                        self.register_loaded_entities(pos, &entities);
                        data.entities = entities;
                    }
                    Err(err) => error!(?pos, "error loading entities: {err:#}"),
                }
                match provider.load_block_nbt(pos) {
                    Ok(nbt) => self.load_into_blocks(data, nbt),
                    Err(err) => error!(?pos, "error loading block entities: {err:#}"),
                }
                trace!(?pos, "chunk loaded");
            }
            Ok(None) => {
                self.generator().generate_chunk(pos, &mut data.chunk);
                trace!(?pos, "chunk generated");
            }
            Err(err) => {
                error!(?pos, "error loading chunk, generating instead: {err:#}");
                self.generator().generate_chunk(pos, &mut data.chunk);
            }
        }
        LightArea::new(vec![&mut data.chunk], pos, &self.registry).fill();
    }

    /// Rebuild block entities from their saved compounds.
    fn load_into_blocks(&self, data: &mut ChunkData, nbt: Vec<NbtCompound>) {
        for mut compound in nbt {
            let (Some(x), Some(y), Some(z)) = (
                take_int(&mut compound, "x"),
                take_int(&mut compound, "y"),
                take_int(&mut compound, "z"),
            ) else {
                error!("block entity without a position");
                continue;
            };
            let pos = BlockPos::new(x, y, z);
            let local = pos.local();
            let id = data.chunk.block(local.x, pos.y, local.z, LAYER_BLOCK);
            if !self.registry.has_nbt(id) {
                debug!(?pos, "dropping block entity for a block without nbt");
                continue;
            }
            let Some(block) = self.registry.block(id) else {
                error!(?pos, id = id.0, "block entity on unknown runtime id");
                continue;
            };
            let block = if compound.is_empty() { block } else { block.with_nbt(compound) };
            data.block_entities.insert(pos, block);
        }
    }

    /// Let light cross into and out of a newly loaded chunk by spreading over
    /// every 3x3 neighbourhood around it that is now fully resident.
    pub(crate) fn spread_light_around(&self, pos: ChunkPos) {
        for dx in -1..=1 {
            for dz in -1..=1 {
                self.spread_light(ChunkPos::new(pos.x + dx, pos.z + dz));
            }
        }
    }

    fn spread_light(&self, centre: ChunkPos) {
        let base = ChunkPos::new(centre.x - 1, centre.z - 1);
        let refs: Vec<ChunkRef> = {
            let cache = self.cache.lock();
            let mut refs = Vec::with_capacity(9);
            // Ascending x then z: the lock order.
            for dx in 0..3 {
                for dz in 0..3 {
                    match cache.chunks.get(&ChunkPos::new(base.x + dx, base.z + dz)) {
                        Some(c) => refs.push(Arc::clone(c)),
                        None => return,
                    }
                }
            }
            refs
        };
        let mut guards: Vec<ChunkGuard> = refs.iter().map(|c| c.lock_arc()).collect();
        if guards.iter().any(|g| g.evicted) {
            return;
        }
        let chunks = guards.iter_mut().map(|g| &mut g.chunk).collect();
        LightArea::new(chunks, base, &self.registry).spread();
    }

    /// Evict every resident chunk nobody is viewing, saving each one.
    /// Chunks that are locked at the time are skipped until the next run.
    /// Returns the number of chunks evicted.
    ///
    /// A chunk is marked evicted under its own lock, while the store lock is
    /// still held, and stays in the store until it has been saved. Anyone who
    /// reaches it in between either subscribes before the mark (and the chunk
    /// is skipped) or waits for the save and then reloads it.
    pub fn collect_unused_chunks(&self) -> usize {
        let unused: Vec<(ChunkPos, ChunkRef, ChunkGuard)> = {
            let cache = self.cache.lock();
            cache
                .chunks
                .iter()
                .filter_map(|(pos, c)| {
                    let mut guard = c.try_lock_arc()?;
                    if !guard.viewers.is_empty() || guard.evicted {
                        return None;
                    }
                    guard.evicted = true;
                    Some((*pos, Arc::clone(c), guard))
                })
                .collect()
        };
        let count = unused.len();
        for (pos, c, guard) in unused {
            self.evict_chunk(pos, &c, guard);
        }
        if count > 0 {
            debug!(count, "evicted unused chunks");
        }
        count
    }

    /// Save a chunk already marked evicted, take it out of the store and
    /// close its entities.
    fn evict_chunk(&self, pos: ChunkPos, c: &ChunkRef, mut data: ChunkGuard) {
        data.chunk.compact();
        self.save_chunk(pos, &data);
        let entities = std::mem::take(&mut data.entities);
        // Unindexed before the lock is released, so a reload of the chunk
        // registers its entities after this.
        self.forget_entities(&entities);
        drop(data);
        self.forget_chunk(pos, c);
        self.close_entities(entities);
    }

    /// Remove the store entry for `pos` if it still refers to `c`.
    fn forget_chunk(&self, pos: ChunkPos, c: &ChunkRef) {
        let mut cache = self.cache.lock();
        if cache.chunks.get(&pos).is_some_and(|r| Arc::ptr_eq(r, c)) {
            cache.remove(pos);
        } else if cache.last.as_ref().is_some_and(|(_, r)| Arc::ptr_eq(r, c)) {
            cache.last = None;
        }
    }

    /// Write a chunk, its entities and its block entities to the provider.
    fn save_chunk(&self, pos: ChunkPos, data: &ChunkData) {
        if self.is_read_only() {
            return;
        }
        let provider = self.provider();
        if let Err(err) = provider.save_chunk(pos, &data.chunk) {
            error!(?pos, "error saving chunk: {err:#}");
        }
        if let Err(err) = provider.save_entities(pos, &data.entities) {
            error!(?pos, "error saving entities: {err:#}");
        }
        let nbt: Vec<NbtCompound> = data
            .block_entities
            .iter()
            .map(|(p, b)| block_entity_nbt(*p, b))
            .collect();
        if let Err(err) = provider.save_block_nbt(pos, &nbt) {
            error!(?pos, "error saving block entities: {err:#}");
        }
    }

    /// Save every resident chunk and leave it resident, viewers and all.
    /// Used before the provider is swapped.
    pub(crate) fn save_chunks(&self) {
        let chunks: Vec<(ChunkPos, ChunkRef)> = {
            let cache = self.cache.lock();
            cache.chunks.iter().map(|(p, c)| (*p, Arc::clone(c))).collect()
        };
        if chunks.is_empty() {
            return;
        }
        info!(count = chunks.len(), "saving chunks");
        chunks.into_par_iter().for_each(|(pos, c)| {
            let mut data = c.lock();
            if !data.evicted {
                data.chunk.compact();
                self.save_chunk(pos, &data);
            }
        });
    }

    /// Save every resident chunk and empty the store. Used on close.
    pub(crate) fn flush_chunks(&self) {
        let chunks = {
            let mut cache = self.cache.lock();
            cache.last = None;
            std::mem::take(&mut cache.chunks)
        };
        if chunks.is_empty() {
            return;
        }
        info!(count = chunks.len(), "saving chunks");
        chunks.into_par_iter().for_each(|(pos, c)| {
            let mut data = c.lock_arc();
            if data.evicted {
                return;
            }
            data.evicted = true;
            self.evict_chunk(pos, &c, data);
        });
    }

    /// Runtime id of the foreground block at `pos`, loading its chunk.
    pub(crate) fn block_id(&self, pos: BlockPos) -> BlockId {
        if pos.out_of_bounds(self.range) {
            return BlockId::AIR;
        }
        let local = pos.local();
        self.chunk(pos.chunk())
            .chunk
            .block(local.x, pos.y, local.z, LAYER_BLOCK)
    }
}

fn take_int(compound: &mut NbtCompound, key: &str) -> Option<i64> {
    match compound.remove(key)? {
        fastnbt::Value::Int(v) => Some(v as i64),
        fastnbt::Value::Long(v) => Some(v),
        fastnbt::Value::Short(v) => Some(v as i64),
        fastnbt::Value::Byte(v) => Some(v as i64),
        _ => None,
    }
}

fn block_entity_nbt(pos: BlockPos, block: &Block) -> NbtCompound {
    let mut nbt = block.nbt().cloned().unwrap_or_default();
    nbt.insert("x".to_string(), fastnbt::Value::Int(pos.x as i32));
    nbt.insert("y".to_string(), fastnbt::Value::Int(pos.y as i32));
    nbt.insert("z".to_string(), fastnbt::Value::Int(pos.z as i32));
    nbt
}
