//! Persistence and generation collaborators.

use std::sync::Arc;

use anyhow::Result;

use super::block::NbtCompound;
use super::chunk::Chunk;
use super::entity::Entity;
use super::position::{ChunkPos, Range};
use super::settings::Settings;

/// Storage backend for chunks, their entities and block-entity data.
///
/// Errors are reported to the chunk loader, which logs them and degrades
/// (a failed load generates a fresh chunk, a failed save loses the data).
#[allow(unused_variables)]
pub trait Provider: Send + Sync {
    /// Overwrite `settings` with whatever the storage holds.
    fn settings(&self, settings: &mut Settings) {}

    fn save_settings(&self, settings: &Settings) {}

    /// `Ok(None)` means the chunk was never saved and should be generated.
    fn load_chunk(&self, pos: ChunkPos, range: Range) -> Result<Option<Chunk>>;

    fn save_chunk(&self, pos: ChunkPos, chunk: &Chunk) -> Result<()>;

    fn load_entities(&self, pos: ChunkPos) -> Result<Vec<Arc<dyn Entity>>>;

    /// Entities whose [`Entity::encode_nbt`] returns `None` are not saveable
    /// and should be skipped.
    fn save_entities(&self, pos: ChunkPos, entities: &[Arc<dyn Entity>]) -> Result<()>;

    /// Block-entity compounds, each carrying `x`, `y` and `z` int tags.
    fn load_block_nbt(&self, pos: ChunkPos) -> Result<Vec<NbtCompound>>;

    fn save_block_nbt(&self, pos: ChunkPos, data: &[NbtCompound]) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// A provider that stores nothing. Every chunk is generated.
pub struct NopProvider;

impl Provider for NopProvider {
    fn load_chunk(&self, _pos: ChunkPos, _range: Range) -> Result<Option<Chunk>> {
        Ok(None)
    }

    fn save_chunk(&self, _pos: ChunkPos, _chunk: &Chunk) -> Result<()> {
        Ok(())
    }

    fn load_entities(&self, _pos: ChunkPos) -> Result<Vec<Arc<dyn Entity>>> {
        Ok(Vec::new())
    }

    fn save_entities(&self, _pos: ChunkPos, _entities: &[Arc<dyn Entity>]) -> Result<()> {
        Ok(())
    }

    fn load_block_nbt(&self, _pos: ChunkPos) -> Result<Vec<NbtCompound>> {
        Ok(Vec::new())
    }

    fn save_block_nbt(&self, _pos: ChunkPos, _data: &[NbtCompound]) -> Result<()> {
        Ok(())
    }
}

/// Fills freshly allocated chunks.
///
/// Generators must not call back into the World: they run while the chunk
/// being generated is locked.
pub trait Generator: Send + Sync {
    fn generate_chunk(&self, pos: ChunkPos, chunk: &mut Chunk);
}

/// Leaves every chunk empty (all air).
pub struct NopGenerator;

impl Generator for NopGenerator {
    fn generate_chunk(&self, _pos: ChunkPos, _chunk: &mut Chunk) {}
}
