//! Push-only sinks for world changes.
//!
//! A [`Viewer`] receives notifications for the chunks its loader subscribed
//! to, plus world-wide state (time, weather, spawn). Implementations must not
//! block: buffer or hand off to another task instead.

use std::collections::HashMap;
use std::sync::Arc;

use super::block::Block;
use super::chunk::Chunk;
use super::entity::Entity;
use super::position::{BlockPos, ChunkPos, Vec3};

/// A visual effect shown at a position. Particle catalogues live outside the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub name: String,
}

impl Particle {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A sound played at a position.
#[derive(Debug, Clone, PartialEq)]
pub struct Sound {
    pub name: String,
    pub volume: f32,
    pub pitch: f32,
}

impl Sound {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            volume: 1.0,
            pitch: 1.0,
        }
    }
}

/// Every method defaults to doing nothing, so a viewer only implements what
/// it forwards.
#[allow(unused_variables)]
pub trait Viewer: Send + Sync {
    fn view_block_update(&self, pos: BlockPos, block: &Block, layer: u8) {}

    /// A whole chunk, sent when a loader subscribes to it or after a bulk
    /// structure write.
    fn view_chunk(&self, pos: ChunkPos, chunk: &Chunk, block_entities: &HashMap<BlockPos, Block>) {}

    fn view_entity(&self, entity: &Arc<dyn Entity>) {}
    fn view_entity_state(&self, entity: &Arc<dyn Entity>) {}
    fn view_entity_items(&self, entity: &Arc<dyn Entity>) {}
    fn view_entity_armour(&self, entity: &Arc<dyn Entity>) {}
    fn hide_entity(&self, entity: &Arc<dyn Entity>) {}

    fn view_particle(&self, pos: Vec3, particle: &Particle) {}
    fn view_sound(&self, pos: Vec3, sound: &Sound) {}

    fn view_time(&self, time: i64) {}
    fn view_weather(&self, raining: bool, thunder: bool) {}
    fn view_world_spawn(&self, pos: BlockPos) {}
}

/// A viewer that discards everything.
pub struct NopViewer;

impl Viewer for NopViewer {}

/// Show everything about an entity to a viewer that has not seen it before.
pub(crate) fn show_entity(entity: &Arc<dyn Entity>, viewer: &dyn Viewer) {
    viewer.view_entity(entity);
    viewer.view_entity_state(entity);
    viewer.view_entity_items(entity);
    viewer.view_entity_armour(entity);
}

/// Identity comparison for viewer handles (ignores vtable pointers).
pub(crate) fn same_viewer(a: &Arc<dyn Viewer>, b: &Arc<dyn Viewer>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
