//! Chunk loaders: keep the chunks around a moving point resident and
//! subscribe a viewer to them.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use slotmap::new_key_type;
use tracing::{debug, trace};

use super::cache::ChunkGuard;
use super::position::{ChunkPos, Vec3};
use super::viewer::{show_entity, Viewer};
use super::World;

new_key_type! {
    /// Identifies a loader's registration within one World.
    pub struct LoaderKey;
}

/// World-level registration of a loader's viewer.
pub(crate) struct LoaderEntry {
    viewer: Arc<dyn Viewer>,
    pos: ChunkPos,
}

impl World {
    /// Register a viewer for world-wide state and push the current time,
    /// weather and spawn to it.
    pub(crate) fn add_world_viewer(&self, viewer: Arc<dyn Viewer>, pos: ChunkPos) -> LoaderKey {
        let key = self.loaders.lock().insert(LoaderEntry {
            viewer: Arc::clone(&viewer),
            pos,
        });
        let (time, raining, thunder) = {
            let s = self.settings.lock();
            (s.time, s.raining, s.raining && s.thundering)
        };
        viewer.view_time(time);
        viewer.view_weather(raining, thunder);
        viewer.view_world_spawn(self.spawn());
        key
    }

    pub(crate) fn remove_world_viewer(&self, key: LoaderKey) {
        self.loaders.lock().remove(key);
    }

    pub(crate) fn move_world_viewer(&self, key: LoaderKey, pos: ChunkPos) {
        if let Some(entry) = self.loaders.lock().get_mut(key) {
            entry.pos = pos;
        }
    }

    /// Every registered loader viewer.
    pub(crate) fn world_viewers(&self) -> Vec<Arc<dyn Viewer>> {
        self.loaders
            .lock()
            .values()
            .map(|e| Arc::clone(&e.viewer))
            .collect()
    }

    /// Positions of every registered loader.
    pub(crate) fn loader_positions(&self) -> Vec<ChunkPos> {
        self.loaders.lock().values().map(|e| e.pos).collect()
    }

    /// Subscribe `viewer` to a locked chunk, then show it the chunk's
    /// entities once the lock is released.
    pub(crate) fn add_viewer(&self, mut c: ChunkGuard, key: LoaderKey, viewer: Arc<dyn Viewer>) {
        c.viewers.push(Arc::clone(&viewer));
        c.loaders.push(key);
        let entities = c.entities.clone();
        drop(c);
        for e in &entities {
            show_entity(e, viewer.as_ref());
        }
    }

    /// Unsubscribe a loader from the chunk at `pos`, hiding its entities.
    pub(crate) fn remove_viewer(&self, pos: ChunkPos, key: LoaderKey) {
        let Some(c) = self.chunk_from_cache(pos) else {
            return;
        };
        let mut c = c.lock();
        let Some(i) = c.loaders.iter().position(|k| *k == key) else {
            return;
        };
        c.loaders.swap_remove(i);
        let viewer = c.viewers.swap_remove(i);
        let entities = c.entities.clone();
        drop(c);
        for e in &entities {
            viewer.hide_entity(e);
        }
    }
}

struct LoaderState {
    world: Arc<World>,
    key: LoaderKey,
    radius: i32,
    pos: ChunkPos,
    loaded: HashSet<ChunkPos>,
    queue: Vec<ChunkPos>,
    closed: bool,
}

/// Loads the chunks in a circle around a position and keeps a viewer
/// subscribed to them. Chunks are sent nearest first, a few per call to
/// [`Loader::load`].
pub struct Loader {
    viewer: Arc<dyn Viewer>,
    state: Mutex<LoaderState>,
}

impl Loader {
    pub fn new(radius: i32, world: &Arc<World>, viewer: Arc<dyn Viewer>) -> Self {
        let pos = ChunkPos::new(0, 0);
        let key = world.add_world_viewer(Arc::clone(&viewer), pos);
        let mut state = LoaderState {
            world: Arc::clone(world),
            key,
            radius,
            pos,
            loaded: HashSet::new(),
            queue: Vec::new(),
            closed: false,
        };
        state.populate_queue();
        Self {
            viewer,
            state: Mutex::new(state),
        }
    }

    pub fn world(&self) -> Arc<World> {
        Arc::clone(&self.state.lock().world)
    }

    pub fn position(&self) -> ChunkPos {
        self.state.lock().pos
    }

    pub fn radius(&self) -> i32 {
        self.state.lock().radius
    }

    /// Chunks currently subscribed to.
    pub fn loaded_chunks(&self) -> Vec<ChunkPos> {
        self.state.lock().loaded.iter().copied().collect()
    }

    /// Number of chunks still waiting to be loaded.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Move the loader. Chunks that fall out of range are unsubscribed.
    pub fn move_to(&self, pos: Vec3) {
        let mut s = self.state.lock();
        if s.closed {
            return;
        }
        let chunk = pos.chunk();
        if chunk == s.pos {
            return;
        }
        s.pos = chunk;
        s.world.move_world_viewer(s.key, chunk);
        s.evict_unused();
        s.populate_queue();
    }

    pub fn change_radius(&self, radius: i32) {
        let mut s = self.state.lock();
        if s.closed {
            return;
        }
        s.radius = radius;
        s.evict_unused();
        s.populate_queue();
    }

    /// Move the loader to another World, dropping every subscription in the
    /// current one.
    pub fn change_world(&self, world: &Arc<World>) {
        let mut s = self.state.lock();
        if s.closed {
            return;
        }
        s.reset();
        s.world = Arc::clone(world);
        s.key = world.add_world_viewer(Arc::clone(&self.viewer), s.pos);
        s.populate_queue();
    }

    /// Load and subscribe to up to `n` queued chunks, nearest first.
    pub fn load(&self, n: usize) {
        let mut s = self.state.lock();
        for _ in 0..n {
            if s.closed || s.world.is_closed() || s.queue.is_empty() {
                break;
            }
            let pos = s.queue.remove(0);
            let c = s.world.chunk(pos);
            self.viewer.view_chunk(pos, &c.chunk, &c.block_entities);
            s.world.add_viewer(c, s.key, Arc::clone(&self.viewer));
            s.loaded.insert(pos);
            trace!(?pos, "chunk sent to loader");
        }
    }

    /// Unsubscribe from everything. The loader is unusable afterwards.
    pub fn close(&self) {
        let mut s = self.state.lock();
        if s.closed {
            return;
        }
        s.reset();
        s.closed = true;
        debug!("loader closed");
    }
}

impl Drop for Loader {
    fn drop(&mut self) {
        self.close();
    }
}

impl LoaderState {
    fn reset(&mut self) {
        for pos in self.loaded.drain() {
            self.world.remove_viewer(pos, self.key);
        }
        self.world.remove_world_viewer(self.key);
        self.queue.clear();
    }

    fn in_radius(&self, pos: ChunkPos) -> bool {
        let (dx, dz) = (pos.x - self.pos.x, pos.z - self.pos.z);
        dx * dx + dz * dz <= self.radius * self.radius
    }

    fn evict_unused(&mut self) {
        let out: Vec<ChunkPos> = self
            .loaded
            .iter()
            .copied()
            .filter(|p| !self.in_radius(*p))
            .collect();
        for pos in out {
            self.world.remove_viewer(pos, self.key);
            self.loaded.remove(&pos);
        }
    }

    fn populate_queue(&mut self) {
        let r = self.radius;
        let mut queue = Vec::new();
        for dx in -r..=r {
            for dz in -r..=r {
                let pos = ChunkPos::new(self.pos.x + dx, self.pos.z + dz);
                if self.in_radius(pos) && !self.loaded.contains(&pos) {
                    queue.push(pos);
                }
            }
        }
        let centre = self.pos;
        queue.sort_by_key(|p| {
            let (dx, dz) = (p.x - centre.x, p.z - centre.z);
            dx * dx + dz * dz
        });
        self.queue = queue;
    }
}
