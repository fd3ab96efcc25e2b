pub mod block;
pub mod cache;
pub mod chunk;
pub mod entity;
pub mod handler;
pub mod light;
pub mod loader;
pub mod position;
pub mod provider;
pub mod settings;
pub mod structure;
pub mod tick;
pub mod viewer;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use slotmap::SlotMap;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::rules::RuleSet;
use block::{Block, BlockId, BlockRegistry};
use cache::{ChunkCache, ChunkData};
use chunk::{BiomeId, LAYER_BLOCK, LAYER_LIQUID};
use entity::{Entity, EntityRegistry};
use handler::{Context, Handler, NopHandler};
use loader::{LoaderEntry, LoaderKey};
use position::{BlockPos, ChunkPos, Range, Vec3};
use provider::{Generator, NopGenerator, NopProvider, Provider};
use settings::Settings;
use tick::UpdateQueue;
use viewer::{Particle, Sound, Viewer};

/// Everything needed to open a [`World`].
pub struct WorldConfig {
    pub range: Range,
    pub settings: Settings,
    pub registry: Arc<BlockRegistry>,
    /// Shared by every World of the process.
    pub entity_registry: Arc<EntityRegistry>,
    pub provider: Arc<dyn Provider>,
    pub generator: Arc<dyn Generator>,
    pub handler: Arc<dyn Handler>,
    pub rules: RuleSet,
    /// How often the background tick runs. `None` leaves ticking to the caller.
    pub tick_interval: Option<Duration>,
    /// How often unviewed chunks are evicted. `None` disables the janitor.
    pub janitor_interval: Option<Duration>,
    /// Never write chunks or settings back to the provider.
    pub read_only: bool,
}

impl WorldConfig {
    pub fn new(registry: Arc<BlockRegistry>) -> Self {
        Self {
            range: Range::default(),
            settings: Settings::default(),
            registry,
            entity_registry: Arc::new(EntityRegistry::new()),
            provider: Arc::new(NopProvider),
            generator: Arc::new(NopGenerator),
            handler: Arc::new(NopHandler),
            rules: RuleSet::new(),
            tick_interval: Some(Duration::from_millis(50)),
            janitor_interval: Some(Duration::from_secs(300)),
            read_only: false,
        }
    }
}

/// Options for [`World::set_block`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOpts {
    /// Don't queue neighbour updates around the changed block.
    pub disable_block_updates: bool,
    /// Don't move liquids between layers.
    pub disable_liquid_displacement: bool,
}

/// A live voxel world.
///
/// All operations take `&self` and are safe to call from any thread. Chunks
/// are loaded on first touch, stay resident while a loader views them and are
/// saved and evicted by the janitor afterwards.
pub struct World {
    range: Range,
    registry: Arc<BlockRegistry>,
    entity_registry: Arc<EntityRegistry>,
    rules: RuleSet,

    settings: Mutex<Settings>,
    provider: RwLock<Arc<dyn Provider>>,
    generator: RwLock<Arc<dyn Generator>>,
    handler: RwLock<Arc<dyn Handler>>,

    cache: Mutex<ChunkCache>,
    /// Entity -> chunk it is stored in.
    entities: DashMap<Uuid, (Arc<dyn Entity>, ChunkPos)>,
    updates: Mutex<UpdateQueue>,
    loaders: Mutex<SlotMap<LoaderKey, LoaderEntry>>,
    portals: Mutex<(Weak<World>, Weak<World>)>,

    read_only: AtomicBool,
    closed: AtomicBool,
    closing: Mutex<Option<Sender<()>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    this: Weak<World>,
}

impl World {
    /// Open a world and start its background tick and janitor threads.
    pub fn new(config: WorldConfig) -> Arc<World> {
        let mut settings = config.settings;
        config.provider.settings(&mut settings);
        info!(name = %settings.name, min = config.range.min, max = config.range.max, "opening world");

        let world = Arc::new_cyclic(|this| World {
            range: config.range,
            registry: config.registry,
            entity_registry: config.entity_registry,
            rules: config.rules,
            settings: Mutex::new(settings),
            provider: RwLock::new(config.provider),
            generator: RwLock::new(config.generator),
            handler: RwLock::new(config.handler),
            cache: Mutex::new(ChunkCache::default()),
            entities: DashMap::new(),
            updates: Mutex::new(UpdateQueue::default()),
            loaders: Mutex::new(SlotMap::with_key()),
            portals: Mutex::new((Weak::new(), Weak::new())),
            read_only: AtomicBool::new(config.read_only),
            closed: AtomicBool::new(false),
            closing: Mutex::new(None),
            threads: Mutex::new(Vec::new()),
            this: this.clone(),
        });
        tick::spawn_background(&world, config.tick_interval, config.janitor_interval);
        world
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn registry(&self) -> &Arc<BlockRegistry> {
        &self.registry
    }

    pub fn entity_registry(&self) -> &Arc<EntityRegistry> {
        &self.entity_registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    /// The block at `pos`. Air outside the vertical range or once closed.
    pub fn block(&self, pos: BlockPos) -> Block {
        if self.is_closed() || pos.out_of_bounds(self.range) {
            return self.registry.air();
        }
        let c = self.chunk(pos.chunk());
        self.block_in_chunk(&c, pos)
    }

    pub(crate) fn block_in_chunk(&self, c: &ChunkData, pos: BlockPos) -> Block {
        if pos.out_of_bounds(self.range) {
            return self.registry.air();
        }
        let local = pos.local();
        let id = c.chunk.block(local.x, pos.y, local.z, LAYER_BLOCK);
        if self.registry.has_nbt(id) {
            if let Some(b) = c.block_entities.get(&pos) {
                return b.clone();
            }
        }
        self.decode(id)
    }

    pub(crate) fn decode(&self, id: BlockId) -> Block {
        match self.registry.block(id) {
            Some(b) => b,
            None => {
                error!(id = id.0, "unknown runtime id, reading as air");
                self.registry.air()
            }
        }
    }

    /// Place `block` at `pos`.
    ///
    /// Unless disabled by `opts`, placing air lifts a liquid from the overlay
    /// layer into the foreground, placing a displacing block over a liquid
    /// source keeps the liquid on the overlay layer, and neighbour updates are
    /// queued around `pos`.
    ///
    /// # Panics
    ///
    /// If `block` is not registered.
    pub fn set_block(&self, pos: BlockPos, block: Block, opts: SetOpts) {
        if self.is_closed() || pos.out_of_bounds(self.range) {
            return;
        }
        let id = self.registry.runtime_id(&block);
        let local = pos.local();
        let (x, y, z) = (local.x, pos.y, local.z);

        let mut c = self.chunk(pos.chunk());
        let before = c.chunk.block(x, y, z, LAYER_BLOCK);
        c.chunk.set_block(x, y, z, LAYER_BLOCK, id);
        if self.registry.has_nbt(id) {
            c.block_entities.insert(pos, block.clone());
        } else {
            c.block_entities.remove(&pos);
        }

        let mut shown = block;
        let mut overlay = None;
        if !opts.disable_liquid_displacement {
            let liquid = c.chunk.block(x, y, z, LAYER_LIQUID);
            if id == BlockId::AIR {
                if liquid != BlockId::AIR {
                    c.chunk.set_block(x, y, z, LAYER_BLOCK, liquid);
                    c.chunk.set_block(x, y, z, LAYER_LIQUID, BlockId::AIR);
                    shown = self.decode(liquid);
                    overlay = Some(self.registry.air());
                }
            } else if let Some(info) = self.registry.liquid(before) {
                if info.is_source() && self.registry.can_displace(id, info.kind) {
                    c.chunk.set_block(x, y, z, LAYER_LIQUID, before);
                    overlay = Some(self.decode(before));
                }
            } else if liquid != BlockId::AIR
                && !self
                    .registry
                    .liquid(liquid)
                    .is_some_and(|info| self.registry.can_displace(id, info.kind))
            {
                c.chunk.set_block(x, y, z, LAYER_LIQUID, BlockId::AIR);
                overlay = Some(self.registry.air());
            }
        }
        let viewers = c.viewers.clone();
        drop(c);

        for v in &viewers {
            v.view_block_update(pos, &shown, LAYER_BLOCK);
            if let Some(o) = &overlay {
                v.view_block_update(pos, o, LAYER_LIQUID);
            }
        }
        if !opts.disable_block_updates {
            self.do_block_updates_around(pos);
        }
    }

    /// The liquid at `pos`, on either layer.
    pub fn liquid(&self, pos: BlockPos) -> Option<Block> {
        if self.is_closed() || pos.out_of_bounds(self.range) {
            return None;
        }
        let local = pos.local();
        let c = self.chunk(pos.chunk());
        for layer in [LAYER_BLOCK, LAYER_LIQUID] {
            let id = c.chunk.block(local.x, pos.y, local.z, layer);
            if self.registry.is_liquid(id) {
                return self.registry.block(id);
            }
        }
        None
    }

    /// Place a liquid at `pos`, or remove all liquid there with `None`.
    ///
    /// The liquid goes on the foreground layer when nothing else occupies it,
    /// otherwise on the overlay layer. It is refused when the foreground block
    /// can neither be replaced nor displace this kind of liquid.
    ///
    /// # Panics
    ///
    /// If `liquid` is not a registered liquid.
    pub fn set_liquid(&self, pos: BlockPos, liquid: Option<Block>) {
        if self.is_closed() || pos.out_of_bounds(self.range) {
            return;
        }
        let local = pos.local();
        let (x, y, z) = (local.x, pos.y, local.z);

        let Some(liquid) = liquid else {
            let mut c = self.chunk(pos.chunk());
            let changed = self.remove_liquids(&mut c, x, y, z);
            let viewers = c.viewers.clone();
            drop(c);
            for v in &viewers {
                for layer in &changed {
                    v.view_block_update(pos, &self.registry.air(), *layer);
                }
            }
            self.do_block_updates_around(pos);
            return;
        };

        let id = self.registry.runtime_id(&liquid);
        let Some(info) = self.registry.liquid(id) else {
            panic!("{} is not a liquid", liquid.state());
        };

        let mut c = self.chunk(pos.chunk());
        let current = c.chunk.block(x, y, z, LAYER_BLOCK);
        if !self.registry.is_replaceable(current) && !self.registry.can_displace(current, info.kind) {
            return;
        }
        let mut changed = self.remove_liquids(&mut c, x, y, z);
        let foreground = c.chunk.block(x, y, z, LAYER_BLOCK);
        let layer = if foreground == BlockId::AIR { LAYER_BLOCK } else { LAYER_LIQUID };
        c.chunk.set_block(x, y, z, layer, id);
        changed.retain(|l| *l != layer);
        let viewers = c.viewers.clone();
        drop(c);

        for v in &viewers {
            for l in &changed {
                v.view_block_update(pos, &self.registry.air(), *l);
            }
            v.view_block_update(pos, &liquid, layer);
        }
        self.do_block_updates_around(pos);
    }

    /// Clear liquids from both layers. Returns the layers that changed.
    fn remove_liquids(&self, c: &mut ChunkData, x: u8, y: i64, z: u8) -> Vec<u8> {
        let mut changed = Vec::new();
        for layer in [LAYER_BLOCK, LAYER_LIQUID] {
            if self.registry.is_liquid(c.chunk.block(x, y, z, layer)) {
                c.chunk.set_block(x, y, z, layer, BlockId::AIR);
                changed.push(layer);
            }
        }
        changed
    }

    pub fn biome(&self, pos: BlockPos) -> BiomeId {
        if self.is_closed() || pos.out_of_bounds(self.range) {
            return BiomeId::OCEAN;
        }
        let local = pos.local();
        self.chunk(pos.chunk()).chunk.biome(local.x, pos.y, local.z)
    }

    pub fn set_biome(&self, pos: BlockPos, biome: BiomeId) {
        if self.is_closed() || pos.out_of_bounds(self.range) {
            return;
        }
        let local = pos.local();
        self.chunk(pos.chunk())
            .chunk
            .set_biome(local.x, pos.y, local.z, biome);
    }

    /// Combined sky and block light. Full above the range, dark below it.
    pub fn light(&self, pos: BlockPos) -> u8 {
        if pos.y > self.range.max {
            return 15;
        }
        if pos.y < self.range.min || self.is_closed() {
            return 0;
        }
        let local = pos.local();
        self.chunk(pos.chunk()).chunk.light(local.x, pos.y, local.z)
    }

    pub fn sky_light(&self, pos: BlockPos) -> u8 {
        if pos.y > self.range.max {
            return 15;
        }
        if pos.y < self.range.min || self.is_closed() {
            return 0;
        }
        let local = pos.local();
        self.chunk(pos.chunk()).chunk.sky_light(local.x, pos.y, local.z)
    }

    /// Y of the highest non-air block in the column, or the bottom of the range.
    pub fn highest_block(&self, x: i64, z: i64) -> i64 {
        if self.is_closed() {
            return self.range.min;
        }
        let pos = BlockPos::new(x, 0, z);
        let local = pos.local();
        self.chunk(pos.chunk()).chunk.highest_block(local.x, local.z)
    }

    /// Y of the highest block that fully blocks light.
    pub fn highest_light_blocker(&self, x: i64, z: i64) -> i64 {
        if self.is_closed() {
            return self.range.min;
        }
        let pos = BlockPos::new(x, 0, z);
        let local = pos.local();
        self.chunk(pos.chunk())
            .chunk
            .highest_light_blocker(local.x, local.z, &self.registry)
    }

    /// Y of the highest solid block in the column, or the bottom of the range.
    pub fn highest_obstructing_block(&self, x: i64, z: i64) -> i64 {
        if self.is_closed() {
            return self.range.min;
        }
        let pos = BlockPos::new(x, 0, z);
        let local = pos.local();
        let c = self.chunk(pos.chunk());
        let top = c.chunk.highest_block(local.x, local.z);
        (self.range.min..=top)
            .rev()
            .find(|y| self.registry.is_solid(c.chunk.block(local.x, *y, local.z, LAYER_BLOCK)))
            .unwrap_or(self.range.min)
    }

    /// Show a particle to the viewers of the chunk at `pos`.
    pub fn add_particle(&self, pos: Vec3, particle: &Particle) {
        for v in self.viewers(pos) {
            v.view_particle(pos, particle);
        }
    }

    /// Play a sound to the viewers of the chunk at `pos`, unless the handler
    /// cancels it.
    pub fn play_sound(&self, pos: Vec3, sound: &Sound) {
        let mut ctx = Context::new();
        self.handler().handle_sound(&mut ctx, sound, pos);
        if ctx.is_cancelled() {
            return;
        }
        for v in self.viewers(pos) {
            v.view_sound(pos, sound);
        }
    }

    /// Viewers of the chunk containing `pos`. Empty if it is not resident.
    pub fn viewers(&self, pos: Vec3) -> Vec<Arc<dyn Viewer>> {
        match self.chunk_from_cache(pos.chunk()) {
            Some(c) => c.lock().viewers.clone(),
            None => Vec::new(),
        }
    }

    /// Worlds that nether and end portals in this world lead to.
    pub fn portal_destinations(&self) -> (Option<Arc<World>>, Option<Arc<World>>) {
        let p = self.portals.lock();
        (p.0.upgrade(), p.1.upgrade())
    }

    pub fn set_portal_destinations(&self, nether: Option<&Arc<World>>, end: Option<&Arc<World>>) {
        *self.portals.lock() = (
            nether.map(Arc::downgrade).unwrap_or_default(),
            end.map(Arc::downgrade).unwrap_or_default(),
        );
    }

    pub fn provider(&self) -> Arc<dyn Provider> {
        self.provider.read().clone()
    }

    /// Switch storage backends. Resident chunks are saved to the old provider
    /// and stay loaded, with their viewers, and settings are reloaded from
    /// the new one.
    pub fn set_provider(&self, provider: Arc<dyn Provider>) {
        self.save_chunks();
        let mut settings = self.settings.lock();
        provider.settings(&mut *settings);
        *self.provider.write() = provider;
        debug!("provider replaced");
    }

    pub fn generator(&self) -> Arc<dyn Generator> {
        self.generator.read().clone()
    }

    /// Takes effect for chunks generated from now on.
    pub fn set_generator(&self, generator: Arc<dyn Generator>) {
        *self.generator.write() = generator;
    }

    pub fn handler(&self) -> Arc<dyn Handler> {
        self.handler.read().clone()
    }

    pub fn set_handler(&self, handler: Arc<dyn Handler>) {
        *self.handler.write() = handler;
    }

    /// Stop background work, save every resident chunk and the settings, and
    /// close the provider. Later calls do nothing; every other operation
    /// becomes a no-op returning defaults.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(name = %self.name(), "closing world");
        self.handler().handle_close();
        self.set_handler(Arc::new(NopHandler));
        tick::stop_background(self);

        self.flush_chunks();
        let provider = self.provider();
        if !self.is_read_only() {
            provider.save_settings(&self.settings());
        }
        if let Err(err) = provider.close() {
            error!("error closing provider: {err:#}");
        }
        self.loaders.lock().clear();
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.close();
    }
}
