//! Worlds saved through the Anvil provider and opened again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fastnbt::Value;

use keystone_engine::world::block::{BlockDescriptor, BlockRegistry, BlockState, NbtCompound};
use keystone_engine::world::entity::Entity;
use keystone_engine::world::position::{BlockPos, Range, Vec3};
use keystone_engine::world::provider::{Generator, NopGenerator};
use keystone_engine::world::{SetOpts, World, WorldConfig};

use keystone_server::block;
use keystone_server::entity::StoredEntity;
use keystone_server::generator::FlatGenerator;
use keystone_server::persistence::AnvilProvider;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("keystone_storage_{name}"));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn open(dir: &Path, generator: Arc<dyn Generator>, read_only: bool) -> Arc<World> {
    let registry = Arc::new(block::vanilla());
    let mut config = WorldConfig::new(Arc::clone(&registry));
    config.range = Range::new(-64, 319);
    config.provider = Arc::new(AnvilProvider::open(dir, registry).unwrap());
    config.generator = generator;
    config.tick_interval = None;
    config.janitor_interval = None;
    config.read_only = read_only;
    World::new(config)
}

fn flat() -> Arc<dyn Generator> {
    Arc::new(FlatGenerator::standard(&block::vanilla()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn closed_worlds_reopen_with_everything() {
    let dir = temp_dir("reopen");
    let chest_pos = BlockPos::new(1, 67, 1);
    let gate_pos = BlockPos::new(-20, 67, 5);
    let items = NbtCompound::from([("Lock".to_string(), Value::String("key".into()))]);
    let entity = Arc::new(StoredEntity::new("minecraft:pig", Vec3::new(2.5, 67.0, 2.5)));
    let entity_id = entity.uuid();

    let world = open(&dir, flat(), false);
    world.set_block(chest_pos, block::chest("north").with_nbt(items.clone()), SetOpts::default());
    world.set_liquid(gate_pos, Some(block::water(0)));
    world.set_block(gate_pos, block::fence_gate("west", false), SetOpts::default());
    world.add_entity(entity);
    world.set_time(1234);
    world.set_spawn(BlockPos::new(4, 80, 4));
    world.close();

    assert!(dir.join("region/r.0.0.mca").exists());
    assert!(dir.join("region/r.-1.0.mca").exists());
    assert!(dir.join("entities/r.0.0.mca").exists());
    assert!(dir.join("level.dat").exists());

    // Nothing is generated on reopen: every block below comes from disk.
    let world = open(&dir, Arc::new(NopGenerator), false);
    assert_eq!(world.time(), 1234);
    assert_eq!(world.spawn(), BlockPos::new(4, 80, 4));
    assert_eq!(world.block(BlockPos::new(0, 66, 0)), block::grass_block());
    assert_eq!(world.block(BlockPos::new(9, 60, 3)).name(), block::BEDROCK);

    let chest = world.block(chest_pos);
    assert_eq!(chest.state(), block::chest("north").state());
    assert_eq!(chest.nbt(), Some(&items));

    assert_eq!(world.block(gate_pos), block::fence_gate("west", false));
    assert_eq!(world.liquid(gate_pos), Some(block::water(0)));

    let entities = world.entities();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].uuid(), entity_id);
    assert_eq!(entities[0].position(), Vec3::new(2.5, 67.0, 2.5));

    world.close();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn evicted_chunks_are_read_back_before_generation() {
    let dir = temp_dir("evict");
    let world = open(&dir, flat(), false);
    let pos = BlockPos::new(40, 90, -40);
    world.set_block(pos, block::block(block::GLASS), SetOpts::default());

    assert!(world.collect_unused_chunks() >= 1);
    assert!(!world.is_chunk_loaded(pos.chunk()));

    assert_eq!(world.block(pos).name(), block::GLASS);
    assert_eq!(world.block(pos.below()).name(), block::AIR);
    world.close();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn read_only_worlds_leave_the_directory_alone() {
    let dir = temp_dir("read_only");
    let pos = BlockPos::new(0, 70, 0);

    let world = open(&dir, flat(), true);
    world.set_block(pos, block::block(block::STONE), SetOpts::default());
    world.set_time(999);
    world.close();

    assert!(!dir.join("level.dat").exists());
    assert!(!dir.join("region/r.0.0.mca").exists());

    let world = open(&dir, flat(), false);
    assert_eq!(world.block(pos).name(), block::AIR);
    assert_eq!(world.time(), 0);
    world.close();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn saved_names_survive_a_reordered_registry() {
    let dir = temp_dir("names");
    let pos = BlockPos::new(3, 100, 3);
    let world = open(&dir, Arc::new(NopGenerator), false);
    world.set_block(pos, block::block(block::TORCH), SetOpts::default());
    world.close();

    // A registry with an extra state in front shifts every runtime id.
    let mut builder = BlockRegistry::builder();
    builder.register(BlockDescriptor::solid(BlockState::new("minecraft:obsidian")));
    builder.register(BlockDescriptor::transparent(BlockState::new(block::TORCH)));
    let registry = Arc::new(builder.build());
    let mut config = WorldConfig::new(Arc::clone(&registry));
    config.range = Range::new(-64, 319);
    config.provider = Arc::new(AnvilProvider::open(&dir, registry).unwrap());
    config.tick_interval = None;
    config.janitor_interval = None;
    let world = World::new(config);

    assert_eq!(world.block(pos).name(), block::TORCH);
    world.close();
    let _ = std::fs::remove_dir_all(&dir);
}
