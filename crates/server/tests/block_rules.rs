//! Gravity, liquid and grass rules running on a flat vanilla world.

use std::sync::Arc;

use keystone_engine::world::loader::Loader;
use keystone_engine::world::position::BlockPos;
use keystone_engine::world::viewer::NopViewer;
use keystone_engine::world::{SetOpts, World, WorldConfig};

use keystone_server::block;
use keystone_server::generator::FlatGenerator;
use keystone_server::rules;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Flat world ticked by hand: grass on top at y=66, air from y=67.
fn flat_world() -> (Arc<World>, i64) {
    let registry = Arc::new(block::vanilla());
    let generator = FlatGenerator::standard(&registry);
    let surface = generator.surface();
    let mut config = WorldConfig::new(registry);
    config.generator = Arc::new(generator);
    config.rules = rules::standard();
    config.tick_interval = None;
    config.janitor_interval = None;
    (World::new(config), surface)
}

fn run(world: &World, ticks: usize) {
    for _ in 0..ticks {
        world.tick();
    }
}

fn name_at(world: &World, x: i64, y: i64, z: i64) -> String {
    world.block(BlockPos::new(x, y, z)).name().to_string()
}

// ---------------------------------------------------------------------------
// Gravity
// ---------------------------------------------------------------------------

#[test]
fn sand_falls_to_the_surface() {
    let (world, surface) = flat_world();
    let start = BlockPos::new(8, surface + 10, 8);
    world.set_block(start, block::block(block::SAND), SetOpts::default());

    run(&world, 200);

    assert_eq!(name_at(&world, 8, surface, 8), block::SAND);
    for y in surface + 1..=surface + 10 {
        assert_eq!(name_at(&world, 8, y, 8), block::AIR, "y={y}");
    }
}

#[test]
fn sand_pillars_collapse_in_order() {
    let (world, surface) = flat_world();
    world.set_block(BlockPos::new(0, surface + 5, 0), block::block(block::SAND), SetOpts::default());
    world.set_block(BlockPos::new(0, surface + 6, 0), block::block(block::GRAVEL), SetOpts::default());

    run(&world, 200);

    assert_eq!(name_at(&world, 0, surface, 0), block::SAND);
    assert_eq!(name_at(&world, 0, surface + 1, 0), block::GRAVEL);
    assert_eq!(name_at(&world, 0, surface + 2, 0), block::AIR);
}

#[test]
fn supported_sand_stays_put() {
    let (world, surface) = flat_world();
    let pos = BlockPos::new(3, surface, 3);
    world.set_block(pos, block::block(block::SAND), SetOpts::default());

    run(&world, 50);

    assert_eq!(world.block(pos).name(), block::SAND);
    assert_eq!(world.scheduled_update(pos), None);
}

#[test]
fn sand_sinks_through_water() {
    let (world, surface) = flat_world();
    world.set_liquid(BlockPos::new(0, surface, 0), Some(block::water(0)));
    world.set_block(BlockPos::new(0, surface + 3, 0), block::block(block::SAND), SetOpts::default());

    run(&world, 600);

    assert_eq!(name_at(&world, 0, surface, 0), block::SAND);
    // The displaced source is gone, so its spread drains away.
    for x in -8..=8 {
        assert!(world.liquid(BlockPos::new(x, surface, 1)).is_none(), "x={x}");
    }
}

// ---------------------------------------------------------------------------
// Liquids
// ---------------------------------------------------------------------------

#[test]
fn water_spreads_seven_blocks_and_stops() {
    let (world, surface) = flat_world();
    world.set_liquid(BlockPos::new(0, surface, 0), Some(block::water(0)));

    run(&world, 300);

    let at = |x, z| world.liquid(BlockPos::new(x, surface, z));
    assert_eq!(at(0, 0), Some(block::water(0)));
    assert_eq!(at(1, 0), Some(block::water(1)));
    assert_eq!(at(3, 0), Some(block::water(3)));
    assert_eq!(at(-7, 0), Some(block::water(7)));
    assert_eq!(at(0, 7), Some(block::water(7)));
    // Spread follows taxicab distance.
    assert_eq!(at(2, 2), Some(block::water(4)));
    assert_eq!(at(8, 0), None);
    assert_eq!(at(4, 4), None);
    // Nothing sinks into the grass.
    assert!(world.liquid(BlockPos::new(0, surface - 1, 0)).is_none());
}

#[test]
fn lava_spreads_less_and_slower() {
    let (world, surface) = flat_world();
    world.set_liquid(BlockPos::new(0, surface, 0), Some(block::lava(0)));

    run(&world, 40);
    assert_eq!(world.liquid(BlockPos::new(2, surface, 0)), None);

    run(&world, 400);
    let at = |x| world.liquid(BlockPos::new(x, surface, 0));
    assert_eq!(at(1), Some(block::lava(2)));
    assert_eq!(at(3), Some(block::lava(6)));
    assert_eq!(at(4), None);
}

#[test]
fn removing_the_source_drains_the_pool() {
    let (world, surface) = flat_world();
    let source = BlockPos::new(0, surface, 0);
    world.set_liquid(source, Some(block::water(0)));
    run(&world, 300);
    assert!(world.liquid(BlockPos::new(5, surface, 0)).is_some());

    world.set_liquid(source, None);
    run(&world, 800);

    for x in -8..=8 {
        for z in -8..=8 {
            assert!(
                world.liquid(BlockPos::new(x, surface, z)).is_none(),
                "water left at ({x}, {z})"
            );
        }
    }
}

#[test]
fn water_falls_off_ledges() {
    let (world, surface) = flat_world();
    // A stone shelf three blocks up, water on its edge.
    let shelf = BlockPos::new(0, surface + 2, 0);
    world.set_block(shelf, block::block(block::STONE), SetOpts::default());
    world.set_liquid(shelf.above(), Some(block::water(0)));

    run(&world, 300);

    // Flows off the shelf, falls and spreads again on the ground.
    assert!(world.liquid(BlockPos::new(1, surface + 3, 0)).is_some());
    assert_eq!(
        world.liquid(BlockPos::new(1, surface + 2, 0)),
        Some(block::water(8))
    );
    assert!(world.liquid(BlockPos::new(1, surface, 0)).is_some());
    assert!(world.liquid(BlockPos::new(3, surface, 0)).is_some());
}

#[test]
fn flowing_water_washes_away_plants() {
    let (world, surface) = flat_world();
    let plant = BlockPos::new(1, surface, 0);
    world.set_block(plant, block::block(block::SHORT_GRASS), SetOpts::default());
    world.set_liquid(BlockPos::new(0, surface, 0), Some(block::water(0)));

    run(&world, 50);

    assert_eq!(world.block(plant), block::water(1));
}

#[test]
fn fence_gates_hold_water_without_spreading_into_them() {
    let (world, surface) = flat_world();
    let gate = BlockPos::new(2, surface, 0);
    world.set_block(gate, block::fence_gate("east", false), SetOpts::default());
    world.set_liquid(BlockPos::new(0, surface, 0), Some(block::water(0)));

    run(&world, 300);

    assert_eq!(world.block(gate), block::fence_gate("east", false));
    assert_eq!(world.liquid(gate), None);
    // Water reaches the far side the long way round.
    assert_eq!(world.liquid(BlockPos::new(3, surface, 0)), Some(block::water(5)));
}

// ---------------------------------------------------------------------------
// Random ticks
// ---------------------------------------------------------------------------

#[test]
fn covered_grass_turns_to_dirt() {
    let (world, surface) = flat_world();
    let _loader = Loader::new(1, &world, Arc::new(NopViewer));
    world.set_random_tick_speed(100);
    for x in 0..16 {
        for z in 0..16 {
            world.set_block(
                BlockPos::new(x, surface, z),
                block::block(block::STONE),
                SetOpts::default(),
            );
        }
    }

    run(&world, 50);

    let mut dirt = 0;
    for x in 0..16 {
        for z in 0..16 {
            match name_at(&world, x, surface - 1, z).as_str() {
                block::DIRT => dirt += 1,
                block::GRASS_BLOCK => {}
                other => panic!("unexpected {other} at ({x}, {z})"),
            }
        }
    }
    assert!(dirt > 0);
    // Uncovered grass in the next chunk is left alone.
    assert_eq!(name_at(&world, 20, surface - 1, 4), block::GRASS_BLOCK);
}
