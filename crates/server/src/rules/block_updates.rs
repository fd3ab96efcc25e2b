//! Block-update rules: gravity, liquid flow and grass decay.
//!
//! Each public function has the signature `fn(&World, &BlockUpdate)` so it can
//! be registered directly with a `RuleSet`. Neighbour updates only schedule
//! work; the change itself happens when the scheduled update comes due, which
//! paces falling sand and flowing liquids the way vanilla does.

use std::time::Duration;

use keystone_engine::rules::BlockUpdate;
use keystone_engine::world::block::{BlockId, LiquidInfo, LiquidKind};
use keystone_engine::world::position::BlockPos;
use keystone_engine::world::{SetOpts, World};

use super::helpers::{accepts_liquid, block_id, effective_depth, liquid_at, QUIET};
use crate::block;

/// Delay between a gravity block losing support and it moving down.
pub const GRAVITY_DELAY: Duration = Duration::from_millis(100);

pub fn flow_delay(kind: LiquidKind) -> Duration {
    match kind {
        LiquidKind::Water => Duration::from_millis(250),
        LiquidKind::Lava => Duration::from_millis(1500),
    }
}

/// Depth lost per block of horizontal flow.
fn flow_step(kind: LiquidKind) -> u8 {
    match kind {
        LiquidKind::Water => 1,
        LiquidKind::Lava => 2,
    }
}

// ── Gravity ──────────────────────────────────────────────────────────────

/// Sand and gravel with a replaceable block below move down one block.
pub fn gravity(world: &World, update: &BlockUpdate) {
    let pos = update.pos();
    let b = world.block(pos);
    if !block::has_gravity(&b) || !can_fall_into(world, pos.below()) {
        return;
    }
    match update {
        BlockUpdate::Neighbour { .. } => world.schedule_block_update(pos, GRAVITY_DELAY),
        BlockUpdate::Scheduled { .. } => {
            world.set_block(pos, world.registry().air(), SetOpts::default());
            world.set_block(pos.below(), b, SetOpts::default());
        }
        BlockUpdate::Random { .. } => {}
    }
}

fn can_fall_into(world: &World, pos: BlockPos) -> bool {
    !pos.out_of_bounds(world.range()) && world.registry().is_replaceable(block_id(world, pos))
}

// ── Liquids ──────────────────────────────────────────────────────────────

/// Liquid spread and drainage.
///
/// A liquid that lost its feed (no same-kind liquid above, no deeper
/// neighbour) drains away. Otherwise it falls into a replaceable block below,
/// and sources and landed liquids spread sideways one step shallower.
pub fn liquid_flow(world: &World, update: &BlockUpdate) {
    let pos = update.pos();
    let Some(info) = liquid_at(world, pos) else {
        return;
    };
    match update {
        BlockUpdate::Neighbour { .. } => world.schedule_block_update(pos, flow_delay(info.kind)),
        BlockUpdate::Scheduled { .. } => flow(world, pos, info),
        BlockUpdate::Random { .. } => {}
    }
}

fn flow(world: &World, pos: BlockPos, info: LiquidInfo) {
    if !info.is_source() && !is_fed(world, pos, &info) {
        world.set_liquid(pos, None);
        return;
    }

    let below = pos.below();
    if accepts_liquid(world, below, info.kind, 8) {
        place_liquid(world, below, info.kind, 8, true);
        if !info.is_source() {
            return;
        }
    }

    let next = effective_depth(&info).saturating_sub(flow_step(info.kind));
    if next == 0 {
        return;
    }
    for n in pos.horizontal_neighbors() {
        if accepts_liquid(world, n, info.kind, next) {
            place_liquid(world, n, info.kind, next, false);
        }
    }
}

fn is_fed(world: &World, pos: BlockPos, info: &LiquidInfo) -> bool {
    if liquid_at(world, pos.above()).is_some_and(|l| l.kind == info.kind) {
        return true;
    }
    if info.falling {
        return false;
    }
    pos.horizontal_neighbors().into_iter().any(|n| {
        liquid_at(world, n).is_some_and(|l| l.kind == info.kind && effective_depth(&l) > info.depth)
    })
}

fn place_liquid(world: &World, pos: BlockPos, kind: LiquidKind, depth: u8, falling: bool) {
    let registry = world.registry();
    let Some(liquid) = registry.liquid_block(kind, depth, falling) else {
        return;
    };
    let current = block_id(world, pos);
    if current != BlockId::AIR
        && !registry.is_liquid(current)
        && registry.is_replaceable(current)
    {
        // Washes away plants and the like.
        world.set_block(pos, registry.air(), QUIET);
    }
    world.set_liquid(pos, Some(liquid));
}

// ── Grass ────────────────────────────────────────────────────────────────

/// Grass covered by a solid block turns to dirt on a random tick.
pub fn grass_decay(world: &World, update: &BlockUpdate) {
    let BlockUpdate::Random { pos } = *update else {
        return;
    };
    if world.block(pos).name() != block::GRASS_BLOCK {
        return;
    }
    if world.registry().is_solid(block_id(world, pos.above())) {
        world.set_block(pos, block::block(block::DIRT), SetOpts::default());
    }
}
