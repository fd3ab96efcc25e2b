//! World queries shared by the rule implementations.

use keystone_engine::world::block::{BlockId, LiquidInfo, LiquidKind};
use keystone_engine::world::position::BlockPos;
use keystone_engine::world::{SetOpts, World};

/// Set without queueing neighbour updates, for intermediate writes a rule
/// follows with a notifying one.
pub const QUIET: SetOpts = SetOpts {
    disable_block_updates: true,
    disable_liquid_displacement: false,
};

/// Runtime id of the foreground block at `pos`.
pub fn block_id(world: &World, pos: BlockPos) -> BlockId {
    world
        .registry()
        .try_runtime_id(&world.block(pos))
        .unwrap_or(BlockId::AIR)
}

/// The liquid at `pos` on either layer.
pub fn liquid_at(world: &World, pos: BlockPos) -> Option<LiquidInfo> {
    let registry = world.registry();
    world
        .liquid(pos)
        .and_then(|b| registry.try_runtime_id(&b))
        .and_then(|id| registry.liquid(id))
}

/// Depth a liquid feeds its neighbours with. Falling columns count as full.
pub fn effective_depth(info: &LiquidInfo) -> u8 {
    if info.falling { 8 } else { info.depth }
}

/// Can a `kind` liquid of `depth` flow into `pos`?
///
/// Only replaceable blocks accept flowing liquid. A liquid already there
/// keeps its place unless the newcomer is deeper.
pub fn accepts_liquid(world: &World, pos: BlockPos, kind: LiquidKind, depth: u8) -> bool {
    if pos.out_of_bounds(world.range()) {
        return false;
    }
    if let Some(existing) = liquid_at(world, pos) {
        return existing.kind == kind
            && !existing.is_source()
            && !existing.falling
            && existing.depth < depth;
    }
    world.registry().is_replaceable(block_id(world, pos))
}
