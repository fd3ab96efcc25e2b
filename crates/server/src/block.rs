//! The vanilla block catalogue this server registers at startup.
//!
//! Only the states the server actually places are registered. Liquids follow
//! the vanilla `level` property: 0 is a source, 1..=7 flow outwards and
//! 8..=15 are falling columns.

use keystone_engine::world::block::{
    Block, BlockDescriptor, BlockFlags, BlockRegistry, BlockState, LiquidInfo, LiquidKind,
    LiquidKinds,
};

pub const AIR: &str = "minecraft:air";
pub const STONE: &str = "minecraft:stone";
pub const DIRT: &str = "minecraft:dirt";
pub const GRASS_BLOCK: &str = "minecraft:grass_block";
pub const BEDROCK: &str = "minecraft:bedrock";
pub const SAND: &str = "minecraft:sand";
pub const GRAVEL: &str = "minecraft:gravel";
pub const GLASS: &str = "minecraft:glass";
pub const TORCH: &str = "minecraft:torch";
pub const CHEST: &str = "minecraft:chest";
pub const OAK_FENCE_GATE: &str = "minecraft:oak_fence_gate";
pub const SHORT_GRASS: &str = "minecraft:short_grass";
pub const WATER: &str = "minecraft:water";
pub const LAVA: &str = "minecraft:lava";

/// Build the registry. Ids are assigned in registration order, so every
/// process building it gets the same ids.
pub fn vanilla() -> BlockRegistry {
    let mut b = BlockRegistry::builder();
    b.register(BlockDescriptor::solid(BlockState::new(STONE)));
    b.register(BlockDescriptor::solid(BlockState::new(DIRT)));
    b.register(
        BlockDescriptor::solid(BlockState::new(GRASS_BLOCK).with("snowy", "false"))
            .with_flags(BlockFlags::RANDOM_TICKS),
    );
    b.register(BlockDescriptor::solid(BlockState::new(BEDROCK)));
    b.register(BlockDescriptor::solid(BlockState::new(SAND)));
    b.register(BlockDescriptor::solid(BlockState::new(GRAVEL)));
    b.register(BlockDescriptor::solid(BlockState::new(GLASS)).light_filter(0));
    b.register(BlockDescriptor::transparent(BlockState::new(TORCH)).light_emission(14));
    b.register(
        BlockDescriptor::transparent(BlockState::new(SHORT_GRASS)).flags(BlockFlags::REPLACEABLE),
    );
    for facing in ["north", "south", "west", "east"] {
        b.register(
            BlockDescriptor::solid(BlockState::new(CHEST).with("facing", facing))
                .with_flags(BlockFlags::HAS_NBT)
                .light_filter(0),
        );
    }
    for facing in ["north", "south", "west", "east"] {
        for open in ["false", "true"] {
            b.register(
                BlockDescriptor::transparent(
                    BlockState::new(OAK_FENCE_GATE)
                        .with("facing", facing)
                        .with("open", open),
                )
                .displaces(LiquidKinds::WATER),
            );
        }
    }
    for (name, kind, filter) in [(WATER, LiquidKind::Water, 2), (LAVA, LiquidKind::Lava, 0)] {
        for level in 0..16u8 {
            let mut d = BlockDescriptor::liquid(
                BlockState::new(name).with("level", level.to_string()),
                liquid_info(kind, level),
                filter,
            );
            if kind == LiquidKind::Lava {
                d = d.light_emission(15);
            }
            b.register(d);
        }
    }
    b.build()
}

/// Depth and falling flag for a vanilla liquid level.
pub fn liquid_info(kind: LiquidKind, level: u8) -> LiquidInfo {
    match level {
        0 => LiquidInfo {
            kind,
            depth: 8,
            falling: false,
        },
        1..=7 => LiquidInfo {
            kind,
            depth: 8 - level,
            falling: false,
        },
        _ => LiquidInfo {
            kind,
            depth: 8,
            falling: true,
        },
    }
}

pub fn block(name: &str) -> Block {
    Block::named(name)
}

pub fn air() -> Block {
    Block::named(AIR)
}

pub fn grass_block() -> Block {
    Block::new(BlockState::new(GRASS_BLOCK).with("snowy", "false"))
}

pub fn chest(facing: &str) -> Block {
    Block::new(BlockState::new(CHEST).with("facing", facing))
}

pub fn fence_gate(facing: &str, open: bool) -> Block {
    Block::new(
        BlockState::new(OAK_FENCE_GATE)
            .with("facing", facing)
            .with("open", open.to_string()),
    )
}

pub fn water(level: u8) -> Block {
    Block::new(BlockState::new(WATER).with("level", level.to_string()))
}

pub fn lava(level: u8) -> Block {
    Block::new(BlockState::new(LAVA).with("level", level.to_string()))
}

/// Does this block fall when unsupported?
pub fn has_gravity(block: &Block) -> bool {
    matches!(block.name(), SAND | GRAVEL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_helper_is_registered() {
        let r = vanilla();
        for b in [
            air(),
            block(STONE),
            grass_block(),
            chest("north"),
            fence_gate("east", true),
            water(0),
            water(15),
            lava(7),
        ] {
            assert!(r.try_runtime_id(&b).is_some(), "{} missing", b.state());
        }
    }

    #[test]
    fn liquid_levels_map_to_depths() {
        assert!(liquid_info(LiquidKind::Water, 0).is_source());
        assert_eq!(liquid_info(LiquidKind::Water, 3).depth, 5);
        assert!(liquid_info(LiquidKind::Lava, 9).falling);

        let r = vanilla();
        let source = r.liquid_block(LiquidKind::Water, 8, false).unwrap();
        assert_eq!(source, water(0));
    }

    #[test]
    fn fence_gates_only_hold_water() {
        let r = vanilla();
        let gate = r.runtime_id(&fence_gate("north", false));
        assert!(r.can_displace(gate, LiquidKind::Water));
        assert!(!r.can_displace(gate, LiquidKind::Lava));
        assert!(r.has_nbt(r.runtime_id(&chest("west"))));
    }
}
