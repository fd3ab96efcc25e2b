//! Block values and the runtime-id registry.
//!
//! Chunks store compact [`BlockId`]s. A [`Block`] is the structured value the
//! World API hands out: a registered [`BlockState`] plus, for block entities,
//! an NBT compound carrying extra state. Capabilities (liquid, displacer,
//! replaceable, ...) are resolved once at registration into a
//! [`BlockDescriptor`] and looked up by id afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// NBT compound used for block-entity data and saved entities.
pub type NbtCompound = HashMap<String, fastnbt::Value>;

/// Opaque runtime identifier of a registered block state.
///
/// `BlockId::AIR` (0) is always `minecraft:air`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// The universal "empty" block.
    pub const AIR: BlockId = BlockId(0);

    pub const fn new(id: u32) -> Self {
        Self(id)
    }
}

/// A block name plus its sorted state properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockState {
    name: String,
    properties: Vec<(String, String)>,
}

impl BlockState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Add or replace a property. Properties stay sorted by key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.properties.binary_search_by(|(k, _)| k.as_str().cmp(&key)) {
            Ok(i) => self.properties[i].1 = value,
            Err(i) => self.properties.insert(i, (key, value)),
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[(String, String)] {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            f.write_str("[")?;
            for (i, (k, v)) in self.properties.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{k}={v}")?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// A block value: its state and, for block entities, its extra data.
///
/// Equality is structural, so two chests with different contents differ even
/// though they share a runtime id.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    state: Arc<BlockState>,
    nbt: Option<NbtCompound>,
}

impl Block {
    pub fn new(state: BlockState) -> Self {
        Self {
            state: Arc::new(state),
            nbt: None,
        }
    }

    /// A block with no state properties.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(BlockState::new(name))
    }

    pub fn with_nbt(mut self, nbt: NbtCompound) -> Self {
        self.nbt = Some(nbt);
        self
    }

    pub fn state(&self) -> &BlockState {
        &self.state
    }

    pub fn name(&self) -> &str {
        self.state.name()
    }

    pub fn nbt(&self) -> Option<&NbtCompound> {
        self.nbt.as_ref()
    }
}

/// Liquid families. Displacers declare which of these they can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LiquidKind {
    Water,
    Lava,
}

impl LiquidKind {
    const fn bit(self) -> u8 {
        match self {
            LiquidKind::Water => 1,
            LiquidKind::Lava => 2,
        }
    }
}

/// Set of liquid kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiquidKinds(u8);

impl LiquidKinds {
    pub const NONE: LiquidKinds = LiquidKinds(0);
    pub const WATER: LiquidKinds = LiquidKinds(1);
    pub const LAVA: LiquidKinds = LiquidKinds(2);
    pub const ALL: LiquidKinds = LiquidKinds(3);

    pub const fn contains(self, kind: LiquidKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Liquid properties of a registered state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiquidInfo {
    pub kind: LiquidKind,
    /// 8 for a full source or falling column, 1 for the thinnest flow.
    pub depth: u8,
    pub falling: bool,
}

impl LiquidInfo {
    /// A full, non-falling liquid: the only kind a displacer keeps.
    pub const fn is_source(&self) -> bool {
        self.depth == 8 && !self.falling
    }
}

/// Capability bits resolved at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFlags(u8);

impl BlockFlags {
    pub const NONE: BlockFlags = BlockFlags(0);
    /// Liquids may flow into this block, destroying it.
    pub const REPLACEABLE: BlockFlags = BlockFlags(1);
    /// The block carries extra state, tracked in the chunk's block-entity map.
    pub const HAS_NBT: BlockFlags = BlockFlags(1 << 1);
    /// The block receives random ticks.
    pub const RANDOM_TICKS: BlockFlags = BlockFlags(1 << 2);
    /// The block has a solid top face (used to place the world spawn).
    pub const SOLID: BlockFlags = BlockFlags(1 << 3);

    pub const fn contains(self, other: BlockFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: BlockFlags) -> BlockFlags {
        BlockFlags(self.0 | other.0)
    }
}

impl std::ops::BitOr for BlockFlags {
    type Output = BlockFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// Everything the engine needs to know about a state, fixed at registration.
#[derive(Debug, Clone)]
pub struct BlockDescriptor {
    pub state: BlockState,
    pub flags: BlockFlags,
    pub liquid: Option<LiquidInfo>,
    pub displaces: LiquidKinds,
    /// Block light emitted, 0..=15.
    pub light_emission: u8,
    /// Light lost when passing through, 0 (transparent) ..= 15 (opaque).
    pub light_filter: u8,
}

impl BlockDescriptor {
    /// A fully opaque, solid block with no special behaviour.
    pub fn solid(state: BlockState) -> Self {
        Self {
            state,
            flags: BlockFlags::SOLID,
            liquid: None,
            displaces: LiquidKinds::NONE,
            light_emission: 0,
            light_filter: 15,
        }
    }

    /// A non-solid, fully transparent block.
    pub fn transparent(state: BlockState) -> Self {
        Self {
            flags: BlockFlags::NONE,
            light_filter: 0,
            ..Self::solid(state)
        }
    }

    pub fn liquid(state: BlockState, info: LiquidInfo, light_filter: u8) -> Self {
        Self {
            flags: BlockFlags::REPLACEABLE,
            liquid: Some(info),
            light_filter,
            ..Self::solid(state)
        }
    }

    pub fn flags(mut self, flags: BlockFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_flags(mut self, flags: BlockFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn displaces(mut self, kinds: LiquidKinds) -> Self {
        self.displaces = kinds;
        self
    }

    pub fn light_emission(mut self, level: u8) -> Self {
        self.light_emission = level.min(15);
        self
    }

    pub fn light_filter(mut self, level: u8) -> Self {
        self.light_filter = level.min(15);
        self
    }
}

/// Collects descriptors before freezing them into a [`BlockRegistry`].
pub struct BlockRegistryBuilder {
    descriptors: Vec<BlockDescriptor>,
    ids: HashMap<BlockState, BlockId>,
}

impl BlockRegistryBuilder {
    /// A builder with `minecraft:air` already registered as id 0.
    pub fn new() -> Self {
        let mut builder = Self {
            descriptors: Vec::new(),
            ids: HashMap::new(),
        };
        builder.register(
            BlockDescriptor::transparent(BlockState::new(AIR_NAME)).flags(BlockFlags::REPLACEABLE),
        );
        builder
    }

    /// Register a state, returning its runtime id.
    ///
    /// Panics if the state was already registered.
    pub fn register(&mut self, descriptor: BlockDescriptor) -> BlockId {
        if self.ids.contains_key(&descriptor.state) {
            panic!("block state {} registered twice", descriptor.state);
        }
        let id = BlockId(self.descriptors.len() as u32);
        self.ids.insert(descriptor.state.clone(), id);
        self.descriptors.push(descriptor);
        id
    }

    pub fn build(self) -> BlockRegistry {
        let mut liquids = HashMap::new();
        let blocks: Vec<Block> = self
            .descriptors
            .iter()
            .map(|d| Block::new(d.state.clone()))
            .collect();
        let mut ids = HashMap::with_capacity(blocks.len());
        for (i, (descriptor, block)) in self.descriptors.iter().zip(&blocks).enumerate() {
            let id = BlockId(i as u32);
            ids.insert(Arc::clone(&block.state), id);
            if let Some(info) = descriptor.liquid {
                liquids.entry(info).or_insert(id);
            }
        }
        BlockRegistry {
            descriptors: self.descriptors,
            blocks,
            ids,
            liquids,
        }
    }
}

impl Default for BlockRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

const AIR_NAME: &str = "minecraft:air";

/// Read-only block tables, built once at startup and shared by every World.
pub struct BlockRegistry {
    descriptors: Vec<BlockDescriptor>,
    blocks: Vec<Block>,
    ids: HashMap<Arc<BlockState>, BlockId>,
    liquids: HashMap<LiquidInfo, BlockId>,
}

impl BlockRegistry {
    pub fn builder() -> BlockRegistryBuilder {
        BlockRegistryBuilder::new()
    }

    pub fn air(&self) -> Block {
        self.blocks[0].clone()
    }

    /// Runtime id of a block value.
    ///
    /// Panics if the block's state was never registered: that is a startup
    /// bug, not a runtime condition.
    pub fn runtime_id(&self, block: &Block) -> BlockId {
        match self.try_runtime_id(block) {
            Some(id) => id,
            None => panic!("block {} is not registered", block.state()),
        }
    }

    pub fn try_runtime_id(&self, block: &Block) -> Option<BlockId> {
        self.ids.get(block.state()).copied()
    }

    /// The plain block value of a runtime id (without block-entity data).
    pub fn block(&self, id: BlockId) -> Option<Block> {
        self.blocks.get(id.0 as usize).cloned()
    }

    pub fn descriptor(&self, id: BlockId) -> Option<&BlockDescriptor> {
        self.descriptors.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn liquid(&self, id: BlockId) -> Option<LiquidInfo> {
        self.descriptor(id).and_then(|d| d.liquid)
    }

    pub fn is_liquid(&self, id: BlockId) -> bool {
        self.liquid(id).is_some()
    }

    pub fn has_nbt(&self, id: BlockId) -> bool {
        self.flag(id, BlockFlags::HAS_NBT)
    }

    pub fn is_replaceable(&self, id: BlockId) -> bool {
        self.flag(id, BlockFlags::REPLACEABLE)
    }

    pub fn is_solid(&self, id: BlockId) -> bool {
        self.flag(id, BlockFlags::SOLID)
    }

    pub fn random_ticks(&self, id: BlockId) -> bool {
        self.flag(id, BlockFlags::RANDOM_TICKS)
    }

    /// Whether the block at `id` can hold a liquid of `kind` on its overlay layer.
    pub fn can_displace(&self, id: BlockId, kind: LiquidKind) -> bool {
        self.descriptor(id)
            .is_some_and(|d| d.displaces.contains(kind))
    }

    pub fn displaces_any(&self, id: BlockId) -> bool {
        self.descriptor(id).is_some_and(|d| !d.displaces.is_empty())
    }

    pub fn light_emission(&self, id: BlockId) -> u8 {
        self.descriptor(id).map_or(0, |d| d.light_emission)
    }

    pub fn light_filter(&self, id: BlockId) -> u8 {
        self.descriptor(id).map_or(15, |d| d.light_filter)
    }

    /// The registered state for a liquid of the given shape, if any.
    pub fn liquid_block(&self, kind: LiquidKind, depth: u8, falling: bool) -> Option<Block> {
        let info = LiquidInfo {
            kind,
            depth,
            falling,
        };
        self.liquids.get(&info).and_then(|id| self.block(*id))
    }

    fn flag(&self, id: BlockId, flag: BlockFlags) -> bool {
        self.descriptor(id).is_some_and(|d| d.flags.contains(flag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> BlockRegistry {
        let mut b = BlockRegistry::builder();
        b.register(BlockDescriptor::solid(BlockState::new("stone")));
        b.register(
            BlockDescriptor::liquid(
                BlockState::new("water").with("level", "0"),
                LiquidInfo {
                    kind: LiquidKind::Water,
                    depth: 8,
                    falling: false,
                },
                2,
            ),
        );
        b.register(
            BlockDescriptor::transparent(BlockState::new("fence_gate").with("open", "false"))
                .displaces(LiquidKinds::WATER),
        );
        b.build()
    }

    #[test]
    fn air_is_id_zero() {
        let r = registry();
        assert_eq!(r.runtime_id(&r.air()), BlockId::AIR);
        assert!(r.is_replaceable(BlockId::AIR));
    }

    #[test]
    fn properties_are_order_independent() {
        let a = BlockState::new("x").with("b", "1").with("a", "2");
        let b = BlockState::new("x").with("a", "2").with("b", "1");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "x[a=2,b=1]");
    }

    #[test]
    fn capabilities_resolve_by_id() {
        let r = registry();
        let water = r.runtime_id(&Block::new(BlockState::new("water").with("level", "0")));
        let gate = r.runtime_id(&Block::new(BlockState::new("fence_gate").with("open", "false")));
        assert!(r.liquid(water).unwrap().is_source());
        assert!(r.can_displace(gate, LiquidKind::Water));
        assert!(!r.can_displace(gate, LiquidKind::Lava));
        assert_eq!(
            r.liquid_block(LiquidKind::Water, 8, false).map(|b| r.runtime_id(&b)),
            Some(water)
        );
    }

    #[test]
    #[should_panic(expected = "not registered")]
    fn unregistered_block_panics() {
        registry().runtime_id(&Block::named("unknown"));
    }

    #[test]
    fn nbt_is_part_of_equality() {
        let mut nbt = NbtCompound::new();
        nbt.insert("Items".into(), fastnbt::Value::List(Vec::new()));
        let plain = Block::named("chest");
        let full = Block::named("chest").with_nbt(nbt);
        assert_ne!(plain, full);
        assert_eq!(plain.state(), full.state());
    }
}
