use std::sync::Arc;

use crate::world::position::BlockPos;
use crate::world::World;

/// A block-update hook fired by the world tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockUpdate {
    /// A block at or next to `pos` changed; `changed` is where.
    Neighbour { pos: BlockPos, changed: BlockPos },
    /// An update scheduled with `World::schedule_block_update` came due.
    Scheduled { pos: BlockPos },
    /// `pos` was picked for a random tick.
    Random { pos: BlockPos },
}

impl BlockUpdate {
    pub fn pos(&self) -> BlockPos {
        match *self {
            BlockUpdate::Neighbour { pos, .. }
            | BlockUpdate::Scheduled { pos }
            | BlockUpdate::Random { pos } => pos,
        }
    }
}

/// A rule function: given the world and an update that just fired, react by
/// reading and writing the world.
///
/// Rules must be **local**: they only touch blocks in a bounded neighborhood
/// of the update's position. They run on the tick thread with no chunk locks
/// held, so they may call any World method.
pub type RuleFn = Arc<dyn Fn(&World, &BlockUpdate) + Send + Sync>;

/// An ordered collection of rules. Every rule is consulted for every update.
#[derive(Clone, Default)]
pub struct RuleSet {
    rules: Vec<RuleFn>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add(&mut self, rule: impl Fn(&World, &BlockUpdate) + Send + Sync + 'static) {
        self.rules.push(Arc::new(rule));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn evaluate(&self, world: &World, update: &BlockUpdate) {
        for rule in &self.rules {
            rule(world, update);
        }
    }
}
