pub mod block_updates;
pub mod helpers;

use keystone_engine::rules::RuleSet;

/// The standard rule set: gravity, liquids and grass decay.
pub fn standard() -> RuleSet {
    let mut rules = RuleSet::new();
    rules.add(block_updates::gravity);
    rules.add(block_updates::liquid_flow);
    rules.add(block_updates::grass_decay);
    rules
}
