pub mod rules;
pub mod world;
