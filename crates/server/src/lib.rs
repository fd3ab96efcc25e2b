pub mod block;
pub mod entity;
pub mod event_bus;
pub mod generator;
pub mod persistence;
pub mod rules;
