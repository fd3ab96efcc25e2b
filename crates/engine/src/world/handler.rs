use std::sync::Arc;

use super::entity::Entity;
use super::position::Vec3;
use super::viewer::Sound;

/// Passed to cancellable hooks. Cancelling skips the world's default action.
#[derive(Debug, Default)]
pub struct Context {
    cancelled: bool,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// Event hooks, invoked synchronously on the thread performing the action.
#[allow(unused_variables)]
pub trait Handler: Send + Sync {
    /// Called before a sound is sent to viewers.
    fn handle_sound(&self, ctx: &mut Context, sound: &Sound, pos: Vec3) {}

    /// Called after an entity was added and shown to viewers.
    fn handle_entity_spawn(&self, entity: &Arc<dyn Entity>) {}

    /// Called before an entity is removed.
    fn handle_entity_despawn(&self, entity: &Arc<dyn Entity>) {}

    /// Called once when the world starts closing, before anything is saved.
    fn handle_close(&self) {}
}

pub struct NopHandler;

impl Handler for NopHandler {}
