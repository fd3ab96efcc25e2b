//! Entities and their placement in worlds.
//!
//! Each World indexes its own entities by the chunk they are stored in. The
//! [`EntityRegistry`] is shared by every World of a process and answers
//! "which world is this entity in", so an entity can be moved between worlds
//! without the caller tracking where it came from.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::{debug, error};
use uuid::Uuid;

use super::block::NbtCompound;
use super::position::{ChunkPos, Vec3};
use super::viewer::{same_viewer, show_entity};
use super::World;

pub trait Entity: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn position(&self) -> Vec3;

    /// Saved form of the entity. `None` means the entity is not persisted.
    fn encode_nbt(&self) -> Option<NbtCompound> {
        None
    }

    /// Release the entity's resources. Called when its chunk is unloaded.
    fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Axis-aligned box used for spatial entity queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// A box of `radius` around `centre`.
    pub fn around(centre: Vec3, radius: f64) -> Self {
        Self {
            min: Vec3::new(centre.x - radius, centre.y - radius, centre.z - radius),
            max: Vec3::new(centre.x + radius, centre.y + radius, centre.z + radius),
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

/// Process-wide map from entity to the World it lives in.
#[derive(Default)]
pub struct EntityRegistry {
    worlds: DashMap<Uuid, Weak<World>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The World holding the entity, if it is in one that is still alive.
    pub fn world_of(&self, id: Uuid) -> Option<Arc<World>> {
        self.worlds.get(&id).and_then(|w| w.upgrade())
    }

    pub fn len(&self) -> usize {
        self.worlds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.worlds.is_empty()
    }

    fn insert(&self, id: Uuid, world: Weak<World>) {
        self.worlds.insert(id, world);
    }

    /// Forget the entity, but only if it is still registered to `world`.
    fn remove(&self, id: Uuid, world: &World) {
        self.worlds
            .remove_if(&id, |_, w| std::ptr::eq(w.as_ptr(), world));
    }
}

impl World {
    /// Add an entity to the chunk at its position, taking it out of any
    /// World it was in before. Viewers of that chunk are shown the entity.
    pub fn add_entity(&self, entity: Arc<dyn Entity>) {
        if self.is_closed() {
            return;
        }
        let id = entity.uuid();
        if let Some(prior) = self.entity_registry.world_of(id) {
            prior.remove_entity(&entity);
        }
        self.entity_registry.insert(id, self.this.clone());

        let pos = entity.position().chunk();
        self.entities.insert(id, (Arc::clone(&entity), pos));

        let mut c = self.chunk(pos);
        c.entities.push(Arc::clone(&entity));
        let viewers = c.viewers.clone();
        drop(c);

        for v in &viewers {
            show_entity(&entity, v.as_ref());
        }
        self.handler().handle_entity_spawn(&entity);
    }

    /// Remove an entity from this World. Does nothing if it is not here.
    pub fn remove_entity(&self, entity: &Arc<dyn Entity>) {
        let id = entity.uuid();
        // Taking the index entry decides which caller removes the entity, and
        // yields the chunk it was last placed in.
        let Some((_, (_, pos))) = self.entities.remove(&id) else {
            return;
        };
        self.handler().handle_entity_despawn(entity);
        self.entity_registry.remove(id, self);

        let Some(c) = self.chunk_from_cache(pos) else {
            return;
        };
        let mut c = c.lock();
        c.entities.retain(|e| e.uuid() != id);
        let viewers = c.viewers.clone();
        drop(c);
        for v in viewers {
            v.hide_entity(entity);
        }
    }

    /// Snapshot of every entity in this World.
    pub fn entities(&self) -> Vec<Arc<dyn Entity>> {
        self.entities.iter().map(|e| Arc::clone(&e.value().0)).collect()
    }

    /// Entities whose position lies inside `bounds`, minus the ignored ones.
    pub fn entities_within(
        &self,
        bounds: Aabb,
        ignore: impl Fn(&dyn Entity) -> bool,
    ) -> Vec<Arc<dyn Entity>> {
        self.entities
            .iter()
            .map(|e| Arc::clone(&e.value().0))
            .filter(|e| bounds.contains(e.position()) && !ignore(e.as_ref()))
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Index entities that came back from the provider with a chunk. The
    /// caller stores them in the chunk it holds locked.
    pub(crate) fn register_loaded_entities(&self, pos: ChunkPos, entities: &[Arc<dyn Entity>]) {
        for e in entities {
            let id = e.uuid();
            self.entity_registry.insert(id, self.this.clone());
            self.entities.insert(id, (Arc::clone(e), pos));
        }
    }

    /// Drop the entities of an unloaded chunk from both indexes.
    pub(crate) fn forget_entities(&self, entities: &[Arc<dyn Entity>]) {
        for e in entities {
            let id = e.uuid();
            self.entities.remove(&id);
            self.entity_registry.remove(id, self);
        }
    }

    pub(crate) fn close_entities(&self, entities: Vec<Arc<dyn Entity>>) {
        for e in entities {
            if let Err(err) = e.close() {
                error!(entity = %e.uuid(), "error closing entity: {err:#}");
            }
        }
    }

    /// Move entities whose position crossed into another chunk since the
    /// last tick. Viewers that lose sight of them are told to hide them.
    pub(crate) fn tick_entities(&self) {
        let moved: Vec<(Arc<dyn Entity>, ChunkPos, ChunkPos)> = self
            .entities
            .iter()
            .filter_map(|e| {
                let (entity, old) = e.value();
                let new = entity.position().chunk();
                (new != *old).then(|| (Arc::clone(entity), *old, new))
            })
            .collect();

        for (entity, old, new) in moved {
            let id = entity.uuid();
            let old_viewers = match self.chunk_from_cache(old) {
                Some(c) => {
                    let mut c = c.lock();
                    c.entities.retain(|e| e.uuid() != id);
                    c.viewers.clone()
                }
                None => Vec::new(),
            };

            let mut c = self.chunk(new);
            // Re-pointing the index under the new chunk's lock means a
            // concurrent remove_entity either wins here, and the entity is
            // dropped, or finds it in the new chunk.
            match self.entities.get_mut(&id) {
                Some(mut e) => e.value_mut().1 = new,
                None => continue,
            }
            c.entities.push(Arc::clone(&entity));
            let new_viewers = c.viewers.clone();
            drop(c);
            debug!(entity = %id, from = ?old, to = ?new, "entity changed chunk");

            for v in &old_viewers {
                if !new_viewers.iter().any(|n| same_viewer(n, v)) {
                    v.hide_entity(&entity);
                }
            }
            for v in &new_viewers {
                if !old_viewers.iter().any(|o| same_viewer(o, v)) {
                    show_entity(&entity, v.as_ref());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_bounds_are_inclusive() {
        let b = Aabb::around(Vec3::new(0.0, 0.0, 0.0), 2.0);
        assert!(b.contains(Vec3::new(2.0, -2.0, 0.0)));
        assert!(!b.contains(Vec3::new(2.1, 0.0, 0.0)));
    }
}
