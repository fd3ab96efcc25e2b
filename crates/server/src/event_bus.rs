//! World-view event bus.
//!
//! A [`BroadcastViewer`] turns the engine's viewer callbacks into
//! [`ViewEvent`]s on a shared `tokio::sync::broadcast` channel. Connection
//! tasks subscribe and forward the events addressed to their own viewer.
//! Publishing never blocks: a subscriber that falls behind sees `Lagged`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;
use uuid::Uuid;

use keystone_engine::world::block::Block;
use keystone_engine::world::chunk::Chunk;
use keystone_engine::world::entity::Entity;
use keystone_engine::world::position::{BlockPos, ChunkPos, Vec3};
use keystone_engine::world::viewer::{Particle, Sound, Viewer};

/// Recommended capacity for the broadcast channel.
/// 256 deliveries in flight should handle chunk bursts without lagging.
pub const BUS_CAPACITY: usize = 256;

/// Identifies the viewer an event was produced for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ViewerId(pub u64);

impl ViewerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ViewerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ViewEvent {
    BlockUpdate {
        pos: BlockPos,
        block: Block,
        layer: u8,
    },
    /// A whole chunk was sent. Carries a summary, not the voxels.
    Chunk {
        pos: ChunkPos,
        sections: usize,
        block_entities: usize,
    },
    EntityShown { id: Uuid, pos: Vec3 },
    EntityMoved { id: Uuid, pos: Vec3 },
    EntityHidden { id: Uuid },
    Particle { pos: Vec3, particle: Particle },
    Sound { pos: Vec3, sound: Sound },
    Time(i64),
    Weather { raining: bool, thunder: bool },
    Spawn(BlockPos),
}

/// One event for one viewer.
///
/// Uses `Arc` so cloning per broadcast subscriber is just a refcount bump.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub viewer: ViewerId,
    pub event: Arc<ViewEvent>,
}

pub struct BroadcastViewer {
    id: ViewerId,
    tx: broadcast::Sender<Delivery>,
}

impl BroadcastViewer {
    pub fn new(tx: broadcast::Sender<Delivery>) -> Self {
        Self {
            id: ViewerId::next(),
            tx,
        }
    }

    pub fn id(&self) -> ViewerId {
        self.id
    }

    fn publish(&self, event: ViewEvent) {
        // No subscribers is not an error: nobody is listening yet.
        let _ = self.tx.send(Delivery {
            viewer: self.id,
            event: Arc::new(event),
        });
    }
}

impl Viewer for BroadcastViewer {
    fn view_block_update(&self, pos: BlockPos, block: &Block, layer: u8) {
        self.publish(ViewEvent::BlockUpdate {
            pos,
            block: block.clone(),
            layer,
        });
    }

    fn view_chunk(&self, pos: ChunkPos, chunk: &Chunk, block_entities: &HashMap<BlockPos, Block>) {
        self.publish(ViewEvent::Chunk {
            pos,
            sections: chunk.sub_chunks().iter().filter(|s| !s.is_empty()).count(),
            block_entities: block_entities.len(),
        });
    }

    fn view_entity(&self, entity: &Arc<dyn Entity>) {
        self.publish(ViewEvent::EntityShown {
            id: entity.uuid(),
            pos: entity.position(),
        });
    }

    fn view_entity_state(&self, entity: &Arc<dyn Entity>) {
        self.publish(ViewEvent::EntityMoved {
            id: entity.uuid(),
            pos: entity.position(),
        });
    }

    fn hide_entity(&self, entity: &Arc<dyn Entity>) {
        self.publish(ViewEvent::EntityHidden { id: entity.uuid() });
    }

    fn view_particle(&self, pos: Vec3, particle: &Particle) {
        self.publish(ViewEvent::Particle {
            pos,
            particle: particle.clone(),
        });
    }

    fn view_sound(&self, pos: Vec3, sound: &Sound) {
        self.publish(ViewEvent::Sound {
            pos,
            sound: sound.clone(),
        });
    }

    fn view_time(&self, time: i64) {
        self.publish(ViewEvent::Time(time));
    }

    fn view_weather(&self, raining: bool, thunder: bool) {
        self.publish(ViewEvent::Weather { raining, thunder });
    }

    fn view_world_spawn(&self, pos: BlockPos) {
        self.publish(ViewEvent::Spawn(pos));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliveries_carry_the_viewer_id() {
        let (tx, mut rx) = broadcast::channel(BUS_CAPACITY);
        let a = BroadcastViewer::new(tx.clone());
        let b = BroadcastViewer::new(tx);
        assert_ne!(a.id(), b.id());

        a.view_time(42);
        b.view_world_spawn(BlockPos::new(1, 2, 3));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.viewer, a.id());
        assert_eq!(*first.event, ViewEvent::Time(42));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.viewer, b.id());
        assert_eq!(*second.event, ViewEvent::Spawn(BlockPos::new(1, 2, 3)));
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        BroadcastViewer::new(tx).view_weather(true, false);
    }
}
