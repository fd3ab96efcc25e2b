//! The world tick: time, weather, entity movement, random ticks and the
//! block-update queues, plus the background threads that drive it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver};
use rand::Rng;
use tracing::{debug, error, trace};

use super::chunk::{LAYER_BLOCK, SECTION_SIZE};
use super::position::{BlockPos, ChunkPos};
use super::World;
use crate::rules::BlockUpdate;

/// How long one tick lasts.
pub const TICK: Duration = Duration::from_millis(50);

/// `pos` must re-evaluate itself because `changed` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NeighbourUpdate {
    pub pos: BlockPos,
    pub changed: BlockPos,
}

#[derive(Default)]
pub(crate) struct UpdateQueue {
    /// Tick at which each position fires.
    scheduled: HashMap<BlockPos, i64>,
    neighbours: Vec<NeighbourUpdate>,
}

impl World {
    /// Schedule a block update at `pos` after `delay`, rounded down to whole
    /// ticks. Does nothing if one is already scheduled there.
    pub fn schedule_block_update(&self, pos: BlockPos, delay: Duration) {
        if self.is_closed() || pos.out_of_bounds(self.range) {
            return;
        }
        let now = self.current_tick();
        let ticks = (delay.as_nanos() / TICK.as_nanos()) as i64;
        self.updates.lock().scheduled.entry(pos).or_insert(now + ticks);
    }

    /// The tick at which `pos` has an update scheduled.
    pub fn scheduled_update(&self, pos: BlockPos) -> Option<i64> {
        self.updates.lock().scheduled.get(&pos).copied()
    }

    /// Neighbour updates waiting for the next tick.
    pub fn pending_neighbour_updates(&self) -> Vec<NeighbourUpdate> {
        self.updates.lock().neighbours.clone()
    }

    /// Queue updates for `pos` and its face neighbours inside the range.
    pub(crate) fn do_block_updates_around(&self, pos: BlockPos) {
        if pos.out_of_bounds(self.range) {
            return;
        }
        let mut q = self.updates.lock();
        q.neighbours.push(NeighbourUpdate { pos, changed: pos });
        for n in pos.neighbors_within(self.range) {
            q.neighbours.push(NeighbourUpdate { pos: n, changed: pos });
        }
    }

    /// Advance the world by one tick.
    pub fn tick(&self) {
        if self.is_closed() {
            return;
        }
        let (tick, time, cycle) = {
            let mut s = self.settings.lock();
            s.current_tick += 1;
            if s.time_cycle {
                s.time += 1;
            }
            (s.current_tick, s.time, s.time_cycle)
        };
        if cycle && tick % 20 == 0 {
            for v in self.world_viewers() {
                v.view_time(time);
            }
        }
        self.tick_weather();
        self.tick_entities();
        self.tick_random_blocks();
        self.tick_scheduled_updates(tick);
        self.tick_neighbour_updates();
    }

    fn tick_scheduled_updates(&self, tick: i64) {
        let due: Vec<BlockPos> = {
            let mut q = self.updates.lock();
            let due: Vec<BlockPos> = q
                .scheduled
                .iter()
                .filter(|(_, t)| **t <= tick)
                .map(|(p, _)| *p)
                .collect();
            for p in &due {
                q.scheduled.remove(p);
            }
            due
        };
        for pos in due {
            self.rules.evaluate(self, &BlockUpdate::Scheduled { pos });
        }
    }

    /// Updates queued while these run wait for the next tick.
    fn tick_neighbour_updates(&self) {
        let updates = std::mem::take(&mut self.updates.lock().neighbours);
        if !updates.is_empty() {
            trace!(count = updates.len(), "neighbour updates");
        }
        for u in updates {
            self.rules.evaluate(
                self,
                &BlockUpdate::Neighbour {
                    pos: u.pos,
                    changed: u.changed,
                },
            );
        }
    }

    /// Pick `random_tick_speed` voxels in every non-empty sub-chunk of each
    /// resident chunk within `tick_range` of a loader, and fire a random tick
    /// for those whose block asks for one.
    fn tick_random_blocks(&self) {
        let (speed, range) = {
            let s = self.settings.lock();
            (s.random_tick_speed, s.tick_range)
        };
        if speed == 0 {
            return;
        }
        let mut positions: HashSet<ChunkPos> = HashSet::new();
        for centre in self.loader_positions() {
            for dx in -range..=range {
                for dz in -range..=range {
                    positions.insert(ChunkPos::new(centre.x + dx, centre.z + dz));
                }
            }
        }

        let mut rng = rand::thread_rng();
        let mut ticked = Vec::new();
        for cpos in positions {
            let Some(c) = self.chunk_from_cache(cpos) else {
                continue;
            };
            let c = c.lock();
            if c.evicted {
                continue;
            }
            let origin = cpos.block_origin(0);
            for (i, sub) in c.chunk.sub_chunks().iter().enumerate() {
                if sub.layer_count() == 0 {
                    continue;
                }
                let base_y = c.chunk.sub_base_y(i);
                for _ in 0..speed {
                    let (x, y, z) = (
                        rng.gen_range(0..SECTION_SIZE as u8),
                        rng.gen_range(0..SECTION_SIZE as u8),
                        rng.gen_range(0..SECTION_SIZE as u8),
                    );
                    if self.registry.random_ticks(sub.block(x, y, z, LAYER_BLOCK)) {
                        ticked.push(origin.offset(x as i64, base_y + y as i64, z as i64));
                    }
                }
            }
        }
        for pos in ticked {
            self.rules.evaluate(self, &BlockUpdate::Random { pos });
        }
    }
}

/// Start the tick and janitor threads. Each exits when the World is dropped
/// or its closing channel disconnects.
pub(crate) fn spawn_background(world: &Arc<World>, tick: Option<Duration>, janitor: Option<Duration>) {
    let (tx, rx) = crossbeam_channel::bounded::<()>(0);
    let mut threads = world.threads.lock();
    if let Some(interval) = tick {
        let (weak, rx) = (Arc::downgrade(world), rx.clone());
        match thread::Builder::new()
            .name("world-tick".into())
            .spawn(move || run_every(weak, interval, rx, |w| w.tick()))
        {
            Ok(h) => threads.push(h),
            Err(err) => error!("failed to start tick thread: {err}"),
        }
    }
    if let Some(interval) = janitor {
        let weak = Arc::downgrade(world);
        match thread::Builder::new()
            .name("world-janitor".into())
            .spawn(move || {
                run_every(weak, interval, rx, |w| {
                    w.collect_unused_chunks();
                })
            }) {
            Ok(h) => threads.push(h),
            Err(err) => error!("failed to start janitor thread: {err}"),
        }
    }
    *world.closing.lock() = Some(tx);
}

/// Disconnect the closing channel and wait for the threads, except the
/// calling one (a World can be dropped on its own tick thread).
pub(crate) fn stop_background(world: &World) {
    world.closing.lock().take();
    let current = thread::current().id();
    let threads = std::mem::take(&mut *world.threads.lock());
    for h in threads {
        if h.thread().id() == current {
            continue;
        }
        if h.join().is_err() {
            error!("world background thread panicked");
        }
    }
    debug!("background threads stopped");
}

fn run_every(world: Weak<World>, interval: Duration, closing: Receiver<()>, f: impl Fn(&World)) {
    let ticker = crossbeam_channel::tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                let Some(w) = world.upgrade() else { return };
                if w.is_closed() {
                    return;
                }
                f(&w);
            }
            recv(closing) -> _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_round_down_to_ticks() {
        assert_eq!((Duration::from_millis(120).as_nanos() / TICK.as_nanos()) as i64, 2);
        assert_eq!((Duration::from_secs(1).as_nanos() / TICK.as_nanos()) as i64, 20);
    }
}
