use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use keystone_engine::world::loader::Loader;
use keystone_engine::world::position::{BlockPos, Range, Vec3};
use keystone_engine::world::{SetOpts, World, WorldConfig};
use keystone_server::event_bus::{self, BroadcastViewer, Delivery, ViewEvent};
use keystone_server::generator::FlatGenerator;
use keystone_server::persistence::AnvilProvider;
use keystone_server::{block, rules};

/// How often unviewed chunks are saved and evicted (5 minutes).
const JANITOR_INTERVAL: Duration = Duration::from_secs(300);

/// Chunks a loader streams per tick.
const CHUNKS_PER_TICK: usize = 8;

#[tokio::main]
async fn main() {
    let demo_mode = std::env::args().any(|a| a == "--demo");
    let read_only = std::env::args().any(|a| a == "--read-only");
    let radius: i32 = std::env::args()
        .skip_while(|a| a != "--radius")
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(8);
    let world_dir: PathBuf = std::env::args()
        .skip_while(|a| a != "--world")
        .nth(1)
        .unwrap_or_else(|| "world".into())
        .into();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if demo_mode {
        run_demo();
        return;
    }

    tracing::info!("Keystone -- voxel world server");

    let registry = Arc::new(block::vanilla());
    let provider = match AnvilProvider::open(&world_dir, Arc::clone(&registry)) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Failed to open world at {}: {:#}", world_dir.display(), e);
            return;
        }
    };

    let mut config = WorldConfig::new(Arc::clone(&registry));
    config.range = Range::new(-64, 319);
    config.provider = Arc::new(provider);
    config.generator = Arc::new(FlatGenerator::standard(&registry));
    config.rules = rules::standard();
    config.janitor_interval = Some(JANITOR_INTERVAL);
    config.read_only = read_only;
    let world = World::new(config);
    tracing::info!(name = %world.name(), read_only, "World open");

    // View event bus: each viewer publishes here, connection tasks subscribe
    // and forward what is addressed to them.
    let (bus_tx, mut bus_rx) = broadcast::channel::<Delivery>(event_bus::BUS_CAPACITY);
    tokio::spawn(async move {
        let mut chunks = 0usize;
        loop {
            match bus_rx.recv().await {
                Ok(d) => {
                    if let ViewEvent::Chunk { pos, .. } = *d.event {
                        chunks += 1;
                        tracing::debug!(viewer = d.viewer.0, ?pos, chunks, "chunk streamed");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("View bus subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // A loader parked at spawn keeps the spawn area resident.
    let viewer = Arc::new(BroadcastViewer::new(bus_tx));
    let loader = Arc::new(Loader::new(radius, &world, viewer));
    let spawn = world.spawn();
    loader.move_to(Vec3::new(spawn.x as f64 + 0.5, spawn.y as f64, spawn.z as f64 + 0.5));
    tracing::info!(?spawn, radius, pending = loader.pending(), "Spawn loader placed");

    let streaming = Arc::clone(&loader);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(keystone_engine::world::tick::TICK);
        while streaming.pending() > 0 {
            interval.tick().await;
            let l = Arc::clone(&streaming);
            if tokio::task::spawn_blocking(move || l.load(CHUNKS_PER_TICK))
                .await
                .is_err()
            {
                tracing::error!("Chunk streaming task panicked");
                return;
            }
        }
        tracing::info!("Spawn area loaded: {} chunks", streaming.loaded_chunks().len());
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to wait for Ctrl+C: {}", e);
    }
    tracing::info!("Ctrl+C received, shutting down...");

    loader.close();
    let closing = Arc::clone(&world);
    if tokio::task::spawn_blocking(move || closing.close()).await.is_err() {
        tracing::error!("World close panicked");
    }
    tracing::info!("World saved and closed");
}

/// Sand-drop and water-spread demo on an in-memory flat world.
fn run_demo() {
    tracing::info!("Keystone -- block update demo");

    let registry = Arc::new(block::vanilla());
    let generator = FlatGenerator::standard(&registry);
    let surface = generator.surface();

    let mut config = WorldConfig::new(Arc::clone(&registry));
    config.generator = Arc::new(generator);
    config.rules = rules::standard();
    config.tick_interval = None;
    config.janitor_interval = None;
    let world = World::new(config);

    let sand_pos = BlockPos::new(8, surface + 10, 8);
    world.set_block(sand_pos, block::block(block::SAND), SetOpts::default());
    tracing::info!("Placed sand at {:?}", sand_pos);

    let water_pos = BlockPos::new(-8, surface, -8);
    world.set_liquid(water_pos, Some(block::water(0)));
    tracing::info!("Placed a water source at {:?}", water_pos);

    for _ in 0..200 {
        world.tick();
    }

    let landed = BlockPos::new(8, surface, 8);
    if world.block(landed).name() == block::SAND {
        tracing::info!("Sand landed on the surface at {:?}", landed);
    } else {
        tracing::warn!("Unexpected block at {:?} -- something is off", landed);
    }

    let wet = (-16..=0)
        .flat_map(|x| (-16..=0).map(move |z| BlockPos::new(x, surface, z)))
        .filter(|p| world.liquid(*p).is_some())
        .count();
    tracing::info!("Water covers {} blocks after {} ticks", wet, world.current_tick());

    world.close();
}
