//! World persistence using Minecraft's Anvil layout.
//!
//! `region/r.X.Z.mca` holds terrain and block entities, `entities/r.X.Z.mca`
//! holds entities and `level.dat` (gzip NBT) holds the world settings. Block
//! states are written by name and properties, so a save survives changes to
//! registration order.

use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use fastnbt::IntArray;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keystone_engine::world::block::{Block, BlockId, BlockRegistry, BlockState, NbtCompound};
use keystone_engine::world::chunk::{BiomeId, Chunk, SubChunk, LAYER_BLOCK, LAYER_LIQUID, SECTION_VOLUME};
use keystone_engine::world::entity::Entity;
use keystone_engine::world::position::{BlockPos, ChunkPos, Range};
use keystone_engine::world::provider::Provider;
use keystone_engine::world::settings::{Difficulty, GameMode, Settings};

use crate::entity::StoredEntity;

// ── MC 1.21.11 data version ─────────────────────────────────────────────────

/// DataVersion tag written into every saved chunk. MC 1.21.11 = 4189.
const DATA_VERSION: i32 = 4189;

const REGION_DIR: &str = "region";
const ENTITY_DIR: &str = "entities";
const LEVEL_DAT: &str = "level.dat";

const STATUS_FULL: &str = "minecraft:full";
/// Written when only block entities reached a chunk that has no terrain yet.
const STATUS_EMPTY: &str = "minecraft:empty";

// ── NBT structs (serde) ─────────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug)]
struct ChunkNbt {
    #[serde(rename = "DataVersion")]
    data_version: i32,
    #[serde(rename = "xPos")]
    x_pos: i32,
    #[serde(rename = "zPos")]
    z_pos: i32,
    #[serde(rename = "yPos")]
    y_pos: i32,
    #[serde(rename = "Status")]
    status: String,
    sections: Vec<SectionNbt>,
    #[serde(default)]
    block_entities: Vec<NbtCompound>,
}

impl ChunkNbt {
    fn empty(pos: ChunkPos) -> Self {
        Self {
            data_version: DATA_VERSION,
            x_pos: pos.x,
            z_pos: pos.z,
            y_pos: 0,
            status: STATUS_EMPTY.into(),
            sections: Vec::new(),
            block_entities: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
struct SectionNbt {
    #[serde(rename = "Y")]
    y: i8,
    block_states: BlockStatesNbt,
    /// Liquids held inside displacing blocks. Absent when the layer is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    liquids: Option<BlockStatesNbt>,
    biomes: BiomesNbt,
}

#[derive(Serialize, Deserialize, Debug)]
struct BlockStatesNbt {
    palette: Vec<PaletteEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Vec<i64>>,
}

/// One biome id per voxel, palettised the same way as block states.
#[derive(Serialize, Deserialize, Debug)]
struct BiomesNbt {
    palette: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Vec<i64>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct PaletteEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Properties")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<HashMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug)]
struct EntityChunkNbt {
    #[serde(rename = "DataVersion")]
    data_version: i32,
    #[serde(rename = "Position")]
    position: IntArray,
    #[serde(rename = "Entities")]
    entities: Vec<NbtCompound>,
}

#[derive(Serialize, Deserialize, Debug)]
struct LevelDat {
    #[serde(rename = "Data")]
    data: LevelData,
}

#[derive(Serialize, Deserialize, Debug)]
struct LevelData {
    #[serde(rename = "DataVersion")]
    data_version: i32,
    #[serde(rename = "LevelName")]
    name: String,
    #[serde(rename = "SpawnX")]
    spawn_x: i32,
    #[serde(rename = "SpawnY")]
    spawn_y: i32,
    #[serde(rename = "SpawnZ")]
    spawn_z: i32,
    #[serde(rename = "Time")]
    current_tick: i64,
    #[serde(rename = "DayTime")]
    time: i64,
    raining: bool,
    #[serde(rename = "rainTime")]
    rain_time: i32,
    thundering: bool,
    #[serde(rename = "thunderTime")]
    thunder_time: i32,
    #[serde(rename = "Difficulty")]
    difficulty: i8,
    #[serde(rename = "GameType")]
    game_type: i32,
    #[serde(rename = "GameRules", default)]
    game_rules: HashMap<String, String>,
    /// Random-tick radius in chunks. Not a vanilla tag.
    #[serde(rename = "TickRange", default = "default_tick_range")]
    tick_range: i32,
}

fn default_tick_range() -> i32 {
    Settings::default().tick_range
}

impl LevelData {
    fn from_settings(s: &Settings) -> Self {
        let game_rules = HashMap::from([
            ("doDaylightCycle".to_string(), s.time_cycle.to_string()),
            ("doWeatherCycle".to_string(), s.weather_cycle.to_string()),
            ("randomTickSpeed".to_string(), s.random_tick_speed.to_string()),
        ]);
        Self {
            data_version: DATA_VERSION,
            name: s.name.clone(),
            spawn_x: s.spawn.x as i32,
            spawn_y: s.spawn.y as i32,
            spawn_z: s.spawn.z as i32,
            current_tick: s.current_tick,
            time: s.time,
            raining: s.raining,
            rain_time: s.rain_time.clamp(0, i32::MAX as i64) as i32,
            thundering: s.thundering,
            thunder_time: s.thunder_time.clamp(0, i32::MAX as i64) as i32,
            difficulty: s.difficulty.id() as i8,
            game_type: s.default_game_mode.id(),
            game_rules,
            tick_range: s.tick_range,
        }
    }

    fn apply(&self, s: &mut Settings) {
        s.name = self.name.clone();
        s.spawn = BlockPos::new(self.spawn_x as i64, self.spawn_y as i64, self.spawn_z as i64);
        s.current_tick = self.current_tick;
        s.time = self.time;
        s.raining = self.raining;
        s.rain_time = self.rain_time as i64;
        s.thundering = self.thundering;
        s.thunder_time = self.thunder_time as i64;
        s.difficulty = Difficulty::from_id(self.difficulty as i32).unwrap_or_default();
        s.default_game_mode = GameMode::from_id(self.game_type).unwrap_or_default();
        s.tick_range = self.tick_range;
        if let Some(v) = self.rule("doDaylightCycle") {
            s.time_cycle = v;
        }
        if let Some(v) = self.rule("doWeatherCycle") {
            s.weather_cycle = v;
        }
        if let Some(v) = self.rule("randomTickSpeed") {
            s.random_tick_speed = v;
        }
    }

    fn rule<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.game_rules.get(name).and_then(|v| v.parse().ok())
    }
}

// ── Bit-packing helpers ──────────────────────────────────────────────────────

/// Pack 4096 palette indices into a `Vec<i64>` using MC's bit-packing format.
///
/// `bits_per_entry` = max(4, ceil(log2(palette_len))).
/// Entries are packed sequentially into i64s with no entry spanning two longs.
fn pack_indices(indices: &[u16; SECTION_VOLUME], palette_len: usize) -> Option<Vec<i64>> {
    if palette_len <= 1 {
        return None;
    }

    let bits = bits_per_entry(palette_len);
    let entries_per_long = 64 / bits;
    let num_longs = SECTION_VOLUME.div_ceil(entries_per_long);
    let mask = (1u64 << bits) - 1;

    let mut longs = vec![0i64; num_longs];
    for (i, &idx) in indices.iter().enumerate() {
        let long_idx = i / entries_per_long;
        let bit_offset = (i % entries_per_long) * bits;
        longs[long_idx] |= ((idx as u64 & mask) << bit_offset) as i64;
    }
    Some(longs)
}

/// Unpack palette indices from a `Vec<i64>` back into 4096 entries.
fn unpack_indices(data: &[i64], palette_len: usize) -> [u16; SECTION_VOLUME] {
    let bits = bits_per_entry(palette_len);
    let entries_per_long = 64 / bits;
    let mask = (1u64 << bits) - 1;

    let mut indices = [0u16; SECTION_VOLUME];
    for (i, idx) in indices.iter_mut().enumerate() {
        let long_idx = i / entries_per_long;
        let bit_offset = (i % entries_per_long) * bits;
        if long_idx < data.len() {
            *idx = ((data[long_idx] as u64 >> bit_offset) & mask) as u16;
        }
    }
    indices
}

/// Calculate bits per palette entry (vanilla never goes below 4).
fn bits_per_entry(palette_len: usize) -> usize {
    let raw = if palette_len <= 1 {
        0
    } else {
        (usize::BITS - (palette_len - 1).leading_zeros()) as usize
    };
    raw.max(4)
}

/// Build a palette over 4096 values in section order, returning the distinct
/// values in first-seen order and the packed indices.
fn palettize<T: Copy + Eq + Hash>(values: impl Iterator<Item = T>) -> (Vec<T>, Option<Vec<i64>>) {
    let mut palette = Vec::new();
    let mut lookup: HashMap<T, u16> = HashMap::new();
    let mut indices = [0u16; SECTION_VOLUME];
    for (i, v) in values.take(SECTION_VOLUME).enumerate() {
        indices[i] = *lookup.entry(v).or_insert_with(|| {
            palette.push(v);
            (palette.len() - 1) as u16
        });
    }
    let data = pack_indices(&indices, palette.len());
    (palette, data)
}

/// Inverse of [`palettize`]: the palette index of every voxel.
fn expand(palette_len: usize, data: Option<&[i64]>) -> [u16; SECTION_VOLUME] {
    match data {
        Some(data) if palette_len > 1 => unpack_indices(data, palette_len),
        _ => [0u16; SECTION_VOLUME],
    }
}

/// Section order is YZX with x varying fastest, same as the engine's.
fn voxel(i: usize) -> (u8, u8, u8) {
    ((i & 15) as u8, (i >> 8) as u8, ((i >> 4) & 15) as u8)
}

// ── Provider ─────────────────────────────────────────────────────────────────

/// A [`Provider`] storing a world in a directory of Anvil region files.
///
/// Region files are rewritten whole on every chunk write, serialized by one
/// lock per provider.
pub struct AnvilProvider {
    dir: PathBuf,
    registry: Arc<BlockRegistry>,
    io: Mutex<()>,
}

impl AnvilProvider {
    /// Open (creating if needed) the world directory at `dir`.
    pub fn open(dir: impl Into<PathBuf>, registry: Arc<BlockRegistry>) -> Result<Self> {
        let dir = dir.into();
        for sub in [REGION_DIR, ENTITY_DIR] {
            fs::create_dir_all(dir.join(sub))
                .with_context(|| format!("creating {}", dir.join(sub).display()))?;
        }
        info!(dir = %dir.display(), "opened anvil world");
        Ok(Self {
            dir,
            registry,
            io: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_io(&self) -> MutexGuard<'_, ()> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn region_path(&self, kind: &str, pos: ChunkPos) -> PathBuf {
        let rx = pos.x.div_euclid(32);
        let rz = pos.z.div_euclid(32);
        self.dir.join(kind).join(format!("r.{}.{}.mca", rx, rz))
    }

    fn read_record(&self, kind: &str, pos: ChunkPos) -> Result<Option<Vec<u8>>> {
        let _io = self.lock_io();
        self.read_record_locked(kind, pos)
    }

    fn read_record_locked(&self, kind: &str, pos: ChunkPos) -> Result<Option<Vec<u8>>> {
        let path = self.region_path(kind, pos);
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(&path)
            .with_context(|| format!("opening region file {}", path.display()))?;
        let mut region = fastanvil::Region::from_stream(file)
            .with_context(|| format!("parsing region file {}", path.display()))?;
        let (x, z) = (pos.x.rem_euclid(32) as usize, pos.z.rem_euclid(32) as usize);
        region
            .read_chunk(x, z)
            .with_context(|| format!("reading chunk ({}, {}) from {}", pos.x, pos.z, path.display()))
    }

    /// Read-modify-write one chunk record while holding the io lock.
    fn update_record(
        &self,
        kind: &str,
        pos: ChunkPos,
        f: impl FnOnce(Option<Vec<u8>>) -> Result<Vec<u8>>,
    ) -> Result<()> {
        let _io = self.lock_io();
        let bytes = f(self.read_record_locked(kind, pos)?)?;

        let path = self.region_path(kind, pos);
        let mut region = if path.exists() {
            let file_bytes =
                fs::read(&path).with_context(|| format!("reading region {}", path.display()))?;
            fastanvil::Region::from_stream(Cursor::new(file_bytes))
                .with_context(|| format!("parsing region {}", path.display()))?
        } else {
            fastanvil::Region::new(Cursor::new(Vec::new()))
                .with_context(|| format!("creating region {}", path.display()))?
        };
        let (x, z) = (pos.x.rem_euclid(32) as usize, pos.z.rem_euclid(32) as usize);
        region
            .write_chunk(x, z, &bytes)
            .with_context(|| format!("writing chunk ({}, {})", pos.x, pos.z))?;

        let mut cursor = region.into_inner()?;
        let len = cursor.stream_position()?;
        let data = cursor.into_inner();
        fs::write(&path, &data[..len as usize])
            .with_context(|| format!("writing region {}", path.display()))?;
        Ok(())
    }

    fn read_chunk_nbt(&self, pos: ChunkPos) -> Result<Option<ChunkNbt>> {
        let Some(bytes) = self.read_record(REGION_DIR, pos)? else {
            return Ok(None);
        };
        let nbt = fastnbt::from_bytes(&bytes)
            .with_context(|| format!("deserializing chunk ({}, {})", pos.x, pos.z))?;
        Ok(Some(nbt))
    }

    // ── Palette conversion ──────────────────────────────────────────────────

    fn palette_entry(&self, id: BlockId) -> PaletteEntry {
        let block = self.registry.block(id).unwrap_or_else(|| self.registry.air());
        let state = block.state();
        let properties = if state.properties().is_empty() {
            None
        } else {
            Some(state.properties().iter().cloned().collect())
        };
        PaletteEntry {
            name: state.name().to_string(),
            properties,
        }
    }

    fn resolve(&self, entry: &PaletteEntry) -> BlockId {
        let mut state = BlockState::new(entry.name.as_str());
        for (k, v) in entry.properties.iter().flatten() {
            state = state.with(k.as_str(), v.as_str());
        }
        match self.registry.try_runtime_id(&Block::new(state)) {
            Some(id) => id,
            None => {
                warn!(block = %entry.name, "unknown block in save file, defaulting to air");
                BlockId::AIR
            }
        }
    }

    fn encode_layer(&self, sub: &SubChunk, layer: u8) -> BlockStatesNbt {
        let ids = sub.layer(layer);
        let (palette, data) = palettize((0..SECTION_VOLUME).map(|i| ids.map_or(BlockId::AIR, |l| l[i])));
        BlockStatesNbt {
            palette: palette.into_iter().map(|id| self.palette_entry(id)).collect(),
            data,
        }
    }

    fn decode_layer(&self, sub: &mut SubChunk, layer: u8, nbt: &BlockStatesNbt) {
        if nbt.palette.is_empty() {
            return;
        }
        let resolved: Vec<BlockId> = nbt.palette.iter().map(|e| self.resolve(e)).collect();
        if resolved.iter().all(|id| *id == BlockId::AIR) {
            return;
        }
        let indices = expand(resolved.len(), nbt.data.as_deref());
        for (i, idx) in indices.iter().enumerate() {
            let id = resolved.get(*idx as usize).copied().unwrap_or(BlockId::AIR);
            if id != BlockId::AIR {
                let (x, y, z) = voxel(i);
                sub.set_block(x, y, z, layer, id);
            }
        }
    }

    fn encode_chunk(&self, pos: ChunkPos, chunk: &Chunk, block_entities: Vec<NbtCompound>) -> ChunkNbt {
        let min_section = chunk.range().min_section();
        let sections = chunk
            .sub_chunks()
            .iter()
            .enumerate()
            .map(|(i, sub)| {
                let (biomes, biome_data) = palettize(sub.biomes().map(|b| b.0));
                SectionNbt {
                    y: (min_section + i as i32) as i8,
                    block_states: self.encode_layer(sub, LAYER_BLOCK),
                    liquids: sub
                        .layer(LAYER_LIQUID)
                        .is_some()
                        .then(|| self.encode_layer(sub, LAYER_LIQUID)),
                    biomes: BiomesNbt {
                        palette: biomes.into_iter().map(|b| b as i32).collect(),
                        data: biome_data,
                    },
                }
            })
            .collect();
        ChunkNbt {
            data_version: DATA_VERSION,
            x_pos: pos.x,
            z_pos: pos.z,
            y_pos: min_section,
            status: STATUS_FULL.into(),
            sections,
            block_entities,
        }
    }

    fn decode_chunk(&self, nbt: &ChunkNbt, range: Range) -> Chunk {
        let mut chunk = Chunk::new(range);
        let min_section = range.min_section();
        let count = range.section_count() as i32;
        for section in &nbt.sections {
            let idx = section.y as i32 - min_section;
            if !(0..count).contains(&idx) {
                warn!(
                    x = nbt.x_pos,
                    z = nbt.z_pos,
                    section = section.y,
                    "dropping section outside the world range"
                );
                continue;
            }
            let sub = &mut chunk.sub_chunks_mut()[idx as usize];
            self.decode_layer(sub, LAYER_BLOCK, &section.block_states);
            if let Some(liquids) = &section.liquids {
                self.decode_layer(sub, LAYER_LIQUID, liquids);
            }
            let biomes = &section.biomes;
            if biomes.palette.is_empty() {
                continue;
            }
            let indices = expand(biomes.palette.len(), biomes.data.as_deref());
            for (i, idx) in indices.iter().enumerate() {
                let biome = biomes.palette.get(*idx as usize).copied().unwrap_or(0);
                let (x, y, z) = voxel(i);
                sub.set_biome(x, y, z, BiomeId(biome as u32));
            }
        }
        chunk
    }
}

impl Provider for AnvilProvider {
    fn settings(&self, settings: &mut Settings) {
        let path = self.dir.join(LEVEL_DAT);
        if !path.exists() {
            debug!("no level.dat, using default settings");
            return;
        }
        match read_level_dat(&path) {
            Ok(level) => {
                level.data.apply(settings);
                debug!(name = %settings.name, "loaded level.dat");
            }
            Err(err) => warn!("failed to read level.dat, using defaults: {err:#}"),
        }
    }

    fn save_settings(&self, settings: &Settings) {
        let level = LevelDat {
            data: LevelData::from_settings(settings),
        };
        if let Err(err) = write_level_dat(&self.dir.join(LEVEL_DAT), &level) {
            warn!("failed to write level.dat: {err:#}");
        }
    }

    fn load_chunk(&self, pos: ChunkPos, range: Range) -> Result<Option<Chunk>> {
        let Some(nbt) = self.read_chunk_nbt(pos)? else {
            return Ok(None);
        };
        if nbt.status != STATUS_FULL {
            return Ok(None);
        }
        Ok(Some(self.decode_chunk(&nbt, range)))
    }

    fn save_chunk(&self, pos: ChunkPos, chunk: &Chunk) -> Result<()> {
        self.update_record(REGION_DIR, pos, |old| {
            let block_entities = old
                .and_then(|bytes| match fastnbt::from_bytes::<ChunkNbt>(&bytes) {
                    Ok(nbt) => Some(nbt.block_entities),
                    Err(err) => {
                        warn!(x = pos.x, z = pos.z, "overwriting unreadable chunk: {err}");
                        None
                    }
                })
                .unwrap_or_default();
            let nbt = self.encode_chunk(pos, chunk, block_entities);
            fastnbt::to_bytes(&nbt).with_context(|| format!("serializing chunk ({}, {})", pos.x, pos.z))
        })
    }

    fn load_entities(&self, pos: ChunkPos) -> Result<Vec<Arc<dyn Entity>>> {
        let Some(bytes) = self.read_record(ENTITY_DIR, pos)? else {
            return Ok(Vec::new());
        };
        let nbt: EntityChunkNbt = fastnbt::from_bytes(&bytes)
            .with_context(|| format!("deserializing entities of ({}, {})", pos.x, pos.z))?;
        let mut entities: Vec<Arc<dyn Entity>> = Vec::with_capacity(nbt.entities.len());
        for data in &nbt.entities {
            match StoredEntity::decode(data) {
                Some(e) => entities.push(Arc::new(e)),
                None => warn!(x = pos.x, z = pos.z, "skipping malformed saved entity"),
            }
        }
        Ok(entities)
    }

    fn save_entities(&self, pos: ChunkPos, entities: &[Arc<dyn Entity>]) -> Result<()> {
        let nbt = EntityChunkNbt {
            data_version: DATA_VERSION,
            position: IntArray::new(vec![pos.x, pos.z]),
            entities: entities.iter().filter_map(|e| e.encode_nbt()).collect(),
        };
        let bytes = fastnbt::to_bytes(&nbt)
            .with_context(|| format!("serializing entities of ({}, {})", pos.x, pos.z))?;
        self.update_record(ENTITY_DIR, pos, |_| Ok(bytes))
    }

    fn load_block_nbt(&self, pos: ChunkPos) -> Result<Vec<NbtCompound>> {
        Ok(self
            .read_chunk_nbt(pos)?
            .map(|nbt| nbt.block_entities)
            .unwrap_or_default())
    }

    fn save_block_nbt(&self, pos: ChunkPos, data: &[NbtCompound]) -> Result<()> {
        self.update_record(REGION_DIR, pos, |old| {
            let mut nbt = match old {
                Some(bytes) => fastnbt::from_bytes::<ChunkNbt>(&bytes)
                    .with_context(|| format!("deserializing chunk ({}, {})", pos.x, pos.z))?,
                None => ChunkNbt::empty(pos),
            };
            nbt.block_entities = data.to_vec();
            fastnbt::to_bytes(&nbt).with_context(|| format!("serializing chunk ({}, {})", pos.x, pos.z))
        })
    }

    fn close(&self) -> Result<()> {
        info!(dir = %self.dir.display(), "closed anvil world");
        Ok(())
    }
}

fn read_level_dat(path: &Path) -> Result<LevelDat> {
    let file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut raw = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut raw)
        .with_context(|| format!("decompressing {}", path.display()))?;
    fastnbt::from_bytes(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Written to a sibling file first so a crash never leaves a torn level.dat.
fn write_level_dat(path: &Path, level: &LevelDat) -> Result<()> {
    let raw = fastnbt::to_bytes(level).context("serializing level.dat")?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let compressed = encoder.finish()?;
    let tmp = path.with_extension("dat_new");
    fs::write(&tmp, compressed).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────────────
