//! Persistent per-world settings: time, weather, spawn and gameplay knobs.

use rand::Rng;
use tracing::debug;

use super::position::BlockPos;
use super::World;

/// Ticks in one in-game day.
pub const TIME_DAY: i64 = 24_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Difficulty {
    Peaceful,
    Easy,
    #[default]
    Normal,
    Hard,
}

impl Difficulty {
    pub fn id(self) -> i32 {
        match self {
            Difficulty::Peaceful => 0,
            Difficulty::Easy => 1,
            Difficulty::Normal => 2,
            Difficulty::Hard => 3,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Difficulty::Peaceful),
            1 => Some(Difficulty::Easy),
            2 => Some(Difficulty::Normal),
            3 => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GameMode {
    #[default]
    Survival,
    Creative,
    Adventure,
    Spectator,
}

impl GameMode {
    pub fn id(self) -> i32 {
        match self {
            GameMode::Survival => 0,
            GameMode::Creative => 1,
            GameMode::Adventure => 2,
            GameMode::Spectator => 3,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(GameMode::Survival),
            1 => Some(GameMode::Creative),
            2 => Some(GameMode::Adventure),
            3 => Some(GameMode::Spectator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub name: String,
    /// A y above the world's range means "on top of the highest solid block".
    pub spawn: BlockPos,
    pub time: i64,
    pub time_cycle: bool,
    pub current_tick: i64,
    pub raining: bool,
    /// Ticks until `raining` flips.
    pub rain_time: i64,
    pub thundering: bool,
    /// Ticks until `thundering` flips.
    pub thunder_time: i64,
    pub weather_cycle: bool,
    pub difficulty: Difficulty,
    pub default_game_mode: GameMode,
    /// Radius in chunks around loaders in which random ticks happen.
    pub tick_range: i32,
    /// Random ticks per sub-chunk per tick.
    pub random_tick_speed: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: "World".to_string(),
            spawn: BlockPos::new(0, i16::MAX as i64, 0),
            time: 0,
            time_cycle: true,
            current_tick: 0,
            raining: false,
            rain_time: 0,
            thundering: false,
            thunder_time: 0,
            weather_cycle: true,
            difficulty: Difficulty::Normal,
            default_game_mode: GameMode::Survival,
            tick_range: 6,
            random_tick_speed: 3,
        }
    }
}

impl World {
    /// Snapshot of the current settings.
    pub fn settings(&self) -> Settings {
        self.settings.lock().clone()
    }

    pub fn name(&self) -> String {
        self.settings.lock().name.clone()
    }

    pub fn current_tick(&self) -> i64 {
        self.settings.lock().current_tick
    }

    pub fn time(&self) -> i64 {
        self.settings.lock().time
    }

    pub fn set_time(&self, time: i64) {
        self.settings.lock().time = time;
        for v in self.world_viewers() {
            v.view_time(time);
        }
    }

    pub fn start_time(&self) {
        self.settings.lock().time_cycle = true;
    }

    pub fn stop_time(&self) {
        self.settings.lock().time_cycle = false;
    }

    /// The spawn point, resolved onto the highest solid block when its y is
    /// above the world's range.
    pub fn spawn(&self) -> BlockPos {
        let pos = self.settings.lock().spawn;
        if pos.y > self.range.max {
            let y = self.highest_obstructing_block(pos.x, pos.z) + 1;
            return BlockPos::new(pos.x, y, pos.z);
        }
        pos
    }

    pub fn set_spawn(&self, pos: BlockPos) {
        self.settings.lock().spawn = pos;
        for v in self.world_viewers() {
            v.view_world_spawn(pos);
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        self.settings.lock().difficulty
    }

    pub fn set_difficulty(&self, difficulty: Difficulty) {
        self.settings.lock().difficulty = difficulty;
    }

    pub fn default_game_mode(&self) -> GameMode {
        self.settings.lock().default_game_mode
    }

    pub fn set_default_game_mode(&self, mode: GameMode) {
        self.settings.lock().default_game_mode = mode;
    }

    pub fn tick_range(&self) -> i32 {
        self.settings.lock().tick_range
    }

    pub fn set_tick_range(&self, range: i32) {
        self.settings.lock().tick_range = range;
    }

    pub fn random_tick_speed(&self) -> u32 {
        self.settings.lock().random_tick_speed
    }

    pub fn set_random_tick_speed(&self, speed: u32) {
        self.settings.lock().random_tick_speed = speed;
    }

    pub fn raining(&self) -> bool {
        self.settings.lock().raining
    }

    /// Thunder only counts while it is also raining.
    pub fn thundering(&self) -> bool {
        let s = self.settings.lock();
        s.raining && s.thundering
    }

    pub fn start_weather_cycle(&self) {
        self.settings.lock().weather_cycle = true;
    }

    pub fn stop_weather_cycle(&self) {
        self.settings.lock().weather_cycle = false;
    }

    /// Rain for `ticks` ticks.
    pub fn start_raining(&self, ticks: i64) {
        let mut s = self.settings.lock();
        s.raining = true;
        s.rain_time = ticks;
        let thunder = s.thundering;
        drop(s);
        self.broadcast_weather(true, thunder);
    }

    pub fn stop_raining(&self) {
        let mut s = self.settings.lock();
        s.raining = false;
        s.rain_time = 0;
        drop(s);
        self.broadcast_weather(false, false);
    }

    /// Thunder for `ticks` ticks. Starts rain too if it was dry.
    pub fn start_thundering(&self, ticks: i64) {
        let mut s = self.settings.lock();
        s.thundering = true;
        s.thunder_time = ticks;
        if !s.raining {
            s.raining = true;
            s.rain_time = ticks;
        }
        drop(s);
        self.broadcast_weather(true, true);
    }

    pub fn stop_thundering(&self) {
        let mut s = self.settings.lock();
        s.thundering = false;
        s.thunder_time = 0;
        let raining = s.raining;
        drop(s);
        self.broadcast_weather(raining, false);
    }

    /// Count the weather timers down and flip rain or thunder when they
    /// expire, picking a fresh duration for the new state.
    pub(crate) fn tick_weather(&self) {
        let mut s = self.settings.lock();
        if !s.weather_cycle {
            return;
        }
        let mut rng = rand::thread_rng();
        let mut changed = false;

        s.rain_time -= 1;
        if s.rain_time <= 0 {
            s.raining = !s.raining;
            s.rain_time = if s.raining {
                rng.gen_range(12_000..24_000)
            } else {
                rng.gen_range(12_000..180_000)
            };
            changed = true;
        }
        s.thunder_time -= 1;
        if s.thunder_time <= 0 {
            s.thundering = !s.thundering;
            s.thunder_time = if s.thundering {
                rng.gen_range(3_600..15_600)
            } else {
                rng.gen_range(12_000..180_000)
            };
            changed = changed || s.raining;
        }
        let (raining, thunder) = (s.raining, s.raining && s.thundering);
        drop(s);

        if changed {
            debug!(raining, thunder, "weather changed");
            self.broadcast_weather(raining, thunder);
        }
    }

    fn broadcast_weather(&self, raining: bool, thunder: bool) {
        for v in self.world_viewers() {
            v.view_weather(raining, thunder);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip() {
        for d in [Difficulty::Peaceful, Difficulty::Easy, Difficulty::Normal, Difficulty::Hard] {
            assert_eq!(Difficulty::from_id(d.id()), Some(d));
        }
        assert_eq!(GameMode::from_id(9), None);
        assert_eq!(GameMode::from_id(GameMode::Creative.id()), Some(GameMode::Creative));
    }

    #[test]
    fn default_spawn_is_above_any_range() {
        assert!(Settings::default().spawn.y > 319);
    }
}
