use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::Action;
use crate::episode::Frame;
use crate::protocol::{RAM_SIZE, RamSnapshot};

// =============================================================================
// Game Settings
// =============================================================================

/// Per-game session constants. Fixed once the session is negotiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSettings {
    pub rom_file: String,
    /// `None` means every player-A action is legal.
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
    pub wants_screen: bool,
    pub wants_ram: bool,
    pub frame_skip: u32,
    /// Ticks to idle after a reset, before frame-skip scaling.
    pub delay_after_restart: u32,
    /// Ticks to idle before the very first reset.
    #[serde(default = "default_start_delay")]
    pub start_delay: u32,
    #[serde(default)]
    pub first_action: Option<Action>,
}

fn default_start_delay() -> u32 {
    100
}

impl GameSettings {
    /// Restart delay in protocol ticks. Scaled by frame-skip when it is above
    /// one so the idle time in emulator frames does not depend on the skip.
    pub fn restart_delay(&self) -> u32 {
        if self.frame_skip > 1 {
            self.delay_after_restart.saturating_mul(self.frame_skip)
        } else {
            self.delay_after_restart
        }
    }

    pub fn legal_actions(&self) -> &[Action] {
        match &self.actions {
            Some(actions) => actions,
            None => &Action::PLAYER_A,
        }
    }

    pub fn is_legal(&self, action: Action) -> bool {
        self.legal_actions().contains(&action)
    }
}

// =============================================================================
// Reward / Termination Rules
// =============================================================================

/// Where the score lives in RAM. Every byte is packed BCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreLayout {
    /// Two digits, 0..=99.
    SingleByte { offset: usize },
    /// Four digits: `low` holds tens/ones, `high` thousands/hundreds.
    TwoBytes { low: usize, high: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardRule {
    /// Score delta, negative deltas (score counter resets) become 0.
    ClampedDelta,
    /// 1 when the score went up, else 0.
    AnyIncrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndRule {
    /// Episode ends on the tick the lives counter drops.
    LivesDrop { offset: usize, low_nibble: bool },
    /// Not real game-over detection: ends once the call counter exceeds
    /// `limit`, whatever the RAM says.
    FrameCounter { limit: u32 },
}

/// One row of the game table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSpec {
    pub name: String,
    #[serde(flatten)]
    pub settings: GameSettings,
    pub score: ScoreLayout,
    pub reward: RewardRule,
    pub end: EndRule,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProfileError {
    #[error("profile {game}: {field} offset {offset} is outside the {ram}-byte RAM", ram = RAM_SIZE)]
    OffsetOutOfRange {
        game: String,
        field: &'static str,
        offset: usize,
    },
    #[error("profile {game} has an empty action list")]
    NoActions { game: String },
    #[error("profile {game}: {field} uses protocol-only action {action:?}")]
    ProtocolOnlyAction {
        game: String,
        field: &'static str,
        action: Action,
    },
}

impl GameSpec {
    /// Rejects rows that would index past RAM or hand the agent a protocol code.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let mut offsets = match self.score {
            ScoreLayout::SingleByte { offset } => vec![("score.offset", offset)],
            ScoreLayout::TwoBytes { low, high } => vec![("score.low", low), ("score.high", high)],
        };
        if let EndRule::LivesDrop { offset, .. } = self.end {
            offsets.push(("end.offset", offset));
        }
        if let Some(&(field, offset)) = offsets.iter().find(|(_, o)| *o >= RAM_SIZE) {
            return Err(ProfileError::OffsetOutOfRange {
                game: self.name.clone(),
                field,
                offset,
            });
        }

        let legal = self.settings.legal_actions();
        if legal.is_empty() {
            return Err(ProfileError::NoActions {
                game: self.name.clone(),
            });
        }
        let protocol_only = legal
            .iter()
            .map(|&a| ("actions", a))
            .chain(self.settings.first_action.map(|a| ("first_action", a)))
            .find(|(_, a)| a.is_protocol_only());
        if let Some((field, action)) = protocol_only {
            return Err(ProfileError::ProtocolOnlyAction {
                game: self.name.clone(),
                field,
                action,
            });
        }
        Ok(())
    }
}

pub fn bcd(byte: u8) -> u32 {
    10 * (byte >> 4) as u32 + (byte & 0x0F) as u32
}

impl ScoreLayout {
    pub fn read(self, ram: &RamSnapshot) -> u32 {
        match self {
            ScoreLayout::SingleByte { offset } => bcd(ram[offset]),
            ScoreLayout::TwoBytes { low, high } => bcd(ram[low]) + 100 * bcd(ram[high]),
        }
    }
}

// =============================================================================
// Built-in Games
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Game {
    Freeway,
    SpaceInvaders,
    Asterix,
    Seaquest,
    Bowling,
}

impl Game {
    pub const ALL: [Game; 5] = [
        Game::Freeway,
        Game::SpaceInvaders,
        Game::Asterix,
        Game::Seaquest,
        Game::Bowling,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Game::Freeway => "freeway",
            Game::SpaceInvaders => "space_invaders",
            Game::Asterix => "asterix",
            Game::Seaquest => "seaquest",
            Game::Bowling => "bowling",
        }
    }

    pub fn spec(self) -> GameSpec {
        use Action::*;

        let (rom, actions, wants_screen, frame_skip, delay, first_action, score, reward, end) =
            match self {
                Game::Freeway => (
                    "freeway.bin",
                    vec![Noop, Up, Down],
                    false,
                    3,
                    1,
                    None,
                    ScoreLayout::SingleByte { offset: 103 },
                    RewardRule::ClampedDelta,
                    EndRule::FrameCounter { limit: 2000 },
                ),
                Game::SpaceInvaders => (
                    "spaceinvaders.bin",
                    vec![RightFire, LeftFire, Noop, Left, Right],
                    false,
                    2,
                    20,
                    None,
                    ScoreLayout::TwoBytes { low: 104, high: 102 },
                    RewardRule::AnyIncrease,
                    EndRule::LivesDrop {
                        offset: 73,
                        low_nibble: false,
                    },
                ),
                Game::Asterix => (
                    "asterix.bin",
                    vec![Noop, Left, Right, Up, Down],
                    false,
                    0,
                    100,
                    Some(Fire),
                    ScoreLayout::TwoBytes { low: 96, high: 95 },
                    RewardRule::ClampedDelta,
                    EndRule::LivesDrop {
                        offset: 83,
                        low_nibble: true,
                    },
                ),
                Game::Seaquest => (
                    "seaquest.bin",
                    vec![
                        Noop, Left, Right, Up, Down, LeftFire, RightFire, UpFire, DownFire, Fire,
                    ],
                    true,
                    3,
                    100,
                    None,
                    ScoreLayout::TwoBytes { low: 58, high: 57 },
                    RewardRule::ClampedDelta,
                    EndRule::LivesDrop {
                        offset: 59,
                        low_nibble: true,
                    },
                ),
                Game::Bowling => (
                    "bowling.bin",
                    vec![Noop, Left, Right, Up, Down],
                    false,
                    2,
                    100,
                    Some(Fire),
                    ScoreLayout::TwoBytes { low: 96, high: 95 },
                    RewardRule::ClampedDelta,
                    EndRule::LivesDrop {
                        offset: 83,
                        low_nibble: true,
                    },
                ),
            };

        GameSpec {
            name: self.name().to_string(),
            settings: GameSettings {
                rom_file: rom.to_string(),
                actions: Some(actions),
                wants_screen,
                wants_ram: true,
                frame_skip,
                delay_after_restart: delay,
                start_delay: default_start_delay(),
                first_action,
            },
            score,
            reward,
            end,
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Game {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        Game::ALL
            .into_iter()
            .find(|g| g.name().replace('_', "") == key)
            .ok_or_else(|| {
                let known: Vec<&str> = Game::ALL.iter().map(|g| g.name()).collect();
                format!("unknown game {s:?} (known: {})", known.join(", "))
            })
    }
}

// =============================================================================
// Game Profile
// =============================================================================

/// Reward and end-of-episode capability the episode controller drives.
pub trait GameRules {
    fn settings(&self) -> &GameSettings;

    /// Reward for this tick. Always advances the stored previous score.
    fn extract_reward(&mut self, frame: &Frame<'_>) -> f64;

    fn is_episode_over(&mut self, frame: &Frame<'_>) -> bool;
}

/// A [`GameSpec`] plus the memory its rules keep between ticks. The memory
/// survives episode boundaries for the lifetime of the profile.
#[derive(Debug, Clone)]
pub struct GameProfile {
    spec: GameSpec,
    prev_score: u32,
    prev_lives: Option<u8>,
    frame_counter: u32,
}

impl GameProfile {
    pub fn new(game: Game) -> Self {
        Self::from_spec(game.spec())
    }

    pub fn from_spec(spec: GameSpec) -> Self {
        Self {
            spec,
            prev_score: 0,
            prev_lives: None,
            frame_counter: 0,
        }
    }

    pub fn spec(&self) -> &GameSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn prev_score(&self) -> u32 {
        self.prev_score
    }

    pub fn prev_lives(&self) -> Option<u8> {
        self.prev_lives
    }

    pub fn score_from_ram(&mut self, ram: &RamSnapshot) -> f64 {
        let score = self.spec.score.read(ram);
        let delta = score as i64 - self.prev_score as i64;
        self.prev_score = score;
        match self.spec.reward {
            RewardRule::ClampedDelta => delta.max(0) as f64,
            RewardRule::AnyIncrease => {
                if delta > 0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    fn lives_dropped(&mut self, lives: u8) -> bool {
        let dropped = matches!(self.prev_lives, Some(prev) if lives < prev);
        self.prev_lives = Some(lives);
        dropped
    }
}

impl GameRules for GameProfile {
    fn settings(&self) -> &GameSettings {
        &self.spec.settings
    }

    fn extract_reward(&mut self, frame: &Frame<'_>) -> f64 {
        match frame.ram {
            Some(ram) => self.score_from_ram(ram),
            None => 0.0,
        }
    }

    fn is_episode_over(&mut self, frame: &Frame<'_>) -> bool {
        match self.spec.end {
            EndRule::FrameCounter { limit } => {
                if self.frame_counter > limit {
                    self.frame_counter = 0;
                    true
                } else {
                    self.frame_counter += 1;
                    false
                }
            }
            EndRule::LivesDrop { offset, low_nibble } => {
                let Some(ram) = frame.ram else {
                    return false;
                };
                let raw = ram[offset];
                let lives = if low_nibble { raw & 0x0F } else { raw };
                self.lives_dropped(lives)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ram_with(bytes: &[(usize, u8)]) -> RamSnapshot {
        let mut ram = [0u8; RAM_SIZE];
        for &(i, v) in bytes {
            ram[i] = v;
        }
        ram
    }

    fn frame(ram: &RamSnapshot) -> Frame<'_> {
        Frame {
            screen: None,
            ram: Some(ram),
            tick: 0,
        }
    }

    #[test]
    fn bcd_digits() {
        assert_eq!(bcd(0x00), 0);
        assert_eq!(bcd(0x42), 42);
        assert_eq!(bcd(0x99), 99);
    }

    #[test]
    fn two_byte_score() {
        let ram = ram_with(&[(96, 0x75), (95, 0x12)]);
        assert_eq!(ScoreLayout::TwoBytes { low: 96, high: 95 }.read(&ram), 1275);
    }

    #[test]
    fn clamped_delta_absorbs_score_drop() {
        let mut profile = GameProfile::new(Game::Freeway);
        let r1 = profile.extract_reward(&frame(&ram_with(&[(103, 0x50)])));
        let r2 = profile.extract_reward(&frame(&ram_with(&[(103, 0x30)])));
        assert_eq!(r1, 50.0);
        assert_eq!(r2, 0.0);
        assert_eq!(profile.prev_score(), 30);

        let r3 = profile.extract_reward(&frame(&ram_with(&[(103, 0x34)])));
        assert_eq!(r3, 4.0);
    }

    #[test]
    fn any_increase_is_binary() {
        let mut profile = GameProfile::new(Game::SpaceInvaders);
        let up = profile.extract_reward(&frame(&ram_with(&[(104, 0x30), (102, 0x01)])));
        let same = profile.extract_reward(&frame(&ram_with(&[(104, 0x30), (102, 0x01)])));
        let down = profile.extract_reward(&frame(&ram_with(&[(104, 0x10)])));
        assert_eq!((up, same, down), (1.0, 0.0, 0.0));
        assert_eq!(profile.prev_score(), 10);
    }

    #[test]
    fn first_lives_reading_never_ends_episode() {
        let mut profile = GameProfile::new(Game::SpaceInvaders);
        assert!(!profile.is_episode_over(&frame(&ram_with(&[(73, 2)]))));
        assert_eq!(profile.prev_lives(), Some(2));
    }

    #[test]
    fn lives_drop_signals_exactly_once() {
        let mut profile = GameProfile::new(Game::Asterix);
        let readings = [0x03, 0x13, 0x04, 0x04, 0x02, 0x02, 0x03];
        let over: Vec<bool> = readings
            .iter()
            .map(|&v| profile.is_episode_over(&frame(&ram_with(&[(83, v)]))))
            .collect();
        // 0x13 masks to 3, so only the 4 -> 2 step is a drop.
        assert_eq!(over, vec![false, false, false, false, true, false, false]);
    }

    #[test]
    fn frame_counter_fires_past_limit() {
        let mut spec = Game::Freeway.spec();
        spec.end = EndRule::FrameCounter { limit: 3 };
        let mut profile = GameProfile::from_spec(spec);
        let ram = [0u8; RAM_SIZE];
        let fired: Vec<bool> = (0..10).map(|_| profile.is_episode_over(&frame(&ram))).collect();
        assert_eq!(
            fired,
            vec![false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn missing_ram_is_inert() {
        let mut profile = GameProfile::new(Game::Seaquest);
        let f = Frame {
            screen: None,
            ram: None,
            tick: 3,
        };
        assert_eq!(profile.extract_reward(&f), 0.0);
        assert!(!profile.is_episode_over(&f));
    }

    #[test]
    fn restart_delay_scales_with_frame_skip() {
        assert_eq!(Game::Freeway.spec().settings.restart_delay(), 3);
        assert_eq!(Game::SpaceInvaders.spec().settings.restart_delay(), 40);
        assert_eq!(Game::Asterix.spec().settings.restart_delay(), 100);
        assert_eq!(Game::Seaquest.spec().settings.restart_delay(), 300);

        let mut settings = Game::Asterix.spec().settings;
        settings.frame_skip = 1;
        assert_eq!(settings.restart_delay(), 100);
    }

    #[test]
    fn legal_actions_default_to_full_table() {
        let mut settings = Game::Bowling.spec().settings;
        assert!(!settings.is_legal(Action::Fire));
        settings.actions = None;
        assert_eq!(settings.legal_actions().len(), 18);
        assert!(settings.is_legal(Action::DownLeftFire));
        assert!(!settings.is_legal(Action::Reset));
    }

    #[test]
    fn game_names_parse() {
        assert_eq!("Space-Invaders".parse::<Game>().unwrap(), Game::SpaceInvaders);
        assert_eq!("seaquest".parse::<Game>().unwrap(), Game::Seaquest);
        assert!("pacman".parse::<Game>().is_err());
    }

    #[test]
    fn spec_json_roundtrip_keeps_table_shape() {
        let spec = Game::Asterix.spec();
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["rom_file"], "asterix.bin");
        assert_eq!(json["first_action"], "fire");
        assert_eq!(json["end"]["kind"], "lives_drop");
        let back: GameSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn built_in_games_validate() {
        for game in Game::ALL {
            game.spec().validate().unwrap();
        }
    }

    #[test]
    fn validate_rejects_offsets_past_ram() {
        let json = r#"{
            "name": "pong",
            "rom_file": "pong.bin",
            "wants_screen": false,
            "wants_ram": true,
            "frame_skip": 0,
            "delay_after_restart": 5,
            "score": { "kind": "single_byte", "offset": 200 },
            "reward": "clamped_delta",
            "end": { "kind": "frame_counter", "limit": 500 }
        }"#;
        let spec: GameSpec = serde_json::from_str(json).unwrap();
        assert_eq!(
            spec.validate(),
            Err(ProfileError::OffsetOutOfRange {
                game: "pong".to_string(),
                field: "score.offset",
                offset: 200,
            })
        );

        let mut spec = Game::Seaquest.spec();
        spec.score = ScoreLayout::TwoBytes { low: 58, high: 128 };
        assert!(matches!(
            spec.validate(),
            Err(ProfileError::OffsetOutOfRange { field: "score.high", .. })
        ));

        let mut spec = Game::Seaquest.spec();
        spec.end = EndRule::LivesDrop {
            offset: RAM_SIZE,
            low_nibble: true,
        };
        assert!(matches!(
            spec.validate(),
            Err(ProfileError::OffsetOutOfRange { field: "end.offset", .. })
        ));
    }

    #[test]
    fn validate_rejects_unplayable_actions() {
        let mut spec = Game::Bowling.spec();
        spec.settings.actions = Some(Vec::new());
        assert!(matches!(spec.validate(), Err(ProfileError::NoActions { .. })));

        let mut spec = Game::Bowling.spec();
        spec.settings.first_action = Some(Action::Reset);
        assert!(matches!(
            spec.validate(),
            Err(ProfileError::ProtocolOnlyAction {
                field: "first_action",
                action: Action::Reset,
                ..
            })
        ));

        let mut spec = Game::Bowling.spec();
        spec.settings.actions = Some(vec![Action::Noop, Action::PlayerBNoop]);
        assert!(matches!(
            spec.validate(),
            Err(ProfileError::ProtocolOnlyAction { field: "actions", .. })
        ));
    }

    #[test]
    fn spec_json_defaults() {
        let json = r#"{
            "name": "pong",
            "rom_file": "pong.bin",
            "wants_screen": false,
            "wants_ram": true,
            "frame_skip": 0,
            "delay_after_restart": 5,
            "score": { "kind": "single_byte", "offset": 13 },
            "reward": "clamped_delta",
            "end": { "kind": "frame_counter", "limit": 500 }
        }"#;
        let spec: GameSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.settings.start_delay, 100);
        assert_eq!(spec.settings.actions, None);
        assert_eq!(spec.settings.first_action, None);
    }
}
