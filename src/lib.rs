pub mod action;
pub mod agent;
pub mod episode;
pub mod eval;
pub mod games;
pub mod link;
pub mod protocol;

pub use action::Action;
pub use agent::RandomAgent;
pub use episode::{Agent, EpisodeController, EpisodeState, Frame, IllegalAction};
pub use eval::{EvalStats, load_reward_history, save_reward_history, summarize};
pub use games::{
    EndRule, Game, GameProfile, GameRules, GameSettings, GameSpec, ProfileError, RewardRule,
    ScoreLayout,
};
pub use link::{
    CloseReason, Detached, EmulatorLink, EmulatorProcess, LinkConfig, LinkError, LinkState,
    ProcessMonitor, SessionSummary, prepare_fifos,
};
pub use protocol::{
    DecodeError, Dimensions, RAM_LINE_LEN, RAM_SIZE, RamSnapshot, ScreenBuffer, UNKNOWN_COLOR,
};
