use thiserror::Error;
use tracing::{debug, info};

use crate::action::Action;
use crate::games::GameRules;
use crate::protocol::{RamSnapshot, ScreenBuffer};

/// What the controller and agent see for one tick. Rebuilt every tick.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub screen: Option<&'a ScreenBuffer>,
    pub ram: Option<&'a RamSnapshot>,
    pub tick: u64,
}

/// Decision-making collaborator. Must return one of `legal`.
pub trait Agent {
    fn step(&mut self, frame: &Frame<'_>, legal: &[Action]) -> Action;

    fn on_episode_end(&mut self, _episode: u64, _reward: f64) {}
}

impl<A: Agent + ?Sized> Agent for Box<A> {
    fn step(&mut self, frame: &Frame<'_>, legal: &[Action]) -> Action {
        (**self).step(frame, legal)
    }

    fn on_episode_end(&mut self, episode: u64, reward: f64) {
        (**self).on_episode_end(episode, reward)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("agent chose {action:?} at tick {tick}, not legal for {rom}")]
pub struct IllegalAction {
    pub action: Action,
    pub tick: u64,
    pub rom: String,
}

// =============================================================================
// Episode State Machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    /// Idling before the first reset of the run.
    StartDelay(u32),
    Uninitialized,
    RestartDelay(u32),
    AwaitingFirstAction,
    /// Reset done; the next playable tick opens a new episode.
    JustEnded,
    Active,
}

pub struct EpisodeController<G: GameRules> {
    rules: G,
    state: EpisodeState,
    episode: u64,
    episode_reward: f64,
    reward_history: Vec<f64>,
}

impl<G: GameRules> EpisodeController<G> {
    pub fn new(rules: G) -> Self {
        let start_delay = rules.settings().start_delay;
        Self {
            rules,
            state: EpisodeState::StartDelay(start_delay),
            episode: 0,
            episode_reward: 0.0,
            reward_history: Vec::new(),
        }
    }

    pub fn rules(&self) -> &G {
        &self.rules
    }

    pub fn state(&self) -> EpisodeState {
        self.state
    }

    pub fn episode(&self) -> u64 {
        self.episode
    }

    pub fn episode_reward(&self) -> f64 {
        self.episode_reward
    }

    pub fn reward_history(&self) -> &[f64] {
        &self.reward_history
    }

    pub fn into_reward_history(self) -> Vec<f64> {
        self.reward_history
    }

    fn after_restart(&self) -> EpisodeState {
        if self.rules.settings().first_action.is_some() {
            EpisodeState::AwaitingFirstAction
        } else {
            EpisodeState::JustEnded
        }
    }

    fn begin_reset(&mut self) -> Action {
        self.state = EpisodeState::RestartDelay(self.rules.settings().restart_delay());
        Action::Reset
    }

    /// Advances one tick and returns the player-A action to send.
    /// `reward` overrides the game's own reward extraction when given.
    pub fn tick<A: Agent + ?Sized>(
        &mut self,
        frame: &Frame<'_>,
        reward: Option<f64>,
        agent: &mut A,
    ) -> Result<Action, IllegalAction> {
        loop {
            match self.state {
                EpisodeState::StartDelay(0) => self.state = EpisodeState::Uninitialized,
                EpisodeState::StartDelay(n) => {
                    self.state = EpisodeState::StartDelay(n - 1);
                    return Ok(Action::Noop);
                }
                EpisodeState::Uninitialized => {
                    debug!(tick = frame.tick, "initial reset");
                    return Ok(self.begin_reset());
                }
                EpisodeState::RestartDelay(0) => self.state = self.after_restart(),
                EpisodeState::RestartDelay(n) => {
                    self.state = EpisodeState::RestartDelay(n - 1);
                    return Ok(Action::Noop);
                }
                EpisodeState::AwaitingFirstAction => {
                    self.state = EpisodeState::JustEnded;
                    if let Some(action) = self.rules.settings().first_action {
                        debug!(tick = frame.tick, ?action, "sending first action");
                        return Ok(action);
                    }
                }
                EpisodeState::JustEnded => {
                    debug!(tick = frame.tick, episode = self.episode, "episode started");
                    self.state = EpisodeState::Active;
                }
                EpisodeState::Active => return self.play(frame, reward, agent),
            }
        }
    }

    fn play<A: Agent + ?Sized>(
        &mut self,
        frame: &Frame<'_>,
        reward: Option<f64>,
        agent: &mut A,
    ) -> Result<Action, IllegalAction> {
        if self.rules.is_episode_over(frame) {
            self.finish_episode(agent);
            return Ok(self.begin_reset());
        }

        let reward = match reward {
            Some(r) => r,
            None => self.rules.extract_reward(frame),
        };
        if reward != 0.0 {
            debug!(tick = frame.tick, reward, "reward");
        }
        self.episode_reward += reward;

        let action = agent.step(frame, self.rules.settings().legal_actions());
        if !self.rules.settings().is_legal(action) {
            return Err(IllegalAction {
                action,
                tick: frame.tick,
                rom: self.rules.settings().rom_file.clone(),
            });
        }
        Ok(action)
    }

    fn finish_episode<A: Agent + ?Sized>(&mut self, agent: &mut A) {
        let reward = self.episode_reward;
        info!(episode = self.episode, reward, "episode finished");
        self.reward_history.push(reward);
        agent.on_episode_end(self.episode, reward);
        self.episode += 1;
        self.episode_reward = 0.0;
    }
}
