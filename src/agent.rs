use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::action::Action;
use crate::episode::{Agent, Frame};

/// Uniformly random legal actions, each held for `repeat` extra ticks.
pub struct RandomAgent {
    rng: SmallRng,
    repeat: u32,
    current: Option<Action>,
    held_for: u32,
}

impl RandomAgent {
    pub fn new(repeat: u32) -> Self {
        Self::with_rng(SmallRng::from_os_rng(), repeat)
    }

    pub fn seeded(seed: u64, repeat: u32) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed), repeat)
    }

    fn with_rng(rng: SmallRng, repeat: u32) -> Self {
        Self {
            rng,
            repeat,
            current: None,
            held_for: 0,
        }
    }
}

impl Agent for RandomAgent {
    fn step(&mut self, _frame: &Frame<'_>, legal: &[Action]) -> Action {
        match self.current {
            Some(action) if self.held_for < self.repeat && legal.contains(&action) => {
                self.held_for += 1;
                action
            }
            _ => {
                let action = legal[self.rng.random_range(0..legal.len())];
                self.current = Some(action);
                self.held_for = 0;
                action
            }
        }
    }

    fn on_episode_end(&mut self, _episode: u64, _reward: f64) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> Frame<'static> {
        Frame {
            screen: None,
            ram: None,
            tick: 0,
        }
    }

    #[test]
    fn picks_only_legal_actions() {
        let legal = [Action::Noop, Action::Up, Action::Down];
        let mut agent = RandomAgent::seeded(7, 0);
        for _ in 0..200 {
            assert!(legal.contains(&agent.step(&frame(), &legal)));
        }
    }

    #[test]
    fn holds_action_for_repeat_ticks() {
        let legal = Action::PLAYER_A;
        let mut agent = RandomAgent::seeded(11, 3);
        let picks: Vec<Action> = (0..8).map(|_| agent.step(&frame(), &legal)).collect();
        assert!(picks[..4].iter().all(|&a| a == picks[0]));
        assert!(picks[4..8].iter().all(|&a| a == picks[4]));
    }

    #[test]
    fn same_seed_same_choices() {
        let legal = Action::PLAYER_A;
        let mut a = RandomAgent::seeded(3, 0);
        let mut b = RandomAgent::seeded(3, 0);
        for _ in 0..50 {
            assert_eq!(a.step(&frame(), &legal), b.step(&frame(), &legal));
        }
    }
}
