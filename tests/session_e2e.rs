use std::io::Cursor;

use ale_fifo_rl::protocol::{encode_ram, format_command};
use ale_fifo_rl::{
    Action, Agent, CloseReason, Detached, EmulatorLink, EpisodeController, Frame, Game,
    GameProfile, LinkState, RAM_SIZE, RamSnapshot, UNKNOWN_COLOR,
};

/// Always plays the first legal action.
struct FirstLegal {
    episodes_seen: Vec<(u64, f64)>,
}

impl Agent for FirstLegal {
    fn step(&mut self, _frame: &Frame<'_>, legal: &[Action]) -> Action {
        legal[0]
    }

    fn on_episode_end(&mut self, episode: u64, reward: f64) {
        self.episodes_seen.push((episode, reward));
    }
}

fn ram_with(bytes: &[(usize, u8)]) -> RamSnapshot {
    let mut ram = [0u8; RAM_SIZE];
    for &(i, v) in bytes {
        ram[i] = v;
    }
    ram
}

fn written_lines(out: Vec<u8>) -> Vec<String> {
    String::from_utf8(out)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn two_by_two_session_with_screen_and_ram() {
    let mut spec = Game::Freeway.spec();
    spec.settings.wants_screen = true;
    spec.settings.wants_ram = true;
    spec.settings.start_delay = 0;

    let ram = encode_ram(&[0u8; RAM_SIZE]);
    let input = format!("2-2\n{ram}000000005\n{ram}\n");
    let mut link = EmulatorLink::new(Cursor::new(input.into_bytes()), Vec::new(), Detached);
    let mut controller = EpisodeController::new(GameProfile::from_spec(spec));
    let mut agent = FirstLegal {
        episodes_seen: Vec::new(),
    };

    let summary = link.run(&mut controller, &mut agent).unwrap();
    assert_eq!(summary.ticks, 2);
    assert_eq!(summary.close_reason, CloseReason::EndOfStream);
    assert_eq!(link.state(), LinkState::Closed);

    let screen = link.screen().unwrap();
    assert_eq!(screen.get(0, 0), Some(5));
    assert_eq!(screen.get(0, 1), Some(UNKNOWN_COLOR));
    assert_eq!(screen.get(1, 0), Some(UNKNOWN_COLOR));
    assert_eq!(screen.get(1, 1), Some(UNKNOWN_COLOR));

    let (_, out, _) = link.into_parts();
    let lines = written_lines(out);
    // Negotiation, then one command per tick: the initial reset and a restart delay no-op.
    assert_eq!(lines, vec!["1,1,3", "40,18", "0,18"]);
}

#[test]
fn lives_drop_ends_episode_over_the_pipe() {
    let mut spec = Game::SpaceInvaders.spec();
    spec.settings.start_delay = 0;
    spec.settings.delay_after_restart = 0;

    let lines = [
        ram_with(&[(73, 3)]),
        ram_with(&[(73, 3)]),
        ram_with(&[(73, 3), (104, 0x10)]),
        ram_with(&[(73, 2), (104, 0x10)]),
    ];
    let mut input = String::from("160-210\n");
    for ram in &lines {
        input.push_str(&encode_ram(ram));
        input.push_str("NADA\n");
    }

    let mut link = EmulatorLink::new(Cursor::new(input.into_bytes()), Vec::new(), Detached);
    let mut controller = EpisodeController::new(GameProfile::from_spec(spec));
    let mut agent = FirstLegal {
        episodes_seen: Vec::new(),
    };

    let summary = link.run(&mut controller, &mut agent).unwrap();
    assert_eq!(summary.ticks, 4);
    assert!(link.screen().is_none());
    assert_eq!(controller.reward_history(), &[1.0]);
    assert_eq!(controller.episode(), 1);
    assert_eq!(agent.episodes_seen, vec![(0, 1.0)]);

    let (_, out, _) = link.into_parts();
    let first = Game::SpaceInvaders.spec().settings.legal_actions()[0];
    let play = format_command(first).trim_end().to_string();
    assert_eq!(
        written_lines(out),
        vec![
            "0,1,2".to_string(),
            "40,18".to_string(),
            play.clone(),
            play,
            "40,18".to_string(),
        ]
    );
}
