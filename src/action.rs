use serde::{Deserialize, Serialize};

// =============================================================================
// Action Space
// =============================================================================

/// Joystick/fire combinations understood by the emulator, plus the two
/// protocol-only codes. Discriminants are the wire codes and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Action {
    Noop = 0,
    Fire = 1,
    Up = 2,
    Right = 3,
    Left = 4,
    Down = 5,
    UpRight = 6,
    UpLeft = 7,
    DownRight = 8,
    DownLeft = 9,
    UpFire = 10,
    RightFire = 11,
    LeftFire = 12,
    DownFire = 13,
    UpRightFire = 14,
    UpLeftFire = 15,
    DownRightFire = 16,
    DownLeftFire = 17,
    PlayerBNoop = 18,
    Reset = 40,
}

impl Action {
    /// Every player-A action, in wire order.
    pub const PLAYER_A: [Action; 18] = [
        Action::Noop,
        Action::Fire,
        Action::Up,
        Action::Right,
        Action::Left,
        Action::Down,
        Action::UpRight,
        Action::UpLeft,
        Action::DownRight,
        Action::DownLeft,
        Action::UpFire,
        Action::RightFire,
        Action::LeftFire,
        Action::DownFire,
        Action::UpRightFire,
        Action::UpLeftFire,
        Action::DownRightFire,
        Action::DownLeftFire,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0..=17 => Some(Self::PLAYER_A[code as usize]),
            18 => Some(Action::PlayerBNoop),
            40 => Some(Action::Reset),
            _ => None,
        }
    }

    /// True for `Reset` and the player-B filler, which an agent never picks.
    pub fn is_protocol_only(self) -> bool {
        matches!(self, Action::Reset | Action::PlayerBNoop)
    }
}
