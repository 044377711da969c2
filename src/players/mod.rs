//! Players, their calibration and their device links

pub mod calibration;
pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use calibration::{Calibration, CalibrationStore};
pub use registry::{Player, PlayerRegistry, MAX_PLAYERS};

/// Stable player identity; names can change, ids do not
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operator actions rejected without touching any state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperatorError {
    #[error("No player with id {0}")]
    UnknownPlayer(PlayerId),

    #[error("You can only have {0} players")]
    TooManyPlayers(usize),

    #[error("At least one player must remain")]
    LastPlayer,

    #[error("A player named \"{0}\" already exists")]
    DuplicateName(String),

    #[error("Player name cannot be empty")]
    EmptyName,

    #[error("\"{0}\" is not connected")]
    NotConnected(String),

    #[error("No sample received from \"{0}\" yet; shoot at the screen first")]
    NoSample(String),

    #[error("Last sample from \"{0}\" is unreadable; shoot at the screen again")]
    InvalidSample(String),

    #[error("Difficulty {0} does not exist")]
    InvalidDifficulty(usize),

    #[error("Not all players are connected")]
    PlayersNotConnected,

    #[error("Names and addresses cannot change while a game is running")]
    SessionRunning,

    #[error("The game is already running")]
    AlreadyStarted,
}

impl OperatorError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            OperatorError::UnknownPlayer(_) => "unknown_player",
            OperatorError::TooManyPlayers(_) => "too_many_players",
            OperatorError::LastPlayer => "last_player",
            OperatorError::DuplicateName(_) => "duplicate_name",
            OperatorError::EmptyName => "empty_name",
            OperatorError::NotConnected(_) => "not_connected",
            OperatorError::NoSample(_) => "no_sample",
            OperatorError::InvalidSample(_) => "invalid_sample",
            OperatorError::InvalidDifficulty(_) => "invalid_difficulty",
            OperatorError::PlayersNotConnected => "players_not_connected",
            OperatorError::SessionRunning => "session_running",
            OperatorError::AlreadyStarted => "already_started",
        }
    }
}
