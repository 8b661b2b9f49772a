//! Domain errors for the draft core and its stores.
//!
//! `DraftError` messages are written for the people typing commands; the command
//! layer forwards them verbatim.

use serenity::all::UserId;
use serenity::model::mention::Mentionable;
use thiserror::Error;

use crate::game_rules::RuleType;
use crate::game_session::TeamName;
use crate::guild_settings::ChannelSetting;

#[derive(Error, Debug)]
pub enum DraftError {
    #[error("The specified team name `{0}` is invalid. Possible values: `team1`, `team2`")]
    InvalidTeamName(String),

    #[error("`{0}` is not a valid game rule, use `gamerule list` to see the available rules")]
    InvalidGameRule(String),

    #[error("`{value}` is not a valid {ty} value")]
    InvalidGameRuleValue { ty: RuleType, value: String },

    /// Rejected by a rule's own validator.
    #[error("{0}")]
    Validation(String),

    #[error("{} is already on a team", .0.mention())]
    DuplicatePlayer(UserId),

    #[error("{team} is full ({cap} members)")]
    TeamFull { team: TeamName, cap: usize },

    #[error("{} is not on the team", .0.mention())]
    PlayerNotOnTeam(UserId),

    #[error("Not enough players available to pick a random team leader")]
    NotEnoughPlayers,

    #[error("Invalid configuration; the `{0}` channel isn't set")]
    ChannelNotConfigured(ChannelSetting),

    #[error("This text channel is not a registered command channel")]
    CommandChannelNotRegistered,

    #[error("No on-going game session, use the `setup` command to initialize the game session")]
    SessionNotInitialized,

    #[error("Game session already started, use the `end` command to stop")]
    SessionAlreadyStarted,

    #[error("Unable to move members between voice channels; does the bot have the Move Members permission?")]
    MissingMovePermission,

    #[error("Unable to move a member between voice channels: {0}")]
    MoveFailed(#[source] MoveError),

    #[error("A database error occurred: {0}")]
    Store(#[from] StoreError),
}

impl DraftError {
    /// Maps a failed voice move onto the user-facing taxonomy.
    pub fn from_move(err: MoveError) -> Self {
        match err {
            MoveError::PermissionDenied => DraftError::MissingMovePermission,
            other => DraftError::MoveFailed(other),
        }
    }
}

/// Failure of a single member move reported by the voice registry.
#[derive(Error, Debug)]
pub enum MoveError {
    #[error("missing permission")]
    PermissionDenied,

    #[error("timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error(transparent)]
    Discord(Box<serenity::Error>),
}

impl From<serenity::Error> for MoveError {
    fn from(err: serenity::Error) -> Self {
        let forbidden = match &err {
            serenity::Error::Http(http) => http.status_code().map(|s| s.as_u16()) == Some(403),
            _ => false,
        };
        if forbidden {
            MoveError::PermissionDenied
        } else {
            MoveError::Discord(Box::new(err))
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),

    #[error("stored document is malformed: {0}")]
    Malformed(String),

    /// Raised by stores that are deliberately unavailable (tests, degraded mode).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type DraftResult<T> = Result<T, DraftError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_denied_moves_translate_to_missing_permission() {
        let err = DraftError::from_move(MoveError::PermissionDenied);
        assert!(matches!(err, DraftError::MissingMovePermission));

        let err = DraftError::from_move(MoveError::TimedOut(std::time::Duration::from_secs(1)));
        assert!(matches!(err, DraftError::MoveFailed(MoveError::TimedOut(_))));
    }

    #[test]
    fn messages_mention_the_member() {
        let err = DraftError::DuplicatePlayer(UserId::new(42));
        assert_eq!(err.to_string(), "<@42> is already on a team");
    }
}
