//! Error codes for the round engine

use thiserror::Error;

use crate::choice::{ParticipantId, Role};
use crate::payoff::PayoffError;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("Participant {0} is not a member of this match")]
    UnknownParticipant(ParticipantId),

    #[error("A match needs exactly 2 distinct participants, got {0}")]
    InvalidMatchSize(usize),

    #[error("Round {0} has already been committed")]
    RoundAlreadyCommitted(u32),

    #[error("Invalid round state for this action")]
    InvalidPhase,

    #[error("Participant {participant} holds role {role:?} and cannot submit this")]
    WrongRole { participant: ParticipantId, role: Role },

    #[error("This submission does not belong to this game")]
    WrongGame,

    #[error("Match is over")]
    MatchOver,

    #[error("Repeat count must be at least 1")]
    ZeroRounds,

    #[error(transparent)]
    Payoff(#[from] PayoffError),
}
