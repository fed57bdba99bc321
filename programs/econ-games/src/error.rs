//! Error codes for the game server

use round_logic::{GameError, ParticipantId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RoomError>;

#[derive(Error, Debug)]
pub enum RoomError {
    #[error("Invalid execution mode: {0}")]
    InvalidExecutionMode(String),

    #[error("Treatment not found: {0}")]
    MissingTreatment(String),

    #[error("No treatments configured")]
    NoTreatments,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Treatment {0} sets both exchange_rate and exchange_rate_instructions")]
    AmbiguousExchangeRate(String),

    #[error("Treatment {0} sets neither exchange_rate nor exchange_rate_instructions")]
    MissingExchangeRate(String),

    #[error("Access code not found: {0}")]
    UnknownCode(String),

    #[error("Access code {0} is already in use or checked out")]
    CodeUnavailable(String),

    #[error("Access code {code} is held by group {holder}")]
    CodeHeldByGroup { code: String, holder: u64 },

    #[error("Participant not found: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Participant {0} is already connected")]
    AlreadyConnected(ParticipantId),

    #[error("Game error: {0}")]
    Game(#[from] GameError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
