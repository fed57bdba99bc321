//! Round logic for the Ultimatum and Prisoner's Dilemma experiments
//!
//! Everything here is synchronous and deterministic given a seed:
//! payoff tables, per-group match history, the round engine, group draws,
//! bots and the final bonus conversion. This crate is compiled to:
//! - Native (for the game server)
//! - WASM (for the browser views)

mod random;
mod choice;
mod error;
mod payoff;
mod history;
mod game;
mod pairing;
mod bonus;
mod bot;

#[cfg(feature = "wasm")]
mod wasm;

pub use random::{Randomness, SeededRng};
pub use choice::{Choice, Decision, GameKind, ParticipantId, Response, Role};
pub use error::GameError;
pub use payoff::{ultimatum_payoff, DilemmaTable, PayoffError};
pub use history::{HistoryRecord, MatchHistory, RoundEntry};
pub use game::{Match, MatchConfig, MatchState, Phase, RoundOutcome, RoundStart, Side};
pub use pairing::{form_groups, pick_group, sample_indices};
pub use bonus::{round_to_cents, settle, Settlement, TerminationPayout};
pub use bot::{DilemmaBot, UltimatumBot};
