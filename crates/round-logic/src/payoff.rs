//! Payoff tables for both games

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::choice::{Choice, Response};

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PayoffError {
    #[error("Offer {offer} exceeds the endowment of {coins} coins")]
    OfferExceedsEndowment { offer: u32, coins: u32 },
}

/// Ultimatum payoff
/// Returns (bidder, respondent)
///
/// Accepted: bidder keeps `coins - offer`, respondent gets `offer`.
/// Rejected: both get nothing.
pub fn ultimatum_payoff(coins: u32, offer: u32, response: Response) -> Result<(u32, u32), PayoffError> {
    if offer > coins {
        return Err(PayoffError::OfferExceedsEndowment { offer, coins });
    }
    match response {
        Response::Accept => Ok((coins - offer, offer)),
        Response::Reject => Ok((0, 0)),
    }
}

/// Payoff matrix for the Prisoner's Dilemma
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DilemmaTable {
    /// Both cooperate
    pub cooperate: u32,
    /// Both defect
    pub defect: u32,
    /// Defector against a cooperator
    pub betray: u32,
    /// Cooperator against a defector
    pub cooperate_betrayed: u32,
}

impl Default for DilemmaTable {
    fn default() -> Self {
        Self {
            cooperate: 3,
            defect: 1,
            betray: 5,
            cooperate_betrayed: 0,
        }
    }
}

impl DilemmaTable {
    /// Returns (score_a, score_b)
    pub fn payoff(&self, a: Choice, b: Choice) -> (u32, u32) {
        match (a, b) {
            (Choice::Cooperate, Choice::Cooperate) => (self.cooperate, self.cooperate),
            (Choice::Cooperate, Choice::Defect) => (self.cooperate_betrayed, self.betray),
            (Choice::Defect, Choice::Cooperate) => (self.betray, self.cooperate_betrayed),
            (Choice::Defect, Choice::Defect) => (self.defect, self.defect),
        }
    }
}
