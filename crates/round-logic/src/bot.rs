//! Automated players that take empty seats

use serde::{Deserialize, Serialize};

use crate::choice::{Choice, Response};
use crate::random::Randomness;

/// Prisoner's Dilemma bot behaviour
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DilemmaBot {
    /// Copy opponent's last move. Start with cooperate.
    #[default]
    TitForTat,
    /// Cooperate until opponent defects once, then always defect.
    GrimTrigger,
    AlwaysCooperate,
    AlwaysDefect,
    /// Random choice, `cooperate_bias` percent cooperate
    Random { cooperate_bias: u8 },
}

impl DilemmaBot {
    pub fn decide<R: Randomness>(&self, opponent_history: &[Choice], rng: &mut R) -> Choice {
        match self {
            DilemmaBot::TitForTat => opponent_history.last().copied().unwrap_or(Choice::Cooperate),
            DilemmaBot::GrimTrigger => {
                if opponent_history.contains(&Choice::Defect) {
                    Choice::Defect
                } else {
                    Choice::Cooperate
                }
            }
            DilemmaBot::AlwaysCooperate => Choice::Cooperate,
            DilemmaBot::AlwaysDefect => Choice::Defect,
            DilemmaBot::Random { cooperate_bias } => {
                if rng.next_percent() < *cooperate_bias {
                    Choice::Cooperate
                } else {
                    Choice::Defect
                }
            }
        }
    }
}

/// Ultimatum bot behaviour
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UltimatumBot {
    /// Share of the endowment offered when bidding (0-100)
    pub offer_percent: u8,
    /// Smallest share accepted when responding (0-100)
    pub accept_percent: u8,
}

impl Default for UltimatumBot {
    fn default() -> Self {
        Self {
            offer_percent: 50,
            accept_percent: 30,
        }
    }
}

impl UltimatumBot {
    pub fn offer(&self, coins: u32) -> u32 {
        let percent = self.offer_percent.min(100) as u64;
        (coins as u64 * percent / 100) as u32
    }

    pub fn respond(&self, coins: u32, offer: u32) -> Response {
        let threshold = (coins as u64 * self.accept_percent.min(100) as u64).div_ceil(100);
        if offer as u64 >= threshold {
            Response::Accept
        } else {
            Response::Reject
        }
    }
}
