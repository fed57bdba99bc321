//! Conversion of accumulated coins into the monetary bonus

use serde::{Deserialize, Serialize};

/// What a participant is paid when the game is forcibly terminated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationPayout {
    /// Strict ("peer pressure"): no bonus and no show-up fee
    Forfeit,
    /// Bonus dropped, show-up fee still paid
    #[default]
    ShowUpFeeOnly,
    /// Paid as if the game had completed
    KeepEarnings,
}

/// Final payment for one participant
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub bonus: f64,
    pub show_up_fee: f64,
    pub terminated: bool,
}

/// Round to two decimals, halves away from zero
pub fn round_to_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// Bonus = round(coins * rate, 2), subject to the termination policy
pub fn settle(
    coins: u32,
    exchange_rate: f64,
    show_up_fee: f64,
    terminated: bool,
    policy: TerminationPayout,
) -> Settlement {
    let earned = round_to_cents(coins as f64 * exchange_rate);
    let (bonus, show_up_fee) = match (terminated, policy) {
        (false, _) | (true, TerminationPayout::KeepEarnings) => (earned, show_up_fee),
        (true, TerminationPayout::ShowUpFeeOnly) => (0.0, show_up_fee),
        (true, TerminationPayout::Forfeit) => (0.0, 0.0),
    };
    Settlement {
        bonus,
        show_up_fee,
        terminated,
    }
}
