//! WASM bindings for the browser views (payoff previews on the instruction pages)

#![cfg(feature = "wasm")]

use wasm_bindgen::prelude::*;

use crate::{round_to_cents, settle, ultimatum_payoff, Choice, DilemmaTable, Response, TerminationPayout};

fn parse_choice(value: &str) -> Result<Choice, JsError> {
    match value.to_ascii_uppercase().as_str() {
        "COOPERATE" => Ok(Choice::Cooperate),
        "DEFECT" => Ok(Choice::Defect),
        other => Err(JsError::new(&format!("Invalid choice: {}", other))),
    }
}

/// Earnings of (bidder, respondent) for an offer
///
/// # Returns
/// Two-element `Uint32Array` `[bidder, respondent]`
#[wasm_bindgen]
pub fn preview_ultimatum(coins: u32, offer: u32, accepted: bool) -> Result<js_sys::Uint32Array, JsError> {
    let response = if accepted { Response::Accept } else { Response::Reject };
    let (bidder, respondent) = ultimatum_payoff(coins, offer, response)
        .map_err(|e| JsError::new(&e.to_string()))?;
    Ok(js_sys::Uint32Array::from(&[bidder, respondent][..]))
}

/// Earnings for a pair of Prisoner's Dilemma choices
///
/// # Arguments
/// * `table_json` - JSON serialized DilemmaTable
/// * `mine` / `theirs` - "COOPERATE" or "DEFECT"
#[wasm_bindgen]
pub fn preview_dilemma(table_json: &str, mine: &str, theirs: &str) -> Result<js_sys::Uint32Array, JsError> {
    let table: DilemmaTable = serde_json::from_str(table_json)
        .map_err(|e| JsError::new(&format!("Invalid payoff table: {}", e)))?;
    let (a, b) = table.payoff(parse_choice(mine)?, parse_choice(theirs)?);
    Ok(js_sys::Uint32Array::from(&[a, b][..]))
}

/// Monetary value of a coin total, as shown on the end screen
#[wasm_bindgen]
pub fn preview_bonus(coins: u32, exchange_rate: f64) -> f64 {
    round_to_cents(coins as f64 * exchange_rate)
}

/// Full settlement as a JS object `{ bonus, show_up_fee, terminated }`
#[wasm_bindgen]
pub fn preview_settlement(
    coins: u32,
    exchange_rate: f64,
    show_up_fee: f64,
    terminated: bool,
    policy: &str,
) -> Result<JsValue, JsError> {
    let policy: TerminationPayout = serde_json::from_value(serde_json::Value::String(policy.to_string()))
        .map_err(|e| JsError::new(&format!("Invalid termination policy: {}", e)))?;
    let settlement = settle(coins, exchange_rate, show_up_fee, terminated, policy);
    serde_wasm_bindgen::to_value(&settlement)
        .map_err(|e| JsError::new(&format!("Serialization error: {}", e)))
}
