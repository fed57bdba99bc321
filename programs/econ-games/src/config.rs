//! Room settings and treatments
//!
//! Loaded once at startup from JSON. Every inconsistency found here is a
//! fatal startup error; nothing is re-validated while games are running.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use round_logic::{DilemmaBot, DilemmaTable, GameKind, MatchConfig, TerminationPayout, UltimatumBot};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RoomError};

/// When the waiting room forms a group
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Dispatch as soon as the pool reaches `pool_size`
    #[default]
    WaitForNPlayers,
    /// Dispatch only when a wait timer expires
    Timeout,
}

impl FromStr for ExecutionMode {
    type Err = RoomError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "WAIT_FOR_N_PLAYERS" => Ok(ExecutionMode::WaitForNPlayers),
            "TIMEOUT" => Ok(ExecutionMode::Timeout),
            other => Err(RoomError::InvalidExecutionMode(other.to_string())),
        }
    }
}

/// How a dispatched group gets its treatment
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum TreatmentSelection {
    /// Round-robin over the configured list
    #[default]
    Rotate,
    /// Uniform pick per group
    Random,
    /// Always the named treatment
    Fixed { name: String },
}

/// Bots that take empty seats
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub enabled: bool,
    /// Dispatch a lone participant with bots when their wait expires
    pub fill_on_timeout: bool,
    pub dilemma: DilemmaBot,
    pub ultimatum: UltimatumBot,
}

/// Named bundle of constants applied to one group
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Treatment {
    pub name: String,
    /// Endowment per Ultimatum round
    #[serde(default = "default_coins")]
    pub coins: u32,
    /// Money per coin
    #[serde(default)]
    pub exchange_rate: Option<f64>,
    /// Money per full endowment, as quoted on the instruction page
    #[serde(default)]
    pub exchange_rate_instructions: Option<f64>,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
    /// Time allowed for each decision before a default is used
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
    #[serde(default)]
    pub payoffs: DilemmaTable,
    #[serde(default)]
    pub on_termination: TerminationPayout,
    #[serde(default)]
    pub show_up_fee: f64,
}

fn default_coins() -> u32 {
    100
}

fn default_repeat() -> u32 {
    3
}

fn default_round_timeout_ms() -> u64 {
    30_000
}

impl Treatment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            coins: default_coins(),
            exchange_rate: Some(0.01),
            exchange_rate_instructions: None,
            repeat: default_repeat(),
            round_timeout_ms: default_round_timeout_ms(),
            payoffs: DilemmaTable::default(),
            on_termination: TerminationPayout::default(),
            show_up_fee: 0.0,
        }
    }

    /// Money per coin.
    ///
    /// Exactly one of `exchange_rate` and `exchange_rate_instructions` must be
    /// set; the latter is quoted per full endowment and divided by `coins`.
    pub fn per_coin_rate(&self) -> Result<f64> {
        let rate = match (self.exchange_rate, self.exchange_rate_instructions) {
            (Some(_), Some(_)) => return Err(RoomError::AmbiguousExchangeRate(self.name.clone())),
            (None, None) => return Err(RoomError::MissingExchangeRate(self.name.clone())),
            (Some(rate), None) => rate,
            (None, Some(per_endowment)) => {
                if self.coins == 0 {
                    return Err(RoomError::InvalidConfig(format!(
                        "treatment {} quotes exchange_rate_instructions with zero coins",
                        self.name
                    )));
                }
                per_endowment / self.coins as f64
            }
        };
        if !rate.is_finite() || rate < 0.0 {
            return Err(RoomError::InvalidConfig(format!(
                "treatment {} has a negative or non-finite exchange rate",
                self.name
            )));
        }
        Ok(rate)
    }

    pub fn match_config(&self, kind: GameKind) -> MatchConfig {
        MatchConfig {
            kind,
            coins: self.coins,
            repeat: self.repeat,
            table: self.payoffs,
        }
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::milliseconds(self.round_timeout_ms as i64)
    }

    fn validate(&self) -> Result<()> {
        self.per_coin_rate()?;
        if self.repeat == 0 {
            return Err(RoomError::InvalidConfig(format!("treatment {} has repeat = 0", self.name)));
        }
        if !self.show_up_fee.is_finite() || self.show_up_fee < 0.0 {
            return Err(RoomError::InvalidConfig(format!(
                "treatment {} has an invalid show_up_fee",
                self.name
            )));
        }
        Ok(())
    }
}

/// Everything the waiting room and the sessions are configured with
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub game: GameKind,
    #[serde(default = "default_two")]
    pub pool_size: usize,
    #[serde(default = "default_two")]
    pub group_size: usize,
    #[serde(default = "default_two")]
    pub min_players: usize,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    /// Rolling wait budget per participant
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// When set, every wait budget ends at this instant instead
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Dispatch invocations accepted per capacity event
    #[serde(default = "default_max_dispatch_calls")]
    pub max_dispatch_calls: u32,
    /// Total number of groups this room will form
    #[serde(default)]
    pub max_games: Option<u64>,
    #[serde(default)]
    pub disconnect_if_not_selected: bool,
    #[serde(default)]
    pub treatment_selection: TreatmentSelection,
    pub treatments: Vec<Treatment>,
    /// Time a group may stay short of members before it is terminated
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    #[serde(default)]
    pub bots: BotSettings,
    #[serde(default)]
    pub seed: u64,
}

fn default_two() -> usize {
    2
}

fn default_max_wait_ms() -> u64 {
    300_000
}

fn default_max_dispatch_calls() -> u32 {
    1
}

fn default_grace_period_ms() -> u64 {
    30_000
}

impl RoomSettings {
    /// Defaults for a two-player room with a single treatment
    pub fn new(game: GameKind, treatment: Treatment) -> Self {
        Self {
            game,
            pool_size: 2,
            group_size: 2,
            min_players: 2,
            execution_mode: ExecutionMode::default(),
            max_wait_ms: default_max_wait_ms(),
            start_date: None,
            max_dispatch_calls: default_max_dispatch_calls(),
            max_games: None,
            disconnect_if_not_selected: false,
            treatment_selection: TreatmentSelection::default(),
            treatments: vec![treatment],
            grace_period_ms: default_grace_period_ms(),
            bots: BotSettings::default(),
            seed: 0,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        // Surface a bad mode as its own error rather than a generic parse failure
        if let Some(mode) = value.get("execution_mode") {
            let mode = mode
                .as_str()
                .ok_or_else(|| RoomError::InvalidExecutionMode(mode.to_string()))?;
            mode.parse::<ExecutionMode>()?;
        }
        let settings: RoomSettings = serde_json::from_value(value)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_size != 2 {
            return Err(RoomError::InvalidConfig(format!(
                "group_size must be 2, got {}",
                self.group_size
            )));
        }
        if self.pool_size < self.group_size {
            return Err(RoomError::InvalidConfig(format!(
                "pool_size {} is smaller than group_size {}",
                self.pool_size, self.group_size
            )));
        }
        if self.min_players == 0 || self.min_players > self.pool_size {
            return Err(RoomError::InvalidConfig(format!(
                "min_players must be in [1, {}], got {}",
                self.pool_size, self.min_players
            )));
        }
        if self.min_players < self.group_size && !self.bots.enabled {
            return Err(RoomError::InvalidConfig(format!(
                "min_players {} below group_size {} requires bots",
                self.min_players, self.group_size
            )));
        }
        if self.max_dispatch_calls == 0 {
            return Err(RoomError::InvalidConfig("max_dispatch_calls must be at least 1".into()));
        }
        if self.treatments.is_empty() {
            return Err(RoomError::NoTreatments);
        }
        for (i, t) in self.treatments.iter().enumerate() {
            if self.treatments[..i].iter().any(|other| other.name == t.name) {
                return Err(RoomError::InvalidConfig(format!("duplicate treatment {}", t.name)));
            }
            t.validate()?;
        }
        if let TreatmentSelection::Fixed { name } = &self.treatment_selection {
            self.treatment(name)?;
        }
        Ok(())
    }

    pub fn treatment(&self, name: &str) -> Result<&Treatment> {
        self.treatments
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| RoomError::MissingTreatment(name.to_string()))
    }

    /// Remaining wait budget for someone arriving at `now`
    pub fn wait_budget(&self, now: DateTime<Utc>) -> Duration {
        match self.start_date {
            Some(start) => (start - now).max(Duration::zero()),
            None => Duration::milliseconds(self.max_wait_ms as i64),
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::milliseconds(self.grace_period_ms as i64)
    }
}
