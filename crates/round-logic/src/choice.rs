//! Participants, roles and the decisions they submit

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque participant identifier handed out by the host platform
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Which game a group plays
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    Ultimatum,
    PrisonersDilemma,
}

/// Per-round role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Ultimatum proposer
    Bidder,
    /// Ultimatum responder
    Respondent,
    /// Prisoner's Dilemma, symmetric
    Player,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Bidder => "BIDDER",
            Role::Respondent => "RESPONDENT",
            Role::Player => "PLAYER",
        })
    }
}

/// A move in the Prisoner's Dilemma
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Choice {
    Cooperate,
    Defect,
}

/// Respondent's answer to an Ultimatum offer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Response {
    Accept,
    Reject,
}

impl Response {
    pub fn is_accept(self) -> bool {
        matches!(self, Response::Accept)
    }
}

/// What a participant contributed to a round
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Decision {
    Offer(u32),
    Response(Response),
    Choice(Choice),
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Offer(o) => write!(f, "{}", o),
            Decision::Response(Response::Accept) => f.write_str("ACCEPT"),
            Decision::Response(Response::Reject) => f.write_str("REJECT"),
            Decision::Choice(Choice::Cooperate) => f.write_str("COOPERATE"),
            Decision::Choice(Choice::Defect) => f.write_str("DEFECT"),
        }
    }
}
