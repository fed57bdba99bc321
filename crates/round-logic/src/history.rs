//! Per-group match history
//!
//! Each round's entries are staged while submissions come in and committed
//! exactly once when the round settles. Re-staging before the commit
//! overwrites; a second commit of the same round is refused.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::choice::{Decision, ParticipantId, Role};
use crate::error::GameError;

/// One participant's contribution to one settled round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEntry {
    pub round: u32,
    pub role: Role,
    pub decision: Decision,
    pub payoff: u32,
    /// True when the decision was filled in after a timeout
    pub defaulted: bool,
}

/// Accumulated coins and ordered past rounds for one participant
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub coins: u32,
    pub entries: Vec<RoundEntry>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MatchHistory {
    records: BTreeMap<ParticipantId, HistoryRecord>,
    pending: BTreeMap<ParticipantId, RoundEntry>,
    last_committed: u32,
}

impl MatchHistory {
    pub fn new<'a>(members: impl IntoIterator<Item = &'a ParticipantId>) -> Self {
        Self {
            records: members
                .into_iter()
                .map(|id| (id.clone(), HistoryRecord::default()))
                .collect(),
            pending: BTreeMap::new(),
            last_committed: 0,
        }
    }

    /// Stage (or replace) the pending entry for a participant
    pub fn stage(&mut self, id: &ParticipantId, entry: RoundEntry) -> Result<(), GameError> {
        if !self.records.contains_key(id) {
            return Err(GameError::UnknownParticipant(id.clone()));
        }
        if entry.round <= self.last_committed {
            return Err(GameError::RoundAlreadyCommitted(entry.round));
        }
        self.pending.insert(id.clone(), entry);
        Ok(())
    }

    /// Append all pending entries for `round` and add their payoffs to the banks
    pub fn commit(&mut self, round: u32) -> Result<(), GameError> {
        if round <= self.last_committed {
            return Err(GameError::RoundAlreadyCommitted(round));
        }
        let pending = std::mem::take(&mut self.pending);
        for (id, entry) in pending {
            if entry.round != round {
                tracing::warn!(participant = %id, staged = entry.round, round, "dropping entry staged for another round");
                continue;
            }
            if let Some(record) = self.records.get_mut(&id) {
                record.coins = record.coins.saturating_add(entry.payoff);
                record.entries.push(entry);
            }
        }
        self.last_committed = round;
        Ok(())
    }

    pub fn record(&self, id: &ParticipantId) -> Option<&HistoryRecord> {
        self.records.get(id)
    }

    /// Accumulated coins, 0 for unknown ids
    pub fn bank(&self, id: &ParticipantId) -> u32 {
        self.records.get(id).map(|r| r.coins).unwrap_or(0)
    }

    pub fn last_committed(&self) -> u32 {
        self.last_committed
    }

    pub fn members(&self) -> impl Iterator<Item = &ParticipantId> {
        self.records.keys()
    }

    /// Past choices of a participant, oldest first
    pub fn decisions(&self, id: &ParticipantId) -> Vec<Decision> {
        self.records
            .get(id)
            .map(|r| r.entries.iter().map(|e| e.decision).collect())
            .unwrap_or_default()
    }
}
