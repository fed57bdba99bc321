//! Typed events in and out of the server

use round_logic::{Choice, Decision, ParticipantId, Response, Role};
use serde::{Deserialize, Serialize};

use crate::group::GroupId;

/// Events delivered by the transport layer
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Connect { id: ParticipantId, access_code: String },
    Disconnect { id: ParticipantId },
    Reconnect { id: ParticipantId },
    Offer { from: ParticipantId, offer: u32 },
    Response { from: ParticipantId, bidder: Option<ParticipantId>, response: Response },
    Choice { from: ParticipantId, choice: Choice },
}

/// Notifications sent to a single participant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outbound {
    /// Pool status, sent to everyone waiting whenever it changes
    PlayersConnected { count: usize, needed: usize },
    /// Remaining wait budget for a newcomer
    WaitTime { remaining_ms: i64 },
    /// Wait budget ran out without a group being formed
    Timeout,
    /// Someone else was drawn at dispatch
    NotSelected,
    /// The room has formed all the groups it will
    RoomClosed,
    Dispatched { group: GroupId, treatment: String },
    Role { role: Role, round: u32, repeat: u32 },
    /// Forwarded to the respondent
    Offer { offer: u32, bidder: ParticipantId, round: u32 },
    #[serde(rename_all = "camelCase")]
    Earnings {
        round: u32,
        my_earning: u32,
        other_earning: u32,
        my_bank: u32,
        other_decision: Decision,
    },
    Win { win: f64, exitcode: String },
    GameTerminated { group: GroupId },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub to: ParticipantId,
    pub message: Outbound,
}

/// Outgoing messages collected during event handling
#[derive(Clone, Debug, Default)]
pub struct Outbox {
    queue: Vec<Envelope>,
}

impl Outbox {
    pub fn send(&mut self, to: &ParticipantId, message: Outbound) {
        tracing::trace!(to = %to, ?message, "queue message");
        self.queue.push(Envelope {
            to: to.clone(),
            message,
        });
    }

    pub fn drain(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Envelope> {
        self.queue.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earnings_wire_format() {
        let msg = Outbound::Earnings {
            round: 1,
            my_earning: 60,
            other_earning: 40,
            my_bank: 60,
            other_decision: Decision::Response(Response::Accept),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "EARNINGS");
        assert_eq!(json["myEarning"], 60);
        assert_eq!(json["otherEarning"], 40);
        assert_eq!(json["myBank"], 60);
    }

    #[test]
    fn test_win_wire_format() {
        let json = serde_json::to_value(Outbound::Win { win: 1.25, exitcode: "X9".into() }).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "WIN", "win": 1.25, "exitcode": "X9" }));
    }

    #[test]
    fn test_inbound_from_json() {
        let event: Inbound = serde_json::from_str(r#"{"type":"choice","from":"p1","choice":"DEFECT"}"#).unwrap();
        assert_eq!(
            event,
            Inbound::Choice { from: ParticipantId::new("p1"), choice: Choice::Defect }
        );
    }

    #[test]
    fn test_outbox_drain() {
        let mut outbox = Outbox::default();
        outbox.send(&ParticipantId::new("a"), Outbound::Timeout);
        assert_eq!(outbox.len(), 1);
        let drained = outbox.drain();
        assert_eq!(drained[0].message, Outbound::Timeout);
        assert!(outbox.is_empty());
    }
}
