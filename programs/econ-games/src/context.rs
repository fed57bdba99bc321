//! Shared state handed to every event handler

use chrono::{DateTime, Utc};
use round_logic::ParticipantId;

use crate::codes::CodeRegistry;
use crate::group::GroupId;
use crate::messages::Outbox;
use crate::timers::Timers;

/// What a fired timer means
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerKind {
    /// A waiting participant's budget ran out
    Expiry(ParticipantId),
    /// Decisions for this round are overdue
    RoundDeadline { group: GroupId, round: u32 },
    /// A group stayed short of members for the whole grace period
    Grace(GroupId),
}

/// Borrowed view of the process-wide state a handler may touch.
/// Handlers run to completion; nothing here is shared across threads.
pub struct Context<'a> {
    pub now: DateTime<Utc>,
    pub timers: &'a mut Timers<TimerKind>,
    pub outbox: &'a mut Outbox,
    pub codes: &'a mut CodeRegistry,
}

impl<'a> Context<'a> {
    pub fn new(
        now: DateTime<Utc>,
        timers: &'a mut Timers<TimerKind>,
        outbox: &'a mut Outbox,
        codes: &'a mut CodeRegistry,
    ) -> Self {
        Self { now, timers, outbox, codes }
    }
}
