//! Top-level event loop
//!
//! `Lab` owns the waiting room, the code registry, the timer queue, the
//! outbox and every running session. The transport feeds it `Inbound`
//! events and moves the clock with `advance_to`; everything it wants to say
//! is collected in the outbox until drained.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use round_logic::{ParticipantId, SeededRng};

use crate::codes::CodeRegistry;
use crate::config::RoomSettings;
use crate::context::{Context, TimerKind};
use crate::error::{Result, RoomError};
use crate::export::{Archive, GameReport};
use crate::group::{Group, GroupId};
use crate::messages::{Envelope, Inbound, Outbox};
use crate::room::{CustomSelector, WaitingRoom};
use crate::session::Session;
use crate::timers::Timers;

pub struct Lab {
    settings: RoomSettings,
    room: WaitingRoom,
    codes: CodeRegistry,
    timers: Timers<TimerKind>,
    outbox: Outbox,
    sessions: BTreeMap<GroupId, Session>,
    membership: HashMap<ParticipantId, GroupId>,
    archive: Option<Box<dyn Archive>>,
    reports: Vec<GameReport>,
    rng: SeededRng,
    now: DateTime<Utc>,
}

impl Lab {
    /// Fails on any configuration problem; nothing is started in that case.
    pub fn new(settings: RoomSettings, codes: CodeRegistry, now: DateTime<Utc>) -> Result<Self> {
        settings.validate()?;
        let rng = SeededRng::from_u64(settings.seed);
        let room = WaitingRoom::new(settings.clone(), rng.fork(0));

        tracing::info!(
            game = ?settings.game,
            pool_size = settings.pool_size,
            mode = ?settings.execution_mode,
            treatments = settings.treatments.len(),
            codes = codes.len(),
            "lab ready"
        );

        Ok(Self {
            settings,
            room,
            codes,
            timers: Timers::new(),
            outbox: Outbox::default(),
            sessions: BTreeMap::new(),
            membership: HashMap::new(),
            archive: None,
            reports: Vec::new(),
            rng,
            now,
        })
    }

    pub fn with_archive(mut self, archive: Box<dyn Archive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn with_selector(mut self, selector: CustomSelector) -> Self {
        self.room.set_selector(selector);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    pub fn room(&self) -> &WaitingRoom {
        &self.room
    }

    pub fn codes(&self) -> &CodeRegistry {
        &self.codes
    }

    pub fn timers(&self) -> &Timers<TimerKind> {
        &self.timers
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub fn drain_outbox(&mut self) -> Vec<Envelope> {
        self.outbox.drain()
    }

    pub fn session(&self, group: GroupId) -> Option<&Session> {
        self.sessions.get(&group)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Group a participant is currently playing in
    pub fn group_of(&self, id: &ParticipantId) -> Option<GroupId> {
        self.membership.get(id).copied()
    }

    /// Finished games, oldest first
    pub fn reports(&self) -> &[GameReport] {
        &self.reports
    }

    /// Apply one inbound event. Rejected events leave all state untouched.
    pub fn handle(&mut self, event: Inbound) -> Result<()> {
        let result = self.route(event);
        if let Err(err) = &result {
            tracing::warn!(%err, "event rejected");
        }
        result
    }

    /// Move the clock forward, firing due timers in deadline order.
    /// Each timer runs at its own deadline.
    pub fn advance_to(&mut self, now: DateTime<Utc>) {
        while let Some(at) = self.timers.next_deadline() {
            if at > now {
                break;
            }
            self.now = self.now.max(at);
            let Some((_, kind)) = self.timers.pop_due(at) else {
                break;
            };
            if let Err(err) = self.fire(kind) {
                tracing::warn!(%err, "timer handler failed");
            }
        }
        self.now = self.now.max(now);
    }

    /// Explicit dispatch request. Counts against the current capacity
    /// event's `max_dispatch_calls`.
    pub fn dispatch(&mut self) -> Result<Option<GroupId>> {
        let group = {
            let mut ctx = Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes);
            self.room.dispatch(&mut ctx)?
        };
        self.launch(group)
    }

    fn route(&mut self, event: Inbound) -> Result<()> {
        match event {
            Inbound::Connect { id, access_code } => {
                if self.membership.contains_key(&id) {
                    return Err(RoomError::AlreadyConnected(id));
                }
                let group = {
                    let mut ctx = Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes);
                    self.room.on_connect(&mut ctx, id, access_code)?
                };
                self.launch(group)?;
            }
            Inbound::Disconnect { id } => {
                let grace = self.settings.grace_period();
                let mut ctx = Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes);
                match self.membership.get(&id).and_then(|g| self.sessions.get_mut(g)) {
                    Some(session) => session.on_disconnect(&mut ctx, &id, grace),
                    None => {
                        if !self.room.on_disconnect(&mut ctx, &id) {
                            tracing::debug!(participant = %id, "disconnect from unknown participant");
                        }
                    }
                }
            }
            Inbound::Reconnect { id } => {
                let group = {
                    let mut ctx = Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes);
                    match self.membership.get(&id).and_then(|g| self.sessions.get_mut(g)) {
                        Some(session) => {
                            session.on_reconnect(&mut ctx, &id);
                            None
                        }
                        None => self.room.on_reconnect(&mut ctx, id)?,
                    }
                };
                self.launch(group)?;
            }
            Inbound::Offer { from, offer } => {
                let group = self.playing(&from)?;
                self.with_session(group, |session, ctx| session.on_offer(ctx, &from, offer))?;
            }
            Inbound::Response { from, bidder, response } => {
                let group = self.playing(&from)?;
                self.with_session(group, |session, ctx| {
                    session.on_response(ctx, &from, bidder.as_ref(), response)
                })?;
            }
            Inbound::Choice { from, choice } => {
                let group = self.playing(&from)?;
                self.with_session(group, |session, ctx| session.on_choice(ctx, &from, choice))?;
            }
        }
        Ok(())
    }

    fn fire(&mut self, kind: TimerKind) -> Result<()> {
        tracing::debug!(?kind, at = %self.now, "timer fired");
        match kind {
            TimerKind::Expiry(id) => {
                let group = {
                    let mut ctx = Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes);
                    self.room.on_expiry(&mut ctx, &id)?
                };
                self.launch(group)?;
            }
            TimerKind::RoundDeadline { group, round } => {
                self.with_session(group, |session, ctx| session.on_round_deadline(ctx, round))?;
            }
            TimerKind::Grace(group) => {
                self.with_session(group, |session, ctx| session.on_grace_expired(ctx))?;
            }
        }
        Ok(())
    }

    fn playing(&self, id: &ParticipantId) -> Result<GroupId> {
        self.group_of(id)
            .ok_or_else(|| RoomError::UnknownParticipant(id.clone()))
    }

    /// Run `f` against a live session and retire it if that finished the game
    fn with_session<F>(&mut self, group: GroupId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Session, &mut Context<'_>) -> Result<()>,
    {
        let Some(session) = self.sessions.get_mut(&group) else {
            tracing::debug!(%group, "event for a session that already ended");
            return Ok(());
        };
        let mut ctx = Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes);
        let result = f(session, &mut ctx);
        self.retire_if_finished(group);
        result
    }

    fn launch(&mut self, group: Option<Group>) -> Result<Option<GroupId>> {
        let Some(group) = group else {
            return Ok(None);
        };
        let id = group.id();
        let humans: Vec<ParticipantId> = group
            .members()
            .iter()
            .filter(|m| !m.is_bot())
            .map(|m| m.id.clone())
            .collect();

        let session = {
            let mut ctx = Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes);
            Session::start(
                &mut ctx,
                group,
                self.settings.game,
                self.settings.bots.clone(),
                self.rng.fork(id.0),
            )?
        };
        for human in humans {
            self.membership.insert(human, id);
        }
        self.sessions.insert(id, session);
        self.retire_if_finished(id);
        Ok(Some(id))
    }

    fn retire_if_finished(&mut self, group: GroupId) {
        if !self.sessions.get(&group).is_some_and(Session::is_finished) {
            return;
        }
        let Some(session) = self.sessions.remove(&group) else {
            return;
        };
        self.membership.retain(|_, g| *g != group);

        let Some(report) = session.report().cloned() else {
            return;
        };
        if let Some(archive) = self.archive.as_mut() {
            if let Err(err) = archive.store(&report) {
                tracing::error!(%group, %err, "failed to archive game");
            }
        }
        tracing::info!(%group, terminated = report.terminated, "game finished");
        self.reports.push(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{AuthCode, CodeState};
    use crate::config::Treatment;
    use crate::messages::Outbound;
    use chrono::Duration;
    use round_logic::{Choice, GameKind};

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn codes(n: usize) -> CodeRegistry {
        CodeRegistry::new((0..n).map(|i| AuthCode {
            access: format!("A{}", i),
            exit: format!("X{}", i),
        }))
    }

    fn connect(lab: &mut Lab, i: usize) -> Result<()> {
        lab.handle(Inbound::Connect {
            id: ParticipantId::new(format!("p{}", i)),
            access_code: format!("A{}", i),
        })
    }

    fn dilemma_lab() -> Lab {
        let mut t = Treatment::new("standard");
        t.repeat = 1;
        Lab::new(RoomSettings::new(GameKind::PrisonersDilemma, t), codes(4), t0()).unwrap()
    }

    #[test]
    fn test_invalid_settings_are_fatal() {
        let mut settings = RoomSettings::new(GameKind::Ultimatum, Treatment::new("a"));
        settings.group_size = 3;
        assert!(matches!(Lab::new(settings, codes(1), t0()), Err(RoomError::InvalidConfig(_))));
    }

    #[test]
    fn test_connect_with_bad_code_is_rejected() {
        let mut lab = dilemma_lab();
        let err = lab
            .handle(Inbound::Connect { id: "p0".into(), access_code: "nope".into() })
            .unwrap_err();
        assert!(matches!(err, RoomError::UnknownCode(_)));
        assert_eq!(lab.room().pool_size(), 0);
    }

    #[test]
    fn test_full_game_through_lab() {
        let mut lab = dilemma_lab();
        connect(&mut lab, 0).unwrap();
        connect(&mut lab, 1).unwrap();
        assert_eq!(lab.group_of(&"p0".into()), Some(GroupId(1)));

        lab.handle(Inbound::Choice { from: "p0".into(), choice: Choice::Cooperate }).unwrap();
        lab.handle(Inbound::Choice { from: "p1".into(), choice: Choice::Defect }).unwrap();

        assert!(lab.session(GroupId(1)).is_none());
        assert_eq!(lab.group_of(&"p0".into()), None);
        assert_eq!(lab.reports().len(), 1);
        assert_eq!(lab.codes().state("A0"), Some(CodeState::CheckedOut));

        let wins: Vec<_> = lab
            .drain_outbox()
            .into_iter()
            .filter(|e| matches!(e.message, Outbound::Win { .. }))
            .collect();
        assert_eq!(wins.len(), 2);
    }

    #[test]
    fn test_choice_from_stranger_is_rejected() {
        let mut lab = dilemma_lab();
        let err = lab
            .handle(Inbound::Choice { from: "ghost".into(), choice: Choice::Defect })
            .unwrap_err();
        assert!(matches!(err, RoomError::UnknownParticipant(_)));
    }

    #[test]
    fn test_round_deadline_fires_through_clock() {
        let mut lab = dilemma_lab();
        connect(&mut lab, 0).unwrap();
        connect(&mut lab, 1).unwrap();

        lab.advance_to(t0() + Duration::seconds(29));
        assert!(lab.reports().is_empty());
        lab.advance_to(t0() + Duration::seconds(30));
        assert_eq!(lab.reports().len(), 1);
        assert!(lab.reports()[0].rounds.iter().all(|r| r.defaulted));
        assert!(lab.timers().is_empty());
    }

    #[test]
    fn test_connect_twice_while_playing() {
        let mut lab = dilemma_lab();
        connect(&mut lab, 0).unwrap();
        connect(&mut lab, 1).unwrap();
        assert!(matches!(connect(&mut lab, 0), Err(RoomError::AlreadyConnected(_))));
    }
}
