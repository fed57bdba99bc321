//! One running game
//!
//! A session owns its group's `Match`, talks to the members through the
//! outbox and drives the round deadline and the disconnect grace timer.
//! Bot seats are played inline as soon as they owe a decision.

use std::collections::HashMap;

use round_logic::{
    settle, Choice, Decision, GameKind, Match, MatchState, ParticipantId, Response, Role, RoundOutcome,
    SeededRng,
};

use crate::config::BotSettings;
use crate::context::{Context, TimerKind};
use crate::error::Result;
use crate::export::{GameReport, RoundRow, SummaryRow};
use crate::group::Group;
use crate::messages::Outbound;
use crate::timers::TimerId;

pub struct Session {
    group: Group,
    game: Match,
    rng: SeededRng,
    bots: BotSettings,
    rate: f64,
    /// Connection state of the human members
    connected: HashMap<ParticipantId, bool>,
    round_timer: Option<TimerId>,
    grace_timer: Option<TimerId>,
    rounds: Vec<RoundRow>,
    report: Option<GameReport>,
}

impl Session {
    /// Set up the match and open round 1
    pub fn start(
        ctx: &mut Context<'_>,
        group: Group,
        kind: GameKind,
        bots: BotSettings,
        rng: SeededRng,
    ) -> Result<Self> {
        let treatment = group.treatment();
        let rate = treatment.per_coin_rate()?;
        let game = Match::new(treatment.match_config(kind), group.participant_ids())?;
        let connected = group
            .members()
            .iter()
            .filter(|m| !m.is_bot())
            .map(|m| (m.id.clone(), true))
            .collect();

        tracing::info!(group = %group.id(), treatment = %treatment.name, ?kind, "game started");

        let mut session = Self {
            group,
            game,
            rng,
            bots,
            rate,
            connected,
            round_timer: None,
            grace_timer: None,
            rounds: Vec::new(),
            report: None,
        };
        session.begin_round(ctx)?;
        session.run(ctx)?;
        Ok(session)
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn game(&self) -> &Match {
        &self.game
    }

    pub fn is_finished(&self) -> bool {
        self.report.is_some()
    }

    pub fn report(&self) -> Option<&GameReport> {
        self.report.as_ref()
    }

    pub fn is_connected(&self, id: &ParticipantId) -> bool {
        self.connected.get(id).copied().unwrap_or(false)
    }

    pub fn grace_pending(&self) -> bool {
        self.grace_timer.is_some()
    }

    pub fn on_offer(&mut self, ctx: &mut Context<'_>, from: &ParticipantId, offer: u32) -> Result<()> {
        self.game.submit_offer(from, offer)?;
        self.forward_offer(ctx);
        self.run(ctx)
    }

    pub fn on_response(
        &mut self,
        ctx: &mut Context<'_>,
        from: &ParticipantId,
        bidder: Option<&ParticipantId>,
        response: Response,
    ) -> Result<()> {
        let outcome = self.game.submit_response(from, bidder, response)?;
        self.conclude_round(ctx, outcome)?;
        self.run(ctx)
    }

    pub fn on_choice(&mut self, ctx: &mut Context<'_>, from: &ParticipantId, choice: Choice) -> Result<()> {
        if let Some(outcome) = self.game.submit_choice(from, choice)? {
            self.conclude_round(ctx, outcome)?;
        }
        self.run(ctx)
    }

    /// Round deadline fired; fill whatever is still missing
    pub fn on_round_deadline(&mut self, ctx: &mut Context<'_>, round: u32) -> Result<()> {
        if self.game.is_over() || self.game.round() != round {
            tracing::debug!(group = %self.group.id(), round, "stale round deadline");
            return Ok(());
        }
        tracing::info!(group = %self.group.id(), round, "round deadline passed, defaulting missing decisions");
        let outcome = self.game.fill_missing(&mut self.rng)?;
        self.conclude_round(ctx, outcome)?;
        self.run(ctx)
    }

    pub fn on_disconnect(&mut self, ctx: &mut Context<'_>, id: &ParticipantId, grace: chrono::Duration) {
        let Some(state) = self.connected.get_mut(id) else {
            return;
        };
        *state = false;
        if self.is_finished() || self.grace_timer.is_some() {
            return;
        }
        let timer = ctx
            .timers
            .schedule_in(ctx.now, grace, TimerKind::Grace(self.group.id()));
        self.grace_timer = Some(timer);
        tracing::info!(group = %self.group.id(), participant = %id, "member disconnected, grace period started");
    }

    /// A member came back: resend the live round state
    pub fn on_reconnect(&mut self, ctx: &mut Context<'_>, id: &ParticipantId) {
        let Some(state) = self.connected.get_mut(id) else {
            return;
        };
        *state = true;

        if self.connected.values().all(|c| *c) {
            if let Some(timer) = self.grace_timer.take() {
                ctx.timers.cancel(timer);
                tracing::info!(group = %self.group.id(), "all members back, grace period cancelled");
            }
        }

        if self.game.is_over() {
            return;
        }
        if let Some(role) = self.game.role_of(id) {
            ctx.outbox.send(
                id,
                Outbound::Role {
                    role,
                    round: self.game.round(),
                    repeat: self.game.config().repeat,
                },
            );
        }
        if self.game.respondent() == Some(id) {
            if let (Some(offer), Some(bidder)) = (self.game.pending_offer(), self.game.bidder()) {
                ctx.outbox.send(
                    id,
                    Outbound::Offer {
                        offer,
                        bidder: bidder.clone(),
                        round: self.game.round(),
                    },
                );
            }
        }
    }

    /// Grace period ran out with a member still missing
    pub fn on_grace_expired(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        if let Some(timer) = self.grace_timer.take() {
            ctx.timers.cancel(timer);
        }
        if self.is_finished() || self.connected.values().all(|c| *c) {
            return Ok(());
        }
        tracing::info!(group = %self.group.id(), round = self.game.round(), "grace period over, terminating game");
        self.game.terminate();
        if let Some(timer) = self.round_timer.take() {
            ctx.timers.cancel(timer);
        }
        for id in self.human_ids() {
            ctx.outbox.send(&id, Outbound::GameTerminated { group: self.group.id() });
        }
        self.finish(ctx)
    }

    fn begin_round(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        let start = self.game.start_round(&mut self.rng)?;
        for (id, role) in &start.roles {
            if self.connected.contains_key(id) {
                ctx.outbox.send(
                    id,
                    Outbound::Role {
                        role: *role,
                        round: start.round,
                        repeat: self.game.config().repeat,
                    },
                );
            }
        }
        let timer = ctx.timers.schedule_in(
            ctx.now,
            self.group.treatment().round_timeout(),
            TimerKind::RoundDeadline {
                group: self.group.id(),
                round: start.round,
            },
        );
        self.round_timer = Some(timer);
        Ok(())
    }

    fn forward_offer(&mut self, ctx: &mut Context<'_>) {
        let (Some(offer), Some(bidder), Some(respondent)) =
            (self.game.pending_offer(), self.game.bidder(), self.game.respondent())
        else {
            return;
        };
        if self.connected.contains_key(respondent) {
            ctx.outbox.send(
                respondent,
                Outbound::Offer {
                    offer,
                    bidder: bidder.clone(),
                    round: self.game.round(),
                },
            );
        }
    }

    /// Record a settled round, notify the members and move on
    fn conclude_round(&mut self, ctx: &mut Context<'_>, outcome: RoundOutcome) -> Result<()> {
        if let Some(timer) = self.round_timer.take() {
            ctx.timers.cancel(timer);
        }

        for side in &outcome.sides {
            self.rounds.push(RoundRow {
                group: self.group.id(),
                treatment: self.group.treatment().name.clone(),
                round: outcome.round,
                participant: side.participant.to_string(),
                role: side.role,
                decision: side.decision.to_string(),
                payoff: side.payoff,
                bank: side.bank,
                defaulted: side.defaulted,
                bot: !self.connected.contains_key(&side.participant),
            });
        }
        for (mine, theirs) in [(&outcome.sides[0], &outcome.sides[1]), (&outcome.sides[1], &outcome.sides[0])] {
            if self.connected.contains_key(&mine.participant) {
                ctx.outbox.send(
                    &mine.participant,
                    Outbound::Earnings {
                        round: outcome.round,
                        my_earning: mine.payoff,
                        other_earning: theirs.payoff,
                        my_bank: mine.bank,
                        other_decision: theirs.decision,
                    },
                );
            }
        }

        match self.game.advance()? {
            MatchState::Completed => self.finish(ctx),
            _ => self.begin_round(ctx),
        }
    }

    /// Let bot seats act until a human owes the next decision
    fn run(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        while !self.game.is_over() {
            let Some(bot) = self
                .game
                .members()
                .iter()
                .find(|id| !self.connected.contains_key(*id) && self.game.awaiting(id))
                .cloned()
            else {
                return Ok(());
            };
            self.play_bot(ctx, &bot)?;
        }
        Ok(())
    }

    fn play_bot(&mut self, ctx: &mut Context<'_>, bot: &ParticipantId) -> Result<()> {
        let coins = self.game.config().coins;
        match self.game.role_of(bot) {
            Some(Role::Bidder) => {
                let offer = self.bots.ultimatum.offer(coins);
                tracing::debug!(group = %self.group.id(), bot = %bot, offer, "bot offers");
                self.game.submit_offer(bot, offer)?;
                self.forward_offer(ctx);
            }
            Some(Role::Respondent) => {
                let offer = self.game.pending_offer().unwrap_or_default();
                let response = self.bots.ultimatum.respond(coins, offer);
                tracing::debug!(group = %self.group.id(), bot = %bot, ?response, "bot responds");
                let outcome = self.game.submit_response(bot, None, response)?;
                self.conclude_round(ctx, outcome)?;
            }
            Some(Role::Player) => {
                let opponent_moves: Vec<Choice> = self
                    .game
                    .members()
                    .iter()
                    .filter(|id| *id != bot)
                    .flat_map(|id| self.game.history().decisions(id))
                    .filter_map(|d| match d {
                        Decision::Choice(c) => Some(c),
                        _ => None,
                    })
                    .collect();
                let choice = self.bots.dilemma.decide(&opponent_moves, &mut self.rng);
                tracing::debug!(group = %self.group.id(), bot = %bot, ?choice, "bot chooses");
                if let Some(outcome) = self.game.submit_choice(bot, choice)? {
                    self.conclude_round(ctx, outcome)?;
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Settle every human's bonus, retire their codes and build the report
    fn finish(&mut self, ctx: &mut Context<'_>) -> Result<()> {
        let terminated = self.game.state() == MatchState::Terminated;
        let treatment = self.group.treatment().clone();

        let mut summary = Vec::new();
        for member in self.group.members() {
            let Some(access) = &member.access else {
                continue;
            };
            let coins = self.game.history().bank(&member.id);
            let payout = settle(coins, self.rate, treatment.show_up_fee, terminated, treatment.on_termination);
            let exit = ctx.codes.check_out(access)?.exit.clone();

            tracing::info!(
                group = %self.group.id(),
                participant = %member.id,
                coins,
                bonus = payout.bonus,
                terminated,
                "participant paid out"
            );
            ctx.outbox.send(
                &member.id,
                Outbound::Win {
                    win: payout.bonus,
                    exitcode: exit.clone(),
                },
            );
            summary.push(SummaryRow {
                access_code: access.clone(),
                exit_code: exit,
                bonus: payout.bonus,
                show_up_fee: payout.show_up_fee,
                terminated,
            });
        }

        if let Some(timer) = self.grace_timer.take() {
            ctx.timers.cancel(timer);
        }
        self.report = Some(GameReport {
            group: self.group.id(),
            treatment: treatment.name,
            terminated,
            rounds: std::mem::take(&mut self.rounds),
            summary,
            history: self.game.history().clone(),
        });
        Ok(())
    }

    fn human_ids(&self) -> Vec<ParticipantId> {
        self.connected.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{AuthCode, CodeRegistry};
    use crate::config::Treatment;
    use crate::group::{GroupId, Member};
    use crate::messages::Outbox;
    use crate::timers::Timers;
    use chrono::{DateTime, Duration, Utc};
    use round_logic::DilemmaBot;

    struct Harness {
        now: DateTime<Utc>,
        timers: Timers<TimerKind>,
        outbox: Outbox,
        codes: CodeRegistry,
    }

    impl Harness {
        fn new() -> Self {
            let mut codes = CodeRegistry::new(["a", "b"].map(|p| AuthCode {
                access: format!("A-{}", p),
                exit: format!("X-{}", p),
            }));
            for access in ["A-a", "A-b"] {
                codes.claim(access).unwrap();
                codes.assign(access, GroupId(1)).unwrap();
            }
            Self {
                now: DateTime::parse_from_rfc3339("2026-05-01T09:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
                timers: Timers::new(),
                outbox: Outbox::default(),
                codes,
            }
        }

        fn ctx(&mut self) -> Context<'_> {
            Context::new(self.now, &mut self.timers, &mut self.outbox, &mut self.codes)
        }

        fn sent_to(&self, id: &str) -> Vec<Outbound> {
            self.outbox
                .iter()
                .filter(|e| e.to.as_str() == id)
                .map(|e| e.message.clone())
                .collect()
        }
    }

    fn pid(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    fn humans(treatment: Treatment) -> Group {
        Group::new(
            GroupId(1),
            vec![
                Member::human(pid("a"), "A-a".into()),
                Member::human(pid("b"), "A-b".into()),
            ],
            treatment,
        )
    }

    fn with_bot(treatment: Treatment) -> Group {
        Group::new(
            GroupId(1),
            vec![Member::human(pid("a"), "A-a".into()), Member::bot(pid("bot-1-1"))],
            treatment,
        )
    }

    fn treatment(repeat: u32) -> Treatment {
        let mut t = Treatment::new("standard");
        t.repeat = repeat;
        t.exchange_rate = Some(0.05);
        t.show_up_fee = 1.0;
        t
    }

    fn bidder_and_respondent(session: &Session) -> (ParticipantId, ParticipantId) {
        (
            session.game().bidder().unwrap().clone(),
            session.game().respondent().unwrap().clone(),
        )
    }

    #[test]
    fn test_ultimatum_round_flow() {
        let mut h = Harness::new();
        let mut s = Session::start(
            &mut h.ctx(),
            humans(treatment(1)),
            GameKind::Ultimatum,
            BotSettings::default(),
            SeededRng::from_u64(3),
        )
        .unwrap();
        let (bidder, respondent) = bidder_and_respondent(&s);

        assert!(h.sent_to(bidder.as_str()).contains(&Outbound::Role {
            role: Role::Bidder,
            round: 1,
            repeat: 1,
        }));
        s.on_offer(&mut h.ctx(), &bidder, 40).unwrap();
        assert!(h
            .sent_to(respondent.as_str())
            .contains(&Outbound::Offer { offer: 40, bidder: bidder.clone(), round: 1 }));

        s.on_response(&mut h.ctx(), &respondent, Some(&bidder), Response::Accept).unwrap();
        assert!(s.is_finished());
        assert!(h.timers.is_empty());

        let report = s.report().unwrap();
        assert!(!report.terminated);
        assert_eq!(report.rounds.len(), 2);
        let bidder_code = if bidder.as_str() == "a" { "X-a" } else { "X-b" };
        assert!(h.sent_to(bidder.as_str()).contains(&Outbound::Win {
            win: 3.0,
            exitcode: bidder_code.into(),
        }));
        assert_eq!(h.codes.state("A-a"), Some(crate::codes::CodeState::CheckedOut));
    }

    #[test]
    fn test_earnings_sent_to_both() {
        let mut h = Harness::new();
        let mut s = Session::start(
            &mut h.ctx(),
            humans(treatment(2)),
            GameKind::Ultimatum,
            BotSettings::default(),
            SeededRng::from_u64(5),
        )
        .unwrap();
        let (bidder, respondent) = bidder_and_respondent(&s);
        s.on_offer(&mut h.ctx(), &bidder, 30).unwrap();
        s.on_response(&mut h.ctx(), &respondent, None, Response::Accept).unwrap();

        assert!(h.sent_to(bidder.as_str()).contains(&Outbound::Earnings {
            round: 1,
            my_earning: 70,
            other_earning: 30,
            my_bank: 70,
            other_decision: Decision::Response(Response::Accept),
        }));
        assert!(h.sent_to(respondent.as_str()).contains(&Outbound::Earnings {
            round: 1,
            my_earning: 30,
            other_earning: 70,
            my_bank: 30,
            other_decision: Decision::Offer(30),
        }));
        assert_eq!(s.game().round(), 2);
        assert!(!s.is_finished());
    }

    #[test]
    fn test_round_deadline_defaults() {
        let mut h = Harness::new();
        let mut s = Session::start(
            &mut h.ctx(),
            humans(treatment(1)),
            GameKind::PrisonersDilemma,
            BotSettings::default(),
            SeededRng::from_u64(8),
        )
        .unwrap();
        s.on_choice(&mut h.ctx(), &pid("a"), Choice::Defect).unwrap();

        h.now += Duration::seconds(31);
        let (_, kind) = h.timers.pop_due(h.now).unwrap();
        assert_eq!(kind, TimerKind::RoundDeadline { group: GroupId(1), round: 1 });
        s.on_round_deadline(&mut h.ctx(), 1).unwrap();

        let report = s.report().unwrap();
        let b_row = report.rounds.iter().find(|r| r.participant == "b").unwrap();
        let a_row = report.rounds.iter().find(|r| r.participant == "a").unwrap();
        assert!(b_row.defaulted);
        assert!(!a_row.defaulted);
        assert_eq!(a_row.decision, "DEFECT");
    }

    #[test]
    fn test_stale_deadline_is_ignored() {
        let mut h = Harness::new();
        let mut s = Session::start(
            &mut h.ctx(),
            humans(treatment(3)),
            GameKind::PrisonersDilemma,
            BotSettings::default(),
            SeededRng::from_u64(8),
        )
        .unwrap();
        s.on_choice(&mut h.ctx(), &pid("a"), Choice::Cooperate).unwrap();
        s.on_choice(&mut h.ctx(), &pid("b"), Choice::Cooperate).unwrap();
        assert_eq!(s.game().round(), 2);

        s.on_round_deadline(&mut h.ctx(), 1).unwrap();
        assert_eq!(s.game().round(), 2);
        assert_eq!(s.game().history().last_committed(), 1);
    }

    #[test]
    fn test_reconnect_resends_offer() {
        let mut h = Harness::new();
        let mut s = Session::start(
            &mut h.ctx(),
            humans(treatment(1)),
            GameKind::Ultimatum,
            BotSettings::default(),
            SeededRng::from_u64(3),
        )
        .unwrap();
        let (bidder, respondent) = bidder_and_respondent(&s);
        s.on_disconnect(&mut h.ctx(), &respondent, Duration::seconds(30));
        s.on_offer(&mut h.ctx(), &bidder, 10).unwrap();
        h.outbox.drain();

        s.on_reconnect(&mut h.ctx(), &respondent);
        let sent = h.sent_to(respondent.as_str());
        assert!(sent.contains(&Outbound::Role { role: Role::Respondent, round: 1, repeat: 1 }));
        assert!(sent.contains(&Outbound::Offer { offer: 10, bidder, round: 1 }));
        assert!(!s.grace_pending());
    }

    #[test]
    fn test_grace_expiry_terminates() {
        let mut h = Harness::new();
        let mut t = treatment(3);
        t.on_termination = round_logic::TerminationPayout::Forfeit;
        let mut s = Session::start(
            &mut h.ctx(),
            humans(t),
            GameKind::PrisonersDilemma,
            BotSettings::default(),
            SeededRng::from_u64(2),
        )
        .unwrap();
        s.on_choice(&mut h.ctx(), &pid("a"), Choice::Cooperate).unwrap();
        s.on_choice(&mut h.ctx(), &pid("b"), Choice::Cooperate).unwrap();
        s.on_disconnect(&mut h.ctx(), &pid("b"), Duration::seconds(30));

        s.on_grace_expired(&mut h.ctx()).unwrap();
        let report = s.report().unwrap();
        assert!(report.terminated);
        assert!(report.summary.iter().all(|r| r.bonus == 0.0 && r.show_up_fee == 0.0));
        assert!(h.sent_to("a").contains(&Outbound::GameTerminated { group: GroupId(1) }));
        assert!(h.timers.is_empty());
    }

    #[test]
    fn test_bot_plays_dilemma() {
        let mut h = Harness::new();
        let bots = BotSettings {
            enabled: true,
            dilemma: DilemmaBot::AlwaysDefect,
            ..BotSettings::default()
        };
        let mut s = Session::start(
            &mut h.ctx(),
            with_bot(treatment(2)),
            GameKind::PrisonersDilemma,
            bots,
            SeededRng::from_u64(2),
        )
        .unwrap();
        s.on_choice(&mut h.ctx(), &pid("a"), Choice::Cooperate).unwrap();
        s.on_choice(&mut h.ctx(), &pid("a"), Choice::Cooperate).unwrap();

        let report = s.report().unwrap();
        assert_eq!(report.summary.len(), 1);
        assert_eq!(s.game().history().bank(&pid("bot-1-1")), 10);
        assert_eq!(s.game().history().bank(&pid("a")), 0);
        assert!(report.rounds.iter().any(|r| r.bot));
    }

    #[test]
    fn test_bot_bidder_acts_immediately() {
        let mut h = Harness::new();
        let bots = BotSettings { enabled: true, ..BotSettings::default() };
        // find a seed that makes the bot the bidder
        let mut s = (0..64)
            .map(|seed| {
                let mut h2 = Harness::new();
                let s = Session::start(
                    &mut h2.ctx(),
                    with_bot(treatment(1)),
                    GameKind::Ultimatum,
                    bots.clone(),
                    SeededRng::from_u64(seed),
                )
                .unwrap();
                (seed, s)
            })
            .find(|(_, s)| s.game().bidder() == Some(&pid("bot-1-1")))
            .map(|(seed, _)| {
                Session::start(
                    &mut h.ctx(),
                    with_bot(treatment(1)),
                    GameKind::Ultimatum,
                    bots.clone(),
                    SeededRng::from_u64(seed),
                )
                .unwrap()
            })
            .unwrap();

        assert!(h.sent_to("a").contains(&Outbound::Offer {
            offer: 50,
            bidder: pid("bot-1-1"),
            round: 1,
        }));
        s.on_response(&mut h.ctx(), &pid("a"), None, Response::Accept).unwrap();
        assert!(s.is_finished());
        assert_eq!(s.game().history().bank(&pid("a")), 50);
    }
}
