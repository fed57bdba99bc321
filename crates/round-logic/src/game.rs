//! Round engine for one two-participant match
//!
//! Drives a match through `repeat` rounds. Each round goes
//! AssignRoles -> Submit -> (Respond, Ultimatum only) -> Settled before the
//! next one may start, so round N+1 never begins before round N is committed.

use serde::{Deserialize, Serialize};

use crate::choice::{Choice, Decision, GameKind, ParticipantId, Response, Role};
use crate::error::GameError;
use crate::history::{MatchHistory, RoundEntry};
use crate::payoff::{ultimatum_payoff, DilemmaTable};
use crate::random::Randomness;

/// Constants a match is played with (taken from the group's treatment)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub kind: GameKind,
    /// Ultimatum endowment per round
    pub coins: u32,
    /// Number of rounds
    pub repeat: u32,
    pub table: DilemmaTable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    AssignRoles,
    Submit,
    Respond,
    Settled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchState {
    Running { round: u32, phase: Phase },
    Completed,
    Terminated,
}

/// Roles handed out at the start of a round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStart {
    pub round: u32,
    pub roles: [(ParticipantId, Role); 2],
}

/// One side of a settled round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Side {
    pub participant: ParticipantId,
    pub role: Role,
    pub decision: Decision,
    pub payoff: u32,
    /// Bank after this round
    pub bank: u32,
    pub defaulted: bool,
}

/// Result of a settled round
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundOutcome {
    pub round: u32,
    pub sides: [Side; 2],
}

impl RoundOutcome {
    pub fn side(&self, id: &ParticipantId) -> Option<&Side> {
        self.sides.iter().find(|s| &s.participant == id)
    }

    pub fn other_side(&self, id: &ParticipantId) -> Option<&Side> {
        self.sides.iter().find(|s| &s.participant != id)
    }
}

#[derive(Clone, Debug)]
pub struct Match {
    config: MatchConfig,
    members: [ParticipantId; 2],
    round: u32,
    phase: Phase,
    over: Option<MatchState>,
    roles: [Role; 2],
    offer: Option<u32>,
    response: Option<Response>,
    choices: [Option<Choice>; 2],
    defaulted: [bool; 2],
    history: MatchHistory,
}

impl Match {
    pub fn new(config: MatchConfig, members: Vec<ParticipantId>) -> Result<Self, GameError> {
        if config.repeat == 0 {
            return Err(GameError::ZeroRounds);
        }
        let members: [ParticipantId; 2] = match <[ParticipantId; 2]>::try_from(members) {
            Ok(m) if m[0] != m[1] => m,
            Ok(_) => return Err(GameError::InvalidMatchSize(1)),
            Err(v) => return Err(GameError::InvalidMatchSize(v.len())),
        };
        let history = MatchHistory::new(members.iter());

        Ok(Self {
            config,
            members,
            round: 0,
            phase: Phase::AssignRoles,
            over: None,
            roles: [Role::Player, Role::Player],
            offer: None,
            response: None,
            choices: [None, None],
            defaulted: [false, false],
            history,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn members(&self) -> &[ParticipantId; 2] {
        &self.members
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &MatchHistory {
        &self.history
    }

    pub fn state(&self) -> MatchState {
        self.over.unwrap_or(MatchState::Running {
            round: self.round,
            phase: self.phase,
        })
    }

    pub fn is_over(&self) -> bool {
        self.over.is_some()
    }

    pub fn role_of(&self, id: &ParticipantId) -> Option<Role> {
        self.index_of(id).map(|i| self.roles[i])
    }

    pub fn bidder(&self) -> Option<&ParticipantId> {
        self.holder_of(Role::Bidder)
    }

    pub fn respondent(&self) -> Option<&ParticipantId> {
        self.holder_of(Role::Respondent)
    }

    /// Offer waiting for a response, if any
    pub fn pending_offer(&self) -> Option<u32> {
        if self.phase == Phase::Respond {
            self.offer
        } else {
            None
        }
    }

    /// Whether `id` still owes a decision this round
    pub fn awaiting(&self, id: &ParticipantId) -> bool {
        let Some(i) = self.index_of(id) else {
            return false;
        };
        match (self.phase, self.roles[i]) {
            (Phase::Submit, Role::Bidder) => true,
            (Phase::Respond, Role::Respondent) => true,
            (Phase::Submit, Role::Player) => self.choices[i].is_none(),
            _ => false,
        }
    }

    /// Advance the round counter and hand out roles
    pub fn start_round<R: Randomness>(&mut self, rng: &mut R) -> Result<RoundStart, GameError> {
        self.ensure_running()?;
        if self.phase != Phase::AssignRoles {
            return Err(GameError::InvalidPhase);
        }

        self.round += 1;
        self.offer = None;
        self.response = None;
        self.choices = [None, None];
        self.defaulted = [false, false];
        self.roles = match self.config.kind {
            GameKind::Ultimatum => {
                if rng.next_bool() {
                    [Role::Bidder, Role::Respondent]
                } else {
                    [Role::Respondent, Role::Bidder]
                }
            }
            GameKind::PrisonersDilemma => [Role::Player, Role::Player],
        };
        self.phase = Phase::Submit;

        tracing::debug!(round = self.round, roles = ?self.roles, "round started");

        Ok(RoundStart {
            round: self.round,
            roles: [
                (self.members[0].clone(), self.roles[0]),
                (self.members[1].clone(), self.roles[1]),
            ],
        })
    }

    /// Bidder's offer. A bidder who reconnects may resend before the
    /// respondent answers; the latest offer wins.
    pub fn submit_offer(&mut self, from: &ParticipantId, offer: u32) -> Result<(), GameError> {
        self.ensure_running()?;
        self.ensure_kind(GameKind::Ultimatum)?;
        let i = self.require_role(from, Role::Bidder)?;
        if !matches!(self.phase, Phase::Submit | Phase::Respond) {
            return Err(GameError::InvalidPhase);
        }
        ultimatum_payoff(self.config.coins, offer, Response::Reject)?;

        self.offer = Some(offer);
        self.defaulted[i] = false;
        self.phase = Phase::Respond;
        Ok(())
    }

    /// Respondent's answer; settles the round.
    ///
    /// `bidder` is the bidder id the respondent's client believes it answers.
    /// A mismatch with the live bidder is logged and the answer is applied to
    /// the live round anyway.
    pub fn submit_response(
        &mut self,
        from: &ParticipantId,
        bidder: Option<&ParticipantId>,
        response: Response,
    ) -> Result<RoundOutcome, GameError> {
        self.ensure_running()?;
        self.ensure_kind(GameKind::Ultimatum)?;
        self.require_role(from, Role::Respondent)?;
        if self.phase != Phase::Respond {
            return Err(GameError::InvalidPhase);
        }

        if let (Some(claimed), Some(live)) = (bidder, self.bidder()) {
            if claimed != live {
                tracing::warn!(
                    respondent = %from,
                    claimed = %claimed,
                    live = %live,
                    round = self.round,
                    "response names a bidder that does not match the live round"
                );
            }
        }

        self.response = Some(response);
        self.settle()
    }

    /// Simultaneous choice; settles once both are in.
    /// Resubmitting before the opponent decides replaces the earlier choice.
    pub fn submit_choice(
        &mut self,
        from: &ParticipantId,
        choice: Choice,
    ) -> Result<Option<RoundOutcome>, GameError> {
        self.ensure_running()?;
        self.ensure_kind(GameKind::PrisonersDilemma)?;
        let i = self.require_role(from, Role::Player)?;
        if self.phase != Phase::Submit {
            return Err(GameError::InvalidPhase);
        }

        self.choices[i] = Some(choice);
        self.defaulted[i] = false;

        if self.choices.iter().all(Option::is_some) {
            self.settle().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Fill every missing decision with a pseudo-random default and settle.
    pub fn fill_missing<R: Randomness>(&mut self, rng: &mut R) -> Result<RoundOutcome, GameError> {
        self.ensure_running()?;
        if !matches!(self.phase, Phase::Submit | Phase::Respond) {
            return Err(GameError::InvalidPhase);
        }

        match self.config.kind {
            GameKind::Ultimatum => {
                let (bidder, respondent) = self.ultimatum_indices();
                if self.offer.is_none() {
                    // 0..=coins; a full u32 endowment spans every u32
                    let offer = match self.config.coins.checked_add(1) {
                        Some(span) => rng.next_range(span),
                        None => rng.next_u32(),
                    };
                    tracing::info!(round = self.round, offer, "no offer submitted, using random offer");
                    self.offer = Some(offer);
                    self.defaulted[bidder] = true;
                }
                if self.response.is_none() {
                    let response = if rng.next_bool() { Response::Accept } else { Response::Reject };
                    tracing::info!(round = self.round, ?response, "no response submitted, using random response");
                    self.response = Some(response);
                    self.defaulted[respondent] = true;
                }
            }
            GameKind::PrisonersDilemma => {
                for i in 0..2 {
                    if self.choices[i].is_none() {
                        let choice = if rng.next_bool() { Choice::Cooperate } else { Choice::Defect };
                        tracing::info!(round = self.round, participant = %self.members[i], ?choice, "no choice submitted, using random choice");
                        self.choices[i] = Some(choice);
                        self.defaulted[i] = true;
                    }
                }
            }
        }

        self.settle()
    }

    /// Move past a settled round
    pub fn advance(&mut self) -> Result<MatchState, GameError> {
        self.ensure_running()?;
        if self.phase != Phase::Settled {
            return Err(GameError::InvalidPhase);
        }
        if self.round >= self.config.repeat {
            self.over = Some(MatchState::Completed);
            tracing::info!(rounds = self.round, "match completed");
        } else {
            self.phase = Phase::AssignRoles;
        }
        Ok(self.state())
    }

    /// Forced termination; whatever was pending for the current round is dropped
    pub fn terminate(&mut self) {
        if self.over.is_none() {
            tracing::info!(round = self.round, "match terminated");
            self.over = Some(MatchState::Terminated);
        }
    }

    fn settle(&mut self) -> Result<RoundOutcome, GameError> {
        let round = self.round;
        let (decisions, payoffs) = match self.config.kind {
            GameKind::Ultimatum => {
                let (bidder, respondent) = self.ultimatum_indices();
                let offer = self.offer.ok_or(GameError::InvalidPhase)?;
                let response = self.response.ok_or(GameError::InvalidPhase)?;
                let (to_bidder, to_respondent) = ultimatum_payoff(self.config.coins, offer, response)?;

                let mut decisions = [Decision::Offer(offer); 2];
                let mut payoffs = [0u32; 2];
                decisions[respondent] = Decision::Response(response);
                payoffs[bidder] = to_bidder;
                payoffs[respondent] = to_respondent;
                (decisions, payoffs)
            }
            GameKind::PrisonersDilemma => {
                let a = self.choices[0].ok_or(GameError::InvalidPhase)?;
                let b = self.choices[1].ok_or(GameError::InvalidPhase)?;
                let (pa, pb) = self.config.table.payoff(a, b);
                ([Decision::Choice(a), Decision::Choice(b)], [pa, pb])
            }
        };

        for i in 0..2 {
            self.history.stage(
                &self.members[i],
                RoundEntry {
                    round,
                    role: self.roles[i],
                    decision: decisions[i],
                    payoff: payoffs[i],
                    defaulted: self.defaulted[i],
                },
            )?;
        }
        self.history.commit(round)?;
        self.phase = Phase::Settled;

        let side = |i: usize| Side {
            participant: self.members[i].clone(),
            role: self.roles[i],
            decision: decisions[i],
            payoff: payoffs[i],
            bank: self.history.bank(&self.members[i]),
            defaulted: self.defaulted[i],
        };
        let outcome = RoundOutcome {
            round,
            sides: [side(0), side(1)],
        };

        tracing::debug!(round, payoffs = ?payoffs, "round settled");
        Ok(outcome)
    }

    fn ultimatum_indices(&self) -> (usize, usize) {
        if self.roles[0] == Role::Bidder {
            (0, 1)
        } else {
            (1, 0)
        }
    }

    fn index_of(&self, id: &ParticipantId) -> Option<usize> {
        self.members.iter().position(|m| m == id)
    }

    fn holder_of(&self, role: Role) -> Option<&ParticipantId> {
        if self.phase == Phase::AssignRoles {
            return None;
        }
        self.roles
            .iter()
            .position(|r| *r == role)
            .map(|i| &self.members[i])
    }

    fn require_role(&self, id: &ParticipantId, role: Role) -> Result<usize, GameError> {
        let i = self
            .index_of(id)
            .ok_or_else(|| GameError::UnknownParticipant(id.clone()))?;
        if self.phase == Phase::AssignRoles {
            return Err(GameError::InvalidPhase);
        }
        if self.roles[i] != role {
            return Err(GameError::WrongRole {
                participant: id.clone(),
                role: self.roles[i],
            });
        }
        Ok(i)
    }

    fn ensure_running(&self) -> Result<(), GameError> {
        if self.over.is_some() {
            Err(GameError::MatchOver)
        } else {
            Ok(())
        }
    }

    fn ensure_kind(&self, kind: GameKind) -> Result<(), GameError> {
        if self.config.kind == kind {
            Ok(())
        } else {
            Err(GameError::WrongGame)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRng;

    fn ids() -> Vec<ParticipantId> {
        vec![ParticipantId::new("a"), ParticipantId::new("b")]
    }

    fn ultimatum(repeat: u32) -> Match {
        Match::new(
            MatchConfig {
                kind: GameKind::Ultimatum,
                coins: 100,
                repeat,
                table: DilemmaTable::default(),
            },
            ids(),
        )
        .unwrap()
    }

    fn dilemma(repeat: u32, table: DilemmaTable) -> Match {
        Match::new(
            MatchConfig {
                kind: GameKind::PrisonersDilemma,
                coins: 0,
                repeat,
                table,
            },
            ids(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_group() {
        let config = MatchConfig {
            kind: GameKind::Ultimatum,
            coins: 100,
            repeat: 1,
            table: DilemmaTable::default(),
        };
        assert_eq!(
            Match::new(config.clone(), vec![ParticipantId::new("a")]).unwrap_err(),
            GameError::InvalidMatchSize(1)
        );
        assert_eq!(
            Match::new(config.clone(), vec!["a".into(), "a".into()]).unwrap_err(),
            GameError::InvalidMatchSize(1)
        );
        assert_eq!(
            Match::new(MatchConfig { repeat: 0, ..config }, ids()).unwrap_err(),
            GameError::ZeroRounds
        );
    }

    #[test]
    fn test_ultimatum_roles_differ() {
        let mut rng = SeededRng::from_u64(1);
        for _ in 0..20 {
            let mut m = ultimatum(1);
            let start = m.start_round(&mut rng).unwrap();
            assert_ne!(start.roles[0].1, start.roles[1].1);
            assert!(start.roles.iter().all(|(_, r)| *r != Role::Player));
        }
    }

    #[test]
    fn test_ultimatum_accepted_round() {
        let mut rng = SeededRng::from_u64(2);
        let mut m = ultimatum(1);
        m.start_round(&mut rng).unwrap();
        let bidder = m.bidder().unwrap().clone();
        let respondent = m.respondent().unwrap().clone();

        m.submit_offer(&bidder, 40).unwrap();
        assert_eq!(m.pending_offer(), Some(40));
        let outcome = m.submit_response(&respondent, Some(&bidder), Response::Accept).unwrap();

        assert_eq!(outcome.side(&bidder).unwrap().payoff, 60);
        assert_eq!(outcome.side(&respondent).unwrap().payoff, 40);
        assert_eq!(m.history().bank(&bidder), 60);
        assert_eq!(m.advance().unwrap(), MatchState::Completed);
    }

    #[test]
    fn test_ultimatum_rejected_round_pays_nothing() {
        let mut rng = SeededRng::from_u64(2);
        let mut m = ultimatum(1);
        m.start_round(&mut rng).unwrap();
        let bidder = m.bidder().unwrap().clone();
        let respondent = m.respondent().unwrap().clone();

        m.submit_offer(&bidder, 10).unwrap();
        let outcome = m.submit_response(&respondent, None, Response::Reject).unwrap();
        assert!(outcome.sides.iter().all(|s| s.payoff == 0));
    }

    #[test]
    fn test_wrong_role_rejected() {
        let mut rng = SeededRng::from_u64(2);
        let mut m = ultimatum(1);
        m.start_round(&mut rng).unwrap();
        let respondent = m.respondent().unwrap().clone();

        assert!(matches!(
            m.submit_offer(&respondent, 10),
            Err(GameError::WrongRole { role: Role::Respondent, .. })
        ));
        assert_eq!(m.submit_choice(&respondent, Choice::Defect), Err(GameError::WrongGame));
    }

    #[test]
    fn test_offer_above_endowment_rejected() {
        let mut rng = SeededRng::from_u64(2);
        let mut m = ultimatum(1);
        m.start_round(&mut rng).unwrap();
        let bidder = m.bidder().unwrap().clone();
        assert!(matches!(m.submit_offer(&bidder, 101), Err(GameError::Payoff(_))));
        assert_eq!(m.phase(), Phase::Submit);
    }

    #[test]
    fn test_mismatched_bidder_is_applied_to_live_round() {
        let mut rng = SeededRng::from_u64(5);
        let mut m = ultimatum(1);
        m.start_round(&mut rng).unwrap();
        let bidder = m.bidder().unwrap().clone();
        let respondent = m.respondent().unwrap().clone();
        m.submit_offer(&bidder, 30).unwrap();

        let ghost = ParticipantId::new("ghost");
        let outcome = m.submit_response(&respondent, Some(&ghost), Response::Accept).unwrap();
        assert_eq!(outcome.side(&bidder).unwrap().payoff, 70);
    }

    #[test]
    fn test_dilemma_defect_vs_cooperate() {
        let mut rng = SeededRng::from_u64(3);
        let table = DilemmaTable {
            cooperate: 3,
            defect: 1,
            betray: 5,
            cooperate_betrayed: 0,
        };
        let mut m = dilemma(1, table);
        m.start_round(&mut rng).unwrap();
        let [a, b] = m.members().clone();

        assert_eq!(m.submit_choice(&a, Choice::Defect).unwrap(), None);
        let outcome = m.submit_choice(&b, Choice::Cooperate).unwrap().unwrap();
        assert_eq!(outcome.side(&a).unwrap().payoff, 5);
        assert_eq!(outcome.side(&b).unwrap().payoff, 0);
    }

    #[test]
    fn test_dilemma_resubmission_counts_once() {
        let mut rng = SeededRng::from_u64(3);
        let mut m = dilemma(2, DilemmaTable::default());
        m.start_round(&mut rng).unwrap();
        let [a, b] = m.members().clone();

        m.submit_choice(&a, Choice::Cooperate).unwrap();
        m.submit_choice(&a, Choice::Defect).unwrap();
        m.submit_choice(&b, Choice::Cooperate).unwrap().unwrap();

        let record = m.history().record(&a).unwrap();
        assert_eq!(record.entries.len(), 1);
        assert_eq!(record.entries[0].decision, Decision::Choice(Choice::Defect));
        assert_eq!(record.coins, 5);
        assert_eq!(m.submit_choice(&a, Choice::Cooperate), Err(GameError::InvalidPhase));
    }

    #[test]
    fn test_fill_missing_defaults() {
        let mut rng = SeededRng::from_u64(9);
        let mut m = ultimatum(1);
        m.start_round(&mut rng).unwrap();
        let outcome = m.fill_missing(&mut rng).unwrap();

        assert!(outcome.sides.iter().all(|s| s.defaulted));
        let bidder_side = outcome.sides.iter().find(|s| s.role == Role::Bidder).unwrap();
        match bidder_side.decision {
            Decision::Offer(o) => assert!(o <= 100),
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_fill_missing_with_maximum_endowment() {
        let mut rng = SeededRng::from_u64(3);
        let mut m = Match::new(
            MatchConfig {
                kind: GameKind::Ultimatum,
                coins: u32::MAX,
                repeat: 1,
                table: DilemmaTable::default(),
            },
            ids(),
        )
        .unwrap();
        m.start_round(&mut rng).unwrap();

        let outcome = m.fill_missing(&mut rng).unwrap();
        assert!(outcome.sides.iter().all(|s| s.defaulted));
        assert_eq!(m.advance().unwrap(), MatchState::Completed);
    }

    #[test]
    fn test_fill_missing_keeps_submitted_choice() {
        let mut rng = SeededRng::from_u64(9);
        let mut m = dilemma(1, DilemmaTable::default());
        m.start_round(&mut rng).unwrap();
        let [a, b] = m.members().clone();
        m.submit_choice(&a, Choice::Cooperate).unwrap();

        let outcome = m.fill_missing(&mut rng).unwrap();
        let side_a = outcome.side(&a).unwrap();
        assert_eq!(side_a.decision, Decision::Choice(Choice::Cooperate));
        assert!(!side_a.defaulted);
        assert!(outcome.side(&b).unwrap().defaulted);
    }

    #[test]
    fn test_round_counter_never_exceeds_repeat() {
        let mut rng = SeededRng::from_u64(11);
        let mut m = dilemma(4, DilemmaTable::default());
        let mut last = 0;
        while !m.is_over() {
            let start = m.start_round(&mut rng).unwrap();
            assert_eq!(start.round, last + 1);
            last = start.round;
            m.fill_missing(&mut rng).unwrap();
            m.advance().unwrap();
        }
        assert_eq!(last, 4);
        assert_eq!(m.state(), MatchState::Completed);
        assert_eq!(m.start_round(&mut rng), Err(GameError::MatchOver));
    }

    #[test]
    fn test_terminate_drops_pending_round() {
        let mut rng = SeededRng::from_u64(11);
        let mut m = dilemma(3, DilemmaTable::default());
        m.start_round(&mut rng).unwrap();
        let [a, _] = m.members().clone();
        m.submit_choice(&a, Choice::Defect).unwrap();
        m.terminate();

        assert_eq!(m.state(), MatchState::Terminated);
        assert_eq!(m.history().bank(&a), 0);
        assert_eq!(m.submit_choice(&a, Choice::Defect), Err(GameError::MatchOver));
    }
}
