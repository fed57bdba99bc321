//! Waiting room
//!
//! Collects connecting participants into a pool and hands out one group per
//! capacity event. In `WAIT_FOR_N_PLAYERS` mode a full pool dispatches at
//! once; in `TIMEOUT` mode only an expiring wait timer can dispatch, and only
//! when `min_players` are present.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use round_logic::{pick_group, ParticipantId, Randomness, SeededRng};

use crate::config::{ExecutionMode, RoomSettings, Treatment, TreatmentSelection};
use crate::context::{Context, TimerKind};
use crate::error::{Result, RoomError};
use crate::group::{Group, GroupId, Member};
use crate::messages::Outbound;
use crate::timers::TimerId;

/// Caller-supplied treatment picker, keyed on the room counter
pub type CustomSelector = Box<dyn FnMut(u64) -> String>;

enum Selector {
    Policy(TreatmentSelection),
    Custom(CustomSelector),
}

#[derive(Clone, Debug)]
struct Waiting {
    access: String,
    arrived_at: DateTime<Utc>,
    expiry: Option<TimerId>,
}

pub struct WaitingRoom {
    settings: RoomSettings,
    pool: BTreeMap<ParticipantId, Waiting>,
    /// Access codes of participants who left the pool and may come back
    departed: HashMap<ParticipantId, String>,
    selector: Selector,
    rng: SeededRng,
    room_counter: u64,
    capacity_event: u64,
    dispatch_calls: u32,
    closed: bool,
}

impl WaitingRoom {
    pub fn new(settings: RoomSettings, rng: SeededRng) -> Self {
        let selector = Selector::Policy(settings.treatment_selection.clone());
        Self {
            settings,
            pool: BTreeMap::new(),
            departed: HashMap::new(),
            selector,
            rng,
            room_counter: 0,
            capacity_event: 0,
            dispatch_calls: 0,
            closed: false,
        }
    }

    pub fn set_selector(&mut self, selector: CustomSelector) {
        self.selector = Selector::Custom(selector);
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn is_waiting(&self, id: &ParticipantId) -> bool {
        self.pool.contains_key(id)
    }

    pub fn waiting_since(&self, id: &ParticipantId) -> Option<DateTime<Utc>> {
        self.pool.get(id).map(|w| w.arrived_at)
    }

    pub fn expiry_timer(&self, id: &ParticipantId) -> Option<TimerId> {
        self.pool.get(id).and_then(|w| w.expiry)
    }

    /// Groups formed so far; also the id of the last group
    pub fn room_counter(&self) -> u64 {
        self.room_counter
    }

    pub fn capacity_event(&self) -> u64 {
        self.capacity_event
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn on_connect(
        &mut self,
        ctx: &mut Context<'_>,
        id: ParticipantId,
        access: String,
    ) -> Result<Option<Group>> {
        if self.pool.contains_key(&id) {
            return Err(RoomError::AlreadyConnected(id));
        }
        if self.closed {
            tracing::info!(participant = %id, "room closed, turning participant away");
            ctx.outbox.send(&id, Outbound::RoomClosed);
            return Ok(None);
        }
        ctx.codes.claim(&access)?;
        self.admit(ctx, id, access)
    }

    /// Leaves the pool; the code goes back to the registry. Returns whether
    /// the participant was waiting here.
    pub fn on_disconnect(&mut self, ctx: &mut Context<'_>, id: &ParticipantId) -> bool {
        let Some(waiting) = self.pool.remove(id) else {
            return false;
        };
        if let Some(timer) = waiting.expiry {
            ctx.timers.cancel(timer);
        }
        ctx.codes.release(&waiting.access);
        self.departed.insert(id.clone(), waiting.access);

        tracing::info!(participant = %id, pool = self.pool.len(), "participant left the waiting room");
        self.broadcast_count(ctx);
        true
    }

    pub fn on_reconnect(&mut self, ctx: &mut Context<'_>, id: ParticipantId) -> Result<Option<Group>> {
        let access = if let Some(waiting) = self.pool.remove(&id) {
            // never saw the disconnect; restart the wait
            if let Some(timer) = waiting.expiry {
                ctx.timers.cancel(timer);
            }
            waiting.access
        } else {
            let Some(access) = self.departed.remove(&id) else {
                tracing::warn!(participant = %id, "reconnect without a known access code, ignoring");
                return Ok(None);
            };
            if self.closed {
                ctx.outbox.send(&id, Outbound::RoomClosed);
                return Ok(None);
            }
            if let Err(err) = ctx.codes.claim(&access) {
                tracing::warn!(participant = %id, code = %access, %err, "cannot re-admit participant");
                return Ok(None);
            }
            access
        };
        self.admit(ctx, id, access)
    }

    /// The participant's wait budget ran out (the timer has already fired)
    pub fn on_expiry(&mut self, ctx: &mut Context<'_>, id: &ParticipantId) -> Result<Option<Group>> {
        let Some(waiting) = self.pool.get_mut(id) else {
            tracing::debug!(participant = %id, "expiry for participant no longer waiting");
            return Ok(None);
        };
        waiting.expiry = None;

        if self.pool.len() >= self.settings.min_players {
            tracing::info!(pool = self.pool.len(), "wait expired with enough players, forcing dispatch");
            self.open_capacity_event();
            let group = self.dispatch(ctx)?;
            self.release_expired(ctx, id);
            return Ok(group);
        }

        let bots = &self.settings.bots;
        if bots.enabled && bots.fill_on_timeout {
            tracing::info!(participant = %id, "wait expired, filling the group with bots");
            self.open_capacity_event();
            return self.dispatch(ctx);
        }

        self.release_expired(ctx, id);
        Ok(None)
    }

    /// Drop an expired participant who is still waiting
    fn release_expired(&mut self, ctx: &mut Context<'_>, id: &ParticipantId) {
        let Some(waiting) = self.pool.remove(id) else {
            return;
        };
        if let Some(timer) = waiting.expiry {
            ctx.timers.cancel(timer);
        }
        ctx.codes.release(&waiting.access);
        ctx.outbox.send(id, Outbound::Timeout);
        tracing::info!(participant = %id, pool = self.pool.len(), "wait expired, participant released");
        self.broadcast_count(ctx);
    }

    /// Form one group from the pool.
    ///
    /// Accepted at most `max_dispatch_calls` times per capacity event; extra
    /// calls return `Ok(None)`.
    pub fn dispatch(&mut self, ctx: &mut Context<'_>) -> Result<Option<Group>> {
        if self.dispatch_calls >= self.settings.max_dispatch_calls {
            tracing::warn!(
                event = self.capacity_event,
                calls = self.dispatch_calls,
                "dispatch already ran for this capacity event, ignoring"
            );
            return Ok(None);
        }
        self.dispatch_calls += 1;

        if self.closed {
            return Ok(None);
        }

        let group_size = self.settings.group_size;
        let humans = self.pool.len().min(group_size);
        if humans == 0 || (humans < group_size && !self.settings.bots.enabled) {
            tracing::warn!(pool = self.pool.len(), group_size, "not enough participants to dispatch");
            return Ok(None);
        }

        let candidates: Vec<ParticipantId> = self.pool.keys().cloned().collect();
        let Some((selected, rest)) = pick_group(&candidates, humans, &mut self.rng) else {
            return Ok(None);
        };

        let counter = self.room_counter + 1;
        let treatment = self.select_treatment(counter)?;
        self.room_counter = counter;
        let group_id = GroupId(counter);

        let mut members = Vec::with_capacity(group_size);
        for id in selected {
            let Some(waiting) = self.pool.remove(&id) else {
                continue;
            };
            if let Some(timer) = waiting.expiry {
                ctx.timers.cancel(timer);
            }
            ctx.codes.assign(&waiting.access, group_id)?;
            ctx.outbox.send(
                &id,
                Outbound::Dispatched {
                    group: group_id,
                    treatment: treatment.name.clone(),
                },
            );
            members.push(Member::human(id, waiting.access));
        }
        for seat in members.len()..group_size {
            members.push(Member::bot(ParticipantId::new(format!("bot-{}-{}", counter, seat))));
        }

        for id in &rest {
            ctx.outbox.send(id, Outbound::NotSelected);
            if self.settings.disconnect_if_not_selected {
                self.release(ctx, id);
            }
        }

        if let Some(max) = self.settings.max_games {
            if counter >= max {
                self.close(ctx);
            }
        }
        self.broadcast_count(ctx);

        tracing::info!(
            group = %group_id,
            treatment = %treatment.name,
            members = ?members.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            "group dispatched"
        );
        Ok(Some(Group::new(group_id, members, treatment)))
    }

    fn admit(&mut self, ctx: &mut Context<'_>, id: ParticipantId, access: String) -> Result<Option<Group>> {
        let budget = self.settings.wait_budget(ctx.now);
        let timer = ctx
            .timers
            .schedule_in(ctx.now, budget, TimerKind::Expiry(id.clone()));
        self.departed.remove(&id);
        self.pool.insert(
            id.clone(),
            Waiting {
                access,
                arrived_at: ctx.now,
                expiry: Some(timer),
            },
        );

        ctx.outbox.send(
            &id,
            Outbound::WaitTime {
                remaining_ms: budget.num_milliseconds(),
            },
        );
        tracing::info!(participant = %id, pool = self.pool.len(), "participant joined the waiting room");
        self.broadcast_count(ctx);

        if self.settings.execution_mode == ExecutionMode::WaitForNPlayers
            && self.pool.len() >= self.settings.pool_size
        {
            self.open_capacity_event();
            return self.dispatch(ctx);
        }
        Ok(None)
    }

    fn open_capacity_event(&mut self) {
        self.capacity_event += 1;
        self.dispatch_calls = 0;
    }

    /// Treatment for the `counter`-th group. A name the settings do not
    /// know falls back to round-robin.
    fn select_treatment(&mut self, counter: u64) -> Result<Treatment> {
        let treatments = &self.settings.treatments;
        let name = match &mut self.selector {
            Selector::Policy(TreatmentSelection::Rotate) => treatments
                .get(((counter - 1) % treatments.len().max(1) as u64) as usize)
                .map(|t| t.name.clone())
                .ok_or(RoomError::NoTreatments)?,
            Selector::Policy(TreatmentSelection::Random) => self
                .rng
                .choose(treatments)
                .map(|t| t.name.clone())
                .ok_or(RoomError::NoTreatments)?,
            Selector::Policy(TreatmentSelection::Fixed { name }) => name.clone(),
            Selector::Custom(pick) => pick(counter),
        };
        match self.settings.treatment(&name) {
            Ok(treatment) => Ok(treatment.clone()),
            Err(err) => {
                tracing::warn!(%err, counter, "selected treatment unknown, rotating instead");
                self.rotate(counter)
            }
        }
    }

    fn rotate(&self, counter: u64) -> Result<Treatment> {
        let treatments = &self.settings.treatments;
        treatments
            .get(((counter - 1) % treatments.len().max(1) as u64) as usize)
            .cloned()
            .ok_or(RoomError::NoTreatments)
    }

    fn release(&mut self, ctx: &mut Context<'_>, id: &ParticipantId) {
        if let Some(waiting) = self.pool.remove(id) {
            if let Some(timer) = waiting.expiry {
                ctx.timers.cancel(timer);
            }
            ctx.codes.release(&waiting.access);
        }
    }

    fn close(&mut self, ctx: &mut Context<'_>) {
        self.closed = true;
        let remaining: Vec<ParticipantId> = self.pool.keys().cloned().collect();
        for id in remaining {
            self.release(ctx, &id);
            ctx.outbox.send(&id, Outbound::RoomClosed);
        }
        tracing::info!(games = self.room_counter, "all games formed, room closed");
    }

    fn broadcast_count(&self, ctx: &mut Context<'_>) {
        let message = Outbound::PlayersConnected {
            count: self.pool.len(),
            needed: self.settings.pool_size,
        };
        for id in self.pool.keys() {
            ctx.outbox.send(id, message.clone());
        }
    }
}
