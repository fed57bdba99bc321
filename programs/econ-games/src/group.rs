//! Groups formed by the waiting room

use std::fmt;

use round_logic::ParticipantId;
use serde::{Deserialize, Serialize};

use crate::config::Treatment;

/// Group id, taken from the room counter at dispatch
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: ParticipantId,
    /// None for bots
    pub access: Option<String>,
}

impl Member {
    pub fn human(id: ParticipantId, access: String) -> Self {
        Self { id, access: Some(access) }
    }

    pub fn bot(id: ParticipantId) -> Self {
        Self { id, access: None }
    }

    pub fn is_bot(&self) -> bool {
        self.access.is_none()
    }
}

/// A fixed set of participants playing one game under one treatment.
/// Membership never changes after dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    id: GroupId,
    members: Vec<Member>,
    treatment: Treatment,
}

impl Group {
    pub(crate) fn new(id: GroupId, members: Vec<Member>, treatment: Treatment) -> Self {
        Self { id, members, treatment }
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, id: &ParticipantId) -> Option<&Member> {
        self.members.iter().find(|m| &m.id == id)
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.member(id).is_some()
    }

    pub fn treatment(&self) -> &Treatment {
        &self.treatment
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.members.iter().map(|m| m.id.clone()).collect()
    }
}
