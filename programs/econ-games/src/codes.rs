//! Authorization codes
//!
//! Each participant logs in with an access code and is paid out against the
//! paired exit code. A code moves Valid -> InUse on connect, back to Valid on
//! disconnect from the waiting room, and is CheckedOut for good once the
//! participant's game has been settled.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoomError};
use crate::group::GroupId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthCode {
    pub access: String,
    pub exit: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeState {
    Valid,
    InUse,
    CheckedOut,
}

#[derive(Clone, Debug)]
struct CodeEntry {
    code: AuthCode,
    state: CodeState,
    holder: Option<GroupId>,
}

#[derive(Clone, Debug, Default)]
pub struct CodeRegistry {
    codes: HashMap<String, CodeEntry>,
}

impl CodeRegistry {
    pub fn new(codes: impl IntoIterator<Item = AuthCode>) -> Self {
        Self {
            codes: codes
                .into_iter()
                .map(|code| {
                    (
                        code.access.clone(),
                        CodeEntry {
                            code,
                            state: CodeState::Valid,
                            holder: None,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn insert(&mut self, code: AuthCode) {
        self.codes.entry(code.access.clone()).or_insert(CodeEntry {
            code,
            state: CodeState::Valid,
            holder: None,
        });
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn get(&self, access: &str) -> Option<&AuthCode> {
        self.codes.get(access).map(|e| &e.code)
    }

    pub fn state(&self, access: &str) -> Option<CodeState> {
        self.codes.get(access).map(|e| e.state)
    }

    pub fn holder(&self, access: &str) -> Option<GroupId> {
        self.codes.get(access).and_then(|e| e.holder)
    }

    /// Mark a valid code as in use
    pub fn claim(&mut self, access: &str) -> Result<&AuthCode> {
        let entry = self
            .codes
            .get_mut(access)
            .ok_or_else(|| RoomError::UnknownCode(access.to_string()))?;
        if entry.state != CodeState::Valid {
            return Err(RoomError::CodeUnavailable(access.to_string()));
        }
        entry.state = CodeState::InUse;
        Ok(&entry.code)
    }

    /// Return an in-use code to the pool. Codes held by a group or already
    /// checked out are left alone. Returns whether the code became valid.
    pub fn release(&mut self, access: &str) -> bool {
        match self.codes.get_mut(access) {
            Some(entry) if entry.state == CodeState::InUse && entry.holder.is_none() => {
                entry.state = CodeState::Valid;
                true
            }
            Some(_) => false,
            None => {
                tracing::warn!(code = access, "release of unknown access code");
                false
            }
        }
    }

    /// Give one group exclusive claim on an in-use code
    pub fn assign(&mut self, access: &str, group: GroupId) -> Result<()> {
        let entry = self
            .codes
            .get_mut(access)
            .ok_or_else(|| RoomError::UnknownCode(access.to_string()))?;
        let current = entry.holder;
        match current {
            Some(holder) if holder != group => Err(RoomError::CodeHeldByGroup {
                code: access.to_string(),
                holder: holder.0,
            }),
            _ if entry.state != CodeState::InUse => Err(RoomError::CodeUnavailable(access.to_string())),
            _ => {
                entry.holder = Some(group);
                Ok(())
            }
        }
    }

    /// Retire a code once its game is settled. Idempotent.
    pub fn check_out(&mut self, access: &str) -> Result<&AuthCode> {
        let entry = self
            .codes
            .get_mut(access)
            .ok_or_else(|| RoomError::UnknownCode(access.to_string()))?;
        entry.state = CodeState::CheckedOut;
        Ok(&entry.code)
    }
}
