//! Econ Games - Ultimatum and Prisoner's Dilemma experiment server
//!
//! Participants log in with an access code, wait in a pool until a group of
//! two can be formed, play a fixed number of rounds under the group's
//! treatment and are paid a bonus against their exit code.
//!
//! Transport, views and persistence back ends live elsewhere; this crate
//! takes typed events, a virtual clock and produces typed messages.

mod error;
pub mod codes;
pub mod config;
pub mod context;
pub mod export;
pub mod group;
pub mod lab;
pub mod messages;
pub mod room;
pub mod session;
pub mod timers;

pub use error::{Result, RoomError};
pub use codes::{AuthCode, CodeRegistry, CodeState};
pub use config::{BotSettings, ExecutionMode, RoomSettings, Treatment, TreatmentSelection};
pub use context::{Context, TimerKind};
pub use export::{Archive, DirectoryArchive, GameReport, MemoryArchive, RoundRow, SummaryRow};
pub use group::{Group, GroupId, Member};
pub use lab::Lab;
pub use messages::{Envelope, Inbound, Outbound, Outbox};
pub use room::{CustomSelector, WaitingRoom};
pub use session::Session;
pub use timers::{TimerId, Timers};
