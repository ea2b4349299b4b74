//! Per-peer connection state machine
//!
//! - **machine** - the connection lifecycle shared by every profile
//! - **session** - the profile hook trait and the context handed to hooks
//! - **timers** - delayed self-messages keyed by timer kind

pub mod machine;
pub mod session;
pub mod timers;

pub use machine::{ConnectionStateMachine, Message};
pub use session::{ProfileSession, SessionContext};
pub use timers::{TimerKind, TimerQueue};
