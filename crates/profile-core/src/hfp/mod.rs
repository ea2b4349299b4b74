//! Handsfree profile, client (handsfree unit) role
//!
//! - **call** - call records and the roster
//! - **actions** - call control actions and the tables choosing them
//! - **reconciler** - current call list diffing
//! - **session** - the [`ProfileSession`](crate::state_machine::ProfileSession)
//!   tying them to a peer machine

pub mod actions;
pub mod call;
pub mod reconciler;
pub mod session;

pub use actions::{AcceptMode, AcceptRetryPolicy, CallAction, HfpAction};
pub use call::{Call, CallDirection, CallIndex, CallRoster, CallState};
pub use reconciler::{CallReconciler, ReconcileOutcome};
pub use session::{HfpClientSession, HfpRequest, HfpTimer, MAX_VOLUME};
