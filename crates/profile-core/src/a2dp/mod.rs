//! Advanced audio distribution profile, source role

pub mod session;

pub use session::{A2dpAction, A2dpRequest, A2dpSession};
