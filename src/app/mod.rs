//! Session orchestration

pub mod runtime;
pub mod session;
pub mod state;
pub mod timers;

pub use runtime::SessionRuntime;
pub use session::Command;
pub use state::{AppState, ControlError};
