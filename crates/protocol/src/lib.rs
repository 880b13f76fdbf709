//! Wire protocol shared by the relay broker and its clients.
//!
//! Every logical message is one JSON text frame keyed by `type`. The broker
//! never looks inside `text`.

pub mod constants;
pub mod frame;
pub mod types;

// Re-export primary types for convenience.
pub use frame::{Frame, FrameError};
pub use types::{ClientInfo, ClientRole};
