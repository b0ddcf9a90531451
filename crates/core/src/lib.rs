pub mod config;
pub mod error;
pub mod event;
pub mod room;
pub mod telemetry;

pub use error::{BoardError, EventBusError, Result};
pub use room::{EventKind, Participant, Room, RoomEvent, RoomState};
