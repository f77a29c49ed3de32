//! Movement, behaviours and the timer-driven session for a screen pet,
//! plus the file formats the runner reads.

pub mod behaviour;
pub mod commands;
pub mod controller;
pub mod replay;
pub mod session;
pub mod settings;
pub mod skin;

pub use behaviour::Behaviour;
pub use commands::{Command, CommandSender};
pub use controller::{ControllerConfig, MovementController, MovementState, TickOutcome};
pub use session::{RenderView, Session, SessionError};
