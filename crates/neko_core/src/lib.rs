//! Motion engine for a screen-roaming sprite character.
//!
//! - `sequence`: timed, nested, repeating frame lists.
//! - `playback`: deterministic player over a sequence.
//! - `motion`: the named state graph and its heading conventions.
//! - `time`: scheduler trait, virtual timer queue and clocks.
//!
//! Physics, behaviours and the session driver live in `neko_sim`.

pub mod motion;
pub mod playback;
pub mod sequence;
pub mod time;

pub use motion::{Direction, GraphError, Motion, MotionGraph, MotionParams, StateKind};
pub use playback::{PlaybackEvent, SequencePlayer};
pub use sequence::{FrameEntry, FrameHandle, FrameSequence, SequenceFault};
pub use time::{Scheduler, SchedulerError, TimerHandle, TimerQueue, TimerToken};
