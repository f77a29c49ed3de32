//! Deterministic playback of a [`FrameSequence`].
//!
//! The player is runtime state only; the sequence it walks is passed in on
//! every call, the same way a clip is handed to an animation tick. Time is an
//! absolute millisecond timeline supplied by the caller. Every frame switch is
//! computed from the deadline that caused it rather than from the time the
//! caller happened to poll, so advancing in one large step or many small ones
//! produces the same frames at the same instants.
//!
//! A running group entry drives its parent: the parent has no deadline of its
//! own (unless it is capped) and moves on when the child reports its end.

use crate::sequence::{FrameEntry, FrameHandle, FrameSequence};

/// Upper bound on advances processed at a single instant. Only reachable by a
/// sequence that skipped validation.
const MAX_STEPS_PER_INSTANT: usize = 4096;

/// What happened while driving a player forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The same leaf frame is still showing.
    Unchanged,
    /// A different leaf frame is now showing.
    FrameChanged,
    /// The sequence ran out of repeats or hit its cap; the player is stopped
    /// and holds its last frame.
    Ended { at_ms: u64 },
}

impl PlaybackEvent {
    pub fn is_end(self) -> bool {
        matches!(self, Self::Ended { .. })
    }
}

/// Cursor into one level of the sequence tree.
#[derive(Debug, Clone)]
struct Run {
    /// `None` until the first advance selects entry 0.
    frame_index: Option<usize>,
    repeat_index: u32,
    started_at: u64,
    deadline: Option<u64>,
    child: Option<Box<Run>>,
}

impl Run {
    fn new(started_at: u64) -> Self {
        Self {
            frame_index: None,
            repeat_index: 0,
            started_at,
            deadline: None,
            child: None,
        }
    }

    /// Returns `true` if the sequence ends without showing anything.
    fn start(&mut self, seq: &FrameSequence, at: u64) -> bool {
        if seq.is_empty() || seq.repeat_count() == Some(0) {
            return true;
        }
        self.advance(seq, at)
    }

    /// Moves to the next entry at instant `at`. Returns `true` when the
    /// sequence is exhausted; the last committed entry is left in place.
    fn advance(&mut self, seq: &FrameSequence, at: u64) -> bool {
        let mut skipped = 0usize;
        loop {
            let mut next = self.frame_index.map_or(0, |i| i + 1);
            let mut next_repeat = self.repeat_index;
            if next >= seq.len() {
                next = 0;
                next_repeat += 1;
                if seq.repeat_count().is_some_and(|count| next_repeat >= count) {
                    self.deadline = None;
                    return true;
                }
            }
            if let Some(total) = seq.total_duration_ms() {
                if at.saturating_sub(self.started_at) >= total {
                    self.deadline = None;
                    return true;
                }
            }

            self.frame_index = Some(next);
            self.repeat_index = next_repeat;
            self.child = None;
            let cap_at = seq.total_duration_ms().map(|total| self.started_at + total);

            match &seq.entries()[next] {
                FrameEntry::Leaf { duration_ms, .. } => {
                    self.deadline = match (*duration_ms, cap_at) {
                        (None, None) => None,
                        (None, Some(cap)) => Some(cap),
                        (Some(duration), None) => Some(at + duration),
                        (Some(duration), Some(cap)) => Some((at + duration).min(cap)),
                    };
                    return false;
                }
                FrameEntry::Group(group) => {
                    let mut child = Run::new(at);
                    if child.start(group, at) {
                        // A whole pass of groups that end on entry can never show a frame.
                        skipped += 1;
                        if skipped > seq.len() {
                            self.deadline = None;
                            return true;
                        }
                        continue;
                    }
                    self.deadline = cap_at;
                    self.child = Some(Box::new(child));
                    return false;
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<u64> {
        let child = self.child.as_ref().and_then(|c| c.next_deadline());
        match (self.deadline, child) {
            (Some(own), Some(child)) => Some(own.min(child)),
            (own, child) => own.or(child),
        }
    }

    /// Handles the deadline that falls due at `at`. The level's own deadline
    /// (frame end or cap) wins over a child deadline at the same instant.
    fn fire(&mut self, seq: &FrameSequence, at: u64) -> bool {
        if self.deadline == Some(at) {
            return self.advance(seq, at);
        }
        let active = self.frame_index.and_then(|i| seq.entry(i));
        let child_ended = match (self.child.as_mut(), active) {
            (Some(child), Some(FrameEntry::Group(group))) => child.fire(group, at),
            _ => false,
        };
        if child_ended {
            self.advance(seq, at)
        } else {
            false
        }
    }

    fn current_frame<'a>(&self, seq: &'a FrameSequence) -> Option<&'a FrameHandle> {
        match seq.entry(self.frame_index?)? {
            FrameEntry::Leaf { frame, .. } => Some(frame),
            FrameEntry::Group(group) => self.child.as_ref()?.current_frame(group),
        }
    }
}

/// Runtime cursor over one sequence: Stopped or Running.
#[derive(Debug, Clone, Default)]
pub struct SequencePlayer {
    run: Option<Run>,
    running: bool,
}

impl SequencePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restarts from the first entry at `now_ms`, selecting frame 0 at once.
    pub fn start(&mut self, seq: &FrameSequence, now_ms: u64) -> PlaybackEvent {
        let mut run = Run::new(now_ms);
        let ended = run.start(seq, now_ms);
        self.run = Some(run);
        if ended {
            self.running = false;
            PlaybackEvent::Ended { at_ms: now_ms }
        } else {
            self.running = true;
            PlaybackEvent::FrameChanged
        }
    }

    /// Cancels any pending advance. The current frame stays visible.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Forgets the sequence position entirely.
    pub fn reset(&mut self) {
        self.run = None;
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// When the next advance is due; `None` when stopped or holding a frame
    /// indefinitely.
    pub fn next_deadline(&self) -> Option<u64> {
        if !self.running {
            return None;
        }
        self.run.as_ref().and_then(Run::next_deadline)
    }

    /// Processes every advance due at or before `now_ms`, in timeline order.
    pub fn advance_to(&mut self, seq: &FrameSequence, now_ms: u64) -> PlaybackEvent {
        let Some(run) = self.run.as_mut() else {
            return PlaybackEvent::Unchanged;
        };
        if !self.running {
            return PlaybackEvent::Unchanged;
        }

        let before = run.current_frame(seq).map(|f| f as *const FrameHandle);
        let mut steps_at_instant = 0usize;
        let mut last_at = None;
        while let Some(at) = run.next_deadline().filter(|&at| at <= now_ms) {
            if last_at == Some(at) {
                steps_at_instant += 1;
                if steps_at_instant > MAX_STEPS_PER_INSTANT {
                    log::warn!("Frame sequence made no progress at t={at}ms; stopping playback");
                    self.running = false;
                    return PlaybackEvent::Ended { at_ms: at };
                }
            } else {
                last_at = Some(at);
                steps_at_instant = 0;
            }

            if run.fire(seq, at) {
                self.running = false;
                return PlaybackEvent::Ended { at_ms: at };
            }
        }

        let after = run.current_frame(seq).map(|f| f as *const FrameHandle);
        if before == after {
            PlaybackEvent::Unchanged
        } else {
            PlaybackEvent::FrameChanged
        }
    }

    /// The active leaf frame, also after the sequence has ended.
    pub fn current_frame<'a>(&self, seq: &'a FrameSequence) -> Option<&'a FrameHandle> {
        self.run.as_ref()?.current_frame(seq)
    }

    /// Index of the active entry at the top level.
    pub fn frame_index(&self) -> Option<usize> {
        self.run.as_ref()?.frame_index
    }

    pub fn repeat_index(&self) -> u32 {
        self.run.as_ref().map_or(0, |run| run.repeat_index)
    }

    /// Time since the last `start`, measured on the caller's timeline.
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.run
            .as_ref()
            .map(|run| now_ms.saturating_sub(run.started_at))
    }
}
