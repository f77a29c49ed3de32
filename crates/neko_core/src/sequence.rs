//! Frame sequence data model.
//!
//! A sequence is an ordered list of entries. Each entry is either a single
//! frame shown for a number of milliseconds, or a nested group that plays as
//! one step of its parent and carries its own repeat count and duration cap.
//! Ownership is a plain tree: a parent owns its groups, nothing points back up.
//!
//! All timing is integer milliseconds so that playback stays deterministic
//! under the fixed tick. An unknown duration (authored as a negative number)
//! is `None`.

use std::fmt;
use std::sync::Arc;

/// Opaque handle to a frame image.
///
/// The engine only stores and forwards it; resolving it to pixels is the
/// rendering boundary's business.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameHandle(Arc<str>);

impl FrameHandle {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FrameHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One step of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEntry {
    /// A single frame. `None` duration holds until the enclosing cap (or forever).
    Leaf {
        frame: FrameHandle,
        duration_ms: Option<u64>,
    },
    /// A nested sub-sequence; the parent moves on when it ends.
    Group(FrameSequence),
}

impl FrameEntry {
    /// Length of this entry when played once, `None` if unbounded.
    pub fn natural_duration_ms(&self) -> Option<u64> {
        match self {
            Self::Leaf { duration_ms, .. } => *duration_ms,
            Self::Group(group) => group.natural_duration_ms(),
        }
    }
}

/// Structural problems found by [`FrameSequence::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceFault {
    /// The sequence (or one of its groups) has no entries.
    Empty,
    /// An infinitely repeating block whose cycle takes no time; playing it
    /// would never yield.
    ZeroLengthLoop,
}

/// Ordered, possibly nested, possibly repeating list of timed frames.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSequence {
    entries: Vec<FrameEntry>,
    total_duration_ms: Option<u64>,
    repeat_count: Option<u32>,
}

impl Default for FrameSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSequence {
    /// Empty sequence that plays once and is not capped.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            total_duration_ms: None,
            repeat_count: Some(1),
        }
    }

    /// Builds a play-once sequence from `(frame, duration_ms)` pairs.
    pub fn from_frames<I, F>(frames: I) -> Self
    where
        I: IntoIterator<Item = (F, u64)>,
        F: Into<FrameHandle>,
    {
        let mut seq = Self::new();
        for (frame, duration_ms) in frames {
            seq.push_frame(frame, Some(duration_ms));
        }
        seq
    }

    pub fn push_frame(&mut self, frame: impl Into<FrameHandle>, duration_ms: Option<u64>) {
        self.entries.push(FrameEntry::Leaf {
            frame: frame.into(),
            duration_ms,
        });
    }

    pub fn push_group(&mut self, group: FrameSequence) {
        self.entries.push(FrameEntry::Group(group));
    }

    pub fn with_total_duration(mut self, total_duration_ms: Option<u64>) -> Self {
        self.total_duration_ms = total_duration_ms;
        self
    }

    /// `None` repeats forever.
    pub fn with_repeat_count(mut self, repeat_count: Option<u32>) -> Self {
        self.repeat_count = repeat_count;
        self
    }

    pub fn set_total_duration(&mut self, total_duration_ms: Option<u64>) {
        self.total_duration_ms = total_duration_ms;
    }

    pub fn set_repeat_count(&mut self, repeat_count: Option<u32>) {
        self.repeat_count = repeat_count;
    }

    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&FrameEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_duration_ms(&self) -> Option<u64> {
        self.total_duration_ms
    }

    pub fn repeat_count(&self) -> Option<u32> {
        self.repeat_count
    }

    /// Length of one pass over the entries; `None` if any entry is unbounded.
    pub fn cycle_duration_ms(&self) -> Option<u64> {
        self.entries
            .iter()
            .try_fold(0u64, |acc, entry| Some(acc + entry.natural_duration_ms()?))
    }

    /// How long the sequence plays before ending, `None` if it never ends on
    /// its own. A finite cap always bounds the result.
    pub fn natural_duration_ms(&self) -> Option<u64> {
        let repeated = match (self.cycle_duration_ms(), self.repeat_count) {
            (Some(cycle), Some(count)) => Some(cycle * u64::from(count)),
            _ => None,
        };
        match (repeated, self.total_duration_ms) {
            (Some(len), Some(cap)) => Some(len.min(cap)),
            (None, Some(cap)) => Some(cap),
            (len, None) => len,
        }
    }

    /// Walks the tree looking for structural faults.
    pub fn check(&self) -> Result<(), SequenceFault> {
        if self.entries.is_empty() {
            return Err(SequenceFault::Empty);
        }
        if self.repeat_count.is_none()
            && self.total_duration_ms.is_none()
            && self.cycle_duration_ms() == Some(0)
        {
            return Err(SequenceFault::ZeroLengthLoop);
        }
        for entry in &self.entries {
            if let FrameEntry::Group(group) = entry {
                group.check()?;
            }
        }
        Ok(())
    }

    /// Every leaf frame handle in authoring order, groups flattened.
    pub fn frames(&self) -> Vec<&FrameHandle> {
        let mut out = Vec::new();
        self.collect_frames(&mut out);
        out
    }

    fn collect_frames<'a>(&'a self, out: &mut Vec<&'a FrameHandle>) {
        for entry in &self.entries {
            match entry {
                FrameEntry::Leaf { frame, .. } => out.push(frame),
                FrameEntry::Group(group) => group.collect_frames(out),
            }
        }
    }
}

/// Converts an authored duration where negative means "unknown".
pub fn authored_duration(ms: i64) -> Option<u64> {
    u64::try_from(ms).ok()
}

/// Converts an authored repeat count where negative means "forever".
pub fn authored_repeat(count: i64) -> Option<u32> {
    u32::try_from(count).ok()
}
