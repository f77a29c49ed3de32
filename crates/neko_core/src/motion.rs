//! Motion graph: the named states a character can be in and how they link.
//!
//! Built once by a loader and read-only afterwards. Directional states are not
//! stored specially; they are found by naming convention, `prefix + suffix`,
//! e.g. `moveUpLeft` or `wallRight`.

use std::collections::HashMap;
use std::f32::consts::PI;

use glam::Vec2;
use thiserror::Error;

use crate::sequence::{FrameSequence, SequenceFault};

/// Compass heading used for move and wall state names. Screen coordinates:
/// `y` grows downward, so `Down` is `(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

/// Heading buckets in `atan2` order starting at +x and turning toward +y.
const HEADING_BUCKETS: [Direction; 8] = [
    Direction::Right,
    Direction::DownRight,
    Direction::Down,
    Direction::DownLeft,
    Direction::Left,
    Direction::UpLeft,
    Direction::Up,
    Direction::UpRight,
];

impl Direction {
    pub const ALL: [Direction; 8] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
        Direction::UpLeft,
        Direction::UpRight,
        Direction::DownLeft,
        Direction::DownRight,
    ];

    pub const CARDINAL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// State-name suffix.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Up => "Up",
            Self::Down => "Down",
            Self::Left => "Left",
            Self::Right => "Right",
            Self::UpLeft => "UpLeft",
            Self::UpRight => "UpRight",
            Self::DownLeft => "DownLeft",
            Self::DownRight => "DownRight",
        }
    }

    pub fn is_cardinal(self) -> bool {
        matches!(self, Self::Up | Self::Down | Self::Left | Self::Right)
    }

    /// Quantizes a heading into one of eight sectors.
    ///
    /// The half-sector bias before truncation puts each sector's centre on a
    /// compass direction, so exact diagonals land in the middle of a bucket
    /// and never flicker between neighbours. A zero vector maps to `Right`.
    pub fn from_heading(heading: Vec2) -> Self {
        let sector = (heading.y.atan2(heading.x) * 4.0 / PI + 8.5).floor() as usize % 8;
        HEADING_BUCKETS[sector]
    }
}

/// Which naming convention to build a directional state name with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    Move,
    Wall,
}

/// Global tuning for a skin. Distances and speeds are device pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionParams {
    /// px/s²
    pub acceleration: f32,
    /// px/s
    pub max_velocity: f32,
    pub deceleration_distance: f32,
    pub proximity_distance: f32,
    pub initial_state: String,
    pub awake_state: String,
    pub move_state_prefix: String,
    pub wall_state_prefix: String,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            acceleration: 160.0,
            max_velocity: 100.0,
            deceleration_distance: 100.0,
            proximity_distance: 10.0,
            initial_state: "stop".to_string(),
            awake_state: "awake".to_string(),
            move_state_prefix: "move".to_string(),
            wall_state_prefix: "wall".to_string(),
        }
    }
}

impl MotionParams {
    /// Multiplies every distance-based parameter by a display density.
    pub fn scaled(mut self, density: f32) -> Self {
        self.acceleration *= density;
        self.max_velocity *= density;
        self.deceleration_distance *= density;
        self.proximity_distance *= density;
        self
    }
}

/// One named state.
#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
    pub name: String,
    /// Successor once the frames finish; `None` holds the last frame.
    pub next_state: Option<String>,
    pub check_move: bool,
    pub check_wall: bool,
    pub frames: FrameSequence,
}

impl Motion {
    pub fn new(name: impl Into<String>, frames: FrameSequence) -> Self {
        Self {
            name: name.into(),
            next_state: None,
            check_move: false,
            check_wall: false,
            frames,
        }
    }

    pub fn with_next_state(mut self, next: impl Into<String>) -> Self {
        self.next_state = Some(next.into());
        self
    }

    pub fn with_check_move(mut self, check_move: bool) -> Self {
        self.check_move = check_move;
        self
    }

    pub fn with_check_wall(mut self, check_wall: bool) -> Self {
        self.check_wall = check_wall;
        self
    }
}

/// Structural problems in a skin definition. All of them are reported when a
/// graph is installed, never patched over.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("initial state '{0}' does not exist")]
    MissingInitialState(String),
    #[error("state '{state}' has an empty frame sequence")]
    EmptySequence { state: String },
    #[error("state '{state}' loops forever without taking any time")]
    ZeroLengthLoop { state: String },
    #[error("state '{state}' names unknown next state '{next}'")]
    UnknownNextState { state: String, next: String },
    #[error("parameter {name} must be a positive finite number, got {value}")]
    InvalidParameter { name: &'static str, value: f32 },
}

/// All states of a skin plus its global parameters.
#[derive(Debug, Clone, Default)]
pub struct MotionGraph {
    params: MotionParams,
    states: HashMap<String, Motion>,
}

impl MotionGraph {
    pub fn new(params: MotionParams) -> Self {
        Self {
            params,
            states: HashMap::new(),
        }
    }

    /// Adds a state keyed by its name, returning any state it replaced.
    pub fn insert(&mut self, motion: Motion) -> Option<Motion> {
        self.states.insert(motion.name.clone(), motion)
    }

    pub fn with_motion(mut self, motion: Motion) -> Self {
        self.insert(motion);
        self
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.keys().map(String::as_str)
    }

    pub fn motions(&self) -> impl Iterator<Item = &Motion> {
        self.states.values()
    }

    pub fn motion(&self, name: &str) -> Option<&Motion> {
        self.states.get(name)
    }

    pub fn has_state(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// Successor of `name`; a missing state has no successor.
    pub fn next_state(&self, name: &str) -> Option<&str> {
        self.states.get(name)?.next_state.as_deref()
    }

    pub fn needs_move_check(&self, name: &str) -> bool {
        self.states.get(name).is_some_and(|m| m.check_move)
    }

    pub fn needs_wall_check(&self, name: &str) -> bool {
        self.states.get(name).is_some_and(|m| m.check_wall)
    }

    pub fn frames_for(&self, name: &str) -> Option<&FrameSequence> {
        self.states.get(name).map(|m| &m.frames)
    }

    /// Builds a directional state name. Wall states only exist for the four
    /// cardinal directions; a diagonal yields the bare wall prefix, which is
    /// simply a name that is unlikely to exist.
    pub fn directional_state(&self, kind: StateKind, direction: Direction) -> String {
        match kind {
            StateKind::Move => format!("{}{}", self.params.move_state_prefix, direction.suffix()),
            StateKind::Wall if direction.is_cardinal() => {
                format!("{}{}", self.params.wall_state_prefix, direction.suffix())
            }
            StateKind::Wall => self.params.wall_state_prefix.clone(),
        }
    }

    pub fn move_state(&self, direction: Direction) -> String {
        self.directional_state(StateKind::Move, direction)
    }

    pub fn wall_state(&self, direction: Direction) -> String {
        self.directional_state(StateKind::Wall, direction)
    }

    /// Checks everything a controller relies on.
    pub fn validate(&self) -> Result<(), GraphError> {
        let p = &self.params;
        for (name, value) in [
            ("acceleration", p.acceleration),
            ("max_velocity", p.max_velocity),
            ("deceleration_distance", p.deceleration_distance),
            ("proximity_distance", p.proximity_distance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(GraphError::InvalidParameter { name, value });
            }
        }

        if !self.has_state(&p.initial_state) {
            return Err(GraphError::MissingInitialState(p.initial_state.clone()));
        }

        // Sorted so the reported error does not depend on hash order.
        let mut names: Vec<&String> = self.states.keys().collect();
        names.sort();
        for name in names {
            let motion = &self.states[name];
            motion.frames.check().map_err(|fault| match fault {
                SequenceFault::Empty => GraphError::EmptySequence {
                    state: name.clone(),
                },
                SequenceFault::ZeroLengthLoop => GraphError::ZeroLengthLoop {
                    state: name.clone(),
                },
            })?;
            if let Some(next) = &motion.next_state {
                if !self.has_state(next) {
                    return Err(GraphError::UnknownNextState {
                        state: name.clone(),
                        next: next.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
