//! Skin definition files.
//!
//! A skin is a JSON document describing the motion graph of one character:
//! global tuning parameters plus one entry per named state. Frames are named
//! by image file stem relative to the skin directory; resolving them to
//! pixels is left to the renderer.
//!
//! Durations use `-1` for "unknown", repeat counts use `-1` for "forever".
//! An item with `start`/`end` expands to a numbered range of frames:
//! `{ "frame": "run1", "start": 1, "end": 3 }` yields `run001`..`run003`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use neko_core::motion::{Motion, MotionGraph, MotionParams};
use neko_core::sequence::{authored_duration, authored_repeat, FrameHandle, FrameSequence};
use serde::Deserialize;

/// Image extensions tried, in order, when resolving a frame name.
pub const FRAME_EXTENSIONS: [&str; 4] = ["png", "webp", "jpg", "jpeg"];

/// A parsed skin. The graph has not been validated yet.
#[derive(Debug, Clone)]
pub struct Skin {
    pub skin_id: String,
    pub graph: MotionGraph,
}

// --- JSON deserialization types (private) ---

#[derive(Debug, Deserialize)]
struct SkinFileJson {
    version: String,
    skin_id: String,
    #[serde(default)]
    params: ParamsJson,
    motions: Vec<MotionJson>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct ParamsJson {
    acceleration: f32,
    max_velocity: f32,
    #[serde(alias = "deacceleration_distance")]
    deceleration_distance: f32,
    proximity_distance: f32,
    initial_state: String,
    awake_state: String,
    move_state_prefix: String,
    wall_state_prefix: String,
}

impl Default for ParamsJson {
    fn default() -> Self {
        let p = MotionParams::default();
        Self {
            acceleration: p.acceleration,
            max_velocity: p.max_velocity,
            deceleration_distance: p.deceleration_distance,
            proximity_distance: p.proximity_distance,
            initial_state: p.initial_state,
            awake_state: p.awake_state,
            move_state_prefix: p.move_state_prefix,
            wall_state_prefix: p.wall_state_prefix,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MotionJson {
    state: String,
    #[serde(default = "unknown")]
    duration_ms: i64,
    #[serde(default)]
    next_state: Option<String>,
    #[serde(default)]
    check_move: bool,
    #[serde(default)]
    check_wall: bool,
    items: Vec<ItemJson>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ItemJson {
    Repeat { repeat: RepeatJson },
    Frame(FrameJson),
}

#[derive(Debug, Deserialize)]
struct RepeatJson {
    #[serde(default = "unknown")]
    count: i64,
    #[serde(default = "unknown")]
    duration_ms: i64,
    items: Vec<ItemJson>,
}

#[derive(Debug, Deserialize)]
struct FrameJson {
    frame: String,
    #[serde(default = "unknown")]
    duration_ms: i64,
    #[serde(default)]
    start: i64,
    #[serde(default = "unknown")]
    end: i64,
}

const fn unknown() -> i64 {
    -1
}

/// Parses a skin document. Distance parameters are multiplied by `density`.
pub fn parse_skin(raw: &str, density: f32) -> Result<Skin, String> {
    let json: SkinFileJson =
        serde_json::from_str(raw).map_err(|e| format!("Failed to parse skin JSON: {e}"))?;
    validate_skin_json(&json)?;
    Ok(build_skin(json, density))
}

/// Loads and parses a skin file from disk.
pub fn load_skin_from_path(path: &Path, density: f32) -> Result<Skin, String> {
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read skin file {}: {e}", path.display()))?;
    parse_skin(&raw, density).map_err(|e| format!("{}: {e}", path.display()))
}

fn validate_skin_json(json: &SkinFileJson) -> Result<(), String> {
    if json.version != "0.1" {
        return Err(format!(
            "Skin validation failed: unsupported version '{}'",
            json.version
        ));
    }
    if json.skin_id.is_empty() {
        return Err("Skin validation failed: skin_id is empty".to_string());
    }
    if json.motions.is_empty() {
        return Err("Skin validation failed: no motions defined".to_string());
    }
    let mut seen = HashSet::new();
    for motion in &json.motions {
        if motion.state.is_empty() {
            return Err("Skin validation failed: motion with empty state name".to_string());
        }
        if !seen.insert(motion.state.as_str()) {
            return Err(format!(
                "Skin validation failed: state '{}' is defined twice",
                motion.state
            ));
        }
        validate_items(&motion.state, &motion.items)?;
    }
    Ok(())
}

fn validate_items(state: &str, items: &[ItemJson]) -> Result<(), String> {
    for item in items {
        match item {
            ItemJson::Frame(frame) if frame.frame.trim().is_empty() => {
                return Err(format!(
                    "Skin validation failed: state '{}' has a frame with no name",
                    state
                ));
            }
            ItemJson::Frame(_) => {}
            ItemJson::Repeat { repeat } => validate_items(state, &repeat.items)?,
        }
    }
    Ok(())
}

fn build_skin(json: SkinFileJson, density: f32) -> Skin {
    let p = json.params;
    let params = MotionParams {
        acceleration: p.acceleration,
        max_velocity: p.max_velocity,
        deceleration_distance: p.deceleration_distance,
        proximity_distance: p.proximity_distance,
        initial_state: p.initial_state,
        awake_state: p.awake_state,
        move_state_prefix: p.move_state_prefix,
        wall_state_prefix: p.wall_state_prefix,
    }
    .scaled(density);

    let mut graph = MotionGraph::new(params);
    for m in json.motions {
        // The top level of every motion plays once; only its cap is authored.
        let frames = build_sequence(&m.items)
            .with_total_duration(authored_duration(m.duration_ms))
            .with_repeat_count(Some(1));
        let mut motion = Motion::new(m.state, frames)
            .with_check_move(m.check_move)
            .with_check_wall(m.check_wall);
        motion.next_state = m.next_state.filter(|s| !s.is_empty());
        graph.insert(motion);
    }

    Skin {
        skin_id: json.skin_id,
        graph,
    }
}

fn build_sequence(items: &[ItemJson]) -> FrameSequence {
    let mut seq = FrameSequence::new();
    for item in items {
        match item {
            ItemJson::Frame(frame) => push_frames(&mut seq, frame),
            ItemJson::Repeat { repeat } => {
                let group = build_sequence(&repeat.items)
                    .with_total_duration(authored_duration(repeat.duration_ms))
                    .with_repeat_count(authored_repeat(repeat.count));
                seq.push_group(group);
            }
        }
    }
    seq
}

fn push_frames(seq: &mut FrameSequence, frame: &FrameJson) {
    let name = frame.frame.trim();
    let duration = authored_duration(frame.duration_ms);
    if frame.end > frame.start {
        let prefix = name.trim_end_matches(|c: char| c.is_ascii_digit());
        for i in frame.start..=frame.end {
            seq.push_frame(FrameHandle::new(format!("{prefix}{i:03}")), duration);
        }
    } else {
        seq.push_frame(name, duration);
    }
}

/// First existing image file for `frame` under `dir`.
pub fn resolve_frame_file(dir: &Path, frame: &FrameHandle) -> Option<PathBuf> {
    FRAME_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{ext}", frame.as_str())))
        .find(|path| path.is_file())
}

/// Checks that every frame of every state resolves to an image under `dir`.
pub fn validate_frame_files(graph: &MotionGraph, dir: &Path) -> Result<(), String> {
    let mut motions: Vec<&Motion> = graph.motions().collect();
    motions.sort_by(|a, b| a.name.cmp(&b.name));
    for motion in motions {
        for frame in motion.frames.frames() {
            if resolve_frame_file(dir, frame).is_none() {
                return Err(format!(
                    "Skin state '{}' references missing frame image '{}' in {}",
                    motion.name,
                    frame,
                    dir.display()
                ));
            }
        }
    }
    Ok(())
}
