use std::fs;
use std::path::Path;

use glam::Vec2;
use neko_core::motion::MotionGraph;
use neko_core::time::TimerQueue;
use serde::Deserialize;

use crate::behaviour::Behaviour;
use crate::commands::Command;
use crate::controller::ControllerConfig;
use crate::session::{Session, SessionError};

#[derive(Debug, Deserialize, Clone)]
pub struct ReplayScript {
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    /// Starting centre; a seeded random edge when absent.
    #[serde(default)]
    pub start: Option<Vec2>,
    pub steps: Vec<ReplayStep>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReplayStep {
    #[serde(default)]
    pub at_ms: Option<u64>,
    #[serde(default)]
    pub target: Option<Vec2>,
    #[serde(default)]
    pub force_stop: bool,
    #[serde(default)]
    pub speed: Option<f32>,
    #[serde(default)]
    pub behaviour: Option<Behaviour>,
    #[serde(default = "default_repeat")]
    pub repeat: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimedCommand {
    pub at_ms: u64,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceEntry {
    pub at_ms: u64,
    pub state: String,
    pub position: Vec2,
    pub frame: Option<String>,
}

impl ReplayScript {
    pub fn expanded_commands(&self) -> Vec<TimedCommand> {
        let mut out = Vec::new();
        let mut t = 0u64;
        for step in &self.steps {
            for _ in 0..step.repeat.max(1) {
                if let Some(at) = step.at_ms {
                    t = t.max(at);
                }
                let mut push = |command| out.push(TimedCommand { at_ms: t, command });
                if let Some(speed) = step.speed {
                    push(Command::SetSpeedFactor(speed));
                }
                if let Some(behaviour) = step.behaviour {
                    push(Command::SetBehaviour(behaviour));
                }
                if let Some(target) = step.target {
                    push(Command::SetTarget(target));
                }
                if step.force_stop {
                    push(Command::ForceStop);
                }
                t += self.interval_ms;
            }
        }
        out
    }

    pub fn end_ms(&self) -> u64 {
        let mut t = 0u64;
        for step in &self.steps {
            for _ in 0..step.repeat.max(1) {
                if let Some(at) = step.at_ms {
                    t = t.max(at);
                }
                t += self.interval_ms;
            }
        }
        t
    }
}

pub fn load_replay_from_path(path: &Path) -> Result<ReplayScript, String> {
    let raw =
        fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
    let replay: ReplayScript = serde_json::from_str(&raw)
        .map_err(|e| format!("Failed to parse replay JSON {}: {e}", path.display()))?;
    validate_replay(&replay)?;
    Ok(replay)
}

fn validate_replay(replay: &ReplayScript) -> Result<(), String> {
    if replay.interval_ms == 0 {
        return Err("Replay validation failed: interval_ms must be > 0".to_string());
    }
    if replay.steps.is_empty() {
        return Err("Replay validation failed: steps list is empty".to_string());
    }
    Ok(())
}

pub fn run_replay(
    script: &ReplayScript,
    graph: MotionGraph,
    config: ControllerConfig,
) -> Result<Vec<TraceEntry>, SessionError> {
    let config = ControllerConfig {
        interval_ms: script.interval_ms,
        ..config
    };
    let mut session = Session::new(TimerQueue::new(), config);
    session.install(graph)?;
    match script.start {
        Some(start) => {
            session.set_position(start)?;
            session.force_stop()?;
        }
        None => session.spawn_at_random_edge()?,
    }
    session.start()?;

    let mut trace = Vec::new();
    record(&session, &mut trace);
    for timed in script.expanded_commands() {
        session.run_until_with(timed.at_ms, |s, _| record(s, &mut trace))?;
        session.apply(timed.command)?;
        record(&session, &mut trace);
    }
    session.run_until_with(script.end_ms(), |s, _| record(s, &mut trace))?;
    Ok(trace)
}

fn record(session: &Session<TimerQueue>, trace: &mut Vec<TraceEntry>) {
    let entry = TraceEntry {
        at_ms: session.now_ms(),
        state: session.current_state().unwrap_or_default().to_string(),
        position: session.current_position().unwrap_or_default(),
        frame: session.current_frame().map(|f| f.as_str().to_string()),
    };
    let changed = trace.last().map_or(true, |last: &TraceEntry| {
        last.state != entry.state || last.position != entry.position || last.frame != entry.frame
    });
    if changed {
        trace.push(entry);
    }
}

const fn default_interval() -> u64 {
    125
}

const fn default_repeat() -> u32 {
    1
}
