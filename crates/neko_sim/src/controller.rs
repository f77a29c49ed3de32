//! Movement controller: chases a target point on a fixed tick and picks the
//! matching state from the motion graph.
//!
//! The controller owns the graph it was built with and all per-character
//! state. It never touches timers; the session decides when `tick` and
//! `on_sequence_end` run.

use glam::Vec2;
use neko_core::motion::{Direction, GraphError, MotionGraph};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::behaviour::{random_edge_point, random_tap_point, Behaviour};

/// Window over which a whimsical character grows restless enough to switch
/// strategy.
const BEHAVIOUR_CHANGE_DURATION_MS: u64 = 4000;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub interval_ms: u64,
    /// Rendered sprite size in device pixels.
    pub sprite_size: Vec2,
    pub display_size: Vec2,
    pub speed_factor: f32,
    pub behaviour: Behaviour,
    /// Let a whimsical character occasionally borrow another strategy.
    pub rotate_behaviours: bool,
    /// Play the awake state once while idle at the target, after the idle
    /// chain has settled in a state with no successor.
    pub idle_fidget: bool,
    /// Stop ticking while nothing moves or changes.
    pub park_when_idle: bool,
    /// Fixed RNG seed; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 125,
            sprite_size: Vec2::splat(80.0),
            display_size: Vec2::new(1280.0, 720.0),
            speed_factor: 1.0,
            behaviour: Behaviour::Whimsical,
            rotate_behaviours: false,
            idle_fidget: false,
            park_when_idle: true,
            seed: None,
        }
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub state_changed: bool,
    pub position_changed: bool,
}

impl TickOutcome {
    pub fn any(self) -> bool {
        self.state_changed || self.position_changed
    }
}

/// Per-character state. Positions are sprite centres.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementState {
    pub position: Vec2,
    pub target: Vec2,
    /// px/s
    pub velocity: Vec2,
    pub current_state: String,
    pub is_moving: bool,
    pub behaviour: Behaviour,
    pub behaviour_index: usize,
    pub speed_factor: f32,
}

pub struct MovementController {
    graph: MotionGraph,
    config: ControllerConfig,
    state: MovementState,
    rng: StdRng,
    last_behaviour_change_ms: u64,
    // Set once the idle fidget has played; cleared by travel or a new target.
    fidget_spent: bool,
}

impl MovementController {
    /// Validates the graph and seeds the character in the initial state.
    pub fn new(graph: MotionGraph, config: ControllerConfig) -> Result<Self, GraphError> {
        graph.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = MovementState {
            position: Vec2::ZERO,
            target: Vec2::ZERO,
            velocity: Vec2::ZERO,
            current_state: graph.params().initial_state.clone(),
            is_moving: false,
            behaviour: config.behaviour,
            behaviour_index: config.behaviour.index(),
            speed_factor: 1.0,
        };
        let mut controller = Self {
            graph,
            config,
            state,
            rng,
            last_behaviour_change_ms: 0,
            fidget_spent: false,
        };
        controller.set_speed_factor(controller.config.speed_factor);
        controller.set_display_size(controller.config.display_size);
        Ok(controller)
    }

    /// One fixed step of the chase.
    pub fn tick(&mut self) -> TickOutcome {
        let mut out = TickOutcome::default();
        let params = self.graph.params();
        let proximity = params.proximity_distance;
        let acceleration = params.acceleration * self.state.speed_factor;
        let max_velocity = params.max_velocity * self.state.speed_factor;
        let deceleration_distance = params.deceleration_distance;

        let d = self.state.target - self.state.position;
        let dist = d.length();

        if dist <= proximity {
            if self.state.is_moving {
                self.state.velocity = Vec2::ZERO;
                let arrived = self.graph.params().initial_state.clone();
                self.change_state(&arrived, &mut out);
            } else if self.config.idle_fidget && !self.fidget_spent {
                let awake = &self.graph.params().awake_state;
                let current = &self.state.current_state;
                if current != awake
                    && self.graph.has_state(awake)
                    && self.graph.next_state(current).is_none()
                {
                    let awake = awake.clone();
                    self.change_state(&awake, &mut out);
                    self.fidget_spent = true;
                }
            }
            return out;
        }

        if !self.state.is_moving {
            let awake = &self.graph.params().awake_state;
            if self.graph.has_state(awake) {
                if self.state.current_state != *awake {
                    let awake = awake.clone();
                    self.change_state(&awake, &mut out);
                }
                return out;
            }
        }

        let dt = self.config.interval_ms as f32 / 1000.0;
        self.state.velocity += d / dist * acceleration * dt;

        let speed = self.state.velocity.length();
        let dynamic_max =
            max_velocity * ((dist + 1.0) / (deceleration_distance + 1.0)).clamp(0.0, 1.0);
        if speed > dynamic_max {
            if dynamic_max <= 0.0 {
                self.state.velocity = Vec2::ZERO;
            } else {
                self.state.velocity *= dynamic_max / speed;
            }
        }

        self.state.position += self.state.velocity * dt;
        out.position_changed = true;

        self.change_to_moving_state(&mut out);

        if !self.check_wall(&mut out) {
            self.update_moving_state(&mut out);
        }
        out
    }

    /// Picks what follows the active state's sequence. Returns `true` if the
    /// sequence should be restarted, which may be the same state again.
    pub fn on_sequence_end(&mut self) -> (bool, TickOutcome) {
        let mut out = TickOutcome::default();
        let restart = self.check_wall(&mut out)
            || self.update_moving_state(&mut out)
            || self.change_to_next_state(&mut out);
        (restart, out)
    }

    /// Clamps the character against the screen border. Returns `true` if a
    /// wall state took over.
    pub fn check_wall(&mut self, out: &mut TickOutcome) -> bool {
        if !self.graph.needs_wall_check(&self.state.current_state) {
            return false;
        }

        let half = self.config.sprite_size * 0.5;
        let display = self.config.display_size;
        let low = half;
        let high = (display - half).max(low);
        let p = self.state.position;

        let direction = if p.x < low.x {
            Direction::Left
        } else if p.x > high.x {
            Direction::Right
        } else if p.y < low.y {
            Direction::Up
        } else if p.y > high.y {
            Direction::Down
        } else {
            return false;
        };

        let clamped = p.clamp(low, high);
        if clamped != p {
            out.position_changed = true;
        }
        self.state.position = clamped;
        let v = &mut self.state.velocity;
        if (p.x < low.x && v.x < 0.0) || (p.x > high.x && v.x > 0.0) {
            v.x = 0.0;
        }
        if (p.y < low.y && v.y < 0.0) || (p.y > high.y && v.y > 0.0) {
            v.y = 0.0;
        }
        self.state.target = self.state.target.clamp(low, high);

        let wall = self.graph.wall_state(direction);
        if !self.graph.has_state(&wall) {
            return false;
        }
        self.change_state(&wall, out);
        true
    }

    /// Re-evaluates the heading for states that ask for it while the target
    /// is still out of reach.
    pub fn update_moving_state(&mut self, out: &mut TickOutcome) -> bool {
        if !self.graph.needs_move_check(&self.state.current_state) {
            return false;
        }
        let dist = self.state.position.distance(self.state.target);
        if dist <= self.graph.params().proximity_distance {
            return false;
        }
        self.change_to_moving_state(out);
        true
    }

    pub fn change_to_next_state(&mut self, out: &mut TickOutcome) -> bool {
        let Some(next) = self
            .graph
            .next_state(&self.state.current_state)
            .map(str::to_owned)
        else {
            return false;
        };
        self.change_state(&next, out);
        true
    }

    fn change_to_moving_state(&mut self, out: &mut TickOutcome) {
        // At rest the velocity says nothing; head for the target instead.
        let heading = if self.state.velocity == Vec2::ZERO {
            self.state.target - self.state.position
        } else {
            self.state.velocity
        };
        let name = self.graph.move_state(Direction::from_heading(heading));
        if !self.graph.has_state(&name) {
            return;
        }
        self.change_state(&name, out);
        self.state.is_moving = true;
        self.fidget_spent = false;
    }

    fn change_state(&mut self, name: &str, out: &mut TickOutcome) {
        if self.state.current_state == name {
            return;
        }
        log::debug!("state {} -> {}", self.state.current_state, name);
        self.state.current_state = name.to_string();
        self.state.is_moving = false;
        out.state_changed = true;
    }

    /// Chooses a new target for a request at `point` using the active
    /// behaviour.
    pub fn set_target(&mut self, point: Vec2, now_ms: u64) {
        if self.config.rotate_behaviours {
            self.maybe_rotate_behaviour(now_ms);
        } else {
            self.state.behaviour_index = self.state.behaviour.index();
        }
        let strategy = Behaviour::ALL[self.state.behaviour_index];
        let target = strategy.pick_target(
            point,
            self.state.position,
            self.config.display_size,
            &mut self.rng,
        );
        self.set_target_direct(target);
    }

    // The longer the current strategy has been in use, the likelier a re-roll.
    fn maybe_rotate_behaviour(&mut self, now_ms: u64) {
        if self.state.behaviour != Behaviour::Whimsical {
            return;
        }
        let r = now_ms.saturating_sub(self.last_behaviour_change_ms) as f64
            / BEHAVIOUR_CHANGE_DURATION_MS as f64;
        if self.rng.gen::<f64>() * r > 1.0 {
            let next = self.rng.gen_range(0..Behaviour::ALL.len());
            if next != self.state.behaviour_index {
                log::debug!("behaviour rotates to {}", Behaviour::ALL[next]);
                self.last_behaviour_change_ms = now_ms;
            }
            self.state.behaviour_index = next;
        }
    }

    pub fn set_target_direct(&mut self, target: Vec2) {
        self.state.target = target;
        self.fidget_spent = false;
    }

    /// Drops the current target. Calling it twice is the same as once.
    pub fn force_stop(&mut self) {
        self.state.target = self.state.position;
        self.state.velocity = Vec2::ZERO;
    }

    pub fn set_speed_factor(&mut self, factor: f32) {
        self.state.speed_factor = if factor > 0.0 && factor.is_finite() {
            factor
        } else {
            log::warn!("Ignoring non-positive speed factor {factor}; using 1.0");
            1.0
        };
    }

    pub fn set_behaviour(&mut self, behaviour: Behaviour) {
        self.state.behaviour = behaviour;
        self.state.behaviour_index = behaviour.index();
        self.last_behaviour_change_ms = 0;
    }

    pub fn set_display_size(&mut self, size: Vec2) {
        self.config.display_size = size.max(Vec2::ONE);
    }

    pub fn set_sprite_size(&mut self, size: Vec2) {
        self.config.sprite_size = size.max(Vec2::ZERO);
    }

    pub fn set_position(&mut self, position: Vec2) {
        self.state.position = position;
    }

    /// Places the character on a random screen edge, heading for the centre.
    pub fn spawn_at_random_edge(&mut self) {
        let display = self.config.display_size;
        self.state.position = random_edge_point(display, &mut self.rng);
        self.state.target = (display * 0.5).floor();
        self.state.velocity = Vec2::ZERO;
    }

    /// A simulated outside tap from the controller's RNG.
    pub fn random_tap(&mut self) -> Vec2 {
        random_tap_point(self.config.display_size, &mut self.rng)
    }

    /// Sprite origin for rendering.
    pub fn top_left(&self) -> Vec2 {
        self.state.position - self.config.sprite_size * 0.5
    }

    pub fn graph(&self) -> &MotionGraph {
        &self.graph
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> &MovementState {
        &self.state
    }

    pub fn current_state(&self) -> &str {
        &self.state.current_state
    }

    pub fn position(&self) -> Vec2 {
        self.state.position
    }

    pub fn target(&self) -> Vec2 {
        self.state.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use neko_core::motion::{Motion, MotionParams};
    use neko_core::sequence::FrameSequence;

    fn frames(name: &str) -> FrameSequence {
        FrameSequence::from_frames([(name, 125)])
    }

    fn mover(name: &str) -> Motion {
        Motion::new(name, frames(name)).with_check_wall(true)
    }

    /// Stop plus all eight move states and the four walls; no awake state.
    fn roaming_graph() -> MotionGraph {
        let mut graph = MotionGraph::new(MotionParams::default())
            .with_motion(Motion::new("stop", frames("stop")));
        for dir in Direction::ALL {
            graph.insert(mover(&format!("move{}", dir.suffix())));
        }
        for dir in Direction::CARDINAL {
            let name = format!("wall{}", dir.suffix());
            graph.insert(Motion::new(name.clone(), frames(&name)).with_next_state("stop"));
        }
        graph
    }

    fn controller(graph: MotionGraph) -> MovementController {
        let config = ControllerConfig {
            display_size: Vec2::new(400.0, 400.0),
            sprite_size: Vec2::new(40.0, 40.0),
            seed: Some(7),
            ..ControllerConfig::default()
        };
        MovementController::new(graph, config).expect("valid graph")
    }

    #[test]
    fn starts_in_initial_state() {
        let c = controller(roaming_graph());
        assert_eq!(c.current_state(), "stop");
        assert!(!c.state().is_moving);
    }

    #[test]
    fn rejects_invalid_graph() {
        let graph = MotionGraph::new(MotionParams::default())
            .with_motion(Motion::new("idle", frames("idle")));
        assert!(matches!(
            MovementController::new(graph, ControllerConfig::default()),
            Err(GraphError::MissingInitialState(_))
        ));
    }

    #[test]
    fn wall_contact_clamps_and_switches() {
        let mut c = controller(roaming_graph());
        c.set_position(Vec2::new(5.0, 200.0));
        c.set_target_direct(Vec2::new(300.0, 200.0));

        let out = c.tick();
        assert!(out.state_changed);
        assert_eq!(c.current_state(), "wallLeft");
        assert_eq!(c.position().x, 20.0);
        assert_eq!(c.target(), Vec2::new(300.0, 200.0));
        assert!(c.state().velocity.x >= 0.0);
    }

    #[test]
    fn wall_contact_keeps_target_and_walks_on() {
        let graph = roaming_graph()
            .with_motion(Motion::new("awake", frames("awake")).with_check_move(true));
        let mut c = controller(graph);
        c.set_position(Vec2::new(5.0, 200.0));
        c.set_target_direct(Vec2::new(300.0, 200.0));
        c.change_to_moving_state(&mut TickOutcome::default());

        c.tick();
        assert_eq!(c.current_state(), "wallLeft");

        // Wall ends; the character wakes and heads off again.
        c.tick();
        assert_eq!(c.current_state(), "awake");
        let (restart, _) = c.on_sequence_end();
        assert!(restart);
        assert_eq!(c.current_state(), "moveRight");
        for _ in 0..200 {
            c.tick();
        }
        assert!(c.position().distance(Vec2::new(300.0, 200.0)) <= 10.0);
        assert_eq!(c.current_state(), "stop");
    }

    #[test]
    fn wall_clamp_without_wall_state_keeps_moving() {
        let graph = MotionGraph::new(MotionParams::default())
            .with_motion(Motion::new("stop", frames("stop")))
            .with_motion(mover("moveRight"));
        let mut c = controller(graph);
        c.set_position(Vec2::new(5.0, 200.0));
        c.set_target_direct(Vec2::new(300.0, 200.0));

        c.tick();
        assert_eq!(c.current_state(), "moveRight");
        assert_eq!(c.position().x, 20.0);
        assert!(c.state().is_moving);
    }

    #[test]
    fn heading_selects_directional_state() {
        let mut c = controller(roaming_graph());
        c.set_position(Vec2::new(200.0, 200.0));
        c.set_target_direct(Vec2::new(100.0, 100.0));
        c.tick();
        assert_eq!(c.current_state(), "moveUpLeft");

        let mut c = controller(roaming_graph());
        c.set_position(Vec2::new(200.0, 100.0));
        c.set_target_direct(Vec2::new(200.0, 300.0));
        c.tick();
        assert_eq!(c.current_state(), "moveDown");
    }

    #[test]
    fn converges_and_arrives() {
        let mut c = controller(roaming_graph());
        c.set_position(Vec2::new(50.0, 200.0));
        c.set_target_direct(Vec2::new(350.0, 200.0));

        let mut last = c.position().distance(c.target());
        let mut arrived_after = None;
        for i in 0..2000 {
            c.tick();
            let dist = c.position().distance(c.target());
            assert!(dist <= last + 1e-3, "tick {i}: {dist} > {last}");
            last = dist;
            if !c.state().is_moving && c.current_state() == "stop" && i > 0 {
                arrived_after = Some(i);
                break;
            }
        }
        assert!(arrived_after.is_some(), "never arrived, {last} px left");
        assert!(last <= MotionParams::default().proximity_distance);
        assert_eq!(c.state().velocity, Vec2::ZERO);
    }

    #[test]
    fn awake_state_precedes_travel() {
        let graph = roaming_graph()
            .with_motion(Motion::new("awake", frames("awake")).with_check_move(true));
        let mut c = controller(graph);
        c.set_position(Vec2::new(200.0, 200.0));
        c.set_target_direct(Vec2::new(350.0, 200.0));

        assert!(c.tick().state_changed);
        assert_eq!(c.current_state(), "awake");
        assert!(!c.tick().any());

        let (restart, out) = c.on_sequence_end();
        assert!(restart);
        assert!(out.state_changed);
        assert_eq!(c.current_state(), "moveRight");
        assert!(c.state().is_moving);
    }

    #[test]
    fn sequence_end_follows_next_state() {
        let mut c = controller(roaming_graph());
        c.set_position(Vec2::new(5.0, 200.0));
        c.set_target_direct(Vec2::new(300.0, 200.0));
        c.tick();
        assert_eq!(c.current_state(), "wallLeft");

        let (restart, _) = c.on_sequence_end();
        assert!(restart);
        assert_eq!(c.current_state(), "stop");

        let (restart, out) = c.on_sequence_end();
        assert!(!restart);
        assert!(!out.any());
    }

    #[test]
    fn moving_state_restarts_on_sequence_end() {
        let graph = roaming_graph()
            .with_motion(Motion::new("moveRight", frames("mr")).with_check_move(true));
        let mut c = controller(graph);
        c.set_position(Vec2::new(100.0, 200.0));
        c.set_target_direct(Vec2::new(350.0, 200.0));
        c.tick();
        assert_eq!(c.current_state(), "moveRight");

        let (restart, out) = c.on_sequence_end();
        assert!(restart);
        assert!(!out.state_changed);
    }

    #[test]
    fn force_stop_is_idempotent() {
        let mut c = controller(roaming_graph());
        c.set_position(Vec2::new(100.0, 100.0));
        c.set_target_direct(Vec2::new(300.0, 300.0));
        c.tick();
        c.tick();

        c.force_stop();
        let once = c.state().clone();
        c.force_stop();
        assert_eq!(c.state(), &once);
        assert_eq!(once.target, once.position);
        assert_eq!(once.velocity, Vec2::ZERO);
    }

    #[test]
    fn non_positive_speed_falls_back_to_one() {
        let mut c = controller(roaming_graph());
        c.set_speed_factor(2.5);
        assert_eq!(c.state().speed_factor, 2.5);
        c.set_speed_factor(0.0);
        assert_eq!(c.state().speed_factor, 1.0);
        c.set_speed_factor(-3.0);
        assert_eq!(c.state().speed_factor, 1.0);
    }

    #[test]
    fn closer_behaviour_targets_tap() {
        let mut c = controller(roaming_graph());
        c.set_behaviour(Behaviour::Closer);
        c.set_target(Vec2::new(12.0, 34.0), 0);
        assert_eq!(c.target(), Vec2::new(12.0, 34.0));
    }

    #[test]
    fn rotation_only_applies_to_whimsical() {
        let config = ControllerConfig {
            rotate_behaviours: true,
            behaviour: Behaviour::Closer,
            seed: Some(11),
            ..ControllerConfig::default()
        };
        let mut c = MovementController::new(roaming_graph(), config).expect("valid graph");
        for t in 0..50 {
            c.set_target(Vec2::new(10.0, 10.0), t * 10_000);
            assert_eq!(c.target(), Vec2::new(10.0, 10.0));
        }
    }

    #[test]
    fn spawn_lands_on_edge_and_targets_centre() {
        let mut c = controller(roaming_graph());
        c.spawn_at_random_edge();
        let p = c.position();
        assert!(p.x == 0.0 || p.x == 400.0 || p.y == 0.0 || p.y == 400.0);
        assert_eq!(c.target(), Vec2::new(200.0, 200.0));
        assert_eq!(c.top_left(), p - Vec2::splat(20.0));
    }

    #[test]
    fn idle_fidget_is_opt_in() {
        let graph = roaming_graph().with_motion(Motion::new("awake", frames("awake")));
        let mut c = controller(graph.clone());
        c.set_position(Vec2::new(200.0, 200.0));
        c.set_target_direct(Vec2::new(200.0, 200.0));
        assert!(!c.tick().any());

        let config = ControllerConfig {
            idle_fidget: true,
            seed: Some(1),
            ..ControllerConfig::default()
        };
        let mut c = MovementController::new(graph, config).expect("valid graph");
        c.set_position(Vec2::new(200.0, 200.0));
        c.set_target_direct(Vec2::new(200.0, 200.0));
        assert!(c.tick().state_changed);
        assert_eq!(c.current_state(), "awake");
    }

    #[test]
    fn idle_fidget_waits_for_settled_state_and_plays_once() {
        let graph = roaming_graph()
            .with_motion(Motion::new("stop", frames("stop")).with_next_state("sleep"))
            .with_motion(Motion::new("sleep", frames("sleep")))
            .with_motion(Motion::new("awake", frames("awake")).with_next_state("stop"));
        let config = ControllerConfig {
            idle_fidget: true,
            seed: Some(1),
            ..ControllerConfig::default()
        };
        let mut c = MovementController::new(graph, config).expect("valid graph");
        c.set_position(Vec2::new(200.0, 200.0));
        c.set_target_direct(Vec2::new(200.0, 200.0));

        // Stop still has a successor, so no fidget yet.
        assert!(!c.tick().any());
        assert!(c.on_sequence_end().0);
        assert_eq!(c.current_state(), "sleep");

        assert!(c.tick().state_changed);
        assert_eq!(c.current_state(), "awake");
        assert!(c.on_sequence_end().0);
        assert!(c.on_sequence_end().0);
        assert_eq!(c.current_state(), "sleep");
        assert!(!c.tick().any());
        assert_eq!(c.current_state(), "sleep");
    }
}
