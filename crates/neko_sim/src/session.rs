//! Session driver: owns the controller, the frame player and the timers.
//!
//! Two logical timers exist while running. The tick timer drives movement at
//! the configured interval and is parked while nothing changes; anything that
//! may start movement again wakes it. The frame timer follows the active
//! sequence's next deadline. Everything runs on the host's loop; other
//! threads talk to the session through [`CommandSender`].

use glam::Vec2;
use neko_core::motion::{GraphError, MotionGraph};
use neko_core::playback::{PlaybackEvent, SequencePlayer};
use neko_core::sequence::FrameHandle;
use neko_core::time::{Scheduler, SchedulerError, TimerHandle, TimerQueue, TimerToken};
use thiserror::Error;

use crate::behaviour::Behaviour;
use crate::commands::{Command, CommandQueue, CommandSender};
use crate::controller::{ControllerConfig, MovementController, TickOutcome};

/// Sequence ends handled at one instant before playback is stopped. Only a
/// cycle of successor states that all finish instantly can reach it.
const MAX_SEQUENCE_ENDS_PER_INSTANT: u32 = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("scheduler failed: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("no motion graph installed")]
    NotInstalled,
    #[error("session halted after a scheduler failure")]
    Halted,
}

/// Everything a renderer needs for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderView {
    pub frame: FrameHandle,
    pub top_left: Vec2,
    pub alpha: u8,
}

pub struct Session<S: Scheduler> {
    scheduler: S,
    config: ControllerConfig,
    controller: Option<MovementController>,
    player: SequencePlayer,
    commands: CommandQueue,
    tick_timer: Option<TimerHandle>,
    frame_timer: Option<(TimerHandle, u64)>,
    ends_at_instant: (u64, u32),
    alpha: u8,
    running: bool,
    halted: bool,
}

impl<S: Scheduler> Session<S> {
    pub fn new(scheduler: S, mut config: ControllerConfig) -> Self {
        if config.interval_ms == 0 {
            log::warn!("Tick interval of 0ms is not allowed; using 1ms");
            config.interval_ms = 1;
        }
        Self {
            scheduler,
            config,
            controller: None,
            player: SequencePlayer::new(),
            commands: CommandQueue::new(),
            tick_timer: None,
            frame_timer: None,
            ends_at_instant: (0, 0),
            alpha: u8::MAX,
            running: false,
            halted: false,
        }
    }

    /// Validates and installs a graph, replacing any previous one along with
    /// its movement state. The session is left stopped.
    pub fn install(&mut self, graph: MotionGraph) -> Result<(), GraphError> {
        let controller = MovementController::new(graph, self.config.clone())?;
        self.stop();
        self.player.reset();
        log::info!(
            "Installed motion graph with {} states; initial state '{}'",
            controller.graph().len(),
            controller.current_state()
        );
        self.controller = Some(controller);
        self.halted = false;
        Ok(())
    }

    /// Starts playback of the current state and wakes the tick timer.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.halted {
            return Err(SessionError::Halted);
        }
        let Some(controller) = &self.controller else {
            return Err(SessionError::NotInstalled);
        };
        if self.running {
            return Ok(());
        }
        log::info!("Session started in state '{}'", controller.current_state());
        self.running = true;
        let now = self.scheduler.now_ms();
        self.restart_sequence(now)?;
        self.wake()
    }

    /// Cancels both timers. The last frame stays visible. Idempotent.
    pub fn stop(&mut self) {
        if let Some(handle) = self.tick_timer.take() {
            self.scheduler.cancel(handle);
        }
        if let Some((handle, _)) = self.frame_timer.take() {
            self.scheduler.cancel(handle);
        }
        self.player.stop();
        if self.running {
            log::info!("Session stopped");
        }
        self.running = false;
    }

    /// Host entry point for a fired timer. Stale handles are ignored.
    pub fn fire(&mut self, handle: TimerHandle, token: TimerToken) -> Result<(), SessionError> {
        if self.halted {
            return Err(SessionError::Halted);
        }
        if !self.running {
            return Ok(());
        }
        match token {
            TimerToken::Tick => {
                if self.tick_timer != Some(handle) {
                    return Ok(());
                }
                self.tick_timer = None;
            }
            TimerToken::FrameAdvance => {
                if self.frame_timer.map(|(h, _)| h) != Some(handle) {
                    return Ok(());
                }
                self.frame_timer = None;
            }
        }

        self.apply_commands()?;
        match token {
            TimerToken::Tick => {
                let out = self.run_tick()?;
                if out.any() || !self.config.park_when_idle {
                    if let Some(handle) = self.tick_timer.take() {
                        self.scheduler.cancel(handle);
                    }
                    let handle = self.schedule(self.config.interval_ms, TimerToken::Tick)?;
                    self.tick_timer = Some(handle);
                } else if self.tick_timer.is_none() {
                    log::trace!("Nothing moved; parking tick timer");
                }
            }
            TimerToken::FrameAdvance => {
                let now = self.scheduler.now_ms();
                self.advance_frames(now)?;
            }
        }
        Ok(())
    }

    /// One movement step outside the timer flow. Does not re-arm the tick
    /// timer.
    pub fn tick(&mut self) -> Result<TickOutcome, SessionError> {
        if self.halted {
            return Err(SessionError::Halted);
        }
        self.apply_commands()?;
        self.run_tick()
    }

    /// Applies commands queued by other threads. Hosts call this when they
    /// know something was sent while the session was parked.
    pub fn process_commands(&mut self) -> Result<(), SessionError> {
        if self.halted {
            return Err(SessionError::Halted);
        }
        self.apply_commands()
    }

    fn apply_commands(&mut self) -> Result<(), SessionError> {
        for command in self.commands.drain() {
            self.apply(command)?;
        }
        Ok(())
    }

    pub fn apply(&mut self, command: Command) -> Result<(), SessionError> {
        log::debug!("Applying {command:?}");
        match command {
            Command::SetTarget(point) => self.set_target(point)?,
            Command::ForceStop => self.force_stop()?,
            Command::SetSpeedFactor(factor) => self.set_speed_factor(factor),
            Command::SetBehaviour(behaviour) => self.set_behaviour(behaviour),
            Command::SetDisplaySize(size) => self.set_display_size(size),
            Command::SetSpriteSize(size) => self.set_sprite_size(size),
            Command::SetTransparency(t) => self.set_transparency(t),
        }
        Ok(())
    }

    fn run_tick(&mut self) -> Result<TickOutcome, SessionError> {
        let now = self.scheduler.now_ms();
        let controller = self.controller.as_mut().ok_or(SessionError::NotInstalled)?;
        let out = controller.tick();
        if out.state_changed && self.running {
            self.restart_sequence(now)?;
        }
        Ok(out)
    }

    fn restart_sequence(&mut self, now: u64) -> Result<(), SessionError> {
        let controller = self.controller.as_ref().ok_or(SessionError::NotInstalled)?;
        let event = match controller.graph().frames_for(controller.current_state()) {
            Some(seq) => self.player.start(seq, now),
            None => {
                log::warn!("State '{}' has no frames", controller.current_state());
                self.player.reset();
                PlaybackEvent::Unchanged
            }
        };
        if let PlaybackEvent::Ended { at_ms } = event {
            self.finish_sequence(at_ms)?;
        }
        self.sync_frame_timer()
    }

    fn advance_frames(&mut self, now: u64) -> Result<(), SessionError> {
        let controller = self.controller.as_ref().ok_or(SessionError::NotInstalled)?;
        let event = match controller.graph().frames_for(controller.current_state()) {
            Some(seq) => self.player.advance_to(seq, now),
            None => PlaybackEvent::Unchanged,
        };
        if let PlaybackEvent::Ended { at_ms } = event {
            self.finish_sequence(at_ms)?;
        }
        self.sync_frame_timer()
    }

    /// Lets the controller pick a successor and plays it. Successors that
    /// end as soon as they start are chained at the same instant.
    fn finish_sequence(&mut self, at_ms: u64) -> Result<(), SessionError> {
        loop {
            let (last_at, count) = self.ends_at_instant;
            let count = if last_at == at_ms { count + 1 } else { 1 };
            self.ends_at_instant = (at_ms, count);
            if count > MAX_SEQUENCE_ENDS_PER_INSTANT {
                log::warn!(
                    "{count} sequences ended at t={at_ms}ms; holding the current frame"
                );
                self.player.stop();
                return Ok(());
            }

            let controller = self.controller.as_mut().ok_or(SessionError::NotInstalled)?;
            let (restart, _) = controller.on_sequence_end();
            if !restart {
                return Ok(());
            }
            let ended = match controller.graph().frames_for(controller.current_state()) {
                Some(seq) => self.player.start(seq, at_ms).is_end(),
                None => {
                    self.player.reset();
                    false
                }
            };
            self.wake()?;
            if !ended {
                return Ok(());
            }
        }
    }

    fn sync_frame_timer(&mut self) -> Result<(), SessionError> {
        let desired = self.player.next_deadline();
        if let Some((handle, due)) = self.frame_timer {
            if Some(due) == desired {
                return Ok(());
            }
            self.scheduler.cancel(handle);
            self.frame_timer = None;
        }
        if let Some(due) = desired {
            let delay = due.saturating_sub(self.scheduler.now_ms());
            let handle = self.schedule(delay, TimerToken::FrameAdvance)?;
            self.frame_timer = Some((handle, due));
        }
        Ok(())
    }

    /// Re-arms a parked tick timer to fire right away.
    fn wake(&mut self) -> Result<(), SessionError> {
        if self.running && self.tick_timer.is_none() {
            let handle = self.schedule(0, TimerToken::Tick)?;
            self.tick_timer = Some(handle);
        }
        Ok(())
    }

    fn schedule(&mut self, delay_ms: u64, token: TimerToken) -> Result<TimerHandle, SessionError> {
        self.scheduler
            .schedule(delay_ms, token)
            .map_err(|err| self.halt(err))
    }

    fn halt(&mut self, err: SchedulerError) -> SessionError {
        log::error!("Scheduler failed: {err}; halting session");
        self.stop();
        self.halted = true;
        SessionError::Scheduler(err)
    }

    pub fn set_target(&mut self, point: Vec2) -> Result<(), SessionError> {
        let now = self.scheduler.now_ms();
        let controller = self.controller.as_mut().ok_or(SessionError::NotInstalled)?;
        controller.set_target(point, now);
        self.wake()
    }

    pub fn force_stop(&mut self) -> Result<(), SessionError> {
        let controller = self.controller.as_mut().ok_or(SessionError::NotInstalled)?;
        controller.force_stop();
        self.wake()
    }

    pub fn set_position(&mut self, position: Vec2) -> Result<(), SessionError> {
        let controller = self.controller.as_mut().ok_or(SessionError::NotInstalled)?;
        controller.set_position(position);
        self.wake()
    }

    /// Places the character on a random edge heading for the screen centre.
    pub fn spawn_at_random_edge(&mut self) -> Result<(), SessionError> {
        let controller = self.controller.as_mut().ok_or(SessionError::NotInstalled)?;
        controller.spawn_at_random_edge();
        self.wake()
    }

    /// A simulated outside tap drawn from the controller's RNG.
    pub fn random_tap_point(&mut self) -> Option<Vec2> {
        self.controller.as_mut().map(MovementController::random_tap)
    }

    pub fn set_speed_factor(&mut self, factor: f32) {
        self.config.speed_factor = factor;
        if let Some(controller) = self.controller.as_mut() {
            controller.set_speed_factor(factor);
        }
    }

    pub fn set_behaviour(&mut self, behaviour: Behaviour) {
        self.config.behaviour = behaviour;
        if let Some(controller) = self.controller.as_mut() {
            controller.set_behaviour(behaviour);
        }
    }

    pub fn set_display_size(&mut self, size: Vec2) {
        self.config.display_size = size.max(Vec2::ONE);
        if let Some(controller) = self.controller.as_mut() {
            controller.set_display_size(size);
        }
    }

    pub fn set_sprite_size(&mut self, size: Vec2) {
        self.config.sprite_size = size.max(Vec2::ZERO);
        if let Some(controller) = self.controller.as_mut() {
            controller.set_sprite_size(size);
        }
    }

    /// `0.0` is opaque, `1.0` invisible.
    pub fn set_transparency(&mut self, transparency: f32) {
        let opacity = 1.0 - transparency.clamp(0.0, 1.0);
        self.alpha = (opacity * 255.0).round() as u8;
    }

    pub fn alpha(&self) -> u8 {
        self.alpha
    }

    pub fn sender(&self) -> CommandSender {
        self.commands.sender()
    }

    pub fn current_frame(&self) -> Option<FrameHandle> {
        let controller = self.controller.as_ref()?;
        let seq = controller.graph().frames_for(controller.current_state())?;
        self.player.current_frame(seq).cloned()
    }

    /// Sprite centre in device pixels.
    pub fn current_position(&self) -> Option<Vec2> {
        self.controller.as_ref().map(MovementController::position)
    }

    pub fn current_state(&self) -> Option<&str> {
        self.controller.as_ref().map(MovementController::current_state)
    }

    pub fn render_view(&self) -> Option<RenderView> {
        let controller = self.controller.as_ref()?;
        Some(RenderView {
            frame: self.current_frame()?,
            top_left: controller.top_left(),
            alpha: self.alpha,
        })
    }

    pub fn controller(&self) -> Option<&MovementController> {
        self.controller.as_ref()
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn now_ms(&self) -> u64 {
        self.scheduler.now_ms()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Running with the tick timer parked.
    pub fn is_parked(&self) -> bool {
        self.running && self.tick_timer.is_none()
    }
}

impl Session<TimerQueue> {
    /// Fires every timer due up to `until_ms` and leaves the clock there.
    pub fn run_until(&mut self, until_ms: u64) -> Result<(), SessionError> {
        self.run_until_with(until_ms, |_, _| {})
    }

    /// Like [`Session::run_until`], calling `observe` after each callback.
    pub fn run_until_with<F>(&mut self, until_ms: u64, mut observe: F) -> Result<(), SessionError>
    where
        F: FnMut(&Self, TimerToken),
    {
        self.process_commands()?;
        while let Some((handle, token)) = self.scheduler.pop_due(until_ms) {
            self.fire(handle, token)?;
            observe(self, token);
        }
        self.scheduler.advance_clock(until_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skin::parse_skin;
    use neko_core::motion::{Direction, Motion, MotionParams};
    use neko_core::sequence::FrameSequence;

    const BUNDLED_SKIN: &str = include_str!("../../../assets/skins/neko/skin.json");

    fn looping(frames: &[(&str, u64)]) -> FrameSequence {
        FrameSequence::from_frames(frames.iter().copied()).with_repeat_count(None)
    }

    /// A small cat: stop idles into sleep, awake hands over to the move
    /// states, walls fall back to stop.
    fn cat_graph() -> MotionGraph {
        let mut graph = MotionGraph::new(MotionParams::default())
            .with_motion(
                Motion::new("stop", FrameSequence::from_frames([("stop0", 250), ("stop1", 250)]))
                    .with_next_state("sleep"),
            )
            .with_motion(Motion::new("sleep", looping(&[("sleep0", 500), ("sleep1", 500)])))
            .with_motion(
                Motion::new("awake", FrameSequence::from_frames([("awake", 250)]))
                    .with_check_move(true),
            );
        for dir in Direction::ALL {
            let name = format!("move{}", dir.suffix());
            let seq = FrameSequence::from_frames([
                (format!("{name}0").as_str(), 125),
                (format!("{name}1").as_str(), 125),
            ]);
            graph.insert(
                Motion::new(name, seq)
                    .with_check_move(true)
                    .with_check_wall(true),
            );
        }
        for dir in Direction::CARDINAL {
            let name = format!("wall{}", dir.suffix());
            let seq = FrameSequence::from_frames([(name.as_str(), 250)]).with_repeat_count(Some(2));
            graph.insert(Motion::new(name, seq).with_next_state("stop"));
        }
        graph
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            display_size: Vec2::new(400.0, 400.0),
            sprite_size: Vec2::splat(40.0),
            seed: Some(42),
            ..ControllerConfig::default()
        }
    }

    fn started(graph: MotionGraph) -> Session<TimerQueue> {
        let mut session = Session::new(TimerQueue::new(), config());
        session.install(graph).expect("valid graph");
        session.start().expect("start");
        session
    }

    fn bundled(config: ControllerConfig) -> Session<TimerQueue> {
        let graph = parse_skin(BUNDLED_SKIN, 1.0).expect("bundled skin").graph;
        let mut session = Session::new(TimerQueue::new(), config);
        session.install(graph).expect("valid graph");
        session
    }

    fn state_trail(session: &mut Session<TimerQueue>, until_ms: u64) -> Vec<String> {
        let mut states = Vec::new();
        session
            .run_until_with(until_ms, |s, _| {
                let state = s.current_state().unwrap_or_default().to_string();
                if states.last() != Some(&state) {
                    states.push(state);
                }
            })
            .unwrap();
        states
    }

    fn frame_name(session: &Session<TimerQueue>) -> String {
        session
            .current_frame()
            .map(|f| f.as_str().to_string())
            .unwrap_or_default()
    }

    #[test]
    fn install_leaves_initial_state_without_ticks() {
        let mut session = Session::new(TimerQueue::new(), config());
        session.install(cat_graph()).unwrap();
        assert_eq!(session.current_state(), Some("stop"));
        assert!(!session.is_running());
        assert_eq!(session.scheduler().pending(), 0);
    }

    #[test]
    fn install_reports_graph_errors() {
        let mut session = Session::new(TimerQueue::new(), config());
        let graph = MotionGraph::new(MotionParams::default())
            .with_motion(Motion::new("stop", FrameSequence::new()));
        assert_eq!(
            session.install(graph),
            Err(GraphError::EmptySequence {
                state: "stop".to_string()
            })
        );
        assert_eq!(session.start(), Err(SessionError::NotInstalled));
    }

    #[test]
    fn frames_follow_sequence_timing() {
        let mut session = started(cat_graph());
        assert_eq!(frame_name(&session), "stop0");
        session.run_until(249).unwrap();
        assert_eq!(frame_name(&session), "stop0");
        session.run_until(250).unwrap();
        assert_eq!(frame_name(&session), "stop1");
    }

    #[test]
    fn sequence_end_moves_to_next_state() {
        let mut session = started(cat_graph());
        session.run_until(500).unwrap();
        assert_eq!(session.current_state(), Some("sleep"));
        assert_eq!(frame_name(&session), "sleep0");
        session.run_until(10_000).unwrap();
        assert_eq!(session.current_state(), Some("sleep"));
    }

    #[test]
    fn idle_session_parks_and_wakes_on_target() {
        let mut session = started(cat_graph());
        session.run_until(10).unwrap();
        assert!(session.is_parked());

        session.set_behaviour(Behaviour::Closer);
        session.set_target(Vec2::new(350.0, 0.0)).unwrap();
        assert!(!session.is_parked());
        session.run_until(20).unwrap();
        assert_eq!(session.current_state(), Some("awake"));
    }

    #[test]
    fn tap_leads_to_travel_and_arrival() {
        let mut session = started(cat_graph());
        session.set_behaviour(Behaviour::Closer);
        session.set_position(Vec2::new(100.0, 200.0)).unwrap();
        session.set_target(Vec2::new(300.0, 200.0)).unwrap();

        let mut states = Vec::new();
        session
            .run_until_with(60_000, |s, _| {
                let state = s.current_state().unwrap_or_default().to_string();
                if states.last() != Some(&state) {
                    states.push(state);
                }
            })
            .unwrap();

        assert!(states.contains(&"awake".to_string()));
        assert!(states.contains(&"moveRight".to_string()));
        assert_eq!(states.last().map(String::as_str), Some("sleep"));
        let pos = session.current_position().unwrap();
        assert!(pos.distance(Vec2::new(300.0, 200.0)) <= 10.0);
        assert!(session.is_parked());
    }

    #[test]
    fn edge_spawn_walks_off_the_wall_to_the_centre() {
        let mut session = bundled(ControllerConfig {
            display_size: Vec2::new(800.0, 600.0),
            seed: Some(3),
            ..ControllerConfig::default()
        });
        session.spawn_at_random_edge().unwrap();
        session.start().unwrap();

        let states = state_trail(&mut session, 60_000);

        assert!(states.iter().any(|s| s.starts_with("wall")));
        assert_eq!(states.last().map(String::as_str), Some("sleep"));
        let pos = session.current_position().unwrap();
        assert!(pos.distance(Vec2::new(400.0, 300.0)) <= 10.0);
    }

    #[test]
    fn idle_fidget_plays_once_then_settles_asleep() {
        let mut session = bundled(ControllerConfig {
            display_size: Vec2::new(800.0, 600.0),
            idle_fidget: true,
            seed: Some(5),
            ..ControllerConfig::default()
        });
        session.set_position(Vec2::new(400.0, 300.0)).unwrap();
        session.force_stop().unwrap();
        session.start().unwrap();

        let states = state_trail(&mut session, 60_000);

        assert_eq!(states.iter().filter(|s| *s == "awake").count(), 1);
        assert!(states.len() < 20);
        assert_eq!(states.last().map(String::as_str), Some("sleep"));
        assert!(session.is_parked());
    }

    #[test]
    fn commands_apply_on_next_callback() {
        let mut session = started(cat_graph());
        let sender = session.sender();
        sender.send(Command::SetSpeedFactor(-1.0)).unwrap();
        sender.send(Command::SetTransparency(0.5)).unwrap();
        assert_eq!(session.alpha(), 255);

        session.run_until(0).unwrap();
        assert_eq!(session.alpha(), 128);
        assert_eq!(session.controller().unwrap().state().speed_factor, 1.0);
    }

    #[test]
    fn render_view_reports_top_left_and_alpha() {
        let mut session = started(cat_graph());
        session.set_transparency(1.0);
        let view = session.render_view().unwrap();
        assert_eq!(view.frame.as_str(), "stop0");
        assert_eq!(view.top_left, Vec2::splat(-20.0));
        assert_eq!(view.alpha, 0);
    }

    #[test]
    fn stop_cancels_timers_and_is_idempotent() {
        let mut session = started(cat_graph());
        assert!(session.scheduler().pending() > 0);
        session.stop();
        session.stop();
        assert_eq!(session.scheduler().pending(), 0);
        assert!(!session.is_running());
        assert_eq!(frame_name(&session), "stop0");
        session.run_until(5_000).unwrap();
        assert_eq!(session.current_state(), Some("stop"));
    }

    #[test]
    fn scheduler_failure_halts_session() {
        let mut session = Session::new(TimerQueue::with_capacity(0), config());
        session.install(cat_graph()).unwrap();
        assert_eq!(
            session.start(),
            Err(SessionError::Scheduler(SchedulerError::Full { capacity: 0 }))
        );
        assert!(session.is_halted());
        assert!(!session.is_running());
        assert_eq!(session.tick(), Err(SessionError::Halted));
        assert_eq!(session.start(), Err(SessionError::Halted));
    }

    #[test]
    fn instant_successor_cycle_is_bounded() {
        let graph = MotionGraph::new(MotionParams::default())
            .with_motion(
                Motion::new("stop", FrameSequence::from_frames([("a", 0)]))
                    .with_next_state("blink"),
            )
            .with_motion(
                Motion::new("blink", FrameSequence::from_frames([("b", 0)]))
                    .with_next_state("stop"),
            );
        let mut session = started(graph);
        session.run_until(1_000).unwrap();
        assert!(session.is_running());
        assert!(session.scheduler().next_due().is_none());
    }
}
