//! Headless runner for a screen pet.
//!
//! Loads a skin, drops the character on a random screen edge and plays the
//! session on a virtual clock, logging every state change. `--realtime`
//! paces the virtual clock against the wall clock instead of running as fast
//! as possible. `--replay` plays a scripted input file and prints the trace.

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use neko_core::time::{RealtimePacer, SystemClock, TimerQueue};
use neko_sim::replay::{load_replay_from_path, run_replay};
use neko_sim::session::Session;
use neko_sim::settings::{load_settings_from_path, Settings};
use neko_sim::skin::{load_skin_from_path, validate_frame_files};

const DEFAULT_SKIN_PATH: &str = "assets/skins/neko/skin.json";

#[derive(Parser)]
#[command(name = "neko_sim")]
#[command(about = "Runs a screen pet's motion engine without a window")]
struct Cli {
    /// Skin definition file
    #[arg(long, default_value = DEFAULT_SKIN_PATH)]
    skin: PathBuf,

    /// Settings JSON (size, speed, transparency, behaviour, display, ...)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Replay script; prints the resulting trace instead of free roaming
    #[arg(long)]
    replay: Option<PathBuf>,

    /// How long to run, on the session timeline
    #[arg(long, default_value_t = 30_000)]
    duration_ms: u64,

    /// RNG seed, overriding the settings file
    #[arg(long)]
    seed: Option<u64>,

    /// Follow the wall clock
    #[arg(long)]
    realtime: bool,

    /// Simulate an outside tap this often
    #[arg(long)]
    taps_every_ms: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let mut settings = match &cli.settings {
        Some(path) => load_settings_from_path(path)?,
        None => Settings::default(),
    };
    if cli.seed.is_some() {
        settings.seed = cli.seed;
    }

    let skin = load_skin_from_path(&cli.skin, settings.density)?;
    log::info!("Loaded skin '{}' from {}", skin.skin_id, cli.skin.display());
    if let Some(dir) = cli.skin.parent() {
        if let Err(err) = validate_frame_files(&skin.graph, dir) {
            log::warn!("{err}");
        }
    }

    if let Some(path) = &cli.replay {
        let script = load_replay_from_path(path)?;
        let trace = run_replay(&script, skin.graph, settings.controller_config())
            .map_err(|e| e.to_string())?;
        for entry in &trace {
            println!(
                "{:>8}ms  {:<12} ({:>7.1}, {:>7.1})  {}",
                entry.at_ms,
                entry.state,
                entry.position.x,
                entry.position.y,
                entry.frame.as_deref().unwrap_or("-")
            );
        }
        log::info!("Replay produced {} trace entries", trace.len());
        return Ok(());
    }

    let mut session = Session::new(TimerQueue::new(), settings.controller_config());
    session.install(skin.graph).map_err(|e| e.to_string())?;
    session.set_transparency(settings.transparency);
    session.spawn_at_random_edge().map_err(|e| e.to_string())?;
    session.start().map_err(|e| e.to_string())?;

    let tap_every = cli.taps_every_ms.filter(|&ms| ms > 0);
    let mut tap_at = tap_every.unwrap_or(u64::MAX);
    let mut pacer = cli
        .realtime
        .then(|| RealtimePacer::new(SystemClock::new(), session.now_ms()));
    let mut last_state = String::new();

    while session.now_ms() < cli.duration_ms {
        let checkpoint = tap_at.min(cli.duration_ms);
        let until = match pacer.as_mut() {
            Some(pacer) => {
                let due = session
                    .scheduler()
                    .next_due()
                    .map_or(checkpoint, |due| due.min(checkpoint));
                thread::sleep(pacer.wait_for(due));
                pacer.poll().min(checkpoint)
            }
            None => checkpoint,
        };

        session
            .run_until_with(until, |s, _| log_transition(s, &mut last_state))
            .map_err(|e| e.to_string())?;

        if until >= tap_at {
            if let Some(point) = session.random_tap_point() {
                log::info!("Tap at ({:.0}, {:.0})", point.x, point.y);
                session.set_target(point).map_err(|e| e.to_string())?;
            }
            tap_at = tap_every.map_or(u64::MAX, |every| tap_at.saturating_add(every));
        }
    }

    let position = session.current_position().unwrap_or_default();
    log::info!(
        "Finished at {}ms in state '{}' at ({:.1}, {:.1})",
        session.now_ms(),
        session.current_state().unwrap_or("-"),
        position.x,
        position.y
    );
    session.stop();
    Ok(())
}

fn log_transition(session: &Session<TimerQueue>, last_state: &mut String) {
    let Some(state) = session.current_state() else {
        return;
    };
    if state != last_state.as_str() {
        let position = session.current_position().unwrap_or_default();
        log::info!(
            "{:>8}ms  {} at ({:.1}, {:.1})",
            session.now_ms(),
            state,
            position.x,
            position.y
        );
        *last_state = state.to_string();
    }
}
