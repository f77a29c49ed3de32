use std::sync::mpsc::{self, Receiver, SendError, Sender, TryRecvError};

use glam::Vec2;

use crate::behaviour::Behaviour;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// An outside tap; the active behaviour picks the actual target.
    SetTarget(Vec2),
    ForceStop,
    SetSpeedFactor(f32),
    SetBehaviour(Behaviour),
    SetDisplaySize(Vec2),
    SetSpriteSize(Vec2),
    SetTransparency(f32),
}

#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Fails only once the session has been dropped.
    pub fn send(&self, command: Command) -> Result<(), SendError<Command>> {
        self.tx.send(command)
    }
}

#[derive(Debug)]
pub struct CommandQueue {
    tx: Sender<Command>,
    rx: Receiver<Command>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    /// Everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Command> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(command) => out.push(command),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }
}
