//! Cooperative poll loop driving a [`LinkSession`] and its presentation shell.
//!
//! One tick:
//!
//! 1. apply every command the shell has queued (sends happen here, before the poll)
//! 2. move at most one inbound packet into the receive slot
//! 3. hand a fresh snapshot to the shell
//! 4. sleep for the tick period
//!
//! The loop ends when the [`CancelToken`] is cancelled, either from outside
//! or by the shell asking to quit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::loradev::LoraDevice;
use crate::session::{LinkSession, SessionSnapshot};

/// Shared stop flag checked once per tick.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// What a user can ask the session to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// Send the session's configured payload
    Send,
    /// Send the given text
    SendText(String),
    Quit,
}

/// Screen and input side of the application.
pub trait PresentationShell {
    /// Draw the current session state.
    fn render(&mut self, snapshot: &SessionSnapshot);
    /// Next decoded user command, `None` when nothing is queued.
    fn next_command(&mut self) -> Option<ShellCommand>;
}

/// Run ticks until `cancel` fires. Returns the number of completed ticks.
///
/// Send failures are logged and dropped; they never end the loop.
pub fn run<D, S>(
    session: &mut LinkSession<D>,
    shell: &mut S,
    tick: Duration,
    cancel: &CancelToken,
) -> u64
where
    D: LoraDevice,
    S: PresentationShell,
{
    info!(tick_ms = tick.as_millis() as u64, "poll loop started");
    let mut ticks = 0;
    while !cancel.is_cancelled() {
        while let Some(command) = shell.next_command() {
            let result = match command {
                ShellCommand::Send => session.user_requested_send(),
                ShellCommand::SendText(text) => session.send_text(&text),
                ShellCommand::Quit => {
                    debug!("quit requested");
                    cancel.cancel();
                    break;
                }
            };
            if let Err(e) = result {
                warn!(error = %e, "send abandoned");
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        session.poll_receive();
        shell.render(&session.snapshot());
        ticks += 1;

        thread::sleep(tick);
    }
    info!(ticks, "poll loop stopped");
    ticks
}
