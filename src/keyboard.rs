//! Keyboard control surface
//!
//! Puts the terminal in raw mode and turns key presses into control commands.
//!
//! | Key            | Command                |
//! |----------------|------------------------|
//! | `1`-`9`        | select corpus 0-8      |
//! | `0`            | reset                  |
//! | `r` / `f` / `p`| responsive / freeze / play |
//! | `h` / `n` / `d`| half / normal / double rate |
//! | `q`, `Esc`, `Ctrl-C` | quit             |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::control::{ControlCommand, Mode, Rate};
use crate::error::{MosaicError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Map one key event to a command
pub fn decode_key(key: KeyEvent) -> Option<ControlCommand> {
    if key.kind == KeyEventKind::Release {
        return None;
    }

    let command = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => ControlCommand::Quit,
        KeyCode::Char('q') | KeyCode::Esc => ControlCommand::Quit,
        KeyCode::Char('0') => ControlCommand::Reset,
        KeyCode::Char(c @ '1'..='9') => ControlCommand::SelectCorpus(c as usize - '1' as usize),
        KeyCode::Char('r') => ControlCommand::SetMode(Mode::Responsive),
        KeyCode::Char('f') => ControlCommand::SetMode(Mode::Freeze),
        KeyCode::Char('p') => ControlCommand::SetMode(Mode::Sequential),
        KeyCode::Char('h') => ControlCommand::SetRate(Rate::Half),
        KeyCode::Char('n') => ControlCommand::SetRate(Rate::Normal),
        KeyCode::Char('d') => ControlCommand::SetRate(Rate::Double),
        _ => return None,
    };
    Some(command)
}

/// Raw-mode terminal input. Raw mode is left when this is dropped.
pub struct KeyboardControl {
    _private: (),
}

impl KeyboardControl {
    /// Claim the terminal. Failure here means there is no way to control the
    /// engine, so it is reported as [`MosaicError::DeviceOpen`].
    pub fn open() -> Result<Self> {
        enable_raw_mode().map_err(|e| MosaicError::DeviceOpen(format!("terminal: {}", e)))?;
        Ok(Self { _private: () })
    }

    /// Poll keys until quit is pressed, `running` is cleared or the receiver
    /// goes away. Blocking; run it on its own thread.
    pub fn run(&self, sender: UnboundedSender<ControlCommand>, running: Arc<AtomicBool>) -> Result<()> {
        while running.load(Ordering::Relaxed) {
            if !event::poll(POLL_INTERVAL)? {
                continue;
            }
            let Event::Key(key) = event::read()? else {
                continue;
            };
            let Some(command) = decode_key(key) else {
                debug!("Unmapped key {:?}", key.code);
                continue;
            };
            if sender.send(command).is_err() || command == ControlCommand::Quit {
                break;
            }
        }
        Ok(())
    }
}

impl Drop for KeyboardControl {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!("Failed to restore terminal: {}", e);
        }
    }
}
