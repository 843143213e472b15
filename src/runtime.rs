//! Frame pacing and keyboard input for the terminal host.
//!
//! A terminal has no vertical blank to wait for, so a [`Ticker`] stands in
//! for the display refresh and [`Runner::wait_frame`] blocks for one tick
//! while gathering whatever keys arrive.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::host::Key;

#[derive(Clone, Debug, PartialEq)]
pub enum HostEvent {
    Key(Key),
    Resize,
}

/// Maps a terminal key press to a host key. Keypad digits cannot be told
/// apart from the main row in a terminal, so digits always map to `Char`.
pub fn map_key(key: KeyEvent) -> Option<Key> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Key::Escape),
        KeyCode::Char(' ') => Some(Key::Space),
        KeyCode::Char(c) => Some(Key::Char(c)),
        KeyCode::Enter => Some(Key::Return),
        KeyCode::Esc => Some(Key::Escape),
        KeyCode::Backspace => Some(Key::Backspace),
        _ => None,
    }
}

pub trait EventSource: Send + 'static {
    /// Next event, or `Err(Timeout)` once `timeout` has passed without one.
    fn recv_timeout(&self, timeout: Duration) -> Result<HostEvent, RecvTimeoutError>;
}

/// Reads crossterm events on a background thread.
pub struct CrosstermEventSource {
    rx: Receiver<HostEvent>,
}

impl CrosstermEventSource {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        std::thread::spawn(move || loop {
            let forwarded = match event::read() {
                Ok(CtEvent::Key(key)) => match map_key(key) {
                    Some(key) => tx.send(HostEvent::Key(key)),
                    None => Ok(()),
                },
                Ok(CtEvent::Resize(_, _)) => tx.send(HostEvent::Resize),
                Ok(_) => Ok(()),
                Err(_) => break,
            };
            // receiver gone: the window was dropped
            if forwarded.is_err() {
                break;
            }
        });

        Self { rx }
    }
}

impl Default for CrosstermEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<HostEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

pub trait Ticker: Send + Sync + 'static {
    /// Length of one frame.
    fn interval(&self) -> Duration;
}

#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Ticker for a refresh rate in Hz; rates below 1 Hz are clamped.
    pub fn from_rate(hz: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / hz.max(1.0)))
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Channel-fed event source for tests.
pub struct TestEventSource {
    rx: Receiver<HostEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<HostEvent>) -> Self {
        Self { rx }
    }
}

impl EventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<HostEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

pub struct Runner<E: EventSource, T: Ticker> {
    events: E,
    ticker: T,
}

impl<E: EventSource, T: Ticker> Runner<E, T> {
    pub fn new(events: E, ticker: T) -> Self {
        Self { events, ticker }
    }

    /// Blocks for one full tick, collecting every key pressed meanwhile.
    pub fn wait_frame(&self) -> Vec<Key> {
        let deadline = Instant::now() + self.ticker.interval();
        let mut keys = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return keys;
            }
            match self.events.recv_timeout(remaining) {
                Ok(HostEvent::Key(key)) => keys.push(key),
                Ok(HostEvent::Resize) => {}
                Err(RecvTimeoutError::Timeout) => return keys,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return keys;
                }
            }
        }
    }
}
