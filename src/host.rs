//! The host's rendering and input surface, seen from this crate.
//!
//! Every loop in the crate runs the same cycle: poll keys, draw one frame,
//! [`Window::flip`] (which blocks until the next refresh). Shapes are given
//! in centre-origin pixels with y pointing up.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::coords::Point;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
    Gray,
    Red,
    Green,
    Blue,
    Yellow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle {
        center: Point,
        radius: f64,
        fill: Option<Color>,
        line: Option<Color>,
    },
    Rect {
        center: Point,
        width: f64,
        height: f64,
        fill: Option<Color>,
        line: Option<Color>,
    },
    Line {
        from: Point,
        to: Point,
        color: Color,
    },
    Text {
        pos: Point,
        text: String,
        color: Color,
    },
    /// An image stimulus, scaled to `size` pixels on its longer side.
    Image {
        source: String,
        center: Point,
        size: f64,
    },
}

impl Shape {
    pub fn disc(center: Point, radius: f64, color: Color) -> Self {
        Shape::Circle {
            center,
            radius,
            fill: Some(color),
            line: None,
        }
    }

    pub fn text(pos: Point, text: impl Into<String>, color: Color) -> Self {
        Shape::Text {
            pos,
            text: text.into(),
            color,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Key {
    Char(char),
    /// Numeric keypad digit.
    Numpad(u8),
    Space,
    Return,
    Escape,
    Backspace,
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{c}"),
            Key::Numpad(n) => write!(f, "num_{n}"),
            Key::Space => write!(f, "space"),
            Key::Return => write!(f, "return"),
            Key::Escape => write!(f, "escape"),
            Key::Backspace => write!(f, "backspace"),
        }
    }
}

/// The experiment window.
pub trait Window {
    /// Size in pixels.
    fn size(&self) -> (u32, u32);

    fn draw(&mut self, shape: Shape);

    /// Present the drawn frame and block until the next display refresh.
    fn flip(&mut self) -> Result<()>;

    /// Keys pressed since the last call.
    fn keys(&mut self) -> Vec<Key>;

    fn clear_keys(&mut self) {
        let _ = self.keys();
    }
}

/// Monotonic time in seconds.
pub trait Clock {
    fn now(&self) -> f64;

    /// Fixed-duration pause; the only suspension besides [`Window::flip`].
    fn wait(&self, secs: f64);
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn wait(&self, secs: f64) {
        if secs > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(secs));
        }
    }
}

/// Video resource driven frame by frame by the caller.
pub trait MoviePlayer {
    fn play(&mut self);
    fn stop(&mut self);
    /// Draw the current movie frame into the window.
    fn draw(&mut self, window: &mut dyn Window);
    fn is_finished(&self) -> bool;
    /// Reload from the start, stopped.
    fn rewind(&mut self);
}

/// Keeps a movie playing for a scope; stops it on every exit path.
pub struct Playback<'a> {
    movie: &'a mut dyn MoviePlayer,
}

impl<'a> Playback<'a> {
    pub fn start(movie: &'a mut dyn MoviePlayer) -> Self {
        movie.play();
        Self { movie }
    }

    pub fn movie(&mut self) -> &mut dyn MoviePlayer {
        &mut *self.movie
    }
}

impl Drop for Playback<'_> {
    fn drop(&mut self) {
        self.movie.stop();
    }
}
