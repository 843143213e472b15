// Library surface for the controller, the simulator and integration tests.
// Keep this lean to avoid coupling to bin-only types in main.rs.
pub mod app_dirs;
pub mod buffer;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod coords;
pub mod error;
pub mod gaze;
pub mod host;
pub mod looking_time;
pub mod presentation;
pub mod recording;
pub mod runtime;
pub mod sim;
pub mod status;
pub mod tracker;
pub mod util;
pub mod validation;

pub use controller::{GazeController, TrackerDevice};
pub use error::{Error, Result};
