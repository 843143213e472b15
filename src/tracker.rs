//! Narrow contracts for the vendor SDK: gaze stream, calibration and the
//! optional validation add-on. Real devices and the simulator in
//! [`crate::sim`] both implement these.

use serde::{Deserialize, Serialize};

use crate::coords::Point;
use crate::error::{Error, Result};
use crate::gaze::GazeSample;

/// Invoked from the vendor's delivery thread for every sample. Must only
/// append; never block, draw, or touch files.
pub type GazeCallback = Box<dyn FnMut(GazeSample) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TrackerInfo {
    pub address: String,
    pub model: String,
    pub serial_number: String,
    pub name: String,
}

pub trait EyeTracker: Send {
    fn info(&self) -> TrackerInfo;

    /// Current device clock, microseconds. Same domain as sample timestamps.
    fn system_time_stamp(&self) -> i64;

    fn subscribe(&mut self, callback: GazeCallback) -> Result<()>;

    fn unsubscribe(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationStatus {
    Success,
    Failure,
}

/// One eye of a sample collected at a calibration/validation point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeSample {
    pub position: Point,
    pub valid: bool,
}

impl EyeSample {
    pub fn valid(position: Point) -> Self {
        Self {
            position,
            valid: true,
        }
    }

    pub fn invalid() -> Self {
        Self {
            position: Point::nan(),
            valid: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointSample {
    pub left: EyeSample,
    pub right: EyeSample,
}

impl PointSample {
    pub fn has_valid_eye(&self) -> bool {
        self.left.valid || self.right.valid
    }
}

/// Samples gathered at one target, in ADCS.
#[derive(Debug, Clone, PartialEq)]
pub struct PointData {
    pub position: Point,
    pub samples: Vec<PointSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub status: CalibrationStatus,
    pub points: Vec<PointData>,
}

impl CalibrationResult {
    pub fn failure() -> Self {
        Self {
            status: CalibrationStatus::Failure,
            points: Vec::new(),
        }
    }
}

/// Screen-based calibration, coordinates in ADCS.
pub trait CalibrationBackend: Send {
    fn enter_calibration_mode(&mut self) -> Result<()>;
    fn collect_data(&mut self, point: Point) -> Result<CollectStatus>;
    fn discard_data(&mut self, point: Point) -> Result<()>;
    fn compute_and_apply(&mut self) -> Result<CalibrationResult>;
    fn leave_calibration_mode(&mut self) -> Result<()>;
}

/// How much gaze the validation add-on gathers at each point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParams {
    /// Samples to collect per point, 10 to 3000.
    pub sample_count: u32,
    /// Give up on a point after this many seconds, 0.1 to 3.
    pub timeout: f64,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            sample_count: 30,
            timeout: 1.0,
        }
    }
}

impl ValidationParams {
    pub fn validate(&self) -> Result<()> {
        if !(10..=3000).contains(&self.sample_count) {
            return Err(Error::config(format!(
                "validation sample count {} is outside 10..=3000",
                self.sample_count
            )));
        }
        if !(0.1..=3.0).contains(&self.timeout) {
            return Err(Error::config(format!(
                "validation timeout {}s is outside 0.1..=3",
                self.timeout
            )));
        }
        Ok(())
    }
}

/// The optional validation add-on, coordinates in ADCS.
pub trait ValidationBackend: Send {
    /// Collection at each point stops after `params.sample_count` samples
    /// or `params.timeout`, whichever comes first.
    fn enter_validation_mode(&mut self, params: ValidationParams) -> Result<()>;
    /// Starts collection at `point`; poll [`Self::is_collecting_data`].
    fn start_collecting_data(&mut self, point: Point) -> Result<()>;
    fn is_collecting_data(&self) -> bool;
    /// Raw gaze collected at every validation point so far.
    fn compute(&mut self) -> Result<Vec<PointData>>;
    fn leave_validation_mode(&mut self) -> Result<()>;
}

/// Who currently has exclusive use of the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum LeaseOwner {
    Recording,
    Status,
    Calibration,
    Validation,
    #[strum(serialize = "looking-time")]
    LookingTime,
}

/// Exclusive-use token for the tracker. A second acquisition fails instead of
/// silently sharing the gaze subscription.
#[derive(Debug, Default)]
pub struct TrackerLease {
    held_by: Option<LeaseOwner>,
}

impl TrackerLease {
    pub fn acquire(&mut self, owner: LeaseOwner) -> Result<()> {
        match self.held_by {
            Some(held_by) => Err(Error::TrackerBusy { held_by }),
            None => {
                self.held_by = Some(owner);
                Ok(())
            }
        }
    }

    pub fn release(&mut self, owner: LeaseOwner) {
        if self.held_by == Some(owner) {
            self.held_by = None;
        }
    }

    pub fn holder(&self) -> Option<LeaseOwner> {
        self.held_by
    }
}
