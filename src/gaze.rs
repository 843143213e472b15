use crate::coords::{Point, TrackBoxPoint};

/// One eye's part of a gaze sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeData {
    /// Gaze point in display-area coordinates (ADCS).
    pub gaze_point: Point,
    pub gaze_valid: bool,
    pub pupil_diameter: f64,
    pub pupil_valid: bool,
    /// Eye position in the track box; only the status view reads it.
    pub track_box: TrackBoxPoint,
}

impl EyeData {
    pub fn valid(gaze_point: Point, pupil_diameter: f64) -> Self {
        Self {
            gaze_point,
            gaze_valid: true,
            pupil_diameter,
            pupil_valid: true,
            track_box: TrackBoxPoint::new(0.5, 0.5, 0.5),
        }
    }

    pub fn invalid() -> Self {
        Self {
            gaze_point: Point::nan(),
            gaze_valid: false,
            pupil_diameter: f64::NAN,
            pupil_valid: false,
            track_box: TrackBoxPoint::nan(),
        }
    }
}

impl Default for EyeData {
    fn default() -> Self {
        Self::invalid()
    }
}

/// A raw sample as delivered by the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeSample {
    /// Device monotonic clock, microseconds.
    pub system_timestamp: i64,
    pub left: EyeData,
    pub right: EyeData,
}

impl GazeSample {
    pub fn new(system_timestamp: i64, left: EyeData, right: EyeData) -> Self {
        Self {
            system_timestamp,
            left,
            right,
        }
    }

    pub fn validity(&self) -> (bool, bool) {
        (self.left.gaze_valid, self.right.gaze_valid)
    }

    /// Averaged gaze: mean of valid eyes, the single valid eye, or `NaN`.
    pub fn average_gaze(&self) -> Point {
        average_point(
            self.left.gaze_point,
            self.left.gaze_valid,
            self.right.gaze_point,
            self.right.gaze_valid,
        )
    }
}

pub fn average_point(left: Point, left_valid: bool, right: Point, right_valid: bool) -> Point {
    match (left_valid, right_valid) {
        (true, true) => left.blend(0.5, &right, 0.5),
        (true, false) => left,
        (false, true) => right,
        (false, false) => Point::nan(),
    }
}

/// A discrete, labelled event recorded during a session.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    /// Device clock until export, when it is rebased.
    pub device_timestamp: i64,
    pub label: String,
}

impl EventRecord {
    pub fn new(device_timestamp: i64, label: impl Into<String>) -> Self {
        Self {
            device_timestamp,
            label: label.into(),
        }
    }
}
