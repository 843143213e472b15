//! Conversions between the tracker's display-area coordinates (ADCS), the
//! host's output units, and the track-box coordinates used by the status view.
//!
//! ADCS points live in `[0, 1] x [0, 1]` with the origin at the top-left of the
//! display. Host points are centre-origin with y pointing up, in whatever
//! [`Units`] the experiment window uses. A `NaN` coordinate means the eye was
//! not found and survives every conversion unchanged.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A 2D position. Used for both ADCS and host coordinates; which one is
/// implied by the function that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn nan() -> Self {
        Self {
            x: f64::NAN,
            y: f64::NAN,
        }
    }

    pub fn is_nan(&self) -> bool {
        self.x.is_nan() || self.y.is_nan()
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Linear blend: `self * w_self + other * w_other`.
    pub fn blend(&self, w_self: f64, other: &Point, w_other: f64) -> Point {
        Point::new(
            self.x * w_self + other.x * w_other,
            self.y * w_self + other.y * w_other,
        )
    }
}

impl From<(f64, f64)> for Point {
    fn from(v: (f64, f64)) -> Self {
        Point::new(v.0, v.1)
    }
}

impl From<Point> for (f64, f64) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// Output unit systems of the host window.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    clap::ValueEnum,
    strum_macros::Display,
)]
#[serde(rename_all = "camelCase")]
pub enum Units {
    /// -1..1 on both axes.
    #[strum(serialize = "norm")]
    Norm,
    /// Display height is 1, x scaled by the aspect ratio.
    #[strum(serialize = "height")]
    Height,
    #[strum(serialize = "pix")]
    Pix,
    #[strum(serialize = "cm")]
    Cm,
    #[strum(serialize = "deg")]
    Deg,
    #[strum(serialize = "degFlat")]
    DegFlat,
    #[strum(serialize = "degFlatPos")]
    DegFlatPos,
}

impl Units {
    /// Units that need a [`Monitor`] profile to convert.
    pub fn is_physical(&self) -> bool {
        matches!(
            self,
            Units::Cm | Units::Deg | Units::DegFlat | Units::DegFlatPos
        )
    }
}

/// Physical description of the display, supplied by the experimenter.
///
/// Owns the pixel to centimetre to degree steps; the mapper only does
/// ADCS to pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub width_cm: f64,
    pub distance_cm: f64,
}

impl Monitor {
    pub fn new(width_cm: f64, distance_cm: f64) -> Self {
        Self {
            width_cm,
            distance_cm,
        }
    }

    pub fn pix_to_cm(&self, pix: f64, width_px: f64) -> f64 {
        pix * self.width_cm / width_px
    }

    pub fn cm_to_pix(&self, cm: f64, width_px: f64) -> f64 {
        cm * width_px / self.width_cm
    }

    /// Degrees of visual angle. `correct_flat` accounts for the growing
    /// distance to the screen away from its centre.
    pub fn cm_to_deg(&self, cm: f64, correct_flat: bool) -> f64 {
        if correct_flat {
            (cm / self.distance_cm).atan().to_degrees()
        } else {
            cm / (self.distance_cm * 1f64.to_radians().tan())
        }
    }

    pub fn deg_to_cm(&self, deg: f64, correct_flat: bool) -> f64 {
        if correct_flat {
            deg.to_radians().tan() * self.distance_cm
        } else {
            deg * self.distance_cm * 1f64.to_radians().tan()
        }
    }
}

/// Stateless ADCS <-> host conversion for one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    width_px: f64,
    height_px: f64,
    units: Units,
    monitor: Option<Monitor>,
}

impl CoordinateMapper {
    pub fn new(size_px: (u32, u32), units: Units, monitor: Option<Monitor>) -> Result<Self> {
        if size_px.0 == 0 || size_px.1 == 0 {
            return Err(Error::config(format!(
                "display size must be non-zero, got {}x{}",
                size_px.0, size_px.1
            )));
        }
        if units.is_physical() && monitor.is_none() {
            return Err(Error::config(format!(
                "units '{units}' need a monitor profile (width and viewing distance)"
            )));
        }
        Ok(Self {
            width_px: size_px.0 as f64,
            height_px: size_px.1 as f64,
            units,
            monitor,
        })
    }

    pub fn units(&self) -> Units {
        self.units
    }

    pub fn size_px(&self) -> (f64, f64) {
        (self.width_px, self.height_px)
    }

    /// ADCS to centre-origin pixels.
    pub fn tracker_to_pix(&self, p: Point) -> Point {
        Point::new((p.x - 0.5) * self.width_px, (0.5 - p.y) * self.height_px)
    }

    /// Centre-origin pixels to ADCS.
    pub fn pix_to_tracker(&self, p: Point) -> Point {
        Point::new(p.x / self.width_px + 0.5, 0.5 - p.y / self.height_px)
    }

    pub fn to_host(&self, p: Point) -> Point {
        match self.units {
            Units::Norm => Point::new((p.x - 0.5) * 2.0, (0.5 - p.y) * 2.0),
            Units::Height => Point::new(
                (p.x - 0.5) * (self.width_px / self.height_px),
                0.5 - p.y,
            ),
            _ => self.pix_to_host(self.tracker_to_pix(p)),
        }
    }

    pub fn to_tracker(&self, p: Point) -> Point {
        match self.units {
            Units::Norm => Point::new(p.x / 2.0 + 0.5, 0.5 - p.y / 2.0),
            Units::Height => Point::new(
                p.x * (self.height_px / self.width_px) + 0.5,
                0.5 - p.y,
            ),
            _ => self.pix_to_tracker(self.host_to_pix(p)),
        }
    }

    /// Host units to centre-origin pixels, used when drawing.
    pub fn host_to_pix(&self, p: Point) -> Point {
        match (self.units, self.monitor) {
            (Units::Pix, _) => p,
            (Units::Norm, _) | (Units::Height, _) => self.tracker_to_pix(self.to_tracker(p)),
            (Units::Cm, Some(m)) => Point::new(
                m.cm_to_pix(p.x, self.width_px),
                m.cm_to_pix(p.y, self.width_px),
            ),
            (Units::Deg, Some(m)) => Point::new(
                m.cm_to_pix(m.deg_to_cm(p.x, false), self.width_px),
                m.cm_to_pix(m.deg_to_cm(p.y, false), self.width_px),
            ),
            (Units::DegFlat, Some(m)) | (Units::DegFlatPos, Some(m)) => Point::new(
                m.cm_to_pix(m.deg_to_cm(p.x, true), self.width_px),
                m.cm_to_pix(m.deg_to_cm(p.y, true), self.width_px),
            ),
            // new() refuses physical units without a monitor
            (_, None) => Point::nan(),
        }
    }

    pub fn pix_to_host(&self, p: Point) -> Point {
        match (self.units, self.monitor) {
            (Units::Pix, _) => p,
            (Units::Norm, _) | (Units::Height, _) => self.to_host(self.pix_to_tracker(p)),
            (Units::Cm, Some(m)) => Point::new(
                m.pix_to_cm(p.x, self.width_px),
                m.pix_to_cm(p.y, self.width_px),
            ),
            (Units::Deg, Some(m)) => Point::new(
                m.cm_to_deg(m.pix_to_cm(p.x, self.width_px), false),
                m.cm_to_deg(m.pix_to_cm(p.y, self.width_px), false),
            ),
            (Units::DegFlat, Some(m)) | (Units::DegFlatPos, Some(m)) => Point::new(
                m.cm_to_deg(m.pix_to_cm(p.x, self.width_px), true),
                m.cm_to_deg(m.pix_to_cm(p.y, self.width_px), true),
            ),
            (_, None) => Point::nan(),
        }
    }

    /// Fraction of the display height to pixels.
    pub fn height_fraction_to_pix(&self, fraction: f64) -> f64 {
        fraction * self.height_px
    }
}

/// A position inside the tracker's track box, each axis in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackBoxPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl TrackBoxPoint {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn nan() -> Self {
        Self::new(f64::NAN, f64::NAN, f64::NAN)
    }
}

/// Maps track-box positions into the status view (height units). Mirrored
/// horizontally so the operator sees the participant as in a mirror.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackBoxMapper {
    pub center: Point,
    pub scale: f64,
    pub z_bar_center: Point,
    pub z_bar_width: f64,
}

impl Default for TrackBoxMapper {
    fn default() -> Self {
        Self {
            center: Point::new(0.0, 0.4),
            scale: 0.2,
            z_bar_center: Point::new(0.0, 0.28),
            z_bar_width: 0.25,
        }
    }
}

impl TrackBoxMapper {
    pub fn eye_position(&self, p: TrackBoxPoint) -> Point {
        Point::new(
            (0.5 - p.x) * self.scale + self.center.x,
            (0.5 - p.y) * self.scale + self.center.y,
        )
    }

    /// Position of the distance marker along the z bar.
    pub fn z_marker(&self, z: f64) -> Point {
        Point::new(
            (z - 0.5) * self.z_bar_width + self.z_bar_center.x,
            self.z_bar_center.y,
        )
    }
}
