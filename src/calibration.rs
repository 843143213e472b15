//! Interactive, multi-round calibration.
//!
//! ```text
//! enter mode -> [ Present -> Compute -> Review ] -> leave mode
//!                  ^                       |
//!                  +---- retry (discard) --+
//! ```
//!
//! [`CalibrationProcedure`] holds the round state and talks to the vendor
//! backend; [`run`] drives it frame by frame with a presentation strategy and
//! the operator's keys.

use std::collections::BTreeSet;

use log::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::coords::{CoordinateMapper, Point};
use crate::error::{Error, Result};
use crate::host::{Clock, Color, Shape, Window};
use crate::presentation::{PointCollector, PresentContext, PresentOutcome, PresentationStrategy};
use crate::tracker::{
    CalibrationBackend, CalibrationResult, CalibrationStatus, CollectStatus, PointData,
};

pub const MIN_POINTS: usize = 2;
pub const MAX_POINTS: usize = 9;

// positions from the backend are matched back to our targets by distance
const SAME_POSITION: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    pub index: usize,
    /// Where the caller asked for it, in host units.
    pub host: Point,
    /// The same position in ADCS, as sent to the backend.
    pub position: Point,
}

/// Converts host-unit targets, refusing counts the vendor cannot handle.
pub fn calibration_points(
    targets: &[Point],
    mapper: &CoordinateMapper,
) -> Result<Vec<CalibrationPoint>> {
    if !(MIN_POINTS..=MAX_POINTS).contains(&targets.len()) {
        return Err(Error::config(format!(
            "calibration needs {MIN_POINTS} to {MAX_POINTS} points, got {}",
            targets.len()
        )));
    }
    Ok(targets
        .iter()
        .enumerate()
        .map(|(index, &host)| CalibrationPoint {
            index,
            host,
            position: mapper.to_tracker(host),
        })
        .collect())
}

// corners and centre first, then edge midpoints
const STANDARD_LAYOUT: [(f64, f64); MAX_POINTS] = [
    (0.1, 0.1),
    (0.9, 0.1),
    (0.5, 0.5),
    (0.1, 0.9),
    (0.9, 0.9),
    (0.5, 0.1),
    (0.1, 0.5),
    (0.9, 0.5),
    (0.5, 0.9),
];

/// The first `count` points of a standard layout, in host units.
pub fn standard_targets(count: usize, mapper: &CoordinateMapper) -> Result<Vec<Point>> {
    if !(MIN_POINTS..=MAX_POINTS).contains(&count) {
        return Err(Error::config(format!(
            "calibration needs {MIN_POINTS} to {MAX_POINTS} points, got {count}"
        )));
    }
    Ok(STANDARD_LAYOUT[..count]
        .iter()
        .map(|&p| mapper.to_host(p.into()))
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Present,
    Review,
    Accepted,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    NotComputed,
    Success,
    Failure,
}

/// The round state of one calibration, from entering calibration mode to
/// accepting or aborting. Leaves calibration mode when dropped unfinished.
pub struct CalibrationProcedure<'b> {
    backend: &'b mut dyn CalibrationBackend,
    points: Vec<CalibrationPoint>,
    retry_set: BTreeSet<usize>,
    result: Option<CalibrationResult>,
    phase: Phase,
    round: usize,
}

impl std::fmt::Debug for CalibrationProcedure<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationProcedure")
            .field("points", &self.points)
            .field("phase", &self.phase)
            .field("round", &self.round)
            .finish_non_exhaustive()
    }
}

impl<'b> CalibrationProcedure<'b> {
    pub fn enter(
        backend: &'b mut dyn CalibrationBackend,
        points: Vec<CalibrationPoint>,
    ) -> Result<Self> {
        if !(MIN_POINTS..=MAX_POINTS).contains(&points.len()) {
            return Err(Error::config(format!(
                "calibration needs {MIN_POINTS} to {MAX_POINTS} points, got {}",
                points.len()
            )));
        }
        backend.enter_calibration_mode()?;
        info!("entered calibration mode with {} points", points.len());
        let retry_set = (0..points.len()).collect();
        Ok(Self {
            backend,
            points,
            retry_set,
            result: None,
            phase: Phase::Present,
            round: 1,
        })
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn retry_set(&self) -> &BTreeSet<usize> {
        &self.retry_set
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn result(&self) -> Option<&CalibrationResult> {
        self.result.as_ref()
    }

    pub fn status(&self) -> RoundStatus {
        match &self.result {
            None => RoundStatus::NotComputed,
            Some(r) if r.status == CalibrationStatus::Success => RoundStatus::Success,
            Some(_) => RoundStatus::Failure,
        }
    }

    /// Collects at one point; a failed collection is retried exactly once.
    pub fn collect_point(&mut self, index: usize) -> Result<CollectStatus> {
        let position = self.points[index].position;
        let mut status = self.backend.collect_data(position)?;
        if status != CollectStatus::Success {
            debug!("collect at point {} failed, retrying once", index + 1);
            status = self.backend.collect_data(position)?;
        }
        Ok(status)
    }

    /// Compute-and-apply, then open the review with every point that has no
    /// usable sample marked for retry. A failed compute marks them all.
    pub fn compute(&mut self) -> Result<&CalibrationResult> {
        let result = self.backend.compute_and_apply()?;
        info!(
            "round {}: calibration {:?} ({} points with data)",
            self.round,
            result.status,
            result.points.len()
        );
        self.retry_set = self
            .points
            .iter()
            .filter(|p| !has_usable_samples(&result, p))
            .map(|p| p.index)
            .collect();
        self.phase = Phase::Review;
        Ok(self.result.insert(result))
    }

    pub fn toggle(&mut self, index: usize) {
        if index >= self.points.len() {
            return;
        }
        if !self.retry_set.remove(&index) {
            self.retry_set.insert(index);
        }
    }

    /// Clears the set when every point is selected, otherwise selects all.
    pub fn toggle_all(&mut self) {
        if self.retry_set.len() == self.points.len() {
            self.retry_set.clear();
        } else {
            self.retry_set = (0..self.points.len()).collect();
        }
    }

    /// The operator's decision key. Accepts with an empty retry set;
    /// otherwise discards the data at every selected point and starts the
    /// next round.
    pub fn decide(&mut self) -> Result<Phase> {
        if self.retry_set.is_empty() {
            self.backend.leave_calibration_mode()?;
            self.phase = Phase::Accepted;
            info!("calibration accepted after {} round(s)", self.round);
            return Ok(self.phase);
        }
        for &index in &self.retry_set {
            self.backend.discard_data(self.points[index].position)?;
        }
        debug!("retrying points {:?}", self.retry_indices_one_based());
        self.result = None;
        self.round += 1;
        self.phase = Phase::Present;
        Ok(self.phase)
    }

    pub fn abort(&mut self) -> Result<()> {
        self.phase = Phase::Aborted;
        self.backend.leave_calibration_mode()?;
        info!("calibration aborted in round {}", self.round);
        Ok(())
    }

    fn retry_indices_one_based(&self) -> Vec<usize> {
        self.retry_set.iter().map(|i| i + 1).collect()
    }

    fn samples_for(&self, point: &CalibrationPoint) -> Option<&PointData> {
        self.result
            .as_ref()
            .and_then(|r| point_data(r, point.position))
    }
}

impl PointCollector for CalibrationProcedure<'_> {
    fn collect(&mut self, index: usize) -> Result<()> {
        if self.collect_point(index)? != CollectStatus::Success {
            warn!("no calibration data at point {}", index + 1);
        }
        Ok(())
    }
}

impl Drop for CalibrationProcedure<'_> {
    fn drop(&mut self) {
        if matches!(self.phase, Phase::Present | Phase::Review) {
            if let Err(e) = self.backend.leave_calibration_mode() {
                warn!("failed to leave calibration mode: {e}");
            }
        }
    }
}

fn point_data(result: &CalibrationResult, position: Point) -> Option<&PointData> {
    result
        .points
        .iter()
        .find(|d| d.position.distance(&position) < SAME_POSITION)
}

fn has_usable_samples(result: &CalibrationResult, point: &CalibrationPoint) -> bool {
    result.status == CalibrationStatus::Success
        && point_data(result, point.position)
            .is_some_and(|d| d.samples.iter().any(|s| s.has_valid_eye()))
}

/// Static review frame: a line from every valid eye sample to its target,
/// numbered targets, the retry selection and a legend.
pub fn draw_review(
    window: &mut dyn Window,
    mapper: &CoordinateMapper,
    config: &ControllerConfig,
    procedure: &CalibrationProcedure<'_>,
) {
    let style = &config.target;
    let (_, height) = mapper.size_px();
    let marker = height * 0.01;

    for point in procedure.points() {
        let target = mapper.tracker_to_pix(point.position);
        window.draw(Shape::Circle {
            center: target,
            radius: marker,
            fill: None,
            line: Some(Color::White),
        });
        if let Some(data) = procedure.samples_for(point) {
            for sample in &data.samples {
                for (eye, color) in [
                    (sample.left, style.left_eye_color),
                    (sample.right, style.right_eye_color),
                ] {
                    if eye.valid {
                        window.draw(Shape::Line {
                            from: target,
                            to: mapper.tracker_to_pix(eye.position),
                            color,
                        });
                    }
                }
            }
        }
        let label = Point::new(target.x + marker * 2.0, target.y + marker * 2.0);
        window.draw(Shape::text(label, (point.index + 1).to_string(), style.text_color));
        if procedure.retry_set().contains(&point.index) {
            window.draw(Shape::Rect {
                center: target,
                width: marker * 6.0,
                height: marker * 6.0,
                fill: None,
                line: Some(Color::Yellow),
            });
        }
    }

    let status = match procedure.status() {
        RoundStatus::Failure => "Calibration failed",
        _ => "Calibration computed",
    };
    let keys = &config.keys;
    let legend = [
        format!("{status} (round {})", procedure.round()),
        "Left eye: green   Right eye: red".to_string(),
        format!(
            "[1-{}] select point   [0] select all   [{}] accept / retry   [{}] abort",
            procedure.points().len(),
            keys.decision,
            keys.abort
        ),
    ];
    for (i, line) in legend.iter().enumerate() {
        let pos = Point::new(0.0, -height / 2.0 + marker * (8.0 - 3.0 * i as f64));
        window.draw(Shape::text(pos, line.as_str(), style.text_color));
    }
}

/// Blocks until the configured start key, if any. `false` on abort.
pub fn wait_for_start(
    window: &mut dyn Window,
    config: &ControllerConfig,
    prompt: &str,
) -> Result<bool> {
    let Some(start) = config.keys.start.clone() else {
        return Ok(true);
    };
    window.clear_keys();
    loop {
        for key in window.keys() {
            if key == start {
                return Ok(true);
            }
            if key == config.keys.abort {
                return Ok(false);
            }
        }
        window.draw(Shape::text(
            Point::new(0.0, 0.0),
            format!("{prompt}: press {start} to start"),
            config.target.text_color,
        ));
        window.flip()?;
    }
}

/// Runs calibration to completion. `Ok(true)` when accepted, `Ok(false)`
/// when the operator aborted.
pub fn run(
    backend: &mut dyn CalibrationBackend,
    strategy: &mut dyn PresentationStrategy,
    window: &mut dyn Window,
    clock: &dyn Clock,
    mapper: &CoordinateMapper,
    config: &ControllerConfig,
    targets: &[Point],
) -> Result<bool> {
    let points = calibration_points(targets, mapper)?;
    if !wait_for_start(window, config, "Calibration")? {
        return Ok(false);
    }
    let adcs: Vec<Point> = points.iter().map(|p| p.position).collect();
    let mut procedure = CalibrationProcedure::enter(backend, points)?;

    loop {
        let pending = procedure.retry_set().clone();
        let outcome = {
            let mut ctx = PresentContext {
                window: &mut *window,
                clock,
                mapper,
                config,
                targets: &adcs,
                pending: &pending,
            };
            strategy.present(&mut ctx, &mut procedure)?
        };
        if outcome == PresentOutcome::Aborted {
            procedure.abort()?;
            return Ok(false);
        }

        procedure.compute()?;
        window.clear_keys();
        'review: loop {
            for key in window.keys() {
                if key == config.keys.abort {
                    procedure.abort()?;
                    return Ok(false);
                } else if key == config.keys.decision {
                    match procedure.decide()? {
                        Phase::Accepted => return Ok(true),
                        _ => break 'review,
                    }
                } else if config.keys.is_select_all(&key) {
                    procedure.toggle_all();
                } else if let Some(index) = config.keys.point_for(&key) {
                    procedure.toggle(index);
                }
            }
            draw_review(window, mapper, config, &procedure);
            window.flip()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Units;
    use crate::host::Key;
    use crate::presentation::AutoPresentation;
    use crate::sim::{ManualClock, ScriptedWindow, SimCalibration};
    use assert_matches::assert_matches;

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new((800, 600), Units::Pix, None).unwrap()
    }

    fn five_targets() -> Vec<Point> {
        vec![
            Point::new(-300.0, 200.0),
            Point::new(300.0, 200.0),
            Point::new(0.0, 0.0),
            Point::new(-300.0, -200.0),
            Point::new(300.0, -200.0),
        ]
    }

    fn five_points() -> Vec<CalibrationPoint> {
        calibration_points(&five_targets(), &mapper()).unwrap()
    }

    #[test]
    fn point_count_is_checked_before_entering_mode() {
        let m = mapper();
        assert_matches!(
            calibration_points(&[Point::new(0.0, 0.0)], &m),
            Err(Error::Configuration(_))
        );
        assert_matches!(
            calibration_points(&vec![Point::new(0.0, 0.0); 10], &m),
            Err(Error::Configuration(_))
        );

        let mut backend = SimCalibration::new();
        let one = vec![five_points()[0]];
        assert_matches!(
            CalibrationProcedure::enter(&mut backend, one),
            Err(Error::Configuration(_))
        );
        assert_eq!(backend.log().entered, 0);
    }

    #[test]
    fn standard_layout_round_trips() {
        let m = mapper();
        let targets = standard_targets(5, &m).unwrap();
        assert_eq!(targets.len(), 5);
        assert_eq!(targets[2], Point::new(0.0, 0.0));
        let points = calibration_points(&targets, &m).unwrap();
        assert!(points[0].position.distance(&Point::new(0.1, 0.1)) < 1e-9);
        assert_matches!(standard_targets(1, &m), Err(Error::Configuration(_)));
    }

    #[test]
    fn targets_are_converted_to_adcs() {
        let points = five_points();
        assert_eq!(points[2].position, Point::new(0.5, 0.5));
        assert!(points[0].position.distance(&Point::new(0.125, 1.0 / 6.0)) < 1e-9);
    }

    #[test]
    fn failed_collection_is_retried_once() {
        let mut backend = SimCalibration::flaky();
        {
            let mut procedure = CalibrationProcedure::enter(&mut backend, five_points()).unwrap();
            assert_eq!(procedure.collect_point(0).unwrap(), CollectStatus::Success);
        }
        let log = backend.log();
        assert_eq!(log.collected.len(), 2);
        assert_eq!(log.collected[0], log.collected[1]);
    }

    #[test]
    fn accepting_selected_points_discards_them_and_continues() {
        let backend_log = SimCalibration::new();
        let mut backend = backend_log.clone();
        let points = five_points();
        let mut procedure = CalibrationProcedure::enter(&mut backend, points.clone()).unwrap();
        for i in 0..5 {
            procedure.collect_point(i).unwrap();
        }
        procedure.compute().unwrap();
        assert_eq!(procedure.status(), RoundStatus::Success);
        assert!(procedure.retry_set().is_empty());

        procedure.toggle(1);
        procedure.toggle(3);
        assert_eq!(procedure.decide().unwrap(), Phase::Present);
        assert_eq!(procedure.round(), 2);
        assert_eq!(procedure.status(), RoundStatus::NotComputed);
        drop(procedure);

        let log = backend_log.log();
        assert_eq!(log.discarded, vec![points[1].position, points[3].position]);
        // dropped mid-round: calibration mode is still left
        assert_eq!(log.left, 1);
    }

    #[test]
    fn select_all_toggles_between_all_and_none() {
        let mut backend = SimCalibration::new();
        let mut procedure = CalibrationProcedure::enter(&mut backend, five_points()).unwrap();
        assert_eq!(procedure.retry_set().len(), 5);
        procedure.toggle_all();
        assert!(procedure.retry_set().is_empty());
        procedure.toggle_all();
        assert_eq!(procedure.retry_set().len(), 5);

        procedure.toggle(2);
        procedure.toggle_all();
        assert_eq!(procedure.retry_set().len(), 5);
    }

    #[test]
    fn failed_compute_puts_every_point_up_for_retry() {
        let backend_log = SimCalibration::always_failing();
        let mut backend = backend_log.clone();
        let mut procedure = CalibrationProcedure::enter(&mut backend, five_points()).unwrap();
        for i in 0..5 {
            procedure.collect(i).unwrap();
        }
        procedure.compute().unwrap();
        assert_eq!(procedure.status(), RoundStatus::Failure);
        assert_eq!(procedure.retry_set().len(), 5);

        assert_eq!(procedure.decide().unwrap(), Phase::Present);
        assert_eq!(procedure.retry_set().len(), 5);
        let log = backend_log.log();
        assert_eq!(log.discarded.len(), 5);
        assert_eq!(log.left, 0);
        procedure.abort().unwrap();
        drop(procedure);
        assert_eq!(backend_log.log().left, 1);
    }

    #[test]
    fn review_marks_selected_points() {
        let mut backend = SimCalibration::always_failing();
        let mut procedure = CalibrationProcedure::enter(&mut backend, five_points()).unwrap();
        procedure.compute().unwrap();
        let clock = ManualClock::default();
        let mut window = ScriptedWindow::new((800, 600), clock);
        draw_review(&mut window, &mapper(), &ControllerConfig::default(), &procedure);
        window.flip().unwrap();
        let marks = window
            .last_frame()
            .iter()
            .filter(|s| matches!(s, Shape::Rect { .. }))
            .count();
        assert_eq!(marks, 5);
        assert!(window.last_frame().iter().any(
            |s| matches!(s, Shape::Text { text, .. } if text.starts_with("Calibration failed"))
        ));
    }

    #[test]
    fn auto_run_is_accepted_with_decision_key() {
        let backend_log = SimCalibration::new();
        let mut backend = backend_log.clone();
        let clock = ManualClock::default();
        let mut window =
            ScriptedWindow::new((800, 600), clock.clone()).with_keys(vec![(455, Key::Space)]);
        let accepted = run(
            &mut backend,
            &mut AutoPresentation,
            &mut window,
            &clock,
            &mapper(),
            &ControllerConfig::default(),
            &five_targets(),
        )
        .unwrap();
        assert!(accepted);
        let log = backend_log.log();
        assert_eq!((log.entered, log.left, log.computed), (1, 1, 1));
        assert_eq!(log.collected.len(), 5);
        assert!(log.discarded.is_empty());
    }
}
