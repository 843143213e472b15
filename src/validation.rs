//! Post-calibration accuracy and precision check.
//!
//! Presentation reuses the calibration scaffolding, but there is no review
//! or retry: every point is shown once, the add-on returns the raw gaze it
//! collected, and the offsets from each target are summarised per eye.

use std::collections::BTreeSet;

use itertools::Itertools;
use log::info;

use crate::config::ControllerConfig;
use crate::coords::{CoordinateMapper, Point, Units};
use crate::error::{Error, Result};
use crate::host::{Clock, Shape, Window};
use crate::presentation::{PointCollector, PresentContext, PresentOutcome, PresentationStrategy};
use crate::tracker::{EyeSample, PointData, PointSample, ValidationBackend};
use crate::util::{mean, std_dev};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeStats {
    /// Mean offset from the target, host units. `NaN` without data.
    pub accuracy: f64,
    /// Standard deviation of the offset, host units.
    pub precision: f64,
    pub samples: usize,
}

impl EyeStats {
    fn from_offsets(offsets: &[f64]) -> Self {
        Self {
            accuracy: mean(offsets).unwrap_or(f64::NAN),
            precision: std_dev(offsets).unwrap_or(f64::NAN),
            samples: offsets.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PointStats {
    pub index: usize,
    pub target: Point,
    pub left: EyeStats,
    pub right: EyeStats,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub units: Units,
    pub points: Vec<PointStats>,
}

fn offsets(
    data: Option<&PointData>,
    target: Point,
    mapper: &CoordinateMapper,
    eye: impl Fn(&PointSample) -> EyeSample,
) -> Vec<f64> {
    data.map(|d| {
        d.samples
            .iter()
            .map(&eye)
            .filter(|e| e.valid)
            .map(|e| mapper.to_host(e.position).distance(&target))
            .collect()
    })
    .unwrap_or_default()
}

impl ValidationReport {
    /// Matches the add-on's data to `targets` (host units) and computes the
    /// offset statistics for each eye.
    pub fn from_data(targets: &[Point], data: &[PointData], mapper: &CoordinateMapper) -> Self {
        let points = targets
            .iter()
            .enumerate()
            .map(|(index, &target)| {
                let adcs = mapper.to_tracker(target);
                let found = data.iter().find(|d| d.position.distance(&adcs) < 1e-6);
                PointStats {
                    index,
                    target,
                    left: EyeStats::from_offsets(&offsets(found, target, mapper, |s| s.left)),
                    right: EyeStats::from_offsets(&offsets(found, target, mapper, |s| s.right)),
                }
            })
            .collect();
        Self {
            units: mapper.units(),
            points,
        }
    }

    /// Mean accuracy over points that have data, per eye.
    pub fn mean_accuracy(&self) -> (f64, f64) {
        let collect = |f: fn(&PointStats) -> f64| -> f64 {
            let values: Vec<f64> = self.points.iter().map(f).filter(|v| !v.is_nan()).collect();
            mean(&values).unwrap_or(f64::NAN)
        };
        (collect(|p| p.left.accuracy), collect(|p| p.right.accuracy))
    }

    /// Tab-separated block, as written to the data file.
    pub fn summary(&self) -> String {
        let mut out = format!("Validation Result\tUnits\t{}\n", self.units);
        out.push_str(
            "Point\tX\tY\tAccuracyLeft\tPrecisionLeft\tAccuracyRight\tPrecisionRight\n",
        );
        for p in &self.points {
            let values = [
                p.target.x,
                p.target.y,
                p.left.accuracy,
                p.left.precision,
                p.right.accuracy,
                p.right.precision,
            ];
            let row = values.iter().map(|v| format!("{v:.4}")).join("\t");
            out.push_str(&format!("{}\t{row}\n", p.index + 1));
        }
        let (left, right) = self.mean_accuracy();
        out.push_str(&format!("Mean\t\t\t{left:.4}\t\t{right:.4}\t"));
        out
    }
}

struct ValidationCollector<'b> {
    backend: &'b mut dyn ValidationBackend,
    positions: Vec<Point>,
}

impl PointCollector for ValidationCollector<'_> {
    fn collect(&mut self, index: usize) -> Result<()> {
        self.backend.start_collecting_data(self.positions[index])
    }

    fn busy(&self) -> bool {
        self.backend.is_collecting_data()
    }
}

/// Shows every target once and computes the report. `Ok(None)` when the
/// operator aborted. Validation mode is left on every path.
#[allow(clippy::too_many_arguments)]
pub fn run(
    backend: Option<&mut dyn ValidationBackend>,
    strategy: &mut dyn PresentationStrategy,
    window: &mut dyn Window,
    clock: &dyn Clock,
    mapper: &CoordinateMapper,
    config: &ControllerConfig,
    targets: &[Point],
    show_results: bool,
) -> Result<Option<ValidationReport>> {
    let backend = backend.ok_or(Error::MissingOptionalDependency("validation add-on"))?;
    if targets.is_empty() {
        return Err(Error::config("validation needs at least one point"));
    }
    config.validation.validate()?;
    let positions: Vec<Point> = targets.iter().map(|&p| mapper.to_tracker(p)).collect();
    let pending: BTreeSet<usize> = (0..targets.len()).collect();

    backend.enter_validation_mode(config.validation)?;
    let collected = {
        let mut collector = ValidationCollector {
            backend: &mut *backend,
            positions: positions.clone(),
        };
        let mut ctx = PresentContext {
            window: &mut *window,
            clock,
            mapper,
            config,
            targets: &positions,
            pending: &pending,
        };
        strategy.present(&mut ctx, &mut collector)
    };
    let data = match collected {
        Ok(PresentOutcome::Finished) => backend.compute().map(Some),
        Ok(PresentOutcome::Aborted) => Ok(None),
        Err(e) => Err(e),
    };
    backend.leave_validation_mode()?;

    let Some(data) = data? else {
        info!("validation aborted");
        return Ok(None);
    };
    let report = ValidationReport::from_data(targets, &data, mapper);
    let (left, right) = report.mean_accuracy();
    info!("validation accuracy: left {left:.4}, right {right:.4} ({})", report.units);

    if show_results {
        show_report(window, config, &report)?;
    }
    Ok(Some(report))
}

/// Displays the summary until the decision key is pressed.
pub fn show_report(
    window: &mut dyn Window,
    config: &ControllerConfig,
    report: &ValidationReport,
) -> Result<()> {
    let (_, height) = window.size();
    let top = height as f64 / 4.0;
    let line_height = height as f64 / 30.0;
    window.clear_keys();
    loop {
        if window.keys().contains(&config.keys.decision) {
            return Ok(());
        }
        for (i, line) in report.summary().lines().enumerate() {
            let pos = Point::new(0.0, top - i as f64 * line_height);
            window.draw(Shape::text(pos, line.replace('\t', "  "), config.target.text_color));
        }
        window.flip()?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Key;
    use crate::presentation::AutoPresentation;
    use crate::sim::{ManualClock, ScriptedWindow, SimValidation};
    use crate::tracker::ValidationParams;
    use assert_matches::assert_matches;

    fn mapper() -> CoordinateMapper {
        CoordinateMapper::new((800, 600), Units::Pix, None).unwrap()
    }

    #[test]
    fn offsets_are_summarised_per_eye() {
        let m = mapper();
        let target = Point::new(0.0, 0.0);
        let data = vec![PointData {
            position: Point::new(0.5, 0.5),
            samples: vec![
                PointSample {
                    // 8 px right, 6 px up
                    left: EyeSample::valid(Point::new(0.51, 0.49)),
                    right: EyeSample::invalid(),
                },
                PointSample {
                    left: EyeSample::valid(Point::new(0.5, 0.5)),
                    right: EyeSample::invalid(),
                },
            ],
        }];
        let report = ValidationReport::from_data(&[target], &data, &m);
        let stats = &report.points[0];
        assert!((stats.left.accuracy - 5.0).abs() < 1e-9);
        assert!((stats.left.precision - 5.0).abs() < 1e-9);
        assert_eq!(stats.left.samples, 2);
        assert!(stats.right.accuracy.is_nan());
        assert_eq!(stats.right.samples, 0);
    }

    #[test]
    fn summary_has_one_row_per_point() {
        let m = mapper();
        let targets = [Point::new(-100.0, 0.0), Point::new(100.0, 0.0)];
        let report = ValidationReport::from_data(&targets, &[], &m);
        let summary = report.summary();
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], "Validation Result\tUnits\tpix");
        assert!(lines[2].starts_with("1\t-100.0000\t0.0000\tNaN"));
        assert!(lines[4].starts_with("Mean"));
    }

    #[test]
    fn missing_add_on_fails_fast() {
        let clock = ManualClock::default();
        let mut window = ScriptedWindow::new((800, 600), clock.clone());
        let result = run(
            None,
            &mut AutoPresentation,
            &mut window,
            &clock,
            &mapper(),
            &ControllerConfig::default(),
            &[Point::new(0.0, 0.0)],
            false,
        );
        assert_matches!(result, Err(Error::MissingOptionalDependency(_)));
        assert_eq!(clock.frames(), 0);
    }

    #[test]
    fn auto_validation_reports_constant_offset() {
        let sim = SimValidation::new(Point::new(0.01, 0.0));
        let mut backend = sim.clone();
        let clock = ManualClock::default();
        let mut window =
            ScriptedWindow::new((800, 600), clock.clone()).with_keys(vec![(400, Key::Space)]);
        let targets = [Point::new(-200.0, 0.0), Point::new(200.0, 0.0)];
        let report = run(
            Some(&mut backend),
            &mut AutoPresentation,
            &mut window,
            &clock,
            &mapper(),
            &ControllerConfig::default(),
            &targets,
            true,
        )
        .unwrap()
        .unwrap();

        for p in &report.points {
            assert!((p.left.accuracy - 8.0).abs() < 1e-6);
            assert!(p.left.precision.abs() < 1e-6);
            assert_eq!(p.right.samples, 30);
        }
        let log = sim.log();
        assert_eq!((log.entered, log.left), (1, 1));
        assert_eq!(log.started.len(), 2);
        assert_eq!(window.remaining_keys(), 0);
    }

    #[test]
    fn collection_stops_at_the_timeout() {
        let sim = SimValidation::new(Point::new(0.0, 0.0));
        let mut backend = sim.clone();
        let clock = ManualClock::default();
        let mut window = ScriptedWindow::new((800, 600), clock.clone());
        let mut config = ControllerConfig::default();
        // 100 samples need 10 frames but the timeout allows 6
        config.validation = ValidationParams {
            sample_count: 100,
            timeout: 0.1,
        };
        let report = run(
            Some(&mut backend),
            &mut AutoPresentation,
            &mut window,
            &clock,
            &mapper(),
            &config,
            &[Point::new(0.0, 0.0)],
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(report.points[0].left.samples, 60);
        assert_eq!(sim.log().params, Some(config.validation));
    }

    #[test]
    fn out_of_range_params_are_rejected_before_entering_mode() {
        let sim = SimValidation::new(Point::new(0.0, 0.0));
        let mut backend = sim.clone();
        let clock = ManualClock::default();
        let mut window = ScriptedWindow::new((800, 600), clock.clone());
        let mut config = ControllerConfig::default();
        config.validation.sample_count = 5;
        let result = run(
            Some(&mut backend),
            &mut AutoPresentation,
            &mut window,
            &clock,
            &mapper(),
            &config,
            &[Point::new(0.0, 0.0)],
            false,
        );
        assert_matches!(result, Err(Error::Configuration(_)));
        assert_eq!(sim.log().entered, 0);
    }

    #[test]
    fn aborted_validation_leaves_mode() {
        let sim = SimValidation::new(Point::new(0.0, 0.0));
        let mut backend = sim.clone();
        let clock = ManualClock::default();
        let mut window =
            ScriptedWindow::new((800, 600), clock.clone()).with_keys(vec![(5, Key::Escape)]);
        let report = run(
            Some(&mut backend),
            &mut AutoPresentation,
            &mut window,
            &clock,
            &mapper(),
            &ControllerConfig::default(),
            &[Point::new(0.0, 0.0)],
            false,
        )
        .unwrap();
        assert!(report.is_none());
        assert_eq!(sim.log().left, 1);
    }
}
