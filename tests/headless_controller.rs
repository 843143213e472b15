use std::fs;
use std::path::Path;

use assert_matches::assert_matches;

use infant_gaze::config::ControllerConfig;
use infant_gaze::coords::{CoordinateMapper, Monitor, Point, Units};
use infant_gaze::host::{Clock, Color, Key, Shape, Window};
use infant_gaze::looking_time::LookingTimeParams;
use infant_gaze::presentation::InfantPresentation;
use infant_gaze::sim::{self, ManualClock, ScriptedWindow, SimCalibration, SimMovie, SimulatedTracker};
use infant_gaze::tracker::LeaseOwner;
use infant_gaze::{Error, GazeController, TrackerDevice};

// Headless runs of the whole controller: a scripted window drives a
// simulated tracker one sample per frame on a manual 60 Hz clock.

fn controller(
    script: sim::GazeScript,
    calibration: SimCalibration,
    keys: Vec<(u64, Key)>,
) -> (GazeController<ScriptedWindow, ManualClock>, SimulatedTracker) {
    controller_with_config(script, calibration, keys, ControllerConfig::default())
}

fn controller_with_config(
    script: sim::GazeScript,
    calibration: SimCalibration,
    keys: Vec<(u64, Key)>,
    config: ControllerConfig,
) -> (GazeController<ScriptedWindow, ManualClock>, SimulatedTracker) {
    let clock = ManualClock::new(60.0);
    let tracker = SimulatedTracker::new(clock.clone(), script);
    let window = ScriptedWindow::new((800, 600), clock.clone())
        .with_tracker(tracker.clone())
        .with_keys(keys);
    let device = TrackerDevice {
        tracker: Box::new(tracker.clone()),
        calibration: Box::new(calibration),
        validation: None,
    };
    let controller = GazeController::new(window, clock, vec![device], 0, config).unwrap();
    (controller, tracker)
}

fn stimulus() -> Vec<Shape> {
    vec![Shape::disc(Point::new(0.0, 0.0), 40.0, Color::Yellow)]
}

#[test]
fn coordinates_round_trip_in_every_unit() {
    let monitor = Some(Monitor::new(53.0, 65.0));
    let units = [
        Units::Norm,
        Units::Height,
        Units::Pix,
        Units::Cm,
        Units::Deg,
        Units::DegFlat,
        Units::DegFlatPos,
    ];
    for unit in units {
        let mapper = CoordinateMapper::new((1280, 1024), unit, monitor).unwrap();
        let tolerance = if unit.is_physical() { 1e-6 } else { 1e-9 };
        for p in [(0.0, 0.0), (0.5, 0.5), (0.9, 0.1), (0.25, 0.75)] {
            let p = Point::from(p);
            let back = mapper.to_tracker(mapper.to_host(p));
            assert!(back.distance(&p) < tolerance, "{unit}: {p:?} came back as {back:?}");
        }
    }
}

#[test]
fn looking_away_ends_the_trial() {
    // trial starts after the 0.5 s settle wait; gaze is lost 2 s into it
    let (mut controller, tracker) = controller(sim::looking_until(2.5), SimCalibration::new(), vec![]);
    let looking = controller
        .collect_looking_time(LookingTimeParams::new(10.0, 1.0), &stimulus())
        .unwrap();
    assert!((looking - 2.0).abs() < 1e-6, "looking time {looking}");
    assert!(!tracker.is_subscribed());
    assert_eq!(tracker.subscription_counts(), (1, 1));
    assert_eq!(controller.lease_holder(), None);
}

#[test]
fn uninterrupted_looking_returns_max_time() {
    let (mut controller, _) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        SimCalibration::new(),
        vec![],
    );
    let looking = controller
        .collect_looking_time(LookingTimeParams::new(3.0, 1.0), &stimulus())
        .unwrap();
    assert_eq!(looking, 3.0);
}

#[test]
fn short_absences_count_as_looking() {
    let (mut controller, _) = controller(
        sim::looking_except(vec![(1.5, 2.0)]),
        SimCalibration::new(),
        vec![],
    );
    let looking = controller
        .collect_looking_time(LookingTimeParams::new(4.0, 2.0), &stimulus())
        .unwrap();
    assert_eq!(looking, 4.0);
}

#[test]
fn configured_blink_tolerance_applies_unless_overridden() {
    let config = ControllerConfig {
        blink_tolerance: 0.25,
        ..ControllerConfig::default()
    };
    let (mut controller, _) = controller_with_config(
        sim::looking_except(vec![(1.5, 2.0)]),
        SimCalibration::new(),
        vec![],
        config.clone(),
    );
    let looking = controller
        .collect_looking_time(LookingTimeParams::new(4.0, 2.0), &stimulus())
        .unwrap();
    assert!((looking - 3.5).abs() < 1e-6, "looking time {looking}");

    let (mut controller, _) = controller_with_config(
        sim::looking_except(vec![(1.5, 2.0)]),
        SimCalibration::new(),
        vec![],
        config,
    );
    let params = LookingTimeParams::new(4.0, 2.0).with_blink_tolerance(1.0);
    assert_eq!(controller.collect_looking_time(params, &stimulus()).unwrap(), 4.0);
}

#[test]
fn long_absences_are_subtracted_from_movie_trials() {
    let (mut controller, _) = controller(
        sim::looking_except(vec![(1.5, 3.0)]),
        SimCalibration::new(),
        vec![],
    );
    let mut movie = SimMovie::new("clip.mp4", 90);
    let looking = controller
        .collect_looking_time_movie(LookingTimeParams::new(4.0, 2.0), &mut movie)
        .unwrap();
    assert!((looking - 2.5).abs() < 1e-6, "looking time {looking}");
    assert!(!movie.playing);
    assert_eq!(movie.stops, 1);
    // 240 frames of a 90 frame clip
    assert_eq!(movie.plays, 3);
}

#[test]
fn looking_time_reuses_an_active_recording() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, tracker) = controller(sim::looking_until(2.5), SimCalibration::new(), vec![]);
    controller
        .start_recording(Some(&dir.path().join("trial.tsv")), true, None)
        .unwrap();
    let looking = controller
        .collect_looking_time(LookingTimeParams::new(10.0, 1.0), &stimulus())
        .unwrap();
    assert!((looking - 2.0).abs() < 1e-6, "looking time {looking}");
    assert!(tracker.is_subscribed());
    assert_eq!(controller.lease_holder(), Some(LeaseOwner::Recording));
    controller.close().unwrap();
    assert_eq!(tracker.subscription_counts(), (1, 1));
}

#[test]
fn second_recording_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (mut controller, tracker) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        SimCalibration::new(),
        vec![],
    );
    controller
        .start_recording(Some(&dir.path().join("a.tsv")), true, None)
        .unwrap();
    assert_matches!(
        controller.start_recording(Some(&dir.path().join("b.tsv")), true, None),
        Err(Error::TrackerBusy {
            held_by: LeaseOwner::Recording
        })
    );
    assert_eq!(tracker.subscription_counts(), (1, 0));
    assert!(!dir.path().join("b.tsv").exists());

    assert!(controller.stop_recording().unwrap());
    controller
        .start_recording(None, false, None)
        .unwrap();
    assert_eq!(tracker.subscription_counts(), (2, 1));
    controller.close().unwrap();
}

#[test]
fn data_file_cannot_be_swapped_mid_session() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.tsv");
    let second = dir.path().join("b.tsv");
    let (mut controller, _) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        SimCalibration::new(),
        vec![],
    );
    controller.start_recording(Some(&first), true, None).unwrap();
    for _ in 0..10 {
        controller.window_mut().flip().unwrap();
    }
    assert_matches!(
        controller.open_datafile(Some(Path::new(""))),
        Err(Error::TrackerBusy {
            held_by: LeaseOwner::Recording
        })
    );
    assert_matches!(
        controller.open_datafile(Some(&second)),
        Err(Error::TrackerBusy { .. })
    );
    assert!(!second.exists());
    assert!(controller.stop_recording().unwrap());

    // a name that cannot be created leaves the open file in place
    assert_matches!(
        controller.open_datafile(Some(dir.path())),
        Err(Error::Configuration(_))
    );
    assert_eq!(controller.datafile_path(), Some(first.as_path()));

    controller.open_datafile(Some(&second)).unwrap();
    assert_eq!(controller.datafile_path(), Some(second.as_path()));
    controller.close().unwrap();

    let text = fs::read_to_string(&first).unwrap();
    assert_eq!(text.matches("Session Start").count(), 1);
    assert_eq!(text.matches("Session End").count(), 1);
    let header = text.lines().position(|l| l.starts_with("TimeStamp")).unwrap();
    let rows = text.lines().skip(header + 1).take_while(|l| *l != "Events");
    assert_eq!(rows.count(), 10);
    assert!(!fs::read_to_string(&second).unwrap().contains("Session Start"));
}

#[test]
fn invalid_trial_parameters_are_rejected_before_subscribing() {
    let (mut controller, tracker) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        SimCalibration::new(),
        vec![],
    );
    assert_matches!(
        controller.collect_looking_time(LookingTimeParams::new(0.0, 1.0), &stimulus()),
        Err(Error::Configuration(_))
    );
    assert_eq!(controller.lease_holder(), None);
    assert_eq!(tracker.subscription_counts(), (0, 0));
}

#[test]
fn embedded_events_are_interleaved_with_gaze() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("embedded.tsv");
    let (mut controller, _) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        SimCalibration::new(),
        vec![],
    );
    controller.start_recording(Some(&path), true, Some(true)).unwrap();
    for frame in 0..6 {
        if frame == 3 {
            // between the third and fourth sample
            controller.clock().wait(0.004);
            assert!(controller.record_event("stim_on"));
        }
        controller.window_mut().flip().unwrap();
    }
    controller.clock().wait(0.1);
    assert!(controller.record_event("trial_end"));
    controller.close().unwrap();
    assert!(!controller.record_event("too_late"));

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert!(lines[0].starts_with("Recording date:\t"));
    assert!(lines[1].starts_with("Recording time:\t"));
    assert_eq!(lines[2], "Recording resolution:\t800 x 600");
    assert_eq!(lines[3], "Session Start");
    assert_eq!(lines[4], "Event recording mode:\tEmbedded");
    assert!(lines[5].starts_with("TimeStamp\tGazePointXLeft"));
    assert!(lines[5].ends_with("\tPupilValidityRight\tEvent"));
    assert_eq!(*lines.last().unwrap(), "Session End");

    let rows: Vec<Vec<&str>> = lines[6..lines.len() - 1]
        .iter()
        .map(|l| l.split('\t').collect())
        .collect();
    assert_eq!(rows.len(), 8);
    assert!(rows.iter().all(|r| r.len() == 14));
    assert_eq!(rows[3][13], "stim_on");
    assert!(rows[..3].iter().all(|r| r[13].is_empty()));
    assert_eq!(rows[3][3], "1");
    // nothing to interpolate from after the last sample
    assert_eq!(rows[7][13], "trial_end");
    assert_eq!(rows[7][1], "NaN");
    assert_eq!(rows[7][3], "0");

    let stamps: Vec<f64> = rows.iter().map(|r| r[0].parse().unwrap()).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(stamps[0], 516.7);
}

#[test]
fn separated_events_follow_the_gaze_block() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("separated.tsv");
    let (mut controller, _) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        SimCalibration::new(),
        vec![],
    );
    controller.start_recording(Some(&path), true, Some(false)).unwrap();
    controller.window_mut().flip().unwrap();
    controller.record_event("first");
    controller.window_mut().flip().unwrap();
    controller.stop_recording().unwrap();
    controller.start_recording(None, false, None).unwrap();
    controller.window_mut().flip().unwrap();
    controller.close().unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches("Session Start").count(), 2);
    assert_eq!(text.matches("Event recording mode:\tSeparated").count(), 2);
    let lines: Vec<&str> = text.lines().collect();
    let events = lines.iter().position(|l| *l == "Events").unwrap();
    assert_eq!(lines[events + 1], "TimeStamp\tEvent");
    assert!(lines[events + 2].ends_with("\tfirst"));
    assert_eq!(lines[events + 3], "Session End");
}

#[test]
fn failed_calibration_can_be_retried_then_aborted() {
    let backend = SimCalibration::always_failing();
    let (mut controller, tracker) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        backend.clone(),
        vec![(455, Key::Space), (460, Key::Escape)],
    );
    let targets = infant_gaze::calibration::standard_targets(5, controller.mapper()).unwrap();
    let accepted = controller.run_calibration(&targets).unwrap();
    assert!(!accepted);

    let log = backend.log();
    assert_eq!(log.entered, 1);
    assert_eq!(log.left, 1);
    assert_eq!(log.computed, 2);
    assert_eq!(log.discarded.len(), 5);
    assert_eq!(log.collected.len(), 20);
    assert_eq!(controller.lease_holder(), None);
    assert!(!tracker.is_subscribed());
    assert_eq!(controller.window().remaining_keys(), 0);
}

#[test]
fn accepted_calibration_targets_are_used_for_validation() {
    let backend = SimCalibration::new();
    let clock = ManualClock::new(60.0);
    let tracker = SimulatedTracker::new(clock.clone(), sim::looking_at(Point::new(0.5, 0.5)));
    let validation = sim::SimValidation::new(Point::new(0.01, 0.0));
    let window = ScriptedWindow::new((800, 600), clock.clone())
        .with_tracker(tracker.clone())
        .with_keys(vec![(455, Key::Space)]);
    let device = TrackerDevice {
        tracker: Box::new(tracker),
        calibration: Box::new(backend.clone()),
        validation: Some(Box::new(validation.clone())),
    };
    let mut controller =
        GazeController::new(window, clock, vec![device], 0, ControllerConfig::default()).unwrap();
    let targets = infant_gaze::calibration::standard_targets(5, controller.mapper()).unwrap();
    assert!(controller.run_calibration(&targets).unwrap());

    let report = controller.run_validation(None, false, false).unwrap().unwrap();
    assert_eq!(report.points.len(), 5);
    let log = validation.log();
    assert_eq!((log.entered, log.left), (1, 1));
    assert_eq!(log.started.len(), 5);
    assert!(report.summary().starts_with("Validation Result"));
}

#[test]
fn infant_calibration_retries_points_chosen_in_review() {
    let backend = SimCalibration::new();
    let keys = vec![
        // round 1: show and collect each point, then finish
        (1, Key::Char('1')),
        (1, Key::Space),
        (1, Key::Char('2')),
        (1, Key::Space),
        (1, Key::Char('3')),
        (1, Key::Space),
        (1, Key::Return),
        // review: {2}, select all, drop 1 and 3, retry
        (1, Key::Char('2')),
        (1, Key::Char('0')),
        (1, Key::Char('1')),
        (1, Key::Char('3')),
        (1, Key::Space),
        // round 2: point 1 is no longer pending, point 2 is
        (1, Key::Char('1')),
        (1, Key::Space),
        (1, Key::Char('2')),
        (1, Key::Space),
        (1, Key::Return),
        // review: nothing selected, accept
        (1, Key::Space),
    ];
    let (controller, tracker) = controller(
        sim::looking_at(Point::new(0.5, 0.5)),
        backend.clone(),
        keys,
    );
    let mut controller =
        controller.with_strategy(Box::new(InfantPresentation::with_seed(vec!["bee.png".into()], 3)));
    let targets = infant_gaze::calibration::standard_targets(3, controller.mapper()).unwrap();
    assert!(controller.run_calibration(&targets).unwrap());

    let log = backend.log();
    assert_eq!((log.entered, log.left), (1, 1));
    assert_eq!(log.computed, 2);
    assert_eq!(log.collected.len(), 4);
    assert_eq!(log.discarded.len(), 1);
    let second = Point::new(0.9, 0.1);
    assert!(log.discarded[0].distance(&second) < 1e-9);
    assert!(log.collected[3].distance(&second) < 1e-9);
    assert_eq!(controller.window().remaining_keys(), 0);
    assert_eq!(controller.lease_holder(), None);
    assert!(!tracker.is_subscribed());
}
