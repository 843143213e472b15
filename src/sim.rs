//! Synthetic tracker, backends and host for tests and the terminal demo.
//!
//! Time is frame counted: every [`ScriptedWindow::flip`] advances the
//! [`ManualClock`] by exactly one refresh and pushes one sample from the
//! gaze script to whoever is subscribed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::coords::{Point, TrackBoxPoint};
use crate::error::{Error, Result};
use crate::gaze::{EyeData, GazeSample};
use crate::host::{Clock, Key, MoviePlayer, Shape, Window};
use crate::tracker::{
    CalibrationBackend, CalibrationResult, CalibrationStatus, CollectStatus, EyeSample,
    EyeTracker, GazeCallback, PointData, PointSample, TrackerInfo, ValidationBackend,
    ValidationParams,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct ClockState {
    frames: u64,
    waited_us: u64,
}

/// Deterministic clock advanced by frames and explicit waits.
#[derive(Debug, Clone)]
pub struct ManualClock {
    refresh_rate: f64,
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn new(refresh_rate: f64) -> Self {
        Self {
            refresh_rate,
            state: Arc::new(Mutex::new(ClockState {
                frames: 0,
                waited_us: 0,
            })),
        }
    }

    pub fn advance_frame(&self) {
        lock(&self.state).frames += 1;
    }

    pub fn frames(&self) -> u64 {
        lock(&self.state).frames
    }

    pub fn refresh_rate(&self) -> f64 {
        self.refresh_rate
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(60.0)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        let state = lock(&self.state);
        state.frames as f64 / self.refresh_rate + state.waited_us as f64 / 1_000_000.0
    }

    fn wait(&self, secs: f64) {
        if secs > 0.0 {
            lock(&self.state).waited_us += (secs * 1_000_000.0).round() as u64;
        }
    }
}

/// Both eyes as a function of time since the clock started.
pub type GazeScript = Box<dyn Fn(f64) -> (EyeData, EyeData) + Send>;

pub fn looking_at(point: Point) -> GazeScript {
    Box::new(move |_| {
        let mut eye = EyeData::valid(point, 3.5);
        eye.track_box = TrackBoxPoint::new(0.5, 0.5, 0.5);
        (eye, eye)
    })
}

/// Valid gaze for `t < until`, lost afterwards.
pub fn looking_until(until: f64) -> GazeScript {
    Box::new(move |t| {
        if t < until {
            let eye = EyeData::valid(Point::new(0.5, 0.5), 3.5);
            (eye, eye)
        } else {
            (EyeData::invalid(), EyeData::invalid())
        }
    })
}

/// Gaze lost during each `[start, end)` span, valid otherwise.
pub fn looking_except(gaps: Vec<(f64, f64)>) -> GazeScript {
    Box::new(move |t| {
        if gaps.iter().any(|&(start, end)| t >= start && t < end) {
            (EyeData::invalid(), EyeData::invalid())
        } else {
            let eye = EyeData::valid(Point::new(0.5, 0.5), 3.5);
            (eye, eye)
        }
    })
}

/// Head drifting slowly around the track box, for the status view.
pub fn wandering() -> GazeScript {
    Box::new(|t| {
        let dx = (t * 0.7).sin() * 0.2;
        let dz = (t * 0.3).cos() * 0.3;
        let mut left = EyeData::valid(Point::new(0.5 + dx, 0.5), 3.2);
        let mut right = EyeData::valid(Point::new(0.52 + dx, 0.5), 3.3);
        left.track_box = TrackBoxPoint::new(0.45 + dx, 0.5, 0.5 + dz);
        right.track_box = TrackBoxPoint::new(0.55 + dx, 0.5, 0.5 + dz);
        (left, right)
    })
}

struct TrackerState {
    callback: Option<GazeCallback>,
    script: GazeScript,
    subscriptions: usize,
    unsubscriptions: usize,
}

/// Gaze source that emits one scripted sample per frame while subscribed.
/// Its device clock follows `clock`.
#[derive(Clone)]
pub struct SimulatedTracker {
    clock: Arc<dyn Clock + Send + Sync>,
    state: Arc<Mutex<TrackerState>>,
}

impl SimulatedTracker {
    pub fn new(clock: impl Clock + Send + Sync + 'static, script: GazeScript) -> Self {
        Self {
            clock: Arc::new(clock),
            state: Arc::new(Mutex::new(TrackerState {
                callback: None,
                script,
                subscriptions: 0,
                unsubscriptions: 0,
            })),
        }
    }

    pub fn set_script(&self, script: GazeScript) {
        lock(&self.state).script = script;
    }

    /// Deliver one sample at the current time, if anyone is listening.
    pub fn tick(&self) {
        let t = self.clock.now();
        let timestamp = self.system_time_stamp();
        let mut state = lock(&self.state);
        let (left, right) = (state.script)(t);
        if let Some(callback) = state.callback.as_mut() {
            callback(GazeSample::new(timestamp, left, right));
        }
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.state).callback.is_some()
    }

    pub fn subscription_counts(&self) -> (usize, usize) {
        let state = lock(&self.state);
        (state.subscriptions, state.unsubscriptions)
    }
}

impl EyeTracker for SimulatedTracker {
    fn info(&self) -> TrackerInfo {
        TrackerInfo {
            address: "sim://0".to_string(),
            model: "Simulated".to_string(),
            serial_number: "SIM-0001".to_string(),
            name: "simulated tracker".to_string(),
        }
    }

    fn system_time_stamp(&self) -> i64 {
        (self.clock.now() * 1_000_000.0).round() as i64
    }

    fn subscribe(&mut self, callback: GazeCallback) -> Result<()> {
        let mut state = lock(&self.state);
        state.callback = Some(callback);
        state.subscriptions += 1;
        Ok(())
    }

    fn unsubscribe(&mut self) {
        let mut state = lock(&self.state);
        if state.callback.take().is_some() {
            state.unsubscriptions += 1;
        }
    }
}

/// Window that replays scripted key presses and records what was drawn.
pub struct ScriptedWindow {
    size: (u32, u32),
    clock: ManualClock,
    tracker: Option<SimulatedTracker>,
    keys: VecDeque<(u64, Key)>,
    frames_until_key: Option<u64>,
    pending: Vec<Key>,
    current: Vec<Shape>,
    last_frame: Vec<Shape>,
    max_frames: u64,
}

impl ScriptedWindow {
    pub fn new(size: (u32, u32), clock: ManualClock) -> Self {
        Self {
            size,
            clock,
            tracker: None,
            keys: VecDeque::new(),
            frames_until_key: None,
            pending: Vec::new(),
            current: Vec::new(),
            last_frame: Vec::new(),
            max_frames: 100_000,
        }
    }

    /// Feed this tracker one sample per flip.
    pub fn with_tracker(mut self, tracker: SimulatedTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Each key is pressed `frames` flips after the previous one.
    pub fn with_keys(mut self, keys: Vec<(u64, Key)>) -> Self {
        self.keys = keys.into();
        self.frames_until_key = self.keys.front().map(|(frames, _)| *frames);
        self
    }

    pub fn with_max_frames(mut self, max_frames: u64) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Shapes presented by the most recent flip.
    pub fn last_frame(&self) -> &[Shape] {
        &self.last_frame
    }

    pub fn remaining_keys(&self) -> usize {
        self.keys.len()
    }

    fn release_keys(&mut self) {
        while let Some(0) = self.frames_until_key {
            if let Some((_, key)) = self.keys.pop_front() {
                self.pending.push(key);
            }
            self.frames_until_key = self.keys.front().map(|(frames, _)| *frames);
        }
    }
}

impl Window for ScriptedWindow {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn draw(&mut self, shape: Shape) {
        self.current.push(shape);
    }

    fn flip(&mut self) -> Result<()> {
        if self.clock.frames() >= self.max_frames {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "scripted window ran out of frames",
            )));
        }
        self.clock.advance_frame();
        if let Some(tracker) = &self.tracker {
            tracker.tick();
        }
        self.last_frame = std::mem::take(&mut self.current);
        if let Some(n) = self.frames_until_key.as_mut() {
            *n = n.saturating_sub(1);
        }
        self.release_keys();
        Ok(())
    }

    fn keys(&mut self) -> Vec<Key> {
        self.release_keys();
        std::mem::take(&mut self.pending)
    }
}

#[derive(Debug, Default, Clone)]
pub struct CalibrationLog {
    pub entered: usize,
    pub left: usize,
    pub collected: Vec<Point>,
    pub discarded: Vec<Point>,
    pub computed: usize,
}

/// Calibration backend that "fits" whatever was collected.
#[derive(Clone, Default)]
pub struct SimCalibration {
    log: Arc<Mutex<CalibrationLog>>,
    always_fail: bool,
    /// Every other collect attempt reports failure.
    flaky_collect: bool,
    attempts: Arc<Mutex<usize>>,
}

impl SimCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always_failing() -> Self {
        Self {
            always_fail: true,
            ..Self::default()
        }
    }

    pub fn flaky() -> Self {
        Self {
            flaky_collect: true,
            ..Self::default()
        }
    }

    pub fn log(&self) -> CalibrationLog {
        lock(&self.log).clone()
    }
}

impl CalibrationBackend for SimCalibration {
    fn enter_calibration_mode(&mut self) -> Result<()> {
        lock(&self.log).entered += 1;
        Ok(())
    }

    fn collect_data(&mut self, point: Point) -> Result<CollectStatus> {
        lock(&self.log).collected.push(point);
        let mut attempts = lock(&self.attempts);
        *attempts += 1;
        if self.always_fail || (self.flaky_collect && *attempts % 2 == 1) {
            Ok(CollectStatus::Failure)
        } else {
            Ok(CollectStatus::Success)
        }
    }

    fn discard_data(&mut self, point: Point) -> Result<()> {
        lock(&self.log).discarded.push(point);
        Ok(())
    }

    fn compute_and_apply(&mut self) -> Result<CalibrationResult> {
        let mut log = lock(&self.log);
        log.computed += 1;
        if self.always_fail {
            return Ok(CalibrationResult::failure());
        }
        let mut points: Vec<PointData> = Vec::new();
        for p in &log.collected {
            if points.iter().any(|d| d.position.distance(p) < 1e-9) {
                continue;
            }
            let near = |dx: f64| EyeSample::valid(Point::new(p.x + dx, p.y - dx));
            points.push(PointData {
                position: *p,
                samples: vec![
                    PointSample {
                        left: near(0.01),
                        right: near(-0.01),
                    },
                    PointSample {
                        left: near(0.02),
                        right: EyeSample::invalid(),
                    },
                ],
            });
        }
        Ok(CalibrationResult {
            status: CalibrationStatus::Success,
            points,
        })
    }

    fn leave_calibration_mode(&mut self) -> Result<()> {
        lock(&self.log).left += 1;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct ValidationLog {
    pub entered: usize,
    pub left: usize,
    pub params: Option<ValidationParams>,
    pub started: Vec<Point>,
    /// Samples gathered at each started point.
    pub collected: Vec<usize>,
}

/// Validation add-on returning gaze offset by a fixed error from each target.
/// Gathers ten samples per poll, one poll per 60 Hz frame, until it has
/// `sample_count` samples or the timeout runs out.
#[derive(Clone)]
pub struct SimValidation {
    log: Arc<Mutex<ValidationLog>>,
    busy_polls: Arc<Mutex<u32>>,
    offset: Point,
}

impl SimValidation {
    const SAMPLES_PER_POLL: u32 = 10;
    const POLL_RATE: f64 = 60.0;

    pub fn new(offset: Point) -> Self {
        Self {
            log: Arc::default(),
            busy_polls: Arc::default(),
            offset,
        }
    }

    pub fn log(&self) -> ValidationLog {
        lock(&self.log).clone()
    }
}

impl ValidationBackend for SimValidation {
    fn enter_validation_mode(&mut self, params: ValidationParams) -> Result<()> {
        let mut log = lock(&self.log);
        log.entered += 1;
        log.params = Some(params);
        Ok(())
    }

    fn start_collecting_data(&mut self, point: Point) -> Result<()> {
        let mut log = lock(&self.log);
        let params = log
            .params
            .ok_or_else(|| Error::config("not in validation mode"))?;
        let needed = params.sample_count.div_ceil(Self::SAMPLES_PER_POLL);
        let allowed = (params.timeout * Self::POLL_RATE).round() as u32;
        let polls = needed.min(allowed);
        log.started.push(point);
        log.collected
            .push(params.sample_count.min(polls * Self::SAMPLES_PER_POLL) as usize);
        *lock(&self.busy_polls) = polls;
        Ok(())
    }

    fn is_collecting_data(&self) -> bool {
        let mut polls = lock(&self.busy_polls);
        if *polls == 0 {
            return false;
        }
        *polls -= 1;
        true
    }

    fn compute(&mut self) -> Result<Vec<PointData>> {
        let log = lock(&self.log);
        Ok(log
            .started
            .iter()
            .zip(&log.collected)
            .map(|(p, &count)| {
                let gaze = Point::new(p.x + self.offset.x, p.y + self.offset.y);
                PointData {
                    position: *p,
                    samples: vec![
                        PointSample {
                            left: EyeSample::valid(gaze),
                            right: EyeSample::valid(gaze),
                        };
                        count
                    ],
                }
            })
            .collect())
    }

    fn leave_validation_mode(&mut self) -> Result<()> {
        lock(&self.log).left += 1;
        Ok(())
    }
}

/// Movie that lasts a fixed number of frames.
#[derive(Debug, Clone)]
pub struct SimMovie {
    pub source: String,
    pub playing: bool,
    pub plays: usize,
    pub stops: usize,
    pub frame: u64,
    pub length: u64,
}

impl SimMovie {
    pub fn new(source: impl Into<String>, length: u64) -> Self {
        Self {
            source: source.into(),
            playing: false,
            plays: 0,
            stops: 0,
            frame: 0,
            length,
        }
    }
}

impl MoviePlayer for SimMovie {
    fn play(&mut self) {
        self.playing = true;
        self.plays += 1;
    }

    fn stop(&mut self) {
        self.playing = false;
        self.stops += 1;
    }

    fn draw(&mut self, window: &mut dyn Window) {
        if self.playing && self.frame < self.length {
            self.frame += 1;
        }
        window.draw(Shape::Image {
            source: self.source.clone(),
            center: Point::new(0.0, 0.0),
            size: 200.0,
        });
    }

    fn is_finished(&self) -> bool {
        self.frame >= self.length
    }

    fn rewind(&mut self) {
        self.frame = 0;
        self.playing = false;
    }
}
