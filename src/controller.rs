//! [`GazeController`]: one tracker, one window, one data file.
//!
//! The controller owns the tracker and its backends and hands out the gaze
//! subscription to one procedure at a time through a [`TrackerLease`].
//! Calibration and validation presentation is delegated to the
//! [`PresentationStrategy`] chosen at construction.

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app_dirs::AppDirs;
use crate::buffer::SharedBuffer;
use crate::calibration;
use crate::config::ControllerConfig;
use crate::coords::{CoordinateMapper, Point};
use crate::error::{Error, Result};
use crate::host::{Clock, MoviePlayer, Shape, Window};
use crate::looking_time::{self, LookingTimeParams};
use crate::presentation::{AutoPresentation, PresentationStrategy};
use crate::recording::Recorder;
use crate::status;
use crate::tracker::{
    CalibrationBackend, EyeTracker, LeaseOwner, TrackerInfo, TrackerLease, ValidationBackend,
};
use crate::validation::{self, ValidationReport};

/// A detected tracker with its calibration backend and, when installed, the
/// validation add-on.
pub struct TrackerDevice {
    pub tracker: Box<dyn EyeTracker>,
    pub calibration: Box<dyn CalibrationBackend>,
    pub validation: Option<Box<dyn ValidationBackend>>,
}

pub struct GazeController<W: Window, C: Clock> {
    window: W,
    clock: C,
    tracker: Box<dyn EyeTracker>,
    calibration: Box<dyn CalibrationBackend>,
    validation: Option<Box<dyn ValidationBackend>>,
    strategy: Box<dyn PresentationStrategy>,
    config: ControllerConfig,
    mapper: CoordinateMapper,
    lease: TrackerLease,
    recorder: Recorder,
    /// Targets of the last accepted calibration; the default validation set.
    calibration_targets: Vec<Point>,
}

impl<W: Window, C: Clock> std::fmt::Debug for GazeController<W, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GazeController")
            .field("config", &self.config)
            .field("mapper", &self.mapper)
            .finish_non_exhaustive()
    }
}

impl<W: Window, C: Clock> GazeController<W, C> {
    /// Takes the tracker at `index` among the detected `devices`.
    pub fn new(
        window: W,
        clock: C,
        mut devices: Vec<TrackerDevice>,
        index: usize,
        config: ControllerConfig,
    ) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::DeviceNotFound("no eye tracker detected".to_string()));
        }
        if index >= devices.len() {
            return Err(Error::DeviceNotFound(format!(
                "tracker index {index} out of range ({} detected)",
                devices.len()
            )));
        }
        let device = devices.swap_remove(index);
        let mapper = CoordinateMapper::new(window.size(), config.units, config.monitor)?;
        let info = device.tracker.info();
        info!(
            "using {} {} ({}) at {}",
            info.model, info.name, info.serial_number, info.address
        );
        Ok(Self {
            window,
            clock,
            tracker: device.tracker,
            calibration: device.calibration,
            validation: device.validation,
            strategy: Box::new(AutoPresentation),
            config,
            mapper,
            lease: TrackerLease::default(),
            recorder: Recorder::new(),
            calibration_targets: Vec::new(),
        })
    }

    pub fn with_strategy(mut self, strategy: Box<dyn PresentationStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn tracker_info(&self) -> TrackerInfo {
        self.tracker.info()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn window_mut(&mut self) -> &mut W {
        &mut self.window
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn lease_holder(&self) -> Option<LeaseOwner> {
        self.lease.holder()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn datafile_path(&self) -> Option<&Path> {
        self.recorder.datafile_path()
    }

    /// Runs `f` with a private gaze subscription, released on every path.
    fn with_subscription<T>(
        &mut self,
        owner: LeaseOwner,
        f: impl FnOnce(&mut Self, &SharedBuffer) -> Result<T>,
    ) -> Result<T> {
        self.lease.acquire(owner)?;
        let buffer = SharedBuffer::new();
        let writer = buffer.clone();
        if let Err(e) = self
            .tracker
            .subscribe(Box::new(move |sample| writer.append_sample(sample)))
        {
            self.lease.release(owner);
            return Err(e);
        }
        let result = f(self, &buffer);
        self.tracker.unsubscribe();
        self.lease.release(owner);
        result
    }

    /// Track-box view for positioning the participant, optionally with an
    /// attention-grabbing movie. Ends on the decision or abort key.
    pub fn show_status(&mut self, movie: Option<&mut dyn MoviePlayer>) -> Result<()> {
        self.with_subscription(LeaseOwner::Status, |this, buffer| {
            status::show_status(&mut this.window, buffer, &this.config, movie)
        })
    }

    /// Interactive calibration at `targets` (host units). `Ok(false)` when
    /// the operator aborted; callers should stop the experiment then.
    pub fn run_calibration(&mut self, targets: &[Point]) -> Result<bool> {
        calibration::calibration_points(targets, &self.mapper)?;
        self.lease.acquire(LeaseOwner::Calibration)?;
        let result = calibration::run(
            self.calibration.as_mut(),
            self.strategy.as_mut(),
            &mut self.window,
            &self.clock,
            &self.mapper,
            &self.config,
            targets,
        );
        self.lease.release(LeaseOwner::Calibration);
        if let Ok(true) = result {
            self.calibration_targets = targets.to_vec();
        }
        result
    }

    /// Validation at `targets`, or at the last calibration's targets. The
    /// summary is queued for the data file when `save_to_file` is set.
    pub fn run_validation(
        &mut self,
        targets: Option<&[Point]>,
        show_results: bool,
        save_to_file: bool,
    ) -> Result<Option<ValidationReport>> {
        if self.validation.is_none() {
            return Err(Error::MissingOptionalDependency("validation add-on"));
        }
        let targets = match targets {
            Some(t) => t.to_vec(),
            None if !self.calibration_targets.is_empty() => self.calibration_targets.clone(),
            None => {
                return Err(Error::config(
                    "no validation points given and no accepted calibration to reuse",
                ))
            }
        };
        self.lease.acquire(LeaseOwner::Validation)?;
        let backend = self
            .validation
            .as_mut()
            .map(|b| &mut **b as &mut dyn ValidationBackend);
        let result = validation::run(
            backend,
            self.strategy.as_mut(),
            &mut self.window,
            &self.clock,
            &self.mapper,
            &self.config,
            &targets,
            show_results,
        );
        self.lease.release(LeaseOwner::Validation);
        let report = result?;
        if let (Some(report), true) = (&report, save_to_file) {
            self.recorder.queue_block(report.summary());
        }
        Ok(report)
    }

    /// Opens `path`, or a timestamped file in the working directory.
    /// Any open file is closed once the new one exists. Refused while
    /// recording, so a session always lands in the file it started in.
    pub fn open_datafile(&mut self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(AppDirs::default_data_file);
        self.recorder.open_datafile(&path, self.window.size())?;
        info!("opened data file {}", path.display());
        Ok(path)
    }

    /// Stops any active recording and closes the data file.
    pub fn close_datafile(&mut self) -> Result<PathBuf> {
        self.stop_recording()?;
        self.recorder.close_datafile()
    }

    /// Starts recording. With `new_file` (or no file open yet) a data file is
    /// opened at `path` first. A second recording, or any other procedure
    /// holding the tracker, is refused with [`Error::TrackerBusy`].
    pub fn start_recording(
        &mut self,
        path: Option<&Path>,
        new_file: bool,
        embed_events: Option<bool>,
    ) -> Result<()> {
        if let Some(held_by) = self.lease.holder() {
            return Err(Error::TrackerBusy { held_by });
        }
        if new_file || !self.recorder.has_datafile() {
            self.open_datafile(path)?;
        } else if let Some(p) = path {
            warn!("{} ignored: appending to the open data file", p.display());
        }
        self.lease.acquire(LeaseOwner::Recording)?;
        let embed = embed_events.unwrap_or(self.config.embed_events);
        if let Err(e) = self.recorder.start(
            self.tracker.as_mut(),
            &self.clock,
            self.config.settle_time,
            embed,
        ) {
            self.lease.release(LeaseOwner::Recording);
            return Err(e);
        }
        Ok(())
    }

    /// Stops and writes the session. `Ok(false)` (no-op) when not recording.
    pub fn stop_recording(&mut self) -> Result<bool> {
        if !self.recorder.is_recording() {
            return Ok(false);
        }
        let result = self.recorder.stop(self.tracker.as_mut(), &self.mapper);
        self.lease.release(LeaseOwner::Recording);
        result
    }

    /// Records a labelled event at the current device time. Ignored (returns
    /// `false`) when not recording.
    pub fn record_event(&mut self, label: &str) -> bool {
        self.recorder.record_event(self.tracker.as_ref(), label)
    }

    /// Averaged gaze of the latest recorded sample in host units; `NaN`
    /// when neither eye is valid, `None` before any sample.
    pub fn current_gaze_position(&self) -> Option<Point> {
        let sample = self.recorder.buffer().latest_sample()?;
        let gaze = sample.average_gaze();
        Some(if gaze.is_nan() {
            gaze
        } else {
            self.mapper.to_host(gaze)
        })
    }

    /// Left and right pupil diameters (mm); `NaN` for an invalid eye.
    pub fn current_pupil_size(&self) -> Option<(f64, f64)> {
        let sample = self.recorder.buffer().latest_sample()?;
        let pupil = |eye: &crate::gaze::EyeData| {
            if eye.pupil_valid {
                eye.pupil_diameter
            } else {
                f64::NAN
            }
        };
        Some((pupil(&sample.left), pupil(&sample.right)))
    }

    pub fn current_gaze_validity(&self) -> Option<(bool, bool)> {
        self.recorder.buffer().latest_validity()
    }

    /// Looking time for one trial, with `stimulus` redrawn every frame.
    /// Without an explicit blink tolerance the configured one applies.
    /// Uses the recording's samples, or a private subscription (with the
    /// settle wait) when nothing is being recorded.
    pub fn collect_looking_time(
        &mut self,
        params: LookingTimeParams,
        stimulus: &[Shape],
    ) -> Result<f64> {
        let params = params.or_blink_tolerance(self.config.blink_tolerance);
        params.validate()?;
        if self.recorder.is_recording() {
            let buffer = self.recorder.buffer().clone();
            return looking_time::collect(&mut self.window, &self.clock, &buffer, params, stimulus);
        }
        self.with_subscription(LeaseOwner::LookingTime, |this, buffer| {
            this.clock.wait(this.config.settle_time);
            looking_time::collect(&mut this.window, &this.clock, buffer, params, stimulus)
        })
    }

    /// Looking time while `movie` plays; the movie is stopped however the
    /// trial ends.
    pub fn collect_looking_time_movie(
        &mut self,
        params: LookingTimeParams,
        movie: &mut dyn MoviePlayer,
    ) -> Result<f64> {
        let params = params.or_blink_tolerance(self.config.blink_tolerance);
        params.validate()?;
        if self.recorder.is_recording() {
            let buffer = self.recorder.buffer().clone();
            return looking_time::collect_movie(&mut self.window, &self.clock, &buffer, params, movie);
        }
        self.with_subscription(LeaseOwner::LookingTime, |this, buffer| {
            this.clock.wait(this.config.settle_time);
            looking_time::collect_movie(&mut this.window, &this.clock, buffer, params, movie)
        })
    }

    /// Stops recording and closes the data file, if either is active.
    pub fn close(&mut self) -> Result<()> {
        self.stop_recording()?;
        match self.recorder.close_datafile() {
            Ok(path) => info!("data saved to {}", path.display()),
            Err(Error::NoDataFile) => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}
