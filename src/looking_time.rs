//! Online looking-time measurement.
//!
//! [`LookingTimeTrial`] is the pure Looking/Away state machine; it is fed one
//! `(time, validity)` reading per display refresh by [`collect`] or
//! [`collect_movie`]. Neither loop reads keys: a trial runs until the
//! participant looks away long enough or the time limit is reached.

use log::debug;

use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};
use crate::host::{Clock, MoviePlayer, Playback, Shape, Window};
use crate::util::round_to;

/// Used when neither the caller nor the controller config sets one.
pub const DEFAULT_BLINK_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LookingTimeParams {
    /// Trial length in seconds.
    pub max_time: f64,
    /// An absence this long ends the trial.
    pub min_away: f64,
    /// Absences up to this long are blinks and not subtracted. `None`
    /// defers to the controller's configured tolerance.
    pub blink_tolerance: Option<f64>,
}

impl LookingTimeParams {
    pub fn new(max_time: f64, min_away: f64) -> Self {
        Self {
            max_time,
            min_away,
            blink_tolerance: None,
        }
    }

    pub fn with_blink_tolerance(mut self, blink_tolerance: f64) -> Self {
        self.blink_tolerance = Some(blink_tolerance);
        self
    }

    /// Fills in `default` unless a tolerance was set explicitly.
    pub fn or_blink_tolerance(mut self, default: f64) -> Self {
        self.blink_tolerance = self.blink_tolerance.or(Some(default));
        self
    }

    pub fn blink_tolerance(&self) -> f64 {
        self.blink_tolerance.unwrap_or(DEFAULT_BLINK_TOLERANCE)
    }

    pub fn validate(&self) -> Result<()> {
        let blink = self.blink_tolerance();
        if !(self.max_time > 0.0) || !(self.min_away > 0.0) || !(blink >= 0.0) {
            return Err(Error::config(format!(
                "invalid looking-time parameters: max_time {}, min_away {}, blink_tolerance {blink}",
                self.max_time, self.min_away
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gaze {
    Looking,
    Away { since: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Continue,
    /// Looking time in seconds, rounded to 3 decimals.
    Done(f64),
}

#[derive(Debug, Clone)]
pub struct LookingTimeTrial {
    params: LookingTimeParams,
    gaze: Gaze,
    away: Vec<f64>,
}

impl LookingTimeTrial {
    pub fn new(params: LookingTimeParams) -> Self {
        Self {
            params,
            gaze: Gaze::Looking,
            away: Vec::new(),
        }
    }

    /// Absences long enough to count, in order.
    pub fn away_intervals(&self) -> &[f64] {
        &self.away
    }

    pub fn is_away(&self) -> bool {
        matches!(self.gaze, Gaze::Away { .. })
    }

    /// Advances to trial time `t`. `validity` is `None` until the first
    /// sample has arrived, which counts as neither looking nor away.
    pub fn update(&mut self, t: f64, validity: Option<(bool, bool)>) -> Step {
        if let Some((left, right)) = validity {
            match self.gaze {
                Gaze::Looking if !left && !right => self.gaze = Gaze::Away { since: t },
                Gaze::Away { since } if left || right => {
                    let span = t - since;
                    if span > self.params.blink_tolerance() {
                        self.away.push(span);
                    } else {
                        debug!("ignoring {span:.3}s blink");
                    }
                    self.gaze = Gaze::Looking;
                }
                _ => {}
            }
        }

        if let Gaze::Away { since } = self.gaze {
            let span = t - since;
            if span >= self.params.min_away {
                return Step::Done(round_to(t - self.total_away() - span, 3));
            }
        }
        if t >= self.params.max_time {
            return Step::Done(round_to(self.params.max_time - self.total_away(), 3));
        }
        Step::Continue
    }

    fn total_away(&self) -> f64 {
        self.away.iter().sum()
    }
}

/// Runs one trial with `stimulus` on screen, reading validity from `buffer`.
pub fn collect(
    window: &mut dyn Window,
    clock: &dyn Clock,
    buffer: &SharedBuffer,
    params: LookingTimeParams,
    stimulus: &[Shape],
) -> Result<f64> {
    params.validate()?;
    let mut trial = LookingTimeTrial::new(params);
    let start = clock.now();
    loop {
        let t = clock.now() - start;
        if let Step::Done(looking) = trial.update(t, buffer.latest_validity()) {
            debug!("trial ended at {t:.3}s, away {:?}", trial.away_intervals());
            return Ok(looking);
        }
        for shape in stimulus {
            window.draw(shape.clone());
        }
        window.flip()?;
    }
}

/// Same trial while a movie plays. The movie loops if it ends early and is
/// stopped on every exit path, errors included.
pub fn collect_movie(
    window: &mut dyn Window,
    clock: &dyn Clock,
    buffer: &SharedBuffer,
    params: LookingTimeParams,
    movie: &mut dyn MoviePlayer,
) -> Result<f64> {
    params.validate()?;
    let mut playback = Playback::start(movie);
    let mut trial = LookingTimeTrial::new(params);
    let start = clock.now();
    loop {
        let t = clock.now() - start;
        if let Step::Done(looking) = trial.update(t, buffer.latest_validity()) {
            return Ok(looking);
        }
        if playback.movie().is_finished() {
            playback.movie().rewind();
            playback.movie().play();
        }
        playback.movie().draw(window);
        window.flip()?;
    }
}
