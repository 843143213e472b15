//! How targets are shown while calibration or validation data is collected.
//!
//! The calibration and validation loops only decide *which* points still need
//! data; a [`PresentationStrategy`] decides how they are put on screen and
//! when collection is triggered. [`AutoPresentation`] walks the points on its
//! own (adult participants), [`InfantPresentation`] leaves every step to the
//! operator's keyboard.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::{ControllerConfig, TargetStyle};
use crate::coords::{CoordinateMapper, Point};
use crate::error::Result;
use crate::host::{Clock, Shape, Window};

/// Triggers data collection at a point, identified by its index.
pub trait PointCollector {
    fn collect(&mut self, index: usize) -> Result<()>;

    /// Still collecting after [`Self::collect`] returned; the target stays
    /// on screen until this turns false.
    fn busy(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Finished,
    Aborted,
}

/// Everything a strategy may touch during one Present phase.
pub struct PresentContext<'a> {
    pub window: &'a mut dyn Window,
    pub clock: &'a dyn Clock,
    pub mapper: &'a CoordinateMapper,
    pub config: &'a ControllerConfig,
    /// Target positions in ADCS, indexed like the caller's point list.
    pub targets: &'a [Point],
    /// Indices still waiting for data this round.
    pub pending: &'a BTreeSet<usize>,
}

impl PresentContext<'_> {
    fn target_pix(&self, index: usize) -> Point {
        self.mapper.tracker_to_pix(self.targets[index])
    }

    fn full_radius(&self) -> f64 {
        self.mapper
            .height_fraction_to_pix(self.config.target.size)
            / 2.0
    }
}

pub trait PresentationStrategy {
    /// Show targets for every pending point and collect through `collector`.
    fn present(
        &mut self,
        ctx: &mut PresentContext<'_>,
        collector: &mut dyn PointCollector,
    ) -> Result<PresentOutcome>;
}

/// Attention-grabbing size at time `t`: oscillates between
/// `min_ratio * size` and `(1 + min_ratio) * size`.
pub fn oscillating_size(t: f64, style: &TargetStyle) -> f64 {
    ((t * style.shrink_speed).sin().powi(2) + style.min_ratio) * style.size
}

/// Draws a stimulus image if one is assigned, otherwise a disc with a dot.
pub fn draw_target(
    window: &mut dyn Window,
    center: Point,
    radius: f64,
    style: &TargetStyle,
    stimulus: Option<&str>,
) {
    match stimulus {
        Some(source) => window.draw(Shape::Image {
            source: source.to_string(),
            center,
            size: radius * 2.0,
        }),
        None => {
            window.draw(Shape::disc(center, radius, style.disc_color));
            window.draw(Shape::disc(center, (radius / 5.0).max(1.0), style.dot_color));
        }
    }
}

fn finish_collecting(
    ctx: &mut PresentContext<'_>,
    collector: &dyn PointCollector,
    index: usize,
    radius: f64,
) -> Result<()> {
    while collector.busy() {
        let center = ctx.target_pix(index);
        draw_target(ctx.window, center, radius, &ctx.config.target, None);
        ctx.window.flip()?;
    }
    Ok(())
}

/// Shows each pending point in turn, shrinking it over `point_duration`, and
/// collects without operator input. Only the abort key is honoured.
#[derive(Debug, Default, Clone)]
pub struct AutoPresentation;

impl PresentationStrategy for AutoPresentation {
    fn present(
        &mut self,
        ctx: &mut PresentContext<'_>,
        collector: &mut dyn PointCollector,
    ) -> Result<PresentOutcome> {
        let style = ctx.config.target.clone();
        let duration = ctx.config.point_duration.max(0.0);
        let full = ctx.full_radius();
        let pending: Vec<usize> = ctx.pending.iter().copied().collect();

        for index in pending {
            let shown_at = ctx.clock.now();
            loop {
                if ctx.window.keys().contains(&ctx.config.keys.abort) {
                    return Ok(PresentOutcome::Aborted);
                }
                let elapsed = ctx.clock.now() - shown_at;
                if elapsed >= duration {
                    break;
                }
                let progress = if duration > 0.0 { elapsed / duration } else { 1.0 };
                let radius = full * (1.0 - (1.0 - style.min_ratio) * progress);
                let center = ctx.target_pix(index);
                draw_target(ctx.window, center, radius, &style, None);
                ctx.window.flip()?;
            }
            collector.collect(index)?;
            finish_collecting(ctx, collector, index, full * style.min_ratio)?;
        }
        Ok(PresentOutcome::Finished)
    }
}

/// Operator-driven presentation for infants.
///
/// A number key shows the matching point (if it is pending), the select-all
/// key hides it again, the collect key waits `focus_time` and collects, and
/// the exit key ends the phase. Stimulus images are reshuffled every round.
pub struct InfantPresentation {
    stimuli: Vec<String>,
    rng: StdRng,
}

impl InfantPresentation {
    pub fn new(stimuli: Vec<String>) -> Self {
        Self {
            stimuli,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic stimulus order, for tests.
    pub fn with_seed(stimuli: Vec<String>, seed: u64) -> Self {
        Self {
            stimuli,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl PresentationStrategy for InfantPresentation {
    fn present(
        &mut self,
        ctx: &mut PresentContext<'_>,
        collector: &mut dyn PointCollector,
    ) -> Result<PresentOutcome> {
        let mut round_stimuli = self.stimuli.clone();
        round_stimuli.shuffle(&mut self.rng);

        let keys = ctx.config.keys.clone();
        let style = ctx.config.target.clone();
        let mut current: Option<usize> = None;
        let mut shown_at = ctx.clock.now();

        loop {
            for key in ctx.window.keys() {
                if key == keys.abort {
                    return Ok(PresentOutcome::Aborted);
                } else if key == keys.exit {
                    return Ok(PresentOutcome::Finished);
                } else if keys.is_select_all(&key) {
                    current = None;
                } else if let Some(index) = keys.point_for(&key) {
                    if index < ctx.targets.len() {
                        current = Some(index);
                        shown_at = ctx.clock.now();
                    }
                } else if key == keys.collect {
                    match current {
                        Some(index) if ctx.pending.contains(&index) => {
                            ctx.clock.wait(ctx.config.focus_time);
                            collector.collect(index)?;
                            let radius = ctx.full_radius() * style.min_ratio;
                            finish_collecting(ctx, collector, index, radius)?;
                            current = None;
                        }
                        Some(index) => log::debug!("point {} is not pending", index + 1),
                        None => {}
                    }
                }
            }

            if let Some(index) = current {
                let t = ctx.clock.now() - shown_at;
                let radius = ctx.mapper.height_fraction_to_pix(oscillating_size(t, &style)) / 2.0;
                let stimulus = (!round_stimuli.is_empty())
                    .then(|| round_stimuli[index % round_stimuli.len()].as_str());
                let center = ctx.target_pix(index);
                draw_target(ctx.window, center, radius, &style, stimulus);
            }
            ctx.window.flip()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::Units;
    use crate::host::Key;
    use crate::sim::{ManualClock, ScriptedWindow};

    #[derive(Default)]
    struct Collected(Vec<usize>);

    impl PointCollector for Collected {
        fn collect(&mut self, index: usize) -> Result<()> {
            self.0.push(index);
            Ok(())
        }
    }

    fn fixture() -> (ControllerConfig, CoordinateMapper, Vec<Point>) {
        let mapper = CoordinateMapper::new((800, 600), Units::Pix, None).unwrap();
        let targets = vec![
            Point::new(0.1, 0.1),
            Point::new(0.9, 0.1),
            Point::new(0.5, 0.5),
        ];
        (ControllerConfig::default(), mapper, targets)
    }

    #[test]
    fn oscillation_stays_in_range() {
        let style = TargetStyle::default();
        for i in 0..200 {
            let size = oscillating_size(i as f64 * 0.05, &style);
            assert!(size >= style.min_ratio * style.size - 1e-12);
            assert!(size <= (1.0 + style.min_ratio) * style.size + 1e-12);
        }
    }

    #[test]
    fn auto_collects_every_pending_point_in_order() {
        let (config, mapper, targets) = fixture();
        let clock = ManualClock::default();
        let mut window = ScriptedWindow::new((800, 600), clock.clone());
        let pending: BTreeSet<usize> = [0, 2].into_iter().collect();
        let mut ctx = PresentContext {
            window: &mut window,
            clock: &clock,
            mapper: &mapper,
            config: &config,
            targets: &targets,
            pending: &pending,
        };
        let mut collected = Collected::default();
        let outcome = AutoPresentation.present(&mut ctx, &mut collected).unwrap();
        assert_eq!(outcome, PresentOutcome::Finished);
        assert_eq!(collected.0, vec![0, 2]);
        // 1.5 s per point at 60 Hz
        assert_eq!(clock.frames(), 180);
    }

    #[test]
    fn auto_aborts_on_escape() {
        let (config, mapper, targets) = fixture();
        let clock = ManualClock::default();
        let mut window =
            ScriptedWindow::new((800, 600), clock.clone()).with_keys(vec![(10, Key::Escape)]);
        let pending: BTreeSet<usize> = (0..3).collect();
        let mut ctx = PresentContext {
            window: &mut window,
            clock: &clock,
            mapper: &mapper,
            config: &config,
            targets: &targets,
            pending: &pending,
        };
        let mut collected = Collected::default();
        let outcome = AutoPresentation.present(&mut ctx, &mut collected).unwrap();
        assert_eq!(outcome, PresentOutcome::Aborted);
        assert!(collected.0.is_empty());
    }

    #[test]
    fn infant_collects_only_pending_points_after_focus_time() {
        let (config, mapper, targets) = fixture();
        let clock = ManualClock::default();
        let mut window = ScriptedWindow::new((800, 600), clock.clone()).with_keys(vec![
            (2, Key::Char('2')),
            (5, Key::Space),
            (2, Key::Char('3')),
            (5, Key::Space),
            (2, Key::Return),
        ]);
        let pending: BTreeSet<usize> = [0, 1].into_iter().collect();
        let mut ctx = PresentContext {
            window: &mut window,
            clock: &clock,
            mapper: &mapper,
            config: &config,
            targets: &targets,
            pending: &pending,
        };
        let mut collected = Collected::default();
        let mut strategy = InfantPresentation::with_seed(vec!["a.png".into()], 7);
        let outcome = strategy.present(&mut ctx, &mut collected).unwrap();
        assert_eq!(outcome, PresentOutcome::Finished);
        assert_eq!(collected.0, vec![1]);
        // one focus wait on top of 16 frames
        assert!((clock.now() - (16.0 / 60.0 + 0.5)).abs() < 1e-9);
    }

    #[test]
    fn infant_draws_stimulus_for_shown_point_only() {
        let (config, mapper, targets) = fixture();
        let clock = ManualClock::default();
        let mut window = ScriptedWindow::new((800, 600), clock.clone())
            .with_keys(vec![(1, Key::Char('1')), (3, Key::Char('0')), (3, Key::Return)]);
        let pending: BTreeSet<usize> = (0..3).collect();
        let mut strategy = InfantPresentation::with_seed(vec!["bee.png".into()], 1);
        {
            let mut ctx = PresentContext {
                window: &mut window,
                clock: &clock,
                mapper: &mapper,
                config: &config,
                targets: &targets,
                pending: &pending,
            };
            strategy.present(&mut ctx, &mut Collected::default()).unwrap();
        }
        // hidden by '0' before the final frame
        assert!(window.last_frame().is_empty());
    }
}
