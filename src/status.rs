//! Position-adjustment display: where the participant's eyes sit in the
//! track box, plus an optional attention-grabbing movie.

use crate::buffer::SharedBuffer;
use crate::config::ControllerConfig;
use crate::coords::{Point, TrackBoxMapper};
use crate::error::Result;
use crate::gaze::GazeSample;
use crate::host::{Color, MoviePlayer, Playback, Shape, Window};

const EYE_SIZE: f64 = 0.02;
const BOX_WIDTH: f64 = 0.25;
const BOX_HEIGHT: f64 = 0.2;
const BAR_HEIGHT: f64 = 0.03;

/// Height units (centre origin, y up) to pixels.
fn height_to_pix(window: &dyn Window, p: Point) -> Point {
    let h = window.size().1 as f64;
    Point::new(p.x * h, p.y * h)
}

/// Mean track-box depth of the valid eyes.
fn mean_depth(sample: &GazeSample) -> Option<f64> {
    let depths: Vec<f64> = [&sample.left, &sample.right]
        .into_iter()
        .filter(|eye| eye.gaze_valid)
        .map(|eye| eye.track_box.z)
        .collect();
    crate::util::mean(&depths)
}

/// Draws one frame of the track-box view.
pub fn draw_status(
    window: &mut dyn Window,
    mapper: &TrackBoxMapper,
    config: &ControllerConfig,
    sample: Option<&GazeSample>,
) {
    let h = window.size().1 as f64;
    let rect = |center: Point, width: f64, height: f64, fill: Color, line: Color| Shape::Rect {
        center: Point::new(center.x * h, center.y * h),
        width: width * h,
        height: height * h,
        fill: Some(fill),
        line: Some(line),
    };
    window.draw(rect(mapper.center, BOX_WIDTH, BOX_HEIGHT, Color::Black, Color::White));
    window.draw(rect(mapper.z_bar_center, mapper.z_bar_width, BAR_HEIGHT, Color::Green, Color::Green));
    window.draw(rect(mapper.z_bar_center, 0.01, BAR_HEIGHT, Color::White, Color::White));

    let Some(sample) = sample else {
        return;
    };
    for (eye, color) in [
        (&sample.left, config.target.left_eye_color),
        (&sample.right, config.target.right_eye_color),
    ] {
        if eye.gaze_valid {
            let center = height_to_pix(window, mapper.eye_position(eye.track_box));
            window.draw(Shape::disc(center, EYE_SIZE * h / 2.0, color));
        }
    }
    if let Some(z) = mean_depth(sample) {
        let marker = mapper.z_marker(z);
        window.draw(rect(marker, 0.009, BAR_HEIGHT, Color::Black, Color::Black));
    }
}

/// Shows the status view until the decision or abort key. The buffer must be
/// fed by a gaze subscription for the eyes to appear.
pub fn show_status(
    window: &mut dyn Window,
    buffer: &SharedBuffer,
    config: &ControllerConfig,
    movie: Option<&mut dyn MoviePlayer>,
) -> Result<()> {
    let mapper = TrackBoxMapper::default();
    let mut playback = movie.map(Playback::start);
    window.clear_keys();
    loop {
        let keys = window.keys();
        if keys.contains(&config.keys.decision) || keys.contains(&config.keys.abort) {
            return Ok(());
        }
        if let Some(playback) = playback.as_mut() {
            if playback.movie().is_finished() {
                playback.movie().rewind();
                playback.movie().play();
            }
            playback.movie().draw(window);
        }
        draw_status(window, &mapper, config, buffer.latest_sample().as_ref());
        window.flip()?;
    }
}
