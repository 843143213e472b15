use infant_gaze::host::{Color, Key, Shape, Window};
use infant_gaze::runtime::{EventSource, FixedTicker, Runner};
use infant_gaze::sim::SimulatedTracker;
use infant_gaze::Result;
use ratatui::{
    backend::Backend,
    style::{Color as TermColor, Style},
    symbols::Marker,
    text::Span,
    widgets::{
        canvas::{Canvas, Circle, Context, Line, Rectangle},
        Block, Borders,
    },
    Frame, Terminal,
};
use unicode_width::UnicodeWidthStr;

fn term_color(color: Color) -> TermColor {
    match color {
        Color::White => TermColor::White,
        Color::Black => TermColor::DarkGray,
        Color::Gray => TermColor::Gray,
        Color::Red => TermColor::Red,
        Color::Green => TermColor::Green,
        Color::Blue => TermColor::Blue,
        Color::Yellow => TermColor::Yellow,
    }
}

/// `cell_width` is the width of one terminal column in canvas units.
fn paint(ctx: &mut Context, shape: &Shape, cell_width: f64) {
    match shape {
        Shape::Circle {
            center,
            radius,
            fill,
            line,
        } => {
            if let Some(color) = fill.or(*line) {
                ctx.draw(&Circle {
                    x: center.x,
                    y: center.y,
                    radius: *radius,
                    color: term_color(color),
                });
            }
        }
        Shape::Rect {
            center,
            width,
            height,
            fill,
            line,
        } => {
            if let Some(color) = line.or(*fill) {
                ctx.draw(&Rectangle {
                    x: center.x - width / 2.0,
                    y: center.y - height / 2.0,
                    width: *width,
                    height: *height,
                    color: term_color(color),
                });
            }
        }
        Shape::Line { from, to, color } => ctx.draw(&Line {
            x1: from.x,
            y1: from.y,
            x2: to.x,
            y2: to.y,
            color: term_color(*color),
        }),
        Shape::Text { pos, text, color } => {
            // host text is centred on its position
            let half = text.width() as f64 * cell_width / 2.0;
            ctx.print(
                pos.x - half,
                pos.y,
                Span::styled(text.clone(), Style::default().fg(term_color(*color))),
            )
        }
        Shape::Image {
            source,
            center,
            size,
        } => {
            let half = size / 2.0;
            ctx.draw(&Rectangle {
                x: center.x - half,
                y: center.y - half,
                width: *size,
                height: *size,
                color: TermColor::Magenta,
            });
            ctx.print(center.x - half, center.y, Span::raw(format!("[{source}]")));
        }
    }
}

/// Renders shapes given in centre-origin pixels of a `size` display.
pub fn render(frame: &mut Frame, shapes: &[Shape], size: (u32, u32), title: &str) {
    let (w, h) = (size.0 as f64 / 2.0, size.1 as f64 / 2.0);
    let area = frame.area();
    let cell_width = size.0 as f64 / area.width.saturating_sub(2).max(1) as f64;
    let canvas = Canvas::default()
        .block(Block::default().borders(Borders::ALL).title(title.to_string()))
        .marker(Marker::Braille)
        .x_bounds([-w, w])
        .y_bounds([-h, h])
        .paint(|ctx| {
            for shape in shapes {
                paint(ctx, shape, cell_width);
            }
        });
    frame.render_widget(canvas, area);
}

/// A virtual experiment display drawn into the terminal. Flips are paced
/// by the ticker; keys arrive through the event source.
pub struct TerminalWindow<B: Backend, E: EventSource> {
    terminal: Terminal<B>,
    runner: Runner<E, FixedTicker>,
    size: (u32, u32),
    title: String,
    shapes: Vec<Shape>,
    keys: Vec<Key>,
    tracker: Option<SimulatedTracker>,
}

impl<B: Backend, E: EventSource> TerminalWindow<B, E> {
    pub fn new(terminal: Terminal<B>, runner: Runner<E, FixedTicker>, size: (u32, u32)) -> Self {
        Self {
            terminal,
            runner,
            size,
            title: " infant-gaze ".to_string(),
            shapes: Vec::new(),
            keys: Vec::new(),
            tracker: None,
        }
    }

    /// Deliver one simulated sample per flip.
    pub fn with_tracker(mut self, tracker: SimulatedTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = format!(" {} ", title.into());
    }
}

impl<B: Backend, E: EventSource> Window for TerminalWindow<B, E> {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn draw(&mut self, shape: Shape) {
        self.shapes.push(shape);
    }

    fn flip(&mut self) -> Result<()> {
        let shapes = std::mem::take(&mut self.shapes);
        let (size, title) = (self.size, self.title.as_str());
        self.terminal.draw(|f| render(f, &shapes, size, title))?;
        if let Some(tracker) = &self.tracker {
            tracker.tick();
        }
        self.keys.extend(self.runner.wait_frame());
        Ok(())
    }

    fn keys(&mut self) -> Vec<Key> {
        std::mem::take(&mut self.keys)
    }
}
