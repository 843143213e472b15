mod tui;

use std::{
    error::Error,
    fs::File,
    io::{self, stdin},
    path::PathBuf,
    time::Duration,
};

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use infant_gaze::{
    calibration::standard_targets,
    config::{ConfigStore, ControllerConfig, FileConfigStore},
    controller::{GazeController, TrackerDevice},
    coords::{Point, Units},
    host::{Color, Key, MoviePlayer, Shape, SystemClock, Window},
    looking_time::LookingTimeParams,
    presentation::InfantPresentation,
    runtime::{CrosstermEventSource, FixedTicker, Runner},
    sim::{self, SimCalibration, SimMovie, SimValidation, SimulatedTracker},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::tui::TerminalWindow;

type Controller =
    GazeController<TerminalWindow<CrosstermBackend<io::Stdout>, CrosstermEventSource>, SystemClock>;

/// infant-friendly eye-tracker calibration, gaze recording and looking-time measurement
#[derive(Parser, Debug)]
#[clap(
    version,
    about,
    long_about = "Drives a (simulated) eye tracker from the terminal: position the participant, run a retry-capable calibration, validate it, record gaze with events, and measure looking time."
)]
pub struct Cli {
    /// config file to use instead of the platform default
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// override the configured coordinate units
    #[clap(short = 'u', long, value_enum, global = true)]
    units: Option<Units>,

    /// virtual display size in pixels
    #[clap(long, default_value = "1280x1024", value_parser = parse_size, global = true)]
    display: (u32, u32),

    /// frames per second of the terminal display
    #[clap(long, default_value_t = 30.0, global = true)]
    rate: f64,

    /// write log output to this file (RUST_LOG sets the level)
    #[clap(long, global = true)]
    log_file: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// show where the participant's eyes are in the track box
    Status {
        /// loop an attention-grabbing movie
        #[clap(long)]
        movie: bool,
    },
    /// run an interactive calibration
    Calibrate {
        /// number of calibration points (2-9)
        #[clap(short, long, default_value_t = 5)]
        points: usize,
        /// operator-driven infant presentation instead of the automatic one
        #[clap(long)]
        infant: bool,
        /// stimulus images for infant presentation
        #[clap(long = "stimulus")]
        stimuli: Vec<String>,
    },
    /// calibrate, then validate at the same points
    Validate {
        #[clap(short, long, default_value_t = 5)]
        points: usize,
        /// data file that receives the validation summary
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
    /// measure looking time for one trial
    LookingTime {
        /// trial length in seconds
        #[clap(long, default_value_t = 10.0)]
        max_time: f64,
        /// look-away that ends the trial, in seconds
        #[clap(long, default_value_t = 2.0)]
        min_away: f64,
        /// absences up to this long are treated as blinks (defaults to the
        /// configured tolerance)
        #[clap(long)]
        blink: Option<f64>,
        /// play a movie during the trial
        #[clap(long)]
        movie: bool,
    },
    /// record gaze and periodic events to a data file
    Record {
        /// data file (defaults to a timestamped name)
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// how long to record
        #[clap(short, long, default_value_t = 5.0, value_parser = parse_seconds)]
        seconds: f64,
        /// interleave events with gaze rows
        #[clap(long)]
        embed_events: bool,
    },
    /// show or change the saved configuration
    Config {
        /// restore defaults
        #[clap(long)]
        reset: bool,
        /// set the default units
        #[clap(long, value_enum)]
        set_units: Option<Units>,
        /// set whether events are embedded by default
        #[clap(long)]
        set_embed_events: Option<bool>,
        /// key that starts calibration (a single character)
        #[clap(long)]
        set_start_key: Option<char>,
    },
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| e.to_string());
    let size = (parse(w)?, parse(h)?);
    if size.0 == 0 || size.1 == 0 {
        return Err("display size must be non-zero".to_string());
    }
    Ok(size)
}

fn parse_seconds(s: &str) -> Result<f64, String> {
    let seconds: f64 = s.trim().parse().map_err(|e| format!("{e}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(format!("expected a non-negative number of seconds, got '{s}'"));
    }
    Ok(seconds)
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let mut builder = env_logger::Builder::new();
    match log_file {
        Some(path) => {
            let file = File::create(path)?;
            builder
                .filter_level(log::LevelFilter::Info)
                .parse_default_env()
                .target(env_logger::Target::Pipe(Box::new(file)));
        }
        // stderr would scribble over the alternate screen
        None => {
            builder.filter_level(log::LevelFilter::Off).parse_default_env();
        }
    }
    builder.init();
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let store = match &cli.config {
        Some(path) => FileConfigStore::with_path(path),
        None => FileConfigStore::new(),
    };

    if let Command::Config {
        reset,
        set_units,
        set_embed_events,
        set_start_key,
    } = &cli.command
    {
        let mut config = if *reset {
            ControllerConfig::default()
        } else {
            store.load()
        };
        let changed = *reset
            || set_units.is_some()
            || set_embed_events.is_some()
            || set_start_key.is_some();
        if let Some(units) = set_units {
            config.units = *units;
        }
        if let Some(embed) = set_embed_events {
            config.embed_events = *embed;
        }
        if let Some(c) = set_start_key {
            config.keys.start = Some(if *c == ' ' { Key::Space } else { Key::Char(*c) });
        }
        if changed {
            store.save(&config)?;
            eprintln!("saved {}", store.path().display());
        }
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let mut config = store.load();
    if let Some(units) = cli.units {
        config.units = units;
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let outcome = run(&cli, config, terminal);

    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;

    let message = outcome?;
    println!("{message}");
    Ok(())
}

fn gaze_script(command: &Command) -> sim::GazeScript {
    match command {
        // looks away briefly at 3 s, then for good at 7 s
        Command::LookingTime { .. } => sim::looking_except(vec![(3.0, 4.2), (7.0, f64::INFINITY)]),
        Command::Status { .. } => sim::wandering(),
        _ => sim::looking_at(Point::new(0.5, 0.5)),
    }
}

fn run(
    cli: &Cli,
    config: ControllerConfig,
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
) -> Result<String, Box<dyn Error>> {
    let clock = SystemClock::new();
    let tracker = SimulatedTracker::new(clock, gaze_script(&cli.command));
    let runner = Runner::new(CrosstermEventSource::new(), FixedTicker::from_rate(cli.rate));
    let window = TerminalWindow::new(terminal, runner, cli.display).with_tracker(tracker.clone());
    let device = TrackerDevice {
        tracker: Box::new(tracker),
        calibration: Box::new(SimCalibration::new()),
        validation: Some(Box::new(SimValidation::new(Point::new(0.005, -0.004)))),
    };
    let mut controller: Controller = GazeController::new(window, clock, vec![device], 0, config)?;

    let message = match cli.command.clone() {
        Command::Status { movie } => {
            controller.window_mut().set_title("status: [space] done");
            let mut grabber = SimMovie::new("attention-grabber.mp4", (cli.rate * 4.0) as u64);
            let grabber: Option<&mut dyn MoviePlayer> = if movie { Some(&mut grabber) } else { None };
            controller.show_status(grabber)?;
            "status closed".to_string()
        }
        Command::Calibrate {
            points,
            infant,
            stimuli,
        } => {
            if infant {
                controller = controller.with_strategy(Box::new(InfantPresentation::new(stimuli)));
            }
            controller.window_mut().set_title("calibration");
            let targets = standard_targets(points, controller.mapper())?;
            match controller.run_calibration(&targets)? {
                true => "calibration accepted".to_string(),
                false => "calibration aborted".to_string(),
            }
        }
        Command::Validate { points, output } => {
            controller.window_mut().set_title("calibration");
            let targets = standard_targets(points, controller.mapper())?;
            if !controller.run_calibration(&targets)? {
                return Ok("calibration aborted".to_string());
            }
            if output.is_some() {
                controller.open_datafile(output.as_deref())?;
            }
            controller.window_mut().set_title("validation");
            let report = controller.run_validation(None, true, output.is_some())?;
            controller.close()?;
            match report {
                Some(report) => report.summary(),
                None => "validation aborted".to_string(),
            }
        }
        Command::LookingTime {
            max_time,
            min_away,
            blink,
            movie,
        } => {
            controller.window_mut().set_title("looking time");
            let mut params = LookingTimeParams::new(max_time, min_away);
            if let Some(blink) = blink {
                params = params.with_blink_tolerance(blink);
            }
            let looking = if movie {
                let mut clip = SimMovie::new("trial.mp4", (cli.rate * 5.0) as u64);
                controller.collect_looking_time_movie(params, &mut clip)?
            } else {
                let stimulus = [Shape::disc(Point::new(0.0, 0.0), 80.0, Color::Yellow)];
                controller.collect_looking_time(params, &stimulus)?
            };
            format!("Looking time: {looking:.3}s")
        }
        Command::Record {
            output,
            seconds,
            embed_events,
        } => {
            controller.window_mut().set_title("recording");
            controller.start_recording(output.as_deref(), true, Some(embed_events))?;
            let start = std::time::Instant::now();
            let mut next_event = 0u32;
            while start.elapsed() < Duration::from_secs_f64(seconds) {
                if start.elapsed() >= Duration::from_secs(next_event as u64) {
                    controller.record_event(&format!("second_{next_event}"));
                    next_event += 1;
                }
                let window = controller.window_mut();
                window.draw(Shape::text(
                    Point::new(0.0, 0.0),
                    format!("recording... {:.1}s", start.elapsed().as_secs_f64()),
                    Color::White,
                ));
                window.flip()?;
            }
            let path = controller.datafile_path().map(|p| p.display().to_string());
            controller.close()?;
            format!("gaze saved to {}", path.unwrap_or_default())
        }
        Command::Config { .. } => String::new(),
    };
    Ok(message)
}
