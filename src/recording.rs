//! Recording sessions and the tab-separated data file.
//!
//! A data file holds one block per start/stop cycle. Samples are buffered in
//! memory while recording and only written when the session stops, where
//! events are either embedded between gaze rows (interpolated at the event's
//! own time) or listed in a trailing block.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{debug, info, warn};

use crate::buffer::SharedBuffer;
use crate::coords::CoordinateMapper;
use crate::error::{Error, Result};
use crate::gaze::{EventRecord, EyeData, GazeSample};
use crate::host::Clock;
use crate::tracker::{EyeTracker, LeaseOwner};

const GAZE_COLUMNS: [&str; 13] = [
    "TimeStamp",
    "GazePointXLeft",
    "GazePointYLeft",
    "ValidityLeft",
    "GazePointXRight",
    "GazePointYRight",
    "ValidityRight",
    "GazePointX",
    "GazePointY",
    "PupilSizeLeft",
    "PupilValidityLeft",
    "PupilSizeRight",
    "PupilValidityRight",
];

/// An active start/stop cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Session {
    /// Device clock when the subscription was made; rebases every timestamp.
    pub start_clock_offset: i64,
    pub embed_events: bool,
}

impl Session {
    /// Device microseconds to session milliseconds.
    pub fn relative_ms(&self, device_timestamp: i64) -> f64 {
        (device_timestamp - self.start_clock_offset) as f64 / 1000.0
    }
}

/// One output row before unit conversion.
#[derive(Debug, Clone, PartialEq)]
struct Row<'a> {
    sample: GazeSample,
    event: Option<&'a str>,
}

fn fmt_validity(valid: bool) -> String {
    if valid { "1" } else { "0" }.to_string()
}

impl Row<'_> {
    fn to_record(&self, session: &Session, mapper: &CoordinateMapper, with_event: bool) -> Vec<String> {
        let s = &self.sample;
        let left = mapper.to_host(s.left.gaze_point);
        let right = mapper.to_host(s.right.gaze_point);
        let avg = mapper.to_host(s.average_gaze());
        let mut record = vec![
            format!("{:.1}", session.relative_ms(s.system_timestamp)),
            format!("{:.4}", left.x),
            format!("{:.4}", left.y),
            fmt_validity(s.left.gaze_valid),
            format!("{:.4}", right.x),
            format!("{:.4}", right.y),
            fmt_validity(s.right.gaze_valid),
            format!("{:.4}", avg.x),
            format!("{:.4}", avg.y),
            format!("{:.4}", s.left.pupil_diameter),
            fmt_validity(s.left.pupil_valid),
            format!("{:.4}", s.right.pupil_diameter),
            fmt_validity(s.right.pupil_valid),
        ];
        if with_event {
            record.push(self.event.unwrap_or_default().to_string());
        }
        record
    }
}

fn interpolate_value<T: Copy>(
    a: T,
    a_valid: bool,
    b: T,
    b_valid: bool,
    blend: impl Fn(T, T) -> T,
) -> (T, bool) {
    match (a_valid, b_valid) {
        (true, true) => (blend(a, b), true),
        (false, true) => (b, true),
        // one valid endpoint is copied; with none, the left one is kept
        (true, false) | (false, false) => (a, a_valid),
    }
}

fn interpolate_eye(a: &EyeData, b: &EyeData, wa: f64, wb: f64) -> EyeData {
    let (gaze_point, gaze_valid) = interpolate_value(
        a.gaze_point,
        a.gaze_valid,
        b.gaze_point,
        b.gaze_valid,
        |p, q| p.blend(wa, &q, wb),
    );
    let (pupil_diameter, pupil_valid) = interpolate_value(
        a.pupil_diameter,
        a.pupil_valid,
        b.pupil_diameter,
        b.pupil_valid,
        |p, q| p * wa + q * wb,
    );
    EyeData {
        gaze_point,
        gaze_valid,
        pupil_diameter,
        pupil_valid,
        track_box: a.track_box,
    }
}

/// Gaze at `timestamp`, which lies between samples `a` and `b`.
pub fn interpolate(a: &GazeSample, b: &GazeSample, timestamp: i64) -> GazeSample {
    let span = (b.system_timestamp - a.system_timestamp) as f64;
    let (wa, wb) = if span > 0.0 {
        (
            (b.system_timestamp - timestamp) as f64 / span,
            (timestamp - a.system_timestamp) as f64 / span,
        )
    } else {
        (0.0, 1.0)
    };
    GazeSample {
        system_timestamp: timestamp,
        left: interpolate_eye(&a.left, &b.left, wa, wb),
        right: interpolate_eye(&a.right, &b.right, wa, wb),
    }
}

fn event_only(event: &EventRecord) -> Row<'_> {
    Row {
        sample: GazeSample::new(event.device_timestamp, EyeData::invalid(), EyeData::invalid()),
        event: Some(event.label.as_str()),
    }
}

/// Interleaves events into the sample stream. Every event is placed before
/// the first sample at or after it, with gaze interpolated from the
/// surrounding pair; events after the last sample trail with `NaN` gaze.
fn merge_embedded<'a>(samples: &[GazeSample], events: &'a [EventRecord]) -> Vec<Row<'a>> {
    let mut rows = Vec::with_capacity(samples.len() + events.len());
    let mut cursor = 0;
    let mut previous: Option<&GazeSample> = None;

    for sample in samples {
        while let Some(event) = events.get(cursor) {
            if event.device_timestamp > sample.system_timestamp {
                break;
            }
            let row = match previous {
                Some(a) => Row {
                    sample: interpolate(a, sample, event.device_timestamp),
                    event: Some(event.label.as_str()),
                },
                // before the first sample there is nothing to interpolate from
                None => event_only(event),
            };
            rows.push(row);
            cursor += 1;
        }
        rows.push(Row {
            sample: *sample,
            event: None,
        });
        previous = Some(sample);
    }

    rows.extend(events[cursor..].iter().map(event_only));
    rows
}

/// The open tab-separated output file.
pub struct DataFile {
    path: PathBuf,
    writer: csv::Writer<BufWriter<File>>,
}

impl std::fmt::Debug for DataFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFile").field("path", &self.path).finish()
    }
}

impl DataFile {
    pub fn create(path: &Path, resolution: (u32, u32)) -> Result<Self> {
        if path.as_os_str().is_empty() {
            return Err(Error::config("data file name is empty"));
        }
        if path.is_dir() {
            return Err(Error::config(format!(
                "data file name {} is a directory",
                path.display()
            )));
        }
        let file = File::create(path).map_err(|source| Error::DataFile {
            path: path.to_path_buf(),
            source,
        })?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_writer(BufWriter::new(file));

        let now = Local::now();
        let mut datafile = Self {
            path: path.to_path_buf(),
            writer,
        };
        datafile.writer.write_record([
            "Recording date:".to_string(),
            now.format("%Y/%m/%d").to_string(),
        ])?;
        datafile.writer.write_record([
            "Recording time:".to_string(),
            now.format("%H:%M:%S").to_string(),
        ])?;
        datafile.writer.write_record([
            "Recording resolution:".to_string(),
            format!("{} x {}", resolution.0, resolution.1),
        ])?;
        info!("opened data file {}", path.display());
        Ok(datafile)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_session(
        &mut self,
        session: &Session,
        samples: &[GazeSample],
        events: &[EventRecord],
        mapper: &CoordinateMapper,
    ) -> Result<()> {
        self.writer.write_record(["Session Start"])?;
        let mode = if session.embed_events {
            "Embedded"
        } else {
            "Separated"
        };
        self.writer.write_record(["Event recording mode:", mode])?;

        if session.embed_events {
            let header = GAZE_COLUMNS.iter().copied().chain(["Event"]);
            self.writer.write_record(header)?;
            for row in merge_embedded(samples, events) {
                self.writer.write_record(row.to_record(session, mapper, true))?;
            }
        } else {
            self.writer.write_record(GAZE_COLUMNS)?;
            for sample in samples {
                let row = Row {
                    sample: *sample,
                    event: None,
                };
                self.writer.write_record(row.to_record(session, mapper, false))?;
            }
            self.writer.write_record(["Events"])?;
            self.writer.write_record(["TimeStamp", "Event"])?;
            for event in events {
                self.writer.write_record([
                    format!("{:.1}", session.relative_ms(event.device_timestamp)),
                    event.label.clone(),
                ])?;
            }
        }

        self.writer.write_record(["Session End"])?;
        self.writer.flush()?;
        debug!(
            "wrote session: {} samples, {} events",
            samples.len(),
            events.len()
        );
        Ok(())
    }

    /// Appends a tab-separated text block verbatim, one record per line.
    pub fn write_text_block(&mut self, text: &str) -> Result<()> {
        for line in text.lines() {
            self.writer.write_record(line.split('\t'))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn close(mut self) -> Result<PathBuf> {
        self.writer.flush()?;
        info!("closed data file {}", self.path.display());
        Ok(self.path)
    }
}

/// Owns the sample buffer, the active session and the data file.
#[derive(Debug, Default)]
pub struct Recorder {
    buffer: SharedBuffer,
    session: Option<Session>,
    datafile: Option<DataFile>,
    pending_blocks: Vec<String>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn has_datafile(&self) -> bool {
        self.datafile.is_some()
    }

    pub fn datafile_path(&self) -> Option<&Path> {
        self.datafile.as_ref().map(|d| d.path())
    }

    /// Replaces any open data file with a new one at `path`. Refused while
    /// a session is active; the old file is kept if `path` cannot be created.
    pub fn open_datafile(&mut self, path: &Path, resolution: (u32, u32)) -> Result<()> {
        if self.session.is_some() {
            return Err(Error::TrackerBusy {
                held_by: LeaseOwner::Recording,
            });
        }
        let datafile = DataFile::create(path, resolution)?;
        if self.datafile.is_some() {
            self.close_datafile()?;
        }
        self.datafile = Some(datafile);
        Ok(())
    }

    /// Queue a text block (e.g. a validation summary) for the data file.
    pub fn queue_block(&mut self, text: String) {
        self.pending_blocks.push(text);
    }

    /// Writes queued blocks and closes. Fails when no file was opened.
    pub fn close_datafile(&mut self) -> Result<PathBuf> {
        let mut datafile = self.datafile.take().ok_or(Error::NoDataFile)?;
        for block in self.pending_blocks.drain(..) {
            datafile.write_text_block(&block)?;
        }
        datafile.close()
    }

    /// Clears the buffer, subscribes, and waits out the tracker's warm-up.
    pub fn start(
        &mut self,
        tracker: &mut dyn EyeTracker,
        clock: &dyn Clock,
        settle_time: f64,
        embed_events: bool,
    ) -> Result<()> {
        if self.datafile.is_none() {
            return Err(Error::NoDataFile);
        }
        self.buffer.lock().clear();
        let writer = self.buffer.clone();
        tracker.subscribe(Box::new(move |sample| writer.append_sample(sample)))?;
        let session = Session {
            start_clock_offset: tracker.system_time_stamp(),
            embed_events,
        };
        self.session = Some(session);
        info!(
            "recording started (t0 = {}, embed_events = {embed_events})",
            session.start_clock_offset
        );
        clock.wait(settle_time);
        Ok(())
    }

    /// Unsubscribes and writes the session. Returns `false` if nothing was
    /// being recorded.
    pub fn stop(&mut self, tracker: &mut dyn EyeTracker, mapper: &CoordinateMapper) -> Result<bool> {
        let Some(session) = self.session.take() else {
            debug!("stop_recording without an active session");
            return Ok(false);
        };
        tracker.unsubscribe();
        let (samples, events) = self.buffer.lock().drain();
        let datafile = self.datafile.as_mut().ok_or(Error::NoDataFile)?;
        datafile.write_session(&session, &samples, &events, mapper)?;
        info!("recording stopped ({} samples)", samples.len());
        Ok(true)
    }

    /// Timestamps `label` with the device clock. No-op outside a session.
    pub fn record_event(&self, tracker: &dyn EyeTracker, label: &str) -> bool {
        if self.session.is_none() {
            warn!("event '{label}' dropped: not recording");
            return false;
        }
        self.buffer
            .lock()
            .append_event(tracker.system_time_stamp(), label);
        true
    }
}
