use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs::AppDirs;
use crate::coords::{Monitor, Units};
use crate::error::Result;
use crate::host::{Color, Key};
use crate::tracker::ValidationParams;

/// A number key that selects a calibration point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointKey {
    pub key: Key,
    pub point: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyBindings {
    /// Infant mode: collect samples at the shown point.
    pub collect: Key,
    /// Infant mode: finish presenting and compute.
    pub exit: Key,
    /// Review: accept (or retry when points are selected).
    pub decision: Key,
    pub abort: Key,
    /// Review: select/deselect all. Infant presentation: hide the target.
    pub select_all: Vec<Key>,
    /// Wait for this key before the first round, if set.
    pub start: Option<Key>,
    pub points: Vec<PointKey>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut points = Vec::new();
        for n in 1..=9u8 {
            let point = (n - 1) as usize;
            points.push(PointKey {
                key: Key::Char((b'0' + n) as char),
                point,
            });
            points.push(PointKey {
                key: Key::Numpad(n),
                point,
            });
        }
        Self {
            collect: Key::Space,
            exit: Key::Return,
            decision: Key::Space,
            abort: Key::Escape,
            select_all: vec![Key::Char('0'), Key::Numpad(0)],
            start: None,
            points,
        }
    }
}

impl KeyBindings {
    pub fn point_for(&self, key: &Key) -> Option<usize> {
        self.points.iter().find(|pk| &pk.key == key).map(|pk| pk.point)
    }

    pub fn is_select_all(&self, key: &Key) -> bool {
        self.select_all.contains(key)
    }
}

/// Appearance of calibration/validation targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetStyle {
    /// Full size as a fraction of the display height.
    pub size: f64,
    /// Smallest size during shrinking, as a ratio of `size`.
    pub min_ratio: f64,
    pub shrink_speed: f64,
    pub disc_color: Color,
    pub dot_color: Color,
    pub left_eye_color: Color,
    pub right_eye_color: Color,
    pub text_color: Color,
}

impl Default for TargetStyle {
    fn default() -> Self {
        Self {
            size: 0.1,
            min_ratio: 0.2,
            shrink_speed: 1.5,
            disc_color: Color::White,
            dot_color: Color::Black,
            left_eye_color: Color::Green,
            right_eye_color: Color::Red,
            text_color: Color::White,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub units: Units,
    pub monitor: Option<Monitor>,
    pub keys: KeyBindings,
    pub target: TargetStyle,
    /// Pause after the collect key so the infant can fixate.
    pub focus_time: f64,
    /// Warm-up after subscribing before samples are trusted.
    pub settle_time: f64,
    pub blink_tolerance: f64,
    pub validation: ValidationParams,
    pub embed_events: bool,
    /// Auto presentation: how long each target is shown before collection.
    pub point_duration: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            units: Units::Pix,
            monitor: None,
            keys: KeyBindings::default(),
            target: TargetStyle::default(),
            focus_time: 0.5,
            settle_time: 0.5,
            blink_tolerance: 1.0,
            validation: ValidationParams::default(),
            embed_events: false,
            point_duration: 1.5,
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> ControllerConfig;
    fn save(&self, cfg: &ControllerConfig) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = AppDirs::config_path().unwrap_or_else(|| PathBuf::from("infant_gaze.json"));
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> ControllerConfig {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<ControllerConfig>(&bytes) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("ignoring unreadable config {}: {e}", self.path.display());
                    ControllerConfig::default()
                }
            },
            Err(_) => ControllerConfig::default(),
        }
    }

    fn save(&self, cfg: &ControllerConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}
