use std::path::PathBuf;

use thiserror::Error;

use crate::tracker::LeaseOwner;

/// Everything that can go wrong while driving the eye tracker.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad arguments caught before any hardware interaction.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("eye tracker not found: {0}")]
    DeviceNotFound(String),

    /// An optional vendor add-on (e.g. validation) is not installed.
    #[error("missing optional dependency: {0}")]
    MissingOptionalDependency(&'static str),

    #[error("no opened file to close")]
    NoDataFile,

    /// The tracker is exclusively held by another procedure.
    #[error("eye tracker is busy ({held_by} holds the gaze subscription)")]
    TrackerBusy { held_by: LeaseOwner },

    #[error("failed to write {path}: {source}")]
    DataFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
