use chrono::Local;
use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "infant-gaze").map(|pd| pd.config_dir().join("config.json"))
    }

    /// Timestamped data file name in the working directory, used when a
    /// recording is started without a file name.
    pub fn default_data_file() -> PathBuf {
        PathBuf::from(format!("{}.tsv", Local::now().format("%Y-%m-%d_%H_%M_%S")))
    }
}
