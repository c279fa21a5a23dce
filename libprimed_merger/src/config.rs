use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::cycler_file::{CyclerFormat, StepSelection};
use super::error::ConfigError;

/// Structure representing the application configuration. Contains pathing,
/// channel/cell pairing, and parse policy.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cycler_path: PathBuf,
    pub eis_path: Option<PathBuf>,
    pub format: Option<CyclerFormat>,
    pub cell_numbers: Vec<u32>,
    pub channel_numbers: Vec<u32>,
    pub steps: StepSelection,
    pub eis_soc: f64,
    pub skip_bad_files: bool,
    pub require_timestamp: bool,
    pub n_threads: usize,
}

impl Default for Config {
    /// Generate a new Config object. All fields will be empty/invalid
    fn default() -> Self {
        Self {
            cycler_path: PathBuf::from("None"),
            eis_path: None,
            format: None,
            cell_numbers: Vec::new(),
            channel_numbers: Vec::new(),
            steps: StepSelection::default(),
            eis_soc: 0.5,
            skip_bad_files: false,
            require_timestamp: false,
            n_threads: 1,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Reject configurations that could not drive a meaningful run: an
    /// unusable step selection or a channel list without matching cell
    /// numbers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_numbers.len() != self.cell_numbers.len() {
            return Err(ConfigError::MismatchedChannels(
                self.channel_numbers.len(),
                self.cell_numbers.len(),
            ));
        }
        self.steps.validate()?;
        Ok(())
    }

    /// The (cell number, channel number) pairs to process, in config order.
    pub fn channel_pairs(&self) -> Vec<(u32, u32)> {
        self.cell_numbers
            .iter()
            .copied()
            .zip(self.channel_numbers.iter().copied())
            .collect()
    }

    /// Check if a specific channel exists by evaluating the existence of its
    /// raw-data directory.
    pub fn does_channel_exist(&self, channel_number: u32) -> bool {
        self.cycler_path
            .join(Self::channel_dir_name(channel_number))
            .exists()
    }

    /// Get the path to a channel's raw cycler files.
    pub fn channel_directory(&self, channel_number: u32) -> Result<PathBuf, ConfigError> {
        let channel_dir = self.cycler_path.join(Self::channel_dir_name(channel_number));
        if channel_dir.exists() {
            Ok(channel_dir)
        } else {
            Err(ConfigError::BadFilePath(channel_dir))
        }
    }

    /// Construct the channel directory name using the cycler export layout.
    fn channel_dir_name(channel_number: u32) -> String {
        format!("Channel_{channel_number}")
    }

    pub fn is_n_threads_valid(&self) -> bool {
        self.n_threads >= 1
    }

    pub fn has_eis_path(&self) -> bool {
        self.eis_path.is_some()
    }
}
