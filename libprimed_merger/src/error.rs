use std::path::PathBuf;
use thiserror::Error;

use super::dta_file::CURVE_MARKER;
use super::worker_status::WorkerStatus;

/// Errors produced by name or identity lookups on the data containers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    #[error("No column named '{0}' in this data block")]
    NoColumn(String),
    #[error("Column '{0}' holds text data, not numbers")]
    NotNumeric(String),
    #[error("No cycle with cycle index {0}")]
    NoCycle(u32),
    #[error("No cell with cell number {0} and channel number {1}")]
    NoCell(u32, u32),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SelectionError {
    #[error("Step selection contains no categories")]
    EmptySelection,
    #[error("Step selection category '{0}' contains no step indices")]
    EmptyCategory(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SweepError {
    #[error("Sweep state-of-charge {0} is outside the range [0, 1]")]
    InvalidSoc(f64),
}

#[derive(Debug, Error)]
pub enum CyclerFileError {
    #[error("Could not open cycler file because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Cycler file {path:?} is missing required column '{column}'")]
    MissingColumn { column: String, path: PathBuf },
    #[error("Cycler file {0:?} has a header row matching no known format")]
    UnknownFormat(PathBuf),
    #[error("Cycler file {0:?} contains no data rows")]
    EmptyFile(PathBuf),
    #[error("Cycler file {path:?} line {line} has {found} fields; expected {expected}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        found: usize,
        expected: usize,
    },
    #[error("Cycler file {path:?} line {line}: could not parse '{value}' as a {column} index")]
    BadIndex {
        path: PathBuf,
        line: usize,
        column: &'static str,
        value: String,
    },
    #[error("Cycler file parse rejected due to selection error: {0}")]
    BadSelection(#[from] SelectionError),
    #[error("Cycler file parse failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EisFileError {
    #[error("Could not open DTA file because {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("DTA file {0:?} has no '{marker}' table marker", marker = CURVE_MARKER)]
    MissingTable(PathBuf),
    #[error("DTA file {0:?} ends before the sweep table is complete")]
    TruncatedTable(PathBuf),
    #[error("DTA file {0:?} contains no sweep data rows")]
    EmptyTable(PathBuf),
    #[error("DTA file {path:?} line {line} has {found} fields; expected {expected}")]
    MalformedRow {
        path: PathBuf,
        line: usize,
        found: usize,
        expected: usize,
    },
    #[error("DTA file {path:?} line {line}: could not parse '{value}' as a number")]
    BadValue {
        path: PathBuf,
        line: usize,
        value: String,
    },
    #[error("DTA file {0:?} is missing required metadata tag '{1}'")]
    MissingTag(PathBuf, &'static str),
    #[error("DTA file {path:?} has an unparsable {tag} value '{value}'")]
    BadTimestamp {
        path: PathBuf,
        tag: &'static str,
        value: String,
    },
    #[error("Sweep already holds data; create a new sweep to read another file")]
    AlreadyLoaded,
    #[error("DTA file read failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum EisStackError {
    #[error("EisStack failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("EisStack did not find any sweep files in the EIS directory")]
    NoMatchingFiles,
    #[error("EisStack failed due to DTA file error: {0}")]
    FileError(#[from] EisFileError),
    #[error("EisStack failed due to sweep error: {0}")]
    SweepError(#[from] SweepError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config lists {0} channel numbers but {1} cell numbers")]
    MismatchedChannels(usize, usize),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config failed due to selection error: {0}")]
    BadSelection(#[from] SelectionError),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to cycler file error: {0}")]
    CyclerError(#[from] CyclerFileError),
    #[error("Processor failed due to EisStack error: {0}")]
    EisError(#[from] EisStackError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor found no cycler files for channel {0}")]
    NoFilesError(u32),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
