//! # primed_merger
//!
//! primed_merger assembles raw battery test data from the PRIMED lab into a
//! unified, navigable structure. Two instruments produce the raw files: the
//! battery cycler writes delimited tabular logs of every charge/discharge
//! step, and the impedance analyzer writes one tagged DTA text file per EIS
//! sweep. This library parses both families, builds the shared
//! cell -> cycle -> step hierarchy, and cross-references each impedance
//! sweep with the schedule step it was recorded during.
//!
//! ## Data layout
//!
//! Cycler data is expected as one directory per channel, holding the
//! sequence-numbered CSV exports for that channel:
//!
//! ```text
//! raws/
//! |---- Channel_1/
//! |    |---- B6T10V0_..._Channel_1.1.csv
//! |    |---- B6T10V0_..._Channel_1.2.csv
//! |---- Channel_2/
//! |    |---- ...
//! ```
//!
//! Two header conventions are recognized (see
//! [`cycler_file::CyclerFormat`]); the family is inferred from the header
//! row unless the configuration pins it. Only the schedule steps named in
//! the configured [`cycler_file::StepSelection`] are retained.
//!
//! EIS data is a flat directory of DTA files, one per sweep, with the
//! channel, cycle, and schedule step encoded in the filename:
//!
//! ```text
//! eis/
//! |---- B6T10V0_Chan001_Cycle001_Step014.DTA
//! |---- B6T10V0_Chan001_Cycle003_Step014.DTA
//! |---- ...
//! ```
//!
//! ## Merging
//!
//! [`merger::merge_eis_data`] resolves every sweep through cell (cell *and*
//! channel number), cycle, and step index, then attaches it to the matching
//! step(s). Steps hold weak references; the EIS hierarchy keeps ownership
//! of the sweeps. Sweeps that resolve nowhere are collected on the
//! [`merger::MergeReport`] instead of failing the batch — raw campaigns
//! always contain a few orphans from power outages and aborted runs.
//!
//! ## Configuration
//!
//! The CLI drives everything from a YAML file:
//!
//! ```yml
//! cycler_path: /data/raws
//! eis_path: /data/eis
//! format: null
//! cell_numbers: [1, 2]
//! channel_numbers: [1, 2]
//! steps:
//!   characterization: [6, 7, 10]
//!   degradation: [25]
//! eis_soc: 0.5
//! skip_bad_files: false
//! require_timestamp: false
//! n_threads: 1
//! ```
//!
//! `format: null` means infer per file. `skip_bad_files` chooses between
//! skipping unreadable raw files with a warning and failing the channel.
//! `require_timestamp` makes the DATE/TIME tags of DTA files mandatory.
//!
//! Channels are independent: each worker thread owns the containers for the
//! channels it processes, and nothing but plain summary data crosses
//! threads.
pub mod config;
pub mod cycler;
pub mod cycler_file;
pub mod data_block;
pub mod dta_file;
pub mod eis;
pub mod eis_stack;
pub mod error;
pub mod merger;
pub mod process;
pub mod worker_status;
