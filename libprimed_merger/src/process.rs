use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::config::Config;
use super::cycler::{CyclerBatch, CyclerCell};
use super::cycler_file;
use super::eis_stack::EisStack;
use super::error::{EisStackError, ProcessorError};
use super::merger;
use super::worker_status::{BarColor, WorkerStatus};

/// What one channel's assembly produced, for reporting once the worker is
/// done. Plain data only; the containers themselves stay on the worker.
#[derive(Debug, Clone, Default)]
pub struct ChannelSummary {
    pub channel_number: u32,
    pub cell_number: u32,
    pub n_files: usize,
    pub n_cycles: usize,
    pub n_steps: usize,
    pub n_rows: usize,
    pub sweeps_matched: usize,
    pub sweeps_unmatched: usize,
}

/// Collect a channel's raw cycler files with their sizes, ordered by the
/// sequence number embedded in the name.
fn get_file_stack(parent_path: &Path) -> Result<Vec<(PathBuf, u64)>, ProcessorError> {
    let mut file_list: Vec<(PathBuf, u64)> = Vec::new();
    for item in parent_path.read_dir()? {
        let item_path = item?.path();
        let is_csv = item_path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv {
            let bytes = item_path.metadata()?.len();
            file_list.push((item_path, bytes));
        }
    }
    // Exports are split as <name>.<seq>.csv; chronological order is the
    // sequence-number order, not the lexical one.
    file_list.sort_by_key(|(path, _)| (file_sequence_number(path), path.clone()));
    Ok(file_list)
}

/// The numeric token before the extension, or 0 when there is none.
pub(crate) fn file_sequence_number(path: &Path) -> u32 {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| {
            let parts: Vec<&str> = name.split('.').collect();
            if parts.len() >= 3 {
                parts[parts.len() - 2].parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0)
}

/// Assemble one channel end-to-end: parse its cycler files in order, then
/// load and merge the impedance sweeps when an EIS directory is configured.
pub fn process_channel(
    config: &Config,
    cell_number: u32,
    channel_number: u32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
) -> Result<ChannelSummary, ProcessorError> {
    let channel_dir = config.channel_directory(channel_number)?;
    let files = get_file_stack(&channel_dir)?;
    if files.is_empty() {
        return Err(ProcessorError::NoFilesError(channel_number));
    }
    let total_bytes: u64 = files.iter().map(|(_, bytes)| *bytes).sum();
    log::info!(
        "Channel {}: {} cycler files, total size {}",
        channel_number,
        files.len(),
        human_bytes::human_bytes(total_bytes as f64)
    );

    let mut cell = CyclerCell::new(cell_number, channel_number);
    tx.send(WorkerStatus::new(
        0.0,
        channel_number,
        *worker_id,
        BarColor::CYAN,
    ))?;
    let mut done_bytes: u64 = 0;
    let mut n_files = 0;
    for (path, bytes) in &files {
        match cycler_file::read_cycler_file(&mut cell, path, &config.steps, config.format) {
            Ok(_) => n_files += 1,
            Err(error) if config.skip_bad_files => {
                log::warn!("Skipping cycler file {path:?}: {error}");
            }
            Err(error) => return Err(ProcessorError::CyclerError(error)),
        }
        done_bytes += bytes;
        tx.send(WorkerStatus::new(
            done_bytes as f32 / total_bytes.max(1) as f32,
            channel_number,
            *worker_id,
            BarColor::CYAN,
        ))?;
    }

    let mut summary = ChannelSummary {
        channel_number,
        cell_number,
        n_files,
        n_cycles: cell.len(),
        n_steps: cell.iter().map(|cycle| cycle.len()).sum(),
        n_rows: cell
            .iter()
            .flat_map(|cycle| cycle.steps())
            .map(|step| step.n_rows())
            .sum(),
        ..ChannelSummary::default()
    };

    if let Some(eis_path) = &config.eis_path {
        tx.send(WorkerStatus::new(
            0.0,
            channel_number,
            *worker_id,
            BarColor::MAGENTA,
        ))?;
        match EisStack::new(eis_path) {
            Ok(stack) => {
                log::info!(
                    "EIS stack size: {}",
                    human_bytes::human_bytes(stack.total_stack_size_bytes() as f64)
                );
                let eis_cells = stack.build_cells(
                    &[(cell_number, channel_number)],
                    config.eis_soc,
                    config.require_timestamp,
                    config.skip_bad_files,
                )?;
                let mut batch = CyclerBatch::with_cells(vec![cell]);
                let report = merger::merge_eis_data(&eis_cells, &mut batch);
                summary.sweeps_matched = report.matched;
                summary.sweeps_unmatched = report.unmatched.len();
                if !report.is_clean() {
                    log::warn!(
                        "Channel {}: {} sweeps left unmatched",
                        channel_number,
                        report.unmatched.len()
                    );
                }
            }
            Err(EisStackError::NoMatchingFiles) => {
                log::warn!("No sweep files found in {eis_path:?}; skipping EIS merge");
            }
            Err(error) => return Err(ProcessorError::EisError(error)),
        }
        tx.send(WorkerStatus::new(
            1.0,
            channel_number,
            *worker_id,
            BarColor::MAGENTA,
        ))?;
    }

    Ok(summary)
}

/// The function to be called by a separate thread (typically the UI).
/// Processes every channel in the config in order.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<ChannelSummary>, ProcessorError> {
    config.validate()?;
    let mut summaries = Vec::new();
    for (cell_number, channel_number) in config.channel_pairs() {
        if config.does_channel_exist(channel_number) {
            log::info!("Processing channel {}...", channel_number);
            summaries.push(process_channel(
                &config,
                cell_number,
                channel_number,
                &tx,
                &worker_id,
            )?);
            log::info!("Finished processing channel {}.", channel_number);
        } else {
            log::info!("Channel {} does not exist, skipping...", channel_number);
        }
    }
    Ok(summaries)
}

/// Process a subset of the configured channels.
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<(u32, u32)>,
) -> Result<Vec<ChannelSummary>, ProcessorError> {
    config.validate()?;
    let mut summaries = Vec::new();
    for (cell_number, channel_number) in subset {
        if config.does_channel_exist(channel_number) {
            log::info!("Processing channel {}...", channel_number);
            summaries.push(process_channel(
                &config,
                cell_number,
                channel_number,
                &tx,
                &worker_id,
            )?);
            log::info!("Finished processing channel {}.", channel_number);
        } else {
            log::info!("Channel {} does not exist, skipping...", channel_number);
        }
    }
    Ok(summaries)
}

/// Divide the channel list into a set of subsets (per thread/worker).
pub fn create_subsets(config: &Config) -> Vec<Vec<(u32, u32)>> {
    let mut subsets: Vec<Vec<(u32, u32)>> = vec![Vec::new(); config.n_threads.max(1)];
    let n_subsets = subsets.len();

    for (idx, pair) in config.channel_pairs().into_iter().enumerate() {
        subsets[idx % n_subsets].push(pair)
    }

    subsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const CYCLER_HEADER: &str =
        "Date_Time,Test_Time(s),Step_Time(s),Step_Index,Cycle_Index,Voltage(V),Current(A)";

    const SWEEP_FIXTURE: &str = "EXPLAIN\n\
        TAG\tEISPOT\n\
        DATE\tLABEL\t3/3/2022\tDate\n\
        TIME\tLABEL\t13:27:31\tTime\n\
        ZCURVE\tTABLE\t2\n\
        \tPt\tTime\tFreq\tZreal\tZimag\n\
        \t#\ts\tHz\tohm\tohm\n\
        \t0\t1\t100019.5\t0.0229291\t-0.0030148\n\
        \t1\t2\t46464.84\t0.0162025\t0.0022876\n";

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "primed_merger_process_{tag}_{}",
            std::process::id()
        ));
        if dir.exists() {
            std::fs::remove_dir_all(&dir).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn cycler_rows(step: u32, cycle: u32, n: usize) -> String {
        (0..n)
            .map(|idx| format!("11/05/2021,{idx}.0,{idx}.0,{step},{cycle},3.7,-2.5\n"))
            .collect()
    }

    fn test_config(root: &Path) -> Config {
        let mut config = Config::default();
        config.cycler_path = root.join("raws");
        config.eis_path = Some(root.join("eis"));
        config.cell_numbers = vec![1];
        config.channel_numbers = vec![1];
        config.steps.insert("characterization", vec![2]);
        config.steps.insert("eis", vec![14]);
        config
    }

    #[test]
    fn test_file_sequence_number() {
        assert_eq!(file_sequence_number(Path::new("B6T10V0_Channel_1.2.csv")), 2);
        assert_eq!(
            file_sequence_number(Path::new("B6T10V0_Channel_1.12.csv")),
            12
        );
        assert_eq!(file_sequence_number(Path::new("data.csv")), 0);
    }

    #[test]
    fn test_create_subsets_covers_every_channel() {
        let mut config = Config::default();
        config.cell_numbers = vec![1, 2, 3, 4, 5];
        config.channel_numbers = vec![1, 2, 3, 4, 5];
        config.n_threads = 2;

        let subsets = create_subsets(&config);
        assert_eq!(subsets.len(), 2);
        let mut all: Vec<(u32, u32)> = subsets.into_iter().flatten().collect();
        all.sort();
        assert_eq!(all, config.channel_pairs());
    }

    #[test]
    fn test_process_channel_end_to_end() {
        let root = scratch_dir("end_to_end");
        let channel_dir = root.join("raws").join("Channel_1");
        std::fs::create_dir_all(&channel_dir).unwrap();
        // Two files in sequence order; cycle 1 continues into the second.
        std::fs::write(
            channel_dir.join("B6T10V0_Channel_1.1.csv"),
            format!(
                "{CYCLER_HEADER}\n{}{}",
                cycler_rows(2, 1, 2),
                cycler_rows(14, 1, 1)
            ),
        )
        .unwrap();
        std::fs::write(
            channel_dir.join("B6T10V0_Channel_1.2.csv"),
            format!("{CYCLER_HEADER}\n{}{}", cycler_rows(2, 2, 1), cycler_rows(9, 2, 1)),
        )
        .unwrap();

        let eis_dir = root.join("eis");
        std::fs::create_dir_all(&eis_dir).unwrap();
        std::fs::write(
            eis_dir.join("B6T10V0_Chan001_Cycle001_Step014.DTA"),
            SWEEP_FIXTURE,
        )
        .unwrap();
        std::fs::write(
            eis_dir.join("B6T10V0_Chan001_Cycle002_Step014.DTA"),
            SWEEP_FIXTURE,
        )
        .unwrap();

        let config = test_config(&root);
        let (tx, rx) = mpsc::channel();
        let summary = process_channel(&config, 1, 1, &tx, &0).unwrap();
        drop(tx);

        assert_eq!(summary.n_files, 2);
        assert_eq!(summary.n_cycles, 2);
        // Cycle 1 keeps steps 2 and 14; cycle 2 keeps step 2 only.
        assert_eq!(summary.n_steps, 3);
        assert_eq!(summary.n_rows, 4);
        // The cycle-1 sweep lands on step 14; the cycle-2 sweep has no step
        // 14 to land on and is reported, not fatal.
        assert_eq!(summary.sweeps_matched, 1);
        assert_eq!(summary.sweeps_unmatched, 1);

        let statuses: Vec<WorkerStatus> = rx.try_iter().collect();
        assert!(!statuses.is_empty());
        assert!(statuses.iter().all(|status| status.worker_id == 0));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
