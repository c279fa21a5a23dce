use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::dta_file;
use super::eis::{EisCell, EisCycle, EisSweep};
use super::error::EisStackError;

/// One sweep file discovered in the EIS results directory, with the
/// identity tokens recovered from its name.
#[derive(Debug, Clone)]
pub struct SweepFile {
    pub path: PathBuf,
    pub channel_number: u32,
    pub cycle_number: u32,
    pub step_index: u32,
    pub size_bytes: u64,
}

/// The collection of all impedance sweep files for a test campaign.
///
/// The impedance analyzer writes one file per sweep and encodes the channel,
/// cycle, and schedule step in the filename as zero-padded tokens
/// (`…_Chan001_Cycle003_Step014.DTA`); the files themselves carry none of
/// that identity. The stack recovers the tokens up front so the rest of the
/// pipeline works with plain integers.
#[derive(Debug, Clone)]
pub struct EisStack {
    files: Vec<SweepFile>,
    total_stack_size_bytes: u64,
}

impl EisStack {
    /// Scan a directory for sweep files.
    pub fn new(path: &Path) -> Result<Self, EisStackError> {
        let mut files: Vec<SweepFile> = Vec::new();
        let mut total_bytes: u64 = 0;
        for item in path.read_dir()? {
            let item_path = item?.path();
            let name = match item_path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.to_ascii_uppercase().ends_with(".DTA") {
                continue;
            }
            let (channel_number, cycle_number, step_index) = match parse_sweep_filename(name) {
                Some(tokens) => tokens,
                None => {
                    log::warn!("Skipping {name}: no Chan/Cycle/Step tokens in filename");
                    continue;
                }
            };
            let size_bytes = item_path.metadata()?.len();
            total_bytes += size_bytes;
            files.push(SweepFile {
                path: item_path,
                channel_number,
                cycle_number,
                step_index,
                size_bytes,
            });
        }

        if files.is_empty() {
            return Err(EisStackError::NoMatchingFiles);
        }

        files.sort_by_key(|file| (file.channel_number, file.cycle_number, file.step_index));
        Ok(EisStack {
            files,
            total_stack_size_bytes: total_bytes,
        })
    }

    pub fn total_stack_size_bytes(&self) -> u64 {
        self.total_stack_size_bytes
    }

    pub fn files(&self) -> &[SweepFile] {
        &self.files
    }

    pub fn files_for_channel(&self, channel_number: u32) -> impl Iterator<Item = &SweepFile> {
        self.files
            .iter()
            .filter(move |file| file.channel_number == channel_number)
    }

    /// Read the stack's files into one `EisCell` per requested channel.
    ///
    /// `pairs` maps cell numbers to channel numbers, in order; `soc` is the
    /// caller's state-of-charge hint for the sweeps (the files do not record
    /// it). With `skip_bad_files` an unreadable sweep file is logged and
    /// skipped instead of failing the whole load. Channels with no sweep
    /// files are skipped with a warning.
    pub fn build_cells(
        &self,
        pairs: &[(u32, u32)],
        soc: f64,
        require_timestamp: bool,
        skip_bad_files: bool,
    ) -> Result<Vec<EisCell>, EisStackError> {
        let mut cells: Vec<EisCell> = Vec::new();
        for (cell_number, channel_number) in pairs.iter().copied() {
            let mut cell = EisCell::new(
                cell_number,
                channel_number,
                format!("eis cell for channel {channel_number}"),
            );
            for file in self.files_for_channel(channel_number) {
                let name = format!(
                    "eis chan{:03} cycle{:03}",
                    file.channel_number, file.cycle_number
                );
                let mut sweep = EisSweep::new(name, soc, file.step_index)?;
                match dta_file::read_dta_file(&mut sweep, &file.path, require_timestamp) {
                    Ok(()) => (),
                    Err(error) if skip_bad_files => {
                        log::warn!("Skipping sweep file {:?}: {error}", file.path);
                        continue;
                    }
                    Err(error) => return Err(EisStackError::FileError(error)),
                }

                let sweep = Rc::new(RefCell::new(sweep));
                match cell.last_cycle_mut() {
                    Some(cycle) if cycle.cycle_number == file.cycle_number => {
                        cycle.add_sweep(sweep)
                    }
                    _ => {
                        let mut cycle = EisCycle::new(file.cycle_number);
                        cycle.add_sweep(sweep);
                        cell.add_cycle(cycle);
                    }
                }
            }
            if cell.is_empty() {
                log::warn!("No sweep files for channel {channel_number}");
                continue;
            }
            cells.push(cell);
        }
        Ok(cells)
    }
}

/// Extract the zero-padded Chan/Cycle/Step tokens from a sweep filename.
/// Returns None unless all three tokens are present and numeric.
pub fn parse_sweep_filename(name: &str) -> Option<(u32, u32, u32)> {
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    let mut channel_number: Option<u32> = None;
    let mut cycle_number: Option<u32> = None;
    let mut step_index: Option<u32> = None;
    for token in stem.split('_') {
        if let Some(rest) = token.strip_prefix("Chan") {
            channel_number = rest.parse().ok();
        } else if let Some(rest) = token.strip_prefix("Cycle") {
            cycle_number = rest.parse().ok();
        } else if let Some(rest) = token.strip_prefix("Step") {
            step_index = rest.parse().ok();
        }
    }
    Some((channel_number?, cycle_number?, step_index?))
}

#[cfg(test)]
mod tests {
    use super::*;

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
            "primed_merger_eis_stack_{tag}_{}",
            std::process::id()
        ));
        if dir.exists() {
            std::fs::remove_dir_all(&dir).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_parse_sweep_filename() {
        assert_eq!(
            parse_sweep_filename("B6T10V0_Chan001_Cycle003_Step014.DTA"),
            Some((1, 3, 14))
        );
        assert_eq!(
            parse_sweep_filename("B6T10V0_Chan012_Cycle045_Step014.DTA"),
            Some((12, 45, 14))
        );
        assert_eq!(parse_sweep_filename("B6T10V0_Chan001_Cycle003.DTA"), None);
        assert_eq!(parse_sweep_filename("notes.DTA"), None);
    }

    #[test]
    fn test_stack_scan_and_build() {
        let dir = scratch_dir("scan");
        for file_name in [
            "B6T10V0_Chan001_Cycle001_Step014.DTA",
            "B6T10V0_Chan001_Cycle003_Step014.DTA",
            "B6T10V0_Chan002_Cycle001_Step014.DTA",
            "README.txt",
        ] {
            std::fs::write(dir.join(file_name), SWEEP_FIXTURE).unwrap();
        }

        let stack = EisStack::new(&dir).unwrap();
        assert_eq!(stack.files().len(), 3);
        assert_eq!(stack.files_for_channel(1).count(), 2);

        let cells = stack
            .build_cells(&[(1, 1), (2, 2), (3, 9)], 0.5, false, false)
            .unwrap();
        // Channel 9 has no files and is skipped.
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].cell_number, 1);
        assert_eq!(cells[0].len(), 2);
        assert_eq!(cells[0].cycles()[1].cycle_number, 3);
        let sweep = cells[0].cycles()[0].sweeps()[0].borrow();
        assert_eq!(sweep.step_index, 14);
        assert_eq!(sweep.n_rows(), 2);
        drop(sweep);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_directory() {
        let dir = scratch_dir("empty");
        let result = EisStack::new(&dir);
        assert!(matches!(result, Err(EisStackError::NoMatchingFiles)));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_bad_file_policy() {
        let dir = scratch_dir("bad");
        std::fs::write(
            dir.join("B6T10V0_Chan001_Cycle001_Step014.DTA"),
            SWEEP_FIXTURE,
        )
        .unwrap();
        std::fs::write(
            dir.join("B6T10V0_Chan001_Cycle003_Step014.DTA"),
            "EXPLAIN\nTAG\tEISPOT\n",
        )
        .unwrap();

        let stack = EisStack::new(&dir).unwrap();
        assert!(stack.build_cells(&[(1, 1)], 0.5, false, false).is_err());

        let cells = stack.build_cells(&[(1, 1)], 0.5, false, true).unwrap();
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
