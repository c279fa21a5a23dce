use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::cycler::{CyclerCell, CyclerCycle, CyclerStep};
use super::error::{CyclerFileError, SelectionError};

/// The cycler file families this parser understands, distinguished by their
/// column-naming convention. New test campaigns occasionally ship a new
/// convention; they get a new variant here rather than a guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclerFormat {
    /// Batch B6 export: underscore headers (`Step_Index`, `Voltage(V)`),
    /// no step-type column. The step type is taken from the selection
    /// category the step index was requested under.
    B6,
    /// Pack characterization export: spaced headers (`Step Index`,
    /// `Voltage (V)`) plus an explicit `Step Type` column with labels such
    /// as `C CC Dis`.
    Lbt,
}

impl CyclerFormat {
    fn step_index_column(&self) -> &'static str {
        match self {
            CyclerFormat::B6 => "Step_Index",
            CyclerFormat::Lbt => "Step Index",
        }
    }

    fn cycle_index_column(&self) -> &'static str {
        match self {
            CyclerFormat::B6 => "Cycle_Index",
            CyclerFormat::Lbt => "Cycle Index",
        }
    }

    fn step_type_column(&self) -> Option<&'static str> {
        match self {
            CyclerFormat::B6 => None,
            CyclerFormat::Lbt => Some("Step Type"),
        }
    }

    /// The columns a file of this family must carry. Anything missing means
    /// a corrupted or wrong file, never a file to silently half-read.
    fn required_columns(&self) -> &'static [&'static str] {
        match self {
            CyclerFormat::B6 => &[
                "Date_Time",
                "Test_Time(s)",
                "Step_Time(s)",
                "Step_Index",
                "Cycle_Index",
                "Voltage(V)",
                "Current(A)",
            ],
            CyclerFormat::Lbt => &[
                "Date Time",
                "Test Time (s)",
                "Step Time (s)",
                "Step Index",
                "Cycle Index",
                "Step Type",
                "Voltage (V)",
                "Current (A)",
            ],
        }
    }

    /// Recognize the family from a header row.
    pub fn infer(headers: &[String]) -> Option<CyclerFormat> {
        if headers.iter().any(|h| h == "Step_Index") {
            Some(CyclerFormat::B6)
        } else if headers.iter().any(|h| h == "Step Index") {
            Some(CyclerFormat::Lbt)
        } else {
            None
        }
    }
}

/// Which schedule steps to retain, grouped under caller-defined category
/// labels, e.g. `{"characterization": [6, 7, 10], "degradation": [25]}`.
///
/// Rows whose step index appears under no category are discarded during
/// parsing. For files without a step-type column, the category label doubles
/// as the step type of the created steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSelection {
    categories: BTreeMap<String, Vec<u32>>,
}

impl StepSelection {
    pub fn new(categories: BTreeMap<String, Vec<u32>>) -> Self {
        StepSelection { categories }
    }

    pub fn insert(&mut self, category: &str, step_indices: Vec<u32>) {
        self.categories.insert(category.to_string(), step_indices);
    }

    /// Reject degenerate selections before any row processing starts. An
    /// empty selection would make every parse silently produce an empty
    /// cell.
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.categories.is_empty() {
            return Err(SelectionError::EmptySelection);
        }
        for (category, step_indices) in &self.categories {
            if step_indices.is_empty() {
                return Err(SelectionError::EmptyCategory(category.clone()));
            }
        }
        Ok(())
    }

    pub fn contains(&self, step_index: u32) -> bool {
        self.categories
            .values()
            .any(|step_indices| step_indices.contains(&step_index))
    }

    /// The category a step index was requested under. When an index appears
    /// under several categories, the first label in sorted order wins.
    pub fn category_for(&self, step_index: u32) -> Option<&str> {
        self.categories
            .iter()
            .find(|(_, step_indices)| step_indices.contains(&step_index))
            .map(|(category, _)| category.as_str())
    }
}

/// One validated data row, held until the whole file has been checked.
struct RawRow<'a> {
    cycle_index: u32,
    step_index: u32,
    fields: Vec<&'a str>,
}

/// The sequential cycle/step routing state.
///
/// Mirrors how the instrument writes its files: rows arrive in time order, a
/// change of cycle index opens a new cycle, and a retained step index opens a
/// new step unless it continues the step the router is already in. A row
/// that is not retained clears that state, so a later recurrence of the same
/// step index lands in a fresh step rather than the old one.
struct RowRouter {
    current_cycle: Option<u32>,
    current_step: Option<u32>,
}

impl RowRouter {
    /// Seed the router from whatever the cell already holds. Tests are split
    /// over many files; a step that continues in the next file must append
    /// to the step it started in.
    fn resume(cell: &CyclerCell) -> Self {
        let current_cycle = cell.cycles().last().map(|cycle| cycle.cycle_index);
        let current_step = cell
            .cycles()
            .last()
            .and_then(|cycle| cycle.steps().last())
            .map(|step| step.step_index);
        RowRouter {
            current_cycle,
            current_step,
        }
    }

    fn route(
        &mut self,
        cell: &mut CyclerCell,
        row: &RawRow<'_>,
        selection: &StepSelection,
        headers: &[String],
        step_type_idx: Option<usize>,
    ) {
        if self.current_cycle != Some(row.cycle_index) {
            self.current_step = None;
            self.current_cycle = Some(row.cycle_index);
            cell.add_cycle(CyclerCycle::new(row.cycle_index));
            log::debug!("Processing test cycle {}", row.cycle_index);
        }

        if !selection.contains(row.step_index) {
            self.current_step = None;
            return;
        }

        if self.current_step != Some(row.step_index) {
            self.current_step = Some(row.step_index);
            let step_type = match step_type_idx {
                Some(idx) => row.fields[idx].to_string(),
                None => selection
                    .category_for(row.step_index)
                    .unwrap_or("")
                    .to_string(),
            };
            let mut step = CyclerStep::new(row.step_index, step_type);
            for (idx, header) in headers.iter().enumerate() {
                step.data_mut().push_raw(header, row.fields[idx]);
            }
            if let Some(cycle) = cell.last_cycle_mut() {
                cycle.add_step(step);
            }
        } else if let Some(step) = cell.last_cycle_mut().and_then(|cycle| cycle.last_step_mut()) {
            for (idx, header) in headers.iter().enumerate() {
                step.data_mut().push_raw(header, row.fields[idx]);
            }
        }
    }
}

/// Read one raw cycler file into `cell`, keeping only the rows whose step
/// index appears in `selection`.
///
/// With `format` as None the family is inferred from the header row. The
/// whole file is validated before anything is committed, so on error the
/// cell keeps exactly the content it had. Returns the format that was used.
pub fn read_cycler_file(
    cell: &mut CyclerCell,
    path: &Path,
    selection: &StepSelection,
    format: Option<CyclerFormat>,
) -> Result<CyclerFormat, CyclerFileError> {
    if !path.exists() {
        return Err(CyclerFileError::BadFilePath(path.to_path_buf()));
    }
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;
    // The temperature headers carry a non-UTF-8 degree glyph, so the file
    // cannot be read as a UTF-8 string directly.
    let contents = String::from_utf8_lossy(&bytes);
    read_cycler_data(cell, &contents, selection, format, path)
}

pub(crate) fn read_cycler_data(
    cell: &mut CyclerCell,
    contents: &str,
    selection: &StepSelection,
    format: Option<CyclerFormat>,
    path: &Path,
) -> Result<CyclerFormat, CyclerFileError> {
    selection.validate()?;

    let mut lines = contents.lines();
    let header_line = match lines.next() {
        Some(line) => line,
        None => return Err(CyclerFileError::EmptyFile(path.to_path_buf())),
    };
    let headers = normalize_headers(header_line);

    let format = match format.or_else(|| CyclerFormat::infer(&headers)) {
        Some(format) => format,
        None => return Err(CyclerFileError::UnknownFormat(path.to_path_buf())),
    };
    for required in format.required_columns() {
        if !headers.iter().any(|h| h == required) {
            return Err(CyclerFileError::MissingColumn {
                column: required.to_string(),
                path: path.to_path_buf(),
            });
        }
    }
    let step_idx = column_position(&headers, format.step_index_column());
    let cycle_idx = column_position(&headers, format.cycle_index_column());
    let step_type_idx = format
        .step_type_column()
        .map(|name| column_position(&headers, name));

    // First pass: tokenize and validate every row. Nothing touches the cell
    // until the whole file has checked out, so a truncated or garbled file
    // never leaves a partial step behind.
    let mut rows: Vec<RawRow<'_>> = Vec::new();
    for (offset, line) in lines.enumerate() {
        let line_number = offset + 2;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != headers.len() {
            return Err(CyclerFileError::MalformedRow {
                path: path.to_path_buf(),
                line: line_number,
                found: fields.len(),
                expected: headers.len(),
            });
        }
        let step_index = match parse_index(fields[step_idx]) {
            Some(value) => value,
            None => {
                return Err(CyclerFileError::BadIndex {
                    path: path.to_path_buf(),
                    line: line_number,
                    column: "step",
                    value: fields[step_idx].to_string(),
                })
            }
        };
        let cycle_index = match parse_index(fields[cycle_idx]) {
            Some(value) => value,
            None => {
                return Err(CyclerFileError::BadIndex {
                    path: path.to_path_buf(),
                    line: line_number,
                    column: "cycle",
                    value: fields[cycle_idx].to_string(),
                })
            }
        };
        rows.push(RawRow {
            cycle_index,
            step_index,
            fields,
        });
    }
    if rows.is_empty() {
        return Err(CyclerFileError::EmptyFile(path.to_path_buf()));
    }

    // Second pass: commit. Infallible by construction.
    cell.update_headers(&headers);
    let mut router = RowRouter::resume(cell);
    for row in &rows {
        router.route(cell, row, selection, &headers, step_type_idx);
    }
    Ok(format)
}

/// Split the header row and rewrite the auxiliary temperature channels.
/// Different acquisition programs mangle the degree symbol differently, so
/// the aux headers are normalized to fixed names.
fn normalize_headers(header_line: &str) -> Vec<String> {
    header_line
        .split(',')
        .map(|header| {
            let header = header.trim().trim_start_matches('\u{feff}');
            if header.starts_with("Aux") && header.ends_with("_1") {
                String::from("Battery_Temperature(C)")
            } else if header.starts_with("Aux") && header.ends_with("_2") {
                String::from("Chamber_Temperature(C)")
            } else {
                header.to_string()
            }
        })
        .collect()
}

fn column_position(headers: &[String], name: &str) -> usize {
    headers.iter().position(|h| h == name).unwrap_or(0)
}

/// Parse a cycle or step index. Some exports write integer columns in float
/// notation ("3.000000").
fn parse_index(raw: &str) -> Option<u32> {
    if let Ok(value) = raw.parse::<u32>() {
        return Some(value);
    }
    match raw.parse::<f64>() {
        Ok(value) if value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64 => {
            Some(value as u32)
        }
        _ => None,
    }
}
