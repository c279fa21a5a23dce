use std::cell::RefCell;
use std::rc::{Rc, Weak};

use fxhash::FxHashMap;
use ndarray::Array2;

use super::data_block::{Column, DataBlock};
use super::eis::EisSweep;
use super::error::LookupError;

/// Generate a unique id number for a (cell number, channel number) pair.
///
/// Cell and channel numbers stay below 10,000 in any real test batch, so a
/// decimal-packed u64 is collision free and reads back easily in a debugger.
pub fn cell_uuid(cell_number: &u32, channel_number: &u32) -> u64 {
    (*channel_number as u64) + (*cell_number as u64) * 10_000
}

/// One step of a cycler test schedule, e.g. a constant-current discharge
/// from one state-of-charge to another.
///
/// A step owns its slice of the raw file's rows, column by column. After the
/// EIS merge it additionally holds weak references to the impedance sweeps
/// recorded while this step ran; the sweeps themselves stay owned by the EIS
/// hierarchy.
#[derive(Debug, Clone, Default)]
pub struct CyclerStep {
    pub step_index: u32,
    pub step_type: String,
    data: DataBlock,
    sweeps: Vec<Weak<RefCell<EisSweep>>>,
}

impl CyclerStep {
    pub fn new(step_index: u32, step_type: String) -> Self {
        CyclerStep {
            step_index,
            step_type,
            data: DataBlock::new(),
            sweeps: Vec::new(),
        }
    }

    pub fn data(&self) -> &DataBlock {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut DataBlock {
        &mut self.data
    }

    /// Column names in file order.
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.data.headers()
    }

    pub fn n_rows(&self) -> usize {
        self.data.n_rows()
    }

    /// Get the full ordered column for a name.
    pub fn column(&self, name: &str) -> Result<&Column, LookupError> {
        self.data.column(name)
    }

    /// Get a column as a float slice, failing if it holds text.
    pub fn floats(&self, name: &str) -> Result<&[f64], LookupError> {
        self.data.floats(name)
    }

    /// Snapshot the step as a rows x columns matrix.
    pub fn to_array(&self) -> Array2<f64> {
        self.data.to_array()
    }

    /// Attach an impedance sweep recorded during this step.
    ///
    /// Returns false if this exact sweep is already attached, so re-running
    /// a merge never duplicates the reference.
    pub fn attach_sweep(&mut self, sweep: &Rc<RefCell<EisSweep>>) -> bool {
        let handle = Rc::downgrade(sweep);
        if self.sweeps.iter().any(|existing| existing.ptr_eq(&handle)) {
            return false;
        }
        self.sweeps.push(handle);
        true
    }

    /// The sweeps attached to this step that are still alive.
    pub fn sweeps(&self) -> Vec<Rc<RefCell<EisSweep>>> {
        self.sweeps.iter().filter_map(|weak| weak.upgrade()).collect()
    }
}

/// One cycle of a test: the ordered run of steps between two cycle-index
/// transitions in the raw file.
#[derive(Debug, Clone, Default)]
pub struct CyclerCycle {
    pub cycle_index: u32,
    steps: Vec<CyclerStep>,
}

impl CyclerCycle {
    pub fn new(cycle_index: u32) -> Self {
        CyclerCycle {
            cycle_index,
            steps: Vec::new(),
        }
    }

    pub fn add_step(&mut self, step: CyclerStep) {
        self.steps.push(step);
    }

    /// Steps in file appearance order.
    pub fn steps(&self) -> &[CyclerStep] {
        &self.steps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CyclerStep> {
        self.steps.iter()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn last_step_mut(&mut self) -> Option<&mut CyclerStep> {
        self.steps.last_mut()
    }

    /// All steps carrying the given step index, in appearance order.
    ///
    /// A step interrupted by a power outage and resumed later appears twice
    /// in the file and therefore twice here; callers get every occurrence.
    pub fn steps_with_index(&self, step_index: u32) -> Vec<&CyclerStep> {
        self.steps
            .iter()
            .filter(|step| step.step_index == step_index)
            .collect()
    }

    pub fn steps_with_index_mut(&mut self, step_index: u32) -> Vec<&mut CyclerStep> {
        self.steps
            .iter_mut()
            .filter(|step| step.step_index == step_index)
            .collect()
    }
}

impl<'a> IntoIterator for &'a CyclerCycle {
    type Item = &'a CyclerStep;
    type IntoIter = std::slice::Iter<'a, CyclerStep>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

/// One battery under test on one cycler channel: the full ordered run of
/// cycles, plus the cached union of column headers across its steps.
#[derive(Debug, Clone, Default)]
pub struct CyclerCell {
    pub cell_number: u32,
    pub channel_number: u32,
    cycles: Vec<CyclerCycle>,
    headers: Vec<String>,
}

impl CyclerCell {
    pub fn new(cell_number: u32, channel_number: u32) -> Self {
        CyclerCell {
            cell_number,
            channel_number,
            cycles: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn add_cycle(&mut self, cycle: CyclerCycle) {
        self.cycles.push(cycle);
    }

    /// Cycles in parse order (cycle-index order for a well-formed file).
    pub fn cycles(&self) -> &[CyclerCycle] {
        &self.cycles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CyclerCycle> {
        self.cycles.iter()
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    pub fn cycle(&self, cycle_index: u32) -> Result<&CyclerCycle, LookupError> {
        self.cycles
            .iter()
            .find(|cycle| cycle.cycle_index == cycle_index)
            .ok_or(LookupError::NoCycle(cycle_index))
    }

    pub fn cycle_mut(&mut self, cycle_index: u32) -> Result<&mut CyclerCycle, LookupError> {
        self.cycles
            .iter_mut()
            .find(|cycle| cycle.cycle_index == cycle_index)
            .ok_or(LookupError::NoCycle(cycle_index))
    }

    pub(crate) fn last_cycle(&self) -> Option<&CyclerCycle> {
        self.cycles.last()
    }

    pub(crate) fn last_cycle_mut(&mut self) -> Option<&mut CyclerCycle> {
        self.cycles.last_mut()
    }

    /// The cached union of column names across this cell's steps.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Merge a file's header set into the cache, preserving first-seen order.
    ///
    /// Parsers call this on every committed file; headers can differ between
    /// files when a test was reconfigured mid-campaign.
    pub fn update_headers(&mut self, headers: &[String]) {
        for header in headers {
            if !self.headers.contains(header) {
                self.headers.push(header.clone());
            }
        }
    }

    /// Recompute the header cache from the steps currently in the cell.
    ///
    /// Required after mutating step columns outside a parser.
    pub fn rebuild_headers(&mut self) {
        self.headers.clear();
        for cycle in &self.cycles {
            for step in cycle.steps() {
                for header in step.headers() {
                    if !self.headers.iter().any(|h| h == header) {
                        self.headers.push(header.to_string());
                    }
                }
            }
        }
    }
}

impl<'a> IntoIterator for &'a CyclerCell {
    type Item = &'a CyclerCycle;
    type IntoIter = std::slice::Iter<'a, CyclerCycle>;

    fn into_iter(self) -> Self::IntoIter {
        self.cycles.iter()
    }
}

/// An ordered batch of cells, one per test channel, with constant-time
/// lookup by (cell number, channel number).
#[derive(Debug, Clone, Default)]
pub struct CyclerBatch {
    cells: Vec<CyclerCell>,
    index: FxHashMap<u64, usize>,
}

impl CyclerBatch {
    pub fn new() -> Self {
        CyclerBatch::default()
    }

    pub fn with_cells(cells: Vec<CyclerCell>) -> Self {
        let mut batch = CyclerBatch::new();
        for cell in cells {
            batch.add_cell(cell);
        }
        batch
    }

    pub fn add_cell(&mut self, cell: CyclerCell) {
        let uuid = cell_uuid(&cell.cell_number, &cell.channel_number);
        self.index.insert(uuid, self.cells.len());
        self.cells.push(cell);
    }

    pub fn cells(&self) -> &[CyclerCell] {
        &self.cells
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CyclerCell> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell(&self, cell_number: u32, channel_number: u32) -> Result<&CyclerCell, LookupError> {
        let uuid = cell_uuid(&cell_number, &channel_number);
        match self.index.get(&uuid) {
            Some(idx) => Ok(&self.cells[*idx]),
            None => Err(LookupError::NoCell(cell_number, channel_number)),
        }
    }

    pub fn cell_mut(
        &mut self,
        cell_number: u32,
        channel_number: u32,
    ) -> Result<&mut CyclerCell, LookupError> {
        let uuid = cell_uuid(&cell_number, &channel_number);
        match self.index.get(&uuid) {
            Some(idx) => Ok(&mut self.cells[*idx]),
            None => Err(LookupError::NoCell(cell_number, channel_number)),
        }
    }
}

impl<'a> IntoIterator for &'a CyclerBatch {
    type Item = &'a CyclerCell;
    type IntoIter = std::slice::Iter<'a, CyclerCell>;

    fn into_iter(self) -> Self::IntoIter {
        self.cells.iter()
    }
}
