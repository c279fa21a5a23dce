use std::cell::RefCell;
use std::rc::Rc;

use ndarray::Array2;
use time::PrimitiveDateTime;

use super::data_block::{Column, DataBlock};
use super::error::{LookupError, SweepError};

/// Identity of one cycler step, recorded on a sweep once the merge has
/// placed it. `occurrence` disambiguates steps sharing a step index within
/// one cycle (an interrupted step resumed later).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLocation {
    pub cell_number: u32,
    pub channel_number: u32,
    pub cycle_index: u32,
    pub step_index: u32,
    pub occurrence: usize,
}

/// A single impedance sweep: one run from a start frequency to an end
/// frequency at a fixed state-of-charge.
///
/// Sweep files do not name their cell, channel, or cycle; those come from
/// the surrounding hierarchy and the caller. The sweep itself only knows
/// the schedule step it was recorded at, its SOC, and its measured table.
#[derive(Debug, Clone)]
pub struct EisSweep {
    pub name: String,
    pub soc: f64,
    pub step_index: u32,
    data: DataBlock,
    acquired: Option<PrimitiveDateTime>,
    matched: Vec<StepLocation>,
    loaded: bool,
}

impl EisSweep {
    /// Create an empty sweep. The state-of-charge is a fraction and must
    /// lie in [0, 1].
    pub fn new(name: String, soc: f64, step_index: u32) -> Result<Self, SweepError> {
        if !(0.0..=1.0).contains(&soc) {
            return Err(SweepError::InvalidSoc(soc));
        }
        Ok(EisSweep {
            name,
            soc,
            step_index,
            data: DataBlock::new(),
            acquired: None,
            matched: Vec::new(),
            loaded: false,
        })
    }

    /// Whether a file has been read into this sweep.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Install a fully parsed table. Parsers call this exactly once, after
    /// the whole file validated, so a failed read leaves the sweep empty.
    pub(crate) fn commit_data(&mut self, data: DataBlock, acquired: Option<PrimitiveDateTime>) {
        self.data = data;
        self.acquired = acquired;
        self.loaded = true;
    }

    /// Acquisition timestamp from the file's DATE/TIME tags, when present.
    pub fn acquired(&self) -> Option<PrimitiveDateTime> {
        self.acquired
    }

    pub fn data(&self) -> &DataBlock {
        &self.data
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

    /// Snapshot the sweep as a rows x columns matrix.
    pub fn to_array(&self) -> Array2<f64> {
        self.data.to_array()
    }

    /// Record the step this sweep was matched to. Returns false if that
    /// exact location is already recorded.
    pub(crate) fn record_match(&mut self, location: StepLocation) -> bool {
        if self.matched.contains(&location) {
            return false;
        }
        self.matched.push(location);
        true
    }

    /// The steps this sweep has been attached to, in merge order.
    pub fn matched_steps(&self) -> &[StepLocation] {
        &self.matched
    }
}

/// The impedance sweeps recorded during one test cycle, in chronological
/// order. A cycle can hold several sweeps taken at different SOCs.
#[derive(Debug, Clone, Default)]
pub struct EisCycle {
    pub cycle_number: u32,
    pub name: String,
    sweeps: Vec<Rc<RefCell<EisSweep>>>,
}

impl EisCycle {
    pub fn new(cycle_number: u32) -> Self {
        EisCycle {
            cycle_number,
            name: String::new(),
            sweeps: Vec::new(),
        }
    }

    pub fn add_sweep(&mut self, sweep: Rc<RefCell<EisSweep>>) {
        self.sweeps.push(sweep);
    }

    pub fn sweeps(&self) -> &[Rc<RefCell<EisSweep>>] {
        &self.sweeps
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rc<RefCell<EisSweep>>> {
        self.sweeps.iter()
    }

    pub fn len(&self) -> usize {
        self.sweeps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sweeps.is_empty()
    }
}

/// The impedance record of one cell across a whole test: cycles of sweeps,
/// keyed by the same (cell number, channel number) pair as the cycler data.
#[derive(Debug, Clone, Default)]
pub struct EisCell {
    pub cell_number: u32,
    pub channel_number: u32,
    pub name: String,
    cycles: Vec<EisCycle>,
}

impl EisCell {
    pub fn new(cell_number: u32, channel_number: u32, name: String) -> Self {
        EisCell {
            cell_number,
            channel_number,
            name,
            cycles: Vec::new(),
        }
    }

    pub fn add_cycle(&mut self, cycle: EisCycle) {
        self.cycles.push(cycle);
    }

    pub fn cycles(&self) -> &[EisCycle] {
        &self.cycles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EisCycle> {
        self.cycles.iter()
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    pub(crate) fn last_cycle_mut(&mut self) -> Option<&mut EisCycle> {
        self.cycles.last_mut()
    }
}

impl<'a> IntoIterator for &'a EisCell {
    type Item = &'a EisCycle;
    type IntoIter = std::slice::Iter<'a, EisCycle>;

    fn into_iter(self) -> Self::IntoIter {
        self.cycles.iter()
    }
}
