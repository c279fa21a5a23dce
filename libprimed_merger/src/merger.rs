use std::fmt::{Display, Formatter};

use super::cycler::CyclerBatch;
use super::eis::{EisCell, StepLocation};

/// Why a sweep could not be placed on any cycler step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedReason {
    NoSuchCell,
    NoSuchCycle,
    NoSuchStep,
}

impl Display for UnmatchedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmatchedReason::NoSuchCell => write!(f, "no cell with that cell/channel number"),
            UnmatchedReason::NoSuchCycle => write!(f, "no cycle with that cycle number"),
            UnmatchedReason::NoSuchStep => write!(f, "no step with that step index"),
        }
    }
}

/// One sweep the merge could not place, with enough identity to chase the
/// gap back to the raw data.
#[derive(Debug, Clone)]
pub struct UnmatchedSweep {
    pub sweep_name: String,
    pub cell_number: u32,
    pub channel_number: u32,
    pub cycle_number: u32,
    pub step_index: u32,
    pub reason: UnmatchedReason,
}

/// Outcome of one merge pass.
///
/// `matched` counts sweeps that found at least one step this pass;
/// `attachments` counts step references actually added, so a re-run over
/// already-merged data reports `matched > 0, attachments == 0`.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub matched: usize,
    pub attachments: usize,
    pub unmatched: Vec<UnmatchedSweep>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.unmatched.is_empty()
    }
}

/// Attach every sweep in `eis_cells` to the cycler step it was recorded
/// during.
///
/// A sweep resolves through cell (matching cell *and* channel number), then
/// cycle, then step index. When the target cycle holds several steps with
/// the sweep's index (an interrupted step resumed later) the sweep attaches
/// to all of them; losing the attribution would be worse than widening it.
/// A sweep that resolves nowhere is recorded on the report and the merge
/// moves on — one orphaned sweep must never sink a batch. Re-running the
/// merge over the same containers adds nothing: both sides of the
/// cross-reference deduplicate.
pub fn merge_eis_data(eis_cells: &[EisCell], batch: &mut CyclerBatch) -> MergeReport {
    let mut report = MergeReport::default();
    for eis_cell in eis_cells {
        for eis_cycle in eis_cell.cycles() {
            for sweep in eis_cycle.sweeps() {
                let (sweep_name, step_index) = {
                    let sweep = sweep.borrow();
                    (sweep.name.clone(), sweep.step_index)
                };
                let unmatched = |reason: UnmatchedReason| UnmatchedSweep {
                    sweep_name: sweep_name.clone(),
                    cell_number: eis_cell.cell_number,
                    channel_number: eis_cell.channel_number,
                    cycle_number: eis_cycle.cycle_number,
                    step_index,
                    reason,
                };

                let cell = match batch.cell_mut(eis_cell.cell_number, eis_cell.channel_number) {
                    Ok(cell) => cell,
                    Err(_) => {
                        log::warn!(
                            "Unmatched sweep '{sweep_name}': no cell {}/channel {}",
                            eis_cell.cell_number,
                            eis_cell.channel_number
                        );
                        report.unmatched.push(unmatched(UnmatchedReason::NoSuchCell));
                        continue;
                    }
                };
                let cycle = match cell.cycle_mut(eis_cycle.cycle_number) {
                    Ok(cycle) => cycle,
                    Err(_) => {
                        log::warn!(
                            "Unmatched sweep '{sweep_name}': no cycle {} in cell {}",
                            eis_cycle.cycle_number,
                            eis_cell.cell_number
                        );
                        report
                            .unmatched
                            .push(unmatched(UnmatchedReason::NoSuchCycle));
                        continue;
                    }
                };

                let steps = cycle.steps_with_index_mut(step_index);
                if steps.is_empty() {
                    log::warn!(
                        "Unmatched sweep '{sweep_name}': no step {step_index} in cycle {}",
                        eis_cycle.cycle_number
                    );
                    report.unmatched.push(unmatched(UnmatchedReason::NoSuchStep));
                    continue;
                }

                for (occurrence, step) in steps.into_iter().enumerate() {
                    if step.attach_sweep(sweep) {
                        report.attachments += 1;
                    }
                    sweep.borrow_mut().record_match(StepLocation {
                        cell_number: eis_cell.cell_number,
                        channel_number: eis_cell.channel_number,
                        cycle_index: eis_cycle.cycle_number,
                        step_index,
                        occurrence,
                    });
                }
                report.matched += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycler::{CyclerCell, CyclerCycle, CyclerStep};
    use crate::eis::{EisCycle, EisSweep};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn cycler_batch(step_indices: &[u32]) -> CyclerBatch {
        let mut cycle = CyclerCycle::new(1);
        for step_index in step_indices {
            cycle.add_step(CyclerStep::new(*step_index, String::from("characterization")));
        }
        let mut cell = CyclerCell::new(1, 1);
        cell.add_cycle(cycle);
        CyclerBatch::with_cells(vec![cell])
    }

    fn eis_cell(cell_number: u32, channel_number: u32, cycle_number: u32, step_index: u32) -> EisCell {
        let sweep = EisSweep::new(String::from("eis sweep"), 0.5, step_index).unwrap();
        let mut cycle = EisCycle::new(cycle_number);
        cycle.add_sweep(Rc::new(RefCell::new(sweep)));
        let mut cell = EisCell::new(cell_number, channel_number, String::new());
        cell.add_cycle(cycle);
        cell
    }

    #[test]
    fn test_merge_attaches_sweep() {
        let mut batch = cycler_batch(&[13, 14]);
        let eis_cells = vec![eis_cell(1, 1, 1, 14)];

        let report = merge_eis_data(&eis_cells, &mut batch);
        assert_eq!(report.matched, 1);
        assert_eq!(report.attachments, 1);
        assert!(report.is_clean());

        let cell = batch.cell(1, 1).unwrap();
        let steps = cell.cycle(1).unwrap().steps_with_index(14);
        assert_eq!(steps[0].sweeps().len(), 1);
        assert!(cell.cycle(1).unwrap().steps_with_index(13)[0]
            .sweeps()
            .is_empty());

        let sweep = eis_cells[0].cycles()[0].sweeps()[0].borrow();
        assert_eq!(sweep.matched_steps().len(), 1);
        assert_eq!(sweep.matched_steps()[0].cycle_index, 1);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut batch = cycler_batch(&[14]);
        let eis_cells = vec![eis_cell(1, 1, 1, 14)];

        merge_eis_data(&eis_cells, &mut batch);
        let second = merge_eis_data(&eis_cells, &mut batch);

        assert_eq!(second.matched, 1);
        assert_eq!(second.attachments, 0);
        let cell = batch.cell(1, 1).unwrap();
        assert_eq!(cell.cycle(1).unwrap().steps_with_index(14)[0].sweeps().len(), 1);
        let sweep = eis_cells[0].cycles()[0].sweeps()[0].borrow();
        assert_eq!(sweep.matched_steps().len(), 1);
    }

    #[test]
    fn test_resumed_step_attaches_to_all() {
        let mut batch = cycler_batch(&[14, 6, 14]);
        let eis_cells = vec![eis_cell(1, 1, 1, 14)];

        let report = merge_eis_data(&eis_cells, &mut batch);
        assert_eq!(report.matched, 1);
        assert_eq!(report.attachments, 2);

        let cell = batch.cell(1, 1).unwrap();
        let steps = cell.cycle(1).unwrap().steps_with_index(14);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].sweeps().len(), 1);
        assert_eq!(steps[1].sweeps().len(), 1);

        let sweep = eis_cells[0].cycles()[0].sweeps()[0].borrow();
        assert_eq!(sweep.matched_steps().len(), 2);
        assert_eq!(sweep.matched_steps()[0].occurrence, 0);
        assert_eq!(sweep.matched_steps()[1].occurrence, 1);
    }

    #[test]
    fn test_unmatched_sweeps_do_not_abort() {
        let mut batch = cycler_batch(&[14]);
        let eis_cells = vec![
            eis_cell(1, 1, 1, 99),
            eis_cell(1, 1, 7, 14),
            eis_cell(4, 4, 1, 14),
            eis_cell(1, 1, 1, 14),
        ];

        let report = merge_eis_data(&eis_cells, &mut batch);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched.len(), 3);

        let reasons: Vec<UnmatchedReason> =
            report.unmatched.iter().map(|sweep| sweep.reason).collect();
        assert_eq!(
            reasons,
            vec![
                UnmatchedReason::NoSuchStep,
                UnmatchedReason::NoSuchCycle,
                UnmatchedReason::NoSuchCell
            ]
        );

        // The resolvable sweep still landed.
        let cell = batch.cell(1, 1).unwrap();
        assert_eq!(cell.cycle(1).unwrap().steps_with_index(14)[0].sweeps().len(), 1);
    }
}
