//! Pass 4 (interval construction): turn per-workreg `firstUse`/`lastUse`
//! pairs into sorted [`LiveInterval`]s.

use crate::regalloc::workreg::{LiveInterval, RaWorkReg};

/// Build one interval per work-reg that has both endpoints set, sorted
/// ascending by `start`; ties broken by `end` ascending, then by `virtId`
/// ascending (spec §4.3 Pass 4).
pub fn build_intervals(workregs: &[RaWorkReg]) -> Vec<LiveInterval> {
    let mut intervals: Vec<LiveInterval> = workregs
        .iter()
        .filter_map(|w| match (w.first_use, w.last_use) {
            (Some(start), Some(end)) => Some(LiveInterval {
                work: w.virt,
                group: w.group,
                start,
                end,
            }),
            _ => None,
        })
        .collect();
    intervals.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then(a.end.cmp(&b.end))
            .then(a.work.cmp(&b.work))
    });
    intervals
}
