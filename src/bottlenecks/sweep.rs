//! Interval sweep combining subphase bottleneck statuses into a composite
//! phase's status array.

use crate::bottlenecks::predicate::BottleneckPredicate;
use crate::bottlenecks::BottleneckStatus;
use crate::model::{ExecutionModel, PhaseId};

/// Sweeps the composite's slice range once, maintaining the set of subphases
/// active at each slice, and combines their statuses with `predicate`.
///
/// Each entry of `children` pairs a subphase with its status array, indexed
/// from the subphase's first slice. Subphases outside the composite's range
/// or with an empty range are ignored.
pub fn combine_subphase_statuses(
    model: &ExecutionModel,
    composite: PhaseId,
    children: &[(PhaseId, &[BottleneckStatus])],
    predicate: &BottleneckPredicate,
) -> Vec<BottleneckStatus> {
    let composite_phase = model.phase(composite);
    let first = composite_phase.first_slice();
    let last = composite_phase.last_slice();
    let num_slices = (last - first + 1).max(0) as usize;
    let mut combined = vec![BottleneckStatus::None; num_slices];

    let relevant: Vec<usize> = (0..children.len())
        .filter(|&i| {
            let phase = model.phase(children[i].0);
            phase.first_slice() <= last
                && phase.last_slice() >= first
                && phase.slice_duration() > 0
        })
        .collect();

    let mut by_start = relevant.clone();
    by_start.sort_by_key(|&i| model.phase(children[i].0).first_slice());
    let mut by_end = relevant;
    by_end.sort_by_key(|&i| model.phase(children[i].0).last_slice());

    let mut started = 0;
    let mut ended = 0;
    let mut active: Vec<usize> = Vec::new();
    let mut statuses: Vec<(PhaseId, BottleneckStatus)> = Vec::new();

    for (slice_index, slot) in combined.iter_mut().enumerate() {
        let slice = first + slice_index as i64;

        while started < by_start.len()
            && model.phase(children[by_start[started]].0).first_slice() <= slice
        {
            active.push(by_start[started]);
            started += 1;
        }

        statuses.clear();
        for &i in &active {
            let (child, array) = children[i];
            let offset = (slice - model.phase(child).first_slice()) as usize;
            statuses.push((child, array[offset]));
        }
        *slot = predicate.combine(model, &statuses);

        while ended < by_end.len() && model.phase(children[by_end[ended]].0).last_slice() <= slice
        {
            let index = by_end[ended];
            if let Some(pos) = active.iter().position(|&i| i == index) {
                active.swap_remove(pos);
            }
            ended += 1;
        }
    }

    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionModelBuilder, Repeatability};

    #[test]
    fn sweep_tracks_overlapping_children() {
        let mut builder = ExecutionModelBuilder::new();
        let work = builder
            .add_phase_type(
                builder.root_phase_type(),
                "work",
                Repeatability::concurrent("w"),
            )
            .unwrap();
        let root = builder.add_root_phase(0, 5).unwrap();
        let w0 = builder.add_phase(root, work, "0", 0, 3).unwrap();
        let w1 = builder.add_phase(root, work, "1", 2, 5).unwrap();
        let model = builder.build().unwrap();

        use BottleneckStatus::{Global, Local, None as N};
        let w0_status = [Local, N, Local, Local];
        let w1_status = [N, Global, Global, N];

        let combined = combine_subphase_statuses(
            &model,
            model.root_phase(),
            &[(w0, &w0_status), (w1, &w1_status)],
            &BottleneckPredicate::Any,
        );
        // Slices 0-1: only w0; 2-3: both; 4-5: only w1.
        assert_eq!(combined, vec![Local, N, Local, Local, Global, N]);

        let combined = combine_subphase_statuses(
            &model,
            model.root_phase(),
            &[(w0, &w0_status), (w1, &w1_status)],
            &BottleneckPredicate::All,
        );
        // All: slice 2 has an unbottlenecked child; slice 3 combines to the
        // last-seen status.
        assert_eq!(combined, vec![Local, N, N, Global, Global, N]);
    }
}
