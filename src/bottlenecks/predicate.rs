//! Predicates deciding when a composite phase counts as bottlenecked, given
//! the statuses of its subphases active in one slice.

use fnv::FnvHashMap;

use crate::bottlenecks::BottleneckStatus;
use crate::model::{ExecutionModel, PhaseId};

/// Combines the per-slice statuses of a composite's active subphases.
#[derive(Debug, Clone)]
pub enum BottleneckPredicate {
    /// Bottlenecked if any active subphase is; reports the first
    /// non-`None` status seen.
    Any,
    /// Bottlenecked only if every active subphase is; reports the last
    /// status seen, or `None` as soon as one subphase is unbottlenecked.
    All,
    /// Bottlenecked if more than half of the active subphases are; reports
    /// the last non-`None` status seen.
    Majority,
    /// Groups subphases by phase type, combines within each group using
    /// `same_type`, then across groups using `cross_type`.
    GroupByPhaseType {
        same_type: Box<BottleneckPredicate>,
        cross_type: Box<BottleneckPredicate>,
    },
}

impl BottleneckPredicate {
    pub fn group_by_phase_type(
        same_type: BottleneckPredicate,
        cross_type: BottleneckPredicate,
    ) -> Self {
        BottleneckPredicate::GroupByPhaseType {
            same_type: Box::new(same_type),
            cross_type: Box::new(cross_type),
        }
    }

    /// Combines the statuses of the subphases active in one slice. An empty
    /// slice combines to `None`.
    pub fn combine(
        &self,
        model: &ExecutionModel,
        active: &[(PhaseId, BottleneckStatus)],
    ) -> BottleneckStatus {
        match self {
            BottleneckPredicate::Any => {
                for &(_, status) in active {
                    if status != BottleneckStatus::None {
                        return status;
                    }
                }
                BottleneckStatus::None
            }
            BottleneckPredicate::All => {
                let mut last = BottleneckStatus::None;
                for &(_, status) in active {
                    if status == BottleneckStatus::None {
                        return BottleneckStatus::None;
                    }
                    last = status;
                }
                last
            }
            BottleneckPredicate::Majority => {
                let mut count = 0usize;
                let mut bottlenecked = 0usize;
                let mut last = BottleneckStatus::Local;
                for &(_, status) in active {
                    count += 1;
                    if status != BottleneckStatus::None {
                        bottlenecked += 1;
                        last = status;
                    }
                }
                if bottlenecked > 0 && bottlenecked * 2 > count {
                    last
                } else {
                    BottleneckStatus::None
                }
            }
            BottleneckPredicate::GroupByPhaseType {
                same_type,
                cross_type,
            } => {
                let mut groups: FnvHashMap<_, Vec<(PhaseId, BottleneckStatus)>> =
                    FnvHashMap::default();
                for &(phase, status) in active {
                    groups
                        .entry(model.phase(phase).phase_type())
                        .or_default()
                        .push((phase, status));
                }
                let combined: Vec<(PhaseId, BottleneckStatus)> = groups
                    .values()
                    .map(|group| (group[0].0, same_type.combine(model, group)))
                    .collect();
                cross_type.combine(model, &combined)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionModelBuilder, Repeatability};

    fn two_type_model() -> (ExecutionModel, Vec<PhaseId>) {
        let mut builder = ExecutionModelBuilder::new();
        let a = builder
            .add_phase_type(builder.root_phase_type(), "a", Repeatability::concurrent("i"))
            .unwrap();
        let b = builder
            .add_phase_type(builder.root_phase_type(), "b", Repeatability::NonRepeated)
            .unwrap();
        let root = builder.add_root_phase(0, 10).unwrap();
        let p0 = builder.add_phase(root, a, "0", 0, 10).unwrap();
        let p1 = builder.add_phase(root, a, "1", 0, 10).unwrap();
        let p2 = builder.add_phase(root, b, "", 0, 10).unwrap();
        (builder.build().unwrap(), vec![p0, p1, p2])
    }

    #[test]
    fn any_reports_first_bottleneck() {
        let (model, p) = two_type_model();
        let statuses = vec![
            (p[0], BottleneckStatus::None),
            (p[1], BottleneckStatus::Global),
            (p[2], BottleneckStatus::Local),
        ];
        assert_eq!(
            BottleneckPredicate::Any.combine(&model, &statuses),
            BottleneckStatus::Global
        );
        assert_eq!(
            BottleneckPredicate::Any.combine(&model, &[]),
            BottleneckStatus::None
        );
    }

    #[test]
    fn all_requires_every_subphase() {
        let (model, p) = two_type_model();
        let all_bottlenecked = vec![
            (p[0], BottleneckStatus::Local),
            (p[1], BottleneckStatus::Global),
        ];
        assert_eq!(
            BottleneckPredicate::All.combine(&model, &all_bottlenecked),
            BottleneckStatus::Global
        );

        let one_free = vec![
            (p[0], BottleneckStatus::Local),
            (p[1], BottleneckStatus::None),
        ];
        assert_eq!(
            BottleneckPredicate::All.combine(&model, &one_free),
            BottleneckStatus::None
        );
    }

    #[test]
    fn majority_needs_strictly_more_than_half() {
        let (model, p) = two_type_model();
        let half = vec![
            (p[0], BottleneckStatus::Local),
            (p[1], BottleneckStatus::None),
        ];
        assert_eq!(
            BottleneckPredicate::Majority.combine(&model, &half),
            BottleneckStatus::None
        );

        let majority = vec![
            (p[0], BottleneckStatus::Local),
            (p[1], BottleneckStatus::Local),
            (p[2], BottleneckStatus::None),
        ];
        assert_eq!(
            BottleneckPredicate::Majority.combine(&model, &majority),
            BottleneckStatus::Local
        );
    }

    #[test]
    fn group_by_phase_type_applies_inner_then_outer() {
        let (model, p) = two_type_model();
        // Type "a": one of two bottlenecked -> All yields None for the
        // group; type "b": bottlenecked. Any across groups -> Local.
        let statuses = vec![
            (p[0], BottleneckStatus::Local),
            (p[1], BottleneckStatus::None),
            (p[2], BottleneckStatus::Local),
        ];
        let predicate = BottleneckPredicate::group_by_phase_type(
            BottleneckPredicate::All,
            BottleneckPredicate::Any,
        );
        assert_eq!(predicate.combine(&model, &statuses), BottleneckStatus::Local);

        let predicate = BottleneckPredicate::group_by_phase_type(
            BottleneckPredicate::All,
            BottleneckPredicate::All,
        );
        assert_eq!(predicate.combine(&model, &statuses), BottleneckStatus::None);
    }
}
