//! Duration-imbalance pass: compares the actual sequential time spent in
//! repeated phases of one type against the ideal (perfectly balanced) time.

use fnv::FnvHashMap;

use crate::hierarchy::{analyze_hierarchy, HierarchyRule};
use crate::model::{ExecutionModel, PhaseId, PhaseTypeId, Repeatability};
use crate::perfissues::{IssuePass, PerformanceIssue};
use crate::timeslice::{FractionalSliceCount, TimeSliceCount};

/// Duration statistics for all phases of one type under an aggregate phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImbalanceStatistics {
    pub phase_count: usize,
    pub min_phase_duration: TimeSliceCount,
    pub max_phase_duration: TimeSliceCount,
    pub total_phase_duration: TimeSliceCount,
    /// Time the phases would take with their load spread evenly.
    pub ideal_sequential_time: FractionalSliceCount,
    /// Time the phases actually took, accounting for concurrency.
    pub actual_sequential_time: TimeSliceCount,
}

impl ImbalanceStatistics {
    fn single(duration: TimeSliceCount) -> Self {
        ImbalanceStatistics {
            phase_count: 1,
            min_phase_duration: duration,
            max_phase_duration: duration,
            total_phase_duration: duration,
            ideal_sequential_time: duration as FractionalSliceCount,
            actual_sequential_time: duration,
        }
    }

    pub fn estimated_impact(&self) -> FractionalSliceCount {
        self.actual_sequential_time as FractionalSliceCount - self.ideal_sequential_time
    }
}

pub(super) fn execute(model: &ExecutionModel) -> Vec<PerformanceIssue> {
    let analysis = analyze_hierarchy(model, &mut ImbalanceRule);
    let mut issues = Vec::new();
    for phase in analysis.phases() {
        for (&phase_type, stats) in &analysis.get(phase).0 {
            issues.push(PerformanceIssue {
                pass: IssuePass::DurationImbalance.name(),
                phase,
                phase_type: Some(phase_type),
                source: None,
                estimated_impact: stats.estimated_impact(),
            });
        }
    }
    issues
}

/// Imbalance statistics per phase type, for every type occurring below (and
/// including) one phase.
pub struct PhaseImbalance(pub FnvHashMap<PhaseTypeId, ImbalanceStatistics>);

struct ImbalanceRule;

impl HierarchyRule for ImbalanceRule {
    type Output = PhaseImbalance;

    fn analyze_leaf(&mut self, model: &ExecutionModel, leaf: PhaseId) -> PhaseImbalance {
        let phase = model.phase(leaf);
        let mut stats = FnvHashMap::default();
        stats.insert(
            phase.phase_type(),
            ImbalanceStatistics::single(phase.slice_duration()),
        );
        PhaseImbalance(stats)
    }

    fn combine_subphases(
        &mut self,
        model: &ExecutionModel,
        composite: PhaseId,
        children: &[PhaseId],
        results: &FnvHashMap<PhaseId, PhaseImbalance>,
    ) -> PhaseImbalance {
        let mut combined: FnvHashMap<PhaseTypeId, ImbalanceStatistics> = FnvHashMap::default();

        let mut children_per_type: FnvHashMap<PhaseTypeId, Vec<PhaseId>> = FnvHashMap::default();
        for &child in children {
            children_per_type
                .entry(model.phase(child).phase_type())
                .or_default()
                .push(child);
        }

        for (subphase_type, group) in children_per_type {
            if let [only] = group[..] {
                combined.extend(&results[&only].0);
            } else {
                let mut stats_per_type: FnvHashMap<PhaseTypeId, Vec<ImbalanceStatistics>> =
                    FnvHashMap::default();
                for child in group {
                    for (&phase_type, &stats) in &results[&child].0 {
                        stats_per_type.entry(phase_type).or_default().push(stats);
                    }
                }
                let repeatability = model.phase_type(subphase_type).repeatability();
                for (phase_type, stats) in stats_per_type {
                    combined.insert(phase_type, combine_statistics(&stats, repeatability));
                }
            }
        }

        let composite_phase = model.phase(composite);
        combined.insert(
            composite_phase.phase_type(),
            ImbalanceStatistics::single(composite_phase.slice_duration()),
        );
        PhaseImbalance(combined)
    }
}

/// Combines the statistics of repeated same-typed siblings. Sequential
/// repetition adds up; concurrent repetition is bounded by the slowest
/// sibling and ideally takes the average.
fn combine_statistics(
    stats: &[ImbalanceStatistics],
    repeatability: &Repeatability,
) -> ImbalanceStatistics {
    let sequential = match repeatability {
        Repeatability::SequentialRepeated { .. } => true,
        Repeatability::ConcurrentRepeated { .. } => false,
        Repeatability::NonRepeated => {
            panic!("multiple sibling phases of a non-repeated type")
        }
    };
    let ideal_sum: FractionalSliceCount = stats.iter().map(|s| s.ideal_sequential_time).sum();
    let (ideal, actual) = if sequential {
        (
            ideal_sum,
            stats.iter().map(|s| s.actual_sequential_time).sum(),
        )
    } else {
        (
            ideal_sum / stats.len() as FractionalSliceCount,
            stats
                .iter()
                .map(|s| s.actual_sequential_time)
                .max()
                .unwrap_or(0),
        )
    };
    ImbalanceStatistics {
        phase_count: stats.iter().map(|s| s.phase_count).sum(),
        min_phase_duration: stats
            .iter()
            .map(|s| s.min_phase_duration)
            .min()
            .unwrap_or(0),
        max_phase_duration: stats
            .iter()
            .map(|s| s.max_phase_duration)
            .max()
            .unwrap_or(0),
        total_phase_duration: stats.iter().map(|s| s.total_phase_duration).sum(),
        ideal_sequential_time: ideal,
        actual_sequential_time: actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionModelBuilder;

    fn repeated_model(
        repeatability: Repeatability,
        ranges: &[(i64, i64)],
        root_range: (i64, i64),
    ) -> (ExecutionModel, PhaseTypeId) {
        let mut builder = ExecutionModelBuilder::new();
        let work = builder
            .add_phase_type(builder.root_phase_type(), "work", repeatability)
            .unwrap();
        let root = builder.add_root_phase(root_range.0, root_range.1).unwrap();
        for (i, &(first, last)) in ranges.iter().enumerate() {
            builder
                .add_phase(root, work, &i.to_string(), first, last)
                .unwrap();
        }
        (builder.build().unwrap(), work)
    }

    #[test]
    fn sequential_repetition_sums_durations() {
        let (model, work) = repeated_model(
            Repeatability::sequential("w"),
            &[(0, 1), (2, 4), (5, 8)],
            (0, 8),
        );
        let analysis = analyze_hierarchy(&model, &mut ImbalanceRule);
        let stats = analysis.get(model.root_phase()).0[&work];
        assert_eq!(stats.phase_count, 3);
        assert_eq!(stats.min_phase_duration, 2);
        assert_eq!(stats.max_phase_duration, 4);
        assert_eq!(stats.total_phase_duration, 9);
        assert_eq!(stats.ideal_sequential_time, 9.0);
        assert_eq!(stats.actual_sequential_time, 9);
        assert_eq!(stats.estimated_impact(), 0.0);
    }

    #[test]
    fn concurrent_repetition_compares_max_against_average() {
        let (model, work) = repeated_model(
            Repeatability::concurrent("w"),
            &[(0, 1), (0, 2), (0, 3)],
            (0, 3),
        );
        let analysis = analyze_hierarchy(&model, &mut ImbalanceRule);
        let stats = analysis.get(model.root_phase()).0[&work];
        assert_eq!(stats.phase_count, 3);
        assert_eq!(stats.ideal_sequential_time, 3.0);
        assert_eq!(stats.actual_sequential_time, 4);
        assert_eq!(stats.estimated_impact(), 1.0);
    }

    #[test]
    fn composite_reports_its_own_type() {
        let (model, _) = repeated_model(
            Repeatability::sequential("w"),
            &[(0, 1), (2, 4), (5, 8)],
            (0, 8),
        );
        let analysis = analyze_hierarchy(&model, &mut ImbalanceRule);
        let root_type = model.phase(model.root_phase()).phase_type();
        let stats = analysis.get(model.root_phase()).0[&root_type];
        assert_eq!(stats.phase_count, 1);
        assert_eq!(stats.actual_sequential_time, 9);
    }
}
