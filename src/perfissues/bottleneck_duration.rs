//! Bottleneck-duration pass: how long phases of each type were bottlenecked,
//! broken down by bottleneck source.

use fnv::FnvHashMap;

use crate::bottlenecks::{BottleneckIdentificationResult, BottleneckSource};
use crate::hierarchy::{analyze_hierarchy, HierarchyRule};
use crate::model::{ExecutionModel, PhaseId, PhaseTypeId, Repeatability};
use crate::perfissues::{IssuePass, PerformanceIssue};
use crate::timeslice::{FractionalSliceCount, TimeSliceCount};

/// Total time a set of phases was bottlenecked on one source, and the
/// estimated runtime impact of removing the bottleneck.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BottleneckDurationStats {
    pub total_duration: TimeSliceCount,
    pub estimated_impact: FractionalSliceCount,
}

impl BottleneckDurationStats {
    pub(super) fn from_duration(duration: TimeSliceCount) -> Self {
        BottleneckDurationStats {
            total_duration: duration,
            estimated_impact: duration as FractionalSliceCount,
        }
    }
}

/// Per-source statistics for one leaf phase, from the identification result.
pub(super) fn leaf_source_stats(
    bottlenecks: &BottleneckIdentificationResult,
    leaf: PhaseId,
    include_metric_bottlenecks: bool,
) -> FnvHashMap<BottleneckSource, BottleneckDurationStats> {
    let mut stats = FnvHashMap::default();

    let per_type = bottlenecks.metric_type_bottlenecks.get(leaf);
    stats.insert(
        BottleneckSource::NoBottleneck,
        BottleneckDurationStats::from_duration(per_type.time_not_bottlenecked()),
    );
    for metric_type in per_type.keys() {
        stats.insert(
            BottleneckSource::MetricType(metric_type),
            BottleneckDurationStats::from_duration(per_type.time_bottlenecked_on(metric_type)),
        );
    }

    if include_metric_bottlenecks {
        let per_metric = bottlenecks.metric_bottlenecks.get(leaf);
        for metric in per_metric.keys() {
            stats.insert(
                BottleneckSource::Metric(metric),
                BottleneckDurationStats::from_duration(per_metric.time_bottlenecked_on(metric)),
            );
        }
    }

    stats
}

/// Combines per-source statistics of repeated same-typed siblings. The
/// impact of a bottleneck on concurrent siblings is shared among them.
pub(super) fn combine_source_stats(
    stats: &[&FnvHashMap<BottleneckSource, BottleneckDurationStats>],
    repeatability: &Repeatability,
) -> FnvHashMap<BottleneckSource, BottleneckDurationStats> {
    let sequential = match repeatability {
        Repeatability::SequentialRepeated { .. } => true,
        Repeatability::ConcurrentRepeated { .. } => false,
        Repeatability::NonRepeated => {
            panic!("multiple sibling phases of a non-repeated type")
        }
    };
    let phase_count = stats.len() as FractionalSliceCount;

    let mut combined: FnvHashMap<BottleneckSource, BottleneckDurationStats> = FnvHashMap::default();
    for map in stats {
        for (&source, stat) in *map {
            let entry = combined.entry(source).or_insert(BottleneckDurationStats {
                total_duration: 0,
                estimated_impact: 0.0,
            });
            entry.total_duration += stat.total_duration;
            entry.estimated_impact += stat.estimated_impact;
        }
    }
    if !sequential {
        for stat in combined.values_mut() {
            stat.estimated_impact /= phase_count;
        }
    }
    combined
}

pub(super) fn execute(
    model: &ExecutionModel,
    bottlenecks: &BottleneckIdentificationResult,
    include_metric_bottlenecks: bool,
) -> Vec<PerformanceIssue> {
    let mut rule = BottleneckDurationRule {
        bottlenecks,
        include_metric_bottlenecks,
    };
    let analysis = analyze_hierarchy(model, &mut rule);
    let mut issues = Vec::new();
    for phase in analysis.phases() {
        for (&phase_type, stats_per_source) in &analysis.get(phase).0 {
            for (&source, stats) in stats_per_source {
                issues.push(PerformanceIssue {
                    pass: IssuePass::BottleneckDuration {
                        include_metric_bottlenecks,
                    }
                    .name(),
                    phase,
                    phase_type: Some(phase_type),
                    source: Some(source),
                    estimated_impact: stats.estimated_impact,
                });
            }
        }
    }
    issues
}

/// Bottleneck statistics per phase type and source, for every type occurring
/// below (and including) one phase.
pub struct PhaseBottleneckDurations(
    pub FnvHashMap<PhaseTypeId, FnvHashMap<BottleneckSource, BottleneckDurationStats>>,
);

struct BottleneckDurationRule<'a> {
    bottlenecks: &'a BottleneckIdentificationResult,
    include_metric_bottlenecks: bool,
}

impl HierarchyRule for BottleneckDurationRule<'_> {
    type Output = PhaseBottleneckDurations;

    fn analyze_leaf(&mut self, model: &ExecutionModel, leaf: PhaseId) -> PhaseBottleneckDurations {
        let stats = leaf_source_stats(self.bottlenecks, leaf, self.include_metric_bottlenecks);
        let mut per_type = FnvHashMap::default();
        per_type.insert(model.phase(leaf).phase_type(), stats);
        PhaseBottleneckDurations(per_type)
    }

    fn combine_subphases(
        &mut self,
        model: &ExecutionModel,
        _composite: PhaseId,
        children: &[PhaseId],
        results: &FnvHashMap<PhaseId, PhaseBottleneckDurations>,
    ) -> PhaseBottleneckDurations {
        let mut combined: FnvHashMap<PhaseTypeId, FnvHashMap<BottleneckSource, BottleneckDurationStats>> =
            FnvHashMap::default();

        let mut children_per_type: FnvHashMap<PhaseTypeId, Vec<PhaseId>> = FnvHashMap::default();
        for &child in children {
            children_per_type
                .entry(model.phase(child).phase_type())
                .or_default()
                .push(child);
        }

        for (subphase_type, group) in children_per_type {
            if let [only] = group[..] {
                for (&phase_type, stats) in &results[&only].0 {
                    combined.insert(phase_type, stats.clone());
                }
            } else {
                let mut stats_per_type: FnvHashMap<
                    PhaseTypeId,
                    Vec<&FnvHashMap<BottleneckSource, BottleneckDurationStats>>,
                > = FnvHashMap::default();
                for &child in &group {
                    for (&phase_type, stats) in &results[&child].0 {
                        stats_per_type.entry(phase_type).or_default().push(stats);
                    }
                }
                let repeatability = model.phase_type(subphase_type).repeatability();
                for (phase_type, stats) in stats_per_type {
                    combined.insert(phase_type, combine_source_stats(&stats, repeatability));
                }
            }
        }

        PhaseBottleneckDurations(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(duration: TimeSliceCount, impact: f64) -> BottleneckDurationStats {
        BottleneckDurationStats {
            total_duration: duration,
            estimated_impact: impact,
        }
    }

    #[test]
    fn concurrent_combine_shares_impact() {
        let source = BottleneckSource::NoBottleneck;
        let mut a = FnvHashMap::default();
        a.insert(source, stats(4, 4.0));
        let mut b = FnvHashMap::default();
        b.insert(source, stats(2, 2.0));

        let sequential = combine_source_stats(&[&a, &b], &Repeatability::sequential("i"));
        assert_eq!(sequential[&source], stats(6, 6.0));

        let concurrent = combine_source_stats(&[&a, &b], &Repeatability::concurrent("i"));
        assert_eq!(concurrent[&source], stats(6, 3.0));
    }

    #[test]
    fn sources_missing_from_one_sibling_are_kept() {
        let cpu = BottleneckSource::MetricType(crate::model::MetricTypeId(0));
        let mut a = FnvHashMap::default();
        a.insert(cpu, stats(3, 3.0));
        let b = FnvHashMap::default();

        let combined = combine_source_stats(&[&a, &b], &Repeatability::concurrent("i"));
        assert_eq!(combined[&cpu], stats(3, 1.5));
    }
}
