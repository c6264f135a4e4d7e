//! Critical-path bottleneck pass: for each bottleneck source, the impact
//! along the longest chain of phase-type dependencies.

use fnv::FnvHashMap;

use crate::bottlenecks::{BottleneckIdentificationResult, BottleneckSource};
use crate::hierarchy::{analyze_hierarchy, HierarchyRule};
use crate::model::{ExecutionModel, PhaseId, PhaseTypeId};
use crate::perfissues::bottleneck_duration::{
    combine_source_stats, leaf_source_stats, BottleneckDurationStats,
};
use crate::perfissues::{IssuePass, PerformanceIssue};
use crate::timeslice::FractionalSliceCount;

pub(super) fn execute(
    model: &ExecutionModel,
    bottlenecks: &BottleneckIdentificationResult,
    include_metric_bottlenecks: bool,
) -> Vec<PerformanceIssue> {
    let mut rule = CriticalPathRule {
        bottlenecks,
        include_metric_bottlenecks,
    };
    let analysis = analyze_hierarchy(model, &mut rule);
    let mut issues = Vec::new();
    for phase in analysis.phases() {
        for (&source, stats) in &analysis.get(phase).0 {
            issues.push(PerformanceIssue {
                pass: IssuePass::CriticalPathBottleneckDuration {
                    include_metric_bottlenecks,
                }
                .name(),
                phase,
                phase_type: None,
                source: Some(source),
                estimated_impact: stats.estimated_impact,
            });
        }
    }
    issues
}

/// Per-source critical-path statistics for one phase.
pub struct PhaseCriticalPath(pub FnvHashMap<BottleneckSource, BottleneckDurationStats>);

struct CriticalPathRule<'a> {
    bottlenecks: &'a BottleneckIdentificationResult,
    include_metric_bottlenecks: bool,
}

impl HierarchyRule for CriticalPathRule<'_> {
    type Output = PhaseCriticalPath;

    fn analyze_leaf(&mut self, _model: &ExecutionModel, leaf: PhaseId) -> PhaseCriticalPath {
        PhaseCriticalPath(leaf_source_stats(
            self.bottlenecks,
            leaf,
            self.include_metric_bottlenecks,
        ))
    }

    fn combine_subphases(
        &mut self,
        model: &ExecutionModel,
        _composite: PhaseId,
        children: &[PhaseId],
        results: &FnvHashMap<PhaseId, PhaseCriticalPath>,
    ) -> PhaseCriticalPath {
        // First fold repeated same-typed siblings into one stats map per
        // subphase type, as the bottleneck-duration pass does.
        let mut children_per_type: FnvHashMap<PhaseTypeId, Vec<PhaseId>> = FnvHashMap::default();
        for &child in children {
            children_per_type
                .entry(model.phase(child).phase_type())
                .or_default()
                .push(child);
        }

        let mut stats_per_type: FnvHashMap<
            PhaseTypeId,
            FnvHashMap<BottleneckSource, BottleneckDurationStats>,
        > = FnvHashMap::default();
        for (subphase_type, group) in children_per_type {
            let combined = if let [only] = group[..] {
                results[&only].0.clone()
            } else {
                let maps: Vec<_> = group.iter().map(|child| &results[child].0).collect();
                combine_source_stats(&maps, model.phase_type(subphase_type).repeatability())
            };
            stats_per_type.insert(subphase_type, combined);
        }

        // Regroup by source, then walk the dependency chains of the phase
        // types each source affects.
        let mut per_source: FnvHashMap<BottleneckSource, FnvHashMap<PhaseTypeId, BottleneckDurationStats>> =
            FnvHashMap::default();
        for (&phase_type, stats) in &stats_per_type {
            for (&source, &stat) in stats {
                per_source.entry(source).or_default().insert(phase_type, stat);
            }
        }

        let mut combined = FnvHashMap::default();
        for (source, stats_by_type) in per_source {
            let mut memo: FnvHashMap<PhaseTypeId, FractionalSliceCount> = FnvHashMap::default();
            let critical_impact = stats_by_type
                .keys()
                .map(|&t| sequential_impact(model, t, &stats_by_type, &mut memo))
                .fold(0.0, FractionalSliceCount::max);
            let total_duration = stats_by_type.values().map(|s| s.total_duration).sum();
            combined.insert(
                source,
                BottleneckDurationStats {
                    total_duration,
                    estimated_impact: critical_impact,
                },
            );
        }
        PhaseCriticalPath(combined)
    }
}

/// Impact of one source on a phase type plus the worst chain of its
/// dependencies, memoized per source.
fn sequential_impact(
    model: &ExecutionModel,
    phase_type: PhaseTypeId,
    stats_by_type: &FnvHashMap<PhaseTypeId, BottleneckDurationStats>,
    memo: &mut FnvHashMap<PhaseTypeId, FractionalSliceCount>,
) -> FractionalSliceCount {
    if let Some(&impact) = memo.get(&phase_type) {
        return impact;
    }
    let dependency_impact = model
        .phase_type(phase_type)
        .dependencies()
        .iter()
        .map(|&dependency| sequential_impact(model, dependency, stats_by_type, memo))
        .fold(0.0, FractionalSliceCount::max);
    let own_impact = stats_by_type
        .get(&phase_type)
        .map(|s| s.estimated_impact)
        .unwrap_or(0.0);
    let impact = dependency_impact + own_impact;
    memo.insert(phase_type, impact);
    impact
}
