//! Per-metric-type bottleneck identification: merges the statuses of all
//! same-typed metrics mapped to a phase into one status per metric type.

use fnv::FnvHashMap;

use crate::attribution::AttributionResult;
use crate::bottlenecks::metric::PhaseMetricBottlenecks;
use crate::bottlenecks::{combine_by_key, BottleneckSettings, BottleneckStatus, PhaseBottlenecks};
use crate::hierarchy::{analyze_hierarchy, HierarchyResult, HierarchyRule};
use crate::model::{ExecutionModel, MetricId, MetricTypeId, PhaseId, ResourceModel};

/// Per-slice bottleneck statuses of one phase, keyed by metric type.
pub type PhaseMetricTypeBottlenecks = PhaseBottlenecks<MetricTypeId>;

pub fn identify_metric_type_bottlenecks(
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
    attribution: &AttributionResult,
    settings: &BottleneckSettings,
    metric_bottlenecks: &HierarchyResult<PhaseMetricBottlenecks>,
) -> HierarchyResult<PhaseMetricTypeBottlenecks> {
    let mut rule = MetricTypeBottleneckRule {
        execution_model,
        resource_model,
        attribution,
        settings,
        metric_bottlenecks,
    };
    analyze_hierarchy(execution_model, &mut rule)
}

struct MetricTypeBottleneckRule<'a> {
    execution_model: &'a ExecutionModel,
    resource_model: &'a ResourceModel,
    attribution: &'a AttributionResult,
    settings: &'a BottleneckSettings,
    metric_bottlenecks: &'a HierarchyResult<PhaseMetricBottlenecks>,
}

impl MetricTypeBottleneckRule<'_> {
    /// Statuses of an unused consumable metric: its raw samples against the
    /// global threshold, ignoring phase activity.
    fn raw_global_statuses(&self, leaf: PhaseId, metric: MetricId) -> Vec<BottleneckStatus> {
        let phase = self.execution_model.phase(leaf);
        let threshold = (self.settings.global_threshold)(metric)
            * self.resource_model.metric(metric).capacity();
        let mut samples = self.attribution.samples.sample_iterator(
            self.resource_model,
            metric,
            phase.first_slice(),
            phase.last_slice(),
        );
        let mut statuses = Vec::new();
        while samples.has_next() {
            statuses.push(if samples.next_sample() >= threshold {
                BottleneckStatus::Global
            } else {
                BottleneckStatus::None
            });
        }
        statuses
    }

    /// Statuses of an unused blocking metric: blocked slices are global.
    fn raw_blocked_statuses(&self, leaf: PhaseId, metric: MetricId) -> Vec<BottleneckStatus> {
        let mut iter = self.attribution.blocking_iterator(
            self.execution_model,
            self.resource_model,
            leaf,
            metric,
        );
        let mut statuses = Vec::new();
        while iter.has_next() {
            statuses.push(if iter.next_is_blocked() {
                BottleneckStatus::Global
            } else {
                BottleneckStatus::None
            });
        }
        statuses
    }
}

/// Merges the statuses of all metrics of one type in one slice: no
/// bottleneck if none are bottlenecked, global only if all are global,
/// local otherwise.
fn merge_statuses(per_metric: &[Vec<BottleneckStatus>], num_slices: usize) -> Vec<BottleneckStatus> {
    let mut merged = Vec::with_capacity(num_slices);
    for i in 0..num_slices {
        let mut any_bottleneck = false;
        let mut all_global = true;
        for statuses in per_metric {
            match statuses[i] {
                BottleneckStatus::None => all_global = false,
                BottleneckStatus::Local => {
                    any_bottleneck = true;
                    all_global = false;
                }
                BottleneckStatus::Global => any_bottleneck = true,
            }
        }
        merged.push(if !any_bottleneck {
            BottleneckStatus::None
        } else if all_global {
            BottleneckStatus::Global
        } else {
            BottleneckStatus::Local
        });
    }
    merged
}

impl HierarchyRule for MetricTypeBottleneckRule<'_> {
    type Output = PhaseMetricTypeBottlenecks;

    fn analyze_leaf(
        &mut self,
        model: &ExecutionModel,
        leaf: PhaseId,
    ) -> PhaseMetricTypeBottlenecks {
        let phase_attribution = self.attribution.step.get(leaf);
        let per_phase_metrics = self.metric_bottlenecks.get(leaf);
        let num_slices = model.phase(leaf).slice_duration().max(0) as usize;

        // Group used and unused metrics by type; unused metrics still count
        // toward their type's status through raw threshold checks.
        let mut arrays_per_type: FnvHashMap<MetricTypeId, Vec<Vec<BottleneckStatus>>> =
            FnvHashMap::default();
        for metric in phase_attribution.consumable_metrics() {
            arrays_per_type
                .entry(self.resource_model.metric(metric).metric_type())
                .or_default()
                .push(per_phase_metrics.statuses(metric).to_vec());
        }
        for &metric in &phase_attribution.blocking_metrics {
            arrays_per_type
                .entry(self.resource_model.metric(metric).metric_type())
                .or_default()
                .push(per_phase_metrics.statuses(metric).to_vec());
        }
        for &metric in &phase_attribution.unused_consumable_metrics {
            let metric_type = self.resource_model.metric(metric).metric_type();
            if let Some(arrays) = arrays_per_type.get_mut(&metric_type) {
                arrays.push(self.raw_global_statuses(leaf, metric));
            }
        }
        for &metric in &phase_attribution.unused_blocking_metrics {
            let metric_type = self.resource_model.metric(metric).metric_type();
            if let Some(arrays) = arrays_per_type.get_mut(&metric_type) {
                arrays.push(self.raw_blocked_statuses(leaf, metric));
            }
        }

        let statuses = arrays_per_type
            .into_iter()
            .map(|(metric_type, arrays)| (metric_type, merge_statuses(&arrays, num_slices)))
            .collect();
        PhaseBottlenecks::new(leaf, num_slices, statuses)
    }

    fn combine_subphases(
        &mut self,
        model: &ExecutionModel,
        composite: PhaseId,
        children: &[PhaseId],
        results: &FnvHashMap<PhaseId, PhaseMetricTypeBottlenecks>,
    ) -> PhaseMetricTypeBottlenecks {
        combine_by_key(model, composite, children, results, &self.settings.predicate)
    }
}
