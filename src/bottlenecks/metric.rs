//! Per-metric bottleneck identification over the phase hierarchy.

use fnv::FnvHashMap;

use crate::attribution::AttributionResult;
use crate::bottlenecks::{combine_by_key, BottleneckSettings, BottleneckStatus, PhaseBottlenecks};
use crate::hierarchy::{analyze_hierarchy, HierarchyResult, HierarchyRule};
use crate::model::{ExecutionModel, MetricId, PhaseId, ResourceModel};

/// Per-slice bottleneck statuses of one phase, keyed by metric.
pub type PhaseMetricBottlenecks = PhaseBottlenecks<MetricId>;

/// Classifies every slice of every leaf phase against each mapped metric,
/// then folds statuses up the hierarchy with the configured predicate.
pub fn identify_metric_bottlenecks(
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
    attribution: &AttributionResult,
    settings: &BottleneckSettings,
) -> HierarchyResult<PhaseMetricBottlenecks> {
    let mut rule = MetricBottleneckRule {
        execution_model,
        resource_model,
        attribution,
        settings,
    };
    analyze_hierarchy(execution_model, &mut rule)
}

struct MetricBottleneckRule<'a> {
    execution_model: &'a ExecutionModel,
    resource_model: &'a ResourceModel,
    attribution: &'a AttributionResult,
    settings: &'a BottleneckSettings,
}

impl MetricBottleneckRule<'_> {
    fn consumable_statuses(&self, leaf: PhaseId, metric: MetricId) -> Vec<BottleneckStatus> {
        let phase = self.execution_model.phase(leaf);
        let num_slices = phase.slice_duration().max(0) as usize;
        let mut statuses = Vec::with_capacity(num_slices);

        let capacity = self.resource_model.metric(metric).capacity();
        let global_threshold = (self.settings.global_threshold)(metric) * capacity;
        let local_factor = (self.settings.local_threshold)(metric, leaf);

        let mut attribution_iter = self.attribution.consumable_iterator(
            self.execution_model,
            self.resource_model,
            leaf,
            metric,
        );
        let mut sample_iter = self.attribution.samples.sample_iterator(
            self.resource_model,
            metric,
            phase.first_slice(),
            phase.last_slice(),
        );
        let mut active_iter = self.attribution.active_phases.active_iterator(
            leaf,
            phase.first_slice(),
            phase.last_slice(),
        );

        for _ in 0..num_slices {
            attribution_iter.compute_next();
            let sample = sample_iter.next_sample();
            let is_active = active_iter.next_is_active();
            let status = if !is_active {
                BottleneckStatus::None
            } else if sample >= global_threshold {
                BottleneckStatus::Global
            } else if attribution_iter.attributed_usage
                >= attribution_iter.available_capacity * local_factor
            {
                BottleneckStatus::Local
            } else {
                BottleneckStatus::None
            };
            statuses.push(status);
        }
        statuses
    }

    fn blocking_statuses(&self, leaf: PhaseId, metric: MetricId) -> Vec<BottleneckStatus> {
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

impl HierarchyRule for MetricBottleneckRule<'_> {
    type Output = PhaseMetricBottlenecks;

    fn analyze_leaf(&mut self, model: &ExecutionModel, leaf: PhaseId) -> PhaseMetricBottlenecks {
        let phase_attribution = self.attribution.step.get(leaf);
        let mut statuses = FnvHashMap::default();
        for metric in phase_attribution.consumable_metrics() {
            statuses.insert(metric, self.consumable_statuses(leaf, metric));
        }
        for &metric in &phase_attribution.blocking_metrics {
            statuses.insert(metric, self.blocking_statuses(leaf, metric));
        }
        let num_slices = model.phase(leaf).slice_duration().max(0) as usize;
        PhaseBottlenecks::new(leaf, num_slices, statuses)
    }

    fn combine_subphases(
        &mut self,
        model: &ExecutionModel,
        composite: PhaseId,
        children: &[PhaseId],
        results: &FnvHashMap<PhaseId, PhaseMetricBottlenecks>,
    ) -> PhaseMetricBottlenecks {
        combine_by_key(model, composite, children, results, &self.settings.predicate)
    }
}
