//! Precomputed phase/metric mapping lookups shared by all attribution steps.

use fnv::FnvHashMap;

use crate::model::{
    ExecutionModel, MetricClass, MetricId, PhaseId, PhaseToResourceMapping, ResourceModel,
};

/// Flattened views of the phase hierarchy, the metric set, and the
/// phase-to-metric relation. Built once per analysis.
pub struct MappingCache {
    pub phases: Vec<PhaseId>,
    pub leaf_phases: Vec<PhaseId>,
    pub metrics: Vec<MetricId>,
    pub consumable_metrics: Vec<MetricId>,
    pub blocking_metrics: Vec<MetricId>,
    pub leaf_phase_to_metrics: FnvHashMap<PhaseId, Vec<MetricId>>,
    pub consumable_metric_to_leaf_phases: FnvHashMap<MetricId, Vec<PhaseId>>,
    pub blocking_metric_to_leaf_phases: FnvHashMap<MetricId, Vec<PhaseId>>,
}

impl MappingCache {
    pub fn build(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        mapping: &PhaseToResourceMapping,
    ) -> Self {
        let mut phases: Vec<PhaseId> = execution_model.phase_ids().collect();
        phases.sort_by(|&a, &b| {
            execution_model
                .phase(a)
                .path()
                .cmp(execution_model.phase(b).path())
        });
        let leaf_phases: Vec<PhaseId> = phases
            .iter()
            .copied()
            .filter(|&p| execution_model.phase(p).is_leaf())
            .collect();

        let mut metrics: Vec<MetricId> = resource_model.metric_ids().collect();
        metrics.sort_by(|&a, &b| {
            resource_model
                .metric(a)
                .path()
                .cmp(resource_model.metric(b).path())
        });
        let consumable_metrics: Vec<MetricId> = metrics
            .iter()
            .copied()
            .filter(|&m| resource_model.metric(m).class() == MetricClass::Consumable)
            .collect();
        let blocking_metrics: Vec<MetricId> = metrics
            .iter()
            .copied()
            .filter(|&m| resource_model.metric(m).class() == MetricClass::Blocking)
            .collect();

        let mut leaf_phase_to_metrics: FnvHashMap<PhaseId, Vec<MetricId>> = FnvHashMap::default();
        for &leaf in &leaf_phases {
            let entry = mapping.get(execution_model, leaf);
            let mut mapped: Vec<MetricId> = entry.metrics.clone();
            for &resource in &entry.resources {
                mapped.extend(resource_model.metrics_under(resource));
            }
            mapped.sort();
            mapped.dedup();
            leaf_phase_to_metrics.insert(leaf, mapped);
        }

        let mut consumable_metric_to_leaf_phases: FnvHashMap<MetricId, Vec<PhaseId>> =
            FnvHashMap::default();
        let mut blocking_metric_to_leaf_phases: FnvHashMap<MetricId, Vec<PhaseId>> =
            FnvHashMap::default();
        for (&leaf, mapped) in &leaf_phase_to_metrics {
            for &metric in mapped {
                let target = match resource_model.metric(metric).class() {
                    MetricClass::Consumable => &mut consumable_metric_to_leaf_phases,
                    MetricClass::Blocking => &mut blocking_metric_to_leaf_phases,
                };
                target.entry(metric).or_default().push(leaf);
            }
        }

        MappingCache {
            phases,
            leaf_phases,
            metrics,
            consumable_metrics,
            blocking_metrics,
            leaf_phase_to_metrics,
            consumable_metric_to_leaf_phases,
            blocking_metric_to_leaf_phases,
        }
    }

    pub fn metrics_for_leaf(&self, leaf: PhaseId) -> &[MetricId] {
        self.leaf_phase_to_metrics
            .get(&leaf)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn leaf_phases_for_metric(&self, metric: MetricId) -> &[PhaseId] {
        self.consumable_metric_to_leaf_phases
            .get(&metric)
            .or_else(|| self.blocking_metric_to_leaf_phases.get(&metric))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
