//! Mapping from phases to the resources and metrics they may consume.

use fnv::FnvHashMap;

use crate::model::{ExecutionModel, MetricId, ModelError, PhaseId, ResourceId, ResourceModel};
use crate::path::ModelPath;

/// Resources and metrics one phase is mapped to. Mapping a resource
/// implicitly maps every metric in its subtree.
#[derive(Debug, Clone)]
pub struct MappingEntry {
    pub phase: PhaseId,
    pub resources: Vec<ResourceId>,
    pub metrics: Vec<MetricId>,
}

impl MappingEntry {
    pub fn new(phase: PhaseId) -> Self {
        MappingEntry {
            phase,
            resources: Vec::new(),
            metrics: Vec::new(),
        }
    }

    pub fn with_resources(phase: PhaseId, resources: Vec<ResourceId>) -> Self {
        MappingEntry {
            phase,
            resources,
            metrics: Vec::new(),
        }
    }

    fn mapped_paths(&self, resource_model: &ResourceModel) -> Vec<ModelPath> {
        self.resources
            .iter()
            .map(|&r| resource_model.resource(r).path().clone())
            .chain(
                self.metrics
                    .iter()
                    .map(|&m| resource_model.metric(m).path().clone()),
            )
            .collect()
    }
}

/// A validated phase-to-resource mapping. Phases without an explicit entry
/// inherit the entry of their nearest mapped ancestor; the root is always
/// mapped to the whole resource tree.
pub struct PhaseToResourceMapping {
    entries: FnvHashMap<PhaseId, MappingEntry>,
}

impl PhaseToResourceMapping {
    /// Builds the mapping and checks that every explicit entry is a subset
    /// of its parent's effective entry, compared by resource-tree paths.
    pub fn new(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        entries: Vec<MappingEntry>,
    ) -> Result<Self, ModelError> {
        let mut by_phase: FnvHashMap<PhaseId, MappingEntry> = FnvHashMap::default();
        for entry in entries {
            by_phase.insert(entry.phase, entry);
        }
        by_phase.entry(execution_model.root_phase()).or_insert_with(|| {
            MappingEntry::with_resources(
                execution_model.root_phase(),
                vec![resource_model.root_resource()],
            )
        });

        let mapping = PhaseToResourceMapping { entries: by_phase };
        mapping.validate(execution_model, resource_model)?;
        Ok(mapping)
    }

    /// The effective entry for `phase`: its own, or the nearest ancestor's.
    pub fn get(&self, execution_model: &ExecutionModel, phase: PhaseId) -> &MappingEntry {
        let mut current = phase;
        loop {
            if let Some(entry) = self.entries.get(&current) {
                return entry;
            }
            match execution_model.phase(current).parent() {
                Some(parent) => current = parent,
                None => panic!("phase does not belong to the mapped execution model"),
            }
        }
    }

    fn validate(
        &self,
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
    ) -> Result<(), ModelError> {
        for (&phase, entry) in &self.entries {
            let Some(parent) = execution_model.phase(phase).parent() else {
                continue;
            };
            let parent_paths = self
                .get(execution_model, parent)
                .mapped_paths(resource_model);
            let contained = entry
                .mapped_paths(resource_model)
                .iter()
                .all(|path| parent_paths.iter().any(|p| p.contains(path)));
            if !contained {
                return Err(ModelError::MappingNotSubset {
                    phase: execution_model.phase(phase).path().to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ExecutionModelBuilder, MetricClass, MetricKind, Repeatability, ResourceModelBuilder,
    };
    use crate::metrics::RateObservations;
    use crate::timeslice::NANOSECONDS_PER_SLICE;

    fn models() -> (ExecutionModel, ResourceModel, Vec<PhaseId>, Vec<ResourceId>) {
        let mut exec = ExecutionModelBuilder::new();
        let work = exec
            .add_phase_type(
                exec.root_phase_type(),
                "work",
                Repeatability::concurrent("worker"),
            )
            .unwrap();
        let root_phase = exec.add_root_phase(0, 10).unwrap();
        let w0 = exec.add_phase(root_phase, work, "0", 0, 10).unwrap();
        let w1 = exec.add_phase(root_phase, work, "1", 0, 10).unwrap();
        let execution_model = exec.build().unwrap();

        let mut res = ResourceModelBuilder::new();
        let machine = res
            .add_resource_type(
                res.root_resource_type(),
                "machine",
                Repeatability::concurrent("host"),
            )
            .unwrap();
        let cpu = res
            .add_metric_type(machine, "cpu", MetricClass::Consumable)
            .unwrap();
        let m0 = res.add_resource(res.root_resource(), machine, "m0").unwrap();
        let m1 = res.add_resource(res.root_resource(), machine, "m1").unwrap();
        for m in [m0, m1] {
            res.add_metric(
                m,
                cpu,
                MetricKind::Consumable {
                    observations: RateObservations::new(
                        vec![0, 10 * NANOSECONDS_PER_SLICE],
                        vec![1.0],
                    )
                    .unwrap(),
                    capacity: 1.0,
                },
            )
            .unwrap();
        }
        let resource_model = res.build().unwrap();
        (execution_model, resource_model, vec![w0, w1], vec![m0, m1])
    }

    #[test]
    fn unmapped_phases_inherit_from_ancestors() {
        let (exec, res, phases, _) = models();
        let mapping = PhaseToResourceMapping::new(&exec, &res, Vec::new()).unwrap();
        let entry = mapping.get(&exec, phases[0]);
        assert_eq!(entry.phase, exec.root_phase());
        assert_eq!(entry.resources, vec![res.root_resource()]);
    }

    #[test]
    fn explicit_entries_narrow_the_mapping() {
        let (exec, res, phases, machines) = models();
        let mapping = PhaseToResourceMapping::new(
            &exec,
            &res,
            vec![
                MappingEntry::with_resources(phases[0], vec![machines[0]]),
                MappingEntry::with_resources(phases[1], vec![machines[1]]),
            ],
        )
        .unwrap();
        assert_eq!(mapping.get(&exec, phases[0]).resources, vec![machines[0]]);
        assert_eq!(mapping.get(&exec, phases[1]).resources, vec![machines[1]]);
    }

    #[test]
    fn rejects_entries_outside_parent_mapping() {
        let (exec, res, phases, machines) = models();
        let result = PhaseToResourceMapping::new(
            &exec,
            &res,
            vec![
                MappingEntry::with_resources(exec.root_phase(), vec![machines[0]]),
                MappingEntry::with_resources(phases[0], vec![machines[1]]),
            ],
        );
        assert!(matches!(result, Err(ModelError::MappingNotSubset { .. })));
    }
}
