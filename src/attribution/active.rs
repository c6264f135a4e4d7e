//! Active-phase detection: the slices during which each leaf phase makes
//! progress, i.e. its range minus any fully blocking metrics.

use fnv::FnvHashMap;

use crate::attribution::mapping_cache::MappingCache;
use crate::attribution::rules::{BlockingRule, RuleProvider};
use crate::model::{ExecutionModel, MetricKind, PhaseId, ResourceModel};
use crate::period::{PeriodList, SliceActiveIterator};
use crate::timeslice::TimeSliceId;

/// Per-leaf-phase active slice sets.
#[derive(Debug)]
pub struct ActivePhases {
    active_slices: FnvHashMap<PhaseId, PeriodList>,
}

impl ActivePhases {
    /// Subtracts the blocked slices of every `Full`-rule blocking metric
    /// from each leaf phase's range.
    pub fn detect(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        cache: &MappingCache,
        rules: &dyn RuleProvider,
    ) -> Self {
        let mut active_slices = FnvHashMap::default();
        for &leaf in &cache.leaf_phases {
            let phase = execution_model.phase(leaf);
            let mut active = PeriodList::from_period(phase.slice_range());
            for &metric_id in cache.metrics_for_leaf(leaf) {
                let metric = resource_model.metric(metric_id);
                let MetricKind::Blocking { blocked_slices } = metric.kind() else {
                    continue;
                };
                let rule = rules.blocking_rule(phase.phase_type(), metric.metric_type());
                if rule == BlockingRule::Full {
                    active = active.minus(blocked_slices);
                }
            }
            active_slices.insert(leaf, active);
        }
        ActivePhases { active_slices }
    }

    pub(crate) fn from_parts(active_slices: FnvHashMap<PhaseId, PeriodList>) -> Self {
        ActivePhases { active_slices }
    }

    pub(crate) fn parts(&self) -> &FnvHashMap<PhaseId, PeriodList> {
        &self.active_slices
    }

    pub fn active_slices(&self, leaf: PhaseId) -> &PeriodList {
        self.active_slices
            .get(&leaf)
            .unwrap_or_else(|| panic!("no active-slice set for phase id {}", leaf.0))
    }

    /// Per-slice activity over `start..=end`, which must lie within the
    /// phase's range.
    pub fn active_iterator(
        &self,
        leaf: PhaseId,
        start: TimeSliceId,
        end: TimeSliceId,
    ) -> SliceActiveIterator<'_> {
        self.active_slices(leaf).active_iterator(start, end)
    }
}
