//! Load computation: per-slice demand on each consumable metric.
//!
//! Greedy load is the sum of the maximum rates of all active greedy phases;
//! sink load counts active sink phases. Both arrays span the union of all
//! phase ranges so that every phase's slices index into them directly.

use fnv::FnvHashMap;

use crate::attribution::active::ActivePhases;
use crate::attribution::mapping_cache::MappingCache;
use crate::attribution::rules::{ConsumableRule, RuleProvider};
use crate::model::{ExecutionModel, MetricId, ResourceModel};
use crate::timeslice::TimeSliceId;

/// Per-metric greedy and sink load arrays over a shared slice range.
#[derive(Debug)]
pub struct MetricLoads {
    greedy: FnvHashMap<MetricId, Vec<f64>>,
    sink: FnvHashMap<MetricId, Vec<i32>>,
    start_slice: TimeSliceId,
    end_slice: TimeSliceId,
}

impl MetricLoads {
    pub fn compute(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        cache: &MappingCache,
        rules: &dyn RuleProvider,
        active: &ActivePhases,
    ) -> Self {
        let start_slice = cache
            .phases
            .iter()
            .map(|&p| execution_model.phase(p).first_slice())
            .min()
            .unwrap_or(0);
        let end_slice = cache
            .phases
            .iter()
            .map(|&p| execution_model.phase(p).last_slice())
            .max()
            .unwrap_or(-1);
        let num_slices = (end_slice - start_slice + 1).max(0) as usize;

        let mut greedy = FnvHashMap::default();
        let mut sink = FnvHashMap::default();
        for &metric_id in &cache.consumable_metrics {
            let metric = resource_model.metric(metric_id);
            let mut greedy_load = vec![0.0f64; num_slices];
            let mut sink_load = vec![0i32; num_slices];

            for &leaf in cache.leaf_phases_for_metric(metric_id) {
                let phase = execution_model.phase(leaf);
                let rule = rules.consumable_rule(phase.phase_type(), metric.metric_type());
                let mut iter =
                    active.active_iterator(leaf, phase.first_slice(), phase.last_slice());
                let mut index = (phase.first_slice() - start_slice) as usize;
                match rule {
                    ConsumableRule::Greedy { max_rate } => {
                        while iter.has_next() {
                            if iter.next_is_active() {
                                greedy_load[index] += max_rate;
                            }
                            index += 1;
                        }
                    }
                    ConsumableRule::Sink => {
                        while iter.has_next() {
                            if iter.next_is_active() {
                                sink_load[index] += 1;
                            }
                            index += 1;
                        }
                    }
                    ConsumableRule::None => {}
                }
            }

            greedy.insert(metric_id, greedy_load);
            sink.insert(metric_id, sink_load);
        }

        MetricLoads {
            greedy,
            sink,
            start_slice,
            end_slice,
        }
    }

    pub(crate) fn from_parts(
        greedy: FnvHashMap<MetricId, Vec<f64>>,
        sink: FnvHashMap<MetricId, Vec<i32>>,
        start_slice: TimeSliceId,
        end_slice: TimeSliceId,
    ) -> Self {
        MetricLoads {
            greedy,
            sink,
            start_slice,
            end_slice,
        }
    }

    pub fn start_slice(&self) -> TimeSliceId {
        self.start_slice
    }

    pub fn end_slice(&self) -> TimeSliceId {
        self.end_slice
    }

    pub fn metrics(&self) -> impl Iterator<Item = MetricId> + '_ {
        self.greedy.keys().copied()
    }

    pub(crate) fn greedy_array(&self, metric: MetricId) -> &[f64] {
        &self.greedy[&metric]
    }

    pub(crate) fn sink_array(&self, metric: MetricId) -> &[i32] {
        &self.sink[&metric]
    }

    /// Streams (greedy, sink) loads over `from..=to`.
    pub fn load_iterator(
        &self,
        metric: MetricId,
        from: TimeSliceId,
        to: TimeSliceId,
    ) -> LoadIterator<'_> {
        let greedy = self
            .greedy
            .get(&metric)
            .unwrap_or_else(|| panic!("no load computed for metric id {}", metric.0));
        LoadIterator {
            greedy,
            sink: &self.sink[&metric],
            next_index: (from - self.start_slice) as usize,
            end_index: (to - self.start_slice) as usize,
            time_slice: from - 1,
            greedy_load: 0.0,
            sink_load: 0,
        }
    }
}

/// Cursor over the load arrays of one metric.
pub struct LoadIterator<'a> {
    greedy: &'a [f64],
    sink: &'a [i32],
    next_index: usize,
    end_index: usize,
    pub time_slice: TimeSliceId,
    pub greedy_load: f64,
    pub sink_load: i32,
}

impl LoadIterator<'_> {
    pub fn has_next(&self) -> bool {
        self.next_index <= self.end_index
    }

    pub fn compute_next(&mut self) {
        self.greedy_load = self.greedy[self.next_index];
        self.sink_load = self.sink[self.next_index];
        self.time_slice += 1;
        self.next_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::rules::{BlockingRule, RuleTable};
    use crate::metrics::RateObservations;
    use crate::model::{
        ExecutionModelBuilder, MetricClass, MetricKind, PhaseToResourceMapping, Repeatability,
        ResourceModelBuilder,
    };
    use crate::timeslice::NANOSECONDS_PER_SLICE;

    #[test]
    fn accumulates_greedy_and_sink_load() {
        let mut exec = ExecutionModelBuilder::new();
        let copy = exec
            .add_phase_type(exec.root_phase_type(), "copy", Repeatability::NonRepeated)
            .unwrap();
        let compute = exec
            .add_phase_type(exec.root_phase_type(), "compute", Repeatability::NonRepeated)
            .unwrap();
        let root = exec.add_root_phase(0, 9).unwrap();
        exec.add_phase(root, copy, "", 0, 5).unwrap();
        exec.add_phase(root, compute, "", 4, 9).unwrap();
        let execution_model = exec.build().unwrap();

        let mut res = ResourceModelBuilder::new();
        let machine = res
            .add_resource_type(res.root_resource_type(), "machine", Repeatability::NonRepeated)
            .unwrap();
        let disk = res
            .add_metric_type(machine, "disk", MetricClass::Consumable)
            .unwrap();
        let m = res.add_resource(res.root_resource(), machine, "").unwrap();
        let metric = res
            .add_metric(
                m,
                disk,
                MetricKind::Consumable {
                    observations: RateObservations::new(
                        vec![0, 10 * NANOSECONDS_PER_SLICE],
                        vec![5.0],
                    )
                    .unwrap(),
                    capacity: 10.0,
                },
            )
            .unwrap();
        let resource_model = res.build().unwrap();

        let mapping =
            PhaseToResourceMapping::new(&execution_model, &resource_model, Vec::new()).unwrap();
        let cache = MappingCache::build(&execution_model, &resource_model, &mapping);
        let mut rules = RuleTable::with_defaults(ConsumableRule::None, BlockingRule::None);
        rules.set_consumable(copy, disk, ConsumableRule::greedy(2.0));
        rules.set_consumable(compute, disk, ConsumableRule::Sink);

        let active = ActivePhases::detect(&execution_model, &resource_model, &cache, &rules);
        let loads =
            MetricLoads::compute(&execution_model, &resource_model, &cache, &rules, &active);

        assert_eq!(loads.start_slice(), 0);
        assert_eq!(loads.end_slice(), 9);
        let mut iter = loads.load_iterator(metric, 0, 9);
        let mut greedy = Vec::new();
        let mut sink = Vec::new();
        while iter.has_next() {
            iter.compute_next();
            greedy.push(iter.greedy_load);
            sink.push(iter.sink_load);
        }
        assert_eq!(greedy, vec![2.0, 2.0, 2.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
        assert_eq!(sink, vec![0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
    }
}
