//! Per-leaf-phase attribution: dividing each metric's sampled usage among
//! the phases mapped to it, according to their rules.

use fnv::FnvHashMap;

use crate::attribution::active::ActivePhases;
use crate::attribution::load::{LoadIterator, MetricLoads};
use crate::attribution::mapping_cache::MappingCache;
use crate::attribution::rules::{BlockingRule, ConsumableRule, RuleProvider};
use crate::attribution::sampling::{MetricSamples, SampleIterator};
use crate::model::{ExecutionModel, MetricClass, MetricId, MetricKind, PhaseId, ResourceModel};
use crate::period::{PeriodList, SliceActiveIterator};
use crate::timeslice::TimeSliceId;

/// The metrics relevant to one leaf phase, split by class and usage, with
/// the consumable rule resolved per metric.
#[derive(Debug)]
pub struct PhaseAttribution {
    pub phase: PhaseId,
    pub blocking_metrics: Vec<MetricId>,
    pub unused_blocking_metrics: Vec<MetricId>,
    pub unused_consumable_metrics: Vec<MetricId>,
    consumable_rules: FnvHashMap<MetricId, ConsumableRule>,
}

impl PhaseAttribution {
    pub fn consumable_metrics(&self) -> impl Iterator<Item = MetricId> + '_ {
        self.consumable_rules.keys().copied()
    }

    pub fn rule(&self, metric: MetricId) -> ConsumableRule {
        self.consumable_rules
            .get(&metric)
            .copied()
            .unwrap_or_else(|| panic!("no attribution rule for metric id {}", metric.0))
    }

    pub(crate) fn from_parts(
        phase: PhaseId,
        blocking_metrics: Vec<MetricId>,
        unused_blocking_metrics: Vec<MetricId>,
        unused_consumable_metrics: Vec<MetricId>,
        consumable_rules: FnvHashMap<MetricId, ConsumableRule>,
    ) -> Self {
        PhaseAttribution {
            phase,
            blocking_metrics,
            unused_blocking_metrics,
            unused_consumable_metrics,
            consumable_rules,
        }
    }

    pub(crate) fn consumable_rules(&self) -> &FnvHashMap<MetricId, ConsumableRule> {
        &self.consumable_rules
    }
}

/// Attribution metadata for every leaf phase.
#[derive(Debug)]
pub struct AttributionStepResult {
    phase_results: FnvHashMap<PhaseId, PhaseAttribution>,
}

impl AttributionStepResult {
    pub fn compute(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        cache: &MappingCache,
        rules: &dyn RuleProvider,
    ) -> Self {
        let mut phase_results = FnvHashMap::default();
        for &leaf in &cache.leaf_phases {
            let phase_type = execution_model.phase(leaf).phase_type();
            let mut blocking_metrics = Vec::new();
            let mut unused_blocking_metrics = Vec::new();
            let mut unused_consumable_metrics = Vec::new();
            let mut consumable_rules = FnvHashMap::default();

            for &metric_id in cache.metrics_for_leaf(leaf) {
                let metric = resource_model.metric(metric_id);
                match metric.class() {
                    MetricClass::Blocking => {
                        match rules.blocking_rule(phase_type, metric.metric_type()) {
                            BlockingRule::Full => blocking_metrics.push(metric_id),
                            BlockingRule::None => unused_blocking_metrics.push(metric_id),
                        }
                    }
                    MetricClass::Consumable => {
                        match rules.consumable_rule(phase_type, metric.metric_type()) {
                            ConsumableRule::None => unused_consumable_metrics.push(metric_id),
                            rule => {
                                consumable_rules.insert(metric_id, rule);
                            }
                        }
                    }
                }
            }

            phase_results.insert(
                leaf,
                PhaseAttribution {
                    phase: leaf,
                    blocking_metrics,
                    unused_blocking_metrics,
                    unused_consumable_metrics,
                    consumable_rules,
                },
            );
        }
        AttributionStepResult { phase_results }
    }

    pub(crate) fn from_parts(phase_results: FnvHashMap<PhaseId, PhaseAttribution>) -> Self {
        AttributionStepResult { phase_results }
    }

    pub fn phases(&self) -> impl Iterator<Item = PhaseId> + '_ {
        self.phase_results.keys().copied()
    }

    pub fn get(&self, phase: PhaseId) -> &PhaseAttribution {
        self.phase_results
            .get(&phase)
            .unwrap_or_else(|| panic!("no attribution result for phase id {}", phase.0))
    }
}

/// Streams the usage and capacity of one consumable metric attributed to one
/// phase, one slice at a time over the phase's range.
pub struct ConsumableAttributionIterator<'a> {
    mode: ConsumableMode,
    load: LoadIterator<'a>,
    samples: SampleIterator<'a>,
    active: SliceActiveIterator<'a>,
    pub time_slice: TimeSliceId,
    pub attributed_usage: f64,
    pub available_capacity: f64,
}

enum ConsumableMode {
    Greedy { max_rate: f64 },
    Sink,
}

impl<'a> ConsumableAttributionIterator<'a> {
    pub(crate) fn new(
        rule: ConsumableRule,
        start_slice: TimeSliceId,
        load: LoadIterator<'a>,
        samples: SampleIterator<'a>,
        active: SliceActiveIterator<'a>,
    ) -> Self {
        let mode = match rule {
            ConsumableRule::Greedy { max_rate } => ConsumableMode::Greedy { max_rate },
            ConsumableRule::Sink => ConsumableMode::Sink,
            ConsumableRule::None => panic!("metrics with rule None have no attribution"),
        };
        ConsumableAttributionIterator {
            mode,
            load,
            samples,
            active,
            time_slice: start_slice - 1,
            attributed_usage: 0.0,
            available_capacity: 0.0,
        }
    }

    pub fn has_next(&self) -> bool {
        self.load.has_next()
    }

    pub fn compute_next(&mut self) {
        self.load.compute_next();
        let sample = self.samples.next_sample();
        let is_active = self.active.next_is_active();

        if is_active {
            match self.mode {
                ConsumableMode::Greedy { max_rate } => {
                    let fraction = max_rate / self.load.greedy_load;
                    self.attributed_usage = (sample * fraction).min(max_rate);
                    self.available_capacity = (self.samples.capacity * fraction).min(max_rate);
                }
                ConsumableMode::Sink => {
                    let sink_sample = (sample - self.load.greedy_load).max(0.0);
                    let sink_capacity = (self.samples.capacity - self.load.greedy_load).max(0.0);
                    let fraction = 1.0 / self.load.sink_load as f64;
                    self.attributed_usage = sink_sample * fraction;
                    self.available_capacity = sink_capacity * fraction;
                }
            }
        } else {
            self.attributed_usage = 0.0;
            self.available_capacity = 0.0;
        }

        self.time_slice += 1;
    }
}

/// Streams, per slice of a phase's range, whether a blocking metric blocked
/// the phase.
pub struct BlockingAttributionIterator {
    unblocked: PeriodList,
    next_slice: TimeSliceId,
    end_slice: TimeSliceId,
    period_index: usize,
}

impl BlockingAttributionIterator {
    pub(crate) fn new(
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        phase: PhaseId,
        metric: MetricId,
    ) -> Self {
        let phase = execution_model.phase(phase);
        let MetricKind::Blocking { blocked_slices } = resource_model.metric(metric).kind() else {
            panic!("metric id {} is not a blocking metric", metric.0)
        };
        let unblocked = PeriodList::from_period(phase.slice_range()).minus(blocked_slices);
        let start = phase.first_slice();
        let mut period_index = 0;
        while period_index < unblocked.periods().len()
            && unblocked.periods()[period_index].last < start
        {
            period_index += 1;
        }
        BlockingAttributionIterator {
            unblocked,
            next_slice: start,
            end_slice: phase.last_slice(),
            period_index,
        }
    }

    pub fn has_next(&self) -> bool {
        self.next_slice <= self.end_slice
    }

    pub fn next_is_blocked(&mut self) -> bool {
        let slice = self.next_slice;
        self.next_slice += 1;
        match self.unblocked.periods().get(self.period_index) {
            Some(p) if p.contains(slice) => {
                if p.last < self.next_slice {
                    self.period_index += 1;
                }
                false
            }
            _ => true,
        }
    }
}

/// The combined output of all four attribution steps.
#[derive(Debug)]
pub struct AttributionResult {
    pub active_phases: ActivePhases,
    pub loads: MetricLoads,
    pub samples: MetricSamples,
    pub step: AttributionStepResult,
}

impl AttributionResult {
    /// Attribution iterator for a consumable metric mapped to `phase` with a
    /// rule other than `None`.
    pub fn consumable_iterator<'a>(
        &'a self,
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        phase: PhaseId,
        metric: MetricId,
    ) -> ConsumableAttributionIterator<'a> {
        let rule = self.step.get(phase).rule(metric);
        let node = execution_model.phase(phase);
        let (from, to) = (node.first_slice(), node.last_slice());
        ConsumableAttributionIterator::new(
            rule,
            from,
            self.loads.load_iterator(metric, from, to),
            self.samples.sample_iterator(resource_model, metric, from, to),
            self.active_phases.active_iterator(phase, from, to),
        )
    }

    /// Attribution iterator for a blocking metric mapped to `phase` under
    /// the `Full` rule.
    pub fn blocking_iterator(
        &self,
        execution_model: &ExecutionModel,
        resource_model: &ResourceModel,
        phase: PhaseId,
        metric: MetricId,
    ) -> BlockingAttributionIterator {
        BlockingAttributionIterator::new(execution_model, resource_model, phase, metric)
    }
}
