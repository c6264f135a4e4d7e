//! Bottleneck identification: deciding, per slice, whether each phase was
//! held back by a metric, and aggregating those statuses up the hierarchy.

pub mod metric;
pub mod metric_type;
pub mod predicate;
pub mod sweep;

pub use metric::{identify_metric_bottlenecks, PhaseMetricBottlenecks};
pub use metric_type::{identify_metric_type_bottlenecks, PhaseMetricTypeBottlenecks};
pub use predicate::BottleneckPredicate;

use std::hash::Hash;
use std::sync::OnceLock;

use fnv::FnvHashMap;

use crate::attribution::AttributionResult;
use crate::bottlenecks::sweep::combine_subphase_statuses;
use crate::hierarchy::HierarchyResult;
use crate::model::{ExecutionModel, MetricId, MetricTypeId, PhaseId, ResourceModel};
use crate::timeslice::TimeSliceCount;

/// Severity of a bottleneck in one slice. Ordered: a global bottleneck
/// dominates a local one when statuses are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum BottleneckStatus {
    None = 0,
    /// The phase's share of the metric was exhausted.
    Local = 1,
    /// The metric itself was saturated or fully blocking.
    Global = 2,
}

impl BottleneckStatus {
    pub fn from_byte(byte: u8) -> Option<BottleneckStatus> {
        match byte {
            0 => Some(BottleneckStatus::None),
            1 => Some(BottleneckStatus::Local),
            2 => Some(BottleneckStatus::Global),
            _ => None,
        }
    }
}

/// What a bottleneck is attributed to in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BottleneckSource {
    Metric(MetricId),
    MetricType(MetricTypeId),
    NoBottleneck,
}

/// Thresholds and the composite predicate controlling identification.
pub struct BottleneckSettings {
    /// Fraction of a metric's capacity its sampled usage must reach for a
    /// global bottleneck.
    pub global_threshold: Box<dyn Fn(MetricId) -> f64 + Send + Sync>,
    /// Fraction of a phase's available capacity its attributed usage must
    /// reach for a local bottleneck.
    pub local_threshold: Box<dyn Fn(MetricId, PhaseId) -> f64 + Send + Sync>,
    pub predicate: BottleneckPredicate,
}

impl Default for BottleneckSettings {
    fn default() -> Self {
        BottleneckSettings {
            global_threshold: Box::new(|_| 0.95),
            local_threshold: Box::new(|_, _| 0.95),
            predicate: BottleneckPredicate::Any,
        }
    }
}

/// Bottleneck statuses of one phase keyed by `K` (a metric or metric type),
/// one status per slice of the phase's range. Aggregates over all keys are
/// computed lazily, at most once.
pub struct PhaseBottlenecks<K> {
    pub phase: PhaseId,
    num_slices: usize,
    statuses: FnvHashMap<K, Vec<BottleneckStatus>>,
    combined: OnceLock<CombinedStatuses<K>>,
}

struct CombinedStatuses<K> {
    total: Vec<BottleneckStatus>,
    durations: FnvHashMap<K, TimeSliceCount>,
    time_not_bottlenecked: TimeSliceCount,
}

impl<K: Copy + Eq + Hash> PhaseBottlenecks<K> {
    fn new(
        phase: PhaseId,
        num_slices: usize,
        statuses: FnvHashMap<K, Vec<BottleneckStatus>>,
    ) -> Self {
        PhaseBottlenecks {
            phase,
            num_slices,
            statuses,
            combined: OnceLock::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = K> + '_ {
        self.statuses.keys().copied()
    }

    /// Status per slice for one key; panics if the key has no statuses.
    pub fn statuses(&self, key: K) -> &[BottleneckStatus] {
        self.statuses
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_else(|| panic!("no bottleneck statuses for the requested key"))
    }

    /// Slice-wise maximum status over all keys.
    pub fn combined_statuses(&self) -> &[BottleneckStatus] {
        &self.combined().total
    }

    /// Slices of the phase's range in which no key was bottlenecked.
    pub fn time_not_bottlenecked(&self) -> TimeSliceCount {
        self.combined().time_not_bottlenecked
    }

    /// Slices in which the given key was bottlenecked.
    pub fn time_bottlenecked_on(&self, key: K) -> TimeSliceCount {
        *self
            .combined()
            .durations
            .get(&key)
            .unwrap_or_else(|| panic!("no bottleneck statuses for the requested key"))
    }

    fn combined(&self) -> &CombinedStatuses<K> {
        self.combined.get_or_init(|| {
            let mut total = vec![BottleneckStatus::None; self.num_slices];
            let mut durations = FnvHashMap::default();
            for (&key, statuses) in &self.statuses {
                let mut duration = 0;
                for (slot, &status) in total.iter_mut().zip(statuses) {
                    *slot = (*slot).max(status);
                    if status != BottleneckStatus::None {
                        duration += 1;
                    }
                }
                durations.insert(key, duration);
            }
            let time_not_bottlenecked = total
                .iter()
                .filter(|&&s| s == BottleneckStatus::None)
                .count() as TimeSliceCount;
            CombinedStatuses {
                total,
                durations,
                time_not_bottlenecked,
            }
        })
    }
}

/// Composite fold shared by both identification steps: collect the
/// subphases carrying each key, then sweep the composite's range per key.
fn combine_by_key<K: Copy + Eq + Hash>(
    model: &ExecutionModel,
    composite: PhaseId,
    children: &[PhaseId],
    results: &FnvHashMap<PhaseId, PhaseBottlenecks<K>>,
    predicate: &BottleneckPredicate,
) -> PhaseBottlenecks<K> {
    let mut subphases_per_key: FnvHashMap<K, Vec<PhaseId>> = FnvHashMap::default();
    for &child in children {
        for key in results[&child].keys() {
            subphases_per_key.entry(key).or_default().push(child);
        }
    }

    let mut statuses = FnvHashMap::default();
    for (key, subphases) in subphases_per_key {
        let arrays: Vec<(PhaseId, &[BottleneckStatus])> = subphases
            .iter()
            .map(|&p| (p, results[&p].statuses(key)))
            .collect();
        statuses.insert(
            key,
            combine_subphase_statuses(model, composite, &arrays, predicate),
        );
    }
    let num_slices = model.phase(composite).slice_duration().max(0) as usize;
    PhaseBottlenecks::new(composite, num_slices, statuses)
}

/// Both identification steps over one attribution result.
pub struct BottleneckIdentificationResult {
    pub metric_bottlenecks: HierarchyResult<PhaseMetricBottlenecks>,
    pub metric_type_bottlenecks: HierarchyResult<PhaseMetricTypeBottlenecks>,
}

/// Runs per-metric identification, then folds it per metric type.
pub fn identify_bottlenecks(
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
    attribution: &AttributionResult,
    settings: &BottleneckSettings,
) -> BottleneckIdentificationResult {
    let metric_bottlenecks =
        identify_metric_bottlenecks(execution_model, resource_model, attribution, settings);
    let metric_type_bottlenecks = identify_metric_type_bottlenecks(
        execution_model,
        resource_model,
        attribution,
        settings,
        &metric_bottlenecks,
    );
    BottleneckIdentificationResult {
        metric_bottlenecks,
        metric_type_bottlenecks,
    }
}
