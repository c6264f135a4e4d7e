//! Resource sampling: converting variable-length rate observations into one
//! usage sample per slice.

use fnv::FnvHashMap;

use crate::attribution::load::MetricLoads;
use crate::model::{MetricId, MetricKind, ResourceModel};
use crate::timeslice::TimeSliceId;

/// How observed usage is distributed over the slices of each observation
/// period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplingStrategy {
    /// Broadcast each period's rate to all of its slices.
    #[default]
    Uninformed,
    /// Redistribute each period's total usage toward slices with higher
    /// demand, capped by the metric's capacity: greedy load first, then sink
    /// load, then uniformly as background usage.
    PhaseAware,
}

/// Per-metric usage samples over a shared slice range.
#[derive(Debug)]
pub struct MetricSamples {
    samples: FnvHashMap<MetricId, Vec<f64>>,
    start_slice: TimeSliceId,
    end_slice: TimeSliceId,
}

impl MetricSamples {
    pub fn compute(
        resource_model: &ResourceModel,
        metrics: &[MetricId],
        loads: &MetricLoads,
        strategy: SamplingStrategy,
        start_slice: TimeSliceId,
        end_slice: TimeSliceId,
    ) -> Self {
        let mut samples = FnvHashMap::default();
        for &metric in metrics {
            let array = match strategy {
                SamplingStrategy::Uninformed => {
                    sample_uninformed(resource_model, metric, start_slice, end_slice)
                }
                SamplingStrategy::PhaseAware => {
                    sample_phase_aware(resource_model, metric, loads, start_slice, end_slice)
                }
            };
            samples.insert(metric, array);
        }
        MetricSamples {
            samples,
            start_slice,
            end_slice,
        }
    }

    pub(crate) fn from_parts(
        samples: FnvHashMap<MetricId, Vec<f64>>,
        start_slice: TimeSliceId,
        end_slice: TimeSliceId,
    ) -> Self {
        MetricSamples {
            samples,
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
        self.samples.keys().copied()
    }

    pub(crate) fn sample_array(&self, metric: MetricId) -> &[f64] {
        &self.samples[&metric]
    }

    /// Streams samples over `from..=to` together with the metric's capacity.
    pub fn sample_iterator(
        &self,
        resource_model: &ResourceModel,
        metric: MetricId,
        from: TimeSliceId,
        to: TimeSliceId,
    ) -> SampleIterator<'_> {
        let samples = self
            .samples
            .get(&metric)
            .unwrap_or_else(|| panic!("no samples computed for metric id {}", metric.0));
        SampleIterator {
            capacity: resource_model.metric(metric).capacity(),
            samples,
            next_index: (from - self.start_slice) as usize,
            end_index: (to - self.start_slice) as usize,
        }
    }
}

/// Cursor over the sample array of one metric.
pub struct SampleIterator<'a> {
    pub capacity: f64,
    samples: &'a [f64],
    next_index: usize,
    end_index: usize,
}

impl SampleIterator<'_> {
    pub fn has_next(&self) -> bool {
        self.next_index <= self.end_index
    }

    pub fn next_sample(&mut self) -> f64 {
        let sample = self.samples[self.next_index];
        self.next_index += 1;
        sample
    }
}

fn consumable_observations(
    resource_model: &ResourceModel,
    metric: MetricId,
) -> &crate::metrics::RateObservations {
    match resource_model.metric(metric).kind() {
        MetricKind::Consumable { observations, .. } => observations,
        MetricKind::Blocking { .. } => {
            panic!("cannot sample blocking metric id {}", metric.0)
        }
    }
}

fn sample_uninformed(
    resource_model: &ResourceModel,
    metric: MetricId,
    start_slice: TimeSliceId,
    end_slice: TimeSliceId,
) -> Vec<f64> {
    let num_slices = (end_slice - start_slice + 1).max(0) as usize;
    let mut samples = vec![0.0; num_slices];
    if num_slices == 0 {
        return samples;
    }

    for period in consumable_observations(resource_model, metric).period_iterator() {
        if period.first_slice > end_slice {
            break;
        }
        if period.last_slice < start_slice {
            continue;
        }
        let from = (period.first_slice - start_slice).max(0) as usize;
        let to = ((period.last_slice - start_slice) as usize).min(num_slices - 1);
        for sample in &mut samples[from..=to] {
            *sample = period.rate;
        }
    }
    samples
}

fn sample_phase_aware(
    resource_model: &ResourceModel,
    metric: MetricId,
    loads: &MetricLoads,
    start_slice: TimeSliceId,
    end_slice: TimeSliceId,
) -> Vec<f64> {
    let num_slices = (end_slice - start_slice + 1).max(0) as usize;
    let mut samples = vec![0.0; num_slices];
    if num_slices == 0 {
        return samples;
    }
    let capacity = resource_model.metric(metric).capacity();

    for period in consumable_observations(resource_model, metric).period_iterator() {
        if period.first_slice > end_slice {
            break;
        }
        if period.last_slice < start_slice {
            continue;
        }
        let from_slice = period.first_slice.max(start_slice);
        let to_slice = period.last_slice.min(end_slice);
        let period_len = (to_slice - from_slice + 1) as usize;
        let offset = (from_slice - start_slice) as usize;

        let mut remaining_capacity = vec![capacity; period_len];
        let mut greedy_load = vec![0.0; period_len];
        let mut sink_load = vec![0i32; period_len];
        let mut load_iter = loads.load_iterator(metric, from_slice, to_slice);
        let mut i = 0;
        while load_iter.has_next() {
            load_iter.compute_next();
            greedy_load[i] = load_iter.greedy_load;
            sink_load[i] = load_iter.sink_load;
            i += 1;
        }

        // The period total is distributed over the full period, including
        // slices clipped off by the query range.
        let mut remaining_sample = period.rate * period.slice_count() as f64;

        // Pass 1: greedy demand, highest load-to-capacity ratio first.
        if remaining_sample > 0.0 {
            let mut remaining_greedy: f64 = (0..period_len)
                .filter(|&i| remaining_capacity[i] > 0.0)
                .map(|i| greedy_load[i])
                .sum();
            let mut order: Vec<usize> = (0..period_len)
                .filter(|&i| greedy_load[i] > 0.0 && remaining_capacity[i] > 0.0)
                .collect();
            order.sort_by(|&a, &b| {
                let ra = greedy_load[a] / remaining_capacity[a];
                let rb = greedy_load[b] / remaining_capacity[b];
                rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
            });
            for i in order {
                let delta = (remaining_sample * greedy_load[i] / remaining_greedy)
                    .min(remaining_capacity[i]);
                samples[offset + i] += delta;
                remaining_capacity[i] -= delta;
                remaining_sample -= delta;
                remaining_greedy -= greedy_load[i];
            }
        }

        // Pass 2: sink demand.
        if remaining_sample > 0.0 {
            let mut remaining_sink: i32 = (0..period_len)
                .filter(|&i| remaining_capacity[i] > 0.0)
                .map(|i| sink_load[i])
                .sum();
            let mut order: Vec<usize> = (0..period_len)
                .filter(|&i| sink_load[i] > 0 && remaining_capacity[i] > 0.0)
                .collect();
            order.sort_by(|&a, &b| {
                let ra = sink_load[a] as f64 / remaining_capacity[a];
                let rb = sink_load[b] as f64 / remaining_capacity[b];
                rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
            });
            for i in order {
                let delta = (remaining_sample * sink_load[i] as f64 / remaining_sink as f64)
                    .min(remaining_capacity[i]);
                samples[offset + i] += delta;
                remaining_capacity[i] -= delta;
                remaining_sample -= delta;
                remaining_sink -= 1;
            }
        }

        // Pass 3: background usage, least remaining capacity first.
        if remaining_sample > 0.0 {
            let mut remaining_count =
                (0..period_len).filter(|&i| remaining_capacity[i] > 0.0).count();
            let mut order: Vec<usize> = (0..period_len)
                .filter(|&i| remaining_capacity[i] > 0.0)
                .collect();
            order.sort_by(|&a, &b| {
                remaining_capacity[a]
                    .partial_cmp(&remaining_capacity[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for i in order {
                let delta = (remaining_sample / remaining_count as f64).min(remaining_capacity[i]);
                samples[offset + i] += delta;
                remaining_capacity[i] -= delta;
                remaining_sample -= delta;
                remaining_count -= 1;
            }
        }
    }

    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RateObservations;
    use crate::timeslice::NANOSECONDS_PER_SLICE;

    fn single_metric_model(
        observations: RateObservations,
        capacity: f64,
    ) -> (ResourceModel, MetricId) {
        use crate::model::{MetricClass, MetricKind, Repeatability, ResourceModelBuilder};
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
                    observations,
                    capacity,
                },
            )
            .unwrap();
        (res.build().unwrap(), metric)
    }

    fn empty_loads(metric: MetricId, start: TimeSliceId, end: TimeSliceId) -> MetricLoads {
        let n = (end - start + 1).max(0) as usize;
        let mut greedy = FnvHashMap::default();
        let mut sink = FnvHashMap::default();
        greedy.insert(metric, vec![0.0; n]);
        sink.insert(metric, vec![0; n]);
        MetricLoads::from_parts(greedy, sink, start, end)
    }

    #[test]
    fn uninformed_broadcasts_period_rates() {
        let obs = RateObservations::new(
            vec![0, 2 * NANOSECONDS_PER_SLICE, 5 * NANOSECONDS_PER_SLICE],
            vec![3.0, 1.0],
        )
        .unwrap();
        let (model, metric) = single_metric_model(obs, 10.0);
        let loads = empty_loads(metric, 0, 4);
        let samples = MetricSamples::compute(
            &model,
            &[metric],
            &loads,
            SamplingStrategy::Uninformed,
            0,
            4,
        );
        assert_eq!(samples.sample_array(metric), &[3.0, 3.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn phase_aware_shifts_usage_toward_loaded_slices() {
        // One 4-slice period at rate 1 (total 4 units); only slice 0 carries
        // greedy load, so it fills to capacity before background spreading.
        let obs =
            RateObservations::new(vec![0, 4 * NANOSECONDS_PER_SLICE], vec![1.0]).unwrap();
        let (model, metric) = single_metric_model(obs, 2.0);
        let mut greedy = FnvHashMap::default();
        let mut sink = FnvHashMap::default();
        greedy.insert(metric, vec![5.0, 0.0, 0.0, 0.0]);
        sink.insert(metric, vec![0; 4]);
        let loads = MetricLoads::from_parts(greedy, sink, 0, 3);

        let samples = MetricSamples::compute(
            &model,
            &[metric],
            &loads,
            SamplingStrategy::PhaseAware,
            0,
            3,
        );
        let array = samples.sample_array(metric);
        assert_eq!(array[0], 2.0);
        let total: f64 = array.iter().sum();
        assert!((total - 4.0).abs() < 1e-9);
        // The remainder is spread evenly over the other slices.
        for &s in &array[1..] {
            assert!((s - 2.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn phase_aware_never_exceeds_capacity() {
        let obs =
            RateObservations::new(vec![0, 2 * NANOSECONDS_PER_SLICE], vec![1.5]).unwrap();
        let (model, metric) = single_metric_model(obs, 2.0);
        let loads = empty_loads(metric, 0, 1);
        let samples = MetricSamples::compute(
            &model,
            &[metric],
            &loads,
            SamplingStrategy::PhaseAware,
            0,
            1,
        );
        for &s in samples.sample_array(metric) {
            assert!(s <= 2.0 + 1e-9);
        }
    }
}
