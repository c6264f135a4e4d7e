//! On-disk cache for attribution results.
//!
//! The cache is a gzip-compressed binary file. Arena ids are meaningless
//! across processes, so the file starts with a model preamble listing every
//! phase type, phase, resource and metric by parent reference and name.
//! Reading re-resolves each entry against the live models; any miss means
//! the models changed since the cache was written and the whole file is
//! rejected. Sections reference entities by their preamble index.
//!
//! Integers are LEB128 varints, signed values zigzag-encoded, doubles
//! little-endian IEEE 754 bits.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fnv::FnvHashMap;
use thiserror::Error;

use crate::attribution::{
    ActivePhases, AttributionResult, AttributionStepResult, ConsumableRule, MetricLoads,
    MetricSamples, PhaseAttribution,
};
use crate::model::{ExecutionModel, MetricId, PhaseId, ResourceModel};
use crate::path::ModelPath;
use crate::period::{Period, PeriodList};

pub const ATTRIBUTION_CACHE_FILENAME: &str = "resource-attribution.bin.gz";

const MODEL_FORMAT_VERSION: u64 = 1;
const RESULT_FORMAT_VERSION: u64 = 2;

/// Cache read/write failures. None of these are fatal to an analysis; the
/// caller recomputes and rewrites the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("unsupported cache format version {0}")]
    UnsupportedVersion(u64),

    #[error("corrupt cache: {0}")]
    Corrupt(String),

    #[error("cache references unknown {kind} \"{name}\"")]
    Unresolved { kind: &'static str, name: String },
}

struct CacheWriter<W: Write> {
    out: W,
}

impl<W: Write> CacheWriter<W> {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.out.write_all(&[byte])
    }

    fn write_varint(&mut self, mut value: u64) -> io::Result<()> {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                return self.write_byte(byte);
            }
            self.write_byte(byte | 0x80)?;
        }
    }

    fn write_zigzag(&mut self, value: i64) -> io::Result<()> {
        self.write_varint(((value << 1) ^ (value >> 63)) as u64)
    }

    fn write_f64(&mut self, value: f64) -> io::Result<()> {
        self.out.write_all(&value.to_bits().to_le_bytes())
    }

    fn write_string(&mut self, value: &str) -> io::Result<()> {
        self.write_varint(value.len() as u64)?;
        self.out.write_all(value.as_bytes())
    }

    /// 1-based entity reference; the preamble lists entities in id order.
    fn write_index(&mut self, index: u32) -> io::Result<()> {
        self.write_varint(index as u64 + 1)
    }
}

struct CacheReader<R: Read> {
    input: R,
    phases: Vec<PhaseId>,
    metrics: Vec<MetricId>,
}

impl<R: Read> CacheReader<R> {
    fn read_byte(&mut self) -> Result<u8, CacheError> {
        let mut buf = [0u8; 1];
        self.input.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_varint(&mut self) -> Result<u64, CacheError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_byte()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(CacheError::Corrupt("varint overflow".to_string()));
            }
        }
    }

    fn read_zigzag(&mut self) -> Result<i64, CacheError> {
        let raw = self.read_varint()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }

    fn read_f64(&mut self) -> Result<f64, CacheError> {
        let mut buf = [0u8; 8];
        self.input.read_exact(&mut buf)?;
        Ok(f64::from_bits(u64::from_le_bytes(buf)))
    }

    fn read_string(&mut self) -> Result<String, CacheError> {
        let len = self.read_varint()? as usize;
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| CacheError::Corrupt("invalid string".to_string()))
    }

    fn read_len(&mut self, what: &str) -> Result<usize, CacheError> {
        let len = self.read_varint()?;
        if len > u32::MAX as u64 {
            return Err(CacheError::Corrupt(format!("implausible {what} count")));
        }
        Ok(len as usize)
    }

    fn read_phase(&mut self) -> Result<PhaseId, CacheError> {
        let index = self.read_varint()? as usize;
        if index == 0 || index > self.phases.len() {
            return Err(CacheError::Corrupt(format!("phase reference {index}")));
        }
        Ok(self.phases[index - 1])
    }

    fn read_metric(&mut self) -> Result<MetricId, CacheError> {
        let index = self.read_varint()? as usize;
        if index == 0 || index > self.metrics.len() {
            return Err(CacheError::Corrupt(format!("metric reference {index}")));
        }
        Ok(self.metrics[index - 1])
    }
}

/// Writes both model trees as (parent reference, name) pairs. The reader
/// walks the same pairs to re-resolve ids against its own models.
fn write_models<W: Write>(
    w: &mut CacheWriter<W>,
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
) -> io::Result<()> {
    let phase_types: Vec<_> = execution_model.phase_type_ids().collect();
    w.write_varint(phase_types.len() as u64)?;
    for id in phase_types {
        let node = execution_model.phase_type(id);
        match node.parent() {
            Some(parent) => w.write_index(parent.0)?,
            None => w.write_varint(0)?,
        }
        w.write_string(node.name())?;
    }

    let phases: Vec<_> = execution_model.phase_ids().collect();
    w.write_varint(phases.len() as u64)?;
    for id in phases {
        let node = execution_model.phase(id);
        match node.parent() {
            Some(parent) => w.write_index(parent.0)?,
            None => w.write_varint(0)?,
        }
        w.write_string(node.short_name())?;
    }

    let resource_types: Vec<_> = resource_model.resource_type_ids().collect();
    w.write_varint(resource_types.len() as u64)?;
    for id in resource_types {
        let node = resource_model.resource_type(id);
        match node.parent() {
            Some(parent) => w.write_index(parent.0)?,
            None => w.write_varint(0)?,
        }
        w.write_string(node.name())?;
    }

    let metric_types: Vec<_> = resource_model.metric_type_ids().collect();
    w.write_varint(metric_types.len() as u64)?;
    for id in metric_types {
        let node = resource_model.metric_type(id);
        w.write_index(node.resource_type().0)?;
        w.write_string(node.name())?;
    }

    let resources: Vec<_> = resource_model.resource_ids().collect();
    w.write_varint(resources.len() as u64)?;
    for id in resources {
        let node = resource_model.resource(id);
        match node.parent() {
            Some(parent) => w.write_index(parent.0)?,
            None => w.write_varint(0)?,
        }
        w.write_string(node.short_name())?;
    }

    let metrics: Vec<_> = resource_model.metric_ids().collect();
    w.write_varint(metrics.len() as u64)?;
    for id in metrics {
        let node = resource_model.metric(id);
        w.write_index(node.resource().0)?;
        w.write_string(node.name())?;
    }

    Ok(())
}

fn read_models<R: Read>(
    r: &mut CacheReader<R>,
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
) -> Result<(), CacheError> {
    // Phase types: resolved by name under the already-resolved parent.
    let num_phase_types = r.read_len("phase type")?;
    let mut phase_types = Vec::with_capacity(num_phase_types);
    for i in 0..num_phase_types {
        let parent_index = r.read_varint()? as usize;
        let name = r.read_string()?;
        if parent_index > i {
            return Err(CacheError::Corrupt(format!(
                "forward parent reference {parent_index}"
            )));
        }
        if parent_index == 0 {
            phase_types.push(execution_model.root_phase_type());
        } else {
            let parent = phase_types[parent_index - 1];
            let child = execution_model
                .phase_type(parent)
                .children()
                .iter()
                .copied()
                .find(|&c| execution_model.phase_type(c).name() == name)
                .ok_or(CacheError::Unresolved {
                    kind: "phase type",
                    name: name.clone(),
                })?;
            phase_types.push(child);
        }
    }

    let num_phases = r.read_len("phase")?;
    let mut phases = Vec::with_capacity(num_phases);
    for i in 0..num_phases {
        let parent_index = r.read_varint()? as usize;
        let name = r.read_string()?;
        if parent_index > i {
            return Err(CacheError::Corrupt(format!(
                "forward parent reference {parent_index}"
            )));
        }
        if parent_index == 0 {
            phases.push(execution_model.root_phase());
        } else {
            let parent = phases[parent_index - 1];
            let child = execution_model
                .resolve_phase(parent, &ModelPath::relative([name.as_str()]))
                .ok_or(CacheError::Unresolved {
                    kind: "phase",
                    name: name.clone(),
                })?;
            phases.push(child);
        }
    }

    let num_resource_types = r.read_len("resource type")?;
    let mut resource_types = Vec::with_capacity(num_resource_types);
    for i in 0..num_resource_types {
        let parent_index = r.read_varint()? as usize;
        let name = r.read_string()?;
        if parent_index > i {
            return Err(CacheError::Corrupt(format!(
                "forward parent reference {parent_index}"
            )));
        }
        if parent_index == 0 {
            resource_types.push(resource_model.root_resource_type());
        } else {
            let parent = resource_types[parent_index - 1];
            let child = resource_model
                .resource_type(parent)
                .children()
                .iter()
                .copied()
                .find(|&c| resource_model.resource_type(c).name() == name)
                .ok_or(CacheError::Unresolved {
                    kind: "resource type",
                    name: name.clone(),
                })?;
            resource_types.push(child);
        }
    }

    let num_metric_types = r.read_len("metric type")?;
    for _ in 0..num_metric_types {
        let parent_index = r.read_varint()? as usize;
        let name = r.read_string()?;
        if parent_index == 0 || parent_index > resource_types.len() {
            return Err(CacheError::Corrupt(format!(
                "resource type reference {parent_index}"
            )));
        }
        resource_model
            .resource_type(resource_types[parent_index - 1])
            .metric_type_named(&name)
            .ok_or(CacheError::Unresolved {
                kind: "metric type",
                name: name.clone(),
            })?;
    }

    let num_resources = r.read_len("resource")?;
    let mut resources = Vec::with_capacity(num_resources);
    for i in 0..num_resources {
        let parent_index = r.read_varint()? as usize;
        let name = r.read_string()?;
        if parent_index > i {
            return Err(CacheError::Corrupt(format!(
                "forward parent reference {parent_index}"
            )));
        }
        if parent_index == 0 {
            resources.push(resource_model.root_resource());
        } else {
            let parent = resources[parent_index - 1];
            let child = resource_model
                .resolve_resource(parent, &ModelPath::relative([name.as_str()]))
                .ok_or(CacheError::Unresolved {
                    kind: "resource",
                    name: name.clone(),
                })?;
            resources.push(child);
        }
    }

    let num_metrics = r.read_len("metric")?;
    let mut metrics = Vec::with_capacity(num_metrics);
    for _ in 0..num_metrics {
        let parent_index = r.read_varint()? as usize;
        let name = r.read_string()?;
        if parent_index == 0 || parent_index > resources.len() {
            return Err(CacheError::Corrupt(format!(
                "resource reference {parent_index}"
            )));
        }
        let metric = resource_model
            .resource(resources[parent_index - 1])
            .metric_named(&name)
            .ok_or(CacheError::Unresolved {
                kind: "metric",
                name: name.clone(),
            })?;
        metrics.push(metric);
    }

    r.phases = phases;
    r.metrics = metrics;
    Ok(())
}

fn write_active_phases<W: Write>(
    w: &mut CacheWriter<W>,
    active_phases: &ActivePhases,
) -> io::Result<()> {
    let mut entries: Vec<_> = active_phases.parts().iter().collect();
    entries.sort_by_key(|(phase, _)| phase.0);
    w.write_varint(entries.len() as u64)?;
    for (phase, slices) in entries {
        w.write_index(phase.0)?;
        w.write_varint(slices.periods().len() as u64)?;
        for period in slices.periods() {
            w.write_zigzag(period.first)?;
            w.write_varint((period.last - period.first) as u64)?;
        }
    }
    Ok(())
}

fn read_active_phases<R: Read>(r: &mut CacheReader<R>) -> Result<ActivePhases, CacheError> {
    let num_phases = r.read_len("active phase")?;
    let mut active_slices = FnvHashMap::default();
    for _ in 0..num_phases {
        let phase = r.read_phase()?;
        let num_periods = r.read_len("period")?;
        let mut periods = Vec::with_capacity(num_periods);
        for _ in 0..num_periods {
            let first = r.read_zigzag()?;
            let delta = r.read_varint()? as i64;
            periods.push(Period::new(first, first + delta));
        }
        active_slices.insert(phase, PeriodList::new(periods));
    }
    Ok(ActivePhases::from_parts(active_slices))
}

fn write_loads<W: Write>(w: &mut CacheWriter<W>, loads: &MetricLoads) -> io::Result<()> {
    let num_slices = loads.end_slice() - loads.start_slice() + 1;
    w.write_zigzag(loads.start_slice())?;
    w.write_varint(num_slices as u64)?;

    let mut metrics: Vec<_> = loads.metrics().collect();
    metrics.sort_by_key(|m| m.0);
    w.write_varint(metrics.len() as u64)?;
    for metric in metrics {
        w.write_index(metric.0)?;
        for &load in loads.greedy_array(metric) {
            w.write_f64(load)?;
        }
        for &count in loads.sink_array(metric) {
            w.write_varint(count as u64)?;
        }
    }
    Ok(())
}

fn read_loads<R: Read>(r: &mut CacheReader<R>) -> Result<MetricLoads, CacheError> {
    let start_slice = r.read_zigzag()?;
    let num_slices = r.read_len("slice")?;
    let end_slice = start_slice + num_slices as i64 - 1;

    let num_metrics = r.read_len("metric")?;
    let mut greedy = FnvHashMap::default();
    let mut sink = FnvHashMap::default();
    for _ in 0..num_metrics {
        let metric = r.read_metric()?;
        let mut greedy_loads = Vec::with_capacity(num_slices);
        for _ in 0..num_slices {
            greedy_loads.push(r.read_f64()?);
        }
        let mut sink_loads = Vec::with_capacity(num_slices);
        for _ in 0..num_slices {
            let count = r.read_varint()?;
            if count > i32::MAX as u64 {
                return Err(CacheError::Corrupt("sink load overflow".to_string()));
            }
            sink_loads.push(count as i32);
        }
        greedy.insert(metric, greedy_loads);
        sink.insert(metric, sink_loads);
    }
    Ok(MetricLoads::from_parts(greedy, sink, start_slice, end_slice))
}

fn write_samples<W: Write>(w: &mut CacheWriter<W>, samples: &MetricSamples) -> io::Result<()> {
    let num_slices = samples.end_slice() - samples.start_slice() + 1;
    w.write_zigzag(samples.start_slice())?;
    w.write_varint(num_slices as u64)?;

    let mut metrics: Vec<_> = samples.metrics().collect();
    metrics.sort_by_key(|m| m.0);
    w.write_varint(metrics.len() as u64)?;
    for metric in metrics {
        w.write_index(metric.0)?;
        for &sample in samples.sample_array(metric) {
            w.write_f64(sample)?;
        }
    }
    Ok(())
}

fn read_samples<R: Read>(r: &mut CacheReader<R>) -> Result<MetricSamples, CacheError> {
    let start_slice = r.read_zigzag()?;
    let num_slices = r.read_len("slice")?;
    let end_slice = start_slice + num_slices as i64 - 1;

    let num_metrics = r.read_len("metric")?;
    let mut samples = FnvHashMap::default();
    for _ in 0..num_metrics {
        let metric = r.read_metric()?;
        let mut values = Vec::with_capacity(num_slices);
        for _ in 0..num_slices {
            values.push(r.read_f64()?);
        }
        samples.insert(metric, values);
    }
    Ok(MetricSamples::from_parts(samples, start_slice, end_slice))
}

fn write_rule<W: Write>(w: &mut CacheWriter<W>, rule: ConsumableRule) -> io::Result<()> {
    match rule {
        ConsumableRule::None => w.write_byte(0),
        ConsumableRule::Sink => w.write_byte(1),
        ConsumableRule::Greedy { max_rate } => {
            w.write_byte(2)?;
            w.write_f64(max_rate)
        }
    }
}

fn read_rule<R: Read>(r: &mut CacheReader<R>) -> Result<ConsumableRule, CacheError> {
    match r.read_byte()? {
        0 => Ok(ConsumableRule::None),
        1 => Ok(ConsumableRule::Sink),
        2 => Ok(ConsumableRule::Greedy {
            max_rate: r.read_f64()?,
        }),
        tag => Err(CacheError::Corrupt(format!("unknown rule tag {tag}"))),
    }
}

fn write_metric_list<W: Write>(w: &mut CacheWriter<W>, metrics: &[MetricId]) -> io::Result<()> {
    let mut sorted = metrics.to_vec();
    sorted.sort_by_key(|m| m.0);
    w.write_varint(sorted.len() as u64)?;
    for metric in sorted {
        w.write_index(metric.0)?;
    }
    Ok(())
}

fn read_metric_list<R: Read>(r: &mut CacheReader<R>) -> Result<Vec<MetricId>, CacheError> {
    let len = r.read_len("metric")?;
    let mut metrics = Vec::with_capacity(len);
    for _ in 0..len {
        metrics.push(r.read_metric()?);
    }
    Ok(metrics)
}

fn write_step<W: Write>(w: &mut CacheWriter<W>, step: &AttributionStepResult) -> io::Result<()> {
    let mut phases: Vec<_> = step.phases().collect();
    phases.sort_by_key(|p| p.0);
    w.write_varint(phases.len() as u64)?;
    for phase in phases {
        let attribution = step.get(phase);
        w.write_index(phase.0)?;
        write_metric_list(w, &attribution.blocking_metrics)?;
        write_metric_list(w, &attribution.unused_blocking_metrics)?;
        write_metric_list(w, &attribution.unused_consumable_metrics)?;

        let mut consumable: Vec<_> = attribution.consumable_rules().iter().collect();
        consumable.sort_by_key(|(metric, _)| metric.0);
        w.write_varint(consumable.len() as u64)?;
        for (metric, &rule) in consumable {
            w.write_index(metric.0)?;
            write_rule(w, rule)?;
        }
    }
    Ok(())
}

fn read_step<R: Read>(r: &mut CacheReader<R>) -> Result<AttributionStepResult, CacheError> {
    let num_phases = r.read_len("phase result")?;
    let mut phase_results = FnvHashMap::default();
    for _ in 0..num_phases {
        let phase = r.read_phase()?;
        let blocking_metrics = read_metric_list(r)?;
        let unused_blocking_metrics = read_metric_list(r)?;
        let unused_consumable_metrics = read_metric_list(r)?;

        let num_consumable = r.read_len("consumable rule")?;
        let mut consumable_rules = FnvHashMap::default();
        for _ in 0..num_consumable {
            let metric = r.read_metric()?;
            consumable_rules.insert(metric, read_rule(r)?);
        }

        phase_results.insert(
            phase,
            PhaseAttribution::from_parts(
                phase,
                blocking_metrics,
                unused_blocking_metrics,
                unused_consumable_metrics,
                consumable_rules,
            ),
        );
    }
    Ok(AttributionStepResult::from_parts(phase_results))
}

/// Serializes a full attribution result to `path`, gzip-compressed.
pub fn write_attribution_cache(
    path: &Path,
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
    result: &AttributionResult,
) -> Result<(), CacheError> {
    let file = File::create(path)?;
    let mut w = CacheWriter {
        out: GzEncoder::new(BufWriter::new(file), Compression::default()),
    };

    w.write_varint(MODEL_FORMAT_VERSION)?;
    write_models(&mut w, execution_model, resource_model)?;
    w.write_varint(RESULT_FORMAT_VERSION)?;
    write_active_phases(&mut w, &result.active_phases)?;
    write_loads(&mut w, &result.loads)?;
    write_samples(&mut w, &result.samples)?;
    write_step(&mut w, &result.step)?;

    w.out.finish()?.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}

/// Reads an attribution result from `path`, re-resolving every entity
/// reference against the given models.
pub fn read_attribution_cache(
    path: &Path,
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
) -> Result<AttributionResult, CacheError> {
    let file = File::open(path)?;
    let mut r = CacheReader {
        input: GzDecoder::new(BufReader::new(file)),
        phases: Vec::new(),
        metrics: Vec::new(),
    };

    let model_version = r.read_varint()?;
    if model_version != MODEL_FORMAT_VERSION {
        return Err(CacheError::UnsupportedVersion(model_version));
    }
    read_models(&mut r, execution_model, resource_model)?;

    let result_version = r.read_varint()?;
    if result_version != RESULT_FORMAT_VERSION {
        return Err(CacheError::UnsupportedVersion(result_version));
    }
    let active_phases = read_active_phases(&mut r)?;
    let loads = read_loads(&mut r)?;
    let samples = read_samples(&mut r)?;
    let step = read_step(&mut r)?;

    Ok(AttributionResult {
        active_phases,
        loads,
        samples,
        step,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ExecutionModelBuilder, MetricClass, MetricKind, Repeatability, ResourceModelBuilder,
    };
    use crate::metrics::RateObservations;

    #[test]
    fn varints_round_trip() {
        let mut buffer = Vec::new();
        let mut w = CacheWriter { out: &mut buffer };
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            w.write_varint(value).unwrap();
        }
        for value in [0i64, -1, 1, i64::MIN, i64::MAX] {
            w.write_zigzag(value).unwrap();
        }

        let mut r = CacheReader {
            input: &buffer[..],
            phases: Vec::new(),
            metrics: Vec::new(),
        };
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            assert_eq!(r.read_varint().unwrap(), value);
        }
        for value in [0i64, -1, 1, i64::MIN, i64::MAX] {
            assert_eq!(r.read_zigzag().unwrap(), value);
        }
    }

    fn test_models() -> (ExecutionModel, ResourceModel) {
        let mut builder = ExecutionModelBuilder::new();
        let work = builder
            .add_phase_type(
                builder.root_phase_type(),
                "work",
                Repeatability::concurrent("worker"),
            )
            .unwrap();
        let root = builder.add_root_phase(0, 9).unwrap();
        builder.add_phase(root, work, "0", 0, 4).unwrap();
        builder.add_phase(root, work, "1", 5, 9).unwrap();
        let execution_model = builder.build().unwrap();

        let mut builder = ResourceModelBuilder::new();
        let machine = builder
            .add_resource_type(
                builder.root_resource_type(),
                "machine",
                Repeatability::NonRepeated,
            )
            .unwrap();
        let cpu_type = builder
            .add_metric_type(machine, "cpu", MetricClass::Consumable)
            .unwrap();
        let machine_0 = builder
            .add_resource(builder.root_resource(), machine, "")
            .unwrap();
        builder
            .add_metric(
                machine_0,
                cpu_type,
                MetricKind::Consumable {
                    observations: RateObservations::new(vec![0, 10_000_000], vec![2.0])
                        .unwrap(),
                    capacity: 4.0,
                },
            )
            .unwrap();
        let resource_model = builder.build().unwrap();

        (execution_model, resource_model)
    }

    #[test]
    fn cache_round_trips_through_disk() {
        let (execution_model, resource_model) = test_models();
        let phase_0 = execution_model
            .resolve_phase(
                execution_model.root_phase(),
                &ModelPath::parse("/work[worker=0]"),
            )
            .unwrap();
        let cpu = resource_model
            .resolve_metric(&ModelPath::parse("/machine/cpu"))
            .unwrap();

        let mut active_slices = FnvHashMap::default();
        active_slices.insert(phase_0, PeriodList::new(vec![Period::new(0, 3)]));
        let mut greedy = FnvHashMap::default();
        greedy.insert(cpu, vec![1.5, 0.0, 2.0, 0.5]);
        let mut sink = FnvHashMap::default();
        sink.insert(cpu, vec![0, 1, 2, 0]);
        let mut samples = FnvHashMap::default();
        samples.insert(cpu, vec![2.0, 2.0, 1.0, 0.0]);
        let mut rules = FnvHashMap::default();
        rules.insert(cpu, ConsumableRule::greedy(1.5));
        let mut phase_results = FnvHashMap::default();
        phase_results.insert(
            phase_0,
            PhaseAttribution::from_parts(phase_0, vec![], vec![], vec![], rules),
        );

        let result = AttributionResult {
            active_phases: ActivePhases::from_parts(active_slices),
            loads: MetricLoads::from_parts(greedy, sink, 0, 3),
            samples: MetricSamples::from_parts(samples, 0, 3),
            step: AttributionStepResult::from_parts(phase_results),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ATTRIBUTION_CACHE_FILENAME);
        write_attribution_cache(&path, &execution_model, &resource_model, &result).unwrap();

        let restored =
            read_attribution_cache(&path, &execution_model, &resource_model).unwrap();
        assert_eq!(
            restored.active_phases.active_slices(phase_0),
            result.active_phases.active_slices(phase_0)
        );
        assert_eq!(restored.loads.greedy_array(cpu), &[1.5, 0.0, 2.0, 0.5]);
        assert_eq!(restored.loads.sink_array(cpu), &[0, 1, 2, 0]);
        assert_eq!(restored.samples.sample_array(cpu), &[2.0, 2.0, 1.0, 0.0]);
        let attribution = restored.step.get(phase_0);
        assert_eq!(
            attribution.rule(cpu),
            ConsumableRule::Greedy { max_rate: 1.5 }
        );
        assert!(attribution.blocking_metrics.is_empty());
    }

    #[test]
    fn read_rejects_mismatched_models() {
        let (execution_model, resource_model) = test_models();
        let result = AttributionResult {
            active_phases: ActivePhases::from_parts(FnvHashMap::default()),
            loads: MetricLoads::from_parts(FnvHashMap::default(), FnvHashMap::default(), 0, 0),
            samples: MetricSamples::from_parts(FnvHashMap::default(), 0, 0),
            step: AttributionStepResult::from_parts(FnvHashMap::default()),
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ATTRIBUTION_CACHE_FILENAME);
        write_attribution_cache(&path, &execution_model, &resource_model, &result).unwrap();

        // A model missing the cached phases must be rejected.
        let mut builder = ExecutionModelBuilder::new();
        builder.add_root_phase(0, 9).unwrap();
        let other_model = builder.build().unwrap();
        let err = read_attribution_cache(&path, &other_model, &resource_model).unwrap_err();
        assert!(matches!(err, CacheError::Unresolved { .. }));
    }
}
