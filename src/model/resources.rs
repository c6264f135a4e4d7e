//! The resource model: a schema tree of resource types with per-type metric
//! types, plus a tree of resource instances carrying concrete metrics.

use std::collections::HashMap;

use crate::metrics::RateObservations;
use crate::model::{
    derive_instance_name, is_short_instance_name, is_valid_instance_id, ModelError, Repeatability,
};
use crate::path::ModelPath;
use crate::period::PeriodList;
use crate::timeslice::TimeSliceId;

/// Arena id of a [`ResourceType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceTypeId(pub u32);

/// Arena id of a [`MetricType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricTypeId(pub u32);

/// Arena id of a [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u32);

/// Arena id of a [`Metric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricId(pub u32);

/// Whether a metric measures consumption of a divisible capacity or binary
/// blocked time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricClass {
    Consumable,
    Blocking,
}

/// A node of the resource-type schema tree.
#[derive(Debug)]
pub struct ResourceType {
    name: String,
    description: String,
    parent: Option<ResourceTypeId>,
    children: Vec<ResourceTypeId>,
    children_by_name: HashMap<String, ResourceTypeId>,
    metric_types: Vec<MetricTypeId>,
    metric_types_by_name: HashMap<String, MetricTypeId>,
    repeatability: Repeatability,
    path: ModelPath,
}

impl ResourceType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parent(&self) -> Option<ResourceTypeId> {
        self.parent
    }

    pub fn children(&self) -> &[ResourceTypeId] {
        &self.children
    }

    pub fn metric_types(&self) -> &[MetricTypeId] {
        &self.metric_types
    }

    pub fn metric_type_named(&self, name: &str) -> Option<MetricTypeId> {
        self.metric_types_by_name.get(name).copied()
    }

    pub fn repeatability(&self) -> &Repeatability {
        &self.repeatability
    }

    pub fn path(&self) -> &ModelPath {
        &self.path
    }
}

/// The kind of metric a [`MetricType`] describes. Every instance of the type
/// must carry data of the matching class.
#[derive(Debug)]
pub struct MetricType {
    name: String,
    resource_type: ResourceTypeId,
    class: MetricClass,
    path: ModelPath,
}

impl MetricType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_type(&self) -> ResourceTypeId {
        self.resource_type
    }

    pub fn class(&self) -> MetricClass {
        self.class
    }

    /// The owning resource type's path extended with the metric-type name.
    pub fn path(&self) -> &ModelPath {
        &self.path
    }
}

/// One instance of a [`ResourceType`].
#[derive(Debug)]
pub struct Resource {
    resource_type: ResourceTypeId,
    parent: Option<ResourceId>,
    children: Vec<ResourceId>,
    children_by_name: HashMap<String, ResourceId>,
    children_by_short_name: HashMap<String, ResourceId>,
    metrics: Vec<MetricId>,
    metrics_by_name: HashMap<String, MetricId>,
    name: String,
    short_name: String,
    instance_id: String,
    path: ModelPath,
}

impl Resource {
    pub fn resource_type(&self) -> ResourceTypeId {
        self.resource_type
    }

    pub fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    pub fn children(&self) -> &[ResourceId] {
        &self.children
    }

    pub fn metrics(&self) -> &[MetricId] {
        &self.metrics
    }

    pub fn metric_named(&self, name: &str) -> Option<MetricId> {
        self.metrics_by_name.get(name).copied()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn path(&self) -> &ModelPath {
        &self.path
    }
}

/// The recorded data of one metric instance.
#[derive(Debug)]
pub enum MetricKind {
    /// Usage rates over time against a fixed capacity (e.g. bytes/s of disk
    /// bandwidth).
    Consumable {
        observations: RateObservations,
        capacity: f64,
    },
    /// Slices during which the metric blocked progress entirely (e.g. GC
    /// pauses).
    Blocking { blocked_slices: PeriodList },
}

impl MetricKind {
    pub fn class(&self) -> MetricClass {
        match self {
            MetricKind::Consumable { .. } => MetricClass::Consumable,
            MetricKind::Blocking { .. } => MetricClass::Blocking,
        }
    }
}

/// One metric instance attached to a [`Resource`].
#[derive(Debug)]
pub struct Metric {
    metric_type: MetricTypeId,
    resource: ResourceId,
    name: String,
    kind: MetricKind,
    path: ModelPath,
}

impl Metric {
    pub fn metric_type(&self) -> MetricTypeId {
        self.metric_type
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &MetricKind {
        &self.kind
    }

    pub fn class(&self) -> MetricClass {
        self.kind.class()
    }

    /// Capacity of a consumable metric; zero for blocking metrics.
    pub fn capacity(&self) -> f64 {
        match &self.kind {
            MetricKind::Consumable { capacity, .. } => *capacity,
            MetricKind::Blocking { .. } => 0.0,
        }
    }

    pub fn path(&self) -> &ModelPath {
        &self.path
    }
}

/// The immutable resource hierarchy of one job, plus its schema.
#[derive(Debug)]
pub struct ResourceModel {
    resource_types: Vec<ResourceType>,
    metric_types: Vec<MetricType>,
    resources: Vec<Resource>,
    metrics: Vec<Metric>,
}

impl ResourceModel {
    pub fn builder() -> ResourceModelBuilder {
        ResourceModelBuilder::new()
    }

    pub fn root_resource_type(&self) -> ResourceTypeId {
        ResourceTypeId(0)
    }

    pub fn root_resource(&self) -> ResourceId {
        ResourceId(0)
    }

    pub fn resource_type(&self, id: ResourceTypeId) -> &ResourceType {
        &self.resource_types[id.0 as usize]
    }

    pub fn metric_type(&self, id: MetricTypeId) -> &MetricType {
        &self.metric_types[id.0 as usize]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.0 as usize]
    }

    pub fn metric(&self, id: MetricId) -> &Metric {
        &self.metrics[id.0 as usize]
    }

    pub fn num_metrics(&self) -> usize {
        self.metrics.len()
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = ResourceId> {
        (0..self.resources.len() as u32).map(ResourceId)
    }

    pub fn resource_type_ids(&self) -> impl Iterator<Item = ResourceTypeId> {
        (0..self.resource_types.len() as u32).map(ResourceTypeId)
    }

    pub fn metric_type_ids(&self) -> impl Iterator<Item = MetricTypeId> {
        (0..self.metric_types.len() as u32).map(MetricTypeId)
    }

    pub fn metric_ids(&self) -> impl Iterator<Item = MetricId> {
        (0..self.metrics.len() as u32).map(MetricId)
    }

    /// All metrics attached to `resource` or any of its descendants.
    pub fn metrics_under(&self, resource: ResourceId) -> Vec<MetricId> {
        let mut result = Vec::new();
        let mut stack = vec![resource];
        while let Some(id) = stack.pop() {
            let node = self.resource(id);
            result.extend_from_slice(node.metrics());
            stack.extend_from_slice(node.children());
        }
        result
    }

    /// Resolves an absolute or relative path to a resource, starting from
    /// the root or from `base` respectively.
    pub fn resolve_resource(&self, base: ResourceId, path: &ModelPath) -> Option<ResourceId> {
        let mut current = if path.is_absolute() {
            self.root_resource()
        } else {
            base
        };
        for component in path.components() {
            current = match component.as_str() {
                "." => current,
                ".." => self.resource(current).parent()?,
                name => {
                    let resource = self.resource(current);
                    if is_short_instance_name(name) {
                        *resource.children_by_short_name.get(name)?
                    } else {
                        *resource.children_by_name.get(name)?
                    }
                }
            };
        }
        Some(current)
    }

    /// Resolves an absolute path whose last component names a metric of the
    /// resource the preceding components identify.
    pub fn resolve_metric(&self, path: &ModelPath) -> Option<MetricId> {
        let components = path.components();
        let (metric_name, resource_components) = components.split_last()?;
        let resource_path = if path.is_absolute() {
            ModelPath::absolute(resource_components.iter().cloned())
        } else {
            ModelPath::relative(resource_components.iter().cloned())
        };
        let resource = self.resolve_resource(self.root_resource(), &resource_path)?;
        self.resource(resource).metric_named(metric_name)
    }

    /// Resolves an absolute path to a resource type.
    pub fn resolve_resource_type(&self, path: &ModelPath) -> Option<ResourceTypeId> {
        let mut current = self.root_resource_type();
        for component in path.components() {
            current = *self
                .resource_type(current)
                .children_by_name
                .get(component.as_str())?;
        }
        Some(current)
    }

    /// Resolves an absolute path whose last component names a metric type of
    /// the resource type the preceding components identify.
    pub fn resolve_metric_type(&self, path: &ModelPath) -> Option<MetricTypeId> {
        let components = path.components();
        let (name, type_components) = components.split_last()?;
        let type_path = ModelPath::absolute(type_components.iter().cloned());
        let resource_type = self.resolve_resource_type(&type_path)?;
        self.resource_type(resource_type).metric_type_named(name)
    }
}

/// Staged construction of a [`ResourceModel`].
pub struct ResourceModelBuilder {
    resource_types: Vec<ResourceType>,
    metric_types: Vec<MetricType>,
    resources: Vec<Resource>,
    metrics: Vec<Metric>,
}

impl ResourceModelBuilder {
    pub fn new() -> Self {
        let root_type = ResourceType {
            name: String::new(),
            description: String::new(),
            parent: None,
            children: Vec::new(),
            children_by_name: HashMap::new(),
            metric_types: Vec::new(),
            metric_types_by_name: HashMap::new(),
            repeatability: Repeatability::NonRepeated,
            path: ModelPath::root(),
        };
        let root = Resource {
            resource_type: ResourceTypeId(0),
            parent: None,
            children: Vec::new(),
            children_by_name: HashMap::new(),
            children_by_short_name: HashMap::new(),
            metrics: Vec::new(),
            metrics_by_name: HashMap::new(),
            name: String::new(),
            short_name: String::new(),
            instance_id: String::new(),
            path: ModelPath::root(),
        };
        ResourceModelBuilder {
            resource_types: vec![root_type],
            metric_types: Vec::new(),
            resources: vec![root],
            metrics: Vec::new(),
        }
    }

    pub fn root_resource_type(&self) -> ResourceTypeId {
        ResourceTypeId(0)
    }

    pub fn root_resource(&self) -> ResourceId {
        ResourceId(0)
    }

    pub fn add_resource_type(
        &mut self,
        parent: ResourceTypeId,
        name: &str,
        repeatability: Repeatability,
    ) -> Result<ResourceTypeId, ModelError> {
        self.add_resource_type_described(parent, name, repeatability, "")
    }

    pub fn add_resource_type_described(
        &mut self,
        parent: ResourceTypeId,
        name: &str,
        repeatability: Repeatability,
        description: &str,
    ) -> Result<ResourceTypeId, ModelError> {
        let parent_node = &self.resource_types[parent.0 as usize];
        if parent_node.children_by_name.contains_key(name) {
            return Err(ModelError::DuplicateName {
                parent: parent_node.path.to_string(),
                name: name.to_string(),
            });
        }
        let path = parent_node.path.join(name);
        let id = ResourceTypeId(self.resource_types.len() as u32);
        self.resource_types.push(ResourceType {
            name: name.to_string(),
            description: description.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            children_by_name: HashMap::new(),
            metric_types: Vec::new(),
            metric_types_by_name: HashMap::new(),
            repeatability,
            path,
        });
        let parent_node = &mut self.resource_types[parent.0 as usize];
        parent_node.children.push(id);
        parent_node.children_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declares a metric type on a resource type. Metric-type names share
    /// the child namespace of the owning resource type.
    pub fn add_metric_type(
        &mut self,
        resource_type: ResourceTypeId,
        name: &str,
        class: MetricClass,
    ) -> Result<MetricTypeId, ModelError> {
        let owner = &self.resource_types[resource_type.0 as usize];
        if owner.metric_types_by_name.contains_key(name)
            || owner.children_by_name.contains_key(name)
        {
            return Err(ModelError::DuplicateName {
                parent: owner.path.to_string(),
                name: name.to_string(),
            });
        }
        let path = owner.path.join(name);
        let id = MetricTypeId(self.metric_types.len() as u32);
        self.metric_types.push(MetricType {
            name: name.to_string(),
            resource_type,
            class,
            path,
        });
        let owner = &mut self.resource_types[resource_type.0 as usize];
        owner.metric_types.push(id);
        owner.metric_types_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn add_resource(
        &mut self,
        parent: ResourceId,
        resource_type: ResourceTypeId,
        instance_id: &str,
    ) -> Result<ResourceId, ModelError> {
        let type_node = &self.resource_types[resource_type.0 as usize];
        let parent_node = &self.resources[parent.0 as usize];
        if type_node.parent != Some(parent_node.resource_type) {
            return Err(ModelError::TypeParentMismatch {
                phase_type: type_node.path.to_string(),
                parent_type: self.resource_types[parent_node.resource_type.0 as usize]
                    .path
                    .to_string(),
            });
        }
        let repeatable = type_node.repeatability.is_repeatable();
        if (repeatable && !is_valid_instance_id(instance_id))
            || (!repeatable && !instance_id.is_empty())
        {
            return Err(ModelError::InvalidInstanceId {
                path: type_node.path.to_string(),
                instance_id: instance_id.to_string(),
            });
        }

        let name = derive_instance_name(
            &type_node.name,
            &type_node.repeatability,
            instance_id,
            true,
        );
        let short_name = derive_instance_name(
            &type_node.name,
            &type_node.repeatability,
            instance_id,
            false,
        );
        if parent_node.children_by_name.contains_key(&name)
            || parent_node.children_by_short_name.contains_key(&short_name)
        {
            return Err(ModelError::DuplicateName {
                parent: parent_node.path.to_string(),
                name,
            });
        }

        let path = parent_node.path.join(&name);
        let id = ResourceId(self.resources.len() as u32);
        self.resources.push(Resource {
            resource_type,
            parent: Some(parent),
            children: Vec::new(),
            children_by_name: HashMap::new(),
            children_by_short_name: HashMap::new(),
            metrics: Vec::new(),
            metrics_by_name: HashMap::new(),
            name: name.clone(),
            short_name: short_name.clone(),
            instance_id: instance_id.to_string(),
            path,
        });
        let parent_node = &mut self.resources[parent.0 as usize];
        parent_node.children.push(id);
        parent_node.children_by_name.insert(name, id);
        parent_node.children_by_short_name.insert(short_name, id);
        Ok(id)
    }

    /// Attaches a metric instance to a resource. The metric's data class
    /// must match the class declared by its type.
    pub fn add_metric(
        &mut self,
        resource: ResourceId,
        metric_type: MetricTypeId,
        kind: MetricKind,
    ) -> Result<MetricId, ModelError> {
        let type_node = &self.metric_types[metric_type.0 as usize];
        let resource_node = &self.resources[resource.0 as usize];
        if type_node.resource_type != resource_node.resource_type {
            return Err(ModelError::TypeParentMismatch {
                phase_type: type_node.path.to_string(),
                parent_type: self.resource_types[resource_node.resource_type.0 as usize]
                    .path
                    .to_string(),
            });
        }
        if kind.class() != type_node.class {
            return Err(ModelError::MetricClassMismatch {
                metric: resource_node.path.join(&type_node.name).to_string(),
                metric_type: type_node.path.to_string(),
            });
        }
        let name = type_node.name.clone();
        if resource_node.metrics_by_name.contains_key(&name) {
            return Err(ModelError::DuplicateName {
                parent: resource_node.path.to_string(),
                name,
            });
        }
        let path = resource_node.path.join(&name);
        let id = MetricId(self.metrics.len() as u32);
        self.metrics.push(Metric {
            metric_type,
            resource,
            name: name.clone(),
            kind,
            path,
        });
        let resource_node = &mut self.resources[resource.0 as usize];
        resource_node.metrics.push(id);
        resource_node.metrics_by_name.insert(name, id);
        Ok(id)
    }

    pub fn build(self) -> Result<ResourceModel, ModelError> {
        Ok(ResourceModel {
            resource_types: self.resource_types,
            metric_types: self.metric_types,
            resources: self.resources,
            metrics: self.metrics,
        })
    }
}

impl Default for ResourceModelBuilder {
    fn default() -> Self {
        ResourceModelBuilder::new()
    }
}

/// First and last time slice covered by any consumable observation or
/// blocking period in the model, or `None` if no metric carries data.
pub fn metric_slice_range(model: &ResourceModel) -> Option<(TimeSliceId, TimeSliceId)> {
    let mut range: Option<(TimeSliceId, TimeSliceId)> = None;
    for id in model.metric_ids() {
        let bounds = match model.metric(id).kind() {
            MetricKind::Consumable { observations, .. } => {
                if observations.num_observations() == 0 {
                    continue;
                }
                (observations.first_slice(), observations.last_slice())
            }
            MetricKind::Blocking { blocked_slices } => {
                let periods = blocked_slices.periods();
                match (periods.first(), periods.last()) {
                    (Some(first), Some(last)) => (first.first, last.last),
                    _ => continue,
                }
            }
        };
        range = Some(match range {
            None => bounds,
            Some((lo, hi)) => (lo.min(bounds.0), hi.max(bounds.1)),
        });
    }
    range
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeslice::NANOSECONDS_PER_SLICE;

    fn observations(slices: i64, rate: f64) -> RateObservations {
        RateObservations::new(vec![0, slices * NANOSECONDS_PER_SLICE], vec![rate]).unwrap()
    }

    fn machine_model() -> (ResourceModel, MetricId, MetricId) {
        let mut builder = ResourceModelBuilder::new();
        let root = builder.root_resource_type();
        let machine = builder
            .add_resource_type(root, "machine", Repeatability::concurrent("host"))
            .unwrap();
        let disk = builder
            .add_resource_type(machine, "disk", Repeatability::concurrent("dev"))
            .unwrap();
        let read_bw = builder
            .add_metric_type(disk, "read-bandwidth", MetricClass::Consumable)
            .unwrap();
        let gc = builder
            .add_metric_type(machine, "gc", MetricClass::Blocking)
            .unwrap();

        let m0 = builder
            .add_resource(builder.root_resource(), machine, "node0")
            .unwrap();
        let d0 = builder.add_resource(m0, disk, "sda").unwrap();
        let bw_metric = builder
            .add_metric(
                d0,
                read_bw,
                MetricKind::Consumable {
                    observations: observations(10, 100.0),
                    capacity: 200.0,
                },
            )
            .unwrap();
        let gc_metric = builder
            .add_metric(
                m0,
                gc,
                MetricKind::Blocking {
                    blocked_slices: PeriodList::from_period(crate::period::Period::new(2, 4)),
                },
            )
            .unwrap();
        (builder.build().unwrap(), bw_metric, gc_metric)
    }

    #[test]
    fn resolves_metric_paths() {
        let (model, bw, gc) = machine_model();
        assert_eq!(
            model.resolve_metric(&ModelPath::parse(
                "/machine[host=node0]/disk[dev=sda]/read-bandwidth"
            )),
            Some(bw)
        );
        assert_eq!(
            model.resolve_metric(&ModelPath::parse("/machine[node0]/gc")),
            Some(gc)
        );
        assert_eq!(
            model.resolve_metric_type(&ModelPath::parse("/machine/disk/read-bandwidth")),
            Some(model.metric(bw).metric_type())
        );
    }

    #[test]
    fn collects_metrics_in_subtree() {
        let (model, bw, gc) = machine_model();
        let mut under_root = model.metrics_under(model.root_resource());
        under_root.sort();
        assert_eq!(under_root, vec![bw.min(gc), bw.max(gc)]);

        let machine = model
            .resolve_resource(model.root_resource(), &ModelPath::parse("/machine[node0]"))
            .unwrap();
        let disk = model
            .resolve_resource(machine, &ModelPath::parse("disk[sda]"))
            .unwrap();
        assert_eq!(model.metrics_under(disk), vec![bw]);
    }

    #[test]
    fn rejects_class_mismatch() {
        let mut builder = ResourceModelBuilder::new();
        let root = builder.root_resource_type();
        let machine = builder
            .add_resource_type(root, "machine", Repeatability::NonRepeated)
            .unwrap();
        let cpu = builder
            .add_metric_type(machine, "cpu", MetricClass::Consumable)
            .unwrap();
        let m = builder
            .add_resource(builder.root_resource(), machine, "")
            .unwrap();
        let err = builder.add_metric(
            m,
            cpu,
            MetricKind::Blocking {
                blocked_slices: PeriodList::empty(),
            },
        );
        assert!(matches!(err, Err(ModelError::MetricClassMismatch { .. })));
    }

    #[test]
    fn metric_slice_range_spans_all_metrics() {
        let (model, _, _) = machine_model();
        assert_eq!(metric_slice_range(&model), Some((0, 9)));
    }
}
