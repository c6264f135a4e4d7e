//! The execution model: a schema tree of phase types plus a tree of phase
//! instances, each spanning a closed time-slice range.

use std::collections::HashMap;

use crate::model::{
    derive_instance_name, is_short_instance_name, is_valid_instance_id, ModelError,
};
use crate::path::ModelPath;
use crate::period::Period;
use crate::timeslice::{TimeSliceCount, TimeSliceId};
use crate::util::topological_sort;

/// Arena id of a [`PhaseType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseTypeId(pub u32);

/// Arena id of a [`Phase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhaseId(pub u32);

/// How many instances of a phase type may run per parent instance, and
/// whether they may overlap in time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Repeatability {
    /// Exactly one instance per parent instance.
    NonRepeated,
    /// Multiple instances that must not overlap; the n'th instance implicitly
    /// depends on all earlier ones. The key names the property identifying
    /// instances (e.g. "index", "worker").
    SequentialRepeated { instance_key: String },
    /// Multiple instances with no ordering between them.
    ConcurrentRepeated { instance_key: String },
}

impl Repeatability {
    pub fn sequential(key: &str) -> Self {
        Repeatability::SequentialRepeated {
            instance_key: key.to_string(),
        }
    }

    pub fn concurrent(key: &str) -> Self {
        Repeatability::ConcurrentRepeated {
            instance_key: key.to_string(),
        }
    }

    pub fn is_repeatable(&self) -> bool {
        !matches!(self, Repeatability::NonRepeated)
    }

    pub fn instance_key(&self) -> Option<&str> {
        match self {
            Repeatability::NonRepeated => None,
            Repeatability::SequentialRepeated { instance_key }
            | Repeatability::ConcurrentRepeated { instance_key } => Some(instance_key),
        }
    }
}

/// A node of the phase-type schema tree.
#[derive(Debug)]
pub struct PhaseType {
    name: String,
    description: String,
    parent: Option<PhaseTypeId>,
    children: Vec<PhaseTypeId>,
    children_by_name: HashMap<String, PhaseTypeId>,
    dependencies: Vec<PhaseTypeId>,
    repeatability: Repeatability,
    path: ModelPath,
}

impl PhaseType {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parent(&self) -> Option<PhaseTypeId> {
        self.parent
    }

    pub fn children(&self) -> &[PhaseTypeId] {
        &self.children
    }

    /// Sibling types this type depends on.
    pub fn dependencies(&self) -> &[PhaseTypeId] {
        &self.dependencies
    }

    pub fn repeatability(&self) -> &Repeatability {
        &self.repeatability
    }

    pub fn path(&self) -> &ModelPath {
        &self.path
    }
}

/// One instance of a [`PhaseType`] in the execution of a job.
#[derive(Debug)]
pub struct Phase {
    phase_type: PhaseTypeId,
    parent: Option<PhaseId>,
    children: Vec<PhaseId>,
    children_by_name: HashMap<String, PhaseId>,
    children_by_short_name: HashMap<String, PhaseId>,
    name: String,
    short_name: String,
    instance_id: String,
    first_slice: TimeSliceId,
    last_slice: TimeSliceId,
    path: ModelPath,
}

impl Phase {
    pub fn phase_type(&self) -> PhaseTypeId {
        self.phase_type
    }

    pub fn parent(&self) -> Option<PhaseId> {
        self.parent
    }

    pub fn children(&self) -> &[PhaseId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Name unique among siblings, including the instance key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name unique among same-type siblings, without the instance key.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn first_slice(&self) -> TimeSliceId {
        self.first_slice
    }

    /// May be smaller than `first_slice` for a phase too short to span one
    /// slice.
    pub fn last_slice(&self) -> TimeSliceId {
        self.last_slice
    }

    pub fn slice_range(&self) -> Period {
        Period::new(self.first_slice, self.last_slice)
    }

    pub fn slice_duration(&self) -> TimeSliceCount {
        self.last_slice - self.first_slice + 1
    }

    pub fn path(&self) -> &ModelPath {
        &self.path
    }
}

/// The immutable phase hierarchy of one job, plus its schema.
#[derive(Debug)]
pub struct ExecutionModel {
    phase_types: Vec<PhaseType>,
    phases: Vec<Phase>,
}

impl ExecutionModel {
    pub fn builder() -> ExecutionModelBuilder {
        ExecutionModelBuilder::new()
    }

    pub fn root_phase_type(&self) -> PhaseTypeId {
        PhaseTypeId(0)
    }

    pub fn root_phase(&self) -> PhaseId {
        PhaseId(0)
    }

    pub fn phase_type(&self, id: PhaseTypeId) -> &PhaseType {
        &self.phase_types[id.0 as usize]
    }

    pub fn phase(&self, id: PhaseId) -> &Phase {
        &self.phases[id.0 as usize]
    }

    pub fn num_phases(&self) -> usize {
        self.phases.len()
    }

    /// All phase ids in depth-first creation order (root first).
    pub fn phase_ids(&self) -> impl Iterator<Item = PhaseId> {
        (0..self.phases.len() as u32).map(PhaseId)
    }

    pub fn phase_type_ids(&self) -> impl Iterator<Item = PhaseTypeId> {
        (0..self.phase_types.len() as u32).map(PhaseTypeId)
    }

    /// Children of `phase` that are instances of `phase_type`.
    pub fn subphases_for_type<'a>(
        &'a self,
        phase: PhaseId,
        phase_type: PhaseTypeId,
    ) -> impl Iterator<Item = PhaseId> + 'a {
        self.phase(phase)
            .children()
            .iter()
            .copied()
            .filter(move |&c| self.phase(c).phase_type() == phase_type)
    }

    /// Resolves an absolute or relative path to a phase, starting from the
    /// root or from `base` respectively.
    pub fn resolve_phase(&self, base: PhaseId, path: &ModelPath) -> Option<PhaseId> {
        let mut current = if path.is_absolute() {
            self.root_phase()
        } else {
            base
        };
        for component in path.components() {
            current = match component.as_str() {
                "." => current,
                ".." => self.phase(current).parent()?,
                name => {
                    let phase = self.phase(current);
                    if is_short_instance_name(name) {
                        *phase.children_by_short_name.get(name)?
                    } else {
                        *phase.children_by_name.get(name)?
                    }
                }
            };
        }
        Some(current)
    }

    /// Resolves an absolute path to a phase type.
    pub fn resolve_phase_type(&self, path: &ModelPath) -> Option<PhaseTypeId> {
        let mut current = self.root_phase_type();
        for component in path.components() {
            current = *self
                .phase_type(current)
                .children_by_name
                .get(component.as_str())?;
        }
        Some(current)
    }
}

/// Staged construction of an [`ExecutionModel`]: declare the type schema and
/// its dependencies, then add phase instances, then `build` to validate.
pub struct ExecutionModelBuilder {
    phase_types: Vec<PhaseType>,
    phases: Vec<Phase>,
}

impl ExecutionModelBuilder {
    pub fn new() -> Self {
        let root_type = PhaseType {
            name: String::new(),
            description: String::new(),
            parent: None,
            children: Vec::new(),
            children_by_name: HashMap::new(),
            dependencies: Vec::new(),
            repeatability: Repeatability::NonRepeated,
            path: ModelPath::root(),
        };
        ExecutionModelBuilder {
            phase_types: vec![root_type],
            phases: Vec::new(),
        }
    }

    pub fn root_phase_type(&self) -> PhaseTypeId {
        PhaseTypeId(0)
    }

    /// Adds a phase type beneath `parent`.
    pub fn add_phase_type(
        &mut self,
        parent: PhaseTypeId,
        name: &str,
        repeatability: Repeatability,
    ) -> Result<PhaseTypeId, ModelError> {
        self.add_phase_type_described(parent, name, repeatability, "")
    }

    pub fn add_phase_type_described(
        &mut self,
        parent: PhaseTypeId,
        name: &str,
        repeatability: Repeatability,
        description: &str,
    ) -> Result<PhaseTypeId, ModelError> {
        let parent_node = &self.phase_types[parent.0 as usize];
        if parent_node.children_by_name.contains_key(name) {
            return Err(ModelError::DuplicateName {
                parent: parent_node.path.to_string(),
                name: name.to_string(),
            });
        }
        let path = parent_node.path.join(name);
        let id = PhaseTypeId(self.phase_types.len() as u32);
        self.phase_types.push(PhaseType {
            name: name.to_string(),
            description: description.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            children_by_name: HashMap::new(),
            dependencies: Vec::new(),
            repeatability,
            path,
        });
        let parent_node = &mut self.phase_types[parent.0 as usize];
        parent_node.children.push(id);
        parent_node.children_by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declares that instances of `phase_type` start only after instances of
    /// `dependency` with the same parent have finished.
    pub fn add_dependency(
        &mut self,
        phase_type: PhaseTypeId,
        dependency: PhaseTypeId,
    ) -> Result<(), ModelError> {
        let from = &self.phase_types[phase_type.0 as usize];
        let to = &self.phase_types[dependency.0 as usize];
        if from.parent != to.parent || from.parent.is_none() {
            return Err(ModelError::DependencyAcrossParents {
                from: from.path.to_string(),
                to: to.path.to_string(),
            });
        }
        self.phase_types[phase_type.0 as usize]
            .dependencies
            .push(dependency);
        Ok(())
    }

    /// Adds the root phase. Must be called exactly once, before any subphase.
    pub fn add_root_phase(
        &mut self,
        first_slice: TimeSliceId,
        last_slice: TimeSliceId,
    ) -> Result<PhaseId, ModelError> {
        if !self.phases.is_empty() {
            return Err(ModelError::InvalidRoot);
        }
        self.phases.push(Phase {
            phase_type: PhaseTypeId(0),
            parent: None,
            children: Vec::new(),
            children_by_name: HashMap::new(),
            children_by_short_name: HashMap::new(),
            name: String::new(),
            short_name: String::new(),
            instance_id: String::new(),
            first_slice,
            last_slice,
            path: ModelPath::root(),
        });
        Ok(PhaseId(0))
    }

    /// Adds a phase instance beneath `parent`. The instance id must be empty
    /// for non-repeatable types and a valid id otherwise.
    pub fn add_phase(
        &mut self,
        parent: PhaseId,
        phase_type: PhaseTypeId,
        instance_id: &str,
        first_slice: TimeSliceId,
        last_slice: TimeSliceId,
    ) -> Result<PhaseId, ModelError> {
        let type_node = &self.phase_types[phase_type.0 as usize];
        let parent_node = &self.phases[parent.0 as usize];
        if type_node.parent != Some(parent_node.phase_type) {
            return Err(ModelError::TypeParentMismatch {
                phase_type: type_node.path.to_string(),
                parent_type: self.phase_types[parent_node.phase_type.0 as usize]
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
        let id = PhaseId(self.phases.len() as u32);
        self.phases.push(Phase {
            phase_type,
            parent: Some(parent),
            children: Vec::new(),
            children_by_name: HashMap::new(),
            children_by_short_name: HashMap::new(),
            name: name.clone(),
            short_name: short_name.clone(),
            instance_id: instance_id.to_string(),
            first_slice,
            last_slice,
            path,
        });
        let parent_node = &mut self.phases[parent.0 as usize];
        parent_node.children.push(id);
        parent_node.children_by_name.insert(name, id);
        parent_node.children_by_short_name.insert(short_name, id);
        Ok(id)
    }

    /// Validates the whole model and freezes it.
    pub fn build(self) -> Result<ExecutionModel, ModelError> {
        if self.phases.is_empty() {
            return Err(ModelError::InvalidRoot);
        }
        self.validate_dependency_dags()?;
        let model = ExecutionModel {
            phase_types: self.phase_types,
            phases: self.phases,
        };
        model.validate_phase_ranges()?;
        Ok(model)
    }

    fn validate_dependency_dags(&self) -> Result<(), ModelError> {
        for parent in &self.phase_types {
            if parent.children.is_empty() {
                continue;
            }
            let mut edges: HashMap<PhaseTypeId, Vec<PhaseTypeId>> = HashMap::new();
            for &child in &parent.children {
                for &dep in &self.phase_types[child.0 as usize].dependencies {
                    edges.entry(dep).or_default().push(child);
                }
            }
            if topological_sort(&parent.children, &edges).is_none() {
                return Err(ModelError::CyclicDependencies {
                    parent: parent.path.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for ExecutionModelBuilder {
    fn default() -> Self {
        ExecutionModelBuilder::new()
    }
}

impl ExecutionModel {
    fn validate_phase_ranges(&self) -> Result<(), ModelError> {
        for phase in &self.phases {
            if phase.children.is_empty() {
                continue;
            }

            // Composite ranges must cover the union of their children.
            for &child_id in &phase.children {
                let child = self.phase(child_id);
                if child.first_slice < phase.first_slice || child.last_slice > phase.last_slice {
                    return Err(ModelError::CompositeRangeTooSmall {
                        phase: phase.path.to_string(),
                    });
                }
            }

            // Sequential siblings of one type must not overlap.
            let mut by_type: HashMap<PhaseTypeId, Vec<PhaseId>> = HashMap::new();
            for &child_id in &phase.children {
                by_type
                    .entry(self.phase(child_id).phase_type())
                    .or_default()
                    .push(child_id);
            }
            for (type_id, mut instances) in by_type {
                let repeatability = self.phase_type(type_id).repeatability();
                if !matches!(repeatability, Repeatability::SequentialRepeated { .. }) {
                    continue;
                }
                instances.sort_by_key(|&p| self.phase(p).first_slice());
                for pair in instances.windows(2) {
                    let prev = self.phase(pair[0]);
                    let next = self.phase(pair[1]);
                    if prev.last_slice() >= next.first_slice() && prev.slice_duration() > 0 {
                        return Err(ModelError::OverlappingSequentialPhases {
                            first: prev.path.to_string(),
                            second: next.path.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
