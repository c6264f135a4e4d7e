//! Immutable execution and resource models.
//!
//! Both trees are arena-backed: nodes are stored in vectors and referenced by
//! small integer ids (`PhaseId`, `MetricId`, ...), never by pointer identity.
//! Ids are only meaningful relative to the model that produced them; the
//! cache layer re-resolves them by path when crossing the serialization
//! boundary.

pub mod execution;
pub mod mapping;
pub mod resources;

pub use execution::{
    ExecutionModel, ExecutionModelBuilder, Phase, PhaseId, PhaseType, PhaseTypeId, Repeatability,
};
pub use mapping::{MappingEntry, PhaseToResourceMapping};
pub use resources::{
    Metric, MetricClass, MetricId, MetricKind, MetricType, MetricTypeId, Resource, ResourceId,
    ResourceModel, ResourceModelBuilder, ResourceType, ResourceTypeId,
};

use thiserror::Error;

/// Fatal model-construction errors. None of these are recoverable; a model
/// that fails validation is never partially usable.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("\"{parent}\" already has a child named \"{name}\"")]
    DuplicateName { parent: String, name: String },

    #[error("the root of a hierarchy cannot be repeatable or carry dependencies")]
    InvalidRoot,

    #[error("dependency from \"{from}\" to \"{to}\" crosses parent boundaries")]
    DependencyAcrossParents { from: String, to: String },

    #[error("cyclic dependencies among the subphase types of \"{parent}\"")]
    CyclicDependencies { parent: String },

    #[error("phase type \"{phase_type}\" is not a child type of \"{parent_type}\"")]
    TypeParentMismatch {
        phase_type: String,
        parent_type: String,
    },

    #[error("instance id \"{instance_id}\" is invalid for \"{path}\"")]
    InvalidInstanceId { path: String, instance_id: String },

    #[error("composite phase \"{phase}\" does not cover the range of its children")]
    CompositeRangeTooSmall { phase: String },

    #[error("sequential phases \"{first}\" and \"{second}\" overlap in time")]
    OverlappingSequentialPhases { first: String, second: String },

    #[error("metric \"{metric}\" does not match the class of its type \"{metric_type}\"")]
    MetricClassMismatch { metric: String, metric_type: String },

    #[error("the mapping of phase \"{phase}\" is not a subset of its parent's mapping")]
    MappingNotSubset { phase: String },

    #[error("invalid rate observations for metric \"{metric}\": {source}")]
    InvalidObservations {
        metric: String,
        #[source]
        source: crate::metrics::ObservationError,
    },
}

/// Instance ids appear inside path components, so they may not contain
/// whitespace, brackets, equality signs, or separators.
pub(crate) fn is_valid_instance_id(instance_id: &str) -> bool {
    !instance_id.is_empty()
        && instance_id
            .chars()
            .all(|c| !c.is_whitespace() && c != '=' && c != '[' && c != ']' && c != '/')
}

/// Derives the path component for an instance of a possibly repeatable type:
/// `name[key=id]` (long), `name[id]` (short), or plain `name`.
pub(crate) fn derive_instance_name(
    type_name: &str,
    repeatability: &Repeatability,
    instance_id: &str,
    include_key: bool,
) -> String {
    match repeatability.instance_key() {
        Some(key) if include_key => format!("{type_name}[{key}={instance_id}]"),
        Some(_) => format!("{type_name}[{instance_id}]"),
        None => type_name.to_string(),
    }
}

/// Child lookup accepts both long and short instance names; a component with
/// brackets but no key is a short name.
pub(crate) fn is_short_instance_name(component: &str) -> bool {
    component.contains('[') && !component.contains('=')
}
