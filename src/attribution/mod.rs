//! Resource attribution: dividing observed resource usage among the leaf
//! phases of a job.
//!
//! Attribution runs in four steps: active-phase detection, load computation,
//! sampling, and per-phase attribution. The combined result can be cached on
//! disk and reloaded for repeated analyses of the same trace.

pub mod active;
pub mod load;
pub mod mapping_cache;
pub mod rules;
pub mod sampling;
pub mod step;

pub use active::ActivePhases;
pub use load::{LoadIterator, MetricLoads};
pub use mapping_cache::MappingCache;
pub use rules::{BlockingRule, ConsumableRule, RuleProvider, RuleTable};
pub use sampling::{MetricSamples, SampleIterator, SamplingStrategy};
pub use step::{
    AttributionResult, AttributionStepResult, BlockingAttributionIterator,
    ConsumableAttributionIterator, PhaseAttribution,
};

use std::path::Path;

use tracing::{debug, warn};

use crate::cache;
use crate::model::{ExecutionModel, PhaseToResourceMapping, ResourceModel};

/// Whether to read or write the on-disk attribution cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePolicy {
    Disabled,
    /// Recompute and overwrite any existing cache.
    Refresh,
    /// Load a valid cache if present, otherwise recompute and write one.
    #[default]
    UseOrRefresh,
}

/// Inputs controlling one attribution run.
pub struct AttributionSettings<'a> {
    pub mapping: &'a PhaseToResourceMapping,
    pub rules: &'a dyn RuleProvider,
    pub sampling: SamplingStrategy,
    pub cache_policy: CachePolicy,
}

/// Runs the full attribution pipeline, consulting the cache in
/// `cache_directory` according to the settings' cache policy.
pub fn run_attribution(
    execution_model: &ExecutionModel,
    resource_model: &ResourceModel,
    settings: &AttributionSettings<'_>,
    cache_directory: Option<&Path>,
) -> AttributionResult {
    if settings.cache_policy == CachePolicy::UseOrRefresh {
        if let Some(dir) = cache_directory {
            let cache_file = dir.join(cache::ATTRIBUTION_CACHE_FILENAME);
            if cache_file.is_file() {
                match cache::read_attribution_cache(&cache_file, execution_model, resource_model) {
                    Ok(result) => {
                        debug!(cache = %cache_file.display(), "loaded attribution result from cache");
                        return result;
                    }
                    Err(err) => {
                        warn!(
                            cache = %cache_file.display(),
                            error = %err,
                            "failed to read attribution cache, recomputing"
                        );
                    }
                }
            }
        }
    }

    let mapping_cache = MappingCache::build(execution_model, resource_model, settings.mapping);
    let active_phases =
        ActivePhases::detect(execution_model, resource_model, &mapping_cache, settings.rules);
    let loads = MetricLoads::compute(
        execution_model,
        resource_model,
        &mapping_cache,
        settings.rules,
        &active_phases,
    );
    let samples = MetricSamples::compute(
        resource_model,
        &mapping_cache.consumable_metrics,
        &loads,
        settings.sampling,
        loads.start_slice(),
        loads.end_slice(),
    );
    let step = AttributionStepResult::compute(
        execution_model,
        resource_model,
        &mapping_cache,
        settings.rules,
    );
    let result = AttributionResult {
        active_phases,
        loads,
        samples,
        step,
    };

    if settings.cache_policy != CachePolicy::Disabled {
        if let Some(dir) = cache_directory {
            let cache_file = dir.join(cache::ATTRIBUTION_CACHE_FILENAME);
            if let Err(err) =
                cache::write_attribution_cache(&cache_file, execution_model, resource_model, &result)
            {
                warn!(
                    cache = %cache_file.display(),
                    error = %err,
                    "failed to write attribution cache"
                );
            }
        }
    }

    result
}
