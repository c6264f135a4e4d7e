//! Attribution rules: how usage of a metric is divided among the phases
//! mapped to it.

use fnv::FnvHashMap;

use crate::model::{MetricTypeId, PhaseTypeId};

/// Rule for dividing a consumable metric's observed usage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsumableRule {
    /// The phase consumes up to `max_rate` units per slice before any sink
    /// phase gets a share.
    Greedy { max_rate: f64 },
    /// The phase absorbs an equal share of whatever usage greedy phases
    /// leave behind.
    Sink,
    /// The phase does not consume this metric.
    None,
}

impl ConsumableRule {
    pub fn greedy(max_rate: f64) -> Self {
        assert!(max_rate > 0.0, "greedy max rate must be positive");
        ConsumableRule::Greedy { max_rate }
    }
}

/// Rule for attributing a blocking metric's blocked slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingRule {
    /// Slices blocked by the metric suspend the phase entirely.
    Full,
    /// The phase is unaffected by this metric.
    None,
}

/// Provides the attribution rule for every (phase type, metric type) pair.
pub trait RuleProvider {
    fn consumable_rule(&self, phase_type: PhaseTypeId, metric_type: MetricTypeId)
        -> ConsumableRule;

    fn blocking_rule(&self, phase_type: PhaseTypeId, metric_type: MetricTypeId) -> BlockingRule;
}

/// Map-backed rule provider with per-class fallback rules.
pub struct RuleTable {
    consumable: FnvHashMap<(PhaseTypeId, MetricTypeId), ConsumableRule>,
    blocking: FnvHashMap<(PhaseTypeId, MetricTypeId), BlockingRule>,
    default_consumable: ConsumableRule,
    default_blocking: BlockingRule,
}

impl RuleTable {
    pub fn new() -> Self {
        RuleTable {
            consumable: FnvHashMap::default(),
            blocking: FnvHashMap::default(),
            default_consumable: ConsumableRule::None,
            default_blocking: BlockingRule::None,
        }
    }

    /// Defaults applied to pairs without an explicit rule.
    pub fn with_defaults(default_consumable: ConsumableRule, default_blocking: BlockingRule) -> Self {
        RuleTable {
            consumable: FnvHashMap::default(),
            blocking: FnvHashMap::default(),
            default_consumable,
            default_blocking,
        }
    }

    pub fn set_consumable(
        &mut self,
        phase_type: PhaseTypeId,
        metric_type: MetricTypeId,
        rule: ConsumableRule,
    ) {
        self.consumable.insert((phase_type, metric_type), rule);
    }

    pub fn set_blocking(
        &mut self,
        phase_type: PhaseTypeId,
        metric_type: MetricTypeId,
        rule: BlockingRule,
    ) {
        self.blocking.insert((phase_type, metric_type), rule);
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        RuleTable::new()
    }
}

impl RuleProvider for RuleTable {
    fn consumable_rule(
        &self,
        phase_type: PhaseTypeId,
        metric_type: MetricTypeId,
    ) -> ConsumableRule {
        self.consumable
            .get(&(phase_type, metric_type))
            .copied()
            .unwrap_or(self.default_consumable)
    }

    fn blocking_rule(&self, phase_type: PhaseTypeId, metric_type: MetricTypeId) -> BlockingRule {
        self.blocking
            .get(&(phase_type, metric_type))
            .copied()
            .unwrap_or(self.default_blocking)
    }
}
