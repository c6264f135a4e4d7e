//! Generic bottom-up analysis over the phase hierarchy.
//!
//! A [`HierarchyRule`] computes a value per leaf phase and folds subphase
//! values into a composite value; [`analyze_hierarchy`] runs the fold and
//! records a value for every phase.

use fnv::FnvHashMap;

use crate::model::{ExecutionModel, PhaseId};

/// Per-phase analysis producing one `T` for every phase in the hierarchy.
pub trait HierarchyRule {
    type Output;

    fn analyze_leaf(&mut self, model: &ExecutionModel, leaf: PhaseId) -> Self::Output;

    /// Folds the already-computed results of `composite`'s children, found
    /// in `results`, into the composite's own result.
    fn combine_subphases(
        &mut self,
        model: &ExecutionModel,
        composite: PhaseId,
        children: &[PhaseId],
        results: &FnvHashMap<PhaseId, Self::Output>,
    ) -> Self::Output;
}

/// Results of a hierarchy analysis, indexed by phase.
pub struct HierarchyResult<T> {
    results: FnvHashMap<PhaseId, T>,
}

impl<T> HierarchyResult<T> {
    pub(crate) fn from_parts(results: FnvHashMap<PhaseId, T>) -> Self {
        HierarchyResult { results }
    }

    pub fn phases(&self) -> impl Iterator<Item = PhaseId> + '_ {
        self.results.keys().copied()
    }

    pub fn get(&self, phase: PhaseId) -> &T {
        self.results
            .get(&phase)
            .unwrap_or_else(|| panic!("no analysis result for phase id {}", phase.0))
    }
}

/// Runs `rule` over every phase, leaves first.
pub fn analyze_hierarchy<R: HierarchyRule>(
    model: &ExecutionModel,
    rule: &mut R,
) -> HierarchyResult<R::Output> {
    let mut results = FnvHashMap::default();
    recurse(model, model.root_phase(), rule, &mut results);
    HierarchyResult { results }
}

fn recurse<R: HierarchyRule>(
    model: &ExecutionModel,
    phase: PhaseId,
    rule: &mut R,
    results: &mut FnvHashMap<PhaseId, R::Output>,
) {
    let result = if model.phase(phase).is_leaf() {
        rule.analyze_leaf(model, phase)
    } else {
        let children = model.phase(phase).children().to_vec();
        for &child in &children {
            recurse(model, child, rule, results);
        }
        rule.combine_subphases(model, phase, &children, results)
    };
    results.insert(phase, result);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionModelBuilder, Repeatability};

    struct SliceSum;

    impl HierarchyRule for SliceSum {
        type Output = i64;

        fn analyze_leaf(&mut self, model: &ExecutionModel, leaf: PhaseId) -> i64 {
            model.phase(leaf).slice_duration()
        }

        fn combine_subphases(
            &mut self,
            _model: &ExecutionModel,
            _composite: PhaseId,
            children: &[PhaseId],
            results: &FnvHashMap<PhaseId, i64>,
        ) -> i64 {
            children.iter().map(|c| results[c]).sum()
        }
    }

    #[test]
    fn folds_leaves_into_composites() {
        let mut builder = ExecutionModelBuilder::new();
        let work = builder
            .add_phase_type(
                builder.root_phase_type(),
                "work",
                Repeatability::concurrent("w"),
            )
            .unwrap();
        let root = builder.add_root_phase(0, 100).unwrap();
        builder.add_phase(root, work, "0", 0, 9).unwrap();
        builder.add_phase(root, work, "1", 10, 29).unwrap();
        let model = builder.build().unwrap();

        let result = analyze_hierarchy(&model, &mut SliceSum);
        assert_eq!(*result.get(model.root_phase()), 30);
        assert_eq!(result.phases().count(), 3);
    }
}
