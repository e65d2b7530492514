//! Selection state and lineage propagation
//!
//! Selection is tracked by [`ExprId`], not by particle instance: resampled
//! duplicates of one expression are a single logical lineage node, so
//! selecting any copy highlights every copy. The ancestor and descendant
//! closures are recomputed from scratch on every change — traces are small
//! (hundreds of particles by tens of steps) and a full recompute keeps the
//! render cycle pure.

use std::collections::HashSet;

use crate::genealogy::Forest;
use crate::trace::normalize::ExprId;

/// The process-wide selection, passed explicitly into each render cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    pub selected: HashSet<ExprId>,
    pub ancestors: HashSet<ExprId>,
    pub descendants: HashSet<ExprId>,
}

/// Per-particle classification computed from a [`SelectionState`] plus the
/// active search filter. Consumed by the aggregator's subset masses and by
/// the presentation layer's styling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticleFlags {
    pub selected: bool,
    pub selected_ancestor: bool,
    pub selected_descendant: bool,
    pub search_hit: bool,
}

impl SelectionState {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Replace the selection and recompute both closures.
    pub fn select<I>(&mut self, ids: I, forest: &Forest)
    where
        I: IntoIterator<Item = ExprId>,
    {
        self.clear();
        self.selected.extend(ids);
        self.propagate(forest);
    }

    /// Escape-key semantics: drop everything.
    pub fn clear(&mut self) {
        self.selected.clear();
        self.ancestors.clear();
        self.descendants.clear();
    }

    /// Recompute `ancestors` and `descendants` from `selected`.
    ///
    /// Ancestors: parent-pointer walk to the root from every selected
    /// instance. Descendants: flood fill seeded with the children (not the
    /// particle itself) of every selected instance, visiting each `ExprId`
    /// at most once so shared lineages terminate regardless of fan-out.
    pub fn propagate(&mut self, forest: &Forest) {
        self.ancestors.clear();
        self.descendants.clear();

        let mut worklist = Vec::new();
        for handle in forest.handles() {
            if self.selected.contains(&forest.particle(handle).expr_id) {
                for ancestor in forest.ancestors(handle) {
                    self.ancestors.insert(forest.particle(ancestor).expr_id);
                }
                worklist.extend_from_slice(forest.children(handle));
            }
        }

        while let Some(handle) = worklist.pop() {
            let expr_id = forest.particle(handle).expr_id;
            if !self.descendants.insert(expr_id) {
                continue;
            }
            worklist.extend_from_slice(forest.children(handle));
        }
    }

    /// Classify every particle in the arena, in handle order.
    ///
    /// `search_hit` is the caller's concern (it depends on the compiled
    /// search filter) and is left `false` here.
    pub fn classify(&self, forest: &Forest) -> Vec<ParticleFlags> {
        forest
            .handles()
            .map(|handle| {
                let expr_id = forest.particle(handle).expr_id;
                ParticleFlags {
                    selected: self.selected.contains(&expr_id),
                    selected_ancestor: self.ancestors.contains(&expr_id),
                    selected_descendant: self.descendants.contains(&expr_id),
                    search_hit: false,
                }
            })
            .collect()
    }
}
