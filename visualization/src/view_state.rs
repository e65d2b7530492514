//! Explicit interaction state for the viewer
//!
//! One [`ViewState`] value holds everything the controls and the selection
//! machinery know between render cycles. Handlers mutate it and the caller
//! re-renders; there are no module-level sets to reset.

use smc_scope_core::genealogy::Forest;
use smc_scope_core::selection::SelectionState;
use smc_scope_core::trace::normalize::ExprId;

/// Histogram temperature control: track the summary configuration or an
/// explicit override typed into the control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TemperatureSetting {
    FromConfig,
    Explicit(f64),
}

/// Horizontal placement of visible particles within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum XPositionMode {
    /// Rank order, evenly spaced.
    #[default]
    Slot,
    /// Log-scaled likelihood against a fixed upper edge of 1.
    LikelihoodUnit,
    /// Log-scaled likelihood against the global maximum.
    LikelihoodGlobalMax,
    /// Log-scaled likelihood against the step's own maximum.
    LikelihoodLocalMax,
    /// Log-scaled posterior against the global maximum.
    PosteriorGlobalMax,
    /// Log-scaled posterior against the step's own maximum.
    PosteriorLocalMax,
    /// Proportional to relative weight within the step.
    RelativeWeight,
}

/// The clicked particle whose lineage is emphasized, by retained-step
/// coordinates (instance identity, unlike the `ExprId`-keyed selection).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HighlightRef {
    pub step: usize,
    pub slot: usize,
}

/// All interaction state, passed into every render call.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub selection: SelectionState,
    pub highlighted: Option<HighlightRef>,
    /// Raw search-box text; compiled per render cycle.
    pub search: String,
    pub temperature: TemperatureSetting,
    pub bin_count: usize,
    /// How many particles per step are shown by weight rank.
    pub top_k: usize,
    /// Horizontal extent of one step, in drawing units.
    pub state_xspace: f64,
    pub xpos: XPositionMode,
}

impl Default for ViewState {
    fn default() -> Self {
        ViewState {
            selection: SelectionState::default(),
            highlighted: None,
            search: String::new(),
            temperature: TemperatureSetting::FromConfig,
            bin_count: 20,
            top_k: 5,
            state_xspace: 75.0,
            xpos: XPositionMode::Slot,
        }
    }
}

impl ViewState {
    /// Click on a particle: emphasize its lineage, or clear when the same
    /// particle is clicked again.
    pub fn click_particle(&mut self, step: usize, slot: usize) {
        let clicked = HighlightRef { step, slot };
        if self.highlighted == Some(clicked) {
            self.highlighted = None;
        } else {
            self.highlighted = Some(clicked);
        }
    }

    /// Double-click on a bin or inspector row: replace the selection with
    /// the given expressions and recompute both closures.
    pub fn select_exprs<I>(&mut self, ids: I, forest: &Forest)
    where
        I: IntoIterator<Item = ExprId>,
    {
        self.selection.select(ids, forest);
    }

    /// Escape key: clear the selection and its closures.
    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Drop a click-highlight that no longer points inside the forest
    /// (e.g. after reloading a different trace).
    pub fn reconcile(&mut self, forest: &Forest) {
        if let Some(h) = self.highlighted {
            if h.step >= forest.num_steps() || h.slot >= forest.num_particles() {
                self.highlighted = None;
            }
        }
    }
}
