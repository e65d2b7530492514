//! The render cycle: raw trace plus view state in, drawable frame out
//!
//! Every call rebuilds the forest, classification flags, and aggregates
//! from scratch. Errors split along the recovery boundary: core errors
//! abort the cycle and nothing partial is drawn; a bad search pattern also
//! aborts, but is surfaced as recoverable so the caller flags the control
//! and leaves all state untouched for the next keystroke.

use log::{debug, warn};
use thiserror::Error;

use smc_scope_core::aggregate::{step_histogram, HistogramSpec};
use smc_scope_core::trace::raw::TraceFile;
use smc_scope_core::{build_forest, CoreError};

use crate::histogram::HistogramView;
use crate::layout::{build_frame, Frame};
use crate::search::{SearchError, SearchFilter};
use crate::view_state::{TemperatureSetting, ViewState};

/// Errors from one render cycle.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Unrecoverable for this trace: abort and surface, draw nothing.
    #[error(transparent)]
    Core(#[from] CoreError),
    /// Recoverable: bad search input; state is untouched.
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error("trace file contains no runs")]
    EmptyTrace,
}

/// Build a frame for the first run of `file`.
///
/// `default_temperature` is the summary-configured temperature, consulted
/// when the view state tracks the config; absent both, the histograms run
/// untempered at `T = 1`.
pub fn render(
    file: &TraceFile,
    default_temperature: Option<f64>,
    state: &mut ViewState,
) -> Result<Frame, RenderError> {
    // Compile the search first: a UserInputError must abort before any
    // state is reconciled or rebuilt.
    let filter = SearchFilter::compile(&state.search)?;

    let raw = file.primary().ok_or(RenderError::EmptyTrace)?;
    let forest = build_forest(raw)?;
    state.reconcile(&forest);
    state.selection.propagate(&forest);

    let mut flags = state.selection.classify(&forest);
    if filter.is_active() {
        for handle in forest.handles() {
            flags[handle.0].search_hit = filter.matches(&forest.particle(handle).expr);
        }
    }

    let temperature = match state.temperature {
        TemperatureSetting::Explicit(t) => t,
        TemperatureSetting::FromConfig => default_temperature.unwrap_or_else(|| {
            warn!("no configured resample temperature, defaulting to 1");
            1.0
        }),
    };

    let spec = HistogramSpec::from_forest(&forest, temperature, state.bin_count);
    let fine_spec = HistogramSpec {
        bin_count: spec.unit_bin_count(),
        ..spec
    };
    debug!(
        "rendering {} retained steps x {} particles at T={}",
        forest.num_steps(),
        forest.num_particles(),
        temperature
    );

    let mut histograms = Vec::with_capacity(forest.num_steps());
    for step in 0..forest.num_steps() {
        let coarse = step_histogram(&forest, step, &flags, &spec, filter.is_active())
            .map_err(CoreError::from)?;
        let fine = step_histogram(&forest, step, &flags, &fine_spec, filter.is_active())
            .map_err(CoreError::from)?;
        histograms.push(HistogramView::build(
            &forest,
            &flags,
            &coarse,
            &fine,
            spec.min_log2_likelihood,
            spec.max_log2_likelihood,
        ));
    }

    Ok(build_frame(
        &forest,
        &flags,
        state,
        temperature,
        filter.is_active(),
        histograms,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use smc_scope_core::aggregate::SubsetKind;

    fn trace_file() -> TraceFile {
        serde_json::from_value(serde_json::json!({
            "history": [
                {"mode": "smc_step", "particles": [
                    {"expr": "(f x)", "logweight": 0.0, "likelihood": 0.5, "prior": 0.5, "posterior": 0.25},
                    {"expr": "(g x)", "logweight": -1.0, "likelihood": 0.25, "prior": 0.5, "posterior": 0.125},
                ]},
                {"mode": "resample", "ancestors": [1, 1], "particles": [
                    {"expr": "(f x)", "logweight": 0.0, "likelihood": 0.5},
                    {"expr": "(f x)", "logweight": 0.0, "likelihood": 0.5},
                ]},
                {"mode": "smc_step", "particles": [
                    {"expr": "(f (h x))", "logweight": -0.5, "likelihood": 0.25, "prior": 0.25, "posterior": 0.0625},
                    {"expr": "(f (k x))", "logweight": -0.25, "likelihood": 0.25, "prior": 0.25, "posterior": 0.0625},
                ]},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn full_cycle_produces_a_frame() {
        let file = trace_file();
        let mut state = ViewState::default();
        let frame = render(&file, Some(2.0), &mut state).unwrap();

        assert_eq!(frame.temperature, 2.0);
        // The resample step is collapsed away.
        assert_eq!(frame.steps.len(), 2);
        assert!(frame.steps[1].after_resample);
        assert_eq!(frame.steps[0].particles.len(), 2);
        assert_eq!(frame.steps[0].histogram.bins.len(), state.bin_count);
        // Both step-1 particles descend from "(f x)".
        assert_eq!(frame.steps[1].links.len(), 2);
    }

    #[test]
    fn search_hits_flow_into_flags_and_subsets() {
        let file = trace_file();
        let mut state = ViewState {
            search: "h x".into(),
            ..ViewState::default()
        };
        let frame = render(&file, None, &mut state).unwrap();
        assert!(frame.search_active);
        assert!(frame.steps[1].particles[0].flags.search_hit);
        assert!(!frame.steps[1].particles[1].flags.search_hit);
        assert!(frame.steps[1]
            .histogram
            .bins
            .iter()
            .all(|b| b.subset_kind == Some(SubsetKind::SearchHit)));
    }

    #[test]
    fn bad_search_pattern_leaves_state_untouched() {
        let file = trace_file();
        let mut state = ViewState {
            search: "(broken".into(),
            ..ViewState::default()
        };
        state.click_particle(0, 0);
        let before = state.clone();
        let err = render(&file, None, &mut state).unwrap_err();
        assert!(matches!(err, RenderError::Search(_)));
        assert_eq!(state.highlighted, before.highlighted);
        assert_eq!(state.selection, before.selection);
    }

    #[test]
    fn selection_survives_re_render() {
        let file = trace_file();
        let mut state = ViewState::default();
        let frame = render(&file, None, &mut state).unwrap();
        let selected_id = frame.steps[0].particles[0].particle.expr_id;

        // Double-click semantics: select, then re-render.
        let raw = file.primary().unwrap();
        let forest = smc_scope_core::build_forest(raw).unwrap();
        state.select_exprs([selected_id], &forest);
        let frame = render(&file, None, &mut state).unwrap();

        assert!(frame.steps[0].particles[0].flags.selected);
        // Its two resampled children are descendants.
        assert!(frame.steps[1].particles[0].flags.selected_descendant);
        assert!(frame.steps[1].particles[1].flags.selected_descendant);
    }

    #[test]
    fn empty_trace_array_is_an_error() {
        let file: TraceFile = serde_json::from_str("[]").unwrap();
        let mut state = ViewState::default();
        assert!(matches!(
            render(&file, None, &mut state),
            Err(RenderError::EmptyTrace)
        ));
    }
}
