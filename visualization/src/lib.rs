//! SMC-SCOPE view layer: render-ready models between the core and a renderer
//!
//! The presentation layer proper (SVG/DOM, axes, hover chrome) is an
//! external collaborator; this crate produces everything it needs to draw —
//! particle positions and visibility, parent-link segments, histogram
//! rectangles with subset overlays, inspector rows — and consumes its
//! interaction events through pure handlers on an explicit [`ViewState`].
//!
//! A render cycle rebuilds the forest, flags, and aggregates from scratch;
//! there is no incremental recomputation and no hidden module state.

pub mod fmt;
pub mod histogram;
pub mod layout;
pub mod loader;
pub mod render;
pub mod search;
pub mod view_state;

pub use histogram::{BinView, HistogramView, InspectorRow, Rect};
pub use layout::{Frame, ParentLink, ParticleView, StepView};
pub use loader::{load_summary, load_trace, load_trace_with_retry, LoadError};
pub use render::{render, RenderError};
pub use search::{SearchError, SearchFilter};
pub use view_state::{HighlightRef, TemperatureSetting, ViewState, XPositionMode};
