//! Raw-step decoding into typed particle records
//!
//! This is the only place sentinel values are interpreted: the sampler's
//! JSON writer maps NaN and ±inf to `null`, so every numeric particle field
//! decodes `null`/absent to `-inf` before any arithmetic sees it. The
//! normalizer also expands positional rows against their `fieldnames`
//! header, resolves the `expr_ids` intern table, splits modification-span
//! markers out of expressions, and trims leading/trailing resample steps so
//! the genealogy builder can rely on its structural invariants.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::trace::raw::{RawParticle, RawStep, RawTrace};

/// Stable identity of an expression across the whole trace.
///
/// Resampled duplicates of the same expression share an `ExprId`; selection
/// and lineage highlighting operate on this value identity, never on
/// individual particle instances.
pub type ExprId = usize;

/// Start and end markers delimiting the modified span inside an expression.
const SPAN_OPEN: &str = "<<<";
const SPAN_CLOSE: &str = ">>>";

/// Errors raised while decoding a raw trace.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("step {step}: fieldnames has {expected} entries but particle {slot} is a row of {actual}")]
    SchemaMismatch {
        step: usize,
        slot: usize,
        expected: usize,
        actual: usize,
    },
    #[error("step {step}: particles are positional rows but the step has no fieldnames header")]
    MissingFieldnames { step: usize },
    #[error("step {step}, slot {slot}: expression is not a string after decoding")]
    ExprNotAString { step: usize, slot: usize },
    #[error("step {step}, slot {slot}: expression index {index} is outside the expr_ids table (len {len})")]
    ExprIndexOutOfRange {
        step: usize,
        slot: usize,
        index: usize,
        len: usize,
    },
    #[error("step {step}, slot {slot}: field {field:?} is neither a number nor null")]
    NonNumericField {
        step: usize,
        slot: usize,
        field: &'static str,
    },
    #[error("trace has no steps left after trimming resample steps")]
    EmptyAfterTrim,
    #[error("steps {first} and {second} are adjacent resample steps")]
    AdjacentResamples { first: usize, second: usize },
    #[error("resample step {step} has no ancestors array")]
    MissingAncestors { step: usize },
    #[error("resample step {step}: ancestors has length {actual}, expected {expected}")]
    AncestorLength {
        step: usize,
        expected: usize,
        actual: usize,
    },
    #[error("step {step} has {actual} particles, expected {expected}")]
    ParticleCount {
        step: usize,
        expected: usize,
        actual: usize,
    },
}

/// One fully decoded particle.
///
/// All numeric fields are post-sentinel-decode: a `null` in the source JSON
/// is already `-inf` here, and no field is ever NaN unless the sampler wrote
/// a finite-but-wrong number itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub expr: String,
    pub expr_id: ExprId,
    /// Text before the `<<<` marker (the whole expression if unmarked).
    pub prefix: String,
    /// Text between `<<<` and `>>>`, when the expression carries a
    /// modification span.
    pub modified: Option<String>,
    /// Text after the `>>>` marker.
    pub suffix: Option<String>,
    pub logweight: f64,
    pub likelihood: f64,
    pub prior: f64,
    pub posterior: f64,
    pub weight_incr: f64,
    pub log_proposal_ratio: f64,
    pub loglikelihood_ratio: f64,
    pub logprior_ratio: f64,
}

/// One decoded, retained-or-resample step.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub mode: String,
    /// 1-based ancestor indices, present iff this is a resample step.
    pub ancestors: Option<Vec<usize>>,
    pub particles: Vec<Particle>,
}

impl Step {
    pub fn is_resample(&self) -> bool {
        self.mode == "resample"
    }
}

/// The trimmed, decoded step sequence.
///
/// Post-normalization guarantees: at least one step; first and last steps
/// are not resamples; no two adjacent resamples; every step has exactly
/// `num_particles` particles; every resample step carries an ancestors
/// array of that same length.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTrace {
    pub steps: Vec<Step>,
    pub num_particles: usize,
}

/// Decode and trim a raw trace.
pub fn normalize(raw: &RawTrace) -> Result<NormalizedTrace, NormalizeError> {
    let mut interner = ExprInterner::new(raw.expr_ids.as_deref());
    let mut steps = Vec::with_capacity(raw.history.len());
    for (step_ix, raw_step) in raw.history.iter().enumerate() {
        steps.push(decode_step(step_ix, raw_step, &mut interner)?);
    }

    trim_resamples(&mut steps);
    let first = match steps.first() {
        Some(step) => step,
        None => return Err(NormalizeError::EmptyAfterTrim),
    };
    let num_particles = first.particles.len();

    for (ix, step) in steps.iter().enumerate() {
        if step.particles.len() != num_particles {
            return Err(NormalizeError::ParticleCount {
                step: ix,
                expected: num_particles,
                actual: step.particles.len(),
            });
        }
        if step.is_resample() {
            if ix + 1 < steps.len() && steps[ix + 1].is_resample() {
                return Err(NormalizeError::AdjacentResamples {
                    first: ix,
                    second: ix + 1,
                });
            }
            let ancestors = step
                .ancestors
                .as_ref()
                .ok_or(NormalizeError::MissingAncestors { step: ix })?;
            if ancestors.len() != num_particles {
                return Err(NormalizeError::AncestorLength {
                    step: ix,
                    expected: num_particles,
                    actual: ancestors.len(),
                });
            }
        }
    }

    Ok(NormalizedTrace {
        steps,
        num_particles,
    })
}

/// Drop resample steps from both ends; they re-index ancestry but carry no
/// particles the viewer can anchor to.
fn trim_resamples(steps: &mut Vec<Step>) {
    while steps.first().map_or(false, Step::is_resample) {
        steps.remove(0);
    }
    while steps.last().map_or(false, Step::is_resample) {
        steps.pop();
    }
}

fn decode_step(
    step_ix: usize,
    raw: &RawStep,
    interner: &mut ExprInterner<'_>,
) -> Result<Step, NormalizeError> {
    let mut particles = Vec::with_capacity(raw.particles.len());
    for (slot, raw_particle) in raw.particles.iter().enumerate() {
        let keyed = expand_fieldnames(step_ix, slot, raw_particle, raw.fieldnames.as_deref())?;
        particles.push(decode_particle(step_ix, slot, &keyed, interner)?);
    }
    Ok(Step {
        mode: raw.mode.clone(),
        ancestors: raw.ancestors.clone(),
        particles,
    })
}

/// Zip a positional row against the step's `fieldnames` header. Keyed
/// particles pass through unchanged.
fn expand_fieldnames(
    step: usize,
    slot: usize,
    raw: &RawParticle,
    fieldnames: Option<&[String]>,
) -> Result<serde_json::Map<String, Value>, NormalizeError> {
    match raw {
        RawParticle::Keyed(map) => Ok(map.clone()),
        RawParticle::Row(row) => {
            let fieldnames =
                fieldnames.ok_or(NormalizeError::MissingFieldnames { step })?;
            if fieldnames.len() != row.len() {
                return Err(NormalizeError::SchemaMismatch {
                    step,
                    slot,
                    expected: fieldnames.len(),
                    actual: row.len(),
                });
            }
            Ok(fieldnames
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect())
        }
    }
}

fn decode_particle(
    step: usize,
    slot: usize,
    fields: &serde_json::Map<String, Value>,
    interner: &mut ExprInterner<'_>,
) -> Result<Particle, NormalizeError> {
    let (expr, expr_id) = interner.resolve(step, slot, fields)?;
    let (prefix, modified, suffix) = split_modification_span(&expr);
    Ok(Particle {
        prefix,
        modified,
        suffix,
        expr,
        expr_id,
        logweight: numeric_field(step, slot, fields, "logweight")?,
        likelihood: numeric_field(step, slot, fields, "likelihood")?,
        prior: numeric_field(step, slot, fields, "prior")?,
        posterior: numeric_field(step, slot, fields, "posterior")?,
        weight_incr: numeric_field(step, slot, fields, "weight_incr")?,
        log_proposal_ratio: numeric_field(step, slot, fields, "log_proposal_ratio")?,
        loglikelihood_ratio: numeric_field(step, slot, fields, "loglikelihood_ratio")?,
        logprior_ratio: numeric_field(step, slot, fields, "logprior_ratio")?,
    })
}

/// Sentinel decode of one numeric field: `null` and absent both mean the
/// JSON writer could not represent a non-finite value, and decode to `-inf`.
fn numeric_field(
    step: usize,
    slot: usize,
    fields: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<f64, NormalizeError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(f64::NEG_INFINITY),
        Some(Value::Number(n)) => Ok(n.as_f64().unwrap_or(f64::NEG_INFINITY)),
        Some(_) => Err(NormalizeError::NonNumericField { step, slot, field }),
    }
}

/// Split `prefix<<<modified>>>suffix` markers out of an expression.
fn split_modification_span(expr: &str) -> (String, Option<String>, Option<String>) {
    match expr.split_once(SPAN_OPEN) {
        None => (expr.to_owned(), None, None),
        Some((prefix, rest)) => match rest.split_once(SPAN_CLOSE) {
            None => (prefix.to_owned(), Some(rest.to_owned()), None),
            Some((modified, suffix)) => (
                prefix.to_owned(),
                Some(modified.to_owned()),
                Some(suffix.to_owned()),
            ),
        },
    }
}

/// Resolves each particle's expression text and [`ExprId`].
///
/// Three source encodings, in priority order: a trace-level `expr_ids`
/// table (the `expr` field is a 1-based index into it), an inline string
/// with an explicit `expr_id` field, or an inline string alone, in which
/// case ids are assigned by interning the text — identical expressions
/// still share one id, which is all selection needs.
struct ExprInterner<'a> {
    table: Option<&'a [String]>,
    assigned: HashMap<String, ExprId>,
}

impl<'a> ExprInterner<'a> {
    fn new(table: Option<&'a [String]>) -> Self {
        Self {
            table,
            assigned: HashMap::new(),
        }
    }

    fn resolve(
        &mut self,
        step: usize,
        slot: usize,
        fields: &serde_json::Map<String, Value>,
    ) -> Result<(String, ExprId), NormalizeError> {
        if let Some(table) = self.table {
            // 1-based index into the intern table.
            let index = match fields.get("expr") {
                Some(Value::Number(n)) => n.as_u64().map(|n| n as usize),
                _ => None,
            }
            .ok_or(NormalizeError::ExprNotAString { step, slot })?;
            let expr_id = index.checked_sub(1).ok_or({
                NormalizeError::ExprIndexOutOfRange {
                    step,
                    slot,
                    index,
                    len: table.len(),
                }
            })?;
            let expr = table.get(expr_id).ok_or(NormalizeError::ExprIndexOutOfRange {
                step,
                slot,
                index,
                len: table.len(),
            })?;
            return Ok((expr.clone(), expr_id));
        }

        let expr = match fields.get("expr") {
            Some(Value::String(s)) => s.clone(),
            _ => return Err(NormalizeError::ExprNotAString { step, slot }),
        };
        if let Some(Value::Number(n)) = fields.get("expr_id") {
            if let Some(id) = n.as_u64() {
                return Ok((expr, id as usize));
            }
        }
        let next = self.assigned.len();
        let id = *self.assigned.entry(expr.clone()).or_insert(next);
        Ok((expr, id))
    }
}
