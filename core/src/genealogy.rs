//! Genealogy reconstruction over the trimmed step sequence
//!
//! Resample steps carry no new expressions; they only re-index ancestry.
//! The builder collapses each one by wiring the step before it directly to
//! the step after it through the 1-based `ancestors` permutation, leaving a
//! forest over the retained (non-resample) steps: every non-root particle
//! has exactly one parent, and children are a derived index rather than a
//! mutated list, so the structure is an arena with integer handles instead
//! of a web of shared references.

use thiserror::Error;

use crate::trace::normalize::{NormalizedTrace, Particle, Step};

/// Stable handle of one particle instance in the forest arena.
///
/// Handles are dense: `step * num_particles + slot` over retained steps, so
/// they double as indices into per-particle side tables (flags, layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleHandle(pub usize);

/// Errors raised while wiring parent/child links.
///
/// The normalizer already rejects these shapes; the builder re-checks and
/// fails fast rather than silently skipping a malformed step.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenealogyError {
    #[error("retained step {step} is a resample adjacent to another resample")]
    AdjacentResamples { step: usize },
    #[error("trace ends in a resample step at {step}")]
    TrailingResample { step: usize },
    #[error("resample step {step} has no ancestors array")]
    MissingAncestors { step: usize },
    #[error("resample step {step}, slot {slot}: 1-based ancestor index {index} is outside 1..={num_particles}")]
    AncestorIndex {
        step: usize,
        slot: usize,
        index: usize,
        num_particles: usize,
    },
}

/// One retained step of the forest.
#[derive(Debug, Clone)]
pub struct RetainedStep {
    pub mode: String,
    /// Whether a resample was collapsed between this step and its
    /// predecessor (ancestry crossed a permutation, not slot-to-slot).
    pub after_resample: bool,
}

/// The particle forest: an arena of particles over retained steps plus
/// parent links and a derived children index.
#[derive(Debug, Clone)]
pub struct Forest {
    particles: Vec<Particle>,
    steps: Vec<RetainedStep>,
    num_particles: usize,
    parent: Vec<Option<ParticleHandle>>,
    children: Vec<Vec<ParticleHandle>>,
}

impl Forest {
    /// Build the forest from a normalized trace.
    ///
    /// Single left-to-right pass: a plain successor step links slot `j` to
    /// slot `j`; a resample successor links slot `j` of the step after it to
    /// slot `ancestors[j] - 1` of the step before it, and the resample step
    /// itself is dropped from the retained sequence.
    pub fn build(trace: &NormalizedTrace) -> Result<Forest, GenealogyError> {
        let n = trace.num_particles;
        let steps = &trace.steps;

        let mut retained: Vec<(usize, bool)> = Vec::with_capacity(steps.len());
        // (source step index, parent slot per particle) for each retained
        // step after the first.
        let mut parent_slots: Vec<Vec<usize>> = Vec::with_capacity(steps.len());

        if let Some(first) = steps.first() {
            if first.is_resample() {
                // Trimming removes these before we ever get here.
                return Err(GenealogyError::AdjacentResamples { step: 0 });
            }
            retained.push((0, false));
        }

        let mut i = 0;
        while i + 1 < steps.len() {
            if steps[i + 1].is_resample() {
                if i + 2 >= steps.len() {
                    return Err(GenealogyError::TrailingResample { step: i + 1 });
                }
                if steps[i + 2].is_resample() {
                    return Err(GenealogyError::AdjacentResamples { step: i + 2 });
                }
                let ancestors = steps[i + 1]
                    .ancestors
                    .as_ref()
                    .ok_or(GenealogyError::MissingAncestors { step: i + 1 })?;
                let mut slots = Vec::with_capacity(n);
                for (slot, &index) in ancestors.iter().enumerate() {
                    if index == 0 || index > n {
                        return Err(GenealogyError::AncestorIndex {
                            step: i + 1,
                            slot,
                            index,
                            num_particles: n,
                        });
                    }
                    slots.push(index - 1);
                }
                retained.push((i + 2, true));
                parent_slots.push(slots);
                i += 2;
            } else {
                retained.push((i + 1, false));
                parent_slots.push((0..n).collect());
                i += 1;
            }
        }

        let mut particles = Vec::with_capacity(retained.len() * n);
        let mut step_meta = Vec::with_capacity(retained.len());
        for &(source_ix, after_resample) in &retained {
            let step: &Step = &steps[source_ix];
            particles.extend(step.particles.iter().cloned());
            step_meta.push(RetainedStep {
                mode: step.mode.clone(),
                after_resample,
            });
        }

        let mut parent = vec![None; particles.len()];
        let mut children = vec![Vec::new(); particles.len()];
        for (child_step, slots) in parent_slots.iter().enumerate() {
            // parent_slots[k] links retained step k+1 back to retained step k.
            let child_step = child_step + 1;
            for (slot, &parent_slot) in slots.iter().enumerate() {
                let child = ParticleHandle(child_step * n + slot);
                let parent_handle = ParticleHandle((child_step - 1) * n + parent_slot);
                parent[child.0] = Some(parent_handle);
                children[parent_handle.0].push(child);
            }
        }

        Ok(Forest {
            particles,
            steps: step_meta,
            num_particles: n,
            parent,
            children,
        })
    }

    /// Number of retained (non-resample) steps.
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Fixed particle count `N` per step.
    pub fn num_particles(&self) -> usize {
        self.num_particles
    }

    /// Total number of particle instances in the arena.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn handle(&self, step: usize, slot: usize) -> ParticleHandle {
        debug_assert!(step < self.steps.len() && slot < self.num_particles);
        ParticleHandle(step * self.num_particles + slot)
    }

    pub fn step_of(&self, handle: ParticleHandle) -> usize {
        handle.0 / self.num_particles
    }

    pub fn slot_of(&self, handle: ParticleHandle) -> usize {
        handle.0 % self.num_particles
    }

    pub fn particle(&self, handle: ParticleHandle) -> &Particle {
        &self.particles[handle.0]
    }

    pub fn parent(&self, handle: ParticleHandle) -> Option<ParticleHandle> {
        self.parent[handle.0]
    }

    pub fn children(&self, handle: ParticleHandle) -> &[ParticleHandle] {
        &self.children[handle.0]
    }

    pub fn step(&self, step: usize) -> &RetainedStep {
        &self.steps[step]
    }

    /// Particles of one retained step, in slot order.
    pub fn step_particles(&self, step: usize) -> &[Particle] {
        let start = step * self.num_particles;
        &self.particles[start..start + self.num_particles]
    }

    /// All handles in step-major order.
    pub fn handles(&self) -> impl Iterator<Item = ParticleHandle> {
        (0..self.particles.len()).map(ParticleHandle)
    }

    /// Walk from a particle up to its root, excluding the particle itself.
    pub fn ancestors(&self, handle: ParticleHandle) -> AncestorWalk<'_> {
        AncestorWalk {
            forest: self,
            current: self.parent(handle),
        }
    }
}

/// Iterator over a particle's ancestor chain, nearest first.
pub struct AncestorWalk<'a> {
    forest: &'a Forest,
    current: Option<ParticleHandle>,
}

impl Iterator for AncestorWalk<'_> {
    type Item = ParticleHandle;

    fn next(&mut self) -> Option<ParticleHandle> {
        let handle = self.current?;
        self.current = self.forest.parent(handle);
        Some(handle)
    }
}
