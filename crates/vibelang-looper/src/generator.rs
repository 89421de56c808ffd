//! Variation generation
//!
//! Walks the [`MarkovModels`] of the active loop to produce a new note
//! sequence of the same length. The first note is always the loop's first
//! note; every following note samples pitch, onset interval and duration
//! independently from the tables keyed on the previous note's pitch.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::markov::MarkovModels;
use crate::note::{NoteEvent, MIN_NOTE_DURATION};

/// What to use when a table has no successors for the current pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Keep the current pitch, the previous interval and the current duration
    #[default]
    Repeat,
    /// Use the value at the same position in the captured loop
    SeedPosition,
    /// Pick among every value observed anywhere in the table
    RandomObserved,
}

/// Generates variations of the active loop.
pub struct VariationGenerator {
    models: MarkovModels,
    /// Copy of the active loop the models were built from
    source: Vec<NoteEvent>,
    rng: StdRng,
    fallback: FallbackPolicy,
}

impl Default for VariationGenerator {
    fn default() -> Self {
        Self::new(None, FallbackPolicy::default())
    }
}

impl VariationGenerator {
    /// Create a generator. A fixed `seed` makes every variation reproducible;
    /// `None` seeds from the operating system.
    pub fn new(seed: Option<u64>, fallback: FallbackPolicy) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            models: MarkovModels::new(),
            source: Vec::with_capacity(256),
            rng,
            fallback,
        }
    }

    /// Rebuild the models from the new active loop, or clear them if there
    /// is none.
    pub fn rebuild(&mut self, active: Option<&[NoteEvent]>) {
        self.source.clear();
        if let Some(notes) = active {
            self.source.extend_from_slice(notes);
        }
        self.models.build(&self.source);
    }

    /// Whether the active loop can produce variations (two notes or more).
    pub fn is_enabled(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn models(&self) -> &MarkovModels {
        &self.models
    }

    pub fn fallback(&self) -> FallbackPolicy {
        self.fallback
    }

    pub fn set_fallback(&mut self, fallback: FallbackPolicy) {
        self.fallback = fallback;
    }

    /// Generate a fresh variation.
    pub fn generate(&mut self) -> Vec<NoteEvent> {
        let mut out = Vec::with_capacity(self.source.len());
        self.generate_into(&mut out);
        out
    }

    /// Generate a fresh variation into `out`, replacing its contents.
    ///
    /// Leaves `out` empty when generation is disabled. Does not allocate as
    /// long as `out` has room for the active loop's length.
    pub fn generate_into(&mut self, out: &mut Vec<NoteEvent>) {
        out.clear();
        if !self.is_enabled() || self.source.len() < 2 {
            return;
        }

        let first = self.source[0];
        let mut current = first.shifted(-first.timestamp);
        let mut last_interval = (self.source[1].timestamp - self.source[0].timestamp).max(0.0);
        out.push(current);

        for index in 1..self.source.len() {
            let pitch = match pick(&mut self.rng, self.models.next_pitches(current.pitch)) {
                Some(pitch) => pitch,
                None => self.fallback_pitch(index, &current),
            };
            let interval = match pick(&mut self.rng, self.models.next_intervals(current.pitch)) {
                Some(interval) => interval,
                None => self.fallback_interval(index, last_interval),
            }
            .max(0.0);
            let duration = match pick(&mut self.rng, self.models.next_durations(current.pitch)) {
                Some(duration) => duration,
                None => self.fallback_duration(index, &current),
            }
            .max(MIN_NOTE_DURATION);

            let next = NoteEvent::new(
                current.timestamp + interval,
                pitch,
                current.velocity,
                duration,
                current.channel,
            );
            log::trace!("generated {}", next);
            out.push(next);
            current = next;
            last_interval = interval;
        }
    }

    fn fallback_pitch(&mut self, index: usize, current: &NoteEvent) -> u8 {
        match self.fallback {
            FallbackPolicy::Repeat => current.pitch,
            FallbackPolicy::SeedPosition => self.source[index % self.source.len()].pitch,
            FallbackPolicy::RandomObserved => {
                pick_any(&mut self.rng, self.models.pitch.values()).unwrap_or(current.pitch)
            }
        }
    }

    fn fallback_interval(&mut self, index: usize, last_interval: f64) -> f64 {
        match self.fallback {
            FallbackPolicy::Repeat => last_interval,
            FallbackPolicy::SeedPosition => {
                let index = index % self.source.len();
                if index == 0 {
                    last_interval
                } else {
                    self.source[index].timestamp - self.source[index - 1].timestamp
                }
            }
            FallbackPolicy::RandomObserved => {
                pick_any(&mut self.rng, self.models.rhythm.values()).unwrap_or(last_interval)
            }
        }
    }

    fn fallback_duration(&mut self, index: usize, current: &NoteEvent) -> f64 {
        match self.fallback {
            FallbackPolicy::Repeat => current.duration,
            FallbackPolicy::SeedPosition => self.source[index % self.source.len()].duration,
            FallbackPolicy::RandomObserved => {
                pick_any(&mut self.rng, self.models.duration.values()).unwrap_or(current.duration)
            }
        }
    }
}

/// Uniform pick from a successor list.
fn pick<T: Copy>(rng: &mut StdRng, values: &[T]) -> Option<T> {
    if values.is_empty() {
        None
    } else {
        Some(values[rng.random_range(0..values.len())])
    }
}

/// Uniform pick across every successor list of a table.
fn pick_any<'a, T: Copy + 'a>(
    rng: &mut StdRng,
    lists: impl Iterator<Item = &'a Vec<T>> + Clone,
) -> Option<T> {
    let total: usize = lists.clone().map(Vec::len).sum();
    if total == 0 {
        return None;
    }
    let mut index = rng.random_range(0..total);
    for list in lists {
        if index < list.len() {
            return Some(list[index]);
        }
        index -= list.len();
    }
    None
}
