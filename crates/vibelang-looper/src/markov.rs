//! First-order transition models derived from a captured loop.
//!
//! Three independent tables, all keyed on the pitch of the current note:
//! which pitch comes next, how long until the next onset, and how long the
//! next note lasts. Successors are kept as plain lists with duplicates, so a
//! uniform pick from a list is weighted by how often that transition was seen.

use std::collections::BTreeMap;
use std::fmt;

use crate::note::NoteEvent;

/// Pitch key -> observed successor values, in loop order.
pub type TransitionTable<T> = BTreeMap<u8, Vec<T>>;

/// Pitch, rhythm-interval and duration models for one loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkovModels {
    /// current pitch -> next pitch
    pub pitch: TransitionTable<u8>,
    /// current pitch -> seconds until the next onset
    pub rhythm: TransitionTable<f64>,
    /// current pitch -> duration of the next note
    pub duration: TransitionTable<f64>,
}

impl MarkovModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild all three tables from `notes`.
    ///
    /// Loops with fewer than two notes have no transitions and leave the
    /// models empty.
    pub fn build(&mut self, notes: &[NoteEvent]) {
        self.clear();
        if notes.len() < 2 {
            return;
        }

        for pair in notes.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            self.pitch.entry(current.pitch).or_default().push(next.pitch);
            self.rhythm
                .entry(current.pitch)
                .or_default()
                .push(next.timestamp - current.timestamp);
            self.duration.entry(current.pitch).or_default().push(next.duration);
        }

        log::debug!(
            "built models from {} notes ({} pitch keys)",
            notes.len(),
            self.pitch.len()
        );
        log::trace!("{}", self);
    }

    pub fn clear(&mut self) {
        self.pitch.clear();
        self.rhythm.clear();
        self.duration.clear();
    }

    /// True when no transitions are known, i.e. generation is disabled.
    pub fn is_empty(&self) -> bool {
        self.pitch.is_empty()
    }

    pub fn next_pitches(&self, pitch: u8) -> &[u8] {
        self.pitch.get(&pitch).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn next_intervals(&self, pitch: u8) -> &[f64] {
        self.rhythm.get(&pitch).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn next_durations(&self, pitch: u8) -> &[f64] {
        self.duration.get(&pitch).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn write_table<T: fmt::Debug>(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    table: &TransitionTable<T>,
) -> fmt::Result {
    writeln!(f, "{} model:", name)?;
    for (key, successors) in table {
        writeln!(f, "  {} -> {:?}", key, successors)?;
    }
    Ok(())
}

impl fmt::Display for MarkovModels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_table(f, "pitch", &self.pitch)?;
        write_table(f, "rhythm", &self.rhythm)?;
        write_table(f, "duration", &self.duration)
    }
}
