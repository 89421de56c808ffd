//! Retrospective capture buffer
//!
//! Keeps a rolling window of the most recently *completed* notes. Raw
//! note-begin/note-end messages are paired by `(pitch, channel)`; a note only
//! enters the buffer once its end arrives, stamped with its begin time.

use std::collections::VecDeque;

use crate::note::{NoteEvent, CHANNEL_COUNT, MIN_NOTE_DURATION, PITCH_COUNT};

/// Default capture window in seconds.
pub const DEFAULT_WINDOW_SECONDS: f64 = 10.0;

/// A note whose begin has arrived but whose end has not.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OpenNote {
    begin_time: f64,
    velocity: u8,
}

/// Rolling window of completed notes plus the table of open notes.
#[derive(Debug, Clone)]
pub struct RetrospectiveBuffer {
    /// Completed notes in insertion (note-end) order
    events: VecDeque<NoteEvent>,
    /// One slot per (channel, pitch); never more than one open note per key
    open: Vec<Option<OpenNote>>,
    /// Window length in seconds
    window_seconds: f64,
}

impl Default for RetrospectiveBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECONDS)
    }
}

impl RetrospectiveBuffer {
    /// Create an empty buffer that remembers `window_seconds` of playing.
    pub fn new(window_seconds: f64) -> Self {
        Self {
            events: VecDeque::with_capacity(256),
            open: vec![None; CHANNEL_COUNT * PITCH_COUNT],
            window_seconds: window_seconds.max(0.0),
        }
    }

    fn slot(pitch: u8, channel: u8) -> usize {
        (channel as usize & 0x0F) * PITCH_COUNT + (pitch as usize & 0x7F)
    }

    /// Record a note begin at time `now`.
    ///
    /// A second begin for the same `(pitch, channel)` without an end in
    /// between replaces the first one.
    pub fn on_begin(&mut self, pitch: u8, velocity: u8, channel: u8, now: f64) {
        let slot = &mut self.open[Self::slot(pitch, channel)];
        if slot.is_some() {
            log::trace!("replacing stale open note {} on channel {}", pitch, channel);
        }
        *slot = Some(OpenNote {
            begin_time: now,
            velocity: velocity.clamp(1, 127),
        });
    }

    /// Record a note end at time `now`.
    ///
    /// Ends without a matching begin are dropped. Returns the completed note
    /// if one was added to the buffer.
    pub fn on_end(&mut self, pitch: u8, channel: u8, now: f64) -> Option<NoteEvent> {
        let open = self.open[Self::slot(pitch, channel)].take()?;
        let duration = (now - open.begin_time).max(MIN_NOTE_DURATION);
        let event = NoteEvent::new(open.begin_time, pitch, open.velocity, duration, channel);
        self.events.push_back(event);
        self.evict(now);
        Some(event)
    }

    /// Drop every note that began before `now - window_seconds`.
    pub fn evict(&mut self, now: f64) {
        let horizon = now - self.window_seconds;
        while self.events.front().is_some_and(|e| e.timestamp < horizon) {
            self.events.pop_front();
        }
        // Notes are stored by end time, so an old long note can sit behind a
        // newer short one.
        if self.events.iter().any(|e| e.timestamp < horizon) {
            self.events.retain(|e| e.timestamp >= horizon);
        }
    }

    /// Copy of the buffered notes, ordered by onset and shifted so the
    /// earliest onset is at 0.0. Empty if nothing has been played.
    pub fn snapshot_and_normalize(&self) -> Vec<NoteEvent> {
        let mut notes: Vec<NoteEvent> = self.events.iter().copied().collect();
        notes.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        if let Some(first) = notes.first().map(|n| n.timestamp) {
            for note in &mut notes {
                note.timestamp -= first;
            }
        }
        notes
    }

    /// Forget all completed and open notes.
    pub fn clear(&mut self) {
        self.events.clear();
        self.open.iter_mut().for_each(|slot| *slot = None);
    }

    /// Number of completed notes in the window.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the window holds no completed notes.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of notes that have begun but not ended.
    pub fn open_notes(&self) -> usize {
        self.open.iter().filter(|slot| slot.is_some()).count()
    }

    /// Window length in seconds.
    pub fn window_seconds(&self) -> f64 {
        self.window_seconds
    }

    /// Completed notes in insertion order.
    pub fn events(&self) -> impl Iterator<Item = &NoteEvent> {
        self.events.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_end_pairing() {
        let mut buffer = RetrospectiveBuffer::new(10.0);
        buffer.on_begin(60, 100, 0, 1.0);
        assert_eq!(buffer.open_notes(), 1);
        assert!(buffer.is_empty());

        let note = buffer.on_end(60, 0, 1.5).unwrap();
        assert_eq!(note.pitch, 60);
        assert_eq!(note.velocity, 100);
        assert!((note.timestamp - 1.0).abs() < 1e-9);
        assert!((note.duration - 0.5).abs() < 1e-9);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.open_notes(), 0);
    }

    #[test]
    fn test_end_without_begin_is_dropped() {
        let mut buffer = RetrospectiveBuffer::new(10.0);
        assert!(buffer.on_end(60, 0, 1.0).is_none());
        // Same pitch on another channel does not match
        buffer.on_begin(60, 100, 1, 1.0);
        assert!(buffer.on_end(60, 0, 1.2).is_none());
        assert!(buffer.is_empty());
        assert_eq!(buffer.open_notes(), 1);
    }

    #[test]
    fn test_second_begin_replaces_first() {
        let mut buffer = RetrospectiveBuffer::new(10.0);
        buffer.on_begin(60, 50, 0, 1.0);
        buffer.on_begin(60, 110, 0, 2.0);
        assert_eq!(buffer.open_notes(), 1);

        let note = buffer.on_end(60, 0, 2.5).unwrap();
        assert_eq!(note.velocity, 110);
        assert!((note.timestamp - 2.0).abs() < 1e-9);
        // The replaced begin never produces a second note
        assert!(buffer.on_end(60, 0, 3.0).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_minimum_duration() {
        let mut buffer = RetrospectiveBuffer::new(10.0);
        buffer.on_begin(60, 100, 0, 1.0);
        let note = buffer.on_end(60, 0, 1.0).unwrap();
        assert!((note.duration - MIN_NOTE_DURATION).abs() < 1e-12);
    }

    #[test]
    fn test_window_eviction() {
        let mut buffer = RetrospectiveBuffer::new(2.0);
        for i in 0..10 {
            let t = i as f64 * 0.5;
            buffer.on_begin(60 + i as u8, 100, 0, t);
            buffer.on_end(60 + i as u8, 0, t + 0.25);
            let horizon = t + 0.25 - 2.0;
            assert!(buffer.events().all(|e| e.timestamp >= horizon));
        }
        // Onsets 2.5 .. 4.5 survive the last insertion at 4.75
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_eviction_of_long_note_behind_short_one() {
        let mut buffer = RetrospectiveBuffer::new(2.0);
        buffer.on_begin(48, 100, 0, 0.0);
        buffer.on_begin(60, 100, 0, 1.0);
        buffer.on_end(60, 0, 1.2);
        buffer.on_end(48, 0, 1.5);
        assert_eq!(buffer.len(), 2);

        buffer.on_begin(62, 100, 0, 2.1);
        buffer.on_end(62, 0, 2.3);
        // 48 began at 0.0 < 2.3 - 2.0 and must go even though it is not at the front
        assert!(buffer.events().all(|e| e.pitch != 48));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_snapshot_normalizes_and_orders_by_onset() {
        let mut buffer = RetrospectiveBuffer::new(10.0);
        buffer.on_begin(48, 80, 0, 3.0);
        buffer.on_begin(60, 100, 0, 3.5);
        buffer.on_end(60, 0, 3.7);
        buffer.on_end(48, 0, 4.0);

        let snapshot = buffer.snapshot_and_normalize();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].pitch, 48);
        assert!(snapshot[0].timestamp.abs() < 1e-9);
        assert_eq!(snapshot[1].pitch, 60);
        assert!((snapshot[1].timestamp - 0.5).abs() < 1e-9);
        // The buffer itself is untouched
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_snapshot_of_empty_buffer() {
        let buffer = RetrospectiveBuffer::default();
        assert!(buffer.snapshot_and_normalize().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut buffer = RetrospectiveBuffer::new(10.0);
        buffer.on_begin(60, 100, 0, 0.0);
        buffer.on_begin(62, 100, 0, 0.1);
        buffer.on_end(60, 0, 0.5);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.open_notes(), 0);
    }
}
