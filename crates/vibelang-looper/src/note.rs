//! Note records
//!
//! A [`NoteEvent`] is one completed note: onset, pitch, velocity, length and
//! channel. Times are in seconds relative to whatever sequence owns the note
//! (the retrospective buffer uses input time, captured loops and variations
//! use time since their first onset).

use std::fmt;

/// Shortest note the looper will ever record or generate, in seconds.
pub const MIN_NOTE_DURATION: f64 = 0.01;

/// Number of MIDI channels.
pub const CHANNEL_COUNT: usize = 16;

/// Number of MIDI note numbers.
pub const PITCH_COUNT: usize = 128;

/// A single completed note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// Onset time in seconds
    pub timestamp: f64,
    /// MIDI note number (0-127)
    pub pitch: u8,
    /// MIDI velocity (1-127)
    pub velocity: u8,
    /// Length in seconds (at least [`MIN_NOTE_DURATION`])
    pub duration: f64,
    /// MIDI channel (0-15)
    pub channel: u8,
}

impl NoteEvent {
    /// Create a note, clamping every field into its valid range.
    pub fn new(timestamp: f64, pitch: u8, velocity: u8, duration: f64, channel: u8) -> Self {
        Self {
            timestamp,
            pitch: pitch.min(127),
            velocity: velocity.clamp(1, 127),
            duration: duration.max(MIN_NOTE_DURATION),
            channel: channel & 0x0F,
        }
    }

    /// Same note moved by `offset` seconds.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            timestamp: self.timestamp + offset,
            ..*self
        }
    }

    /// Time at which the note stops sounding.
    pub fn end_time(&self) -> f64 {
        self.timestamp + self.duration
    }
}

impl fmt::Display for NoteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(t={:.3}, n={}, v={}, d={:.3}, ch={})",
            self.timestamp, self.pitch, self.velocity, self.duration, self.channel
        )
    }
}

/// Total length of a note sequence: last onset plus last duration.
///
/// Returns 0.0 for an empty sequence.
pub fn sequence_span(events: &[NoteEvent]) -> f64 {
    events.last().map(NoteEvent::end_time).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_fields() {
        let note = NoteEvent::new(1.0, 200, 0, 0.0, 0x1F);
        assert_eq!(note.pitch, 127);
        assert_eq!(note.velocity, 1);
        assert!((note.duration - MIN_NOTE_DURATION).abs() < 1e-12);
        assert_eq!(note.channel, 15);
    }

    #[test]
    fn test_display() {
        let note = NoteEvent::new(0.5, 60, 100, 0.25, 0);
        assert_eq!(note.to_string(), "Event(t=0.500, n=60, v=100, d=0.250, ch=0)");
    }

    #[test]
    fn test_sequence_span() {
        assert_eq!(sequence_span(&[]), 0.0);
        let notes = [
            NoteEvent::new(0.0, 60, 100, 0.2, 0),
            NoteEvent::new(0.5, 64, 90, 0.3, 0),
        ];
        assert!((sequence_span(&notes) - 0.8).abs() < 1e-9);
    }
}
