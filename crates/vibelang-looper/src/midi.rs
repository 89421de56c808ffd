//! MIDI byte encoding and decoding
//!
//! Only the channel messages the looper cares about are understood: note on,
//! note off and control change. Everything else decodes to `None`.

use crate::scheduler::OutputEvent;

/// A decoded channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note on: channel, note, velocity (never 0)
    NoteOn { channel: u8, note: u8, velocity: u8 },
    /// Note off: channel, note
    NoteOff { channel: u8, note: u8 },
    /// Control change: channel, controller, value
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl MidiMessage {
    /// Decode raw MIDI bytes.
    ///
    /// A note on with velocity 0 is a note off.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 3 {
            return None;
        }

        let status = bytes[0];
        let channel = status & 0x0F;
        let data1 = bytes[1] & 0x7F;
        let data2 = bytes[2] & 0x7F;

        match status & 0xF0 {
            0x90 if data2 == 0 => Some(MidiMessage::NoteOff { channel, note: data1 }),
            0x90 => Some(MidiMessage::NoteOn {
                channel,
                note: data1,
                velocity: data2,
            }),
            0x80 => Some(MidiMessage::NoteOff { channel, note: data1 }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                controller: data1,
                value: data2,
            }),
            _ => None,
        }
    }

    /// Encode to raw MIDI bytes.
    pub fn to_bytes(&self) -> [u8; 3] {
        match self {
            MidiMessage::NoteOn { channel, note, velocity } => {
                [0x90 | (channel & 0x0F), *note & 0x7F, *velocity & 0x7F]
            }
            MidiMessage::NoteOff { channel, note } => [0x80 | (channel & 0x0F), *note & 0x7F, 0],
            MidiMessage::ControlChange { channel, controller, value } => {
                [0xB0 | (channel & 0x0F), *controller & 0x7F, *value & 0x7F]
            }
        }
    }
}

impl From<&OutputEvent> for MidiMessage {
    fn from(event: &OutputEvent) -> Self {
        if event.is_begin {
            MidiMessage::NoteOn {
                channel: event.channel,
                note: event.pitch,
                velocity: event.velocity.max(1),
            }
        } else {
            MidiMessage::NoteOff {
                channel: event.channel,
                note: event.pitch,
            }
        }
    }
}
