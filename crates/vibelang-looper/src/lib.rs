//! vibelang-looper - Retrospective MIDI Looper for VibeLang
//!
//! Listens to what you play, and when you hit capture, turns the last few
//! seconds into a loop that keeps re-generating itself. Features include:
//!
//! - Retrospective capture: no need to arm recording before playing
//! - Markov-chain variations of pitch, rhythm and note length
//! - Sample-accurate, allocation-free block scheduling
//! - Undo through a bounded history of captured loops
//! - JACK MIDI host and offline simulation
//! - Configurable via TOML file
//!
//! # Usage as a Library
//!
//! ```
//! use vibelang_looper::{Looper, LooperSettings, OutputEvent};
//!
//! let mut looper = Looper::new(&LooperSettings::default(), 44100.0);
//!
//! // Feed notes with their times in seconds
//! looper.note_begin(60, 100, 0, 0.0);
//! looper.note_end(60, 0, 0.2);
//! looper.note_begin(64, 90, 0, 0.5);
//! looper.note_end(64, 0, 0.8);
//!
//! // Capture at absolute frame 0 and render the first block
//! assert!(looper.capture(0));
//! let mut out: Vec<OutputEvent> = Vec::new();
//! looper.process_block(0, 512, &mut out);
//! assert_eq!(out[0].pitch, 60);
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod generator;
pub mod history;
#[cfg(feature = "native")]
pub mod jack_host;
pub mod looper;
pub mod markov;
pub mod midi;
pub mod note;
pub mod scheduler;
pub mod simulate;

// Re-export main types
pub use buffer::RetrospectiveBuffer;
pub use config::{Config, LooperSettings, MidiSettings};
pub use error::{Error, Result};
pub use generator::{FallbackPolicy, VariationGenerator};
pub use history::LoopHistory;
pub use looper::{ControlAction, Looper, LooperHandle, PARAM_CAPTURE, PARAM_UNDO};
pub use markov::MarkovModels;
pub use midi::MidiMessage;
pub use note::{NoteEvent, MIN_NOTE_DURATION};
pub use scheduler::{OutputEvent, PlaybackScheduler};
