//! The looper engine.
//!
//! [`Looper`] owns the retrospective buffer, the loop history, the variation
//! generator and the playback scheduler, and exposes the entry points a host
//! drives: raw note input, parameter changes and per-block processing.
//!
//! Everything runs on the caller's thread. Capture and undo requested from
//! another thread go through a [`LooperHandle`], which queues them without
//! blocking; the queue is drained at the start of the next block, so every
//! action is applied between two blocks and never in the middle of one.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::buffer::RetrospectiveBuffer;
use crate::config::LooperSettings;
use crate::error::{Error, Result};
use crate::generator::VariationGenerator;
use crate::history::LoopHistory;
use crate::midi::MidiMessage;
use crate::note::NoteEvent;
use crate::scheduler::{OutputEvent, PlaybackScheduler};

/// Parameter index that triggers a capture.
pub const PARAM_CAPTURE: u32 = 0;
/// Parameter index that triggers an undo.
pub const PARAM_UNDO: u32 = 1;

/// Parameter values above this count as "pressed".
const PARAM_THRESHOLD: f32 = 0.5;

/// Maximum number of control actions waiting for the next block.
pub const CONTROL_QUEUE_SIZE: usize = 64;

/// A control action queued for the next block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlAction {
    Capture,
    Undo,
    Parameter { index: u32, value: f32 },
    /// Forget buffer, history and playback
    Reset,
}

/// Thread-safe, non-blocking sender of control actions.
#[derive(Debug, Clone)]
pub struct LooperHandle {
    tx: Sender<ControlAction>,
}

impl LooperHandle {
    /// Queue an action. Fails without blocking if the queue is full or the
    /// looper is gone.
    pub fn send(&self, action: ControlAction) -> Result<()> {
        self.tx.try_send(action).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "control queue full",
                TrySendError::Disconnected(_) => "looper is gone",
            };
            log::warn!("Dropping {:?}: {}", action, reason);
            Error::Midi(format!("could not queue {:?}: {}", action, reason))
        })
    }

    pub fn capture(&self) -> Result<()> {
        self.send(ControlAction::Capture)
    }

    pub fn undo(&self) -> Result<()> {
        self.send(ControlAction::Undo)
    }

    pub fn parameter_changed(&self, index: u32, value: f32) -> Result<()> {
        self.send(ControlAction::Parameter { index, value })
    }

    pub fn reset(&self) -> Result<()> {
        self.send(ControlAction::Reset)
    }
}

/// Capture, re-generate and play back.
pub struct Looper {
    buffer: RetrospectiveBuffer,
    history: LoopHistory,
    generator: VariationGenerator,
    scheduler: PlaybackScheduler,
    control_tx: Sender<ControlAction>,
    control_rx: Receiver<ControlAction>,
}

impl Looper {
    /// Create a looper running at `sample_rate` frames per second.
    pub fn new(settings: &LooperSettings, sample_rate: f64) -> Self {
        let (control_tx, control_rx) = bounded(CONTROL_QUEUE_SIZE);
        Self {
            buffer: RetrospectiveBuffer::new(settings.window_seconds),
            history: LoopHistory::new(settings.history_capacity),
            generator: VariationGenerator::new(settings.seed, settings.fallback),
            scheduler: PlaybackScheduler::new(sample_rate),
            control_tx,
            control_rx,
        }
    }

    /// A handle for queuing actions from other threads.
    pub fn handle(&self) -> LooperHandle {
        LooperHandle {
            tx: self.control_tx.clone(),
        }
    }

    pub fn buffer(&self) -> &RetrospectiveBuffer {
        &self.buffer
    }

    pub fn history(&self) -> &LoopHistory {
        &self.history
    }

    pub fn generator(&self) -> &VariationGenerator {
        &self.generator
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// The loop variations are currently derived from.
    pub fn active_loop(&self) -> Option<&[NoteEvent]> {
        self.history.active()
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.scheduler.set_sample_rate(sample_rate);
    }

    /// A note started at `now` seconds.
    pub fn note_begin(&mut self, pitch: u8, velocity: u8, channel: u8, now: f64) {
        self.buffer.on_begin(pitch, velocity, channel, now);
    }

    /// A note stopped at `now` seconds.
    pub fn note_end(&mut self, pitch: u8, channel: u8, now: f64) {
        if let Some(note) = self.buffer.on_end(pitch, channel, now) {
            log::trace!("recorded {}", note);
        }
    }

    /// Decode raw MIDI bytes and feed note messages into the buffer.
    ///
    /// Returns the decoded message so the host can act on control changes.
    pub fn handle_midi(&mut self, bytes: &[u8], now: f64) -> Option<MidiMessage> {
        let message = MidiMessage::from_bytes(bytes)?;
        match message {
            MidiMessage::NoteOn { channel, note, velocity } => {
                self.note_begin(note, velocity, channel, now)
            }
            MidiMessage::NoteOff { channel, note } => self.note_end(note, channel, now),
            MidiMessage::ControlChange { .. } => {}
        }
        Some(message)
    }

    /// Parameter 0 captures and parameter 1 undoes, whenever the value is
    /// above 0.5. Other parameters are ignored.
    pub fn parameter_changed(&mut self, index: u32, value: f32, now_frame: u64) {
        if value <= PARAM_THRESHOLD {
            return;
        }
        match index {
            PARAM_CAPTURE => {
                self.capture(now_frame);
            }
            PARAM_UNDO => {
                self.undo(now_frame);
            }
            _ => log::trace!("ignoring parameter {} = {}", index, value),
        }
    }

    /// Snapshot the buffer as the new active loop and restart playback at
    /// `now_frame`. Returns false, changing nothing, if the buffer is empty.
    pub fn capture(&mut self, now_frame: u64) -> bool {
        let snapshot = self.buffer.snapshot_and_normalize();
        if snapshot.is_empty() {
            log::debug!("capture ignored: nothing played");
            return false;
        }

        log::debug!(
            "captured loop of {} notes ({:.3}s)",
            snapshot.len(),
            crate::note::sequence_span(&snapshot)
        );
        self.history.push(snapshot);
        self.activate(now_frame);
        true
    }

    /// Drop the active loop and fall back to the previous one. Returns false,
    /// changing nothing, if the history is empty.
    pub fn undo(&mut self, now_frame: u64) -> bool {
        if self.history.pop().is_none() {
            log::debug!("undo ignored: history is empty");
            return false;
        }

        log::debug!("undo: {} loops left", self.history.len());
        self.activate(now_frame);
        true
    }

    /// Rebuild from the active loop and restart playback.
    fn activate(&mut self, now_frame: u64) {
        self.generator.rebuild(self.history.active());
        if self.generator.is_enabled() {
            self.scheduler.restart(now_frame, &mut self.generator);
        } else {
            log::debug!("active loop too short to vary, playback stopped");
            self.scheduler.stop();
        }
    }

    /// Forget everything except notes that still need to be ended.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.history.clear();
        self.generator.rebuild(None);
        self.scheduler.stop();
    }

    fn apply(&mut self, action: ControlAction, now_frame: u64) {
        match action {
            ControlAction::Capture => {
                self.capture(now_frame);
            }
            ControlAction::Undo => {
                self.undo(now_frame);
            }
            ControlAction::Parameter { index, value } => {
                self.parameter_changed(index, value, now_frame)
            }
            ControlAction::Reset => self.reset(),
        }
    }

    /// Process one block of `block_length` frames starting at absolute frame
    /// `block_start`.
    ///
    /// Queued actions are applied first, as of `block_start`. `out` is
    /// cleared and filled with the block's events ordered by offset, with
    /// note ends before note begins at the same offset.
    pub fn process_block(&mut self, block_start: u64, block_length: u32, out: &mut Vec<OutputEvent>) {
        out.clear();
        while let Ok(action) = self.control_rx.try_recv() {
            self.apply(action, block_start);
        }

        self.scheduler
            .process_block(block_start, block_length, &mut self.generator, out);
        out.sort_unstable_by_key(|event| (event.offset, event.is_begin));
    }

    /// End every sounding note at offset 0 and stop playback.
    pub fn flush_all_notes(&mut self, out: &mut Vec<OutputEvent>) {
        self.scheduler.stop();
        self.scheduler.flush_all_notes(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::FallbackPolicy;

    const SAMPLE_RATE: f64 = 44100.0;
    const BLOCK: u32 = 512;

    fn settings() -> LooperSettings {
        LooperSettings {
            seed: Some(1),
            ..LooperSettings::default()
        }
    }

    fn play(looper: &mut Looper, notes: &[(f64, u8, u8, f64)]) {
        for &(start, pitch, velocity, duration) in notes {
            looper.note_begin(pitch, velocity, 0, start);
            looper.note_end(pitch, 0, start + duration);
        }
    }

    #[test]
    fn test_two_note_scenario() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        play(&mut looper, &[(3.0, 60, 100, 0.2), (3.5, 64, 90, 0.3)]);
        assert!(looper.capture(0));

        let active = looper.active_loop().unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].timestamp, 0.0);
        assert!((active[1].timestamp - 0.5).abs() < 1e-9);

        let models = looper.generator().models();
        assert_eq!(models.next_pitches(60), &[64]);
        assert!(models.next_pitches(64).is_empty());
        assert_eq!(looper.scheduler().variation().len(), 2);

        let mut out = Vec::new();
        looper.process_block(0, BLOCK, &mut out);
        assert_eq!(out, vec![OutputEvent::begin(0, 60, 100, 0)]);
    }

    #[test]
    fn test_capture_with_empty_buffer_is_noop() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        assert!(!looper.capture(0));
        assert!(looper.history().is_empty());
        assert!(looper.active_loop().is_none());
        assert!(!looper.scheduler().is_active());

        // With an active loop, an empty buffer still changes nothing
        play(&mut looper, &[(0.0, 60, 100, 0.1), (0.2, 62, 100, 0.1)]);
        looper.capture(0);
        let mut empty = Looper::new(&settings(), SAMPLE_RATE);
        std::mem::swap(&mut empty.buffer, &mut looper.buffer);
        assert!(!looper.capture(1000));
        assert_eq!(looper.history().len(), 1);
        assert_eq!(looper.scheduler().variation_start_frame(), 0);
    }

    #[test]
    fn test_undo_with_empty_history_is_noop() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        assert!(!looper.undo(0));
        assert!(looper.history().is_empty());
        assert!(!looper.scheduler().is_active());
        assert!(looper.generator().models().is_empty());
    }

    #[test]
    fn test_undo_restores_previous_loop() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        play(&mut looper, &[(0.0, 60, 100, 0.1), (0.2, 62, 100, 0.1)]);
        looper.capture(0);

        play(&mut looper, &[(1.0, 70, 100, 0.1), (1.2, 72, 100, 0.1)]);
        looper.capture(44100);
        // The second capture includes everything still in the window
        assert_eq!(looper.active_loop().unwrap().len(), 4);

        assert!(looper.undo(88200));
        assert_eq!(looper.history().len(), 1);
        assert_eq!(looper.active_loop().unwrap()[0].pitch, 60);
        assert_eq!(looper.generator().models().next_pitches(60), &[62]);
        assert_eq!(looper.scheduler().variation_start_frame(), 88200);
        assert!(looper.scheduler().is_active());

        // Undoing the last loop stops playback
        assert!(looper.undo(90000));
        assert!(looper.active_loop().is_none());
        assert!(!looper.scheduler().is_active());
        let mut out = Vec::new();
        for block in 176..400u64 {
            looper.process_block(block * u64::from(BLOCK), BLOCK, &mut out);
            assert!(out.iter().all(|e| !e.is_begin));
        }
    }

    #[test]
    fn test_history_capacity() {
        let config = LooperSettings {
            history_capacity: 3,
            ..settings()
        };
        let mut looper = Looper::new(&config, SAMPLE_RATE);
        for i in 0..10 {
            let t = i as f64;
            play(&mut looper, &[(t, 60, 100, 0.1), (t + 0.2, 62, 100, 0.1)]);
            looper.capture(i * 44100);
            assert!(looper.history().len() <= 3);
        }
        assert_eq!(looper.history().len(), 3);
    }

    #[test]
    fn test_parameter_changed() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        play(&mut looper, &[(0.0, 60, 100, 0.1), (0.2, 62, 100, 0.1)]);

        looper.parameter_changed(PARAM_CAPTURE, 0.5, 0);
        assert!(looper.history().is_empty());
        looper.parameter_changed(7, 1.0, 0);
        assert!(looper.history().is_empty());

        looper.parameter_changed(PARAM_CAPTURE, 1.0, 0);
        assert_eq!(looper.history().len(), 1);
        looper.parameter_changed(PARAM_UNDO, 0.51, 0);
        assert!(looper.history().is_empty());
    }

    #[test]
    fn test_handle_midi_feeds_buffer() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        looper.handle_midi(&[0x91, 60, 100], 0.0);
        looper.handle_midi(&[0x91, 60, 0], 0.25);
        looper.handle_midi(&[0x91, 62, 80], 0.5);
        looper.handle_midi(&[0x81, 62, 64], 0.75);
        let cc = looper.handle_midi(&[0xB0, 20, 127], 1.0);

        assert_eq!(looper.buffer().len(), 2);
        assert_eq!(
            cc,
            Some(MidiMessage::ControlChange { channel: 0, controller: 20, value: 127 })
        );
        let notes = looper.buffer().snapshot_and_normalize();
        assert_eq!(notes[1].velocity, 80);
        assert_eq!(notes[1].channel, 1);
    }

    #[test]
    fn test_queued_capture_applies_at_block_start() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        let handle = looper.handle();
        play(&mut looper, &[(0.0, 60, 100, 0.1), (0.2, 62, 100, 0.1)]);

        handle.capture().unwrap();
        assert!(looper.history().is_empty());

        let mut out = Vec::new();
        looper.process_block(1024, BLOCK, &mut out);
        assert_eq!(looper.history().len(), 1);
        assert_eq!(looper.scheduler().variation_start_frame(), 1024);
        assert_eq!(out, vec![OutputEvent::begin(0, 60, 100, 0)]);
    }

    #[test]
    fn test_full_queue_is_reported() {
        let looper = Looper::new(&settings(), SAMPLE_RATE);
        let handle = looper.handle();
        for _ in 0..CONTROL_QUEUE_SIZE {
            handle.undo().unwrap();
        }
        assert!(matches!(handle.undo(), Err(Error::Midi(_))));
    }

    #[test]
    fn test_ends_precede_begins_at_same_offset() {
        let mut looper = Looper::new(&settings(), 1000.0);
        play(&mut looper, &[(0.0, 60, 100, 0.5), (0.5, 62, 100, 0.5)]);
        looper.capture(0);

        let mut out = Vec::new();
        looper.process_block(0, BLOCK, &mut out);
        assert_eq!(
            out,
            vec![
                OutputEvent::begin(0, 60, 100, 0),
                OutputEvent::end(500, 60, 0),
                OutputEvent::begin(500, 62, 100, 0),
            ]
        );
    }

    #[test]
    fn test_reset_keeps_pending_ends() {
        let mut looper = Looper::new(&settings(), SAMPLE_RATE);
        play(&mut looper, &[(0.0, 60, 100, 0.5), (0.6, 62, 100, 0.5)]);
        looper.capture(0);
        let mut out = Vec::new();
        looper.process_block(0, BLOCK, &mut out);

        looper.handle().reset().unwrap();
        looper.process_block(512, BLOCK, &mut out);
        assert!(looper.history().is_empty());
        assert!(looper.buffer().is_empty());

        looper.flush_all_notes(&mut out);
        assert_eq!(out, vec![OutputEvent::end(0, 60, 0)]);
    }

    #[test]
    fn test_seeded_loopers_play_identically() {
        let notes = [
            (0.0, 60, 100, 0.1),
            (0.25, 62, 100, 0.1),
            (0.5, 64, 100, 0.2),
            (0.75, 60, 100, 0.1),
            (1.0, 67, 100, 0.3),
            (1.25, 60, 100, 0.1),
        ];
        let config = LooperSettings {
            seed: Some(99),
            fallback: FallbackPolicy::RandomObserved,
            ..LooperSettings::default()
        };
        let mut a = Looper::new(&config, SAMPLE_RATE);
        let mut b = Looper::new(&config, SAMPLE_RATE);
        play(&mut a, &notes);
        play(&mut b, &notes);
        a.capture(0);
        b.capture(0);

        let (mut out_a, mut out_b) = (Vec::new(), Vec::new());
        for block in 0..1000u64 {
            a.process_block(block * 512, BLOCK, &mut out_a);
            b.process_block(block * 512, BLOCK, &mut out_b);
            assert_eq!(out_a, out_b);
        }
    }
}
