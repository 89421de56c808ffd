//! Frame-accurate playback of variations.
//!
//! The scheduler is driven once per processing block. It walks the current
//! variation with a playhead, emits note begins whose onset frame falls inside
//! the block, and keeps a pending set of note ends so notes that straddle a
//! block boundary are closed in a later block. When the playhead runs off the
//! end of a variation, the next one is generated and scheduled to start right
//! where the previous one ended.
//!
//! Nothing in [`PlaybackScheduler::process_block`] allocates once the
//! variation and pending buffers have grown to their working size.

use crate::generator::VariationGenerator;
use crate::note::{sequence_span, NoteEvent};

/// One timed output event inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputEvent {
    /// Frame offset from the start of the block
    pub offset: u32,
    pub pitch: u8,
    pub velocity: u8,
    pub channel: u8,
    /// Note begin if true, note end otherwise
    pub is_begin: bool,
}

impl OutputEvent {
    pub fn begin(offset: u32, pitch: u8, velocity: u8, channel: u8) -> Self {
        Self {
            offset,
            pitch,
            velocity,
            channel,
            is_begin: true,
        }
    }

    pub fn end(offset: u32, pitch: u8, channel: u8) -> Self {
        Self {
            offset,
            pitch,
            velocity: 0,
            channel,
            is_begin: false,
        }
    }
}

/// A note end that has been scheduled but not yet emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingEnd {
    frame: u64,
    pitch: u8,
    channel: u8,
}

/// Per-block driver for variation playback.
#[derive(Debug)]
pub struct PlaybackScheduler {
    sample_rate: f64,
    /// Variation currently playing
    variation: Vec<NoteEvent>,
    /// Index of the next note to begin
    playhead: usize,
    /// Absolute frame at which the current variation's time 0.0 falls
    variation_start_frame: u64,
    pending_ends: Vec<PendingEnd>,
    /// False until a variation is installed, and again after an empty one
    active: bool,
}

impl PlaybackScheduler {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate: sample_rate.max(1.0),
            variation: Vec::with_capacity(256),
            playhead: 0,
            variation_start_frame: 0,
            pending_ends: Vec::with_capacity(256),
            active: false,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Change the sample rate. Takes effect for the next scheduled note.
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate.max(1.0);
    }

    /// Whether a variation is playing.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn variation(&self) -> &[NoteEvent] {
        &self.variation
    }

    pub fn playhead(&self) -> usize {
        self.playhead
    }

    pub fn variation_start_frame(&self) -> u64 {
        self.variation_start_frame
    }

    /// Number of note ends still owed.
    pub fn pending_ends(&self) -> usize {
        self.pending_ends.len()
    }

    fn to_frames(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate).round() as u64
    }

    /// Install a fresh variation starting at `now_frame`.
    ///
    /// Notes already begun keep their pending ends. If the generator is
    /// disabled, playback stops until the next restart.
    pub fn restart(&mut self, now_frame: u64, generator: &mut VariationGenerator) {
        generator.generate_into(&mut self.variation);
        self.playhead = 0;
        self.variation_start_frame = now_frame;
        self.active = !self.variation.is_empty();
        log::debug!(
            "playback restarted at frame {} with {} notes",
            now_frame,
            self.variation.len()
        );
    }

    /// Stop starting new notes. Pending ends are still emitted.
    pub fn stop(&mut self) {
        self.active = false;
        self.variation.clear();
        self.playhead = 0;
    }

    /// Emit every begin and end that falls in
    /// `[block_start, block_start + block_length)` into `out`.
    pub fn process_block(
        &mut self,
        block_start: u64,
        block_length: u32,
        generator: &mut VariationGenerator,
        out: &mut Vec<OutputEvent>,
    ) {
        let block_end = block_start + u64::from(block_length);

        if self.active {
            let mut rolled_over = false;
            loop {
                self.scan_note_begins(block_start, block_end, out);
                if self.playhead < self.variation.len() || rolled_over {
                    break;
                }

                // Variation exhausted: the next one starts where this one ends
                let span = sequence_span(&self.variation);
                let next_start = self.variation_start_frame + self.to_frames(span);
                generator.generate_into(&mut self.variation);
                self.playhead = 0;
                rolled_over = true;

                if next_start < block_start {
                    log::trace!(
                        "resyncing variation start from frame {} to {}",
                        next_start,
                        block_start
                    );
                }
                self.variation_start_frame = next_start.max(block_start);

                if self.variation.is_empty() {
                    log::debug!("generation disabled, playback stopped");
                    self.active = false;
                    break;
                }
                log::trace!(
                    "new variation of {} notes at frame {}",
                    self.variation.len(),
                    self.variation_start_frame
                );
            }
        }

        self.flush_due_ends(block_start, block_end, out);
    }

    fn scan_note_begins(&mut self, block_start: u64, block_end: u64, out: &mut Vec<OutputEvent>) {
        while let Some(note) = self.variation.get(self.playhead).copied() {
            let on_frame = self.variation_start_frame + self.to_frames(note.timestamp);
            if on_frame >= block_end {
                break;
            }
            if on_frame >= block_start {
                out.push(OutputEvent::begin(
                    (on_frame - block_start) as u32,
                    note.pitch,
                    note.velocity,
                    note.channel,
                ));
                // An end never shares the frame of its begin
                let off_frame = on_frame + self.to_frames(note.duration).max(1);
                self.pending_ends.push(PendingEnd {
                    frame: off_frame,
                    pitch: note.pitch,
                    channel: note.channel,
                });
            } else {
                log::trace!("skipping late note {} at frame {}", note, on_frame);
            }
            self.playhead += 1;
        }
    }

    fn flush_due_ends(&mut self, block_start: u64, block_end: u64, out: &mut Vec<OutputEvent>) {
        self.pending_ends.retain(|end| {
            if end.frame < block_end {
                // Ends left behind by a clock jump go out at the block start
                let offset = end.frame.saturating_sub(block_start) as u32;
                out.push(OutputEvent::end(offset, end.pitch, end.channel));
                false
            } else {
                true
            }
        });
    }

    /// Emit every pending end at offset 0, leaving no note hanging.
    pub fn flush_all_notes(&mut self, out: &mut Vec<OutputEvent>) {
        out.extend(
            self.pending_ends
                .drain(..)
                .map(|end| OutputEvent::end(0, end.pitch, end.channel)),
        );
    }

    /// Forget the variation and all pending ends.
    pub fn reset(&mut self) {
        self.stop();
        self.pending_ends.clear();
        self.variation_start_frame = 0;
    }
}
