//! Offline simulation
//!
//! Plays a short synthetic melody into a [`Looper`], captures it and runs the
//! block loop for a while without any audio host. Useful for checking what the
//! looper does with a given configuration.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::LooperSettings;
use crate::looper::Looper;
use crate::note::NoteEvent;
use crate::scheduler::OutputEvent;

/// Pitch and relative length of each note of the test melody.
const MELODY: [(u8, f64); 9] = [
    (60, 1.0),
    (62, 0.5),
    (60, 1.0),
    (64, 0.5),
    (65, 2.0),
    (64, 0.5),
    (62, 1.0),
    (60, 0.5),
    (58, 2.0),
];

/// Length of a note with relative length 1.0, in seconds.
const BASE_DURATION: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub sample_rate: f64,
    pub block_length: u32,
    /// How long to play after the capture, in seconds
    pub seconds: f64,
    /// Seed for the synthetic performance
    pub seed: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100.0,
            block_length: 512,
            seconds: 8.0,
            seed: 0,
        }
    }
}

/// Result of a simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    /// The captured loop
    pub captured: Vec<NoteEvent>,
    /// Absolute frame at which the loop was captured
    pub capture_frame: u64,
    /// Every output event with its absolute frame
    pub events: Vec<(u64, OutputEvent)>,
}

impl SimulationReport {
    pub fn note_begins(&self) -> usize {
        self.events.iter().filter(|(_, e)| e.is_begin).count()
    }

    pub fn note_ends(&self) -> usize {
        self.events.iter().filter(|(_, e)| !e.is_begin).count()
    }
}

/// Play the test melody with slightly random timing and velocities.
fn perform(looper: &mut Looper, rng: &mut StdRng) -> f64 {
    let mut time = 0.0;
    let mut last_end: f64 = 0.0;
    for &(pitch, length) in &MELODY {
        time += f64::from(rng.random_range(100u32..=500)) / 1000.0;
        let velocity = rng.random_range(90..110);
        let duration = BASE_DURATION * length;
        looper.note_begin(pitch, velocity, 0, time);
        looper.note_end(pitch, 0, time + duration);
        last_end = last_end.max(time + duration);
    }
    last_end
}

/// Run a full simulation: perform, capture, then play `options.seconds`.
pub fn run_simulation(settings: &LooperSettings, options: &SimulationOptions) -> SimulationReport {
    let mut looper = Looper::new(settings, options.sample_rate);
    let mut rng = StdRng::seed_from_u64(options.seed);

    let performance_end = perform(&mut looper, &mut rng);
    let block_length = u64::from(options.block_length.max(1));
    let end_frame = (performance_end * options.sample_rate).round() as u64;
    // Capture lands on the next block boundary, as a queued action would
    let capture_frame = end_frame.div_ceil(block_length) * block_length;
    looper.capture(capture_frame);
    log::info!(
        "captured {} notes at frame {}",
        looper.history().active().map_or(0, <[NoteEvent]>::len),
        capture_frame
    );

    let mut report = SimulationReport {
        captured: looper.active_loop().map(<[NoteEvent]>::to_vec).unwrap_or_default(),
        capture_frame,
        events: Vec::new(),
    };

    let blocks = ((options.seconds * options.sample_rate) / block_length as f64).ceil() as u64;
    let mut out = Vec::with_capacity(64);
    for block in 0..blocks {
        let block_start = capture_frame + block * block_length;
        looper.process_block(block_start, options.block_length.max(1), &mut out);
        report
            .events
            .extend(out.iter().map(|e| (block_start + u64::from(e.offset), *e)));
    }

    out.clear();
    looper.flush_all_notes(&mut out);
    let tail = capture_frame + blocks * block_length;
    report.events.extend(out.iter().map(|e| (tail, *e)));
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> LooperSettings {
        LooperSettings {
            seed: Some(5),
            ..LooperSettings::default()
        }
    }

    #[test]
    fn test_simulation_captures_melody() {
        let report = run_simulation(&seeded(), &SimulationOptions::default());
        assert_eq!(report.captured.len(), MELODY.len());
        assert_eq!(report.captured[0].timestamp, 0.0);
        assert_eq!(report.capture_frame % 512, 0);
    }

    #[test]
    fn test_simulation_balances_begins_and_ends() {
        let report = run_simulation(&seeded(), &SimulationOptions::default());
        assert!(report.note_begins() >= MELODY.len());
        assert_eq!(report.note_begins(), report.note_ends());
        assert!(report
            .events
            .windows(2)
            .all(|pair| pair[0].0 <= pair[1].0));
    }

    #[test]
    fn test_simulation_is_reproducible() {
        let options = SimulationOptions {
            seconds: 4.0,
            ..SimulationOptions::default()
        };
        let a = run_simulation(&seeded(), &options);
        let b = run_simulation(&seeded(), &options);
        assert_eq!(a.captured, b.captured);
        assert_eq!(a.events, b.events);
    }
}
