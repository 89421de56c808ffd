//! JACK MIDI host for the looper.
//!
//! Registers a MIDI input and a MIDI output port and drives a [`Looper`]
//! from the JACK process callback: incoming events are fed with
//! frame-accurate timestamps, configured control changes are mapped to the
//! capture and undo parameters, and the block's output events are written at
//! their offsets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use jack::{Client, ClientOptions, MidiIn, MidiOut, Port, ProcessScope};

use crate::config::{Config, MidiSettings};
use crate::error::{Error, Result};
use crate::looper::{Looper, LooperHandle};
use crate::midi::MidiMessage;
use crate::scheduler::OutputEvent;

/// MIDI port type string used by JACK.
const MIDI_PORT_TYPE: &str = "8 bit raw midi";

/// How long [`JackLooper::stop`] waits for hanging notes to be flushed.
const STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// JACK notification handler.
struct JackNotifications {
    server_gone: Arc<AtomicBool>,
}

impl jack::NotificationHandler for JackNotifications {
    unsafe fn shutdown(&mut self, status: jack::ClientStatus, reason: &str) {
        log::warn!("JACK client shutdown: {:?} - {}", status, reason);
        self.server_gone.store(true, Ordering::SeqCst);
    }
}

/// Runs in the JACK realtime thread.
struct LooperProcessor {
    looper: Looper,
    midi: MidiSettings,
    midi_in: Port<MidiIn>,
    midi_out: Port<MidiOut>,
    /// Output of the current block, reused across cycles
    out: Vec<OutputEvent>,
    clock: FrameClock,
    stop_requested: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
}

/// Monotonic 64-bit frame counter built from JACK's wrapping 32-bit one.
#[derive(Debug, Default)]
struct FrameClock {
    frame: u64,
    last_jack_frame: Option<u32>,
}

impl FrameClock {
    /// Absolute frame of the block starting at `jack_frame`.
    fn advance(&mut self, jack_frame: u32) -> u64 {
        self.frame = match self.last_jack_frame {
            Some(previous) => self.frame + u64::from(jack_frame.wrapping_sub(previous)),
            None => u64::from(jack_frame),
        };
        self.last_jack_frame = Some(jack_frame);
        self.frame
    }
}

impl jack::ProcessHandler for LooperProcessor {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> jack::Control {
        let block_start = self.clock.advance(ps.last_frame_time());
        let block_length = ps.n_frames();
        let sample_rate = client.sample_rate() as f64;
        if sample_rate != self.looper.scheduler().sample_rate() {
            self.looper.set_sample_rate(sample_rate);
        }

        for event in self.midi_in.iter(ps) {
            let now = (block_start + u64::from(event.time)) as f64 / sample_rate;
            if let Some(MidiMessage::ControlChange { channel, controller, value }) =
                self.looper.handle_midi(event.bytes, now)
            {
                if let Some(index) = self.midi.parameter_for_cc(channel, controller) {
                    self.looper
                        .parameter_changed(index, f32::from(value) / 127.0, block_start);
                }
            }
        }

        if self.stop_requested.load(Ordering::Acquire) {
            if !self.stopped.load(Ordering::Acquire) {
                self.out.clear();
                self.looper.flush_all_notes(&mut self.out);
                self.stopped.store(true, Ordering::Release);
            } else {
                self.out.clear();
            }
        } else {
            self.looper
                .process_block(block_start, block_length, &mut self.out);
        }

        let mut writer = self.midi_out.writer(ps);
        for event in &self.out {
            let bytes = MidiMessage::from(event).to_bytes();
            let raw = jack::RawMidi {
                time: event.offset,
                bytes: &bytes,
            };
            let _ = writer.write(&raw);
        }

        jack::Control::Continue
    }
}

/// A running looper attached to JACK.
pub struct JackLooper {
    async_client: jack::AsyncClient<JackNotifications, LooperProcessor>,
    handle: LooperHandle,
    input_port: String,
    output_port: String,
    stop_requested: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    server_gone: Arc<AtomicBool>,
}

impl JackLooper {
    /// Create the JACK client, register ports, start processing and apply
    /// the configured auto-connections.
    pub fn start(config: &Config) -> Result<Self> {
        let settings = &config.midi;
        let (client, _status) = Client::new(&settings.client_name, ClientOptions::NO_START_SERVER)?;

        let midi_in = client.register_port(&settings.input_port, MidiIn::default())?;
        let midi_out = client.register_port(&settings.output_port, MidiOut::default())?;
        let input_port = midi_in.name()?;
        let output_port = midi_out.name()?;

        let sample_rate = client.sample_rate() as f64;
        let looper = Looper::new(&config.looper, sample_rate);
        let handle = looper.handle();

        let stop_requested = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let server_gone = Arc::new(AtomicBool::new(false));

        let processor = LooperProcessor {
            looper,
            midi: settings.clone(),
            midi_in,
            midi_out,
            out: Vec::with_capacity(512),
            clock: FrameClock::default(),
            stop_requested: stop_requested.clone(),
            stopped: stopped.clone(),
        };
        let notifications = JackNotifications {
            server_gone: server_gone.clone(),
        };

        let async_client = client.activate_async(notifications, processor)?;
        log::info!(
            "JACK looper '{}' running at {} Hz: {} -> {}",
            settings.client_name,
            sample_rate,
            input_port,
            output_port
        );

        let host = Self {
            async_client,
            handle,
            input_port,
            output_port,
            stop_requested,
            stopped,
            server_gone,
        };

        for source in settings.auto_connect_inputs.iter().flatten() {
            if let Err(e) = host.connect_input(source) {
                log::warn!("Failed to auto-connect {}: {}", source, e);
            }
        }
        for destination in settings.auto_connect_outputs.iter().flatten() {
            if let Err(e) = host.connect_output(destination) {
                log::warn!("Failed to auto-connect to {}: {}", destination, e);
            }
        }

        Ok(host)
    }

    /// Handle for queuing capture and undo from this thread.
    pub fn handle(&self) -> LooperHandle {
        self.handle.clone()
    }

    pub fn input_port(&self) -> &str {
        &self.input_port
    }

    pub fn output_port(&self) -> &str {
        &self.output_port
    }

    /// Whether the JACK server shut the client down.
    pub fn is_server_gone(&self) -> bool {
        self.server_gone.load(Ordering::SeqCst)
    }

    /// Connect a JACK MIDI source to our input.
    pub fn connect_input(&self, source: &str) -> Result<()> {
        self.async_client
            .as_client()
            .connect_ports_by_name(source, &self.input_port)?;
        log::info!("Connected JACK MIDI: {} -> {}", source, self.input_port);
        Ok(())
    }

    /// Connect our output to a JACK MIDI sink.
    pub fn connect_output(&self, destination: &str) -> Result<()> {
        self.async_client
            .as_client()
            .connect_ports_by_name(&self.output_port, destination)?;
        log::info!("Connected JACK MIDI: {} -> {}", self.output_port, destination);
        Ok(())
    }

    /// End all sounding notes, then deactivate the client.
    pub fn stop(self) -> Result<()> {
        self.stop_requested.store(true, Ordering::Release);
        let deadline = Instant::now() + STOP_TIMEOUT;
        while !self.stopped.load(Ordering::Acquire) && !self.is_server_gone() {
            if Instant::now() >= deadline {
                log::warn!("Timed out waiting for JACK to flush hanging notes");
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        if self.is_server_gone() {
            return Err(Error::Midi("JACK server went away".to_string()));
        }
        self.async_client.deactivate()?;
        log::info!("JACK looper stopped");
        Ok(())
    }
}

/// Check if JACK is running
pub fn is_jack_running() -> bool {
    Client::new("vibe-looper-probe", ClientOptions::NO_START_SERVER).is_ok()
}

/// List JACK MIDI ports as `(sources, sinks)`.
///
/// Sources can be connected to our input, sinks to our output.
pub fn list_jack_midi_ports() -> Result<(Vec<String>, Vec<String>)> {
    let (client, _status) = Client::new("vibe-looper-list", ClientOptions::NO_START_SERVER)?;
    let sources = client.ports(None, Some(MIDI_PORT_TYPE), jack::PortFlags::IS_OUTPUT);
    let sinks = client.ports(None, Some(MIDI_PORT_TYPE), jack::PortFlags::IS_INPUT);
    Ok((sources, sinks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_clock_is_monotonic() {
        let mut clock = FrameClock::default();
        assert_eq!(clock.advance(1000), 1000);
        assert_eq!(clock.advance(1512), 1512);
        assert_eq!(clock.advance(2024), 2024);
    }

    #[test]
    fn test_frame_clock_survives_wraparound() {
        let mut clock = FrameClock::default();
        let start = u32::MAX - 255;
        assert_eq!(clock.advance(start), u64::from(start));
        // 512 frames later JACK's counter has wrapped to 256
        assert_eq!(clock.advance(256), u64::from(start) + 512);
        assert_eq!(clock.advance(768), u64::from(start) + 1024);
    }
}
