//! vibe-looper - Retrospective MIDI Looper for VibeLang
//!
//! Runs the looper as a JACK MIDI client, or offline as a simulation.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::Path;

use vibelang_looper::{
    config::Config,
    generator::FallbackPolicy,
    jack_host::{is_jack_running, list_jack_midi_ports, JackLooper},
    looper::LooperHandle,
    simulate::{run_simulation, SimulationOptions},
};

#[derive(Parser)]
#[command(name = "vibe-looper")]
#[command(author, version, about = "Retrospective MIDI Looper for VibeLang", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: ~/.config/vibe-looper/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// JACK client name
    #[arg(long)]
    client_name: Option<String>,

    /// Seconds of playing remembered for capture
    #[arg(long)]
    window: Option<f64>,

    /// Number of loops kept for undo
    #[arg(long)]
    history: Option<usize>,

    /// Random seed for reproducible variations
    #[arg(long)]
    seed: Option<u64>,

    /// Fallback for notes without recorded successors
    #[arg(long, value_parser = parse_fallback)]
    fallback: Option<FallbackPolicy>,

    /// JACK MIDI source to connect to our input (repeatable)
    #[arg(long = "connect-in")]
    connect_in: Vec<String>,

    /// JACK MIDI sink to connect our output to (repeatable)
    #[arg(long = "connect-out")]
    connect_out: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a synthetic melody, capture it and print the generated events
    Simulate {
        /// Seconds to play after the capture
        #[arg(long, default_value = "8.0")]
        seconds: f64,
        /// Sample rate in Hz
        #[arg(long, default_value = "44100")]
        sample_rate: u32,
        /// Frames per block
        #[arg(long, default_value = "512")]
        block_length: u32,
        /// Seed for the synthetic performance
        #[arg(long, default_value = "0")]
        performance_seed: u64,
    },
    /// Create a default configuration file
    Init,
    /// Show the configuration file path
    ConfigPath,
    /// List available JACK MIDI ports
    ListPorts,
}

fn parse_fallback(value: &str) -> std::result::Result<FallbackPolicy, String> {
    match value {
        "repeat" => Ok(FallbackPolicy::Repeat),
        "seed-position" => Ok(FallbackPolicy::SeedPosition),
        "random-observed" => Ok(FallbackPolicy::RandomObserved),
        other => Err(format!(
            "unknown fallback '{}', expected repeat, seed-position or random-observed",
            other
        )),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init) => {
            let path = Config::create_default_config_file()?;
            println!("Created default config at: {}", path.display());
            return Ok(());
        }
        Some(Commands::ConfigPath) => {
            let path = Config::config_path()?;
            println!("{}", path.display());
            return Ok(());
        }
        Some(Commands::ListPorts) => {
            if !is_jack_running() {
                println!("JACK is not running");
                return Ok(());
            }
            let (sources, sinks) = list_jack_midi_ports()?;
            print_ports("JACK MIDI sources (connect with --connect-in):", &sources);
            print_ports("JACK MIDI sinks (connect with --connect-out):", &sinks);
            return Ok(());
        }
        _ => {}
    }

    // Load config
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(Path::new(path))?,
        None => Config::load_or_default(),
    };

    // Apply CLI overrides
    if let Some(name) = cli.client_name {
        config.midi.client_name = name;
    }
    if let Some(window) = cli.window {
        config.looper.window_seconds = window;
    }
    if let Some(history) = cli.history {
        config.looper.history_capacity = history;
    }
    if cli.seed.is_some() {
        config.looper.seed = cli.seed;
    }
    if let Some(fallback) = cli.fallback {
        config.looper.fallback = fallback;
    }
    if !cli.connect_in.is_empty() {
        config
            .midi
            .auto_connect_inputs
            .get_or_insert_with(Vec::new)
            .extend(cli.connect_in);
    }
    if !cli.connect_out.is_empty() {
        config
            .midi
            .auto_connect_outputs
            .get_or_insert_with(Vec::new)
            .extend(cli.connect_out);
    }
    config.validate()?;

    if let Some(Commands::Simulate {
        seconds,
        sample_rate,
        block_length,
        performance_seed,
    }) = cli.command
    {
        let options = SimulationOptions {
            sample_rate: f64::from(sample_rate),
            block_length,
            seconds,
            seed: performance_seed,
        };
        simulate(&config, &options);
        return Ok(());
    }

    run_jack(&config)
}

fn print_ports(title: &str, ports: &[String]) {
    println!("{}", title);
    if ports.is_empty() {
        println!("  (none)");
    }
    for port in ports {
        println!("  {}", port);
    }
}

fn simulate(config: &Config, options: &SimulationOptions) {
    let report = run_simulation(&config.looper, options);

    println!("--- Captured loop ({} notes) ---", report.captured.len());
    for note in &report.captured {
        println!("{}", note);
    }

    println!("\n--- Output from frame {} ---", report.capture_frame);
    for (frame, event) in &report.events {
        let seconds = (frame - report.capture_frame) as f64 / options.sample_rate;
        if event.is_begin {
            println!(
                "{:>10} {:>8.3}s  on  n={:<3} v={:<3} ch={}",
                frame, seconds, event.pitch, event.velocity, event.channel
            );
        } else {
            println!(
                "{:>10} {:>8.3}s  off n={:<3}       ch={}",
                frame, seconds, event.pitch, event.channel
            );
        }
    }
    println!(
        "\n{} note begins, {} note ends",
        report.note_begins(),
        report.note_ends()
    );
}

fn run_jack(config: &Config) -> Result<()> {
    if !is_jack_running() {
        bail!("JACK is not running");
    }

    let host = JackLooper::start(config)?;
    println!("vibe-looper: {} -> {}", host.input_port(), host.output_port());
    if let Some(cc) = config.midi.capture_cc {
        println!("  CC {} captures", cc);
    }
    if let Some(cc) = config.midi.undo_cc {
        println!("  CC {} undoes", cc);
    }
    println!("Commands: c = capture, u = undo, r = reset, q = quit");

    let result = command_loop(&host.handle(), io::stdin().lock());
    host.stop()?;
    result
}

fn command_loop(handle: &LooperHandle, input: impl BufRead) -> Result<()> {
    let mut stdout = io::stdout();
    for line in input.lines() {
        let line = line?;
        let sent = match line.trim() {
            "c" | "capture" => handle.capture(),
            "u" | "undo" => handle.undo(),
            "r" | "reset" => handle.reset(),
            "q" | "quit" => break,
            "" => continue,
            other => {
                println!("Unknown command '{}'", other);
                continue;
            }
        };
        if let Err(e) = sent {
            println!("{}", e);
        }
        stdout.flush()?;
    }
    Ok(())
}
