//! `beaconrec` - host build of the UWB position recorder
//!
//! Boots the recorder firmware against simulated hardware and reads back the
//! fault log and recordings it persists.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use beaconrec::cli::{Cli, Command, ConfigCommand, FaultsCommand, RecordingCommand, RunCommand};
use beaconrec::clock::SystemClock;
use beaconrec::firmware::{Board, Firmware};
use beaconrec::host::{read_image, DirectoryMedium, FileMemory, SimulatedRanger};
use beaconrec::nvlog::{read_history, ErrorRecord};
use beaconrec::recording::{average_position, decode_recording, PositionSample, SAMPLE_SIZE};
use beaconrec::session::{SessionId, SessionRegistry};
use beaconrec::{init_logging, Config};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config_path = cli.config;
    match cli.command {
        Command::Run(cmd) => handle_run(&load_config(config_path)?, &cmd),
        Command::Faults(cmd) => handle_faults(&load_config(config_path)?, &cmd),
        Command::Recording(cmd) => handle_recording(&cmd),
        Command::Config(cmd) => handle_config(config_path, cmd),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    Config::load_from(path).context("loading configuration")
}

fn handle_run(config: &Config, cmd: &RunCommand) -> anyhow::Result<()> {
    let image = config.image_path();
    let memory = FileMemory::open(&image, config.memory.size)
        .with_context(|| format!("opening memory image {}", image.display()))?;
    let board = Board {
        memory,
        medium: DirectoryMedium::new(config.card_dir()),
        device: SimulatedRanger::new(config.simulation.clone()),
        clock: SystemClock::new(),
    };

    let mut firmware = Firmware::boot(board, &config.firmware_settings())?;
    if let Some(reason) = firmware.halt_reason() {
        bail!("session {} halted: {reason}", firmware.session());
    }

    match cmd.ticks {
        Some(ticks) => {
            let ran = firmware.run_for(ticks);
            info!(session = %firmware.session(), ticks = ran, "run finished");
            Ok(())
        }
        None => {
            let reason = firmware.run();
            bail!("session {} halted: {reason}", firmware.session())
        }
    }
}

#[derive(Debug, Serialize)]
struct FaultReport {
    session: Option<SessionId>,
    setup: Vec<ErrorRecord>,
    #[serde(rename = "loop")]
    run: Vec<ErrorRecord>,
}

fn handle_faults(config: &Config, cmd: &FaultsCommand) -> anyhow::Result<()> {
    let image = config.image_path();
    let memory = read_image(&image, config.memory.size)?;
    let report = FaultReport {
        session: SessionRegistry::new(config.memory.session_address).current(&memory)?,
        setup: read_history(&memory, &config.memory.setup_ring)?,
        run: read_history(&memory, &config.memory.loop_ring)?,
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Fault log: {}", image.display());
    match report.session {
        Some(session) => println!("Last session: {session}"),
        None => println!("Last session: none"),
    }
    for (title, region, records) in [
        ("Setup", config.memory.setup_ring, &report.setup),
        ("Loop", config.memory.loop_ring, &report.run),
    ] {
        println!();
        println!("[{title} ring {region}] {} record(s)", records.len());
        for record in records {
            println!("  {record}");
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct RecordingReport<'a> {
    samples: &'a [PositionSample],
    trailing_bytes: usize,
    average: Option<[f64; 3]>,
}

fn handle_recording(cmd: &RecordingCommand) -> anyhow::Result<()> {
    let bytes = std::fs::read(&cmd.path)
        .with_context(|| format!("reading {}", cmd.path.display()))?;
    let recording = decode_recording(&bytes);
    let samples = &recording.samples;
    if recording.trailing_bytes > 0 {
        warn!(
            path = %cmd.path.display(),
            trailing_bytes = recording.trailing_bytes,
            sample_size = SAMPLE_SIZE,
            "recording ends in a torn sample; ignoring it"
        );
    }
    let average = average_position(samples);

    if cmd.json {
        let report = RecordingReport {
            samples,
            trailing_bytes: recording.trailing_bytes,
            average,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}: {} sample(s)", cmd.path.display(), samples.len());
    for sample in samples {
        println!(
            "  t={:>10}ms  x={:>7}  y={:>7}  z={:>7}",
            sample.timestamp_ms, sample.x, sample.y, sample.z
        );
    }
    match average {
        Some([x, y, z]) => {
            println!("Average (excluding first): x={x:.1} y={y:.1} z={z:.1} mm");
        }
        None => println!("Average: not enough samples"),
    }
    Ok(())
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = load_config(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Memory]");
                println!("  Image:              {}", config.image_path().display());
                println!("  Size:               {} bytes", config.memory.size);
                println!("  Session byte:       {}", config.memory.session_address);
                println!("  Setup ring:         {}", config.memory.setup_ring);
                println!("  Loop ring:          {}", config.memory.loop_ring);
                println!();
                println!("[Recording]");
                println!("  Card directory:     {}", config.card_dir().display());
                println!("  File prefix:        {}", config.recording.file_prefix);
                println!("  Flush period:       {}", config.recording.flush_period);
                println!();
                println!("[Ranging]");
                println!("  Beacon source:      {}", config.ranging.beacon_source);
                println!("  Period:             {} ms", config.ranging.period_ms);
                println!("  Dimension:          {:?}", config.ranging.dimension);
                println!("  Algorithm:          {:?}", config.ranging.algorithm);
                println!("  Height:             {} mm", config.ranging.height_mm);
            }
        }
        ConfigCommand::Path => {
            let path = config_path.unwrap_or_else(Config::default_config_path);
            println!("{}", path.display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
