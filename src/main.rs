// src/main.rs
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;

use serialscope::drivers::{list_ports, ByteSource, ParityMode, SimulatedSource, StopBitsMode};
use serialscope::{
    AcquisitionHandle, ChannelStore, CsvRecorder, EngineCommand, EngineEvent, ScopeConfig,
    SerialSource, SharedStore,
};

/// Stream multi-channel readings from a serial instrument.
#[derive(Parser, Debug)]
#[command(name = "serialscope", version)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Serial port, e.g. ttyUSB0 or /dev/ttyACM0
    #[arg(long)]
    port: Option<String>,
    #[arg(long)]
    baud: Option<u32>,
    /// none, even or odd
    #[arg(long)]
    parity: Option<String>,
    /// 1 or 2
    #[arg(long)]
    stop_bits: Option<u8>,
    /// Values per frame
    #[arg(long)]
    channels: Option<usize>,
    /// Rolling history length per channel
    #[arg(long)]
    capacity: Option<usize>,
    /// Use a synthetic instrument instead of a serial port
    #[arg(long)]
    simulate: bool,
    /// Mirror samples to CSV
    #[arg(long)]
    record: bool,
    /// CSV path (default: timestamped name)
    #[arg(long)]
    output: Option<PathBuf>,
    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,
    /// Print available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

fn build_config(args: &Args) -> Result<ScopeConfig> {
    let mut config = match &args.config {
        Some(path) => ScopeConfig::load(path)?,
        None => ScopeConfig::default(),
    };
    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud_rate = baud;
    }
    if let Some(parity) = &args.parity {
        config.serial.parity = match parity.to_ascii_lowercase().as_str() {
            "none" => ParityMode::None,
            "even" => ParityMode::Even,
            "odd" => ParityMode::Odd,
            other => bail!("unknown parity '{other}' (expected none, even or odd)"),
        };
    }
    if let Some(stop_bits) = args.stop_bits {
        config.serial.stop_bits = match stop_bits {
            1 => StopBitsMode::One,
            2 => StopBitsMode::Two,
            other => bail!("unsupported stop bits: {other}"),
        };
    }
    if let Some(channels) = args.channels {
        config.channel_count = channels;
    }
    if let Some(capacity) = args.capacity {
        config.history_capacity = capacity;
    }
    if let Some(output) = &args.output {
        config.recording.timestamped = false;
        config.recording.filename = output.display().to_string();
    }
    Ok(config.clamped())
}

fn open_source(args: &Args, config: &ScopeConfig) -> Result<Box<dyn ByteSource + Send>> {
    if args.simulate {
        return Ok(Box::new(SimulatedSource::new(
            config.channel_count,
            config.simulation_rate_hz,
        )));
    }
    let source = SerialSource::open(&config.serial)
        .with_context(|| format!("could not open serial port '{}'", config.serial.port))?;
    Ok(Box::new(source))
}

fn report(handle: &AcquisitionHandle) {
    for event in handle.try_events() {
        match event {
            EngineEvent::ReadFailed(msg) => log::warn!("read failed: {msg}"),
            EngineEvent::InvalidData { byte, offset } => {
                log::warn!("invalid byte 0x{byte:02x} at offset {offset}")
            }
            EngineEvent::RecordingStarted(path) => log::info!("recording to {}", path.display()),
            EngineEvent::RecordingFailed(msg) => log::error!("recording failed: {msg}"),
            EngineEvent::RecordingStopped { path, rows } => {
                log::info!("recording closed: {} ({rows} rows)", path.display())
            }
            EngineEvent::Stopped => log::debug!("engine stopped"),
        }
    }
    let snap = handle.snapshot();
    match snap.latest() {
        Some((t, values)) => {
            let shown: Vec<String> = values.iter().map(|v| format!("{v:.4}")).collect();
            let recorder = handle.recorder();
            let rec = if recorder.is_recording() {
                format!(" | REC {} rows", recorder.rows_written())
            } else {
                String::new()
            };
            log::info!(
                "t={t:.3}s [{}] history={} span={:.2}s{rec}",
                shown.join(", "),
                snap.len(),
                snap.duration_seconds()
            );
        }
        None => log::info!("waiting for data..."),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.list_ports {
        let ports = list_ports()?;
        if ports.is_empty() {
            println!("No serial ports available.");
        }
        for port in ports {
            println!("{port}");
        }
        return Ok(());
    }
    let config = build_config(&args)?;
    if config.channel_count == 0 {
        bail!(
            "channel count is 0; pass --channels (1..={}) or set channel_count in the config",
            config.max_channels
        );
    }
    // 1. 打开数据源 (串口或模拟)
    let source = open_source(&args, &config)?;
    let store = SharedStore::new(ChannelStore::new(
        config.channel_count,
        config.history_capacity,
    ));
    let recorder = Arc::new(CsvRecorder::new());
    let mut handle = AcquisitionHandle::spawn(source, &config, store, recorder)?;
    if args.record {
        handle.send(EngineCommand::StartRecording {
            path: config.recording_path(),
            channel_names: config.channel_names(),
        });
    }

    // 2. Ctrl-C 退出
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .context("failed to install Ctrl-C handler")?;

    let started = Instant::now();
    let deadline = args
        .duration
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    while running.load(Ordering::SeqCst) && handle.is_running() {
        std::thread::sleep(Duration::from_millis(500));
        report(&handle);
        if deadline.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
    }

    // 3. 停止采集线程并关闭录制文件
    if !handle.stop_timeout(Duration::from_secs(2)) {
        log::warn!("acquisition thread did not stop in time");
    }
    report(&handle);
    if let Some(summary) = handle.recorder().stop_recording() {
        log::info!(
            "saved {} ({} rows, {:.1}s)",
            summary.path.display(),
            summary.rows,
            summary.duration.as_secs_f64()
        );
    }
    let stats = handle.stats();
    log::info!(
        "{} samples, {} read errors, {} invalid batches",
        stats.samples,
        stats.read_errors,
        stats.invalid_batches
    );
    Ok(())
}
