// src/types.rs
use std::path::PathBuf;

/// One fully parsed frame: elapsed time plus one value per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// Seconds since the parser epoch (session start or last reset).
    pub elapsed_secs: f64,
    pub values: Vec<f64>,
}

// Commands sent to the acquisition thread
#[derive(Clone, Debug)]
pub enum EngineCommand {
    SetChannelCount(usize),
    SetCapacity(usize),
    /// Clear the rolling history and restart the elapsed-time origin.
    Reset,
    StartRecording {
        path: PathBuf,
        channel_names: Vec<String>,
    },
    StopRecording,
}

// Events reported back by the acquisition thread
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    ReadFailed(String),
    InvalidData { byte: u8, offset: usize },
    RecordingStarted(PathBuf),
    RecordingFailed(String),
    RecordingStopped { path: PathBuf, rows: u64 },
    Stopped,
}
