//! Serial multi-channel acquisition core.
//!
//! Bytes from an instrument are framed into samples (`\n` starts a frame, `\r`
//! ends it, fields are comma separated), kept in a bounded rolling history for
//! live display, and optionally mirrored to CSV while a background thread does
//! the acquisition.
pub mod config;
pub mod drivers;
pub mod engine;
pub mod recorder;
pub mod types;

pub use config::{RecordingSettings, ScopeConfig};
pub use drivers::{
    ByteSource, ChannelSnapshot, ChannelStore, FrameParser, RingBuffer, ScopeError,
    SerialSettings, SerialSource, SharedStore,
};
pub use engine::{AcquisitionHandle, AcquisitionLoop, StatsSnapshot, TickReport};
pub use recorder::{CsvRecorder, RecordError, RecordingSummary};
pub use types::{EngineCommand, EngineEvent, Sample};
