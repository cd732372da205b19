//! Line-oriented frame parser for the instrument's text protocol.
//!
//! A frame starts after `\n` and ends at `\r`. Inside a frame, fields are runs
//! of digits, `.` and `-`, separated by `,`:
//!
//! ```text
//! \n1.25,-0.5,3\r
//! ```
//!
//! A sample is emitted only when the number of fields that converted cleanly
//! equals the configured channel count. Anything else is dropped silently.
use std::time::Instant;

use crate::drivers::{RingBuffer, ScopeError};
use crate::types::Sample;

/// Longer fields cannot be a sensible reading and are dropped.
const MAX_FIELD_LEN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParserState {
    AwaitingFrameStart,
    AccumulatingField,
}

/// Returns `true` for bytes the wire protocol may legitimately carry.
pub fn is_wire_byte(byte: u8) -> bool {
    matches!(byte, b'\n' | b'\r' | b'\t' | 0x20..=0x7e)
}

/// Rejects a read batch containing anything outside printable ASCII and the
/// framing control bytes.
pub fn validate_batch(bytes: &[u8]) -> Result<(), ScopeError> {
    match bytes.iter().position(|&b| !is_wire_byte(b)) {
        Some(offset) => Err(ScopeError::InvalidData {
            byte: bytes[offset],
            offset,
        }),
        None => Ok(()),
    }
}

/// Strict decimal conversion. `None` means "drop this field".
pub fn parse_field(field: &str) -> Option<f64> {
    if field.is_empty() || field.len() > MAX_FIELD_LEN {
        return None;
    }
    field.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub struct FrameParser {
    state: ParserState,
    channel_count: usize,
    field: String,
    values: Vec<f64>,
    fields_in_frame: usize,
    epoch: Instant,
    frames_emitted: u64,
    frames_dropped: u64,
}

impl FrameParser {
    pub fn new(channel_count: usize) -> Self {
        Self {
            state: ParserState::AwaitingFrameStart,
            channel_count,
            field: String::with_capacity(MAX_FIELD_LEN),
            values: Vec::with_capacity(channel_count),
            fields_in_frame: 0,
            epoch: Instant::now(),
            frames_emitted: 0,
            frames_dropped: 0,
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Seconds since the last reset.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Changes the expected field count. Any partial frame is discarded.
    pub fn set_channel_count(&mut self, channel_count: usize) {
        self.channel_count = channel_count;
        self.abandon_frame();
    }

    /// Back to `AwaitingFrameStart` with a fresh elapsed-time origin.
    pub fn reset(&mut self) {
        self.abandon_frame();
        self.epoch = Instant::now();
        self.frames_emitted = 0;
        self.frames_dropped = 0;
    }

    /// Drops the frame in progress without touching the epoch.
    pub fn abandon_frame(&mut self) {
        self.state = ParserState::AwaitingFrameStart;
        self.field.clear();
        self.values.clear();
        self.fields_in_frame = 0;
    }

    /// Advances the state machine by one byte.
    pub fn consume(&mut self, byte: u8) -> Option<Sample> {
        if byte == b'\n' {
            // A new frame start discards whatever was pending.
            self.field.clear();
            self.values.clear();
            self.fields_in_frame = 0;
            self.state = ParserState::AccumulatingField;
            return None;
        }
        if self.state == ParserState::AwaitingFrameStart {
            return None;
        }
        match byte {
            b'0'..=b'9' | b'.' | b'-' => {
                if self.field.len() <= MAX_FIELD_LEN {
                    self.field.push(byte as char);
                }
                None
            }
            b',' => {
                self.finish_field();
                None
            }
            b'\r' => {
                self.finish_field();
                self.state = ParserState::AwaitingFrameStart;
                self.finish_frame()
            }
            _ => None,
        }
    }

    /// Feeds every byte currently queued in `ring`, oldest first.
    pub fn drain(&mut self, ring: &mut RingBuffer<u8>) -> Vec<Sample> {
        let mut samples = Vec::new();
        while let Ok(byte) = ring.pop() {
            if let Some(sample) = self.consume(byte) {
                samples.push(sample);
            }
        }
        samples
    }

    fn finish_field(&mut self) {
        if let Some(value) = parse_field(&self.field) {
            self.fields_in_frame += 1;
            // No point keeping more values than a frame can use.
            if self.values.len() < self.channel_count {
                self.values.push(value);
            }
        }
        self.field.clear();
    }

    fn finish_frame(&mut self) -> Option<Sample> {
        let fields = self.fields_in_frame;
        self.fields_in_frame = 0;
        if self.channel_count == 0 || fields != self.channel_count {
            log::trace!(
                "dropping frame with {fields} field(s), expected {}",
                self.channel_count
            );
            self.values.clear();
            self.frames_dropped += 1;
            return None;
        }
        self.frames_emitted += 1;
        Some(Sample {
            elapsed_secs: self.elapsed_secs(),
            values: std::mem::take(&mut self.values),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(parser: &mut FrameParser, bytes: &[u8]) -> Vec<Sample> {
        bytes.iter().filter_map(|&b| parser.consume(b)).collect()
    }

    #[test]
    fn well_formed_frame_yields_one_sample() {
        let mut parser = FrameParser::new(3);
        let samples = feed(&mut parser, b"\n1.0,2.0,3.0\r");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].values, vec![1.0, 2.0, 3.0]);
        assert!(samples[0].elapsed_secs >= 0.0);
        assert_eq!(parser.state(), ParserState::AwaitingFrameStart);
    }

    #[test]
    fn malformed_field_is_dropped_and_frame_rejected() {
        let mut parser = FrameParser::new(3);
        assert!(feed(&mut parser, b"\n1.0,x,3.0\r").is_empty());
        assert_eq!(parser.frames_dropped(), 1);
    }

    #[test]
    fn second_frame_start_discards_fragment() {
        let mut parser = FrameParser::new(2);
        let samples = feed(&mut parser, b"\nabc\n1.0,2.0\r");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].values, vec![1.0, 2.0]);
    }

    #[test]
    fn negative_values_and_trailing_comma() {
        let mut parser = FrameParser::new(2);
        let samples = feed(&mut parser, b"\n-4.5,12,\r");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].values, vec![-4.5, 12.0]);
    }

    #[test]
    fn bytes_before_first_newline_are_ignored() {
        let mut parser = FrameParser::new(1);
        let samples = feed(&mut parser, b"7.0\r8.0,\n9.0\r");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].values, vec![9.0]);
    }

    #[test]
    fn zero_channels_never_emits() {
        let mut parser = FrameParser::new(0);
        assert!(feed(&mut parser, b"\n\r\n1.0\r").is_empty());
    }

    #[test]
    fn too_many_fields_is_dropped() {
        let mut parser = FrameParser::new(2);
        assert!(feed(&mut parser, b"\n1,2,3\r").is_empty());
        let samples = feed(&mut parser, b"\n1,2\r");
        assert_eq!(samples[0].values, vec![1.0, 2.0]);
    }

    #[test]
    fn frame_split_across_batches() {
        let mut parser = FrameParser::new(2);
        assert!(feed(&mut parser, b"\n0.5,").is_empty());
        assert_eq!(parser.state(), ParserState::AccumulatingField);
        let samples = feed(&mut parser, b"0.25\r");
        assert_eq!(samples[0].values, vec![0.5, 0.25]);
    }

    #[test]
    fn strict_field_conversion() {
        assert_eq!(parse_field("3.5"), Some(3.5));
        assert_eq!(parse_field("-0.125"), Some(-0.125));
        assert_eq!(parse_field(""), None);
        assert_eq!(parse_field("-"), None);
        assert_eq!(parse_field("1.2.3"), None);
        assert_eq!(parse_field("1-2"), None);
    }

    #[test]
    fn batch_validation_reports_first_bad_byte() {
        assert!(validate_batch(b"\n1.0,2.0\r").is_ok());
        match validate_batch(b"\n1.0\x002\r") {
            Err(ScopeError::InvalidData { byte, offset }) => {
                assert_eq!(byte, 0x00);
                assert_eq!(offset, 4);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(validate_batch(&[b'1', 0xC3]).is_err());
    }

    #[test]
    fn changing_channel_count_abandons_partial_frame() {
        let mut parser = FrameParser::new(2);
        feed(&mut parser, b"\n1.0,");
        parser.set_channel_count(1);
        assert_eq!(parser.state(), ParserState::AwaitingFrameStart);
        assert!(feed(&mut parser, b"2.0\r").is_empty());
        assert_eq!(feed(&mut parser, b"\n2.0\r")[0].values, vec![2.0]);
    }

    #[test]
    fn drain_consumes_ring_contents() {
        let mut ring = RingBuffer::with_capacity(64).unwrap();
        ring.extend_from_slice(b"\n1,2\r\n3,4\r");
        let mut parser = FrameParser::new(2);
        let samples = parser.drain(&mut ring);
        assert!(ring.is_empty());
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].values, vec![3.0, 4.0]);
        assert!(samples[0].elapsed_secs <= samples[1].elapsed_secs);
    }
}
