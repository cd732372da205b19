use crate::drivers::error::ScopeError;
use crate::drivers::parser::{validate_batch, FrameParser};
use crate::drivers::ring::RingBuffer;
use crate::drivers::source::ByteSource;
use crate::types::Sample;
/// Upper bound on bytes pulled by one pump, in multiples of the ring capacity.
const RINGS_PER_PUMP: usize = 4;

/// Byte source, ring buffer and frame parser wired together.
///
/// Each call to [`SerialPipeline::pump_once`] keeps reading until the source
/// has nothing more to give (or the per-pump byte budget is spent) and parses
/// everything that has been queued.
pub struct SerialPipeline<S: ByteSource> {
    source: S,
    ring: RingBuffer<u8>,
    parser: FrameParser,
    read_buf: Vec<u8>,
    // Error hit after samples were already produced; reported on the next pump.
    deferred: Option<ScopeError>,
}
impl<S: ByteSource> SerialPipeline<S> {
    pub fn new(
        source: S,
        channel_count: usize,
        ring_capacity: usize,
        read_chunk: usize,
    ) -> Result<Self, ScopeError> {
        if read_chunk == 0 {
            return Err(ScopeError::Config(
                "read chunk size must be greater than zero".into(),
            ));
        }
        if read_chunk > ring_capacity {
            // A single read could overwrite bytes of the same batch.
            return Err(ScopeError::Config(format!(
                "read chunk ({read_chunk}) larger than ring buffer ({ring_capacity})"
            )));
        }
        Ok(Self {
            source,
            ring: RingBuffer::with_capacity(ring_capacity)?,
            parser: FrameParser::new(channel_count),
            read_buf: vec![0; read_chunk],
            deferred: None,
        })
    }
    pub fn parser(&self) -> &FrameParser {
        &self.parser
    }
    pub fn parser_mut(&mut self) -> &mut FrameParser {
        &mut self.parser
    }
    pub fn source(&self) -> &S {
        &self.source
    }
    /// Drains the source and returns every sample completed on the way.
    ///
    /// Reads repeat until the source returns no bytes or
    /// `RINGS_PER_PUMP * ring capacity` bytes have been taken. A batch containing
    /// a byte outside the wire alphabet is rejected as a whole and the partial
    /// frame is abandoned, so parsing resumes at the next frame start. When an
    /// error interrupts a pump that already produced samples, the samples are
    /// returned and the error comes back from the following call.
    pub fn pump_once(&mut self) -> Result<Vec<Sample>, ScopeError> {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }
        let budget = self.ring.capacity() * RINGS_PER_PUMP;
        let mut taken = 0;
        let mut samples = Vec::new();
        while taken < budget {
            match self.read_batch() {
                Ok(0) => break,
                Ok(n) => {
                    taken += n;
                    samples.extend(self.parser.drain(&mut self.ring));
                }
                Err(e) if samples.is_empty() => return Err(e),
                Err(e) => {
                    self.deferred = Some(e);
                    break;
                }
            }
        }
        Ok(samples)
    }
    fn read_batch(&mut self) -> Result<usize, ScopeError> {
        let n = self.source.read_available(&mut self.read_buf)?;
        let batch = &self.read_buf[..n];
        if let Err(e) = validate_batch(batch) {
            self.parser.abandon_frame();
            return Err(e);
        }
        self.ring.extend_from_slice(batch);
        Ok(n)
    }
    /// Discards queued bytes and restarts the parser epoch.
    pub fn reset(&mut self) {
        self.ring.clear();
        self.deferred = None;
        self.parser.reset();
    }
    pub fn set_channel_count(&mut self, channel_count: usize) {
        self.parser.set_channel_count(channel_count);
    }
    pub fn close(&mut self) {
        self.source.close();
    }
}
