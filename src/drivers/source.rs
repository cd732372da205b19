use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::time::Instant;

use rand::Rng;

use crate::drivers::ScopeError;

/// Something the acquisition loop can pull raw bytes from.
///
/// `read_available` must never block: with no data pending it returns
/// `Ok(0)`, so the loop cadence is governed only by its poll interval.
pub trait ByteSource {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError>;
    fn close(&mut self) {}
    fn describe(&self) -> String {
        "byte source".to_owned()
    }
}
impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError> {
        (**self).read_available(buf)
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// In-memory source useful for tests and deterministic playback.
///
/// Each queued chunk is returned by one read (split if it does not fit). A
/// queued `Err` is returned once, in order.
pub struct ManualSource {
    queue: VecDeque<Result<Vec<u8>, ScopeError>>,
}
impl ManualSource {
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        Self {
            queue: chunks.into_iter().map(|c| Ok(c.into())).collect(),
        }
    }
    pub fn push(&mut self, chunk: impl Into<Vec<u8>>) {
        self.queue.push_back(Ok(chunk.into()));
    }
    pub fn push_error(&mut self, error: ScopeError) {
        self.queue.push_back(Err(error));
    }
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
impl ByteSource for ManualSource {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError> {
        let Some(front) = self.queue.pop_front() else {
            return Ok(0);
        };
        let mut chunk = front?;
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            let rest = chunk.split_off(n);
            self.queue.push_front(Ok(rest));
        }
        Ok(n)
    }
    fn describe(&self) -> String {
        "manual source".to_owned()
    }
}

/// Bytes a simulated device holds before dropping its oldest frames, like a
/// serial driver's receive buffer.
pub const SIMULATED_BACKLOG_LIMIT: usize = 4096;

/// Synthetic instrument emitting noisy sine waves in the wire format.
pub struct SimulatedSource {
    channel_count: usize,
    rate_hz: f64,
    started_at: Instant,
    frames_sent: u64,
    pending: VecDeque<u8>,
}
impl SimulatedSource {
    pub fn new(channel_count: usize, rate_hz: f64) -> Self {
        Self {
            channel_count,
            rate_hz: rate_hz.max(1.0),
            started_at: Instant::now(),
            frames_sent: 0,
            pending: VecDeque::new(),
        }
    }
    fn render_frame(&self, index: u64, rng: &mut impl Rng) -> String {
        let t = index as f64 / self.rate_hz;
        let fields: Vec<String> = (0..self.channel_count)
            .map(|ch| {
                let freq = 0.5 + ch as f64 * 0.75;
                let noise: f64 = rng.gen_range(-0.05..0.05);
                format!("{:.4}", (TAU * freq * t).sin() + noise)
            })
            .collect();
        format!("\n{}\r", fields.join(","))
    }
    /// Removes bytes up to and including the first frame end.
    fn drop_oldest_frame(&mut self) {
        match self.pending.iter().position(|&b| b == b'\r') {
            Some(end) => {
                self.pending.drain(..=end);
            }
            None => self.pending.clear(),
        }
    }
}
impl ByteSource for SimulatedSource {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, ScopeError> {
        let due = (self.started_at.elapsed().as_secs_f64() * self.rate_hz) as u64;
        // A frame is at least two bytes, so older frames could never fit.
        let oldest_kept = due.saturating_sub((SIMULATED_BACKLOG_LIMIT / 2) as u64);
        self.frames_sent = self.frames_sent.max(oldest_kept);
        let mut rng = rand::thread_rng();
        while self.frames_sent < due {
            let frame = self.render_frame(self.frames_sent, &mut rng);
            self.pending.extend(frame.bytes());
            self.frames_sent += 1;
        }
        while self.pending.len() > SIMULATED_BACKLOG_LIMIT {
            self.drop_oldest_frame();
        }
        let n = self.pending.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
    fn describe(&self) -> String {
        format!(
            "simulated source ({} ch @ {} Hz)",
            self.channel_count, self.rate_hz
        )
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::FrameParser;
    #[test]
    fn manual_source_splits_oversized_chunks() {
        let mut source = ManualSource::new(vec![b"abcdef".to_vec()]);
        let mut buf = [0u8; 4];
        assert_eq!(source.read_available(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(source.read_available(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(source.read_available(&mut buf).unwrap(), 0);
    }
    #[test]
    fn manual_source_replays_errors_in_order() {
        let mut source = ManualSource::new(Vec::<Vec<u8>>::new());
        source.push_error(ScopeError::Read("cable pulled".into()));
        source.push("x");
        let mut buf = [0u8; 8];
        assert!(matches!(
            source.read_available(&mut buf),
            Err(ScopeError::Read(_))
        ));
        assert_eq!(source.read_available(&mut buf).unwrap(), 1);
    }
    #[test]
    fn simulated_frames_parse_with_matching_channel_count() {
        let mut source = SimulatedSource::new(3, 1000.0);
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut parser = FrameParser::new(3);
        let mut buf = [0u8; 4096];
        let n = source.read_available(&mut buf).unwrap();
        assert!(n > 0);
        let samples: Vec<_> = buf[..n].iter().filter_map(|&b| parser.consume(b)).collect();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.values.len() == 3));
    }
    #[test]
    fn simulated_backlog_is_bounded_after_a_long_stall() {
        let mut source = SimulatedSource::new(3, 100.0);
        // Pretend nobody has read for ten minutes.
        source.started_at = Instant::now()
            .checked_sub(std::time::Duration::from_secs(600))
            .unwrap();
        let mut buf = [0u8; 64];
        source.read_available(&mut buf).unwrap();
        assert!(source.pending.len() <= SIMULATED_BACKLOG_LIMIT);
        assert!(source.frames_sent >= 60_000);

        // What is left still parses into whole frames of fresh data.
        let mut parser = FrameParser::new(3);
        let rest: Vec<u8> = source.pending.drain(..).collect();
        let samples: Vec<_> = rest.iter().filter_map(|&b| parser.consume(b)).collect();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.values.len() == 3));
    }
}
