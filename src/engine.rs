// src/engine.rs
//! Background acquisition loop.
//!
//! One thread owns the byte source, ring buffer and parser. Every tick it
//! applies pending commands, reads whatever bytes are available, and publishes
//! the resulting samples to the shared store and, when a session is active, to
//! the CSV recorder. Consumers read the store from their own thread.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::ScopeConfig;
use crate::drivers::{ByteSource, ChannelSnapshot, ScopeError, SerialPipeline, SharedStore};
use crate::recorder::{CsvRecorder, RecordError};
use crate::types::{EngineCommand, EngineEvent, Sample};

/// Counters shared with the consumer side.
#[derive(Debug, Default)]
pub struct EngineStats {
    samples: AtomicU64,
    read_errors: AtomicU64,
    invalid_batches: AtomicU64,
    rows_failed: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub samples: u64,
    pub read_errors: u64,
    pub invalid_batches: u64,
    pub rows_failed: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            invalid_batches: self.invalid_batches.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a single tick.
#[derive(Debug, Default)]
pub struct TickReport {
    pub paused: bool,
    pub samples: usize,
    pub error: Option<ScopeError>,
}

pub struct AcquisitionLoop<S: ByteSource> {
    pipeline: SerialPipeline<S>,
    store: SharedStore,
    recorder: Arc<CsvRecorder>,
    config: ScopeConfig,
    commands: Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    stats: Arc<EngineStats>,
}

impl<S: ByteSource> AcquisitionLoop<S> {
    /// Builds the loop and the handle used to control it. The store is resized
    /// and bounded to match the configuration.
    pub fn new(
        source: S,
        config: &ScopeConfig,
        store: SharedStore,
        recorder: Arc<CsvRecorder>,
    ) -> Result<(Self, AcquisitionHandle), ScopeError> {
        let config = config.clone().clamped();
        let pipeline = SerialPipeline::new(
            source,
            config.channel_count,
            config.ring_capacity,
            config.read_chunk,
        )?;
        {
            let mut guard = store.lock();
            if guard.channel_count() != config.channel_count {
                guard.resize(config.channel_count);
            }
            guard.set_capacity(config.history_capacity);
        }
        let (cmd_tx, cmd_rx) = channel();
        let (evt_tx, evt_rx) = channel();
        let paused = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(EngineStats::default());
        let handle = AcquisitionHandle {
            commands: cmd_tx,
            events: evt_rx,
            paused: Arc::clone(&paused),
            stop: Arc::clone(&stop),
            stats: Arc::clone(&stats),
            store: store.clone(),
            recorder: Arc::clone(&recorder),
            thread: None,
        };
        let engine = Self {
            pipeline,
            store,
            recorder,
            config,
            commands: cmd_rx,
            events: evt_tx,
            paused,
            stop,
            stats,
        };
        Ok((engine, handle))
    }

    /// One unit of work: commands, then (unless paused) read, parse, publish.
    pub fn tick(&mut self) -> TickReport {
        // 1. 先处理外部命令
        while let Ok(cmd) = self.commands.try_recv() {
            self.apply(cmd);
        }
        // 2. 暂停时不读取串口
        if self.paused.load(Ordering::Acquire) {
            return TickReport {
                paused: true,
                ..TickReport::default()
            };
        }
        // 3. 读取、解析并发布样本
        match self.pipeline.pump_once() {
            Ok(samples) => {
                self.publish(&samples);
                TickReport {
                    samples: samples.len(),
                    ..TickReport::default()
                }
            }
            Err(e) => {
                match &e {
                    ScopeError::InvalidData { byte, offset } => {
                        log::warn!("{e}; batch discarded");
                        self.stats.invalid_batches.fetch_add(1, Ordering::Relaxed);
                        self.emit(EngineEvent::InvalidData {
                            byte: *byte,
                            offset: *offset,
                        });
                    }
                    other => {
                        log::warn!("{other}");
                        self.stats.read_errors.fetch_add(1, Ordering::Relaxed);
                        self.emit(EngineEvent::ReadFailed(other.to_string()));
                    }
                }
                TickReport {
                    error: Some(e),
                    ..TickReport::default()
                }
            }
        }
    }

    /// Ticks until the stop flag is raised, then closes the source.
    pub fn run(mut self) {
        let poll = self.config.poll_interval();
        log::info!(
            "acquisition running on {} ({} ch, poll {:?})",
            self.pipeline.source().describe(),
            self.pipeline.parser().channel_count(),
            poll
        );
        while !self.stop.load(Ordering::Acquire) {
            self.tick();
            thread::sleep(poll);
        }
        self.pipeline.close();
        log::info!("acquisition stopped");
        self.emit(EngineEvent::Stopped);
    }

    /// Moves the loop onto its own thread.
    pub fn spawn(self, mut handle: AcquisitionHandle) -> Result<AcquisitionHandle, ScopeError>
    where
        S: Send + 'static,
    {
        let thread = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || self.run())
            .map_err(|e| ScopeError::Spawn(e.to_string()))?;
        handle.thread = Some(thread);
        Ok(handle)
    }

    fn publish(&self, samples: &[Sample]) {
        if samples.is_empty() {
            return;
        }
        // 只有进入 store 的样本才写入 CSV
        let accepted: Vec<&Sample> = {
            let mut store = self.store.lock();
            samples
                .iter()
                .filter(|sample| match store.append(sample) {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("sample not stored: {e}");
                        false
                    }
                })
                .collect()
        };
        self.stats
            .samples
            .fetch_add(accepted.len() as u64, Ordering::Relaxed);
        for sample in accepted {
            match self.recorder.write_row(sample.elapsed_secs, &sample.values) {
                Ok(()) | Err(RecordError::NotRecording) => {}
                Err(e) => {
                    self.stats.rows_failed.fetch_add(1, Ordering::Relaxed);
                    log::warn!("recording row dropped: {e}");
                }
            }
        }
    }

    fn apply(&mut self, cmd: EngineCommand) {
        log::debug!("engine command: {cmd:?}");
        match cmd {
            // 通道数变化：解析器和 store 一起重建
            EngineCommand::SetChannelCount(n) => {
                let n = self.config.clamp_channel_count(n);
                self.config.channel_count = n;
                self.pipeline.set_channel_count(n);
                self.store.lock().resize(n);
                // The CSV header no longer matches the rows.
                self.stop_recording();
            }
            EngineCommand::SetCapacity(k) => {
                let k = self.config.clamp_capacity(k);
                self.config.history_capacity = k;
                self.store.lock().set_capacity(k);
            }
            EngineCommand::Reset => {
                self.pipeline.reset();
                self.store.lock().reset();
            }
            EngineCommand::StartRecording {
                path,
                channel_names,
            } => {
                let expected = self.config.channel_count;
                if expected == 0 || channel_names.len() != expected {
                    self.emit(EngineEvent::RecordingFailed(format!(
                        "expected {expected} channel name(s), got {}",
                        channel_names.len()
                    )));
                    return;
                }
                match self.recorder.start_recording(&path, &channel_names) {
                    Ok(()) => self.emit(EngineEvent::RecordingStarted(path)),
                    Err(e) => self.emit(EngineEvent::RecordingFailed(e.to_string())),
                }
            }
            EngineCommand::StopRecording => self.stop_recording(),
        }
    }

    fn stop_recording(&self) {
        if let Some(summary) = self.recorder.stop_recording() {
            self.emit(EngineEvent::RecordingStopped {
                path: summary.path,
                rows: summary.rows,
            });
        }
    }

    fn emit(&self, event: EngineEvent) {
        // 没有接收方也没关系
        self.events.send(event).ok();
    }
}

/// Controls a running (or not yet spawned) acquisition loop.
pub struct AcquisitionHandle {
    commands: Sender<EngineCommand>,
    events: Receiver<EngineEvent>,
    paused: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    stats: Arc<EngineStats>,
    store: SharedStore,
    recorder: Arc<CsvRecorder>,
    thread: Option<JoinHandle<()>>,
}

impl AcquisitionHandle {
    /// Builds the loop and starts it on a dedicated thread.
    pub fn spawn<S>(
        source: S,
        config: &ScopeConfig,
        store: SharedStore,
        recorder: Arc<CsvRecorder>,
    ) -> Result<Self, ScopeError>
    where
        S: ByteSource + Send + 'static,
    {
        let (engine, handle) = AcquisitionLoop::new(source, config, store, recorder)?;
        engine.spawn(handle)
    }
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
    /// Queues a command for the next tick. Returns `false` once the loop is gone.
    pub fn send(&self, cmd: EngineCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }
    /// Drains events reported since the last call.
    pub fn try_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }
    pub fn store(&self) -> &SharedStore {
        &self.store
    }
    pub fn snapshot(&self) -> ChannelSnapshot {
        self.store.snapshot()
    }
    pub fn recorder(&self) -> &Arc<CsvRecorder> {
        &self.recorder
    }
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
    /// Raises the stop flag and waits for the current tick to finish.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(h) = self.thread.take() {
            if h.join().is_err() {
                log::error!("acquisition thread panicked");
            }
        }
    }
    /// Stops and waits, giving up after `timeout`.
    pub fn stop_timeout(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::Release);
        let deadline = std::time::Instant::now() + timeout;
        while self.is_running() {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        self.stop();
        true
    }
}

impl Drop for AcquisitionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{ChannelStore, ManualSource};
    use std::path::PathBuf;

    fn config(channels: usize, capacity: usize) -> ScopeConfig {
        ScopeConfig {
            channel_count: channels,
            history_capacity: capacity,
            poll_interval_ms: 1,
            ..ScopeConfig::default()
        }
    }

    fn build(
        source: ManualSource,
        cfg: &ScopeConfig,
    ) -> (AcquisitionLoop<ManualSource>, AcquisitionHandle) {
        let store = SharedStore::new(ChannelStore::new(0, 0));
        AcquisitionLoop::new(source, cfg, store, Arc::new(CsvRecorder::new())).unwrap()
    }

    #[test]
    fn tick_publishes_samples_to_store() {
        let source = ManualSource::new(vec!["\n1.0,2.0,3.0\r\n4.0,5.0,6.0\r"]);
        let (mut engine, handle) = build(source, &config(3, 100));
        let report = engine.tick();
        assert_eq!(report.samples, 2);
        let snap = handle.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.channels[2], vec![3.0, 6.0]);
        assert_eq!(handle.stats().samples, 2);
    }

    #[test]
    fn new_shapes_store_from_config() {
        let (_engine, handle) = build(ManualSource::new(Vec::<Vec<u8>>::new()), &config(9, 50_000));
        let store = handle.store().lock();
        assert_eq!(store.channel_count(), 3);
        assert_eq!(store.capacity(), 10_000);
    }

    #[test]
    fn unbounded_capacity_from_config_does_not_preallocate() {
        let cfg = ScopeConfig {
            max_capacity: usize::MAX,
            ..config(2, usize::MAX)
        };
        let (mut engine, handle) = build(ManualSource::new(vec!["\n1,2\r"]), &cfg);
        assert_eq!(handle.store().lock().capacity(), usize::MAX);
        assert_eq!(engine.tick().samples, 1);
    }

    #[test]
    fn paused_tick_leaves_source_untouched() {
        let source = ManualSource::new(vec!["\n1.0\r"]);
        let (mut engine, handle) = build(source, &config(1, 10));
        handle.pause();
        assert!(engine.tick().paused);
        assert!(handle.snapshot().is_empty());
        handle.resume();
        assert_eq!(engine.tick().samples, 1);
    }

    #[test]
    fn errors_are_reported_and_loop_continues() {
        let mut source = ManualSource::new(Vec::<Vec<u8>>::new());
        source.push_error(ScopeError::Read("timeout".into()));
        source.push(vec![b'\n', 0x80, b'\r']);
        source.push("\n2.5\r");
        let (mut engine, handle) = build(source, &config(1, 10));
        assert!(matches!(engine.tick().error, Some(ScopeError::Read(_))));
        assert!(matches!(
            engine.tick().error,
            Some(ScopeError::InvalidData { byte: 0x80, .. })
        ));
        assert_eq!(engine.tick().samples, 1);
        let events = handle.try_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], EngineEvent::ReadFailed(_)));
        assert_eq!(events[1], EngineEvent::InvalidData { byte: 0x80, offset: 1 });
        let stats = handle.stats();
        assert_eq!((stats.read_errors, stats.invalid_batches), (1, 1));
    }

    #[test]
    fn commands_resize_and_reset() {
        let mut source = ManualSource::new(vec!["\n1,2\r"]);
        // The error ends the first tick before the 3-channel frame is read.
        source.push_error(ScopeError::Read("pause".into()));
        source.push("\n1,2,3\r");
        let (mut engine, handle) = build(source, &config(2, 10));
        assert_eq!(engine.tick().samples, 1);
        assert_eq!(handle.snapshot().len(), 1);
        handle.send(EngineCommand::SetChannelCount(3));
        assert!(engine.tick().error.is_some());
        assert!(handle.snapshot().is_empty());
        assert_eq!(engine.tick().samples, 1);
        let snap = handle.snapshot();
        assert_eq!(snap.channels.len(), 3);
        assert_eq!(snap.len(), 1);
        handle.send(EngineCommand::SetCapacity(0));
        engine.tick();
        assert!(handle.snapshot().is_empty());
        handle.send(EngineCommand::SetCapacity(5));
        handle.send(EngineCommand::Reset);
        engine.tick();
        assert_eq!(handle.store().lock().capacity(), 5);
    }

    #[test]
    fn one_tick_keeps_up_with_a_dense_stream() {
        let frames: String = (0..20).map(|i| format!("\n{i},{i}.25\r")).collect();
        let mut source = ManualSource::new(Vec::<Vec<u8>>::new());
        for chunk in frames.as_bytes().chunks(7) {
            source.push(chunk.to_vec());
        }
        let (mut engine, handle) = build(source, &config(2, 100));
        assert_eq!(engine.tick().samples, 20);
        assert_eq!(handle.snapshot().len(), 20);
        assert_eq!(handle.store().latest().unwrap().values, vec![19.0, 19.25]);
    }

    #[test]
    fn samples_rejected_by_store_are_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mismatch.csv");
        let mut source = ManualSource::new(vec!["\n1,2\r"]);
        source.push_error(ScopeError::Read("pause".into()));
        source.push("\n3,4\r");
        let (mut engine, handle) = build(source, &config(2, 10));
        handle.send(EngineCommand::StartRecording {
            path: path.clone(),
            channel_names: vec!["A".into(), "B".into()],
        });
        assert_eq!(engine.tick().samples, 1);
        assert_eq!(handle.recorder().rows_written(), 1);
        // Store reshaped behind the parser's back.
        handle.store().lock().resize(1);
        engine.tick();
        engine.tick();
        assert!(handle.snapshot().is_empty());
        assert_eq!(handle.recorder().rows_written(), 1);
        assert_eq!(handle.stats().samples, 1);
    }

    #[test]
    fn recording_commands_mirror_samples_to_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path: PathBuf = dir.path().join("engine.csv");
        let mut source = ManualSource::new(Vec::<Vec<u8>>::new());
        source.push("\n1,2\r");
        source.push("\n3,4\r");
        let (mut engine, handle) = build(source, &config(2, 10));
        handle.send(EngineCommand::StartRecording {
            path: path.clone(),
            channel_names: vec!["A".into(), "B".into()],
        });
        engine.tick();
        engine.tick();
        handle.send(EngineCommand::StopRecording);
        engine.tick();
        let events = handle.try_events();
        assert_eq!(events[0], EngineEvent::RecordingStarted(path.clone()));
        assert_eq!(
            events[1],
            EngineEvent::RecordingStopped {
                path: path.clone(),
                rows: 2
            }
        );
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Timestamp,A,B");
        assert!(lines[1].ends_with(",1.000000,2.000000"));
        assert!(lines[2].ends_with(",3.000000,4.000000"));
    }

    #[test]
    fn recording_with_wrong_name_count_is_refused() {
        let (mut engine, handle) = build(ManualSource::new(Vec::<Vec<u8>>::new()), &config(2, 10));
        handle.send(EngineCommand::StartRecording {
            path: PathBuf::from("unused.csv"),
            channel_names: vec!["A".into()],
        });
        engine.tick();
        assert!(matches!(
            handle.try_events()[0],
            EngineEvent::RecordingFailed(_)
        ));
        assert!(!handle.recorder().is_recording());
    }

    #[test]
    fn spawned_loop_runs_until_stopped() {
        let source = ManualSource::new(vec!["\n0.5,1.5\r"]);
        let store = SharedStore::new(ChannelStore::new(2, 10));
        let mut handle =
            AcquisitionHandle::spawn(source, &config(2, 10), store, Arc::new(CsvRecorder::new()))
                .unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while handle.store().is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(handle.store().latest().unwrap().values, vec![0.5, 1.5]);
        assert!(handle.is_running());
        handle.stop();
        assert!(!handle.is_running());
        assert!(handle.try_events().contains(&EngineEvent::Stopped));
        handle.stop();
    }
}
