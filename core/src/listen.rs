//! Live listening over a sample stream.
//!
//! Two threads share a rolling window of recent audio:
//! - capture: reads blocks from a [`SampleSource`] and appends them, dropping
//!   the oldest samples once the window is full
//! - processing: wakes every poll interval, decodes a snapshot of the window
//!   outside the lock and reports through a bounded channel
//!
//! Decoded frames are drained from the window so they are reported once.

use crate::cipher::Key;
use crate::config::CodecConfig;
use crate::decoder::CommandDecoder;
use crate::error::{FailureClass, Result, StegoError};
use crate::signal::Signal;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Producer of mono PCM samples (microphone, file, network stream).
///
/// Implementations release their device in `Drop`; the listener drops the
/// source when capture ends for any reason.
pub trait SampleSource: Send {
    fn sample_rate(&self) -> u32;

    /// Fill `buf` with the next samples and return how many were written.
    /// `Ok(0)` marks the end of the stream.
    fn read(&mut self, buf: &mut [f32]) -> Result<usize>;
}

/// Consumer of rendered audio (speaker, file).
pub trait SampleSink {
    fn write(&mut self, signal: &Signal) -> Result<()>;
}

/// Listener timing and buffering
#[derive(Debug, Clone, PartialEq)]
pub struct ListenConfig {
    /// Seconds of audio kept in the rolling window
    pub window_secs: f32,
    pub poll_interval: Duration,
    /// Fraction of the window that must be filled before decoding starts
    pub min_fill_ratio: f32,
    /// Samples requested from the source per read
    pub block_size: usize,
    pub event_capacity: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            window_secs: 10.0,
            poll_interval: Duration::from_millis(100),
            min_fill_ratio: 0.5,
            block_size: 4096,
            event_capacity: 16,
        }
    }
}

impl ListenConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.window_secs > 0.0) {
            return Err(StegoError::InvalidConfig("listen window must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.min_fill_ratio) {
            return Err(StegoError::InvalidConfig(format!(
                "min fill ratio must be in [0, 1], got {}",
                self.min_fill_ratio
            )));
        }
        if self.poll_interval.is_zero() || self.block_size == 0 || self.event_capacity == 0 {
            return Err(StegoError::InvalidConfig(
                "poll interval, block size and event capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Something the listener observed
#[derive(Debug)]
pub enum ListenEvent {
    /// A frame decoded and authenticated
    Command(String),
    /// A frame was found but could not be recovered
    Failure(StegoError),
    /// The source reached end of stream; no more events follow
    SourceFinished,
    /// The source failed; no more events follow
    SourceFailed(StegoError),
}

impl ListenEvent {
    fn kind(&self) -> &'static str {
        match self {
            ListenEvent::Command(_) => "command",
            ListenEvent::Failure(_) => "failure",
            ListenEvent::SourceFinished => "source finished",
            ListenEvent::SourceFailed(_) => "source failure",
        }
    }
}

enum CaptureEnd {
    Finished,
    Failed(StegoError),
}

/// Most recent samples with their absolute stream positions
struct RollingBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
    /// Samples ever pushed; the back of the window sits at this position
    total_pushed: u64,
    /// `total_pushed` at the last decode attempt
    analyzed_through: u64,
    /// Re-analyze even without new samples (after a frame was drained)
    rescan: bool,
    end: Option<CaptureEnd>,
}

impl RollingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            total_pushed: 0,
            analyzed_through: 0,
            rescan: false,
            end: None,
        }
    }

    fn push(&mut self, block: &[f32]) {
        self.samples.extend(block.iter().copied());
        self.total_pushed += block.len() as u64;
        let excess = self.samples.len().saturating_sub(self.capacity);
        self.samples.drain(..excess);
    }

    /// Stream position of the oldest retained sample
    fn front_position(&self) -> u64 {
        self.total_pushed - self.samples.len() as u64
    }

    /// Drop every retained sample before stream position `position`.
    fn drain_through(&mut self, position: u64) {
        let count = position
            .saturating_sub(self.front_position())
            .min(self.samples.len() as u64) as usize;
        self.samples.drain(..count);
    }

    fn fill_ratio(&self) -> f32 {
        self.samples.len() as f32 / self.capacity as f32
    }

    fn has_fresh_samples(&self) -> bool {
        self.rescan || self.total_pushed > self.analyzed_through
    }
}

type SharedBuffer = Arc<Mutex<RollingBuffer>>;

fn lock(shared: &SharedBuffer) -> MutexGuard<'_, RollingBuffer> {
    // A panic elsewhere cannot leave the window structurally invalid
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Send without blocking; a full channel drops the event.
fn deliver(events: &Sender<ListenEvent>, event: ListenEvent) -> bool {
    match events.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            log::warn!("Event channel full, dropping {} event", event.kind());
            false
        }
        Err(TrySendError::Disconnected(_)) => {
            log::debug!("Event receiver gone");
            false
        }
    }
}

/// Entry point for live listening
pub struct Listener;

impl Listener {
    /// Start capturing from `source` and decoding with `key`.
    ///
    /// # Errors
    /// * `InvalidConfig` / `NyquistViolation` for unusable configuration or a
    ///   source rate that cannot carry the tones
    /// * `Capture` if a thread cannot be spawned
    pub fn spawn<S>(
        source: S,
        key: Key,
        config: &CodecConfig,
        listen: ListenConfig,
    ) -> Result<ListenerHandle>
    where
        S: SampleSource + 'static,
    {
        listen.validate()?;
        let decoder = CommandDecoder::new(config)?;

        let sample_rate = source.sample_rate();
        let (_, high) = config.frequency_range();
        let nyquist = sample_rate as f32 / 2.0;
        if high >= nyquist {
            return Err(StegoError::NyquistViolation {
                frequency: high,
                nyquist,
            });
        }

        let capacity = ((listen.window_secs * sample_rate as f32).round() as usize).max(1);
        let shared = Arc::new(Mutex::new(RollingBuffer::new(capacity)));
        let running = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = bounded(listen.event_capacity);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        log::info!(
            "Listening at {} Hz ({:.1} s window, polling every {:?})",
            sample_rate,
            listen.window_secs,
            listen.poll_interval
        );

        let mut handle = ListenerHandle {
            events: event_rx,
            stop_tx: Some(stop_tx),
            running: running.clone(),
            capture: None,
            processing: None,
        };

        let capture = Capture {
            source,
            shared: shared.clone(),
            running,
            block_size: listen.block_size,
        };
        handle.capture = Some(
            thread::Builder::new()
                .name("hushtone-capture".into())
                .spawn(move || capture.run())
                .map_err(|e| StegoError::Capture(format!("cannot spawn capture thread: {}", e)))?,
        );

        let processor = Processor {
            decoder,
            key,
            shared,
            events: event_tx,
            sample_rate,
            min_fill_ratio: listen.min_fill_ratio,
        };
        let poll_interval = listen.poll_interval;
        handle.processing = Some(
            thread::Builder::new()
                .name("hushtone-processing".into())
                .spawn(move || processor.run(poll_interval, stop_rx))
                .map_err(|e| {
                    StegoError::Capture(format!("cannot spawn processing thread: {}", e))
                })?,
        );

        Ok(handle)
    }
}

struct Capture<S> {
    source: S,
    shared: SharedBuffer,
    running: Arc<AtomicBool>,
    block_size: usize,
}

impl<S: SampleSource> Capture<S> {
    fn run(mut self) {
        let mut block = vec![0.0f32; self.block_size];
        let mut end = None;

        while self.running.load(Ordering::Acquire) {
            match self.source.read(&mut block) {
                Ok(0) => {
                    end = Some(CaptureEnd::Finished);
                    break;
                }
                Ok(n) => lock(&self.shared).push(&block[..n.min(block.len())]),
                Err(e) => {
                    log::warn!("Sample source failed: {}", e);
                    end = Some(CaptureEnd::Failed(e));
                    break;
                }
            }
        }

        // Release the device before anyone can observe the end of capture
        drop(self.source);

        let total = {
            let mut buffer = lock(&self.shared);
            buffer.end = end;
            buffer.total_pushed
        };
        log::debug!("Capture stopped after {} samples", total);
    }
}

struct Processor {
    decoder: CommandDecoder,
    key: Key,
    shared: SharedBuffer,
    events: Sender<ListenEvent>,
    sample_rate: u32,
    min_fill_ratio: f32,
}

impl Processor {
    fn run(self, poll_interval: Duration, stop: Receiver<()>) {
        let ticker = tick(poll_interval);
        loop {
            select! {
                recv(stop) -> _ => break,
                recv(ticker) -> _ => {
                    if let Some(last) = self.poll() {
                        // Lifecycle events wait for room unless a stop arrives
                        select! {
                            send(self.events, last) -> _ => {}
                            recv(stop) -> _ => {}
                        }
                        break;
                    }
                }
            }
        }
        log::info!("Listener processing stopped");
    }

    /// One decode pass; returns the final event once the source has ended
    /// and everything captured has been analyzed.
    fn poll(&self) -> Option<ListenEvent> {
        let (snapshot, front, ended) = {
            let mut buffer = lock(&self.shared);
            let ended = buffer.end.is_some();

            if !buffer.has_fresh_samples() {
                return match buffer.end.take() {
                    Some(CaptureEnd::Finished) => Some(ListenEvent::SourceFinished),
                    Some(CaptureEnd::Failed(e)) => Some(ListenEvent::SourceFailed(e)),
                    None => None,
                };
            }
            if !ended && buffer.fill_ratio() < self.min_fill_ratio {
                return None;
            }

            buffer.analyzed_through = buffer.total_pushed;
            buffer.rescan = false;
            let snapshot: Vec<f32> = buffer.samples.iter().copied().collect();
            (snapshot, buffer.front_position(), ended)
        };

        let analyzed = snapshot.len() as u64;
        let signal = Signal::new(snapshot, self.sample_rate);

        match self.decoder.decode_located(&signal, &self.key) {
            Ok(decoded) => {
                let config_rate = self.decoder.config().sample_rate as u64;
                let consumed = (decoded.end_sample as u64 * self.sample_rate as u64)
                    .div_ceil(config_rate)
                    .min(analyzed);
                {
                    let mut buffer = lock(&self.shared);
                    buffer.drain_through(front + consumed);
                    buffer.rescan = true;
                }
                log::info!("Command received");
                deliver(&self.events, ListenEvent::Command(decoded.command));
            }
            Err(e) if e.is_absence() => {}
            // More audio may complete the frame
            Err(e) if e.is_incomplete() && !ended => {
                log::debug!("Waiting for the rest of the frame: {}", e);
            }
            Err(e) => {
                log::debug!("Decode failed: {}", e);
                if e.class() == FailureClass::Corrupt {
                    lock(&self.shared).drain_through(front + analyzed);
                }
                deliver(&self.events, ListenEvent::Failure(e));
            }
        }

        None
    }
}

/// Running listener; stops and joins its threads on `stop` or drop
pub struct ListenerHandle {
    events: Receiver<ListenEvent>,
    stop_tx: Option<Sender<()>>,
    running: Arc<AtomicBool>,
    capture: Option<JoinHandle<()>>,
    processing: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn events(&self) -> &Receiver<ListenEvent> {
        &self.events
    }

    /// Whether the processing thread is still delivering events
    pub fn is_running(&self) -> bool {
        self.processing.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop both threads and wait for them. Blocks while a source `read` is
    /// in progress.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        // Disconnecting the stop channel wakes the processing thread
        self.stop_tx.take();

        for (name, handle) in [
            ("processing", self.processing.take()),
            ("capture", self.capture.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    log::error!("Listener {} thread panicked", name);
                }
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
