// Playback engine
// Transport control, periodic metering, and observer notification over a
// decoded in-memory source

use parking_lot::{Condvar, Mutex};
use ringbuf::{HeapRb, traits::{Consumer, Observer, Producer, Split}};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

use crate::audio::decoder::{AudioDecoder, DecodedAudio};
use crate::audio::output::{CpalOutput, OutputDevice, RenderFn};
use crate::audio::resampler;
use crate::error::EngineError;
use crate::meter::{self, SILENCE_FLOOR_DB};
use crate::state::{PlaybackState, SubscriptionHandle};

type RingProducer = ringbuf::HeapProd<f32>;
type RingConsumer = ringbuf::HeapCons<f32>;
type ObserverFn = Box<dyn Fn(&PlaybackState) + Send + 'static>;

/// Metering cadence: 20 Hz is fast enough for smooth meter animation and
/// cheap enough not to burden the scheduler.
const METER_INTERVAL: Duration = Duration::from_millis(50);

/// Samples the feeder copies into the ring buffer per push attempt.
const FEED_CHUNK_SAMPLES: usize = 1024 * 2;

/// Shortest source `load` accepts, in seconds. A zero-length source would
/// poison every downstream time/duration division.
const MIN_SOURCE_SECS: f64 = 0.01;

/// ~250ms of stereo audio at the device rate, kept even so the buffer only
/// ever holds whole frames.
fn ring_capacity(sample_rate: u32) -> usize {
    ((sample_rate as usize / 4) * 2).max(FEED_CHUNK_SAMPLES * 2) & !1
}

/// Transport state shared between the control thread, the feeder, the
/// sampler, and the device render callback. Everything is published through
/// sequentially consistent atomics so snapshot reads are never torn.
struct SharedTransport {
    sample_rate: u32,
    playing: AtomicBool,
    /// Feeder cursor has reached the end of the source.
    src_done: AtomicBool,
    /// Armed on seek/load; the render callback drains stale buffered audio
    /// before its next pop.
    clear_flag: AtomicBool,
    /// Frames actually handed to the device since the start of the track.
    position_frames: AtomicU64,
    total_frames: AtomicU64,
    volume_bits: AtomicU32,
    left_db_bits: AtomicU32,
    right_db_bits: AtomicU32,
}

impl SharedTransport {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            playing: AtomicBool::new(false),
            src_done: AtomicBool::new(false),
            clear_flag: AtomicBool::new(false),
            position_frames: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            left_db_bits: AtomicU32::new(SILENCE_FLOOR_DB.to_bits()),
            right_db_bits: AtomicU32::new(SILENCE_FLOOR_DB.to_bits()),
        }
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::SeqCst))
    }

    fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::SeqCst);
    }

    fn set_powers(&self, left: f32, right: f32) {
        self.left_db_bits.store(left.to_bits(), Ordering::SeqCst);
        self.right_db_bits.store(right.to_bits(), Ordering::SeqCst);
    }

    fn floor_powers(&self) {
        self.set_powers(SILENCE_FLOOR_DB, SILENCE_FLOOR_DB);
    }

    fn snapshot(&self) -> PlaybackState {
        PlaybackState {
            is_playing: self.playing.load(Ordering::SeqCst),
            current_time: self.position_frames.load(Ordering::SeqCst) as f64
                / self.sample_rate as f64,
            left_power: f32::from_bits(self.left_db_bits.load(Ordering::SeqCst)),
            right_power: f32::from_bits(self.right_db_bits.load(Ordering::SeqCst)),
            volume: self.volume(),
        }
    }
}

/// Build the render callback handed to the output device. Pops whole frames
/// from the ring buffer, meters them (pre-volume), applies the gain, and
/// advances the play position.
fn make_render(shared: Arc<SharedTransport>, mut consumer: RingConsumer) -> RenderFn {
    Box::new(move |out: &mut [f32]| {
        if shared.clear_flag.swap(false, Ordering::SeqCst) {
            // Drain stale samples buffered before a seek or load
            while consumer.try_pop().is_some() {}
        }

        out.fill(0.0);
        if !shared.playing.load(Ordering::SeqCst) {
            return;
        }

        // Pop whole frames only, so channel alignment survives partial reads
        let want = out.len() & !1;
        let avail = consumer.occupied_len() & !1;
        let take = want.min(avail);

        if take > 0 {
            consumer.pop_slice(&mut out[..take]);

            let (left, right) = meter::block_peaks(&out[..take]);
            shared.set_powers(meter::power_db(left), meter::power_db(right));

            let volume = shared.volume();
            for sample in &mut out[..take] {
                *sample *= volume;
            }

            let total = shared.total_frames.load(Ordering::SeqCst);
            let position = shared.position_frames.load(Ordering::SeqCst);
            let position = (position + (take / 2) as u64).min(total);
            shared.position_frames.store(position, Ordering::SeqCst);
        } else if shared.src_done.load(Ordering::SeqCst) {
            // Source exhausted and buffer drained: the transport auto-stops
            shared.playing.store(false, Ordering::SeqCst);
            shared.floor_powers();
            let total = shared.total_frames.load(Ordering::SeqCst);
            shared.position_frames.store(total, Ordering::SeqCst);
        } else {
            // Underrun while the feeder catches up
            shared.floor_powers();
        }
    })
}

/// Keeps the ring buffer topped up from the decoded source. The cursor is
/// shared with `seek`, which repositions it under the same lock.
fn feeder_loop(
    source: Arc<DecodedAudio>,
    producer: Arc<Mutex<RingProducer>>,
    cursor: Arc<Mutex<usize>>,
    shared: Arc<SharedTransport>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        let pushed = {
            let mut cursor = cursor.lock();
            let remaining = source.samples.len() - *cursor;
            shared.src_done.store(remaining == 0, Ordering::SeqCst);
            if remaining == 0 {
                0
            } else {
                let mut producer = producer.lock();
                let vacant = producer.vacant_len() & !1;
                let want = remaining.min(FEED_CHUNK_SAMPLES).min(vacant);
                if want == 0 {
                    0
                } else {
                    let n = producer.push_slice(&source.samples[*cursor..*cursor + want]);
                    *cursor += n;
                    n
                }
            }
        };

        if pushed == 0 {
            // Buffer full or source exhausted; wait for the device to drain
            thread::sleep(Duration::from_millis(2));
        }
    }
}

struct LoadedSource {
    path: PathBuf,
    duration: f64,
    total_samples: usize,
    cursor: Arc<Mutex<usize>>,
    feeder_stop: Arc<AtomicBool>,
    feeder: Option<JoinHandle<()>>,
}

impl LoadedSource {
    fn stop(&mut self) {
        self.feeder_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.feeder.take() {
            let _ = handle.join();
        }
    }
}

struct SamplerTask {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

/// Ticks every [`METER_INTERVAL`] and notifies observers synchronously, in
/// registration order, with a fresh snapshot. Exits promptly when signaled.
fn sampler_loop(
    shared: Arc<SharedTransport>,
    observers: Arc<Mutex<BTreeMap<u64, ObserverFn>>>,
    stop: Arc<(Mutex<bool>, Condvar)>,
) {
    let (lock, cvar) = &*stop;
    loop {
        {
            let mut stopped = lock.lock();
            if *stopped {
                break;
            }
            cvar.wait_for(&mut stopped, METER_INTERVAL);
            if *stopped {
                break;
            }
        }
        let snapshot = shared.snapshot();
        for observer in observers.lock().values() {
            observer(&snapshot);
        }
    }
}

/// Owns a decoded audio source and its transport, samples elapsed time and
/// per-channel peak power at 20 Hz while playing, and publishes the
/// resulting [`PlaybackState`] to subscribers.
///
/// All control methods are meant to be called from one owning thread; the
/// engine is deliberately not `Sync` (the cpal stream is not `Send`
/// either), matching a UI/event-thread ownership model.
pub struct PlaybackEngine {
    _device: Box<dyn OutputDevice>,
    shared: Arc<SharedTransport>,
    producer: Arc<Mutex<RingProducer>>,
    observers: Arc<Mutex<BTreeMap<u64, ObserverFn>>>,
    next_subscription: u64,
    source: Option<LoadedSource>,
    sampler: Option<SamplerTask>,
}

impl PlaybackEngine {
    /// Create an engine on the default cpal output device.
    pub fn new() -> Result<Self, EngineError> {
        Self::with_device(Box::new(CpalOutput::new()?))
    }

    /// Create an engine on an explicit output device. This is how tests run
    /// against [`ManualOutput`](crate::audio::stubs::ManualOutput).
    pub fn with_device(mut device: Box<dyn OutputDevice>) -> Result<Self, EngineError> {
        let sample_rate = device.sample_rate();
        let shared = Arc::new(SharedTransport::new(sample_rate));

        let ring = HeapRb::<f32>::new(ring_capacity(sample_rate));
        let (producer, consumer) = ring.split();

        device.start(make_render(shared.clone(), consumer))?;

        Ok(Self {
            _device: device,
            shared,
            producer: Arc::new(Mutex::new(producer)),
            observers: Arc::new(Mutex::new(BTreeMap::new())),
            next_subscription: 0,
            source: None,
            sampler: None,
        })
    }

    /// Decode a file and make it the current source. Forces the transport
    /// to stopped with time and meters reset. On failure the engine holds
    /// no source at all; callers may retry with a different path.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let path = path.as_ref();

        self.pause();
        self.teardown_source();

        let decoded = AudioDecoder::open(path)?.decode_all()?;
        if decoded.duration_secs() < MIN_SOURCE_SECS {
            return Err(EngineError::UnreadableSource(format!(
                "source shorter than {} s",
                MIN_SOURCE_SECS
            )));
        }

        let samples =
            resampler::resample_stereo(&decoded.samples, decoded.sample_rate, self.shared.sample_rate)?;
        let source = Arc::new(DecodedAudio {
            samples,
            sample_rate: self.shared.sample_rate,
        });
        let duration = source.duration_secs();

        self.shared.total_frames.store(source.frames() as u64, Ordering::SeqCst);
        self.shared.position_frames.store(0, Ordering::SeqCst);
        self.shared.src_done.store(false, Ordering::SeqCst);
        self.shared.floor_powers();
        self.shared.clear_flag.store(true, Ordering::SeqCst);

        let cursor = Arc::new(Mutex::new(0usize));
        let feeder_stop = Arc::new(AtomicBool::new(false));
        let feeder = thread::spawn({
            let source = source.clone();
            let producer = self.producer.clone();
            let cursor = cursor.clone();
            let shared = self.shared.clone();
            let stop = feeder_stop.clone();
            move || feeder_loop(source, producer, cursor, shared, stop)
        });

        debug!(path = %path.display(), duration, "loaded source");

        self.source = Some(LoadedSource {
            path: path.to_path_buf(),
            duration,
            total_samples: source.samples.len(),
            cursor,
            feeder_stop,
            feeder: Some(feeder),
        });
        Ok(())
    }

    /// Start the transport and the metering sampler. Idempotent while
    /// playing; a track that previously ran to its end restarts from zero.
    pub fn play(&mut self) -> Result<(), EngineError> {
        let source = self.source.as_ref().ok_or(EngineError::NoSourceLoaded)?;

        if self.shared.playing.load(Ordering::SeqCst) && self.sampler.is_some() {
            return Ok(());
        }

        let total = self.shared.total_frames.load(Ordering::SeqCst);
        if total > 0 && self.shared.position_frames.load(Ordering::SeqCst) >= total {
            let mut cursor = source.cursor.lock();
            *cursor = 0;
            self.shared.src_done.store(false, Ordering::SeqCst);
            self.shared.clear_flag.store(true, Ordering::SeqCst);
            self.shared.position_frames.store(0, Ordering::SeqCst);
        }

        self.shared.playing.store(true, Ordering::SeqCst);
        self.start_sampler();
        debug!("transport playing");
        Ok(())
    }

    /// Stop the transport and the sampler. No observer is notified after
    /// this returns. Idempotent; retains the current position.
    pub fn pause(&mut self) {
        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.floor_powers();
        self.stop_sampler();
        if self.source.is_some() {
            debug!("transport paused");
        }
    }

    /// Reposition playback, clamped to `[0, duration]`. Works in either
    /// transport state and never starts or stops sampling. No-op without a
    /// source.
    pub fn seek(&mut self, seconds: f64) {
        let Some(source) = self.source.as_ref() else {
            return;
        };

        let target = seconds.clamp(0.0, source.duration);
        let frame = ((target * self.shared.sample_rate as f64).round() as u64)
            .min(self.shared.total_frames.load(Ordering::SeqCst));

        {
            let mut cursor = source.cursor.lock();
            *cursor = frame as usize * 2;
            self.shared
                .src_done
                .store(*cursor >= source.total_samples, Ordering::SeqCst);
            self.shared.clear_flag.store(true, Ordering::SeqCst);
            self.shared.position_frames.store(frame, Ordering::SeqCst);
        }

        debug!(seconds = target, "seek");
    }

    /// Set the output gain, clamped to `[0, 1]`. Applies immediately,
    /// independent of the transport state.
    pub fn set_volume(&self, volume: f32) {
        self.shared.set_volume(volume.clamp(0.0, 1.0));
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    /// Synchronous snapshot of the observable transport state.
    pub fn current_state(&self) -> PlaybackState {
        self.shared.snapshot()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.playing.load(Ordering::SeqCst)
    }

    /// Duration of the loaded source in seconds, `0.0` before any load.
    pub fn duration(&self) -> f64 {
        self.source.as_ref().map(|s| s.duration).unwrap_or(0.0)
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.source.as_ref().map(|s| s.path.clone())
    }

    /// Register an observer invoked with every sampled update, on the
    /// sampler thread. Observers must not call back into the engine.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionHandle
    where
        F: Fn(&PlaybackState) + Send + 'static,
    {
        let id = self.next_subscription;
        self.next_subscription += 1;
        self.observers.lock().insert(id, Box::new(observer));
        SubscriptionHandle(id)
    }

    pub fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.observers.lock().remove(&handle.0);
    }

    fn start_sampler(&mut self) {
        // At most one sampling cycle exists at any time
        if self.sampler.is_some() {
            return;
        }
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let handle = thread::spawn({
            let shared = self.shared.clone();
            let observers = self.observers.clone();
            let stop = stop.clone();
            move || sampler_loop(shared, observers, stop)
        });
        self.sampler = Some(SamplerTask { stop, handle });
    }

    fn stop_sampler(&mut self) {
        if let Some(task) = self.sampler.take() {
            {
                let (lock, cvar) = &*task.stop;
                let mut stopped = lock.lock();
                *stopped = true;
                cvar.notify_one();
            }
            let _ = task.handle.join();
        }
    }

    fn teardown_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
        self.shared.playing.store(false, Ordering::SeqCst);
        self.shared.src_done.store(false, Ordering::SeqCst);
        self.shared.total_frames.store(0, Ordering::SeqCst);
        self.shared.position_frames.store(0, Ordering::SeqCst);
        self.shared.floor_powers();
        self.shared.clear_flag.store(true, Ordering::SeqCst);
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop_sampler();
        if let Some(mut source) = self.source.take() {
            source.stop();
        }
    }
}
