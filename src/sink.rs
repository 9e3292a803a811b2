//! Audio sinks: where the producer's interleaved stereo buffers go.
//!
//! A sink's `write` is the producer's only blocking point: a hardware-backed
//! sink blocks until the consumer has room, which paces generation to real
//! time. Sinks that accept data instantly can be wrapped in [`PacedSink`] to
//! get the same behaviour.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::dsp::{BUFFER_FRAMES, CHANNELS, SAMPLE_RATE};
use crate::error::SinkError;

/// Sample layout the producer will deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per `write` call.
    pub buffer_frames: usize,
}

impl Default for SinkFormat {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            buffer_frames: BUFFER_FRAMES,
        }
    }
}

impl SinkFormat {
    /// Playback time of `samples` interleaved samples.
    pub fn duration_of(&self, samples: usize) -> Duration {
        let frames = samples as u64 / self.channels.max(1) as u64;
        Duration::from_micros(frames * 1_000_000 / self.sample_rate.max(1) as u64)
    }

    /// Playback time of one full buffer.
    pub fn buffer_duration(&self) -> Duration {
        self.duration_of(self.buffer_frames * self.channels as usize)
    }
}

/// Consumer side of the producer loop.
pub trait AudioSink: Send {
    /// Prepare for `format`. Called once, before the producer starts.
    fn configure(&mut self, format: &SinkFormat) -> Result<(), SinkError>;

    /// Deliver one buffer of interleaved samples, blocking if the consumer
    /// is full.
    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError>;

    /// Flush anything buffered. Called once when the producer exits.
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn configure(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
        (**self).configure(format)
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        (**self).write(samples)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        (**self).finish()
    }
}

// ── Memory ──────────────────────────────────────────────────

/// Shared view of what a [`MemorySink`] has captured.
#[derive(Debug, Clone, Default)]
pub struct CaptureHandle {
    samples: Arc<Mutex<Vec<i16>>>,
}

impl CaptureHandle {
    /// Copy of every interleaved sample captured so far.
    pub fn samples(&self) -> Vec<i16> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Captures everything written into memory.
///
/// With a frame limit, the sink closes once that many frames are stored.
#[derive(Debug, Default)]
pub struct MemorySink {
    capture: CaptureHandle,
    limit_samples: Option<usize>,
    channels: usize,
}

impl MemorySink {
    /// Capture without a limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture at most `frames` stereo frames, then report [`SinkError::Closed`].
    pub fn with_frame_limit(frames: usize) -> Self {
        Self {
            limit_samples: Some(frames),
            ..Self::default()
        }
    }

    /// Shared view of the captured samples, readable from other threads.
    pub fn handle(&self) -> CaptureHandle {
        self.capture.clone()
    }
}

impl AudioSink for MemorySink {
    fn configure(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
        self.channels = format.channels as usize;
        if let Some(frames) = self.limit_samples {
            self.limit_samples = Some(frames * self.channels);
        }
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let mut captured = self
            .capture
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let room = match self.limit_samples {
            Some(limit) if captured.len() >= limit => return Err(SinkError::Closed),
            Some(limit) => limit - captured.len(),
            None => samples.len(),
        };
        captured.extend_from_slice(&samples[..samples.len().min(room)]);
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink {
    samples_written: u64,
}

impl NullSink {
    /// Sink that drops every buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total samples discarded so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }
}

impl AudioSink for NullSink {
    fn configure(&mut self, _format: &SinkFormat) -> Result<(), SinkError> {
        Ok(())
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        self.samples_written += samples.len() as u64;
        Ok(())
    }
}

// ── Pacing ──────────────────────────────────────────────────

/// Wraps a sink and blocks each write until the previous buffer would have
/// finished playing, the way a DMA-fed output does.
#[derive(Debug)]
pub struct PacedSink<S> {
    inner: S,
    format: SinkFormat,
    next_deadline: Option<Instant>,
}

impl<S: AudioSink> PacedSink<S> {
    /// Pace writes to `inner` at the configured sample rate.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            format: SinkFormat::default(),
            next_deadline: None,
        }
    }

    /// Unwrap the paced sink.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AudioSink> AudioSink for PacedSink<S> {
    fn configure(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
        self.format = *format;
        self.next_deadline = None;
        self.inner.configure(format)
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            thread::sleep(deadline - now);
        }
        // Falling behind resets the schedule instead of bursting to catch up.
        let start = deadline.max(now);
        self.next_deadline = Some(start + self.format.duration_of(samples.len()));
        self.inner.write(samples)
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.inner.finish()
    }
}

// ── WAV ─────────────────────────────────────────────────────

#[cfg(feature = "wav")]
pub use wav::WavSink;

#[cfg(feature = "wav")]
mod wav {
    use std::fs::File;
    use std::io::BufWriter;
    use std::path::{Path, PathBuf};

    use hound::{SampleFormat, WavSpec, WavWriter};
    use tracing::info;

    use super::{AudioSink, SinkFormat};
    use crate::error::SinkError;

    /// Writes 16-bit PCM to a WAV file, optionally closing after a frame count.
    pub struct WavSink {
        path: PathBuf,
        writer: Option<WavWriter<BufWriter<File>>>,
        limit_samples: Option<u64>,
        frame_limit: Option<u64>,
        written: u64,
    }

    impl WavSink {
        /// WAV sink for `path`. The file is created when the producer configures it.
        pub fn create(path: impl AsRef<Path>) -> Self {
            Self {
                path: path.as_ref().to_path_buf(),
                writer: None,
                limit_samples: None,
                frame_limit: None,
                written: 0,
            }
        }

        /// Stop after `frames` stereo frames and report [`SinkError::Closed`].
        pub fn with_frame_limit(mut self, frames: u64) -> Self {
            self.frame_limit = Some(frames);
            self
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl AudioSink for WavSink {
        fn configure(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
            let spec = WavSpec {
                channels: format.channels,
                sample_rate: format.sample_rate,
                bits_per_sample: 16,
                sample_format: SampleFormat::Int,
            };
            self.writer = Some(WavWriter::create(&self.path, spec)?);
            self.limit_samples = self.frame_limit.map(|f| f * format.channels as u64);
            info!("writing {} Hz stereo WAV to {}", format.sample_rate, self.path.display());
            Ok(())
        }

        fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
            let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
            let room = match self.limit_samples {
                Some(limit) if self.written >= limit => return Err(SinkError::Closed),
                Some(limit) => (limit - self.written) as usize,
                None => samples.len(),
            };
            for &sample in &samples[..samples.len().min(room)] {
                writer.write_sample(sample)?;
                self.written += 1;
            }
            Ok(())
        }

        fn finish(&mut self) -> Result<(), SinkError> {
            if let Some(writer) = self.writer.take() {
                writer.finalize()?;
                info!("WAV finished: {} ({} samples)", self.path.display(), self.written);
            }
            Ok(())
        }
    }
}

// ── Sound card ──────────────────────────────────────────────

#[cfg(feature = "device")]
pub use device::DeviceSink;

#[cfg(feature = "device")]
mod device {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use ringbuf::traits::{Consumer, Producer, Split};
    use ringbuf::{HeapProd, HeapRb};
    use tracing::{error, info};

    use super::{AudioSink, SinkFormat};
    use crate::error::SinkError;

    /// Buffers held in the ring between the producer and the device callback.
    const RING_BUFFERS: usize = 4;

    /// Plays through the default output device.
    ///
    /// The cpal stream lives on its own thread (streams are not `Send`); the
    /// producer feeds it through a lock-free ring and blocks while the ring is
    /// full.
    #[derive(Default)]
    pub struct DeviceSink {
        ring: Option<HeapProd<i16>>,
        shutdown: Arc<AtomicBool>,
        stream_thread: Option<JoinHandle<()>>,
    }

    impl DeviceSink {
        /// Sink for the default output device. The stream opens in `configure`.
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn open_stream(
        format: SinkFormat,
        mut ring: ringbuf::HeapCons<i16>,
    ) -> Result<cpal::Stream, SinkError> {
        let host = cpal::default_host();
        info!("Audio host: {:?}", host.id());

        let device = host
            .default_output_device()
            .ok_or_else(|| SinkError::Unavailable("no audio output device found".into()))?;
        if let Ok(name) = device.name() {
            info!("Audio device: {name}");
        }

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    // Underruns play silence.
                    for out in data.iter_mut() {
                        *out = ring.try_pop().map_or(0.0, |s| s as f32 / 32_768.0);
                    }
                },
                |err| error!("Audio stream error: {err}"),
                None,
            )
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| SinkError::Unavailable(e.to_string()))?;
        Ok(stream)
    }

    impl AudioSink for DeviceSink {
        fn configure(&mut self, format: &SinkFormat) -> Result<(), SinkError> {
            let capacity = format.buffer_frames * format.channels as usize * RING_BUFFERS;
            let (producer, consumer) = HeapRb::<i16>::new(capacity).split();

            let (ready_tx, ready_rx) = mpsc::channel();
            let shutdown = Arc::clone(&self.shutdown);
            let format = *format;

            let handle = thread::Builder::new()
                .name("audio-device".into())
                .spawn(move || match open_stream(format, consumer) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        while !shutdown.load(Ordering::Acquire) {
                            thread::park();
                        }
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    info!("Audio stream started at {} Hz", format.sample_rate);
                    self.ring = Some(producer);
                    self.stream_thread = Some(handle);
                    Ok(())
                }
                Ok(Err(e)) => {
                    let _ = handle.join();
                    Err(e)
                }
                Err(_) => {
                    let _ = handle.join();
                    Err(SinkError::Unavailable("audio device thread exited".into()))
                }
            }
        }

        fn write(&mut self, samples: &[i16]) -> Result<(), SinkError> {
            let ring = self.ring.as_mut().ok_or(SinkError::Closed)?;
            let mut remaining = samples;
            while !remaining.is_empty() {
                let pushed = ring.push_slice(remaining);
                remaining = &remaining[pushed..];
                if !remaining.is_empty() {
                    let stream_gone = self
                        .stream_thread
                        .as_ref()
                        .is_none_or(|handle| handle.is_finished());
                    if stream_gone {
                        return Err(SinkError::Closed);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            }
            Ok(())
        }
    }

    impl Drop for DeviceSink {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::Release);
            if let Some(handle) = self.stream_thread.take() {
                handle.thread().unpark();
                let _ = handle.join();
            }
        }
    }
}

/// Log and swallow a `finish` failure; used on producer exit.
pub(crate) fn finish_quietly<S: AudioSink + ?Sized>(sink: &mut S) {
    if let Err(e) = sink.finish() {
        debug!("sink finish failed: {e}");
    }
}
