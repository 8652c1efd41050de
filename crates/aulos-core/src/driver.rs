//! Platform audio driver abstraction.
//!
//! The lifecycle controller talks to the audio platform through
//! [`AudioDriver`]: init/teardown, a latency override, and the
//! post-init settle delay some platforms need. [`CpalDriver`] is the
//! production implementation; [`ManualDriver`] exposes the realtime
//! callback as an ordinary method so tests (and offline rendering)
//! can pump frames synchronously.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Sample rate assumed before a device has been opened.
pub const DEFAULT_SAMPLE_RATE: f64 = 44100.0;

/// Realtime render callback: fills an interleaved stereo buffer.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send>;

/// Platform audio backend driven by the lifecycle controller.
pub trait AudioDriver: Send + Sync {
    /// Open the output stream and start invoking `render` from the
    /// platform's realtime thread. Idempotent while running.
    fn init(&self, min_latency_seconds: f32, render: RenderFn) -> Result<()>;

    /// Stop the stream and drop the callback.
    fn teardown(&self);

    /// Override the platform's minimum latency for streams opened
    /// later. Returns false when the override is rejected.
    fn override_min_latency_millis(&self, millis: i32) -> bool;

    fn sample_rate(&self) -> f64;

    /// Delay the first user waits after a successful init before the
    /// stream is trusted to be running.
    fn startup_settle(&self) -> Duration {
        Duration::ZERO
    }
}

/// Wrapper to hold a `cpal::Stream` in a `Send` context.
///
/// `cpal::Stream` is `!Send` due to platform internals. This is safe
/// because the stream only lives behind the driver's mutex, is never
/// accessed after creation, and is dropped when the driver tears down.
struct StreamHandle(#[allow(dead_code)] cpal::Stream);

// SAFETY: the stream is only stored and dropped, never used from
// another thread; the mutex serializes the store and the drop.
unsafe impl Send for StreamHandle {}

/// cpal-backed output driver.
pub struct CpalDriver {
    device_index: Option<usize>,
    stream: Mutex<Option<StreamHandle>>,
    cached_sample_rate: Mutex<Option<f64>>,
    /// Pending latency override in milliseconds, consulted the next
    /// time a stream is opened. Zero means "platform default".
    min_latency_millis: AtomicI32,
}

impl CpalDriver {
    pub fn new(device_index: Option<usize>) -> Self {
        Self {
            device_index,
            stream: Mutex::new(None),
            cached_sample_rate: Mutex::new(None),
            min_latency_millis: AtomicI32::new(0),
        }
    }

    fn select_device(&self) -> Result<cpal::Device> {
        let host = cpal::default_host();
        match self.device_index {
            Some(wanted) => host
                .output_devices()?
                .nth(wanted)
                .ok_or_else(|| Error::InvalidDevice(format!("no output device at index {wanted}"))),
            None => host
                .default_output_device()
                .ok_or_else(|| Error::InvalidDevice("no default output device".to_string())),
        }
    }

    /// Open an output stream whose native sample type is `T`.
    ///
    /// The render callback always produces interleaved stereo f32; the
    /// stream closure spreads that over however many channels the
    /// device exposes (extra channels stay silent) and converts to the
    /// native type per sample. A panicking render is replaced by
    /// silence so the device is never fed garbage.
    fn open_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut render: RenderFn,
    ) -> Result<cpal::Stream>
    where
        T: cpal::SizedSample + cpal::FromSample<f32>,
    {
        let channels = (config.channels as usize).max(1);
        let mut stereo: Vec<f32> = Vec::new();

        let stream = device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                if stereo.len() < frames * 2 {
                    stereo.resize(frames * 2, 0.0);
                }
                let ok = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    render(&mut stereo[..frames * 2]);
                }))
                .is_ok();
                if !ok {
                    stereo[..frames * 2].fill(0.0);
                }

                for (out_frame, in_frame) in
                    data.chunks_mut(channels).zip(stereo[..frames * 2].chunks(2))
                {
                    for (ch, sample) in out_frame.iter_mut().enumerate() {
                        let value = if ch < 2 { in_frame[ch] } else { 0.0 };
                        *sample = T::from_sample(value);
                    }
                }
            },
            // Stream errors cannot be surfaced from the audio thread.
            |_err| {},
            None,
        )?;

        Ok(stream)
    }
}

impl Default for CpalDriver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl AudioDriver for CpalDriver {
    fn init(&self, min_latency_seconds: f32, render: RenderFn) -> Result<()> {
        let mut slot = self.stream.lock();
        if slot.is_some() {
            return Ok(());
        }

        let device = self.select_device()?;
        let supported = device.default_output_config()?;
        let sample_rate = supported.sample_rate().0 as f64;
        let format = supported.sample_format();
        let mut config: cpal::StreamConfig = supported.into();

        // The stored override and the init parameter both express a
        // minimum latency; the larger one becomes a fixed buffer-size
        // request.
        let wanted_ms = self
            .min_latency_millis
            .load(Ordering::Acquire)
            .max((min_latency_seconds * 1000.0).ceil() as i32);
        if wanted_ms > 0 {
            let frames = (sample_rate / 1000.0 * wanted_ms as f64).ceil() as u32;
            config.buffer_size = cpal::BufferSize::Fixed(frames.max(1));
        }

        let stream = match format {
            cpal::SampleFormat::F32 => Self::open_stream::<f32>(&device, &config, render),
            cpal::SampleFormat::I16 => Self::open_stream::<i16>(&device, &config, render),
            cpal::SampleFormat::U16 => Self::open_stream::<u16>(&device, &config, render),
            other => Err(Error::Driver(format!("no support for {other:?} output"))),
        }?;
        stream.play()?;

        *self.cached_sample_rate.lock() = Some(sample_rate);
        *slot = Some(StreamHandle(stream));
        Ok(())
    }

    fn teardown(&self) {
        *self.stream.lock() = None;
    }

    fn override_min_latency_millis(&self, millis: i32) -> bool {
        if millis <= 0 {
            return false;
        }
        if self.stream.lock().is_some() {
            // Too late: the stream is already running.
            return false;
        }
        self.min_latency_millis.store(millis, Ordering::Release);
        true
    }

    fn sample_rate(&self) -> f64 {
        if let Some(rate) = *self.cached_sample_rate.lock() {
            return rate;
        }
        self.select_device()
            .and_then(|d| Ok(d.default_output_config()?))
            .map(|c| c.sample_rate().0 as f64)
            .unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    fn startup_settle(&self) -> Duration {
        // Some platforms report the stream as started before it is
        // actually pulling samples; give it a moment.
        Duration::from_millis(1000)
    }
}

/// Driver whose realtime callback is pumped by hand.
///
/// Used by the test suites and usable for offline rendering: `pump`
/// plays the role of the platform's audio thread.
pub struct ManualDriver {
    render: Mutex<Option<RenderFn>>,
    sample_rate: f64,
    fail_next_init: AtomicBool,
    reject_latency_override: AtomicBool,
    latency_override: AtomicI32,
}

impl ManualDriver {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            render: Mutex::new(None),
            sample_rate,
            fail_next_init: AtomicBool::new(false),
            reject_latency_override: AtomicBool::new(false),
            latency_override: AtomicI32::new(0),
        }
    }

    /// Invoke the realtime callback for `frames` frames and return the
    /// rendered interleaved stereo block (empty when not running).
    pub fn pump(&self, frames: usize) -> Vec<f32> {
        let mut slot = self.render.lock();
        match slot.as_mut() {
            Some(render) => {
                let mut out = vec![0.0; frames * 2];
                render(&mut out);
                out
            }
            None => Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.render.lock().is_some()
    }

    /// Make the next `init` fail, exercising the error paths.
    pub fn fail_next_init(&self) {
        self.fail_next_init.store(true, Ordering::Release);
    }

    /// Reject latency overrides, exercising the init failure path.
    pub fn reject_latency_overrides(&self) {
        self.reject_latency_override.store(true, Ordering::Release);
    }

    pub fn latency_override(&self) -> Option<i32> {
        match self.latency_override.load(Ordering::Acquire) {
            0 => None,
            ms => Some(ms),
        }
    }
}

impl AudioDriver for ManualDriver {
    fn init(&self, _min_latency_seconds: f32, render: RenderFn) -> Result<()> {
        if self.fail_next_init.swap(false, Ordering::AcqRel) {
            return Err(Error::Driver("simulated init failure".to_string()));
        }
        *self.render.lock() = Some(render);
        Ok(())
    }

    fn teardown(&self) {
        *self.render.lock() = None;
    }

    fn override_min_latency_millis(&self, millis: i32) -> bool {
        if millis <= 0 || self.reject_latency_override.load(Ordering::Acquire) {
            return false;
        }
        self.latency_override.store(millis, Ordering::Release);
        true
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}
