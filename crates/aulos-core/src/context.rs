//! Audio context: the pool, the driver and the master close-fade.
//!
//! The context owns the channel pool and the platform driver, and
//! builds the realtime render entry point handed to the driver at
//! init. The render path is lock-free: it iterates the pool's
//! arc-swapped snapshot, lets each group mix itself, and applies the
//! crossfade-to-zero ramp once the application has been told to
//! close.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::channels::ChannelPool;
use crate::driver::{AudioDriver, RenderFn};
use crate::error::Result;

/// Length of the master crossfade-to-zero at shutdown, in frames.
pub const CLOSE_FADE_FRAMES: u32 = 4096;

/// Callback buffer size assumed when the realtime callback has not
/// run yet at teardown time. Deliberately conservative.
pub const FALLBACK_CALLBACK_FRAMES: u32 = 10_000;

pub struct AudioContext {
    driver: Arc<dyn AudioDriver>,
    pool: Arc<ChannelPool>,
    initialized: AtomicBool,
    /// Frames per callback block, written by the realtime thread.
    /// Zero until the callback has run at least once.
    callback_frames: Arc<AtomicU32>,
    closing: Arc<AtomicBool>,
}

impl AudioContext {
    pub fn new(driver: Arc<dyn AudioDriver>) -> Self {
        Self {
            driver,
            pool: Arc::new(ChannelPool::new()),
            initialized: AtomicBool::new(false),
            callback_frames: Arc::new(AtomicU32::new(0)),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    pub fn driver(&self) -> &Arc<dyn AudioDriver> {
        &self.driver
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn sample_rate(&self) -> f64 {
        self.driver.sample_rate()
    }

    /// Most recent callback block size in frames, zero before the
    /// first callback.
    pub fn callback_frames(&self) -> u32 {
        self.callback_frames.load(Ordering::Acquire)
    }

    /// Open the output stream. The render entry point captures the
    /// pool snapshot mechanism, so groups added later are picked up
    /// without touching the stream.
    pub fn init(&self, min_latency_seconds: f32) -> Result<()> {
        let mut state = RenderState {
            pool: Arc::clone(&self.pool),
            callback_frames: Arc::clone(&self.callback_frames),
            closing: Arc::clone(&self.closing),
            fade_position: 0,
        };
        let render: RenderFn = Box::new(move |out| state.render(out));
        self.driver.init(min_latency_seconds, render)?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    /// Begin the crossfade of all output to zero.
    pub fn on_application_should_close(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub fn teardown(&self) {
        self.driver.teardown();
        self.initialized.store(false, Ordering::Release);
        self.closing.store(false, Ordering::Release);
        self.callback_frames.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for AudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioContext")
            .field("initialized", &self.is_initialized())
            .field("callback_frames", &self.callback_frames())
            .finish()
    }
}

/// State owned by the realtime callback.
struct RenderState {
    pool: Arc<ChannelPool>,
    callback_frames: Arc<AtomicU32>,
    closing: Arc<AtomicBool>,
    fade_position: u32,
}

impl RenderState {
    fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        self.callback_frames.store(frames as u32, Ordering::Relaxed);

        out.fill(0.0);
        let groups = self.pool.render_snapshot();
        for group in groups.iter() {
            group.render_block(frames, out);
        }

        if self.closing.load(Ordering::Acquire) {
            for frame in out.chunks_exact_mut(2) {
                let gain = 1.0 - (self.fade_position as f32 / CLOSE_FADE_FRAMES as f32).min(1.0);
                frame[0] *= gain;
                frame[1] *= gain;
                if self.fade_position < CLOSE_FADE_FRAMES {
                    self.fade_position += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::ManualDriver;

    #[test]
    fn init_publishes_state_and_teardown_clears_it() {
        let driver = Arc::new(ManualDriver::new(44100.0));
        let context = AudioContext::new(driver.clone());
        assert!(!context.is_initialized());

        context.init(0.0).expect("init");
        assert!(context.is_initialized());

        driver.pump(128);
        assert_eq!(context.callback_frames(), 128);

        context.teardown();
        assert!(!context.is_initialized());
        assert_eq!(context.callback_frames(), 0);
    }

    #[test]
    fn close_fade_ramps_to_silence() {
        let driver = Arc::new(ManualDriver::new(44100.0));
        let context = AudioContext::new(driver.clone());
        context.init(0.0).expect("init");

        struct Dc;
        impl crate::channels::GroupRenderer for Dc {
            fn apply(&mut self, _c: crate::channels::GroupCommand) {}
            fn render(&mut self, frames: usize, out: &mut [f32]) {
                for s in out[..frames * 2].iter_mut() {
                    *s += 1.0;
                }
            }
        }
        let (group, _flag) = context.pool().add_no_xfade(8, 0);
        assert!(group.install_renderer(Box::new(Dc)));

        let block = driver.pump(64);
        assert!(block.iter().all(|&s| s == 1.0));

        context.on_application_should_close();
        // Consume the whole fade.
        let mut frames_run = 0;
        while frames_run < CLOSE_FADE_FRAMES as usize {
            driver.pump(1024);
            frames_run += 1024;
        }
        let block = driver.pump(64);
        assert!(block.iter().all(|&s| s == 0.0));
    }
}
