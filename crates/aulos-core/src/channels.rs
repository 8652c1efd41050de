//! Channel pool: per-voice audio buses shared with the realtime thread.
//!
//! The pool owns two append-only families of channel groups
//! (crossfaded and non-crossfaded). The control path appends under
//! the pool mutex; the realtime callback never takes that lock, it
//! reads a snapshot of the live groups through an `ArcSwap` that is
//! republished after every append.
//!
//! Each group carries a bounded event queue (control → realtime), an
//! atomic counter of outstanding realtime work, and a render slot the
//! owning instrument installs once at initialization.
//!
//! # RT safety
//!
//! - `render_block()`: called on the audio thread. Snapshot iteration
//!   is lock-free; the queue drain uses `try_recv()`; the render slot
//!   is entered with `try_lock()`, which can only contend with the
//!   one-shot installation, so at worst one buffer is skipped.
//! - `schedule()`: called from control threads. `try_send()` onto the
//!   bounded queue; a full queue drops the event (back-pressure), it
//!   never blocks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

/// Maximum events buffered per group per audio cycle. If the queue is
/// full, `schedule()` fails and the caller reports a dropped note.
const EVENTS_PER_GROUP: usize = 256;

/// A command travelling from the control path into a group's render
/// slot. `program` is meaningful for effect voices only; tonal
/// instruments pass 0.
#[derive(Debug, Clone, Copy)]
pub enum GroupCommand {
    NoteOn {
        slot: usize,
        pitch: i16,
        velocity: f32,
        program: i32,
    },
    NoteOff {
        slot: usize,
    },
}

/// The render half installed into a group by its instrument.
///
/// Owned by the audio thread after installation: `apply` consumes
/// queued commands, `render` mixes into the interleaved stereo output.
/// Implementations must be RT-safe (no allocation, no locks).
pub trait GroupRenderer: Send {
    fn apply(&mut self, command: GroupCommand);
    fn render(&mut self, frames: usize, out: &mut [f32]);
}

/// One set of per-voice buses with a common crossfade policy.
pub struct ChannelGroup {
    max_voices: u8,
    orchestrator_cap: u8,
    /// Outstanding realtime work: queued commands plus live voices.
    /// Incremented on the control side when work is scheduled,
    /// decremented by the audio thread on completion.
    pending: Arc<AtomicUsize>,
    removed: AtomicBool,
    tx: Sender<GroupCommand>,
    rx: Receiver<GroupCommand>,
    renderer: Mutex<Option<Box<dyn GroupRenderer>>>,
    #[cfg(test)]
    reject_install: AtomicBool,
}

impl ChannelGroup {
    fn new(max_voices: usize, orchestrator_cap: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(EVENTS_PER_GROUP);
        Self {
            max_voices: max_voices.min(u8::MAX as usize) as u8,
            orchestrator_cap: orchestrator_cap.min(u8::MAX as usize) as u8,
            pending: Arc::new(AtomicUsize::new(0)),
            removed: AtomicBool::new(false),
            tx,
            rx,
            renderer: Mutex::new(None),
            #[cfg(test)]
            reject_install: AtomicBool::new(false),
        }
    }

    pub fn max_voices(&self) -> u8 {
        self.max_voices
    }

    pub fn orchestrator_cap(&self) -> u8 {
        self.orchestrator_cap
    }

    /// True while realtime work is outstanding on this group: a queued
    /// command not yet consumed, or a voice whose envelope has not
    /// reached its terminal state. Samples an atomic counter; never
    /// blocks.
    pub fn has_realtime_functions(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    pub(crate) fn realtime_counter(&self) -> &Arc<AtomicUsize> {
        &self.pending
    }

    /// Queue a command for the render slot. The outstanding-work
    /// counter is raised before the send so a zero reading under the
    /// registry latch proves the group is silent. Returns false (and
    /// leaves the counter balanced) when the queue is full.
    pub(crate) fn schedule(&self, command: GroupCommand) -> bool {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.try_send(command).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Install the render half. One-shot: fails when a renderer is
    /// already present or the group has been retired.
    pub(crate) fn install_renderer(&self, renderer: Box<dyn GroupRenderer>) -> bool {
        #[cfg(test)]
        if self.reject_install.load(Ordering::Acquire) {
            return false;
        }
        if self.removed.load(Ordering::Acquire) {
            return false;
        }
        let mut slot = self.renderer.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(renderer);
        true
    }

    /// Mark the group for reclamation. The realtime callback stops
    /// rendering it and the next pool republish drops it from the
    /// snapshot; the entry itself lives until `clear_all`.
    pub(crate) fn retire(&self) {
        self.removed.store(true, Ordering::Release);
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Audio-thread entry point: drain queued commands into the render
    /// slot, then mix `frames` frames into `out`.
    pub(crate) fn render_block(&self, frames: usize, out: &mut [f32]) {
        if self.is_retired() {
            return;
        }
        let Some(mut slot) = self.renderer.try_lock() else {
            return;
        };
        let Some(renderer) = slot.as_mut() else {
            return;
        };
        while let Ok(command) = self.rx.try_recv() {
            renderer.apply(command);
        }
        renderer.render(frames, out);
    }
}

impl std::fmt::Debug for ChannelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelGroup")
            .field("max_voices", &self.max_voices)
            .field("orchestrator_cap", &self.orchestrator_cap)
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("removed", &self.removed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Returned at emplacement time so the creator can reclaim the entry
/// if initialization of the attached instrument fails.
#[derive(Debug)]
pub struct RemovalFlag {
    group: Arc<ChannelGroup>,
}

impl RemovalFlag {
    pub fn flag_for_removal(self) {
        self.group.retire();
    }
}

#[derive(Default)]
struct PoolInner {
    xfade: Vec<Arc<ChannelGroup>>,
    no_xfade: Vec<Arc<ChannelGroup>>,
}

/// Pool of channel groups owned by the audio context.
///
/// Append-only; it never shrinks except through [`ChannelPool::clear_all`]
/// at teardown.
pub struct ChannelPool {
    inner: Mutex<PoolInner>,
    live: ArcSwap<Vec<Arc<ChannelGroup>>>,
    #[cfg(test)]
    poison_next: AtomicBool,
}

impl ChannelPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner::default()),
            live: ArcSwap::from_pointee(Vec::new()),
            #[cfg(test)]
            poison_next: AtomicBool::new(false),
        }
    }

    /// Append a non-crossfaded group. `max_voices` is clamped to 255.
    pub fn add_no_xfade(
        &self,
        max_voices: usize,
        orchestrator_cap: usize,
    ) -> (Arc<ChannelGroup>, RemovalFlag) {
        self.add(max_voices, orchestrator_cap, false)
    }

    /// Append a crossfaded group. `max_voices` is clamped to 255.
    pub fn add_xfade(
        &self,
        max_voices: usize,
        orchestrator_cap: usize,
    ) -> (Arc<ChannelGroup>, RemovalFlag) {
        self.add(max_voices, orchestrator_cap, true)
    }

    fn add(
        &self,
        max_voices: usize,
        orchestrator_cap: usize,
        xfade: bool,
    ) -> (Arc<ChannelGroup>, RemovalFlag) {
        let group = Arc::new(ChannelGroup::new(max_voices, orchestrator_cap));
        #[cfg(test)]
        if self.poison_next.swap(false, Ordering::AcqRel) {
            group.reject_install.store(true, Ordering::Release);
        }
        let mut inner = self.inner.lock();
        if xfade {
            inner.xfade.push(Arc::clone(&group));
        } else {
            inner.no_xfade.push(Arc::clone(&group));
        }
        self.republish(&inner);
        let flag = RemovalFlag {
            group: Arc::clone(&group),
        };
        (group, flag)
    }

    /// Drop every group in both families. Teardown only.
    pub fn clear_all(&self) {
        let mut inner = self.inner.lock();
        inner.xfade.clear();
        inner.no_xfade.clear();
        self.republish(&inner);
    }

    pub fn xfade_len(&self) -> usize {
        self.inner.lock().xfade.len()
    }

    pub fn no_xfade_len(&self) -> usize {
        self.inner.lock().no_xfade.len()
    }

    /// Lock-free view for the realtime callback.
    pub(crate) fn render_snapshot(&self) -> Arc<Vec<Arc<ChannelGroup>>> {
        self.live.load_full()
    }

    fn republish(&self, inner: &PoolInner) {
        let snapshot: Vec<Arc<ChannelGroup>> = inner
            .xfade
            .iter()
            .chain(inner.no_xfade.iter())
            .filter(|g| !g.is_retired())
            .cloned()
            .collect();
        self.live.store(Arc::new(snapshot));
    }

    /// Make the next created group refuse renderer installation, to
    /// exercise the degraded instrument-initialization paths.
    #[cfg(test)]
    pub(crate) fn poison_next_group(&self) {
        self.poison_next.store(true, Ordering::Release);
    }
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new()
    }
}
