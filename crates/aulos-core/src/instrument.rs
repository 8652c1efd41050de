//! One synth instance bound to a channel group.
//!
//! An [`Instrument`] is the control half of a voice bank: it reserves
//! voice slots with atomic state transitions and schedules note
//! events onto its group's queue, never taking a lock on the event
//! path. The render half ([`BankRenderer`]) is handed to the group at
//! initialization and lives on the audio thread from then on.
//!
//! The destruction contract that makes guarded handles sound lives
//! here: dropping an `Instrument` acquires and releases its in-use
//! latch exactly once, so destruction waits for any live handle.

use std::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use aulos_dsp::{Envelope, VoiceBank};

use crate::channels::{ChannelGroup, GroupCommand, GroupRenderer};
use crate::event::{Event, EventResult};
use crate::latch::InUseLatch;

/// Polyphony of one tonal instrument.
pub const VOICES_PER_INSTRUMENT: usize = 32;

const SLOT_FREE: u8 = 0;
const SLOT_PENDING: u8 = 1;
const SLOT_ACTIVE: u8 = 2;

/// Per-voice occupancy shared between the control path and the render
/// half. The control path reserves slots (`Free → Pending`); the
/// render half activates and eventually frees them.
pub(crate) struct SlotStates {
    states: Vec<AtomicU8>,
    pitches: Vec<AtomicI32>,
}

impl SlotStates {
    pub(crate) fn new(n_slots: usize) -> Arc<Self> {
        Arc::new(Self {
            states: (0..n_slots).map(|_| AtomicU8::new(SLOT_FREE)).collect(),
            pitches: (0..n_slots).map(|_| AtomicI32::new(-1)).collect(),
        })
    }

    /// Claim a free slot for `pitch`. Returns the slot index, or None
    /// when every voice is busy.
    pub(crate) fn reserve(&self, pitch: i16) -> Option<usize> {
        for (slot, state) in self.states.iter().enumerate() {
            if state
                .compare_exchange(SLOT_FREE, SLOT_PENDING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.pitches[slot].store(pitch as i32, Ordering::Release);
                return Some(slot);
            }
        }
        None
    }

    /// Undo a reservation whose event could not be queued.
    pub(crate) fn cancel(&self, slot: usize) {
        self.states[slot].store(SLOT_FREE, Ordering::Release);
    }

    /// Find a reserved or sounding slot carrying `pitch`.
    pub(crate) fn find_sounding(&self, pitch: i16) -> Option<usize> {
        for (slot, state) in self.states.iter().enumerate() {
            let s = state.load(Ordering::Acquire);
            if (s == SLOT_PENDING || s == SLOT_ACTIVE)
                && self.pitches[slot].load(Ordering::Acquire) == pitch as i32
            {
                return Some(slot);
            }
        }
        None
    }

    /// Render-half transition: the queued note-on reached its voice.
    pub(crate) fn set_active(&self, slot: usize) {
        if let Some(state) = self.states.get(slot) {
            state.store(SLOT_ACTIVE, Ordering::Release);
        }
    }

    /// Render-half transition: the voice's envelope terminated.
    pub(crate) fn set_free(&self, slot: usize) {
        if let Some(state) = self.states.get(slot) {
            state.store(SLOT_FREE, Ordering::Release);
        }
    }

    pub(crate) fn all_free(&self) -> bool {
        self.states
            .iter()
            .all(|s| s.load(Ordering::Acquire) == SLOT_FREE)
    }

    pub(crate) fn clear(&self) {
        for state in &self.states {
            state.store(SLOT_FREE, Ordering::Release);
        }
    }
}

/// Render half of an instrument: the voice bank plus the shared slot
/// table and the group's outstanding-work counter.
pub(crate) struct BankRenderer<E: Envelope> {
    bank: VoiceBank<E>,
    params: Arc<ArcSwap<E::Params>>,
    slots: Arc<SlotStates>,
    pending: Arc<AtomicUsize>,
}

impl<E: Envelope> GroupRenderer for BankRenderer<E> {
    fn apply(&mut self, command: GroupCommand) {
        match command {
            GroupCommand::NoteOn {
                slot,
                pitch,
                velocity,
                ..
            } => {
                let params: E::Params = **self.params.load();
                self.bank.start_voice(slot, &params, pitch, velocity);
                self.slots.set_active(slot);
                // The note-on's +1 now stands for the live voice; it
                // is released when the envelope terminates.
            }
            GroupCommand::NoteOff { slot } => {
                self.bank.release_voice(slot);
                self.pending.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    fn render(&mut self, frames: usize, out: &mut [f32]) {
        let slots = &self.slots;
        let pending = &self.pending;
        self.bank.render_mix(frames, out, |slot| {
            slots.set_free(slot);
            pending.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

/// One polyphonic synth bound to a non-crossfaded channel group.
pub struct Instrument<E: Envelope> {
    params: Arc<ArcSwap<E::Params>>,
    slots: Arc<SlotStates>,
    group: Arc<ChannelGroup>,
    /// Render half, present until `initialize` hands it to the group.
    bank: Option<BankRenderer<E>>,
    in_use: InUseLatch,
    initialized: bool,
}

impl<E: Envelope> Instrument<E> {
    pub fn new(group: Arc<ChannelGroup>, sample_rate: f32, params: &E::Params) -> Self {
        let params = Arc::new(ArcSwap::from_pointee(*params));
        let slots = SlotStates::new(VOICES_PER_INSTRUMENT);
        let bank = BankRenderer {
            bank: VoiceBank::new(VOICES_PER_INSTRUMENT, sample_rate),
            params: Arc::clone(&params),
            slots: Arc::clone(&slots),
            pending: Arc::clone(group.realtime_counter()),
        };
        Self {
            params,
            slots,
            group,
            bank: Some(bank),
            in_use: InUseLatch::new(),
            initialized: false,
        }
    }

    /// Re-target the envelope parameters. Voices started after this
    /// call read the new set; idempotent.
    pub fn set_params(&self, params: &E::Params) {
        self.params.store(Arc::new(*params));
    }

    /// Hand the render half to the channel group. One-shot.
    pub fn initialize(&mut self) -> bool {
        if self.initialized {
            return true;
        }
        let Some(bank) = self.bank.take() else {
            return false;
        };
        if self.group.install_renderer(Box::new(bank)) {
            self.initialized = true;
            true
        } else {
            false
        }
    }

    /// Dispatch a note event. Never blocks on a global lock: the slot
    /// reservation is a CAS and the group queue is bounded-try-send.
    /// On an instrument that failed initialization every event is a
    /// silent no-op reported as a dropped note.
    pub fn on_event(&self, event: Event) -> EventResult {
        if !self.initialized {
            return EventResult::DroppedNote;
        }
        match event {
            Event::NoteOn { pitch, velocity } => {
                let Some(slot) = self.slots.reserve(pitch) else {
                    return EventResult::DroppedNote;
                };
                let scheduled = self.group.schedule(GroupCommand::NoteOn {
                    slot,
                    pitch,
                    velocity,
                    program: 0,
                });
                if scheduled {
                    EventResult::Ok
                } else {
                    self.slots.cancel(slot);
                    EventResult::DroppedNote
                }
            }
            Event::NoteOff { pitch } => {
                if !E::HONORS_NOTE_OFF {
                    return EventResult::UnhandledNoteOff;
                }
                let Some(slot) = self.slots.find_sounding(pitch) else {
                    return EventResult::UnhandledNoteOff;
                };
                if self.group.schedule(GroupCommand::NoteOff { slot }) {
                    EventResult::Ok
                } else {
                    EventResult::DroppedNote
                }
            }
        }
    }

    /// Quiesce DSP state. Registry teardown only: the group is retired
    /// (the realtime callback stops entering it; its render half is
    /// dropped when the pool clears) and the slot table is reset.
    pub fn finalize(&mut self) {
        self.group.retire();
        self.slots.clear();
    }

    /// True when every envelope on this instrument has terminated.
    pub fn all_voices_finished(&self) -> bool {
        self.slots.all_free()
    }

    pub fn group(&self) -> &Arc<ChannelGroup> {
        &self.group
    }

    pub(crate) fn in_use(&self) -> &InUseLatch {
        &self.in_use
    }
}

impl<E: Envelope> Drop for Instrument<E> {
    fn drop(&mut self) {
        // Wait for any live guarded handle, then let destruction
        // proceed. Exactly one acquire/release pair.
        self.in_use.lock();
        // SAFETY: the latch was acquired on the line above.
        unsafe { self.in_use.unlock() };
    }
}

impl<E: Envelope> std::fmt::Debug for Instrument<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("initialized", &self.initialized)
            .field("group", &self.group)
            .finish()
    }
}
