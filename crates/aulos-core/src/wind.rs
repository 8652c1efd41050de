//! The singleton wind effect voice.
//!
//! Bound to the single crossfaded channel group at output
//! initialization; its lifetime equals the initialized lifetime of
//! the audio context. Effect notes use the same slot-reservation and
//! command-queue discipline as the tonal instruments.

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use aulos_dsp::{WindBank, WIND_VOICES};

use crate::channels::{ChannelGroup, GroupCommand, GroupRenderer};
use crate::event::EventResult;
use crate::instrument::SlotStates;

struct WindRenderer {
    bank: WindBank,
    slots: Arc<SlotStates>,
    pending: Arc<AtomicUsize>,
}

impl GroupRenderer for WindRenderer {
    fn apply(&mut self, command: GroupCommand) {
        match command {
            GroupCommand::NoteOn {
                slot,
                pitch,
                velocity,
                program,
            } => {
                self.bank.start(slot, program, pitch, velocity);
                self.slots.set_active(slot);
            }
            GroupCommand::NoteOff { slot } => {
                self.bank.release(slot);
                self.pending
                    .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
            }
        }
    }

    fn render(&mut self, frames: usize, out: &mut [f32]) {
        let slots = &self.slots;
        let pending = &self.pending;
        self.bank.render_mix(frames, out, |slot| {
            slots.set_free(slot);
            pending.fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
        });
    }
}

/// Control half of the wind effect voice.
pub struct WindVoice {
    slots: Arc<SlotStates>,
    group: ArcSwapOption<ChannelGroup>,
}

impl WindVoice {
    pub(crate) fn new() -> Self {
        Self {
            slots: SlotStates::new(WIND_VOICES),
            group: ArcSwapOption::empty(),
        }
    }

    /// Bind to the crossfaded group. Returns false when the group
    /// refuses the render half.
    pub(crate) fn initialize(&self, group: &Arc<ChannelGroup>, sample_rate: f32) -> bool {
        let renderer = WindRenderer {
            bank: WindBank::new(sample_rate),
            slots: Arc::clone(&self.slots),
            pending: Arc::clone(group.realtime_counter()),
        };
        if !group.install_renderer(Box::new(renderer)) {
            return false;
        }
        self.slots.clear();
        self.group.store(Some(Arc::clone(group)));
        true
    }

    pub fn effect_on(&self, program: i32, pitch: i16, velocity: f32) -> EventResult {
        let Some(group) = self.group.load_full() else {
            return EventResult::Uninitialized;
        };
        let Some(slot) = self.slots.reserve(pitch) else {
            return EventResult::DroppedNote;
        };
        let scheduled = group.schedule(GroupCommand::NoteOn {
            slot,
            pitch,
            velocity,
            program,
        });
        if scheduled {
            EventResult::Ok
        } else {
            self.slots.cancel(slot);
            EventResult::DroppedNote
        }
    }

    pub fn effect_off(&self, pitch: i16) -> EventResult {
        let Some(group) = self.group.load_full() else {
            return EventResult::Uninitialized;
        };
        let Some(slot) = self.slots.find_sounding(pitch) else {
            return EventResult::UnhandledNoteOff;
        };
        if group.schedule(GroupCommand::NoteOff { slot }) {
            EventResult::Ok
        } else {
            EventResult::DroppedNote
        }
    }

    /// Unbind from the group and retire it. Teardown only.
    pub(crate) fn finalize(&self) {
        if let Some(group) = self.group.swap(None) {
            group.retire();
        }
        self.slots.clear();
    }
}

impl std::fmt::Debug for WindVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindVoice")
            .field("bound", &self.group.load().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelPool;

    #[test]
    fn effect_calls_fail_before_binding() {
        let wind = WindVoice::new();
        assert_eq!(wind.effect_on(0, 60, 0.8), EventResult::Uninitialized);
        assert_eq!(wind.effect_off(60), EventResult::Uninitialized);
    }

    #[test]
    fn effect_round_trip() {
        let pool = ChannelPool::new();
        let (group, _flag) = pool.add_xfade(u8::MAX as usize, 1);
        let wind = WindVoice::new();
        assert!(wind.initialize(&group, 44100.0));

        assert_eq!(wind.effect_on(0, 60, 0.8), EventResult::Ok);
        assert!(group.has_realtime_functions());

        // Let the gate open before releasing.
        let mut out = vec![0.0; 4096 * 2];
        group.render_block(4096, &mut out);
        assert!(out.iter().any(|&s| s != 0.0));

        assert_eq!(wind.effect_off(60), EventResult::Ok);
        assert_eq!(wind.effect_off(61), EventResult::UnhandledNoteOff);

        // The 0.1 s release gate closes within these frames.
        let mut out = vec![0.0; 8192 * 2];
        group.render_block(8192, &mut out);
        assert!(!group.has_realtime_functions());
    }

    #[test]
    fn finalize_retires_the_group() {
        let pool = ChannelPool::new();
        let (group, _flag) = pool.add_xfade(u8::MAX as usize, 1);
        let wind = WindVoice::new();
        assert!(wind.initialize(&group, 44100.0));

        wind.finalize();
        assert_eq!(wind.effect_on(0, 60, 0.8), EventResult::Uninitialized);
        assert!(group.is_retired());
    }
}
