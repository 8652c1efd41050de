//! Note events and dispatch results.

/// A note event dispatched to an instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    NoteOn { pitch: i16, velocity: f32 },
    NoteOff { pitch: i16 },
}

impl Event {
    pub fn note_on(pitch: i16, velocity: f32) -> Self {
        Event::NoteOn { pitch, velocity }
    }

    pub fn note_off(pitch: i16) -> Self {
        Event::NoteOff { pitch }
    }
}

/// Outcome of dispatching an [`Event`]. The foreign surface collapses
/// this to a boolean; the richer variants exist for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    /// The event was scheduled onto the instrument's channel group.
    Ok,
    /// No voice slot was available, the event queue was full, or the
    /// instrument never initialized; the note was dropped.
    DroppedNote,
    /// A note-off that matched no sounding voice, or was sent to a
    /// family that releases on its own.
    UnhandledNoteOff,
    /// The target (wind voice) is not initialized.
    Uninitialized,
}

impl EventResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, EventResult::Ok)
    }
}

/// Selects one of the two AHDSR registry families at the foreign
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeFamily {
    /// Sustain is held until the key is released.
    WaitForKeyRelease,
    /// The envelope fades out on its own after decay.
    ReleaseAfterDecay,
}

impl EnvelopeFamily {
    /// Map the foreign `envelType` discriminant. Unknown values are
    /// rejected rather than defaulted, so a caller bug fails loudly.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(EnvelopeFamily::WaitForKeyRelease),
            1 => Some(EnvelopeFamily::ReleaseAfterDecay),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_ok_converts_to_true() {
        assert!(EventResult::Ok.is_ok());
        assert!(!EventResult::DroppedNote.is_ok());
        assert!(!EventResult::UnhandledNoteOff.is_ok());
        assert!(!EventResult::Uninitialized.is_ok());
    }

    #[test]
    fn family_discriminants() {
        assert_eq!(
            EnvelopeFamily::from_i32(0),
            Some(EnvelopeFamily::WaitForKeyRelease)
        );
        assert_eq!(
            EnvelopeFamily::from_i32(1),
            Some(EnvelopeFamily::ReleaseAfterDecay)
        );
        assert_eq!(EnvelopeFamily::from_i32(2), None);
        assert_eq!(EnvelopeFamily::from_i32(-1), None);
    }
}
