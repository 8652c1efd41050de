//! The per-instrument in-use latch.
//!
//! A raw mutex whose lock and unlock sites are split across scopes:
//! a guarded handle locks it while the registry latch is held and
//! unlocks it when the handle drops, and `Instrument`'s destructor
//! locks then immediately unlocks it so that destruction waits for
//! any live handle. It is a destruction-prevention primitive, not a
//! critical-section lock; no data is accessed under it.

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

pub(crate) struct InUseLatch {
    raw: RawMutex,
}

impl InUseLatch {
    pub(crate) const fn new() -> Self {
        Self { raw: RawMutex::INIT }
    }

    /// Block until the latch is free, then hold it.
    pub(crate) fn lock(&self) {
        self.raw.lock();
    }

    /// Non-blocking acquire. Returns true when the latch is now held.
    pub(crate) fn try_lock(&self) -> bool {
        self.raw.try_lock()
    }

    /// Release the latch.
    ///
    /// # Safety
    ///
    /// The caller must currently hold the latch via `lock` or a
    /// successful `try_lock`.
    pub(crate) unsafe fn unlock(&self) {
        self.raw.unlock();
    }
}

impl std::fmt::Debug for InUseLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("InUseLatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_fails_while_held() {
        let latch = InUseLatch::new();
        assert!(latch.try_lock());
        assert!(!latch.try_lock());
        unsafe { latch.unlock() };
        assert!(latch.try_lock());
        unsafe { latch.unlock() };
    }

    #[test]
    fn lock_unlock_round_trip() {
        let latch = InUseLatch::new();
        latch.lock();
        unsafe { latch.unlock() };
        latch.lock();
        unsafe { latch.unlock() };
    }
}
