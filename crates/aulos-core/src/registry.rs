//! Per-envelope-family instrument registry.
//!
//! A [`Synths`] maps envelope parameters to owned instruments. Every
//! lookup, insertion, recycling pass and finalization happens under
//! the registry latch, and the latch discipline is the one global
//! invariant of the engine:
//!
//! > registry latch before instrument in-use latch, never the other
//! > way around.
//!
//! A [`Using`] handle is built while the registry latch is held: it
//! acquires the instrument's in-use latch first, then lets go of the
//! registry. From that moment until the handle drops, the instrument
//! cannot be destroyed: destruction (map removal or `finalize`)
//! needs the registry latch and then, inside `Instrument`'s
//! destructor, the in-use latch, which the handle is holding. Because
//! every party acquires the two latches in the same order, no cycle
//! and hence no deadlock can form.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;

use aulos_dsp::Envelope;
use parking_lot::{Mutex, MutexGuard};

use crate::channels::ChannelPool;
use crate::instrument::{Instrument, VOICES_PER_INSTRUMENT};

type Map<E> = BTreeMap<<E as Envelope>::Params, Box<Instrument<E>>>;

/// Scoped proof that an instrument will not be destroyed while the
/// handle lives. Move-only, not sendable; derefs to the instrument.
pub struct Using<'r, E: Envelope> {
    instrument: NonNull<Instrument<E>>,
    _registry: PhantomData<&'r Synths<E>>,
}

impl<E: Envelope> Deref for Using<'_, E> {
    type Target = Instrument<E>;

    fn deref(&self) -> &Instrument<E> {
        // SAFETY: the in-use latch held since construction keeps the
        // instrument alive (see `Using::grab`).
        unsafe { self.instrument.as_ref() }
    }
}

impl<E: Envelope> Drop for Using<'_, E> {
    fn drop(&mut self) {
        // SAFETY: `grab` acquired the latch and nothing released it
        // since; the pointer is valid for the same reason as in
        // `deref`.
        unsafe { self.instrument.as_ref().in_use().unlock() };
    }
}

impl<E: Envelope> Using<'_, E> {
    /// Build a handle for `instrument`, which must be owned by the map
    /// behind `registry_latch`.
    ///
    /// The in-use latch is acquired while the registry latch is still
    /// held; only then is the registry released. This is what makes
    /// the handle a proof of liveness: a destroyer must take the
    /// registry latch (to reach the map entry) and then block on the
    /// in-use latch in `Instrument::drop` until this handle is gone.
    /// Boxed instruments have stable addresses, so the pointer stays
    /// valid across re-keying moves of the owning map entry.
    fn grab(registry_latch: MutexGuard<'_, Map<E>>, instrument: NonNull<Instrument<E>>) -> Self {
        // SAFETY: `instrument` points into the map guarded by
        // `registry_latch`, which is still held here.
        unsafe { instrument.as_ref() }.in_use().lock();
        drop(registry_latch);
        Using {
            instrument,
            _registry: PhantomData,
        }
    }
}

/// Registry of instruments for one envelope family, keyed by envelope
/// parameters.
pub struct Synths<E: Envelope> {
    map: Mutex<Map<E>>,
}

impl<E: Envelope> Synths<E> {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
        }
    }

    /// Look up or create the instrument for `key` and return a guarded
    /// handle to it.
    ///
    /// Misses first try to recycle a dormant instrument in place; only
    /// when that fails is a fresh channel group drawn from the pool.
    /// If the fresh instrument fails to initialize, the first existing
    /// instrument (in key order) is returned as a degraded fallback,
    /// or, with an empty registry, the uninitialized instrument itself,
    /// whose events are silently ineffective.
    pub fn acquire(&self, key: E::Params, pool: &ChannelPool, sample_rate: f64) -> Using<'_, E> {
        let mut map = self.map.lock();

        if let Some(found) = map.get(&key) {
            let instrument = NonNull::from(&**found);
            return Using::grab(map, instrument);
        }

        if let Some(instrument) = Self::recycle(&mut map, &key) {
            return Using::grab(map, instrument);
        }

        let (group, remover) = pool.add_no_xfade(VOICES_PER_INSTRUMENT, 0);
        let mut instrument = Instrument::<E>::new(group, sample_rate as f32, &key);
        instrument.set_params(&key);
        if !instrument.initialize() {
            if let Some(existing) = map.values().next() {
                tracing::error!(
                    "instrument initialization failed; handing out a pre-existing instrument \
                     (events for several parameter sets now share one synth)"
                );
                // The fresh group has the same lifecycle as the failed
                // instrument, so reclaim it.
                remover.flag_for_removal();
                let instrument = NonNull::from(&**existing);
                return Using::grab(map, instrument);
            }
            tracing::error!(
                "instrument initialization failed with an empty registry; \
                 events on this key will be dropped at the DSP layer"
            );
        }
        let slot = map.entry(key).or_insert(Box::new(instrument));
        let instrument = NonNull::from(&**slot);
        Using::grab(map, instrument)
    }

    /// Try to repurpose a dormant instrument for `key`. Registry latch
    /// held by the caller.
    ///
    /// A slot qualifies when its in-use latch can be taken without
    /// blocking (no live handle) and its group reports no outstanding
    /// realtime work. Under the held registry latch nothing can start
    /// a new note, so together these witness that every envelope has
    /// terminated. The first qualifying slot wins.
    fn recycle(map: &mut Map<E>, key: &E::Params) -> Option<NonNull<Instrument<E>>> {
        let mut dormant_key = None;
        for (k, instrument) in map.iter() {
            if !instrument.in_use().try_lock() {
                // A handle is live; leave the slot alone.
                continue;
            }
            if instrument.group().has_realtime_functions() {
                // SAFETY: acquired by the successful try_lock above.
                unsafe { instrument.in_use().unlock() };
                continue;
            }
            if !instrument.all_voices_finished() {
                debug_assert!(false, "dormant instrument with unfinished envelopes");
                tracing::warn!("skipping dormant instrument with unfinished envelopes");
                // SAFETY: as above.
                unsafe { instrument.in_use().unlock() };
                continue;
            }
            dormant_key = Some(*k);
            // Keep the in-use latch held across the re-keying move.
            break;
        }

        let dormant_key = dormant_key?;
        let instrument = map.remove(&dormant_key)?;
        instrument.set_params(key);
        let slot = map.entry(*key).or_insert(instrument);
        let pointer = NonNull::from(&**slot);
        // SAFETY: held since the try_lock in the scan; released only
        // now that the slot is re-keyed.
        unsafe { slot.in_use().unlock() };
        Some(pointer)
    }

    /// Finalize every instrument and clear the map. Dropping the boxed
    /// instruments blocks on their in-use latches, so a finalize
    /// cannot complete while any handle is live.
    pub fn finalize(&self) {
        let mut map = self.map.lock();
        for instrument in map.values_mut() {
            instrument.finalize();
        }
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn contains_key(&self, key: &E::Params) -> bool {
        self.map.lock().contains_key(key)
    }
}

impl<E: Envelope> Default for Synths<E> {
    fn default() -> Self {
        Self::new()
    }
}
