//! Segmented store
//!
//! A sparse byte store that grows on demand. Data lives in fixed-size
//! segments ("quanta"); segments hang off fixed-size segment-sets which form
//! a chain owned by the store. The chain is a vector in chain order, so the
//! set at position `item` is element `item`:
//!
//! ```text
//!  sets[0]          sets[1]          ...
//!  │ slot 0 ──► [segment_size bytes]
//!  │ slot 1 ──► (absent)
//!  │ ...
//!  └ slot set_size-1
//! ```
//!
//! Growing the chain, a slot array or a segment is fallible: allocation
//! failure is reported as [`DeviceError::OutOfMemory`] and what was already
//! appended stays.
//!
//! An offset is split into the chain position `item`, the `slot` within the
//! set and the position inside the segment, always with the store's
//! *current* dimensions. Dimensions are not recorded per node: changing them
//! with [`SegmentedStore::set_tunables`] while data exists re-maps existing
//! offsets. Reads and writes stay in bounds, but data written under the old
//! dimensions may show up at different offsets.
//!
//! One lock guards the whole store. Every operation holds it for its full
//! duration; waiting for it can be interrupted.

mod segment;

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::caller::Interrupt;
use crate::error::DeviceError;
use crate::tunables::Tunables;
use crate::user::{UserSink, UserSource};

use segment::SegmentSet;

/// Reference point of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

/// Where an offset lands in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Position {
    item: u64,
    slot: usize,
    in_segment: usize,
}

pub(crate) struct StoreState {
    sets: Vec<SegmentSet>,
    segment_size: usize,
    set_size: usize,
    size: u64,
}

impl StoreState {
    fn new(segment_size: usize, set_size: usize) -> Self {
        Self {
            sets: Vec::new(),
            segment_size,
            set_size,
            size: 0,
        }
    }

    #[allow(clippy::cast_possible_truncation)] // residual < segment_size * set_size
    fn locate(&self, offset: u64) -> Position {
        let segment_size = self.segment_size as u64;
        let item_size = segment_size.saturating_mul(self.set_size as u64);
        let residual = offset % item_size;
        Position {
            item: offset / item_size,
            slot: (residual / segment_size) as usize,
            in_segment: (residual % segment_size) as usize,
        }
    }

    /// Set at chain position `item`, without allocating
    fn follow(&self, item: u64) -> Option<&SegmentSet> {
        self.sets.get(usize::try_from(item).ok()?)
    }

    /// Set at chain position `item`, appending the missing sets up to it
    fn follow_mut(&mut self, item: u64) -> Result<&mut SegmentSet, DeviceError> {
        let index = usize::try_from(item).map_err(|_| DeviceError::OutOfMemory)?;
        if index >= self.sets.len() {
            let missing = (index - self.sets.len())
                .checked_add(1)
                .ok_or(DeviceError::OutOfMemory)?;
            self.sets
                .try_reserve_exact(missing)
                .map_err(|_| DeviceError::OutOfMemory)?;
            self.sets.resize_with(index + 1, SegmentSet::new);
        }
        self.sets.get_mut(index).ok_or(DeviceError::OutOfMemory)
    }

    fn release_chain(&mut self) {
        self.sets = Vec::new();
        self.size = 0;
    }
}

/// Segmented, lazily growing byte store
pub struct SegmentedStore {
    state: Mutex<StoreState>,
    tunables: Arc<Tunables>,
}

impl SegmentedStore {
    /// Create an empty store with the current process-wide dimensions
    #[must_use]
    pub fn new(tunables: Arc<Tunables>) -> Self {
        let state = StoreState::new(tunables.segment_size(), tunables.set_size());
        Self {
            state: Mutex::new(state),
            tunables,
        }
    }

    async fn lock(
        &self,
        interrupt: &Interrupt,
    ) -> Result<MutexGuard<'_, StoreState>, DeviceError> {
        interrupt.guard(self.state.lock()).await
    }

    /// Read from `offset` into `dst`.
    ///
    /// Copies at most up to the end of one segment and never past the
    /// logical size. Offsets at or past the logical size, and offsets whose
    /// node or segment was never allocated, read zero bytes. The new offset
    /// is `offset + returned count`.
    ///
    /// # Errors
    /// `Interrupted` while waiting for the lock, `Fault` if `dst` refuses
    /// the copy.
    pub async fn read<B: UserSink + ?Sized>(
        &self,
        offset: u64,
        dst: &mut B,
        interrupt: &Interrupt,
    ) -> Result<usize, DeviceError> {
        let state = self.lock(interrupt).await?;

        if offset >= state.size {
            return Ok(0);
        }
        let pos = state.locate(offset);
        let Some(segment) = state.follow(pos.item).and_then(|set| set.segment(pos.slot)) else {
            return Ok(0);
        };

        let to_end_of_data = usize::try_from(state.size - offset).unwrap_or(usize::MAX);
        let count = dst
            .capacity()
            .min(state.segment_size - pos.in_segment)
            .min(to_end_of_data)
            .min(segment.len().saturating_sub(pos.in_segment));
        if count == 0 {
            return Ok(0);
        }

        #[allow(clippy::indexing_slicing)] // count <= segment.len() - in_segment
        dst.copy_to_user(0, &segment[pos.in_segment..pos.in_segment + count])?;
        Ok(count)
    }

    /// Write `src` at `offset`.
    ///
    /// Allocates missing segment-sets and the target segment on demand and
    /// writes at most up to the end of that one segment; callers loop for
    /// larger payloads. The logical size grows to cover the written range.
    ///
    /// # Errors
    /// `Interrupted` while waiting for the lock, `InvalidArgument` if the
    /// written range would end past `u64::MAX`, `OutOfMemory` if a set or
    /// segment cannot be allocated (sets appended by this call remain),
    /// `Fault` if `src` refuses the copy.
    pub async fn write<B: UserSource + ?Sized>(
        &self,
        offset: u64,
        src: &B,
        interrupt: &Interrupt,
    ) -> Result<usize, DeviceError> {
        let mut state = self.lock(interrupt).await?;

        if src.is_empty() {
            return Ok(0);
        }
        let pos = state.locate(offset);
        let (segment_size, set_size) = (state.segment_size, state.set_size);
        let count = src.len().min(segment_size - pos.in_segment);
        let end = offset
            .checked_add(count as u64)
            .ok_or(DeviceError::InvalidArgument)?;

        let segment = state
            .follow_mut(pos.item)?
            .segment_mut(pos.slot, set_size, segment_size)?;
        #[allow(clippy::indexing_slicing)] // segment.len() >= segment_size
        src.copy_from_user(0, &mut segment[pos.in_segment..pos.in_segment + count])?;

        if state.size < end {
            state.size = end;
        }
        Ok(count)
    }

    /// Compute a new offset.
    ///
    /// `End` is relative to the logical size. There is no upper bound: the
    /// store grows on demand, far offsets just read short.
    ///
    /// # Errors
    /// `InvalidArgument` if the result would be negative or overflow,
    /// `Interrupted` while waiting for the lock.
    pub async fn seek(
        &self,
        current: u64,
        delta: i64,
        whence: Whence,
        interrupt: &Interrupt,
    ) -> Result<u64, DeviceError> {
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => current,
            Whence::End => self.lock(interrupt).await?.size,
        };
        base.checked_add_signed(delta)
            .ok_or(DeviceError::InvalidArgument)
    }

    /// Release all data and adopt the current process-wide dimensions
    ///
    /// # Errors
    /// `Interrupted` while waiting for the lock
    pub async fn trim(&self, interrupt: &Interrupt) -> Result<(), DeviceError> {
        let mut state = self.lock(interrupt).await?;
        self.trim_locked(&mut state);
        Ok(())
    }

    /// Like [`trim`](Self::trim), but waits for the lock without
    /// interruption. Used on teardown.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        self.trim_locked(&mut state);
    }

    fn trim_locked(&self, state: &mut StoreState) {
        log::debug!(
            "store.trim: releasing {} bytes of data (segment {}, set {})",
            state.size,
            state.segment_size,
            state.set_size
        );
        state.release_chain();
        state.segment_size = self.tunables.segment_size();
        state.set_size = self.tunables.set_size();
    }

    /// Change the dimensions used for addressing from now on.
    ///
    /// Existing nodes are not re-laid out; see the module documentation.
    ///
    /// # Errors
    /// `InvalidArgument` for a zero dimension, `Interrupted` while waiting
    /// for the lock
    pub async fn set_tunables(
        &self,
        segment_size: usize,
        set_size: usize,
        interrupt: &Interrupt,
    ) -> Result<(), DeviceError> {
        if segment_size == 0 || set_size == 0 {
            return Err(DeviceError::InvalidArgument);
        }
        let mut state = self.lock(interrupt).await?;
        state.segment_size = segment_size;
        state.set_size = set_size;
        Ok(())
    }

    /// Logical size: one past the highest byte written
    pub async fn size(&self) -> u64 {
        self.state.lock().await.size
    }

    /// Snapshot of the chain for introspection. Never mutates.
    pub async fn layout(&self) -> StoreLayout {
        let state = self.state.lock().await;
        let sets = state
            .sets
            .iter()
            .map(|set| SetLayout {
                slots: set.slot_count(),
                segments: set.allocated(),
            })
            .collect();
        StoreLayout {
            segment_size: state.segment_size,
            set_size: state.set_size,
            size: state.size,
            sets,
        }
    }
}

#[cfg(test)]
impl SegmentedStore {
    /// Keep the store locked, as a long-running operation would
    pub(crate) async fn hold(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().await
    }
}

/// Read-only view of a store's chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    pub segment_size: usize,
    pub set_size: usize,
    pub size: u64,
    /// One entry per segment-set, in chain order
    pub sets: Vec<SetLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetLayout {
    /// Length of the slot array, 0 if never written
    pub slots: usize,
    /// Indices of allocated segments
    pub segments: Vec<usize>,
}

impl StoreLayout {
    /// Total number of allocated segments
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.sets.iter().map(|s| s.segments.len()).sum()
    }
}
