//! Segment-sets: the nodes of the store's chain

use crate::error::DeviceError;

/// One node of the chain: an array of lazily allocated segments.
///
/// The slot array itself is allocated on the first write into the node, so
/// nodes that are only passed through on the way to a far offset stay small.
#[derive(Default)]
pub(crate) struct SegmentSet {
    slots: Vec<Option<Vec<u8>>>,
}

impl SegmentSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Segment in `slot`, if allocated. Never allocates.
    pub(crate) fn segment(&self, slot: usize) -> Option<&[u8]> {
        self.slots.get(slot)?.as_deref()
    }

    /// Segment in `slot`, allocating the slot array and the segment on demand.
    ///
    /// Both grow to the given dimensions when they were allocated under
    /// smaller tunables, so addressing with the current tunables stays in
    /// bounds.
    pub(crate) fn segment_mut(
        &mut self,
        slot: usize,
        set_size: usize,
        segment_size: usize,
    ) -> Result<&mut [u8], DeviceError> {
        let want_slots = set_size.max(slot + 1);
        if self.slots.len() < want_slots {
            self.slots
                .try_reserve_exact(want_slots - self.slots.len())
                .map_err(|_| DeviceError::OutOfMemory)?;
            self.slots.resize_with(want_slots, || None);
        }

        #[allow(clippy::indexing_slicing)] // resized above
        let entry = &mut self.slots[slot];
        let segment = entry.get_or_insert_with(Vec::new);
        if segment.len() < segment_size {
            segment
                .try_reserve_exact(segment_size - segment.len())
                .map_err(|_| DeviceError::OutOfMemory)?;
            segment.resize(segment_size, 0);
        }
        Ok(segment.as_mut_slice())
    }

    /// Length of the slot array (0 until the first write)
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Indices of allocated segments, ascending
    pub(crate) fn allocated(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect()
    }
}
