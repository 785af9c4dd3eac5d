// src/registry/slots.rs

use std::collections::BTreeMap;

use crate::types::{JobId, SurfaceId};

/// Who a service job answers to, and which service instance is running it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub requester: SurfaceId,
    pub generation: u64,
}

/// Jobs currently dispatched to the persistent service, keyed by id.
///
/// Ordered so crash fan-out visits jobs deterministically.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: BTreeMap<JobId, Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job_id: JobId, requester: SurfaceId, generation: u64) {
        self.slots.insert(
            job_id,
            Slot {
                requester,
                generation,
            },
        );
    }

    pub fn requester_of(&self, job_id: &JobId) -> Option<SurfaceId> {
        self.slots.get(job_id).map(|slot| slot.requester)
    }

    pub fn generation_of(&self, job_id: &JobId) -> Option<u64> {
        self.slots.get(job_id).map(|slot| slot.generation)
    }

    pub fn remove(&mut self, job_id: &JobId) -> Option<SurfaceId> {
        self.slots.remove(job_id).map(|slot| slot.requester)
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.slots.contains_key(job_id)
    }

    /// Empty the table, returning every slot that was occupied.
    pub fn drain(&mut self) -> Vec<(JobId, SurfaceId)> {
        std::mem::take(&mut self.slots)
            .into_iter()
            .map(|(id, slot)| (id, slot.requester))
            .collect()
    }

    /// Remove and return the slots held by one service instance. Slots of
    /// other generations stay put.
    pub fn drain_generation(&mut self, generation: u64) -> Vec<(JobId, SurfaceId)> {
        let (lost, kept): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.slots)
            .into_iter()
            .partition(|(_, slot)| slot.generation == generation);
        self.slots = kept;
        lost.into_iter()
            .map(|(id, slot)| (id, slot.requester))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
