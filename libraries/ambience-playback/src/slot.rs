//! Two-slot arena for the alternating playback channels

use crate::mixer::Channel;
use serde::Serialize;
use std::fmt;

/// One of the two alternating playback slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SlotId {
    A,
    B,
}

impl SlotId {
    /// The other slot
    pub fn other(self) -> SlotId {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }

    fn index(self) -> usize {
        match self {
            SlotId::A => 0,
            SlotId::B => 1,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotId::A => write!(f, "A"),
            SlotId::B => write!(f, "B"),
        }
    }
}

/// Holds at most one channel per slot plus the active/standby flag
///
/// Slots alternate strictly: only [`flip`](SlotArena::flip) changes which
/// slot is active.
pub(crate) struct SlotArena {
    slots: [Option<Channel>; 2],
    active: SlotId,
}

impl Default for SlotArena {
    fn default() -> Self {
        Self {
            slots: [None, None],
            active: SlotId::A,
        }
    }
}

impl SlotArena {
    pub fn active_id(&self) -> SlotId {
        self.active
    }

    pub fn standby_id(&self) -> SlotId {
        self.active.other()
    }

    pub fn get(&self, id: SlotId) -> Option<&Channel> {
        self.slots[id.index()].as_ref()
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut Channel> {
        self.slots[id.index()].as_mut()
    }

    pub fn active(&self) -> Option<&Channel> {
        self.get(self.active)
    }

    pub fn active_mut(&mut self) -> Option<&mut Channel> {
        self.get_mut(self.active)
    }

    /// Place a channel, returning whatever occupied the slot
    pub fn insert(&mut self, id: SlotId, channel: Channel) -> Option<Channel> {
        self.slots[id.index()].replace(channel)
    }

    /// Empty a slot
    pub fn release(&mut self, id: SlotId) -> Option<Channel> {
        self.slots[id.index()].take()
    }

    /// Make the standby slot active
    pub fn flip(&mut self) {
        self.active = self.active.other();
    }

    pub fn clear(&mut self) {
        self.slots = [None, None];
    }

    /// Find the slot holding the channel with `serial`
    pub fn find(&self, serial: u64) -> Option<SlotId> {
        [SlotId::A, SlotId::B]
            .into_iter()
            .find(|id| self.get(*id).is_some_and(|c| c.serial == serial))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Channel> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }
}
