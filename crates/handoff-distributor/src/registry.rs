//! Worker registry and free list.
//!
//! Members are stored by id; the free list only holds ids. Removing a member
//! also removes it from the free list, so nothing refers to a worker after
//! it left.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use handoff_core::WorkerId;

/// Serials are unique across registries, so a reply that outlives its group
/// can never match a registration in a group recreated for the same spec.
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Where a member is in the handoff cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Registered, waiting for the listener to be ready.
    Joining,
    /// In the free list, waiting for a connection.
    Idle,
    /// Picked to drain; about to take the next pending connection.
    Draining,
    /// One deliver request outstanding.
    Offering,
    /// Its control channel went away. Gets nothing until it leaves.
    Stalled,
}

/// One registration of a worker in a group.
#[derive(Debug)]
pub struct Member<C> {
    pub channel: C,
    /// Unique per registration; a re-joined id gets a new one.
    pub serial: u64,
    pub state: DrainState,
}

/// Registered workers plus the FIFO of idle ones.
#[derive(Debug)]
pub struct WorkerRegistry<C> {
    members: HashMap<WorkerId, Member<C>>,
    free: VecDeque<WorkerId>,
}

impl<C> WorkerRegistry<C> {
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
            free: VecDeque::new(),
        }
    }

    /// Register a worker. Returns its registration serial, or `None` if the
    /// id is already registered (registry unchanged).
    pub fn insert(&mut self, id: WorkerId, channel: C) -> Option<u64> {
        if self.members.contains_key(&id) {
            return None;
        }
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        self.members.insert(
            id,
            Member {
                channel,
                serial,
                state: DrainState::Joining,
            },
        );
        Some(serial)
    }

    /// Remove a worker and its free-list entry.
    pub fn remove(&mut self, id: WorkerId) -> Option<Member<C>> {
        let member = self.members.remove(&id)?;
        if member.state == DrainState::Idle {
            self.free.retain(|w| *w != id);
        }
        Some(member)
    }

    pub fn get(&self, id: WorkerId) -> Option<&Member<C>> {
        self.members.get(&id)
    }

    pub fn contains(&self, id: WorkerId) -> bool {
        self.members.contains_key(&id)
    }

    /// True if `id` is registered under this exact registration.
    pub fn is_current(&self, id: WorkerId, serial: u64) -> bool {
        self.members.get(&id).is_some_and(|m| m.serial == serial)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Mark a member idle and append it to the free list.
    pub fn push_free(&mut self, id: WorkerId) {
        if let Some(member) = self.members.get_mut(&id) {
            if member.state != DrainState::Idle {
                member.state = DrainState::Idle;
                self.free.push_back(id);
            }
        }
    }

    /// Take the longest-idle member off the free list.
    pub fn pop_free(&mut self) -> Option<(WorkerId, u64)> {
        let id = self.free.pop_front()?;
        let member = self.members.get_mut(&id)?;
        member.state = DrainState::Draining;
        Some((id, member.serial))
    }

    /// Mark a member as having an offer outstanding and return its channel.
    pub fn begin_offer(&mut self, id: WorkerId) -> Option<&C> {
        let member = self.members.get_mut(&id)?;
        if member.state == DrainState::Idle {
            self.free.retain(|w| *w != id);
        }
        member.state = DrainState::Offering;
        Some(&member.channel)
    }

    pub fn set_state(&mut self, id: WorkerId, state: DrainState) {
        if let Some(member) = self.members.get_mut(&id) {
            if member.state == DrainState::Idle && state != DrainState::Idle {
                self.free.retain(|w| *w != id);
            }
            member.state = state;
        }
    }

    /// Idle ids, oldest first.
    pub fn free_list(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.free.iter().copied()
    }

    pub fn count_in(&self, state: DrainState) -> usize {
        self.members.values().filter(|m| m.state == state).count()
    }

    /// Remove every member, leaving the registry empty.
    pub fn clear(&mut self) -> Vec<WorkerId> {
        self.free.clear();
        self.members.drain().map(|(id, _)| id).collect()
    }
}

impl<C> Default for WorkerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
