use std::mem;

use super::descriptor::{AqDescriptor, Opcode};
use super::AqStatus;
use crate::error::{Error, Result};

const INDEX_BITS: u32 = 16;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const MAX_SESSIONS: usize = 1 << INDEX_BITS;

/// Identifies one in-flight command; doubles as the descriptor cookie.
///
/// The low bits index a slot, the high bits are a sequence number that never repeats,
/// so a cookie echoed after its session was deleted cannot match a newer session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl SessionHandle {
    pub fn cookie(self) -> u64 {
        self.0
    }

    fn index(self) -> usize {
        (self.0 & INDEX_MASK) as usize
    }
}

/// A completed descriptor, plus whatever firmware left in its buffer.
#[derive(Clone, Debug)]
pub struct Completion {
    pub opcode: Opcode,
    pub desc: AqDescriptor,
    pub buffer: Vec<u8>,
}

impl Completion {
    pub fn new(opcode: Opcode, desc: AqDescriptor, buffer: Vec<u8>) -> Completion {
        Completion { opcode, desc, buffer }
    }

    pub fn status(&self) -> AqStatus {
        AqStatus(self.desc.retval.get())
    }
}

#[derive(Debug)]
pub enum SessionResult {
    Pending,
    Done(Result<Completion>),
}

struct Slot {
    handle: SessionHandle,
    opcode: Option<Opcode>,
    result: SessionResult,
}

/// Pending-command table of one admin queue.
pub struct Sessions {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    next_sequence: u64,
}

impl Sessions {
    pub fn new() -> Sessions {
        Sessions {
            slots: Vec::new(),
            free: Vec::new(),
            // Starts at 1 so that cookie 0, used by firmware events, never matches
            next_sequence: 1,
        }
    }

    pub fn create(&mut self) -> Result<SessionHandle> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < MAX_SESSIONS => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Err(Error::Allocation { size: mem::size_of::<Slot>() }),
        };
        let handle = SessionHandle((self.next_sequence << INDEX_BITS) | index as u64);
        self.next_sequence += 1;
        self.slots[index] = Some(Slot { handle, opcode: None, result: SessionResult::Pending });
        Ok(handle)
    }

    /// Unlinks a session; returns false if it was already gone.
    pub fn delete(&mut self, handle: SessionHandle) -> bool {
        match self.slots.get_mut(handle.index()) {
            Some(slot) if slot.as_ref().map(|s| s.handle) == Some(handle) => {
                *slot = None;
                self.free.push(handle.index());
                true
            }
            _ => false,
        }
    }

    fn slot(&self, cookie: u64) -> Option<&Slot> {
        let handle = SessionHandle(cookie);
        self.slots.get(handle.index())?.as_ref().filter(|s| s.handle == handle)
    }

    fn slot_mut(&mut self, cookie: u64) -> Option<&mut Slot> {
        let handle = SessionHandle(cookie);
        self.slots.get_mut(handle.index())?.as_mut().filter(|s| s.handle == handle)
    }

    pub fn contains(&self, cookie: u64) -> bool {
        self.slot(cookie).is_some()
    }

    pub(super) fn mark_submitted(&mut self, cookie: u64, opcode: Opcode) {
        if let Some(slot) = self.slot_mut(cookie) {
            slot.opcode = Some(opcode);
        }
    }

    pub fn opcode(&self, handle: SessionHandle) -> Option<Opcode> {
        self.slot(handle.cookie())?.opcode
    }

    /// Records the outcome for the session owning `cookie`. Returns false when no live
    /// session owns it.
    pub fn complete(&mut self, cookie: u64, result: Result<Completion>) -> bool {
        match self.slot_mut(cookie) {
            Some(slot) => {
                if let SessionResult::Done(_) = slot.result {
                    warn!("session {:#x} completed twice, keeping the latest completion", cookie);
                }
                slot.result = SessionResult::Done(result);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, handle: SessionHandle) -> bool {
        matches!(self.slot(handle.cookie()), Some(Slot { result: SessionResult::Pending, .. }))
    }

    /// Moves the result out of a finished session, leaving it pending again.
    pub fn take_result(&mut self, handle: SessionHandle) -> Option<Result<Completion>> {
        let slot = self.slot_mut(handle.cookie())?;
        match mem::replace(&mut slot.result, SessionResult::Pending) {
            SessionResult::Done(result) => Some(result),
            SessionResult::Pending => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Sessions::new()
    }
}
