//! Correlation table for outgoing calls.
//!
//! Each pending call owns a one-shot channel. The slot id doubles as the
//! message id of the Call frame; freed ids are reused lowest first.

use crate::codec::DataBlockReader;
use crate::{ModuleId, RelayError, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Mutex, PoisonError};

/// How a pending call was resolved.
#[derive(Debug)]
pub(crate) enum CallOutcome {
    Reply(DataBlockReader),
    Exception(RelayError),
    ModuleDisconnected,
    BrokerDisconnected,
}

struct PendingCall {
    target: ModuleId,
    reply_tx: SyncSender<CallOutcome>,
}

#[derive(Default)]
struct Slots {
    pending: HashMap<i32, PendingCall>,
    free: BTreeSet<i32>,
    next_id: i32,
    closed: bool,
}

#[derive(Default)]
pub(crate) struct OutCallTable {
    slots: Mutex<Slots>,
}

impl OutCallTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a call to `target`.
    pub(crate) fn allocate(&self, target: ModuleId) -> Result<(i32, Receiver<CallOutcome>)> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.closed {
            return Err(RelayError::disconnected("broker disconnected"));
        }
        let id = match slots.free.pop_first() {
            Some(id) => id,
            None => {
                let id = slots.next_id;
                slots.next_id = id.checked_add(1).ok_or_else(|| {
                    RelayError::application("too many outstanding calls", "")
                })?;
                id
            }
        };
        let (reply_tx, reply_rx) = sync_channel(1);
        slots.pending.insert(id, PendingCall { target, reply_tx });
        Ok((id, reply_rx))
    }

    /// Deliver an outcome and free the slot. Returns false for unknown ids.
    pub(crate) fn resolve(&self, id: i32, outcome: CallOutcome) -> bool {
        let pending = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let pending = slots.pending.remove(&id);
            if pending.is_some() {
                slots.free.insert(id);
            }
            pending
        };
        match pending {
            Some(call) => {
                // The caller may have given up already.
                let _ = call.reply_tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Free a slot whose call never went out.
    pub(crate) fn release(&self, id: i32) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.pending.remove(&id).is_some() {
            slots.free.insert(id);
        }
    }

    /// Fail every call addressed to `module`. Returns how many were failed.
    pub(crate) fn fail_module(&self, module: ModuleId) -> usize {
        let failed: Vec<i32> = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots
                .pending
                .iter()
                .filter(|(_, call)| call.target == module)
                .map(|(id, _)| *id)
                .collect()
        };
        failed
            .into_iter()
            .filter(|id| self.resolve(*id, CallOutcome::ModuleDisconnected))
            .count()
    }

    /// Fail every pending call and refuse new ones.
    pub(crate) fn fail_all(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.closed = true;
            slots.pending.drain().map(|(_, call)| call).collect()
        };
        let count = drained.len();
        for call in drained {
            let _ = call.reply_tx.send(CallOutcome::BrokerDisconnected);
        }
        count
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_reused_lowest_first() {
        let table = OutCallTable::new();
        let (a, _ra) = table.allocate(1).unwrap();
        let (b, _rb) = table.allocate(1).unwrap();
        let (c, _rc) = table.allocate(1).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        table.release(b);
        table.release(a);
        assert_eq!(table.allocate(1).unwrap().0, 0);
        assert_eq!(table.allocate(1).unwrap().0, 1);
        assert_eq!(table.allocate(1).unwrap().0, 3);
    }

    #[test]
    fn test_resolve_delivers_once() {
        let table = OutCallTable::new();
        let (id, rx) = table.allocate(4).unwrap();
        assert!(table.resolve(id, CallOutcome::Reply(DataBlockReader::default())));
        assert!(!table.resolve(id, CallOutcome::BrokerDisconnected));
        assert!(matches!(rx.recv().unwrap(), CallOutcome::Reply(_)));
        assert_eq!(table.pending_count(), 0);
    }

    #[test]
    fn test_fail_module_only_touches_its_calls() {
        let table = OutCallTable::new();
        let (_, to_four) = table.allocate(4).unwrap();
        let (_, to_five) = table.allocate(5).unwrap();
        assert_eq!(table.fail_module(4), 1);
        assert!(matches!(
            to_four.recv().unwrap(),
            CallOutcome::ModuleDisconnected
        ));
        assert!(to_five.try_recv().is_err());
        assert_eq!(table.pending_count(), 1);
    }

    #[test]
    fn test_fail_all_closes_table() {
        let table = OutCallTable::new();
        let (_, rx) = table.allocate(2).unwrap();
        assert_eq!(table.fail_all(), 1);
        assert!(matches!(rx.recv().unwrap(), CallOutcome::BrokerDisconnected));
        assert!(table.allocate(2).unwrap_err().is_disconnect());
    }
}
