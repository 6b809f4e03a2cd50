//! Fixed ring of kernel-shared capture buffers and their ownership states

use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// Who currently owns a slot's memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Queued to the driver; the process must not read it.
    InKernel,
    /// Dequeued (or mapped but not yet queued); the process may read it.
    WithProcess,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SlotStateError {
    #[error("slot {0} does not exist")]
    UnknownSlot(u32),

    #[error("slot {index} is {actual:?}, expected {expected:?}")]
    WrongState {
        index: u32,
        expected: SlotState,
        actual: SlotState,
    },
}

/// A slot handed to the process by a dequeue.
///
/// Only the ring can create one and only a requeue consumes it, so each
/// dequeue is matched by at most one requeue.
#[must_use = "a dequeued frame must be requeued or its slot is lost"]
pub struct DequeuedFrame {
    index: u32,
    bytes_used: usize,
}

impl DequeuedFrame {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }
}

impl fmt::Debug for DequeuedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DequeuedFrame")
            .field("index", &self.index)
            .field("bytes_used", &self.bytes_used)
            .finish()
    }
}

/// One mapped buffer and who owns it
struct BufferSlot<M> {
    mapping: M,
    state: SlotState,
}

pub struct SlotRing<M> {
    slots: Vec<BufferSlot<M>>,
}

impl<M: Deref<Target = [u8]>> SlotRing<M> {
    pub fn with_capacity(count: usize) -> Self {
        Self {
            slots: Vec::with_capacity(count),
        }
    }

    /// Adds a freshly mapped slot. It starts with the process and must be
    /// queued with [`SlotRing::mark_queued`].
    pub fn insert(&mut self, mapping: M) -> u32 {
        let index = self.slots.len() as u32;
        self.slots.push(BufferSlot {
            mapping,
            state: SlotState::WithProcess,
        });
        index
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, index: u32) -> Option<SlotState> {
        self.slots.get(index as usize).map(|s| s.state)
    }

    /// Slots currently owned by the process
    pub fn outstanding(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::WithProcess)
            .count()
    }

    /// Checks that `index` may be handed to the driver
    pub fn check_queueable(&self, index: u32) -> Result<(), SlotStateError> {
        self.expect_state(index, SlotState::WithProcess)
    }

    /// Records a successful enqueue: WithProcess -> InKernel
    pub fn mark_queued(&mut self, index: u32) -> Result<(), SlotStateError> {
        self.expect_state(index, SlotState::WithProcess)?;
        self.slots[index as usize].state = SlotState::InKernel;
        Ok(())
    }

    /// Records a successful dequeue: InKernel -> WithProcess
    pub fn mark_dequeued(
        &mut self,
        index: u32,
        bytes_used: usize,
    ) -> Result<DequeuedFrame, SlotStateError> {
        self.expect_state(index, SlotState::InKernel)?;
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::WithProcess;

        Ok(DequeuedFrame {
            index,
            bytes_used: bytes_used.min(slot.mapping.len()),
        })
    }

    /// Valid bytes of a dequeued frame
    pub fn bytes(&self, frame: &DequeuedFrame) -> &[u8] {
        match self.slots.get(frame.index as usize) {
            Some(slot) if slot.state == SlotState::WithProcess => {
                &slot.mapping[..frame.bytes_used]
            }
            _ => &[],
        }
    }

    /// Drops every mapping, which unmaps it. Leaves the ring empty.
    pub fn release_all(&mut self) -> usize {
        let released = self.slots.len();
        self.slots.clear();
        released
    }

    fn expect_state(&self, index: u32, expected: SlotState) -> Result<(), SlotStateError> {
        let slot = self
            .slots
            .get(index as usize)
            .ok_or(SlotStateError::UnknownSlot(index))?;
        if slot.state != expected {
            return Err(SlotStateError::WrongState {
                index,
                expected,
                actual: slot.state,
            });
        }
        Ok(())
    }
}
