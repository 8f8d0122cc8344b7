//! The pool's packed 32-bit coordination word.
//!
//! Idle count, spawned count, the notified flag, and the lifecycle state all
//! live in one atomic word so that every transition is a single CAS. Keeping
//! them in separate atomics would break the state machine: a wake decision
//! reads all four fields and must publish them together.
//!
//! Layout (low to high):
//!
//! ```text
//! bits  0..2   state     (pending | signaled | waking | shutdown)
//! bit   2      notified  (a wake signal has been posted, not yet consumed)
//! bits  3..17  idle      (workers parked on the idle event)
//! bits 17..31  spawned   (workers currently alive)
//! ```

/// Maximum worker count representable in the 14-bit `spawned` field.
pub const MAX_THREADS: usize = (1 << 14) - 1;

const STATE_MASK: u32 = 0b11;
const NOTIFIED_BIT: u32 = 1 << 2;
const IDLE_SHIFT: u32 = 3;
const SPAWNED_SHIFT: u32 = 17;
const COUNT_MASK: u32 = (1 << 14) - 1;

/// One `spawned` unit, positioned for direct `fetch_sub` on the packed word.
pub(crate) const SPAWNED_ONE: u32 = 1 << SPAWNED_SHIFT;

/// Pool lifecycle state, two bits of the coordination word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolState {
    /// No wake signal pending; notifications may wake or spawn.
    Pending = 0,
    /// A wake signal has been posted; the next waiter to consume it becomes
    /// the waking thread.
    Signaled = 1,
    /// Exactly one worker holds the waking token.
    Waking = 2,
    /// Terminal; absorbs every other transition.
    Shutdown = 3,
}

impl PoolState {
    fn from_bits(bits: u32) -> PoolState {
        match bits & STATE_MASK {
            0 => PoolState::Pending,
            1 => PoolState::Signaled,
            2 => PoolState::Waking,
            _ => PoolState::Shutdown,
        }
    }
}

/// Decoded view of the coordination word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncState {
    pub idle: u32,
    pub spawned: u32,
    pub notified: bool,
    pub state: PoolState,
}

impl SyncState {
    pub fn unpack(word: u32) -> SyncState {
        SyncState {
            idle: (word >> IDLE_SHIFT) & COUNT_MASK,
            spawned: (word >> SPAWNED_SHIFT) & COUNT_MASK,
            notified: word & NOTIFIED_BIT != 0,
            state: PoolState::from_bits(word),
        }
    }

    pub fn pack(self) -> u32 {
        debug_assert!(self.idle <= COUNT_MASK);
        debug_assert!(self.spawned <= COUNT_MASK);
        (self.state as u32)
            | if self.notified { NOTIFIED_BIT } else { 0 }
            | (self.idle << IDLE_SHIFT)
            | (self.spawned << SPAWNED_SHIFT)
    }
}
