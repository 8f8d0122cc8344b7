//! Futex-backed event used for idle parking and the join handshake.
//!
//! States: `EMPTY → WAITING → NOTIFIED`, with `SHUTDOWN` absorbing. After a
//! futex wake, a waiter re-arms by consuming `NOTIFIED` back to `WAITING`
//! rather than `EMPTY`: there may be other sleepers on the futex word that
//! the kernel did not wake, and leaving `WAITING` behind guarantees the next
//! `notify`/`shutdown` issues the wake they are still waiting for. The last
//! wake can therefore be spurious; the sleeper just re-checks.

use std::sync::atomic::{fence, AtomicU32, Ordering};

use atomic_wait::{wait as futex_wait, wake_all, wake_one};

const EMPTY: u32 = 0;
const WAITING: u32 = 1;
const NOTIFIED: u32 = 2;
const SHUTDOWN: u32 = 3;

pub(crate) struct Event {
    state: AtomicU32,
}

impl Event {
    pub const fn new() -> Event {
        Event {
            state: AtomicU32::new(EMPTY),
        }
    }

    /// Block until a notification or shutdown is observed. Consumes at most
    /// one notification; returns immediately under `SHUTDOWN`.
    pub fn wait(&self) {
        let mut acquire_with = EMPTY;
        let mut state = self.state.load(Ordering::Relaxed);

        loop {
            // Shutdown is absorbing; synchronize with the shutdown() publisher.
            if state == SHUTDOWN {
                fence(Ordering::Acquire);
                return;
            }

            // Consume a notification. Acquire pairs with the Release in
            // wake() so queue pushes made before notify() are visible.
            if state == NOTIFIED {
                match self.state.compare_exchange_weak(
                    state,
                    acquire_with,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(updated) => {
                        state = updated;
                        continue;
                    }
                }
            }

            // Arm the event before sleeping on it.
            if state != WAITING {
                match self.state.compare_exchange_weak(
                    state,
                    WAITING,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {}
                    Err(updated) => {
                        state = updated;
                        continue;
                    }
                }
            }

            // Sleep until the word changes away from WAITING, then re-arm
            // with WAITING (see module docs for the cascade rationale).
            futex_wait(&self.state, WAITING);
            state = self.state.load(Ordering::Relaxed);
            acquire_with = WAITING;
        }
    }

    /// Post one notification, waking a single sleeper if any.
    pub fn notify(&self) {
        self.wake(NOTIFIED, false);
    }

    /// Enter the absorbing shutdown state, waking every sleeper.
    pub fn shutdown(&self) {
        self.wake(SHUTDOWN, true);
    }

    fn wake(&self, release_with: u32, all: bool) {
        // Release pairs with the Acquire on the consuming side.
        let state = self.state.swap(release_with, Ordering::Release);

        // Only issue a futex wake when someone armed the event.
        if state == WAITING {
            if all {
                wake_all(&self.state);
            } else {
                wake_one(&self.state);
            }
        }
    }
}
