//! Lock-free, work-stealing thread pool.
//!
//! Workers are OS threads spawned lazily by the notification path, up to a
//! fixed bound. Each worker owns a bounded ring buffer and an unbounded
//! overflow queue; a global queue takes submissions from non-worker threads.
//! One packed atomic word ([`sync::SyncState`]) coordinates idle / wake /
//! spawn / shutdown so that every scheduling decision is a single CAS.
//!
//! # Wake token
//!
//! At most one worker at a time is "waking": it either finds work (and then
//! hands the token onward via `notify`) or goes back to sleep (demoting the
//! state to pending). Funneling wake-ups through one token avoids stampedes
//! where every sleeper races for the same task.
//!
//! # Shutdown
//!
//! `shutdown()` flips the state machine into its absorbing state and wakes
//! every parked worker. Workers drain into `unregister`; the last one out
//! notifies the `join()`er, which then releases the registration LIFO one
//! thread at a time — each exiting worker wakes the next — so nothing ever
//! reads a thread record after its owner has left.

mod buffer;
mod event;
mod queue;
mod sync;
mod task;

pub use sync::MAX_THREADS;
pub use task::{Batch, Task};

use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use buffer::{Buffer, Stole, TaskListBuilder};
use event::Event;
use queue::Queue;
use sync::{PoolState, SyncState, SPAWNED_ONE};

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on worker threads. Clamped to `1..=MAX_THREADS`.
    pub max_threads: usize,
    /// Stack size per worker thread, in bytes. Clamped to at least 64 KiB.
    pub stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_threads: num_cpus::get(),
            stack_size: 1 << 20,
        }
    }
}

/// Returned by `wait` when the pool has entered shutdown.
struct Shutdown;

/// A fixed-bound work-stealing pool over intrusive [`Task`]s.
///
/// Workers are not spawned at construction; the first `schedule` brings one
/// up, and further notifications add more while work outpaces them.
pub struct ThreadPool {
    shared: Arc<Shared>,
}

struct Shared {
    stack_size: usize,
    max_threads: u32,
    /// The packed coordination word.
    sync: CachePadded<AtomicU32>,
    /// Workers park here when out of work.
    idle_event: Event,
    /// `join()` parks here until the last worker unregisters.
    join_event: Event,
    /// Global queue for submissions from non-worker threads.
    injected: CachePadded<Queue>,
    /// Lock-free LIFO of registered worker records.
    threads: AtomicPtr<Thread>,
}

/// Per-worker record, stack-allocated in the worker's entry function and
/// linked into the pool's registration LIFO.
struct Thread {
    /// Next record in the registration LIFO.
    next: Cell<Option<NonNull<Thread>>>,
    /// Rotating steal victim; round-robins along the registration list.
    target: Cell<Option<NonNull<Thread>>>,
    /// Released by the previous thread in the teardown cascade.
    join_event: Event,
    run_buffer: Buffer,
    run_queue: Queue,
    /// Identity of the owning pool, so `schedule` on a worker thread only
    /// routes locally for its own pool.
    pool: *const Shared,
}

thread_local! {
    /// The current thread's worker record, when it is a pool worker.
    static CURRENT: Cell<Option<NonNull<Thread>>> = const { Cell::new(None) };
}

impl ThreadPool {
    /// Construct a pool. No threads are spawned until work arrives.
    pub fn new(config: PoolConfig) -> ThreadPool {
        ThreadPool {
            shared: Arc::new(Shared {
                stack_size: config.stack_size.max(64 << 10),
                max_threads: config.max_threads.clamp(1, MAX_THREADS) as u32,
                sync: CachePadded::new(AtomicU32::new(0)),
                idle_event: Event::new(),
                join_event: Event::new(),
                injected: CachePadded::new(Queue::new()),
                threads: AtomicPtr::new(std::ptr::null_mut()),
            }),
        }
    }

    /// The configured worker bound.
    pub fn max_threads(&self) -> usize {
        self.shared.max_threads as usize
    }

    /// Enqueue a batch of tasks. Safe to call from any thread, including
    /// from inside a running task. Returns promptly; execution is
    /// asynchronous. After `shutdown`, batches are still accepted but may
    /// never run.
    ///
    /// # Safety
    /// Every task linked into `batch` must stay alive and unmoved until its
    /// callback has run (or the process exits, for tasks submitted after
    /// `shutdown`). A task must not be scheduled again until its callback
    /// has completed.
    pub unsafe fn schedule(&self, mut batch: Batch) {
        let Some(list) = batch.take_list() else { return };
        let mut builder = TaskListBuilder::from_list(list);

        // Worker threads of this pool push locally; everyone else injects.
        // A non-null CURRENT points at the live record of the calling worker
        // thread itself.
        let local = match CURRENT.with(|cell| cell.get()) {
            Some(thread) if thread.as_ref().pool == Arc::as_ptr(&self.shared) => {
                Some(thread.as_ref())
            }
            _ => None,
        };

        match local {
            Some(thread) => {
                if thread.run_buffer.push(&mut builder).is_err() {
                    // Ring overflow: half the buffer plus this batch moved
                    // into the builder as one chain.
                    let list = builder.take_list().expect("overflow chain is non-empty");
                    thread.run_queue.push(list);
                }
            }
            None => {
                let list = builder.take_list().expect("batch is non-empty");
                self.shared.injected.push(list);
            }
        }

        Shared::notify(&self.shared, false);
    }

    /// Announce termination: workers finish their current task and exit.
    /// Tasks still queued may never run. Idempotent after the first
    /// successful transition.
    pub fn shutdown(&self) {
        let mut sync = SyncState::unpack(self.shared.sync.load(Ordering::Relaxed));
        while sync.state != PoolState::Shutdown {
            let mut new_sync = sync;
            new_sync.notified = true;
            new_sync.state = PoolState::Shutdown;
            new_sync.idle = 0;

            // AcqRel: synchronizes with both wait() and notify().
            match self.shared.sync.compare_exchange_weak(
                sync.pack(),
                new_sync.pack(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if sync.idle > 0 {
                        self.shared.idle_event.shutdown();
                    }
                    return;
                }
                Err(updated) => sync = SyncState::unpack(updated),
            }
        }
    }

    /// Block until every worker has exited. Call exactly once, after
    /// [`ThreadPool::shutdown`].
    pub fn join(&self) {
        // Wait for the workers to be shut down and unregistered.
        let mut sync = SyncState::unpack(self.shared.sync.load(Ordering::Relaxed));
        if !(sync.state == PoolState::Shutdown && sync.spawned == 0) {
            self.shared.join_event.wait();
            sync = SyncState::unpack(self.shared.sync.load(Ordering::Relaxed));
        }
        debug_assert_eq!(sync.state, PoolState::Shutdown);
        debug_assert_eq!(sync.spawned, 0);

        // Start the teardown cascade: release the most recently registered
        // thread; each thread forwards the signal to its `next` on exit.
        if let Some(thread) = NonNull::new(self.shared.threads.load(Ordering::Acquire)) {
            // Safety: spawned == 0 means every worker sits parked in
            // unregister; records stay alive until their event fires.
            unsafe { thread.as_ref() }.join_event.notify();
        }
    }
}

impl Shared {
    /// Post a wake signal. `is_waking` hands the token back from the
    /// current waking worker.
    fn notify(me: &Arc<Shared>, is_waking: bool) {
        // Fast path: an unconsumed signal already covers this wake. The
        // waking thread must always run the slow path to hand off or drop
        // its token.
        if !is_waking {
            let sync = SyncState::unpack(me.sync.load(Ordering::Relaxed));
            if sync.notified {
                return;
            }
        }
        Self::notify_slow(me, is_waking);
    }

    fn notify_slow(me: &Arc<Shared>, is_waking: bool) {
        let mut sync = SyncState::unpack(me.sync.load(Ordering::Relaxed));
        while sync.state != PoolState::Shutdown {
            let can_wake = is_waking || sync.state == PoolState::Pending;
            if is_waking {
                debug_assert_eq!(sync.state, PoolState::Waking);
            }

            let mut new_sync = sync;
            new_sync.notified = true;
            if can_wake && sync.idle > 0 {
                // Wake an idle worker.
                new_sync.state = PoolState::Signaled;
            } else if can_wake && sync.spawned < me.max_threads {
                // Bring up a new worker.
                new_sync.state = PoolState::Signaled;
                new_sync.spawned += 1;
            } else if is_waking {
                // No one to hand the token to; drop it.
                new_sync.state = PoolState::Pending;
            } else if sync.notified {
                return;
            }

            // Release pairs with the Acquire in wait(): queue pushes
            // happen-before a notified worker starts popping.
            match me.sync.compare_exchange_weak(
                sync.pack(),
                new_sync.pack(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if can_wake && sync.idle > 0 {
                        return me.idle_event.notify();
                    }
                    if can_wake && sync.spawned < me.max_threads {
                        if let Err(err) = Self::spawn_worker(me) {
                            // The work stays queued for another worker; undo
                            // the spawned increment.
                            log::warn!("pool worker spawn failed: {err}");
                            Self::unregister(me, None);
                        }
                    }
                    return;
                }
                Err(updated) => sync = SyncState::unpack(updated),
            }
        }
    }

    fn spawn_worker(me: &Arc<Shared>) -> std::io::Result<()> {
        let shared = Arc::clone(me);
        std::thread::Builder::new()
            .name("pyscan-worker".to_string())
            .stack_size(me.stack_size)
            .spawn(move || worker_run(shared))
            .map(drop)
    }

    /// Park until there is a reason to run. Returns the caller's new waking
    /// status, or `Shutdown`.
    fn wait(me: &Arc<Shared>, mut is_waking: bool) -> Result<bool, Shutdown> {
        let mut is_idle = false;
        let mut sync = SyncState::unpack(me.sync.load(Ordering::Relaxed));

        loop {
            if sync.state == PoolState::Shutdown {
                return Err(Shutdown);
            }
            if is_waking {
                debug_assert_eq!(sync.state, PoolState::Waking);
            }

            // Consume a posted notification.
            if sync.notified {
                let mut new_sync = sync;
                new_sync.notified = false;
                if is_idle {
                    new_sync.idle -= 1;
                }
                if sync.state == PoolState::Signaled {
                    new_sync.state = PoolState::Waking;
                }

                // Acquire pairs with the Release in notify(): the pushes
                // behind this signal are visible after we return.
                match me.sync.compare_exchange_weak(
                    sync.pack(),
                    new_sync.pack(),
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Consuming a signaled transition confers the token.
                        return Ok(is_waking || sync.state == PoolState::Signaled);
                    }
                    Err(updated) => {
                        sync = SyncState::unpack(updated);
                        continue;
                    }
                }
            }

            // Nothing posted: mark ourselves idle before sleeping.
            if !is_idle {
                let mut new_sync = sync;
                new_sync.idle += 1;
                if is_waking {
                    new_sync.state = PoolState::Pending;
                }

                match me.sync.compare_exchange_weak(
                    sync.pack(),
                    new_sync.pack(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        is_waking = false;
                        is_idle = true;
                        continue;
                    }
                    Err(updated) => {
                        sync = SyncState::unpack(updated);
                        continue;
                    }
                }
            }

            me.idle_event.wait();
            sync = SyncState::unpack(me.sync.load(Ordering::Relaxed));
        }
    }

    /// Link a new worker record into the registration LIFO.
    fn register(me: &Arc<Shared>, thread: &Thread) {
        let thread_ptr = NonNull::from(thread).as_ptr();
        let mut head = me.threads.load(Ordering::Relaxed);
        loop {
            thread.next.set(NonNull::new(head));
            // Release publishes the record (and its link) to stealers
            // walking the list with Acquire loads.
            match me.threads.compare_exchange_weak(
                head,
                thread_ptr,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(updated) => head = updated,
            }
        }
    }

    /// Reverse one spawned increment: a worker exiting, or a spawn that
    /// never started. Worker records then park until the join cascade
    /// releases them.
    fn unregister(me: &Arc<Shared>, thread: Option<&Thread>) {
        // Release pairs with join()'s Acquire traversal of the record list.
        let sync = SyncState::unpack(me.sync.fetch_sub(SPAWNED_ONE, Ordering::Release));
        debug_assert!(sync.spawned >= 1);

        // The last exiting worker wakes the join()er, who starts the
        // teardown cascade.
        if sync.state == PoolState::Shutdown && sync.spawned == 1 {
            me.join_event.notify();
        }

        let Some(thread) = thread else { return };
        thread.join_event.wait();

        // Forward the shutdown signal using only our own record; the pool
        // may already be mid-teardown.
        if let Some(next) = thread.next.get() {
            // Safety: records later in the LIFO belong to workers still
            // parked on their own join events.
            unsafe { next.as_ref() }.join_event.notify();
        }
    }
}

/// Worker thread entry: register, run the wait/pop loop, unregister.
fn worker_run(shared: Arc<Shared>) {
    let thread = Thread {
        next: Cell::new(None),
        target: Cell::new(None),
        join_event: Event::new(),
        run_buffer: Buffer::new(),
        run_queue: Queue::new(),
        pool: Arc::as_ptr(&shared),
    };

    Shared::register(&shared, &thread);
    CURRENT.with(|cell| cell.set(Some(NonNull::from(&thread))));

    let mut is_waking = false;
    loop {
        is_waking = match Shared::wait(&shared, is_waking) {
            Ok(waking) => waking,
            Err(Shutdown) => break,
        };

        while let Some(stole) = thread.pop(&shared) {
            // Work became visible to stealers, or we hold the wake token:
            // either way, exactly one hand-off notification.
            if stole.pushed || is_waking {
                Shared::notify(&shared, is_waking);
            }
            is_waking = false;

            // Safety: the task was claimed from exactly one queue and the
            // submitter guarantees it is alive until this call returns.
            unsafe { Task::execute(stole.task) };
        }
    }

    CURRENT.with(|cell| cell.set(None));
    Shared::unregister(&shared, Some(&thread));
}

impl Thread {
    /// Find the next task: local buffer, local overflow, global queue, then
    /// steal from peers via the rotating target.
    fn pop(&self, shared: &Arc<Shared>) -> Option<Stole> {
        if let Some(task) = self.run_buffer.pop() {
            return Some(Stole {
                task,
                pushed: false,
            });
        }

        if let Some(stole) = self.run_buffer.consume(&self.run_queue) {
            return Some(stole);
        }

        if let Some(stole) = self.run_buffer.consume(&shared.injected) {
            return Some(stole);
        }

        // One lap over the registered peers.
        let mut remaining = SyncState::unpack(shared.sync.load(Ordering::Relaxed)).spawned;
        while remaining > 0 {
            remaining -= 1;

            let target = match self.target.get() {
                Some(target) => target,
                None => NonNull::new(shared.threads.load(Ordering::Acquire))
                    .expect("the registration list contains at least this worker"),
            };
            // Safety: registered records outlive the scan; workers only
            // tear down after shutdown parks them in unregister.
            let target_ref = unsafe { target.as_ref() };
            self.target.set(target_ref.next.get());

            // Prefer the overflow queue: the owner drains it last.
            if let Some(stole) = self.run_buffer.consume(&target_ref.run_queue) {
                return Some(stole);
            }

            // Our own buffer is already known empty.
            if std::ptr::eq(target_ref, self) {
                continue;
            }

            if let Some(stole) = self.run_buffer.steal(&target_ref.run_buffer) {
                return Some(stole);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pool_spawns_nothing() {
        let pool = ThreadPool::new(PoolConfig {
            max_threads: 4,
            stack_size: 1 << 20,
        });
        let sync = SyncState::unpack(pool.shared.sync.load(Ordering::Relaxed));
        assert_eq!(sync.spawned, 0);
        assert_eq!(sync.idle, 0);
        assert_eq!(sync.state, PoolState::Pending);
    }

    #[test]
    fn test_config_clamps() {
        let pool = ThreadPool::new(PoolConfig {
            max_threads: 0,
            stack_size: 0,
        });
        assert_eq!(pool.max_threads(), 1);
        assert!(pool.shared.stack_size >= 64 << 10);

        let pool = ThreadPool::new(PoolConfig {
            max_threads: usize::MAX,
            stack_size: 1 << 20,
        });
        assert_eq!(pool.max_threads(), MAX_THREADS);
    }

    #[test]
    fn test_shutdown_then_join_without_workers() {
        let pool = ThreadPool::new(PoolConfig::default());
        pool.shutdown();
        pool.join();
        let sync = SyncState::unpack(pool.shared.sync.load(Ordering::Relaxed));
        assert_eq!(sync.state, PoolState::Shutdown);
        assert_eq!(sync.spawned, 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = ThreadPool::new(PoolConfig::default());
        pool.shutdown();
        pool.shutdown();
        pool.shutdown();
        pool.join();
    }

    #[test]
    fn test_schedule_empty_batch_is_noop() {
        let pool = ThreadPool::new(PoolConfig::default());
        // Safety: the batch is empty; no task pointers are involved.
        unsafe { pool.schedule(Batch::new()) };
        let sync = SyncState::unpack(pool.shared.sync.load(Ordering::Relaxed));
        assert_eq!(sync.spawned, 0, "empty schedule must not spawn");
        pool.shutdown();
        pool.join();
    }
}
